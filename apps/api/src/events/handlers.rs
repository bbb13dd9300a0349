use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    Json,
};
use futures::Stream;
use serde::Serialize;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};

use super::{CacheEntry, EventHub, SubscriberId};
use crate::state::AppState;

/// Unsubscribes when the client's stream is dropped (disconnect).
struct SubscriptionGuard {
    hub: Arc<EventHub>,
    id: SubscriberId,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}

/// Subscribes to `hub` and yields each frame as one SSE `data:` message.
fn event_stream(hub: Arc<EventHub>) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    let subscription = hub.subscribe();
    let guard = SubscriptionGuard {
        hub,
        id: subscription.id,
    };
    // The closure owns the guard, so unsubscribing happens exactly when
    // axum drops the stream.
    ReceiverStream::new(subscription.frames).map(move |frame| {
        let _owned_until_stream_drops = &guard;
        Ok(SseEvent::default().data(frame))
    })
}

/// GET /api/v1/events
///
/// Long-lived event stream: cache replay first, then live job events.
pub async fn handle_subscribe(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    Sse::new(event_stream(state.hub.clone())).keep_alive(KeepAlive::default())
}

#[derive(Debug, Serialize)]
pub struct CacheSnapshotResponse {
    pub subscribers: usize,
    pub cache: HashMap<String, CacheEntry>,
}

/// GET /api/v1/events/cache
///
/// Current per-job cache and live subscriber count.
pub async fn handle_cache_snapshot(State(state): State<AppState>) -> Json<CacheSnapshotResponse> {
    Json(CacheSnapshotResponse {
        subscribers: state.hub.subscriber_count(),
        cache: state.hub.cache_snapshot(),
    })
}
