//! In-memory publish/subscribe hub for job events.
//!
//! Holds the live subscriber set and a per-job cache of the latest known
//! state. New subscribers receive one `cache` event per cached job before any
//! live event. Both collections sit behind one mutex; no lock is held across
//! an await point.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{AuditLog, CacheEntry, Event};

/// Serialized JSON of one event, shared across all subscriber queues.
pub type Frame = Arc<str>;

pub type SubscriberId = Uuid;

struct Subscriber {
    id: SubscriberId,
    tx: mpsc::Sender<Frame>,
}

#[derive(Default)]
struct HubState {
    subscribers: Vec<Subscriber>,
    cache: HashMap<String, CacheEntry>,
}

impl HubState {
    /// Progress overwrites (last write wins, a lower stage regresses it);
    /// data always appends.
    fn apply(&mut self, event: &Event) {
        match event {
            Event::Progress { job_id, stage } => {
                let entry = self.cache.entry(job_id.clone()).or_default();
                entry.progress = *stage;
            }
            Event::Data { job_id, text } => {
                let entry = self.cache.entry(job_id.clone()).or_default();
                entry.data.push_str(text);
            }
            Event::Cache { .. } => {}
        }
    }
}

/// A registered subscriber: its id (for unsubscribing) and the receiving end
/// of its bounded frame queue.
pub struct Subscription {
    pub id: SubscriberId,
    pub frames: mpsc::Receiver<Frame>,
}

pub struct EventHub {
    state: Mutex<HubState>,
    queue_capacity: usize,
    audit: AuditLog,
}

impl EventHub {
    pub fn new(queue_capacity: usize, audit: AuditLog) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            queue_capacity: queue_capacity.max(1),
            audit,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new subscriber and queues one `cache` event per cached job.
    ///
    /// Registration and replay happen under the same lock, so the subscriber
    /// never sees an event published before it joined other than the replay.
    pub fn subscribe(&self) -> Subscription {
        let id = Uuid::new_v4();
        let mut state = self.lock();

        // Room for the full replay on top of the live queue.
        let (tx, rx) = mpsc::channel(self.queue_capacity + state.cache.len());
        for (job_id, entry) in &state.cache {
            let replay = Event::Cache {
                job_id: job_id.clone(),
                progress: entry.progress,
                data: entry.data.clone(),
            };
            match replay.to_json() {
                Ok(json) => {
                    if let Err(e) = tx.try_send(Frame::from(json)) {
                        warn!("Failed to queue cache replay for {job_id}: {e}");
                    }
                }
                Err(e) => warn!("Failed to serialize cache replay for {job_id}: {e}"),
            }
        }
        let replayed = state.cache.len();
        state.subscribers.push(Subscriber { id, tx });
        let total = state.subscribers.len();
        drop(state);

        info!("Subscriber {id} connected ({total} live, {replayed} jobs replayed)");
        self.audit.connection("subscribed");

        Subscription { id, frames: rx }
    }

    /// Removes a subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriberId) {
        let mut state = self.lock();
        let before = state.subscribers.len();
        state.subscribers.retain(|s| s.id != id);
        let removed = state.subscribers.len() < before;
        drop(state);

        if removed {
            info!("Subscriber {id} disconnected");
            self.audit.connection("unsubscribed");
        } else {
            debug!("Unsubscribe for unknown subscriber {id} ignored");
        }
    }

    /// Fans an event out to every subscriber in subscription order, then
    /// records it in the audit log and the job cache.
    ///
    /// Delivery is a non-blocking enqueue. A subscriber whose queue is full is
    /// dropped; a subscriber whose receiver is gone is pruned. Neither affects
    /// delivery to the others.
    pub fn publish(&self, event: &Event) {
        let frame = match event.to_json() {
            Ok(json) => Some(Frame::from(json)),
            Err(e) => {
                warn!("Failed to serialize event for {}: {e}", event.job_id());
                None
            }
        };

        let mut state = self.lock();
        if let Some(frame) = frame {
            state.subscribers.retain(|s| match s.tx.try_send(frame.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!("Subscriber {} is not keeping up; disconnecting", s.id);
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Subscriber {} already gone; pruning", s.id);
                    false
                }
            });
        }
        state.apply(event);
        drop(state);

        self.audit.event(event);
    }

    /// Drops the cached state for a job. Unknown ids are ignored.
    pub fn remove_cache(&self, job_id: &str) {
        if self.lock().cache.remove(job_id).is_some() {
            debug!("Evicted cache entry for {job_id}");
        }
    }

    #[cfg(test)]
    pub fn cached(&self, job_id: &str) -> Option<CacheEntry> {
        self.lock().cache.get(job_id).cloned()
    }

    pub fn cache_snapshot(&self) -> HashMap<String, CacheEntry> {
        self.lock().cache.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}
