//! Coalesces streamed token fragments into fewer `data` events.

use std::sync::Arc;

use tracing::debug;

use super::{Event, EventHub};
use crate::llm_client::TokenSink;

/// Fragments per published `data` event.
pub const DEFAULT_BATCH_SIZE: usize = 40;

/// Buffers fragments for one (job, stage) pair.
///
/// The slot buffer is allocated once at `capacity` and flushed the moment it
/// fills, so memory stays bounded however fast fragments arrive.
///
/// On completion the remaining fragments are flushed *before* the stage's
/// `progress` event, so a subscriber that sees progress `n` already holds
/// every byte stage `n` produced.
pub struct TokenBatcher {
    hub: Arc<EventHub>,
    job_id: String,
    stage: u32,
    capacity: usize,
    slots: Vec<String>,
}

impl TokenBatcher {
    pub fn new(hub: Arc<EventHub>, job_id: impl Into<String>, stage: u32, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            hub,
            job_id: job_id.into(),
            stage,
            capacity,
            slots: Vec::with_capacity(capacity),
        }
    }

    fn flush(&mut self) {
        if self.slots.is_empty() {
            return;
        }
        let text = self.slots.concat();
        self.slots.clear();
        self.hub.publish(&Event::Data {
            job_id: self.job_id.clone(),
            text,
        });
    }
}

impl TokenSink for TokenBatcher {
    fn on_fragment(&mut self, text: &str) {
        self.slots.push(text.to_owned());
        if self.slots.len() == self.capacity {
            self.flush();
        }
    }

    fn on_complete(&mut self) {
        self.flush();
        debug!("Stage {} complete for {}", self.stage, self.job_id);
        self.hub.publish(&Event::Progress {
            job_id: self.job_id.clone(),
            stage: self.stage,
        });
    }
}
