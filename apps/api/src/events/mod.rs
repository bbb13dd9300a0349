//! Real-time job events: the publish/subscribe hub, its audit log, the token
//! batcher that feeds it, and the SSE endpoints that drain it.

pub mod audit;
pub mod batcher;
pub mod handlers;
pub mod hub;

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

pub use audit::AuditLog;
pub use batcher::{TokenBatcher, DEFAULT_BATCH_SIZE};
pub use hub::{EventHub, SubscriberId};

/// Wire discriminator of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Data,
    Progress,
    Cache,
}

/// A single job event.
///
/// `Cache` is hub-internal: it is produced only when replaying state to a new
/// subscriber and never passed to [`EventHub::publish`] by producers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Incremental text to append to the job's growing document.
    Data { job_id: String, text: String },
    /// A pipeline stage finished; `stage` is its progress index.
    Progress { job_id: String, stage: u32 },
    /// Full snapshot of a job's cached state.
    Cache {
        job_id: String,
        progress: u32,
        data: String,
    },
}

/// Per-job accumulated state held by the hub.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub progress: u32,
    pub data: String,
}

/// JSON shape of an event on the subscribe feed:
/// `{"jobId": "...", "eventType": "data", "data": "..."}`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEvent<'a> {
    pub job_id: Cow<'a, str>,
    pub event_type: EventType,
    pub data: Cow<'a, str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u32>,
}

impl Event {
    pub fn job_id(&self) -> &str {
        match self {
            Event::Data { job_id, .. }
            | Event::Progress { job_id, .. }
            | Event::Cache { job_id, .. } => job_id,
        }
    }

    /// Borrowed wire representation. Progress payloads are the stage index as
    /// a decimal string; cache replays also carry the numeric progress.
    pub fn to_wire(&self) -> WireEvent<'_> {
        match self {
            Event::Data { job_id, text } => WireEvent {
                job_id: Cow::Borrowed(job_id),
                event_type: EventType::Data,
                data: Cow::Borrowed(text),
                progress: None,
            },
            Event::Progress { job_id, stage } => WireEvent {
                job_id: Cow::Borrowed(job_id),
                event_type: EventType::Progress,
                data: Cow::Owned(stage.to_string()),
                progress: None,
            },
            Event::Cache {
                job_id,
                progress,
                data,
            } => WireEvent {
                job_id: Cow::Borrowed(job_id),
                event_type: EventType::Cache,
                data: Cow::Borrowed(data),
                progress: Some(*progress),
            },
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.to_wire())
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.to_wire())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_event_wire_shape() {
        let event = Event::Data {
            job_id: "abc".to_string(),
            text: "Hello".to_string(),
        };
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"jobId": "abc", "eventType": "data", "data": "Hello"})
        );
    }

    #[test]
    fn test_progress_payload_is_decimal_string() {
        let event = Event::Progress {
            job_id: "abc".to_string(),
            stage: 3,
        };
        let wire = event.to_wire();
        assert_eq!(wire.event_type, EventType::Progress);
        assert_eq!(wire.data, "3");
        assert!(wire.progress.is_none());
    }

    #[test]
    fn test_cache_event_carries_progress_and_data() {
        let event = Event::Cache {
            job_id: "abc".to_string(),
            progress: 2,
            data: "## Skills".to_string(),
        };
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(json["eventType"], "cache");
        assert_eq!(json["progress"], 2);
        assert_eq!(json["data"], "## Skills");
    }
}
