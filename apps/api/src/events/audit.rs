//! Append-only audit trail of hub activity.
//!
//! Entries go over one bounded channel to a single writer task, so each file
//! receives them in the order they were recorded. A full queue or a failed
//! write is logged and otherwise ignored; nothing here ever reaches a caller.

use std::path::{Path, PathBuf};

use chrono::Local;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use super::Event;

const CONNECTIONS_LOG: &str = "connections.log";

/// Entries waiting for the writer before new ones are dropped.
const QUEUE_CAPACITY: usize = 1024;

#[derive(Debug)]
struct AuditEntry {
    file_name: String,
    text: String,
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    tx: Option<mpsc::Sender<AuditEntry>>,
}

impl AuditLog {
    /// Logs into `dir`, which must already exist. Needs a tokio runtime for
    /// the writer task; without one the log is disabled.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No runtime available; audit log disabled");
                return Self::disabled();
            }
        };
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        handle.spawn(write_entries(dir, rx));
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Records a subscribe/unsubscribe in the global connections log.
    pub fn connection(&self, action: &str) {
        self.append(CONNECTIONS_LOG.to_string(), format!("[{}]: {action}\n\n", timestamp()));
    }

    /// Records a published event in `<job_id>.log`.
    pub fn event(&self, event: &Event) {
        if self.tx.is_none() {
            return;
        }
        let job_id = event.job_id();
        if job_id.is_empty() || !job_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            warn!("Refusing to write audit log for job id {job_id:?}");
            return;
        }
        let body = match event.to_json_pretty() {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to serialize event for audit log: {e}");
                return;
            }
        };
        self.append(
            format!("{job_id}.log"),
            format!("[{}]\ndata: {body}\n\n", timestamp()),
        );
    }

    fn append(&self, file_name: String, text: String) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(AuditEntry { file_name, text }) {
            Ok(()) => {}
            Err(TrySendError::Full(entry)) => {
                warn!("Audit queue full; dropping entry for {}", entry.file_name)
            }
            Err(TrySendError::Closed(_)) => debug!("Audit writer stopped; dropping entry"),
        }
    }
}

/// Drains the queue until every `AuditLog` clone is gone.
async fn write_entries(dir: PathBuf, mut rx: mpsc::Receiver<AuditEntry>) {
    while let Some(entry) = rx.recv().await {
        let path = dir.join(&entry.file_name);
        if let Err(e) = append_entry(&path, &entry.text).await {
            warn!("Audit log write to {} failed: {e}", path.display());
        }
    }
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

async fn append_entry(path: &Path, entry: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(entry.as_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn read_eventually(path: &Path) -> String {
        for _ in 0..50 {
            if let Ok(contents) = tokio::fs::read_to_string(path).await {
                if !contents.is_empty() {
                    return contents;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        String::new()
    }

    #[tokio::test]
    async fn test_event_is_appended_to_job_log() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::new(dir.path());
        audit.event(&Event::Progress {
            job_id: "abc123".to_string(),
            stage: 2,
        });

        let contents = read_eventually(&dir.path().join("abc123.log")).await;
        assert!(contents.contains("\"eventType\": \"progress\""), "{contents}");
        assert!(contents.contains("\"data\": \"2\""), "{contents}");
    }

    #[tokio::test]
    async fn test_connection_entries_go_to_connections_log() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::new(dir.path());
        audit.connection("subscribed");

        let contents = read_eventually(&dir.path().join(CONNECTIONS_LOG)).await;
        assert!(contents.ends_with("]: subscribed\n\n"), "{contents}");
    }

    #[tokio::test]
    async fn test_missing_directory_is_swallowed() {
        let audit = AuditLog::new("/nonexistent/audit/dir");
        audit.connection("subscribed");
        audit.event(&Event::Data {
            job_id: "abc".to_string(),
            text: "x".to_string(),
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_path_like_job_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::new(dir.path());
        audit.event(&Event::Data {
            job_id: "../escape".to_string(),
            text: "x".to_string(),
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_job_log_keeps_record_order() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::new(dir.path());
        for stage in 0..300 {
            audit.event(&Event::Progress {
                job_id: "ordered".to_string(),
                stage,
            });
        }

        let path = dir.path().join("ordered.log");
        let mut stages = Vec::new();
        for _ in 0..200 {
            let contents = tokio::fs::read_to_string(&path).await.unwrap_or_default();
            stages = contents
                .lines()
                .filter_map(|line| line.trim().strip_prefix("\"data\": \""))
                .filter_map(|rest| rest.trim_end_matches(['"', ',']).parse::<u32>().ok())
                .collect::<Vec<_>>();
            if stages.len() == 300 && contents.ends_with("\n\n") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(stages, (0..300).collect::<Vec<u32>>());
    }

    #[test]
    fn test_without_runtime_is_disabled() {
        let audit = AuditLog::new("/tmp");
        assert!(audit.tx.is_none());
        audit.connection("subscribed");
    }
}
