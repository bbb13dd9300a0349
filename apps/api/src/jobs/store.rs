//! Job record persistence.
//!
//! Two backends: a single pretty-printed JSON document (the default) and a
//! PostgreSQL table (see `pg_store`). Both are read-modify-write; neither is
//! atomic across processes.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::models::{JobRecord, JobUpdate};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts `record`, replacing any existing record with the same id.
    async fn create(&self, record: JobRecord) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Option<JobRecord>, StoreError>;

    /// Applies `update` and returns the updated record, or `None` when no
    /// record has this id.
    async fn update(&self, id: &str, update: JobUpdate) -> Result<Option<JobRecord>, StoreError>;

    /// Returns whether a record was deleted.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// All records, newest first.
    async fn list(&self) -> Result<Vec<JobRecord>, StoreError>;
}

type Records = BTreeMap<String, JobRecord>;

/// All records in one JSON object keyed by id.
pub struct JsonFileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl JsonFileStore {
    /// Opens the store at `path`, creating the parent directory and an empty
    /// document when missing.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if !tokio::fs::try_exists(&path).await? {
            tokio::fs::write(&path, "{}").await?;
            debug!("Created empty record store at {}", path.display());
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    async fn read_all(&self) -> Result<Records, StoreError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn write_all(&self, records: &Records) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(records)?;
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for JsonFileStore {
    async fn create(&self, record: JobRecord) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_all().await?;
        records.insert(record.id.clone(), record);
        self.write_all(&records).await
    }

    async fn get(&self, id: &str) -> Result<Option<JobRecord>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all().await?.remove(id))
    }

    async fn update(&self, id: &str, update: JobUpdate) -> Result<Option<JobRecord>, StoreError> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_all().await?;
        let Some(record) = records.get_mut(id) else {
            warn!("Update for unknown job {id} ignored");
            return Ok(None);
        };
        record.apply(update);
        let updated = record.clone();
        self.write_all(&records).await?;
        Ok(Some(updated))
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_all().await?;
        if records.remove(id).is_none() {
            return Ok(false);
        }
        self.write_all(&records).await?;
        Ok(true)
    }

    async fn list(&self) -> Result<Vec<JobRecord>, StoreError> {
        let _guard = self.lock.lock().await;
        let mut records: Vec<JobRecord> = self.read_all().await?.into_values().collect();
        records.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(records)
    }
}
