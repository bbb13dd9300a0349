use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// Persisted record of one uploaded resume and its processing outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    /// Content hash of the upload.
    pub id: String,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub status: JobStatus,
    pub date: DateTime<Utc>,
    /// Compact JSON from the pipeline; empty until completed.
    pub results: String,
}

impl JobRecord {
    pub fn processing(id: &str, name: &str, size: u64, mime_type: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            size,
            mime_type: mime_type.to_string(),
            status: JobStatus::Processing,
            date: Utc::now(),
            results: String::new(),
        }
    }

    pub fn apply(&mut self, update: JobUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(results) = update.results {
            self.results = results;
        }
    }
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub results: Option<String>,
}

impl JobUpdate {
    pub fn completed(results: String) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            results: Some(results),
        }
    }

    pub fn failed() -> Self {
        Self {
            status: Some(JobStatus::Failed),
            results: None,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: String,
    pub name: String,
    pub size: i64,
    pub mime_type: String,
    pub status: String,
    pub date: DateTime<Utc>,
    pub results: String,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = String;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(JobRecord {
            status: row.status.parse()?,
            id: row.id,
            name: row.name,
            size: u64::try_from(row.size).map_err(|_| format!("negative size {}", row.size))?,
            mime_type: row.mime_type,
            date: row.date,
            results: row.results,
        })
    }
}
