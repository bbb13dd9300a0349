use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::events::DEFAULT_BATCH_SIZE;
use crate::llm_client::{DEFAULT_API_URL, DEFAULT_MODEL};

/// Object storage settings. Present only when a bucket and credentials are set.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub openai_api_key: String,
    pub llm_model: String,
    pub llm_api_url: String,
    pub port: u16,
    pub rust_log: String,
    /// Root for `uploads/`, `logs/` and `records/`.
    pub data_dir: PathBuf,
    /// When set, job records live in PostgreSQL instead of the JSON file.
    pub database_url: Option<String>,
    pub s3: Option<S3Config>,
    pub token_batch_size: usize,
    pub subscriber_queue_capacity: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let s3 = match (
            optional_env("S3_BUCKET"),
            optional_env("AWS_ACCESS_KEY_ID"),
            optional_env("AWS_SECRET_ACCESS_KEY"),
        ) {
            (Some(bucket), Some(access_key_id), Some(secret_access_key)) => Some(S3Config {
                bucket,
                endpoint: optional_env("S3_ENDPOINT"),
                region: optional_env("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string()),
                access_key_id,
                secret_access_key,
            }),
            _ => None,
        };

        Ok(Config {
            openai_api_key: require_env("OPENAI_API_KEY")?,
            llm_model: optional_env("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            llm_api_url: optional_env("LLM_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            port: parse_env("PORT", 5000)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            data_dir: optional_env("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            database_url: optional_env("DATABASE_URL"),
            s3,
            token_batch_size: parse_env("TOKEN_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            subscriber_queue_capacity: parse_env("SUBSCRIBER_QUEUE_CAPACITY", 256)?,
        })
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn records_file(&self) -> PathBuf {
        self.data_dir.join("records").join("resumes.json")
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_env(key) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        None => Ok(default),
    }
}
