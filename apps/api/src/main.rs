mod config;
mod documents;
mod errors;
mod events;
mod jobs;
mod llm_client;
mod pipeline;
mod routes;
mod state;

use anyhow::{Context, Result};
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, S3Config};
use crate::documents::{ObjectMirror, PdfTextExtractor, UploadStore};
use crate::events::{AuditLog, EventHub};
use crate::jobs::pg_store::PgJobStore;
use crate::jobs::store::{JobStore, JsonFileStore};
use crate::jobs::JobCoordinator;
use crate::llm_client::OpenAiEngine;
use crate::pipeline::Orchestrator;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Resume API v{}", env!("CARGO_PKG_VERSION"));

    let logs_dir = config.logs_dir();
    tokio::fs::create_dir_all(&logs_dir)
        .await
        .with_context(|| format!("creating log directory {}", logs_dir.display()))?;
    let hub = Arc::new(EventHub::new(
        config.subscriber_queue_capacity,
        AuditLog::new(logs_dir),
    ));

    let mirror = match &config.s3 {
        Some(s3) => {
            let client = build_s3_client(s3).await;
            info!("S3 mirror enabled (bucket: {})", s3.bucket);
            Some(ObjectMirror::new(client, s3.bucket.clone()))
        }
        None => {
            info!("S3 mirror disabled");
            None
        }
    };
    let uploads = UploadStore::open(config.uploads_dir(), mirror).await?;

    let store: Arc<dyn JobStore> = match &config.database_url {
        Some(url) => Arc::new(PgJobStore::connect(url).await?),
        None => {
            let path = config.records_file();
            info!("Using JSON job store at {}", path.display());
            Arc::new(JsonFileStore::open(path).await?)
        }
    };

    let engine = OpenAiEngine::new(
        config.openai_api_key.clone(),
        config.llm_api_url.clone(),
        config.llm_model.clone(),
    );
    info!("LLM engine initialized (model: {})", engine.model());

    let orchestrator = Orchestrator::new(Arc::new(engine), hub.clone(), config.token_batch_size);
    let jobs = JobCoordinator::new(
        store,
        uploads,
        Arc::new(PdfTextExtractor),
        orchestrator,
        hub.clone(),
    );

    let state = AppState {
        hub,
        jobs,
        config: config.clone(),
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Constructs an S3 client for MinIO (custom endpoint) or AWS.
async fn build_s3_client(s3: &S3Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &s3.access_key_id,
        &s3.secret_access_key,
        None,
        None,
        "resume-api-static",
    );

    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new(s3.region.clone()))
        .credentials_provider(credentials);
    if let Some(endpoint) = &s3.endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    let shared = loader.load().await;

    // MinIO needs path-style addressing.
    let s3_config = aws_sdk_s3::config::Builder::from(&shared)
        .force_path_style(s3.endpoint.is_some())
        .build();
    aws_sdk_s3::Client::from_conf(s3_config)
}
