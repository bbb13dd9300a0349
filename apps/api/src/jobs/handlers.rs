//! Axum route handlers for the Resume API.

use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};

use crate::documents::is_job_id;
use crate::errors::AppError;
use crate::jobs::{JobRecord, SubmitStatus, Upload};
use crate::state::AppState;

/// Multipart field carrying the document.
const FILE_FIELD: &str = "file";

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: SubmitStatus,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct PresignedUrlResponse {
    pub url: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/resumes
///
/// Accepts a multipart PDF upload. 200 when newly enqueued, 202 when already
/// in flight or re-enqueued after a failure, 409 when already completed.
pub async fn handle_submit(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitResponse>), AppError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed upload: {e}")))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let mime_type = field.content_type().unwrap_or_default().to_string();
        let content = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("Malformed upload: {e}")))?;
        upload = Some(Upload {
            file_name,
            mime_type,
            content,
        });
        break;
    }
    let upload = upload.ok_or_else(|| AppError::Validation("No file uploaded".to_string()))?;
    let file_name = upload.file_name.clone();

    let submission = state.jobs.submit(upload).await?;
    // Detached: the run records its own outcome.
    drop(submission.run);
    let job_id = submission.job_id;
    let (code, message) = match submission.status {
        SubmitStatus::Enqueued => (
            StatusCode::OK,
            format!("{file_name} has been enqueued with hash {job_id}"),
        ),
        SubmitStatus::Accepted => (
            StatusCode::ACCEPTED,
            format!("{file_name} is in processing and has already been enqueued with hash {job_id}"),
        ),
        SubmitStatus::Retry => (
            StatusCode::ACCEPTED,
            format!("{file_name} failed while processing and is now enqueued again with hash {job_id}"),
        ),
    };

    Ok((
        code,
        Json(SubmitResponse {
            job_id,
            status: submission.status,
            message,
        }),
    ))
}

/// GET /api/v1/resumes
pub async fn handle_list(State(state): State<AppState>) -> Result<Json<Vec<JobRecord>>, AppError> {
    Ok(Json(state.jobs.store().list().await?))
}

/// GET /api/v1/resumes/:id
pub async fn handle_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobRecord>, AppError> {
    Ok(Json(find_record(&state, &id).await?))
}

/// GET /api/v1/resumes/:id/file
///
/// Streams back the stored PDF.
pub async fn handle_get_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if !is_job_id(&id) {
        return Err(not_found(&id));
    }
    let content = state
        .jobs
        .uploads()
        .read(&id)
        .await
        .map_err(|e| AppError::Internal(e.into()))?
        .ok_or_else(|| not_found(&id))?;
    Ok(([(header::CONTENT_TYPE, "application/pdf")], content))
}

/// GET /api/v1/resumes/:id/url
///
/// Presigned object-storage link, valid for 24 hours.
pub async fn handle_presigned_url(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PresignedUrlResponse>, AppError> {
    let mirror = state
        .jobs
        .uploads()
        .mirror()
        .ok_or_else(|| AppError::NotFound("Object storage is not configured".to_string()))?;
    let record = find_record(&state, &id).await?;
    let url = mirror
        .presigned_url(&record.id)
        .await
        .map_err(|e| AppError::S3(format!("{e:#}")))?;
    Ok(Json(PresignedUrlResponse { url }))
}

/// DELETE /api/v1/resumes/:id
pub async fn handle_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    if !is_job_id(&id) {
        return Err(not_found(&id));
    }
    state.jobs.remove(&id).await?;
    Ok(Json(json!({ "message": "Resume deleted" })))
}

async fn find_record(state: &AppState, id: &str) -> Result<JobRecord, AppError> {
    if !is_job_id(id) {
        return Err(not_found(id));
    }
    state
        .jobs
        .store()
        .get(id)
        .await?
        .ok_or_else(|| not_found(id))
}

fn not_found(id: &str) -> AppError {
    AppError::NotFound(format!("Resume {id} not found"))
}
