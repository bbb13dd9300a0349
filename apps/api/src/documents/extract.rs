use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("could not read PDF: {0}")]
    Pdf(String),

    #[error("document contains no extractable text")]
    Empty,

    #[error("extraction task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Turns an uploaded document into plain text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, content: Bytes) -> Result<String, ExtractError>;
}

/// Whole-document text extraction with `pdf-extract`. Runs on the blocking
/// pool since parsing is CPU-bound.
pub struct PdfTextExtractor;

#[async_trait]
impl TextExtractor for PdfTextExtractor {
    async fn extract(&self, content: Bytes) -> Result<String, ExtractError> {
        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&content))
            .await?
            .map_err(|e| ExtractError::Pdf(e.to_string()))?;

        if text.trim().is_empty() {
            return Err(ExtractError::Empty);
        }
        Ok(text)
    }
}
