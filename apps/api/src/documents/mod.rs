// Uploaded document handling: content identity, text extraction, storage.

pub mod extract;
pub mod storage;

use sha2::{Digest, Sha256};

pub use extract::{PdfTextExtractor, TextExtractor};
pub use storage::{ObjectMirror, UploadStore};

/// Job identifier for an upload: lowercase hex SHA-256 of its bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// True when `id` has the shape of a [`content_hash`] output.
pub fn is_job_id(id: &str) -> bool {
    id.len() == 64 && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
