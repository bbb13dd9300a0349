use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use tracing::{info, warn};

/// Presigned download links stay valid for a day.
const PRESIGN_TTL: Duration = Duration::from_secs(60 * 60 * 24);

/// Copies uploads to an S3-compatible bucket.
#[derive(Clone)]
pub struct ObjectMirror {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl ObjectMirror {
    pub fn new(client: aws_sdk_s3::Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    fn key(job_id: &str) -> String {
        format!("resumes/{job_id}.pdf")
    }

    pub async fn upload(&self, job_id: &str, content: Bytes) -> Result<()> {
        let key = Self::key(job_id);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(content))
            .content_type("application/pdf")
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("S3 upload failed: {e}"))?;

        info!("Uploaded s3://{}/{}", self.bucket, key);
        Ok(())
    }

    pub async fn presigned_url(&self, job_id: &str) -> Result<String> {
        let config = PresigningConfig::expires_in(PRESIGN_TTL).context("invalid presign TTL")?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(Self::key(job_id))
            .presigned(config)
            .await
            .map_err(|e| anyhow::anyhow!("S3 presign failed: {e}"))?;
        Ok(request.uri().to_string())
    }

    pub async fn remove(&self, job_id: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(Self::key(job_id))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("S3 delete failed: {e}"))?;
        Ok(())
    }
}

/// Uploaded PDFs on local disk as `<dir>/<job_id>.pdf`, optionally mirrored
/// to object storage. Mirror failures are logged, never returned.
#[derive(Clone)]
pub struct UploadStore {
    dir: PathBuf,
    mirror: Option<ObjectMirror>,
}

impl UploadStore {
    pub async fn open(dir: impl Into<PathBuf>, mirror: Option<ObjectMirror>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating upload directory {}", dir.display()))?;
        Ok(Self { dir, mirror })
    }

    fn path(&self, job_id: &str) -> PathBuf {
        self.dir.join(format!("{job_id}.pdf"))
    }

    pub fn mirror(&self) -> Option<&ObjectMirror> {
        self.mirror.as_ref()
    }

    pub async fn save(&self, job_id: &str, content: Bytes) -> std::io::Result<PathBuf> {
        let path = self.path(job_id);
        tokio::fs::write(&path, &content).await?;

        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.upload(job_id, content).await {
                warn!("Object storage mirror failed for {job_id}: {e:#}");
            }
        }
        Ok(path)
    }

    /// `None` when no upload exists for `job_id`.
    pub async fn read(&self, job_id: &str) -> std::io::Result<Option<Vec<u8>>> {
        read_optional(&self.path(job_id)).await
    }

    /// Returns whether a local file was removed.
    pub async fn remove(&self, job_id: &str) -> std::io::Result<bool> {
        let removed = match tokio::fs::remove_file(self.path(job_id)).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e),
        };
        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.remove(job_id).await {
                warn!("Object storage delete failed for {job_id}: {e:#}");
            }
        }
        Ok(removed)
    }
}

async fn read_optional(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
