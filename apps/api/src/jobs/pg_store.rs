use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use super::models::{JobRecord, JobRow, JobUpdate};
use super::store::{JobStore, StoreError};

/// Job records in the `resume_jobs` table.
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a small pool and ensures the table exists.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let store = Self::new(pool);
        store.migrate().await?;
        info!("PostgreSQL job store ready");
        Ok(store)
    }

    /// Creates the table when missing.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS resume_jobs (
                id         VARCHAR(256)  PRIMARY KEY,
                name       VARCHAR(1024) NOT NULL,
                size       BIGINT        NOT NULL,
                mime_type  VARCHAR(64)   NOT NULL,
                status     VARCHAR(16)   NOT NULL,
                date       TIMESTAMPTZ   NOT NULL,
                results    TEXT          NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        info!("resume_jobs table ready");
        Ok(())
    }
}

fn into_record(row: JobRow) -> Result<JobRecord, StoreError> {
    JobRecord::try_from(row).map_err(StoreError::Corrupt)
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, record: JobRecord) -> Result<(), StoreError> {
        let size = i64::try_from(record.size)
            .map_err(|_| StoreError::Corrupt(format!("size {} out of range", record.size)))?;
        sqlx::query(
            r#"
            INSERT INTO resume_jobs (id, name, size, mime_type, status, date, results)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                size = EXCLUDED.size,
                mime_type = EXCLUDED.mime_type,
                status = EXCLUDED.status,
                date = EXCLUDED.date,
                results = EXCLUDED.results
            "#,
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(size)
        .bind(&record.mime_type)
        .bind(record.status.as_str())
        .bind(record.date)
        .bind(&record.results)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<JobRecord>, StoreError> {
        sqlx::query_as::<_, JobRow>("SELECT * FROM resume_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(into_record)
            .transpose()
    }

    async fn update(&self, id: &str, update: JobUpdate) -> Result<Option<JobRecord>, StoreError> {
        sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE resume_jobs
            SET status = COALESCE($2, status),
                results = COALESCE($3, results)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.results)
        .fetch_optional(&self.pool)
        .await?
        .map(into_record)
        .transpose()
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM resume_jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<JobRecord>, StoreError> {
        sqlx::query_as::<_, JobRow>("SELECT * FROM resume_jobs ORDER BY date DESC")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(into_record)
            .collect()
    }
}

/// Needs a reachable PostgreSQL: `DATABASE_URL=... cargo test -- --ignored`.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::content_hash;
    use crate::jobs::models::JobStatus;

    async fn connect() -> PgJobStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        PgJobStore::connect(&url)
            .await
            .expect("Failed to connect to PostgreSQL")
    }

    fn unique_id() -> String {
        content_hash(uuid::Uuid::new_v4().as_bytes())
    }

    #[tokio::test]
    #[ignore]
    async fn test_partial_update_keeps_untouched_columns() {
        let store = connect().await;
        let id = unique_id();
        store
            .create(JobRecord::processing(&id, "cv.pdf", 2048, "application/pdf"))
            .await
            .unwrap();

        let completed = store
            .update(&id, JobUpdate::completed("{\"k\":1}".to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(completed.status, JobStatus::Completed);
        assert_eq!(completed.results, "{\"k\":1}");
        assert_eq!(completed.size, 2048);

        // Status-only update leaves results in place.
        let failed = store.update(&id, JobUpdate::failed()).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.results, "{\"k\":1}");

        assert!(store.delete(&id).await.unwrap());
    }

    #[tokio::test]
    #[ignore]
    async fn test_create_over_failed_record_resets_it() {
        let store = connect().await;
        let id = unique_id();
        let mut failed = JobRecord::processing(&id, "old.pdf", 1, "application/pdf");
        failed.status = JobStatus::Failed;
        failed.results = "stale".to_string();
        store.create(failed).await.unwrap();

        store
            .create(JobRecord::processing(&id, "new.pdf", 2, "application/pdf"))
            .await
            .unwrap();
        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Processing);
        assert_eq!(record.name, "new.pdf");
        assert_eq!(record.results, "");
        assert!(store.list().await.unwrap().iter().any(|r| r.id == id));

        assert!(store.delete(&id).await.unwrap());
        assert!(!store.delete(&id).await.unwrap());
        assert!(store.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore]
    async fn test_update_unknown_returns_none() {
        let store = connect().await;
        assert!(store
            .update(&unique_id(), JobUpdate::failed())
            .await
            .unwrap()
            .is_none());
    }
}
