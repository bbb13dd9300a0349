//! Job Lifecycle Coordinator: decides what a submission means and drives
//! the pipeline run to a terminal job status.
//!
//! Flow: validate → hash → (per-job admission lock) classify against the
//! stored record → extract text → store upload → record `processing` → spawn
//! pipeline → on settle: update record, evict hub cache.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::models::{JobRecord, JobStatus, JobUpdate};
use super::store::JobStore;
use crate::documents::{content_hash, TextExtractor, UploadStore};
use crate::errors::AppError;
use crate::events::EventHub;
use crate::pipeline::prompts::experience_json_schema;
use crate::pipeline::{Orchestrator, Pipeline};

pub const PDF_MIME: &str = "application/pdf";

/// A file as received from the client.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub mime_type: String,
    pub content: Bytes,
}

/// How a submission was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmitStatus {
    /// New content; a pipeline run was started.
    Enqueued,
    /// Already processing; nothing restarted.
    Accepted,
    /// Previously failed; a new pipeline run was started.
    Retry,
}

pub struct Submission {
    pub job_id: String,
    pub status: SubmitStatus,
    /// The spawned pipeline run, when one was started.
    pub run: Option<JoinHandle<()>>,
}

#[derive(Clone)]
pub struct JobCoordinator {
    store: Arc<dyn JobStore>,
    uploads: UploadStore,
    extractor: Arc<dyn TextExtractor>,
    orchestrator: Orchestrator,
    hub: Arc<EventHub>,
    pipeline: Arc<Pipeline>,
    admission: Arc<AdmissionLocks>,
}

/// One async lock per job id being admitted. Identical uploads queue behind
/// each other from status lookup to record creation; unrelated uploads never
/// share a lock.
#[derive(Default)]
struct AdmissionLocks {
    slots: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AdmissionLocks {
    async fn acquire(&self, job_id: &str) -> Admission<'_> {
        let slot = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(job_id.to_string())
            .or_default()
            .clone();
        Admission {
            locks: self,
            job_id: job_id.to_string(),
            _guard: slot.lock_owned().await,
        }
    }
}

/// Held admission for one job id. Dropping it frees the slot once nobody
/// else is waiting on it.
struct Admission<'a> {
    locks: &'a AdmissionLocks,
    job_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        let mut slots = self.locks.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // The map and this guard are the only holders when nobody waits.
        if slots
            .get(&self.job_id)
            .is_some_and(|slot| Arc::strong_count(slot) == 2)
        {
            slots.remove(&self.job_id);
        }
    }
}

impl JobCoordinator {
    pub fn new(
        store: Arc<dyn JobStore>,
        uploads: UploadStore,
        extractor: Arc<dyn TextExtractor>,
        orchestrator: Orchestrator,
        hub: Arc<EventHub>,
    ) -> Self {
        Self {
            store,
            uploads,
            extractor,
            orchestrator,
            hub,
            pipeline: Arc::new(Pipeline::resume_analysis()),
            admission: Arc::new(AdmissionLocks::default()),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn uploads(&self) -> &UploadStore {
        &self.uploads
    }

    /// Classifies and, where appropriate, starts processing an upload.
    ///
    /// Returns as soon as the run is spawned; pipeline failures surface only
    /// through the job record and the event stream.
    pub async fn submit(&self, upload: Upload) -> Result<Submission, AppError> {
        validate_upload(&upload)?;
        let job_id = content_hash(&upload.content);

        let _admission = self.admission.acquire(&job_id).await;

        let status = match self.store.get(&job_id).await?.map(|r| r.status) {
            Some(JobStatus::Completed) => {
                return Err(AppError::Conflict(format!(
                    "{} has already been processed with hash {job_id}",
                    upload.file_name
                )));
            }
            Some(JobStatus::Processing) => {
                info!("{} already in flight as {job_id}", upload.file_name);
                return Ok(Submission {
                    job_id,
                    status: SubmitStatus::Accepted,
                    run: None,
                });
            }
            Some(JobStatus::Failed) => SubmitStatus::Retry,
            Some(JobStatus::Pending) | None => SubmitStatus::Enqueued,
        };

        let resume_content = self
            .extractor
            .extract(upload.content.clone())
            .await
            .map_err(|e| AppError::Validation(format!("{}: {e}", upload.file_name)))?;

        self.uploads
            .save(&job_id, upload.content.clone())
            .await
            .map_err(|e| AppError::Storage(format!("saving upload {job_id}: {e}")))?;

        self.store
            .create(JobRecord::processing(
                &job_id,
                &upload.file_name,
                upload.content.len() as u64,
                &upload.mime_type,
            ))
            .await?;

        info!(
            "{} {:?} as {job_id} ({} bytes)",
            upload.file_name,
            status,
            upload.content.len()
        );
        let run = self.spawn_run(job_id.clone(), resume_content);

        Ok(Submission {
            job_id,
            status,
            run: Some(run),
        })
    }

    fn spawn_run(&self, job_id: String, resume_content: String) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            coordinator.run_to_completion(&job_id, resume_content).await;
        })
    }

    async fn run_to_completion(&self, job_id: &str, resume_content: String) {
        let inputs = HashMap::from([
            ("resume_content".to_string(), resume_content),
            ("json_schema".to_string(), experience_json_schema()),
        ]);

        let update = match self.orchestrator.run(&self.pipeline, job_id, inputs).await {
            Ok(results) => JobUpdate::completed(results),
            Err(e) => {
                error!("Processing {job_id} failed: {e}");
                JobUpdate::failed()
            }
        };

        if let Err(e) = self.store.update(job_id, update).await {
            error!("Failed to record outcome for {job_id}: {e}");
        }
        self.hub.remove_cache(job_id);
    }

    /// Deletes a job's record and stored upload.
    pub async fn remove(&self, job_id: &str) -> Result<(), AppError> {
        if !self.store.delete(job_id).await? {
            return Err(AppError::NotFound(format!("Resume {job_id} not found")));
        }
        self.uploads
            .remove(job_id)
            .await
            .map_err(|e| AppError::Storage(format!("removing upload {job_id}: {e}")))?;
        self.hub.remove_cache(job_id);
        info!("Removed {job_id}");
        Ok(())
    }
}

fn validate_upload(upload: &Upload) -> Result<(), AppError> {
    let is_pdf_name = Path::new(&upload.file_name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    if !is_pdf_name || upload.mime_type != PDF_MIME {
        return Err(AppError::Validation("Only PDFs are allowed".to_string()));
    }
    if upload.content.is_empty() {
        return Err(AppError::Validation("Uploaded file is empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::documents::extract::ExtractError;
    use crate::events::{AuditLog, Event};
    use crate::jobs::store::JsonFileStore;
    use crate::llm_client::{LlmError, TextEngine, TokenSink};

    /// Accepts anything starting with `%PDF`. Content containing `held`
    /// waits for a permit first.
    struct FakeExtractor {
        held: Semaphore,
    }

    #[async_trait]
    impl TextExtractor for FakeExtractor {
        async fn extract(&self, content: Bytes) -> Result<String, ExtractError> {
            if content.windows(4).any(|w| w == b"held") {
                let _permit = self.held.acquire().await.unwrap();
            }
            if content.starts_with(b"%PDF") {
                Ok(String::from_utf8_lossy(&content).into_owned())
            } else {
                Err(ExtractError::Pdf("bad header".to_string()))
            }
        }
    }

    /// Blocks every generation until a gate permit is available and fails the
    /// final stage `fail_final` times.
    struct GatedEngine {
        gate: Semaphore,
        calls: AtomicUsize,
        fail_final: AtomicUsize,
    }

    impl GatedEngine {
        fn new(open: bool) -> Self {
            Self {
                gate: Semaphore::new(usize::from(open)),
                calls: AtomicUsize::new(0),
                fail_final: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TextEngine for GatedEngine {
        async fn generate(
            &self,
            prompt: &str,
            sink: &mut dyn TokenSink,
        ) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _permit = self.gate.acquire().await.unwrap();
            let is_final = prompt.contains("Skill Wise Experience");
            if is_final
                && self
                    .fail_final
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(LlmError::Api {
                    status: 500,
                    message: "boom".to_string(),
                });
            }
            let reply = if is_final {
                r#"Sure! {"Skill Wise Experience": [], "Industry Wise Experience": []}"#
            } else {
                "## Work Experience"
            };
            sink.on_fragment(reply);
            sink.on_complete();
            Ok(reply.to_string())
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        engine: Arc<GatedEngine>,
        extractor: Arc<FakeExtractor>,
        hub: Arc<EventHub>,
        coordinator: JobCoordinator,
    }

    async fn harness(engine: GatedEngine) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("records/resumes.json"))
            .await
            .unwrap();
        let uploads = UploadStore::open(dir.path().join("uploads"), None)
            .await
            .unwrap();
        let engine = Arc::new(engine);
        let extractor = Arc::new(FakeExtractor {
            held: Semaphore::new(0),
        });
        let hub = Arc::new(EventHub::new(64, AuditLog::disabled()));
        let orchestrator = Orchestrator::new(engine.clone(), hub.clone(), 8);
        let coordinator = JobCoordinator::new(
            Arc::new(store),
            uploads,
            extractor.clone(),
            orchestrator,
            hub.clone(),
        );
        Harness {
            _dir: dir,
            engine,
            extractor,
            hub,
            coordinator,
        }
    }

    fn pdf(content: &'static [u8]) -> Upload {
        Upload {
            file_name: "resume.pdf".to_string(),
            mime_type: PDF_MIME.to_string(),
            content: Bytes::from_static(content),
        }
    }

    async fn status_of(h: &Harness, job_id: &str) -> Option<JobStatus> {
        h.coordinator
            .store()
            .get(job_id)
            .await
            .unwrap()
            .map(|r| r.status)
    }

    #[tokio::test]
    async fn test_fresh_submission_runs_to_completion() {
        let h = harness(GatedEngine::new(true)).await;
        let submission = h.coordinator.submit(pdf(b"%PDF resume")).await.unwrap();
        assert_eq!(submission.status, SubmitStatus::Enqueued);
        submission.run.unwrap().await.unwrap();

        let record = h
            .coordinator
            .store()
            .get(&submission.job_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(
            record.results,
            r#"{"Industry Wise Experience":[],"Skill Wise Experience":[]}"#
        );
        assert_eq!(record.name, "resume.pdf");
        assert_eq!(record.size, 11);
        assert_eq!(h.engine.calls.load(Ordering::SeqCst), 3);
        assert!(h
            .coordinator
            .uploads()
            .read(&submission.job_id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_duplicate_while_processing_is_accepted_without_new_run() {
        let h = harness(GatedEngine::new(false)).await;
        let first = h.coordinator.submit(pdf(b"%PDF same")).await.unwrap();
        assert_eq!(
            status_of(&h, &first.job_id).await,
            Some(JobStatus::Processing)
        );

        let second = h.coordinator.submit(pdf(b"%PDF same")).await.unwrap();
        assert_eq!(second.status, SubmitStatus::Accepted);
        assert_eq!(second.job_id, first.job_id);
        assert!(second.run.is_none());

        h.engine.gate.add_permits(1);
        first.run.unwrap().await.unwrap();
        assert_eq!(h.engine.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            status_of(&h, &first.job_id).await,
            Some(JobStatus::Completed)
        );
    }

    #[tokio::test]
    async fn test_completed_resubmission_is_conflict() {
        let h = harness(GatedEngine::new(true)).await;
        let first = h.coordinator.submit(pdf(b"%PDF done")).await.unwrap();
        first.run.unwrap().await.unwrap();

        let err = h.coordinator.submit(pdf(b"%PDF done")).await.err().unwrap();
        assert!(matches!(err, AppError::Conflict(_)), "{err}");
        assert_eq!(h.engine.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_job_is_retried() {
        let engine = GatedEngine::new(true);
        engine.fail_final.store(1, Ordering::SeqCst);
        let h = harness(engine).await;

        let first = h.coordinator.submit(pdf(b"%PDF flaky")).await.unwrap();
        first.run.unwrap().await.unwrap();
        assert_eq!(status_of(&h, &first.job_id).await, Some(JobStatus::Failed));

        let retry = h.coordinator.submit(pdf(b"%PDF flaky")).await.unwrap();
        assert_eq!(retry.status, SubmitStatus::Retry);
        retry.run.unwrap().await.unwrap();
        assert_eq!(
            status_of(&h, &first.job_id).await,
            Some(JobStatus::Completed)
        );
        assert_eq!(h.engine.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_cache_is_evicted_on_success_and_failure() {
        let engine = GatedEngine::new(true);
        engine.fail_final.store(1, Ordering::SeqCst);
        let h = harness(engine).await;

        let failed = h.coordinator.submit(pdf(b"%PDF one")).await.unwrap();
        failed.run.unwrap().await.unwrap();
        assert!(h.hub.cached(&failed.job_id).is_none());

        let ok = h.coordinator.submit(pdf(b"%PDF two")).await.unwrap();
        ok.run.unwrap().await.unwrap();
        assert!(h.hub.cached(&ok.job_id).is_none());
    }

    #[tokio::test]
    async fn test_in_flight_progress_is_cached_for_late_subscribers() {
        let h = harness(GatedEngine::new(false)).await;
        let submission = h.coordinator.submit(pdf(b"%PDF late")).await.unwrap();

        // Simulate the first stage having streamed before anyone subscribed.
        h.hub.publish(&Event::Data {
            job_id: submission.job_id.clone(),
            text: "## Work".to_string(),
        });
        let mut late = h.hub.subscribe();
        let frame = late.frames.try_recv().unwrap();
        assert!(frame.contains("\"eventType\":\"cache\""));
        assert!(frame.contains(&submission.job_id));

        h.engine.gate.add_permits(1);
        submission.run.unwrap().await.unwrap();
    }

    #[tokio::test]
    async fn test_non_pdf_is_rejected_without_record() {
        let h = harness(GatedEngine::new(true)).await;
        let mut upload = pdf(b"%PDF text");
        upload.file_name = "resume.docx".to_string();
        let err = h.coordinator.submit(upload).await.err().unwrap();
        assert!(matches!(err, AppError::Validation(_)));

        let mut upload = pdf(b"%PDF text");
        upload.mime_type = "text/plain".to_string();
        let err = h.coordinator.submit(upload).await.err().unwrap();
        assert!(matches!(err, AppError::Validation(_)));

        assert!(h.coordinator.store().list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_pdf_is_validation_error() {
        let h = harness(GatedEngine::new(true)).await;
        let err = h
            .coordinator
            .submit(pdf(b"not really a pdf"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(h.coordinator.store().list().await.unwrap().is_empty());
        assert!(h
            .coordinator
            .uploads()
            .read(&content_hash(b"not really a pdf"))
            .await
            .unwrap()
            .is_none());
        assert_eq!(h.engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_remove_deletes_record_and_upload() {
        let h = harness(GatedEngine::new(true)).await;
        let submission = h.coordinator.submit(pdf(b"%PDF bye")).await.unwrap();
        submission.run.unwrap().await.unwrap();

        h.coordinator.remove(&submission.job_id).await.unwrap();
        assert!(status_of(&h, &submission.job_id).await.is_none());
        assert!(h
            .coordinator
            .uploads()
            .read(&submission.job_id)
            .await
            .unwrap()
            .is_none());

        let err = h.coordinator.remove(&submission.job_id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unrelated_uploads_are_admitted_concurrently() {
        let h = harness(GatedEngine::new(true)).await;
        let slow = tokio::spawn({
            let coordinator = h.coordinator.clone();
            async move { coordinator.submit(pdf(b"%PDF held slow")).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let fast = tokio::time::timeout(
            Duration::from_secs(1),
            h.coordinator.submit(pdf(b"%PDF quick")),
        )
        .await
        .expect("unrelated upload waited on another job's admission")
        .unwrap();
        assert_eq!(fast.status, SubmitStatus::Enqueued);
        assert!(!slow.is_finished());

        h.extractor.held.add_permits(1);
        let slow = slow.await.unwrap().unwrap();
        assert_eq!(slow.status, SubmitStatus::Enqueued);
        fast.run.unwrap().await.unwrap();
        slow.run.unwrap().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_identical_uploads_start_one_run() {
        let h = harness(GatedEngine::new(false)).await;
        let submit = |coordinator: JobCoordinator| {
            tokio::spawn(async move { coordinator.submit(pdf(b"%PDF held twin")).await })
        };
        let first = submit(h.coordinator.clone());
        let second = submit(h.coordinator.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.extractor.held.add_permits(1);

        let mut results = vec![first.await.unwrap().unwrap(), second.await.unwrap().unwrap()];
        results.sort_by_key(|s| s.status != SubmitStatus::Enqueued);
        assert_eq!(results[0].status, SubmitStatus::Enqueued);
        assert_eq!(results[1].status, SubmitStatus::Accepted);
        assert!(results[1].run.is_none());

        h.engine.gate.add_permits(1);
        results.remove(0).run.unwrap().await.unwrap();
        assert_eq!(h.engine.calls.load(Ordering::SeqCst), 3);
        assert!(h.coordinator.admission.slots.lock().unwrap().is_empty());
    }
}
