//! End-to-end tests: queue + worker + pipeline against in-memory stores.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use resumatch_db::Stores;
use resumatch_inference::{FilesystemTextSource, ResumeExtractor};
use resumatch_jobs::{
    new_v7, Error, ErrorKind, Extraction, Extractor, JobContext, JobDescription, JobHandler,
    JobRepository, JobResult, JobStatus, ResultStore, ResumeFields, ResumeMatchHandler,
    ResumeStatus, RetryPolicy, TaskQueue, TaskStatus, WorkerBuilder, WorkerConfig, WorkerEvent,
    WorkerHandle,
};

const DIM: usize = 384;

fn fast_config() -> WorkerConfig {
    WorkerConfig::default()
        .with_poll_interval(10)
        .with_max_concurrent(4)
        .with_watchdog_interval(Duration::from_millis(20))
        .with_retry_policy(RetryPolicy::fixed(3, Duration::from_millis(10)))
}

async fn add_resume(stores: &Stores, fields: ResumeFields) -> Uuid {
    let id = new_v7();
    stores
        .results
        .upsert(id, fields.original_filename("cv.txt"))
        .await
        .unwrap();
    id
}

/// Poll until the task leaves pending/processing.
async fn wait_for_terminal(queue: &TaskQueue, task_id: Uuid) -> TaskStatus {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let status = queue.status(task_id).await.unwrap();
        if matches!(status, TaskStatus::Complete { .. } | TaskStatus::Failed { .. }) {
            return status;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "task {task_id} still {status:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn start(stores: &Stores, handler: Arc<dyn JobHandler>, config: WorkerConfig) -> WorkerHandle {
    WorkerBuilder::new(stores.jobs.clone(), handler)
        .with_config(config)
        .build()
        .start()
}

/// Extractor that fails every call with the given error kind.
struct FailingExtractor {
    transient: bool,
    calls: AtomicUsize,
}

#[async_trait]
impl Extractor for FailingExtractor {
    async fn extract(&self, _text: &str) -> resumatch_jobs::Result<Extraction> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.transient {
            Err(Error::TransientIo("embedding service unavailable".into()))
        } else {
            Err(Error::ExtractionFailed("document is empty".into()))
        }
    }
    async fn embed(&self, _text: &str) -> resumatch_jobs::Result<Vec<f32>> {
        Ok(vec![0.0; DIM])
    }
    fn dimension(&self) -> usize {
        DIM
    }
}

#[tokio::test]
async fn test_submit_returns_before_any_work_runs() {
    let stores = Stores::memory(DIM);
    let resume_id = add_resume(&stores, ResumeFields::new().raw_text("Rust developer")).await;
    let queue = TaskQueue::new(stores.results.clone(), stores.jobs.clone());

    let task_id = queue
        .submit(resume_id, JobDescription::new("Rust engineer"))
        .await
        .unwrap();

    // No worker is running, so nothing can have happened yet.
    assert_eq!(queue.status(task_id).await.unwrap(), TaskStatus::Pending);
    let record = stores.results.get(resume_id).await.unwrap().unwrap();
    assert_eq!(record.status, ResumeStatus::Uploaded);
    assert!(record.match_results.is_empty());
}

#[tokio::test]
async fn test_pipeline_completes_from_uploaded_file() {
    let uploads = tempfile::tempdir().unwrap();
    std::fs::write(
        uploads.path().join("cv.txt"),
        "Senior Python developer with 7 years experience.\nSkills: Python, Django, Docker, AWS.\nBSc Computer Science",
    )
    .unwrap();

    let stores = Stores::memory(DIM);
    let resume_id = add_resume(&stores, ResumeFields::new().source_path("cv.txt")).await;
    let handler = ResumeMatchHandler::new(
        stores.results.clone(),
        Arc::new(ResumeExtractor::offline(DIM)),
        Arc::new(FilesystemTextSource::new(uploads.path())),
    );
    let handle = start(&stores, Arc::new(handler), fast_config());
    let mut events = handle.events();

    let queue = TaskQueue::new(stores.results.clone(), stores.jobs.clone());
    let jd = JobDescription::new("Python backend developer")
        .with_required_skills(["Python", "Django", "Kubernetes"])
        .with_min_experience(5.0);
    let task_id = queue.submit(resume_id, jd.clone()).await.unwrap();

    let TaskStatus::Complete { result } = wait_for_terminal(&queue, task_id).await else {
        panic!("task did not complete");
    };
    assert_eq!(result.resume_id, resume_id);
    assert!(result.missing_skills.contains("Kubernetes"));
    assert!(result.experience.meets_requirement);
    assert!((0.0..=100.0).contains(&result.score));

    let record = stores.results.get(resume_id).await.unwrap().unwrap();
    assert_eq!(record.status, ResumeStatus::Complete);
    assert!(record.raw_text.unwrap().contains("Senior Python developer"));
    assert_eq!(record.embedding.unwrap().len(), DIM);
    assert!(record.entities.unwrap().skills.contains("Docker"));
    assert_eq!(record.match_results[&jd.fingerprint()].id, result.id);

    let job = queue.task(task_id).await.unwrap();
    assert_eq!(job.progress_percent, 100);

    // Progress events for the job never go backwards.
    handle.shutdown_and_wait().await.unwrap();
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let WorkerEvent::JobProgress { job_id, percent, .. } = event {
            if job_id == task_id {
                seen.push(percent);
            }
        }
    }
    assert_eq!(seen, vec![10, 30, 60, 80, 100]);
}

#[tokio::test]
async fn test_transient_failures_end_in_retries_exhausted() {
    let stores = Stores::memory(DIM);
    let resume_id = add_resume(&stores, ResumeFields::new().raw_text("Go developer")).await;
    let extractor = Arc::new(FailingExtractor {
        transient: true,
        calls: AtomicUsize::new(0),
    });
    let handler = ResumeMatchHandler::new(
        stores.results.clone(),
        extractor.clone(),
        Arc::new(FilesystemTextSource::new(".")),
    );
    let config = fast_config();
    let queue = TaskQueue::new(stores.results.clone(), stores.jobs.clone())
        .with_retry_policy(&config.retry);
    let handle = start(&stores, Arc::new(handler), config);

    let task_id = queue
        .submit(resume_id, JobDescription::new("Go engineer"))
        .await
        .unwrap();

    match wait_for_terminal(&queue, task_id).await {
        TaskStatus::Failed { kind, error } => {
            assert_eq!(kind, ErrorKind::RetriesExhausted);
            assert!(error.contains("4 attempts"), "{error}");
            assert!(error.contains("embedding service unavailable"), "{error}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 4);
    assert_eq!(queue.task(task_id).await.unwrap().retry_count, 3);

    handle.shutdown_and_wait().await.unwrap();
    let record = stores.results.get(resume_id).await.unwrap().unwrap();
    assert_eq!(record.status, ResumeStatus::Failed);
}

#[tokio::test]
async fn test_terminal_error_is_not_retried() {
    let stores = Stores::memory(DIM);
    let resume_id = add_resume(&stores, ResumeFields::new().raw_text("Go developer")).await;
    let extractor = Arc::new(FailingExtractor {
        transient: false,
        calls: AtomicUsize::new(0),
    });
    let handler = ResumeMatchHandler::new(
        stores.results.clone(),
        extractor.clone(),
        Arc::new(FilesystemTextSource::new(".")),
    );
    let handle = start(&stores, Arc::new(handler), fast_config());
    let queue = TaskQueue::new(stores.results.clone(), stores.jobs.clone());

    let task_id = queue
        .submit(resume_id, JobDescription::new("Go engineer"))
        .await
        .unwrap();

    match wait_for_terminal(&queue, task_id).await {
        TaskStatus::Failed { kind, .. } => assert_eq!(kind, ErrorKind::ExtractionFailed),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    assert_eq!(queue.task(task_id).await.unwrap().retry_count, 0);
    handle.shutdown_and_wait().await.unwrap();
}

/// Records how many jobs per resume run at the same time.
#[derive(Default)]
struct ConcurrencyProbe {
    active: Mutex<HashMap<Uuid, usize>>,
    peak_per_resume: AtomicUsize,
    peak_total: AtomicUsize,
}

#[async_trait]
impl JobHandler for ConcurrencyProbe {
    fn name(&self) -> &'static str {
        "probe"
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let resume_id = ctx.resume_id();
        {
            let mut active = self.active.lock().unwrap();
            let count = active.entry(resume_id).or_default();
            *count += 1;
            self.peak_per_resume.fetch_max(*count, Ordering::SeqCst);
            let total: usize = active.values().sum();
            self.peak_total.fetch_max(total, Ordering::SeqCst);
        }
        tokio::time::sleep(Duration::from_millis(40)).await;
        *self.active.lock().unwrap().get_mut(&resume_id).unwrap() -= 1;
        JobResult::Success(serde_json::json!({}))
    }
}

#[tokio::test]
async fn test_jobs_for_one_resume_never_overlap() {
    let stores = Stores::memory(DIM);
    let busy_resume = add_resume(&stores, ResumeFields::new()).await;
    let other_resume = add_resume(&stores, ResumeFields::new()).await;
    let probe = Arc::new(ConcurrencyProbe::default());
    let handle = start(&stores, probe.clone(), fast_config());
    let queue = TaskQueue::new(stores.results.clone(), stores.jobs.clone());

    let mut tasks = Vec::new();
    for title in ["Backend", "Platform", "Data"] {
        tasks.push(
            queue
                .submit(busy_resume, JobDescription::new(title))
                .await
                .unwrap(),
        );
    }
    tasks.push(
        queue
            .submit(other_resume, JobDescription::new("Backend"))
            .await
            .unwrap(),
    );

    for task_id in tasks {
        wait_for_terminal(&queue, task_id).await;
    }
    handle.shutdown_and_wait().await.unwrap();

    assert_eq!(probe.peak_per_resume.load(Ordering::SeqCst), 1);
    assert!(probe.peak_total.load(Ordering::SeqCst) <= 4);
    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.running + stats.pending, 0);
}

/// Sleeps without reporting progress, then claims success.
struct SilentHandler {
    sleep: Duration,
    finished: AtomicUsize,
}

#[async_trait]
impl JobHandler for SilentHandler {
    fn name(&self) -> &'static str {
        "silent"
    }

    async fn execute(&self, _ctx: JobContext) -> JobResult {
        tokio::time::sleep(self.sleep).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        JobResult::Success(serde_json::json!({}))
    }
}

#[tokio::test]
async fn test_watchdog_reaps_stalled_job_and_fences_late_completion() {
    let stores = Stores::memory(DIM);
    let resume_id = add_resume(&stores, ResumeFields::new()).await;
    let handler = Arc::new(SilentHandler {
        sleep: Duration::from_millis(300),
        finished: AtomicUsize::new(0),
    });
    let config = fast_config()
        .with_stale_after(Duration::from_millis(50))
        .with_retry_policy(RetryPolicy::fixed(0, Duration::from_millis(10)));
    let queue = TaskQueue::new(stores.results.clone(), stores.jobs.clone())
        .with_retry_policy(&config.retry);
    let handle = start(&stores, handler.clone(), config);
    let mut events = handle.events();

    let task_id = queue
        .submit(resume_id, JobDescription::new("SRE"))
        .await
        .unwrap();

    match wait_for_terminal(&queue, task_id).await {
        TaskStatus::Failed { kind, error } => {
            assert_eq!(kind, ErrorKind::RetriesExhausted);
            assert!(error.contains("stalled"), "{error}");
        }
        other => panic!("expected failure, got {other:?}"),
    }

    // Let the stalled attempt run to its end; its completion must not land.
    handle.shutdown_and_wait().await.unwrap();
    assert_eq!(handler.finished.load(Ordering::SeqCst), 1);
    let job = queue.task(task_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.result.is_none());

    let mut stalled = false;
    while let Ok(event) = events.try_recv() {
        stalled |= matches!(event, WorkerEvent::JobStalled { job_id } if job_id == task_id);
    }
    assert!(stalled);
}

#[tokio::test]
async fn test_attempt_timeout_is_retried_then_exhausted() {
    let stores = Stores::memory(DIM);
    let resume_id = add_resume(&stores, ResumeFields::new()).await;
    let handler = Arc::new(SilentHandler {
        sleep: Duration::from_secs(5),
        finished: AtomicUsize::new(0),
    });
    let config = fast_config()
        .with_job_timeout(Duration::from_millis(30))
        .with_retry_policy(RetryPolicy::fixed(1, Duration::from_millis(10)));
    let queue = TaskQueue::new(stores.results.clone(), stores.jobs.clone())
        .with_retry_policy(&config.retry);
    let handle = start(&stores, handler.clone(), config);

    let task_id = queue
        .submit(resume_id, JobDescription::new("SRE"))
        .await
        .unwrap();

    match wait_for_terminal(&queue, task_id).await {
        TaskStatus::Failed { kind, error } => {
            assert_eq!(kind, ErrorKind::RetriesExhausted);
            assert!(error.contains("timeout"), "{error}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(queue.task(task_id).await.unwrap().retry_count, 1);
    assert_eq!(handler.finished.load(Ordering::SeqCst), 0);
    handle.shutdown_and_wait().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_job() {
    let stores = Stores::memory(DIM);
    let resume_id = add_resume(&stores, ResumeFields::new()).await;
    let handler = Arc::new(SilentHandler {
        sleep: Duration::from_millis(100),
        finished: AtomicUsize::new(0),
    });
    let handle = start(&stores, handler.clone(), fast_config());
    let queue = TaskQueue::new(stores.results.clone(), stores.jobs.clone());

    let task_id = queue
        .submit(resume_id, JobDescription::new("SRE"))
        .await
        .unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while queue.status(task_id).await.unwrap() == TaskStatus::Pending {
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    handle.shutdown_and_wait().await.unwrap();
    assert_eq!(handler.finished.load(Ordering::SeqCst), 1);
    assert_eq!(
        queue.task(task_id).await.unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn test_rematch_replaces_result_for_same_job_description() {
    let stores = Stores::memory(DIM);
    let resume_id = add_resume(&stores, ResumeFields::new().raw_text("Rust and Go developer")).await;
    let handler = ResumeMatchHandler::new(
        stores.results.clone(),
        Arc::new(ResumeExtractor::offline(DIM)),
        Arc::new(FilesystemTextSource::new(".")),
    );
    let handle = start(&stores, Arc::new(handler), fast_config());
    let queue = TaskQueue::new(stores.results.clone(), stores.jobs.clone());
    let jd = JobDescription::new("Rust engineer").with_required_skills(["Rust"]);

    let first = queue.submit(resume_id, jd.clone()).await.unwrap();
    wait_for_terminal(&queue, first).await;
    let second = queue.submit(resume_id, jd.clone()).await.unwrap();
    assert_ne!(first, second);
    let TaskStatus::Complete { result } = wait_for_terminal(&queue, second).await else {
        panic!("second run did not complete");
    };
    handle.shutdown_and_wait().await.unwrap();

    let record = stores.results.get(resume_id).await.unwrap().unwrap();
    assert_eq!(record.match_results.len(), 1);
    assert_eq!(record.match_results[&jd.fingerprint()].id, result.id);
}

/// Fails every attempt with a filesystem error naming a private path.
struct UnreadableUpload;

#[async_trait]
impl JobHandler for UnreadableUpload {
    fn name(&self) -> &'static str {
        "unreadable_upload"
    }

    async fn execute(&self, _ctx: JobContext) -> JobResult {
        JobResult::Failed(Error::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "open /srv/uploads/secret/cv.txt: Permission denied (os error 13)",
        )))
    }
}

#[tokio::test]
async fn test_failed_status_does_not_leak_wrapped_error_text() {
    let stores = Stores::memory(DIM);
    let resume_id = add_resume(&stores, ResumeFields::new()).await;
    let config = fast_config().with_retry_policy(RetryPolicy::fixed(1, Duration::from_millis(10)));
    let queue = TaskQueue::new(stores.results.clone(), stores.jobs.clone())
        .with_retry_policy(&config.retry);
    let handle = start(&stores, Arc::new(UnreadableUpload), config);

    let task_id = queue
        .submit(resume_id, JobDescription::new("Rust engineer"))
        .await
        .unwrap();

    let status = wait_for_terminal(&queue, task_id).await;
    handle.shutdown_and_wait().await.unwrap();

    let TaskStatus::Failed { kind, error } = &status else {
        panic!("expected failure, got {status:?}");
    };
    assert_eq!(*kind, ErrorKind::RetriesExhausted);
    assert!(error.contains("resume source temporarily unreadable"), "{error}");
    let json = serde_json::to_string(&status).unwrap();
    assert!(!json.contains("/srv/uploads"), "{json}");
    assert!(!json.contains("os error"), "{json}");
}

#[tokio::test]
async fn test_watchdog_prunes_finished_jobs_past_retention() {
    let stores = Stores::memory(DIM);
    let resume_id = add_resume(&stores, ResumeFields::new()).await;
    let handler = Arc::new(SilentHandler {
        sleep: Duration::from_millis(1),
        finished: AtomicUsize::new(0),
    });
    let handle = start(
        &stores,
        handler.clone(),
        fast_config().with_retain_terminal_jobs(0),
    );
    let queue = TaskQueue::new(stores.results.clone(), stores.jobs.clone());

    let task_id = queue
        .submit(resume_id, JobDescription::new("SRE"))
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while stores.jobs.get(task_id).await.unwrap().is_some() {
        assert!(tokio::time::Instant::now() < deadline, "task {task_id} never pruned");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.shutdown_and_wait().await.unwrap();

    assert_eq!(handler.finished.load(Ordering::SeqCst), 1);
    let err = queue.status(task_id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
