//! Job worker and runner for processing match jobs.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch, Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use resumatch_core::{
    defaults, Error, ErrorKind, FailOutcome, Job, JobFailure, JobRepository, Result, RetryPolicy,
};

use crate::handler::{JobContext, JobHandler, JobResult};
use crate::locks::ResumeLocks;
use crate::DEFAULT_POLL_INTERVAL_MS;

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum number of concurrent jobs.
    pub max_concurrent_jobs: usize,
    /// Whether to enable job processing.
    pub enabled: bool,
    /// Hard limit on one attempt.
    pub job_timeout: Duration,
    /// Running jobs without a heartbeat for this long are reaped.
    pub stale_after: Duration,
    /// How often the watchdog scans for stale jobs.
    pub watchdog_interval: Duration,
    /// Completed and failed jobs kept after each watchdog pass.
    pub retain_terminal_jobs: i64,
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_concurrent_jobs: defaults::JOB_MAX_CONCURRENT,
            enabled: true,
            job_timeout: Duration::from_secs(defaults::JOB_TIMEOUT_SECS),
            stale_after: Duration::from_secs(defaults::JOB_STALE_AFTER_SECS),
            watchdog_interval: Duration::from_secs(defaults::JOB_WATCHDOG_INTERVAL_SECS),
            retain_terminal_jobs: defaults::JOB_RETAIN_TERMINAL,
            retry: RetryPolicy::default(),
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<u64>().ok())
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_MAX_CONCURRENT` | `4` | Max concurrent jobs |
    /// | `JOB_POLL_INTERVAL_MS` | `500` | Polling interval when queue is empty |
    /// | `JOB_TIMEOUT_SECS` | `300` | Per-attempt timeout |
    /// | `JOB_STALE_AFTER_SECS` | `600` | Heartbeat age at which a running job is reaped |
    /// | `JOB_RETAIN_TERMINAL` | `10000` | Finished jobs kept by the watchdog |
    ///
    /// Retry settings come from [`RetryPolicy::from_env`].
    pub fn from_env() -> Self {
        let enabled = std::env::var(defaults::ENV_JOB_WORKER_ENABLED)
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent_jobs = std::env::var(defaults::ENV_JOB_MAX_CONCURRENT)
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::JOB_MAX_CONCURRENT)
            .max(1);

        let poll_interval_ms =
            env_u64(defaults::ENV_JOB_POLL_INTERVAL_MS).unwrap_or(DEFAULT_POLL_INTERVAL_MS);
        let job_timeout_secs =
            env_u64(defaults::ENV_JOB_TIMEOUT_SECS).unwrap_or(defaults::JOB_TIMEOUT_SECS);
        let stale_after_secs =
            env_u64(defaults::ENV_JOB_STALE_AFTER_SECS).unwrap_or(defaults::JOB_STALE_AFTER_SECS);
        let retain_terminal_jobs = env_u64(defaults::ENV_JOB_RETAIN_TERMINAL)
            .map(|n| n.min(i64::MAX as u64) as i64)
            .unwrap_or(defaults::JOB_RETAIN_TERMINAL);

        Self {
            poll_interval_ms,
            max_concurrent_jobs,
            enabled,
            job_timeout: Duration::from_secs(job_timeout_secs.max(1)),
            stale_after: Duration::from_secs(stale_after_secs.max(1)),
            watchdog_interval: Duration::from_secs(defaults::JOB_WATCHDOG_INTERVAL_SECS),
            retain_terminal_jobs,
            retry: RetryPolicy::from_env(),
        }
    }

    /// Create a new config with custom poll interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set maximum concurrent jobs.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    /// Enable or disable job processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval = interval;
        self
    }

    pub fn with_retain_terminal_jobs(mut self, keep: i64) -> Self {
        self.retain_terminal_jobs = keep.max(0);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Event emitted by the job worker.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    /// An attempt of a job was started.
    JobStarted {
        job_id: Uuid,
        resume_id: Uuid,
        attempt: i32,
    },
    /// Job progress was updated.
    JobProgress {
        job_id: Uuid,
        percent: i32,
        message: Option<String>,
    },
    /// A job completed successfully.
    JobCompleted { job_id: Uuid, resume_id: Uuid },
    /// A job failed for good.
    JobFailed {
        job_id: Uuid,
        resume_id: Uuid,
        kind: ErrorKind,
        error: String,
    },
    /// A failed attempt was rescheduled.
    JobRetryScheduled {
        job_id: Uuid,
        retry_count: i32,
        run_after: DateTime<Utc>,
    },
    /// The watchdog reaped a running job with no recent heartbeat.
    JobStalled { job_id: Uuid },
    /// Worker started.
    WorkerStarted,
    /// Worker stopped.
    WorkerStopped,
}

/// Handle for controlling a running worker.
///
/// Dropping the handle also stops the worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Signal shutdown and wait for in-flight jobs to finish.
    pub async fn shutdown_and_wait(self) -> Result<()> {
        // The worker may already have exited; that is not an error here.
        let _ = self.shutdown_tx.send(()).await;
        self.task
            .await
            .map_err(|e| Error::Internal(format!("worker task failed: {e}")))
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Job worker that claims match jobs and runs them on a bounded pool.
pub struct JobWorker {
    jobs: Arc<dyn JobRepository>,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
    locks: Arc<ResumeLocks>,
}

impl JobWorker {
    /// Create a new job worker.
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        handler: Arc<dyn JobHandler>,
        config: WorkerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            jobs,
            handler,
            config,
            event_tx,
            locks: Arc::new(ResumeLocks::new()),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Get the pending job count.
    pub async fn pending_count(&self) -> Result<i64> {
        self.jobs.pending_count().await
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        let task = tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
            task,
        }
    }

    /// Run the worker loop.
    ///
    /// Each claimed job runs in its own task holding one semaphore permit,
    /// so at most `max_concurrent_jobs` execute at once. When the queue is
    /// empty the loop sleeps until an enqueue notification or the poll
    /// interval, whichever comes first.
    #[instrument(skip(self, shutdown_rx), fields(subsystem = "jobs", component = "worker"))]
    async fn run(self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Job worker is disabled, not starting");
            return;
        }

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent = self.config.max_concurrent_jobs,
            job_timeout_secs = self.config.job_timeout.as_secs(),
            stale_after_secs = self.config.stale_after.as_secs(),
            max_retries = self.config.retry.max_retries,
            handler = self.handler.name(),
            "Job worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let (stop_tx, stop_rx) = watch::channel(false);
        let watchdog = tokio::spawn(self.watchdog_ref().run(stop_rx));

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_jobs.max(1)));
        let notify = self.jobs.job_notify();
        let mut tasks = JoinSet::new();

        loop {
            // Reap finished tasks so the set does not grow without bound.
            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    error!(error = ?e, "Job task panicked");
                }
            }

            let permit = tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Job worker received shutdown signal");
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match self.claim_job().await {
                Some(job) => {
                    let runner = self.runner();
                    tasks.spawn(async move {
                        runner.execute_job(job).await;
                        drop(permit);
                    });
                }
                None => {
                    drop(permit);
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            info!("Job worker received shutdown signal");
                            break;
                        }
                        _ = notify.notified() => {}
                        _ = sleep(poll_interval) => {}
                    }
                }
            }
        }

        let in_flight = tasks.len();
        if in_flight > 0 {
            info!(in_flight, "Waiting for in-flight jobs");
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = ?e, "Job task panicked");
            }
        }

        let _ = stop_tx.send(true);
        if let Err(e) = watchdog.await {
            error!(error = ?e, "Watchdog task panicked");
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Job worker stopped");
    }

    /// Claim the next available job without processing it.
    async fn claim_job(&self) -> Option<Job> {
        match self.jobs.claim_next().await {
            Ok(job) => job,
            Err(e) => {
                error!(error = %e, error_kind = %e.kind(), "Failed to claim job");
                None
            }
        }
    }

    fn runner(&self) -> JobRunner {
        JobRunner {
            jobs: self.jobs.clone(),
            handler: self.handler.clone(),
            event_tx: self.event_tx.clone(),
            locks: self.locks.clone(),
            wake: self.jobs.job_notify(),
            job_timeout: self.config.job_timeout,
            retry: self.config.retry.clone(),
        }
    }

    fn watchdog_ref(&self) -> Watchdog {
        Watchdog {
            jobs: self.jobs.clone(),
            handler: self.handler.clone(),
            event_tx: self.event_tx.clone(),
            interval: self.config.watchdog_interval,
            stale_after: self.config.stale_after,
            retain_terminal: self.config.retain_terminal_jobs,
            retry: self.config.retry.clone(),
        }
    }
}

/// Everything needed to run one claimed job in a spawned task.
struct JobRunner {
    jobs: Arc<dyn JobRepository>,
    handler: Arc<dyn JobHandler>,
    event_tx: broadcast::Sender<WorkerEvent>,
    locks: Arc<ResumeLocks>,
    /// Woken when this job finishes; a pending job for the same resume
    /// may now be claimable.
    wake: Arc<Notify>,
    job_timeout: Duration,
    retry: RetryPolicy,
}

impl JobRunner {
    /// Execute a single claimed job and record its outcome.
    async fn execute_job(self, job: Job) {
        let start = Instant::now();
        let job_id = job.id;
        let resume_id = job.resume_id;
        let attempt = job.retry_count;

        let _resume_guard = self.locks.lock(resume_id).await;

        info!(
            subsystem = "jobs",
            component = "worker",
            op = "execute",
            %job_id,
            %resume_id,
            attempt,
            "Processing job"
        );
        let _ = self.event_tx.send(WorkerEvent::JobStarted {
            job_id,
            resume_id,
            attempt,
        });

        let event_tx = self.event_tx.clone();
        let ctx = JobContext::new(job.clone())
            .with_repository(self.jobs.clone())
            .with_progress_callback(move |percent, message| {
                let _ = event_tx.send(WorkerEvent::JobProgress {
                    job_id,
                    percent,
                    message: message.map(String::from),
                });
            });

        let result = match tokio::time::timeout(self.job_timeout, self.handler.execute(ctx)).await
        {
            Ok(result) => result,
            Err(_) => {
                let timeout_ms = self.job_timeout.as_millis() as u64;
                warn!(%job_id, timeout_ms, "Job exceeded timeout");
                JobResult::Failed(Error::Timeout(format!(
                    "job exceeded timeout of {timeout_ms}ms"
                )))
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            JobResult::Success(value) => match self.jobs.complete(job_id, attempt, value).await {
                Ok(true) => {
                    info!(%job_id, %resume_id, attempt, duration_ms, "Job completed successfully");
                    let _ = self
                        .event_tx
                        .send(WorkerEvent::JobCompleted { job_id, resume_id });
                }
                Ok(false) => {
                    warn!(%job_id, attempt, duration_ms, "Job finished after its attempt was superseded");
                }
                Err(e) => {
                    error!(%job_id, error = %e, "Failed to mark job as completed");
                }
            },
            JobResult::Failed(err) => {
                let failure = JobFailure::from_error(&err);
                warn!(
                    %job_id,
                    attempt,
                    error_kind = %failure.kind,
                    error = %err,
                    "Job attempt failed"
                );
                match self.jobs.fail(job_id, attempt, &failure, &self.retry).await {
                    Ok(outcome) => {
                        self.report_failure(&job, &failure, outcome, duration_ms).await;
                    }
                    Err(e) => {
                        error!(%job_id, error = %e, "Failed to record job failure");
                    }
                }
            }
        }
        self.wake.notify_one();
    }

    async fn report_failure(
        &self,
        job: &Job,
        failure: &JobFailure,
        outcome: FailOutcome,
        duration_ms: u64,
    ) {
        let job_id = job.id;
        match outcome {
            FailOutcome::Retrying {
                retry_count,
                run_after,
            } => {
                warn!(
                    %job_id,
                    error_kind = %failure.kind,
                    error = %failure.message,
                    retry_count,
                    %run_after,
                    duration_ms,
                    "Job failed, retry scheduled"
                );
                let _ = self.event_tx.send(WorkerEvent::JobRetryScheduled {
                    job_id,
                    retry_count,
                    run_after,
                });
            }
            FailOutcome::Failed { kind } => {
                warn!(
                    %job_id,
                    resume_id = %job.resume_id,
                    error_kind = %kind,
                    error = %failure.message,
                    duration_ms,
                    "Job failed"
                );
                self.handler.on_terminal_failure(job, kind).await;
                let _ = self.event_tx.send(WorkerEvent::JobFailed {
                    job_id,
                    resume_id: job.resume_id,
                    kind,
                    error: failure.message.clone(),
                });
            }
            FailOutcome::Superseded => {
                debug!(%job_id, "Failure ignored, attempt superseded");
            }
        }
    }
}

/// Periodically fails running jobs whose heartbeat went stale.
struct Watchdog {
    jobs: Arc<dyn JobRepository>,
    handler: Arc<dyn JobHandler>,
    event_tx: broadcast::Sender<WorkerEvent>,
    interval: Duration,
    stale_after: Duration,
    retain_terminal: i64,
    retry: RetryPolicy,
}

impl Watchdog {
    async fn run(self, mut stop_rx: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = stop_rx.changed() => break,
                _ = sleep(self.interval) => {}
            }
            if let Err(e) = self.sweep().await {
                error!(
                    subsystem = "jobs",
                    component = "watchdog",
                    error = %e,
                    "Stale job sweep failed"
                );
            }
        }
    }

    async fn sweep(&self) -> Result<usize> {
        let stale_after = chrono::Duration::from_std(self.stale_after)
            .map_err(|e| Error::Config(format!("stale_after out of range: {e}")))?;
        let reaped = self
            .jobs
            .reap_stale(Utc::now() - stale_after, &self.retry)
            .await?;

        for (job_id, outcome) in &reaped {
            warn!(
                subsystem = "jobs",
                component = "watchdog",
                %job_id,
                outcome = ?outcome,
                "Reaped stale job"
            );
            let _ = self.event_tx.send(WorkerEvent::JobStalled { job_id: *job_id });

            if let FailOutcome::Failed { kind } = outcome {
                if let Some(job) = self.jobs.get(*job_id).await? {
                    self.handler.on_terminal_failure(&job, *kind).await;
                }
            }
        }

        let pruned = self.jobs.cleanup(self.retain_terminal).await?;
        if pruned > 0 {
            debug!(
                subsystem = "jobs",
                component = "watchdog",
                pruned,
                keep = self.retain_terminal,
                "Pruned finished jobs"
            );
        }
        Ok(reaped.len())
    }
}

/// Builder for creating a job worker.
pub struct WorkerBuilder {
    jobs: Arc<dyn JobRepository>,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
}

impl WorkerBuilder {
    /// Create a new worker builder.
    pub fn new(jobs: Arc<dyn JobRepository>, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            jobs,
            handler,
            config: WorkerConfig::default(),
        }
    }

    /// Set the worker configuration.
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build and return the worker.
    pub fn build(self) -> JobWorker {
        JobWorker::new(self.jobs, self.handler, self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(config.max_concurrent_jobs, 4);
        assert!(config.enabled);
        assert_eq!(config.job_timeout, Duration::from_secs(300));
        assert_eq!(config.stale_after, Duration::from_secs(600));
        assert_eq!(config.retain_terminal_jobs, 10_000);
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_worker_config_builder() {
        let config = WorkerConfig::default()
            .with_poll_interval(1000)
            .with_max_concurrent(8)
            .with_enabled(false)
            .with_job_timeout(Duration::from_secs(5))
            .with_stale_after(Duration::from_secs(10))
            .with_watchdog_interval(Duration::from_millis(250))
            .with_retain_terminal_jobs(-5)
            .with_retry_policy(RetryPolicy::fixed(1, Duration::from_millis(10)));

        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.max_concurrent_jobs, 8);
        assert!(!config.enabled);
        assert_eq!(config.job_timeout, Duration::from_secs(5));
        assert_eq!(config.stale_after, Duration::from_secs(10));
        assert_eq!(config.watchdog_interval, Duration::from_millis(250));
        assert_eq!(config.retain_terminal_jobs, 0);
        assert_eq!(config.retry.max_retries, 1);
    }

    #[test]
    fn test_worker_config_max_concurrent_at_least_one() {
        let config = WorkerConfig::default().with_max_concurrent(0);
        assert_eq!(config.max_concurrent_jobs, 1);
    }

    #[test]
    fn test_worker_event_serializes_with_tag() {
        let job_id = Uuid::new_v4();
        let event = WorkerEvent::JobFailed {
            job_id,
            resume_id: Uuid::new_v4(),
            kind: ErrorKind::RetriesExhausted,
            error: "boom".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "job_failed");
        assert_eq!(json["kind"], "retries_exhausted");
        assert_eq!(json["job_id"], job_id.to_string());

        let started = serde_json::to_value(WorkerEvent::WorkerStarted).unwrap();
        assert_eq!(started["event"], "worker_started");
    }

    #[test]
    fn test_worker_event_debug() {
        let event = WorkerEvent::JobStalled {
            job_id: Uuid::new_v4(),
        };
        assert!(format!("{:?}", event).contains("JobStalled"));
    }
}
