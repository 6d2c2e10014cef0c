//! Job handler contract and the per-attempt context handed to handlers.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::debug;
use uuid::Uuid;

use resumatch_core::{Error, ErrorKind, Job, JobDescription, JobRepository, Result};

/// Progress callback type for job handlers.
pub type ProgressCallback = Box<dyn Fn(i32, Option<&str>) + Send + Sync>;

/// Context provided to a handler for one attempt of one job.
pub struct JobContext {
    /// The job being processed, as claimed.
    pub job: Job,
    repo: Option<Arc<dyn JobRepository>>,
    progress_callback: Option<ProgressCallback>,
}

impl JobContext {
    /// Create a new job context.
    pub fn new(job: Job) -> Self {
        Self {
            job,
            repo: None,
            progress_callback: None,
        }
    }

    /// Persist progress through `repo`.
    pub fn with_repository(mut self, repo: Arc<dyn JobRepository>) -> Self {
        self.repo = Some(repo);
        self
    }

    /// Set the progress callback.
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(i32, Option<&str>) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Record progress for this attempt.
    ///
    /// Fails when the attempt no longer owns the job (the watchdog reaped
    /// it), which aborts the remaining stages.
    pub async fn report_progress(&self, percent: i32, message: Option<&str>) -> Result<()> {
        if let Some(repo) = &self.repo {
            let owned = repo
                .update_progress(self.job.id, self.attempt(), percent, message)
                .await?;
            if !owned {
                debug!(
                    subsystem = "jobs",
                    component = "handler",
                    job_id = %self.job.id,
                    attempt = self.attempt(),
                    "Progress rejected, attempt superseded"
                );
                return Err(Error::Internal(format!(
                    "attempt {} of job {} was superseded",
                    self.attempt(),
                    self.job.id
                )));
            }
        }
        if let Some(ref callback) = self.progress_callback {
            callback(percent, message);
        }
        Ok(())
    }

    pub fn job_id(&self) -> Uuid {
        self.job.id
    }

    pub fn resume_id(&self) -> Uuid {
        self.job.resume_id
    }

    /// The job description to match against.
    pub fn payload(&self) -> &JobDescription {
        &self.job.payload
    }

    /// Attempt number (0-based), also the fencing token for writes.
    pub fn attempt(&self) -> i32 {
        self.job.retry_count
    }

    pub fn is_last_attempt(&self) -> bool {
        self.job.is_last_attempt()
    }
}

/// Result of job execution.
#[derive(Debug)]
pub enum JobResult {
    /// Job completed successfully with its result data.
    Success(JsonValue),
    /// Job failed; the worker classifies the error and applies the retry
    /// policy.
    Failed(Error),
}

impl From<Result<JsonValue>> for JobResult {
    fn from(result: Result<JsonValue>) -> Self {
        match result {
            Ok(value) => JobResult::Success(value),
            Err(e) => JobResult::Failed(e),
        }
    }
}

/// Trait for job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Execute one attempt of the job.
    async fn execute(&self, ctx: JobContext) -> JobResult;

    /// Called once when a job reaches `failed`, whether from its own error,
    /// a timeout, exhausted retries, or the watchdog.
    async fn on_terminal_failure(&self, _job: &Job, _kind: ErrorKind) {}
}
