//! Submission and status queries for match tasks.
//!
//! Neither call runs pipeline work: `submit` only validates and enqueues,
//! `status` only reads the job row.

use std::sync::Arc;

use tracing::{debug, info, instrument};
use uuid::Uuid;

use resumatch_core::{
    defaults, Enqueued, Error, Job, JobDescription, JobRepository, QueueStats, Result,
    ResultStore, RetryPolicy, TaskStatus,
};

/// Front door of the pipeline.
#[derive(Clone)]
pub struct TaskQueue {
    results: Arc<dyn ResultStore>,
    jobs: Arc<dyn JobRepository>,
    max_retries: i32,
}

impl TaskQueue {
    pub fn new(results: Arc<dyn ResultStore>, jobs: Arc<dyn JobRepository>) -> Self {
        Self {
            results,
            jobs,
            max_retries: defaults::JOB_MAX_RETRIES,
        }
    }

    /// Retry bound stamped on newly queued jobs.
    pub fn with_retry_policy(mut self, retry: &RetryPolicy) -> Self {
        self.max_retries = retry.max_retries.max(0);
        self
    }

    /// Queue a match of `resume_id` against `job_description` and return
    /// the task id.
    ///
    /// A request for a (resume, job description) pair that is already
    /// pending or running returns that task's id instead of queuing a
    /// duplicate.
    pub async fn submit(&self, resume_id: Uuid, job_description: JobDescription) -> Result<Uuid> {
        Ok(self.enqueue(resume_id, job_description).await?.job_id)
    }

    /// Like [`submit`](Self::submit), also reporting whether the request
    /// was coalesced.
    #[instrument(
        skip(self, job_description),
        fields(subsystem = "jobs", component = "task_queue", op = "submit", %resume_id)
    )]
    pub async fn enqueue(
        &self,
        resume_id: Uuid,
        job_description: JobDescription,
    ) -> Result<Enqueued> {
        if job_description.text.trim().is_empty() {
            return Err(Error::InvalidInput(
                "job description text must not be empty".to_string(),
            ));
        }
        if self.results.get(resume_id).await?.is_none() {
            return Err(Error::ResumeNotFound(resume_id));
        }

        let enqueued = self
            .jobs
            .enqueue(resume_id, &job_description, self.max_retries)
            .await?;

        if enqueued.coalesced {
            debug!(job_id = %enqueued.job_id, "Coalesced with in-flight task");
        } else {
            info!(
                job_id = %enqueued.job_id,
                job_fingerprint = %job_description.fingerprint(),
                "Task queued"
            );
        }
        Ok(enqueued)
    }

    /// Current status of a task.
    pub async fn status(&self, task_id: Uuid) -> Result<TaskStatus> {
        Ok(self.task(task_id).await?.task_status())
    }

    /// Full job record for a task.
    pub async fn task(&self, task_id: Uuid) -> Result<Job> {
        self.jobs
            .get(task_id)
            .await?
            .ok_or(Error::JobNotFound(task_id))
    }

    /// Every task ever queued for a resume, newest first.
    pub async fn tasks_for_resume(&self, resume_id: Uuid) -> Result<Vec<Job>> {
        self.jobs.list_for_resume(resume_id).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.jobs.queue_stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resumatch_core::{ErrorKind, ResumeFields};
    use resumatch_db::Stores;

    async fn queue_with_resume() -> (TaskQueue, Stores, Uuid) {
        let stores = Stores::memory(8);
        let resume_id = resumatch_core::new_v7();
        stores
            .results
            .upsert(resume_id, ResumeFields::new().original_filename("cv.txt"))
            .await
            .unwrap();
        let queue = TaskQueue::new(stores.results.clone(), stores.jobs.clone());
        (queue, stores, resume_id)
    }

    #[tokio::test]
    async fn test_submit_returns_pending_task() {
        let (queue, _stores, resume_id) = queue_with_resume().await;
        let task_id = queue
            .submit(resume_id, JobDescription::new("Rust engineer"))
            .await
            .unwrap();
        assert_eq!(queue.status(task_id).await.unwrap(), TaskStatus::Pending);
        assert_eq!(queue.stats().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn test_submit_unknown_resume() {
        let (queue, _stores, _) = queue_with_resume().await;
        let missing = Uuid::new_v4();
        let err = queue
            .submit(missing, JobDescription::new("Rust engineer"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ResumeNotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn test_submit_empty_job_description() {
        let (queue, _stores, resume_id) = queue_with_resume().await;
        let err = queue
            .submit(resume_id, JobDescription::new("   "))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_duplicate_submission_coalesces() {
        let (queue, _stores, resume_id) = queue_with_resume().await;
        let jd = JobDescription::new("Data engineer").with_required_skills(["SQL"]);
        let first = queue.enqueue(resume_id, jd.clone()).await.unwrap();
        let second = queue.enqueue(resume_id, jd).await.unwrap();
        assert!(!first.coalesced);
        assert!(second.coalesced);
        assert_eq!(first.job_id, second.job_id);
        assert_eq!(queue.tasks_for_resume(resume_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_status_unknown_task() {
        let (queue, _stores, _) = queue_with_resume().await;
        let err = queue.status(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_retry_bound_is_stamped_on_job() {
        let (queue, _stores, resume_id) = queue_with_resume().await;
        let queue = queue.with_retry_policy(&RetryPolicy::default().with_max_retries(1));
        let task_id = queue
            .submit(resume_id, JobDescription::new("QA engineer"))
            .await
            .unwrap();
        assert_eq!(queue.task(task_id).await.unwrap().max_retries, 1);
    }
}
