//! In-process stores.
//!
//! Used when `RESUMATCH_STORE=memory`, and by the test suites. They honour
//! the same contracts as the PostgreSQL implementations: atomic per-record
//! writes, dimension checks, coalescing, per-resume exclusion on claim,
//! monotonic progress and attempt fencing. Nothing survives a restart.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::{Notify, RwLock};
use uuid::Uuid;

use resumatch_core::{
    check_dimension, Enqueued, Error, ErrorKind, FailOutcome, Job, JobDescription, JobFailure,
    JobRepository, JobStatus, MatchResult, QueueStats, Result, ResultStore, ResumeFields,
    ResumeRecord, ResumeStatus, RetryPolicy,
};

// =============================================================================
// RESULT STORE
// =============================================================================

/// [`ResultStore`] over a `HashMap` behind a tokio `RwLock`.
pub struct MemoryResultStore {
    records: RwLock<HashMap<Uuid, ResumeRecord>>,
    dimension: usize,
}

impl MemoryResultStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            dimension,
        }
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn upsert(&self, resume_id: Uuid, fields: ResumeFields) -> Result<ResumeRecord> {
        if let Some(embedding) = &fields.embedding {
            check_dimension(embedding, self.dimension)?;
        }

        let mut records = self.records.write().await;
        let record = records
            .entry(resume_id)
            .or_insert_with(|| ResumeRecord::new(resume_id, ""));
        record.apply(fields);
        Ok(record.clone())
    }

    async fn get(&self, resume_id: Uuid) -> Result<Option<ResumeRecord>> {
        Ok(self.records.read().await.get(&resume_id).cloned())
    }

    async fn attach_match_result(&self, resume_id: Uuid, result: &MatchResult) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(&resume_id) {
            Some(record) => {
                record
                    .match_results
                    .insert(result.job_fingerprint.clone(), result.clone());
                record.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_status(&self, resume_id: Uuid, status: ResumeStatus) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(&resume_id) {
            Some(record) => {
                record.status = status;
                record.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self, limit: i64) -> Result<Vec<ResumeRecord>> {
        let records = self.records.read().await;
        let mut all: Vec<ResumeRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| {
            b.upload_date
                .cmp(&a.upload_date)
                .then_with(|| b.id.cmp(&a.id))
        });
        all.truncate(limit.max(0) as usize);
        Ok(all)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// =============================================================================
// JOB REPOSITORY
// =============================================================================

/// [`JobRepository`] over a `HashMap` behind a tokio `RwLock`.
///
/// Every mutation takes the write lock for its whole read-modify-write, so
/// claim and coalescing checks are atomic.
pub struct MemoryJobRepository {
    jobs: RwLock<HashMap<Uuid, Job>>,
    notify: Arc<Notify>,
}

impl Default for MemoryJobRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobRepository {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            notify: Arc::new(Notify::new()),
        }
    }

    fn apply_failure(
        job: &mut Job,
        failure: &JobFailure,
        retry: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> FailOutcome {
        let transition = retry.transition(failure, job.retry_count, job.max_retries, now);
        job.error_kind = Some(transition.error_kind);
        job.error_message = Some(transition.error_message);
        job.heartbeat_at = None;

        match transition.outcome {
            FailOutcome::Retrying {
                retry_count,
                run_after,
            } => {
                job.status = JobStatus::Pending;
                job.retry_count = retry_count;
                job.run_after = run_after;
                job.started_at = None;
                job.progress_percent = 0;
                job.progress_message = None;
            }
            FailOutcome::Failed { .. } => {
                job.status = JobStatus::Failed;
                job.completed_at = Some(now);
            }
            FailOutcome::Superseded => {}
        }
        transition.outcome
    }

    fn owned_by<'a>(jobs: &'a mut HashMap<Uuid, Job>, job_id: Uuid, attempt: i32) -> Option<&'a mut Job> {
        jobs.get_mut(&job_id)
            .filter(|job| job.status == JobStatus::Running && job.retry_count == attempt)
    }

    /// Test hook: pretend the running attempt last reported at `at`.
    pub async fn set_heartbeat(&self, job_id: Uuid, at: DateTime<Utc>) -> bool {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Running => {
                job.heartbeat_at = Some(at);
                true
            }
            _ => false,
        }
    }

    /// Test hook: make a retrying job claimable now.
    pub async fn make_runnable(&self, job_id: Uuid) -> bool {
        let mut jobs = self.jobs.write().await;
        let found = match jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.run_after = Utc::now();
                true
            }
            _ => false,
        };
        drop(jobs);
        if found {
            self.notify.notify_waiters();
        }
        found
    }
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn enqueue(
        &self,
        resume_id: Uuid,
        payload: &JobDescription,
        max_retries: i32,
    ) -> Result<Enqueued> {
        let fingerprint = payload.fingerprint();
        let mut jobs = self.jobs.write().await;

        if let Some(existing) = jobs.values().find(|j| {
            j.resume_id == resume_id && j.job_fingerprint == fingerprint && j.status.is_in_flight()
        }) {
            return Ok(Enqueued {
                job_id: existing.id,
                coalesced: true,
            });
        }

        let job = Job::new_pending(resume_id, payload.clone(), max_retries.max(0));
        let job_id = job.id;
        jobs.insert(job_id, job);
        drop(jobs);

        self.notify.notify_waiters();
        Ok(Enqueued {
            job_id,
            coalesced: false,
        })
    }

    async fn claim_next(&self) -> Result<Option<Job>> {
        let now = Utc::now();
        let mut jobs = self.jobs.write().await;

        let busy: Vec<Uuid> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Running)
            .map(|j| j.resume_id)
            .collect();

        let next = jobs
            .values()
            .filter(|j| {
                j.status == JobStatus::Pending && j.run_after <= now && !busy.contains(&j.resume_id)
            })
            .min_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
            .map(|j| j.id);

        let Some(job_id) = next else {
            return Ok(None);
        };
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| Error::Internal(format!("claimed job {job_id} vanished")))?;
        job.status = JobStatus::Running;
        job.started_at = Some(now);
        job.heartbeat_at = Some(now);
        job.progress_percent = 0;
        job.progress_message = None;
        Ok(Some(job.clone()))
    }

    async fn update_progress(
        &self,
        job_id: Uuid,
        attempt: i32,
        percent: i32,
        message: Option<&str>,
    ) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        let Some(job) = Self::owned_by(&mut jobs, job_id, attempt) else {
            return Ok(false);
        };
        job.progress_percent = job.progress_percent.max(percent.clamp(0, 100));
        if let Some(message) = message {
            job.progress_message = Some(message.to_string());
        }
        job.heartbeat_at = Some(Utc::now());
        Ok(true)
    }

    async fn complete(&self, job_id: Uuid, attempt: i32, result: JsonValue) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        let Some(job) = Self::owned_by(&mut jobs, job_id, attempt) else {
            return Ok(false);
        };
        job.status = JobStatus::Completed;
        job.completed_at = Some(Utc::now());
        job.result = Some(result);
        job.progress_percent = 100;
        job.heartbeat_at = None;
        job.error_kind = None;
        job.error_message = None;
        Ok(true)
    }

    async fn fail(
        &self,
        job_id: Uuid,
        attempt: i32,
        failure: &JobFailure,
        retry: &RetryPolicy,
    ) -> Result<FailOutcome> {
        let mut jobs = self.jobs.write().await;
        if !jobs.contains_key(&job_id) {
            return Err(Error::JobNotFound(job_id));
        }
        let Some(job) = Self::owned_by(&mut jobs, job_id, attempt) else {
            return Ok(FailOutcome::Superseded);
        };
        let outcome = Self::apply_failure(job, failure, retry, Utc::now());
        drop(jobs);

        if matches!(outcome, FailOutcome::Retrying { .. }) {
            self.notify.notify_waiters();
        }
        Ok(outcome)
    }

    async fn reap_stale(
        &self,
        stale_before: DateTime<Utc>,
        retry: &RetryPolicy,
    ) -> Result<Vec<(Uuid, FailOutcome)>> {
        let now = Utc::now();
        let mut jobs = self.jobs.write().await;
        let mut reaped = Vec::new();

        for job in jobs.values_mut() {
            let stale = job.status == JobStatus::Running
                && job.heartbeat_at.is_some_and(|hb| hb < stale_before);
            if !stale {
                continue;
            }
            let failure = JobFailure::transient(
                ErrorKind::Timeout,
                format!(
                    "job stalled: no heartbeat since {}",
                    job.heartbeat_at.map(|t| t.to_rfc3339()).unwrap_or_default()
                ),
            );
            let outcome = Self::apply_failure(job, &failure, retry, now);
            reaped.push((job.id, outcome));
        }
        drop(jobs);

        if reaped
            .iter()
            .any(|(_, o)| matches!(o, FailOutcome::Retrying { .. }))
        {
            self.notify.notify_waiters();
        }
        Ok(reaped)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(self.jobs.read().await.get(&job_id).cloned())
    }

    async fn list_for_resume(&self, resume_id: Uuid) -> Result<Vec<Job>> {
        let jobs = self.jobs.read().await;
        let mut found: Vec<Job> = jobs
            .values()
            .filter(|j| j.resume_id == resume_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(found)
    }

    async fn pending_count(&self) -> Result<i64> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .count() as i64)
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let jobs = self.jobs.read().await;
        let mut stats = QueueStats::default();
        for job in jobs.values() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    async fn cleanup(&self, keep_terminal: i64) -> Result<i64> {
        let mut jobs = self.jobs.write().await;
        let mut terminal: Vec<(DateTime<Utc>, Uuid)> = jobs
            .values()
            .filter(|job| job.status.is_terminal())
            .map(|job| (job.completed_at.unwrap_or(job.created_at), job.id))
            .collect();
        terminal.sort_by(|a, b| b.cmp(a));

        let mut deleted = 0;
        for (_, id) in terminal.into_iter().skip(keep_terminal.max(0) as usize) {
            jobs.remove(&id);
            deleted += 1;
        }
        Ok(deleted)
    }

    fn job_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }
}
