//! Trait definitions for the pipeline's collaborators.
//!
//! Stores, the extractor, and text sources are constructed once at process
//! start and handed to the queue, orchestrator, and workers as
//! `Arc<dyn Trait>`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::{
    Entities, Enqueued, FailOutcome, Job, JobDescription, JobFailure, MatchResult, QueueStats,
    Result, ResumeFields, ResumeRecord, ResumeStatus, RetryPolicy,
};

// =============================================================================
// RESULT STORE
// =============================================================================

/// Persistence for resume records, keyed by resume id.
///
/// Every operation is atomic per record: a `get` never observes a
/// partially applied write. Writes carrying an embedding of the wrong
/// dimension fail with `EmbeddingDimensionMismatch`.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Create the record if absent, otherwise apply the given fields.
    async fn upsert(&self, resume_id: Uuid, fields: ResumeFields) -> Result<ResumeRecord>;

    /// Point lookup.
    async fn get(&self, resume_id: Uuid) -> Result<Option<ResumeRecord>>;

    /// Attach a match result, replacing any earlier result for the same job
    /// fingerprint. Returns `true` iff the record existed and was updated.
    async fn attach_match_result(&self, resume_id: Uuid, result: &MatchResult) -> Result<bool>;

    /// Update the lifecycle status. Returns `true` iff the record existed.
    async fn set_status(&self, resume_id: Uuid, status: ResumeStatus) -> Result<bool>;

    /// List records, most recently uploaded first.
    async fn list(&self, limit: i64) -> Result<Vec<ResumeRecord>>;

    /// Embedding dimension enforced by this store.
    fn dimension(&self) -> usize;
}

// =============================================================================
// JOB REPOSITORY
// =============================================================================

/// Durable queue of resume-matching jobs.
///
/// Mutating calls made on behalf of a running attempt carry the attempt
/// number (the job's `retry_count` at claim time). A call whose attempt no
/// longer matches, because the watchdog reaped the job or the job already
/// finished, is ignored.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Queue a job, coalescing with an in-flight job for the same
    /// (resume id, job fingerprint) pair.
    async fn enqueue(
        &self,
        resume_id: Uuid,
        payload: &JobDescription,
        max_retries: i32,
    ) -> Result<Enqueued>;

    /// Claim the oldest runnable pending job whose resume has no running job.
    async fn claim_next(&self) -> Result<Option<Job>>;

    /// Record progress. Progress never decreases. Also refreshes the heartbeat.
    async fn update_progress(
        &self,
        job_id: Uuid,
        attempt: i32,
        percent: i32,
        message: Option<&str>,
    ) -> Result<bool>;

    /// Mark the job completed with its result.
    async fn complete(&self, job_id: Uuid, attempt: i32, result: JsonValue) -> Result<bool>;

    /// Record a classified failure and apply the retry policy.
    async fn fail(
        &self,
        job_id: Uuid,
        attempt: i32,
        failure: &JobFailure,
        retry: &RetryPolicy,
    ) -> Result<FailOutcome>;

    /// Fail every running job whose heartbeat is older than `stale_before`
    /// as a transient timeout.
    async fn reap_stale(
        &self,
        stale_before: DateTime<Utc>,
        retry: &RetryPolicy,
    ) -> Result<Vec<(Uuid, FailOutcome)>>;

    /// Get job by ID.
    async fn get(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// All jobs for a resume, newest first.
    async fn list_for_resume(&self, resume_id: Uuid) -> Result<Vec<Job>>;

    /// Number of pending jobs.
    async fn pending_count(&self) -> Result<i64>;

    /// Counts by status.
    async fn queue_stats(&self) -> Result<QueueStats>;

    /// Delete completed and failed jobs beyond the newest `keep_terminal`.
    /// Pending and running jobs are never removed. Returns rows deleted.
    async fn cleanup(&self, keep_terminal: i64) -> Result<i64>;

    /// Handle notified whenever a job becomes claimable.
    fn job_notify(&self) -> Arc<Notify>;
}

// =============================================================================
// INFERENCE
// =============================================================================

/// Backend for generating embeddings.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Generate embeddings for the given texts, one vector per input.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Expected dimension of embedding vectors.
    fn dimension(&self) -> usize;

    /// Model name being used.
    fn model_name(&self) -> &str;
}

/// Entities plus embedding for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub entities: Entities,
    pub embedding: Vec<f32>,
}

/// Document analyzer: text → entities + embedding.
///
/// Implementations must be safe to call concurrently from every worker.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extract entities and an embedding. Empty text is `ExtractionFailed`.
    async fn extract(&self, text: &str) -> Result<Extraction>;

    /// Embed free text (used for job descriptions).
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Process-wide embedding dimension.
    fn dimension(&self) -> usize;
}

/// Resolves a stored-upload reference to document text.
#[async_trait]
pub trait TextSource: Send + Sync {
    async fn load_text(&self, reference: &str) -> Result<String>;
}
