//! Job repository implementation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::types::Json;
use sqlx::{Pool, Postgres, Row, Transaction};
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

use resumatch_core::{
    new_v7, Enqueued, ErrorKind, FailOutcome, Job, JobDescription, JobFailure, JobRepository,
    JobStatus, QueueStats, Result, RetryPolicy,
};

const JOB_COLUMNS: &str = "id, resume_id, job_fingerprint, payload, status, progress_percent, \
                           progress_message, retry_count, max_retries, error_kind, error_message, \
                           result, run_after, heartbeat_at, created_at, started_at, completed_at";

/// Enqueue attempts before giving up on a racing in-flight job.
const ENQUEUE_ATTEMPTS: usize = 3;

/// PostgreSQL implementation of [`JobRepository`].
///
/// Claims use `FOR UPDATE SKIP LOCKED`. The partial unique index on running
/// jobs per resume turns a cross-process claim race into a unique violation,
/// which the loser treats as "nothing claimable".
pub struct PgJobRepository {
    pool: Pool<Postgres>,
    notify: Arc<Notify>,
}

impl PgJobRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            notify: Arc::new(Notify::new()),
        }
    }

    fn parse_job_row(row: sqlx::postgres::PgRow) -> Job {
        let payload: Json<JobDescription> = row.get("payload");
        let status: String = row.get("status");
        let error_kind: Option<String> = row.get("error_kind");

        Job {
            id: row.get("id"),
            resume_id: row.get("resume_id"),
            job_fingerprint: row.get("job_fingerprint"),
            payload: payload.0,
            status: JobStatus::parse(&status),
            progress_percent: row.get("progress_percent"),
            progress_message: row.get("progress_message"),
            retry_count: row.get("retry_count"),
            max_retries: row.get("max_retries"),
            error_kind: error_kind.as_deref().map(ErrorKind::parse),
            error_message: row.get("error_message"),
            result: row.get("result"),
            run_after: row.get("run_after"),
            heartbeat_at: row.get("heartbeat_at"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        }
    }

    fn is_unique_violation(err: &sqlx::Error) -> bool {
        matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
    }

    /// Apply a failure to a row already locked by `tx`.
    async fn apply_failure(
        tx: &mut Transaction<'_, Postgres>,
        job_id: Uuid,
        retry_count: i32,
        max_retries: i32,
        failure: &JobFailure,
        retry: &RetryPolicy,
    ) -> Result<FailOutcome> {
        let now = Utc::now();
        let transition = retry.transition(failure, retry_count, max_retries, now);

        match transition.outcome {
            FailOutcome::Retrying {
                retry_count: next,
                run_after,
            } => {
                sqlx::query(
                    "UPDATE match_jobs
                     SET status = 'pending', retry_count = $2, run_after = $3,
                         error_kind = $4, error_message = $5,
                         started_at = NULL, heartbeat_at = NULL,
                         progress_percent = 0, progress_message = NULL
                     WHERE id = $1",
                )
                .bind(job_id)
                .bind(next)
                .bind(run_after)
                .bind(transition.error_kind.as_str())
                .bind(&transition.error_message)
                .execute(&mut **tx)
                .await?;
            }
            FailOutcome::Failed { .. } => {
                sqlx::query(
                    "UPDATE match_jobs
                     SET status = 'failed', completed_at = $2,
                         error_kind = $3, error_message = $4, heartbeat_at = NULL
                     WHERE id = $1",
                )
                .bind(job_id)
                .bind(now)
                .bind(transition.error_kind.as_str())
                .bind(&transition.error_message)
                .execute(&mut **tx)
                .await?;
            }
            FailOutcome::Superseded => {}
        }

        Ok(transition.outcome)
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn enqueue(
        &self,
        resume_id: Uuid,
        payload: &JobDescription,
        max_retries: i32,
    ) -> Result<Enqueued> {
        let fingerprint = payload.fingerprint();

        for _ in 0..ENQUEUE_ATTEMPTS {
            let job_id = new_v7();
            let now = Utc::now();

            let inserted = sqlx::query_scalar::<_, Uuid>(
                "INSERT INTO match_jobs (id, resume_id, job_fingerprint, payload, status,
                                         max_retries, run_after, created_at)
                 VALUES ($1, $2, $3, $4, 'pending', $5, $6, $6)
                 ON CONFLICT (resume_id, job_fingerprint)
                     WHERE status IN ('pending', 'running')
                 DO NOTHING
                 RETURNING id",
            )
            .bind(job_id)
            .bind(resume_id)
            .bind(&fingerprint)
            .bind(Json(payload))
            .bind(max_retries.max(0))
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(job_id) = inserted {
                self.notify.notify_waiters();
                return Ok(Enqueued {
                    job_id,
                    coalesced: false,
                });
            }

            let existing = sqlx::query_scalar::<_, Uuid>(
                "SELECT id FROM match_jobs
                 WHERE resume_id = $1 AND job_fingerprint = $2
                   AND status IN ('pending', 'running')",
            )
            .bind(resume_id)
            .bind(&fingerprint)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(job_id) = existing {
                return Ok(Enqueued {
                    job_id,
                    coalesced: true,
                });
            }
            // The conflicting job finished between the two statements.
        }

        Err(resumatch_core::Error::TransientIo(format!(
            "could not enqueue job for resume {resume_id}: in-flight job kept changing state"
        )))
    }

    async fn claim_next(&self) -> Result<Option<Job>> {
        let now = Utc::now();
        let query = format!(
            "UPDATE match_jobs
             SET status = 'running', started_at = $1, heartbeat_at = $1,
                 progress_percent = 0, progress_message = NULL
             WHERE id = (
                 SELECT j.id FROM match_jobs j
                 WHERE j.status = 'pending'
                   AND j.run_after <= $1
                   AND NOT EXISTS (
                       SELECT 1 FROM match_jobs r
                       WHERE r.resume_id = j.resume_id AND r.status = 'running'
                   )
                 ORDER BY j.created_at ASC, j.id ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        );

        match sqlx::query(&query)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(row) => Ok(row.map(Self::parse_job_row)),
            Err(e) if Self::is_unique_violation(&e) => {
                debug!(
                    subsystem = "jobs",
                    component = "repository",
                    op = "claim_next",
                    "Claim lost a per-resume race; retrying on next poll"
                );
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_progress(
        &self,
        job_id: Uuid,
        attempt: i32,
        percent: i32,
        message: Option<&str>,
    ) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE match_jobs
             SET progress_percent = GREATEST(progress_percent, $3),
                 progress_message = COALESCE($4, progress_message),
                 heartbeat_at = $5
             WHERE id = $1 AND retry_count = $2 AND status = 'running'",
        )
        .bind(job_id)
        .bind(attempt)
        .bind(percent.clamp(0, 100))
        .bind(message)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?
        .rows_affected()
            > 0;
        Ok(updated)
    }

    async fn complete(&self, job_id: Uuid, attempt: i32, result: JsonValue) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE match_jobs
             SET status = 'completed', completed_at = $3, result = $4,
                 progress_percent = 100, heartbeat_at = NULL,
                 error_kind = NULL, error_message = NULL
             WHERE id = $1 AND retry_count = $2 AND status = 'running'",
        )
        .bind(job_id)
        .bind(attempt)
        .bind(Utc::now())
        .bind(&result)
        .execute(&self.pool)
        .await?
        .rows_affected()
            > 0;

        if !updated {
            warn!(
                subsystem = "jobs",
                component = "repository",
                op = "complete",
                job_id = %job_id,
                attempt,
                "Completion ignored: attempt no longer owns the job"
            );
        }
        Ok(updated)
    }

    async fn fail(
        &self,
        job_id: Uuid,
        attempt: i32,
        failure: &JobFailure,
        retry: &RetryPolicy,
    ) -> Result<FailOutcome> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT status, retry_count, max_retries FROM match_jobs WHERE id = $1 FOR UPDATE",
        )
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Err(resumatch_core::Error::JobNotFound(job_id));
        };
        let status: String = row.get("status");
        let retry_count: i32 = row.get("retry_count");
        let max_retries: i32 = row.get("max_retries");

        if JobStatus::parse(&status) != JobStatus::Running || retry_count != attempt {
            tx.rollback().await?;
            return Ok(FailOutcome::Superseded);
        }

        let outcome =
            Self::apply_failure(&mut tx, job_id, retry_count, max_retries, failure, retry).await?;
        tx.commit().await?;

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
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            "SELECT id, retry_count, max_retries, heartbeat_at FROM match_jobs
             WHERE status = 'running' AND heartbeat_at < $1
             ORDER BY heartbeat_at ASC
             FOR UPDATE SKIP LOCKED",
        )
        .bind(stale_before)
        .fetch_all(&mut *tx)
        .await?;

        let mut reaped = Vec::with_capacity(rows.len());
        for row in rows {
            let job_id: Uuid = row.get("id");
            let retry_count: i32 = row.get("retry_count");
            let max_retries: i32 = row.get("max_retries");
            let heartbeat_at: Option<DateTime<Utc>> = row.get("heartbeat_at");

            let failure = JobFailure::transient(
                ErrorKind::Timeout,
                format!(
                    "job stalled: no heartbeat since {}",
                    heartbeat_at.map(|t| t.to_rfc3339()).unwrap_or_default()
                ),
            );
            let outcome =
                Self::apply_failure(&mut tx, job_id, retry_count, max_retries, &failure, retry)
                    .await?;
            reaped.push((job_id, outcome));
        }

        tx.commit().await?;

        if reaped
            .iter()
            .any(|(_, o)| matches!(o, FailOutcome::Retrying { .. }))
        {
            self.notify.notify_waiters();
        }
        Ok(reaped)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM match_jobs WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Self::parse_job_row))
    }

    async fn list_for_resume(&self, resume_id: Uuid) -> Result<Vec<Job>> {
        let query = format!(
            "SELECT {JOB_COLUMNS} FROM match_jobs WHERE resume_id = $1
             ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query(&query)
            .bind(resume_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Self::parse_job_row).collect())
    }

    async fn pending_count(&self) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM match_jobs WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count.0)
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            "SELECT
                 COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                 COUNT(*) FILTER (WHERE status = 'running') AS running,
                 COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                 COUNT(*) FILTER (WHERE status = 'failed') AS failed
             FROM match_jobs",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueStats {
            pending: row.get("pending"),
            running: row.get("running"),
            completed: row.get("completed"),
            failed: row.get("failed"),
        })
    }

    async fn cleanup(&self, keep_terminal: i64) -> Result<i64> {
        let result = sqlx::query(
            "DELETE FROM match_jobs
             WHERE status IN ('completed', 'failed')
               AND id NOT IN (
                   SELECT id FROM match_jobs
                   WHERE status IN ('completed', 'failed')
                   ORDER BY COALESCE(completed_at, created_at) DESC, id DESC
                   LIMIT $1
               )",
        )
        .bind(keep_terminal.max(0))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() as i64)
    }

    fn job_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }
}
