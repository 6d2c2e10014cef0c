//! Retry policy for transient job failures.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::{defaults, Error, ErrorKind, FailOutcome, JobFailure};

/// The state a failed attempt moves its job to.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureTransition {
    pub outcome: FailOutcome,
    /// Kind recorded on the job row.
    pub error_kind: ErrorKind,
    /// Message recorded on the job row.
    pub error_message: String,
}

/// Bounded exponential backoff.
///
/// Retry `n` (0-based) waits `base * 2^n`, capped at `max_backoff`, plus up
/// to `jitter` of random slack. A job gets at most `max_retries` retries,
/// so `max_retries + 1` attempts in total.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: i32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Fraction of the computed delay added as random jitter (0.0 - 1.0).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: defaults::JOB_MAX_RETRIES,
            base_backoff: Duration::from_secs(defaults::JOB_RETRY_BACKOFF_SECS),
            max_backoff: Duration::from_secs(defaults::JOB_RETRY_MAX_BACKOFF_SECS),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Create a policy from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_MAX_RETRIES` | `3` | Retries after the first attempt |
    /// | `JOB_RETRY_BACKOFF_SECS` | `60` | Base backoff, doubled per retry |
    /// | `JOB_RETRY_MAX_BACKOFF_SECS` | `900` | Backoff cap |
    pub fn from_env() -> Self {
        let max_retries = std::env::var(defaults::ENV_JOB_MAX_RETRIES)
            .ok()
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(defaults::JOB_MAX_RETRIES)
            .max(0);

        let base_secs = std::env::var(defaults::ENV_JOB_RETRY_BACKOFF_SECS)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::JOB_RETRY_BACKOFF_SECS);

        let max_secs = std::env::var(defaults::ENV_JOB_RETRY_MAX_BACKOFF_SECS)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::JOB_RETRY_MAX_BACKOFF_SECS)
            .max(base_secs);

        Self {
            max_retries,
            base_backoff: Duration::from_secs(base_secs),
            max_backoff: Duration::from_secs(max_secs),
            ..Self::default()
        }
    }

    /// A policy with a fixed delay and no jitter.
    pub fn fixed(max_retries: i32, delay: Duration) -> Self {
        Self {
            max_retries,
            base_backoff: delay,
            max_backoff: delay,
            jitter: 0.0,
        }
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries.max(0);
        self
    }

    pub fn with_base_backoff(mut self, base: Duration) -> Self {
        self.base_backoff = base;
        self.max_backoff = self.max_backoff.max(base);
        self
    }

    pub fn with_max_backoff(mut self, max: Duration) -> Self {
        self.max_backoff = max;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Deterministic delay before retry number `retry_count` (0-based).
    pub fn base_delay(&self, retry_count: i32) -> Duration {
        let exp = retry_count.clamp(0, 20) as u32;
        self.base_backoff
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Delay before retry number `retry_count`, including jitter.
    pub fn delay_for(&self, retry_count: i32) -> Duration {
        let base = self.base_delay(retry_count);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let slack = rand::thread_rng().gen_range(0.0..=self.jitter);
        base + base.mul_f64(slack)
    }

    /// Whether a job that has already been retried `retry_count` times may retry again.
    pub fn allows_retry(&self, retry_count: i32) -> bool {
        retry_count < self.max_retries
    }

    /// Decide what a failed attempt does to its job.
    ///
    /// `max_retries` is the bound stored on the job at enqueue time, which
    /// wins over this policy's own bound. Terminal failures keep their kind;
    /// transient failures past the bound become `RetriesExhausted`.
    pub fn transition(
        &self,
        failure: &JobFailure,
        retry_count: i32,
        max_retries: i32,
        now: DateTime<Utc>,
    ) -> FailureTransition {
        if !failure.transient {
            return FailureTransition {
                outcome: FailOutcome::Failed { kind: failure.kind },
                error_kind: failure.kind,
                error_message: failure.message.clone(),
            };
        }

        if retry_count < max_retries {
            let delay = chrono::Duration::from_std(self.delay_for(retry_count))
                .unwrap_or_else(|_| chrono::Duration::seconds(defaults::JOB_RETRY_MAX_BACKOFF_SECS as i64));
            return FailureTransition {
                outcome: FailOutcome::Retrying {
                    retry_count: retry_count + 1,
                    run_after: now + delay,
                },
                error_kind: failure.kind,
                error_message: failure.message.clone(),
            };
        }

        let exhausted = Error::RetriesExhausted {
            attempts: retry_count + 1,
            last_error: failure.message.clone(),
        };
        FailureTransition {
            outcome: FailOutcome::Failed {
                kind: ErrorKind::RetriesExhausted,
            },
            error_kind: ErrorKind::RetriesExhausted,
            error_message: exhausted.to_string(),
        }
    }
}
