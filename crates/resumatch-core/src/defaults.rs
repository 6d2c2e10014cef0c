//! Centralized default constants for the resumatch pipeline.
//!
//! **This module is the single source of truth** for shared default values
//! and the environment variable names that override them. Crates reference
//! these constants instead of defining their own magic numbers.

// =============================================================================
// EMBEDDING
// =============================================================================

/// Default embedding vector dimension (all-MiniLM-L6-v2 class models).
pub const EMBED_DIMENSION: usize = 384;

/// Default embedding model name (Ollama).
pub const EMBED_MODEL: &str = "all-minilm";

/// Default Ollama base URL.
pub const OLLAMA_URL: &str = "http://localhost:11434";

/// Timeout for a single embedding request.
pub const EMBED_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// SCORING
// =============================================================================

/// Weight of semantic similarity in the composite score.
pub const SIMILARITY_WEIGHT: f32 = 0.6;

/// Weight of skill overlap in the composite score.
pub const SKILL_OVERLAP_WEIGHT: f32 = 0.4;

/// Similarity below which a "low semantic alignment" recommendation is added.
pub const LOW_SIMILARITY_THRESHOLD: f32 = 0.5;

/// Default number of candidates returned by ranking.
pub const RANK_LIMIT: usize = 10;

// =============================================================================
// JOB QUEUE
// =============================================================================

/// Default maximum retries for transient failures (attempts = retries + 1).
pub const JOB_MAX_RETRIES: i32 = 3;

/// Base retry backoff. Doubles on each retry.
pub const JOB_RETRY_BACKOFF_SECS: u64 = 60;

/// Upper bound on a single retry backoff.
pub const JOB_RETRY_MAX_BACKOFF_SECS: u64 = 900;

/// Polling interval when the queue is empty (milliseconds).
pub const JOB_POLL_INTERVAL_MS: u64 = 500;

/// Maximum concurrently executing jobs per worker.
pub const JOB_MAX_CONCURRENT: usize = 4;

/// Hard timeout for a single job attempt.
pub const JOB_TIMEOUT_SECS: u64 = 300;

/// A running job with no heartbeat for this long is considered stalled.
pub const JOB_STALE_AFTER_SECS: u64 = 600;

/// How often the watchdog scans for stalled jobs.
pub const JOB_WATCHDOG_INTERVAL_SECS: u64 = 30;

/// Finished jobs kept by the watchdog's retention pass.
pub const JOB_RETAIN_TERMINAL: i64 = 10_000;

/// Capacity of the worker event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// PIPELINE PROGRESS CHECKPOINTS
// =============================================================================

pub const PROGRESS_FETCHED: i32 = 10;
pub const PROGRESS_TEXT_EXTRACTED: i32 = 30;
pub const PROGRESS_NLP_DONE: i32 = 60;
pub const PROGRESS_SCORED: i32 = 80;
pub const PROGRESS_DONE: i32 = 100;

// =============================================================================
// STORAGE
// =============================================================================

/// Default base directory for stored resume uploads.
pub const RESUME_SOURCE_DIR: &str = "./uploads";

/// Default page size when listing resumes.
pub const PAGE_LIMIT: i64 = 100;

// =============================================================================
// ENVIRONMENT VARIABLES
// =============================================================================

pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_STORE: &str = "RESUMATCH_STORE";
pub const ENV_EMBED_DIMENSION: &str = "EMBED_DIMENSION";
pub const ENV_EMBED_BACKEND: &str = "EMBED_BACKEND";
pub const ENV_OLLAMA_BASE: &str = "OLLAMA_BASE";
pub const ENV_OLLAMA_EMBED_MODEL: &str = "OLLAMA_EMBED_MODEL";
pub const ENV_JOB_WORKER_ENABLED: &str = "JOB_WORKER_ENABLED";
pub const ENV_JOB_MAX_CONCURRENT: &str = "JOB_MAX_CONCURRENT";
pub const ENV_JOB_POLL_INTERVAL_MS: &str = "JOB_POLL_INTERVAL_MS";
pub const ENV_JOB_TIMEOUT_SECS: &str = "JOB_TIMEOUT_SECS";
pub const ENV_JOB_STALE_AFTER_SECS: &str = "JOB_STALE_AFTER_SECS";
pub const ENV_JOB_RETAIN_TERMINAL: &str = "JOB_RETAIN_TERMINAL";
pub const ENV_JOB_MAX_RETRIES: &str = "JOB_MAX_RETRIES";
pub const ENV_JOB_RETRY_BACKOFF_SECS: &str = "JOB_RETRY_BACKOFF_SECS";
pub const ENV_JOB_RETRY_MAX_BACKOFF_SECS: &str = "JOB_RETRY_MAX_BACKOFF_SECS";
pub const ENV_RESUME_SOURCE_DIR: &str = "RESUME_SOURCE_DIR";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_weights_sum_to_one() {
        assert!((SIMILARITY_WEIGHT + SKILL_OVERLAP_WEIGHT - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_progress_checkpoints_are_increasing() {
        let checkpoints = [
            PROGRESS_FETCHED,
            PROGRESS_TEXT_EXTRACTED,
            PROGRESS_NLP_DONE,
            PROGRESS_SCORED,
            PROGRESS_DONE,
        ];
        assert!(checkpoints.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(PROGRESS_DONE, 100);
    }

    #[test]
    fn test_backoff_cap_exceeds_base() {
        assert!(JOB_RETRY_MAX_BACKOFF_SECS >= JOB_RETRY_BACKOFF_SECS);
    }

    #[test]
    fn test_stale_ceiling_exceeds_job_timeout() {
        assert!(JOB_STALE_AFTER_SECS > JOB_TIMEOUT_SECS);
    }
}
