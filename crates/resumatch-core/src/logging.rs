//! Structured logging schema and field name constants for resumatch.
//!
//! All crates use these names for structured `tracing` fields so log
//! aggregation can query by the same keys across every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, retry scheduled or fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), job completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration (skills matched, candidates scored) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "db", "inference", "jobs", "pipeline"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "worker", "watchdog", "result_store", "ollama"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "submit", "claim_next", "extract", "attach_match_result"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Resume UUID being operated on.
pub const RESUME_ID: &str = "resume_id";

/// Job (task) UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Job description fingerprint.
pub const JOB_FINGERPRINT: &str = "job_fingerprint";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Progress percentage reported by a job.
pub const PROGRESS: &str = "progress";

/// Retry attempt number.
pub const RETRY_COUNT: &str = "retry_count";

/// Embedding dimension.
pub const DIMENSION: &str = "dimension";

/// Composite match score (0-100).
pub const SCORE: &str = "score";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Error taxonomy kind.
pub const ERROR_KIND: &str = "error_kind";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
