//! Data model for resumes, job descriptions, match results, and queued jobs.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, ErrorKind};
use crate::uuid_utils::new_v7;

// =============================================================================
// RESUMES
// =============================================================================

/// Lifecycle status of a resume record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResumeStatus {
    #[default]
    Uploaded,
    Processing,
    Complete,
    Failed,
}

impl ResumeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResumeStatus::Uploaded => "uploaded",
            ResumeStatus::Processing => "processing",
            ResumeStatus::Complete => "complete",
            ResumeStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "processing" => ResumeStatus::Processing,
            "complete" => ResumeStatus::Complete,
            "failed" => ResumeStatus::Failed,
            _ => ResumeStatus::Uploaded,
        }
    }
}

/// Structured entities extracted from a document.
///
/// Missing categories are empty, never an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entities {
    #[serde(default)]
    pub skills: BTreeSet<String>,
    /// Longest stated experience duration, in years.
    #[serde(default)]
    pub experience_years: Option<f32>,
    #[serde(default)]
    pub education: BTreeSet<String>,
}

impl Entities {
    /// Convenience constructor for a skills-only entity set.
    pub fn with_skills<I, S>(skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            skills: skills.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

/// A resume as persisted by the result store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeRecord {
    pub id: Uuid,
    pub original_filename: String,
    pub upload_date: DateTime<Utc>,
    pub status: ResumeStatus,
    /// Reference to the stored upload, resolved by a `TextSource`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<Entities>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Latest match result per job description fingerprint.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_results: BTreeMap<String, MatchResult>,
    pub updated_at: DateTime<Utc>,
}

impl ResumeRecord {
    /// Create a freshly uploaded record.
    pub fn new(id: Uuid, original_filename: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            original_filename: original_filename.into(),
            upload_date: now,
            status: ResumeStatus::Uploaded,
            source_path: None,
            raw_text: None,
            entities: None,
            embedding: None,
            match_results: BTreeMap::new(),
            updated_at: now,
        }
    }

    /// Apply a partial update. Fields left as `None` are untouched.
    pub fn apply(&mut self, fields: ResumeFields) {
        if let Some(filename) = fields.original_filename {
            self.original_filename = filename;
        }
        if let Some(path) = fields.source_path {
            self.source_path = Some(path);
        }
        if let Some(text) = fields.raw_text {
            self.raw_text = Some(text);
        }
        if let Some(entities) = fields.entities {
            self.entities = Some(entities);
        }
        if let Some(embedding) = fields.embedding {
            self.embedding = Some(embedding);
        }
        if let Some(status) = fields.status {
            self.status = status;
        }
        self.updated_at = Utc::now();
    }

    /// Entities and embedding are both present.
    pub fn is_analyzed(&self) -> bool {
        self.entities.is_some() && self.embedding.is_some()
    }
}

/// Partial field set for [`ResultStore::upsert`](crate::ResultStore::upsert).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResumeFields {
    pub original_filename: Option<String>,
    pub source_path: Option<String>,
    pub raw_text: Option<String>,
    pub entities: Option<Entities>,
    pub embedding: Option<Vec<f32>>,
    pub status: Option<ResumeStatus>,
}

impl ResumeFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn original_filename(mut self, filename: impl Into<String>) -> Self {
        self.original_filename = Some(filename.into());
        self
    }

    pub fn source_path(mut self, path: impl Into<String>) -> Self {
        self.source_path = Some(path.into());
        self
    }

    pub fn raw_text(mut self, text: impl Into<String>) -> Self {
        self.raw_text = Some(text.into());
        self
    }

    pub fn entities(mut self, entities: Entities) -> Self {
        self.entities = Some(entities);
        self
    }

    pub fn embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn status(mut self, status: ResumeStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Check a vector against the process-wide embedding dimension.
pub fn check_dimension(embedding: &[f32], expected: usize) -> Result<(), Error> {
    if embedding.len() != expected {
        return Err(Error::EmbeddingDimensionMismatch {
            expected,
            actual: embedding.len(),
        });
    }
    Ok(())
}

// =============================================================================
// JOB DESCRIPTIONS & MATCH RESULTS
// =============================================================================

/// A job description to match resumes against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobDescription {
    pub text: String,
    #[serde(default)]
    pub required_skills: BTreeSet<String>,
    #[serde(default)]
    pub min_experience_years: Option<f32>,
}

impl JobDescription {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_required_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_skills = skills.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_min_experience(mut self, years: f32) -> Self {
        self.min_experience_years = Some(years);
        self
    }

    /// SHA-256 hex digest identifying this job description.
    ///
    /// Leading/trailing whitespace in the text does not change the
    /// fingerprint; skill order cannot, since skills are a sorted set.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.text.trim().as_bytes());
        hasher.update(b"\n");
        for skill in &self.required_skills {
            hasher.update(skill.as_bytes());
            hasher.update(b",");
        }
        hasher.update(b"\n");
        if let Some(years) = self.min_experience_years {
            hasher.update(years.to_string().as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// How a resume's experience compares with the job's minimum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperienceMatch {
    pub resume_years: Option<f32>,
    pub required_years: Option<f32>,
    pub meets_requirement: bool,
}

/// Outcome of matching one resume against one job description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub id: Uuid,
    pub resume_id: Uuid,
    pub job_fingerprint: String,
    /// Cosine similarity of resume and job embeddings, in [0, 1].
    pub similarity: f32,
    /// Composite score, in [0, 100].
    pub score: f32,
    pub matched_skills: BTreeSet<String>,
    pub missing_skills: BTreeSet<String>,
    pub experience: ExperienceMatch,
    pub recommendations: Vec<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// JOBS
// =============================================================================

/// Status of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "running" => JobStatus::Running,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Pending,
        }
    }

    /// Pending or running.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_in_flight()
    }
}

/// A resume-matching job tracked by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub resume_id: Uuid,
    pub job_fingerprint: String,
    pub payload: JobDescription,
    pub status: JobStatus,
    pub progress_percent: i32,
    pub progress_message: Option<String>,
    /// Also the fencing token for the current attempt.
    pub retry_count: i32,
    pub max_retries: i32,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub result: Option<JsonValue>,
    /// Earliest time the job may be claimed.
    pub run_after: DateTime<Utc>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build a new pending job, runnable immediately.
    pub fn new_pending(resume_id: Uuid, payload: JobDescription, max_retries: i32) -> Self {
        let now = Utc::now();
        Self {
            id: new_v7(),
            resume_id,
            job_fingerprint: payload.fingerprint(),
            payload,
            status: JobStatus::Pending,
            progress_percent: 0,
            progress_message: None,
            retry_count: 0,
            max_retries,
            error_kind: None,
            error_message: None,
            result: None,
            run_after: now,
            heartbeat_at: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Whether this is the final permitted attempt.
    pub fn is_last_attempt(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// External view of this job's state.
    pub fn task_status(&self) -> TaskStatus {
        match self.status {
            JobStatus::Pending => TaskStatus::Pending,
            JobStatus::Running => TaskStatus::Processing {
                progress: self.progress_percent,
            },
            JobStatus::Completed => match self
                .result
                .clone()
                .map(serde_json::from_value::<MatchResult>)
            {
                Some(Ok(result)) => TaskStatus::Complete {
                    result: Box::new(result),
                },
                _ => TaskStatus::Failed {
                    kind: ErrorKind::Internal,
                    error: "completed job has no readable result".to_string(),
                },
            },
            JobStatus::Failed => TaskStatus::Failed {
                kind: self.error_kind.unwrap_or(ErrorKind::Internal),
                error: self
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string()),
            },
        }
    }
}

/// Status reported to callers polling a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing { progress: i32 },
    Complete { result: Box<MatchResult> },
    Failed { error: String, kind: ErrorKind },
}

/// Outcome of an enqueue request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enqueued {
    pub job_id: Uuid,
    /// True when an in-flight job for the same pair already existed.
    pub coalesced: bool,
}

/// A classified failure recorded on a job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub message: String,
    pub transient: bool,
}

impl JobFailure {
    /// Classify an error at the worker boundary.
    ///
    /// The recorded message is what status queries return, so it never
    /// carries wrapped driver or filesystem text.
    pub fn from_error(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.public_message(),
            transient: err.is_transient(),
        }
    }

    pub fn transient(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            transient: true,
        }
    }

    pub fn terminal(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            transient: false,
        }
    }
}

/// What `fail` did with a job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FailOutcome {
    /// Rescheduled as pending; claimable at `run_after`.
    Retrying {
        retry_count: i32,
        run_after: DateTime<Utc>,
    },
    /// Terminal failure recorded with this kind.
    Failed { kind: ErrorKind },
    /// The attempt no longer owns the job (reaped or already finished).
    Superseded,
}

/// Queue statistics summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
}
