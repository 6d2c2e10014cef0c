//! # resumatch-jobs
//!
//! Asynchronous resume matching for resumatch.
//!
//! This crate provides:
//! - [`TaskQueue`]: non-blocking submission and status queries
//! - [`JobWorker`]: bounded concurrent execution with retry, timeouts,
//!   and a stale-job watchdog
//! - [`ResumeMatchHandler`]: the staged match pipeline and candidate ranking
//! - Progress and lifecycle notifications via broadcast channels
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use resumatch_db::Stores;
//! use resumatch_inference::{FilesystemTextSource, ResumeExtractor};
//! use resumatch_jobs::{ResumeMatchHandler, TaskQueue, WorkerBuilder, WorkerConfig};
//!
//! let stores = Stores::memory(384);
//! let handler = ResumeMatchHandler::new(
//!     stores.results.clone(),
//!     Arc::new(ResumeExtractor::offline(384)),
//!     Arc::new(FilesystemTextSource::new("./uploads")),
//! );
//! let handle = WorkerBuilder::new(stores.jobs.clone(), Arc::new(handler))
//!     .with_config(WorkerConfig::default())
//!     .build()
//!     .start();
//!
//! let queue = TaskQueue::new(stores.results.clone(), stores.jobs.clone());
//! let task_id = queue.submit(resume_id, job_description).await?;
//! let status = queue.status(task_id).await?;
//!
//! handle.shutdown_and_wait().await?;
//! ```

pub mod handler;
pub mod locks;
pub mod pipeline;
pub mod queue;
pub mod worker;

// Re-export core types
pub use resumatch_core::*;

pub use handler::{JobContext, JobHandler, JobResult, ProgressCallback};
pub use locks::{ResumeGuard, ResumeLocks};
pub use pipeline::ResumeMatchHandler;
pub use queue::TaskQueue;
pub use worker::{JobWorker, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle};

/// Default maximum retries for failed jobs.
pub const DEFAULT_MAX_RETRIES: i32 = resumatch_core::defaults::JOB_MAX_RETRIES;

/// Default polling interval for job processing (milliseconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = resumatch_core::defaults::JOB_POLL_INTERVAL_MS;
