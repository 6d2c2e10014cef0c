//! # resumatch-core
//!
//! Core types, traits, and abstractions for the resumatch pipeline.
//!
//! This crate provides the data model (resumes, job descriptions, match
//! results, queued jobs), the error taxonomy with its transient/terminal
//! classification, the retry policy, and the trait definitions that the
//! store, inference, and job crates implement.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod retry;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, ErrorKind, Result};
pub use models::*;
pub use retry::{FailureTransition, RetryPolicy};
pub use traits::*;
pub use uuid_utils::{extract_timestamp, is_v7, new_v7};
