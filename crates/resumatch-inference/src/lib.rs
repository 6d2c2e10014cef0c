//! # resumatch-inference
//!
//! Document analysis and scoring for resumatch.
//!
//! This crate provides:
//! - Rule-based entity recognition (skills, education, experience)
//! - Embedding backends: Ollama (default) and an offline hashing embedder
//! - [`ResumeExtractor`], the shared [`Extractor`] implementation
//! - Cosine similarity and composite match scoring
//! - Filesystem text loading for stored uploads
//!
//! # Feature Flags
//!
//! - `ollama` (default): Enable the Ollama embedding backend
//!
//! # Example
//!
//! ```rust,no_run
//! use resumatch_inference::{Extractor, ResumeExtractor};
//!
//! #[tokio::main]
//! async fn main() {
//!     let extractor = ResumeExtractor::offline(384);
//!     let out = extractor.extract("Python developer, 5 years").await.unwrap();
//!     assert_eq!(out.embedding.len(), 384);
//! }
//! ```

pub mod entities;
pub mod extractor;
pub mod hashing;
pub mod scorer;
pub mod text_source;

#[cfg(feature = "ollama")]
pub mod ollama;

// Re-export core types
pub use resumatch_core::*;

pub use entities::{EntityRecognizer, SkillLexicon, DEFAULT_SKILLS};
pub use extractor::{log_inference_config, EmbedderKind, InferenceConfig, ResumeExtractor};
pub use hashing::HashingEmbedder;
#[cfg(feature = "ollama")]
pub use ollama::OllamaEmbedder;
pub use scorer::{
    composite_score, cosine_similarity, partition_skills, skill_overlap_ratio, MatchScorer,
};
pub use text_source::FilesystemTextSource;
