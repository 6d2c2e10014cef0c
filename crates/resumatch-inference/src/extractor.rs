//! Document analyzer: text → entities + embedding.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info};

use resumatch_core::{
    check_dimension, defaults, EmbeddingBackend, Error, Extraction, Extractor, Result,
};

use crate::entities::{EntityRecognizer, SkillLexicon};
use crate::hashing::HashingEmbedder;
#[cfg(feature = "ollama")]
use crate::ollama::OllamaEmbedder;

/// Which embedding backend to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedderKind {
    Ollama,
    Hashing,
}

impl EmbedderKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(EmbedderKind::Ollama),
            "hashing" | "hash" => Ok(EmbedderKind::Hashing),
            other => Err(Error::Config(format!(
                "{} must be 'ollama' or 'hashing', got '{other}'",
                defaults::ENV_EMBED_BACKEND
            ))),
        }
    }
}

/// Inference settings read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceConfig {
    pub backend: EmbedderKind,
    pub dimension: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            backend: EmbedderKind::Ollama,
            dimension: defaults::EMBED_DIMENSION,
        }
    }
}

impl InferenceConfig {
    /// | Variable | Default |
    /// |----------|---------|
    /// | `EMBED_BACKEND` | `ollama` |
    /// | `EMBED_DIMENSION` | `384` |
    pub fn from_env() -> Result<Self> {
        let backend = match std::env::var(defaults::ENV_EMBED_BACKEND) {
            Ok(value) => EmbedderKind::parse(&value)?,
            Err(_) => EmbedderKind::Ollama,
        };
        let dimension = match std::env::var(defaults::ENV_EMBED_DIMENSION) {
            Ok(value) => value
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|d| *d > 0)
                .ok_or_else(|| {
                    Error::Config(format!(
                        "{} must be a positive integer, got '{value}'",
                        defaults::ENV_EMBED_DIMENSION
                    ))
                })?,
            Err(_) => defaults::EMBED_DIMENSION,
        };
        Ok(Self { backend, dimension })
    }

    pub fn with_backend(mut self, backend: EmbedderKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    /// Build the configured embedding backend.
    pub fn build_backend(&self) -> Result<Arc<dyn EmbeddingBackend>> {
        match self.backend {
            #[cfg(feature = "ollama")]
            EmbedderKind::Ollama => Ok(Arc::new(OllamaEmbedder::from_env(self.dimension)?)),
            #[cfg(not(feature = "ollama"))]
            EmbedderKind::Ollama => Err(Error::Config(
                "built without the 'ollama' feature".to_string(),
            )),
            EmbedderKind::Hashing => Ok(Arc::new(HashingEmbedder::new(self.dimension))),
        }
    }
}

/// The production [`Extractor`]: an entity recognizer plus an embedding
/// backend, with the process-wide dimension enforced on every vector.
///
/// Holds no per-call mutable state, so one instance is shared by every
/// worker behind an `Arc`.
pub struct ResumeExtractor {
    recognizer: Arc<dyn EntityRecognizer>,
    backend: Arc<dyn EmbeddingBackend>,
    dimension: usize,
}

impl ResumeExtractor {
    /// Fails with `Config` when the backend's dimension differs from
    /// `dimension`.
    pub fn new(
        recognizer: Arc<dyn EntityRecognizer>,
        backend: Arc<dyn EmbeddingBackend>,
        dimension: usize,
    ) -> Result<Self> {
        if backend.dimension() != dimension {
            return Err(Error::Config(format!(
                "embedding backend '{}' produces {} dimensions, expected {}",
                backend.model_name(),
                backend.dimension(),
                dimension
            )));
        }
        Ok(Self {
            recognizer,
            backend,
            dimension,
        })
    }

    /// Default lexicon with the backend named by `config`.
    pub fn from_config(config: &InferenceConfig) -> Result<Self> {
        Self::new(
            Arc::new(SkillLexicon::default()),
            config.build_backend()?,
            config.dimension,
        )
    }

    /// Default lexicon with the offline hashing embedder.
    pub fn offline(dimension: usize) -> Self {
        Self {
            recognizer: Arc::new(SkillLexicon::default()),
            backend: Arc::new(HashingEmbedder::new(dimension)),
            dimension: dimension.max(1),
        }
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }
}

#[async_trait]
impl Extractor for ResumeExtractor {
    async fn extract(&self, text: &str) -> Result<Extraction> {
        if text.trim().is_empty() {
            return Err(Error::ExtractionFailed(
                "document contains no text".to_string(),
            ));
        }

        let start = Instant::now();
        let entities = self.recognizer.recognize(text);
        let embedding = self.embed(text).await?;

        debug!(
            subsystem = "inference",
            component = "extractor",
            op = "extract",
            skill_count = entities.skills.len(),
            dimension = embedding.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Extraction complete"
        );
        Ok(Extraction {
            entities,
            embedding,
        })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.backend.embed_texts(&[text.to_string()]).await?;
        let embedding = vectors.pop().ok_or_else(|| {
            Error::Internal(format!(
                "embedding backend '{}' returned no vector",
                self.backend.model_name()
            ))
        })?;
        check_dimension(&embedding, self.dimension)?;
        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Log the chosen inference stack once at startup.
pub fn log_inference_config(config: &InferenceConfig) {
    info!(
        subsystem = "inference",
        component = "extractor",
        backend = ?config.backend,
        dimension = config.dimension,
        "Inference configured"
    );
}
