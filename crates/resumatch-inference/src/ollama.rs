//! Ollama embedding backend.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use resumatch_core::{defaults, EmbeddingBackend, Error, Result};

/// Default Ollama endpoint.
pub const DEFAULT_OLLAMA_URL: &str = defaults::OLLAMA_URL;

/// Default embedding model (all-MiniLM-L6-v2, 384 dimensions).
pub const DEFAULT_EMBED_MODEL: &str = defaults::EMBED_MODEL;

/// Embedding calls slower than this are logged at WARN.
const SLOW_EMBED_MS: u64 = 5000;

/// Embeddings from an Ollama server's `/api/embed` endpoint.
///
/// Connection failures and 5xx/429 responses are transient; other 4xx
/// responses (unknown model, bad request) are configuration errors.
pub struct OllamaEmbedder {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
    timeout: Duration,
}

impl OllamaEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, dimension: usize) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let model = model.into();
        let timeout = Duration::from_secs(defaults::EMBED_TIMEOUT_SECS);

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        info!(
            subsystem = "inference",
            component = "ollama",
            base_url = %base_url,
            model = %model,
            dimension,
            "Initializing Ollama embedder"
        );

        Ok(Self {
            client,
            base_url,
            model,
            dimension,
            timeout,
        })
    }

    /// Create from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `OLLAMA_BASE` | `http://localhost:11434` |
    /// | `OLLAMA_EMBED_MODEL` | `all-minilm` |
    pub fn from_env(dimension: usize) -> Result<Self> {
        let base_url = std::env::var(defaults::ENV_OLLAMA_BASE)
            .unwrap_or_else(|_| DEFAULT_OLLAMA_URL.to_string());
        let model = std::env::var(defaults::ENV_OLLAMA_EMBED_MODEL)
            .unwrap_or_else(|_| DEFAULT_EMBED_MODEL.to_string());
        Self::new(base_url, model, dimension)
    }

    /// Per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingBackend for OllamaEmbedder {
    #[instrument(skip(self, texts), fields(subsystem = "inference", component = "ollama", op = "embed_texts", model = %self.model, input_count = texts.len()))]
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let start = Instant::now();
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("Ollama returned {status}: {body}");
            return Err(
                if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                    Error::Request(message)
                } else {
                    Error::Config(message)
                },
            );
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("failed to parse Ollama response: {e}")))?;

        if result.embeddings.len() != texts.len() {
            return Err(Error::Internal(format!(
                "Ollama returned {} embeddings for {} inputs",
                result.embeddings.len(),
                texts.len()
            )));
        }
        if let Some(bad) = result.embeddings.iter().find(|v| v.len() != self.dimension) {
            return Err(Error::EmbeddingDimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }

        let elapsed = start.elapsed().as_millis() as u64;
        debug!(
            result_count = result.embeddings.len(),
            duration_ms = elapsed,
            "Embedding complete"
        );
        if elapsed > SLOW_EMBED_MS {
            warn!(
                duration_ms = elapsed,
                input_count = texts.len(),
                slow = true,
                "Slow embedding operation"
            );
        }
        Ok(result.embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
