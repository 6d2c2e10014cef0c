//! Resolving stored uploads to document text.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use resumatch_core::{defaults, Error, Result, TextSource};

/// File extensions read as plain text.
pub const TEXT_EXTENSIONS: &[&str] = &["txt", "text", "md"];

/// Reads plain-text uploads from a base directory.
///
/// References are paths relative to the base directory. Bytes are decoded
/// as UTF-8 with invalid sequences replaced. Binary formats (PDF, DOCX) are
/// rejected as `ExtractionFailed`; a missing file is `NotFound`; any other
/// I/O failure is transient.
#[derive(Debug, Clone)]
pub struct FilesystemTextSource {
    base_dir: PathBuf,
}

impl FilesystemTextSource {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Base directory from `RESUME_SOURCE_DIR` (default `./uploads`).
    pub fn from_env() -> Self {
        Self::new(
            std::env::var(defaults::ENV_RESUME_SOURCE_DIR)
                .unwrap_or_else(|_| defaults::RESUME_SOURCE_DIR.to_string()),
        )
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn resolve(&self, reference: &str) -> Result<PathBuf> {
        let relative = Path::new(reference);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if reference.trim().is_empty() || escapes {
            return Err(Error::InvalidInput(format!(
                "source path must be relative to the upload directory: '{reference}'"
            )));
        }
        Ok(self.base_dir.join(relative))
    }
}

fn is_text_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| TEXT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[async_trait]
impl TextSource for FilesystemTextSource {
    async fn load_text(&self, reference: &str) -> Result<String> {
        let path = self.resolve(reference)?;
        if !is_text_file(&path) {
            return Err(Error::ExtractionFailed(format!(
                "unsupported document format: '{reference}'"
            )));
        }

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("source document '{reference}'")));
            }
            Err(e) => return Err(e.into()),
        };
        let text = String::from_utf8_lossy(&bytes).into_owned();

        debug!(
            subsystem = "inference",
            component = "text_source",
            op = "load_text",
            bytes = bytes.len(),
            line_count = text.lines().count(),
            "Source document loaded"
        );
        Ok(text)
    }
}
