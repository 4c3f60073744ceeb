//! OCR backends: turn a materialised [`Job`] into text.
//!
//! Two variants sit behind [`OcrBackend`]:
//!
//! * [`VisionBackend`] sends every page image to a local vision model
//!   (Ollama `/api/generate`), one call per page.
//! * [`ConversionBackend`] uploads the whole document to a conversion
//!   service (docling-serve) once and gets Markdown back.
//!
//! The variant is chosen once per run by [`build_backend`]. Both share the
//! same [`RetryPolicy`]: timeouts and connection failures are retried with
//! linearly increasing backoff, everything else fails immediately.

pub mod conversion;
pub mod sanitize;
pub mod vision;

use crate::config::{BackendKind, PipelineConfig};
use crate::error::{BackendError, PipelineError};
use crate::pipeline::job::Job;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::warn;

pub use conversion::ConversionBackend;
pub use vision::VisionBackend;

/// What a backend reads from a job, and therefore what discovery must
/// materialise and cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendInput {
    /// Rasterised page images, capped at the page limit.
    PageImages,
    /// The original document bytes.
    SourceDocument,
}

/// Ordered text segments extracted from one document.
///
/// Page-image backends return one segment per page; whole-document
/// backends return a single segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedText {
    pub segments: Vec<String>,
}

impl ExtractedText {
    /// Segments separated by a blank line.
    pub fn joined(&self) -> String {
        self.segments.join("\n\n")
    }
}

/// Extracts text from a job's payload.
#[async_trait]
pub trait OcrBackend: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Which payload this backend consumes.
    fn input(&self) -> BackendInput;

    /// Extract text, retrying transient failures internally.
    async fn extract(&self, job: &Job) -> Result<ExtractedText, BackendError>;
}

/// Retry schedule for transient backend failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// The n-th retry waits `n * backoff_ms`.
    pub backoff_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_ms: config.retry_backoff_ms,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(u64::from(attempt)))
    }

    /// Run `call` until it succeeds, fails permanently, or the retries are
    /// used up. The last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, what: &str, mut call: F) -> Result<T, BackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let mut attempt = 0u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{}: {} (retry {}/{} in {}ms)",
                        what,
                        e,
                        attempt,
                        self.max_retries,
                        delay.as_millis()
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Construct the backend selected in `config`.
pub fn build_backend(config: &PipelineConfig) -> Result<Arc<dyn OcrBackend>, PipelineError> {
    Ok(match config.backend {
        BackendKind::Vision => Arc::new(VisionBackend::new(config)?),
        BackendKind::Conversion => Arc::new(ConversionBackend::new(config)?),
    })
}

/// Shared reqwest client with the backend timeout applied.
pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client, PipelineError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| PipelineError::InvalidConfig(format!("HTTP client: {e}")))
}
