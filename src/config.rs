//! Configuration types for an OCR run.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. What to process in a given run is a separate
//! concern expressed by [`Selection`] and the `force` flag on
//! [`RunOptions`], so one config can serve several runs.

use crate::error::PipelineError;
use crate::store::{DocumentId, TagId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Default prompt sent with every page image to the vision model.
pub const DEFAULT_PROMPT: &str = "Transcribe the text in this image.";

/// Configuration for an OCR run.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use paperless_ocr::{BackendKind, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .store_url("http://paperless.local:8000")
///     .store_token("secret")
///     .backend(BackendKind::Vision)
///     .workers(2)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    // ── Document store ────────────────────────────────────────────────────
    /// Base URL of the document store, without trailing slash.
    pub store_url: String,

    /// API token sent as `Authorization: Token <token>`.
    pub store_token: String,

    /// Per-request timeout for document store calls in seconds. Default: 120.
    pub store_timeout_secs: u64,

    // ── OCR backend ───────────────────────────────────────────────────────
    /// Which backend variant to run. Default: [`BackendKind::Vision`].
    pub backend: BackendKind,

    /// Endpoint of the OCR backend.
    ///
    /// For [`BackendKind::Vision`] this is the full generate URL
    /// (e.g. `http://localhost:11434/api/generate`); for
    /// [`BackendKind::Conversion`] it is the service base URL.
    pub backend_url: String,

    /// Vision model identifier. Default: `minicpm-v:latest`.
    pub model: String,

    /// Prompt sent with every page image. Default: [`DEFAULT_PROMPT`].
    pub prompt: String,

    /// OCR engine requested from the conversion service. Default: `easyocr`.
    pub ocr_engine: String,

    /// OCR languages requested from the conversion service. Default: `["de", "en"]`.
    pub languages: Vec<String>,

    /// Per-call backend timeout in seconds. Default: 300.
    ///
    /// Vision models on modest hardware can take minutes per page; the
    /// timeout only guards against a hung connection.
    pub backend_timeout_secs: u64,

    /// Retries after a transient backend failure. Default: 2.
    pub max_retries: u32,

    /// Base delay between retries in milliseconds. Default: 2000.
    ///
    /// The n-th retry waits `n * retry_backoff_ms`.
    pub retry_backoff_ms: u64,

    // ── Tags ──────────────────────────────────────────────────────────────
    /// Tag marking a document as attempted. Default: 1065.
    pub done_tag: TagId,

    /// Tag marking a document whose last attempt failed. Default: 1066.
    pub failed_tag: TagId,

    // ── Pipeline ──────────────────────────────────────────────────────────
    /// Capacity of the job queue between discovery and workers. Default: 5.
    ///
    /// Bounds both memory (each job holds its page images) and the number of
    /// cache directories that exist at any one time.
    pub buffer_size: usize,

    /// Maximum number of pages rasterised per document. Default: 3.
    pub page_limit: usize,

    /// Number of concurrent workers. Default: 1.
    pub workers: usize,

    /// Explicit path to the pdfium shared library. `None` binds the
    /// system library.
    pub pdfium_lib_path: Option<PathBuf>,

    // ── Local state ───────────────────────────────────────────────────────
    /// Root directory of the page cache. Default: `./ocr_cache`.
    pub cache_dir: PathBuf,

    /// Dead-letter log path. Default: `./failed_documents.txt`.
    pub dead_letter_path: PathBuf,

    /// Optional log file; `None` logs to stderr only.
    pub log_file: Option<PathBuf>,

    /// Size at which the log file is rotated, in bytes. Default: 5 MiB.
    pub log_max_bytes: u64,

    /// Number of rotated log files kept. Default: 3.
    pub log_backups: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            store_url: String::new(),
            store_token: String::new(),
            store_timeout_secs: 120,
            backend: BackendKind::default(),
            backend_url: "http://localhost:11434/api/generate".to_string(),
            model: "minicpm-v:latest".to_string(),
            prompt: DEFAULT_PROMPT.to_string(),
            ocr_engine: "easyocr".to_string(),
            languages: vec!["de".to_string(), "en".to_string()],
            backend_timeout_secs: 300,
            max_retries: 2,
            retry_backoff_ms: 2000,
            done_tag: 1065,
            failed_tag: 1066,
            buffer_size: 5,
            page_limit: 3,
            workers: 1,
            pdfium_lib_path: None,
            cache_dir: PathBuf::from("./ocr_cache"),
            dead_letter_path: PathBuf::from("./failed_documents.txt"),
            log_file: None,
            log_max_bytes: 5 * 1024 * 1024,
            log_backups: 3,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("store_url", &self.store_url)
            .field("store_token", &"<redacted>")
            .field("backend", &self.backend)
            .field("backend_url", &self.backend_url)
            .field("model", &self.model)
            .field("ocr_engine", &self.ocr_engine)
            .field("languages", &self.languages)
            .field("max_retries", &self.max_retries)
            .field("done_tag", &self.done_tag)
            .field("failed_tag", &self.failed_tag)
            .field("buffer_size", &self.buffer_size)
            .field("page_limit", &self.page_limit)
            .field("workers", &self.workers)
            .field("pdfium_lib_path", &self.pdfium_lib_path)
            .field("cache_dir", &self.cache_dir)
            .field("dead_letter_path", &self.dead_letter_path)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn store_url(mut self, url: impl Into<String>) -> Self {
        self.config.store_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn store_token(mut self, token: impl Into<String>) -> Self {
        self.config.store_token = token.into();
        self
    }

    pub fn store_timeout_secs(mut self, secs: u64) -> Self {
        self.config.store_timeout_secs = secs;
        self
    }

    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.config.backend = kind;
        self
    }

    pub fn backend_url(mut self, url: impl Into<String>) -> Self {
        self.config.backend_url = url.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = prompt.into();
        self
    }

    pub fn ocr_engine(mut self, engine: impl Into<String>) -> Self {
        self.config.ocr_engine = engine.into();
        self
    }

    pub fn languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.languages = languages.into_iter().map(Into::into).collect();
        self
    }

    pub fn backend_timeout_secs(mut self, secs: u64) -> Self {
        self.config.backend_timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn done_tag(mut self, tag: TagId) -> Self {
        self.config.done_tag = tag;
        self
    }

    pub fn failed_tag(mut self, tag: TagId) -> Self {
        self.config.failed_tag = tag;
        self
    }

    pub fn buffer_size(mut self, n: usize) -> Self {
        self.config.buffer_size = n;
        self
    }

    pub fn page_limit(mut self, n: usize) -> Self {
        self.config.page_limit = n;
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n;
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = dir.into();
        self
    }

    pub fn dead_letter_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.dead_letter_path = path.into();
        self
    }

    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.log_file = Some(path.into());
        self
    }

    pub fn log_max_bytes(mut self, bytes: u64) -> Self {
        self.config.log_max_bytes = bytes;
        self
    }

    pub fn log_backups(mut self, n: usize) -> Self {
        self.config.log_backups = n;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.workers == 0 {
            return Err(PipelineError::InvalidConfig("Worker count must be ≥ 1".into()));
        }
        if c.buffer_size == 0 {
            return Err(PipelineError::InvalidConfig("Buffer size must be ≥ 1".into()));
        }
        if c.page_limit == 0 {
            return Err(PipelineError::InvalidConfig("Page limit must be ≥ 1".into()));
        }
        if c.done_tag == c.failed_tag {
            return Err(PipelineError::InvalidConfig(format!(
                "DONE and FAILED tags must differ, both are {}",
                c.done_tag
            )));
        }
        if c.backend_url.is_empty() {
            return Err(PipelineError::InvalidConfig("Backend URL is empty".into()));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Which OCR backend variant a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Vision model, one call per rasterised page. (default)
    #[default]
    Vision,
    /// Document-conversion service, one call per whole document.
    Conversion,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Vision => f.write_str("vision"),
            BackendKind::Conversion => f.write_str("conversion"),
        }
    }
}

/// Which documents a run considers. The variants are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Selection {
    /// Every document not yet tagged DONE. (default)
    #[default]
    Bulk,
    /// One document by id.
    Single(DocumentId),
    /// Bulk, restricted to documents carrying this tag.
    Subgroup(TagId),
    /// Every document listed in the dead-letter log.
    Retry,
}

/// Per-run options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOptions {
    pub selection: Selection,
    /// Reprocess documents that already carry the DONE tag.
    pub force: bool,
}
