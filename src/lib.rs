//! # paperless-ocr
//!
//! Re-OCR scanned documents held in a Paperless-ngx instance with a local
//! vision model or a document-conversion service, then write the text back.
//!
//! ## Why this crate?
//!
//! The OCR layer Paperless produces on ingest is often poor for photographed
//! or low-quality scans. This crate pulls each document, rasterises its first
//! few pages, has a model read them, replaces the stored file with a
//! text-only PDF and the stored content with the extracted text, and tags the
//! document so it is not processed twice.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Paperless
//!  │
//!  ├─ 1. Discover   list / fetch candidates, skip those tagged DONE
//!  ├─ 2. Materialise download, rasterise via pdfium, cache on disk
//!  ├─ 3. Queue      bounded channel, one sentinel per worker at the end
//!  ├─ 4. OCR        vision model per page, or conversion per document
//!  └─ 5. Write back replace file, patch content + tags, clear cache
//! ```
//!
//! Failures are contained per document: the id goes to a dead-letter log and
//! the document gets the FAILED tag. A later run with
//! [`Selection::Retry`] drains the log and tries again.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use paperless_ocr::{Pipeline, PipelineConfig, RunOptions, Selection};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .store_url("http://paperless.local:8000")
//!         .store_token(std::env::var("PAPERLESS_TOKEN")?)
//!         .workers(2)
//!         .build()?;
//!     let summary = Pipeline::from_config(config)?
//!         .run(RunOptions { selection: Selection::Single(42), force: true })
//!         .await?;
//!     eprintln!("{} failed", summary.status.failed);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `paperless-ocr` binary (clap + anyhow + indicatif + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod cache;
pub mod config;
pub mod dead_letter;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod render;
pub mod store;
pub mod tracker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{build_backend, BackendInput, ExtractedText, OcrBackend, RetryPolicy};
pub use cache::{CacheEntry, CacheStore};
pub use config::{BackendKind, PipelineConfig, PipelineConfigBuilder, RunOptions, Selection};
pub use dead_letter::DeadLetterLog;
pub use error::{BackendError, PipelineError};
pub use pipeline::job::{Job, JobPayload, QueueItem};
pub use pipeline::{Pipeline, RunSummary};
pub use progress::{NoopProgressCallback, ProgressCallback, RunProgressCallback};
pub use render::{DocumentRenderer, PdfiumRenderer, Rasterized};
pub use store::{
    DocumentId, DocumentPatch, DocumentStore, DocumentSummary, ListFilter, ListPage,
    PaperlessClient, TagId,
};
pub use tracker::{StatusSnapshot, StatusTracker};
