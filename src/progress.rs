//! Progress-callback trait for per-document pipeline events.
//!
//! Inject an [`Arc<dyn RunProgressCallback>`] into
//! [`crate::pipeline::Pipeline::with_progress`] to receive events as
//! discovery and the workers move documents through the run.
//!
//! # Example
//!
//! ```rust
//! use paperless_ocr::{RunProgressCallback, StatusSnapshot};
//! use std::sync::atomic::{AtomicU64, Ordering};
//!
//! struct FailureCounter {
//!     failures: AtomicU64,
//! }
//!
//! impl RunProgressCallback for FailureCounter {
//!     fn on_document_error(&self, id: u64, _title: &str, error: &str, _s: StatusSnapshot) {
//!         self.failures.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("document {id} failed: {error}");
//!     }
//! }
//! ```

use crate::pipeline::RunSummary;
use crate::store::DocumentId;
use crate::tracker::StatusSnapshot;
use std::sync::Arc;

/// Called by the pipeline as documents move through a run.
///
/// Workers call these methods concurrently; implementations must protect
/// shared mutable state themselves. All methods default to no-ops.
pub trait RunProgressCallback: Send + Sync {
    /// Called when the total number of candidates becomes known.
    fn on_run_start(&self, total: u64) {
        let _ = total;
    }

    /// Called when a worker picks up a document.
    fn on_document_start(&self, id: DocumentId, title: &str) {
        let _ = (id, title);
    }

    /// Called when a document was skipped because it already carries DONE.
    fn on_document_skipped(&self, id: DocumentId, status: StatusSnapshot) {
        let _ = (id, status);
    }

    /// Called after a document was rewritten and tagged DONE.
    fn on_document_complete(&self, id: DocumentId, title: &str, status: StatusSnapshot) {
        let _ = (id, title, status);
    }

    /// Called after a document was dead-lettered, during discovery or OCR.
    fn on_document_error(&self, id: DocumentId, title: &str, error: &str, status: StatusSnapshot) {
        let _ = (id, title, error, status);
    }

    /// Called once after every worker has exited.
    fn on_run_complete(&self, summary: &RunSummary) {
        let _ = summary;
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl RunProgressCallback for NoopProgressCallback {}

/// Shared handle to a progress callback.
pub type ProgressCallback = Arc<dyn RunProgressCallback>;
