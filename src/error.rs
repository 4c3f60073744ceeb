//! Error types for the paperless-ocr library.
//!
//! Two error types reflect two failure domains:
//!
//! * [`PipelineError`] is returned by every fallible library operation. Only a
//!   few variants end a run (discovery unreachable at startup, invalid
//!   configuration); everything else is contained by the producer or the
//!   worker that hit it and recorded in the dead-letter log.
//!
//! * [`BackendError`] is a failed OCR backend call. Carries the
//!   transient/permanent classification the retry policy needs.

use crate::store::DocumentId;
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by the pipeline and its components.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Document store errors ─────────────────────────────────────────────
    /// The candidate source could not be reached when discovery started.
    #[error("Document store unreachable during discovery: {detail}")]
    DiscoveryUnavailable { detail: String },

    /// The document store could not be reached or the request failed in transit.
    #[error("Document store request '{operation}' failed: {detail}")]
    StoreRequest { operation: String, detail: String },

    /// The document store answered with a non-2xx status.
    #[error("Document store returned HTTP {status} for '{operation}': {body}")]
    StoreStatus {
        operation: String,
        status: u16,
        body: String,
    },

    /// The document store does not know this document.
    #[error("Document {id} not found in the document store")]
    DocumentNotFound { id: DocumentId },

    // ── Rendering errors ──────────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Install libpdfium system-wide or set PDFIUM_LIB_PATH=/path/to/libpdfium."
    )]
    PdfiumBindingFailed(String),

    /// The downloaded bytes could not be opened as a document.
    #[error("Document {id} is corrupt: {detail}")]
    CorruptDocument { id: DocumentId, detail: String },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// The replacement PDF could not be composed.
    #[error("Failed to compose replacement PDF: {0}")]
    ComposeFailed(String),

    // ── OCR errors ────────────────────────────────────────────────────────
    /// The OCR backend failed (after retries, if the failure was transient).
    #[error(transparent)]
    Backend(#[from] BackendError),

    // ── Local state errors ────────────────────────────────────────────────
    /// No complete cache entry exists for the document.
    #[error("No cached pages for document {id}")]
    CacheMiss { id: DocumentId },

    /// Reading or writing the page cache failed.
    #[error("Cache I/O failed at '{path}': {source}")]
    CacheIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading or writing the dead-letter log failed.
    #[error("Dead-letter log I/O failed at '{path}': {source}")]
    DeadLetterIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A failed OCR backend call.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The call exceeded the configured per-call timeout.
    #[error("OCR backend call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The backend could not be reached.
    #[error("Could not connect to OCR backend: {detail}")]
    Connection { detail: String },

    /// The backend answered with a non-2xx status.
    #[error("OCR backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body did not have the expected shape.
    #[error("Malformed OCR backend response: {0}")]
    InvalidResponse(String),

    /// The job did not carry the input this backend consumes.
    #[error("Job for document {id} has no {expected} payload")]
    UnsupportedPayload { id: DocumentId, expected: &'static str },

    /// Any other request failure.
    #[error("OCR backend request failed: {0}")]
    Request(String),
}

impl BackendError {
    /// Whether retrying the same call may succeed.
    ///
    /// Only timeouts and connection failures qualify; a backend that answered
    /// (even with 5xx) or returned garbage is treated as permanent.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Timeout { .. } | BackendError::Connection { .. })
    }

    /// Classify a reqwest error.
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            BackendError::Timeout { secs: timeout_secs }
        } else if err.is_connect() {
            BackendError::Connection {
                detail: err.to_string(),
            }
        } else if err.is_decode() {
            BackendError::InvalidResponse(err.to_string())
        } else {
            BackendError::Request(err.to_string())
        }
    }
}

/// Longest response body kept in status errors.
pub(crate) const MAX_ERROR_BODY: usize = 500;

/// Cut an error response body to [`MAX_ERROR_BODY`] bytes on a char boundary.
pub(crate) fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}
