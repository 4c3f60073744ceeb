//! Remote document store boundary.
//!
//! The pipeline only talks to the store through [`DocumentStore`], so the
//! Paperless client in [`paperless`] can be swapped for an in-memory fake in
//! tests.

pub mod paperless;

use crate::error::PipelineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use paperless::PaperlessClient;

/// Remote document identifier.
pub type DocumentId = u64;

/// Remote tag identifier.
pub type TagId = u64;

/// The metadata the pipeline needs about a remote document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: DocumentId,
    pub title: String,
    #[serde(default)]
    pub tags: Vec<TagId>,
}

impl DocumentSummary {
    pub fn has_tag(&self, tag: TagId) -> bool {
        self.tags.contains(&tag)
    }
}

/// Server-side listing filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Only documents that do not carry this tag.
    pub exclude_tag: Option<TagId>,
    /// Only documents that carry this tag.
    pub include_tag: Option<TagId>,
}

/// One page of a document listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Total number of matching documents across all pages.
    pub total: u64,
    pub documents: Vec<DocumentSummary>,
    /// Opaque cursor for the next page, `None` on the last page.
    pub next: Option<String>,
}

/// Partial update of a remote document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocumentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<TagId>>,
}

/// Operations the pipeline needs from the document store.
///
/// Every method fails with [`PipelineError`]; non-2xx answers surface as
/// [`PipelineError::StoreStatus`].
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch one page of the listing. `cursor` is `None` for the first page.
    async fn list(
        &self,
        filter: ListFilter,
        cursor: Option<String>,
    ) -> Result<ListPage, PipelineError>;

    async fn get_metadata(&self, id: DocumentId) -> Result<DocumentSummary, PipelineError>;

    /// Download the original document bytes.
    async fn download(&self, id: DocumentId) -> Result<Vec<u8>, PipelineError>;

    /// Replace the stored file of a document.
    async fn replace_file(&self, id: DocumentId, pdf: Vec<u8>) -> Result<(), PipelineError>;

    async fn patch(&self, id: DocumentId, patch: DocumentPatch) -> Result<(), PipelineError>;
}
