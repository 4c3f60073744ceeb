//! Units of work passed from discovery to the worker pool.

use crate::store::{DocumentId, TagId};

/// What the OCR backend will read for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPayload {
    /// Rasterised PNG pages, in page order, capped at the page limit.
    Pages(Vec<Vec<u8>>),
    /// The original document bytes.
    Document(Vec<u8>),
}

impl JobPayload {
    /// Short name used in logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            JobPayload::Pages(_) => "page-image",
            JobPayload::Document(_) => "document",
        }
    }
}

/// One document ready for OCR.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: DocumentId,
    pub title: String,
    pub payload: JobPayload,
    /// Tags the document carried when it was discovered.
    pub tags: Vec<TagId>,
    /// Page count of the source document, before the page limit.
    pub total_pages: usize,
}

impl Job {
    /// Number of pages the backend actually sees.
    pub fn processed_pages(&self) -> usize {
        match &self.payload {
            JobPayload::Pages(pages) => pages.len(),
            JobPayload::Document(_) => self.total_pages,
        }
    }
}

/// Message on the job queue.
#[derive(Debug)]
pub enum QueueItem {
    Job(Job),
    /// Tells the receiving worker to exit. Exactly one is sent per worker.
    Shutdown,
}
