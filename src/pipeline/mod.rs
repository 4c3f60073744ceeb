//! The OCR run: one discovery task feeding a pool of workers.
//!
//! ## Data Flow
//!
//! ```text
//! DocumentStore ──▶ producer ──▶ [bounded queue] ──▶ worker × W ──▶ DocumentStore
//!  (list/fetch)    (gate, cache,   (QueueItem)       (OCR, compose,   (replace,
//!                   rasterise)                        patch, clear)    patch)
//! ```
//!
//! 1. [`producer`] selects candidates, applies the tag gate, materialises
//!    each document through the page cache and enqueues a [`job::Job`]
//! 2. [`worker`]s pull jobs, call the OCR backend, rewrite the remote
//!    document and record the outcome
//! 3. after discovery ends, one [`job::QueueItem::Shutdown`] per worker is
//!    sent, so every worker exits once the queue drains
//!
//! Per-document failures never end the run; they go to the dead-letter log
//! and the FAILED tag. Only an unreachable candidate source at startup is
//! fatal, and even then the queue is drained first.

pub mod job;
pub mod producer;
pub mod tags;
pub mod worker;

use crate::backend::{build_backend, OcrBackend};
use crate::cache::CacheStore;
use crate::config::{PipelineConfig, RunOptions};
use crate::dead_letter::DeadLetterLog;
use crate::error::PipelineError;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::render::{DocumentRenderer, PdfiumRenderer};
use crate::store::{DocumentId, DocumentPatch, DocumentStore, PaperlessClient, TagId};
use crate::tracker::{StatusSnapshot, StatusTracker};
use job::QueueItem;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tags::TagPolicy;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Outcome of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub status: StatusSnapshot,
    pub duration_ms: u64,
}

/// Everything the producer and the workers share during one run.
pub(crate) struct RunContext {
    pub config: Arc<PipelineConfig>,
    pub store: Arc<dyn DocumentStore>,
    pub backend: Arc<dyn OcrBackend>,
    pub renderer: Arc<dyn DocumentRenderer>,
    pub cache: CacheStore,
    pub dead_letter: DeadLetterLog,
    pub tracker: StatusTracker,
    pub tags: TagPolicy,
    pub progress: ProgressCallback,
}

impl RunContext {
    /// Append `id` to the dead-letter log, logging rather than returning a
    /// write failure.
    pub async fn record_dead_letter(&self, id: DocumentId) {
        if let Err(e) = self.dead_letter.append(id).await {
            error!("Could not record document {} as failed: {}", id, e);
        }
    }

    /// Best-effort FAILED tagging; errors are logged and swallowed.
    pub async fn mark_failed(&self, id: DocumentId, tags: &[TagId]) {
        let patch = DocumentPatch {
            content: None,
            tags: Some(self.tags.on_failure(tags)),
        };
        if let Err(e) = self.store.patch(id, patch).await {
            warn!("Document {}: could not set FAILED tag: {}", id, e);
        }
    }
}

/// An OCR pipeline bound to one document store, backend and renderer.
///
/// # Example
/// ```rust,no_run
/// use paperless_ocr::{Pipeline, PipelineConfig, RunOptions};
///
/// # async fn run() -> Result<(), paperless_ocr::PipelineError> {
/// let config = PipelineConfig::builder()
///     .store_url("http://paperless.local:8000")
///     .store_token("secret")
///     .build()?;
/// let summary = Pipeline::from_config(config)?
///     .run(RunOptions::default())
///     .await?;
/// println!("{} of {} done", summary.status.completed, summary.status.total_to_process);
/// # Ok(())
/// # }
/// ```
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    store: Arc<dyn DocumentStore>,
    backend: Arc<dyn OcrBackend>,
    renderer: Arc<dyn DocumentRenderer>,
    progress: ProgressCallback,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn DocumentStore>,
        backend: Arc<dyn OcrBackend>,
        renderer: Arc<dyn DocumentRenderer>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            backend,
            renderer,
            progress: Arc::new(NoopProgressCallback),
        }
    }

    /// Wire the Paperless client, the configured backend and pdfium.
    pub fn from_config(config: PipelineConfig) -> Result<Self, PipelineError> {
        if config.store_url.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "Document store URL is empty".into(),
            ));
        }
        let store = Arc::new(PaperlessClient::new(&config)?);
        let backend = build_backend(&config)?;
        let mut renderer = PdfiumRenderer::new();
        if let Some(path) = &config.pdfium_lib_path {
            renderer = renderer.with_library_path(path);
        }
        Ok(Self::new(config, store, backend, Arc::new(renderer)))
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = callback;
        self
    }

    /// Run discovery and the worker pool to completion.
    ///
    /// Returns `Err` only for fatal errors; individual document failures
    /// are reflected in [`RunSummary::status`].
    pub async fn run(&self, options: RunOptions) -> Result<RunSummary, PipelineError> {
        let start = Instant::now();
        let config = Arc::clone(&self.config);
        info!(
            "Starting OCR run: {:?}, force={}, backend={}, workers={}",
            options.selection,
            options.force,
            self.backend.name(),
            config.workers
        );

        let ctx = Arc::new(RunContext {
            cache: CacheStore::open(&config.cache_dir).await?,
            dead_letter: DeadLetterLog::new(&config.dead_letter_path),
            tracker: StatusTracker::new(),
            tags: TagPolicy::from_config(&config),
            store: Arc::clone(&self.store),
            backend: Arc::clone(&self.backend),
            renderer: Arc::clone(&self.renderer),
            progress: Arc::clone(&self.progress),
            config,
        });

        let (sender, receiver) = mpsc::channel(ctx.config.buffer_size);
        let mut workers = worker::spawn_workers(Arc::clone(&ctx), receiver, ctx.config.workers);

        let discovery = producer::discover(&ctx, &sender, &options).await;
        if let Err(e) = &discovery {
            error!("Discovery ended with an error: {}", e);
        }

        // Exactly one sentinel per worker, whatever discovery did.
        for _ in 0..ctx.config.workers {
            if sender.send(QueueItem::Shutdown).await.is_err() {
                break;
            }
        }
        drop(sender);

        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!("Worker task aborted: {}", e);
            }
        }

        discovery?;

        let summary = RunSummary {
            status: ctx.tracker.snapshot(),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "OCR run complete: {}/{} documents, {} failed, {}ms",
            summary.status.completed,
            summary.status.total_to_process,
            summary.status.failed,
            summary.duration_ms
        );
        ctx.progress.on_run_complete(&summary);
        Ok(summary)
    }
}
