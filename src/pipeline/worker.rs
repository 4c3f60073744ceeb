//! Worker pool: pull jobs, run OCR, rewrite the remote document.
//!
//! Workers share one receiver behind an async mutex and exit on the first
//! [`QueueItem::Shutdown`] they receive. A job's outcome is always recorded
//! before the next item is pulled, so the tracker never loses a document.

use super::job::{Job, QueueItem};
use super::RunContext;
use crate::error::PipelineError;
use crate::store::DocumentPatch;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

type SharedReceiver = Arc<Mutex<mpsc::Receiver<QueueItem>>>;

pub(crate) fn spawn_workers(
    ctx: Arc<RunContext>,
    receiver: mpsc::Receiver<QueueItem>,
    worker_count: usize,
) -> JoinSet<()> {
    let shared_receiver = Arc::new(Mutex::new(receiver));

    let mut join_set = JoinSet::new();
    for worker_idx in 0..worker_count {
        let rx = Arc::clone(&shared_receiver);
        let ctx = Arc::clone(&ctx);
        join_set.spawn(async move { run_worker(worker_idx, rx, ctx).await });
    }
    join_set
}

async fn run_worker(worker_idx: usize, receiver: SharedReceiver, ctx: Arc<RunContext>) {
    loop {
        let Some(item) = receive_item(&receiver).await else {
            debug!("Worker {} terminating (queue closed)", worker_idx);
            break;
        };
        match item {
            QueueItem::Shutdown => {
                debug!("Worker {} received shutdown", worker_idx);
                break;
            }
            QueueItem::Job(job) => process(worker_idx, &ctx, job).await,
        }
    }
}

async fn receive_item(receiver: &SharedReceiver) -> Option<QueueItem> {
    let mut guard = receiver.lock().await;
    guard.recv().await
}

async fn process(worker_idx: usize, ctx: &RunContext, job: Job) {
    let start = Instant::now();
    info!(
        "Worker {} processing document {} ({})",
        worker_idx, job.id, job.title
    );
    ctx.progress.on_document_start(job.id, &job.title);

    match process_job(ctx, &job).await {
        Ok(()) => {
            let status = ctx.tracker.record_success();
            info!(
                "Document {} done in {:?} ({}/{})",
                job.id,
                start.elapsed(),
                status.completed,
                status.total_to_process
            );
            ctx.progress.on_document_complete(job.id, &job.title, status);
        }
        Err(e) => {
            error!("Document {} ({}) failed: {}", job.id, job.title, e);
            ctx.record_dead_letter(job.id).await;
            ctx.mark_failed(job.id, &job.tags).await;
            let status = ctx.tracker.record_failure();
            ctx.progress
                .on_document_error(job.id, &job.title, &e.to_string(), status);
        }
    }
}

/// OCR, compose, replace, patch, then drop the cache entry.
async fn process_job(ctx: &RunContext, job: &Job) -> Result<(), PipelineError> {
    let extracted = ctx.backend.extract(job).await?;
    let content = compose_content(&extracted.joined(), job.processed_pages(), job.total_pages);

    let pdf = ctx.renderer.compose(extracted.segments).await?;
    debug!("Document {}: composed {} byte replacement", job.id, pdf.len());
    ctx.store.replace_file(job.id, pdf).await?;

    let patch = DocumentPatch {
        content: Some(content),
        tags: Some(ctx.tags.on_success(&job.tags)),
    };
    ctx.store.patch(job.id, patch).await?;

    // The remote document is already rewritten at this point.
    if let Err(e) = ctx.cache.clear(job.id).await {
        warn!("Document {}: could not clear cache entry: {}", job.id, e);
    }
    Ok(())
}

/// Stored content: the extracted text followed by the page-count footer.
pub fn compose_content(text: &str, processed: usize, total: usize) -> String {
    format!("{text}\n\n--- OCR Footer: {processed} of {total} pages processed ---")
}
