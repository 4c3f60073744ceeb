//! Discovery: select candidates, gate them by tag, materialise and enqueue.
//!
//! Materialising a document means loading its cache entry or, on a miss,
//! downloading it, rasterising it (or just counting its pages for
//! whole-document backends) and caching the result before the job is
//! enqueued. A failure here only affects that one document.

use super::job::{Job, JobPayload, QueueItem};
use super::RunContext;
use crate::backend::BackendInput;
use crate::cache::CacheEntry;
use crate::config::{RunOptions, Selection};
use crate::error::PipelineError;
use crate::store::{DocumentId, DocumentSummary, ListFilter, TagId};
use tokio::sync::mpsc::Sender;
use tracing::{debug, error, info, warn};

/// Run the selection in `options` to exhaustion.
///
/// Returns `Err` when the candidate source is unreachable at startup or the
/// job queue closed underneath discovery. Sentinels are sent by the caller.
pub(crate) async fn discover(
    ctx: &RunContext,
    sender: &Sender<QueueItem>,
    options: &RunOptions,
) -> Result<(), PipelineError> {
    match &options.selection {
        Selection::Single(id) => discover_single(ctx, sender, *id, options.force).await,
        Selection::Bulk => discover_listing(ctx, sender, None, options.force).await,
        Selection::Subgroup(tag) => discover_listing(ctx, sender, Some(*tag), options.force).await,
        Selection::Retry => discover_retry(ctx, sender, options.force).await,
    }
}

async fn discover_single(
    ctx: &RunContext,
    sender: &Sender<QueueItem>,
    id: DocumentId,
    force: bool,
) -> Result<(), PipelineError> {
    start_run(ctx, 1);
    let doc = ctx
        .store
        .get_metadata(id)
        .await
        .map_err(|e| PipelineError::DiscoveryUnavailable {
            detail: format!("document {id}: {e}"),
        })?;
    admit(ctx, sender, doc, force, false).await
}

async fn discover_listing(
    ctx: &RunContext,
    sender: &Sender<QueueItem>,
    subgroup: Option<TagId>,
    force: bool,
) -> Result<(), PipelineError> {
    let filter = ListFilter {
        exclude_tag: (!force).then_some(ctx.tags.done),
        include_tag: subgroup,
    };

    let mut candidates = Vec::new();
    let mut cursor = None;
    let mut first_page = true;
    loop {
        let page = match ctx.store.list(filter, cursor.take()).await {
            Ok(page) => page,
            Err(e) if first_page => {
                return Err(PipelineError::DiscoveryUnavailable {
                    detail: e.to_string(),
                })
            }
            Err(e) => {
                error!("Listing failed, ending discovery early: {}", e);
                break;
            }
        };

        if first_page {
            start_run(ctx, page.total);
            first_page = false;
        }
        debug!(
            "Listing page: {} documents, more={}",
            page.documents.len(),
            page.next.is_some()
        );
        candidates.extend(page.documents);

        match page.next {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    // Workers tag documents DONE, which shrinks the filtered listing; the
    // full candidate list is read before the first job is enqueued.
    for doc in candidates {
        admit(ctx, sender, doc, force, false).await?;
    }
    Ok(())
}

async fn discover_retry(
    ctx: &RunContext,
    sender: &Sender<QueueItem>,
    force: bool,
) -> Result<(), PipelineError> {
    let ids = ctx.dead_letter.drain().await?;
    start_run(ctx, ids.len() as u64);
    if ids.is_empty() {
        info!("Dead-letter log is empty, nothing to retry");
        return Ok(());
    }
    info!("Retrying {} previously failed documents", ids.len());

    for id in ids {
        match ctx.store.get_metadata(id).await {
            Ok(doc) => admit(ctx, sender, doc, force, true).await?,
            Err(e) => {
                error!("Document {}: metadata unavailable, skipping: {}", id, e);
                let status = ctx.tracker.record_failure();
                ctx.progress
                    .on_document_error(id, "", &e.to_string(), status);
            }
        }
    }
    Ok(())
}

fn start_run(ctx: &RunContext, total: u64) {
    ctx.tracker.set_total(total);
    info!("{} candidate documents", total);
    ctx.progress.on_run_start(total);
}

/// Gate, materialise and enqueue one candidate.
///
/// Only a closed queue is returned as an error; everything else is recorded
/// against the document.
async fn admit(
    ctx: &RunContext,
    sender: &Sender<QueueItem>,
    doc: DocumentSummary,
    force: bool,
    retrying: bool,
) -> Result<(), PipelineError> {
    if !ctx.tags.admits(&doc.tags, force, retrying) {
        info!("Document {} ({}) already processed, skipping", doc.id, doc.title);
        let status = ctx.tracker.record_success();
        ctx.progress.on_document_skipped(doc.id, status);
        return Ok(());
    }

    let job = match materialize(ctx, &doc).await {
        Ok(job) => job,
        Err(e) => {
            error!("Document {} ({}): {}", doc.id, doc.title, e);
            ctx.record_dead_letter(doc.id).await;
            ctx.mark_failed(doc.id, &doc.tags).await;
            let status = ctx.tracker.record_failure();
            ctx.progress
                .on_document_error(doc.id, &doc.title, &e.to_string(), status);
            return Ok(());
        }
    };

    debug!(
        "Enqueueing document {}: {} payload, {}/{} pages",
        job.id,
        job.payload.kind(),
        job.processed_pages(),
        job.total_pages
    );
    sender
        .send(QueueItem::Job(job))
        .await
        .map_err(|_| PipelineError::Internal("job queue closed: no workers left".into()))
}

async fn materialize(ctx: &RunContext, doc: &DocumentSummary) -> Result<Job, PipelineError> {
    let input = ctx.backend.input();

    let cached = if ctx.cache.is_cached(doc.id).await {
        match ctx.cache.load(doc.id).await {
            Ok(entry) if payload_matches(&entry.payload, input) => {
                debug!("Document {}: using cached pages", doc.id);
                Some(entry)
            }
            Ok(_) => {
                warn!("Document {}: cache holds another payload kind, refetching", doc.id);
                None
            }
            Err(PipelineError::CacheMiss { .. }) => {
                warn!("Document {}: incomplete cache entry, refetching", doc.id);
                None
            }
            Err(e) => return Err(e),
        }
    } else {
        None
    };

    let entry = match cached {
        Some(entry) => entry,
        None => fetch_and_cache(ctx, doc.id, input).await?,
    };

    Ok(Job {
        id: doc.id,
        title: doc.title.clone(),
        payload: entry.payload,
        tags: doc.tags.clone(),
        total_pages: entry.total_pages,
    })
}

fn payload_matches(payload: &JobPayload, input: BackendInput) -> bool {
    matches!(
        (payload, input),
        (JobPayload::Pages(_), BackendInput::PageImages)
            | (JobPayload::Document(_), BackendInput::SourceDocument)
    )
}

async fn fetch_and_cache(
    ctx: &RunContext,
    id: DocumentId,
    input: BackendInput,
) -> Result<CacheEntry, PipelineError> {
    let bytes = ctx.store.download(id).await?;

    let entry = match input {
        BackendInput::PageImages => {
            let rasterized = ctx
                .renderer
                .rasterize(id, bytes, ctx.config.page_limit)
                .await?;
            if rasterized.pages.is_empty() {
                return Err(PipelineError::CorruptDocument {
                    id,
                    detail: "document has no pages".into(),
                });
            }
            CacheEntry {
                payload: JobPayload::Pages(rasterized.pages),
                total_pages: rasterized.total_pages,
            }
        }
        BackendInput::SourceDocument => {
            let total_pages = ctx.renderer.page_count(id, &bytes).await?;
            CacheEntry {
                payload: JobPayload::Document(bytes),
                total_pages,
            }
        }
    };

    ctx.cache.save(id, &entry).await?;
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_kind_must_match_backend_input() {
        let pages = JobPayload::Pages(vec![vec![1]]);
        let doc = JobPayload::Document(vec![1]);
        assert!(payload_matches(&pages, BackendInput::PageImages));
        assert!(!payload_matches(&pages, BackendInput::SourceDocument));
        assert!(payload_matches(&doc, BackendInput::SourceDocument));
        assert!(!payload_matches(&doc, BackendInput::PageImages));
    }
}
