//! Integration tests for the OCR pipeline.
//!
//! The document store, OCR backend and renderer are replaced by in-memory
//! fakes, so these tests need neither a Paperless instance, a model server
//! nor libpdfium. Local state (cache, dead-letter log) lives in a temporary
//! directory per test.

use async_trait::async_trait;
use paperless_ocr::{
    BackendError, BackendInput, CacheEntry, CacheStore, DocumentId, DocumentPatch,
    DocumentRenderer, DocumentStore, DocumentSummary, ExtractedText, Job, JobPayload, ListFilter,
    ListPage, OcrBackend, Pipeline, PipelineConfig, PipelineConfigBuilder, PipelineError,
    ProgressCallback, Rasterized, RunOptions, RunProgressCallback, RunSummary, Selection,
    StatusSnapshot, TagId,
};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

const DONE: TagId = 1065;
const FAILED: TagId = 1066;

// ── Fake document store ──────────────────────────────────────────────────────

struct StoredDoc {
    summary: DocumentSummary,
    bytes: Vec<u8>,
    content: Option<String>,
    file: Option<Vec<u8>>,
}

#[derive(Default)]
struct FakeStore {
    docs: Mutex<BTreeMap<DocumentId, StoredDoc>>,
    page_size: usize,
    /// 1-based listing page that fails.
    fail_list_page: Option<usize>,
    fail_replace: HashSet<DocumentId>,
    fail_patch: HashSet<DocumentId>,
    downloads: AtomicUsize,
    metadata_calls: Mutex<Vec<DocumentId>>,
    patches: Mutex<Vec<(DocumentId, DocumentPatch)>>,
    /// Dead-letter file read on every metadata fetch.
    dead_letter_watch: Option<PathBuf>,
    observed_log: Mutex<Vec<String>>,
}

impl FakeStore {
    /// Documents as `(id, bytes, tags)`; bytes `pages:N` make an N-page PDF.
    fn with_docs<'a>(docs: impl IntoIterator<Item = (DocumentId, &'a str, Vec<TagId>)>) -> Self {
        let docs = docs
            .into_iter()
            .map(|(id, bytes, tags)| {
                let stored = StoredDoc {
                    summary: DocumentSummary {
                        id,
                        title: format!("Scan {id}"),
                        tags,
                    },
                    bytes: bytes.as_bytes().to_vec(),
                    content: None,
                    file: None,
                };
                (id, stored)
            })
            .collect();
        Self {
            docs: Mutex::new(docs),
            page_size: 100,
            ..Self::default()
        }
    }

    fn tags(&self, id: DocumentId) -> Vec<TagId> {
        self.docs.lock().unwrap()[&id].summary.tags.clone()
    }

    fn content(&self, id: DocumentId) -> Option<String> {
        self.docs.lock().unwrap()[&id].content.clone()
    }

    fn replaced(&self, id: DocumentId) -> bool {
        self.docs.lock().unwrap()[&id].file.is_some()
    }

    fn patches_for(&self, id: DocumentId) -> Vec<DocumentPatch> {
        self.patches
            .lock()
            .unwrap()
            .iter()
            .filter(|(pid, _)| *pid == id)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl DocumentStore for FakeStore {
    async fn list(
        &self,
        filter: ListFilter,
        cursor: Option<String>,
    ) -> Result<ListPage, PipelineError> {
        let page_no: usize = cursor
            .as_deref()
            .and_then(|c| c.strip_prefix("page="))
            .and_then(|n| n.parse().ok())
            .unwrap_or(1);
        if self.fail_list_page == Some(page_no) {
            return Err(PipelineError::StoreRequest {
                operation: "list".into(),
                detail: "connection refused".into(),
            });
        }

        let docs = self.docs.lock().unwrap();
        let matching: Vec<DocumentSummary> = docs
            .values()
            .map(|d| d.summary.clone())
            .filter(|d| filter.exclude_tag.map_or(true, |t| !d.has_tag(t)))
            .filter(|d| filter.include_tag.map_or(true, |t| d.has_tag(t)))
            .collect();

        let start = (page_no - 1) * self.page_size;
        let documents = matching.iter().skip(start).take(self.page_size).cloned().collect();
        let next = (start + self.page_size < matching.len())
            .then(|| format!("page={}", page_no + 1));
        Ok(ListPage {
            total: matching.len() as u64,
            documents,
            next,
        })
    }

    async fn get_metadata(&self, id: DocumentId) -> Result<DocumentSummary, PipelineError> {
        self.metadata_calls.lock().unwrap().push(id);
        if let Some(path) = &self.dead_letter_watch {
            let raw = std::fs::read_to_string(path).unwrap_or_default();
            self.observed_log.lock().unwrap().push(raw);
        }
        self.docs
            .lock()
            .unwrap()
            .get(&id)
            .map(|d| d.summary.clone())
            .ok_or(PipelineError::DocumentNotFound { id })
    }

    async fn download(&self, id: DocumentId) -> Result<Vec<u8>, PipelineError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.docs
            .lock()
            .unwrap()
            .get(&id)
            .map(|d| d.bytes.clone())
            .ok_or(PipelineError::DocumentNotFound { id })
    }

    async fn replace_file(&self, id: DocumentId, pdf: Vec<u8>) -> Result<(), PipelineError> {
        if self.fail_replace.contains(&id) {
            return Err(PipelineError::StoreStatus {
                operation: "replace_file".into(),
                status: 500,
                body: "consumer crashed".into(),
            });
        }
        if let Some(doc) = self.docs.lock().unwrap().get_mut(&id) {
            doc.file = Some(pdf);
        }
        Ok(())
    }

    async fn patch(&self, id: DocumentId, patch: DocumentPatch) -> Result<(), PipelineError> {
        self.patches.lock().unwrap().push((id, patch.clone()));
        if self.fail_patch.contains(&id) {
            return Err(PipelineError::StoreStatus {
                operation: "patch".into(),
                status: 403,
                body: "forbidden".into(),
            });
        }
        if let Some(doc) = self.docs.lock().unwrap().get_mut(&id) {
            if let Some(content) = patch.content {
                doc.content = Some(content);
            }
            if let Some(tags) = patch.tags {
                doc.summary.tags = tags;
            }
        }
        Ok(())
    }
}

// ── Fake OCR backend ─────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeBackend {
    whole_document: bool,
    fail: HashSet<DocumentId>,
    delay: Duration,
    /// `(id, processed pages, total pages)` per call.
    calls: Mutex<Vec<(DocumentId, usize, usize)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeBackend {
    fn failing(ids: impl IntoIterator<Item = DocumentId>) -> Self {
        Self {
            fail: ids.into_iter().collect(),
            ..Self::default()
        }
    }

    fn call_ids(&self) -> Vec<DocumentId> {
        self.calls.lock().unwrap().iter().map(|c| c.0).collect()
    }
}

#[async_trait]
impl OcrBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    fn input(&self) -> BackendInput {
        if self.whole_document {
            BackendInput::SourceDocument
        } else {
            BackendInput::PageImages
        }
    }

    async fn extract(&self, job: &Job) -> Result<ExtractedText, BackendError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap()
            .push((job.id, job.processed_pages(), job.total_pages));

        if self.fail.contains(&job.id) {
            return Err(BackendError::Status {
                status: 500,
                body: "model crashed".into(),
            });
        }
        let segments = match &job.payload {
            JobPayload::Pages(pages) => (1..=pages.len())
                .map(|i| format!("Seite {i} von {}", job.id))
                .collect(),
            JobPayload::Document(_) => vec![format!("# Dokument {}", job.id)],
        };
        Ok(ExtractedText { segments })
    }
}

// ── Fake renderer ────────────────────────────────────────────────────────────

struct FakeRenderer;

fn page_total(id: DocumentId, bytes: &[u8]) -> Result<usize, PipelineError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.strip_prefix("pages:"))
        .and_then(|n| n.parse().ok())
        .ok_or(PipelineError::CorruptDocument {
            id,
            detail: "not a PDF".into(),
        })
}

#[async_trait]
impl DocumentRenderer for FakeRenderer {
    async fn rasterize(
        &self,
        id: DocumentId,
        bytes: Vec<u8>,
        page_limit: usize,
    ) -> Result<Rasterized, PipelineError> {
        let total_pages = page_total(id, &bytes)?;
        Ok(Rasterized {
            pages: (0..total_pages.min(page_limit))
                .map(|i| vec![i as u8; 8])
                .collect(),
            total_pages,
        })
    }

    async fn page_count(&self, id: DocumentId, bytes: &[u8]) -> Result<usize, PipelineError> {
        page_total(id, bytes)
    }

    async fn compose(&self, segments: Vec<String>) -> Result<Vec<u8>, PipelineError> {
        Ok(format!("%PDF-fake\n{}", segments.join("\x0c")).into_bytes())
    }
}

// ── Progress recorder ────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingProgress {
    total: AtomicU64,
    completes: AtomicUsize,
    errors: AtomicUsize,
    skips: AtomicUsize,
    finished: Mutex<Option<RunSummary>>,
}

impl RunProgressCallback for RecordingProgress {
    fn on_run_start(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
    }

    fn on_document_skipped(&self, _id: DocumentId, _status: StatusSnapshot) {
        self.skips.fetch_add(1, Ordering::SeqCst);
    }

    fn on_document_complete(&self, _id: DocumentId, _title: &str, _status: StatusSnapshot) {
        self.completes.fetch_add(1, Ordering::SeqCst);
    }

    fn on_document_error(&self, _id: DocumentId, _t: &str, _e: &str, _status: StatusSnapshot) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    fn on_run_complete(&self, summary: &RunSummary) {
        *self.finished.lock().unwrap() = Some(*summary);
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn config(dir: &TempDir) -> PipelineConfigBuilder {
    PipelineConfig::builder()
        .store_url("http://paperless.test")
        .cache_dir(dir.path().join("cache"))
        .dead_letter_path(dir.path().join("failed.txt"))
        .retry_backoff_ms(1)
}

fn pipeline(
    config: PipelineConfig,
    store: &Arc<FakeStore>,
    backend: &Arc<FakeBackend>,
) -> Pipeline {
    Pipeline::new(
        config,
        Arc::clone(store) as Arc<dyn DocumentStore>,
        Arc::clone(backend) as Arc<dyn OcrBackend>,
        Arc::new(FakeRenderer),
    )
}

fn options(selection: Selection, force: bool) -> RunOptions {
    RunOptions { selection, force }
}

fn dead_letter_ids(dir: &TempDir) -> Vec<DocumentId> {
    std::fs::read_to_string(dir.path().join("failed.txt"))
        .unwrap_or_default()
        .lines()
        .map(|l| l.parse().unwrap())
        .collect()
}

async fn run(pipeline: &Pipeline, opts: RunOptions) -> Result<RunSummary, PipelineError> {
    tokio::time::timeout(Duration::from_secs(10), pipeline.run(opts))
        .await
        .expect("run did not terminate")
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn page_limited_document_is_rewritten_and_tagged_done() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FakeStore::with_docs([(42, "pages:5", vec![])]));
    let backend = Arc::new(FakeBackend::default());
    let cfg = config(&dir).page_limit(2).build().unwrap();

    let ocr = pipeline(cfg, &store, &backend);
    let summary = assert_ok!(run(&ocr, options(Selection::Single(42), false)).await);

    assert_eq!(
        summary.status,
        StatusSnapshot {
            total_to_process: 1,
            completed: 1,
            failed: 0
        }
    );
    assert_eq!(*backend.calls.lock().unwrap(), vec![(42, 2, 5)]);
    assert_eq!(store.tags(42), vec![DONE]);
    assert!(store.replaced(42));
    assert_eq!(
        store.content(42).unwrap(),
        "Seite 1 von 42\n\nSeite 2 von 42\n\n--- OCR Footer: 2 of 5 pages processed ---"
    );
    assert!(!dir.path().join("cache/42").exists(), "cache must be cleared on success");
    assert!(dead_letter_ids(&dir).is_empty());
}

#[tokio::test]
async fn failed_document_keeps_page_limited_cache_entry() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FakeStore {
        fail_replace: HashSet::from([42]),
        ..FakeStore::with_docs([(42, "pages:5", vec![])])
    });
    let backend = Arc::new(FakeBackend::default());
    let cfg = config(&dir).page_limit(2).build().unwrap();

    let ocr = pipeline(cfg, &store, &backend);
    let summary = assert_ok!(run(&ocr, options(Selection::Bulk, false)).await);
    assert_eq!(summary.status.failed, 1);

    let entry_dir = dir.path().join("cache/42");
    assert!(entry_dir.join("page_0.png").exists());
    assert!(entry_dir.join("page_1.png").exists());
    assert!(!entry_dir.join("page_2.png").exists());
    let meta: serde_json::Value =
        serde_json::from_slice(&std::fs::read(entry_dir.join("meta.json")).unwrap()).unwrap();
    assert_eq!(meta, serde_json::json!({"total_pages": 5}));

    assert_eq!(dead_letter_ids(&dir), vec![42]);
    assert_eq!(store.tags(42), vec![DONE, FAILED]);
}

#[tokio::test]
async fn done_document_is_skipped_without_force() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FakeStore::with_docs([(7, "pages:1", vec![DONE])]));
    let backend = Arc::new(FakeBackend::default());
    let progress = Arc::new(RecordingProgress::default());
    let pipeline = pipeline(config(&dir).build().unwrap(), &store, &backend)
        .with_progress(Arc::clone(&progress) as ProgressCallback);

    let summary = assert_ok!(run(&pipeline, options(Selection::Single(7), false)).await);

    assert_eq!(summary.status.total_to_process, 1);
    assert_eq!(summary.status.completed, 1);
    assert_eq!(summary.status.failed, 0);
    assert!(backend.call_ids().is_empty());
    assert_eq!(store.downloads.load(Ordering::SeqCst), 0);
    assert!(store.patches.lock().unwrap().is_empty());
    assert_eq!(progress.skips.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn force_reprocesses_done_document() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FakeStore::with_docs([(7, "pages:1", vec![3, DONE])]));
    let backend = Arc::new(FakeBackend::default());

    let ocr = pipeline(config(&dir).build().unwrap(), &store, &backend);
    let summary = assert_ok!(run(&ocr, options(Selection::Single(7), true)).await);

    assert_eq!(summary.status.completed, 1);
    assert_eq!(backend.call_ids(), vec![7]);
    assert_eq!(store.tags(7), vec![3, DONE]);
}

#[tokio::test]
async fn bulk_mode_filters_done_and_force_lifts_the_filter() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FakeStore::with_docs([
        (1, "pages:1", vec![]),
        (2, "pages:1", vec![DONE]),
        (3, "pages:2", vec![FAILED]),
    ]));
    let backend = Arc::new(FakeBackend::default());

    let ocr = pipeline(config(&dir).build().unwrap(), &store, &backend);
    let summary = assert_ok!(run(&ocr, options(Selection::Bulk, false)).await);
    assert_eq!(summary.status.total_to_process, 2);
    assert_eq!(summary.status.completed, 2);
    let mut called = backend.call_ids();
    called.sort_unstable();
    assert_eq!(called, vec![1, 3]);
    assert_eq!(store.tags(3), vec![DONE], "success clears FAILED");

    let forced = Arc::new(FakeBackend::default());
    let ocr = pipeline(config(&dir).build().unwrap(), &store, &forced);
    let summary = assert_ok!(run(&ocr, options(Selection::Bulk, true)).await);
    assert_eq!(summary.status.total_to_process, 3);
    assert_eq!(forced.call_ids().len(), 3);
}

#[tokio::test]
async fn subgroup_mode_only_sees_tagged_documents() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FakeStore::with_docs([
        (1, "pages:1", vec![42]),
        (2, "pages:1", vec![]),
        (3, "pages:1", vec![42, DONE]),
    ]));
    let backend = Arc::new(FakeBackend::default());

    let ocr = pipeline(config(&dir).build().unwrap(), &store, &backend);
    let summary = assert_ok!(run(&ocr, options(Selection::Subgroup(42), false)).await);
    assert_eq!(summary.status.total_to_process, 1);
    assert_eq!(backend.call_ids(), vec![1]);
}

#[tokio::test]
async fn cached_document_is_not_downloaded_again() {
    let dir = TempDir::new().unwrap();
    let cache = CacheStore::open(dir.path().join("cache")).await.unwrap();
    cache
        .save(
            5,
            &CacheEntry {
                payload: JobPayload::Pages(vec![vec![0; 8]]),
                total_pages: 4,
            },
        )
        .await
        .unwrap();

    let store = Arc::new(FakeStore::with_docs([(5, "pages:4", vec![])]));
    let backend = Arc::new(FakeBackend::default());
    let ocr = pipeline(config(&dir).build().unwrap(), &store, &backend);
    let summary = assert_ok!(run(&ocr, options(Selection::Bulk, false)).await);

    assert_eq!(summary.status.completed, 1);
    assert_eq!(store.downloads.load(Ordering::SeqCst), 0);
    assert_eq!(*backend.calls.lock().unwrap(), vec![(5, 1, 4)]);
    assert!(!cache.is_cached(5).await);
}

#[tokio::test]
async fn every_failure_lands_in_dead_letter_log() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FakeStore::with_docs([
        (1, "pages:1", vec![]),
        (2, "garbage", vec![]),
        (3, "pages:2", vec![9]),
    ]));
    let backend = Arc::new(FakeBackend::failing([3]));
    let progress = Arc::new(RecordingProgress::default());
    let pipeline = pipeline(config(&dir).workers(2).build().unwrap(), &store, &backend)
        .with_progress(Arc::clone(&progress) as ProgressCallback);

    let summary = assert_ok!(run(&pipeline, options(Selection::Bulk, false)).await);

    assert_eq!(
        summary.status,
        StatusSnapshot {
            total_to_process: 3,
            completed: 3,
            failed: 2
        }
    );
    let mut dead = dead_letter_ids(&dir);
    dead.sort_unstable();
    assert_eq!(dead, vec![2, 3]);

    // The corrupt document never reached the backend.
    let mut called = backend.call_ids();
    called.sort_unstable();
    assert_eq!(called, vec![1, 3]);

    // Discovery and OCR failures are both tagged FAILED.
    assert_eq!(store.tags(3), vec![9, DONE, FAILED]);
    assert_eq!(store.tags(2), vec![DONE, FAILED]);
    assert!(dir.path().join("cache/3").exists(), "cache kept for retry");

    assert_eq!(progress.total.load(Ordering::SeqCst), 3);
    assert_eq!(progress.completes.load(Ordering::SeqCst), 1);
    assert_eq!(progress.errors.load(Ordering::SeqCst), 2);
    assert_eq!(progress.finished.lock().unwrap().map(|s| s.status), Some(summary.status));
}

#[tokio::test]
async fn failed_tag_patch_error_is_swallowed() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FakeStore {
        fail_patch: HashSet::from([4]),
        ..FakeStore::with_docs([(4, "pages:1", vec![])])
    });
    let backend = Arc::new(FakeBackend::default());

    let ocr = pipeline(config(&dir).build().unwrap(), &store, &backend);
    let summary = assert_ok!(run(&ocr, options(Selection::Single(4), false)).await);

    assert_eq!(summary.status.failed, 1);
    assert_eq!(dead_letter_ids(&dir), vec![4]);
    let patches = store.patches_for(4);
    assert_eq!(patches.len(), 2, "success patch, then best-effort FAILED patch");
    assert_eq!(patches[1].tags, Some(vec![DONE, FAILED]));
    assert_eq!(patches[1].content, None);
}

#[tokio::test]
async fn empty_discovery_still_terminates() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FakeStore::with_docs([(1, "pages:1", vec![DONE])]));
    let backend = Arc::new(FakeBackend::default());
    let cfg = config(&dir).workers(4).buffer_size(1).build().unwrap();

    let ocr = pipeline(cfg, &store, &backend);
    let summary = assert_ok!(run(&ocr, options(Selection::Bulk, false)).await);

    assert_eq!(summary.status, StatusSnapshot::default());
    assert!(backend.call_ids().is_empty());
}

#[tokio::test]
async fn retry_drains_deduplicated_log_before_fetching() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("failed.txt");
    std::fs::write(&log, "7\n9\n7\n").unwrap();

    let store = Arc::new(FakeStore {
        dead_letter_watch: Some(log.clone()),
        ..FakeStore::with_docs([
            (7, "pages:1", vec![DONE, FAILED]),
            (9, "pages:1", vec![DONE, FAILED]),
        ])
    });
    let backend = Arc::new(FakeBackend::default());

    let ocr = pipeline(config(&dir).build().unwrap(), &store, &backend);
    let summary = assert_ok!(run(&ocr, options(Selection::Retry, false)).await);

    assert_eq!(summary.status.total_to_process, 2);
    assert_eq!(summary.status.completed, 2);
    assert_eq!(summary.status.failed, 0);
    assert_eq!(*store.metadata_calls.lock().unwrap(), vec![7, 9]);
    assert!(store.observed_log.lock().unwrap().iter().all(|raw| raw.is_empty()));

    let mut called = backend.call_ids();
    called.sort_unstable();
    assert_eq!(called, vec![7, 9]);
    assert_eq!(store.tags(7), vec![DONE]);
    assert_eq!(std::fs::read_to_string(&log).unwrap(), "");
}

#[tokio::test]
async fn retry_skips_recovered_and_missing_documents() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("failed.txt"), "5\n404\n").unwrap();

    let store = Arc::new(FakeStore::with_docs([(5, "pages:1", vec![DONE])]));
    let backend = Arc::new(FakeBackend::default());

    let ocr = pipeline(config(&dir).build().unwrap(), &store, &backend);
    let summary = assert_ok!(run(&ocr, options(Selection::Retry, false)).await);

    assert_eq!(
        summary.status,
        StatusSnapshot {
            total_to_process: 2,
            completed: 2,
            failed: 1
        }
    );
    assert!(backend.call_ids().is_empty());
    assert!(dead_letter_ids(&dir).is_empty(), "missing ids are not re-appended");
}

#[tokio::test]
async fn retry_with_empty_log_does_nothing() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FakeStore::with_docs([(1, "pages:1", vec![])]));
    let backend = Arc::new(FakeBackend::default());

    let ocr = pipeline(config(&dir).build().unwrap(), &store, &backend);
    let summary = assert_ok!(run(&ocr, options(Selection::Retry, false)).await);

    assert_eq!(summary.status, StatusSnapshot::default());
    assert!(store.metadata_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_backend_calls_never_exceed_worker_count() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FakeStore::with_docs(
        (1..=8).map(|id| (id, "pages:1", Vec::new())),
    ));
    let backend = Arc::new(FakeBackend {
        delay: Duration::from_millis(20),
        ..FakeBackend::default()
    });
    let cfg = config(&dir).workers(3).buffer_size(2).build().unwrap();

    let ocr = pipeline(cfg, &store, &backend);
    let summary = assert_ok!(run(&ocr, options(Selection::Bulk, false)).await);

    assert_eq!(summary.status.completed, 8);
    let max = backend.max_in_flight.load(Ordering::SeqCst);
    assert!((1..=3).contains(&max), "max in flight was {max}");
}

#[tokio::test]
async fn unreachable_store_at_startup_is_fatal() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FakeStore {
        fail_list_page: Some(1),
        ..FakeStore::with_docs([(1, "pages:1", vec![])])
    });
    let backend = Arc::new(FakeBackend::default());

    let ocr = pipeline(config(&dir).workers(2).build().unwrap(), &store, &backend);
    let err = assert_err!(run(&ocr, options(Selection::Bulk, false)).await);
    assert!(matches!(err, PipelineError::DiscoveryUnavailable { .. }), "got {err:?}");
}

#[tokio::test]
async fn missing_single_document_is_fatal() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FakeStore::with_docs(Vec::<(DocumentId, &str, Vec<TagId>)>::new()));
    let backend = Arc::new(FakeBackend::default());

    let ocr = pipeline(config(&dir).build().unwrap(), &store, &backend);
    let err = assert_err!(run(&ocr, options(Selection::Single(3), false)).await);
    assert!(matches!(err, PipelineError::DiscoveryUnavailable { .. }), "got {err:?}");
}

#[tokio::test]
async fn paged_listing_reaches_every_candidate() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FakeStore {
        page_size: 2,
        ..FakeStore::with_docs((1..=6).map(|id| (id, "pages:1", Vec::new())))
    });
    let backend = Arc::new(FakeBackend {
        delay: Duration::from_millis(20),
        ..FakeBackend::default()
    });
    let cfg = config(&dir).workers(1).buffer_size(1).build().unwrap();

    let ocr = pipeline(cfg, &store, &backend);
    let summary = assert_ok!(run(&ocr, options(Selection::Bulk, false)).await);

    assert_eq!(
        summary.status,
        StatusSnapshot {
            total_to_process: 6,
            completed: 6,
            failed: 0
        }
    );
    assert_eq!(backend.call_ids(), vec![1, 2, 3, 4, 5, 6]);
    assert!((1..=6).all(|id| store.tags(id) == vec![DONE]));
}

#[tokio::test]
async fn discovery_failure_is_picked_up_by_retry() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FakeStore::with_docs([(21, "unreadable", vec![DONE])]));
    let backend = Arc::new(FakeBackend::default());

    let ocr = pipeline(config(&dir).build().unwrap(), &store, &backend);
    let forced = assert_ok!(run(&ocr, options(Selection::Bulk, true)).await);
    assert_eq!(forced.status.failed, 1);
    assert_eq!(dead_letter_ids(&dir), vec![21]);
    assert_eq!(store.tags(21), vec![DONE, FAILED]);

    if let Some(doc) = store.docs.lock().unwrap().get_mut(&21) {
        doc.bytes = b"pages:1".to_vec();
    }

    let ocr = pipeline(config(&dir).build().unwrap(), &store, &backend);
    let retried = assert_ok!(run(&ocr, options(Selection::Retry, false)).await);
    assert_eq!(retried.status.failed, 0);
    assert_eq!(backend.call_ids(), vec![21]);
    assert_eq!(store.tags(21), vec![DONE]);
    assert!(dead_letter_ids(&dir).is_empty());
}

#[tokio::test]
async fn later_listing_failure_ends_discovery_early() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FakeStore {
        page_size: 1,
        fail_list_page: Some(2),
        ..FakeStore::with_docs((1..=3).map(|id| (id, "pages:1", Vec::new())))
    });
    let backend = Arc::new(FakeBackend::default());

    let ocr = pipeline(config(&dir).build().unwrap(), &store, &backend);
    let summary = assert_ok!(run(&ocr, options(Selection::Bulk, true)).await);

    assert_eq!(summary.status.total_to_process, 3);
    assert_eq!(summary.status.completed, 1);
    assert_eq!(backend.call_ids(), vec![1]);
}

#[tokio::test]
async fn whole_document_backend_receives_source_bytes() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FakeStore::with_docs([(12, "pages:6", vec![])]));
    let backend = Arc::new(FakeBackend {
        whole_document: true,
        ..FakeBackend::default()
    });

    let ocr = pipeline(config(&dir).page_limit(2).build().unwrap(), &store, &backend);
    let summary = assert_ok!(run(&ocr, options(Selection::Bulk, false)).await);

    assert_eq!(summary.status.completed, 1);
    assert_eq!(*backend.calls.lock().unwrap(), vec![(12, 6, 6)]);
    assert_eq!(
        store.content(12).unwrap(),
        "# Dokument 12\n\n--- OCR Footer: 6 of 6 pages processed ---"
    );
}
