//! On-disk page cache keyed by document id.
//!
//! Layout under the cache root:
//!
//! ```text
//! <root>/<id>/page_0.png … page_{k-1}.png
//! <root>/<id>/meta.json        {"total_pages": N}
//! <root>/<id>/document.pdf     (whole-document entries instead of pages)
//! ```
//!
//! An entry is written into a hidden temporary sibling directory and
//! published with a single rename, so a directory named after a document id
//! is always complete. Temporary directories left by a crash are swept when
//! the cache is opened.
//!
//! The cache never checks whether the remote document changed after it was
//! cached; a stale entry is reused until it is cleared.

use crate::error::PipelineError;
use crate::pipeline::job::JobPayload;
use crate::store::DocumentId;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const META_FILE: &str = "meta.json";
const DOCUMENT_FILE: &str = "document.pdf";
const TEMP_PREFIX: &str = ".tmp-";

#[derive(Debug, Serialize, Deserialize)]
struct CacheMeta {
    total_pages: usize,
}

/// A cached, fully materialised document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub payload: JobPayload,
    pub total_pages: usize,
}

/// Per-document page cache rooted at a local directory.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

fn page_file(index: usize) -> String {
    format!("page_{index}.png")
}

impl CacheStore {
    /// Open (and create if needed) the cache root, removing leftovers of
    /// interrupted saves.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| io_err(&root, e))?;

        let mut entries = tokio::fs::read_dir(&root)
            .await
            .map_err(|e| io_err(&root, e))?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_err(&root, e))? {
            if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                warn!("Removing incomplete cache entry {}", entry.path().display());
                if let Err(e) = tokio::fs::remove_dir_all(entry.path()).await {
                    warn!("Could not remove {}: {}", entry.path().display(), e);
                }
            }
        }

        Ok(Self { root })
    }

    fn entry_path(&self, id: DocumentId) -> PathBuf {
        self.root.join(id.to_string())
    }

    pub async fn is_cached(&self, id: DocumentId) -> bool {
        tokio::fs::metadata(self.entry_path(id))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Persist an entry, replacing any previous one for `id`.
    pub async fn save(&self, id: DocumentId, entry: &CacheEntry) -> Result<(), PipelineError> {
        let root = self.root.clone();
        let prefix = format!("{TEMP_PREFIX}{id}-");
        let staging = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new().prefix(&prefix).tempdir_in(&root)
        })
        .await
        .map_err(|e| PipelineError::Internal(format!("Cache staging task panicked: {e}")))?
        .map_err(|e| io_err(&self.root, e))?;
        let staging_path = staging.path().to_path_buf();

        match &entry.payload {
            JobPayload::Pages(pages) => {
                for (i, png) in pages.iter().enumerate() {
                    let path = staging_path.join(page_file(i));
                    tokio::fs::write(&path, png)
                        .await
                        .map_err(|e| io_err(&path, e))?;
                }
            }
            JobPayload::Document(bytes) => {
                let path = staging_path.join(DOCUMENT_FILE);
                tokio::fs::write(&path, bytes)
                    .await
                    .map_err(|e| io_err(&path, e))?;
            }
        }

        let meta = serde_json::to_vec(&CacheMeta {
            total_pages: entry.total_pages,
        })
        .map_err(|e| PipelineError::Internal(format!("cache meta: {e}")))?;
        let meta_path = staging_path.join(META_FILE);
        tokio::fs::write(&meta_path, meta)
            .await
            .map_err(|e| io_err(&meta_path, e))?;

        let target = self.entry_path(id);
        self.clear(id).await?;
        tokio::fs::rename(&staging_path, &target)
            .await
            .map_err(|e| io_err(&target, e))?;
        // `staging` now points at a path that no longer exists; its drop is a no-op.
        drop(staging);

        debug!("Cached document {} at {}", id, target.display());
        Ok(())
    }

    /// Load a complete entry, or [`PipelineError::CacheMiss`].
    pub async fn load(&self, id: DocumentId) -> Result<CacheEntry, PipelineError> {
        let dir = self.entry_path(id);
        let meta_path = dir.join(META_FILE);
        let raw = match tokio::fs::read(&meta_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(PipelineError::CacheMiss { id })
            }
            Err(e) => return Err(io_err(&meta_path, e)),
        };
        let meta: CacheMeta =
            serde_json::from_slice(&raw).map_err(|_| PipelineError::CacheMiss { id })?;

        let document_path = dir.join(DOCUMENT_FILE);
        match tokio::fs::read(&document_path).await {
            Ok(bytes) => {
                return Ok(CacheEntry {
                    payload: JobPayload::Document(bytes),
                    total_pages: meta.total_pages,
                })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(&document_path, e)),
        }

        let mut pages = Vec::new();
        loop {
            let path = dir.join(page_file(pages.len()));
            match tokio::fs::read(&path).await {
                Ok(png) => pages.push(png),
                Err(e) if e.kind() == ErrorKind::NotFound => break,
                Err(e) => return Err(io_err(&path, e)),
            }
        }
        if pages.is_empty() {
            return Err(PipelineError::CacheMiss { id });
        }

        Ok(CacheEntry {
            payload: JobPayload::Pages(pages),
            total_pages: meta.total_pages,
        })
    }

    /// Remove the entry for `id`. Absent entries are not an error.
    pub async fn clear(&self, id: DocumentId) -> Result<(), PipelineError> {
        let path = self.entry_path(id);
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&path, e)),
        }
    }
}

fn io_err(path: &Path, source: std::io::Error) -> PipelineError {
    PipelineError::CacheIo {
        path: path.to_path_buf(),
        source,
    }
}
