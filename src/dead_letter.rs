//! Durable log of documents whose processing failed.
//!
//! One document id per line, appended during normal runs. A retry run
//! [`drain`](DeadLetterLog::drain)s the log: read, deduplicate, truncate,
//! all under the same lock that guards appends.
//!
//! The log has no size bound or rotation.

use crate::error::PipelineError;
use crate::store::DocumentId;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Append-only dead-letter log backed by a text file.
#[derive(Debug)]
pub struct DeadLetterLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl DeadLetterLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `id` and flush it to disk before returning.
    pub async fn append(&self, id: DocumentId) -> Result<(), PipelineError> {
        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_err(e))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_err(e))?;
        file.write_all(format!("{id}\n").as_bytes())
            .await
            .map_err(|e| self.io_err(e))?;
        file.sync_data().await.map_err(|e| self.io_err(e))?;

        debug!("Dead-lettered document {}", id);
        Ok(())
    }

    /// Read every recorded id (deduplicated, first occurrence order) and
    /// truncate the log. A missing log drains to an empty list.
    ///
    /// Lines that are not document ids are skipped with a warning.
    pub async fn drain(&self) -> Result<Vec<DocumentId>, PipelineError> {
        let _guard = self.lock.lock().await;

        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_err(e)),
        };

        let ids = parse_ids(&raw);

        tokio::fs::write(&self.path, b"")
            .await
            .map_err(|e| self.io_err(e))?;

        debug!("Drained {} dead-lettered documents", ids.len());
        Ok(ids)
    }

    fn io_err(&self, source: std::io::Error) -> PipelineError {
        PipelineError::DeadLetterIo {
            path: self.path.clone(),
            source,
        }
    }
}

fn parse_ids(raw: &str) -> Vec<DocumentId> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match line.parse::<DocumentId>() {
            Ok(id) => {
                if seen.insert(id) {
                    ids.push(id);
                }
            }
            Err(_) => warn!("Ignoring malformed dead-letter line: {:?}", line),
        }
    }
    ids
}
