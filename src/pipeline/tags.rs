//! DONE/FAILED tag bookkeeping.
//!
//! A document moves Untouched → InFlight → {Done, Failed}. DONE marks an
//! attempt, FAILED marks a failed one; a later success clears FAILED while
//! keeping DONE. A retry run re-admits Failed documents even though they
//! carry DONE.

use crate::config::PipelineConfig;
use crate::store::TagId;

/// Tag ids that carry processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagPolicy {
    pub done: TagId,
    pub failed: TagId,
}

impl TagPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            done: config.done_tag,
            failed: config.failed_tag,
        }
    }

    /// Whether a document with `tags` should be processed.
    ///
    /// `force` admits everything. Outside retry runs DONE documents are
    /// skipped; in retry runs only DONE documents without FAILED are, since
    /// they were recovered by some later run.
    pub fn admits(&self, tags: &[TagId], force: bool, retrying: bool) -> bool {
        if force {
            return true;
        }
        let done = tags.contains(&self.done);
        if retrying {
            !done || tags.contains(&self.failed)
        } else {
            !done
        }
    }

    /// Tags after a successful run: original plus DONE, minus FAILED.
    pub fn on_success(&self, original: &[TagId]) -> Vec<TagId> {
        let mut tags = dedup(original.iter().copied().filter(|t| *t != self.failed));
        if !tags.contains(&self.done) {
            tags.push(self.done);
        }
        tags
    }

    /// Tags after a failed run: original plus DONE and FAILED.
    pub fn on_failure(&self, original: &[TagId]) -> Vec<TagId> {
        let mut tags = dedup(original.iter().copied());
        for tag in [self.done, self.failed] {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        tags
    }
}

fn dedup(tags: impl Iterator<Item = TagId>) -> Vec<TagId> {
    let mut out: Vec<TagId> = Vec::new();
    for tag in tags {
        if !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}
