//! Run-wide progress counters shared by the producer and the workers.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub total_to_process: u64,
    /// Documents that reached a terminal outcome: success, skip or failure.
    pub completed: u64,
    /// Subset of `completed` that failed.
    pub failed: u64,
}

impl StatusSnapshot {
    pub fn succeeded(&self) -> u64 {
        self.completed.saturating_sub(self.failed)
    }

    /// Completion percentage, `0.0` while the total is unknown.
    pub fn percent(&self) -> f64 {
        if self.total_to_process == 0 {
            0.0
        } else {
            self.completed as f64 / self.total_to_process as f64 * 100.0
        }
    }
}

/// Counters for one run. Construct one per run and share it by `Arc`.
#[derive(Debug, Default)]
pub struct StatusTracker {
    counters: Mutex<StatusSnapshot>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, f: impl FnOnce(&mut StatusSnapshot)) -> StatusSnapshot {
        // A poisoned lock still holds valid counters.
        let mut guard = self.counters.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut guard);
        *guard
    }

    pub fn set_total(&self, total: u64) -> StatusSnapshot {
        self.update(|c| c.total_to_process = total)
    }

    pub fn record_success(&self) -> StatusSnapshot {
        self.update(|c| c.completed += 1)
    }

    pub fn record_failure(&self) -> StatusSnapshot {
        self.update(|c| {
            c.completed += 1;
            c.failed += 1;
        })
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.update(|_| {})
    }
}
