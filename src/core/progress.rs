//! Progress reporting.
//!
//! The engine and executor only call into a [`ProgressObserver`]; what gets
//! drawn (bars, logs, nothing) is up to the observer.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Phase of a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Scanning,
    Comparing,
    Syncing,
    Completed,
    Failed,
}

/// Passive receiver of progress events. Every method defaults to a no-op.
pub trait ProgressObserver: Send + Sync {
    fn on_status(&self, _status: SyncStatus, _message: &str) {}

    /// Apply phase is starting with this much work.
    fn on_apply_started(&self, _total_actions: usize, _total_bytes: u64) {}

    /// A copy is about to start; `size` is the unit of work it represents.
    fn on_file_started(&self, _relative_path: &str, _size: u64) {}

    fn on_bytes_copied(&self, _bytes: u64) {}

    fn on_action_finished(&self, _relative_path: &str, _succeeded: bool) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {}

/// Lock-free counters fed by progress events
#[derive(Debug, Default)]
pub struct TransferStats {
    files_started: AtomicU64,
    files_completed: AtomicU64,
    files_failed: AtomicU64,
    bytes_announced: AtomicU64,
    bytes_transferred: AtomicU64,
}

/// Point-in-time copy of [`TransferStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSnapshot {
    pub files_started: u64,
    pub files_completed: u64,
    pub files_failed: u64,
    pub bytes_announced: u64,
    pub bytes_transferred: u64,
}

impl TransferStats {
    pub fn snapshot(&self) -> TransferSnapshot {
        TransferSnapshot {
            files_started: self.files_started.load(Ordering::Relaxed),
            files_completed: self.files_completed.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
            bytes_announced: self.bytes_announced.load(Ordering::Relaxed),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
        }
    }
}

impl ProgressObserver for TransferStats {
    fn on_file_started(&self, _relative_path: &str, size: u64) {
        self.files_started.fetch_add(1, Ordering::Relaxed);
        self.bytes_announced.fetch_add(size, Ordering::Relaxed);
    }

    fn on_bytes_copied(&self, bytes: u64) {
        self.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    fn on_action_finished(&self, _relative_path: &str, succeeded: bool) {
        if succeeded {
            self.files_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.files_failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}
