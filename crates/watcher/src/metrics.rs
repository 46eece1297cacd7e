//! Watcher metrics
//!
//! Counters are updated by the background thread and read from any thread.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the event pipeline
#[derive(Debug, Default)]
pub struct WatcherMetrics {
    /// Raw events read from the backend
    raw_received: AtomicU64,

    /// Change events handed to the queue
    emitted: AtomicU64,

    /// Raw events whose handle was no longer registered
    unresolved_dropped: AtomicU64,

    /// Backend records that could not be translated
    malformed_skipped: AtomicU64,

    /// Overflow reports from the backend
    kernel_overflows: AtomicU64,

    /// Failed backend reads
    read_errors: AtomicU64,

    renames_paired: AtomicU64,
    renames_unpaired: AtomicU64,

    /// Directories adopted into recursive roots after registration
    subdirectories_added: AtomicU64,

    /// Created events synthesized by listing new directories
    entries_synthesized: AtomicU64,

    /// Roots torn down because their directory disappeared
    roots_lost: AtomicU64,
}

impl WatcherMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_raw(&self, count: u64) {
        self.raw_received.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_emitted(&self, count: u64) {
        self.emitted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_unresolved(&self) {
        self.unresolved_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self, count: u64) {
        self.malformed_skipped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_kernel_overflow(&self) {
        self.kernel_overflows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read_error(&self) {
        self.read_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rename_paired(&self) {
        self.renames_paired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rename_unpaired(&self) {
        self.renames_unpaired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_subdirectory_added(&self) {
        self.subdirectories_added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_synthesized(&self, count: u64) {
        self.entries_synthesized.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_root_lost(&self) {
        self.roots_lost.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total overflow reports from the backend
    pub fn kernel_overflows(&self) -> u64 {
        self.kernel_overflows.load(Ordering::Relaxed)
    }

    /// Get total change events emitted
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            raw_received: self.raw_received.load(Ordering::Relaxed),
            emitted: self.emitted(),
            unresolved_dropped: self.unresolved_dropped.load(Ordering::Relaxed),
            malformed_skipped: self.malformed_skipped.load(Ordering::Relaxed),
            kernel_overflows: self.kernel_overflows(),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            renames_paired: self.renames_paired.load(Ordering::Relaxed),
            renames_unpaired: self.renames_unpaired.load(Ordering::Relaxed),
            subdirectories_added: self.subdirectories_added.load(Ordering::Relaxed),
            entries_synthesized: self.entries_synthesized.load(Ordering::Relaxed),
            roots_lost: self.roots_lost.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of `WatcherMetrics`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub raw_received: u64,
    pub emitted: u64,
    pub unresolved_dropped: u64,
    pub malformed_skipped: u64,
    pub kernel_overflows: u64,
    pub read_errors: u64,
    pub renames_paired: u64,
    pub renames_unpaired: u64,
    pub subdirectories_added: u64,
    pub entries_synthesized: u64,
    pub roots_lost: u64,
}
