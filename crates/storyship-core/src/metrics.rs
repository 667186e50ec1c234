//! Global atomic counters for pipeline observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event at the end of a run.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters.
pub struct Metrics {
    files_uploaded: AtomicU64,
    bytes_uploaded: AtomicU64,
    transfer_retries: AtomicU64,
    traced_files: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            files_uploaded: AtomicU64::new(0),
            bytes_uploaded: AtomicU64::new(0),
            transfer_retries: AtomicU64::new(0),
            traced_files: AtomicU64::new(0),
        }
    }

    /// Record one completed file transfer of `bytes`.
    pub fn inc_file_uploaded(&self, bytes: u64) {
        self.files_uploaded.fetch_add(1, Ordering::Relaxed);
        self.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
        tracing::trace!(metric = "files_uploaded", "counter incremented");
    }

    pub fn inc_transfer_retries(&self) {
        self.transfer_retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "transfer_retries", "counter incremented");
    }

    pub fn inc_traced_files(&self) {
        self.traced_files.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "traced_files", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            files_uploaded = self.files_uploaded(),
            bytes_uploaded = self.bytes_uploaded(),
            transfer_retries = self.transfer_retries(),
            traced_files = self.traced_files(),
        );
    }

    pub fn files_uploaded(&self) -> u64 {
        self.files_uploaded.load(Ordering::Relaxed)
    }

    pub fn bytes_uploaded(&self) -> u64 {
        self.bytes_uploaded.load(Ordering::Relaxed)
    }

    pub fn transfer_retries(&self) -> u64 {
        self.transfer_retries.load(Ordering::Relaxed)
    }

    pub fn traced_files(&self) -> u64 {
        self.traced_files.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.files_uploaded.store(0, Ordering::Relaxed);
        self.bytes_uploaded.store(0, Ordering::Relaxed);
        self.transfer_retries.store(0, Ordering::Relaxed);
        self.traced_files.store(0, Ordering::Relaxed);
    }
}
