// src/core/stats.rs

//! Server-wide crawler statistics, shared via `Arc` and updated with
//! relaxed atomics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters the crawler reports into when a crawl starts and when each
/// class finishes its sweep.
#[derive(Debug, Default)]
pub struct CrawlerStats {
    /// Number of crawls that have been started since boot.
    pub starts: AtomicU64,
    /// Total items the crawler has examined across all crawls.
    pub items_checked: AtomicU64,
    /// Total expired/flushed/invalid items reaped.
    pub reclaimed: AtomicU64,
    /// Reaped items that were never fetched after being stored.
    pub unfetched: AtomicU64,
}

impl CrawlerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one class's sweep counters into the server-wide totals.
    pub fn add_crawl(&self, checked: u64, reclaimed: u64, unfetched: u64) {
        self.items_checked.fetch_add(checked, Ordering::Relaxed);
        self.reclaimed.fetch_add(reclaimed, Ordering::Relaxed);
        self.unfetched.fetch_add(unfetched, Ordering::Relaxed);
    }

    pub fn record_start(&self) {
        self.starts.fetch_add(1, Ordering::Relaxed);
    }
}
