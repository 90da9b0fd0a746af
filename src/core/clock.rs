// src/core/clock.rs

//! A coarse, second-granularity clock measured relative to process start.
//!
//! All item timestamps (`exptime`, `last_access`) are stored as seconds
//! since the engine started, so a `u32` covers more than a century of
//! uptime and comparisons stay cheap. Absolute times for dump output are
//! recovered by adding `start_epoch_secs`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// The shared coarse clock. One instance lives in `CacheState`.
///
/// `current` is only advanced by the periodic clock task (or explicitly in
/// tests), never recomputed on the read path.
#[derive(Debug)]
pub struct CoarseClock {
    /// Unix time at construction, in whole seconds.
    start_epoch_secs: u64,
    /// Monotonic anchor used by `tick` to recompute `current`.
    started_at: Instant,
    /// Seconds elapsed since `started_at`, as last observed by `tick`.
    current: AtomicU32,
}

impl CoarseClock {
    pub fn new() -> Self {
        let start_epoch_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self {
            start_epoch_secs,
            started_at: Instant::now(),
            current: AtomicU32::new(0),
        }
    }

    /// The current coarse time, in seconds since process start.
    pub fn now(&self) -> u32 {
        self.current.load(Ordering::Relaxed)
    }

    /// Unix time at process start, used to absolutize relative timestamps.
    pub fn start_epoch_secs(&self) -> u64 {
        self.start_epoch_secs
    }

    /// Converts a relative timestamp into an absolute unix time.
    pub fn to_unix(&self, rel_secs: u32) -> u64 {
        self.start_epoch_secs + u64::from(rel_secs)
    }

    /// Recomputes `current` from the monotonic anchor.
    /// Called at 1 Hz by the clock task.
    pub fn tick(&self) {
        let elapsed = self.started_at.elapsed().as_secs().min(u64::from(u32::MAX)) as u32;
        // Never move backwards past a test-driven `advance`.
        self.current.fetch_max(elapsed, Ordering::Relaxed);
    }

    /// Advances the clock by `secs` without waiting. Deterministic face of
    /// the clock for tests and maintenance tooling.
    pub fn advance(&self, secs: u32) {
        self.current.fetch_add(secs, Ordering::Relaxed);
    }
}

impl Default for CoarseClock {
    fn default() -> Self {
        Self::new()
    }
}
