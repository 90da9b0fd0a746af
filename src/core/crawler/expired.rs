// src/core/crawler/expired.rs

//! The expiry-reaping crawl mode, shared by the `Expired` and
//! `Autoexpire` crawl kinds.
//!
//! Besides unlinking dead items, the sweep doubles as a TTL census: every
//! live item it passes lands in a per-class minute-granularity histogram,
//! which is what the remaining-TTL statistics are built from.

use super::ClassSentinel;
use crate::core::storage::{BucketGuard, CacheItem, CacheState, HashTable, ItemFlags, LruChain, POWER_LARGEST};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// Number of one-minute histogram buckets (0..=60 minutes).
pub const TTL_HISTO_BUCKETS: usize = 61;

/// Remaining TTLs above this many seconds land in the hour-plus bucket.
const TTL_HOURPLUS_CUTOFF: u32 = 3599;

/// Borrowed access to the structures an item must be unlinked from when
/// it is reaped. Only constructed while both the class lock and the
/// item's bucket lock are held.
pub struct ReapHandle<'a, 'b> {
    pub chain: &'a mut LruChain,
    pub bucket: &'a mut BucketGuard<'b>,
}

/// One class's sweep record.
#[derive(Debug, Clone, Copy)]
pub struct ClassTtlStats {
    /// Coarse time the sweep of this class began.
    pub start_time: u32,
    pub end_time: u32,
    pub run_complete: bool,
    /// Live items passed over.
    pub seen: u64,
    /// Expired/flushed/invalid items unlinked.
    pub reclaimed: u64,
    /// Live items with no expiration at all.
    pub noexp: u64,
    /// Live items with more than an hour of TTL left.
    pub ttl_hourplus: u64,
    /// Live items bucketed by whole minutes of remaining TTL.
    pub histo: [u64; TTL_HISTO_BUCKETS],
}

impl Default for ClassTtlStats {
    fn default() -> Self {
        Self {
            start_time: 0,
            end_time: 0,
            run_complete: false,
            seen: 0,
            reclaimed: 0,
            noexp: 0,
            ttl_hourplus: 0,
            histo: [0; TTL_HISTO_BUCKETS],
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalTtlStats {
    pub start_time: u32,
    pub end_time: u32,
    pub crawl_complete: bool,
}

/// The stats block an expiry crawl fills in.
///
/// A caller that wants to watch the sweep passes its own
/// `Arc<TtlCrawlStats>` with the start request and keeps reading from it;
/// otherwise the mode allocates a private block that dies with the crawl.
#[derive(Debug)]
pub struct TtlCrawlStats {
    classes: Mutex<Vec<ClassTtlStats>>,
    global: Mutex<GlobalTtlStats>,
}

impl Default for TtlCrawlStats {
    fn default() -> Self {
        Self::new()
    }
}

impl TtlCrawlStats {
    pub fn new() -> Self {
        Self {
            classes: Mutex::new(vec![ClassTtlStats::default(); POWER_LARGEST]),
            global: Mutex::new(GlobalTtlStats::default()),
        }
    }

    fn reset(&self, now: u32) {
        let mut classes = self.classes.lock();
        classes.clear();
        classes.resize_with(POWER_LARGEST, || ClassTtlStats {
            start_time: now,
            ..ClassTtlStats::default()
        });
        *self.global.lock() = GlobalTtlStats {
            start_time: now,
            end_time: 0,
            crawl_complete: false,
        };
    }

    fn lock_classes(&self) -> MutexGuard<'_, Vec<ClassTtlStats>> {
        self.classes.lock()
    }

    /// A copy of one class's record, for readers outside the crawl.
    pub fn class_snapshot(&self, class: usize) -> ClassTtlStats {
        self.classes.lock()[class]
    }

    pub fn global_snapshot(&self) -> GlobalTtlStats {
        *self.global.lock()
    }

    pub fn is_complete(&self) -> bool {
        self.global.lock().crawl_complete
    }
}

/// State of a running expiry sweep.
#[derive(Debug)]
pub struct ExpiredMode {
    stats: Arc<TtlCrawlStats>,
    /// Whether the stats block belongs to an outside caller. An internal
    /// block is dropped with the mode at finalize.
    is_external: bool,
}

impl ExpiredMode {
    pub fn new(external: Option<Arc<TtlCrawlStats>>, now: u32) -> Self {
        let (stats, is_external) = match external {
            Some(stats) => (stats, true),
            None => (Arc::new(TtlCrawlStats::new()), false),
        };
        stats.reset(now);
        Self { stats, is_external }
    }

    pub fn stats(&self) -> &Arc<TtlCrawlStats> {
        &self.stats
    }

    pub fn is_external(&self) -> bool {
        self.is_external
    }

    /// Examines one item under the class and bucket locks. Reaps it if it
    /// is expired, flushed, or no longer backed by the external tier;
    /// otherwise counts it into the TTL census. Either way the scanner's
    /// reference is consumed.
    pub fn eval(
        &mut self,
        item: &Arc<CacheItem>,
        class: usize,
        sentinel: &mut ClassSentinel,
        cache: &CacheState,
        mut reap: ReapHandle<'_, '_>,
    ) {
        let mut classes = self.stats.lock_classes();
        let rec = &mut classes[class];
        let now = cache.clock.now();
        let is_flushed = cache.is_flushed(item);
        let is_valid = match (item.has_flag(ItemFlags::HDR), cache.external()) {
            (true, Some(tier)) => tier.validate(item),
            _ => true,
        };

        if item.is_expired(now) || is_flushed || !is_valid {
            sentinel.reclaimed += 1;
            rec.reclaimed += 1;
            if !item.has_flag(ItemFlags::FETCHED) && !is_flushed {
                sentinel.unfetched += 1;
            }
            if item.has_flag(ItemFlags::HDR) {
                if let Some(tier) = cache.external() {
                    tier.delete(item);
                }
            }
            HashTable::unlink_locked(reap.bucket, item);
            if reap.chain.unlink(item).is_some() {
                // The chain's own reference.
                item.refcount_decr();
            }
            // The scanner's reference.
            item.refcount_decr();
        } else {
            rec.seen += 1;
            item.refcount_decr();
            match item.remaining_ttl(now) {
                None => rec.noexp += 1,
                Some(rem) if rem > TTL_HOURPLUS_CUTOFF => rec.ttl_hourplus += 1,
                Some(rem) => {
                    let bucket = ((rem / 60) as usize).min(TTL_HISTO_BUCKETS - 1);
                    rec.histo[bucket] += 1;
                }
            }
        }
    }

    /// Stamps a class record once its sweep finishes.
    pub fn on_class_done(&mut self, class: usize, now: u32) {
        let mut classes = self.stats.lock_classes();
        let rec = &mut classes[class];
        rec.end_time = now;
        rec.run_complete = true;
    }

    /// Stamps the global record. The internal stats block, if any, is
    /// freed when the mode itself is dropped right after this.
    pub fn finalize(&mut self, now: u32) {
        let mut global = self.stats.global.lock();
        global.end_time = now;
        global.crawl_complete = true;
    }
}
