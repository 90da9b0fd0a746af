// src/core/crawler/worker.rs

//! The crawler worker task: parks on the controller's wakeup, walks
//! whatever crawl is installed, tears it down, and parks again.
//!
//! Lock order throughout: crawler mutex, then a class lock, then a hash
//! bucket lock (trylock only), then the stats mutex. The sync guards are
//! never held across an await; the only awaits while the crawler mutex is
//! held are sink flushes, which happen before any class lock is taken.

use super::expired::ReapHandle;
use super::modes::CrawlMode;
use super::sink::FlushOutcome;
use super::{ActiveCrawl, ActiveScan, ClassSentinel, CrawlerInner, LruCrawler};
use crate::core::storage::{HashStep, HashTable, POWER_LARGEST};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info};

/// Hash walks flush at bucket boundaries once this many items have been
/// appended since the last flush.
const MIN_ITEMS_PER_WRITE: usize = 16;

/// Consecutive no-progress flush rounds tolerated while draining the
/// final buffer, before the client is abandoned.
const DRAIN_STALL_LIMIT: u32 = 30;

impl LruCrawler {
    /// The worker task body. Signals `ready` once it is parked so the
    /// spawner can guarantee the worker is up before accepting starts.
    pub(crate) async fn worker_loop(
        self: std::sync::Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
        ready: oneshot::Sender<()>,
    ) {
        self.set_worker_up(true);
        info!("LRU crawler worker started.");
        let _ = ready.send(());
        loop {
            tokio::select! {
                _ = self.notified() => {
                    self.run_crawl().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("LRU crawler worker shutting down.");
                    break;
                }
            }
        }
        self.set_worker_up(false);
    }

    /// Drives one installed crawl to completion. A wakeup with nothing
    /// installed (stop of an idle crawler) is a no-op.
    async fn run_crawl(&self) {
        let is_hash = {
            let inner = self.lock_inner().await;
            match &inner.crawl {
                None => return,
                Some(crawl) => matches!(crawl.scan, ActiveScan::Hash),
            }
        };
        if is_hash {
            self.run_hash_scan().await;
        } else {
            self.run_class_scan().await;
        }
        self.teardown().await;
    }

    /// The per-class sweep: round-robins over every armed class, one
    /// candidate at a time, releasing the crawler mutex to sleep between
    /// batches. Stop requests are observed at batch boundaries only.
    async fn run_class_scan(&self) {
        let mut next_class = 0usize;
        loop {
            let mut inner = self.lock_inner().await;
            if inner.stop_requested {
                break;
            }
            let CrawlerInner {
                crawl, sentinels, ..
            } = &mut *inner;
            let Some(crawl) = crawl.as_mut() else { break };
            let ActiveScan::Classes { active } = &crawl.scan else {
                break;
            };
            if *active == 0 {
                break;
            }

            let mut batch = 0u32;
            let mut idle_scanned = 0usize;
            while batch < self.cfg.items_per_sleep && idle_scanned < POWER_LARGEST {
                let id = next_class;
                next_class = (next_class + 1) % POWER_LARGEST;
                if !sentinels[id].active {
                    idle_scanned += 1;
                    continue;
                }
                idle_scanned = 0;
                batch += 1;
                self.crawl_class_step(sentinels, crawl, id).await;
                if let ActiveScan::Classes { active: 0 } = crawl.scan {
                    break;
                }
            }
            drop(inner);
            self.sleep_batch().await;
        }
    }

    /// One candidate from one class.
    async fn crawl_class_step(
        &self,
        sentinels: &mut [ClassSentinel],
        crawl: &mut ActiveCrawl,
        id: usize,
    ) {
        // Keep the headroom contract ahead of eval: flush when free
        // space runs low. A timed-out or partial flush leaves the class
        // as-is for the next batch.
        if let Some(sink) = crawl.sink.as_mut() {
            if !sink.is_closed() && sink.needs_flush() {
                match sink.flush().await {
                    FlushOutcome::Closed => {}
                    FlushOutcome::Retry => return,
                    FlushOutcome::Flushed => {
                        if sink.needs_flush() {
                            return;
                        }
                    }
                }
            }
        }
        // A client-requiring mode with no usable sink folds its classes
        // up one by one.
        let sink_usable = crawl.sink.as_ref().is_some_and(|s| !s.is_closed());
        if crawl.mode.needs_client() && !sink_usable {
            self.finish_class(sentinels, crawl, id);
            return;
        }

        let class = self.cache.class(id);
        let mut chain = class.chain.lock();
        let Some(item) = chain.cursor_peek() else {
            // Cursor reached the head.
            drop(chain);
            self.finish_class(sentinels, crawl, id);
            return;
        };
        // Take the bucket lock before committing the cursor move, so a
        // contended bucket leaves the cursor (and the budget) untouched
        // and the same candidate is retried next round. Never block on a
        // bucket while holding the class lock.
        let hv = HashTable::hash_of(item.key());
        let Some(mut bucket) = self.cache.hash.try_lock_bucket(hv) else {
            return;
        };
        chain.cursor_step();
        let sentinel = &mut sentinels[id];
        if sentinel.remaining != 0 {
            sentinel.remaining -= 1;
            if sentinel.remaining < 1 {
                // Budget exhausted; the candidate is passed over, not
                // evaluated.
                drop(bucket);
                drop(chain);
                self.finish_class(sentinels, crawl, id);
                return;
            }
        }
        // Only items sitting at exactly the chain's own reference are
        // fair game; anything else is mid-transition elsewhere.
        if item.refcount_incr() != 2 {
            item.refcount_decr();
            return;
        }
        sentinels[id].checked += 1;

        // The mode registry decides whether the class lock stays held
        // across eval.
        let hold_class_lock = crawl.mode.needs_lock();
        match &mut crawl.mode {
            CrawlMode::Expired(mode) => {
                // Reaping unlinks through the held class and bucket
                // locks.
                debug_assert!(hold_class_lock);
                mode.eval(
                    &item,
                    id,
                    &mut sentinels[id],
                    &self.cache,
                    ReapHandle {
                        chain: &mut chain,
                        bucket: &mut bucket,
                    },
                );
            }
            CrawlMode::Metadump(mode) | CrawlMode::Mgdump(mode) => {
                if !hold_class_lock {
                    // Release the class lock before formatting so
                    // request handlers are not stalled behind the dump.
                    drop(chain);
                }
                match crawl.sink.as_mut() {
                    Some(sink) => mode.eval(&item, &self.cache, sink),
                    None => {
                        item.refcount_decr();
                    }
                }
            }
        }
    }

    /// Tears one class down: cursor out of the chain, counters into the
    /// server stats, mode notified.
    fn finish_class(&self, sentinels: &mut [ClassSentinel], crawl: &mut ActiveCrawl, id: usize) {
        let sentinel = &mut sentinels[id];
        if !sentinel.active {
            return;
        }
        sentinel.active = false;
        {
            let mut chain = self.cache.class(id).chain.lock();
            chain.unlink_cursor();
        }
        if let ActiveScan::Classes { active } = &mut crawl.scan {
            *active = active.saturating_sub(1);
        }
        self.stats
            .add_crawl(sentinel.checked, sentinel.reclaimed, sentinel.unfetched);
        let snapshot = *sentinel;
        crawl.mode.on_class_done(id, self.cache.clock.now());
        debug!(
            class = id,
            checked = snapshot.checked,
            reclaimed = snapshot.reclaimed,
            "class sweep finished"
        );
    }

    /// The hash-table walk. Flushes only between buckets, growing the
    /// buffer mid-bucket instead, and holds the iterator (which pins the
    /// table against expansion) for exactly the duration of the scan.
    async fn run_hash_scan(&self) {
        let mut inner = self.lock_inner().await;
        let Some(mut iter) = self.cache.hash.iterator() else {
            if let Some(crawl) = inner.crawl.as_mut() {
                crawl.mode.set_locked();
            }
            debug!("hash table is mid-expansion; dump will report locked");
            return;
        };
        let mut since_flush = 0usize;
        let mut since_sleep = 0u32;
        loop {
            if inner.stop_requested {
                break;
            }
            let Some(crawl) = inner.crawl.as_mut() else { break };
            match iter.next_step() {
                HashStep::Done => break,
                HashStep::BucketDone => {
                    if let Some(sink) = crawl.sink.as_mut() {
                        if !sink.is_closed() && since_flush >= MIN_ITEMS_PER_WRITE {
                            if sink.flush().await == FlushOutcome::Flushed {
                                since_flush = 0;
                            }
                        }
                    }
                    let sink_usable = crawl.sink.as_ref().is_some_and(|s| !s.is_closed());
                    if crawl.mode.needs_client() && !sink_usable {
                        break;
                    }
                    if since_sleep >= self.cfg.items_per_sleep {
                        since_sleep = 0;
                        drop(inner);
                        self.sleep_batch().await;
                        inner = self.lock_inner().await;
                    }
                }
                HashStep::Item(item) => {
                    if item.refcount_incr() < 2 {
                        item.refcount_decr();
                        continue;
                    }
                    since_sleep += 1;
                    if let Some(sink) = crawl.sink.as_mut() {
                        if sink.ensure_headroom().is_err() {
                            item.refcount_decr();
                            break;
                        }
                    }
                    match &mut crawl.mode {
                        CrawlMode::Metadump(mode) | CrawlMode::Mgdump(mode) => {
                            match crawl.sink.as_mut() {
                                Some(sink) => {
                                    mode.eval(&item, &self.cache, sink);
                                    since_flush += 1;
                                }
                                None => {
                                    item.refcount_decr();
                                }
                            }
                        }
                        // Expiry kinds never reach here; hash targets are
                        // rejected for them at start.
                        CrawlMode::Expired(_) => {
                            item.refcount_decr();
                        }
                    }
                }
            }
        }
        // Dropping the iterator releases the expansion pin. Mandatory.
        drop(iter);
    }

    /// Winds the finished (or stopped) crawl down: remaining classes are
    /// completed, the mode finalizes, the buffered tail is drained, and
    /// the client goes back to the server for redispatch.
    async fn teardown(&self) {
        let mut inner = self.lock_inner().await;
        let CrawlerInner {
            crawl,
            sentinels,
            stop_requested,
            ..
        } = &mut *inner;
        let Some(mut crawl) = crawl.take() else {
            *stop_requested = false;
            self.set_busy(false);
            return;
        };
        for id in 0..POWER_LARGEST {
            if sentinels[id].active {
                self.finish_class(sentinels, &mut crawl, id);
            }
        }
        match &mut crawl.mode {
            CrawlMode::Expired(mode) => mode.finalize(self.cache.clock.now()),
            CrawlMode::Metadump(mode) | CrawlMode::Mgdump(mode) => {
                if let Some(sink) = crawl.sink.as_mut() {
                    mode.finalize(sink).await;
                }
            }
        }
        if let Some(mut sink) = crawl.sink.take() {
            let mut stalled_rounds = 0u32;
            while sink.used() > 0 && !sink.is_closed() {
                match sink.flush().await {
                    FlushOutcome::Closed => break,
                    FlushOutcome::Flushed => stalled_rounds = 0,
                    FlushOutcome::Retry => {
                        stalled_rounds += 1;
                        if stalled_rounds >= DRAIN_STALL_LIMIT {
                            sink.close();
                            break;
                        }
                    }
                }
            }
            sink.release();
        }
        *stop_requested = false;
        self.set_busy(false);
        debug!("lru crawl complete");
    }

    /// The inter-batch suspension point, entered with the crawler mutex
    /// released.
    async fn sleep_batch(&self) {
        if self.cfg.sleep_micros > 0 {
            tokio::time::sleep(Duration::from_micros(self.cfg.sleep_micros)).await;
        } else {
            tokio::task::yield_now().await;
        }
    }
}
