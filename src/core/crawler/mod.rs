// src/core/crawler/mod.rs

//! The LRU crawler: a background sweeper that walks the class chains and
//! the hash table off the request path, either reaping dead items or
//! streaming dumps of live keys to an attached client.
//!
//! One worker task does all the walking. Command handlers and the
//! periodic maintainer only talk to the controller: they install a crawl
//! under the crawler mutex, wake the worker, and get out of the way. The
//! worker owns the active crawl from that point until it tears it down
//! and parks again.

pub mod command;
pub mod dump;
pub mod expired;
pub mod modes;
pub mod sink;
mod worker;

pub use command::{CrawlRequest, CrawlTarget};
pub use expired::{ClassTtlStats, GlobalTtlStats, TtlCrawlStats};
pub use modes::CrawlKind;
pub use sink::{ClientSink, DumpClient, FlushOutcome, MIN_BUFSPACE, ReleasedClient};

use crate::config::CrawlerConfig;
use crate::core::errors::CrawlerError;
use crate::core::stats::CrawlerStats;
use crate::core::storage::{CacheState, POWER_LARGEST};
use modes::CrawlMode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, MutexGuard, Notify, broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

/// Passing this as the `remaining` budget caps each class's sweep at the
/// chain's length as observed when the class starts.
pub const CAP_REMAINING: u64 = u64::MAX;

/// How long autoexpire starts stay suppressed after one is rejected
/// because another crawl holds the worker.
const AUTOEXPIRE_COOLDOWN_SECS: u32 = 60;

/// Per-class crawl bookkeeping. `active` mirrors whether the class
/// chain currently has the crawl cursor linked.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClassSentinel {
    pub active: bool,
    /// Candidate budget, stored as N+1 so a decrement hitting zero ends
    /// the class after N evaluated items. 0 = unlimited.
    pub remaining: u64,
    pub reclaimed: u64,
    pub unfetched: u64,
    pub checked: u64,
}

/// What the worker is walking.
#[derive(Debug)]
pub(crate) enum ActiveScan {
    /// Class-chain sweep; counts sentinels still linked.
    Classes { active: usize },
    Hash,
}

/// The single in-flight crawl. Created by `start`, owned and torn down
/// by the worker.
pub(crate) struct ActiveCrawl {
    pub kind: CrawlKind,
    pub mode: CrawlMode,
    pub scan: ActiveScan,
    pub sink: Option<ClientSink>,
}

/// Everything behind the crawler mutex.
pub(crate) struct CrawlerInner {
    pub crawl: Option<ActiveCrawl>,
    pub sentinels: Vec<ClassSentinel>,
    pub stop_requested: bool,
    /// Coarse time until which autoexpire starts are rejected.
    pub autoexpire_block_until: Option<u32>,
}

/// Holds the crawler frozen between batches. Dropping it resumes the
/// worker.
pub struct CrawlerPause<'a> {
    _guard: MutexGuard<'a, CrawlerInner>,
}

/// The crawler controller plus the state its worker task runs on.
pub struct LruCrawler {
    inner: Mutex<CrawlerInner>,
    notify: Notify,
    pub(crate) cache: Arc<CacheState>,
    pub(crate) cfg: CrawlerConfig,
    pub(crate) stats: Arc<CrawlerStats>,
    worker_up: AtomicBool,
    busy: watch::Sender<bool>,
}

impl LruCrawler {
    pub fn new(cache: Arc<CacheState>, cfg: CrawlerConfig, stats: Arc<CrawlerStats>) -> Arc<Self> {
        let (busy, _) = watch::channel(false);
        Arc::new(Self {
            inner: Mutex::new(CrawlerInner {
                crawl: None,
                sentinels: vec![ClassSentinel::default(); POWER_LARGEST],
                stop_requested: false,
                autoexpire_block_until: None,
            }),
            notify: Notify::new(),
            cache,
            cfg,
            stats,
            worker_up: AtomicBool::new(false),
            busy,
        })
    }

    /// Spawns the worker task and waits until it is parked on its
    /// wakeup, so a start issued right after this call cannot race the
    /// worker coming up.
    pub async fn spawn_worker(
        self: &Arc<Self>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let crawler = Arc::clone(self);
        let handle = tokio::spawn(crawler.worker_loop(shutdown_rx, ready_tx));
        let _ = ready_rx.await;
        handle
    }

    pub fn is_worker_up(&self) -> bool {
        self.worker_up.load(Ordering::Acquire)
    }

    pub(crate) fn set_worker_up(&self, up: bool) {
        self.worker_up.store(up, Ordering::Release);
    }

    pub(crate) fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.notify.notified()
    }

    pub(crate) async fn lock_inner(&self) -> MutexGuard<'_, CrawlerInner> {
        self.inner.lock().await
    }

    pub(crate) fn set_busy(&self, busy: bool) {
        let _ = self.busy.send_replace(busy);
    }

    /// Installs and kicks off a crawl. All the rejection rules live
    /// here; once this returns `Ok` the worker owns the crawl.
    pub async fn start(&self, req: CrawlRequest) -> Result<(), CrawlerError> {
        let CrawlRequest {
            target,
            kind,
            remaining,
            stats,
            client,
        } = req;
        let mut inner = self.inner.lock().await;
        if !self.is_worker_up() {
            return Err(CrawlerError::NotStarted);
        }
        let now = self.cache.clock.now();
        match inner.crawl.as_ref().map(|crawl| crawl.kind) {
            Some(current) => {
                // Any autoexpire attempt that collides with a running
                // crawl arms the cooldown so the maintainer stops
                // retrying for a while.
                if kind == CrawlKind::Autoexpire {
                    inner.autoexpire_block_until = Some(now + AUTOEXPIRE_COOLDOWN_SECS);
                }
                // Busy, except when an autoexpire request meets the
                // running autoexpire crawl: that pair falls through and
                // re-arms any classes whose sweep already finished.
                if !(kind == CrawlKind::Autoexpire && current == CrawlKind::Autoexpire) {
                    return Err(CrawlerError::Running);
                }
            }
            None => {
                if kind == CrawlKind::Autoexpire
                    && inner.autoexpire_block_until.is_some_and(|until| now < until)
                {
                    return Err(CrawlerError::Running);
                }
            }
        }
        // The hash walker reports neither a hash value nor a class to its
        // mode, so only the dump modes may ride it.
        if target == CrawlTarget::Hash && !kind.is_dump() {
            return Err(CrawlerError::InvalidTarget);
        }

        if inner.crawl.is_some() {
            // Autoexpire over autoexpire: the installed mode stays; only
            // classes whose sentinel is already unlinked can start again.
            let started = self.start_classes(&mut inner.sentinels, &target, remaining);
            if started == 0 {
                return Err(CrawlerError::NotStarted);
            }
            if let Some(crawl) = inner.crawl.as_mut() {
                if let ActiveScan::Classes { active } = &mut crawl.scan {
                    *active += started;
                }
            }
            self.stats.record_start();
            self.notify.notify_one();
            debug!(classes = started, "running autoexpire crawl re-armed");
            return Ok(());
        }

        let mode = CrawlMode::for_kind(kind, stats, now);
        let sink = if mode.needs_client() {
            let client = client.ok_or(CrawlerError::ClientRequired)?;
            Some(ClientSink::attach(client)?)
        } else {
            None
        };

        let scan = if target == CrawlTarget::Hash {
            ActiveScan::Hash
        } else {
            let started = self.start_classes(&mut inner.sentinels, &target, remaining);
            if started == 0 {
                if let Some(sink) = sink {
                    sink.release();
                }
                return Err(CrawlerError::NotStarted);
            }
            ActiveScan::Classes { active: started }
        };

        inner.crawl = Some(ActiveCrawl {
            kind,
            mode,
            scan,
            sink,
        });
        inner.stop_requested = false;
        self.stats.record_start();
        self.set_busy(true);
        self.notify.notify_one();
        debug!(kind = kind.tag(), "lru crawl started");
        Ok(())
    }

    /// Arms every chain the target names, returning how many started.
    fn start_classes(
        &self,
        sentinels: &mut [ClassSentinel],
        target: &CrawlTarget,
        remaining: u64,
    ) -> usize {
        match target {
            CrawlTarget::All => (0..POWER_LARGEST)
                .filter(|&id| self.start_class(sentinels, id, remaining))
                .count(),
            CrawlTarget::Classes(ids) => ids
                .iter()
                .filter(|&&id| self.start_class(sentinels, id as usize, remaining))
                .count(),
            CrawlTarget::Hash => 0,
        }
    }

    /// Links the crawl cursor into one class and arms its sentinel.
    fn start_class(&self, sentinels: &mut [ClassSentinel], id: usize, remaining: u64) -> bool {
        let sentinel = &mut sentinels[id];
        if sentinel.active {
            return false;
        }
        let mut chain = self.cache.class(id).chain.lock();
        let budget = match remaining {
            0 => 0,
            CAP_REMAINING => chain.len() as u64 + 1,
            n => n + 1,
        };
        *sentinel = ClassSentinel {
            active: true,
            remaining: budget,
            reclaimed: 0,
            unfetched: 0,
            checked: 0,
        };
        chain.link_cursor();
        true
    }

    /// Asks the worker to wind the current crawl down at the next batch
    /// boundary.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        inner.stop_requested = true;
        self.notify.notify_one();
    }

    /// Freezes the crawler by holding its mutex. The worker cannot enter
    /// another batch until the returned guard is dropped.
    pub async fn pause(&self) -> CrawlerPause<'_> {
        CrawlerPause {
            _guard: self.inner.lock().await,
        }
    }

    /// Resolves once no crawl is in flight.
    pub async fn wait_idle(&self) {
        let mut rx = self.busy.subscribe();
        let _ = rx.wait_for(|busy| !*busy).await;
    }

    /// Snapshot of one class's sentinel counters, for stats readers.
    pub async fn sentinel_snapshot(&self, id: usize) -> ClassSentinel {
        self.inner.lock().await.sentinels[id]
    }

    /// The server-wide counters this crawler reports into.
    pub fn server_stats(&self) -> &Arc<CrawlerStats> {
        &self.stats
    }
}
