// src/core/crawler/command.rs

//! Crawl requests and the `lru_crawler crawl` target grammar.

use super::expired::TtlCrawlStats;
use super::modes::CrawlKind;
use super::sink::DumpClient;
use crate::core::errors::CrawlerError;
use crate::core::storage::{COLD_LRU, HOT_LRU, MAX_CLASSES, TEMP_LRU, WARM_LRU};
use std::sync::Arc;

/// What a crawl walks: every class, the hash table, or a named set of
/// chains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlTarget {
    All,
    Hash,
    /// Concrete chain ids, already expanded across the LRU segments.
    Classes(Vec<u16>),
}

impl CrawlTarget {
    /// Parses the `<slabs>` argument of `lru_crawler crawl`: `all`,
    /// `hash`, or a comma-separated list of slab class ids. Each numeric
    /// id names four chains, one per LRU segment.
    pub fn parse(arg: &str) -> Result<Self, CrawlerError> {
        match arg {
            "all" => Ok(Self::All),
            "hash" => Ok(Self::Hash),
            list => {
                let mut classes = Vec::new();
                if list.trim().is_empty() {
                    return Err(CrawlerError::BadClass);
                }
                for token in list.split(',') {
                    let id: usize = token.trim().parse().map_err(|_| CrawlerError::BadClass)?;
                    if !(1..MAX_CLASSES - 1).contains(&id) {
                        return Err(CrawlerError::BadClass);
                    }
                    for base in [TEMP_LRU, HOT_LRU, WARM_LRU, COLD_LRU] {
                        classes.push((id | base) as u16);
                    }
                }
                Ok(Self::Classes(classes))
            }
        }
    }
}

/// Everything a start call needs: the walk target, the mode, the
/// per-class item budget, and the optional mode extras.
#[derive(Debug)]
pub struct CrawlRequest {
    pub target: CrawlTarget,
    pub kind: CrawlKind,
    /// Per-class candidate budget. 0 = walk each chain to the head;
    /// `CAP_REMAINING` = cap at the chain's current length.
    pub remaining: u64,
    /// Caller-owned stats block for the expiry kinds.
    pub stats: Option<Arc<TtlCrawlStats>>,
    /// The connection a dump streams into.
    pub client: Option<DumpClient>,
}

impl CrawlRequest {
    pub fn expired(target: CrawlTarget, remaining: u64) -> Self {
        Self {
            target,
            kind: CrawlKind::Expired,
            remaining,
            stats: None,
            client: None,
        }
    }

    /// The periodic maintainer's request: every class, capped at each
    /// chain's current size.
    pub fn autoexpire() -> Self {
        Self {
            target: CrawlTarget::All,
            kind: CrawlKind::Autoexpire,
            remaining: super::CAP_REMAINING,
            stats: None,
            client: None,
        }
    }

    pub fn metadump(target: CrawlTarget, client: DumpClient) -> Self {
        Self {
            target,
            kind: CrawlKind::Metadump,
            remaining: 0,
            stats: None,
            client: Some(client),
        }
    }

    pub fn mgdump(target: CrawlTarget, client: DumpClient) -> Self {
        Self {
            target,
            kind: CrawlKind::Mgdump,
            remaining: 0,
            stats: None,
            client: Some(client),
        }
    }

    pub fn with_remaining(mut self, remaining: u64) -> Self {
        self.remaining = remaining;
        self
    }

    pub fn with_stats(mut self, stats: Arc<TtlCrawlStats>) -> Self {
        self.stats = Some(stats);
        self
    }
}
