// src/core/tasks/autocrawl.rs

//! The periodic maintainer that kicks off automatic expiry sweeps.

use crate::core::crawler::{CrawlRequest, LruCrawler};
use crate::core::errors::CrawlerError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Starts an `Autoexpire` crawl over every class on a fixed interval.
/// Rejections are normal operation: the crawler may be busy with a
/// foreground crawl, or a recent rejection may have armed the autoexpire
/// cooldown.
pub struct AutoCrawlTask {
    crawler: Arc<LruCrawler>,
    interval_secs: u64,
}

impl AutoCrawlTask {
    pub fn new(crawler: Arc<LruCrawler>, interval_secs: u64) -> Self {
        Self {
            crawler,
            interval_secs,
        }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        if self.interval_secs == 0 {
            info!("Automatic expiry sweeps are disabled.");
            return;
        }
        info!(
            "Autoexpire maintainer started (every {}s).",
            self.interval_secs
        );
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.crawler.start(CrawlRequest::autoexpire()).await {
                        Ok(()) => debug!("autoexpire sweep started"),
                        Err(CrawlerError::Running) => {
                            debug!("autoexpire sweep skipped; crawler busy or cooling down");
                        }
                        Err(e) => warn!("autoexpire sweep failed to start: {e}"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Autoexpire maintainer shutting down.");
                    return;
                }
            }
        }
    }
}
