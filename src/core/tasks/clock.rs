// src/core/tasks/clock.rs

//! Ticks the coarse clock once a second.

use crate::core::storage::CacheState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

/// Keeps `CacheState::clock` current. Everything that compares item
/// timestamps reads the coarse value this task maintains.
pub struct ClockTask {
    cache: Arc<CacheState>,
}

impl ClockTask {
    pub fn new(cache: Arc<CacheState>) -> Self {
        Self { cache }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!("Coarse clock task started.");
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.cache.clock.tick();
                }
                _ = shutdown_rx.recv() => {
                    debug!("Coarse clock task shutting down.");
                    return;
                }
            }
        }
    }
}
