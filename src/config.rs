// src/config.rs

//! Engine configuration: loading, defaults, and validation.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;

/// Top-level configuration, usually loaded from a TOML file.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
}

/// Sizing of the storage structures.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StorageConfig {
    /// The hash table holds `1 << hash_power` buckets.
    #[serde(default = "default_hash_power")]
    pub hash_power: u8,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            hash_power: default_hash_power(),
        }
    }
}

/// Tuning for the LRU crawler and its maintainer.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CrawlerConfig {
    /// Microseconds the worker sleeps between item batches. `0` means
    /// yield-only: the worker cycles the crawler mutex so waiting
    /// callers get in, but does not sleep.
    #[serde(default = "default_sleep_micros")]
    pub sleep_micros: u64,
    /// Items examined per batch before the sleep policy applies.
    #[serde(default = "default_items_per_sleep")]
    pub items_per_sleep: u32,
    /// Seconds between automatic expiry sweeps. `0` disables the
    /// maintainer entirely.
    #[serde(default = "default_autocrawl_interval_secs")]
    pub autocrawl_interval_secs: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            sleep_micros: default_sleep_micros(),
            items_per_sleep: default_items_per_sleep(),
            autocrawl_interval_secs: default_autocrawl_interval_secs(),
        }
    }
}

fn default_hash_power() -> u8 {
    16
}
fn default_sleep_micros() -> u64 {
    100
}
fn default_items_per_sleep() -> u32 {
    1000
}
fn default_autocrawl_interval_secs() -> u64 {
    60
}

impl Config {
    /// Loads and validates a configuration file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{path}'"))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.hash_power == 0 || self.storage.hash_power > 32 {
            bail!(
                "storage.hash_power must be between 1 and 32, got {}",
                self.storage.hash_power
            );
        }
        if self.crawler.items_per_sleep == 0 {
            bail!("crawler.items_per_sleep must be at least 1");
        }
        Ok(())
    }
}
