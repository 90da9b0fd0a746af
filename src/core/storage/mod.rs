// src/core/storage/mod.rs

//! The storage structures the crawler sweeps: per-class LRU chains, the
//! global hash table, the coarse clock, and the flush epoch, aggregated
//! into `CacheState`.

pub mod chain;
pub mod hash;
pub mod item;

pub use chain::LruChain;
pub use hash::{BucketGuard, HashIterator, HashStep, HashTable};
pub use item::{CacheItem, ExtHeader, ItemFlags};

use crate::core::clock::CoarseClock;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Number of slab classes. Valid user-facing class ids are
/// `1..MAX_CLASSES - 1`.
pub const MAX_CLASSES: usize = 64;

/// LRU segment bases. A slab class id is OR-ed with one of these to name
/// a concrete chain.
pub const HOT_LRU: usize = 0;
pub const WARM_LRU: usize = 64;
pub const COLD_LRU: usize = 128;
pub const TEMP_LRU: usize = 192;

/// Total number of chains: every slab class across all four segments.
pub const POWER_LARGEST: usize = 256;

/// One LRU class: a recency chain behind its class lock.
#[derive(Debug, Default)]
pub struct LruClass {
    pub chain: Mutex<LruChain>,
}

/// Hooks into the optional external (disk) storage tier. Header items
/// (`ItemFlags::HDR`) keep only a descriptor in memory; the tier decides
/// whether that descriptor still points at live data.
pub trait ExternalStorage: Send + Sync {
    /// Whether the page/offset a header item points at is still valid.
    fn validate(&self, item: &CacheItem) -> bool;
    /// Drops the external copy backing a header item being reaped.
    fn delete(&self, item: &CacheItem);
}

/// The cache's shared storage state: all class chains, the hash table,
/// the clock, and the flush epoch.
pub struct CacheState {
    classes: Vec<LruClass>,
    pub hash: HashTable,
    pub clock: CoarseClock,
    /// Coarse timestamp at the last flush-all. Items last touched at or
    /// before it are flushed. 0 = no flush has happened.
    flush_epoch: AtomicU32,
    cas_source: AtomicU64,
    external: Option<Arc<dyn ExternalStorage>>,
}

impl CacheState {
    /// Creates a cache with `1 << hash_power` hash buckets.
    pub fn new(hash_power: u8) -> Self {
        Self {
            classes: (0..POWER_LARGEST).map(|_| LruClass::default()).collect(),
            hash: HashTable::new(hash_power),
            clock: CoarseClock::new(),
            flush_epoch: AtomicU32::new(0),
            cas_source: AtomicU64::new(0),
            external: None,
        }
    }

    /// Attaches the external storage tier's validate/delete hooks.
    pub fn with_external_storage(mut self, external: Arc<dyn ExternalStorage>) -> Self {
        self.external = Some(external);
        self
    }

    pub fn external(&self) -> Option<&Arc<dyn ExternalStorage>> {
        self.external.as_ref()
    }

    pub fn class(&self, id: usize) -> &LruClass {
        &self.classes[id]
    }

    /// Links a freshly built item into the hash table and at the head of
    /// its class chain, stamping CAS, access time, and the chain's
    /// protocol reference.
    pub fn insert(&self, item: CacheItem) -> Arc<CacheItem> {
        let cas = self.cas_source.fetch_add(1, Ordering::Relaxed) + 1;
        item.set_cas(cas);
        item.touch(self.clock.now());
        item.set_refcount(1);
        let arc = Arc::new(item);
        let hv = HashTable::hash_of(arc.key());
        let class = self.class(arc.class_id() as usize);
        // Class lock before bucket lock, same order the crawler uses.
        let mut chain = class.chain.lock();
        self.hash.insert(Arc::clone(&arc), hv);
        chain.push_head(Arc::clone(&arc));
        arc
    }

    /// Unlinks an item from hash and chain, e.g. on explicit delete.
    pub fn remove(&self, key: &[u8]) -> bool {
        let hv = HashTable::hash_of(key);
        let Some(item) = self.hash.get(key, hv) else {
            return false;
        };
        let class = self.class(item.class_id() as usize);
        let mut chain = class.chain.lock();
        let mut bucket = self.hash.lock_bucket(hv);
        HashTable::unlink_locked(&mut bucket, &item);
        if chain.unlink(&item).is_some() {
            item.refcount_decr();
        }
        true
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        let hv = HashTable::hash_of(key);
        self.hash.get(key, hv).is_some()
    }

    /// Retroactively invalidates everything stored up to now.
    pub fn flush_all(&self) {
        self.flush_epoch.store(self.clock.now(), Ordering::Release);
    }

    pub fn flush_epoch(&self) -> u32 {
        self.flush_epoch.load(Ordering::Acquire)
    }

    /// Whether `item` predates the flush epoch.
    pub fn is_flushed(&self, item: &CacheItem) -> bool {
        let epoch = self.flush_epoch();
        epoch != 0 && item.last_access() <= epoch
    }
}
