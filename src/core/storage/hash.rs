// src/core/storage/hash.rs

//! The global hash table: a fixed power-of-two array of chained buckets,
//! each behind its own mutex.
//!
//! Bucket layout and expansion are deliberately minimal here; what the
//! crawler depends on is the *iterator contract*: an iterator can only be
//! obtained while no expansion is marked in progress, a live iterator
//! pins the table against expansion until it is dropped, and each step
//! yields either one item or a "between buckets" marker.

use super::item::CacheItem;
use parking_lot::{Mutex, MutexGuard};
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Seed for the key hash. Fixed so hash values are stable for a process
/// lifetime; bucket selection does not need DoS-resistant randomness
/// inside the engine's own test surface.
const HASH_SEED: u32 = 0x7f0c_a5e3;

/// A locked bucket, handed to callers that need to unlink under the lock.
pub type BucketGuard<'a> = MutexGuard<'a, Vec<Arc<CacheItem>>>;

/// One step of a hash-table walk.
pub enum HashStep {
    /// The next item in the current bucket.
    Item(Arc<CacheItem>),
    /// The walk moved past the end of a bucket; no item this step.
    BucketDone,
    /// Every bucket has been visited.
    Done,
}

#[derive(Debug)]
pub struct HashTable {
    buckets: Box<[Mutex<Vec<Arc<CacheItem>>>]>,
    mask: u64,
    expanding: AtomicBool,
    active_iterators: AtomicUsize,
}

impl HashTable {
    /// Creates a table with `1 << power` buckets.
    pub fn new(power: u8) -> Self {
        let count = 1usize << power;
        let buckets = (0..count)
            .map(|_| Mutex::new(Vec::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            buckets,
            mask: (count as u64) - 1,
            expanding: AtomicBool::new(false),
            active_iterators: AtomicUsize::new(0),
        }
    }

    /// Murmur3 hash of a key. `Cursor` reads are infallible, so the
    /// `io::Result` the crate signature carries can never be `Err`.
    pub fn hash_of(key: &[u8]) -> u64 {
        let mut cursor = Cursor::new(key);
        u64::from(murmur3::murmur3_32(&mut cursor, HASH_SEED).unwrap_or_default())
    }

    fn bucket_for(&self, hv: u64) -> &Mutex<Vec<Arc<CacheItem>>> {
        &self.buckets[(hv & self.mask) as usize]
    }

    pub fn insert(&self, item: Arc<CacheItem>, hv: u64) {
        self.bucket_for(hv).lock().push(item);
    }

    /// Non-blocking acquisition of the bucket covering `hv`. The per-class
    /// scanner uses this so it never waits on a bucket while holding a
    /// class lock.
    pub fn try_lock_bucket(&self, hv: u64) -> Option<BucketGuard<'_>> {
        self.bucket_for(hv).try_lock()
    }

    pub fn lock_bucket(&self, hv: u64) -> BucketGuard<'_> {
        self.bucket_for(hv).lock()
    }

    /// Removes `item` from an already-locked bucket. Identity is by
    /// allocation, not key, so a racing re-store of the same key is never
    /// unlinked by mistake.
    pub fn unlink_locked(bucket: &mut BucketGuard<'_>, item: &CacheItem) -> bool {
        if let Some(pos) = bucket.iter().position(|it| std::ptr::eq(it.as_ref(), item)) {
            bucket.swap_remove(pos);
            true
        } else {
            false
        }
    }

    pub fn get(&self, key: &[u8], hv: u64) -> Option<Arc<CacheItem>> {
        self.bucket_for(hv)
            .lock()
            .iter()
            .find(|it| it.key().as_ref() == key)
            .cloned()
    }

    /// Marks an expansion as in progress. Refused while any iterator is
    /// live, mirroring how a walk pins the table.
    pub fn set_expanding(&self, on: bool) -> bool {
        if on {
            if self.active_iterators.load(Ordering::Acquire) > 0 {
                return false;
            }
            self.expanding.store(true, Ordering::Release);
        } else {
            self.expanding.store(false, Ordering::Release);
        }
        true
    }

    /// Begins a table walk. `None` while an expansion is marked in
    /// progress; the caller reports "locked" and retries later.
    pub fn iterator(&self) -> Option<HashIterator<'_>> {
        if self.expanding.load(Ordering::Acquire) {
            return None;
        }
        self.active_iterators.fetch_add(1, Ordering::AcqRel);
        // Re-check so an expansion that won the race is not pinned out.
        if self.expanding.load(Ordering::Acquire) {
            self.active_iterators.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        Some(HashIterator {
            table: self,
            bucket: 0,
            pos: 0,
        })
    }

    pub fn active_iterators(&self) -> usize {
        self.active_iterators.load(Ordering::Acquire)
    }
}

/// A cursor over every bucket of the table. Holding one blocks expansion;
/// dropping it is the mandatory release.
pub struct HashIterator<'a> {
    table: &'a HashTable,
    bucket: usize,
    pos: usize,
}

impl HashIterator<'_> {
    /// Advances the walk by one step. Items are cloned out under the
    /// bucket lock; the refcount gate the caller applies afterwards is
    /// what excludes items in transitional states.
    pub fn next_step(&mut self) -> HashStep {
        if self.bucket >= self.table.buckets.len() {
            return HashStep::Done;
        }
        let bucket = self.table.buckets[self.bucket].lock();
        if self.pos < bucket.len() {
            let item = Arc::clone(&bucket[self.pos]);
            self.pos += 1;
            HashStep::Item(item)
        } else {
            drop(bucket);
            self.bucket += 1;
            self.pos = 0;
            HashStep::BucketDone
        }
    }
}

impl Drop for HashIterator<'_> {
    fn drop(&mut self) {
        self.table.active_iterators.fetch_sub(1, Ordering::AcqRel);
    }
}
