// src/core/storage/item.rs

//! Defines `CacheItem`, the unit of storage the LRU chains and the hash
//! table both link, plus its flag bits and reference-count protocol.

use bitflags::bitflags;
use bytes::Bytes;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, AtomicUsize, Ordering};

bitflags! {
    /// Flag bits describing an item's lifecycle and payload shape.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ItemFlags: u8 {
        /// The item is linked into its class chain and the hash table.
        const LINKED     = 1 << 0;
        /// The item has been fetched at least once since it was stored.
        const FETCHED    = 1 << 1;
        /// The key is raw binary and must be base64-encoded for text output.
        const KEY_BINARY = 1 << 2;
        /// The payload lives in the external storage tier; `data` holds
        /// only the 8-byte page/offset descriptor.
        const HDR        = 1 << 3;
    }
}

/// The page/offset descriptor an external-storage header item carries in
/// place of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtHeader {
    pub page: u32,
    pub offset: u32,
}

impl ExtHeader {
    /// Reads the descriptor from the first 8 bytes of a header item's
    /// payload. Copies into fixed arrays so the read is safe on platforms
    /// that fault on unaligned access.
    pub fn decode(data: &[u8]) -> Option<Self> {
        let bytes: &[u8; 8] = data.get(..8)?.try_into().ok()?;
        let mut page = [0u8; 4];
        let mut offset = [0u8; 4];
        page.copy_from_slice(&bytes[..4]);
        offset.copy_from_slice(&bytes[4..]);
        Some(Self {
            page: u32::from_le_bytes(page),
            offset: u32::from_le_bytes(offset),
        })
    }

    pub fn encode(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.page.to_le_bytes());
        out[4..].copy_from_slice(&self.offset.to_le_bytes());
        out
    }
}

/// A single cache entry.
///
/// Items are shared between the hash table, their class chain, and any
/// in-flight readers via `Arc`. On top of that, `refcount` tracks the
/// *protocol* references: the chain's link counts as one, and any actor
/// that wants to work on the item must hold a second. The crawler only
/// touches items whose refcount it has raised from exactly 1 to 2;
/// anything else is in a transitional state and gets skipped.
#[derive(Debug)]
pub struct CacheItem {
    key: Bytes,
    data: Bytes,
    /// Expiration, in coarse seconds since process start. 0 = never.
    exptime: u32,
    last_access: AtomicU32,
    cas: AtomicU64,
    client_flags: u32,
    class_id: u8,
    flags: AtomicU8,
    refcount: AtomicU32,
    /// Slot index inside the owning chain's slab. Written by the chain,
    /// only ever under the class lock.
    pub(super) chain_slot: AtomicUsize,
}

impl CacheItem {
    pub fn new(key: Bytes, data: Bytes, exptime: u32, class_id: u8, client_flags: u32) -> Self {
        Self {
            key,
            data,
            exptime,
            last_access: AtomicU32::new(0),
            cas: AtomicU64::new(0),
            client_flags,
            class_id,
            flags: AtomicU8::new(0),
            refcount: AtomicU32::new(0),
            chain_slot: AtomicUsize::new(usize::MAX),
        }
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn exptime(&self) -> u32 {
        self.exptime
    }

    pub fn class_id(&self) -> u8 {
        self.class_id
    }

    pub fn client_flags(&self) -> u32 {
        self.client_flags
    }

    pub fn cas(&self) -> u64 {
        self.cas.load(Ordering::Relaxed)
    }

    pub(super) fn set_cas(&self, cas: u64) {
        self.cas.store(cas, Ordering::Relaxed);
    }

    /// Total in-memory footprint: struct overhead plus key and payload.
    pub fn total_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.key.len() + self.data.len()
    }

    pub fn flags(&self) -> ItemFlags {
        ItemFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub fn add_flags(&self, flags: ItemFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub fn remove_flags(&self, flags: ItemFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    pub fn has_flag(&self, flag: ItemFlags) -> bool {
        self.flags().contains(flag)
    }

    pub fn last_access(&self) -> u32 {
        self.last_access.load(Ordering::Relaxed)
    }

    /// Stamps the last-access time, as a fetch or a store would.
    pub fn touch(&self, now: u32) {
        self.last_access.store(now, Ordering::Relaxed);
    }

    /// `exptime != 0 && exptime < now`. A zero expiration never expires.
    pub fn is_expired(&self, now: u32) -> bool {
        self.exptime != 0 && self.exptime < now
    }

    /// Seconds of TTL left, `None` for items that never expire.
    pub fn remaining_ttl(&self, now: u32) -> Option<u32> {
        if self.exptime == 0 {
            None
        } else {
            Some(self.exptime.saturating_sub(now))
        }
    }

    /// The external-storage descriptor, for `HDR` items only.
    pub fn ext_header(&self) -> Option<ExtHeader> {
        if self.has_flag(ItemFlags::HDR) {
            ExtHeader::decode(&self.data)
        } else {
            None
        }
    }

    /// Bumps the protocol refcount and returns the post-increment value.
    /// Callers that observe anything other than 2 must revert with
    /// `refcount_decr` and leave the item alone.
    pub fn refcount_incr(&self) -> u32 {
        self.refcount.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drops one protocol reference, returning the post-decrement value.
    pub fn refcount_decr(&self) -> u32 {
        self.refcount.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Acquire)
    }

    pub(super) fn set_refcount(&self, count: u32) {
        self.refcount.store(count, Ordering::Release);
    }
}
