// src/core/storage/chain.rs

//! The per-class LRU chain: a doubly linked list of items ordered by
//! recency, with an embedded crawl cursor.
//!
//! The list is slab-backed (`Vec` of nodes linked by index) so unlinking
//! is O(1) and no raw pointers are involved. The crawler's position is an
//! explicit cursor node the chain itself understands: `link_cursor` places
//! it at the tail, and each `cursor_step` swaps it past one item toward
//! the head, handing that item back. Concurrent unlinks of arbitrary
//! items leave the cursor untouched, which is the whole point of linking
//! it into the list instead of keeping an index.
//!
//! All methods expect the owning class lock to be held.

use super::item::{CacheItem, ItemFlags};
use std::sync::Arc;
use std::sync::atomic::Ordering;

const NIL: usize = usize::MAX;

#[derive(Debug)]
enum Entry {
    Item(Arc<CacheItem>),
    Cursor,
}

#[derive(Debug)]
struct Node {
    entry: Entry,
    /// Neighbor toward the head (more recent).
    prev: usize,
    /// Neighbor toward the tail (less recent).
    next: usize,
}

/// One class's recency-ordered chain. Head is the most recently used end.
#[derive(Debug)]
pub struct LruChain {
    nodes: Vec<Node>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
    /// Live items, the cursor excluded.
    len: usize,
    /// Slab slot of the cursor, `NIL` when not linked.
    cursor: usize,
}

impl Default for LruChain {
    fn default() -> Self {
        Self::new()
    }
}

impl LruChain {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            len: 0,
            cursor: NIL,
        }
    }

    /// Number of items in the chain (the cursor does not count).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn has_cursor(&self) -> bool {
        self.cursor != NIL
    }

    fn alloc(&mut self, entry: Entry) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Node {
                    entry,
                    prev: NIL,
                    next: NIL,
                };
                slot
            }
            None => {
                self.nodes.push(Node {
                    entry,
                    prev: NIL,
                    next: NIL,
                });
                self.nodes.len() - 1
            }
        }
    }

    fn detach(&mut self, slot: usize) {
        let (prev, next) = (self.nodes[slot].prev, self.nodes[slot].next);
        if prev == NIL {
            self.head = next;
        } else {
            self.nodes[prev].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.nodes[next].prev = prev;
        }
        self.nodes[slot].prev = NIL;
        self.nodes[slot].next = NIL;
    }

    /// Links `slot` directly on the head side of `before`.
    fn attach_before(&mut self, slot: usize, before: usize) {
        let prev = self.nodes[before].prev;
        self.nodes[slot].prev = prev;
        self.nodes[slot].next = before;
        self.nodes[before].prev = slot;
        if prev == NIL {
            self.head = slot;
        } else {
            self.nodes[prev].next = slot;
        }
    }

    /// Links a freshly stored item at the head of the chain.
    pub fn push_head(&mut self, item: Arc<CacheItem>) {
        let slot = self.alloc(Entry::Item(item));
        let old_head = self.head;
        self.nodes[slot].next = old_head;
        if old_head == NIL {
            self.tail = slot;
        } else {
            self.nodes[old_head].prev = slot;
        }
        self.head = slot;
        if let Entry::Item(it) = &self.nodes[slot].entry {
            it.chain_slot.store(slot, Ordering::Relaxed);
            it.add_flags(ItemFlags::LINKED);
        }
        self.len += 1;
    }

    /// Unlinks `item` from wherever it sits in the chain, returning the
    /// chain's reference to it. The cursor, if linked, is unaffected.
    pub fn unlink(&mut self, item: &CacheItem) -> Option<Arc<CacheItem>> {
        let slot = item.chain_slot.load(Ordering::Relaxed);
        if slot == NIL || slot >= self.nodes.len() {
            return None;
        }
        match &self.nodes[slot].entry {
            Entry::Item(linked) if std::ptr::eq(linked.as_ref(), item) => {}
            _ => return None,
        }
        self.detach(slot);
        let taken = std::mem::replace(&mut self.nodes[slot].entry, Entry::Cursor);
        self.free.push(slot);
        self.len -= 1;
        match taken {
            Entry::Item(arc) => {
                arc.chain_slot.store(NIL, Ordering::Relaxed);
                arc.remove_flags(ItemFlags::LINKED);
                Some(arc)
            }
            Entry::Cursor => None,
        }
    }

    /// Places the crawl cursor at the tail of the chain. At most one
    /// cursor can be linked at a time.
    pub fn link_cursor(&mut self) {
        debug_assert_eq!(self.cursor, NIL, "chain already has a cursor");
        let slot = self.alloc(Entry::Cursor);
        let old_tail = self.tail;
        self.nodes[slot].prev = old_tail;
        if old_tail == NIL {
            self.head = slot;
        } else {
            self.nodes[old_tail].next = slot;
        }
        self.tail = slot;
        self.cursor = slot;
    }

    /// Removes the crawl cursor from the chain.
    pub fn unlink_cursor(&mut self) {
        if self.cursor == NIL {
            return;
        }
        let slot = self.cursor;
        self.detach(slot);
        self.free.push(slot);
        self.cursor = NIL;
    }

    /// The item the cursor would swap past next, without moving it.
    /// Lets the scanner take the item's bucket lock first and leave the
    /// cursor untouched when that lock is contended.
    pub fn cursor_peek(&self) -> Option<Arc<CacheItem>> {
        debug_assert_ne!(self.cursor, NIL, "cursor_peek without a linked cursor");
        let candidate = self.nodes[self.cursor].prev;
        if candidate == NIL {
            return None;
        }
        match &self.nodes[candidate].entry {
            Entry::Item(item) => Some(Arc::clone(item)),
            Entry::Cursor => None,
        }
    }

    /// Swaps the cursor past one item toward the head and returns that
    /// item. `None` means the cursor has reached the head and the class
    /// is finished.
    pub fn cursor_step(&mut self) -> Option<Arc<CacheItem>> {
        debug_assert_ne!(self.cursor, NIL, "cursor_step without a linked cursor");
        let candidate = self.nodes[self.cursor].prev;
        if candidate == NIL {
            return None;
        }
        let slot = self.cursor;
        self.detach(slot);
        self.attach_before(slot, candidate);
        match &self.nodes[candidate].entry {
            Entry::Item(item) => Some(Arc::clone(item)),
            // A second cursor can never be linked, so the candidate is
            // always an item.
            Entry::Cursor => None,
        }
    }
}
