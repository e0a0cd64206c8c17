//! In-memory eviction index.
//!
//! Mirrors the store's per-record metadata so capacity checks and LRU
//! victim selection never touch storage. Victims come from a min-heap
//! ordered by `(last_access, seq)`; `seq` is a per-index counter bumped on
//! every insert and touch, which breaks ties within the same second in
//! access order and marks superseded heap slots.
//!
//! Touches push a fresh slot instead of re-keying the old one (std's
//! `BinaryHeap` has no decrease-key). Stale slots are skipped when they
//! surface and the heap is rebuilt once they outnumber live entries.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::types::RecordMeta;

#[derive(Debug, Clone, Copy)]
struct Entry {
    size_bytes: u64,
    last_access: i64,
    seq: u64,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Slot {
    last_access: i64,
    seq: u64,
    key: String,
}

#[derive(Debug, Default)]
pub(crate) struct MemoryIndex {
    entries: HashMap<String, Entry>,
    heap: BinaryHeap<Reverse<Slot>>,
    total_bytes: u64,
    next_seq: u64,
}

impl MemoryIndex {
    /// Build an index from a full store scan.
    pub(crate) fn from_scan(mut metas: Vec<RecordMeta>) -> Self {
        metas.sort_by(|a, b| a.last_access.cmp(&b.last_access));
        let mut index = Self::default();
        for meta in metas {
            index.insert(&meta.key, meta.size_bytes, meta.last_access);
        }
        index
    }

    /// Record a write. Returns the size of the entry it replaced.
    pub(crate) fn insert(&mut self, key: &str, size_bytes: u64, last_access: i64) -> Option<u64> {
        let seq = self.bump();
        let previous = self.entries.insert(
            key.to_owned(),
            Entry {
                size_bytes,
                last_access,
                seq,
            },
        );
        if let Some(old) = previous {
            self.total_bytes = self.total_bytes.saturating_sub(old.size_bytes);
        }
        self.total_bytes = self.total_bytes.saturating_add(size_bytes);
        self.heap.push(Reverse(Slot {
            last_access,
            seq,
            key: key.to_owned(),
        }));
        self.maybe_compact();
        previous.map(|e| e.size_bytes)
    }

    /// Record a read.
    pub(crate) fn touch(&mut self, key: &str, last_access: i64) {
        let seq = self.bump();
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        entry.last_access = entry.last_access.max(last_access);
        entry.seq = seq;
        let slot = Slot {
            last_access: entry.last_access,
            seq,
            key: key.to_owned(),
        };
        self.heap.push(Reverse(slot));
        self.maybe_compact();
    }

    /// Forget a key. Returns the size that was accounted to it.
    pub(crate) fn remove(&mut self, key: &str) -> Option<u64> {
        let entry = self.entries.remove(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes);
        Some(entry.size_bytes)
    }

    /// Least-recently-accessed live key, without removing it.
    pub(crate) fn peek_lru(&mut self) -> Option<String> {
        while let Some(Reverse(slot)) = self.heap.peek() {
            let live = self
                .entries
                .get(&slot.key)
                .is_some_and(|e| e.seq == slot.seq);
            if live {
                return Some(slot.key.clone());
            }
            self.heap.pop();
        }
        None
    }

    pub(crate) fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.heap.clear();
        self.total_bytes = 0;
    }

    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn maybe_compact(&mut self) {
        if self.heap.len() <= 2 * self.entries.len() + 64 {
            return;
        }
        let slots: Vec<_> = self
            .entries
            .iter()
            .map(|(key, e)| {
                Reverse(Slot {
                    last_access: e.last_access,
                    seq: e.seq,
                    key: key.clone(),
                })
            })
            .collect();
        self.heap = BinaryHeap::from(slots);
    }
}
