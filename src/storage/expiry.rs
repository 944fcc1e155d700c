//! Expiry Queue
//!
//! A binary min-heap of entries ordered by absolute deadline, with a position
//! index so any key can be removed or re-prioritized in O(log n).
//!
//! ## Ordering
//!
//! ```text
//!   deadline 100 < deadline 250 < ... < never-expiring (0) entries
//! ```
//!
//! Entries that never expire sort after every expiring entry, so the head of
//! the queue is always the entry closest to (or furthest past) its deadline.
//! The active-expiration sweep only ever looks at the head.
//!
//! The queue doubles as the generation's key table: `positions` maps each key
//! to the heap slot currently holding its entry and is rewritten on every swap.

use crate::storage::value::{Entry, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct ExpiryQueue {
    heap: Vec<Entry>,
    positions: HashMap<String, usize>,
}

/// Heap order: expiring entries by deadline, then never-expiring ones.
#[inline]
fn sorts_before(a: &Entry, b: &Entry) -> bool {
    if a.expire_at <= 0 {
        return false;
    }
    if b.expire_at <= 0 {
        return true;
    }
    a.expire_at < b.expire_at
}

impl ExpiryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.positions.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.positions.get(key).map(|&pos| &self.heap[pos])
    }

    /// The entry with the earliest deadline.
    pub fn peek(&self) -> Option<&Entry> {
        self.heap.first()
    }

    /// Inserts an entry, replacing any entry already stored under its key.
    pub fn push(&mut self, entry: Entry) {
        if let Some(&pos) = self.positions.get(&entry.key) {
            self.heap[pos] = entry;
            self.fix(pos);
            return;
        }
        let pos = self.heap.len();
        self.positions.insert(entry.key.clone(), pos);
        self.heap.push(entry);
        self.sift_up(pos);
    }

    /// Rewrites the value and deadline of an existing entry in place.
    ///
    /// Returns `false` if the key is not queued.
    pub fn update(&mut self, key: &str, value: Value, expire_at: i64) -> bool {
        let Some(&pos) = self.positions.get(key) else {
            return false;
        };
        let entry = &mut self.heap[pos];
        entry.value = value;
        entry.expire_at = expire_at;
        self.fix(pos);
        true
    }

    /// Removes the entry stored under `key`.
    pub fn remove(&mut self, key: &str) -> Option<Entry> {
        let pos = self.positions.remove(key)?;
        let last = self.heap.len() - 1;
        if pos != last {
            self.swap(pos, last);
        }
        let entry = self.heap.pop();
        if pos != last {
            self.fix(pos);
        }
        entry
    }

    /// Removes and returns the head of the queue.
    pub fn pop(&mut self) -> Option<Entry> {
        let key = self.heap.first()?.key.clone();
        self.remove(&key)
    }

    /// Iterates entries in heap order (not sorted).
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.heap.iter()
    }

    /// Restores heap order after the entry at `pos` changed its deadline.
    fn fix(&mut self, pos: usize) {
        if !self.sift_down(pos) {
            self.sift_up(pos);
        }
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if !sorts_before(&self.heap[pos], &self.heap[parent]) {
                break;
            }
            self.swap(pos, parent);
            pos = parent;
        }
    }

    /// Returns whether the entry moved.
    fn sift_down(&mut self, start: usize) -> bool {
        let len = self.heap.len();
        let mut pos = start;
        loop {
            let left = 2 * pos + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let mut child = left;
            if right < len && sorts_before(&self.heap[right], &self.heap[left]) {
                child = right;
            }
            if !sorts_before(&self.heap[child], &self.heap[pos]) {
                break;
            }
            self.swap(pos, child);
            pos = child;
        }
        pos > start
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        if let Some(slot) = self.positions.get_mut(&self.heap[i].key) {
            *slot = i;
        }
        if let Some(slot) = self.positions.get_mut(&self.heap[j].key) {
            *slot = j;
        }
    }
}
