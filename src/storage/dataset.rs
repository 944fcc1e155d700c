//! Dataset: Expiring Table with Live Snapshots
//!
//! A dataset holds one generation of entries in normal operation. A snapshot
//! cycle temporarily splits it in two:
//!
//! ```text
//!            freeze()                  to_move()                drained
//!   Live ─────────────────> Frozen ─────────────────> Moving ─────────────> Live
//!                           data: new writes          data: new writes
//!                           old:  read-only snapshot  old:  migrating back into data
//! ```
//!
//! While frozen, the old generation is shared with the snapshot consumer and
//! never mutated. Deletes of frozen keys are recorded in the new generation as
//! already-expired markers, which shadow the frozen entry until migration
//! discards both. While moving, every `get`/`set` migrates a small batch of
//! old entries back into the live generation.
//!
//! ## Expiration
//!
//! - **Lazy**: a found entry past its deadline reads as absent.
//! - **Active**: `get`, `set` and `delete` first pop up to [`SWEEP_BATCH`]
//!   expired entries from the head of the live generation's queue.
//!
//! Datasets have no internal locking. The processor is their only caller.

use crate::storage::expiry::ExpiryQueue;
use crate::storage::value::{unix_nanos, Entry, Value};
use crate::storage::watch::WatchRegistry;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;

/// Expired entries removed per active-expiration sweep.
pub const SWEEP_BATCH: usize = 10;

/// Frozen entries migrated back per `get`/`set` while moving.
pub const MIGRATE_BATCH: usize = 10;

/// Deadline given to delete markers. Sorts ahead of every real deadline.
const DELETED_AT: i64 = 1;

/// Snapshot state machine violations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("dataset {0} is already frozen")]
    AlreadyFrozen(usize),

    #[error("dataset {0} is still migrating its previous snapshot")]
    StillMoving(usize),

    #[error("dataset {0} is not frozen")]
    NotFrozen(usize),

    #[error("no dataset with index {0}")]
    NoSuchDataset(usize),
}

/// Snapshot phase of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Live,
    Frozen,
    Moving,
}

/// Read-only handle on a dataset's frozen generation.
///
/// Cheap to clone and safe to send to another task. Holding it past
/// `to_move` forces the dataset to copy the generation before migrating.
#[derive(Debug, Clone)]
pub struct FrozenSnapshot {
    dataset: usize,
    generation: Arc<ExpiryQueue>,
}

impl FrozenSnapshot {
    pub fn dataset(&self) -> usize {
        self.dataset
    }

    pub fn len(&self) -> usize {
        self.generation.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generation.is_empty()
    }

    /// Every entry of the frozen generation, including expired ones.
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.generation.iter()
    }

    /// Entries still live at `now`.
    pub fn live_entries(&self, now: i64) -> impl Iterator<Item = &Entry> {
        self.generation.iter().filter(move |e| !e.is_expired(now))
    }
}

#[derive(Debug)]
pub struct Dataset {
    index: usize,
    data: ExpiryQueue,
    old: Option<Arc<ExpiryQueue>>,
    phase: Phase,
    watch: WatchRegistry,
}

impl Dataset {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            data: ExpiryQueue::new(),
            old: None,
            phase: Phase::Live,
            watch: WatchRegistry::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Entries physically held across both generations, expired ones included.
    pub fn physical_len(&self) -> usize {
        self.data.len() + self.old.as_ref().map_or(0, |old| old.len())
    }

    pub fn watch_registry(&self) -> &WatchRegistry {
        &self.watch
    }

    pub fn watch_registry_mut(&mut self) -> &mut WatchRegistry {
        &mut self.watch
    }

    pub fn get(&mut self, key: &str) -> Option<Value> {
        self.get_at(key, unix_nanos())
    }

    /// Looks `key` up as of `now`.
    pub fn get_at(&mut self, key: &str, now: i64) -> Option<Value> {
        self.sweep(now);
        if self.phase == Phase::Moving {
            self.migrate_at(now);
        }

        if let Some(entry) = self.data.get(key) {
            if !entry.is_expired(now) {
                return Some(entry.value.clone());
            }
            if self.phase == Phase::Live {
                self.data.remove(key);
            }
            return None;
        }

        self.old
            .as_ref()
            .and_then(|old| old.get(key))
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone())
    }

    pub fn set(&mut self, key: &str, value: Value, expire_at: i64) -> Value {
        self.set_at(key, value, expire_at, unix_nanos())
    }

    /// Stores `value` under `key` with an absolute deadline (0 = never).
    pub fn set_at(&mut self, key: &str, value: Value, expire_at: i64, now: i64) -> Value {
        self.sweep(now);
        if self.phase == Phase::Moving {
            self.migrate_at(now);
            self.remove_frozen(key);
        }

        if !self.data.update(key, value.clone(), expire_at) {
            self.data.push(Entry::new(key, value.clone(), expire_at));
        }
        value
    }

    pub fn delete(&mut self, key: &str) -> bool {
        self.delete_at(key, unix_nanos())
    }

    /// Removes `key`. Returns whether a live value was removed.
    pub fn delete_at(&mut self, key: &str, now: i64) -> bool {
        self.sweep(now);
        let existed = self.lookup_live(key, now);

        match self.phase {
            Phase::Live => {
                self.data.remove(key);
            }
            Phase::Frozen => {
                if self.frozen_contains(key) {
                    self.data
                        .push(Entry::new(key, Value::Bytes(Bytes::new()), DELETED_AT));
                } else {
                    self.data.remove(key);
                }
            }
            Phase::Moving => {
                self.data.remove(key);
                self.remove_frozen(key);
            }
        }
        existed
    }

    /// Moves the current generation aside for reading. New writes start a
    /// fresh generation.
    pub fn freeze(&mut self) -> Result<(), SnapshotError> {
        match self.phase {
            Phase::Frozen => return Err(SnapshotError::AlreadyFrozen(self.index)),
            Phase::Moving if self.old.as_ref().is_some_and(|old| !old.is_empty()) => {
                return Err(SnapshotError::StillMoving(self.index));
            }
            _ => {}
        }

        let current = std::mem::take(&mut self.data);
        self.old = Some(Arc::new(current));
        self.phase = Phase::Frozen;
        Ok(())
    }

    /// Handle on the frozen generation. Only available while frozen.
    pub fn frozen_snapshot(&self) -> Option<FrozenSnapshot> {
        if self.phase != Phase::Frozen {
            return None;
        }
        self.old.as_ref().map(|generation| FrozenSnapshot {
            dataset: self.index,
            generation: Arc::clone(generation),
        })
    }

    /// Ends the frozen window and starts migrating the old generation back.
    pub fn to_move(&mut self) -> Result<(), SnapshotError> {
        if self.phase != Phase::Frozen {
            return Err(SnapshotError::NotFrozen(self.index));
        }
        self.phase = Phase::Moving;
        if self.old.as_ref().map_or(true, |old| old.is_empty()) {
            self.finish_move();
        }
        Ok(())
    }

    /// Migrates one batch of frozen entries. Returns whether migration is
    /// still in progress afterwards.
    pub fn migrate(&mut self) -> bool {
        self.migrate_at(unix_nanos())
    }

    fn migrate_at(&mut self, now: i64) -> bool {
        if self.phase != Phase::Moving {
            return false;
        }
        if let Some(old) = self.old.as_mut() {
            let old = Arc::make_mut(old);
            for _ in 0..MIGRATE_BATCH {
                let Some(entry) = old.pop() else { break };
                // A key rewritten since the freeze already holds its newest value.
                if entry.is_expired(now) || self.data.contains_key(&entry.key) {
                    continue;
                }
                self.data.push(entry);
            }
            if !old.is_empty() {
                return true;
            }
        }
        self.finish_move();
        false
    }

    fn finish_move(&mut self) {
        self.old = None;
        self.phase = Phase::Live;
    }

    /// Pops expired entries from the head of the live generation.
    ///
    /// While frozen, an expired entry shadowing a frozen key stops the sweep.
    /// Delete markers sort first, so one of them pauses active expiration
    /// until the dataset starts moving; lazy expiration still hides every
    /// expired key in the meantime.
    fn sweep(&mut self, now: i64) {
        for _ in 0..SWEEP_BATCH {
            let Some(head) = self.data.peek() else { break };
            if !head.is_expired(now) {
                break;
            }
            // An expired entry that shadows a frozen one must outlive it.
            if self.frozen_contains(&head.key) {
                if self.phase == Phase::Frozen {
                    break;
                }
                let key = head.key.clone();
                self.remove_frozen(&key);
            }
            self.data.pop();
        }
    }

    fn lookup_live(&self, key: &str, now: i64) -> bool {
        match self.data.get(key) {
            Some(entry) => !entry.is_expired(now),
            None => self
                .old
                .as_ref()
                .and_then(|old| old.get(key))
                .is_some_and(|entry| !entry.is_expired(now)),
        }
    }

    fn frozen_contains(&self, key: &str) -> bool {
        self.old.as_ref().is_some_and(|old| old.contains_key(key))
    }

    fn remove_frozen(&mut self, key: &str) {
        if self.phase == Phase::Frozen || !self.frozen_contains(key) {
            return;
        }
        if let Some(old) = self.old.as_mut() {
            Arc::make_mut(old).remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_000_000;

    fn bytes(s: &str) -> Value {
        Value::from(s)
    }

    fn drain(ds: &mut Dataset, now: i64) {
        while ds.migrate_at(now) {}
    }

    #[test]
    fn test_set_then_get() {
        let mut ds = Dataset::new(0);
        assert_eq!(ds.set_at("a", bytes("1"), 0, NOW), bytes("1"));
        assert_eq!(ds.get_at("a", NOW), Some(bytes("1")));
        assert_eq!(ds.get_at("missing", NOW), None);
    }

    #[test]
    fn test_lazy_expiration() {
        let mut ds = Dataset::new(0);
        ds.set_at("a", bytes("1"), NOW + 10, NOW);
        assert_eq!(ds.get_at("a", NOW + 9), Some(bytes("1")));
        assert_eq!(ds.get_at("a", NOW + 10), None);
    }

    #[test]
    fn test_rearm_overwrites_deadline() {
        let mut ds = Dataset::new(0);
        ds.set_at("a", bytes("v1"), NOW + 10, NOW);
        ds.set_at("a", bytes("v2"), NOW + 100, NOW + 5);
        assert_eq!(ds.get_at("a", NOW + 50), Some(bytes("v2")));
        assert_eq!(ds.get_at("a", NOW + 100), None);
    }

    #[test]
    fn test_active_sweep_is_batched() {
        let mut ds = Dataset::new(0);
        for i in 0..25 {
            ds.set_at(&format!("k{}", i), Value::Int(i), NOW + 1, NOW);
        }
        ds.set_at("keep", Value::Int(0), 0, NOW);
        assert_eq!(ds.physical_len(), 26);

        ds.get_at("nothing", NOW + 2);
        assert_eq!(ds.physical_len(), 26 - SWEEP_BATCH);
        ds.get_at("nothing", NOW + 2);
        ds.get_at("nothing", NOW + 2);
        assert_eq!(ds.physical_len(), 1);
        assert_eq!(ds.get_at("keep", NOW + 2), Some(Value::Int(0)));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let mut ds = Dataset::new(0);
        ds.set_at("a", bytes("1"), 0, NOW);
        assert!(ds.delete_at("a", NOW));
        assert!(!ds.delete_at("a", NOW));
        assert_eq!(ds.get_at("a", NOW), None);
    }

    #[test]
    fn test_freeze_snapshot_matches_pre_freeze_state() {
        let mut ds = Dataset::new(3);
        for i in 0..30 {
            ds.set_at(&format!("k{}", i), Value::Int(i), 0, NOW);
        }
        ds.freeze().unwrap();
        let snapshot = ds.frozen_snapshot().unwrap();
        assert_eq!(snapshot.dataset(), 3);

        ds.set_at("k0", Value::Int(-1), 0, NOW);
        ds.set_at("new", Value::Int(99), 0, NOW);

        let mut keys: Vec<_> = snapshot.entries().map(|e| e.key.clone()).collect();
        keys.sort();
        let mut expected: Vec<_> = (0..30).map(|i| format!("k{}", i)).collect();
        expected.sort();
        assert_eq!(keys, expected);
        assert!(snapshot
            .entries()
            .all(|e| e.value == Value::Int(e.key[1..].parse().unwrap())));

        // writes during the frozen window are visible immediately
        assert_eq!(ds.get_at("k0", NOW), Some(Value::Int(-1)));
        assert_eq!(ds.get_at("new", NOW), Some(Value::Int(99)));
        assert_eq!(ds.get_at("k7", NOW), Some(Value::Int(7)));
    }

    #[test]
    fn test_move_drains_back_to_live() {
        let mut ds = Dataset::new(0);
        for i in 0..45 {
            ds.set_at(&format!("k{}", i), Value::Int(i), 0, NOW);
        }
        ds.freeze().unwrap();
        drop(ds.frozen_snapshot());
        ds.set_at("k1", Value::Int(100), 0, NOW);
        ds.to_move().unwrap();
        assert_eq!(ds.phase(), Phase::Moving);

        // one batch is not enough to drain 45 entries
        ds.set_at("extra", Value::Int(0), 0, NOW);
        assert_eq!(ds.phase(), Phase::Moving);
        assert_eq!(ds.get_at("k1", NOW), Some(Value::Int(100)));

        drain(&mut ds, NOW);
        assert_eq!(ds.phase(), Phase::Live);
        for i in 2..45 {
            assert_eq!(ds.get_at(&format!("k{}", i), NOW), Some(Value::Int(i)));
        }
        assert_eq!(ds.get_at("k1", NOW), Some(Value::Int(100)));
        assert_eq!(ds.physical_len(), 46);
    }

    #[test]
    fn test_delete_while_frozen_hides_frozen_entry() {
        let mut ds = Dataset::new(0);
        ds.set_at("a", bytes("1"), 0, NOW);
        ds.set_at("b", bytes("2"), 0, NOW);
        ds.freeze().unwrap();

        assert!(ds.delete_at("a", NOW));
        assert!(!ds.delete_at("a", NOW));
        assert_eq!(ds.get_at("a", NOW), None);
        // frozen generation is untouched
        let snapshot = ds.frozen_snapshot().unwrap();
        assert_eq!(snapshot.len(), 2);

        // the marker survives sweeps while frozen
        for _ in 0..5 {
            assert_eq!(ds.get_at("a", NOW + 10), None);
        }

        ds.to_move().unwrap();
        drop(snapshot);
        drain(&mut ds, NOW);
        assert_eq!(ds.get_at("a", NOW), None);
        assert_eq!(ds.get_at("b", NOW), Some(bytes("2")));
    }

    #[test]
    fn test_marker_pauses_sweep_until_moving() {
        let mut ds = Dataset::new(0);
        ds.set_at("a", bytes("1"), 0, NOW);
        ds.freeze().unwrap();
        ds.delete_at("a", NOW);
        for i in 0..15 {
            ds.set_at(&format!("k{}", i), Value::Int(i), NOW + 1, NOW);
        }
        assert_eq!(ds.physical_len(), 17);

        // expired keys stay physically present but are never returned
        for i in 0..15 {
            assert_eq!(ds.get_at(&format!("k{}", i), NOW + 2), None);
        }
        assert_eq!(ds.physical_len(), 17);

        ds.to_move().unwrap();
        drain(&mut ds, NOW + 2);
        assert_eq!(ds.phase(), Phase::Live);
        assert_eq!(ds.physical_len(), 16);

        ds.get_at("nothing", NOW + 2);
        ds.get_at("nothing", NOW + 2);
        assert_eq!(ds.physical_len(), 0);
    }

    #[test]
    fn test_delete_while_moving_removes_both_generations() {
        let mut ds = Dataset::new(0);
        for i in 0..40 {
            ds.set_at(&format!("k{}", i), Value::Int(i), 0, NOW);
        }
        ds.freeze().unwrap();
        ds.to_move().unwrap();
        for i in 0..40 {
            ds.delete_at(&format!("k{}", i), NOW);
        }
        assert_eq!(ds.physical_len(), 0);
        drain(&mut ds, NOW);
        assert_eq!(ds.phase(), Phase::Live);
    }

    #[test]
    fn test_expired_write_in_new_generation_does_not_resurrect() {
        let mut ds = Dataset::new(0);
        ds.set_at("a", bytes("old"), 0, NOW);
        ds.freeze().unwrap();
        ds.set_at("a", bytes("short"), NOW + 5, NOW);
        assert_eq!(ds.get_at("a", NOW + 6), None);
        ds.to_move().unwrap();
        assert_eq!(ds.get_at("a", NOW + 6), None);
        drain(&mut ds, NOW + 6);
        assert_eq!(ds.get_at("a", NOW + 6), None);
    }

    #[test]
    fn test_snapshot_state_machine_errors() {
        let mut ds = Dataset::new(2);
        assert_eq!(ds.to_move(), Err(SnapshotError::NotFrozen(2)));
        assert!(ds.frozen_snapshot().is_none());

        ds.set_at("a", bytes("1"), 0, NOW);
        ds.freeze().unwrap();
        assert_eq!(ds.freeze(), Err(SnapshotError::AlreadyFrozen(2)));
        ds.to_move().unwrap();
        assert_eq!(ds.freeze(), Err(SnapshotError::StillMoving(2)));
        assert_eq!(ds.to_move(), Err(SnapshotError::NotFrozen(2)));

        drain(&mut ds, NOW);
        ds.freeze().unwrap();
        assert_eq!(ds.frozen_snapshot().map(|s| s.len()), Some(1));
    }

    #[test]
    fn test_empty_freeze_returns_to_live_on_move() {
        let mut ds = Dataset::new(0);
        ds.freeze().unwrap();
        assert!(ds.frozen_snapshot().unwrap().is_empty());
        ds.to_move().unwrap();
        assert_eq!(ds.phase(), Phase::Live);
    }

    #[test]
    fn test_snapshot_held_across_move_is_copied() {
        let mut ds = Dataset::new(0);
        for i in 0..20 {
            ds.set_at(&format!("k{}", i), Value::Int(i), 0, NOW);
        }
        ds.freeze().unwrap();
        let snapshot = ds.frozen_snapshot().unwrap();
        ds.to_move().unwrap();
        drain(&mut ds, NOW);
        assert_eq!(snapshot.len(), 20);
        assert_eq!(ds.get_at("k19", NOW), Some(Value::Int(19)));
    }

    #[test]
    fn test_live_entries_skip_expired() {
        let mut ds = Dataset::new(0);
        ds.set_at("gone", bytes("x"), NOW + 1, NOW);
        ds.set_at("kept", bytes("y"), NOW + 100, NOW);
        ds.freeze().unwrap();
        let snapshot = ds.frozen_snapshot().unwrap();
        let live: Vec<_> = snapshot.live_entries(NOW + 50).map(|e| e.key.as_str()).collect();
        assert_eq!(live, ["kept"]);
    }
}
