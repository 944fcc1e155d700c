//! Watch Registry
//!
//! Per-dataset map from a watched key to the sessions watching it, in the
//! order they started watching. A key disappears from the registry when its
//! last watcher leaves.

use std::collections::HashMap;

/// Identifier of a client session, assigned by the processor.
pub type SessionId = u64;

#[derive(Debug, Default)]
pub struct WatchRegistry {
    keys: HashMap<String, Vec<SessionId>>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `session` as a watcher of `key`.
    ///
    /// Returns `false` if it was already watching.
    pub fn watch(&mut self, session: SessionId, key: &str) -> bool {
        let watchers = self.keys.entry(key.to_string()).or_default();
        if watchers.contains(&session) {
            return false;
        }
        watchers.push(session);
        true
    }

    /// Removes `session` from the watchers of `key`.
    pub fn unwatch(&mut self, session: SessionId, key: &str) {
        if let Some(watchers) = self.keys.get_mut(key) {
            watchers.retain(|&id| id != session);
            if watchers.is_empty() {
                self.keys.remove(key);
            }
        }
    }

    /// Sessions watching `key`.
    pub fn watchers(&self, key: &str) -> &[SessionId] {
        self.keys.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of keys with at least one watcher.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
