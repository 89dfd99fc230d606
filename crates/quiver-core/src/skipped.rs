//! Bounded cache of message keys for messages that have not arrived yet.
//!
//! Entries are stored flat, keyed by whatever identifies a chain position
//! (remote ratchet key and index for sessions, iteration for sender keys).
//! Insertion order doubles as eviction order: when the cache is full the
//! oldest entry is dropped and that message becomes undecryptable.

use std::collections::VecDeque;

use quiver_crypto::MessageKeys;
use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize, Deserialize)]
struct Entry<K> {
    position: K,
    keys: MessageKeys,
}

/// Skipped message keys, oldest first.
#[derive(Clone, Serialize, Deserialize)]
pub(crate) struct SkippedKeys<K> {
    entries: VecDeque<Entry<K>>,
}

impl<K: PartialEq> SkippedKeys<K> {
    pub(crate) fn new() -> Self {
        Self { entries: VecDeque::new() }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn contains(&self, position: &K) -> bool {
        self.entries.iter().any(|entry| entry.position == *position)
    }

    /// Insert keys, evicting the oldest entries so at most `capacity` remain.
    pub(crate) fn insert(&mut self, position: K, keys: MessageKeys, capacity: usize) {
        if capacity == 0 {
            return;
        }
        while self.entries.len() >= capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(Entry { position, keys });
    }

    /// Remove and return the keys at `position`. Each key comes out at most
    /// once.
    pub(crate) fn take(&mut self, position: &K) -> Option<MessageKeys> {
        let slot = self.entries.iter().position(|entry| entry.position == *position)?;
        self.entries.remove(slot).map(|entry| entry.keys)
    }
}

impl<K: PartialEq> Default for SkippedKeys<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use quiver_crypto::ChainKey;

    use super::*;

    fn keys_at(index: u32) -> MessageKeys {
        ChainKey::new([4u8; 32], index).message_keys()
    }

    #[test]
    fn take_consumes_entry() {
        let mut cache = SkippedKeys::new();
        cache.insert(3u32, keys_at(3), 10);

        assert!(cache.contains(&3));
        assert_eq!(cache.take(&3).map(|k| k.index()), Some(3));
        assert!(cache.take(&3).is_none());
    }

    #[test]
    fn full_cache_evicts_oldest() {
        let mut cache = SkippedKeys::new();
        for index in 0..5u32 {
            cache.insert(index, keys_at(index), 3);
        }

        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(&0));
        assert!(!cache.contains(&1));
        assert!(cache.contains(&4));
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let mut cache = SkippedKeys::new();
        cache.insert(1u32, keys_at(1), 0);
        assert_eq!(cache.len(), 0);
    }
}
