//! Per-session lock table for the engine.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::{
    address::{DistributionId, ProtocolAddress},
    error::SessionError,
};

/// What a lock protects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum LockKey {
    /// Pairwise session with a peer
    Session(ProtocolAddress),
    /// Sender-key record of one sender in one group
    SenderKey(ProtocolAddress, DistributionId),
}

/// One mutex per session, created on first use and dropped once no
/// operation holds or waits on it.
///
/// Callers hold the lock for one load-modify-store transaction so two
/// operations on the same session never interleave. Different sessions
/// proceed in parallel.
#[derive(Default)]
pub(crate) struct LockTable {
    locks: Mutex<HashMap<LockKey, Arc<Mutex<()>>>>,
}

impl LockTable {
    /// Run `operation` while holding the lock for `key`.
    pub(crate) fn with_lock<T>(
        &self,
        key: LockKey,
        operation: impl FnOnce() -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        let lock = self.get(&key)?;
        let result = match lock.lock() {
            Ok(_guard) => operation(),
            Err(_) => Err(SessionError::LockPoisoned),
        };
        drop(lock);
        self.release(&key);
        result
    }

    fn get(&self, key: &LockKey) -> Result<Arc<Mutex<()>>, SessionError> {
        let mut locks = self.locks.lock().map_err(|_| SessionError::LockPoisoned)?;
        Ok(Arc::clone(locks.entry(key.clone()).or_default()))
    }

    /// Drop the entry for `key` if the table holds the only reference.
    ///
    /// Handles are cloned and counted under the table mutex, so a count of
    /// one means no caller holds or is about to take this lock.
    fn release(&self, key: &LockKey) {
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(key);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_shares_lock() {
        let table = LockTable::default();
        let address = ProtocolAddress::new("alice", 1);

        let a = table.get(&LockKey::Session(address.clone())).unwrap();
        let b = table.get(&LockKey::Session(address.clone())).unwrap();
        let c = table.get(&LockKey::SenderKey(address, 7)).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn idle_locks_are_dropped() {
        let table = LockTable::default();

        for device in 0..100 {
            let key = LockKey::Session(ProtocolAddress::new("peer", device));
            let value = table.with_lock(key, || Ok(device)).unwrap();
            assert_eq!(value, device);
        }
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn failed_operation_still_releases() {
        let table = LockTable::default();
        let key = LockKey::SenderKey(ProtocolAddress::new("bob", 2), 9);

        let result: Result<(), _> =
            table.with_lock(key, || Err(SessionError::NoSenderKeyState { distribution_id: 9 }));

        assert_eq!(result, Err(SessionError::NoSenderKeyState { distribution_id: 9 }));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn lock_in_use_is_kept() {
        let table = LockTable::default();
        let key = LockKey::Session(ProtocolAddress::new("carol", 3));

        let held = table.get(&key).unwrap();
        table.with_lock(LockKey::Session(ProtocolAddress::new("dave", 4)), || Ok(())).unwrap();
        table.release(&key);
        assert_eq!(table.len(), 1);

        let again = table.get(&key).unwrap();
        assert!(Arc::ptr_eq(&held, &again));
    }
}
