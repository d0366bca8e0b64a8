use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use throttle_timing::Nanos;

use crate::entry::Entry;

/// Two-index container: a hashed unique index by key, and an ordered
/// non-unique index by `expires_at`, kept in sync on every mutation.
/// `by_expiration`'s key is `(expires_at, key)` so ties on `expires_at`
/// still sort deterministically and uniquely.
#[derive(Default)]
pub struct Storage {
    by_key: HashMap<Vec<u8>, Arc<Entry>>,
    by_expiration: BTreeMap<(u64, Vec<u8>), ()>,
}

impl Storage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Inserts iff no entry with the same key exists. Returns the inserted
    /// handle, or `None` on a duplicate key.
    pub fn insert(&mut self, entry: Entry) -> Option<Arc<Entry>> {
        if self.by_key.contains_key(&entry.key) {
            return None;
        }
        let key = entry.key.clone();
        let expires_at = entry.expires_at().0;
        let handle = Arc::new(entry);
        self.by_key.insert(key.clone(), handle.clone());
        self.by_expiration.insert((expires_at, key), ());
        Some(handle)
    }

    pub fn find_by_key(&self, key: &[u8]) -> Option<&Arc<Entry>> {
        self.by_key.get(key)
    }

    pub fn erase(&mut self, key: &[u8]) -> Option<Arc<Entry>> {
        let removed = self.by_key.remove(key)?;
        self.by_expiration.remove(&(removed.expires_at().0, key.to_vec()));
        Some(removed)
    }

    /// Re-keys the expiration index after an entry's `expires_at` changed.
    /// The entry's atomic field must already hold `new_at`; `old_at` is the
    /// value it held before the caller changed it.
    pub fn reschedule(&mut self, key: &[u8], old_at: Nanos, new_at: Nanos) {
        throttle_utils::safe_assert!(self.by_key.contains_key(key), "reschedule called for untracked key");
        if old_at == new_at {
            return;
        }
        self.by_expiration.remove(&(old_at.0, key.to_vec()));
        self.by_expiration.insert((new_at.0, key.to_vec()), ());
    }

    /// Ascending iteration by `expires_at`, yielding the live entry handles.
    pub fn iter_by_expiration(&self) -> impl Iterator<Item = &Arc<Entry>> + '_ {
        self.by_expiration.keys().filter_map(move |(_, key)| self.by_key.get(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Entry>> + '_ {
        self.by_key.values()
    }

    pub fn earliest_expiration(&self) -> Option<Nanos> {
        self.by_expiration.keys().next().map(|(at, _)| Nanos(*at))
    }
}
