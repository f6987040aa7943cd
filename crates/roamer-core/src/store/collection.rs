// ── Keyed reactive directory ──
//
// Lock-free concurrent storage with O(1) lookups and a `watch` snapshot
// that is rebuilt on every mutation. Iteration goes through the
// snapshot, so entries vanishing mid-sweep are harmless.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;

/// A concurrent `K -> Arc<V>` map with snapshot subscriptions.
pub(crate) struct Directory<K, V>
where
    K: Eq + Hash + Clone,
    V: Send + Sync + 'static,
{
    by_key: DashMap<K, Arc<V>>,

    /// Full snapshot, rebuilt on mutation.
    snapshot: watch::Sender<Arc<Vec<Arc<V>>>>,
}

impl<K, V> Directory<K, V>
where
    K: Eq + Hash + Clone,
    V: Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            by_key: DashMap::new(),
            snapshot,
        }
    }

    /// Insert `value` only if `key` is free. Returns `false` and leaves
    /// the existing entry untouched otherwise.
    pub(crate) fn insert_new(&self, key: K, value: Arc<V>) -> bool {
        let inserted = match self.by_key.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        };
        if inserted {
            self.rebuild_snapshot();
        }
        inserted
    }

    /// Fetch the entry for `key`, creating it with `create` if absent.
    /// `attach` runs while the key is still locked, so it cannot race a
    /// concurrent `remove_if` for the same key. The flag reports whether
    /// the entry was created.
    pub(crate) fn get_or_insert_with(
        &self,
        key: K,
        create: impl FnOnce() -> V,
        attach: impl FnOnce(&V),
    ) -> (Arc<V>, bool) {
        let (value, created) = match self.by_key.entry(key) {
            Entry::Occupied(slot) => {
                let value = Arc::clone(slot.get());
                attach(value.as_ref());
                (value, false)
            }
            Entry::Vacant(slot) => {
                let value = Arc::new(create());
                attach(value.as_ref());
                slot.insert(Arc::clone(&value));
                (value, true)
            }
        };
        if created {
            self.rebuild_snapshot();
        }
        (value, created)
    }

    /// Remove an entry by key. Returns the removed entry if it existed.
    pub(crate) fn remove(&self, key: &K) -> Option<Arc<V>> {
        let removed = self.by_key.remove(key).map(|(_, v)| v);
        if removed.is_some() {
            self.rebuild_snapshot();
        }
        removed
    }

    /// Remove the entry for `key` only if `predicate` holds, atomically
    /// with respect to other operations on the same key.
    pub(crate) fn remove_if(&self, key: &K, predicate: impl FnOnce(&V) -> bool) -> Option<Arc<V>> {
        let removed = self
            .by_key
            .remove_if(key, |_, v| predicate(v.as_ref()))
            .map(|(_, v)| v);
        if removed.is_some() {
            self.rebuild_snapshot();
        }
        removed
    }

    pub(crate) fn get(&self, key: &K) -> Option<Arc<V>> {
        self.by_key.get(key).map(|r| Arc::clone(r.value()))
    }

    /// Get the current snapshot (cheap `Arc` clone).
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<V>>> {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes via a `watch::Receiver`.
    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<V>>>> {
        self.snapshot.subscribe()
    }

    pub(crate) fn keys(&self) -> Vec<K> {
        self.by_key.iter().map(|r| r.key().clone()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_key.len()
    }

    // ── Private helpers ──────────────────────────────────────────────

    /// Collect all values into a snapshot vec and broadcast to subscribers.
    /// Must not be called while holding an entry guard.
    fn rebuild_snapshot(&self) {
        let values: Vec<Arc<V>> = self.by_key.iter().map(|r| Arc::clone(r.value())).collect();
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }
}
