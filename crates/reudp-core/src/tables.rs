//! # Session Tables
//!
//! Generic TTL-indexed storage keyed by [`SessionKey`], shared by
//! [`crate::sender`] (one table of send sessions) and [`crate::receiver`]
//! (one table of receive sessions). Also holds the per-peer transfer-id
//! allocator that [`crate::sender`] draws from when starting a new
//! transfer.
//!
//! Mirrors the slab-pool idiom of a packet buffer pool — insert/get/remove
//! plus a periodic `drain_expired` sweep — generalised to a map keyed by
//! `(peer, transfer id)` instead of a dense integer handle, and with an
//! eviction callback so a caller can cancel outstanding timers before an
//! entry disappears.

use std::collections::HashMap;
use std::time::Duration;

use quanta::Instant;

use crate::peer::{IdAllocator, PeerKey, SessionKey};

/// One entry in a [`SessionTable`]: a value plus the last time it was
/// touched, for TTL sweeping.
struct Entry<V> {
    value: V,
    touched_at: Instant,
}

/// A TTL-indexed map from [`SessionKey`] to session state `V`.
pub struct SessionTable<V> {
    entries: HashMap<SessionKey, Entry<V>>,
}

impl<V> Default for SessionTable<V> {
    fn default() -> Self {
        SessionTable {
            entries: HashMap::new(),
        }
    }
}

impl<V> SessionTable<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh entry, touched at `now`. Replaces any existing entry
    /// under the same key.
    pub fn insert(&mut self, key: SessionKey, value: V, now: Instant) {
        self.entries.insert(
            key,
            Entry {
                value,
                touched_at: now,
            },
        );
    }

    pub fn get(&self, key: &SessionKey) -> Option<&V> {
        self.entries.get(key).map(|e| &e.value)
    }

    pub fn get_mut(&mut self, key: &SessionKey) -> Option<&mut V> {
        self.entries.get_mut(key).map(|e| &mut e.value)
    }

    /// Refresh the touch time on an existing entry. No-op if the key is
    /// absent.
    pub fn touch(&mut self, key: &SessionKey, now: Instant) {
        if let Some(e) = self.entries.get_mut(key) {
            e.touched_at = now;
        }
    }

    pub fn remove(&mut self, key: &SessionKey) -> Option<V> {
        self.entries.remove(key).map(|e| e.value)
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SessionKey, &V)> {
        self.entries.iter().map(|(k, e)| (k, &e.value))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&SessionKey, &mut V)> {
        self.entries.iter_mut().map(|(k, e)| (k, &mut e.value))
    }

    /// Evict every entry untouched for at least `ttl`, calling
    /// `on_before_destroy` for each one before it is dropped — the hook a
    /// session uses to cancel its own retry/sweep timers.
    pub fn sweep(
        &mut self,
        ttl: Duration,
        now: Instant,
        mut on_before_destroy: impl FnMut(&SessionKey, &V),
    ) {
        let stale: Vec<SessionKey> = self
            .entries
            .iter()
            .filter(|(_, e)| now.duration_since(e.touched_at) >= ttl)
            .map(|(k, _)| k.clone())
            .collect();

        for key in stale {
            if let Some(entry) = self.entries.get(&key) {
                on_before_destroy(&key, &entry.value);
            }
            self.entries.remove(&key);
        }
    }

    /// Evict entries for which `predicate` returns true, regardless of
    /// TTL. Used for the receiver's lazy recycle of delivered sessions
    /// once they've sat idle past `DELIVERED_GC_SECS`.
    pub fn remove_if(
        &mut self,
        mut predicate: impl FnMut(&SessionKey, &V) -> bool,
        mut on_before_destroy: impl FnMut(&SessionKey, &V),
    ) {
        let matching: Vec<SessionKey> = self
            .entries
            .iter()
            .filter(|(k, e)| predicate(k, &e.value))
            .map(|(k, _)| k.clone())
            .collect();

        for key in matching {
            if let Some(entry) = self.entries.get(&key) {
                on_before_destroy(&key, &entry.value);
            }
            self.entries.remove(&key);
        }
    }
}

/// Per-peer monotonic transfer-id allocators, one per peer that has ever
/// originated an outgoing transfer.
#[derive(Default)]
pub struct PeerAllocators {
    allocators: HashMap<PeerKey, IdAllocator>,
}

impl PeerAllocators {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next transfer id for `peer`, creating its allocator on
    /// first use.
    pub fn alloc(&mut self, peer: &PeerKey) -> u32 {
        self.allocators
            .entry(peer.clone())
            .or_insert_with(IdAllocator::new)
            .alloc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::Family;

    fn key(id: u32) -> SessionKey {
        SessionKey::new(PeerKey::new(9000, Some("10.0.0.1"), Family::V4), id)
    }

    #[test]
    fn insert_get_remove_roundtrip() {
        let mut table: SessionTable<u32> = SessionTable::new();
        let now = Instant::now();
        table.insert(key(1), 100, now);
        assert_eq!(table.get(&key(1)), Some(&100));
        assert_eq!(table.len(), 1);
        assert_eq!(table.remove(&key(1)), Some(100));
        assert!(table.is_empty());
    }

    #[test]
    fn touch_refreshes_and_sweep_spares_fresh_entries() {
        let mut table: SessionTable<u32> = SessionTable::new();
        let t0 = Instant::now();
        table.insert(key(1), 1, t0);
        table.touch(&key(1), t0);

        let mut evicted = Vec::new();
        table.sweep(Duration::from_secs(60), t0, |k, v| evicted.push((k.clone(), *v)));
        assert!(evicted.is_empty());
        assert!(table.contains(&key(1)));
    }

    #[test]
    fn sweep_evicts_stale_entries_and_calls_hook() {
        let mut table: SessionTable<u32> = SessionTable::new();
        let t0 = Instant::now();
        table.insert(key(1), 1, t0);
        let later = t0 + Duration::from_secs(120);

        let mut evicted = Vec::new();
        table.sweep(Duration::from_secs(60), later, |k, v| {
            evicted.push((k.clone(), *v))
        });
        assert_eq!(evicted.len(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn remove_if_evicts_matching_entries_only() {
        let mut table: SessionTable<bool> = SessionTable::new();
        let now = Instant::now();
        table.insert(key(1), true, now);
        table.insert(key(2), false, now);

        table.remove_if(|_, delivered| *delivered, |_, _| {});
        assert!(!table.contains(&key(1)));
        assert!(table.contains(&key(2)));
    }

    #[test]
    fn allocators_are_independent_per_peer_and_monotonic() {
        let mut allocs = PeerAllocators::new();
        let a = PeerKey::new(1, Some("10.0.0.1"), Family::V4);
        let b = PeerKey::new(2, Some("10.0.0.2"), Family::V4);

        assert_eq!(allocs.alloc(&a), 0);
        assert_eq!(allocs.alloc(&a), 1);
        assert_eq!(allocs.alloc(&b), 0);
    }
}
