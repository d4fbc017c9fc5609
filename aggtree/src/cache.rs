//! Value cache: last observed value per identifier.
//!
//! Owned by the engine and injected at construction. The cache is bounded;
//! when full, the value written longest ago is evicted. An optional TTL
//! hides values older than the TTL and lets them be purged lazily.

use crate::collections::ShrinkingHashMap;
use crate::name::{IdSet, Identifier};
use crate::time::{Duration, Timestamp};

#[derive(Clone, Copy, Debug)]
struct CachedValue {
    value: u64,
    written_at: Timestamp,
    /// Monotonic write counter, orders eviction independently of the clock.
    stamp: u64,
}

/// Bounded identifier → value map with last-write-wins semantics.
pub struct ValueCache {
    entries: ShrinkingHashMap<Identifier, CachedValue>,
    capacity: usize,
    ttl: Option<Duration>,
    next_stamp: u64,
}

impl ValueCache {
    /// Create a cache holding at most `capacity` identifiers (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: ShrinkingHashMap::with_max_capacity(capacity),
            capacity,
            ttl: None,
            next_stamp: 0,
        }
    }

    /// Expire values `ttl` after they were written.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Number of stored values, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_live(&self, cached: &CachedValue, now: Timestamp) -> bool {
        match self.ttl {
            Some(ttl) => !now.has_reached(cached.written_at + ttl),
            None => true,
        }
    }

    /// Record an observed value. Returns true if the stored value changed.
    ///
    /// Rewriting the same value refreshes its age but is otherwise a no-op.
    pub fn insert(&mut self, id: Identifier, value: u64, now: Timestamp) -> bool {
        let stamp = self.next_stamp;
        self.next_stamp = self.next_stamp.wrapping_add(1);

        if let Some(existing) = self.entries.get_mut(&id) {
            let changed = existing.value != value;
            existing.value = value;
            existing.written_at = now;
            existing.stamp = stamp;
            return changed;
        }

        if self.entries.len() >= self.capacity {
            self.purge_expired(now);
        }
        if self.entries.len() >= self.capacity {
            if let Some((evicted, _)) = self.entries.remove_min_by_key(|c| c.stamp) {
                tracing::trace!(id = evicted, "value cache full, evicted oldest");
            }
        }
        self.entries.insert(
            id,
            CachedValue {
                value,
                written_at: now,
                stamp,
            },
        );
        true
    }

    /// Live value for `id`.
    pub fn get(&self, id: Identifier, now: Timestamp) -> Option<u64> {
        self.entries
            .get(&id)
            .filter(|c| self.is_live(c, now))
            .map(|c| c.value)
    }

    pub fn contains(&self, id: Identifier, now: Timestamp) -> bool {
        self.get(id, now).is_some()
    }

    /// Sum of `ids` if every one of them is cached.
    pub fn sum(&self, ids: &IdSet, now: Timestamp) -> Option<u64> {
        ids.iter().try_fold(0u64, |acc, &id| {
            self.get(id, now).map(|v| acc.wrapping_add(v))
        })
    }

    /// Sum whatever subset of `ids` is cached. Returns (sum, cached ids).
    pub fn resolve(&self, ids: &IdSet, now: Timestamp) -> (u64, IdSet) {
        let mut sum = 0u64;
        let mut hits = IdSet::new();
        for &id in ids {
            if let Some(v) = self.get(id, now) {
                sum = sum.wrapping_add(v);
                hits.insert(id);
            }
        }
        (sum, hits)
    }

    pub fn remove(&mut self, id: Identifier) -> Option<u64> {
        self.entries.remove(&id).map(|c| c.value)
    }

    /// Drop expired values. Returns how many were removed.
    pub fn purge_expired(&mut self, now: Timestamp) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };
        let before = self.entries.len();
        self.entries
            .retain(|_, c| !now.has_reached(c.written_at + ttl));
        before - self.entries.len()
    }
}
