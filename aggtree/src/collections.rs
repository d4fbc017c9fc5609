//! Collections used by the engine's tables.
//!
//! - [`ShrinkingHashMap`] tracks removals since the last addition. After a
//!   threshold of consecutive removals (1/16 of max capacity) the underlying
//!   map is shrunk to reclaim memory. Pending-request indexes see bursty
//!   usage (a round of requests fans out, then drains) and benefit from this.
//! - [`Arena`] is a slot map with generation-checked [`Handle`]s. A handle to
//!   a removed slot stops resolving even after the slot is reused, which is
//!   how entries refer to each other without owning references.

use alloc::vec::Vec;
use hashbrown::HashMap;

/// Calculate shrink threshold from max capacity (1/16, minimum 1).
const fn shrink_threshold(max_capacity: usize) -> u8 {
    let threshold = max_capacity / 16;
    if threshold == 0 {
        1
    } else if threshold > u8::MAX as usize {
        u8::MAX
    } else {
        threshold as u8
    }
}

/// A HashMap that shrinks after consecutive removals without additions.
pub struct ShrinkingHashMap<K, V, S = hashbrown::DefaultHashBuilder> {
    inner: HashMap<K, V, S>,
    removals_since_add: u8,
    shrink_threshold: u8,
}

impl<K, V> ShrinkingHashMap<K, V, hashbrown::DefaultHashBuilder> {
    /// Create a new empty map with specified max capacity.
    ///
    /// The shrink threshold is set to 1/16 of max capacity.
    pub fn with_max_capacity(max_capacity: usize) -> Self {
        Self {
            inner: HashMap::new(),
            removals_since_add: 0,
            shrink_threshold: shrink_threshold(max_capacity),
        }
    }
}

impl<K, V, S> ShrinkingHashMap<K, V, S>
where
    K: Eq + core::hash::Hash,
    S: core::hash::BuildHasher,
{
    /// Insert a key-value pair. Resets removal counter.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.removals_since_add = 0;
        self.inner.insert(key, value)
    }

    /// Get the value for `key`, inserting `default()` first if absent.
    ///
    /// Only an actual insertion resets the removal counter.
    pub fn get_or_insert_with<F>(&mut self, key: K, default: F) -> &mut V
    where
        F: FnOnce() -> V,
    {
        if !self.inner.contains_key(&key) {
            self.removals_since_add = 0;
        }
        self.inner.entry(key).or_insert_with(default)
    }

    /// Remove a key. May trigger shrink after threshold removals.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let result = self.inner.remove(key);
        if result.is_some() {
            self.removals_since_add = self.removals_since_add.saturating_add(1);
            self.maybe_shrink();
        }
        result
    }

    /// Check if shrink threshold reached and shrink if so.
    fn maybe_shrink(&mut self) {
        if self.removals_since_add >= self.shrink_threshold {
            self.inner.shrink_to_fit();
            self.removals_since_add = 0;
        }
    }

    /// Get a reference to a value.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.inner.get(key)
    }

    /// Get a mutable reference to a value.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.inner.get_mut(key)
    }

    /// Check if key exists.
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterate over key-value pairs.
    pub fn iter(&self) -> hashbrown::hash_map::Iter<'_, K, V> {
        self.inner.iter()
    }

    /// Retain entries matching predicate. Counts removals.
    pub fn retain<F>(&mut self, mut f: F)
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        let before = self.inner.len();
        self.inner.retain(|k, v| f(k, v));
        let removed = before - self.inner.len();
        if removed > 0 {
            // Saturate both the cast and addition to handle >255 removals
            let removed_u8 = removed.min(u8::MAX as usize) as u8;
            self.removals_since_add = self.removals_since_add.saturating_add(removed_u8);
            self.maybe_shrink();
        }
    }
}

impl<K, V, S> ShrinkingHashMap<K, V, S>
where
    K: Eq + core::hash::Hash + Copy,
    S: core::hash::BuildHasher,
{
    /// Remove the entry with the minimum value according to a key function.
    ///
    /// Used to evict the oldest entry when at capacity.
    /// Returns the removed key-value pair, or None if the map was empty.
    pub fn remove_min_by_key<B, F>(&mut self, mut f: F) -> Option<(K, V)>
    where
        B: Ord,
        F: FnMut(&V) -> B,
    {
        let key = self.inner.iter().min_by_key(|(_, v)| f(v)).map(|(k, _)| *k)?;
        let value = self.inner.remove(&key)?;
        self.removals_since_add = self.removals_since_add.saturating_add(1);
        self.maybe_shrink();
        Some((key, value))
    }
}

/// Generation-checked index into an [`Arena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    /// Slot index, for diagnostics.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation the slot had when this handle was issued.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

enum Slot<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32, next_free: Option<u32> },
}

/// Slot map with a free list and per-slot generations.
///
/// Removing a value bumps its slot's generation, so every handle issued for
/// it fails to resolve from then on. Callers treat a dead handle as "already
/// gone" and skip it.
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    /// Store a value and return its handle. Reuses vacant slots first.
    pub fn insert(&mut self, value: T) -> Handle {
        self.len += 1;
        if let Some(index) = self.free_head {
            if let Some(Slot::Vacant {
                generation,
                next_free,
            }) = self.slots.get(index as usize)
            {
                let (generation, next_free) = (*generation, *next_free);
                self.slots[index as usize] = Slot::Occupied { generation, value };
                self.free_head = next_free;
                return Handle { index, generation };
            }
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot::Occupied {
            generation: 0,
            value,
        });
        Handle {
            index,
            generation: 0,
        }
    }

    /// Resolve a handle. Returns None for removed or reused slots.
    pub fn get(&self, handle: Handle) -> Option<&T> {
        match self.slots.get(handle.index as usize)? {
            Slot::Occupied { generation, value } if *generation == handle.generation => {
                Some(value)
            }
            _ => None,
        }
    }

    /// Resolve a handle mutably.
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        match self.slots.get_mut(handle.index as usize)? {
            Slot::Occupied { generation, value } if *generation == handle.generation => {
                Some(value)
            }
            _ => None,
        }
    }

    /// True if the handle still resolves.
    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    /// Remove and return the value. A dead handle is a no-op.
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == handle.generation => {}
            _ => return None,
        }
        let vacant = Slot::Vacant {
            generation: handle.generation.wrapping_add(1),
            next_free: self.free_head,
        };
        let old = core::mem::replace(slot, vacant);
        self.free_head = Some(handle.index);
        self.len -= 1;
        match old {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Vacant { .. } => None,
        }
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterate over live values in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied { generation, value } => Some((
                    Handle {
                        index: index as u32,
                        generation: *generation,
                    },
                    value,
                )),
                Slot::Vacant { .. } => None,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shrinking_hashmap_shrinks_after_removals() {
        let mut m = ShrinkingHashMap::with_max_capacity(128);

        for i in 0..100u64 {
            m.insert(i, i * 2);
        }
        for i in 0..100u64 {
            m.remove(&i);
        }

        assert!(m.is_empty());
    }

    #[test]
    fn test_get_or_insert_with() {
        let mut m: ShrinkingHashMap<u64, alloc::vec::Vec<u32>> =
            ShrinkingHashMap::with_max_capacity(16);
        m.get_or_insert_with(7, alloc::vec::Vec::new).push(1);
        m.get_or_insert_with(7, alloc::vec::Vec::new).push(2);
        assert_eq!(m.get(&7).map(|v| v.len()), Some(2));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn test_remove_min_by_key_evicts_oldest() {
        let mut m = ShrinkingHashMap::with_max_capacity(16);
        m.insert(1u64, 30u64);
        m.insert(2u64, 10u64);
        m.insert(3u64, 20u64);

        assert_eq!(m.remove_min_by_key(|v| *v), Some((2, 10)));
        assert_eq!(m.len(), 2);
        assert!(!m.contains_key(&2));
    }

    #[test]
    fn test_arena_insert_get_remove() {
        let mut arena = Arena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a), Some(&"a"));

        assert_eq!(arena.remove(a), Some("a"));
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_arena_stale_handle_after_reuse() {
        let mut arena = Arena::new();
        let old = arena.insert(1u32);
        arena.remove(old);

        // Slot is reused with a bumped generation
        let new = arena.insert(2u32);
        assert_eq!(new.index(), old.index());
        assert_ne!(new.generation(), old.generation());

        assert_eq!(arena.get(old), None);
        assert!(arena.get_mut(old).is_none());
        assert_eq!(arena.remove(old), None);
        assert_eq!(arena.get(new), Some(&2));
    }

    #[test]
    fn test_arena_iter_skips_vacant() {
        let mut arena = Arena::new();
        let a = arena.insert(10);
        let b = arena.insert(20);
        let c = arena.insert(30);
        arena.remove(b);

        let live: alloc::vec::Vec<_> = arena.iter().map(|(h, v)| (h, *v)).collect();
        assert_eq!(live, alloc::vec![(a, 10), (c, 30)]);
    }
}
