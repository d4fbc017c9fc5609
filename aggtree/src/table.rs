//! Pending request table.
//!
//! Entries live in a generation-checked [`Arena`]. Everything that refers to
//! an entry from elsewhere (dependents, waiters, sub-request linkage, the
//! deadline index) holds an [`EntryHandle`] that may stop resolving once the
//! entry completes or expires. Every dereference checks and skips dead
//! handles.
//!
//! Side indexes:
//! - `by_name`: request name → entry, for dedup.
//! - `outstanding`: forwarded name → entries awaiting its response. One
//!   outstanding name can serve several entries and is forwarded only once.
//! - `waiters`: pending entry name → entries that expect contributions from it.
//! - `deadlines`: ordered (deadline, handle) pairs.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec::Vec;

use crate::collections::{Arena, Handle, ShrinkingHashMap};
use crate::name::{IdSet, Identifier, Name};
use crate::time::Timestamp;
use crate::types::{Error, LinkId};

/// Handle to a pending entry. Acts as a weak reference.
pub type EntryHandle = Handle;

/// What kind of request an entry tracks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    /// Sum over a set of identifiers.
    Aggregate,
    /// Name forwarded unmodified; whatever comes back is passed downstream.
    Relay,
}

/// Aggregation state for one outstanding request.
#[derive(Clone, Debug)]
pub struct PendingEntry {
    pub(crate) name: Name,
    pub(crate) kind: EntryKind,
    pub(crate) generation: Option<u64>,
    pub(crate) needed_ids: IdSet,
    pub(crate) pending_ids: IdSet,
    pub(crate) partial_sum: u64,
    pub(crate) waiting_for: BTreeMap<Identifier, Name>,
    pub(crate) dependents: Vec<EntryHandle>,
    pub(crate) downstream: Vec<LinkId>,
    pub(crate) deadline: Timestamp,
    pub(crate) forwarded: Vec<Name>,
}

impl PendingEntry {
    /// New aggregate entry for `name`, needing `ids`.
    pub fn aggregate(name: Name, ids: IdSet, deadline: Timestamp) -> Self {
        Self {
            generation: name.generation(),
            name,
            kind: EntryKind::Aggregate,
            pending_ids: ids.clone(),
            needed_ids: ids,
            partial_sum: 0,
            waiting_for: BTreeMap::new(),
            dependents: Vec::new(),
            downstream: Vec::new(),
            deadline,
            forwarded: Vec::new(),
        }
    }

    /// New relay entry for `name`.
    pub fn relay(name: Name, deadline: Timestamp) -> Self {
        let mut entry = Self::aggregate(name, IdSet::new(), deadline);
        entry.kind = EntryKind::Relay;
        entry
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn generation(&self) -> Option<u64> {
        self.generation
    }

    pub fn needed_ids(&self) -> &IdSet {
        &self.needed_ids
    }

    pub fn pending_ids(&self) -> &IdSet {
        &self.pending_ids
    }

    pub fn partial_sum(&self) -> u64 {
        self.partial_sum
    }

    pub fn waiting_for(&self) -> &BTreeMap<Identifier, Name> {
        &self.waiting_for
    }

    pub fn dependents(&self) -> &[EntryHandle] {
        &self.dependents
    }

    pub fn downstream(&self) -> &[LinkId] {
        &self.downstream
    }

    pub fn deadline(&self) -> Timestamp {
        self.deadline
    }

    /// Names forwarded on behalf of this entry and not yet answered.
    pub fn forwarded(&self) -> &[Name] {
        &self.forwarded
    }

    /// Nothing left to fetch and nothing left to wait for.
    pub fn is_complete(&self) -> bool {
        self.pending_ids.is_empty() && self.waiting_for.is_empty()
    }

    /// Record a downstream link. Returns false if it was already present
    /// or the entry is at `max` links.
    pub(crate) fn add_downstream(&mut self, link: LinkId, max: usize) -> bool {
        if self.downstream.contains(&link) || self.downstream.len() >= max {
            return false;
        }
        self.downstream.push(link);
        true
    }

    /// True if every id in `ids` is still pending here.
    pub(crate) fn still_pending(&self, ids: &IdSet) -> bool {
        ids.iter().all(|id| self.pending_ids.contains(id))
    }

    /// Attribute `value` for `ids`: drop them from the pending set and add
    /// to the running sum.
    pub(crate) fn apply(&mut self, ids: &IdSet, value: u64) {
        for id in ids {
            self.pending_ids.remove(id);
        }
        self.partial_sum = self.partial_sum.wrapping_add(value);
    }
}

/// Arena-backed table of pending entries with its side indexes.
pub struct PendingTable {
    entries: Arena<PendingEntry>,
    by_name: ShrinkingHashMap<Name, EntryHandle>,
    outstanding: ShrinkingHashMap<Name, Vec<EntryHandle>>,
    waiters: ShrinkingHashMap<Name, Vec<EntryHandle>>,
    deadlines: BTreeSet<(Timestamp, EntryHandle)>,
    capacity: usize,
}

impl PendingTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arena::new(),
            by_name: ShrinkingHashMap::with_max_capacity(capacity),
            outstanding: ShrinkingHashMap::with_max_capacity(capacity),
            waiters: ShrinkingHashMap::with_max_capacity(capacity),
            deadlines: BTreeSet::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Store a new entry. The name must not already be present.
    pub fn insert(&mut self, entry: PendingEntry) -> Result<EntryHandle, Error> {
        if self.is_full() {
            return Err(Error::TableFull);
        }
        let name = entry.name.clone();
        let deadline = entry.deadline;
        let handle = self.entries.insert(entry);
        self.by_name.insert(name, handle);
        self.deadlines.insert((deadline, handle));
        Ok(handle)
    }

    pub fn get(&self, handle: EntryHandle) -> Option<&PendingEntry> {
        self.entries.get(handle)
    }

    pub(crate) fn get_mut(&mut self, handle: EntryHandle) -> Option<&mut PendingEntry> {
        self.entries.get_mut(handle)
    }

    pub fn contains(&self, handle: EntryHandle) -> bool {
        self.entries.contains(handle)
    }

    /// Entry registered under exactly this name.
    pub fn lookup(&self, name: &Name) -> Option<EntryHandle> {
        self.by_name
            .get(name)
            .copied()
            .filter(|&h| self.entries.contains(h))
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntryHandle, &PendingEntry)> {
        self.entries.iter()
    }

    /// Remove an entry and unlink it from every index.
    pub fn remove(&mut self, handle: EntryHandle) -> Option<PendingEntry> {
        let entry = self.entries.remove(handle)?;

        if self.by_name.get(&entry.name) == Some(&handle) {
            self.by_name.remove(&entry.name);
        }
        for name in &entry.forwarded {
            Self::unlink(&mut self.outstanding, name, handle);
        }
        for name in entry.waiting_for.values() {
            Self::unlink(&mut self.waiters, name, handle);
        }
        self.deadlines.remove(&(entry.deadline, handle));
        Some(entry)
    }

    fn unlink(index: &mut ShrinkingHashMap<Name, Vec<EntryHandle>>, name: &Name, handle: EntryHandle) {
        let now_empty = match index.get_mut(name) {
            Some(handles) => {
                handles.retain(|&h| h != handle);
                handles.is_empty()
            }
            None => false,
        };
        if now_empty {
            index.remove(name);
        }
    }

    /// Link `name` as forwarded on behalf of `handle`.
    ///
    /// Returns true if the name was not outstanding before, meaning the
    /// caller must actually send it.
    pub(crate) fn link_forwarded(&mut self, name: &Name, handle: EntryHandle) -> bool {
        let Some(entry) = self.entries.get_mut(handle) else {
            return false;
        };
        if !entry.forwarded.contains(name) {
            entry.forwarded.push(name.clone());
        }
        // Dead handles left behind by removed entries don't count
        let entries = &self.entries;
        let linked = self.outstanding.get_or_insert_with(name.clone(), Vec::new);
        linked.retain(|&h| entries.contains(h));
        let first = linked.is_empty();
        if !linked.contains(&handle) {
            linked.push(handle);
        }
        first
    }

    /// True if a response for `name` is awaited by some live entry.
    pub fn is_outstanding(&self, name: &Name) -> bool {
        self.outstanding
            .get(name)
            .is_some_and(|hs| hs.iter().any(|&h| self.entries.contains(h)))
    }

    /// Consume the linkage for `name`. Returns the live entries it served.
    pub(crate) fn take_forwarded(&mut self, name: &Name) -> Vec<EntryHandle> {
        let Some(handles) = self.outstanding.remove(name) else {
            return Vec::new();
        };
        let mut live = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Some(entry) = self.entries.get_mut(handle) {
                entry.forwarded.retain(|n| n != name);
                live.push(handle);
            }
        }
        live
    }

    /// Make `handle` wait on the entry named `on` for `ids`.
    pub(crate) fn add_waiter(&mut self, on: &Name, handle: EntryHandle, ids: &IdSet) {
        let Some(entry) = self.entries.get_mut(handle) else {
            return;
        };
        for &id in ids {
            entry.pending_ids.remove(&id);
            entry.waiting_for.insert(id, on.clone());
        }
        let waiting = self.waiters.get_or_insert_with(on.clone(), Vec::new);
        if !waiting.contains(&handle) {
            waiting.push(handle);
        }
    }

    /// Consume the waiters registered on `name`. Returns the live ones.
    pub(crate) fn take_waiters(&mut self, name: &Name) -> Vec<EntryHandle> {
        let Some(handles) = self.waiters.remove(name) else {
            return Vec::new();
        };
        handles
            .into_iter()
            .filter(|&h| self.entries.contains(h))
            .collect()
    }

    /// Answer `handle` as a whole with `value`, dropping whatever it was
    /// still fetching or waiting for.
    pub(crate) fn settle(&mut self, handle: EntryHandle, value: u64) {
        let Some(entry) = self.entries.get_mut(handle) else {
            return;
        };
        entry.pending_ids.clear();
        entry.partial_sum = value;
        let waited_on: Vec<Name> = core::mem::take(&mut entry.waiting_for)
            .into_values()
            .collect();
        for name in &waited_on {
            Self::unlink(&mut self.waiters, name, handle);
        }
    }

    /// Earliest deadline of any live entry.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.deadlines.first().map(|(t, _)| *t)
    }

    /// Entries whose deadline is at or before `now`, earliest first.
    pub fn due(&self, now: Timestamp) -> Vec<EntryHandle> {
        self.deadlines
            .iter()
            .take_while(|(t, _)| now.has_reached(*t))
            .map(|(_, h)| *h)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[u64]) -> IdSet {
        list.iter().copied().collect()
    }

    fn entry(list: &[u64], gen: u64, deadline_ms: u64) -> PendingEntry {
        let set = ids(list);
        PendingEntry::aggregate(
            Name::aggregate(&set, Some(gen)),
            set,
            Timestamp::from_millis(deadline_ms),
        )
    }

    #[test]
    fn test_insert_lookup_remove() {
        let mut table = PendingTable::new(4);
        let e = entry(&[1, 2], 1, 100);
        let name = e.name().clone();
        let h = table.insert(e).unwrap();

        assert_eq!(table.lookup(&name), Some(h));
        assert_eq!(table.next_deadline(), Some(Timestamp::from_millis(100)));

        let removed = table.remove(h).unwrap();
        assert_eq!(removed.needed_ids(), &ids(&[1, 2]));
        assert_eq!(table.lookup(&name), None);
        assert_eq!(table.next_deadline(), None);
        assert!(table.get(h).is_none());
        assert!(table.remove(h).is_none());
    }

    #[test]
    fn test_table_full() {
        let mut table = PendingTable::new(1);
        table.insert(entry(&[1, 2], 1, 100)).unwrap();
        assert_eq!(table.insert(entry(&[3, 4], 1, 100)), Err(Error::TableFull));
    }

    #[test]
    fn test_forwarded_name_shared_once() {
        let mut table = PendingTable::new(4);
        let a = table.insert(entry(&[1, 2, 3], 1, 100)).unwrap();
        let b = table.insert(entry(&[1, 2, 4], 1, 100)).unwrap();
        let sub = Name::aggregate(&ids(&[1, 2]), Some(1));

        assert!(table.link_forwarded(&sub, a));
        assert!(!table.link_forwarded(&sub, b));
        assert!(table.is_outstanding(&sub));

        assert_eq!(table.take_forwarded(&sub), alloc::vec![a, b]);
        assert!(!table.is_outstanding(&sub));
        assert!(table.get(a).unwrap().forwarded().is_empty());
        // Consumed exactly once
        assert!(table.take_forwarded(&sub).is_empty());
    }

    #[test]
    fn test_remove_unlinks_outstanding() {
        let mut table = PendingTable::new(4);
        let a = table.insert(entry(&[1, 2, 3], 1, 100)).unwrap();
        let sub = Name::aggregate(&ids(&[1, 2]), Some(1));
        table.link_forwarded(&sub, a);

        table.remove(a);
        assert!(!table.is_outstanding(&sub));

        // A later entry forwarding the same name must send it again
        let b = table.insert(entry(&[1, 2, 4], 1, 100)).unwrap();
        assert!(table.link_forwarded(&sub, b));
    }

    #[test]
    fn test_waiters_moved_from_pending() {
        let mut table = PendingTable::new(4);
        let small = table.insert(entry(&[2, 3], 1, 100)).unwrap();
        let big = table.insert(entry(&[1, 2, 3, 4], 1, 100)).unwrap();
        let small_name = table.get(small).unwrap().name().clone();

        table.add_waiter(&small_name, big, &ids(&[2, 3]));
        let e = table.get(big).unwrap();
        assert_eq!(e.pending_ids(), &ids(&[1, 4]));
        assert_eq!(e.waiting_for().len(), 2);
        assert!(!e.is_complete());

        assert_eq!(table.take_waiters(&small_name), alloc::vec![big]);
        assert!(table.take_waiters(&small_name).is_empty());
    }

    #[test]
    fn test_waiters_skip_removed_entries() {
        let mut table = PendingTable::new(4);
        let small = table.insert(entry(&[2, 3], 1, 100)).unwrap();
        let big = table.insert(entry(&[1, 2, 3], 1, 100)).unwrap();
        let small_name = table.get(small).unwrap().name().clone();
        table.add_waiter(&small_name, big, &ids(&[2, 3]));

        table.remove(big);
        assert!(table.take_waiters(&small_name).is_empty());
    }

    #[test]
    fn test_settle_clears_waits() {
        let mut table = PendingTable::new(4);
        let small = table.insert(entry(&[2, 3], 1, 100)).unwrap();
        let big = table.insert(entry(&[1, 2, 3], 1, 100)).unwrap();
        let small_name = table.get(small).unwrap().name().clone();
        table.add_waiter(&small_name, big, &ids(&[2, 3]));

        table.settle(big, 60);
        let e = table.get(big).unwrap();
        assert!(e.is_complete());
        assert_eq!(e.partial_sum(), 60);
        assert!(table.take_waiters(&small_name).is_empty());
    }

    #[test]
    fn test_due_in_deadline_order() {
        let mut table = PendingTable::new(4);
        let late = table.insert(entry(&[1, 2], 1, 300)).unwrap();
        let early = table.insert(entry(&[3, 4], 1, 100)).unwrap();
        let _future = table.insert(entry(&[5, 6], 1, 900)).unwrap();

        assert_eq!(table.due(Timestamp::from_millis(50)), alloc::vec![]);
        assert_eq!(
            table.due(Timestamp::from_millis(300)),
            alloc::vec![early, late]
        );
    }

    #[test]
    fn test_entry_apply_and_downstream() {
        let mut e = entry(&[1, 2, 3], 1, 100);
        assert!(e.still_pending(&ids(&[1, 2])));
        e.apply(&ids(&[1, 2]), 30);
        assert_eq!(e.partial_sum(), 30);
        assert!(!e.still_pending(&ids(&[1, 2])));
        assert!(!e.is_complete());
        e.apply(&ids(&[3]), 30);
        assert!(e.is_complete());

        assert!(e.add_downstream(LinkId(1), 2));
        assert!(!e.add_downstream(LinkId(1), 2));
        assert!(e.add_downstream(LinkId(2), 2));
        assert!(!e.add_downstream(LinkId(3), 2));
        assert_eq!(e.downstream(), &[LinkId(1), LinkId(2)]);
    }
}
