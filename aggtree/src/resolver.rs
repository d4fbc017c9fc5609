//! Cache and overlap resolution for newly admitted aggregate entries.
//!
//! Runs in a fixed order, each step only looking at what the previous one
//! left pending:
//! 1. cached identifiers are summed in directly
//! 2. a pending superset in the same generation makes the entry a dependent
//!    of it, and nothing is forwarded
//! 3. pending subsets, largest first, take over the identifiers they cover
//! 4. whatever is still pending goes to the splitter
//!
//! Candidates are scanned in table order and then sorted, so the choice
//! never depends on hash iteration order.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::name::{IdSet, Name};
use crate::routing::RouteTable;
use crate::table::{EntryHandle, EntryKind};
use crate::time::Timestamp;
use crate::traits::{Clock, Transport};
use crate::types::{Admission, Error};

#[cfg(any(test, feature = "debug"))]
use crate::debug::DebugEvent;

impl<T, Rt, Clk, Cfg> Engine<T, Rt, Clk, Cfg>
where
    T: Transport,
    Rt: RouteTable,
    Clk: Clock,
    Cfg: EngineConfig,
{
    pub(crate) fn resolve_and_forward(
        &mut self,
        handle: EntryHandle,
        now: Timestamp,
    ) -> Result<Admission, Error> {
        if let Some(value) = self.resolve_from_cache(handle, now) {
            return Ok(Admission::Answered { value });
        }

        if let Some(on) = self.attach_to_superset(handle) {
            return Ok(Admission::Piggybacked { on });
        }

        self.attach_to_subsets(handle);
        if self
            .table
            .get(handle)
            .is_some_and(|entry| entry.pending_ids().is_empty())
        {
            return Ok(Admission::Waiting);
        }

        self.split_and_forward(handle, now)
    }

    /// Sum cached identifiers into the entry. Completes it and returns the
    /// value if nothing is left.
    pub(crate) fn resolve_from_cache(&mut self, handle: EntryHandle, now: Timestamp) -> Option<u64> {
        let (sum, hits) = {
            let entry = self.table.get(handle)?;
            self.cache.resolve(entry.pending_ids(), now)
        };
        if hits.is_empty() {
            return None;
        }

        let entry = self.table.get_mut(handle)?;
        entry.apply(&hits, sum);
        tracing::trace!(name = %entry.name(), hits = hits.len(), "cached values applied");
        if !entry.is_complete() {
            return None;
        }

        let value = entry.partial_sum();
        self.metrics.answered_from_cache += 1;
        emit_debug!(
            self,
            DebugEvent::AnsweredFromCache {
                name: self.entry_name(handle),
                value,
            }
        );
        self.complete_entries(VecDeque::from([handle]), now);
        Some(value)
    }

    /// Register `handle` as a dependent of the smallest pending superset.
    fn attach_to_superset(&mut self, handle: EntryHandle) -> Option<Name> {
        let (superset, on) = {
            let entry = self.table.get(handle)?;
            let needed = entry.needed_ids();
            let generation = entry.generation();
            self.table
                .iter()
                .filter(|(h, other)| {
                    *h != handle
                        && other.kind() == EntryKind::Aggregate
                        && other.generation() == generation
                        && other.needed_ids().is_superset(needed)
                })
                .min_by(|(_, a), (_, b)| {
                    a.needed_ids()
                        .len()
                        .cmp(&b.needed_ids().len())
                        .then_with(|| a.name().cmp(b.name()))
                })
                .map(|(h, other)| (h, other.name().clone()))?
        };

        self.table.get_mut(superset)?.dependents.push(handle);
        self.metrics.piggybacked += 1;
        tracing::debug!(on = %on, "request piggybacked on pending superset");
        emit_debug!(
            self,
            DebugEvent::Piggybacked {
                name: self.entry_name(handle),
                on: on.clone(),
            }
        );
        Some(on)
    }

    /// Hand identifiers off to pending subsets, largest first.
    fn attach_to_subsets(&mut self, handle: EntryHandle) {
        let Some(entry) = self.table.get(handle) else {
            return;
        };
        let generation = entry.generation();
        let mut remaining = entry.pending_ids().clone();

        let mut candidates: Vec<(Name, IdSet)> = self
            .table
            .iter()
            .filter(|(h, other)| {
                *h != handle
                    && other.kind() == EntryKind::Aggregate
                    && other.generation() == generation
                    && !other.needed_ids().is_empty()
                    && other.needed_ids().is_subset(&remaining)
            })
            .map(|(_, other)| (other.name().clone(), other.needed_ids().clone()))
            .collect();
        candidates.sort_by(|(a_name, a), (b_name, b)| {
            b.len().cmp(&a.len()).then_with(|| a_name.cmp(b_name))
        });

        for (on, subset) in candidates {
            if !subset.is_subset(&remaining) {
                continue;
            }
            for id in &subset {
                remaining.remove(id);
            }
            self.table.add_waiter(&on, handle, &subset);
            tracing::trace!(on = %on, ids = subset.len(), "waiting on pending subset");
            emit_debug!(
                self,
                DebugEvent::WaitingOnSubset {
                    name: self.entry_name(handle),
                    on: on.clone(),
                    ids: subset.iter().copied().collect(),
                }
            );
        }
    }
}
