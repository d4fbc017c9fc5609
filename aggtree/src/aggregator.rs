//! Response attribution and the completion cascade.
//!
//! A response is credited to:
//! - every entry that forwarded (or shared) a sub-request under its name,
//!   provided the identifiers it covers are still pending there
//! - every entry waiting on a pending entry of that name
//!
//! Completing one entry can complete others: its waiters receive its sum and
//! its dependents are answered from its result. Completions run off a FIFO
//! worklist so a long chain does not recurse.

use alloc::collections::VecDeque;

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::name::{IdSet, Name};
use crate::routing::RouteTable;
use crate::table::{EntryHandle, EntryKind};
use crate::time::Timestamp;
use crate::traits::{Clock, Transport};
use crate::types::{Attribution, LinkId, Response};

#[cfg(any(test, feature = "debug"))]
use crate::debug::DebugEvent;

/// Queued unit of completion work.
enum Work {
    /// Entry has everything it needs.
    Complete(EntryHandle),
    /// Entry piggybacked on a superset that just finished with `sum`.
    Dependent {
        handle: EntryHandle,
        superset_ids: IdSet,
        sum: u64,
    },
}

impl<T, Rt, Clk, Cfg> Engine<T, Rt, Clk, Cfg>
where
    T: Transport,
    Rt: RouteTable,
    Clk: Clock,
    Cfg: EngineConfig,
{
    /// Handle a response that arrived on `link`.
    pub fn on_response_received(&mut self, response: Response, link: LinkId) -> Attribution {
        let now = self.clock.now();
        self.metrics.responses_received += 1;
        let Response { name, value } = response;

        let mut attribution = Attribution::default();
        let covered = if name.is_aggregate() {
            name.parse_ids()
        } else {
            IdSet::new()
        };

        // Atomic values are cached whoever asked for them
        if covered.len() == 1 {
            if let Some(&id) = covered.first() {
                self.cache.insert(id, value, now);
                attribution.cached = true;
                emit_debug!(self, DebugEvent::ValueCached { id, value });
            }
        }

        let mut work = VecDeque::new();

        for handle in self.table.take_forwarded(&name) {
            attribution.linked += 1;
            if self.credit_linked(handle, &name, &covered, value) {
                work.push_back(handle);
            }
        }

        for handle in self.table.take_waiters(&name) {
            attribution.waiters += 1;
            if self.credit_waiter(handle, &name, value) {
                work.push_back(handle);
            }
        }

        attribution.completed = self.complete_entries(work, now);

        if attribution.is_unsolicited() {
            self.metrics.responses_unsolicited += 1;
            tracing::trace!(name = %name, link = %link, "unsolicited response");
        }
        attribution
    }

    /// Apply a response to an entry that forwarded `name`. Returns true if
    /// the entry is now complete.
    fn credit_linked(&mut self, handle: EntryHandle, name: &Name, covered: &IdSet, value: u64) -> bool {
        let Some(entry) = self.table.get_mut(handle) else {
            return false;
        };
        match entry.kind() {
            EntryKind::Relay => {
                entry.partial_sum = value;
                true
            }
            EntryKind::Aggregate => {
                if covered.is_empty() || !entry.still_pending(covered) {
                    tracing::debug!(
                        name = %entry.name(),
                        from = %name,
                        "contribution no longer pending, skipped"
                    );
                    emit_debug!(
                        self,
                        DebugEvent::ContributionSkipped {
                            name: self.entry_name(handle),
                            from: name.clone(),
                        }
                    );
                    return false;
                }
                entry.apply(covered, value);
                let complete = entry.is_complete();
                emit_debug!(
                    self,
                    DebugEvent::ContributionApplied {
                        name: self.entry_name(handle),
                        from: name.clone(),
                        value,
                        remaining: self.remaining(handle),
                    }
                );
                complete
            }
        }
    }

    /// Apply the sum of the pending entry `name` to an entry waiting on it.
    fn credit_waiter(&mut self, handle: EntryHandle, name: &Name, value: u64) -> bool {
        let Some(entry) = self.table.get_mut(handle) else {
            return false;
        };
        let before = entry.waiting_for.len();
        entry.waiting_for.retain(|_, on| on != name);
        if entry.waiting_for.len() == before {
            return false;
        }
        entry.partial_sum = entry.partial_sum.wrapping_add(value);
        let complete = entry.is_complete();
        emit_debug!(
            self,
            DebugEvent::ContributionApplied {
                name: self.entry_name(handle),
                from: name.clone(),
                value,
                remaining: self.remaining(handle),
            }
        );
        complete
    }

    /// Run completions until the worklist drains. Returns how many entries
    /// completed.
    pub(crate) fn complete_entries(&mut self, ready: VecDeque<EntryHandle>, now: Timestamp) -> usize {
        let mut work: VecDeque<Work> = ready.into_iter().map(Work::Complete).collect();
        let mut completed = 0;

        while let Some(item) = work.pop_front() {
            match item {
                Work::Complete(handle) => {
                    let Some(entry) = self.table.remove(handle) else {
                        continue;
                    };
                    completed += 1;
                    self.metrics.entries_completed += 1;
                    let value = entry.partial_sum();
                    tracing::debug!(
                        name = %entry.name(),
                        value,
                        downstream = entry.downstream().len(),
                        "aggregation complete"
                    );
                    emit_debug!(
                        self,
                        DebugEvent::EntryCompleted {
                            name: entry.name().clone(),
                            value,
                            downstream: entry.downstream().len(),
                        }
                    );
                    self.deliver_all(entry.name(), value, entry.downstream());

                    for waiter in self.table.take_waiters(entry.name()) {
                        if self.credit_waiter(waiter, entry.name(), value) {
                            work.push_back(Work::Complete(waiter));
                        }
                    }
                    for &dependent in entry.dependents() {
                        work.push_back(Work::Dependent {
                            handle: dependent,
                            superset_ids: entry.needed_ids().clone(),
                            sum: value,
                        });
                    }
                }
                Work::Dependent {
                    handle,
                    superset_ids,
                    sum,
                } => {
                    if self.answer_dependent(handle, &superset_ids, sum, now) {
                        work.push_back(Work::Complete(handle));
                    }
                }
            }
        }
        completed
    }

    /// Answer a dependent from its finished superset. Returns true if the
    /// dependent can complete now; otherwise it has been re-admitted.
    fn answer_dependent(&mut self, handle: EntryHandle, superset_ids: &IdSet, sum: u64, now: Timestamp) -> bool {
        let Some(entry) = self.table.get(handle) else {
            return false;
        };
        let needed = entry.needed_ids().clone();

        if let Some(value) = self.cache.sum(&needed, now) {
            self.table.settle(handle, value);
            return true;
        }

        let extras: IdSet = superset_ids.difference(&needed).copied().collect();
        if let Some(extra) = self.cache.sum(&extras, now) {
            self.table.settle(handle, sum.wrapping_sub(extra));
            return true;
        }

        self.readmit(handle, now)
    }

    /// Fetch a dependent on its own. Keeps its deadline and downstream
    /// links and skips overlap resolution. Returns true if the cache alone
    /// finished it.
    fn readmit(&mut self, handle: EntryHandle, now: Timestamp) -> bool {
        self.metrics.dependents_readmitted += 1;
        let (sum, hits) = match self.table.get(handle) {
            Some(entry) => self.cache.resolve(entry.pending_ids(), now),
            None => return false,
        };
        let Some(entry) = self.table.get_mut(handle) else {
            return false;
        };
        entry.apply(&hits, sum);
        let complete = entry.is_complete();
        let residual = !entry.pending_ids().is_empty();
        tracing::debug!(name = %self.entry_name(handle), "dependent re-admitted");
        emit_debug!(
            self,
            DebugEvent::DependentReadmitted {
                name: self.entry_name(handle),
                missing: self.remaining(handle),
            }
        );

        if complete {
            return true;
        }
        if residual {
            let name = self.entry_name(handle);
            if let Err(e) = self.split_and_forward(handle, now) {
                tracing::warn!(name = %name, error = %e, "re-admitted dependent dropped");
            }
        }
        false
    }

    pub(crate) fn entry_name(&self, handle: EntryHandle) -> Name {
        self.table
            .get(handle)
            .map(|entry| entry.name().clone())
            .unwrap_or_default()
    }

    #[cfg(any(test, feature = "debug"))]
    pub(crate) fn remaining(&self, handle: EntryHandle) -> usize {
        self.table
            .get(handle)
            .map(|entry| entry.pending_ids().len() + entry.waiting_for().len())
            .unwrap_or(0)
    }
}
