//! Splitting an entry's residual identifiers into per-next-hop sub-requests.
//!
//! Identifiers are grouped by the next hop their route points to. A group
//! that covers everything the entry needs is sent under the entry's own
//! name; any other group becomes `/aggregate/<group>/[generation]`. A
//! sub-request name already outstanding is shared rather than sent again.

use alloc::collections::BTreeMap;

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::name::{IdSet, Name};
use crate::routing::RouteTable;
use crate::table::EntryHandle;
use crate::time::{Duration, Timestamp};
use crate::traits::{Clock, Transport};
use crate::types::{Admission, Error, LinkId, Request, UnroutablePolicy};

#[cfg(any(test, feature = "debug"))]
use crate::debug::DebugEvent;

impl<T, Rt, Clk, Cfg> Engine<T, Rt, Clk, Cfg>
where
    T: Transport,
    Rt: RouteTable,
    Clk: Clock,
    Cfg: EngineConfig,
{
    /// Forward the entry's pending identifiers upstream.
    ///
    /// Routes are checked for every identifier before anything is sent, so
    /// an abandoned request leaves nothing outstanding behind.
    pub(crate) fn split_and_forward(
        &mut self,
        handle: EntryHandle,
        now: Timestamp,
    ) -> Result<Admission, Error> {
        let Some(entry) = self.table.get(handle) else {
            return Ok(Admission::Forwarded { sub_requests: 0 });
        };
        let name = entry.name().clone();
        let needed = entry.needed_ids().clone();
        let generation = entry.generation();
        let lifetime = Self::remaining_lifetime(entry.deadline(), now);

        let mut groups: BTreeMap<LinkId, IdSet> = BTreeMap::new();
        let mut unroutable = IdSet::new();
        for &id in entry.pending_ids() {
            match self.routes.lookup(id) {
                Some(hop) => {
                    groups.entry(hop.link).or_default().insert(id);
                }
                None => {
                    unroutable.insert(id);
                }
            }
        }

        if !unroutable.is_empty() {
            let abandon = self.unroutable == UnroutablePolicy::Abandon;
            tracing::warn!(
                name = %name,
                ids = ?unroutable,
                abandoned = abandon,
                "no route for identifiers"
            );
            emit_debug!(
                self,
                DebugEvent::UnroutableIds {
                    name: name.clone(),
                    ids: unroutable.iter().copied().collect(),
                    abandoned: abandon,
                }
            );
            if abandon {
                self.table.remove(handle);
                self.metrics.entries_abandoned += 1;
                return Err(Error::Unroutable {
                    ids: unroutable.into_iter().collect(),
                });
            }
        }

        let mut sub_requests = 0;
        for (hop, ids) in groups {
            let sub_name = if ids == needed {
                name.clone()
            } else {
                Name::aggregate(&ids, generation)
            };
            self.forward_sub_request(handle, &name, sub_name, hop, lifetime);
            sub_requests += 1;
        }

        if unroutable.is_empty() {
            Ok(Admission::Forwarded { sub_requests })
        } else {
            Ok(Admission::Stalled { unroutable })
        }
    }

    /// Send `sub_name` toward `hop` unless an identical one is outstanding.
    fn forward_sub_request(
        &mut self,
        handle: EntryHandle,
        parent: &Name,
        sub_name: Name,
        hop: LinkId,
        lifetime: Duration,
    ) {
        let first = self.table.link_forwarded(&sub_name, handle);
        if first {
            tracing::trace!(parent = %parent, sub_request = %sub_name, hop = %hop, "sub-request forwarded");
            self.metrics.sub_requests_forwarded += 1;
        } else {
            tracing::trace!(parent = %parent, sub_request = %sub_name, "sub-request shared");
            self.metrics.sub_requests_shared += 1;
        }
        emit_debug!(
            self,
            DebugEvent::SubRequestForwarded {
                parent: parent.clone(),
                sub_request: sub_name.clone(),
                hop,
                shared: !first,
            }
        );
        if first {
            self.transport
                .forward(Request::new(sub_name).with_lifetime(lifetime), hop);
        }
    }
}
