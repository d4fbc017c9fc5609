//! Request admission.
//!
//! Every request goes through dedup first. A name already pending only gains
//! a downstream link. New names are classified:
//! - not an aggregation name, or exactly one identifier: relayed unmodified
//! - an aggregation name without identifiers: answered with 0
//! - otherwise: a new aggregate entry, handed to the resolver

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::routing::RouteTable;
use crate::table::PendingEntry;
use crate::time::Timestamp;
use crate::traits::{Clock, Transport};
use crate::types::{Admission, Error, LinkId, Request, Response};

#[cfg(any(test, feature = "debug"))]
use crate::debug::DebugEvent;

impl<T, Rt, Clk, Cfg> Engine<T, Rt, Clk, Cfg>
where
    T: Transport,
    Rt: RouteTable,
    Clk: Clock,
    Cfg: EngineConfig,
{
    /// Handle a request that arrived on `link`.
    pub fn on_request_received(&mut self, request: Request, link: LinkId) -> Result<Admission, Error> {
        let now = self.clock.now();
        self.metrics.requests_received += 1;

        if let Some(handle) = self.table.lookup(&request.name) {
            // Duplicates never extend the deadline
            if let Some(entry) = self.table.get_mut(handle) {
                entry.add_downstream(link, Cfg::MAX_DOWNSTREAM_LINKS);
            }
            self.metrics.requests_merged += 1;
            tracing::trace!(name = %request.name, link = %link, "merged duplicate request");
            emit_debug!(
                self,
                DebugEvent::RequestMerged {
                    name: request.name.clone(),
                    link,
                }
            );
            return Ok(Admission::Merged);
        }

        if !request.name.is_aggregate() {
            return self.relay(request, link, now);
        }

        let ids = request.name.parse_ids();
        match ids.len() {
            0 => {
                tracing::debug!(name = %request.name, "aggregation request without identifiers");
                self.transport.deliver(Response::new(request.name, 0), link);
                self.metrics.responses_sent += 1;
                return Ok(Admission::Answered { value: 0 });
            }
            1 => return self.relay(request, link, now),
            _ => {}
        }

        let entry = PendingEntry::aggregate(request.name.clone(), ids, now + request.lifetime);
        let handle = self.insert_entry(entry)?;
        if let Some(entry) = self.table.get_mut(handle) {
            entry.add_downstream(link, Cfg::MAX_DOWNSTREAM_LINKS);
        }
        tracing::debug!(name = %request.name, link = %link, "admitted aggregation request");

        self.resolve_and_forward(handle, now)
    }

    /// Send a name on unmodified and pass back whatever answers it.
    fn relay(&mut self, request: Request, link: LinkId, now: Timestamp) -> Result<Admission, Error> {
        let Some(hop) = self.routes.lookup_name(&request.name) else {
            tracing::debug!(name = %request.name, "no route for relayed request");
            return Err(Error::NoRoute);
        };

        let handle = self.insert_entry(PendingEntry::relay(
            request.name.clone(),
            now + request.lifetime,
        ))?;
        if let Some(entry) = self.table.get_mut(handle) {
            entry.add_downstream(link, Cfg::MAX_DOWNSTREAM_LINKS);
        }

        let name = request.name.clone();
        if self.table.link_forwarded(&name, handle) {
            self.transport.forward(request, hop.link);
            self.metrics.sub_requests_forwarded += 1;
            tracing::trace!(name = %name, hop = %hop.link, "relayed request");
        } else {
            self.metrics.sub_requests_shared += 1;
        }
        Ok(Admission::Relayed)
    }

    fn insert_entry(&mut self, entry: PendingEntry) -> Result<crate::table::EntryHandle, Error> {
        if self.table.is_full() {
            tracing::warn!(name = %entry.name(), "pending table full, request dropped");
            emit_debug!(
                self,
                DebugEvent::TableFull {
                    name: entry.name().clone(),
                }
            );
            return Err(Error::TableFull);
        }
        self.table.insert(entry)
    }
}

#[cfg(test)]
mod tests {
    use alloc::boxed::Box;
    use alloc::vec;

    use crate::config::SmallConfig;
    use crate::engine::tests::{engine_with_routes, ids, SharedEvents};
    use crate::engine::Engine;
    use crate::name::{Component, Name};
    use crate::routing::Fib;
    use crate::time::{Duration, Timestamp};
    use crate::traits::test_impls::{MockClock, MockTransport};
    use crate::types::{Admission, Error, LinkId, Request, Response};

    #[test]
    fn test_duplicate_merges_downstream() {
        let mut engine = engine_with_routes(&[1, 2]);
        let request = Request::aggregate(&ids(&[1, 2]), Some(1));

        engine.on_request_received(request.clone(), LinkId(7)).unwrap();
        let forwarded = engine.transport().forwarded().len();

        engine.clock().advance(Duration::from_millis(500));
        let again = engine
            .on_request_received(request.clone(), LinkId(8))
            .unwrap();
        assert_eq!(again, Admission::Merged);
        // Nothing new goes upstream
        assert_eq!(engine.transport().forwarded().len(), forwarded);

        let handle = engine.table().lookup(&request.name).unwrap();
        let entry = engine.table().get(handle).unwrap();
        assert_eq!(entry.downstream(), &[LinkId(7), LinkId(8)]);
        // Deadline not extended by the duplicate
        assert_eq!(entry.deadline(), Timestamp::from_secs(2));
        assert_eq!(engine.metrics().requests_merged, 1);
    }

    #[test]
    fn test_duplicate_from_same_link_recorded_once() {
        let mut engine = engine_with_routes(&[1, 2]);
        let request = Request::aggregate(&ids(&[1, 2]), None);
        engine.on_request_received(request.clone(), LinkId(7)).unwrap();
        engine.on_request_received(request.clone(), LinkId(7)).unwrap();

        let handle = engine.table().lookup(&request.name).unwrap();
        assert_eq!(engine.table().get(handle).unwrap().downstream(), &[LinkId(7)]);
    }

    #[test]
    fn test_downstream_links_capped() {
        let mut engine: Engine<MockTransport, Fib, MockClock, SmallConfig> = {
            let mut fib = Fib::new();
            fib.add_route(Name::identifier(1), LinkId(1), 1);
            fib.add_route(Name::identifier(2), LinkId(2), 1);
            Engine::new(MockTransport::new(), fib, MockClock::new())
        };
        let request = Request::aggregate(&ids(&[1, 2]), None);
        for link in 10..30 {
            engine.on_request_received(request.clone(), LinkId(link)).unwrap();
        }
        let handle = engine.table().lookup(&request.name).unwrap();
        assert_eq!(engine.table().get(handle).unwrap().downstream().len(), 8);
    }

    #[test]
    fn test_empty_aggregation_answers_zero() {
        let mut engine = engine_with_routes(&[]);
        let request = Request::aggregate(&ids(&[]), Some(4));
        let admission = engine
            .on_request_received(request.clone(), LinkId(3))
            .unwrap();
        assert_eq!(admission, Admission::Answered { value: 0 });
        assert!(engine.table().is_empty());
        assert_eq!(
            engine.transport().delivered(),
            &[(Response::new(request.name, 0), LinkId(3))]
        );
    }

    #[test]
    fn test_single_identifier_relayed_unmodified() {
        let mut engine = engine_with_routes(&[4]);
        // A cached value must not short-circuit a single-id request
        engine.cache_mut().insert(4, 99, Timestamp::ZERO);

        let request = Request::aggregate(&ids(&[4]), Some(2));
        let admission = engine
            .on_request_received(request.clone(), LinkId(9))
            .unwrap();
        assert_eq!(admission, Admission::Relayed);
        assert_eq!(engine.transport().forwarded(), &[(request.clone(), LinkId(4))]);

        engine.on_response_received(Response::new(request.name.clone(), 41), LinkId(4));
        assert_eq!(
            engine.transport().delivered(),
            &[(Response::new(request.name, 41), LinkId(9))]
        );
        assert!(engine.table().is_empty());
        assert_eq!(engine.cache().get(4, Timestamp::ZERO), Some(41));
    }

    #[test]
    fn test_plain_name_relayed() {
        let mut fib = Fib::new();
        let prefix = Name::from_components(vec![Component::generic(b"video")]);
        fib.add_route(prefix.clone(), LinkId(5), 1);
        let mut engine: crate::engine::tests::TestEngine =
            Engine::new(MockTransport::new(), fib, MockClock::new());

        let mut name = prefix.clone();
        name.push(Component::generic(b"frame1"));
        let admission = engine
            .on_request_received(Request::new(name.clone()), LinkId(2))
            .unwrap();
        assert_eq!(admission, Admission::Relayed);
        assert_eq!(engine.transport().forwarded()[0].1, LinkId(5));

        let attribution = engine.on_response_received(Response::new(name.clone(), 7), LinkId(5));
        assert_eq!(attribution.linked, 1);
        assert!(!attribution.cached);
        assert_eq!(engine.transport().delivered(), &[(Response::new(name, 7), LinkId(2))]);
    }

    #[test]
    fn test_relay_without_route() {
        let mut engine = engine_with_routes(&[]);
        let result = engine.on_request_received(Request::aggregate(&ids(&[4]), None), LinkId(1));
        assert_eq!(result, Err(Error::NoRoute));
        assert!(engine.table().is_empty());
    }

    #[test]
    fn test_table_full_rejects_and_emits() {
        let mut fib = Fib::new();
        for id in 1..=200u64 {
            fib.add_route(Name::identifier(id), LinkId(1), 1);
        }
        let mut engine: Engine<MockTransport, Fib, MockClock, SmallConfig> =
            Engine::new(MockTransport::new(), fib, MockClock::new());
        let events = SharedEvents::default();
        engine.set_debug_emitter(Box::new(events.clone()));

        for i in 0..64u64 {
            let request = Request::aggregate(&ids(&[2 * i + 1, 2 * i + 2]), None);
            engine.on_request_received(request, LinkId(9)).unwrap();
        }
        assert!(engine.table().is_full());

        let result = engine.on_request_received(Request::aggregate(&ids(&[150, 151]), None), LinkId(9));
        assert_eq!(result, Err(Error::TableFull));
        assert!(events
            .take()
            .iter()
            .any(|e| matches!(e, crate::debug::DebugEvent::TableFull { .. })));
    }
}
