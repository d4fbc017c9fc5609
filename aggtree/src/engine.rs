//! Engine - the aggregation forwarding state machine.
//!
//! The Engine owns the value cache and the pending request table and reacts
//! to three events: a request arrives, a response arrives, a deadline fires.
//! Each handler runs to completion before the next one starts, so the table
//! is never observed half-updated.
//!
//! The request path lives in `admission`, `resolver` and `splitter`, the
//! response path in `aggregator`. This module holds the struct, the timers
//! and the async driver.
//!
//! # Usage
//!
//! ```ignore
//! let mut engine = Engine::<_, _, _, DefaultConfig>::new(transport, fib, clock);
//!
//! // Either drive it from a task...
//! spawn(async move { engine.run().await });
//!
//! // ...or call the handlers directly from an existing forwarder.
//! engine.on_request_received(request, link)?;
//! engine.on_response_received(response, link);
//! ```

#[cfg(any(test, feature = "debug"))]
use alloc::boxed::Box;
use core::marker::PhantomData;

use crate::cache::ValueCache;
use crate::config::{DefaultConfig, EngineConfig};
use crate::name::Name;
use crate::routing::RouteTable;
use crate::table::{EntryHandle, PendingTable};
use crate::time::{Duration, Timestamp};
use crate::traits::{Clock, Strategy, Transport};
use crate::types::{
    Admission, Attribution, EngineMetrics, Error, LinkId, Request, Response, UnroutablePolicy,
};
use crate::wire::{Decode, Packet};

#[cfg(any(test, feature = "debug"))]
use crate::debug::{DebugEmitter, DebugEvent};

/// How long `step()` sleeps when no deadline is pending.
const IDLE_WAKE: Duration = Duration::from_secs(60);

/// The aggregation forwarding engine.
///
/// Generic over:
/// - `T`: Transport implementation
/// - `Rt`: Route table
/// - `Clk`: Clock/timer implementation
/// - `Cfg`: Compile-time memory bounds
pub struct Engine<T, Rt, Clk, Cfg = DefaultConfig> {
    // Dependencies (injected)
    pub(crate) transport: T,
    pub(crate) routes: Rt,
    pub(crate) clock: Clk,
    pub(crate) cache: ValueCache,

    // Pending state
    pub(crate) table: PendingTable,

    // Policy
    pub(crate) unroutable: UnroutablePolicy,

    // Metrics
    pub(crate) metrics: EngineMetrics,

    #[cfg(any(test, feature = "debug"))]
    debug_emitter: Option<Box<dyn DebugEmitter>>,

    _config: PhantomData<Cfg>,
}

impl<T, Rt, Clk, Cfg> Engine<T, Rt, Clk, Cfg>
where
    T: Transport,
    Rt: RouteTable,
    Clk: Clock,
    Cfg: EngineConfig,
{
    /// Create an engine with an empty cache sized by `Cfg`.
    pub fn new(transport: T, routes: Rt, clock: Clk) -> Self {
        Self::with_cache(
            transport,
            routes,
            clock,
            ValueCache::new(Cfg::MAX_CACHED_VALUES),
        )
    }

    /// Create an engine around an existing cache.
    pub fn with_cache(transport: T, routes: Rt, clock: Clk, cache: ValueCache) -> Self {
        Self {
            transport,
            routes,
            clock,
            cache,

            table: PendingTable::new(Cfg::MAX_PENDING_ENTRIES),

            unroutable: UnroutablePolicy::default(),

            metrics: EngineMetrics::default(),

            #[cfg(any(test, feature = "debug"))]
            debug_emitter: None,

            _config: PhantomData,
        }
    }

    /// Choose what happens to identifiers without a route.
    pub fn with_unroutable_policy(mut self, policy: UnroutablePolicy) -> Self {
        self.unroutable = policy;
        self
    }

    pub fn unroutable_policy(&self) -> UnroutablePolicy {
        self.unroutable
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn routes(&self) -> &Rt {
        &self.routes
    }

    pub fn routes_mut(&mut self) -> &mut Rt {
        &mut self.routes
    }

    pub fn clock(&self) -> &Clk {
        &self.clock
    }

    pub fn cache(&self) -> &ValueCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut ValueCache {
        &mut self.cache
    }

    pub fn table(&self) -> &PendingTable {
        &self.table
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Current time from the injected clock.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Install a debug event sink.
    #[cfg(any(test, feature = "debug"))]
    pub fn set_debug_emitter(&mut self, emitter: Box<dyn DebugEmitter>) {
        self.debug_emitter = Some(emitter);
    }

    #[cfg(any(test, feature = "debug"))]
    pub(crate) fn has_debug_emitter(&self) -> bool {
        self.debug_emitter.is_some()
    }

    #[cfg(any(test, feature = "debug"))]
    pub(crate) fn emit_debug_event(&mut self, event: DebugEvent) {
        if let Some(emitter) = self.debug_emitter.as_mut() {
            emitter.emit(event);
        }
    }

    /// Earliest pending deadline, for the host's timer.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.table.next_deadline()
    }

    /// Expire every entry whose deadline has passed. Returns how many.
    pub fn expire_due(&mut self) -> usize {
        let now = self.clock.now();
        let due = self.table.due(now);
        let mut expired = 0;
        for handle in due {
            if self.expire_entry(handle, now) {
                expired += 1;
            }
        }
        expired
    }

    /// Deadline timer for `name` fired.
    ///
    /// A timer that fires before the entry's deadline is stale (the name was
    /// re-admitted with a later deadline) and is ignored.
    pub fn on_deadline_expired(&mut self, name: &Name) -> bool {
        let now = self.clock.now();
        let Some(handle) = self.table.lookup(name) else {
            return false;
        };
        let due = self
            .table
            .get(handle)
            .is_some_and(|entry| now.has_reached(entry.deadline()));
        due && self.expire_entry(handle, now)
    }

    fn expire_entry(&mut self, handle: EntryHandle, now: Timestamp) -> bool {
        let Some(entry) = self.table.remove(handle) else {
            return false;
        };
        self.metrics.entries_expired += 1;
        tracing::debug!(
            name = %entry.name(),
            pending = ?entry.pending_ids(),
            waiting = entry.waiting_for().len(),
            "pending entry expired"
        );
        emit_debug!(
            self,
            DebugEvent::EntryExpired {
                name: entry.name().clone(),
                timestamp: now,
                pending_ids: entry.pending_ids().iter().copied().collect(),
            }
        );
        true
    }

    /// Decode a raw packet and dispatch it.
    pub fn handle_transport_rx(&mut self, data: &[u8], link: LinkId) -> Result<(), Error> {
        let packet = match Packet::decode_from_slice(data) {
            Ok(p) => p,
            Err(e) => {
                self.metrics.decode_failures += 1;
                emit_debug!(
                    self,
                    DebugEvent::PacketDecodeFailed {
                        link,
                        data_len: data.len(),
                    }
                );
                return Err(e.into());
            }
        };
        match packet {
            Packet::Request(request) => self.on_request_received(request, link).map(|_| ()),
            Packet::Response(response) => {
                self.on_response_received(response, link);
                Ok(())
            }
        }
    }

    /// Wait for one inbound packet or the next deadline, and handle it.
    pub async fn step(&mut self) {
        use embassy_futures::select::{select, Either};

        let wake = match self.next_deadline() {
            Some(deadline) => deadline,
            None => self.clock.now() + IDLE_WAKE,
        };

        let result = select(
            self.transport.incoming().receive(),
            self.clock.sleep_until(wake),
        )
        .await;

        match result {
            Either::First(incoming) => {
                if let Err(e) = self.handle_transport_rx(&incoming.data, incoming.link) {
                    tracing::debug!(link = %incoming.link, error = %e, "inbound packet dropped");
                }
            }
            Either::Second(()) => {
                self.expire_due();
            }
        }
    }

    /// Run the engine's main loop.
    ///
    /// Handles inbound packets from `Transport::incoming()` and expires
    /// entries as their deadlines pass. Runs forever.
    pub async fn run(&mut self) -> ! {
        loop {
            self.step().await;
        }
    }

    /// Send `value` under `name` to every link in `links`.
    pub(crate) fn deliver_all(&mut self, name: &Name, value: u64, links: &[LinkId]) {
        for &link in links {
            self.transport
                .deliver(Response::new(name.clone(), value), link);
            self.metrics.responses_sent += 1;
        }
    }

    /// Lifetime left for sub-requests of an entry expiring at `deadline`.
    pub(crate) fn remaining_lifetime(deadline: Timestamp, now: Timestamp) -> Duration {
        deadline - now
    }
}

impl<T, Rt, Clk, Cfg> Strategy for Engine<T, Rt, Clk, Cfg>
where
    T: Transport,
    Rt: RouteTable,
    Clk: Clock,
    Cfg: EngineConfig,
{
    fn on_request_received(&mut self, request: Request, link: LinkId) -> Result<Admission, Error> {
        Engine::on_request_received(self, request, link)
    }

    fn on_response_received(&mut self, response: Response, link: LinkId) -> Attribution {
        Engine::on_response_received(self, response, link)
    }

    fn on_deadline_expired(&mut self, name: &Name) -> bool {
        Engine::on_deadline_expired(self, name)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use alloc::sync::Arc;
    use alloc::vec::Vec;
    use core::cell::RefCell;

    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use embassy_sync::blocking_mutex::Mutex;

    use super::*;
    use crate::config::SmallConfig;
    use crate::name::IdSet;
    use crate::routing::Fib;
    use crate::traits::test_impls::{MockClock, MockTransport};
    use crate::wire::Encode;

    /// Type alias for test engines using default config.
    pub(crate) type TestEngine = Engine<MockTransport, Fib, MockClock, DefaultConfig>;

    pub(crate) fn ids(list: &[u64]) -> IdSet {
        list.iter().copied().collect()
    }

    /// Engine with `/aggregate/<id>` routed to `LinkId(id)` for each id.
    pub(crate) fn engine_with_routes(routed: &[u64]) -> TestEngine {
        let mut fib = Fib::new();
        for &id in routed {
            fib.add_route(Name::identifier(id), LinkId(id as u32), 1);
        }
        Engine::new(MockTransport::new(), fib, MockClock::new())
    }

    /// Debug sink shared with the test body.
    #[derive(Clone)]
    pub(crate) struct SharedEvents(Arc<Mutex<CriticalSectionRawMutex, RefCell<Vec<DebugEvent>>>>);

    impl Default for SharedEvents {
        fn default() -> Self {
            Self(Arc::new(Mutex::new(RefCell::new(Vec::new()))))
        }
    }

    impl SharedEvents {
        pub(crate) fn take(&self) -> Vec<DebugEvent> {
            self.0.lock(|events| core::mem::take(&mut *events.borrow_mut()))
        }
    }

    impl DebugEmitter for SharedEvents {
        fn emit(&mut self, event: DebugEvent) {
            self.0.lock(|events| events.borrow_mut().push(event));
        }
    }

    #[test]
    fn test_engine_creation() {
        let engine = engine_with_routes(&[1, 2]);
        assert!(engine.table().is_empty());
        assert!(engine.cache().is_empty());
        assert_eq!(engine.cache().capacity(), DefaultConfig::MAX_CACHED_VALUES);
        assert_eq!(engine.table().capacity(), DefaultConfig::MAX_PENDING_ENTRIES);
        assert_eq!(engine.unroutable_policy(), UnroutablePolicy::Abandon);
        assert_eq!(engine.next_deadline(), None);
    }

    #[test]
    fn test_small_config_bounds() {
        let engine: Engine<MockTransport, Fib, MockClock, SmallConfig> =
            Engine::new(MockTransport::new(), Fib::new(), MockClock::new());
        assert_eq!(engine.table().capacity(), SmallConfig::MAX_PENDING_ENTRIES);
        assert_eq!(engine.cache().capacity(), SmallConfig::MAX_CACHED_VALUES);
    }

    #[test]
    fn test_injected_cache_is_used() {
        let mut cache = ValueCache::new(4);
        cache.insert(1, 10, Timestamp::ZERO);
        cache.insert(2, 20, Timestamp::ZERO);
        let mut engine: TestEngine =
            Engine::with_cache(MockTransport::new(), Fib::new(), MockClock::new(), cache);

        let admission = engine
            .on_request_received(Request::aggregate(&ids(&[1, 2]), None), LinkId(7))
            .unwrap();
        assert_eq!(admission, Admission::Answered { value: 30 });
        assert!(engine.transport().forwarded().is_empty());
    }

    #[test]
    fn test_deadline_expiry_removes_entry() {
        let mut engine = engine_with_routes(&[1, 2]);
        let request = Request::aggregate(&ids(&[1, 2]), Some(1));
        let name = request.name.clone();
        engine.on_request_received(request, LinkId(9)).unwrap();
        assert_eq!(engine.next_deadline(), Some(Timestamp::from_secs(2)));

        // Early timer is stale
        engine.clock().set(Timestamp::from_millis(1999));
        assert!(!engine.on_deadline_expired(&name));
        assert_eq!(engine.table().len(), 1);

        engine.clock().set(Timestamp::from_secs(2));
        assert!(engine.on_deadline_expired(&name));
        assert!(engine.table().is_empty());
        assert_eq!(engine.metrics().entries_expired, 1);
        assert!(!engine.on_deadline_expired(&name));

        // Nobody downstream heard anything
        assert!(engine.transport().delivered().is_empty());
    }

    #[test]
    fn test_expire_due_sweeps_all() {
        let mut engine = engine_with_routes(&[1, 2, 3, 4]);
        engine
            .on_request_received(
                Request::aggregate(&ids(&[1, 2]), None).with_lifetime(Duration::from_millis(100)),
                LinkId(9),
            )
            .unwrap();
        engine
            .on_request_received(
                Request::aggregate(&ids(&[3, 4]), None).with_lifetime(Duration::from_millis(500)),
                LinkId(9),
            )
            .unwrap();

        engine.clock().set(Timestamp::from_millis(100));
        assert_eq!(engine.expire_due(), 1);
        assert_eq!(engine.table().len(), 1);
        assert_eq!(engine.next_deadline(), Some(Timestamp::from_millis(500)));
    }

    #[test]
    fn test_expiry_emits_pending_ids() {
        let mut engine = engine_with_routes(&[1, 2]);
        let events = SharedEvents::default();
        engine.set_debug_emitter(Box::new(events.clone()));

        engine
            .on_request_received(Request::aggregate(&ids(&[1, 2]), None), LinkId(9))
            .unwrap();
        engine.on_response_received(Response::new(Name::identifier(1), 10), LinkId(1));
        events.take();

        engine.clock().set(Timestamp::from_secs(2));
        engine.expire_due();
        let expired: Vec<_> = events
            .take()
            .into_iter()
            .filter_map(|e| match e {
                DebugEvent::EntryExpired { pending_ids, .. } => Some(pending_ids),
                _ => None,
            })
            .collect();
        assert_eq!(expired, alloc::vec![alloc::vec![2u64]]);
    }

    #[test]
    fn test_step_handles_injected_packets() {
        let mut engine = engine_with_routes(&[1, 2]);
        let request = Request::aggregate(&ids(&[1, 2]), Some(5));
        engine
            .transport()
            .inject_rx(LinkId(9), request.encode_to_vec());

        embassy_futures::block_on(engine.step());
        assert_eq!(engine.transport().forwarded().len(), 2);

        for id in [1u64, 2] {
            let sub = Name::aggregate(&ids(&[id]), Some(5));
            engine
                .transport()
                .inject_rx(LinkId(id as u32), Response::new(sub, id * 10).encode_to_vec());
            embassy_futures::block_on(engine.step());
        }

        let delivered = engine.transport_mut().take_delivered();
        assert_eq!(delivered, alloc::vec![(Response::new(request.name, 30), LinkId(9))]);
    }

    #[test]
    fn test_step_expires_when_idle() {
        let mut engine = engine_with_routes(&[1, 2]);
        engine
            .on_request_received(Request::aggregate(&ids(&[1, 2]), None), LinkId(9))
            .unwrap();

        // MockClock sleeps return at once; move time past the deadline first
        engine.clock().set(Timestamp::from_secs(3));
        embassy_futures::block_on(engine.step());
        assert!(engine.table().is_empty());
    }

    #[test]
    fn test_garbage_packet_rejected() {
        let mut engine = engine_with_routes(&[]);
        let result = engine.handle_transport_rx(&[0x05, 0x10, 0x07], LinkId(1));
        assert!(matches!(result, Err(Error::Decode(_))));
        assert_eq!(engine.metrics().decode_failures, 1);
    }

    fn drive<S: Strategy>(strategy: &mut S, request: Request, link: LinkId) -> Admission {
        strategy.on_request_received(request, link).unwrap()
    }

    #[test]
    fn test_strategy_interface() {
        let mut engine = engine_with_routes(&[1, 2]);
        let request = Request::aggregate(&ids(&[1, 2]), None);
        let name = request.name.clone();
        assert_eq!(
            drive(&mut engine, request, LinkId(9)),
            Admission::Forwarded { sub_requests: 2 }
        );

        let attribution =
            Strategy::on_response_received(&mut engine, Response::new(Name::identifier(1), 1), LinkId(1));
        assert_eq!(attribution.linked, 1);

        engine.clock().set(Timestamp::from_secs(2));
        assert!(Strategy::on_deadline_expired(&mut engine, &name));
    }
}
