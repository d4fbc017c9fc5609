//! SimNode wrapper for simulated aggregation forwarders.

use std::cell::Cell;
use std::future::{ready, Ready};
use std::sync::{Arc, Mutex};

use aggtree::config::{DefaultConfig, EngineConfig};
use aggtree::debug::{DebugEmitter, DebugEvent};
use aggtree::traits::{Clock, Transport, TransportInChannel};
use aggtree::{
    Duration, Engine, Fib, Identifier, LinkId, Packet, Request, Response, Timestamp,
    UnroutablePolicy, ValueCache,
};
use embassy_sync::channel::Channel;

use crate::metrics::AppDelivery;
use crate::topology::{link_to, neighbor_of, NodeId};

/// Transport that records everything the engine sends.
///
/// The simulator drains the outbox after every call into the engine and
/// turns each entry into a packet on a link.
pub struct SimTransport {
    outbox: Vec<(Packet, LinkId)>,
    incoming: TransportInChannel,
}

impl SimTransport {
    pub fn new() -> Self {
        Self {
            outbox: Vec::new(),
            incoming: Channel::new(),
        }
    }

    /// Take all outgoing packets in send order.
    pub fn take_sent(&mut self) -> Vec<(Packet, LinkId)> {
        std::mem::take(&mut self.outbox)
    }
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimTransport {
    fn forward(&mut self, request: Request, hop: LinkId) {
        self.outbox.push((Packet::Request(request), hop));
    }

    fn deliver(&mut self, response: Response, link: LinkId) {
        self.outbox.push((Packet::Response(response), link));
    }

    fn incoming(&self) -> &TransportInChannel {
        &self.incoming
    }
}

/// Mock clock for simulation.
///
/// Time is controlled externally by the simulator.
pub struct SimClock {
    current: Cell<Timestamp>,
}

impl SimClock {
    pub fn new() -> Self {
        Self {
            current: Cell::new(Timestamp::ZERO),
        }
    }

    pub fn set(&self, time: Timestamp) {
        self.current.set(time);
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SimClock {
    type SleepFuture<'a> = Ready<()>;

    fn now(&self) -> Timestamp {
        self.current.get()
    }

    fn sleep_until(&self, _time: Timestamp) -> Self::SleepFuture<'_> {
        ready(())
    }
}

/// Atomic value source attached to a node's application link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Producer {
    pub id: Identifier,
    pub value: u64,
}

impl Producer {
    pub fn new(id: Identifier, value: u64) -> Self {
        Self { id, value }
    }

    /// Answer a request naming exactly this producer's identifier.
    pub fn answer(&self, request: &Request) -> Option<Response> {
        let name = &request.name;
        if !name.is_aggregate() {
            return None;
        }
        let ids = name.parse_ids();
        if ids.len() == 1 && ids.contains(&self.id) {
            Some(Response::new(name.clone(), self.value))
        } else {
            None
        }
    }
}

/// Collects a node's debug events behind a shared handle.
#[derive(Clone, Default)]
struct EventSink(Arc<Mutex<Vec<DebugEvent>>>);

impl EventSink {
    fn take(&self) -> Vec<DebugEvent> {
        match self.0.lock() {
            Ok(mut events) => std::mem::take(&mut *events),
            Err(_) => Vec::new(),
        }
    }
}

impl DebugEmitter for EventSink {
    fn emit(&mut self, event: DebugEvent) {
        if let Ok(mut events) = self.0.lock() {
            events.push(event);
        }
    }
}

/// Engine type hosted by every simulated node.
pub type SimEngine = Engine<SimTransport, Fib, SimClock, DefaultConfig>;

/// A forwarder in the simulation, optionally with a producer behind it.
pub struct SimNode {
    id: NodeId,
    engine: SimEngine,
    producer: Option<Producer>,
    /// Responses handed to the local application, not yet collected.
    app_deliveries: Vec<AppDelivery>,
    debug_events: EventSink,
}

impl SimNode {
    /// Create a node with an empty route table.
    pub fn new(id: NodeId, policy: UnroutablePolicy, cache_ttl: Option<Duration>) -> Self {
        let mut cache = ValueCache::new(DefaultConfig::MAX_CACHED_VALUES);
        if let Some(ttl) = cache_ttl {
            cache = cache.with_ttl(ttl);
        }

        let mut engine = Engine::with_cache(SimTransport::new(), Fib::new(), SimClock::new(), cache)
            .with_unroutable_policy(policy);
        let debug_events = EventSink::default();
        engine.set_debug_emitter(Box::new(debug_events.clone()));

        Self {
            id,
            engine,
            producer: None,
            app_deliveries: Vec::new(),
            debug_events,
        }
    }

    /// Attach a producer to the application link.
    pub fn with_producer(mut self, producer: Producer) -> Self {
        self.producer = Some(producer);
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn engine(&self) -> &SimEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut SimEngine {
        &mut self.engine
    }

    pub fn producer(&self) -> Option<&Producer> {
        self.producer.as_ref()
    }

    /// Change the producer's value. Returns false if the node has none.
    pub fn set_producer_value(&mut self, value: u64) -> bool {
        match self.producer.as_mut() {
            Some(producer) => {
                producer.value = value;
                true
            }
            None => false,
        }
    }

    /// Handle an encoded packet that arrived from `from`.
    ///
    /// Returns the packets to put on the wire, keyed by neighbor.
    pub fn handle_packet(&mut self, data: &[u8], from: NodeId, now: Timestamp) -> Vec<(NodeId, Packet)> {
        self.engine.clock().set(now);
        let link = link_to(from);
        if let Err(e) = self.engine.handle_transport_rx(data, link) {
            tracing::debug!(node = self.id, %link, error = %e, "packet rejected");
        }
        self.pump(now)
    }

    /// Issue a request from the local application.
    pub fn issue_request(&mut self, request: Request, now: Timestamp) -> Vec<(NodeId, Packet)> {
        self.engine.clock().set(now);
        let name = request.name.clone();
        match self.engine.on_request_received(request, LinkId::APP) {
            Ok(admission) => {
                tracing::trace!(node = self.id, %name, ?admission, "request issued");
            }
            Err(e) => {
                tracing::debug!(node = self.id, %name, error = %e, "request refused");
            }
        }
        self.pump(now)
    }

    /// Expire entries whose deadline has passed.
    pub fn handle_deadlines(&mut self, now: Timestamp) -> usize {
        self.engine.clock().set(now);
        self.engine.expire_due()
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.engine.next_deadline()
    }

    /// Take responses delivered to the local application.
    pub fn take_app_deliveries(&mut self) -> Vec<AppDelivery> {
        std::mem::take(&mut self.app_deliveries)
    }

    /// Take all debug events emitted by the engine so far.
    pub fn take_debug_events(&self) -> Vec<DebugEvent> {
        self.debug_events.take()
    }

    /// Drain the outbox, serving application-link traffic locally.
    ///
    /// Answers from the producer re-enter the engine, which may send more,
    /// so this loops until nothing is left for the application.
    fn pump(&mut self, now: Timestamp) -> Vec<(NodeId, Packet)> {
        let mut external = Vec::new();
        loop {
            let sent = self.engine.transport_mut().take_sent();
            if sent.is_empty() {
                break;
            }
            for (packet, link) in sent {
                match neighbor_of(link) {
                    Some(neighbor) => external.push((neighbor, packet)),
                    None => self.handle_local(packet, now),
                }
            }
        }
        external
    }

    fn handle_local(&mut self, packet: Packet, now: Timestamp) {
        match packet {
            Packet::Request(request) => {
                match self.producer.and_then(|p| p.answer(&request)) {
                    Some(response) => {
                        self.engine.on_response_received(response, LinkId::APP);
                    }
                    None => {
                        tracing::debug!(node = self.id, name = %request.name, "no local producer");
                    }
                }
            }
            Packet::Response(response) => {
                tracing::debug!(
                    node = self.id,
                    name = %response.name,
                    value = response.value,
                    "response delivered to application"
                );
                self.app_deliveries.push(AppDelivery {
                    time: now,
                    node: self.id,
                    name: response.name,
                    value: response.value,
                });
            }
        }
    }
}
