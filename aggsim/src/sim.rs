//! Discrete event simulator for aggregation networks.

use std::collections::{BTreeMap, BinaryHeap};

use aggtree::{Duration, Encode, Identifier, LinkId, Name, Packet, Request, Timestamp};
use hashbrown::HashMap;

use crate::event::{Event, ScenarioAction, ScheduledEvent, SequenceNumber};
use crate::metrics::{RequestRecord, SimMetrics, SimulationResult};
use crate::node::SimNode;
use crate::topology::{link_to, NodeId, Topology};

/// Discrete event simulator driving one engine per node.
pub struct Simulator {
    /// All nodes in the simulation.
    nodes: HashMap<NodeId, SimNode>,
    /// Network topology.
    topology: Topology,
    /// Current simulation time.
    current_time: Timestamp,
    /// Priority queue of scheduled events.
    event_queue: BinaryHeap<ScheduledEvent>,
    /// Collected metrics.
    metrics: SimMetrics,
    /// Next sequence number for event ordering.
    next_seq: u64,
    /// RNG state for packet loss.
    rng_state: u64,
    /// Earliest deadline check already queued per node.
    queued_checks: HashMap<NodeId, Timestamp>,
}

impl Simulator {
    /// Create a new simulator with given RNG seed.
    pub fn new(seed: u64) -> Self {
        Self {
            nodes: HashMap::new(),
            topology: Topology::new(),
            current_time: Timestamp::ZERO,
            event_queue: BinaryHeap::new(),
            metrics: SimMetrics::new(),
            next_seq: 0,
            rng_state: seed,
            queued_checks: HashMap::new(),
        }
    }

    /// Set the network topology.
    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    /// Add a node, replacing any node with the same id.
    pub fn add_node(&mut self, node: SimNode) -> NodeId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Get a reference to a node.
    pub fn node(&self, id: NodeId) -> Option<&SimNode> {
        self.nodes.get(&id)
    }

    /// Get a mutable reference to a node.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut SimNode> {
        self.nodes.get_mut(&id)
    }

    /// All node ids in ascending order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Get the current simulation time.
    pub fn current_time(&self) -> Timestamp {
        self.current_time
    }

    /// Get the topology.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Get mutable topology.
    pub fn topology_mut(&mut self) -> &mut Topology {
        &mut self.topology
    }

    /// Get collected metrics.
    pub fn metrics(&self) -> &SimMetrics {
        &self.metrics
    }

    /// Install a route to every producer's identifier on every node.
    ///
    /// Each node routes toward the producer along a shortest path over the
    /// links active right now, with the hop count as cost. The producer's
    /// own node routes the identifier to its application link.
    pub fn install_routes(&mut self) {
        let mut producers: Vec<(NodeId, Identifier)> = self
            .nodes
            .values()
            .filter_map(|node| node.producer().map(|p| (node.id(), p.id)))
            .collect();
        producers.sort_unstable();

        for (home, id) in producers {
            let prefix = Name::identifier(id);
            if let Some(node) = self.nodes.get_mut(&home) {
                node.engine_mut()
                    .routes_mut()
                    .add_route(prefix.clone(), LinkId::APP, 0);
            }
            for (node_id, (next, hops)) in self.topology.next_hops_toward(home) {
                if let Some(node) = self.nodes.get_mut(&node_id) {
                    node.engine_mut()
                        .routes_mut()
                        .add_route(prefix.clone(), link_to(next), hops);
                }
            }
        }
    }

    /// Schedule an event.
    pub fn schedule(&mut self, time: Timestamp, event: Event) {
        let seq = SequenceNumber::new(self.next_seq);
        self.next_seq += 1;
        self.event_queue.push(ScheduledEvent::new(time, seq, event));
    }

    /// Schedule a scenario action.
    pub fn schedule_action(&mut self, time: Timestamp, action: ScenarioAction) {
        self.schedule(time, Event::ScenarioAction(action));
    }

    /// Have `node`'s application issue `request` at `time`.
    pub fn schedule_request(&mut self, time: Timestamp, node: NodeId, request: Request) {
        self.schedule(time, Event::IssueRequest { node, request });
    }

    /// Run simulation until specified time.
    pub fn run_until(&mut self, end_time: Timestamp) -> SimulationResult {
        while self
            .event_queue
            .peek()
            .is_some_and(|event| event.time <= end_time)
        {
            let Some(event) = self.event_queue.pop() else {
                break;
            };
            self.advance_time(event.time);
            self.process_event(event.event);
        }

        // Advance to end_time even if no more events
        self.advance_time(end_time);
        self.result()
    }

    /// Run simulation for specified duration.
    pub fn run_for(&mut self, duration: Duration) -> SimulationResult {
        self.run_until(self.current_time + duration)
    }

    /// Run until event queue is empty or max events processed.
    pub fn run_events(&mut self, max_events: usize) -> SimulationResult {
        let mut processed = 0;
        while processed < max_events {
            let Some(event) = self.event_queue.pop() else {
                break;
            };
            self.advance_time(event.time);
            self.process_event(event.event);
            processed += 1;
        }
        self.result()
    }

    fn result(&self) -> SimulationResult {
        let node_metrics: BTreeMap<NodeId, _> = self
            .nodes
            .iter()
            .map(|(&id, node)| (id, node.engine().metrics().clone()))
            .collect();
        SimulationResult {
            end_time: self.current_time,
            metrics: self.metrics.clone(),
            node_metrics,
            queue_exhausted: self.event_queue.is_empty(),
        }
    }

    /// Advance simulation time.
    fn advance_time(&mut self, time: Timestamp) {
        if time > self.current_time {
            self.current_time = time;
        }
    }

    /// Process a single event.
    fn process_event(&mut self, event: Event) {
        match event {
            Event::PacketDelivery { to, from, data } => {
                self.deliver_packet(to, from, data);
            }
            Event::DeadlineCheck { node } => {
                self.check_deadlines(node);
            }
            Event::IssueRequest { node, request } => {
                self.issue_request(node, request);
            }
            Event::ScenarioAction(action) => {
                self.execute_action(action);
            }
        }
    }

    fn deliver_packet(&mut self, to: NodeId, from: NodeId, data: Vec<u8>) {
        let now = self.current_time;
        let Some(node) = self.nodes.get_mut(&to) else {
            tracing::warn!(node = to, "packet for unknown node dropped");
            return;
        };
        let outgoing = node.handle_packet(&data, from, now);
        self.metrics.packets_delivered += 1;
        self.after_node_call(to, outgoing);
    }

    fn issue_request(&mut self, node_id: NodeId, request: Request) {
        let now = self.current_time;
        let Some(node) = self.nodes.get_mut(&node_id) else {
            tracing::warn!(node = node_id, "request from unknown node ignored");
            return;
        };
        self.metrics.requests_issued += 1;
        let outgoing = node.issue_request(request, now);
        self.after_node_call(node_id, outgoing);
    }

    fn check_deadlines(&mut self, node_id: NodeId) {
        let now = self.current_time;
        if self.queued_checks.get(&node_id) == Some(&now) {
            self.queued_checks.remove(&node_id);
        }
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return;
        };
        let expired = node.handle_deadlines(now);
        if expired > 0 {
            tracing::debug!(node = node_id, expired, "pending entries expired");
        }
        self.refresh_deadline_check(node_id);
    }

    /// Send what a node produced, collect its app deliveries and make sure
    /// its next deadline has a check queued.
    fn after_node_call(&mut self, sender: NodeId, outgoing: Vec<(NodeId, Packet)>) {
        for (neighbor, packet) in outgoing {
            self.send_packet(sender, neighbor, &packet);
        }
        if let Some(node) = self.nodes.get_mut(&sender) {
            let deliveries = node.take_app_deliveries();
            self.metrics.app_deliveries.extend(deliveries);
        }
        self.refresh_deadline_check(sender);
    }

    fn refresh_deadline_check(&mut self, node_id: NodeId) {
        let Some(deadline) = self.nodes.get(&node_id).and_then(|n| n.next_deadline()) else {
            return;
        };
        let queued = self.queued_checks.get(&node_id).copied();
        if queued.is_some_and(|t| t <= deadline) {
            return;
        }
        self.queued_checks.insert(node_id, deadline);
        self.schedule(deadline, Event::DeadlineCheck { node: node_id });
    }

    /// Put one packet on the link from `sender` to `to`.
    fn send_packet(&mut self, sender: NodeId, to: NodeId, packet: &Packet) {
        let now = self.current_time;
        self.metrics.packets_sent += 1;
        if let Packet::Request(request) = packet {
            self.metrics.request_log.push(RequestRecord {
                time: now,
                from: sender,
                to,
                name: request.name.clone(),
            });
        }

        let Some(link) = self.topology.get_link(sender, to) else {
            tracing::warn!(from = sender, to, "no link between nodes");
            self.metrics.packets_dropped += 1;
            return;
        };
        if !link.active {
            self.metrics.packets_dropped += 1;
            return;
        }

        let loss_rate = link.loss_rate;
        let delay = link.delay;
        if loss_rate > 0.0 && self.random_f64() < loss_rate {
            tracing::trace!(from = sender, to, name = %packet.name(), "packet lost");
            self.metrics.packets_dropped += 1;
            return;
        }

        self.schedule(
            now + delay,
            Event::PacketDelivery {
                to,
                from: sender,
                data: packet.encode_to_vec(),
            },
        );
    }

    /// Execute a scenario action.
    fn execute_action(&mut self, action: ScenarioAction) {
        match action {
            ScenarioAction::DisableLink { from, to } => {
                if let Some(link) = self.topology.get_link_mut(from, to) {
                    link.active = false;
                }
            }
            ScenarioAction::EnableLink { from, to } => {
                if let Some(link) = self.topology.get_link_mut(from, to) {
                    link.active = true;
                }
            }
            ScenarioAction::SetLossRate { from, to, rate } => {
                if let Some(link) = self.topology.get_link_mut(from, to) {
                    link.loss_rate = rate.clamp(0.0, 1.0);
                }
            }
            ScenarioAction::SetProducerValue { node, value } => {
                let updated = self
                    .nodes
                    .get_mut(&node)
                    .is_some_and(|n| n.set_producer_value(value));
                if !updated {
                    tracing::warn!(node, "no producer to update");
                }
            }
        }
    }

    /// Generate a random f64 in [0, 1).
    fn random_f64(&mut self) -> f64 {
        self.rng_state = self
            .rng_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1);
        (self.rng_state as f64) / (u64::MAX as f64)
    }
}
