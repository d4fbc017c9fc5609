//! Scenario builder for setting up and running simulations.

use std::collections::BTreeMap;

use aggtree::{Duration, IdSet, Identifier, Request, Timestamp, UnroutablePolicy};

use crate::config::{SimConfig, TopologyKind};
use crate::error::SimError;
use crate::event::ScenarioAction;
use crate::metrics::SimulationResult;
use crate::node::{Producer, SimNode};
use crate::sim::Simulator;
use crate::topology::{Link, NodeId, Topology};

/// Type of topology to generate.
#[derive(Debug, Clone)]
enum TopologyType {
    /// Fully connected topology.
    FullyConnected,
    /// Chain topology (each node connected only to neighbors).
    Chain,
    /// Star topology (first node is hub).
    Star,
    /// Producers behind rack and core aggregators.
    FatTree,
    /// Custom topology provided by user. Every node on it produces.
    Custom(Topology),
}

/// Builder for simulation scenarios.
///
/// Producers are numbered in ascending node order; the k-th producer holds
/// identifier `k + 1` with value `k + 1` unless overridden.
pub struct ScenarioBuilder {
    /// Number of producing nodes.
    num_producers: usize,
    /// RNG seed for determinism.
    seed: u64,
    /// Topology type to generate (must be explicitly specified).
    topology_type: Option<TopologyType>,
    /// Global packet loss rate.
    loss_rate: f64,
    /// Link delay override.
    delay: Option<Duration>,
    request_lifetime: Duration,
    unroutable: UnroutablePolicy,
    cache_ttl: Option<Duration>,
    /// Producer values by node.
    values: BTreeMap<NodeId, u64>,
    /// Consumer rounds and the time between them.
    rounds: u32,
    round_interval: Duration,
    /// Scheduled actions.
    actions: Vec<(Timestamp, ScenarioAction)>,
}

impl Default for ScenarioBuilder {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ScenarioBuilder {
    /// Create a new scenario with the specified number of producers.
    ///
    /// A topology must be chosen before calling [`build`](Self::build).
    pub fn new(num_producers: usize) -> Self {
        Self {
            num_producers,
            seed: 42,
            topology_type: None,
            loss_rate: 0.0,
            delay: None,
            request_lifetime: aggtree::DEFAULT_REQUEST_LIFETIME,
            unroutable: UnroutablePolicy::default(),
            cache_ttl: None,
            values: BTreeMap::new(),
            rounds: 1,
            round_interval: Duration::from_secs(1),
            actions: Vec::new(),
        }
    }

    /// Start from a validated [`SimConfig`].
    pub fn from_config(config: &SimConfig) -> Result<Self, SimError> {
        config.validate()?;
        let topology = config.topology.ok_or(SimError::MissingTopology)?;

        let builder = Self::new(topology.producer_count() as usize);
        let builder = match topology {
            TopologyKind::Chain { .. } => builder.chain_topology(),
            TopologyKind::Star { .. } => builder.star_topology(),
            TopologyKind::FullyConnected { .. } => builder.fully_connected(),
            TopologyKind::FatTree { .. } => builder.fat_tree(),
        };

        let mut builder = builder
            .with_seed(config.seed)
            .with_loss_rate(config.loss_rate)
            .with_request_lifetime(Duration::from_millis(config.request_lifetime_ms))
            .with_unroutable_policy(config.unroutable)
            .with_rounds(config.rounds, Duration::from_millis(config.round_interval_ms));
        if let Some(ms) = config.link_delay_ms {
            builder = builder.with_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = config.cache_ttl_ms {
            builder = builder.with_cache_ttl(Duration::from_millis(ms));
        }
        Ok(builder)
    }

    /// Set the RNG seed for deterministic simulation.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set a custom network topology.
    pub fn topology(mut self, topo: Topology) -> Self {
        self.topology_type = Some(TopologyType::Custom(topo));
        self
    }

    /// Use fully connected topology.
    pub fn fully_connected(mut self) -> Self {
        self.topology_type = Some(TopologyType::FullyConnected);
        self
    }

    /// Use chain topology (each node connected only to neighbors).
    pub fn chain_topology(mut self) -> Self {
        self.topology_type = Some(TopologyType::Chain);
        self
    }

    /// Use star topology (first node is hub).
    pub fn star_topology(mut self) -> Self {
        self.topology_type = Some(TopologyType::Star);
        self
    }

    /// Use a fat tree with rack and core aggregators.
    pub fn fat_tree(mut self) -> Self {
        self.topology_type = Some(TopologyType::FatTree);
        self
    }

    /// Set global packet loss rate.
    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Set link delay on every link.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Lifetime carried by every consumer request.
    pub fn with_request_lifetime(mut self, lifetime: Duration) -> Self {
        self.request_lifetime = lifetime;
        self
    }

    pub fn with_unroutable_policy(mut self, policy: UnroutablePolicy) -> Self {
        self.unroutable = policy;
        self
    }

    /// Expire cached values after `ttl` on every node.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Value served by the producer on `node`.
    pub fn with_producer_value(mut self, node: NodeId, value: u64) -> Self {
        self.values.insert(node, value);
        self
    }

    /// Run `rounds` consumer rounds, `interval` apart, starting at time zero.
    pub fn with_rounds(mut self, rounds: u32, interval: Duration) -> Self {
        self.rounds = rounds;
        self.round_interval = interval;
        self
    }

    /// Schedule a link failure at the specified time.
    pub fn disable_link_at(mut self, time: Timestamp, from: NodeId, to: NodeId) -> Self {
        self.actions
            .push((time, ScenarioAction::DisableLink { from, to }));
        self
    }

    /// Schedule a link repair at the specified time.
    pub fn enable_link_at(mut self, time: Timestamp, from: NodeId, to: NodeId) -> Self {
        self.actions
            .push((time, ScenarioAction::EnableLink { from, to }));
        self
    }

    /// Schedule a loss rate change on one link.
    pub fn loss_rate_at(mut self, time: Timestamp, from: NodeId, to: NodeId, rate: f64) -> Self {
        self.actions
            .push((time, ScenarioAction::SetLossRate { from, to, rate }));
        self
    }

    /// Schedule a producer value change.
    pub fn producer_value_at(mut self, time: Timestamp, node: NodeId, value: u64) -> Self {
        self.actions
            .push((time, ScenarioAction::SetProducerValue { node, value }));
        self
    }

    /// Build the simulator with all nodes, routes and consumer rounds.
    ///
    /// Returns the simulator and the producing nodes in identifier order.
    pub fn build(self) -> Result<(Simulator, Vec<NodeId>), SimError> {
        if self.request_lifetime.as_millis() == 0 {
            return Err(SimError::InvalidConfig(
                "request lifetime must be positive".into(),
            ));
        }
        let topology_type = self.topology_type.ok_or(SimError::MissingTopology)?;

        let n = self.num_producers as NodeId;
        let link = Link::new();
        let (mut topo, producers, nodes) = match topology_type {
            TopologyType::FullyConnected => {
                let nodes: Vec<NodeId> = (0..n).collect();
                (Topology::fully_connected(&nodes, link), nodes.clone(), nodes)
            }
            TopologyType::Chain => {
                let nodes: Vec<NodeId> = (0..n).collect();
                (Topology::chain(&nodes, link), nodes.clone(), nodes)
            }
            TopologyType::Star => {
                let nodes: Vec<NodeId> = (0..n).collect();
                (Topology::star(&nodes, link), nodes.clone(), nodes)
            }
            TopologyType::FatTree => {
                let (topo, layout) = Topology::fat_tree(self.num_producers);
                let mut nodes = layout.producers.clone();
                nodes.extend(&layout.racks);
                nodes.extend(&layout.cores);
                (topo, layout.producers, nodes)
            }
            TopologyType::Custom(topo) => {
                let nodes = topo.nodes();
                (topo, nodes.clone(), nodes)
            }
        };
        if producers.is_empty() {
            return Err(SimError::InvalidConfig(
                "scenario needs at least one producer".into(),
            ));
        }

        if let Some(delay) = self.delay {
            topo.set_global_delay(delay);
        }
        if self.loss_rate > 0.0 {
            topo.set_global_loss_rate(self.loss_rate);
        }

        for &node in self.values.keys() {
            if !producers.contains(&node) {
                return Err(SimError::UnknownNode(node));
            }
        }
        for (_, action) in &self.actions {
            check_action(action, &nodes)?;
        }

        let mut sim = Simulator::new(self.seed).with_topology(topo);
        let mut identifiers: Vec<(NodeId, Identifier)> = Vec::with_capacity(producers.len());
        for &id in &nodes {
            let mut node = SimNode::new(id, self.unroutable, self.cache_ttl);
            if let Some(rank) = producers.iter().position(|&p| p == id) {
                let identifier = rank as Identifier + 1;
                let value = self.values.get(&id).copied().unwrap_or(identifier);
                node = node.with_producer(Producer::new(identifier, value));
                identifiers.push((id, identifier));
            }
            sim.add_node(node);
        }
        sim.install_routes();

        // Actions go first so one scheduled at a round's start applies to it
        for (time, action) in self.actions {
            sim.schedule_action(time, action);
        }

        for round in 1..=self.rounds {
            let at = Timestamp::ZERO + self.round_interval.saturating_mul(u64::from(round - 1));
            for &(consumer, own) in &identifiers {
                let wanted: IdSet = identifiers
                    .iter()
                    .map(|&(_, id)| id)
                    .filter(|&id| id != own)
                    .collect();
                let request = Request::aggregate(&wanted, Some(u64::from(round)))
                    .with_lifetime(self.request_lifetime);
                sim.schedule_request(at, consumer, request);
            }
        }

        tracing::debug!(
            nodes = nodes.len(),
            producers = producers.len(),
            rounds = self.rounds,
            "scenario built"
        );
        Ok((sim, producers))
    }

    /// Build and run for the specified duration.
    pub fn run_for(self, duration: Duration) -> Result<SimulationResult, SimError> {
        let (mut sim, _) = self.build()?;
        Ok(sim.run_for(duration))
    }
}

fn check_action(action: &ScenarioAction, nodes: &[NodeId]) -> Result<(), SimError> {
    let known = |node: NodeId| {
        if nodes.contains(&node) {
            Ok(())
        } else {
            Err(SimError::UnknownNode(node))
        }
    };
    match *action {
        ScenarioAction::DisableLink { from, to }
        | ScenarioAction::EnableLink { from, to }
        | ScenarioAction::SetLossRate { from, to, .. } => {
            known(from)?;
            known(to)
        }
        ScenarioAction::SetProducerValue { node, .. } => known(node),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topology_required() {
        let err = ScenarioBuilder::new(3).build().err();
        assert!(matches!(err, Some(SimError::MissingTopology)));
    }

    #[test]
    fn test_zero_producers_rejected() {
        let err = ScenarioBuilder::new(0).chain_topology().build().err();
        assert!(matches!(err, Some(SimError::InvalidConfig(_))));
    }

    #[test]
    fn test_unknown_nodes_rejected() {
        let err = ScenarioBuilder::new(2)
            .chain_topology()
            .with_producer_value(5, 1)
            .build()
            .err();
        assert!(matches!(err, Some(SimError::UnknownNode(5))));

        let err = ScenarioBuilder::new(2)
            .chain_topology()
            .disable_link_at(Timestamp::ZERO, 0, 9)
            .build()
            .err();
        assert!(matches!(err, Some(SimError::UnknownNode(9))));
    }

    #[test]
    fn test_fat_tree_nodes_and_producers() {
        let (sim, producers) = ScenarioBuilder::new(4).fat_tree().build().unwrap();
        assert_eq!(producers, vec![0, 1, 2, 3]);
        assert_eq!(sim.node_ids(), (0..9).collect::<Vec<_>>());
        assert_eq!(sim.node(2).unwrap().producer(), Some(&Producer::new(3, 3)));
        assert!(sim.node(4).unwrap().producer().is_none());
    }

    #[test]
    fn test_rounds_issue_all_but_own() {
        let result = ScenarioBuilder::new(3)
            .star_topology()
            .with_rounds(2, Duration::from_millis(500))
            .run_for(Duration::from_secs(1))
            .unwrap();
        assert_eq!(result.metrics.requests_issued, 6);
        // Node 0 holds identifier 1 and asks for 2 + 3
        assert_eq!(result.value_at(0, 1), Some(5));
        assert_eq!(result.value_at(0, 2), Some(5));
        assert_eq!(result.value_at(2, 1), Some(3));
    }

    #[test]
    fn test_from_config() {
        let config = SimConfig {
            topology: Some(TopologyKind::Chain { nodes: 3 }),
            link_delay_ms: Some(5),
            ..Default::default()
        };
        let (sim, producers) = ScenarioBuilder::from_config(&config)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(producers, vec![0, 1, 2]);
        assert_eq!(
            sim.topology().get_link(0, 1).unwrap().delay,
            Duration::from_millis(5)
        );
    }

    #[test]
    fn test_from_config_validates() {
        let config = SimConfig {
            loss_rate: -1.0,
            ..Default::default()
        };
        assert!(ScenarioBuilder::from_config(&config).is_err());
    }
}
