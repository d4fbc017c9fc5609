//! Metrics collection for simulation analysis.

use std::collections::BTreeMap;

use aggtree::{EngineMetrics, Name, Timestamp};

use crate::topology::NodeId;

/// A response handed to a node's local application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDelivery {
    pub time: Timestamp,
    pub node: NodeId,
    pub name: Name,
    pub value: u64,
}

/// A request put on the wire between two nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    pub time: Timestamp,
    pub from: NodeId,
    pub to: NodeId,
    pub name: Name,
}

/// Simulation metrics collected over time.
#[derive(Debug, Clone, Default)]
pub struct SimMetrics {
    /// Total packets sent between nodes.
    pub packets_sent: u64,
    /// Packets dropped due to loss rate or a disabled link.
    pub packets_dropped: u64,
    /// Packets delivered successfully.
    pub packets_delivered: u64,
    /// Requests issued by applications.
    pub requests_issued: u64,
    /// Every request sent over a link, in send order.
    pub request_log: Vec<RequestRecord>,
    /// Every response delivered to an application, in delivery order.
    pub app_deliveries: Vec<AppDelivery>,
}

impl SimMetrics {
    /// Create new empty metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Responses delivered to `node`'s application.
    pub fn deliveries_to(&self, node: NodeId) -> impl Iterator<Item = &AppDelivery> {
        self.app_deliveries.iter().filter(move |d| d.node == node)
    }

    /// Value `node` received for its request of generation `generation`.
    pub fn value_at(&self, node: NodeId, generation: u64) -> Option<u64> {
        self.deliveries_to(node)
            .find(|d| d.name.generation() == Some(generation))
            .map(|d| d.value)
    }

    /// Number of requests sent from `from` to `to`.
    pub fn requests_on_link(&self, from: NodeId, to: NodeId) -> usize {
        self.request_log
            .iter()
            .filter(|r| r.from == from && r.to == to)
            .count()
    }

    /// Delivery ratio (delivered / sent).
    pub fn delivery_ratio(&self) -> f64 {
        if self.packets_sent == 0 {
            return 1.0;
        }
        self.packets_delivered as f64 / self.packets_sent as f64
    }
}

/// Final result of a simulation run.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    /// When the simulation ended.
    pub end_time: Timestamp,
    /// Collected metrics.
    pub metrics: SimMetrics,
    /// Engine counters for every node at the end of the run.
    pub node_metrics: BTreeMap<NodeId, EngineMetrics>,
    /// Whether the event queue was exhausted.
    pub queue_exhausted: bool,
}

impl SimulationResult {
    /// Value `node` received for generation `generation`.
    pub fn value_at(&self, node: NodeId, generation: u64) -> Option<u64> {
        self.metrics.value_at(node, generation)
    }

    /// Sum of one engine counter across all nodes.
    pub fn total(&self, counter: impl Fn(&EngineMetrics) -> u64) -> u64 {
        self.node_metrics.values().map(counter).sum()
    }
}

#[cfg(test)]
mod tests {
    use aggtree::IdSet;

    use super::*;

    fn delivery(node: NodeId, generation: u64, value: u64) -> AppDelivery {
        let ids: IdSet = [1, 2].into_iter().collect();
        AppDelivery {
            time: Timestamp::ZERO,
            node,
            name: Name::aggregate(&ids, Some(generation)),
            value,
        }
    }

    #[test]
    fn test_value_lookup_by_generation() {
        let mut metrics = SimMetrics::new();
        metrics.app_deliveries.push(delivery(0, 1, 10));
        metrics.app_deliveries.push(delivery(0, 2, 20));
        metrics.app_deliveries.push(delivery(1, 1, 30));

        assert_eq!(metrics.value_at(0, 2), Some(20));
        assert_eq!(metrics.value_at(1, 1), Some(30));
        assert_eq!(metrics.value_at(1, 2), None);
        assert_eq!(metrics.deliveries_to(0).count(), 2);
    }

    #[test]
    fn test_requests_on_link_is_directional() {
        let mut metrics = SimMetrics::new();
        metrics.request_log.push(RequestRecord {
            time: Timestamp::ZERO,
            from: 0,
            to: 1,
            name: Name::identifier(1),
        });
        assert_eq!(metrics.requests_on_link(0, 1), 1);
        assert_eq!(metrics.requests_on_link(1, 0), 0);
    }

    #[test]
    fn test_delivery_ratio() {
        let mut metrics = SimMetrics::new();
        assert_eq!(metrics.delivery_ratio(), 1.0);
        metrics.packets_sent = 4;
        metrics.packets_delivered = 3;
        assert_eq!(metrics.delivery_ratio(), 0.75);
    }

    #[test]
    fn test_totals_across_nodes() {
        let mut node_metrics = BTreeMap::new();
        for (node, completed) in [(0, 2), (1, 3)] {
            let metrics = EngineMetrics {
                entries_completed: completed,
                ..Default::default()
            };
            node_metrics.insert(node, metrics);
        }
        let result = SimulationResult {
            end_time: Timestamp::ZERO,
            metrics: SimMetrics::new(),
            node_metrics,
            queue_exhausted: true,
        };
        assert_eq!(result.total(|m| m.entries_completed), 5);
    }
}
