//! Network topology, link properties and shortest-path next hops.

use std::collections::VecDeque;

use aggtree::{Duration, LinkId};
use hashbrown::HashMap;

/// Simulated node index.
pub type NodeId = u32;

/// Link on `from` that leads to `neighbor`. `LinkId::APP` (0) is reserved
/// for the local application, so neighbor `n` sits on link `n + 1`.
pub fn link_to(neighbor: NodeId) -> LinkId {
    LinkId(neighbor + 1)
}

/// Neighbor reached through `link`, or `None` for the application link.
pub fn neighbor_of(link: LinkId) -> Option<NodeId> {
    link.0.checked_sub(1)
}

/// Properties of a network link between two nodes.
#[derive(Debug, Clone)]
pub struct Link {
    /// Packet loss rate (0.0 to 1.0).
    pub loss_rate: f64,
    /// Propagation delay.
    pub delay: Duration,
    /// Whether the link is currently active.
    pub active: bool,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            delay: Duration::from_millis(1),
            active: true,
        }
    }
}

impl Link {
    /// Create a new link with default properties.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the loss rate.
    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Set the delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set whether the link is active.
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}

/// Node roles in a [`Topology::fat_tree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatTreeLayout {
    pub producers: Vec<NodeId>,
    pub racks: Vec<NodeId>,
    pub cores: Vec<NodeId>,
}

/// Network topology defining connectivity between nodes.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    /// Links between pairs of nodes (bidirectional).
    links: HashMap<(NodeId, NodeId), Link>,
    /// Properties used by the builders.
    default_link: Link,
}

impl Topology {
    /// Create an empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set default link properties for links added by the builders.
    pub fn with_default_link(mut self, link: Link) -> Self {
        self.default_link = link;
        self
    }

    /// Create a fully connected topology for the given nodes.
    pub fn fully_connected(nodes: &[NodeId], link: Link) -> Self {
        let mut topo = Self::new().with_default_link(link);
        for (i, &a) in nodes.iter().enumerate() {
            for &b in nodes.iter().skip(i + 1) {
                topo.connect(a, b);
            }
        }
        topo
    }

    /// Create a chain topology (each node connected only to neighbors).
    pub fn chain(nodes: &[NodeId], link: Link) -> Self {
        let mut topo = Self::new().with_default_link(link);
        for window in nodes.windows(2) {
            topo.connect(window[0], window[1]);
        }
        topo
    }

    /// Create a star topology (first node is hub, connected to all others).
    pub fn star(nodes: &[NodeId], link: Link) -> Self {
        let mut topo = Self::new().with_default_link(link);
        let Some((&hub, spokes)) = nodes.split_first() else {
            return topo;
        };
        for &spoke in spokes {
            topo.connect(hub, spoke);
        }
        topo
    }

    /// Two-tier aggregation tree over `producers` producers.
    ///
    /// Producers are nodes `0..n`, each behind its own rack aggregator
    /// (`n..2n`). With more than one producer, `max(1, n/4)` core
    /// aggregators follow; racks attach to cores round-robin and the cores
    /// form a ring. Links are 2 ms.
    pub fn fat_tree(producers: usize) -> (Self, FatTreeLayout) {
        let link = Link::new().with_delay(Duration::from_millis(2));
        let mut topo = Self::new().with_default_link(link);

        let n = producers as NodeId;
        let producers: Vec<NodeId> = (0..n).collect();
        let racks: Vec<NodeId> = (n..2 * n).collect();
        let core_count = if n > 1 { (n / 4).max(1) } else { 0 };
        let cores: Vec<NodeId> = (2 * n..2 * n + core_count).collect();

        for (&producer, &rack) in producers.iter().zip(&racks) {
            topo.connect(producer, rack);
        }
        if !cores.is_empty() {
            for (i, &rack) in racks.iter().enumerate() {
                topo.connect(rack, cores[i % cores.len()]);
            }
        }
        if cores.len() > 1 {
            for (i, &core) in cores.iter().enumerate() {
                topo.connect(core, cores[(i + 1) % cores.len()]);
            }
        }

        let layout = FatTreeLayout {
            producers,
            racks,
            cores,
        };
        (topo, layout)
    }

    /// Add a link with the default properties.
    pub fn connect(&mut self, a: NodeId, b: NodeId) {
        let link = self.default_link.clone();
        self.add_link(a, b, link);
    }

    /// Add a bidirectional link between two nodes.
    pub fn add_link(&mut self, a: NodeId, b: NodeId, link: Link) {
        self.links.insert(Self::canonical_pair(a, b), link);
    }

    /// Get a link between two nodes.
    pub fn get_link(&self, a: NodeId, b: NodeId) -> Option<&Link> {
        self.links.get(&Self::canonical_pair(a, b))
    }

    /// Get a mutable link between two nodes.
    pub fn get_link_mut(&mut self, a: NodeId, b: NodeId) -> Option<&mut Link> {
        self.links.get_mut(&Self::canonical_pair(a, b))
    }

    /// Check if two nodes are connected (link exists and is active).
    pub fn is_connected(&self, a: NodeId, b: NodeId) -> bool {
        self.get_link(a, b).is_some_and(|link| link.active)
    }

    /// Nodes reachable over one active link, in ascending order.
    pub fn neighbors(&self, node: NodeId) -> Vec<NodeId> {
        let mut result: Vec<NodeId> = self
            .links
            .iter()
            .filter(|(_, link)| link.active)
            .filter_map(|(&(a, b), _)| {
                if a == node {
                    Some(b)
                } else if b == node {
                    Some(a)
                } else {
                    None
                }
            })
            .collect();
        result.sort_unstable();
        result
    }

    /// Every node that appears on some link, in ascending order.
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.links.keys().flat_map(|&(a, b)| [a, b]).collect();
        nodes.sort_unstable();
        nodes.dedup();
        nodes
    }

    /// Next hop and hop count toward `dst` for every node that can reach it.
    ///
    /// Breadth-first from `dst` over active links. Neighbors are visited in
    /// ascending order, so equal-length paths resolve the same way each run.
    pub fn next_hops_toward(&self, dst: NodeId) -> HashMap<NodeId, (NodeId, u32)> {
        let mut result = HashMap::new();
        let mut visited = hashbrown::HashSet::new();
        let mut queue = VecDeque::new();
        visited.insert(dst);
        queue.push_back((dst, 0u32));

        while let Some((node, hops)) = queue.pop_front() {
            for neighbor in self.neighbors(node) {
                if visited.insert(neighbor) {
                    result.insert(neighbor, (node, hops + 1));
                    queue.push_back((neighbor, hops + 1));
                }
            }
        }
        result
    }

    /// Re-enable all links.
    pub fn heal(&mut self) {
        for link in self.links.values_mut() {
            link.active = true;
        }
    }

    /// Set global loss rate for all links.
    pub fn set_global_loss_rate(&mut self, rate: f64) {
        let rate = rate.clamp(0.0, 1.0);
        for link in self.links.values_mut() {
            link.loss_rate = rate;
        }
    }

    /// Set the same delay on every link.
    pub fn set_global_delay(&mut self, delay: Duration) {
        for link in self.links.values_mut() {
            link.delay = delay;
        }
    }

    /// Canonical pair ordering for consistent link storage.
    fn canonical_pair(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
        if a < b {
            (a, b)
        } else {
            (b, a)
        }
    }
}
