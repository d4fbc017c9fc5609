//! Runtime scenario configuration.
//!
//! A [`SimConfig`] can be written by hand or loaded from JSON:
//!
//! ```
//! use aggsim::SimConfig;
//!
//! let config = SimConfig::from_json(r#"{
//!     "seed": 7,
//!     "topology": { "kind": "fatTree", "producers": 8 },
//!     "lossRate": 0.05,
//!     "rounds": 3
//! }"#).unwrap();
//! assert_eq!(config.rounds, 3);
//! assert_eq!(config.request_lifetime_ms, 2000);
//! ```

use aggtree::UnroutablePolicy;
use serde::{Deserialize, Serialize};

use crate::error::SimError;

/// Network shape to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TopologyKind {
    /// Nodes in a line; every node produces.
    Chain { nodes: u32 },
    /// First node is the hub; every node produces.
    Star { nodes: u32 },
    /// Every pair linked; every node produces.
    FullyConnected { nodes: u32 },
    /// Producers behind rack and core aggregators.
    FatTree { producers: u32 },
}

impl TopologyKind {
    /// Number of producing nodes.
    pub fn producer_count(&self) -> u32 {
        match *self {
            TopologyKind::Chain { nodes }
            | TopologyKind::Star { nodes }
            | TopologyKind::FullyConnected { nodes } => nodes,
            TopologyKind::FatTree { producers } => producers,
        }
    }
}

/// Scenario parameters. Missing JSON keys take their default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimConfig {
    /// Seed for the loss generator.
    pub seed: u64,
    pub topology: Option<TopologyKind>,
    /// Per-link delay. Unset keeps the topology's own default.
    pub link_delay_ms: Option<u64>,
    /// Loss rate applied to every link.
    pub loss_rate: f64,
    pub request_lifetime_ms: u64,
    pub unroutable: UnroutablePolicy,
    /// Consumer rounds; round `r` uses generation `r`.
    pub rounds: u32,
    pub round_interval_ms: u64,
    /// Cached values expire after this long. Unset keeps them until evicted.
    pub cache_ttl_ms: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            topology: Some(TopologyKind::FatTree { producers: 4 }),
            link_delay_ms: None,
            loss_rate: 0.0,
            request_lifetime_ms: 2000,
            unroutable: UnroutablePolicy::default(),
            rounds: 1,
            round_interval_ms: 1000,
            cache_ttl_ms: None,
        }
    }
}

impl SimConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, SimError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the parameters describe a runnable scenario.
    pub fn validate(&self) -> Result<(), SimError> {
        let topology = self.topology.ok_or(SimError::MissingTopology)?;
        if topology.producer_count() == 0 {
            return Err(SimError::InvalidConfig(
                "topology needs at least one producer".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.loss_rate) {
            return Err(SimError::InvalidConfig(format!(
                "loss rate {} outside [0, 1]",
                self.loss_rate
            )));
        }
        if self.request_lifetime_ms == 0 {
            return Err(SimError::InvalidConfig(
                "request lifetime must be positive".into(),
            ));
        }
        if self.rounds > 1 && self.round_interval_ms == 0 {
            return Err(SimError::InvalidConfig(
                "round interval must be positive when running several rounds".into(),
            ));
        }
        Ok(())
    }
}
