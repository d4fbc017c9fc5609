//! Simulator errors.

use thiserror::Error;

use crate::topology::NodeId;

/// Errors raised while configuring or building a simulation.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("malformed configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("topology must be specified")]
    MissingTopology,
}
