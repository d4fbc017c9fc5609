//! aggsim - Discrete event network simulator for aggtree engines.
//!
//! Runs many aggregation forwarders in one process against simulated time,
//! so in-network sums can be checked at scale without real-time delays.
//!
//! # Features
//!
//! - **Discrete event simulation**: No real-time delays, deterministic ordering
//! - **One engine per node**: Every node runs a real [`aggtree::Engine`]
//! - **Configurable topology**: Chain, star, fully connected, fat tree or custom
//! - **Link properties**: Packet loss, delay, enable/disable per link
//! - **Producers**: Atomic values behind a node's application link
//! - **Scenario builder**: Consumer rounds, scheduled link failures, value changes
//! - **Metrics collection**: Packet counts, per-link request log, application deliveries
//!
//! # Example
//!
//! ```
//! use aggsim::{Duration, ScenarioBuilder};
//!
//! // Four producers behind racks and a core; each asks for everyone else's sum
//! let result = ScenarioBuilder::new(4)
//!     .fat_tree()
//!     .run_for(Duration::from_secs(1))
//!     .unwrap();
//!
//! // Producer 0 holds identifier 1 (value 1) and receives 2 + 3 + 4
//! assert_eq!(result.value_at(0, 1), Some(9));
//! ```
//!
//! # Architecture
//!
//! The simulator uses a priority queue of events ordered by (time, sequence_number).
//! The main loop:
//! 1. Pop next event from queue
//! 2. Advance simulation time
//! 3. Process event (call engine handlers)
//! 4. Serve application-link traffic locally, collect outgoing packets
//! 5. Encode each packet, route it over its link, schedule delivery
//!
//! Engine handlers are called directly (`handle_transport_rx`, `expire_due`)
//! instead of through the async `Engine::run()` loop.

pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod node;
pub mod scenario;
pub mod sim;
pub mod topology;

// Re-export main types
pub use aggtree::{Duration, Timestamp};
pub use config::{SimConfig, TopologyKind};
pub use error::SimError;
pub use event::{Event, ScenarioAction, ScheduledEvent};
pub use metrics::{AppDelivery, RequestRecord, SimMetrics, SimulationResult};
pub use node::{Producer, SimNode};
pub use scenario::ScenarioBuilder;
pub use sim::Simulator;
pub use topology::{Link, NodeId, Topology};
