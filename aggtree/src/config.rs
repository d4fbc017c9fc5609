//! Compile-time configuration for memory bounds.
//!
//! The `EngineConfig` trait bounds every table the engine owns, so a
//! forwarder on a constrained router and one on a server can share code.
//! Use `DefaultConfig` for edge/aggregation routers, `SmallConfig` for
//! constrained devices.
//!
//! Memory formula (rough estimate):
//! - `MAX_PENDING_ENTRIES * (200 + 24 * ids)` bytes (entry + id sets + indexes)
//! - `MAX_CACHED_VALUES * 40` bytes (identifier, value, write stamp)
//! - `MAX_DOWNSTREAM_LINKS * 4` bytes per pending entry
//!
//! # Example
//!
//! ```ignore
//! use aggtree::{Engine, DefaultConfig, SmallConfig};
//!
//! let engine = Engine::<_, _, _, DefaultConfig>::new(transport, routes, clock);
//! let engine = Engine::<_, _, _, SmallConfig>::new(transport, routes, clock);
//!
//! struct MyConfig;
//! impl EngineConfig for MyConfig {
//!     const MAX_PENDING_ENTRIES: usize = 4096;
//!     // ... other constants
//! }
//! ```

/// Configuration trait for compile-time memory tuning.
///
/// All bounds must be non-zero.
pub trait EngineConfig {
    /// Maximum live pending entries (aggregate and relay).
    const MAX_PENDING_ENTRIES: usize;

    /// Maximum identifiers held by the value cache.
    const MAX_CACHED_VALUES: usize;

    /// Maximum downstream links recorded on one entry.
    ///
    /// Further duplicates are still merged, but their links get no answer.
    const MAX_DOWNSTREAM_LINKS: usize;
}

/// Default configuration for aggregation routers.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConfig;

impl EngineConfig for DefaultConfig {
    const MAX_PENDING_ENTRIES: usize = 1024;
    const MAX_CACHED_VALUES: usize = 4096;
    const MAX_DOWNSTREAM_LINKS: usize = 32;
}

/// Small configuration for constrained forwarders.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmallConfig;

impl EngineConfig for SmallConfig {
    const MAX_PENDING_ENTRIES: usize = 64;
    const MAX_CACHED_VALUES: usize = 128;
    const MAX_DOWNSTREAM_LINKS: usize = 8;
}
