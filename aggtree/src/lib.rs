#![forbid(unsafe_code)]
//! aggtree - In-network sum aggregation for name-addressed networks
//!
//! A forwarding strategy for request/response networks where data is named
//! rather than addressed (NDN-style Interests and Data). A consumer asks for
//! `/aggregate/<id>/<id>/.../[seq=N]` and receives the sum of the values the
//! named producers hold. Forwarders on the way split the request by next hop,
//! merge identical requests, answer from cached values and reuse requests
//! already in flight that cover the same identifiers.
//!
//! This crate is `no_std` but **requires the `alloc` crate**. Tables are
//! heap-allocated with capacity limits set through [`EngineConfig`].
//!
//! # Key Properties
//!
//! - A name already pending is merged, never forwarded twice
//! - Each identifier is counted at most once per request
//! - An entry completes at most once and is removed when it does
//! - Sums wrap at 2^64
//! - Nothing is retransmitted; a lost packet shows up as an expired entry
//!
//! # Example (names and wire format)
//!
//! ```
//! use aggtree::{Decode, Encode, IdSet, Name, Packet, Request, ValueCache, Timestamp};
//!
//! let ids: IdSet = [3, 1, 2].into_iter().collect();
//! let request = Request::aggregate(&ids, Some(7));
//! assert_eq!(request.name.to_string(), "/aggregate/%01/%02/%03/seq=7");
//!
//! let bytes = request.encode_to_vec();
//! let decoded = Packet::decode_from_slice(&bytes).unwrap();
//! assert_eq!(decoded.name().parse_ids(), ids);
//!
//! let mut cache = ValueCache::new(16);
//! cache.insert(1, 10, Timestamp::ZERO);
//! cache.insert(2, 20, Timestamp::ZERO);
//! assert_eq!(cache.sum(&ids, Timestamp::ZERO), None);
//! cache.insert(3, 30, Timestamp::ZERO);
//! assert_eq!(cache.sum(&ids, Timestamp::ZERO), Some(60));
//! ```
//!
//! # Example (integration pattern)
//!
//! ```text
//! use aggtree::{Engine, Fib, Transport, Clock};
//!
//! // Implement Transport and Clock for your forwarder...
//!
//! // let mut engine = Engine::<_, _, _, DefaultConfig>::new(transport, fib, clock);
//!
//! // Either spawn the run loop fed by transport.incoming()...
//! // spawn(async move { engine.run().await });
//!
//! // ...or call the Strategy methods from the forwarder's pipelines.
//! // engine.on_request_received(request, face)?;
//! // engine.on_response_received(response, face);
//! // engine.on_deadline_expired(&name);
//! ```
//!
//! # Module Structure
//!
//! - [`types`] - Core types (Request, Response, LinkId, Admission, ...)
//! - [`name`] - Names, components, identifier parsing
//! - [`wire`] - TLV wire format
//! - [`traits`] - Transport, Clock and Strategy traits
//! - [`engine`] - Engine struct, timers and run loop
//! - `admission` - Dedup and request classification
//! - `resolver` - Cache and overlap resolution
//! - `splitter` - Per-next-hop sub-requests
//! - `aggregator` - Response attribution and completion
//! - [`table`] - Pending request table
//! - [`cache`] - Value cache
//! - [`routing`] - Route lookup
//! - [`time`] - Timestamp and Duration types
//! - [`config`] - Compile-time memory configuration

#![no_std]

// Prevent test/debug features from being used in release builds.
#[cfg(all(feature = "test-support", not(test), not(debug_assertions)))]
compile_error!(
    "The `test-support` feature must not be enabled in release builds. \
     It includes mock transport and clock implementations for tests only."
);

#[cfg(all(feature = "debug", not(test), not(debug_assertions)))]
compile_error!(
    "The `debug` feature must not be enabled in release builds. \
     It adds protocol tracing overhead intended only for development and simulation."
);

extern crate alloc;

#[macro_use]
pub mod debug;

mod admission;
mod aggregator;
pub mod cache;
pub mod collections;
pub mod config;
pub mod engine;
pub mod name;
mod resolver;
pub mod routing;
mod splitter;
pub mod table;
pub mod time;
pub mod traits;
pub mod types;
pub mod wire;

// Re-export main types at crate root
pub use cache::ValueCache;
pub use config::{DefaultConfig, EngineConfig, SmallConfig};
pub use engine::Engine;
pub use name::{Component, IdSet, Identifier, Name};
pub use routing::{Fib, RouteTable};
pub use table::{EntryHandle, EntryKind, PendingEntry, PendingTable};
pub use time::{Duration, Timestamp};
pub use traits::{Clock, Incoming, Strategy, Transport};
pub use types::{
    Admission, Attribution, EngineMetrics, Error, LinkId, NextHop, Request, Response,
    UnroutablePolicy,
};
pub use wire::{Decode, DecodeError, Encode, Packet};

// Re-export constants
pub use types::{AGGREGATE_LABEL, DEFAULT_REQUEST_LIFETIME, MAX_PACKET_SIZE};
