//! Debug events for protocol tracing.
//!
//! Enabled in test builds and with the `debug` feature. These events trace
//! every decision the engine takes so simulations can assert on them.

use alloc::vec::Vec;

use crate::name::{Identifier, Name};
use crate::time::Timestamp;
use crate::types::LinkId;

/// Trait for receiving debug events from an engine.
/// Implemented by test harnesses to collect/print events.
pub trait DebugEmitter: Send {
    /// Called when a debug event is emitted.
    fn emit(&mut self, event: DebugEvent);
}

/// Debug events emitted by the engine for protocol tracing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugEvent {
    /// Duplicate request merged into an existing entry.
    RequestMerged { name: Name, link: LinkId },
    /// Request answered entirely from the value cache.
    AnsweredFromCache { name: Name, value: u64 },
    /// Request registered as a dependent of a pending superset.
    Piggybacked { name: Name, on: Name },
    /// Some identifiers handed off to a pending subset request.
    WaitingOnSubset {
        name: Name,
        on: Name,
        ids: Vec<Identifier>,
    },
    /// Sub-request sent, or attached to an identical outstanding one.
    SubRequestForwarded {
        parent: Name,
        sub_request: Name,
        hop: LinkId,
        shared: bool,
    },
    /// Identifiers without a route at split time.
    UnroutableIds {
        name: Name,
        ids: Vec<Identifier>,
        abandoned: bool,
    },
    /// Response value applied to a pending entry.
    ContributionApplied {
        name: Name,
        from: Name,
        value: u64,
        remaining: usize,
    },
    /// Linked response ignored because its identifiers were no longer pending.
    ContributionSkipped { name: Name, from: Name },
    /// Entry complete; response sent downstream.
    EntryCompleted {
        name: Name,
        value: u64,
        downstream: usize,
    },
    /// Dependent could not be answered from the cache and was re-admitted.
    DependentReadmitted { name: Name, missing: usize },
    /// Entry removed at its deadline.
    EntryExpired {
        name: Name,
        timestamp: Timestamp,
        pending_ids: Vec<Identifier>,
    },
    /// Atomic value written to the cache.
    ValueCached { id: Identifier, value: u64 },
    /// Inbound packet could not be decoded.
    PacketDecodeFailed { link: LinkId, data_len: usize },
    /// New request rejected, table at capacity.
    TableFull { name: Name },
}

/// Emit a debug event if an emitter is installed.
///
/// The event expression is only evaluated when an emitter is present, and
/// compiles away entirely without `test` or the `debug` feature.
macro_rules! emit_debug {
    ($self:expr, $event:expr) => {{
        #[cfg(any(test, feature = "debug"))]
        {
            if $self.has_debug_emitter() {
                let event = $event;
                $self.emit_debug_event(event);
            }
        }
    }};
}
