//! Core types and constants for the aggregation engine.

use alloc::vec::Vec;
use core::fmt;

use crate::name::{IdSet, Identifier, Name};
use crate::time::Duration;
use crate::wire::DecodeError;

// TLV types (NDN packet format subset)
pub const TLV_INTEREST: u64 = 0x05;
pub const TLV_DATA: u64 = 0x06;
pub const TLV_NAME: u64 = 0x07;
pub const TLV_GENERIC_COMPONENT: u32 = 0x08;
pub const TLV_INTEREST_LIFETIME: u64 = 0x0C;
pub const TLV_CONTENT: u64 = 0x15;
pub const TLV_SEQUENCE_NUM_COMPONENT: u32 = 0x3A;

/// First component of every aggregation name.
pub const AGGREGATE_LABEL: &[u8] = b"aggregate";

/// Largest packet accepted by the decoder.
pub const MAX_PACKET_SIZE: usize = 8800;

/// Request lifetime used when a request does not carry one.
pub const DEFAULT_REQUEST_LIFETIME: Duration = Duration::from_secs(2);

/// Local identifier of a link (face) on this forwarder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LinkId(pub u32);

impl LinkId {
    /// The local application link. Producers and consumers attach here.
    pub const APP: LinkId = LinkId(0);

    pub fn is_app(&self) -> bool {
        *self == Self::APP
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_app() {
            write!(f, "app")
        } else {
            write!(f, "link{}", self.0)
        }
    }
}

/// A named request for the sum of the identifiers its name carries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub name: Name,
    /// How long the requester is willing to wait.
    pub lifetime: Duration,
}

impl Request {
    /// Request with [`DEFAULT_REQUEST_LIFETIME`].
    pub fn new(name: Name) -> Self {
        Self {
            name,
            lifetime: DEFAULT_REQUEST_LIFETIME,
        }
    }

    /// Aggregation request for `ids` under an optional generation.
    pub fn aggregate(ids: &IdSet, generation: Option<u64>) -> Self {
        Self::new(Name::aggregate(ids, generation))
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }
}

/// A named answer carrying one value. The name repeats the request's name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub name: Name,
    pub value: u64,
}

impl Response {
    pub fn new(name: Name, value: u64) -> Self {
        Self { name, value }
    }
}

/// Route lookup result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NextHop {
    pub link: LinkId,
    pub cost: u32,
}

/// What to do with identifiers that have no route at split time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub enum UnroutablePolicy {
    /// Drop the whole request before anything is forwarded.
    #[default]
    Abandon,
    /// Forward what is routable and let the entry run into its deadline.
    Stall,
}

/// What the engine did with an incoming request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    /// Same name already pending; the arrival link was added downstream.
    Merged,
    /// Every identifier was cached; the response has been delivered.
    Answered { value: u64 },
    /// Registered as a dependent of a pending superset request.
    Piggybacked { on: Name },
    /// Every remaining identifier is being fetched by other pending requests.
    Waiting,
    /// Sub-requests were sent (or shared with ones already outstanding).
    Forwarded { sub_requests: usize },
    /// Non-aggregate or single-identifier name sent on unmodified.
    Relayed,
    /// Some identifiers had no route. The entry waits for its deadline.
    Stalled { unroutable: IdSet },
}

/// What the engine did with an incoming response.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Attribution {
    /// Entries linked to this name as a forwarded sub-request or relay.
    pub linked: usize,
    /// Entries that were waiting on this name.
    pub waiters: usize,
    /// Entries completed as a consequence, including cascades.
    pub completed: usize,
    /// The value was written to the cache.
    pub cached: bool,
}

impl Attribution {
    /// No pending entry wanted this response.
    pub fn is_unsolicited(&self) -> bool {
        self.linked == 0 && self.waiters == 0
    }
}

/// Counters kept by the engine.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineMetrics {
    pub requests_received: u64,
    pub requests_merged: u64,
    pub answered_from_cache: u64,
    pub piggybacked: u64,
    pub sub_requests_forwarded: u64,
    pub sub_requests_shared: u64,
    pub responses_received: u64,
    pub responses_unsolicited: u64,
    pub responses_sent: u64,
    pub entries_completed: u64,
    pub entries_expired: u64,
    pub entries_abandoned: u64,
    pub dependents_readmitted: u64,
    pub decode_failures: u64,
}

/// Error type for engine operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Pending table is at capacity.
    TableFull,
    /// No route for a relayed name.
    NoRoute,
    /// Identifiers without a route; the request was abandoned.
    Unroutable { ids: Vec<Identifier> },
    /// Inbound packet could not be decoded.
    Decode(DecodeError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::TableFull => write!(f, "pending table full"),
            Error::NoRoute => write!(f, "no route for name"),
            Error::Unroutable { ids } => write!(f, "no route for identifiers {:?}", ids),
            Error::Decode(e) => write!(f, "decode failed: {}", e),
        }
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::Decode(e)
    }
}

#[cfg(test)]
mod tests {
    use alloc::string::ToString;
    use alloc::vec;

    use super::*;

    #[test]
    fn test_request_defaults() {
        let ids: IdSet = [1, 2].into_iter().collect();
        let request = Request::aggregate(&ids, Some(3));
        assert_eq!(request.lifetime, DEFAULT_REQUEST_LIFETIME);
        assert_eq!(request.name.parse_ids(), ids);

        let short = request.with_lifetime(Duration::from_millis(100));
        assert_eq!(short.lifetime.as_millis(), 100);
    }

    #[test]
    fn test_link_display() {
        assert_eq!(LinkId::APP.to_string(), "app");
        assert_eq!(LinkId(3).to_string(), "link3");
        assert!(LinkId::default().is_app());
    }

    #[test]
    fn test_attribution_unsolicited() {
        assert!(Attribution::default().is_unsolicited());
        let linked = Attribution {
            linked: 1,
            ..Default::default()
        };
        assert!(!linked.is_unsolicited());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(Error::TableFull.to_string(), "pending table full");
        assert_eq!(
            Error::Unroutable { ids: vec![5] }.to_string(),
            "no route for identifiers [5]"
        );
        assert_eq!(
            Error::from(DecodeError::UnexpectedEof).to_string(),
            "decode failed: unexpected end of buffer"
        );
    }
}
