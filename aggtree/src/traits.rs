//! Core traits for transport, time, and the forwarding strategy interface.
//!
//! These traits allow the engine to be used with different:
//! - Transports (an NDN forwarder's faces, UDP tunnels, simulation)
//! - Time sources (real hardware time, simulated time)

use alloc::vec::Vec;
use core::future::Future;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::name::Name;
use crate::time::Timestamp;
use crate::types::{Admission, Attribution, Error, LinkId, Request, Response};

/// Queue size for the inbound packet channel.
pub(crate) const TRANSPORT_QUEUE_SIZE: usize = 16;

/// Mutex type used for channels.
pub(crate) type ChannelMutex = CriticalSectionRawMutex;

/// Raw packet received on a link.
#[derive(Debug, Clone)]
pub struct Incoming {
    /// Link the packet arrived on.
    pub link: LinkId,
    /// Encoded packet.
    pub data: Vec<u8>,
}

impl Incoming {
    pub fn new(link: LinkId, data: Vec<u8>) -> Self {
        Self { link, data }
    }
}

/// Incoming transport packet channel type.
pub type TransportInChannel = Channel<ChannelMutex, Incoming, TRANSPORT_QUEUE_SIZE>;

/// Transport trait for forwarder backends.
///
/// Sending is fire-and-forget: the engine never learns whether a packet
/// made it. Loss shows up only as a pending entry reaching its deadline.
///
/// - Link driver → `incoming().try_send()` (delivers raw packets)
/// - Engine → `forward()` / `deliver()`
pub trait Transport {
    /// Send a request toward `hop`.
    fn forward(&mut self, request: Request, hop: LinkId);

    /// Send a response back on `link`.
    fn deliver(&mut self, response: Response, link: LinkId);

    /// Channel for incoming packets, read by [`Engine::run`](crate::Engine::run).
    fn incoming(&self) -> &TransportInChannel;
}

/// Time source trait for real or simulated time.
///
/// # Example (testing with MockClock)
///
/// ```ignore
/// use aggtree::traits::test_impls::MockClock;
/// use aggtree::{Clock, Duration, Timestamp};
///
/// let clock = MockClock::new();
/// assert_eq!(clock.now(), Timestamp::ZERO);
///
/// clock.advance(Duration::from_secs(2));
/// assert_eq!(clock.now(), Timestamp::from_secs(2));
/// ```
///
/// # Example (embedded with embassy)
///
/// ```text
/// struct EmbassyClock;
///
/// impl Clock for EmbassyClock {
///     type SleepFuture<'a> = embassy_time::Timer;
///
///     fn now(&self) -> Timestamp {
///         Timestamp::from_millis(embassy_time::Instant::now().as_millis())
///     }
///
///     fn sleep_until(&self, time: Timestamp) -> Self::SleepFuture<'_> {
///         embassy_time::Timer::at(embassy_time::Instant::from_millis(time.as_millis()))
///     }
/// }
/// ```
pub trait Clock {
    /// Future type returned by sleep_until.
    type SleepFuture<'a>: Future<Output = ()>
    where
        Self: 'a;

    /// Get the current timestamp.
    fn now(&self) -> Timestamp;

    /// Sleep until the given timestamp.
    fn sleep_until(&self, time: Timestamp) -> Self::SleepFuture<'_>;
}

/// The three events a forwarding strategy reacts to.
///
/// A host forwarder calls these as packets arrive and timers fire. Each call
/// runs to completion before the next one starts.
pub trait Strategy {
    /// A request arrived on `link`.
    fn on_request_received(&mut self, request: Request, link: LinkId) -> Result<Admission, Error>;

    /// A response arrived on `link`.
    fn on_response_received(&mut self, response: Response, link: LinkId) -> Attribution;

    /// The deadline of the entry named `name` fired. Returns true if an
    /// entry was removed.
    fn on_deadline_expired(&mut self, name: &Name) -> bool;
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_impls {
    //! Mock implementations of traits for unit testing and doc tests.
    //!
    //! Available when running tests or with the `test-support` feature enabled.

    use core::cell::Cell;
    use core::future::{ready, Ready};

    use super::*;

    /// Mock transport that records everything the engine sends.
    pub struct MockTransport {
        forwarded: Vec<(Request, LinkId)>,
        delivered: Vec<(Response, LinkId)>,
        incoming: TransportInChannel,
    }

    impl Default for MockTransport {
        fn default() -> Self {
            Self {
                forwarded: Vec::new(),
                delivered: Vec::new(),
                incoming: Channel::new(),
            }
        }
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Inject a packet as if it was received on `link`.
        pub fn inject_rx(&self, link: LinkId, data: Vec<u8>) {
            let _ = self.incoming.try_send(Incoming::new(link, data));
        }

        /// Take all forwarded requests in send order.
        pub fn take_forwarded(&mut self) -> Vec<(Request, LinkId)> {
            core::mem::take(&mut self.forwarded)
        }

        /// Take all delivered responses in send order.
        pub fn take_delivered(&mut self) -> Vec<(Response, LinkId)> {
            core::mem::take(&mut self.delivered)
        }

        pub fn forwarded(&self) -> &[(Request, LinkId)] {
            &self.forwarded
        }

        pub fn delivered(&self) -> &[(Response, LinkId)] {
            &self.delivered
        }
    }

    impl Transport for MockTransport {
        fn forward(&mut self, request: Request, hop: LinkId) {
            self.forwarded.push((request, hop));
        }

        fn deliver(&mut self, response: Response, link: LinkId) {
            self.delivered.push((response, link));
        }

        fn incoming(&self) -> &TransportInChannel {
            &self.incoming
        }
    }

    /// Mock clock for testing (synchronous, time advances manually).
    pub struct MockClock {
        current: Cell<Timestamp>,
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self {
                current: Cell::new(Timestamp::ZERO),
            }
        }
    }

    impl MockClock {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn at(time: Timestamp) -> Self {
            Self {
                current: Cell::new(time),
            }
        }

        /// Move time to the given timestamp.
        pub fn set(&self, time: Timestamp) {
            self.current.set(time);
        }

        /// Advance time by the given duration.
        pub fn advance(&self, duration: crate::time::Duration) {
            self.current.set(self.current.get() + duration);
        }
    }

    impl Clock for MockClock {
        type SleepFuture<'a> = Ready<()>;

        fn now(&self) -> Timestamp {
            self.current.get()
        }

        fn sleep_until(&self, _time: Timestamp) -> Self::SleepFuture<'_> {
            // In synchronous tests, sleep completes immediately.
            // The test code should advance time manually.
            ready(())
        }
    }
}
