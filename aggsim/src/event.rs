//! Event types and priority queue ordering for discrete event simulation.

use std::cmp::Ordering;

use aggtree::{Request, Timestamp};

use crate::topology::NodeId;

/// Unique sequence number for deterministic event ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Scenario actions that can be scheduled during simulation.
#[derive(Debug, Clone)]
pub enum ScenarioAction {
    /// Disable a specific link.
    DisableLink { from: NodeId, to: NodeId },
    /// Enable a specific link.
    EnableLink { from: NodeId, to: NodeId },
    /// Set loss rate on a link.
    SetLossRate { from: NodeId, to: NodeId, rate: f64 },
    /// Change the value a producer serves.
    SetProducerValue { node: NodeId, value: u64 },
}

/// Events in the discrete event simulation.
#[derive(Debug, Clone)]
pub enum Event {
    /// Deliver an encoded packet to a node.
    PacketDelivery {
        to: NodeId,
        from: NodeId,
        data: Vec<u8>,
    },
    /// Expire whatever is due in a node's pending table.
    DeadlineCheck { node: NodeId },
    /// A node's application issues a request.
    IssueRequest { node: NodeId, request: Request },
    /// Execute a scenario action.
    ScenarioAction(ScenarioAction),
}

/// A scheduled event with timestamp and sequence number for ordering.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    /// When the event should occur.
    pub time: Timestamp,
    /// Sequence number for deterministic ordering of same-time events.
    pub seq: SequenceNumber,
    /// The event to process.
    pub event: Event,
}

impl ScheduledEvent {
    pub fn new(time: Timestamp, seq: SequenceNumber, event: Event) -> Self {
        Self { time, seq, event }
    }
}

// BinaryHeap is a max-heap; ordering is reversed so the earliest event pops first.
impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BinaryHeap;

    use super::*;

    fn check(node: NodeId, ms: u64, seq: u64) -> ScheduledEvent {
        ScheduledEvent::new(
            Timestamp::from_millis(ms),
            SequenceNumber::new(seq),
            Event::DeadlineCheck { node },
        )
    }

    #[test]
    fn test_event_ordering() {
        // Earlier time is "greater" in min-heap terms
        assert!(check(0, 5, 2) > check(0, 10, 1));
    }

    #[test]
    fn test_same_time_sequence_ordering() {
        assert!(check(0, 10, 1) > check(0, 10, 2));
    }

    #[test]
    fn test_heap_pops_in_time_then_sequence_order() {
        let mut heap = BinaryHeap::new();
        heap.push(check(1, 20, 0));
        heap.push(check(2, 10, 2));
        heap.push(check(3, 10, 1));

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop())
            .map(|e| e.seq.value())
            .collect();
        assert_eq!(order, vec![1, 2, 0]);
    }
}
