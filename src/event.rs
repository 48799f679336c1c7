//! Excitation and feedback packets.

use crate::ids::{GroupingId, NodeId, StreamId};

/// An immutable excitation (or feedback) record.
///
/// Produced each time a grouping fires, consumed by the correlation window
/// and by feedback routing. Never persisted beyond the window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CorrelationEvent {
    /// Grouping that fired, or the grouping feedback is addressed to.
    pub grouping: GroupingId,
    /// Excitation strength. In [0, 1] for excitations; feedback may be amplified.
    pub strength: f32,
    /// Timestep of the excitation.
    pub time: u64,
    /// Node whose match caused the excitation.
    pub source_node: NodeId,
}

impl CorrelationEvent {
    /// Construct an event.
    pub const fn new(grouping: GroupingId, strength: f32, time: u64, source_node: NodeId) -> Self {
        Self { grouping, strength, time, source_node }
    }

    /// Stream owning the event's grouping.
    pub fn stream(&self) -> StreamId {
        self.grouping.stream
    }
}
