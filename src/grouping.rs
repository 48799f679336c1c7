//! Groupings: the labels the correlation engine reasons about.
//!
//! A grouping is created 1:1 with a node, but its relationship cardinality can
//! diverge afterwards: feedback from other streams attaches further nodes to
//! it. Groupings tolerate shorter idle periods than nodes, so stale groupings
//! are pruned before their owning nodes.

use crate::event::CorrelationEvent;
use crate::ids::{GroupingId, NodeId, StreamId};
use crate::store::RelationshipStore;

/// A grouping's utilization state.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Grouping {
    /// Identity.
    pub id: GroupingId,
    /// Timestep of creation.
    pub created_at: u64,
    /// Timestep this grouping last excited the correlation engine.
    pub last_fired: Option<u64>,
    /// Timestep this grouping last received feedback.
    pub last_feedback: Option<u64>,
    /// Idle timesteps after which this grouping is underutilized.
    pub required_utilization: u64,
}

impl Grouping {
    /// Create a grouping that has never fired.
    pub fn new(id: GroupingId, now: u64, required_utilization: u64) -> Self {
        Self {
            id,
            created_at: now,
            last_fired: None,
            last_feedback: None,
            required_utilization,
        }
    }

    /// Owning stream.
    pub fn stream(&self) -> StreamId {
        self.id.stream
    }

    /// Timesteps since creation.
    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.created_at)
    }

    /// True when neither fired nor fed back for `required_utilization` timesteps.
    pub fn is_underutilized(&self, now: u64) -> bool {
        let last_use = self
            .created_at
            .max(self.last_fired.unwrap_or(0))
            .max(self.last_feedback.unwrap_or(0));
        now.saturating_sub(last_use) >= self.required_utilization
    }

    /// Fire: record the time and build the excitation event.
    ///
    /// Edge learning and forwarding to the correlation engine are done by the
    /// caller, which holds the store and the engine.
    pub fn excite(&mut self, strength: f32, source_node: NodeId, now: u64) -> CorrelationEvent {
        self.last_fired = Some(now);
        CorrelationEvent::new(self.id, strength, now, source_node)
    }

    /// Record the arrival of a feedback packet.
    pub fn record_feedback(&mut self, now: u64) {
        self.last_feedback = Some(now);
    }

    /// Node with the maximal edge weight to this grouping, if any.
    pub fn strongest_node(&self, store: &RelationshipStore) -> Option<NodeId> {
        store.nodes_of(self.id).and_then(|r| r.strongest()).map(|(id, _)| id)
    }
}
