//! Stable entity identities.
//!
//! Every prototype node and grouping is named by its owning stream plus a
//! per-stream serial. A node and the grouping created alongside it share the
//! same serial, so `s0/node_7` is born paired with `s0/cluster_node_7`.
//! These identifiers are the join key for every table in the
//! [`RelationshipStore`](crate::store::RelationshipStore); nothing in the crate
//! holds a reference from one entity to another.

use core::fmt;
use core::hash::Hash;

/// Common bounds for anything used as a key in a relation table.
pub trait EntityId: Copy + Eq + Ord + Hash + fmt::Debug + fmt::Display {
    /// The stream this entity belongs to.
    fn stream(&self) -> StreamId;
}

/// Identifier of one sensory stream (modality).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StreamId(pub u16);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Identifier of a prototype node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId {
    /// Owning stream.
    pub stream: StreamId,
    /// Per-stream serial, never reused within a stream.
    pub serial: u64,
}

impl NodeId {
    /// Construct a node identifier.
    pub const fn new(stream: StreamId, serial: u64) -> Self {
        Self { stream, serial }
    }

    /// The grouping created 1:1 with this node.
    pub const fn paired_grouping(&self) -> GroupingId {
        GroupingId { stream: self.stream, serial: self.serial }
    }
}

impl EntityId for NodeId {
    fn stream(&self) -> StreamId {
        self.stream
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/node_{}", self.stream, self.serial)
    }
}

/// Identifier of a grouping (cluster).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GroupingId {
    /// Owning stream.
    pub stream: StreamId,
    /// Serial shared with the node this grouping was created for.
    pub serial: u64,
}

impl GroupingId {
    /// Construct a grouping identifier.
    pub const fn new(stream: StreamId, serial: u64) -> Self {
        Self { stream, serial }
    }
}

impl EntityId for GroupingId {
    fn stream(&self) -> StreamId {
        self.stream
    }
}

impl fmt::Display for GroupingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/cluster_node_{}", self.stream, self.serial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_stream_scoped() {
        let a = NodeId::new(StreamId(0), 3);
        let b = NodeId::new(StreamId(1), 3);
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "s0/node_3");
        assert_eq!(b.to_string(), "s1/node_3");
    }

    #[test]
    fn test_paired_grouping_shares_serial() {
        let n = NodeId::new(StreamId(2), 41);
        let g = n.paired_grouping();
        assert_eq!(g.stream, StreamId(2));
        assert_eq!(g.serial, 41);
        assert_eq!(g.to_string(), "s2/cluster_node_41");
    }
}
