//! Portable snapshot of an engine's relationship store.
//!
//! Captures the clock, the streams, every node and grouping, and both edge
//! tables. Correlation records and the event window are not captured: a
//! restored engine relearns cross-stream correlations from scratch, and each
//! stream's approximate index is rebuilt by the usual policy.
//!
//! ```text
//! StoreSnapshot
//!   version         u16 = 1
//!   timestep        u64
//!   streams         [StreamRecord]      id, name, next serial, bootstrap state
//!   nodes           [PrototypeNode]
//!   groupings       [Grouping]
//!   node_edges      [EdgeRecord]        node → grouping
//!   grouping_edges  [EdgeRecord]        grouping → node
//! ```
//!
//! Requires the `serde` feature.
//!
//! # Example
//!
//! ```rust,ignore
//! let snapshot = engine.snapshot();
//! let json = serde_json::to_string(&snapshot)?;
//! let restored = Engine::from_snapshot(config, serde_json::from_str(&json)?)?;
//! ```

use std::collections::BTreeMap;

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::grouping::Grouping;
use crate::ids::{EntityId, GroupingId, NodeId, StreamId};
use crate::manager::ClusterManager;
use crate::node::PrototypeNode;
use crate::relation::{Edge, RelationTable};
use crate::store::RelationshipStore;

/// Current snapshot format version.
pub const STORE_SNAPSHOT_VERSION: u16 = 1;

/// Serializable engine state minus correlations.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq)]
pub struct StoreSnapshot {
    /// Format version; [`STORE_SNAPSHOT_VERSION`] for new snapshots.
    pub version: u16,
    /// Engine timestep at capture.
    pub timestep: u64,
    /// Registered streams in id order.
    pub streams: Vec<StreamRecord>,
    /// All nodes in id order.
    pub nodes: Vec<PrototypeNode>,
    /// All groupings in id order.
    pub groupings: Vec<Grouping>,
    /// Node → grouping edges.
    pub node_edges: Vec<EdgeRecord<NodeId, GroupingId>>,
    /// Grouping → node edges.
    pub grouping_edges: Vec<EdgeRecord<GroupingId, NodeId>>,
}

/// Per-stream manager state needed to keep allocating fresh ids.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StreamRecord {
    /// Stream id.
    pub id: StreamId,
    /// Stream name.
    pub name: String,
    /// Next node serial.
    pub next_serial: u64,
    /// Whether bootstrap had finished.
    pub finished_initial: bool,
    /// Pinned vector length, if any vector has been seen.
    pub dimension: Option<usize>,
}

impl From<&ClusterManager> for StreamRecord {
    fn from(m: &ClusterManager) -> Self {
        Self {
            id: m.stream(),
            name: m.name().to_string(),
            next_serial: m.next_serial(),
            finished_initial: m.finished_initial(),
            dimension: m.dimension(),
        }
    }
}

/// One directed edge of a relation table.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq)]
pub struct EdgeRecord<K, R> {
    /// Owning item.
    pub item: K,
    /// Related item.
    pub related: R,
    /// Weight, running position and observation count.
    pub edge: Edge,
}

fn edge_records<K: EntityId, R: EntityId>(table: &RelationTable<K, R>) -> Vec<EdgeRecord<K, R>> {
    let mut records: Vec<EdgeRecord<K, R>> = table
        .iter()
        .flat_map(|(item, rels)| {
            rels.iter().map(move |(related, edge)| EdgeRecord {
                item: *item,
                related: *related,
                edge: edge.clone(),
            })
        })
        .collect();
    records.sort_by(|a, b| a.item.cmp(&b.item).then(a.related.cmp(&b.related)));
    records
}

impl StoreSnapshot {
    /// Capture `engine`.
    pub fn from_engine(engine: &Engine) -> Self {
        let store = engine.store();
        let streams = engine
            .streams()
            .filter_map(|s| engine.manager(s))
            .map(StreamRecord::from)
            .collect();

        let mut nodes: Vec<PrototypeNode> = store.nodes().cloned().collect();
        nodes.sort_by_key(|n| n.id);
        let mut groupings: Vec<Grouping> = store.groupings().cloned().collect();
        groupings.sort_by_key(|g| g.id);

        Self {
            version: STORE_SNAPSHOT_VERSION,
            timestep: engine.timestep(),
            streams,
            nodes,
            groupings,
            node_edges: edge_records(store.node_edge_table()),
            grouping_edges: edge_records(store.grouping_edge_table()),
        }
    }

    /// Rebuild an engine from this snapshot and verify its integrity.
    pub fn into_engine(self, config: EngineConfig) -> Result<Engine> {
        if self.version != STORE_SNAPSHOT_VERSION {
            return Err(EngineError::SnapshotVersion {
                found: self.version,
                expected: STORE_SNAPSHOT_VERSION,
            });
        }

        let mut managers = BTreeMap::new();
        for s in self.streams {
            let manager =
                ClusterManager::restored(s.id, s.name, s.next_serial, s.finished_initial, s.dimension);
            if managers.insert(s.id, manager).is_some() {
                return Err(EngineError::DuplicateEntity { entity: s.id.to_string() });
            }
        }

        let mut store = RelationshipStore::new();
        for node in self.nodes {
            if !managers.contains_key(&node.stream()) {
                return Err(EngineError::UnknownStream { stream: node.stream().to_string() });
            }
            store.restore_node(node)?;
        }
        for grouping in self.groupings {
            if !managers.contains_key(&grouping.stream()) {
                return Err(EngineError::UnknownStream { stream: grouping.stream().to_string() });
            }
            store.restore_grouping(grouping)?;
        }
        for r in self.node_edges {
            store.restore_node_edge(r.item, r.related, r.edge);
        }
        for r in self.grouping_edges {
            store.restore_grouping_edge(r.item, r.related, r.edge);
        }

        let engine = Engine::from_parts(config, self.timestep, store, managers)?;
        engine.verify_integrity()?;
        Ok(engine)
    }

    /// Number of nodes captured.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

impl Engine {
    /// Capture the relationship store and stream state.
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot::from_engine(self)
    }

    /// Restore an engine captured by [`Engine::snapshot`].
    pub fn from_snapshot(config: EngineConfig, snapshot: StoreSnapshot) -> Result<Self> {
        snapshot.into_engine(config)
    }
}
