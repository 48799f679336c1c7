//! The relationship store: identity arenas plus mirrored edge tables.
//!
//! The store owns every [`PrototypeNode`] and [`Grouping`] and every edge
//! between them. Components never hold references to one another; they hold
//! identifiers and navigate through the store's typed queries. Deleting an
//! entity is "remove from the arena, purge from the indexes".
//!
//! Two edge tables are kept as mirror images:
//!
//! ```text
//! nodes_to_groupings   node     → { grouping: Edge { weight, position, observations } }
//! groupings_to_nodes   grouping → { node:     Edge { weight, observations } }
//! ```
//!
//! # Invariants
//!
//! - Outgoing weights of any item with at least one edge sum to 1 ± 0.01.
//! - `node → grouping` exists in one table iff `grouping → node` exists in the other.
//! - An item relates to another at most once.
//! - A grouping is deleted only once it has no node edges. Forced deletion
//!   detaches those edges first and deletes every node left with none.
//!
//! Groupings are only ever created together with a node through
//! [`RelationshipStore::add_node`].

use std::collections::{BTreeMap, BTreeSet};

use hashbrown::HashMap;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::grouping::Grouping;
use crate::ids::{GroupingId, NodeId, StreamId};
use crate::node::PrototypeNode;
use crate::relation::{RelationTable, Relations};

/// Notified whenever a grouping leaves the store.
///
/// The correlation engine implements this so that its records never outlive
/// the groupings they describe.
pub trait GroupingObserver {
    /// `grouping` has been removed from the store.
    fn grouping_removed(&mut self, grouping: GroupingId);
}

impl GroupingObserver for () {
    fn grouping_removed(&mut self, _grouping: GroupingId) {}
}

/// What an underutilization sweep removed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Groupings force-deleted.
    pub groupings: Vec<GroupingId>,
    /// Nodes deleted because their last edge went with a grouping.
    pub nodes: Vec<NodeId>,
}

/// Owner of all nodes, groupings and the edges between them.
#[derive(Clone, Debug)]
pub struct RelationshipStore {
    nodes: HashMap<NodeId, PrototypeNode>,
    groupings: HashMap<GroupingId, Grouping>,
    node_groupings: RelationTable<NodeId, GroupingId>,
    grouping_nodes: RelationTable<GroupingId, NodeId>,
    stream_nodes: BTreeMap<StreamId, BTreeSet<NodeId>>,
}

impl Default for RelationshipStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RelationshipStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            groupings: HashMap::new(),
            node_groupings: RelationTable::new("nodes_to_groupings"),
            grouping_nodes: RelationTable::new("groupings_to_nodes"),
            stream_nodes: BTreeMap::new(),
        }
    }

    // ── Creation ──────────────────────────────────────────────────────────

    /// Register a node together with its new grouping, joined by a single
    /// reciprocal edge of weight 1.
    ///
    /// This is the only way a grouping enters the store.
    pub fn add_node(&mut self, node: PrototypeNode, grouping: Grouping) -> Result<()> {
        let (nid, gid) = (node.id, grouping.id);
        if self.nodes.contains_key(&nid) {
            return Err(EngineError::DuplicateEntity { entity: nid.to_string() });
        }
        if self.groupings.contains_key(&gid) {
            return Err(EngineError::DuplicateEntity { entity: gid.to_string() });
        }
        if nid.stream != gid.stream {
            return Err(EngineError::invariant(format!(
                "{} and {} belong to different streams",
                nid, gid
            )));
        }

        self.node_groupings.add_related(nid, gid, 1.0, None)?;
        self.grouping_nodes.add_related(gid, nid, 1.0, None)?;
        self.stream_nodes.entry(nid.stream).or_default().insert(nid);
        self.nodes.insert(nid, node);
        self.groupings.insert(gid, grouping);

        debug!(node = %nid, grouping = %gid, "added node");
        Ok(())
    }

    // ── Deletion ──────────────────────────────────────────────────────────

    /// Remove a node, detach all its grouping edges and drop it from its
    /// stream's membership index.
    ///
    /// The node's groupings stay in the store, possibly with no nodes left.
    pub fn delete_node(&mut self, id: NodeId) -> Result<PrototypeNode> {
        if !self.nodes.contains_key(&id) {
            return Err(EngineError::not_found(id));
        }
        let groupings: Vec<GroupingId> = match self.node_groupings.get(&id) {
            Some(rels) => rels.keys().copied().collect(),
            None => return Err(EngineError::invariant(format!("{} has no relation row", id))),
        };
        for g in &groupings {
            if !self.grouping_nodes.is_related(g, &id) {
                return Err(EngineError::invariant(format!(
                    "{} -> {} has no mirror edge",
                    id, g
                )));
            }
        }

        for g in &groupings {
            self.grouping_nodes.remove_related(g, &id)?;
        }
        self.node_groupings.remove_item(&id)?;
        if let Some(members) = self.stream_nodes.get_mut(&id.stream) {
            members.remove(&id);
        }
        let node = self.nodes.remove(&id).ok_or_else(|| EngineError::not_found(id))?;

        debug!(node = %id, "removed node");
        Ok(node)
    }

    /// Remove a grouping.
    ///
    /// Without `force` the grouping must have no node edges. With `force` every
    /// node edge is detached first, and any node left with no grouping is
    /// deleted as well. `observer` is told once the grouping is gone.
    ///
    /// Returns the nodes deleted by the cascade.
    pub fn delete_grouping(
        &mut self,
        id: GroupingId,
        force: bool,
        observer: &mut impl GroupingObserver,
    ) -> Result<Vec<NodeId>> {
        if !self.groupings.contains_key(&id) {
            return Err(EngineError::not_found(id));
        }
        let members: Vec<NodeId> = self
            .grouping_nodes
            .get(&id)
            .map(|r| r.keys().copied().collect())
            .unwrap_or_default();
        if !members.is_empty() && !force {
            return Err(EngineError::invariant(format!(
                "{} still has {} node edges",
                id,
                members.len()
            )));
        }
        for n in &members {
            if !self.node_groupings.is_related(n, &id) {
                return Err(EngineError::invariant(format!(
                    "{} -> {} has no mirror edge",
                    id, n
                )));
            }
        }

        let mut removed = Vec::new();
        for n in members {
            self.node_groupings.remove_related(&n, &id)?;
            self.grouping_nodes.remove_related(&id, &n)?;
            let orphaned = self.node_groupings.get(&n).map_or(true, Relations::is_empty);
            if orphaned {
                self.delete_node(n)?;
                removed.push(n);
            }
        }
        if self.grouping_nodes.get(&id).is_some() {
            self.grouping_nodes.remove_item(&id)?;
        }
        self.groupings.remove(&id);
        observer.grouping_removed(id);

        debug!(grouping = %id, cascaded = removed.len(), "removed grouping");
        Ok(removed)
    }

    /// Force-delete every underutilized grouping.
    pub fn sweep_underutilized(
        &mut self,
        now: u64,
        observer: &mut impl GroupingObserver,
    ) -> Result<SweepReport> {
        let mut stale: Vec<GroupingId> = self
            .groupings
            .values()
            .filter(|g| g.is_underutilized(now))
            .map(|g| g.id)
            .collect();
        stale.sort_unstable();

        let mut report = SweepReport::default();
        for id in stale {
            let nodes = self.delete_grouping(id, true, observer)?;
            report.groupings.push(id);
            report.nodes.extend(nodes);
        }
        Ok(report)
    }

    // ── Edge learning ─────────────────────────────────────────────────────

    /// Strengthen `node → grouping` by `amount`, creating the edge if needed.
    ///
    /// A new edge starts at `amount` (not 1) and records `position`; its mirror
    /// `grouping → node` is created alongside. An existing edge is reinforced,
    /// counts an observation and folds `position` into its running mean.
    /// Either way the node's weights are re-normalized.
    pub fn adjust_node_to_grouping_strength(
        &mut self,
        node: NodeId,
        grouping: GroupingId,
        amount: f32,
        position: Option<Vec<f32>>,
    ) -> Result<()> {
        self.require_node(node)?;
        self.require_grouping(grouping)?;

        let forward = self.node_groupings.is_related(&node, &grouping);
        let backward = self.grouping_nodes.is_related(&grouping, &node);
        if forward != backward {
            return Err(EngineError::invariant(format!(
                "{} <-> {} is only half related",
                node, grouping
            )));
        }

        if forward {
            return self.node_groupings.increase(&node, &grouping, amount, position);
        }
        self.node_groupings.add_related(node, grouping, amount, position)?;
        if let Err(e) = self.grouping_nodes.add_related(grouping, node, amount, None) {
            self.node_groupings.remove_related(&node, &grouping)?;
            return Err(e);
        }
        Ok(())
    }

    /// Strengthen an existing `grouping → node` edge by `amount` and re-normalize.
    pub fn adjust_grouping_to_node_strength(
        &mut self,
        grouping: GroupingId,
        node: NodeId,
        amount: f32,
    ) -> Result<()> {
        self.grouping_nodes.increase(&grouping, &node, amount, None)
    }

    // ── Queries ───────────────────────────────────────────────────────────

    /// The node with this id.
    pub fn node(&self, id: NodeId) -> Result<&PrototypeNode> {
        self.nodes.get(&id).ok_or_else(|| EngineError::not_found(id))
    }

    /// Mutable access to a node's own fields. Edges go through the store.
    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut PrototypeNode> {
        self.nodes.get_mut(&id).ok_or_else(|| EngineError::not_found(id))
    }

    /// The grouping with this id.
    pub fn grouping(&self, id: GroupingId) -> Result<&Grouping> {
        self.groupings.get(&id).ok_or_else(|| EngineError::not_found(id))
    }

    /// Mutable access to a grouping's own fields.
    pub fn grouping_mut(&mut self, id: GroupingId) -> Result<&mut Grouping> {
        self.groupings.get_mut(&id).ok_or_else(|| EngineError::not_found(id))
    }

    /// True when the node exists.
    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// True when the grouping exists.
    pub fn contains_grouping(&self, id: GroupingId) -> bool {
        self.groupings.contains_key(&id)
    }

    /// Grouping edges of a node.
    pub fn groupings_of(&self, node: NodeId) -> Option<&Relations<GroupingId>> {
        self.node_groupings.get(&node)
    }

    /// Node edges of a grouping.
    pub fn nodes_of(&self, grouping: GroupingId) -> Option<&Relations<NodeId>> {
        self.grouping_nodes.get(&grouping)
    }

    /// Grouping the node is most strongly associated with.
    pub fn strongest_grouping(&self, node: NodeId) -> Option<GroupingId> {
        self.groupings_of(node).and_then(|r| r.strongest()).map(|(id, _)| id)
    }

    /// Node most strongly associated with the grouping.
    pub fn strongest_node(&self, grouping: GroupingId) -> Option<NodeId> {
        self.nodes_of(grouping).and_then(|r| r.strongest()).map(|(id, _)| id)
    }

    /// Members of a stream, in id order.
    pub fn stream_nodes(&self, stream: StreamId) -> impl Iterator<Item = NodeId> + '_ {
        self.stream_nodes.get(&stream).into_iter().flat_map(|s| s.iter().copied())
    }

    /// Groupings owned by a stream, in id order.
    pub fn stream_groupings(&self, stream: StreamId) -> Vec<GroupingId> {
        let mut ids: Vec<GroupingId> =
            self.groupings.keys().filter(|g| g.stream == stream).copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of nodes in a stream.
    pub fn population(&self, stream: StreamId) -> usize {
        self.stream_nodes.get(&stream).map_or(0, BTreeSet::len)
    }

    /// Total nodes across all streams.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Total groupings across all streams.
    pub fn grouping_count(&self) -> usize {
        self.groupings.len()
    }

    /// Iterate all nodes (arbitrary order).
    pub fn nodes(&self) -> impl Iterator<Item = &PrototypeNode> {
        self.nodes.values()
    }

    /// Iterate all groupings (arbitrary order).
    pub fn groupings(&self) -> impl Iterator<Item = &Grouping> {
        self.groupings.values()
    }

    // ── Diagnostics ───────────────────────────────────────────────────────

    /// Check normalization, mirror consistency, identity coverage and the
    /// stream index. Diagnostic only; never called on the event path.
    pub fn verify_integrity(&self) -> Result<()> {
        self.node_groupings.verify()?;
        self.grouping_nodes.verify()?;

        for id in self.nodes.keys() {
            if self.node_groupings.get(id).is_none() {
                return Err(EngineError::invariant(format!("{} has no relation row", id)));
            }
        }
        for id in self.groupings.keys() {
            if self.grouping_nodes.get(id).is_none() {
                return Err(EngineError::invariant(format!("{} has no relation row", id)));
            }
        }

        let mut forward_edges = 0usize;
        for (n, rels) in self.node_groupings.iter() {
            if !self.nodes.contains_key(n) {
                return Err(EngineError::invariant(format!("row for unknown {}", n)));
            }
            for g in rels.keys() {
                if !self.groupings.contains_key(g) {
                    return Err(EngineError::invariant(format!("{} -> unknown {}", n, g)));
                }
                if !self.grouping_nodes.is_related(g, n) {
                    return Err(EngineError::invariant(format!("{} -> {} has no mirror", n, g)));
                }
                forward_edges += 1;
            }
        }
        let mut backward_edges = 0usize;
        for (g, rels) in self.grouping_nodes.iter() {
            if !self.groupings.contains_key(g) {
                return Err(EngineError::invariant(format!("row for unknown {}", g)));
            }
            for n in rels.keys() {
                if !self.nodes.contains_key(n) {
                    return Err(EngineError::invariant(format!("{} -> unknown {}", g, n)));
                }
                if !self.node_groupings.is_related(n, g) {
                    return Err(EngineError::invariant(format!("{} -> {} has no mirror", g, n)));
                }
                backward_edges += 1;
            }
        }
        if forward_edges != backward_edges {
            return Err(EngineError::invariant(format!(
                "edge counts differ: {} forward, {} backward",
                forward_edges, backward_edges
            )));
        }

        let indexed: usize = self.stream_nodes.values().map(BTreeSet::len).sum();
        if indexed != self.nodes.len() {
            return Err(EngineError::invariant(format!(
                "stream index holds {} nodes, arena holds {}",
                indexed,
                self.nodes.len()
            )));
        }
        for (stream, members) in &self.stream_nodes {
            for n in members {
                if n.stream != *stream || !self.nodes.contains_key(n) {
                    return Err(EngineError::invariant(format!(
                        "stream index of {} lists {}",
                        stream, n
                    )));
                }
            }
        }
        Ok(())
    }

    // ── Internal helpers ──────────────────────────────────────────────────

    fn require_node(&self, id: NodeId) -> Result<()> {
        if self.nodes.contains_key(&id) {
            Ok(())
        } else {
            Err(EngineError::not_found(id))
        }
    }

    fn require_grouping(&self, id: GroupingId) -> Result<()> {
        if self.groupings.contains_key(&id) {
            Ok(())
        } else {
            Err(EngineError::not_found(id))
        }
    }

    #[cfg(feature = "serde")]
    pub(crate) fn node_edge_table(&self) -> &RelationTable<NodeId, GroupingId> {
        &self.node_groupings
    }

    #[cfg(feature = "serde")]
    pub(crate) fn grouping_edge_table(&self) -> &RelationTable<GroupingId, NodeId> {
        &self.grouping_nodes
    }

    /// Insert a node and its empty relation row without creating a grouping.
    #[cfg(feature = "serde")]
    pub(crate) fn restore_node(&mut self, node: PrototypeNode) -> Result<()> {
        let id = node.id;
        self.node_groupings.insert_item(id)?;
        self.stream_nodes.entry(id.stream).or_default().insert(id);
        if self.nodes.insert(id, node).is_some() {
            return Err(EngineError::DuplicateEntity { entity: id.to_string() });
        }
        Ok(())
    }

    /// Insert a grouping and its empty relation row.
    #[cfg(feature = "serde")]
    pub(crate) fn restore_grouping(&mut self, grouping: Grouping) -> Result<()> {
        let id = grouping.id;
        self.grouping_nodes.insert_item(id)?;
        if self.groupings.insert(id, grouping).is_some() {
            return Err(EngineError::DuplicateEntity { entity: id.to_string() });
        }
        Ok(())
    }

    #[cfg(feature = "serde")]
    pub(crate) fn restore_node_edge(&mut self, node: NodeId, grouping: GroupingId, edge: crate::relation::Edge) {
        self.node_groupings.insert_edge_raw(node, grouping, edge);
    }

    #[cfg(feature = "serde")]
    pub(crate) fn restore_grouping_edge(&mut self, grouping: GroupingId, node: NodeId, edge: crate::relation::Edge) {
        self.grouping_nodes.insert_edge_raw(grouping, node, edge);
    }
}
