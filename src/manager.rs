//! Per-stream population owner.
//!
//! A [`ClusterManager`] decides which node answers an incoming encoding, grows
//! the population during bootstrap and by splitting ambiguous nodes, and
//! evicts idle ones. It holds no entities itself: every node and grouping it
//! manages lives in the [`RelationshipStore`], found through the store's stream
//! membership index.
//!
//! # Lifecycle of a stream
//!
//! ```text
//! bootstrap   one node per encoding until `initial_nodes` exist
//! steady      nearest node learns; its strongest grouping fires
//! split       ambiguous nodes are replaced by one prototype per
//!             well-observed grouping edge, plus one at the old position
//! cleanup     idle (and optionally untrained) nodes are evicted
//! ```

use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::event::CorrelationEvent;
use crate::grouping::Grouping;
use crate::ids::{GroupingId, NodeId, StreamId};
#[cfg(feature = "ann")]
use crate::index::NearestIndex;
use crate::node::PrototypeNode;
use crate::relation::Relations;
use crate::store::{GroupingObserver, RelationshipStore};

/// Result of routing one encoding to its nearest node.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Excitation {
    /// Nearest node.
    pub node: NodeId,
    /// That node's strongest grouping, which the caller fires.
    pub grouping: GroupingId,
    /// Distance from the node (before learning) to the encoding.
    pub distance: f32,
}

/// What a split pass changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SplitReport {
    /// Nodes torn down and replaced.
    pub split: Vec<NodeId>,
    /// Nodes created in their place.
    pub spawned: Vec<NodeId>,
}

/// What a cleanup pass removed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Evicted nodes.
    pub nodes: Vec<NodeId>,
    /// Groupings removed because no node was left on them.
    pub groupings: Vec<GroupingId>,
}

/// Population manager for one stream.
#[derive(Debug)]
pub struct ClusterManager {
    stream: StreamId,
    name: String,
    next_serial: u64,
    last_fired_node: Option<NodeId>,
    finished_initial: bool,
    dimension: Option<usize>,
    avg_distance: f32,
    distance_count: u64,
    avg_distance_momentum: f32,
    #[cfg(feature = "ann")]
    index: Option<NearestIndex>,
}

impl ClusterManager {
    /// Create a manager for an empty stream.
    pub fn new(stream: StreamId, name: impl Into<String>) -> Self {
        Self {
            stream,
            name: name.into(),
            next_serial: 0,
            last_fired_node: None,
            finished_initial: false,
            dimension: None,
            avg_distance: 0.0,
            distance_count: 0,
            avg_distance_momentum: 0.0,
            #[cfg(feature = "ann")]
            index: None,
        }
    }

    /// Manager resumed from a snapshot. Distance statistics start over.
    #[cfg(feature = "serde")]
    pub(crate) fn restored(
        stream: StreamId,
        name: String,
        next_serial: u64,
        finished_initial: bool,
        dimension: Option<usize>,
    ) -> Self {
        Self { next_serial, finished_initial, dimension, ..Self::new(stream, name) }
    }

    // ── Accessors ─────────────────────────────────────────────────────────

    /// Stream managed.
    pub fn stream(&self) -> StreamId {
        self.stream
    }

    /// Stream name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Node that answered the most recent encoding.
    pub fn last_fired_node(&self) -> Option<NodeId> {
        self.last_fired_node
    }

    /// True once the bootstrap floor has been reached.
    pub fn finished_initial(&self) -> bool {
        self.finished_initial
    }

    /// Vector length pinned by the first encoding.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Running mean of nearest-node distances.
    pub fn avg_distance(&self) -> f32 {
        self.avg_distance
    }

    /// Momentum of the running mean; small once positions have settled.
    pub fn avg_distance_momentum(&self) -> f32 {
        self.avg_distance_momentum
    }

    /// Distances folded into the running mean.
    pub fn distance_count(&self) -> u64 {
        self.distance_count
    }

    /// True when an approximate index has been built.
    #[cfg(feature = "ann")]
    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }

    /// True when an approximate index has been built.
    #[cfg(not(feature = "ann"))]
    pub fn has_index(&self) -> bool {
        false
    }

    /// Serial the next spawned node will take.
    pub fn next_serial(&self) -> u64 {
        self.next_serial
    }

    // ── Event path ────────────────────────────────────────────────────────

    /// Find (creating if bootstrapping) the node nearest to `encoding`, let it
    /// learn, and name the grouping to fire.
    pub fn route_encoding(
        &mut self,
        store: &mut RelationshipStore,
        encoding: &[f32],
        learn: bool,
        now: u64,
        config: &EngineConfig,
    ) -> Result<Excitation> {
        self.check_dimension(encoding.len())?;
        self.bootstrap(store, encoding, now, config)?;

        let (node_id, distance) = self.nearest(store, encoding, config)?;
        let grouping = store
            .strongest_grouping(node_id)
            .ok_or_else(|| EngineError::invariant(format!("{} has no grouping", node_id)))?;

        let node = store.node_mut(node_id)?;
        node.last_encoding = Some(encoding.to_vec());
        if learn {
            node.learn(encoding, now, config);
        }
        self.last_fired_node = Some(node_id);
        if learn {
            self.record_distance(distance, config);
        }

        Ok(Excitation { node: node_id, grouping, distance })
    }

    /// Apply feedback addressed to one of this stream's groupings.
    ///
    /// The grouping records the arrival; the node that fired last strengthens
    /// its edge to the grouping by `strength · node_grouping_learning_rate`,
    /// folding its last encoding into the edge position. Returns false, with a
    /// warning, when that node is gone.
    pub fn receive_feedback(
        &mut self,
        store: &mut RelationshipStore,
        feedback: &CorrelationEvent,
        now: u64,
        config: &EngineConfig,
    ) -> Result<bool> {
        if feedback.stream() != self.stream {
            return Err(EngineError::invariant(format!(
                "feedback for {} reached the manager of {}",
                feedback.grouping, self.stream
            )));
        }
        store.grouping_mut(feedback.grouping)?.record_feedback(now);

        let Some(node_id) = self.last_fired_node.filter(|n| store.contains_node(*n)) else {
            warn!(stream = %self.stream, grouping = %feedback.grouping, "feedback dropped: no live last-fired node");
            return Ok(false);
        };
        let position = store.node(node_id)?.last_encoding.clone();
        let amount = feedback.strength * config.node_grouping_learning_rate;
        store.adjust_node_to_grouping_strength(node_id, feedback.grouping, amount, position)?;
        store.node_mut(node_id)?.record_feedback();
        Ok(true)
    }

    // ── Population ────────────────────────────────────────────────────────

    /// Create a node at `position` together with its paired grouping.
    pub fn spawn_node(
        &mut self,
        store: &mut RelationshipStore,
        position: Vec<f32>,
        now: u64,
        config: &EngineConfig,
    ) -> Result<NodeId> {
        let id = NodeId::new(self.stream, self.next_serial);
        let grouping = Grouping::new(id.paired_grouping(), now, config.grouping_required_utilization);
        store.add_node(PrototypeNode::new(id, position, now), grouping)?;
        self.next_serial += 1;
        Ok(id)
    }

    /// Bootstrap step: seed a node at `encoding` while below the floor, or
    /// when the stream has been emptied.
    pub fn bootstrap(
        &mut self,
        store: &mut RelationshipStore,
        encoding: &[f32],
        now: u64,
        config: &EngineConfig,
    ) -> Result<Option<NodeId>> {
        let population = store.population(self.stream);
        let seeding = !self.finished_initial && population < config.max_nodes;
        let spawned = if seeding || population == 0 {
            Some(self.spawn_node(store, encoding.to_vec(), now, config)?)
        } else {
            None
        };
        if !self.finished_initial && store.population(self.stream) >= config.initial_nodes {
            self.finished_initial = true;
            debug!(stream = %self.stream, population = store.population(self.stream), "bootstrap finished");
        }
        Ok(spawned)
    }

    /// Nearest node to `encoding` and its distance.
    ///
    /// Uses the approximate index when enabled and built; a hit on a node that
    /// no longer exists falls back to the exact scan. The distance is always
    /// measured against the node's current position.
    pub fn nearest(
        &self,
        store: &RelationshipStore,
        encoding: &[f32],
        config: &EngineConfig,
    ) -> Result<(NodeId, f32)> {
        #[cfg(feature = "ann")]
        if config.approximate_search {
            if let Some(hit) = self.index.as_ref().and_then(|i| i.nearest(encoding)) {
                if let Ok(node) = store.node(hit) {
                    return Ok((hit, node.distance(encoding)));
                }
            }
        }
        #[cfg(not(feature = "ann"))]
        let _ = config;

        self.nearest_exact(store, encoding)
    }

    /// Linear scan over every node of the stream. Ties resolve to the lowest id.
    pub fn nearest_exact(&self, store: &RelationshipStore, encoding: &[f32]) -> Result<(NodeId, f32)> {
        let mut best: Option<(NodeId, f32)> = None;
        for id in store.stream_nodes(self.stream) {
            let d = store.node(id)?.distance(encoding);
            match best {
                Some((_, b)) if !(d < b) => {}
                _ => best = Some((id, d)),
            }
        }
        best.ok_or_else(|| EngineError::not_found(format_args!("any node in {}", self.stream)))
    }

    /// Split the stream's ambiguous nodes.
    ///
    /// Nodes are visited most ambiguous first. A node is eligible when its
    /// correlation variance exceeds the threshold and it is neither new nor
    /// underutilized. Each eligible node is replaced by one node per grouping
    /// edge observed more than `split_min_observations` times (at the edge's
    /// mean position) plus one at its own position. The pass stops once the
    /// population cap or the growth cap is reached; both are checked only
    /// between nodes, so the last split may overshoot the cap.
    pub fn create_new_nodes(
        &mut self,
        store: &mut RelationshipStore,
        now: u64,
        config: &EngineConfig,
    ) -> Result<SplitReport> {
        let mut report = SplitReport::default();
        if store.population(self.stream) >= config.max_nodes {
            return Ok(report);
        }

        let mut candidates = store
            .stream_nodes(self.stream)
            .map(|id| -> Result<(NodeId, f32)> {
                Ok((id, store.node(id)?.correlation_variance(store)))
            })
            .collect::<Result<Vec<_>>>()?;
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let mut growth: i64 = 0;
        for (id, variance) in candidates {
            let node = store.node(id)?;
            let eligible = variance > config.split_variance_threshold
                && !node.is_new(config)
                && !node.is_underutilized(now, config);
            if !eligible {
                continue;
            }

            let own_position = node.position.clone();
            let seeds: Vec<Vec<f32>> = store
                .groupings_of(id)
                .map(Relations::iter)
                .into_iter()
                .flatten()
                .filter(|(_, edge)| edge.observations > config.split_min_observations)
                .filter_map(|(_, edge)| edge.position.clone())
                .collect();

            for position in seeds {
                report.spawned.push(self.spawn_node(store, position, now, config)?);
                growth += 1;
            }
            report.spawned.push(self.spawn_node(store, own_position, now, config)?);
            growth += 1;

            store.delete_node(id)?;
            growth -= 1;
            report.split.push(id);
            if self.last_fired_node == Some(id) {
                self.last_fired_node = None;
            }

            if store.population(self.stream) >= config.max_nodes
                || growth >= config.split_max_growth as i64
            {
                break;
            }
        }

        if !report.split.is_empty() {
            info!(
                stream = %self.stream,
                split = report.split.len(),
                spawned = report.spawned.len(),
                "split ambiguous nodes"
            );
        }
        self.rebuild_index(store, config);
        Ok(report)
    }

    /// Evict underutilized nodes, and new ones too when `delete_new` is set,
    /// then remove the stream's groupings left without nodes.
    pub fn cleanup(
        &mut self,
        store: &mut RelationshipStore,
        delete_new: bool,
        now: u64,
        config: &EngineConfig,
        observer: &mut impl GroupingObserver,
    ) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();

        let members: Vec<NodeId> = store.stream_nodes(self.stream).collect();
        for id in members {
            let node = store.node(id)?;
            if node.is_underutilized(now, config) || (delete_new && node.is_new(config)) {
                store.delete_node(id)?;
                report.nodes.push(id);
            }
        }
        if self.last_fired_node.map_or(false, |n| !store.contains_node(n)) {
            self.last_fired_node = None;
        }

        for g in store.stream_groupings(self.stream) {
            if store.nodes_of(g).map_or(true, Relations::is_empty) {
                store.delete_grouping(g, false, observer)?;
                report.groupings.push(g);
            }
        }

        info!(
            stream = %self.stream,
            nodes = report.nodes.len(),
            groupings = report.groupings.len(),
            population = store.population(self.stream),
            "cleanup"
        );
        Ok(report)
    }

    // ── Approximate index ─────────────────────────────────────────────────

    /// Rebuild the approximate index if one exists, or build the first one
    /// once bootstrap is over and nearest-node distances have settled.
    /// Returns true when an index was (re)built.
    #[cfg(feature = "ann")]
    pub fn rebuild_index(&mut self, store: &RelationshipStore, config: &EngineConfig) -> bool {
        if !config.approximate_search {
            return false;
        }
        let settled = self.finished_initial
            && self.avg_distance_momentum.abs() < config.index_max_distance_momentum
            && self.distance_count > config.index_min_observations;
        if self.index.is_none() && !settled {
            return false;
        }
        let nodes = store.stream_nodes(self.stream).filter_map(|id| store.node(id).ok());
        self.index = NearestIndex::build(self.stream, nodes, config);
        self.index.is_some()
    }

    /// Without the `ann` feature there is no index to build.
    #[cfg(not(feature = "ann"))]
    pub fn rebuild_index(&mut self, _store: &RelationshipStore, _config: &EngineConfig) -> bool {
        false
    }

    // ── Internal helpers ──────────────────────────────────────────────────

    fn check_dimension(&mut self, got: usize) -> Result<()> {
        match self.dimension {
            Some(expected) if expected != got => Err(EngineError::DimensionMismatch { expected, got }),
            Some(_) => Ok(()),
            None => {
                self.dimension = Some(got);
                Ok(())
            }
        }
    }

    fn record_distance(&mut self, distance: f32, config: &EngineConfig) {
        self.distance_count += 1;
        let new_avg = self.avg_distance + (distance - self.avg_distance) / self.distance_count as f32;
        self.avg_distance_momentum =
            config.distance_momentum_decay * self.avg_distance_momentum + (new_avg - self.avg_distance);
        self.avg_distance = new_avg;
    }
}
