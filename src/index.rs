//! Approximate nearest-node index over a stream's prototype positions.
//!
//! A thin wrapper around an `hnsw_rs` graph with Euclidean (L2) distance.
//! The index is a snapshot: it is rebuilt from scratch over every live node and
//! is never updated incrementally, so between rebuilds it may point at nodes
//! that have since moved or been evicted. Callers re-check every hit against
//! the store.

use hnsw_rs::hnsw::Hnsw;
use hnsw_rs::prelude::*;
use tracing::info;

use crate::config::EngineConfig;
use crate::ids::{NodeId, StreamId};
use crate::node::PrototypeNode;

/// Upper bound on HNSW layers.
const MAX_LAYER: usize = 16;

/// Rebuildable HNSW index mapping graph entries to node ids.
pub struct NearestIndex {
    graph: Hnsw<'static, f32, DistL2>,
    ids: Vec<NodeId>,
    dimension: usize,
    search_effort: usize,
}

impl core::fmt::Debug for NearestIndex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NearestIndex")
            .field("entries", &self.ids.len())
            .field("dimension", &self.dimension)
            .field("search_effort", &self.search_effort)
            .finish()
    }
}

impl NearestIndex {
    /// Build an index over `nodes`. Returns `None` when there is nothing to index.
    pub fn build<'a>(
        stream: StreamId,
        nodes: impl IntoIterator<Item = &'a PrototypeNode>,
        config: &EngineConfig,
    ) -> Option<Self> {
        let nodes: Vec<&PrototypeNode> = nodes.into_iter().collect();
        let dimension = nodes.first()?.position.len();

        let graph = Hnsw::<f32, DistL2>::new(
            config.index_max_connections,
            nodes.len().max(1),
            MAX_LAYER,
            config.index_construction_effort,
            DistL2 {},
        );
        let mut ids = Vec::with_capacity(nodes.len());
        for node in nodes {
            graph.insert_slice((node.position.as_slice(), ids.len()));
            ids.push(node.id);
        }

        info!(stream = %stream, entries = ids.len(), dimension, "nearest-node index rebuilt");
        Some(Self { graph, ids, dimension, search_effort: config.index_search_effort })
    }

    /// Node nearest to `query` as of the last rebuild.
    pub fn nearest(&self, query: &[f32]) -> Option<NodeId> {
        if query.len() != self.dimension {
            return None;
        }
        self.graph
            .search(query, 1, self.search_effort.max(1))
            .first()
            .and_then(|n| self.ids.get(n.d_id))
            .copied()
    }

    /// Number of indexed nodes.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True when nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
