//! The engine: one timestep, one store, one correlation engine, one manager
//! per stream.
//!
//! [`Engine`] is the single ordering authority: every mutation of the store,
//! the correlation window and the stream populations goes through `&mut self`,
//! and each event runs to completion, feedback cascade included, before the
//! call returns. Maintenance runs between events, never inside a cascade.
//!
//! ```text
//! receive_sensory_input(stream, v)
//!   manager.route_encoding      nearest node learns toward v
//!   grouping.excite             lastFired = now, grouping → node reinforced
//!   correlation.receive_packet  coincident events correlate, feedback routed
//!     └─ StreamRouter           target stream's manager → last-fired node
//! ```
//!
//! Typical driving loop: feed every stream's vector for one sample at the same
//! timestep, then [`Engine::advance`].

use std::collections::BTreeMap;

use tracing::{info, trace};

use crate::config::EngineConfig;
use crate::correlation::{CorrelationEngine, FeedbackRouter};
use crate::encoding::Encoder;
use crate::error::{EngineError, Result};
use crate::event::CorrelationEvent;
use crate::ids::{GroupingId, NodeId, StreamId};
use crate::manager::{CleanupReport, ClusterManager, SplitReport};
use crate::store::{RelationshipStore, SweepReport};

/// What [`Engine::advance`] ran.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Timestep after advancing.
    pub timestep: u64,
    /// Store-wide underutilization sweep, if due.
    pub sweep: Option<SweepReport>,
    /// Per-stream cleanups, if due.
    pub cleanups: Vec<(StreamId, CleanupReport)>,
    /// Per-stream splits, if due.
    pub splits: Vec<(StreamId, SplitReport)>,
    /// Streams whose index was rebuilt.
    pub index_rebuilds: Vec<StreamId>,
}

impl MaintenanceReport {
    /// True when nothing was due.
    pub fn is_idle(&self) -> bool {
        self.sweep.is_none()
            && self.cleanups.is_empty()
            && self.splits.is_empty()
            && self.index_rebuilds.is_empty()
    }
}

/// Multi-stream associative memory.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    timestep: u64,
    store: RelationshipStore,
    correlation: CorrelationEngine,
    managers: BTreeMap<StreamId, ClusterManager>,
}

impl Engine {
    /// Create an engine with no streams. Fails if `config` does not validate.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let correlation = CorrelationEngine::new(&config);
        Ok(Self {
            config,
            timestep: 0,
            store: RelationshipStore::new(),
            correlation,
            managers: BTreeMap::new(),
        })
    }

    /// Register a stream. Names must be unique.
    pub fn add_stream(&mut self, name: &str) -> Result<StreamId> {
        if self.stream_id(name).is_some() {
            return Err(EngineError::DuplicateEntity { entity: format!("stream {}", name) });
        }
        let raw = u16::try_from(self.managers.len())
            .map_err(|_| EngineError::InvalidConfig { detail: "too many streams".to_string() })?;
        let id = StreamId(raw);
        self.managers.insert(id, ClusterManager::new(id, name));
        info!(stream = %id, name, "stream added");
        Ok(id)
    }

    /// Stream registered under `name`.
    pub fn stream_id(&self, name: &str) -> Option<StreamId> {
        self.managers.values().find(|m| m.name() == name).map(ClusterManager::stream)
    }

    // ── Time ──────────────────────────────────────────────────────────────

    /// Current timestep.
    pub fn timestep(&self) -> u64 {
        self.timestep
    }

    /// Jump forward to `timestep`. Runs no maintenance.
    pub fn set_timestep(&mut self, timestep: u64) -> Result<()> {
        if timestep < self.timestep {
            return Err(EngineError::TimeReversal { current: self.timestep, requested: timestep });
        }
        self.timestep = timestep;
        Ok(())
    }

    /// Step the clock and run whatever maintenance falls due on the new timestep.
    pub fn advance(&mut self) -> Result<MaintenanceReport> {
        self.timestep = self.timestep.saturating_add(1);
        let now = self.timestep;
        let due = |every: u64| every != 0 && now % every == 0;

        let mut report = MaintenanceReport { timestep: now, ..MaintenanceReport::default() };
        if due(self.config.cleanup_every) {
            report.sweep = Some(self.sweep_underutilized()?);
            report.cleanups = self.cleanup_all(false)?;
        }
        if due(self.config.growth_every) {
            let streams: Vec<StreamId> = self.managers.keys().copied().collect();
            for stream in streams {
                let split = self.create_new_nodes(stream)?;
                report.splits.push((stream, split));
            }
        }
        if due(self.config.index_rebuild_every) {
            let streams: Vec<StreamId> = self.managers.keys().copied().collect();
            for stream in streams {
                if self.rebuild_index(stream)? {
                    report.index_rebuilds.push(stream);
                }
            }
        }
        if !report.is_idle() {
            info!(timestep = now, "maintenance ran");
        }
        Ok(report)
    }

    // ── Event path ────────────────────────────────────────────────────────

    /// Route one encoding through `stream` and the correlation engine.
    ///
    /// Returns the grouping that fired. The value is informational; learning
    /// happens through the feedback cascade.
    pub fn receive_sensory_input(
        &mut self,
        stream: StreamId,
        vector: &[f32],
        learn: bool,
    ) -> Result<GroupingId> {
        let now = self.timestep;
        let manager = self
            .managers
            .get_mut(&stream)
            .ok_or_else(|| EngineError::UnknownStream { stream: stream.to_string() })?;
        let hit = manager.route_encoding(&mut self.store, vector, learn, now, &self.config)?;

        let event = self.store.grouping_mut(hit.grouping)?.excite(1.0, hit.node, now);
        if learn {
            self.store.adjust_grouping_to_node_strength(
                hit.grouping,
                hit.node,
                self.config.grouping_node_learning_rate,
            )?;
        }
        trace!(stream = %stream, node = %hit.node, grouping = %hit.grouping, distance = hit.distance, "excited");

        let mut router = StreamRouter {
            store: &mut self.store,
            managers: &mut self.managers,
            config: &self.config,
            now,
        };
        self.correlation.receive_packet(event, learn, &mut router)?;
        Ok(hit.grouping)
    }

    /// Encode `sample` with `encoder` and route it through `stream`.
    pub fn receive_sample<E: Encoder>(
        &mut self,
        stream: StreamId,
        encoder: &E,
        sample: &E::Sample,
        learn: bool,
    ) -> Result<GroupingId> {
        let vector = encoder.encode(sample);
        if vector.len() != encoder.dimension() {
            return Err(EngineError::DimensionMismatch { expected: encoder.dimension(), got: vector.len() });
        }
        self.receive_sensory_input(stream, &vector, learn)
    }

    // ── Maintenance ───────────────────────────────────────────────────────

    /// Evict `stream`'s idle nodes, and its untrained ones when `delete_new`.
    pub fn cleanup(&mut self, stream: StreamId, delete_new: bool) -> Result<CleanupReport> {
        let manager = self
            .managers
            .get_mut(&stream)
            .ok_or_else(|| EngineError::UnknownStream { stream: stream.to_string() })?;
        manager.cleanup(&mut self.store, delete_new, self.timestep, &self.config, &mut self.correlation)
    }

    /// [`cleanup`](Self::cleanup) every stream.
    pub fn cleanup_all(&mut self, delete_new: bool) -> Result<Vec<(StreamId, CleanupReport)>> {
        let mut reports = Vec::with_capacity(self.managers.len());
        for (stream, manager) in self.managers.iter_mut() {
            let report = manager.cleanup(
                &mut self.store,
                delete_new,
                self.timestep,
                &self.config,
                &mut self.correlation,
            )?;
            reports.push((*stream, report));
        }
        Ok(reports)
    }

    /// Run the split policy on `stream`.
    pub fn create_new_nodes(&mut self, stream: StreamId) -> Result<SplitReport> {
        let manager = self
            .managers
            .get_mut(&stream)
            .ok_or_else(|| EngineError::UnknownStream { stream: stream.to_string() })?;
        manager.create_new_nodes(&mut self.store, self.timestep, &self.config)
    }

    /// Force-delete every underutilized grouping across all streams.
    pub fn sweep_underutilized(&mut self) -> Result<SweepReport> {
        let report = self.store.sweep_underutilized(self.timestep, &mut self.correlation)?;
        if !report.groupings.is_empty() {
            info!(groupings = report.groupings.len(), nodes = report.nodes.len(), "underutilized groupings swept");
        }
        Ok(report)
    }

    /// Apply the index rebuild policy to `stream`. Returns true when rebuilt.
    pub fn rebuild_index(&mut self, stream: StreamId) -> Result<bool> {
        let manager = self
            .managers
            .get_mut(&stream)
            .ok_or_else(|| EngineError::UnknownStream { stream: stream.to_string() })?;
        Ok(manager.rebuild_index(&self.store, &self.config))
    }

    /// Check the store, the correlation records, and that every record names a
    /// live grouping.
    pub fn verify_integrity(&self) -> Result<()> {
        self.store.verify_integrity()?;
        self.correlation.verify()?;
        for record in self.correlation.correlations() {
            if !self.store.contains_grouping(record.grouping()) {
                return Err(EngineError::invariant(format!(
                    "correlation record for removed {}",
                    record.grouping()
                )));
            }
        }
        Ok(())
    }

    // ── Accessors ─────────────────────────────────────────────────────────

    /// Configuration in force.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The relationship store.
    pub fn store(&self) -> &RelationshipStore {
        &self.store
    }

    /// The correlation engine.
    pub fn correlation(&self) -> &CorrelationEngine {
        &self.correlation
    }

    /// Manager of `stream`.
    pub fn manager(&self, stream: StreamId) -> Option<&ClusterManager> {
        self.managers.get(&stream)
    }

    /// Registered streams in id order.
    pub fn streams(&self) -> impl Iterator<Item = StreamId> + '_ {
        self.managers.keys().copied()
    }

    #[cfg(feature = "serde")]
    pub(crate) fn from_parts(
        config: EngineConfig,
        timestep: u64,
        store: RelationshipStore,
        managers: BTreeMap<StreamId, ClusterManager>,
    ) -> Result<Self> {
        config.validate()?;
        let correlation = CorrelationEngine::new(&config);
        Ok(Self { config, timestep, store, correlation, managers })
    }
}

// ── Feedback routing ──────────────────────────────────────────────────────

/// Delivers correlation feedback into the owning stream, borrowing the
/// engine's store and managers for the length of one cascade.
struct StreamRouter<'a> {
    store: &'a mut RelationshipStore,
    managers: &'a mut BTreeMap<StreamId, ClusterManager>,
    config: &'a EngineConfig,
    now: u64,
}

impl FeedbackRouter for StreamRouter<'_> {
    fn certainty(&self, node: NodeId) -> f32 {
        self.store.node(node).map_or(0.0, |n| n.certainty(&*self.store, self.config))
    }

    fn route_feedback(&mut self, feedback: CorrelationEvent) -> Result<()> {
        let manager = self
            .managers
            .get_mut(&feedback.stream())
            .ok_or_else(|| EngineError::UnknownStream { stream: feedback.stream().to_string() })?;
        manager.receive_feedback(self.store, &feedback, self.now, self.config)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(initial: usize) -> Engine {
        Engine::new(EngineConfig {
            initial_nodes: initial,
            approximate_search: false,
            ..EngineConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_duplicate_stream_name_rejected() {
        let mut e = engine(1);
        e.add_stream("vision").unwrap();
        assert!(matches!(e.add_stream("vision"), Err(EngineError::DuplicateEntity { .. })));
        assert_eq!(e.stream_id("vision"), Some(StreamId(0)));
    }

    #[test]
    fn test_time_only_moves_forward() {
        let mut e = engine(1);
        e.set_timestep(10).unwrap();
        assert!(matches!(e.set_timestep(9), Err(EngineError::TimeReversal { .. })));
        e.advance().unwrap();
        assert_eq!(e.timestep(), 11);
    }

    #[test]
    fn test_unknown_stream() {
        let mut e = engine(1);
        let err = e.receive_sensory_input(StreamId(3), &[0.0], true).unwrap_err();
        assert!(matches!(err, EngineError::UnknownStream { .. }));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig { max_nodes: 0, ..EngineConfig::default() };
        assert!(matches!(Engine::new(config), Err(EngineError::InvalidConfig { .. })));
    }

    #[test]
    fn test_excitation_reinforces_grouping_edge() {
        let mut e = engine(1);
        let s = e.add_stream("vision").unwrap();
        let g = e.receive_sensory_input(s, &[1.0, 2.0], true).unwrap();
        let grouping = e.store().grouping(g).unwrap();
        assert_eq!(grouping.last_fired, Some(0));
        assert_eq!(e.correlation().window().count(), 1);
        e.verify_integrity().unwrap();
    }
}
