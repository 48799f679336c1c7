//! Engine configuration.
//!
//! One flat, immutable struct constructed once and threaded through every
//! constructor. Many parameters depend on each other; [`EngineConfig::validate`]
//! rejects the combinations known to break the engine.
//!
//! The defaults are tuned for a reference run of 55 000 training samples per
//! epoch: utilization thresholds and maintenance cadences are expressed as
//! fractions of that run length.

use crate::error::{EngineError, Result};

/// Reference run length the default cadences and thresholds are scaled to.
pub const REFERENCE_RUN_LENGTH: u64 = 55_000;

/// Largest accepted kernel half-width. The window holds `W + 1` events.
pub const MAX_WINDOW_HALF_WIDTH: u64 = u16::MAX as u64;

/// Shape of the temporal kernel used by the correlation engine.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum KernelShape {
    /// Only events at exactly the same timestep are correlated: `[1, 0, 0, ...]`.
    Coincidence,
    /// Truncated half of a symmetric Gaussian window with standard deviation `std`.
    Bell {
        /// Standard deviation of the Gaussian, in timesteps.
        std: f32,
    },
}

/// Configuration for an [`Engine`](crate::engine::Engine).
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineConfig {
    // ── Population ────────────────────────────────────────────────────────
    /// Ceiling on nodes per stream. Default: 6000.
    pub max_nodes: usize,
    /// Bootstrap floor: one node is created per received vector until a stream
    /// holds this many. Default: 250.
    pub initial_nodes: usize,

    // ── Grouping ──────────────────────────────────────────────────────────
    /// Idle timesteps after which a grouping is underutilized. Default: 27 500.
    pub grouping_required_utilization: u64,
    /// Grouping → node edge reinforcement per excitation. Default: 0.02.
    pub grouping_node_learning_rate: f32,

    // ── Node ──────────────────────────────────────────────────────────────
    /// Idle timesteps after which a node is underutilized. Must exceed the
    /// grouping threshold so stale groupings are pruned first. Default: 55 550.
    pub node_required_utilization: u64,
    /// Step size of the positional update. Default: 0.04.
    pub node_position_learning_rate: f32,
    /// Decay applied to the position momentum on each update. Default: 0.5.
    pub node_momentum_decay: f32,
    /// Weight of the momentum term in the positional update. Default: 0.0.
    pub node_momentum_alpha: f32,
    /// Node → grouping edge reinforcement per unit of feedback strength. Default: 0.05.
    pub node_grouping_learning_rate: f32,
    /// Feedback count at or below which a node is still new. Default: 25.
    pub node_is_new_threshold: u32,
    /// Feedback count at which node certainty stops growing with age. Default: 25.
    pub node_certainty_age_factor: u32,

    // ── Split policy ──────────────────────────────────────────────────────
    /// Correlation variance above which a node is ambiguous enough to split. Default: 5e-3.
    pub split_variance_threshold: f32,
    /// Net nodes a single split pass may add. Default: 55.
    pub split_max_growth: usize,
    /// An edge must have been observed more than this many times to seed a
    /// new prototype. Default: 3.
    pub split_min_observations: u32,

    // ── Nearest-node search ───────────────────────────────────────────────
    /// Use the approximate index once it has been built. Ignored without the
    /// `ann` feature. Default: true.
    pub approximate_search: bool,
    /// Graph degree of the approximate index. Default: 24.
    pub index_max_connections: usize,
    /// Candidate list size while building the index. Default: 200.
    pub index_construction_effort: usize,
    /// Candidate list size per query. Default: 128.
    pub index_search_effort: usize,
    /// Nearest-distance observations required before the first build. Default: 1000.
    pub index_min_observations: u64,
    /// Distance momentum must be below this before the first build. Default: 1e30.
    pub index_max_distance_momentum: f32,
    /// Decay of the nearest-distance momentum. Default: 0.5.
    pub distance_momentum_decay: f32,

    // ── Correlation engine ────────────────────────────────────────────────
    /// Correlation reinforcement scale. Default: 0.02.
    pub correlation_learning_rate: f32,
    /// Temporal kernel shape. Default: [`KernelShape::Coincidence`].
    pub kernel: KernelShape,
    /// Kernel half-width `W`, in timesteps. Default: 10.
    pub window_half_width: u64,
    /// Age at which correlation certainty stops growing. Default: 25.
    pub correlation_certainty_age_factor: u32,

    // ── Maintenance cadence (0 disables) ──────────────────────────────────
    /// Run the underutilization sweep and per-stream cleanup every N steps. Default: 13 750.
    pub cleanup_every: u64,
    /// Run the split policy every N steps. Default: 16 500.
    pub growth_every: u64,
    /// Rebuild the approximate index every N steps. Default: 5500.
    pub index_rebuild_every: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let run = REFERENCE_RUN_LENGTH;
        Self {
            max_nodes: 6000,
            initial_nodes: 250,

            grouping_required_utilization: run / 2,
            grouping_node_learning_rate: 0.02,

            node_required_utilization: run * 101 / 100,
            node_position_learning_rate: 0.04,
            node_momentum_decay: 0.5,
            node_momentum_alpha: 0.0,
            node_grouping_learning_rate: 0.05,
            node_is_new_threshold: 25,
            node_certainty_age_factor: 25,

            split_variance_threshold: 5e-3,
            split_max_growth: (run / 1000).max(5) as usize,
            split_min_observations: 3,

            approximate_search: true,
            index_max_connections: 24,
            index_construction_effort: 200,
            index_search_effort: 128,
            index_min_observations: 1000,
            index_max_distance_momentum: 1e30,
            distance_momentum_decay: 0.5,

            correlation_learning_rate: 0.02,
            kernel: KernelShape::Coincidence,
            window_half_width: 10,
            correlation_certainty_age_factor: 25,

            cleanup_every: run / 4,
            growth_every: run * 3 / 10,
            index_rebuild_every: run / 10,
        }
    }
}

impl EngineConfig {
    /// Number of events retained by the correlation window: `W + 1`.
    pub fn window_capacity(&self) -> usize {
        self.window_half_width as usize + 1
    }

    /// Check the cross-parameter constraints.
    pub fn validate(&self) -> Result<()> {
        fn reject(detail: &str) -> Result<()> {
            Err(EngineError::InvalidConfig { detail: detail.to_string() })
        }

        if self.max_nodes == 0 {
            return reject("max_nodes must be at least 1");
        }
        if self.initial_nodes > self.max_nodes {
            return reject("initial_nodes must not exceed max_nodes");
        }
        if self.node_required_utilization <= self.grouping_required_utilization {
            return reject("node_required_utilization must exceed grouping_required_utilization");
        }
        if self.window_half_width == 0 {
            return reject("window_half_width must be at least 1");
        }
        if self.window_half_width > MAX_WINDOW_HALF_WIDTH {
            return reject("window_half_width must not exceed 65535");
        }
        if let KernelShape::Bell { std } = self.kernel {
            if !(std > 0.0) {
                return reject("bell kernel std must be positive");
            }
        }
        let rates = [
            self.grouping_node_learning_rate,
            self.node_position_learning_rate,
            self.node_grouping_learning_rate,
            self.correlation_learning_rate,
        ];
        if rates.iter().any(|r| !(*r >= 0.0)) {
            return reject("learning rates must be non-negative");
        }
        if self.node_certainty_age_factor == 0 || self.correlation_certainty_age_factor == 0 {
            return reject("certainty age factors must be at least 1");
        }
        if self.cleanup_every != 0
            && self.growth_every != 0
            && self.cleanup_every > self.growth_every
        {
            return reject("cleanup_every must not exceed growth_every");
        }
        if self.index_max_connections == 0 || self.index_search_effort == 0 {
            return reject("index connection and search effort must be positive");
        }
        Ok(())
    }
}
