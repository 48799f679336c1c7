//! Prototype nodes: moving points approximating local clusters of encodings.
//!
//! A node is a single-prototype online vector quantizer in the style of a
//! growing neural gas unit. Each time it is the nearest match for an encoding
//! it steps toward that encoding, smoothed by a momentum term:
//!
//! ```text
//! e         = position − target
//! position += lr · (−e + α · momentum)
//! momentum  = decay · momentum + lr · (−e)
//! ```
//!
//! A node's associations with groupings live in the
//! [`RelationshipStore`]; the node itself only holds positional and
//! utilization state. Confidence measures read those associations through the
//! store's query methods.

use crate::config::EngineConfig;
use crate::encoding::euclidean_distance;
use crate::ids::{GroupingId, NodeId, StreamId};
use crate::store::RelationshipStore;

/// A point in feature space with online-learning state.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PrototypeNode {
    /// Identity.
    pub id: NodeId,
    /// Timestep of creation.
    pub created_at: u64,
    /// Current position.
    pub position: Vec<f32>,
    /// Position momentum, same dimension as `position`.
    pub momentum: Vec<f32>,
    /// Feedback packets received. Also the number of times the node's
    /// association was reinforced from another stream.
    pub feedback_count: u32,
    /// Timestep of the last positional update, if any.
    pub last_utilized: Option<u64>,
    /// The last encoding this node was matched against.
    pub last_encoding: Option<Vec<f32>>,
}

impl PrototypeNode {
    /// Create a node at `position` with zero momentum.
    pub fn new(id: NodeId, position: Vec<f32>, now: u64) -> Self {
        let momentum = vec![0.0; position.len()];
        Self {
            id,
            created_at: now,
            position,
            momentum,
            feedback_count: 0,
            last_utilized: None,
            last_encoding: None,
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

    /// Euclidean distance from this node to `target`.
    pub fn distance(&self, target: &[f32]) -> f32 {
        euclidean_distance(&self.position, target)
    }

    /// Move toward `target` with the momentum-smoothed step and mark the node used.
    pub fn learn(&mut self, target: &[f32], now: u64, config: &EngineConfig) {
        let lr = config.node_position_learning_rate;
        let alpha = config.node_momentum_alpha;
        let decay = config.node_momentum_decay;
        for ((p, m), t) in self
            .position
            .iter_mut()
            .zip(self.momentum.iter_mut())
            .zip(target.iter())
        {
            let direction = t - *p;
            *p += lr * (direction + alpha * *m);
            *m = decay * *m + lr * direction;
        }
        self.last_utilized = Some(now);
    }

    /// Count one feedback packet.
    pub fn record_feedback(&mut self) {
        self.feedback_count = self.feedback_count.saturating_add(1);
    }

    /// True when idle for at least `node_required_utilization` timesteps.
    pub fn is_underutilized(&self, now: u64, config: &EngineConfig) -> bool {
        let last_use = self.created_at.max(self.last_utilized.unwrap_or(0));
        now.saturating_sub(last_use) >= config.node_required_utilization
    }

    /// True until the node has both learned once and received more than
    /// `node_is_new_threshold` feedback packets.
    pub fn is_new(&self, config: &EngineConfig) -> bool {
        self.last_utilized.is_none() || self.feedback_count <= config.node_is_new_threshold
    }

    /// Uncertainty of this node's association with its strongest grouping, in [0, 1].
    ///
    /// ```text
    /// 1 − maxWeight² · min(feedback / ageFactor, 1)
    /// ```
    ///
    /// Keep in step with
    /// [`ClusterCorrelation::uncertainty`](crate::correlation::ClusterCorrelation::uncertainty).
    pub fn uncertainty(&self, store: &RelationshipStore, config: &EngineConfig) -> f32 {
        let peak = store.groupings_of(self.id).map_or(0.0, |r| r.max_weight());
        let scale = (self.feedback_count as f32 / config.node_certainty_age_factor as f32).min(1.0);
        (1.0 - peak * peak * scale).clamp(0.0, 1.0)
    }

    /// `1 − uncertainty`.
    pub fn certainty(&self, store: &RelationshipStore, config: &EngineConfig) -> f32 {
        1.0 - self.uncertainty(store, config)
    }

    /// Peakedness of the grouping distribution: `1 − maxWeight`.
    ///
    /// Low variance means the node is cleanly associated with one grouping.
    pub fn correlation_variance(&self, store: &RelationshipStore) -> f32 {
        1.0 - store.groupings_of(self.id).map_or(0.0, |r| r.max_weight())
    }

    /// Grouping this node is most strongly associated with.
    pub fn strongest_grouping(&self, store: &RelationshipStore) -> Option<GroupingId> {
        store.groupings_of(self.id).and_then(|r| r.strongest()).map(|(id, _)| id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_at(position: Vec<f32>, now: u64) -> PrototypeNode {
        PrototypeNode::new(NodeId::new(StreamId(0), 0), position, now)
    }

    #[test]
    fn test_learn_steps_toward_target() {
        let config = EngineConfig::default();
        let mut node = node_at(vec![0.0, 0.0], 0);
        node.learn(&[1.0, -2.0], 5, &config);
        assert!((node.position[0] - 0.04).abs() < 1e-6);
        assert!((node.position[1] + 0.08).abs() < 1e-6);
        assert!((node.momentum[0] - 0.04).abs() < 1e-6);
        assert_eq!(node.last_utilized, Some(5));
    }

    #[test]
    fn test_momentum_alpha_carries_previous_step() {
        let config = EngineConfig { node_momentum_alpha: 1.0, ..EngineConfig::default() };
        let mut node = node_at(vec![0.0], 0);
        node.learn(&[1.0], 1, &config);
        // Step 1: position 0.04, momentum 0.04.
        node.learn(&[1.0], 2, &config);
        // Step 2: position += 0.04 · (0.96 + 0.04)
        assert!((node.position[0] - 0.08).abs() < 1e-6, "pos={}", node.position[0]);
        assert!((node.momentum[0] - (0.5 * 0.04 + 0.04 * 0.96)).abs() < 1e-6);
    }

    #[test]
    fn test_is_new_until_learned_and_fed_back() {
        let config = EngineConfig::default();
        let mut node = node_at(vec![0.0], 0);
        assert!(node.is_new(&config));

        node.learn(&[0.5], 1, &config);
        assert!(node.is_new(&config), "no feedback yet");

        for _ in 0..=config.node_is_new_threshold {
            node.record_feedback();
        }
        assert_eq!(node.feedback_count, config.node_is_new_threshold + 1);
        assert!(!node.is_new(&config));
    }

    #[test]
    fn test_feedback_alone_does_not_make_node_old() {
        let config = EngineConfig::default();
        let mut node = node_at(vec![0.0], 0);
        for _ in 0..100 {
            node.record_feedback();
        }
        assert!(node.is_new(&config), "never learned");
    }

    #[test]
    fn test_underutilized_exactly_at_threshold() {
        let config = EngineConfig::default();
        let created = 10;
        let node = node_at(vec![0.0], created);
        let threshold = config.node_required_utilization;
        assert!(!node.is_underutilized(created + threshold - 1, &config));
        assert!(node.is_underutilized(created + threshold, &config));
    }

    #[test]
    fn test_learning_resets_idle_clock() {
        let config = EngineConfig::default();
        let mut node = node_at(vec![0.0], 0);
        let threshold = config.node_required_utilization;
        node.learn(&[1.0], threshold - 1, &config);
        assert!(!node.is_underutilized(threshold, &config));
        assert!(node.is_underutilized(2 * threshold - 1, &config));
    }
}
