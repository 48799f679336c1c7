//! The convergence-divergence zone: a sliding window of recent excitations
//! and the learned cross-stream correlations between groupings.
//!
//! Events arrive one at a time on a serial timeline. Events carrying exactly
//! the same timestep stand in for simultaneity: when a new event meets a
//! queued one from another stream at the same timestep, both directions of
//! their correlation are reinforced and each side sends feedback to the
//! grouping it is now most correlated with.
//!
//! ```text
//!   receive_packet(e)
//!     for q in window (newest first, while e.time − q.time < W):
//!       if q.time == e.time and streams differ:
//!         update_connection(q → e); update_connection(e → q)
//!         send_feedback(q);         send_feedback(e)
//!     window.push_front(e)
//! ```
//!
//! Feedback delivery needs the store and the target stream's manager, which
//! this type does not own; it goes through a [`FeedbackRouter`].
//!
//! # Invariants
//!
//! - The window is newest-first and holds at most `W + 1` events.
//! - Every non-empty record's weights sum to 1 ± 0.01.
//! - `a` holds a weight toward `b` iff `b`'s record lists `a` as a referrer.

use std::collections::VecDeque;

use hashbrown::HashMap;
use tracing::trace;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::event::CorrelationEvent;
use crate::ids::{GroupingId, NodeId};
use crate::relation::NORMALIZATION_TOLERANCE;
use crate::store::GroupingObserver;

use super::kernel::TemporalKernel;
use super::record::ClusterCorrelation;

/// Delivers feedback into the stream that owns its target grouping.
pub trait FeedbackRouter {
    /// Certainty of `node`'s association with its strongest grouping.
    /// Zero for nodes no longer present.
    fn certainty(&self, node: NodeId) -> f32;

    /// Deliver `feedback` to `feedback.grouping`.
    fn route_feedback(&mut self, feedback: CorrelationEvent) -> Result<()>;
}

/// Shared cross-stream correlation engine.
#[derive(Clone, Debug)]
pub struct CorrelationEngine {
    config: EngineConfig,
    kernel: TemporalKernel,
    capacity: usize,
    window: VecDeque<CorrelationEvent>,
    correlations: HashMap<GroupingId, ClusterCorrelation>,
}

impl CorrelationEngine {
    /// Create an engine with an empty window.
    pub fn new(config: &EngineConfig) -> Self {
        let capacity = config.window_capacity();
        Self {
            config: config.clone(),
            kernel: TemporalKernel::from_config(config),
            capacity,
            window: VecDeque::with_capacity(capacity),
            correlations: HashMap::new(),
        }
    }

    // ── Event path ────────────────────────────────────────────────────────

    /// Correlate `event` against the window, then queue it.
    ///
    /// Strength must lie in [0, 1], and `event` may not be older than the
    /// newest queued event.
    pub fn receive_packet(
        &mut self,
        event: CorrelationEvent,
        learn: bool,
        router: &mut impl FeedbackRouter,
    ) -> Result<()> {
        check_strength(event.strength)?;
        if let Some(newest) = self.window.front() {
            if event.time < newest.time {
                return Err(EngineError::TimeReversal { current: newest.time, requested: event.time });
            }
        }

        let half_width = self.kernel.half_width();
        let mut coincident = Vec::new();
        for queued in &self.window {
            if event.time - queued.time >= half_width {
                break;
            }
            if learn && queued.time == event.time && queued.stream() != event.stream() {
                coincident.push(*queued);
            }
        }

        for queued in coincident {
            self.update_connection(&queued, &event)?;
            self.update_connection(&event, &queued)?;
            self.send_feedback(&queued, router)?;
            self.send_feedback(&event, router)?;
        }

        self.window.push_front(event);
        self.window.truncate(self.capacity);
        Ok(())
    }

    /// Reinforce `old.grouping → new.grouping` by
    /// `learningRate · kernel(Δt) · new.strength · old.strength`.
    ///
    /// Creates `old`'s record if needed and registers `old` as a referrer on
    /// `new`'s record without giving it a forward weight. Returns false without
    /// touching anything when both events come from one stream, or when the
    /// kernel weight for the gap is zero.
    pub fn update_connection(
        &mut self,
        old: &CorrelationEvent,
        new: &CorrelationEvent,
    ) -> Result<bool> {
        if old.stream() == new.stream() {
            return Ok(false);
        }
        check_strength(old.strength)?;
        check_strength(new.strength)?;
        let dt = new
            .time
            .checked_sub(old.time)
            .ok_or(EngineError::TimeReversal { current: old.time, requested: new.time })?;

        let amount =
            self.config.correlation_learning_rate * self.kernel.weight(dt) * new.strength * old.strength;
        if !(amount > 0.0) {
            return Ok(false);
        }

        self.correlations
            .entry(old.grouping)
            .or_insert_with(|| ClusterCorrelation::new(old.grouping))
            .update(new.grouping, amount)?;
        self.correlations
            .entry(new.grouping)
            .or_insert_with(|| ClusterCorrelation::new(new.grouping))
            .add_ref(old.grouping);

        trace!(from = %old.grouping, to = %new.grouping, dt, amount, "correlation updated");
        Ok(true)
    }

    /// Send feedback for `event` to its grouping's most correlated target.
    ///
    /// Strength is `(1 + sourceCertainty · recordCertainty)²`. Returns false
    /// when the grouping has no correlations yet.
    pub fn send_feedback(
        &self,
        event: &CorrelationEvent,
        router: &mut impl FeedbackRouter,
    ) -> Result<bool> {
        let Some(record) = self.correlations.get(&event.grouping) else {
            return Ok(false);
        };
        if record.is_empty() {
            return Ok(false);
        }
        let (target, weight) = record.strongest_correlation()?;
        let factor = router.certainty(event.source_node) * record.certainty(&self.config)?;
        let strength = (1.0 + factor) * (1.0 + factor);

        trace!(from = %event.grouping, to = %target, weight, strength, "feedback");
        router.route_feedback(CorrelationEvent::new(target, strength, event.time, event.source_node))?;
        Ok(true)
    }

    // ── Removal ───────────────────────────────────────────────────────────

    /// Forget `grouping`: drop its record, its back-references in the records
    /// it excites, its weight in every record that excites it, and its queued
    /// events.
    pub fn remove_grouping(&mut self, grouping: GroupingId) {
        self.window.retain(|e| e.grouping != grouping);
        let Some(record) = self.correlations.remove(&grouping) else {
            return;
        };
        for (target, _) in record.weights() {
            if let Some(t) = self.correlations.get_mut(&target) {
                t.remove_ref(grouping);
            }
        }
        for source in record.referenced_by() {
            if let Some(s) = self.correlations.get_mut(&source) {
                s.remove_target(grouping);
            }
        }
        trace!(grouping = %grouping, "correlation record removed");
    }

    // ── Queries ───────────────────────────────────────────────────────────

    /// Record of `grouping`, if it has ever correlated or been correlated.
    pub fn correlation(&self, grouping: GroupingId) -> Option<&ClusterCorrelation> {
        self.correlations.get(&grouping)
    }

    /// Iterate all records (arbitrary order).
    pub fn correlations(&self) -> impl Iterator<Item = &ClusterCorrelation> {
        self.correlations.values()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.correlations.len()
    }

    /// True when no records exist.
    pub fn is_empty(&self) -> bool {
        self.correlations.is_empty()
    }

    /// Queued events, newest first.
    pub fn window(&self) -> impl Iterator<Item = &CorrelationEvent> {
        self.window.iter()
    }

    /// The temporal kernel.
    pub fn kernel(&self) -> &TemporalKernel {
        &self.kernel
    }

    /// Check record normalization and forward/back-reference symmetry.
    pub fn verify(&self) -> Result<()> {
        for (id, record) in &self.correlations {
            if !record.is_empty() {
                let sum: f32 = record.weights().map(|(_, w)| w).sum();
                if (sum - 1.0).abs() > NORMALIZATION_TOLERANCE {
                    return Err(EngineError::invariant(format!(
                        "correlations of {} sum to {}",
                        id, sum
                    )));
                }
            }
            for (target, _) in record.weights() {
                let back = self.correlations.get(&target).map_or(false, |t| t.is_referenced_by(*id));
                if !back {
                    return Err(EngineError::invariant(format!(
                        "{} -> {} has no back-reference",
                        id, target
                    )));
                }
            }
            for source in record.referenced_by() {
                let forward = self
                    .correlations
                    .get(&source)
                    .map_or(false, |s| s.weight(*id).is_some());
                if !forward {
                    return Err(EngineError::invariant(format!(
                        "{} lists {} as a referrer without a weight",
                        id, source
                    )));
                }
            }
        }
        if self.window.len() > self.capacity {
            return Err(EngineError::invariant(format!(
                "window holds {} events, capacity {}",
                self.window.len(),
                self.capacity
            )));
        }
        Ok(())
    }
}

impl GroupingObserver for CorrelationEngine {
    fn grouping_removed(&mut self, grouping: GroupingId) {
        self.remove_grouping(grouping);
    }
}

fn check_strength(strength: f32) -> Result<()> {
    if (0.0..=1.0).contains(&strength) {
        Ok(())
    } else {
        Err(EngineError::InvalidStrength { strength })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::StreamId;

    #[derive(Default)]
    struct Recorder {
        delivered: Vec<CorrelationEvent>,
    }

    impl FeedbackRouter for Recorder {
        fn certainty(&self, _node: NodeId) -> f32 {
            0.0
        }

        fn route_feedback(&mut self, feedback: CorrelationEvent) -> Result<()> {
            self.delivered.push(feedback);
            Ok(())
        }
    }

    fn event(stream: u16, serial: u64, time: u64) -> CorrelationEvent {
        let node = NodeId::new(StreamId(stream), serial);
        CorrelationEvent::new(node.paired_grouping(), 1.0, time, node)
    }

    #[test]
    fn test_window_is_bounded_newest_first() {
        let config = EngineConfig { window_half_width: 3, ..EngineConfig::default() };
        let mut cdz = CorrelationEngine::new(&config);
        let mut router = Recorder::default();
        for t in 0..10 {
            cdz.receive_packet(event(0, t, t), true, &mut router).unwrap();
        }
        let times: Vec<u64> = cdz.window().map(|e| e.time).collect();
        assert_eq!(times, vec![9, 8, 7, 6]);
    }

    #[test]
    fn test_same_stream_coincidence_is_ignored() {
        let mut cdz = CorrelationEngine::new(&EngineConfig::default());
        let mut router = Recorder::default();
        cdz.receive_packet(event(0, 0, 5), true, &mut router).unwrap();
        cdz.receive_packet(event(0, 1, 5), true, &mut router).unwrap();
        assert!(cdz.is_empty());
        assert!(router.delivered.is_empty());
    }

    #[test]
    fn test_feedback_strength_without_certainty_is_one() {
        let mut cdz = CorrelationEngine::new(&EngineConfig::default());
        let mut router = Recorder::default();
        cdz.receive_packet(event(0, 0, 5), true, &mut router).unwrap();
        cdz.receive_packet(event(1, 0, 5), true, &mut router).unwrap();
        assert_eq!(router.delivered.len(), 2);
        assert_eq!(router.delivered[0].grouping, GroupingId::new(StreamId(1), 0));
        assert_eq!(router.delivered[1].grouping, GroupingId::new(StreamId(0), 0));
        assert!(router.delivered.iter().all(|f| (f.strength - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_no_learning_no_update() {
        let mut cdz = CorrelationEngine::new(&EngineConfig::default());
        let mut router = Recorder::default();
        cdz.receive_packet(event(0, 0, 5), false, &mut router).unwrap();
        cdz.receive_packet(event(1, 0, 5), false, &mut router).unwrap();
        assert!(cdz.is_empty());
        assert_eq!(cdz.window().count(), 2);
    }

    #[test]
    fn test_invalid_strength_rejected() {
        let mut cdz = CorrelationEngine::new(&EngineConfig::default());
        let mut e = event(0, 0, 0);
        e.strength = 1.5;
        let err = cdz.receive_packet(e, true, &mut Recorder::default()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidStrength { .. }));
    }

    #[test]
    fn test_removal_purges_window() {
        let mut cdz = CorrelationEngine::new(&EngineConfig::default());
        let mut router = Recorder::default();
        let a = event(0, 0, 5);
        cdz.receive_packet(a, true, &mut router).unwrap();
        cdz.remove_grouping(a.grouping);
        cdz.receive_packet(event(1, 0, 5), true, &mut router).unwrap();
        assert!(cdz.is_empty());
        assert!(router.delivered.is_empty());
    }
}
