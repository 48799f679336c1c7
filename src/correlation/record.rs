//! Per-grouping correlation record.
//!
//! A [`ClusterCorrelation`] holds the normalized weights from one grouping to
//! the groupings of other streams that fired together with it, plus the set of
//! groupings whose records point back at this one. Targets and back-references
//! are identifiers; the [`CorrelationEngine`](super::CorrelationEngine) keeps the
//! two sides in step.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::ids::GroupingId;

/// Correlation weights of one grouping.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterCorrelation {
    grouping: GroupingId,
    age: u32,
    weights: BTreeMap<GroupingId, f32>,
    referenced_by: BTreeSet<GroupingId>,
}

impl ClusterCorrelation {
    /// Create an empty record with age 1.
    pub fn new(grouping: GroupingId) -> Self {
        Self {
            grouping,
            age: 1,
            weights: BTreeMap::new(),
            referenced_by: BTreeSet::new(),
        }
    }

    /// Owning grouping.
    pub fn grouping(&self) -> GroupingId {
        self.grouping
    }

    /// Number of updates plus one.
    pub fn age(&self) -> u32 {
        self.age
    }

    /// True when the record has no targets.
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Number of targets.
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    /// Weight toward `target`, if correlated.
    pub fn weight(&self, target: GroupingId) -> Option<f32> {
        self.weights.get(&target).copied()
    }

    /// Targets and weights in id order.
    pub fn weights(&self) -> impl Iterator<Item = (GroupingId, f32)> + '_ {
        self.weights.iter().map(|(g, w)| (*g, *w))
    }

    /// Groupings whose records hold a weight toward this one.
    pub fn referenced_by(&self) -> impl Iterator<Item = GroupingId> + '_ {
        self.referenced_by.iter().copied()
    }

    /// Add `amount` toward `target`, re-normalize and age the record.
    pub(crate) fn update(&mut self, target: GroupingId, amount: f32) -> Result<()> {
        *self.weights.entry(target).or_insert(0.0) += amount;
        let total: f32 = self.weights.values().sum();
        if !(total > 0.0) {
            return Err(EngineError::DegenerateNormalization {
                item: self.grouping.to_string(),
                total,
            });
        }
        for w in self.weights.values_mut() {
            *w /= total;
        }
        self.age = self.age.saturating_add(1);
        Ok(())
    }

    /// Target with the largest weight. Ties resolve to the lowest id.
    ///
    /// Callers check [`is_empty`](Self::is_empty) first; an empty record is a
    /// precondition violation.
    pub fn strongest_correlation(&self) -> Result<(GroupingId, f32)> {
        let mut best: Option<(GroupingId, f32)> = None;
        for (g, w) in &self.weights {
            match best {
                Some((_, b)) if *w <= b => {}
                _ => best = Some((*g, *w)),
            }
        }
        best.ok_or_else(|| EngineError::EmptyCorrelation { grouping: self.grouping.to_string() })
    }

    /// `1 − peak² · min(age / ageFactor, 1)`, clamped to [0, 1].
    ///
    /// Same shape as [`PrototypeNode::uncertainty`](crate::node::PrototypeNode::uncertainty),
    /// with the record's age in place of the feedback count.
    pub fn uncertainty(&self, config: &EngineConfig) -> Result<f32> {
        let (_, peak) = self.strongest_correlation()?;
        let scale = (self.age as f32 / config.correlation_certainty_age_factor as f32).min(1.0);
        Ok((1.0 - peak * peak * scale).clamp(0.0, 1.0))
    }

    /// `1 − uncertainty`.
    pub fn certainty(&self, config: &EngineConfig) -> Result<f32> {
        Ok(1.0 - self.uncertainty(config)?)
    }

    /// Drop the weight toward `target` and re-normalize what remains.
    /// Returns false when there was none.
    pub(crate) fn remove_target(&mut self, target: GroupingId) -> bool {
        if self.weights.remove(&target).is_none() {
            return false;
        }
        let total: f32 = self.weights.values().sum();
        if total > 0.0 {
            for w in self.weights.values_mut() {
                *w /= total;
            }
        }
        true
    }

    pub(crate) fn add_ref(&mut self, source: GroupingId) {
        self.referenced_by.insert(source);
    }

    pub(crate) fn remove_ref(&mut self, source: GroupingId) -> bool {
        self.referenced_by.remove(&source)
    }

    pub(crate) fn is_referenced_by(&self, source: GroupingId) -> bool {
        self.referenced_by.contains(&source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::StreamId;

    fn g(stream: u16, serial: u64) -> GroupingId {
        GroupingId::new(StreamId(stream), serial)
    }

    #[test]
    fn test_update_normalizes_and_ages() {
        let mut r = ClusterCorrelation::new(g(0, 0));
        r.update(g(1, 0), 0.02).unwrap();
        assert_eq!(r.weight(g(1, 0)), Some(1.0));
        r.update(g(1, 1), 2.0).unwrap();
        let sum: f32 = r.weights().map(|(_, w)| w).sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert_eq!(r.age(), 3);
        assert_eq!(r.strongest_correlation().unwrap().0, g(1, 1));
    }

    #[test]
    fn test_empty_record_has_no_strongest() {
        let r = ClusterCorrelation::new(g(0, 0));
        assert!(matches!(r.strongest_correlation(), Err(EngineError::EmptyCorrelation { .. })));
        assert!(r.certainty(&EngineConfig::default()).is_err());
    }

    #[test]
    fn test_certainty_grows_with_age() {
        let config = EngineConfig::default();
        let mut r = ClusterCorrelation::new(g(0, 0));
        r.update(g(1, 0), 0.5).unwrap();
        let young = r.certainty(&config).unwrap();
        for _ in 0..30 {
            r.update(g(1, 0), 0.5).unwrap();
        }
        let old = r.certainty(&config).unwrap();
        assert!(old > young);
        assert!((old - 1.0).abs() < 1e-6, "single target at full age is certain");
    }

    #[test]
    fn test_remove_target_renormalizes() {
        let mut r = ClusterCorrelation::new(g(0, 0));
        r.update(g(1, 0), 1.0).unwrap();
        r.update(g(1, 1), 1.0).unwrap();
        assert!(r.remove_target(g(1, 1)));
        assert_eq!(r.weight(g(1, 0)), Some(1.0));
        assert!(!r.remove_target(g(1, 1)));
        assert!(r.remove_target(g(1, 0)));
        assert!(r.is_empty());
    }
}
