//! Weighted many-to-many relation tables.
//!
//! A [`RelationTable`] maps each item to its [`Relations`]: an ordered map from
//! related item to [`Edge`]. Each edge carries a weight, an observation count,
//! and optionally the running mean of the vectors observed on that edge.
//!
//! The table knows nothing about nodes, groupings or correlation. It enforces
//! three local rules:
//!
//! - outgoing weights of a non-empty item are re-normalized to sum to 1 after
//!   every mutation;
//! - an item is related to another at most once;
//! - normalizing a set whose total is zero or negative is an error, never a
//!   silent no-op.
//!
//! Mirror consistency between two tables is the
//! [`RelationshipStore`](crate::store::RelationshipStore)'s job.

use std::collections::BTreeMap;

use hashbrown::HashMap;

use crate::error::{EngineError, Result};
use crate::ids::EntityId;

/// Allowed distance of a normalized weight sum from 1.0.
pub const NORMALIZATION_TOLERANCE: f32 = 0.01;

// ─── Edge ────────────────────────────────────────────────────────────────────

/// One weighted association.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Edge {
    /// Normalized weight within the owning item's relations.
    pub weight: f32,
    /// Running mean of the vectors observed on this edge, if any were recorded.
    pub position: Option<Vec<f32>>,
    /// Number of times this edge was created or reinforced.
    pub observations: u32,
}

impl Edge {
    fn new(weight: f32, position: Option<Vec<f32>>) -> Self {
        Self { weight, position, observations: 1 }
    }

    /// Reinforce the edge and fold `position` into the running mean.
    ///
    /// ```text
    /// pos ← pos + (new − pos) / observations
    /// ```
    ///
    /// An edge with no stored position adopts `position` directly.
    fn reinforce(&mut self, amount: f32, position: Option<Vec<f32>>) {
        self.weight += amount;
        self.observations = self.observations.saturating_add(1);
        let Some(new) = position else { return };
        if let Some(pos) = self.position.as_mut() {
            let n = self.observations as f32;
            for (p, x) in pos.iter_mut().zip(new.iter()) {
                *p += (x - *p) / n;
            }
        } else {
            self.position = Some(new);
        }
    }
}

// ─── Relations ───────────────────────────────────────────────────────────────

/// All outgoing edges of one item, keyed by related item.
#[derive(Clone, Debug, PartialEq)]
pub struct Relations<R: EntityId> {
    edges: BTreeMap<R, Edge>,
}

impl<R: EntityId> Default for Relations<R> {
    fn default() -> Self {
        Self { edges: BTreeMap::new() }
    }
}

impl<R: EntityId> Relations<R> {
    /// Number of related items.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// True when the item has no edges.
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Edge to `related`, if present.
    pub fn get(&self, related: &R) -> Option<&Edge> {
        self.edges.get(related)
    }

    /// True when an edge to `related` exists.
    pub fn contains(&self, related: &R) -> bool {
        self.edges.contains_key(related)
    }

    /// Iterate edges in related-item order.
    pub fn iter(&self) -> impl Iterator<Item = (&R, &Edge)> {
        self.edges.iter()
    }

    /// Related items in order.
    pub fn keys(&self) -> impl Iterator<Item = &R> {
        self.edges.keys()
    }

    /// Sum of the outgoing weights.
    pub fn weight_sum(&self) -> f32 {
        self.edges.values().map(|e| e.weight).sum()
    }

    /// The related item with maximal weight. Ties resolve to the lowest id.
    pub fn strongest(&self) -> Option<(R, f32)> {
        let mut best: Option<(R, f32)> = None;
        for (id, edge) in &self.edges {
            match best {
                Some((_, w)) if edge.weight <= w => {}
                _ => best = Some((*id, edge.weight)),
            }
        }
        best
    }

    /// Largest outgoing weight, or 0.0 when empty.
    pub fn max_weight(&self) -> f32 {
        self.strongest().map_or(0.0, |(_, w)| w)
    }

    fn normalize(&mut self, owner: &impl core::fmt::Display) -> Result<()> {
        let total = self.weight_sum();
        if !(total > 0.0) {
            return Err(EngineError::DegenerateNormalization {
                item: owner.to_string(),
                total,
            });
        }
        for edge in self.edges.values_mut() {
            edge.weight /= total;
        }
        Ok(())
    }
}

// ─── RelationTable ───────────────────────────────────────────────────────────

/// Item → relations table.
#[derive(Clone, Debug)]
pub struct RelationTable<K: EntityId, R: EntityId> {
    name: &'static str,
    rows: HashMap<K, Relations<R>>,
}

impl<K: EntityId, R: EntityId> RelationTable<K, R> {
    /// Create an empty table. `name` appears in error messages.
    pub fn new(name: &'static str) -> Self {
        Self { name, rows: HashMap::new() }
    }

    /// Table name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of items with a row (including items with zero edges).
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Relations of `item`.
    pub fn get(&self, item: &K) -> Option<&Relations<R>> {
        self.rows.get(item)
    }

    /// Iterate all rows.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &Relations<R>)> {
        self.rows.iter()
    }

    /// True when `item` has an edge to `related`.
    pub fn is_related(&self, item: &K, related: &R) -> bool {
        self.rows.get(item).map_or(false, |r| r.contains(related))
    }

    /// Create an empty row for `item`.
    pub fn insert_item(&mut self, item: K) -> Result<()> {
        if self.rows.contains_key(&item) {
            return Err(EngineError::DuplicateEntity {
                entity: format!("{} in {}", item, self.name),
            });
        }
        self.rows.insert(item, Relations::default());
        Ok(())
    }

    /// Drop the row for `item` and return its relations.
    pub fn remove_item(&mut self, item: &K) -> Result<Relations<R>> {
        self.rows
            .remove(item)
            .ok_or_else(|| EngineError::not_found(format_args!("{} in {}", item, self.name)))
    }

    /// Relate `item` to `related` with the given initial weight, then normalize.
    ///
    /// Creates the row if `item` has none. Fails with
    /// [`EngineError::DuplicateRelation`] if the edge already exists, leaving
    /// the table unchanged.
    pub fn add_related(
        &mut self,
        item: K,
        related: R,
        weight: f32,
        position: Option<Vec<f32>>,
    ) -> Result<()> {
        let row = self.rows.entry(item).or_default();
        if row.contains(&related) {
            return Err(EngineError::DuplicateRelation {
                table: self.name,
                item: item.to_string(),
                related: related.to_string(),
            });
        }
        row.edges.insert(related, Edge::new(weight, position));
        if let Err(e) = row.normalize(&item) {
            row.edges.remove(&related);
            return Err(e);
        }
        Ok(())
    }

    /// Remove the edge `item → related`, then normalize what remains.
    ///
    /// An item left with zero edges keeps its (empty) row.
    pub fn remove_related(&mut self, item: &K, related: &R) -> Result<Edge> {
        let name = self.name;
        let row = self
            .rows
            .get_mut(item)
            .ok_or_else(|| EngineError::not_found(format_args!("{} in {}", item, name)))?;
        let edge = row.edges.remove(related).ok_or_else(|| {
            EngineError::not_found(format_args!("relation {} -> {} in {}", item, related, name))
        })?;
        if !row.is_empty() {
            row.normalize(item)?;
        }
        Ok(edge)
    }

    /// Add `amount` to an existing edge, count the observation, fold in
    /// `position`, then normalize.
    pub fn increase(
        &mut self,
        item: &K,
        related: &R,
        amount: f32,
        position: Option<Vec<f32>>,
    ) -> Result<()> {
        let name = self.name;
        let row = self.rows.get_mut(item).ok_or_else(|| {
            EngineError::not_found(format_args!("relation {} -> {} in {}", item, related, name))
        })?;
        let edge = row.edges.get_mut(related).ok_or_else(|| {
            EngineError::not_found(format_args!("relation {} -> {} in {}", item, related, name))
        })?;
        edge.reinforce(amount, position);
        row.normalize(item)
    }

    /// Check the normalization rule on every row.
    pub fn verify(&self) -> Result<()> {
        for (item, row) in &self.rows {
            if row.is_empty() {
                continue;
            }
            let sum = row.weight_sum();
            if (sum - 1.0).abs() > NORMALIZATION_TOLERANCE {
                return Err(EngineError::invariant(format!(
                    "{}: weights of {} sum to {}",
                    self.name, item, sum
                )));
            }
        }
        Ok(())
    }

    /// Install a row verbatim, without normalization. Used when restoring a
    /// snapshot, which is verified as a whole afterwards.
    #[cfg(feature = "serde")]
    pub(crate) fn insert_edge_raw(&mut self, item: K, related: R, edge: Edge) {
        self.rows.entry(item).or_default().edges.insert(related, edge);
    }
}
