//! Error types for the engine.
//!
//! Every error here means a caller violated a precondition or the engine
//! caught one of its own invariants breaking. Nothing is retried.

use thiserror::Error;

/// Engine error types.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The relation already exists; the table is left unchanged.
    #[error("duplicate relation in {table}: {item} -> {related}")]
    DuplicateRelation {
        /// Table that rejected the insert.
        table: &'static str,
        /// Owning item.
        item: String,
        /// Related item that was already present.
        related: String,
    },

    /// An entity with this identity is already registered.
    #[error("duplicate entity: {entity}")]
    DuplicateEntity {
        /// Display name of the entity.
        entity: String,
    },

    /// Lookup of an entity or relation that does not exist.
    #[error("not found: {what}")]
    NotFound {
        /// What was looked up.
        what: String,
    },

    /// Normalization or mirror consistency failed. Indicates a logic bug.
    #[error("invariant violation: {detail}")]
    InvariantViolation {
        /// Human-readable description of the broken invariant.
        detail: String,
    },

    /// Attempted to normalize a weight set whose total is zero or negative.
    #[error("cannot normalize relations of {item}: total weight {total}")]
    DegenerateNormalization {
        /// Item whose relations were being normalized.
        item: String,
        /// The offending total.
        total: f32,
    },

    /// Strongest correlation requested on a grouping with no correlations.
    #[error("grouping {grouping} has no recorded correlations")]
    EmptyCorrelation {
        /// The grouping queried.
        grouping: String,
    },

    /// Vector length differs from the stream's established dimension.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Dimension pinned by the stream.
        expected: usize,
        /// Dimension supplied.
        got: usize,
    },

    /// Excitation strength outside [0, 1].
    #[error("event strength {strength} outside [0, 1]")]
    InvalidStrength {
        /// The offending strength.
        strength: f32,
    },

    /// Rejected configuration.
    #[error("invalid configuration: {detail}")]
    InvalidConfig {
        /// Which constraint failed.
        detail: String,
    },

    /// No stream registered under this identifier.
    #[error("unknown stream: {stream}")]
    UnknownStream {
        /// Display form of the stream id or name.
        stream: String,
    },

    /// The timestep may only move forward.
    #[error("timestep cannot move backwards: current {current}, requested {requested}")]
    TimeReversal {
        /// Current timestep.
        current: u64,
        /// Requested timestep.
        requested: u64,
    },

    /// Snapshot written by an incompatible format version.
    #[cfg(feature = "serde")]
    #[error("unsupported snapshot version {found} (expected {expected})")]
    SnapshotVersion {
        /// Version found in the snapshot.
        found: u16,
        /// Version this build reads.
        expected: u16,
    },
}

impl EngineError {
    pub(crate) fn not_found(what: impl core::fmt::Display) -> Self {
        Self::NotFound { what: what.to_string() }
    }

    pub(crate) fn invariant(detail: impl Into<String>) -> Self {
        Self::InvariantViolation { detail: detail.into() }
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
