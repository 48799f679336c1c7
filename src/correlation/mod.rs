//! Cross-stream temporal correlation.
//!
//! This module provides the shared [`CorrelationEngine`], the per-grouping
//! [`ClusterCorrelation`] records it owns, and the [`TemporalKernel`] that
//! weights updates by time gap. Feedback leaves the engine through a
//! [`FeedbackRouter`] supplied by the caller.

pub mod engine;
pub mod kernel;
pub mod record;

pub use engine::{CorrelationEngine, FeedbackRouter};
pub use kernel::TemporalKernel;
pub use record::ClusterCorrelation;
