//! # cdz-core
//!
//! Convergence-divergence zone: an online associative memory that clusters
//! streams of vector encodings into prototype nodes and learns which clusters
//! of one stream fire together with which clusters of another.
//!
//! ---
//!
//! ## Three parts, one store
//!
//! **Prototype nodes**: each stream keeps a bounded population of moving
//! points. The node nearest an incoming encoding steps toward it (online
//! vector quantization) and its strongest grouping fires.
//!
//! **Groupings**: labels over nodes. Born 1:1 with a node, a grouping gathers
//! more nodes as other streams agree that those nodes mean the same thing.
//!
//! **Correlation engine**: a short window of recent excitations. Groupings of
//! different streams that fire on the same timestep reinforce each other, and
//! each sends feedback that pulls the other stream's active node toward the
//! grouping it is most correlated with.
//!
//! All nodes, groupings and the weighted edges between them live in one
//! [`RelationshipStore`], addressed by stable ids. Edge weights of every item
//! stay normalized and the two edge tables mirror each other at all times.
//!
//! ---
//!
//! ## The pipeline
//!
//! ```text
//! Encoder → ClusterManager → PrototypeNode → Grouping → CorrelationEngine
//!   (vector)   (nearest)        (learn)       (excite)        │
//!                  ↑                                          │ feedback
//!                  └──────────── last-fired node ←────────────┘
//! ```
//!
//! ## Module overview
//!
//! | Module | Key types | What it does |
//! |--------|-----------|--------------|
//! | [`ids`] | [`StreamId`], [`NodeId`], [`GroupingId`] | Stable stream-scoped identities |
//! | [`config`] | [`EngineConfig`], [`KernelShape`] | Tuning, defaults, validation |
//! | [`encoding`] | [`Encoder`], [`IdentityEncoder`] | Seam for whatever produces vectors |
//! | [`relation`] | [`RelationTable`], [`Edge`] | Normalized weighted edge tables |
//! | [`store`] | [`RelationshipStore`] | Entity arenas plus mirrored edges |
//! | [`node`] | [`PrototypeNode`] | Momentum-smoothed prototype |
//! | [`grouping`] | [`Grouping`] | Excitation and utilization state |
//! | [`manager`] | [`ClusterManager`] | Bootstrap, nearest search, split, cleanup |
//! | [`index`] | `NearestIndex` | HNSW nearest-node index (`ann` feature) |
//! | [`correlation`] | [`CorrelationEngine`], [`ClusterCorrelation`] | Cross-stream temporal correlation |
//! | [`engine`] | [`Engine`] | Timestep owner and single ordering authority |
//! | `snapshot` | `StoreSnapshot` | Serializable store snapshot (`serde` feature) |
//!
//! ## Quick start
//!
//! ```rust
//! use cdz_core::{Engine, EngineConfig};
//!
//! let config = EngineConfig { initial_nodes: 2, ..EngineConfig::default() };
//! let mut engine = Engine::new(config)?;
//! let vision = engine.add_stream("vision")?;
//! let audio = engine.add_stream("audio")?;
//!
//! engine.receive_sensory_input(vision, &[0.1, 0.9], true)?;
//! engine.receive_sensory_input(audio, &[0.7, 0.2, 0.4], true)?;
//! engine.advance()?;
//!
//! engine.verify_integrity()?;
//! # Ok::<(), cdz_core::EngineError>(())
//! ```
//!
//! ## Features
//!
//! - `ann` (default): approximate nearest-node search through `hnsw_rs`.
//! - `serde`: serialization of config and entities, plus `snapshot`.
//!
//! ## License
//!
//! Business Source License 1.1. Free for evaluation and non-production use.
//! Change date: 23 February 2032, then Apache License 2.0.
//! Commercial production use requires a license from Flout Labs (cbyrne@floutlabs.com).

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod correlation;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod event;
pub mod grouping;
pub mod ids;
pub mod manager;
pub mod node;
pub mod relation;
pub mod store;

#[cfg(feature = "ann")]
pub mod index;
#[cfg(feature = "serde")]
pub mod snapshot;

pub use config::{EngineConfig, KernelShape};
pub use correlation::{ClusterCorrelation, CorrelationEngine, FeedbackRouter, TemporalKernel};
pub use encoding::{Encoder, IdentityEncoder};
pub use engine::{Engine, MaintenanceReport};
pub use error::{EngineError, Result};
pub use event::CorrelationEvent;
pub use grouping::Grouping;
pub use ids::{GroupingId, NodeId, StreamId};
pub use manager::{CleanupReport, ClusterManager, Excitation, SplitReport};
pub use node::PrototypeNode;
pub use relation::{Edge, RelationTable, Relations};
pub use store::{GroupingObserver, RelationshipStore, SweepReport};

#[cfg(feature = "ann")]
pub use index::NearestIndex;
#[cfg(feature = "serde")]
pub use snapshot::{StoreSnapshot, STORE_SNAPSHOT_VERSION};
