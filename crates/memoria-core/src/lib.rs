//! # Memoria Core
//!
//! Per-project persistent memory engine for coding agents. A long-running
//! coding session produces a stream of tool calls and chat turns; this
//! crate durably ingests that stream as structured observations, dedupes
//! and supersedes conflicting ones, and serves hybrid keyword+semantic
//! search over the result so an agent can recall what it already knows
//! about a project instead of rediscovering it every session.
//!
//! ## Pipeline
//!
//! `events` normalizes raw tool/chat events into [`model::ObservationDraft`]s,
//! `queue` durably buffers and batches them, `compressor` turns raw tool
//! output into a compact natural-language observation, `dedup` decides
//! whether a new observation supersedes an existing one or is itself
//! redundant, `lineage` tracks the supersede/tombstone chain, and `search`
//! serves ranked, explainable recall over everything still current.
//!
//! ## Feature flags
//!
//! - `embeddings` (default): local embedding generation via fastembed.
//!   Without it, `search` degrades to FTS5-only.
//! - `vector-search` (default): HNSW vector index via usearch.
//! - `bundled-sqlite` (default): statically linked SQLite.
//! - `encryption`: SQLCipher-encrypted storage instead of plain SQLite.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod compressor;
pub mod config;
pub mod context;
pub mod dedup;
pub mod error;
pub mod event_bus;
pub mod events;
pub mod lineage;
pub mod maintenance;
pub mod model;
pub mod queue;
pub mod redaction;
pub mod search;
pub mod store;
pub mod summarizer;

#[cfg(feature = "embeddings")]
#[cfg_attr(docsrs, doc(cfg(feature = "embeddings")))]
pub mod embeddings;

pub use error::{MemoriaError, Result};

pub use config::{Config, ConfigSource, ConfigValue};
pub use event_bus::{EventBus, MemoryEvent};
pub use events::{ChatRole, EventPayload, InboundEvent};
pub use model::{
    Entity, EntityType, Observation, ObservationDraft, ObservationType, PendingJob, PendingJobStatus,
    RecallState, Relation, Session, SessionStatus, SessionSummary,
};
pub use store::Store;

/// Crate version, as published.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Convenient imports for common usage.
pub mod prelude {
    pub use crate::{
        Config, Entity, EventBus, MemoriaError, MemoryEvent, Observation, ObservationDraft,
        ObservationType, PendingJob, RecallState, Result, Session, SessionStatus, SessionSummary,
        Store,
    };

    #[cfg(feature = "embeddings")]
    pub use crate::embeddings::{Embedder, EmbeddingService};

    #[cfg(feature = "vector-search")]
    pub use crate::search::VectorIndex;
}
