//! Search engine: fuses keyword (FTS5), vector (HNSW), and entity-graph
//! signals into one ranked, explainable result set.
//!
//! - `fts` — FTS5 query sanitization for the keyword signal
//! - `vector` — HNSW nearest-neighbor index for the semantic signal
//!   (feature-gated; the engine degrades to FTS-only without it)
//! - `graph` — breadth-first entity-hop signal
//! - `hybrid` — Reciprocal Rank Fusion across however many signals fired
//! - `reranker` — optional cross-encoder second pass over the fused set
//! - `explain` — per-result attribution carried alongside every score

mod engine;
pub mod explain;
pub mod fts;
pub mod graph;
mod hybrid;
mod reranker;
#[cfg(feature = "vector-search")]
mod vector;

pub use engine::{search, RankedResult, SearchContext};
pub use explain::{ExplainRecord, MatchSignal};
pub use fts::sanitize_fts5_query;
pub use graph::{hop_results_to_ranked, hop_search, EntityGraph, DEFAULT_MAX_HOPS};
pub use hybrid::{reciprocal_rank_fusion, FusedResult, RankedList, TieBreakInfo, DEFAULT_RRF_K};
pub use reranker::{
    Reranker, RerankedResult, RerankerConfig, RerankerError, DEFAULT_RERANK_COUNT, DEFAULT_RETRIEVAL_COUNT,
};

#[cfg(feature = "vector-search")]
pub use vector::{
    VectorIndex, VectorIndexConfig, VectorIndexStats, VectorSearchError, DEFAULT_CONNECTIVITY, DEFAULT_DIMENSIONS,
};
