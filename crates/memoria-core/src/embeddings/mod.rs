//! The `embed(text) -> vector` capability (spec.md §1). Like the
//! compressor and reranker capabilities, this is fallible and optionally
//! disabled — the engine degrades to FTS-only search when it's absent.

mod local;

pub use local::{
    cosine_similarity, dot_product, euclidean_distance, matryoshka_truncate, Embedder,
    EmbeddingService, BATCH_SIZE, EMBEDDING_DIMENSIONS, MAX_TEXT_LENGTH,
};
