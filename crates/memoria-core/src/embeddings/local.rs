//! Local embedding generation via fastembed (ONNX-based, no network calls).
//!
//! Model: Nomic Embed Text v1.5, 768 dimensions natively, Matryoshka
//! Representation Learning truncated to [`EMBEDDING_DIMENSIONS`] here for
//! 3x storage savings at roughly 2% quality loss on MTEB.

use crate::error::{MemoriaError, Result};

#[cfg(feature = "embeddings")]
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
#[cfg(feature = "embeddings")]
use std::sync::{Mutex, OnceLock};

/// Embedding dimensions after Matryoshka truncation.
pub const EMBEDDING_DIMENSIONS: usize = 256;

/// Text longer than this is truncated before being handed to the model.
pub const MAX_TEXT_LENGTH: usize = 8192;

/// Batch size for efficient embedding generation.
pub const BATCH_SIZE: usize = 32;

/// The `embed(text) -> vector` capability, kept as a trait so the store
/// and search engine never depend on fastembed directly — only on this
/// interface, which a test double can implement trivially.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
    fn dimensions(&self) -> usize;
    fn is_ready(&self) -> bool;
}

#[cfg(feature = "embeddings")]
static EMBEDDING_MODEL_RESULT: OnceLock<std::result::Result<Mutex<TextEmbedding>, String>> = OnceLock::new();

#[cfg(feature = "embeddings")]
fn get_cache_dir() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("FASTEMBED_CACHE_PATH") {
        return std::path::PathBuf::from(path);
    }
    if let Some(proj_dirs) = directories::ProjectDirs::from("dev", "memoria", "core") {
        return proj_dirs.cache_dir().join("fastembed");
    }
    if let Some(base_dirs) = directories::BaseDirs::new() {
        return base_dirs.home_dir().join(".cache/memoria/fastembed");
    }
    std::path::PathBuf::from(".fastembed_cache")
}

#[cfg(feature = "embeddings")]
fn get_model() -> Result<std::sync::MutexGuard<'static, TextEmbedding>> {
    let result = EMBEDDING_MODEL_RESULT.get_or_init(|| {
        let cache_dir = get_cache_dir();
        if let Err(e) = std::fs::create_dir_all(&cache_dir) {
            tracing::warn!(error = %e, path = %cache_dir.display(), "failed to create embedding cache dir");
        }
        let options = InitOptions::new(EmbeddingModel::NomicEmbedTextV15)
            .with_show_download_progress(true)
            .with_cache_dir(cache_dir);
        TextEmbedding::try_new(options).map(Mutex::new).map_err(|e| {
            format!("failed to initialize nomic-embed-text-v1.5: {e}")
        })
    });

    match result {
        Ok(model) => model.lock().map_err(|e| MemoriaError::Config(format!("embedding model lock poisoned: {e}"))),
        Err(err) => Err(MemoriaError::Config(err.clone())),
    }
}

/// Default embedder backed by fastembed. Behind the `embeddings` feature
/// flag; with it disabled every method reports not-ready, and the engine
/// degrades to FTS-only per spec.md §1.
pub struct EmbeddingService {
    _unused: (),
}

impl Default for EmbeddingService {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingService {
    pub fn new() -> Self {
        Self { _unused: () }
    }

    pub fn model_name(&self) -> &'static str {
        "nomic-ai/nomic-embed-text-v1.5"
    }
}

#[cfg(feature = "embeddings")]
impl Embedder for EmbeddingService {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(MemoriaError::Validation("text cannot be empty".into()));
        }
        let mut model = get_model()?;
        let text = if text.len() > MAX_TEXT_LENGTH { &text[..MAX_TEXT_LENGTH] } else { text };
        let embeddings = model
            .embed(vec![text], None)
            .map_err(|e| MemoriaError::Transient(format!("embedding generation failed: {e}")))?;
        let vector = embeddings.into_iter().next().ok_or_else(|| {
            MemoriaError::CorruptOutput("embedding model returned no vectors".into())
        })?;
        Ok(matryoshka_truncate(vector))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut model = get_model()?;
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(BATCH_SIZE) {
            let truncated: Vec<&str> =
                chunk.iter().map(|t| if t.len() > MAX_TEXT_LENGTH { &t[..MAX_TEXT_LENGTH] } else { *t }).collect();
            let embeddings = model
                .embed(truncated, None)
                .map_err(|e| MemoriaError::Transient(format!("embedding generation failed: {e}")))?;
            out.extend(embeddings.into_iter().map(matryoshka_truncate));
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }

    fn is_ready(&self) -> bool {
        get_model().is_ok()
    }
}

#[cfg(not(feature = "embeddings"))]
impl Embedder for EmbeddingService {
    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(MemoriaError::Config("embeddings feature is not compiled in".into()))
    }

    fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }

    fn is_ready(&self) -> bool {
        false
    }
}

/// Matryoshka truncation: keep the first [`EMBEDDING_DIMENSIONS`] of the
/// model's native output and re-normalize to unit length. Nomic Embed
/// v1.5's Matryoshka training means the leading dimensions already form a
/// valid lower-dimensional embedding on their own.
#[inline]
pub fn matryoshka_truncate(mut vector: Vec<f32>) -> Vec<f32> {
    if vector.len() > EMBEDDING_DIMENSIONS {
        vector.truncate(EMBEDDING_DIMENSIONS);
    }
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}

#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0_f32, 0.0_f32, 0.0_f32);
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = (norm_a * norm_b).sqrt();
    if denom > 0.0 { dot / denom } else { 0.0 }
}

#[inline]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::MAX;
    }
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum::<f32>().sqrt()
}

#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Serialize an embedding vector to little-endian bytes for BLOB storage.
pub fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize a BLOB back into an embedding vector. Returns `None` for a
/// malformed (non-multiple-of-4) byte length rather than panicking.
pub fn vector_from_bytes(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(bytes.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 0.0001);
    }

    #[test]
    fn cosine_similarity_orthogonal_is_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 0.0001);
    }

    #[test]
    fn cosine_similarity_opposite_is_minus_one() {
        assert!((cosine_similarity(&[1.0, 2.0, 3.0], &[-1.0, -2.0, -3.0]) + 1.0).abs() < 0.0001);
    }

    #[test]
    fn bytes_round_trip() {
        let original = vec![1.5_f32, 2.5, 3.5, 4.5];
        let bytes = vector_to_bytes(&original);
        let restored = vector_from_bytes(&bytes).unwrap();
        assert_eq!(original, restored);
    }

    #[test]
    fn malformed_bytes_return_none() {
        assert!(vector_from_bytes(&[0, 1, 2]).is_none());
    }

    #[test]
    fn matryoshka_truncate_renormalizes() {
        let vector: Vec<f32> = (0..768).map(|i| (i as f32).sin()).collect();
        let truncated = matryoshka_truncate(vector);
        assert_eq!(truncated.len(), EMBEDDING_DIMENSIONS);
        let norm = truncated.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);
    }

    #[cfg(not(feature = "embeddings"))]
    #[test]
    fn service_without_feature_reports_not_ready() {
        let svc = EmbeddingService::new();
        assert!(!svc.is_ready());
        assert!(svc.embed("hello").is_err());
    }
}
