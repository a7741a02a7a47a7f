//! Error taxonomy shared across the engine.
//!
//! Every fallible operation in this crate returns a [`MemoriaError`]. The
//! variants mirror the abstract kinds the design calls for — transient
//! provider failures, config errors, validation errors, storage errors,
//! corrupt model output, not-found, and conflict — rather than leaking
//! any particular backend's error type at the public API surface.

use thiserror::Error;

/// The crate-wide result alias.
pub type Result<T> = std::result::Result<T, MemoriaError>;

/// Abstract error kinds. Handlers should match on these, not on the
/// provider- or backend-specific detail carried in the string payloads.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum MemoriaError {
    /// A capability call (compress/embed/rerank/adjudicate) failed in a way
    /// that is expected to be transient (rate limiting, provider 5xx,
    /// timeout). Retried by the caller up to its attempt limit.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Misconfiguration: bad API key, unsupported model, malformed config
    /// value. Never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// Bad input on a public API boundary. Rejected synchronously, never
    /// enqueued.
    #[error("validation error: {0}")]
    Validation(String),

    /// Underlying storage failed (I/O, sqlite error, schema mismatch).
    #[error("storage error: {0}")]
    Storage(String),

    /// An LLM capability returned output that could not be parsed into the
    /// expected shape. Treated as "no observation"; the fallback path runs.
    #[error("corrupt model output: {0}")]
    CorruptOutput(String),

    /// A read targeted an id that does not exist (or is no longer current,
    /// depending on the caller's filter).
    #[error("not found: {0}")]
    NotFound(String),

    /// An operation conflicted with the current state (e.g. an attempt to
    /// supersede a row that is itself already superseded or tombstoned).
    /// Logged and downgraded to a plain create by the caller, never
    /// propagated as a hard failure.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<rusqlite::Error> for MemoriaError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => MemoriaError::NotFound(err.to_string()),
            other => MemoriaError::Storage(other.to_string()),
        }
    }
}

impl From<std::io::Error> for MemoriaError {
    fn from(err: std::io::Error) -> Self {
        MemoriaError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for MemoriaError {
    fn from(err: serde_json::Error) -> Self {
        MemoriaError::CorruptOutput(err.to_string())
    }
}

impl MemoriaError {
    /// Whether this error should be retried within the capability call's
    /// own backoff loop (see `compressor::retry`).
    pub fn is_transient(&self) -> bool {
        matches!(self, MemoriaError::Transient(_))
    }

    /// Whether the queue should mark the pending row `failed` immediately
    /// rather than retry it.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MemoriaError::Config(_) | MemoriaError::Validation(_))
    }
}
