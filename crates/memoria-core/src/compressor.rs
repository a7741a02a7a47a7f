//! The LLM capability that turns one raw tool output into a structured
//! [`crate::model::ObservationDraft`] (spec.md §4.3). Modeled as a trait
//! rather than an HTTP client, the same way the teacher treats `fastembed`/
//! `usearch` as optional capabilities behind `is_ready()`/fallback paths —
//! [`IngestionQueue`](crate::queue::IngestionQueue) never knows whether a
//! `Compressor` is backed by a live provider or nothing at all.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Observation, ObservationDraft, ObservationType};

/// Hard cap on raw tool output handed to a `Compressor` (spec.md §4.3).
/// Larger input is truncated by the caller before the call is made, never
/// inside a `Compressor` implementation.
pub const MAX_COMPRESSION_INPUT_CHARS: usize = 50_000;
const TRUNCATION_MARKER: &str = "\n...[truncated]";

/// What a `Compressor` (or `ConflictAdjudicator`, which reuses this same
/// error shape) can fail with — the abstract kinds from spec.md §7, not
/// any particular provider's error type.
#[non_exhaustive]
#[derive(Debug, Clone, Error)]
pub enum CompressorError {
    /// Rate limited, provider 5xx, timeout. Retried by the caller.
    #[error("transient provider error: {0}")]
    Transient(String),
    /// Bad API key, unsupported model, malformed request. Never retried.
    #[error("configuration error: {0}")]
    Config(String),
    /// The provider responded but the payload didn't parse into a draft.
    #[error("corrupt model output: {0}")]
    CorruptOutput(String),
}

impl CompressorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CompressorError::Transient(_))
    }
}

impl From<CompressorError> for crate::error::MemoriaError {
    fn from(err: CompressorError) -> Self {
        match err {
            CompressorError::Transient(s) => crate::error::MemoriaError::Transient(s),
            CompressorError::Config(s) => crate::error::MemoriaError::Config(s),
            CompressorError::CorruptOutput(s) => crate::error::MemoriaError::CorruptOutput(s),
        }
    }
}

/// What a `Compressor` sees: the raw tool output plus whatever context the
/// caller chooses to attach. Redaction ([`crate::redaction::strip`]) has
/// already run on `output` by the time a `Compressor` receives it.
#[derive(Debug, Clone)]
pub struct CompressionInput<'a> {
    pub tool_name: &'a str,
    pub output: &'a str,
    pub session_context: Option<&'a str>,
}

/// `compress(toolName, output, optionalSessionContext) -> structured
/// observation` (spec.md §4.3). A `Compressor` is never called directly by
/// the queue on oversized or too-short input — that gating lives in
/// `IngestionQueue` — so an implementation only needs to handle "produce a
/// draft" or fail.
pub trait Compressor: Send + Sync {
    fn compress(&self, input: &CompressionInput<'_>) -> Result<Option<ObservationDraft>, CompressorError>;
}

/// Truncates `text` to [`MAX_COMPRESSION_INPUT_CHARS`] with a trailing
/// marker, the hard cap from spec.md §4.3 applied before any `Compressor`
/// call is made.
pub fn truncate_for_compression(text: &str) -> String {
    if text.chars().count() <= MAX_COMPRESSION_INPUT_CHARS {
        return text.to_string();
    }
    let budget = MAX_COMPRESSION_INPUT_CHARS.saturating_sub(TRUNCATION_MARKER.len());
    let mut out: String = text.chars().take(budget).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}

/// The wire shape an LLM provider is asked to return, lenient on every
/// field. Deserializing straight into this (rather than `ObservationDraft`)
/// means an unrecognized JSON key or a missing optional field never fails
/// the whole call — only [`parse_draft`]'s own validation steps can.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
struct RawDraft {
    #[serde(rename = "type")]
    observation_type: Option<String>,
    title: Option<String>,
    subtitle: Option<String>,
    narrative: Option<String>,
    facts: Vec<String>,
    concepts: BTreeSet<String>,
    files_read: BTreeSet<String>,
    files_modified: BTreeSet<String>,
    importance: Option<i64>,
}

/// Lenient tag-extractor (spec.md §4.3): unknown fields are ignored
/// (`serde`'s default behavior, no `deny_unknown_fields` here — the
/// opposite of [`crate::events::InboundEvent`]'s strict wire contract),
/// an unrecognized `type` defaults to `discovery`, a missing `importance`
/// defaults to 3 and out-of-range values are clamped into `[1, 5]`.
/// Returns `None` only when the payload isn't even valid JSON, or carries
/// no usable title — a provider returning noise should fall back, not
/// panic the pending row.
pub fn parse_draft(raw_json: &str) -> Option<ObservationDraft> {
    let raw: RawDraft = serde_json::from_str(raw_json).ok()?;
    let title = raw.title.unwrap_or_default();
    if title.trim().is_empty() {
        return None;
    }
    Some(ObservationDraft {
        observation_type: Some(
            raw.observation_type
                .as_deref()
                .map(ObservationType::parse_name)
                .unwrap_or(ObservationType::Discovery)
                .as_str()
                .to_string(),
        ),
        title,
        subtitle: raw.subtitle.unwrap_or_default(),
        narrative: raw.narrative.unwrap_or_default(),
        facts: raw.facts,
        concepts: raw.concepts,
        files_read: raw.files_read,
        files_modified: raw.files_modified,
        importance: Some(Observation::clamp_importance(raw.importance.unwrap_or(3)) as i64),
    })
}

/// Conservative path extraction used by [`FallbackCompressor`]: any
/// run of non-whitespace characters containing a `/` or a file extension,
/// deduplicated. Intentionally permissive about false positives (a
/// plausible-looking token that isn't actually a path) since this only
/// feeds a search-widening signal, never a correctness-critical one.
fn extract_file_paths(text: &str) -> BTreeSet<String> {
    text.split_whitespace()
        .map(|tok| tok.trim_matches(|c: char| matches!(c, '"' | '\'' | ',' | '(' | ')' | ':' | ';')))
        .filter(|tok| {
            !tok.is_empty()
                && (tok.contains('/') || tok.rsplit('.').next().is_some_and(|ext| ext.len() <= 4 && ext != *tok))
        })
        .map(|tok| tok.to_string())
        .collect()
}

/// The deterministic, always-available compressor (spec.md §4.3): used
/// directly by `IngestionQueue` when compression is disabled, or when the
/// configured `Compressor` errors out after its retry budget. Never fails
/// and never returns `None` — a tool call always produces *some*
/// observation when this path is taken.
#[derive(Debug, Default, Clone, Copy)]
pub struct FallbackCompressor;

impl Compressor for FallbackCompressor {
    fn compress(&self, input: &CompressionInput<'_>) -> Result<Option<ObservationDraft>, CompressorError> {
        let observation_type = ObservationType::from_tool_name(input.tool_name);
        let paths = extract_file_paths(input.output);
        // A read-only tool touched these paths without changing them; a
        // mutating tool changed them. The static tool-name map above
        // already tells us which side of that line a tool falls on.
        let (files_read, files_modified) = if observation_type == ObservationType::Change {
            (BTreeSet::new(), paths)
        } else {
            (paths, BTreeSet::new())
        };
        Ok(Some(ObservationDraft {
            observation_type: Some(observation_type.as_str().to_string()),
            title: format!("{} execution", input.tool_name),
            subtitle: String::new(),
            narrative: format!("{} produced {} characters of output.", input.tool_name, input.output.chars().count()),
            facts: Vec::new(),
            concepts: BTreeSet::new(),
            files_read,
            files_modified,
            importance: Some(2),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_adds_marker_only_past_the_cap() {
        let short = "a".repeat(100);
        assert_eq!(truncate_for_compression(&short), short);

        let long = "a".repeat(MAX_COMPRESSION_INPUT_CHARS + 500);
        let truncated = truncate_for_compression(&long);
        assert!(truncated.len() < long.len());
        assert!(truncated.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn parse_draft_defaults_unknown_type_to_discovery() {
        let json = r#"{"type": "made_up_type", "title": "t"}"#;
        let draft = parse_draft(json).unwrap();
        assert_eq!(draft.resolved_type(), ObservationType::Discovery);
    }

    #[test]
    fn parse_draft_ignores_unknown_fields() {
        let json = r#"{"title": "t", "something_new": 42, "importance": 3}"#;
        let draft = parse_draft(json).unwrap();
        assert_eq!(draft.title, "t");
    }

    #[test]
    fn parse_draft_clamps_out_of_range_importance() {
        let json = r#"{"title": "t", "importance": 99}"#;
        let draft = parse_draft(json).unwrap();
        assert_eq!(draft.resolved_importance(), 5);
    }

    #[test]
    fn parse_draft_missing_importance_defaults_to_three() {
        let json = r#"{"title": "t"}"#;
        let draft = parse_draft(json).unwrap();
        assert_eq!(draft.resolved_importance(), 3);
    }

    #[test]
    fn parse_draft_rejects_empty_title() {
        assert!(parse_draft(r#"{"title": ""}"#).is_none());
    }

    #[test]
    fn parse_draft_rejects_invalid_json() {
        assert!(parse_draft("not json at all").is_none());
    }

    #[test]
    fn fallback_compressor_never_errors() {
        let input = CompressionInput { tool_name: "Read", output: "contents of src/main.rs", session_context: None };
        let draft = FallbackCompressor.compress(&input).unwrap().unwrap();
        assert_eq!(draft.title, "Read execution");
        assert_eq!(draft.resolved_type(), ObservationType::Discovery);
        assert_eq!(draft.resolved_importance(), 2);
    }

    #[test]
    fn fallback_compressor_maps_write_to_change() {
        let input = CompressionInput { tool_name: "Write", output: "wrote file", session_context: None };
        let draft = FallbackCompressor.compress(&input).unwrap().unwrap();
        assert_eq!(draft.resolved_type(), ObservationType::Change);
    }

    #[test]
    fn fallback_compressor_extracts_plausible_paths() {
        let input = CompressionInput {
            tool_name: "Edit",
            output: "updated src/lib.rs and tests/mod.rs successfully",
            session_context: None,
        };
        let draft = FallbackCompressor.compress(&input).unwrap().unwrap();
        assert!(draft.files_modified.contains("src/lib.rs"));
        assert!(draft.files_modified.contains("tests/mod.rs"));
        assert!(draft.files_read.is_empty());
    }

    #[test]
    fn fallback_compressor_routes_read_only_tools_to_files_read() {
        let input = CompressionInput {
            tool_name: "Read",
            output: "contents of src/a.ts and src/b.ts follow",
            session_context: None,
        };
        let draft = FallbackCompressor.compress(&input).unwrap().unwrap();
        assert!(draft.files_read.contains("src/a.ts"));
        assert!(draft.files_read.contains("src/b.ts"));
        assert!(draft.files_modified.is_empty());
    }
}
