//! Session summarizer (spec.md §4.7). Invoked on session end when the
//! session has at least two observations and no summary yet; writes
//! exactly one [`crate::model::SessionSummary`] row and points
//! `Session::summary_ref` at it. Mirrors the `Compressor` shape: an
//! optional LLM-backed implementation behind a trait, with a deterministic
//! fallback that never fails.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Observation, ObservationType, SessionSummary};

/// Minimum observation count before a session is worth summarizing at all
/// (spec.md §4.7: "observation count >= 2").
pub const MIN_OBSERVATIONS_FOR_SUMMARY: usize = 2;

#[non_exhaustive]
#[derive(Debug, Clone, Error)]
pub enum SummarizerError {
    #[error("transient provider error: {0}")]
    Transient(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("corrupt model output: {0}")]
    CorruptOutput(String),
}

impl From<SummarizerError> for crate::error::MemoriaError {
    fn from(err: SummarizerError) -> Self {
        match err {
            SummarizerError::Transient(s) => crate::error::MemoriaError::Transient(s),
            SummarizerError::Config(s) => crate::error::MemoriaError::Config(s),
            SummarizerError::CorruptOutput(s) => crate::error::MemoriaError::CorruptOutput(s),
        }
    }
}

/// `summarize(sessionId, observations) -> text summary` (spec.md §4.7).
/// Like [`crate::compressor::Compressor`], a failure here never blocks the
/// session-end path — the caller falls back to
/// [`deterministic_summary`] on any `Err`.
pub trait Summarizer: Send + Sync {
    fn summarize(&self, session_id: &str, observations: &[Observation]) -> Result<String, SummarizerError>;
}

/// Builds the one summary row for a session, preferring `summarizer` when
/// given and falling back to the deterministic aggregation otherwise. The
/// caller (the host binary or an in-process orchestrator) is responsible
/// for checking `observations.len() >= MIN_OBSERVATIONS_FOR_SUMMARY` and
/// that no summary already exists — this function always produces one.
pub fn build_summary(
    session_id: &str,
    observations: &[Observation],
    summarizer: Option<&dyn Summarizer>,
) -> SessionSummary {
    let text = summarizer
        .and_then(|s| match s.summarize(session_id, observations) {
            Ok(text) if !text.trim().is_empty() => Some(text),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, session_id, "summarizer failed, using deterministic summary");
                None
            }
        })
        .unwrap_or_else(|| deterministic_text(observations));

    let mut summary = SessionSummary::new(session_id, text);
    summary.key_decisions = decision_titles(observations);
    summary.files_modified = union_files_modified(observations);
    summary.concepts = union_concepts(observations);
    summary.token_count = estimate_tokens(&summary.text);
    summary
}

/// Deterministic summary text: per-type counts, then the titles of every
/// `decision` observation (spec.md §4.7: "listing titles of decisions").
fn deterministic_text(observations: &[Observation]) -> String {
    let mut counts: [(ObservationType, usize); 6] = [
        (ObservationType::Decision, 0),
        (ObservationType::Bugfix, 0),
        (ObservationType::Feature, 0),
        (ObservationType::Refactor, 0),
        (ObservationType::Discovery, 0),
        (ObservationType::Change, 0),
    ];
    for obs in observations {
        for (t, n) in counts.iter_mut() {
            if *t == obs.observation_type {
                *n += 1;
            }
        }
    }
    let mut lines = Vec::new();
    let counts_line: Vec<String> =
        counts.iter().filter(|(_, n)| *n > 0).map(|(t, n)| format!("{} {}", n, t.as_str())).collect();
    if !counts_line.is_empty() {
        lines.push(format!("{} observations: {}.", observations.len(), counts_line.join(", ")));
    } else {
        lines.push(format!("{} observations.", observations.len()));
    }

    let decisions = decision_titles(observations);
    if !decisions.is_empty() {
        lines.push(format!("Key decisions: {}.", decisions.join("; ")));
    }
    lines.join(" ")
}

fn decision_titles(observations: &[Observation]) -> Vec<String> {
    observations
        .iter()
        .filter(|o| o.observation_type == ObservationType::Decision)
        .map(|o| o.title.clone())
        .collect()
}

fn union_files_modified(observations: &[Observation]) -> BTreeSet<String> {
    observations.iter().flat_map(|o| o.files_modified.iter().cloned()).collect()
}

fn union_concepts(observations: &[Observation]) -> BTreeSet<String> {
    observations.iter().flat_map(|o| o.concepts.iter().cloned()).collect()
}

/// Rough token estimate (4 characters per token), matching the same
/// heuristic `context`'s token budget uses so the two stay comparable.
fn estimate_tokens(text: &str) -> u32 {
    ((text.chars().count() as f32) / 4.0).ceil() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ObservationDraft;

    fn obs(obs_type: ObservationType, title: &str) -> Observation {
        let draft = ObservationDraft {
            observation_type: Some(obs_type.as_str().to_string()),
            title: title.to_string(),
            ..Default::default()
        };
        draft.into_observation("s1", "Read")
    }

    #[test]
    fn deterministic_summary_lists_decision_titles() {
        let observations =
            vec![obs(ObservationType::Decision, "use JWT RS256"), obs(ObservationType::Bugfix, "fix race")];
        let summary = build_summary("s1", &observations, None);
        assert!(summary.text.contains("use JWT RS256"));
        assert_eq!(summary.key_decisions, vec!["use JWT RS256".to_string()]);
    }

    #[test]
    fn summary_unions_concepts_and_files_across_observations() {
        let mut a = obs(ObservationType::Feature, "a");
        a.concepts.insert("auth".into());
        a.files_modified.insert("src/auth.rs".into());
        let mut b = obs(ObservationType::Feature, "b");
        b.concepts.insert("routing".into());
        b.files_modified.insert("src/router.rs".into());

        let summary = build_summary("s1", &[a, b], None);
        assert_eq!(summary.concepts.len(), 2);
        assert_eq!(summary.files_modified.len(), 2);
    }

    struct FailingSummarizer;
    impl Summarizer for FailingSummarizer {
        fn summarize(&self, _session_id: &str, _observations: &[Observation]) -> Result<String, SummarizerError> {
            Err(SummarizerError::Transient("boom".into()))
        }
    }

    #[test]
    fn failed_llm_summary_falls_back_to_deterministic() {
        let observations = vec![obs(ObservationType::Discovery, "found something")];
        let summary = build_summary("s1", &observations, Some(&FailingSummarizer));
        assert!(summary.text.contains("1 observations"));
    }
}
