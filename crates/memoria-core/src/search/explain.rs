//! Per-result attribution (spec.md §4.6, Glossary "Explain record"). Every
//! [`crate::search::RankedResult`] carries one of these, always populated
//! — the dashboard's "why this result" view and the test suite both rely
//! on `matched_by` never being empty for a result that made it through
//! fusion.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchSignal {
    Fts,
    Vector,
    Graph,
    UserMemory,
    ConceptFilter,
    FileFilter,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExplainRecord {
    pub matched_by: BTreeSet<MatchSignal>,
    pub signal_scores: BTreeMap<MatchSignal, f32>,
    pub rrf_score: f32,
}

impl ExplainRecord {
    pub fn record(&mut self, signal: MatchSignal, score: f32) {
        self.matched_by.insert(signal);
        self.signal_scores.insert(signal, score);
    }
}
