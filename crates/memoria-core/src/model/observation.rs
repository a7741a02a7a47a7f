use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The kind of thing an observation records. Unknown values encountered on
/// the wire (a compressor's structured output, a config-driven mapping
/// table) default to `Discovery` rather than erroring — see
/// [`ObservationType::parse_name`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationType {
    Decision,
    Bugfix,
    Feature,
    Refactor,
    Discovery,
    Change,
}

impl ObservationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationType::Decision => "decision",
            ObservationType::Bugfix => "bugfix",
            ObservationType::Feature => "feature",
            ObservationType::Refactor => "refactor",
            ObservationType::Discovery => "discovery",
            ObservationType::Change => "change",
        }
    }

    /// Lenient parse: any value this engine doesn't recognize becomes a
    /// `discovery`, per the compressor's "unknown type defaults to
    /// discovery" rule (spec.md §4.3).
    pub fn parse_name(s: &str) -> Self {
        match s {
            "decision" => ObservationType::Decision,
            "bugfix" => ObservationType::Bugfix,
            "feature" => ObservationType::Feature,
            "refactor" => ObservationType::Refactor,
            "change" => ObservationType::Change,
            _ => ObservationType::Discovery,
        }
    }

    /// The static tool-name -> type map the fallback compressor uses when
    /// no LLM is available (spec.md §4.3).
    pub fn from_tool_name(tool: &str) -> Self {
        match tool {
            "Read" | "Grep" | "Glob" | "WebFetch" | "WebSearch" => ObservationType::Discovery,
            "Write" | "Edit" | "Bash" | "NotebookEdit" => ObservationType::Change,
            _ => ObservationType::Discovery,
        }
    }
}

/// Which rows a read should return relative to the lineage state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecallState {
    /// `superseded_by IS NULL AND deleted_at IS NULL` — the default for
    /// every user-facing read.
    #[default]
    Current,
    /// Every row regardless of lineage state, for audit/history views.
    History,
    /// Only tombstoned rows.
    TombstonedOnly,
    /// Only superseded (but not tombstoned) rows.
    SupersededOnly,
}

/// A dense embedding vector attached to an observation.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub observation_id: String,
    pub vector: Vec<f32>,
    pub model: String,
}

/// A durable, structured record distilled from one tool output or user
/// message. See spec.md §3 for the field-level invariants; none of them
/// are re-derived here, they're enforced by [`crate::lineage`] and
/// [`crate::store`] at the write boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    pub session_id: String,
    #[serde(rename = "type")]
    pub observation_type: ObservationType,
    pub title: String,
    pub subtitle: String,
    pub narrative: String,
    pub facts: Vec<String>,
    pub concepts: BTreeSet<String>,
    pub files_read: BTreeSet<String>,
    pub files_modified: BTreeSet<String>,
    pub tool_name: String,
    pub created_at: DateTime<Utc>,
    pub token_count: u32,
    pub importance: u8,
    pub revision_of: Option<String>,
    pub superseded_by: Option<String>,
    pub superseded_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Observation {
    /// `superseded_by IS NULL AND deleted_at IS NULL` — the single
    /// predicate that decides whether an observation is "current"
    /// (spec.md §4.5).
    pub fn is_current(&self) -> bool {
        self.superseded_by.is_none() && self.deleted_at.is_none()
    }

    pub fn is_tombstoned(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_superseded(&self) -> bool {
        self.superseded_by.is_some() && self.deleted_at.is_none()
    }

    /// Clamp importance into the documented `[1, 5]` range, used whenever
    /// a value arrives from an LLM or from config rather than from our own
    /// constructors.
    pub fn clamp_importance(raw: i64) -> u8 {
        raw.clamp(1, 5) as u8
    }
}

/// The not-yet-persisted shape an observation takes between compression
/// and `Store::create`. Kept separate from [`Observation`] because a draft
/// has no id, session linkage, or lineage fields yet — those are assigned
/// at the moment of persistence, by the dedup resolver and the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationDraft {
    #[serde(rename = "type")]
    pub observation_type: Option<String>,
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub narrative: String,
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub concepts: BTreeSet<String>,
    #[serde(default)]
    pub files_read: BTreeSet<String>,
    #[serde(default)]
    pub files_modified: BTreeSet<String>,
    pub importance: Option<i64>,
}

impl ObservationDraft {
    pub fn resolved_type(&self) -> ObservationType {
        self.observation_type
            .as_deref()
            .map(ObservationType::parse_name)
            .unwrap_or(ObservationType::Discovery)
    }

    /// Missing importance defaults to 3; out-of-range values are clamped
    /// (spec.md §4.3).
    pub fn resolved_importance(&self) -> u8 {
        Observation::clamp_importance(self.importance.unwrap_or(3))
    }

    pub fn into_observation(self, session_id: impl Into<String>, tool_name: impl Into<String>) -> Observation {
        Observation {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            observation_type: self.resolved_type(),
            title: self.title,
            subtitle: self.subtitle,
            narrative: self.narrative,
            facts: self.facts,
            concepts: self.concepts,
            files_read: self.files_read,
            files_modified: self.files_modified,
            tool_name: tool_name.into(),
            created_at: super::now(),
            token_count: 0,
            importance: self.resolved_importance(),
            revision_of: None,
            superseded_by: None,
            superseded_at: None,
            deleted_at: None,
        }
    }
}
