use super::observation::{ObservationType, RecallState};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Bundles the optional filters spec.md §4.6 lists for `search`/`list`, plus
/// the single `state` switch that implements the "is current" predicate
/// from spec.md §4.5. `Current` is the default for every user-facing read;
/// callers reach for `History`/`TombstonedOnly`/`SupersededOnly` only for
/// audit views.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub observation_type: Option<ObservationType>,
    pub min_importance: Option<u8>,
    pub max_importance: Option<u8>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub concepts: BTreeSet<String>,
    pub files: BTreeSet<String>,
    pub session_id: Option<String>,
    pub state: RecallState,
}

impl SearchFilter {
    pub fn current() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, t: ObservationType) -> Self {
        self.observation_type = Some(t);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_state(mut self, state: RecallState) -> Self {
        self.state = state;
        self
    }

    pub fn has_text_independent_constraints(&self) -> bool {
        self.observation_type.is_some()
            || self.min_importance.is_some()
            || self.max_importance.is_some()
            || self.since.is_some()
            || self.until.is_some()
            || !self.concepts.is_empty()
            || !self.files.is_empty()
            || self.session_id.is_some()
    }
}

/// Simple offset/limit pagination for `list_by_filter`. Default limit
/// mirrors `maxIndexEntries`'s ballpark (spec.md §6) so an unpaginated
/// call can't accidentally scan an entire large corpus.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub offset: u32,
    pub limit: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { offset: 0, limit: 200 }
    }
}

impl Pagination {
    pub fn new(offset: u32, limit: u32) -> Self {
        Self { offset, limit }
    }
}
