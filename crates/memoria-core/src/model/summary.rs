use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Condensed view of a completed session, produced once by
/// [`crate::summarizer`] and referenced from `Session::summary_ref`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub session_id: String,
    pub text: String,
    pub key_decisions: Vec<String>,
    pub files_modified: BTreeSet<String>,
    pub concepts: BTreeSet<String>,
    pub token_count: u32,
    pub created_at: DateTime<Utc>,
}

impl SessionSummary {
    pub fn new(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            text: text.into(),
            key_decisions: Vec::new(),
            files_modified: BTreeSet::new(),
            concepts: BTreeSet::new(),
            token_count: 0,
            created_at: super::now(),
        }
    }
}
