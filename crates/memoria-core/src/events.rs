//! Normalized inbound event stream (spec.md §6). Host-runtime hook wiring —
//! deciding *which* events fire and *when* — is out of scope; this module
//! only defines the wire shape and the one piece of pure business logic
//! attached to it (the `chat.message` -> discovery-observation rule).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{ObservationDraft, ObservationType};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InboundEvent {
    pub session_id: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", deny_unknown_fields)]
pub enum EventPayload {
    SessionStart,
    SessionEnd,
    IdleFlush,
    ToolExecute { call_id: String, tool_name: String, output: String },
    ChatMessage { role: ChatRole, text: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// `chat.message` is recorded as a `discovery` observation when
/// `role == user && text.len() >= 20` (spec.md §6). Returns `None`
/// otherwise — most assistant chatter and short user utterances never
/// become an observation at all, so the queue is never touched for them.
pub fn normalize_chat_message(role: ChatRole, text: &str) -> Option<ObservationDraft> {
    if role != ChatRole::User || text.len() < 20 {
        return None;
    }
    Some(ObservationDraft {
        observation_type: Some(ObservationType::Discovery.as_str().to_string()),
        title: text.chars().take(80).collect(),
        narrative: text.to_string(),
        importance: Some(3),
        ..Default::default()
    })
}
