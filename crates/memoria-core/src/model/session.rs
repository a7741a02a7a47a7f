use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a [`Session`]. Transitions `active -> idle -> completed`
/// are one-directional; there is no path back to `active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Idle,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Idle => "idle",
            SessionStatus::Completed => "completed",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s {
            "idle" => SessionStatus::Idle,
            "completed" => SessionStatus::Completed,
            _ => SessionStatus::Active,
        }
    }
}

/// One coding-agent session against a single project.
///
/// Created on the first event carrying a new session id; the observation
/// count is denormalized onto the row so session listings don't need a
/// join, mirroring how the store keeps `times_retrieved` denormalized on
/// knowledge rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub project_path: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub observation_count: u32,
    pub summary_ref: Option<String>,
}

impl Session {
    pub fn new(id: impl Into<String>, project_path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            project_path: project_path.into(),
            started_at: super::now(),
            ended_at: None,
            status: SessionStatus::Active,
            observation_count: 0,
            summary_ref: None,
        }
    }

    /// A fresh session id for hosts that don't supply their own.
    pub fn generate_id() -> String {
        Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_as_str() {
        for s in [SessionStatus::Active, SessionStatus::Idle, SessionStatus::Completed] {
            assert_eq!(SessionStatus::parse_name(s.as_str()), s);
        }
    }

    #[test]
    fn unknown_status_defaults_to_active() {
        assert_eq!(SessionStatus::parse_name("bogus"), SessionStatus::Active);
    }
}
