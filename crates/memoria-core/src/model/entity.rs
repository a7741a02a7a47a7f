use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Optional, config-gated graph layer (spec.md §3, `entityExtractionEnabled`).
/// Named, typed nodes extracted from observations, used only to widen
/// recall by graph hop (`search::graph`) — never required for correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    File,
    Symbol,
    Concept,
    Person,
    Other,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::File => "file",
            EntityType::Symbol => "symbol",
            EntityType::Concept => "concept",
            EntityType::Person => "person",
            EntityType::Other => "other",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s {
            "file" => EntityType::File,
            "symbol" => EntityType::Symbol,
            "concept" => EntityType::Concept,
            "person" => EntityType::Person,
            _ => EntityType::Other,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub entity_type: EntityType,
    pub created_at: DateTime<Utc>,
}

impl Entity {
    pub fn new(name: impl Into<String>, entity_type: EntityType) -> Self {
        Self { id: uuid::Uuid::new_v4().to_string(), name: name.into(), entity_type, created_at: super::now() }
    }
}

/// A typed edge between two entities, evidenced by a specific observation.
/// Kept as a plain id-to-id edge — lineage between observations uses a
/// different, narrower mechanism (`crate::lineage`); this graph is purely
/// additive search signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: String,
    pub source_entity_id: String,
    pub target_entity_id: String,
    pub relation_type: String,
    pub evidenced_by_observation_id: String,
    pub created_at: DateTime<Utc>,
}

impl Relation {
    pub fn new(
        source_entity_id: impl Into<String>,
        target_entity_id: impl Into<String>,
        relation_type: impl Into<String>,
        evidenced_by_observation_id: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_entity_id: source_entity_id.into(),
            target_entity_id: target_entity_id.into(),
            relation_type: relation_type.into(),
            evidenced_by_observation_id: evidenced_by_observation_id.into(),
            created_at: super::now(),
        }
    }
}
