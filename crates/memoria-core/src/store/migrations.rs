//! Schema migrations for the embedded store (spec.md §4.1).
//!
//! One entry per schema change, applied in order and tracked in a
//! `schema_version` table so `Store::open` can resume from whatever
//! version the on-disk file is already at. This is a fresh schema for
//! this spec's data model (sessions/observations/pending jobs/summaries/
//! entities/relations) rather than a continuation of the teacher's
//! knowledge-node schema, so there is no history to replay: FTS5 gets the
//! porter tokenizer from v2 onward instead of the teacher's v7 upgrade.

use rusqlite::Connection;

#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub up: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration { version: 1, description: "sessions, observations, embeddings, pending jobs, summaries", up: MIGRATION_V1_UP },
    Migration { version: 2, description: "FTS5 full-text index over observations", up: MIGRATION_V2_UP },
    Migration { version: 3, description: "entities and relations (graph-hop search signal)", up: MIGRATION_V3_UP },
];

const MIGRATION_V1_UP: &str = r#"
CREATE TABLE sessions (
    id TEXT PRIMARY KEY,
    project_path TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    observation_count INTEGER NOT NULL DEFAULT 0,
    summary_ref TEXT
);

CREATE TABLE observations (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL REFERENCES sessions(id),
    observation_type TEXT NOT NULL,
    title TEXT NOT NULL,
    subtitle TEXT NOT NULL DEFAULT '',
    narrative TEXT NOT NULL DEFAULT '',
    facts TEXT NOT NULL DEFAULT '[]',
    concepts TEXT NOT NULL DEFAULT '[]',
    files_read TEXT NOT NULL DEFAULT '[]',
    files_modified TEXT NOT NULL DEFAULT '[]',
    tool_name TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    token_count INTEGER NOT NULL DEFAULT 0,
    importance INTEGER NOT NULL DEFAULT 3,
    revision_of TEXT REFERENCES observations(id),
    superseded_by TEXT REFERENCES observations(id),
    superseded_at TEXT,
    deleted_at TEXT
);

CREATE INDEX idx_observations_session ON observations(session_id);
CREATE INDEX idx_observations_type ON observations(observation_type);
CREATE INDEX idx_observations_current ON observations(observation_type) WHERE superseded_by IS NULL AND deleted_at IS NULL;
CREATE INDEX idx_observations_created_at ON observations(created_at);
CREATE INDEX idx_observations_revision_of ON observations(revision_of);

CREATE TABLE embeddings (
    observation_id TEXT PRIMARY KEY REFERENCES observations(id) ON DELETE CASCADE,
    vector BLOB NOT NULL,
    dimensions INTEGER NOT NULL,
    model TEXT NOT NULL
);

CREATE TABLE pending_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    tool_name TEXT NOT NULL,
    raw_output TEXT NOT NULL,
    call_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    enqueued_at TEXT NOT NULL,
    last_transition_at TEXT NOT NULL,
    UNIQUE(session_id, call_id)
);

CREATE INDEX idx_pending_jobs_status ON pending_jobs(status, enqueued_at);

CREATE TABLE session_summaries (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL UNIQUE REFERENCES sessions(id),
    text TEXT NOT NULL,
    key_decisions TEXT NOT NULL DEFAULT '[]',
    files_modified TEXT NOT NULL DEFAULT '[]',
    concepts TEXT NOT NULL DEFAULT '[]',
    token_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
"#;

const MIGRATION_V2_UP: &str = r#"
CREATE VIRTUAL TABLE observations_fts USING fts5(
    title,
    narrative,
    concepts,
    content = 'observations',
    content_rowid = 'rowid',
    tokenize = 'porter unicode61'
);

CREATE TRIGGER observations_fts_insert AFTER INSERT ON observations BEGIN
    INSERT INTO observations_fts(rowid, title, narrative, concepts)
    VALUES (new.rowid, new.title, new.narrative, new.concepts);
END;

CREATE TRIGGER observations_fts_delete AFTER DELETE ON observations BEGIN
    INSERT INTO observations_fts(observations_fts, rowid, title, narrative, concepts)
    VALUES ('delete', old.rowid, old.title, old.narrative, old.concepts);
END;

CREATE TRIGGER observations_fts_update AFTER UPDATE ON observations BEGIN
    INSERT INTO observations_fts(observations_fts, rowid, title, narrative, concepts)
    VALUES ('delete', old.rowid, old.title, old.narrative, old.concepts);
    INSERT INTO observations_fts(rowid, title, narrative, concepts)
    VALUES (new.rowid, new.title, new.narrative, new.concepts);
END;
"#;

const MIGRATION_V3_UP: &str = r#"
CREATE TABLE entities (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(name, entity_type)
);

CREATE TABLE relations (
    id TEXT PRIMARY KEY,
    source_entity_id TEXT NOT NULL REFERENCES entities(id),
    target_entity_id TEXT NOT NULL REFERENCES entities(id),
    relation_type TEXT NOT NULL,
    evidenced_by_observation_id TEXT NOT NULL REFERENCES observations(id),
    created_at TEXT NOT NULL
);

CREATE INDEX idx_relations_source ON relations(source_entity_id);
CREATE INDEX idx_relations_target ON relations(target_entity_id);
CREATE INDEX idx_relations_observation ON relations(evidenced_by_observation_id);
"#;

/// Applies every migration whose version is greater than the database's
/// current `schema_version`, each in its own transaction, and advances the
/// tracking table on success.
pub fn apply_migrations(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let current: u32 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| row.get(0))
        .unwrap_or(0);

    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.up)?;
        tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [migration.version])?;
        tx.commit()?;
        tracing::info!(version = migration.version, description = migration.description, "applied migration");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_lands_on_latest_version() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();
        let version: u32 =
            conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0)).unwrap();
        assert_eq!(version, MIGRATIONS.last().unwrap().version);
    }

    #[test]
    fn re_applying_migrations_is_a_no_op() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();
        apply_migrations(&conn).unwrap();
        let count: u32 = conn.query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0)).unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn fts_table_is_queryable_after_migration() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO sessions (id, project_path, started_at, status) VALUES ('s1', '/tmp', '2026-01-01T00:00:00Z', 'active')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO observations (id, session_id, observation_type, title, narrative, concepts, created_at)
             VALUES ('o1', 's1', 'discovery', 'uses JWT RS256', 'narrative text', '[]', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM observations_fts WHERE observations_fts MATCH 'JWT'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
