//! SQLite-backed implementation of [`Store`] (spec.md §4.1).
//!
//! Reader/writer connection split, PRAGMA bundle, and the
//! `directories`-based default data path are carried over from the
//! teacher's `Storage` almost unchanged — only the schema and the
//! repository methods on top of it are new, reshaped around
//! sessions/observations/pending-jobs/summaries/entities instead of
//! knowledge nodes.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU64;
use std::sync::Mutex;

static MEMDB_COUNTER: AtomicU64 = AtomicU64::new(0);

use crate::model::{
    Entity, EntityType, Observation, ObservationType, Pagination, PendingJob, PendingJobStatus,
    RecallState, Relation, SearchFilter, Session, SessionStatus, SessionSummary,
};
use crate::search::sanitize_fts5_query;

#[cfg(feature = "vector-search")]
use crate::search::VectorIndex;

/// Store error type (spec.md §7's "Storage error" and "Not found" kinds).
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("initialization error: {0}")]
    Init(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for crate::error::MemoriaError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => crate::error::MemoriaError::NotFound(msg),
            StoreError::Conflict(msg) => crate::error::MemoriaError::Conflict(msg),
            other => crate::error::MemoriaError::Storage(other.to_string()),
        }
    }
}

/// Aggregate counts exposed by `Store::stats` (spec.md §4.1, §7's
/// "operational endpoints expose counts").
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StoreStats {
    pub total_observations: u64,
    pub current_observations: u64,
    pub superseded_observations: u64,
    pub tombstoned_observations: u64,
    pub total_sessions: u64,
    pub pending_count: u64,
    pub processing_count: u64,
    pub failed_count: u64,
    pub embedding_count: u64,
    pub vector_available: bool,
}

/// Embedded relational + FTS + vector storage for one project (spec.md
/// §4.1). `Store::open` lays down schema, opts into WAL, and reports
/// whether the vector facility (the `vector-search` feature, compiled in
/// at build time) is available.
pub struct Store {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    vector_available: bool,
    #[cfg(feature = "vector-search")]
    vector_indexes: Mutex<HashMap<ObservationType, VectorIndex>>,
}

fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA mmap_size = 268435456;",
    )?;
    Ok(())
}

fn encode_set(set: &BTreeSet<String>) -> String {
    serde_json::to_string(set).unwrap_or_else(|_| "[]".to_string())
}

fn decode_set(raw: &str) -> BTreeSet<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn encode_vec(v: &[String]) -> String {
    serde_json::to_string(v).unwrap_or_else(|_| "[]".to_string())
}

fn decode_vec(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn encode_vector(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode_vector(raw: &[u8]) -> Vec<f32> {
    raw.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn observation_from_row(row: &Row<'_>) -> rusqlite::Result<Observation> {
    let type_str: String = row.get("observation_type")?;
    let facts_raw: String = row.get("facts")?;
    let concepts_raw: String = row.get("concepts")?;
    let files_read_raw: String = row.get("files_read")?;
    let files_modified_raw: String = row.get("files_modified")?;
    let importance: i64 = row.get("importance")?;
    Ok(Observation {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        observation_type: ObservationType::parse_name(&type_str),
        title: row.get("title")?,
        subtitle: row.get("subtitle")?,
        narrative: row.get("narrative")?,
        facts: decode_vec(&facts_raw),
        concepts: decode_set(&concepts_raw),
        files_read: decode_set(&files_read_raw),
        files_modified: decode_set(&files_modified_raw),
        tool_name: row.get("tool_name")?,
        created_at: row.get("created_at")?,
        token_count: row.get::<_, i64>("token_count")? as u32,
        importance: Observation::clamp_importance(importance),
        revision_of: row.get("revision_of")?,
        superseded_by: row.get("superseded_by")?,
        superseded_at: row.get("superseded_at")?,
        deleted_at: row.get("deleted_at")?,
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    let status: String = row.get("status")?;
    Ok(Session {
        id: row.get("id")?,
        project_path: row.get("project_path")?,
        started_at: row.get("started_at")?,
        ended_at: row.get("ended_at")?,
        status: SessionStatus::parse_name(&status),
        observation_count: row.get::<_, i64>("observation_count")? as u32,
        summary_ref: row.get("summary_ref")?,
    })
}

fn pending_job_from_row(row: &Row<'_>) -> rusqlite::Result<PendingJob> {
    let status: String = row.get("status")?;
    Ok(PendingJob {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        tool_name: row.get("tool_name")?,
        raw_output: row.get("raw_output")?,
        call_id: row.get("call_id")?,
        status: PendingJobStatus::parse_name(&status),
        attempts: row.get::<_, i64>("attempts")? as u32,
        last_error: row.get("last_error")?,
        enqueued_at: row.get("enqueued_at")?,
        last_transition_at: row.get("last_transition_at")?,
    })
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<SessionSummary> {
    let decisions_raw: String = row.get("key_decisions")?;
    let files_raw: String = row.get("files_modified")?;
    let concepts_raw: String = row.get("concepts")?;
    Ok(SessionSummary {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        text: row.get("text")?,
        key_decisions: decode_vec(&decisions_raw),
        files_modified: decode_set(&files_raw),
        concepts: decode_set(&concepts_raw),
        token_count: row.get::<_, i64>("token_count")? as u32,
        created_at: row.get("created_at")?,
    })
}

fn entity_from_row(row: &Row<'_>) -> rusqlite::Result<Entity> {
    let type_str: String = row.get("entity_type")?;
    Ok(Entity {
        id: row.get("id")?,
        name: row.get("name")?,
        entity_type: EntityType::parse_name(&type_str),
        created_at: row.get("created_at")?,
    })
}

/// `superseded_by IS NULL AND deleted_at IS NULL` is "current"; other
/// states are additive audit views (spec.md §4.5).
fn state_predicate(state: RecallState) -> &'static str {
    match state {
        RecallState::Current => "superseded_by IS NULL AND deleted_at IS NULL",
        RecallState::History => "1=1",
        RecallState::TombstonedOnly => "deleted_at IS NOT NULL",
        RecallState::SupersededOnly => "superseded_by IS NOT NULL AND deleted_at IS NULL",
    }
}

impl Store {
    /// Default data path when the host doesn't supply one:
    /// `<project_root>/.memory/memory.db` per spec.md §6.
    pub fn default_path(project_root: &Path) -> PathBuf {
        project_root.join(".memory").join("memory.db")
    }

    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let writer_conn = Connection::open(path)?;
        configure_connection(&writer_conn)?;
        super::migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(path)?;
        configure_connection(&reader_conn)?;

        #[cfg(feature = "vector-search")]
        let vector_available = true;
        #[cfg(not(feature = "vector-search"))]
        let vector_available = false;

        let store = Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
            vector_available,
            #[cfg(feature = "vector-search")]
            vector_indexes: Mutex::new(HashMap::new()),
        };

        #[cfg(feature = "vector-search")]
        store.load_vector_indexes()?;

        Ok(store)
    }

    /// In-memory store for tests that don't need on-disk persistence. Uses
    /// a uniquely-named shared-cache memory database so the reader
    /// connection sees the writer's tables instead of a blank database of
    /// its own, and so concurrently-running tests don't collide.
    pub fn open_in_memory() -> Result<Self> {
        let id = MEMDB_COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let uri = format!("file:memoria-test-{id}?mode=memory&cache=shared");

        let writer_conn = Connection::open(&uri)?;
        configure_connection(&writer_conn)?;
        super::migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(&uri)?;
        configure_connection(&reader_conn)?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
            vector_available: cfg!(feature = "vector-search"),
            #[cfg(feature = "vector-search")]
            vector_indexes: Mutex::new(HashMap::new()),
        })
    }

    pub fn vector_available(&self) -> bool {
        self.vector_available
    }

    #[cfg(feature = "vector-search")]
    fn load_vector_indexes(&self) -> Result<()> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let mut stmt = reader.prepare(
            "SELECT o.id, o.observation_type, e.vector FROM embeddings e
             JOIN observations o ON o.id = e.observation_id
             WHERE o.superseded_by IS NULL AND o.deleted_at IS NULL",
        )?;
        let rows: Vec<(String, String, Vec<u8>)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);
        drop(reader);

        let mut indexes = self.vector_indexes.lock().expect("vector index lock poisoned");
        for (id, type_str, raw) in rows {
            let obs_type = ObservationType::parse_name(&type_str);
            let vector = decode_vector(&raw);
            let index = indexes.entry(obs_type).or_insert_with(|| VectorIndex::new().expect("vector index init"));
            let _ = index.add(&id, &vector);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    pub fn create_session(&self, session: &Session) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            "INSERT INTO sessions (id, project_path, started_at, ended_at, status, observation_count, summary_ref)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO NOTHING",
            params![
                session.id,
                session.project_path,
                session.started_at,
                session.ended_at,
                session.status.as_str(),
                session.observation_count,
                session.summary_ref,
            ],
        )?;
        Ok(())
    }

    pub fn get_session(&self, id: &str) -> Result<Session> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        reader
            .query_row("SELECT * FROM sessions WHERE id = ?1", [id], session_from_row)
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))
    }

    pub fn update_session_status(&self, id: &str, status: SessionStatus, ended_at: Option<DateTime<Utc>>) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            "UPDATE sessions SET status = ?1, ended_at = COALESCE(?2, ended_at) WHERE id = ?3",
            params![status.as_str(), ended_at, id],
        )?;
        Ok(())
    }

    pub fn set_summary_ref(&self, session_id: &str, summary_id: &str) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute("UPDATE sessions SET summary_ref = ?1 WHERE id = ?2", params![summary_id, session_id])?;
        Ok(())
    }

    pub fn list_sessions(&self, pagination: Pagination) -> Result<Vec<Session>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let mut stmt =
            reader.prepare("SELECT * FROM sessions ORDER BY started_at DESC LIMIT ?1 OFFSET ?2")?;
        let rows = stmt
            .query_map(params![pagination.limit, pagination.offset], session_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    // ------------------------------------------------------------------
    // Observations
    // ------------------------------------------------------------------

    /// Inserts an observation, its embedding (if any), and keeps the FTS
    /// shadow table and vector index in sync — all inside one
    /// transaction, per spec.md §4.1's "transactional writes" requirement.
    /// Also increments the parent session's denormalized observation count.
    pub fn create_observation_with_embedding(
        &self,
        observation: &Observation,
        embedding: Option<(&[f32], &str)>,
    ) -> Result<()> {
        let mut writer = self.writer.lock().expect("writer lock poisoned");
        let tx = writer.transaction()?;
        tx.execute(
            "INSERT INTO observations
                (id, session_id, observation_type, title, subtitle, narrative, facts, concepts,
                 files_read, files_modified, tool_name, created_at, token_count, importance,
                 revision_of, superseded_by, superseded_at, deleted_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18)",
            params![
                observation.id,
                observation.session_id,
                observation.observation_type.as_str(),
                observation.title,
                observation.subtitle,
                observation.narrative,
                encode_vec(&observation.facts),
                encode_set(&observation.concepts),
                encode_set(&observation.files_read),
                encode_set(&observation.files_modified),
                observation.tool_name,
                observation.created_at,
                observation.token_count,
                observation.importance,
                observation.revision_of,
                observation.superseded_by,
                observation.superseded_at,
                observation.deleted_at,
            ],
        )?;
        tx.execute(
            "UPDATE sessions SET observation_count = observation_count + 1 WHERE id = ?1",
            [&observation.session_id],
        )?;
        if let Some((vector, model)) = embedding {
            tx.execute(
                "INSERT INTO embeddings (observation_id, vector, dimensions, model) VALUES (?1, ?2, ?3, ?4)",
                params![observation.id, encode_vector(vector), vector.len() as i64, model],
            )?;
        }
        tx.commit()?;
        drop(writer);

        #[cfg(feature = "vector-search")]
        if let Some((vector, _model)) = embedding {
            let mut indexes = self.vector_indexes.lock().expect("vector index lock poisoned");
            let index = indexes
                .entry(observation.observation_type)
                .or_insert_with(|| VectorIndex::new().expect("vector index init"));
            let _ = index.add(&observation.id, vector);
        }

        Ok(())
    }

    pub fn create_observation(&self, observation: &Observation) -> Result<()> {
        self.create_observation_with_embedding(observation, None)
    }

    pub fn set_embedding(&self, observation_id: &str, vector: &[f32], model: &str) -> Result<()> {
        let obs_type = {
            let writer = self.writer.lock().expect("writer lock poisoned");
            writer.execute(
                "INSERT INTO embeddings (observation_id, vector, dimensions, model) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(observation_id) DO UPDATE SET vector = excluded.vector, dimensions = excluded.dimensions, model = excluded.model",
                params![observation_id, encode_vector(vector), vector.len() as i64, model],
            )?;
            let type_str: String =
                writer.query_row("SELECT observation_type FROM observations WHERE id = ?1", [observation_id], |r| r.get(0))?;
            ObservationType::parse_name(&type_str)
        };

        #[cfg(feature = "vector-search")]
        {
            let mut indexes = self.vector_indexes.lock().expect("vector index lock poisoned");
            let index = indexes.entry(obs_type).or_insert_with(|| VectorIndex::new().expect("vector index init"));
            let _ = index.add(observation_id, vector);
        }
        #[cfg(not(feature = "vector-search"))]
        let _ = obs_type;

        Ok(())
    }

    /// Atomically sets `old.superseded_by = new_id` and `old.superseded_at
    /// = now`, and the back-edge `new.revision_of = old_id` (spec.md
    /// §4.1's "atomic: set both edges and timestamp" — both directions of
    /// the same supersede relationship, so `getLineage` can walk either
    /// end of it). Fails with `Conflict` if `old_id` is not current, since
    /// a row can only be superseded once (spec.md §3 invariant).
    pub fn supersede(&self, old_id: &str, new_id: &str) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        let tx = writer.unchecked_transaction()?;
        let current: Option<(Option<String>, Option<String>)> = tx
            .query_row("SELECT superseded_by, deleted_at FROM observations WHERE id = ?1", [old_id], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?;
        match current {
            None => return Err(StoreError::NotFound(format!("observation {old_id}"))),
            Some((Some(_), _)) | Some((_, Some(_))) => {
                return Err(StoreError::Conflict(format!("observation {old_id} is not current")));
            }
            Some((None, None)) => {}
        }
        let now = crate::model::now();
        tx.execute(
            "UPDATE observations SET superseded_by = ?1, superseded_at = ?2 WHERE id = ?3",
            params![new_id, now, old_id],
        )?;
        tx.execute("UPDATE observations SET revision_of = ?1 WHERE id = ?2", params![old_id, new_id])?;
        tx.commit()?;
        drop(writer);

        #[cfg(feature = "vector-search")]
        self.remove_from_vector_index(old_id)?;

        Ok(())
    }

    pub fn tombstone(&self, ids: &[String]) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        let tx = writer.unchecked_transaction()?;
        let now = crate::model::now();
        for id in ids {
            tx.execute("UPDATE observations SET deleted_at = ?1 WHERE id = ?2", params![now, id])?;
        }
        tx.commit()?;
        drop(writer);

        #[cfg(feature = "vector-search")]
        for id in ids {
            self.remove_from_vector_index(id)?;
        }

        Ok(())
    }

    #[cfg(feature = "vector-search")]
    fn remove_from_vector_index(&self, id: &str) -> Result<()> {
        let mut indexes = self.vector_indexes.lock().expect("vector index lock poisoned");
        for index in indexes.values_mut() {
            let _ = index.remove(id);
        }
        Ok(())
    }

    /// Reads a row by id regardless of lineage state — lineage walks and
    /// the dedup resolver both need to see superseded/tombstoned rows.
    pub fn get_by_id(&self, id: &str) -> Result<Observation> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        reader
            .query_row("SELECT * FROM observations WHERE id = ?1", [id], observation_from_row)
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("observation {id}")))
    }

    pub fn list_by_filter(&self, filter: &SearchFilter, pagination: Pagination) -> Result<Vec<Observation>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let (clause, values) = build_filter_clause(filter);
        let sql = format!(
            "SELECT * FROM observations WHERE {clause} ORDER BY created_at DESC LIMIT ?{next} OFFSET ?{next2}",
            next = values.len() + 1,
            next2 = values.len() + 2,
        );
        let mut stmt = reader.prepare(&sql)?;
        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = values;
        all_params.push(Box::new(pagination.limit));
        all_params.push(Box::new(pagination.offset));
        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), observation_from_row)?.filter_map(|r| r.ok()).collect();
        Ok(rows)
    }

    /// Pure-filter (empty text) queries reuse this for `strategy=filter-only`
    /// in the search engine. Keyword search joins through `observations_fts`.
    pub fn search_fts(&self, query_text: &str, filter: &SearchFilter, limit: usize) -> Result<Vec<(Observation, String, f32)>> {
        let sanitized = sanitize_fts5_query(query_text);
        if sanitized.is_empty() {
            return Ok(Vec::new());
        }
        let reader = self.reader.lock().expect("reader lock poisoned");
        let (clause, values) = build_filter_clause(filter);
        let sql = format!(
            "SELECT o.*, bm25(observations_fts) AS rank,
                    snippet(observations_fts, 1, '[', ']', '...', 12) AS snippet
             FROM observations_fts
             JOIN observations o ON o.rowid = observations_fts.rowid
             WHERE observations_fts MATCH ?1 AND {clause}
             ORDER BY rank ASC
             LIMIT ?{limit_idx}",
            limit_idx = values.len() + 2,
        );
        let mut stmt = reader.prepare(&sql)?;
        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(sanitized)];
        all_params.extend(values);
        all_params.push(Box::new(limit as i64));
        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|b| b.as_ref()).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), |row| {
                let obs = observation_from_row(row)?;
                let rank: f64 = row.get("rank")?;
                let snippet: String = row.get("snippet")?;
                // bm25() is negative and smaller-is-better; flip and clamp
                // into a positive "higher is better" rank for fusion.
                Ok((obs, snippet, (-rank).max(0.0) as f32))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Vector KNN restricted to the same observation type and to current
    /// rows (spec.md §4.1: "keyed by observation type"; §4.4 restricts
    /// dedup comparisons the same way). Returns an empty list, not an
    /// error, when the vector facility isn't compiled in — callers
    /// degrade to FTS-only per spec.md §3.
    #[cfg(feature = "vector-search")]
    pub fn find_similar(
        &self,
        vector: &[f32],
        observation_type: ObservationType,
        min_cosine: f32,
        limit: usize,
    ) -> Result<Vec<(Observation, f32)>> {
        let candidates = {
            let indexes = self.vector_indexes.lock().expect("vector index lock poisoned");
            match indexes.get(&observation_type) {
                Some(index) => index.search_with_threshold(vector, limit, min_cosine).map_err(|e| StoreError::Init(e.to_string()))?,
                None => Vec::new(),
            }
        };
        let mut out = Vec::with_capacity(candidates.len());
        for (id, score) in candidates {
            if let Ok(obs) = self.get_by_id(&id) {
                if obs.is_current() {
                    out.push((obs, score));
                }
            }
        }
        out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(out)
    }

    #[cfg(not(feature = "vector-search"))]
    pub fn find_similar(
        &self,
        _vector: &[f32],
        _observation_type: ObservationType,
        _min_cosine: f32,
        _limit: usize,
    ) -> Result<Vec<(Observation, f32)>> {
        Ok(Vec::new())
    }

    /// All current observations that have an embedding, for
    /// `maintenance::rebuild`'s re-indexing pass.
    pub fn get_with_embeddings(&self, limit: usize) -> Result<Vec<(Observation, Vec<f32>)>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let mut stmt = reader.prepare(
            "SELECT o.*, e.vector FROM observations o
             JOIN embeddings e ON e.observation_id = o.id
             WHERE o.superseded_by IS NULL AND o.deleted_at IS NULL
             ORDER BY o.created_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                let obs = observation_from_row(row)?;
                let raw: Vec<u8> = row.get("vector")?;
                Ok((obs, decode_vector(&raw)))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let total_observations: i64 = reader.query_row("SELECT COUNT(*) FROM observations", [], |r| r.get(0))?;
        let current_observations: i64 = reader.query_row(
            "SELECT COUNT(*) FROM observations WHERE superseded_by IS NULL AND deleted_at IS NULL",
            [],
            |r| r.get(0),
        )?;
        let superseded_observations: i64 = reader.query_row(
            "SELECT COUNT(*) FROM observations WHERE superseded_by IS NOT NULL AND deleted_at IS NULL",
            [],
            |r| r.get(0),
        )?;
        let tombstoned_observations: i64 =
            reader.query_row("SELECT COUNT(*) FROM observations WHERE deleted_at IS NOT NULL", [], |r| r.get(0))?;
        let total_sessions: i64 = reader.query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))?;
        let pending_count: i64 =
            reader.query_row("SELECT COUNT(*) FROM pending_jobs WHERE status = 'pending'", [], |r| r.get(0))?;
        let processing_count: i64 =
            reader.query_row("SELECT COUNT(*) FROM pending_jobs WHERE status = 'processing'", [], |r| r.get(0))?;
        let failed_count: i64 =
            reader.query_row("SELECT COUNT(*) FROM pending_jobs WHERE status = 'failed'", [], |r| r.get(0))?;
        let embedding_count: i64 = reader.query_row("SELECT COUNT(*) FROM embeddings", [], |r| r.get(0))?;

        Ok(StoreStats {
            total_observations: total_observations as u64,
            current_observations: current_observations as u64,
            superseded_observations: superseded_observations as u64,
            tombstoned_observations: tombstoned_observations as u64,
            total_sessions: total_sessions as u64,
            pending_count: pending_count as u64,
            processing_count: processing_count as u64,
            failed_count: failed_count as u64,
            embedding_count: embedding_count as u64,
            vector_available: self.vector_available,
        })
    }

    // ------------------------------------------------------------------
    // Pending jobs
    // ------------------------------------------------------------------

    /// Inserts a pending row; returns `None` if `(session_id, call_id)`
    /// already exists (spec.md §3's idempotency invariant) rather than
    /// erroring, since a duplicate submission is expected, not exceptional.
    pub fn enqueue_pending_job(&self, session_id: &str, tool_name: &str, raw_output: &str, call_id: &str) -> Result<Option<PendingJob>> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        let now = crate::model::now();
        let existing: Option<i64> = writer
            .query_row(
                "SELECT id FROM pending_jobs WHERE session_id = ?1 AND call_id = ?2",
                params![session_id, call_id],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Ok(None);
        }
        writer.execute(
            "INSERT INTO pending_jobs (session_id, tool_name, raw_output, call_id, status, attempts, enqueued_at, last_transition_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?5)",
            params![session_id, tool_name, raw_output, call_id, now],
        )?;
        let id = writer.last_insert_rowid();
        drop(writer);
        Ok(Some(self.get_pending_job_by_id(id)?))
    }

    pub fn get_pending_job_by_id(&self, id: i64) -> Result<PendingJob> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        reader
            .query_row("SELECT * FROM pending_jobs WHERE id = ?1", [id], pending_job_from_row)
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("pending job {id}")))
    }

    /// Claims up to `batch_size` pending rows in FIFO order, transitioning
    /// each to `processing` in one transaction so a concurrent claimer
    /// never double-claims (spec.md §4.2, §5's "processing flag" guards
    /// the call count, this guards row-level correctness underneath it).
    pub fn claim_batch(&self, batch_size: u32) -> Result<Vec<PendingJob>> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        let tx = writer.unchecked_transaction()?;
        let ids: Vec<i64> = {
            let mut stmt =
                tx.prepare("SELECT id FROM pending_jobs WHERE status = 'pending' ORDER BY enqueued_at ASC, id ASC LIMIT ?1")?;
            stmt.query_map([batch_size], |row| row.get(0))?.filter_map(|r| r.ok()).collect()
        };
        let now = crate::model::now();
        let mut claimed = Vec::with_capacity(ids.len());
        for id in &ids {
            tx.execute(
                "UPDATE pending_jobs SET status = 'processing', last_transition_at = ?1 WHERE id = ?2",
                params![now, id],
            )?;
            claimed.push(tx.query_row("SELECT * FROM pending_jobs WHERE id = ?1", [id], pending_job_from_row)?);
        }
        tx.commit()?;
        Ok(claimed)
    }

    pub fn complete_pending_job(&self, id: i64) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        let now = crate::model::now();
        writer.execute(
            "UPDATE pending_jobs SET status = 'completed', last_transition_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        Ok(())
    }

    pub fn fail_pending_job(&self, id: i64, error: &str) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        let now = crate::model::now();
        writer.execute(
            "UPDATE pending_jobs SET status = 'failed', last_error = ?1, attempts = attempts + 1, last_transition_at = ?2 WHERE id = ?3",
            params![error, now, id],
        )?;
        Ok(())
    }

    /// Increments `attempts` without changing status, used between retry
    /// attempts inside a single `processBatch` call.
    pub fn record_attempt(&self, id: i64) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute("UPDATE pending_jobs SET attempts = attempts + 1 WHERE id = ?1", [id])?;
        Ok(())
    }

    /// Resets rows stuck in `processing` longer than `threshold` back to
    /// `pending`, preserving their original enqueue order (spec.md §4.2's
    /// crash-recovery rule). Returns how many rows were reset.
    pub fn release_stale(&self, threshold: Duration) -> Result<u32> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        let cutoff = crate::model::now() - threshold;
        let now = crate::model::now();
        let changed = writer.execute(
            "UPDATE pending_jobs SET status = 'pending', last_transition_at = ?1
             WHERE status = 'processing' AND last_transition_at < ?2",
            params![now, cutoff],
        )?;
        Ok(changed as u32)
    }

    // ------------------------------------------------------------------
    // Summaries
    // ------------------------------------------------------------------

    pub fn create_summary(&self, summary: &SessionSummary) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            "INSERT INTO session_summaries (id, session_id, text, key_decisions, files_modified, concepts, token_count, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            params![
                summary.id,
                summary.session_id,
                summary.text,
                encode_vec(&summary.key_decisions),
                encode_set(&summary.files_modified),
                encode_set(&summary.concepts),
                summary.token_count,
                summary.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_summary_by_session(&self, session_id: &str) -> Result<Option<SessionSummary>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        reader
            .query_row("SELECT * FROM session_summaries WHERE session_id = ?1", [session_id], summary_from_row)
            .optional()
            .map_err(StoreError::from)
    }

    // ------------------------------------------------------------------
    // Entities / relations (optional graph-hop signal, spec.md §3)
    // ------------------------------------------------------------------

    pub fn upsert_entity(&self, name: &str, entity_type: EntityType) -> Result<Entity> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        let existing: Option<Entity> = writer
            .query_row(
                "SELECT * FROM entities WHERE name = ?1 AND entity_type = ?2",
                params![name, entity_type.as_str()],
                entity_from_row,
            )
            .optional()?;
        if let Some(entity) = existing {
            return Ok(entity);
        }
        let entity = Entity::new(name, entity_type);
        writer.execute(
            "INSERT INTO entities (id, name, entity_type, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![entity.id, entity.name, entity.entity_type.as_str(), entity.created_at],
        )?;
        Ok(entity)
    }

    pub fn create_relation(&self, relation: &Relation) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            "INSERT INTO relations (id, source_entity_id, target_entity_id, relation_type, evidenced_by_observation_id, created_at)
             VALUES (?1,?2,?3,?4,?5,?6)",
            params![
                relation.id,
                relation.source_entity_id,
                relation.target_entity_id,
                relation.relation_type,
                relation.evidenced_by_observation_id,
                relation.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn find_entity_by_name(&self, name: &str) -> Result<Option<Entity>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        reader.query_row("SELECT * FROM entities WHERE name = ?1 LIMIT 1", [name], entity_from_row).optional().map_err(StoreError::from)
    }

    /// Builds the adjacency maps `search::graph::EntityGraph` traverses:
    /// entity -> neighboring entities (via shared relations) and entity ->
    /// observation ids it evidences.
    pub fn entity_graph_maps(&self) -> Result<(HashMap<String, Vec<String>>, HashMap<String, Vec<String>>)> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let mut neighbors: HashMap<String, Vec<String>> = HashMap::new();
        let mut observations: HashMap<String, Vec<String>> = HashMap::new();

        let mut stmt = reader.prepare("SELECT source_entity_id, target_entity_id, evidenced_by_observation_id FROM relations")?;
        let rows: Vec<(String, String, String)> =
            stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?.filter_map(|r| r.ok()).collect();
        for (source, target, obs_id) in rows {
            neighbors.entry(source.clone()).or_default().push(target.clone());
            neighbors.entry(target.clone()).or_default().push(source.clone());
            observations.entry(source).or_default().push(obs_id.clone());
            observations.entry(target).or_default().push(obs_id);
        }
        Ok((neighbors, observations))
    }

    // ------------------------------------------------------------------
    // Maintenance (spec.md §6)
    // ------------------------------------------------------------------

    /// Tombstoned rows older than `cutoff`, for `maintenance::clean`'s
    /// dry-run/apply split.
    pub fn tombstones_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let mut stmt = reader.prepare("SELECT id FROM observations WHERE deleted_at IS NOT NULL AND deleted_at < ?1")?;
        let ids = stmt.query_map([cutoff], |row| row.get(0))?.filter_map(|r| r.ok()).collect();
        Ok(ids)
    }

    pub fn hard_delete(&self, ids: &[String]) -> Result<u32> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        let mut count = 0u32;
        for id in ids {
            count += writer.execute("DELETE FROM observations WHERE id = ?1", [id])? as u32;
        }
        Ok(count)
    }

    pub fn vacuum(&self) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute_batch("VACUUM;")?;
        Ok(())
    }

    pub fn rebuild_fts(&self) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute_batch("INSERT INTO observations_fts(observations_fts) VALUES ('rebuild');")?;
        Ok(())
    }
}

/// Renders a `SearchFilter` into a `WHERE`-clause fragment plus positional
/// parameters. Always includes the lineage-state predicate — callers
/// never get to skip it silently (spec.md §4.5).
fn build_filter_clause(filter: &SearchFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
    let mut clauses = vec![state_predicate(filter.state).to_string()];
    let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(t) = filter.observation_type {
        clauses.push(format!("observation_type = ?{}", values.len() + 1));
        values.push(Box::new(t.as_str().to_string()));
    }
    if let Some(min) = filter.min_importance {
        clauses.push(format!("importance >= ?{}", values.len() + 1));
        values.push(Box::new(min as i64));
    }
    if let Some(max) = filter.max_importance {
        clauses.push(format!("importance <= ?{}", values.len() + 1));
        values.push(Box::new(max as i64));
    }
    if let Some(since) = filter.since {
        clauses.push(format!("created_at >= ?{}", values.len() + 1));
        values.push(Box::new(since));
    }
    if let Some(until) = filter.until {
        clauses.push(format!("created_at <= ?{}", values.len() + 1));
        values.push(Box::new(until));
    }
    if let Some(session_id) = &filter.session_id {
        clauses.push(format!("session_id = ?{}", values.len() + 1));
        values.push(Box::new(session_id.clone()));
    }
    for concept in &filter.concepts {
        clauses.push(format!("concepts LIKE ?{}", values.len() + 1));
        values.push(Box::new(format!("%{concept}%")));
    }
    for file in &filter.files {
        clauses.push(format!("(files_read LIKE ?{a} OR files_modified LIKE ?{a})", a = values.len() + 1));
        values.push(Box::new(format!("%{file}%")));
    }

    (clauses.join(" AND "), values)
}
