//! Maintenance actions (spec.md §6): dry-run + apply variants of `clean`
//! (remove tombstones past retention, vacuum) and `rebuild` (regenerate
//! FTS + embeddings). These are the housekeeping bounds
//! `retentionDays`/`maxDatabaseSizeMb` name in config — nothing here runs
//! on a timer; a host calls these explicitly (e.g. from a CLI subcommand
//! or a periodic task it owns).

use chrono::Duration as ChronoDuration;

use crate::model::now;
use crate::store::Store;

#[cfg(feature = "embeddings")]
use crate::embeddings::Embedder;

/// What a `clean` pass would do (or did), depending on `apply`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CleanReport {
    pub tombstones_found: u32,
    pub tombstones_removed: u32,
    pub vacuumed: bool,
    pub dry_run: bool,
}

/// `clean(retentionDays, dryRun)`: hard-deletes tombstoned observations
/// older than `retention_days` and, on apply, runs `VACUUM`. A dry run
/// reports counts without mutating anything.
pub fn clean(store: &Store, retention_days: u32, dry_run: bool) -> crate::Result<CleanReport> {
    let cutoff = now() - ChronoDuration::days(retention_days as i64);
    let candidates = store.tombstones_older_than(cutoff)?;
    let found = candidates.len() as u32;

    if dry_run || found == 0 {
        return Ok(CleanReport { tombstones_found: found, tombstones_removed: 0, vacuumed: false, dry_run });
    }

    let removed = store.hard_delete(&candidates)?;
    store.vacuum()?;
    Ok(CleanReport { tombstones_found: found, tombstones_removed: removed, vacuumed: true, dry_run: false })
}

/// What a `rebuild` pass would do (or did).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RebuildReport {
    pub fts_rebuilt: bool,
    pub embeddings_candidates: u32,
    pub embeddings_regenerated: u32,
    pub dry_run: bool,
}

/// `rebuild(dryRun)`: regenerates the FTS5 shadow index and, if an
/// `Embedder` is supplied and ready, re-embeds every current observation
/// that already carries one (spec.md §4.1's "`getWithEmbeddings(limit)`
/// for re-indexing"). A dry run only reports how many rows would be
/// touched.
#[cfg(feature = "embeddings")]
pub fn rebuild(store: &Store, embedder: Option<&dyn Embedder>, limit: usize, dry_run: bool) -> crate::Result<RebuildReport> {
    let candidates = store.get_with_embeddings(limit)?;
    let candidate_count = candidates.len() as u32;

    if dry_run {
        return Ok(RebuildReport {
            fts_rebuilt: false,
            embeddings_candidates: candidate_count,
            embeddings_regenerated: 0,
            dry_run: true,
        });
    }

    store.rebuild_fts()?;

    let mut regenerated = 0u32;
    if let Some(embedder) = embedder {
        if embedder.is_ready() {
            for (obs, _old_vector) in &candidates {
                let text = format!("{} {}", obs.title, obs.narrative);
                match embedder.embed(&text) {
                    Ok(vector) => {
                        if store.set_embedding(&obs.id, &vector, "nomic-embed-text-v1.5").is_ok() {
                            regenerated += 1;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, observation_id = obs.id, "failed to re-embed during rebuild");
                    }
                }
            }
        }
    }

    Ok(RebuildReport {
        fts_rebuilt: true,
        embeddings_candidates: candidate_count,
        embeddings_regenerated: regenerated,
        dry_run: false,
    })
}

#[cfg(not(feature = "embeddings"))]
pub fn rebuild(store: &Store, _limit: usize, dry_run: bool) -> crate::Result<RebuildReport> {
    if dry_run {
        return Ok(RebuildReport { dry_run: true, ..Default::default() });
    }
    store.rebuild_fts()?;
    Ok(RebuildReport { fts_rebuilt: true, dry_run: false, ..Default::default() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Observation, ObservationDraft, ObservationType, Session};

    fn seed_tombstoned(store: &Store) -> String {
        let session = Session::new("s1", "/tmp");
        store.create_session(&session).unwrap();
        let draft = ObservationDraft {
            observation_type: Some(ObservationType::Discovery.as_str().to_string()),
            title: "old finding".into(),
            narrative: "narrative".into(),
            ..Default::default()
        };
        let mut obs: Observation = draft.into_observation("s1", "Read");
        obs.created_at = now() - ChronoDuration::days(200);
        store.create_observation(&obs).unwrap();
        store.tombstone(&[obs.id.clone()]).unwrap();
        obs.id
    }

    #[test]
    fn dry_run_clean_reports_without_deleting() {
        let store = Store::open_in_memory().unwrap();
        seed_tombstoned(&store);
        // tombstone's deleted_at is "now", not backdated, so with a long
        // retention window nothing should be found yet.
        let report = clean(&store, 90, true).unwrap();
        assert_eq!(report.tombstones_removed, 0);
        assert!(report.dry_run);
    }

    #[test]
    fn clean_with_zero_retention_removes_tombstones() {
        let store = Store::open_in_memory().unwrap();
        seed_tombstoned(&store);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let report = clean(&store, 0, false).unwrap();
        assert_eq!(report.tombstones_removed, 1);
        assert!(report.vacuumed);
    }
}
