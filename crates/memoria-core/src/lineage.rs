//! Lineage Manager (spec.md §4.5): the sole writer of `superseded_by`/
//! `deleted_at`, and the read-side helpers built on top of them.
//! `supersede`/`tombstone` are themselves implemented as single
//! transactions inside [`crate::store::Store`] — this module is a thin,
//! stateless wrapper that adds the chain-walk and diff operations the
//! store has no business knowing about.

use std::collections::BTreeSet;

use crate::model::Observation;
use crate::store::Store;

/// One link in a lineage chain, as returned by [`get_lineage`].
#[derive(Debug, Clone)]
pub struct LineageLink {
    pub observation: Observation,
}

/// `getRevisionDiff(a, b)` (spec.md §4.5): a plain, dependency-free
/// set-diff over two observations' concepts/files, not an LLM call.
#[derive(Debug, Clone)]
pub struct RevisionDiff {
    pub added_concepts: BTreeSet<String>,
    pub removed_concepts: BTreeSet<String>,
    pub added_files: BTreeSet<String>,
    pub removed_files: BTreeSet<String>,
    pub narrative_changed: bool,
}

/// Atomic supersede/tombstone plus the two read-side chain operations
/// spec.md §4.5 groups under "Lineage Manager".
pub struct LineageManager<'a> {
    store: &'a Store,
}

impl<'a> LineageManager<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// `supersede(oldId, newId)`: delegates to the store's own transaction
    /// (set `superseded_by` + `superseded_at` atomically).
    pub fn supersede(&self, old_id: &str, new_id: &str) -> crate::Result<()> {
        Ok(self.store.supersede(old_id, new_id)?)
    }

    /// `tombstone(ids)`: delegates to the store's own transaction.
    pub fn tombstone(&self, ids: &[String]) -> crate::Result<()> {
        Ok(self.store.tombstone(ids)?)
    }

    /// Walks `revision_of` backward and `superseded_by` forward from `id`,
    /// tolerating missing predecessors (spec.md §7: "lineage walks
    /// tolerate missing predecessors") by stopping the walk rather than
    /// erroring. Returns the chain ordered oldest-first; cycles are
    /// defended against with a visited-set even though spec.md §8 asserts
    /// none should exist.
    pub fn get_lineage(&self, id: &str) -> crate::Result<Vec<LineageLink>> {
        let Ok(anchor) = self.store.get_by_id(id) else {
            return Ok(Vec::new());
        };

        let mut visited = BTreeSet::new();
        visited.insert(anchor.id.clone());

        // Walk backward through revision_of.
        let mut backward = Vec::new();
        let mut cursor = anchor.revision_of.clone();
        while let Some(prev_id) = cursor {
            if !visited.insert(prev_id.clone()) {
                break;
            }
            let Ok(prev) = self.store.get_by_id(&prev_id) else { break };
            cursor = prev.revision_of.clone();
            backward.push(prev);
        }
        backward.reverse();

        // Walk forward through superseded_by.
        let mut forward = Vec::new();
        let mut cursor = anchor.superseded_by.clone();
        while let Some(next_id) = cursor {
            if !visited.insert(next_id.clone()) {
                break;
            }
            let Ok(next) = self.store.get_by_id(&next_id) else { break };
            cursor = next.superseded_by.clone();
            forward.push(next);
        }

        let mut chain = backward;
        chain.push(anchor);
        chain.extend(forward);
        Ok(chain.into_iter().map(|observation| LineageLink { observation }).collect())
    }

    /// `getRevisionDiff(a, b)`.
    pub fn get_revision_diff(&self, a_id: &str, b_id: &str) -> crate::Result<RevisionDiff> {
        let a = self.store.get_by_id(a_id)?;
        let b = self.store.get_by_id(b_id)?;
        Ok(RevisionDiff {
            added_concepts: b.concepts.difference(&a.concepts).cloned().collect(),
            removed_concepts: a.concepts.difference(&b.concepts).cloned().collect(),
            added_files: b.files_modified.difference(&a.files_modified).cloned().collect(),
            removed_files: a.files_modified.difference(&b.files_modified).cloned().collect(),
            narrative_changed: a.narrative != b.narrative,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ObservationDraft, Session};

    fn setup() -> Store {
        let store = Store::open_in_memory().unwrap();
        store.create_session(&Session::new("s1", "/tmp")).unwrap();
        store
    }

    #[test]
    fn lineage_containment_after_supersede() {
        let store = setup();
        let manager = LineageManager::new(&store);
        let a = ObservationDraft { title: "a".into(), ..Default::default() }.into_observation("s1", "Read");
        let b = ObservationDraft { title: "b".into(), ..Default::default() }.into_observation("s1", "Read");
        store.create_observation(&a).unwrap();
        store.create_observation(&b).unwrap();

        manager.supersede(&a.id, &b.id).unwrap();

        let chain_a = manager.get_lineage(&a.id).unwrap();
        let chain_b = manager.get_lineage(&b.id).unwrap();
        assert_eq!(chain_a.len(), 2);
        assert_eq!(chain_b.len(), 2);
        assert_eq!(chain_a.last().unwrap().observation.id, b.id);

        let refetched_a = store.get_by_id(&a.id).unwrap();
        assert!(!refetched_a.is_current());
        let refetched_b = store.get_by_id(&b.id).unwrap();
        assert!(refetched_b.is_current());
    }

    #[test]
    fn missing_id_returns_empty_chain_not_error() {
        let store = setup();
        let manager = LineageManager::new(&store);
        assert!(manager.get_lineage("does-not-exist").unwrap().is_empty());
    }

    #[test]
    fn revision_diff_reports_added_and_removed_concepts() {
        let store = setup();
        let manager = LineageManager::new(&store);
        let mut a = ObservationDraft { title: "a".into(), ..Default::default() }.into_observation("s1", "Read");
        a.concepts.insert("auth".into());
        a.concepts.insert("jwt".into());
        let mut b = ObservationDraft { title: "b".into(), ..Default::default() }.into_observation("s1", "Read");
        b.concepts.insert("auth".into());
        b.concepts.insert("oauth".into());
        store.create_observation(&a).unwrap();
        store.create_observation(&b).unwrap();

        let diff = manager.get_revision_diff(&a.id, &b.id).unwrap();
        assert!(diff.added_concepts.contains("oauth"));
        assert!(diff.removed_concepts.contains("jwt"));
        assert!(!diff.added_concepts.contains("auth"));
    }
}
