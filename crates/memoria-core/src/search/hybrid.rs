//! Fusing ranked lists from independent signals (FTS5 keyword match, vector
//! KNN, entity graph hops, user-authored memory) into one ranked result set.
//! Reciprocal Rank Fusion is robust to the wildly different score scales
//! these signals produce — a BM25 score and a cosine similarity aren't
//! comparable, but rank position is.

use super::explain::{ExplainRecord, MatchSignal};
use std::collections::HashMap;

/// `1 / (k + rank)` summed across every list a document appears in.
/// `k=60` is the standard TREC default: large enough that rank 1 and rank 2
/// aren't wildly different in contribution, small enough that being absent
/// from a list still costs a document real score.
pub const DEFAULT_RRF_K: f32 = 60.0;

#[derive(Debug, Clone)]
pub struct FusedResult {
    pub id: String,
    pub score: f32,
    pub explain: ExplainRecord,
}

/// One signal's contribution to fusion: its name (for attribution) and its
/// ranked `(id, raw_score)` pairs, already sorted best-first.
pub struct RankedList<'a> {
    pub signal: MatchSignal,
    pub results: &'a [(String, f32)],
}

/// Companion metadata used only for the tie-break, not for scoring: the
/// rest of the pipeline looks these up from the store once candidate ids
/// are known, so fusion stays ignorant of storage.
pub struct TieBreakInfo {
    pub importance: u8,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Fuses any number of ranked lists with Reciprocal Rank Fusion. Ties in
/// the summed RRF score are broken by higher importance, then by more
/// recent `created_at` — both supplied via `tie_break`, looked up by id.
/// Ids absent from `tie_break` sort last among ties (treated as
/// importance 0, epoch start).
pub fn reciprocal_rank_fusion(
    lists: &[RankedList<'_>],
    k: f32,
    tie_break: &HashMap<String, TieBreakInfo>,
) -> Vec<FusedResult> {
    let mut scores: HashMap<String, f32> = HashMap::new();
    let mut explains: HashMap<String, ExplainRecord> = HashMap::new();

    for list in lists {
        for (rank, (id, raw_score)) in list.results.iter().enumerate() {
            let contribution = 1.0 / (k + (rank + 1) as f32);
            *scores.entry(id.clone()).or_insert(0.0) += contribution;
            explains.entry(id.clone()).or_default().record(list.signal, *raw_score);
        }
    }

    let max_possible: f32 = lists.iter().map(|_| 1.0 / (k + 1.0)).sum::<f32>().max(f32::EPSILON);

    let mut fused: Vec<FusedResult> = scores
        .into_iter()
        .map(|(id, raw)| {
            let mut explain = explains.remove(&id).unwrap_or_default();
            let normalized = (raw / max_possible).min(1.0);
            explain.rrf_score = normalized;
            FusedResult { id, score: normalized, explain }
        })
        .collect();

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let ia = tie_break.get(&a.id).map(|t| t.importance).unwrap_or(0);
                let ib = tie_break.get(&b.id).map(|t| t.importance).unwrap_or(0);
                ib.cmp(&ia)
            })
            .then_with(|| {
                let ca = tie_break.get(&a.id).map(|t| t.created_at).unwrap_or(chrono::DateTime::UNIX_EPOCH);
                let cb = tie_break.get(&b.id).map(|t| t.created_at).unwrap_or(chrono::DateTime::UNIX_EPOCH);
                cb.cmp(&ca)
            })
    });

    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn list(ids: &[(&str, f32)]) -> Vec<(String, f32)> {
        ids.iter().map(|(id, score)| (id.to_string(), *score)).collect()
    }

    #[test]
    fn ranked_first_in_every_list_wins() {
        let fts = list(&[("a", 10.0), ("b", 8.0)]);
        let vector = list(&[("a", 0.9), ("c", 0.5)]);
        let lists = vec![
            RankedList { signal: MatchSignal::Fts, results: &fts },
            RankedList { signal: MatchSignal::Vector, results: &vector },
        ];
        let fused = reciprocal_rank_fusion(&lists, DEFAULT_RRF_K, &HashMap::new());
        assert_eq!(fused[0].id, "a");
        assert!(fused[0].explain.matched_by.contains(&MatchSignal::Fts));
        assert!(fused[0].explain.matched_by.contains(&MatchSignal::Vector));
    }

    #[test]
    fn empty_lists_produce_no_results() {
        let lists: Vec<RankedList<'_>> = vec![];
        assert!(reciprocal_rank_fusion(&lists, DEFAULT_RRF_K, &HashMap::new()).is_empty());
    }

    #[test]
    fn scores_are_normalized_into_zero_one() {
        let fts = list(&[("a", 1.0)]);
        let lists = vec![RankedList { signal: MatchSignal::Fts, results: &fts }];
        let fused = reciprocal_rank_fusion(&lists, DEFAULT_RRF_K, &HashMap::new());
        assert!((fused[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn ties_break_on_importance_then_recency() {
        let fts = list(&[("old-important", 1.0), ("new-unimportant", 1.0)]);
        let lists = vec![RankedList { signal: MatchSignal::Fts, results: &fts }];
        let mut tie_break = HashMap::new();
        tie_break.insert(
            "old-important".to_string(),
            TieBreakInfo { importance: 9, created_at: chrono::Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap() },
        );
        tie_break.insert(
            "new-unimportant".to_string(),
            TieBreakInfo { importance: 1, created_at: chrono::Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() },
        );
        let fused = reciprocal_rank_fusion(&lists, DEFAULT_RRF_K, &tie_break);
        assert_eq!(fused[0].id, "old-important");
    }

    #[test]
    fn rrf_matches_the_worked_five_observation_example() {
        // Five observations seeded; the query surfaces "a" at FTS rank 1 /
        // vector rank 2, and "b" at FTS rank 3 / vector rank 1. With k=60:
        // RRF(a) = 1/61 + 1/62, RRF(b) = 1/61 + 1/63, so a outranks b and
        // both carry matchedBy = {fts, vector}.
        let fts = list(&[("a", 9.0), ("e", 7.0), ("b", 6.0), ("c", 4.0), ("d", 2.0)]);
        let vector = list(&[("b", 0.95), ("a", 0.90), ("c", 0.80), ("d", 0.70), ("e", 0.60)]);
        let lists = vec![
            RankedList { signal: MatchSignal::Fts, results: &fts },
            RankedList { signal: MatchSignal::Vector, results: &vector },
        ];
        let fused = reciprocal_rank_fusion(&lists, DEFAULT_RRF_K, &HashMap::new());

        let by_id = |id: &str| fused.iter().find(|f| f.id == id).unwrap();
        let k = DEFAULT_RRF_K;
        let max_possible = 2.0 / (k + 1.0);
        let expected_a = (1.0 / (k + 1.0) + 1.0 / (k + 2.0)) / max_possible;
        let expected_b = (1.0 / (k + 1.0) + 1.0 / (k + 3.0)) / max_possible;
        assert!((by_id("a").score - expected_a).abs() < 1e-6);
        assert!((by_id("b").score - expected_b).abs() < 1e-6);

        let rank_a = fused.iter().position(|f| f.id == "a").unwrap();
        let rank_b = fused.iter().position(|f| f.id == "b").unwrap();
        assert!(rank_a < rank_b, "a must outrank b");

        for id in ["a", "b"] {
            let matched = &by_id(id).explain.matched_by;
            assert!(matched.contains(&MatchSignal::Fts));
            assert!(matched.contains(&MatchSignal::Vector));
        }
    }

    #[test]
    fn three_way_fusion_combines_all_signals() {
        let fts = list(&[("a", 5.0)]);
        let vector = list(&[("b", 0.8)]);
        let graph = list(&[("a", 1.0), ("b", 1.0)]);
        let lists = vec![
            RankedList { signal: MatchSignal::Fts, results: &fts },
            RankedList { signal: MatchSignal::Vector, results: &vector },
            RankedList { signal: MatchSignal::Graph, results: &graph },
        ];
        let fused = reciprocal_rank_fusion(&lists, DEFAULT_RRF_K, &HashMap::new());
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].id, "a");
    }
}
