//! Top-level `search(query, filters?, limit) -> RankedResult[]` operation
//! (spec.md §4.6) tying the `store`'s FTS/vector primitives to the
//! `fts`/`graph`/`hybrid`/`reranker`/`explain` submodules above. This is
//! the one place in the crate that knows about all the signals at once;
//! every submodule it calls stays ignorant of storage and of each other.

use std::collections::HashMap;

use crate::config::Config;
use crate::model::{Observation, ObservationType, SearchFilter};
use crate::store::Store;

use super::explain::{ExplainRecord, MatchSignal};
use super::graph::{self, EntityGraph};
use super::hybrid::{reciprocal_rank_fusion, RankedList, TieBreakInfo, DEFAULT_RRF_K};
use super::reranker::Reranker;

/// Candidates considered per signal before fusion (spec.md §4.6 calls this
/// an implementation-defined "top-n").
pub const SIGNAL_CANDIDATE_COUNT: usize = 50;
/// Fused-candidate count below which reranking is skipped entirely
/// (spec.md §4.6: "exceeds a threshold (e.g., 5)").
pub const RERANK_CANDIDATE_THRESHOLD: usize = 5;
/// How many of the top fused results the reranker is allowed to reorder.
pub const RERANK_WINDOW: usize = 20;

#[derive(Debug, Clone)]
pub struct RankedResult {
    pub observation: Observation,
    pub snippet: Option<String>,
    pub rank: f32,
    pub explain: ExplainRecord,
}

/// Everything the orchestrator needs that isn't `query_text`/`filter`/
/// `limit`: the primary store, an optional cross-project user-memory
/// store, a prebuilt entity adjacency (skipped if entity extraction is
/// disabled), a precomputed query embedding (the caller owns the
/// `Embedder` capability; `search` never calls one itself — "Search holds
/// no state between calls", spec.md §3), and an optional reranker.
pub struct SearchContext<'a> {
    pub store: &'a Store,
    pub user_memory: Option<&'a Store>,
    pub entity_graph: Option<EntityGraph<'a>>,
    pub query_vector: Option<&'a [f32]>,
    pub reranker: Option<&'a mut Reranker>,
    pub config: &'a Config,
}

struct Candidate {
    observation: Observation,
    snippet: Option<String>,
}

fn all_observation_types() -> [ObservationType; 6] {
    [
        ObservationType::Decision,
        ObservationType::Bugfix,
        ObservationType::Feature,
        ObservationType::Refactor,
        ObservationType::Discovery,
        ObservationType::Change,
    ]
}

/// `search(query, filters?, limit)` (spec.md §4.6). Empty `query_text` with
/// no other constraint is served as a direct filtered scan
/// (`strategy=filter-only` per spec.md §4.6); otherwise every applicable
/// signal runs, results are fused by RRF, optionally reranked, and always
/// returned with a populated `explain` record (spec.md §8's invariant).
pub fn search(ctx: SearchContext<'_>, query_text: &str, filter: &SearchFilter, limit: usize) -> crate::Result<Vec<RankedResult>> {
    let query_text = query_text.trim();

    if query_text.is_empty() {
        return filter_only_scan(ctx.store, filter, limit);
    }

    let mut pool: HashMap<String, Candidate> = HashMap::new();
    let mut tie_break: HashMap<String, TieBreakInfo> = HashMap::new();
    let mut lists_owned: Vec<(MatchSignal, Vec<(String, f32)>)> = Vec::new();

    // Full-text signal.
    let fts_hits = ctx.store.search_fts(query_text, filter, SIGNAL_CANDIDATE_COUNT)?;
    let mut fts_ranked = Vec::with_capacity(fts_hits.len());
    for (obs, snippet, score) in fts_hits {
        tie_break.insert(obs.id.clone(), TieBreakInfo { importance: obs.importance, created_at: obs.created_at });
        fts_ranked.push((obs.id.clone(), score));
        pool.entry(obs.id.clone()).or_insert(Candidate { observation: obs, snippet: Some(snippet) });
    }
    if !fts_ranked.is_empty() {
        lists_owned.push((MatchSignal::Fts, fts_ranked));
    }

    // Vector signal: skipped entirely if the caller has no query embedding
    // (spec.md §4.6: "Skipped if no embedding capability" is the only
    // condition under which this signal doesn't run).
    if let Some(vector) = ctx.query_vector {
        let types: Vec<ObservationType> = match filter.observation_type {
            Some(t) => vec![t],
            None => all_observation_types().to_vec(),
        };
        let mut vector_ranked = Vec::new();
        for t in types {
            for (obs, score) in ctx.store.find_similar(vector, t, 0.0, SIGNAL_CANDIDATE_COUNT)? {
                tie_break
                    .entry(obs.id.clone())
                    .or_insert(TieBreakInfo { importance: obs.importance, created_at: obs.created_at });
                vector_ranked.push((obs.id.clone(), score));
                pool.entry(obs.id.clone()).or_insert_with(|| Candidate { observation: obs, snippet: None });
            }
        }
        vector_ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        vector_ranked.truncate(SIGNAL_CANDIDATE_COUNT);
        if !vector_ranked.is_empty() {
            lists_owned.push((MatchSignal::Vector, vector_ranked));
        }
    }

    // Graph-hop signal: only entities whose name appears verbatim
    // (case-insensitive, whole word) in the query seed the walk.
    if let Some(entity_graph) = &ctx.entity_graph {
        let lower_query = query_text.to_lowercase();
        let seeds: Vec<String> = entity_graph
            .entity_neighbors
            .keys()
            .chain(entity_graph.entity_observations.keys())
            .filter(|name| lower_query.contains(&name.to_lowercase()))
            .cloned()
            .collect();
        if !seeds.is_empty() {
            let hops = graph::hop_search(entity_graph, &seeds, super::graph::DEFAULT_MAX_HOPS);
            let graph_ranked = graph::hop_results_to_ranked(&hops, super::graph::DEFAULT_MAX_HOPS);
            for (id, _) in &graph_ranked {
                if let Ok(obs) = ctx.store.get_by_id(id) {
                    if obs.is_current() {
                        tie_break
                            .entry(id.clone())
                            .or_insert(TieBreakInfo { importance: obs.importance, created_at: obs.created_at });
                        pool.entry(id.clone()).or_insert(Candidate { observation: obs, snippet: None });
                    }
                }
            }
            if !graph_ranked.is_empty() {
                lists_owned.push((MatchSignal::Graph, graph_ranked));
            }
        }
    }

    // User-memory signal: the same FTS + vector calls against a second,
    // cross-project store, merged in under their own signal tag.
    if let Some(user_store) = ctx.user_memory {
        let user_hits = user_store.search_fts(query_text, filter, SIGNAL_CANDIDATE_COUNT)?;
        let mut user_ranked = Vec::with_capacity(user_hits.len());
        for (obs, snippet, score) in user_hits {
            tie_break
                .entry(obs.id.clone())
                .or_insert(TieBreakInfo { importance: obs.importance, created_at: obs.created_at });
            user_ranked.push((obs.id.clone(), score));
            pool.entry(obs.id.clone()).or_insert(Candidate { observation: obs, snippet: Some(snippet) });
        }
        if let Some(vector) = ctx.query_vector {
            for t in all_observation_types() {
                for (obs, score) in user_store.find_similar(vector, t, 0.0, SIGNAL_CANDIDATE_COUNT)? {
                    tie_break
                        .entry(obs.id.clone())
                        .or_insert(TieBreakInfo { importance: obs.importance, created_at: obs.created_at });
                    user_ranked.push((obs.id.clone(), score));
                    pool.entry(obs.id.clone()).or_insert_with(|| Candidate { observation: obs, snippet: None });
                }
            }
        }
        if !user_ranked.is_empty() {
            lists_owned.push((MatchSignal::UserMemory, user_ranked));
        }
    }

    let lists: Vec<RankedList<'_>> =
        lists_owned.iter().map(|(signal, results)| RankedList { signal: *signal, results: results.as_slice() }).collect();
    let fused = reciprocal_rank_fusion(&lists, DEFAULT_RRF_K, &tie_break);

    let ordered_ids = maybe_rerank(ctx.reranker, ctx.config, query_text, &fused, &pool);

    let mut out = Vec::with_capacity(limit.min(ordered_ids.len()));
    for id in ordered_ids.into_iter().take(limit) {
        let Some(candidate) = pool.remove(&id) else { continue };
        let explain = fused.iter().find(|f| f.id == id).map(|f| f.explain.clone()).unwrap_or_default();
        let rank = explain.rrf_score;
        out.push(RankedResult { observation: candidate.observation, snippet: candidate.snippet, rank, explain });
    }
    Ok(out)
}

/// Reorders the fused id list by reranking its top [`RERANK_WINDOW`]
/// entries, per spec.md §4.6: "apply the returned permutation, keeping
/// items the model omitted at their original positions below the
/// reordered prefix." A reranker failure (or being disabled/below
/// threshold) leaves the fused order untouched.
fn maybe_rerank(
    reranker: Option<&mut Reranker>,
    config: &Config,
    query_text: &str,
    fused: &[super::hybrid::FusedResult],
    pool: &HashMap<String, Candidate>,
) -> Vec<String> {
    let fused_order: Vec<String> = fused.iter().map(|f| f.id.clone()).collect();

    let Some(reranker) = reranker else { return fused_order };
    if !config.reranking_enabled.value || fused_order.len() <= RERANK_CANDIDATE_THRESHOLD {
        return fused_order;
    }

    let window_len = fused_order.len().min(RERANK_WINDOW);
    let window = &fused_order[..window_len];
    let tail = &fused_order[window_len..];

    let candidates: Vec<(String, String)> = window
        .iter()
        .filter_map(|id| {
            pool.get(id).map(|c| {
                let text = format!("{} {}", c.observation.title, c.observation.narrative);
                (id.clone(), text)
            })
        })
        .collect();

    match reranker.rerank(query_text, candidates, Some(window_len)) {
        Ok(reranked) => {
            let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
            let mut out: Vec<String> = reranked
                .into_iter()
                .map(|r| {
                    seen.insert(r.item.clone());
                    r.item
                })
                .collect();
            // Window items the reranker dropped (min-score filtered) keep
            // their original relative order, placed below the reordered
            // prefix but still above the untouched tail.
            for id in window {
                if !seen.contains(id) {
                    out.push(id.clone());
                }
            }
            out.extend(tail.iter().cloned());
            out
        }
        Err(e) => {
            tracing::warn!(error = %e, "reranker failed, keeping fused order");
            fused_order
        }
    }
}

/// `strategy=filter-only`: a direct filtered scan, no text signal at all.
/// `explain.matched_by` is still populated — with whichever structural
/// filters were actually supplied, or `Fts` as a fallback label for an
/// unfiltered listing — since spec.md §8 requires it non-empty for every
/// returned result.
fn filter_only_scan(store: &Store, filter: &SearchFilter, limit: usize) -> crate::Result<Vec<RankedResult>> {
    let observations = store.list_by_filter(filter, crate::model::Pagination::new(0, limit as u32))?;
    let total = observations.len().max(1) as f32;
    let mut out = Vec::with_capacity(observations.len());
    for (idx, obs) in observations.into_iter().enumerate() {
        let mut explain = ExplainRecord::default();
        let signal = if !filter.concepts.is_empty() {
            MatchSignal::ConceptFilter
        } else if !filter.files.is_empty() {
            MatchSignal::FileFilter
        } else {
            MatchSignal::Fts
        };
        let rank = 1.0 - (idx as f32 / total);
        explain.record(signal, rank);
        out.push(RankedResult { observation: obs, snippet: None, rank, explain });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ObservationDraft, Session};

    fn store_with(titles: &[&str]) -> Store {
        let store = Store::open_in_memory().unwrap();
        store.create_session(&Session::new("s1", "/tmp")).unwrap();
        for title in titles {
            let obs = ObservationDraft { title: title.to_string(), ..Default::default() }.into_observation("s1", "Read");
            store.create_observation(&obs).unwrap();
        }
        store
    }

    #[test]
    fn filter_only_scan_has_nonempty_explain() {
        let store = store_with(&["uses JWT RS256", "refactors auth module"]);
        let results = filter_only_scan(&store, &SearchFilter::current(), 10).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.explain.matched_by.is_empty()));
        assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.rank)));
    }

    #[test]
    fn text_search_returns_fts_matched_result() {
        let store = store_with(&["uses JWT RS256 for auth", "unrelated refactor"]);
        let ctx = SearchContext {
            store: &store,
            user_memory: None,
            entity_graph: None,
            query_vector: None,
            reranker: None,
            config: &Config::default(),
        };
        let results = search(ctx, "JWT", &SearchFilter::current(), 10).unwrap();
        assert!(results.iter().any(|r| r.observation.title.contains("JWT")));
        assert!(results[0].explain.matched_by.contains(&MatchSignal::Fts));
    }
}
