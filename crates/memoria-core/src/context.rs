//! Context Assembler (spec.md §4.8): on demand, produces a prompt-ready
//! text blob from a session's own observations plus a broader search
//! expansion, subject to a hard token budget. Holds no state between
//! calls, the same way [`crate::search::engine`] does — every input it
//! needs is passed in by the caller.

use crate::config::Config;
use crate::model::{Pagination, SearchFilter, Session, SessionSummary};
use crate::search::{search, RankedResult, SearchContext};
use crate::store::Store;

/// One observation as it appears in the assembled context: either its full
/// body, or (for the long tail past `contextFullObservationCount`) just
/// its title, per spec.md §4.8's "progressive disclosure".
#[derive(Debug, Clone)]
pub struct ContextEntry {
    pub observation_id: String,
    pub title: String,
    pub body: Option<String>,
}

/// What [`assemble`] returns: the rendered blob, which ids made it in (for
/// observability), and whether anything was dropped for budget reasons.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub blob: String,
    pub included_ids: Vec<String>,
    pub truncated: bool,
}

/// Rough token estimate: 4 characters per token. Crude but consistent with
/// [`crate::summarizer`]'s estimate, and cheap enough to run on every
/// candidate without a real tokenizer dependency.
fn estimate_tokens(text: &str) -> u32 {
    ((text.chars().count() as f32) / 4.0).ceil() as u32
}

fn render_full(entry: &ContextEntry) -> String {
    match &entry.body {
        Some(body) => format!("## {}\n{}\n", entry.title, body),
        None => format!("## {}\n", entry.title),
    }
}

fn render_title_only(entry: &ContextEntry) -> String {
    format!("- {}\n", entry.title)
}

/// `assemble(...)` (spec.md §4.8). `search_ctx` carries everything the
/// search engine needs for the expansion-set query (store, optional
/// user-memory store, entity graph, query embedding); `focus_query` is
/// "the latest user message or session focus" spec.md §4.8 calls for.
pub fn assemble(
    store: &Store,
    session: &Session,
    summary: Option<&SessionSummary>,
    search_ctx: SearchContext<'_>,
    focus_query: &str,
    config: &Config,
) -> crate::Result<AssembledContext> {
    let mut entries: Vec<ContextEntry> = Vec::new();
    let mut seen = std::collections::HashSet::new();

    // 1. Anchor set: the session's own current observations, most recent
    // first (spec.md §4.8 step 1).
    let own = store.list_by_filter(
        &SearchFilter::current().with_session(session.id.clone()),
        Pagination::new(0, config.max_observations.value),
    )?;
    let mut own = own;
    own.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    for obs in &own {
        if seen.insert(obs.id.clone()) {
            entries.push(ContextEntry {
                observation_id: obs.id.clone(),
                title: obs.title.clone(),
                body: Some(render_observation_body(obs)),
            });
        }
    }

    // 2. Expansion set: top-k search results over the current corpus.
    let expansion_limit = config.max_index_entries.value as usize;
    let ranked: Vec<RankedResult> =
        search(search_ctx, focus_query, &SearchFilter::current(), expansion_limit)?;
    for r in &ranked {
        if seen.insert(r.observation.id.clone()) {
            entries.push(ContextEntry {
                observation_id: r.observation.id.clone(),
                title: r.observation.title.clone(),
                body: Some(render_observation_body(&r.observation)),
            });
        }
    }

    let full_count = config.context_full_observation_count.value as usize;
    let mut blob = String::new();
    blob.push_str("# Session\n");
    if let Some(summary) = summary {
        blob.push_str("## Summary\n");
        blob.push_str(&summary.text);
        blob.push('\n');
    }

    let mut included_ids = Vec::new();
    let mut truncated = false;
    let mut budget_used = estimate_tokens(&blob);
    let max_tokens = config.max_context_tokens.value;

    for (idx, entry) in entries.iter().enumerate() {
        let rendered = if idx < full_count { render_full(entry) } else { render_title_only(entry) };
        let rendered_tokens = estimate_tokens(&rendered);
        if budget_used + rendered_tokens > max_tokens {
            truncated = true;
            break;
        }
        blob.push_str(&rendered);
        budget_used += rendered_tokens;
        included_ids.push(entry.observation_id.clone());
    }

    // Anything left over after a hard stop was dropped by budget, even if
    // we never got to render it — still counts as truncation.
    if included_ids.len() < entries.len() {
        truncated = true;
    }

    Ok(AssembledContext { blob, included_ids, truncated })
}

fn render_observation_body(obs: &crate::model::Observation) -> String {
    let mut body = obs.narrative.clone();
    if !obs.facts.is_empty() {
        body.push_str("\nFacts:\n");
        for fact in &obs.facts {
            body.push_str("- ");
            body.push_str(fact);
            body.push('\n');
        }
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::EventBus;
    use crate::model::{ObservationDraft, ObservationType};

    fn make_observation(store: &Store, session_id: &str, title: &str) {
        let draft = ObservationDraft {
            observation_type: Some(ObservationType::Discovery.as_str().to_string()),
            title: title.to_string(),
            narrative: format!("narrative for {title}"),
            ..Default::default()
        };
        let obs = draft.into_observation(session_id, "Read");
        store.create_observation(&obs).unwrap();
    }

    #[test]
    fn assembled_blob_includes_session_observations() {
        let store = Store::open_in_memory().unwrap();
        let session = Session::new("s1", "/tmp");
        store.create_session(&session).unwrap();
        make_observation(&store, "s1", "discovered the auth flow");

        let config = Config::default();
        let _bus = EventBus::default();
        let ctx = SearchContext {
            store: &store,
            user_memory: None,
            entity_graph: None,
            query_vector: None,
            reranker: None,
            config: &config,
        };
        let assembled = assemble(&store, &session, None, ctx, "", &config).unwrap();
        assert_eq!(assembled.included_ids.len(), 1);
        assert!(assembled.blob.contains("discovered the auth flow"));
        assert!(!assembled.truncated);
    }

    #[test]
    fn tiny_token_budget_truncates_context() {
        let store = Store::open_in_memory().unwrap();
        let session = Session::new("s1", "/tmp");
        store.create_session(&session).unwrap();
        make_observation(&store, "s1", "first observation with a reasonably long narrative body");
        make_observation(&store, "s1", "second observation with a reasonably long narrative body");

        let mut config = Config::default();
        config.max_context_tokens.value = 5;
        let ctx = SearchContext {
            store: &store,
            user_memory: None,
            entity_graph: None,
            query_vector: None,
            reranker: None,
            config: &config,
        };
        let assembled = assemble(&store, &session, None, ctx, "", &config).unwrap();
        assert!(assembled.truncated);
        assert!(assembled.included_ids.len() < 2);
    }
}
