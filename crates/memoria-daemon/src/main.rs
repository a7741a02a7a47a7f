//! memoria-daemon: the thin process harness around `memoria-core`.
//!
//! This binary owns none of the engineering described in spec.md — it
//! only wires a normalized event stream (spec.md §6) to the queue
//! scheduler, runs the periodic batch timer, and recovers stale rows at
//! startup. Everything else (ingestion, dedup, lineage, search, context
//! assembly) lives in `memoria-core` and is reachable through its public
//! API; a host-runtime adapter that decides *which* events to send and
//! *when* is out of scope here, same as spec.md §1 says it is for the
//! engine itself.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use memoria_core::compressor::FallbackCompressor;
use memoria_core::dedup::{DedupConfig, DedupResolver};
use memoria_core::events::{normalize_chat_message, EventPayload, InboundEvent};
use memoria_core::model::{Session, SessionStatus};
use memoria_core::queue::{IngestionQueue, QueueMode, DEFAULT_STALE_THRESHOLD};
use memoria_core::{summarizer, Config, EventBus, Store};

#[derive(Parser, Debug)]
#[command(name = "memoria-daemon")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Ingestion-queue process harness for the memoria memory engine")]
struct Args {
    /// Project directory holding (or to create) `.memory/`. Defaults to
    /// the current working directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Hold the queue in enqueue-only mode: events are durably recorded
    /// but no batch is ever processed in this process (spec.md §4.2, §5).
    /// Use this when a separate daemon process owns processing.
    #[arg(long)]
    enqueue_only: bool,

    /// Process exactly one batch (if any pending rows exist) and exit,
    /// instead of starting the periodic timer. Useful for scripted or
    /// cron-driven ingestion.
    #[arg(long)]
    batch_once: bool,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing();

    let project_root = args.data_dir.clone().unwrap_or_else(|| std::env::current_dir().expect("cwd"));
    info!(path = %project_root.display(), "memoria-daemon starting");

    let config = Config::load(&project_root);
    let store = Arc::new(Store::open(&Store::default_path(&project_root))?);
    info!(vector_available = store.vector_available(), "store opened");

    let recovered = store.release_stale(DEFAULT_STALE_THRESHOLD)?;
    if recovered > 0 {
        warn!(recovered, "reset stale processing rows to pending on startup");
    }

    let events = EventBus::default();
    let queue =
        Arc::new(IngestionQueue::new(Arc::clone(&store), events.clone(), config.clone(), Box::new(FallbackCompressor)));
    if args.enqueue_only {
        queue.set_mode(QueueMode::EnqueueOnly);
        info!("queue running in enqueue-only mode; a separate daemon must process batches");
    }

    if args.batch_once {
        let n = queue.process_batch()?;
        info!(n, "processed one batch");
        return Ok(());
    }

    queue.start();
    spawn_stale_recovery_timer(Arc::clone(&store));

    info!("reading normalized events from stdin (one JSON object per line)");
    read_stdin_events(&store, &queue, &config);

    queue.stop();
    Ok(())
}

/// Periodically re-runs `release_stale` so a crash of *another* process
/// sharing this store doesn't leave rows stuck in `processing` forever
/// (spec.md §4.2: "on process start and periodically").
fn spawn_stale_recovery_timer(store: Arc<Store>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            match store.release_stale(DEFAULT_STALE_THRESHOLD) {
                Ok(n) if n > 0 => warn!(n, "periodic recovery reset stale processing rows"),
                Ok(_) => {}
                Err(e) => error!(error = %e, "periodic stale recovery failed"),
            }
        }
    });
}

/// Minimal stdin-JSON adapter demonstrating the ingestion side of the
/// normalized-event contract (spec.md §6, §12 of SPEC_FULL.md). Real
/// host-runtime wiring is out of scope; this just proves the plumbing.
fn read_stdin_events(store: &Store, queue: &IngestionQueue, config: &Config) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<InboundEvent>(&line) {
            Ok(event) => handle_event(store, queue, config, event),
            Err(e) => warn!(error = %e, "failed to parse inbound event, skipping line"),
        }
    }
}

fn handle_event(store: &Store, queue: &IngestionQueue, config: &Config, event: InboundEvent) {
    match event.payload {
        EventPayload::SessionStart => {
            if store.get_session(&event.session_id).is_err() {
                if let Err(e) = store.create_session(&Session::new(event.session_id.clone(), ".")) {
                    error!(error = %e, "failed to create session");
                }
            }
        }
        EventPayload::IdleFlush => {
            if let Err(e) = store.update_session_status(&event.session_id, SessionStatus::Idle, None) {
                error!(error = %e, "failed to mark session idle");
            }
        }
        EventPayload::SessionEnd => {
            if let Err(e) = store.update_session_status(&event.session_id, SessionStatus::Completed, Some(event.occurred_at)) {
                error!(error = %e, "failed to mark session completed");
                return;
            }
            maybe_summarize(store, &event.session_id);
        }
        EventPayload::ToolExecute { call_id, tool_name, output } => {
            if let Err(e) = queue.enqueue(&event.session_id, &tool_name, &output, &call_id) {
                error!(error = %e, "failed to enqueue tool output");
            }
        }
        EventPayload::ChatMessage { role, text } => {
            let Some(draft) = normalize_chat_message(role, &text) else { return };
            record_chat_observation(store, config, &event.session_id, draft);
        }
    }
}

/// Chat messages arrive pre-structured (spec.md §6) so they skip the
/// compressor entirely, but still run through dedup the same way a
/// compressed tool-output draft would.
fn record_chat_observation(store: &Store, config: &Config, session_id: &str, draft: memoria_core::ObservationDraft) {
    let resolver = DedupResolver::new(
        DedupConfig {
            enabled: config.conflict_resolution_enabled.value,
            low_band: config.conflict_similarity_band_low.value,
            high_band: config.conflict_similarity_band_high.value,
        },
        None,
    );
    if let Err(e) = resolver.resolve(store, draft, None, session_id, "chat.message") {
        error!(error = %e, "failed to record chat observation");
    }
}

/// `session.end` triggers the summarizer when there are at least two
/// observations and no summary exists yet (spec.md §4.7).
fn maybe_summarize(store: &Store, session_id: &str) {
    if store.get_summary_by_session(session_id).ok().flatten().is_some() {
        return;
    }
    let observations = match store.list_by_filter(
        &memoria_core::model::SearchFilter::current().with_session(session_id.to_string()),
        memoria_core::model::Pagination::new(0, 10_000),
    ) {
        Ok(obs) => obs,
        Err(e) => {
            error!(error = %e, "failed to load session observations for summarization");
            return;
        }
    };
    if observations.len() < summarizer::MIN_OBSERVATIONS_FOR_SUMMARY {
        return;
    }
    let summary = summarizer::build_summary(session_id, &observations, None);
    if let Err(e) = store.create_summary(&summary) {
        error!(error = %e, "failed to persist session summary");
        return;
    }
    if let Err(e) = store.set_summary_ref(session_id, &summary.id) {
        error!(error = %e, "failed to link session to its summary");
    }
}
