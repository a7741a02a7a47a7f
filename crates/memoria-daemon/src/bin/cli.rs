//! memoria CLI
//!
//! A thin reader/writer over `memoria-core`'s public operations (spec.md
//! §1 scopes dashboard/HTTP/CLI surfaces out of the core itself). Every
//! subcommand here opens the project's store, calls straight into
//! `memoria-core`, and prints the result — no business logic lives here.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;

use memoria_core::maintenance;
use memoria_core::model::{ObservationType, Pagination, SearchFilter};
use memoria_core::search::{self, SearchContext};
use memoria_core::{Config, Store};

#[derive(Parser)]
#[command(name = "memoria")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "CLI for the memoria persistent memory engine")]
struct Cli {
    /// Project directory holding `.memory/`. Defaults to the current
    /// working directory.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show store-level counts: observations (current/superseded/
    /// tombstoned), sessions, pending jobs, embeddings.
    Stats,

    /// Hybrid search over current observations.
    Search {
        query: String,
        /// Restrict to one observation type.
        #[arg(long)]
        r#type: Option<String>,
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Remove tombstoned observations past the retention window and
    /// vacuum the database.
    Clean {
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        retention_days: Option<u32>,
    },

    /// Regenerate the FTS5 index (and embeddings, if the `embeddings`
    /// feature is enabled).
    Rebuild {
        #[arg(long)]
        dry_run: bool,
    },
}

fn open_store_and_config(data_dir: &Option<PathBuf>) -> anyhow::Result<(Store, Config)> {
    let project_root = data_dir.clone().unwrap_or_else(|| std::env::current_dir().expect("cwd"));
    let config = Config::load(&project_root);
    let store = Store::open(&Store::default_path(&project_root))?;
    Ok((store, config))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Stats => run_stats(&cli.data_dir),
        Commands::Search { query, r#type, limit } => run_search(&cli.data_dir, &query, r#type, limit),
        Commands::Clean { dry_run, retention_days } => run_clean(&cli.data_dir, dry_run, retention_days),
        Commands::Rebuild { dry_run } => run_rebuild(&cli.data_dir, dry_run),
    }
}

fn run_stats(data_dir: &Option<PathBuf>) -> anyhow::Result<()> {
    let (store, _config) = open_store_and_config(data_dir)?;
    let stats = store.stats()?;
    println!("{}", "Memory store stats".bold());
    println!("  observations (current):    {}", stats.current_observations);
    println!("  observations (superseded): {}", stats.superseded_observations);
    println!("  observations (tombstoned): {}", stats.tombstoned_observations);
    println!("  sessions:                  {}", stats.total_sessions);
    println!("  pending jobs:              {}", stats.pending_count);
    println!("  processing jobs:           {}", stats.processing_count);
    println!("  failed jobs:               {}", stats.failed_count);
    println!("  embeddings:                {}", stats.embedding_count);
    println!("  vector search available:  {}", stats.vector_available);
    Ok(())
}

fn run_search(data_dir: &Option<PathBuf>, query: &str, r#type: Option<String>, limit: usize) -> anyhow::Result<()> {
    let (store, config) = open_store_and_config(data_dir)?;
    let mut filter = SearchFilter::current();
    if let Some(t) = r#type.as_deref() {
        filter.observation_type = Some(ObservationType::parse_name(t));
    }
    let ctx = SearchContext {
        store: &store,
        user_memory: None,
        entity_graph: None,
        query_vector: None,
        reranker: None,
        config: &config,
    };
    let results = search::search(ctx, query, &filter, limit)?;
    if results.is_empty() {
        println!("no results");
        return Ok(());
    }
    for r in results {
        println!(
            "{:.3}  [{}]  {}",
            r.rank,
            r.observation.observation_type.as_str().cyan(),
            r.observation.title.bold()
        );
        if let Some(snippet) = &r.snippet {
            println!("       {snippet}");
        }
        let matched: Vec<String> = r.explain.matched_by.iter().map(|s| format!("{s:?}")).collect();
        println!("       matched by: {}", matched.join(", ").dimmed());
    }
    Ok(())
}

fn run_clean(data_dir: &Option<PathBuf>, dry_run: bool, retention_days: Option<u32>) -> anyhow::Result<()> {
    let (store, config) = open_store_and_config(data_dir)?;
    let retention = retention_days.unwrap_or(config.retention_days.value);
    let report = maintenance::clean(&store, retention, dry_run)?;
    println!(
        "tombstones found: {}, removed: {}, vacuumed: {}{}",
        report.tombstones_found,
        report.tombstones_removed,
        report.vacuumed,
        if dry_run { " (dry run)".dimmed().to_string() } else { String::new() }
    );
    Ok(())
}

fn run_rebuild(data_dir: &Option<PathBuf>, dry_run: bool) -> anyhow::Result<()> {
    let (store, _config) = open_store_and_config(data_dir)?;
    #[cfg(feature = "embeddings")]
    let report = maintenance::rebuild(&store, None, 10_000, dry_run)?;
    #[cfg(not(feature = "embeddings"))]
    let report = maintenance::rebuild(&store, 10_000, dry_run)?;
    println!(
        "fts rebuilt: {}, embedding candidates: {}, regenerated: {}{}",
        report.fts_rebuilt,
        report.embeddings_candidates,
        report.embeddings_regenerated,
        if dry_run { " (dry run)".dimmed().to_string() } else { String::new() }
    );
    Ok(())
}
