//! End-to-end coverage of the six concrete scenarios this engine's
//! behavior is pinned against: dedup fast-path, conflict update, crash
//! recovery, hybrid search fusion, tombstone exclusion, and fallback
//! compression. Each test exercises the public `memoria-core` API the
//! way a host process would, never the private storage internals.

use std::sync::Arc;
use std::time::Duration;

use memoria_core::compressor::{CompressionInput, Compressor, CompressorError, FallbackCompressor};
use memoria_core::dedup::{DedupConfig, DedupResolver};
use memoria_core::embeddings::Embedder;
use memoria_core::event_bus::EventBus;
use memoria_core::model::{ObservationDraft, ObservationType, Pagination, RecallState, SearchFilter, Session};
use memoria_core::queue::{IngestionQueue, QueueMode};
use memoria_core::search::{self, SearchContext};
use memoria_core::{Config, Store};

/// A 256-dimensional unit vector with all of its mass on the first two
/// axes, so two such vectors' dot product (== cosine similarity, since
/// both are unit-norm) is exactly the angle this test wants regardless
/// of the HNSW index's int8 quantization noise on the remaining axes.
fn steered_vector(cos_to_axis0: f32) -> Vec<f32> {
    let sin = (1.0 - cos_to_axis0 * cos_to_axis0).max(0.0).sqrt();
    let mut v = vec![0.0_f32; 256];
    v[0] = cos_to_axis0;
    v[1] = sin;
    v
}

fn axis0() -> Vec<f32> {
    steered_vector(1.0)
}

struct FixedEmbedder(Vec<f32>);

impl Embedder for FixedEmbedder {
    fn embed(&self, _text: &str) -> memoria_core::Result<Vec<f32>> {
        Ok(self.0.clone())
    }
    fn dimensions(&self) -> usize {
        256
    }
    fn is_ready(&self) -> bool {
        true
    }
}

fn setup() -> Arc<Store> {
    let store = Arc::new(Store::open_in_memory().unwrap());
    store.create_session(&Session::new("s1", "/tmp")).unwrap();
    store
}

/// Scenario 1 (dedup fast-path): a new draft whose embedding lands well
/// above `highBand` against an existing current observation is skipped
/// outright; `processBatch` still reports it processed and the
/// observation count doesn't grow.
#[test]
fn dedup_fast_path_skips_near_duplicate() {
    let store = setup();
    let seed = ObservationDraft { title: "existing finding".into(), ..Default::default() }.into_observation("s1", "Read");
    store.create_observation_with_embedding(&seed, Some((&axis0(), "test-model"))).unwrap();

    let config = Config::default();
    let queue = IngestionQueue::new(Arc::clone(&store), EventBus::default(), config, Box::new(FallbackCompressor))
        .with_embedder(Arc::new(FixedEmbedder(steered_vector(0.99))));

    queue.enqueue("s1", "Read", "this output is definitely long enough to pass the gate", "c1").unwrap();
    let processed = queue.process_batch().unwrap();
    assert_eq!(processed, 1);

    let stats = store.stats().unwrap();
    assert_eq!(stats.current_observations, 1, "near-duplicate draft must not create a second observation");
    assert_eq!(stats.pending_count, 0);
}

/// Scenario 2 (conflict update): a gray-zone candidate plus an
/// adjudicator that returns `Update` supersedes the existing
/// observation and links the two in one atomic write.
#[test]
fn gray_zone_adjudication_supersedes_existing_observation() {
    use memoria_core::dedup::{AdjudicationVerdict, ConflictAdjudicator};

    struct AlwaysUpdate;
    impl ConflictAdjudicator for AlwaysUpdate {
        fn adjudicate(
            &self,
            _draft: &ObservationDraft,
            candidates: &[memoria_core::Observation],
        ) -> Result<AdjudicationVerdict, CompressorError> {
            Ok(AdjudicationVerdict::Update { supersedes_id: candidates[0].id.clone() })
        }
    }

    let store = setup();
    let old = ObservationDraft { title: "old decision".into(), ..Default::default() }.into_observation("s1", "Read");
    store.create_observation_with_embedding(&old, Some((&axis0(), "test-model"))).unwrap();

    let resolver = DedupResolver::new(
        DedupConfig { enabled: true, low_band: 0.70, high_band: 0.92 },
        Some(&AlwaysUpdate),
    );
    let new_draft = ObservationDraft { title: "revised decision".into(), ..Default::default() };
    // Squarely inside [lowBand, highBand], with margin for quantization noise.
    let outcome = resolver.resolve(&store, new_draft, Some((&steered_vector(0.82), "test-model")), "s1", "Read").unwrap();

    let new_id = match outcome {
        memoria_core::dedup::DedupOutcome::CreatedAndSuperseded { new, superseded_id } => {
            assert_eq!(superseded_id, old.id);
            new.id
        }
        other => panic!("expected CreatedAndSuperseded, got {other:?}"),
    };

    let refetched_old = store.get_by_id(&old.id).unwrap();
    assert!(!refetched_old.is_current());
    assert_eq!(refetched_old.superseded_by, Some(new_id.clone()));

    let refetched_new = store.get_by_id(&new_id).unwrap();
    assert_eq!(refetched_new.revision_of, Some(old.id.clone()));

    let lineage = memoria_core::lineage::LineageManager::new(&store);
    let chain_old = lineage.get_lineage(&old.id).unwrap();
    let chain_new = lineage.get_lineage(&new_id).unwrap();
    assert_eq!(chain_old.len(), 2);
    assert_eq!(chain_new.len(), 2);
    assert_eq!(chain_old.first().unwrap().observation.id, old.id);
    assert_eq!(chain_old.last().unwrap().observation.id, new_id);
    assert_eq!(
        chain_old.iter().map(|l| l.observation.id.clone()).collect::<Vec<_>>(),
        chain_new.iter().map(|l| l.observation.id.clone()).collect::<Vec<_>>(),
    );
}

/// Scenario 3 (crash recovery): a row claimed into `processing` but never
/// completed (simulating a crashed worker) is reset to `pending` by
/// `releaseStale` once it's older than the threshold, and a subsequent
/// `processBatch` picks it up and completes it.
#[test]
fn stale_processing_row_is_recovered_and_completed() {
    let dir = tempfile::TempDir::new().unwrap();
    let db_path = Store::default_path(dir.path());

    {
        let store = Store::open(&db_path).unwrap();
        store.create_session(&Session::new("s1", "/tmp")).unwrap();
        store.enqueue_pending_job("s1", "Read", "long enough output to pass the gate", "c1").unwrap();
        // Simulate a worker that claimed the row and then crashed before
        // completing it.
        let claimed = store.claim_batch(10).unwrap();
        assert_eq!(claimed.len(), 1);
    }

    // Reopen as a fresh process would after a crash.
    let store = Arc::new(Store::open(&db_path).unwrap());
    std::thread::sleep(Duration::from_millis(5));
    let recovered = store.release_stale(Duration::from_millis(0)).unwrap();
    assert_eq!(recovered, 1);

    let config = Config::default();
    let queue = IngestionQueue::new(Arc::clone(&store), EventBus::default(), config, Box::new(FallbackCompressor));
    let processed = queue.process_batch().unwrap();
    assert_eq!(processed, 1);
    assert_eq!(store.stats().unwrap().pending_count, 0);
}

/// Scenario 4 (hybrid search): a query matching on full text ranks
/// alongside filter-only structural matches, and every returned result
/// carries a non-empty explain record (spec.md §8's invariant).
#[test]
fn search_fuses_signals_with_nonempty_explain() {
    let store = setup();
    for title in ["JWT RS256 auth module", "unrelated refactor of the build script"] {
        let obs = ObservationDraft { title: title.to_string(), ..Default::default() }.into_observation("s1", "Read");
        store.create_observation(&obs).unwrap();
    }

    let config = Config::default();
    let ctx = SearchContext {
        store: &store,
        user_memory: None,
        entity_graph: None,
        query_vector: None,
        reranker: None,
        config: &config,
    };
    let results = search::search(ctx, "JWT", &SearchFilter::current(), 10).unwrap();
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| !r.explain.matched_by.is_empty()));
    assert!(results[0].observation.title.contains("JWT"));
}

/// Scenario 5 (tombstone exclusion): a tombstoned observation never
/// appears in a `current`-state listing, vector search, or full-text
/// search, even though `get_by_id` can still fetch it directly.
#[test]
fn tombstoned_observation_excluded_from_current_reads() {
    let store = setup();
    let obs = ObservationDraft { title: "JWT secret rotated".into(), ..Default::default() }.into_observation("s1", "Read");
    store.create_observation_with_embedding(&obs, Some((&axis0(), "test-model"))).unwrap();
    store.tombstone(std::slice::from_ref(&obs.id)).unwrap();

    let current = store.list_by_filter(&SearchFilter::current(), Pagination::new(0, 50)).unwrap();
    assert!(current.iter().all(|o| o.id != obs.id));

    let fts = store.search_fts("JWT", &SearchFilter::current(), 10).unwrap();
    assert!(fts.iter().all(|(o, _, _)| o.id != obs.id));

    let similar = store.find_similar(&axis0(), ObservationType::Discovery, 0.0, 10).unwrap();
    assert!(similar.iter().all(|(o, _)| o.id != obs.id));

    // Still reachable by id for lineage/audit purposes.
    let refetched = store.get_by_id(&obs.id).unwrap();
    assert!(refetched.is_tombstoned());

    let tombstoned_only = store
        .list_by_filter(&SearchFilter::current().with_state(RecallState::TombstonedOnly), Pagination::new(0, 50))
        .unwrap();
    assert!(tombstoned_only.iter().any(|o| o.id == obs.id));
}

/// Scenario 6 (fallback compression): a configured compressor that only
/// ever errors transiently falls back to `FallbackCompressor` after its
/// retry budget, and the batch item still completes rather than failing.
#[test]
fn transient_compressor_failure_falls_back_and_completes() {
    struct AlwaysTransient;
    impl Compressor for AlwaysTransient {
        fn compress(&self, _input: &CompressionInput<'_>) -> Result<Option<ObservationDraft>, CompressorError> {
            Err(CompressorError::Transient("provider unavailable".into()))
        }
    }

    let store = setup();
    let mut config = Config::default();
    config.compression_enabled.value = true;
    let queue = IngestionQueue::new(Arc::clone(&store), EventBus::default(), config, Box::new(AlwaysTransient));
    queue.enqueue("s1", "Write", "wrote a new config file to disk successfully", "c1").unwrap();

    let processed = queue.process_batch().unwrap();
    assert_eq!(processed, 1);

    let stats = store.stats().unwrap();
    assert_eq!(stats.current_observations, 1);
    assert_eq!(stats.failed_count, 0, "a transient compressor failure must fall back, not fail the row");
}

/// Scenario 6, literal: with compression disabled, a `Read` call whose
/// output names two files produces a `discovery` observation with both
/// paths in `filesRead` (not `filesModified`) and `importance=2`.
#[test]
fn fallback_read_observation_populates_files_read() {
    let store = setup();
    let config = Config::default();
    assert!(!config.compression_enabled.value);
    let queue = IngestionQueue::new(Arc::clone(&store), EventBus::default(), config, Box::new(FallbackCompressor));
    queue
        .enqueue("s1", "Read", "contents of src/a.ts and src/b.ts follow in this tool output", "call-1")
        .unwrap();
    assert_eq!(queue.process_batch().unwrap(), 1);

    let current = store.list_by_filter(&SearchFilter::current(), Pagination::new(0, 50)).unwrap();
    assert_eq!(current.len(), 1);
    let obs = &current[0];
    assert_eq!(obs.observation_type, ObservationType::Discovery);
    assert_eq!(obs.title, "Read execution");
    assert!(obs.files_read.contains("src/a.ts"));
    assert!(obs.files_read.contains("src/b.ts"));
    assert!(obs.files_modified.is_empty());
    assert_eq!(obs.importance, 2);
}

#[test]
fn enqueue_only_mode_defers_processing_to_another_worker() {
    let store = setup();
    let config = Config::default();
    let queue = Arc::new(IngestionQueue::new(Arc::clone(&store), EventBus::default(), config, Box::new(FallbackCompressor)));
    queue.set_mode(QueueMode::EnqueueOnly);
    queue.enqueue("s1", "Read", "this output is definitely long enough to pass the gate", "c1").unwrap();
    assert_eq!(queue.process_batch().unwrap(), 0);
    assert_eq!(store.stats().unwrap().pending_count, 1);

    queue.set_mode(QueueMode::InProcess);
    assert_eq!(queue.process_batch().unwrap(), 1);
}
