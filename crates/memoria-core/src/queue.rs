//! Durable FIFO ingestion queue (spec.md §4.2). Grounded in two places:
//! the teacher's periodic-task pattern in `main.rs` (`tokio::spawn` + a
//! sleeping loop, calling straight into synchronous storage methods
//! rather than spawning blocking tasks) for the scheduler shape, and
//! `opencode-mem`'s `queue_processor.rs` / `storage/traits.rs::PendingQueueStore`
//! for the pending-row state machine itself — this module keeps the
//! teacher's synchronous `rusqlite` style but adopts `opencode-mem`'s
//! operation names: `enqueue`, `claim_batch`, `complete`, `fail`,
//! `release_stale`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::compressor::{truncate_for_compression, CompressionInput, Compressor, CompressorError, FallbackCompressor};
use crate::config::Config;
use crate::dedup::{DedupConfig, DedupOutcome, DedupResolver};
use crate::event_bus::{EventBus, MemoryEvent};
use crate::model::{now, ObservationDraft, PendingJob};
use crate::redaction;
use crate::store::Store;

#[cfg(feature = "embeddings")]
use crate::embeddings::Embedder;

/// Default staleness threshold for `processing` rows left behind by a
/// crashed worker (spec.md §4.2: "default 5 minutes").
pub const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// Backoff schedule for transient compressor failures (spec.md §4.3:
/// "retries on transient errors with 1s, then 2s backoff"), which this
/// queue also treats as its 2-retries-then-fallback policy from §4.2.
const RETRY_BACKOFF: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(2)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    InProcess,
    EnqueueOnly,
}

/// Releases the `processing` guard on every exit path — success, error,
/// or an unwinding panic — since `Drop` still runs during unwind.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A minimal token bucket shared across LLM callers (spec.md §5: "a
/// single rate-limiter token bucket shared across all LLM callers").
/// Refills lazily on `try_acquire` rather than via a background task,
/// since nothing here needs sub-second precision.
pub struct RateLimiter {
    capacity: u32,
    tokens: Mutex<(f64, std::time::Instant)>,
    refill_per_sec: f64,
}

impl RateLimiter {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self { capacity, tokens: Mutex::new((capacity as f64, std::time::Instant::now())), refill_per_sec }
    }

    pub fn try_acquire(&self) -> bool {
        let mut guard = self.tokens.lock().unwrap();
        let (tokens, last) = &mut *guard;
        let elapsed = last.elapsed().as_secs_f64();
        *tokens = (*tokens + elapsed * self.refill_per_sec).min(self.capacity as f64);
        *last = std::time::Instant::now();
        if *tokens >= 1.0 {
            *tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(60, 1.0)
    }
}

/// Everything a batch needs besides the `Store` itself: the active
/// compressor, an optional conflict adjudicator, an optional embedder,
/// and the shared rate limiter.
pub struct IngestionQueue {
    store: Arc<Store>,
    events: EventBus,
    config: Config,
    compressor: Box<dyn Compressor>,
    adjudicator: Option<Box<dyn crate::dedup::ConflictAdjudicator>>,
    #[cfg(feature = "embeddings")]
    embedder: Option<Arc<dyn Embedder>>,
    rate_limiter: RateLimiter,
    processing: AtomicBool,
    mode: Mutex<QueueMode>,
    stop_flag: Arc<AtomicBool>,
    notify: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl IngestionQueue {
    pub fn new(store: Arc<Store>, events: EventBus, config: Config, compressor: Box<dyn Compressor>) -> Self {
        Self {
            store,
            events,
            config,
            compressor,
            adjudicator: None,
            #[cfg(feature = "embeddings")]
            embedder: None,
            rate_limiter: RateLimiter::default(),
            processing: AtomicBool::new(false),
            mode: Mutex::new(QueueMode::InProcess),
            stop_flag: Arc::new(AtomicBool::new(true)),
            notify: Mutex::new(None),
        }
    }

    pub fn with_adjudicator(mut self, adjudicator: Box<dyn crate::dedup::ConflictAdjudicator>) -> Self {
        self.adjudicator = Some(adjudicator);
        self
    }

    #[cfg(feature = "embeddings")]
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn set_notify(&self, callback: Box<dyn Fn() + Send + Sync>) {
        *self.notify.lock().unwrap() = Some(callback);
    }

    pub fn mode(&self) -> QueueMode {
        *self.mode.lock().unwrap()
    }

    /// `setMode(in-process | enqueue-only)` (spec.md §4.2).
    pub fn set_mode(&self, mode: QueueMode) {
        *self.mode.lock().unwrap() = mode;
    }

    /// `enqueue(sessionId, toolName, output, callId)`. Duplicate call-ids
    /// are silently dropped (returns `Ok(None)`); a notification callback
    /// fires when the queue is in enqueue-only mode.
    pub fn enqueue(&self, session_id: &str, tool_name: &str, output: &str, call_id: &str) -> crate::Result<Option<PendingJob>> {
        let job = self.store.enqueue_pending_job(session_id, tool_name, output, call_id)?;
        if job.is_some() && self.mode() == QueueMode::EnqueueOnly {
            if let Some(callback) = self.notify.lock().unwrap().as_ref() {
                callback();
            }
        }
        Ok(job)
    }

    /// `processBatch() -> n` (spec.md §4.2). At-most-one concurrent call
    /// per process; a no-op in enqueue-only mode.
    pub fn process_batch(&self) -> crate::Result<u32> {
        if self.processing.swap(true, Ordering::SeqCst) {
            return Ok(0);
        }
        let _guard = ProcessingGuard(&self.processing);

        if self.mode() == QueueMode::EnqueueOnly {
            return Ok(0);
        }

        let jobs = self.store.claim_batch(self.config.batch_size.value)?;
        let count = jobs.len() as u32;
        for job in jobs {
            self.process_one(job);
        }
        Ok(count)
    }

    /// `start()`: periodic timer at `batchIntervalMs`.
    pub fn start(self: &Arc<Self>) {
        self.stop_flag.store(false, Ordering::SeqCst);
        let queue = Arc::clone(self);
        let interval = Duration::from_millis(self.config.batch_interval_ms.value.max(1));
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if queue.stop_flag.load(Ordering::SeqCst) {
                    break;
                }
                if queue.mode() == QueueMode::EnqueueOnly {
                    continue;
                }
                match queue.process_batch() {
                    Ok(n) if n > 0 => tracing::debug!(n, "ingestion batch processed"),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "ingestion batch failed"),
                }
            }
        });
    }

    /// `stop()`.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    /// Resets `processing` rows older than `threshold` back to `pending`
    /// (spec.md §4.2's crash recovery), called once at startup and then
    /// periodically by the host.
    pub fn recover_stale(&self, threshold: Duration) -> crate::Result<u32> {
        Ok(self.store.release_stale(threshold)?)
    }

    /// One claimed job, start to finish. Every exit path either completes
    /// or fails the row — nothing here propagates an error up to
    /// `process_batch`, since one bad row must not poison the rest of the
    /// batch (spec.md §7).
    fn process_one(&self, job: PendingJob) {
        if let Err(e) = self.try_process(&job) {
            tracing::warn!(job_id = job.id, error = %e, "pending job failed");
            let reason = e.to_string();
            if let Err(store_err) = self.store.fail_pending_job(job.id, &reason) {
                tracing::error!(job_id = job.id, error = %store_err, "failed to mark pending job failed");
            }
            self.events.emit(MemoryEvent::PendingJobFailed { id: job.id, reason, timestamp: now() });
        }
    }

    fn try_process(&self, job: &PendingJob) -> crate::Result<()> {
        let redacted = redaction::strip(&job.raw_output, &self.config.sensitive_patterns.value);
        let truncated = truncate_for_compression(&redacted);

        if truncated.trim().len() < self.config.min_output_length.value as usize {
            // Too short to be worth an observation at all (spec.md §4.3).
            self.store.complete_pending_job(job.id)?;
            return Ok(());
        }

        let draft = self.compress_with_fallback(&job.tool_name, &truncated)?;
        let Some(draft) = draft else {
            self.store.complete_pending_job(job.id)?;
            return Ok(());
        };

        let embedding = self.embed_draft(&draft);
        let embedding_ref = embedding.as_ref().map(|(v, m)| (v.as_slice(), m.as_str()));

        let resolver = DedupResolver::new(
            DedupConfig {
                enabled: self.config.conflict_resolution_enabled.value,
                low_band: self.config.conflict_similarity_band_low.value,
                high_band: self.config.conflict_similarity_band_high.value,
            },
            self.adjudicator.as_deref(),
        );

        let outcome = resolver.resolve(&self.store, draft, embedding_ref, &job.session_id, &job.tool_name)?;
        self.emit_outcome(&outcome);
        self.store.complete_pending_job(job.id)?;
        Ok(())
    }

    /// Runs the configured `Compressor` with the retry/fallback policy from
    /// spec.md §4.2/§4.3: transient errors retry with backoff up to 2
    /// attempts then fall back; config errors short-circuit (propagated,
    /// no fallback); corrupt output is treated as "no observation" and
    /// also falls back.
    fn compress_with_fallback(&self, tool_name: &str, output: &str) -> crate::Result<Option<ObservationDraft>> {
        if !self.config.compression_enabled.value {
            let input = CompressionInput { tool_name, output, session_context: None };
            return Ok(FallbackCompressor.compress(&input)?);
        }

        let input = CompressionInput { tool_name, output, session_context: None };
        let mut last_err: Option<CompressorError> = None;

        for attempt in 0..=RETRY_BACKOFF.len() {
            if !self.rate_limiter.try_acquire() {
                std::thread::sleep(Duration::from_millis(50));
            }
            match self.compressor.compress(&input) {
                Ok(draft) => return Ok(draft),
                Err(CompressorError::Config(reason)) => {
                    // Config errors short-circuit immediately, no retry, no fallback.
                    return Err(crate::error::MemoriaError::Config(reason));
                }
                Err(err @ CompressorError::Transient(_)) => {
                    last_err = Some(err);
                    if attempt < RETRY_BACKOFF.len() {
                        std::thread::sleep(RETRY_BACKOFF[attempt]);
                    }
                }
                Err(err @ CompressorError::CorruptOutput(_)) => {
                    last_err = Some(err);
                    break;
                }
            }
        }

        tracing::warn!(error = ?last_err, tool_name, "compressor failed, using fallback observation");
        let fallback_input = CompressionInput { tool_name, output, session_context: None };
        Ok(FallbackCompressor.compress(&fallback_input)?)
    }

    #[cfg(feature = "embeddings")]
    fn embed_draft(&self, draft: &ObservationDraft) -> Option<(Vec<f32>, String)> {
        let embedder = self.embedder.as_ref()?;
        if !embedder.is_ready() {
            return None;
        }
        let text = format!("{} {}", draft.title, draft.narrative);
        match embedder.embed(&text) {
            Ok(vector) => Some((vector, "nomic-embed-text-v1.5".to_string())),
            Err(e) => {
                tracing::warn!(error = %e, "embedding generation failed, continuing without one");
                None
            }
        }
    }

    #[cfg(not(feature = "embeddings"))]
    fn embed_draft(&self, _draft: &ObservationDraft) -> Option<(Vec<f32>, String)> {
        None
    }

    fn emit_outcome(&self, outcome: &DedupOutcome) {
        match outcome {
            DedupOutcome::Created(observation) => {
                self.events.emit(MemoryEvent::ObservationCreated {
                    id: observation.id.clone(),
                    session_id: observation.session_id.clone(),
                    timestamp: now(),
                });
            }
            DedupOutcome::CreatedAndSuperseded { new, superseded_id } => {
                self.events.emit(MemoryEvent::ObservationCreated {
                    id: new.id.clone(),
                    session_id: new.session_id.clone(),
                    timestamp: now(),
                });
                self.events.emit(MemoryEvent::ObservationSuperseded {
                    old_id: superseded_id.clone(),
                    new_id: new.id.clone(),
                    timestamp: now(),
                });
            }
            DedupOutcome::Skipped { reason } => {
                tracing::debug!(reason, "dedup skipped observation");
            }
        }
    }
}
