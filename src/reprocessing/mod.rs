//! Generation lifecycle orchestration.
//!
//! Each reprocessing attempt walks a small state machine:
//!
//! ```text
//! CURRENT ──stage──▶ STAGING ──rate ≥ floor──▶ COMMITTED
//!                       │
//!                       └──rate < floor / cancelled──▶ ABORTED
//! ```
//!
//! Staging creates a new generation and its structural units, every anchor
//! is re-resolved against the staged text, and the recovery rate decides
//! between an atomic commit (flip the current flag, persist outcomes, remap
//! validated edges, delete the retired generation) and an abort that leaves
//! the prior generation untouched. A per-document advisory lock rejects
//! concurrent attempts instead of queueing them silently.

use crate::config::PalimpsestConfig;
use crate::matching::TieredMatcher;
use crate::models::{
    Anchor, Document, DocumentId, Generation, GenerationId, RecoveryOutcome, RecoveryStatus,
    RecoveryTier, StructuralUnit, UnitId,
};
use crate::remap::ReferenceRemapper;
use crate::segmentation::Segmenter;
use crate::storage::Store;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::instrument;

/// Configuration for the reprocessing orchestrator.
#[derive(Debug, Clone)]
pub struct ReprocessingConfig {
    /// Minimum fraction of anchors that must be recovered for a commit.
    pub recovery_floor: f32,
    /// Worker threads for the per-anchor matching fan-out.
    pub max_workers: usize,
}

impl Default for ReprocessingConfig {
    fn default() -> Self {
        Self {
            recovery_floor: 0.90,
            max_workers: 4,
        }
    }
}

impl ReprocessingConfig {
    /// Loads configuration from environment variables.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `PALIMPSEST_RECOVERY_FLOOR` | Commit gate | 0.90 |
    /// | `PALIMPSEST_MATCH_WORKERS` | Matching fan-out width | 4 |
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("PALIMPSEST_RECOVERY_FLOOR")
            && let Ok(parsed) = v.parse::<f32>()
        {
            self.recovery_floor = parsed.clamp(0.0, 1.0);
        }
        if let Ok(v) = std::env::var("PALIMPSEST_MATCH_WORKERS")
            && let Ok(parsed) = v.parse::<usize>()
        {
            self.max_workers = parsed.max(1);
        }
        self
    }

    /// Sets the recovery floor.
    #[must_use]
    pub fn with_recovery_floor(mut self, floor: f32) -> Self {
        self.recovery_floor = floor.clamp(0.0, 1.0);
        self
    }

    /// Sets the matching fan-out width.
    #[must_use]
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }
}

/// Caller-held handle for aborting an in-flight reprocessing attempt.
///
/// Cancellation is cooperative: the matching loop checks the token between
/// anchors and the attempt finishes with a clean abort, equivalent to a
/// floor violation but flagged as cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a live token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Advisory per-document locks for the staging window.
#[derive(Debug, Default)]
struct DocumentLockRegistry {
    held: Mutex<HashSet<DocumentId>>,
}

impl DocumentLockRegistry {
    /// Acquires the lock or fails fast with a conflict.
    fn acquire(&self, document_id: &DocumentId) -> Result<DocumentLock<'_>> {
        let mut held = self.held.lock().map_err(|_| Error::ExternalService {
            operation: "document_lock".to_string(),
            cause: "lock poisoned".to_string(),
        })?;
        if !held.insert(document_id.clone()) {
            return Err(Error::TransactionConflict {
                document_id: document_id.to_string(),
            });
        }
        Ok(DocumentLock {
            registry: self,
            document_id: document_id.clone(),
        })
    }
}

/// RAII guard for one document's advisory lock.
struct DocumentLock<'a> {
    registry: &'a DocumentLockRegistry,
    document_id: DocumentId,
}

impl Drop for DocumentLock<'_> {
    fn drop(&mut self) {
        if let Ok(mut held) = self.registry.held.lock() {
            held.remove(&self.document_id);
        }
    }
}

/// Structured result of one reprocessing attempt.
///
/// Always returned, committed or not, so a caller can render a review
/// queue without special-casing partial failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReprocessReport {
    /// The reprocessed document.
    pub document_id: DocumentId,
    /// The staged generation (committed or discarded).
    pub generation_id: GenerationId,
    /// Whether the attempt committed.
    pub committed: bool,
    /// Whether the attempt was cancelled by the caller.
    pub cancelled: bool,
    /// Recovered anchors over total anchors; 1.0 when there were none.
    pub recovery_rate: f32,
    /// Per-anchor outcomes, in anchor order.
    pub outcomes: Vec<RecoveryOutcome>,
}

impl ReprocessReport {
    /// Outcomes classified lost.
    #[must_use]
    pub fn lost(&self) -> Vec<&RecoveryOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == RecoveryStatus::Lost)
            .collect()
    }

    /// Outcomes classified needs-review.
    #[must_use]
    pub fn needs_review(&self) -> Vec<&RecoveryOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == RecoveryStatus::NeedsReview)
            .collect()
    }
}

/// Orchestrates generation staging, anchor recovery, and the commit/abort
/// decision for documents.
///
/// Holds an exclusive advisory lock per document for the whole
/// staging→commit/abort window; a second concurrent attempt fails with
/// [`Error::TransactionConflict`].
pub struct ReprocessingService<G, S>
where
    G: Store,
    S: Segmenter,
{
    store: Arc<G>,
    segmenter: Arc<S>,
    matcher: TieredMatcher,
    remapper: ReferenceRemapper,
    locks: DocumentLockRegistry,
    config: ReprocessingConfig,
}

impl<G, S> ReprocessingService<G, S>
where
    G: Store,
    S: Segmenter,
{
    /// Creates a service wired from one configuration bundle.
    #[must_use]
    pub fn new(store: Arc<G>, segmenter: Arc<S>, config: &PalimpsestConfig) -> Self {
        Self {
            store,
            segmenter,
            matcher: TieredMatcher::new(config.matcher.clone()),
            remapper: ReferenceRemapper::new(config.remap.clone()),
            locks: DocumentLockRegistry::default(),
            config: config.reprocessing.clone(),
        }
    }

    /// Returns the backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<G> {
        &self.store
    }

    /// Ingests a document's first text, creating generation zero as
    /// current.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for empty text or a document that
    /// already has a current generation, or a store/segmenter error.
    #[instrument(skip(self, text), fields(document_id = %document_id, text_len = text.len()))]
    pub fn ingest(&self, document_id: DocumentId, text: &str) -> Result<Generation> {
        if text.trim().is_empty() {
            return Err(Error::InvalidInput("cannot ingest empty text".to_string()));
        }
        if self.store.current_generation(&document_id)?.is_some() {
            return Err(Error::InvalidInput(format!(
                "document '{document_id}' is already ingested; use reprocess for new text"
            )));
        }

        self.store.put_document(&Document::new(document_id.clone()))?;
        let generation = Generation::initial(document_id, text);
        let units = self.build_units(&generation)?;
        self.store.stage_generation(&generation, &units)?;
        tracing::info!(units = units.len(), "Document ingested");
        Ok(generation)
    }

    /// Reprocesses a document against mutated text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransactionConflict`] for a concurrent attempt,
    /// [`Error::InvalidInput`] for bad input, or a store error. A floor
    /// violation is not an error: the report comes back with
    /// `committed: false`.
    pub fn reprocess(&self, document_id: &DocumentId, new_text: &str) -> Result<ReprocessReport> {
        self.reprocess_cancellable(document_id, new_text, &CancellationToken::new())
    }

    /// Like [`Self::reprocess`], but converts an aborted attempt into
    /// [`Error::RecoveryFloorNotMet`] for callers that want the taxonomy
    /// error (e.g. CLI exit codes).
    ///
    /// # Errors
    ///
    /// Everything [`Self::reprocess`] returns, plus the floor violation.
    pub fn reprocess_strict(
        &self,
        document_id: &DocumentId,
        new_text: &str,
    ) -> Result<ReprocessReport> {
        let report = self.reprocess(document_id, new_text)?;
        if !report.committed && !report.cancelled {
            return Err(Error::RecoveryFloorNotMet {
                rate: report.recovery_rate,
                floor: self.config.recovery_floor,
                lost: report.lost().len(),
                needs_review: report.needs_review().len(),
            });
        }
        Ok(report)
    }

    /// Reprocesses with caller-initiated cancellation support.
    ///
    /// # Errors
    ///
    /// See [`Self::reprocess`].
    #[allow(clippy::cast_possible_truncation)]
    #[instrument(skip(self, new_text, token), fields(document_id = %document_id, text_len = new_text.len()))]
    pub fn reprocess_cancellable(
        &self,
        document_id: &DocumentId,
        new_text: &str,
        token: &CancellationToken,
    ) -> Result<ReprocessReport> {
        if new_text.trim().is_empty() {
            return Err(Error::InvalidInput(
                "cannot reprocess to empty text".to_string(),
            ));
        }
        let start = Instant::now();
        let _lock = self.locks.acquire(document_id)?;

        let current = self
            .store
            .current_generation(document_id)?
            .ok_or_else(|| {
                Error::InvalidInput(format!("document '{document_id}' has no current generation"))
            })?;

        let staged = Generation::staged(document_id.clone(), current.sequence + 1, new_text);
        let units = self.build_units(&staged)?;

        let anchors = self.store.anchors_for_document(document_id)?;
        crate::matching::validate_anchors(&anchors)?;

        self.store.stage_generation(&staged, &units)?;
        tracing::debug!(
            generation_id = %staged.id,
            sequence = staged.sequence,
            units = units.len(),
            anchors = anchors.len(),
            "Generation staged"
        );

        // Identity fast path: byte-identical text re-asserts every anchor
        // at its old offsets without running the matcher.
        let outcomes = if staged.content_hash == current.content_hash {
            tracing::debug!("Staged text is identical, taking the exact fast path");
            identity_outcomes(&anchors, &staged.id)
        } else {
            match self.match_anchors(&anchors, &staged, &units, token) {
                Ok(outcomes) => outcomes,
                Err(e) => {
                    // Matching only fails on malformed input or a worker
                    // panic; either way the staging generation must not
                    // survive.
                    self.store.delete_generation(&staged.id)?;
                    return Err(e);
                },
            }
        };

        if token.is_cancelled() {
            self.store.delete_generation(&staged.id)?;
            tracing::info!(generation_id = %staged.id, "Reprocessing cancelled, staging discarded");
            metrics::counter!("reprocess_total", "result" => "cancelled").increment(1);
            return Ok(ReprocessReport {
                document_id: document_id.clone(),
                generation_id: staged.id,
                committed: false,
                cancelled: true,
                recovery_rate: 0.0,
                outcomes,
            });
        }

        let recovery_rate = compute_recovery_rate(&outcomes);
        let committed = recovery_rate >= self.config.recovery_floor;
        if committed {
            self.commit(document_id, &current, &staged, &units, &outcomes)?;
        } else {
            self.store.delete_generation(&staged.id)?;
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let result_label = if committed { "committed" } else { "aborted" };
        tracing::info!(
            generation_id = %staged.id,
            recovery_rate = recovery_rate,
            committed = committed,
            duration_ms = duration_ms,
            "Reprocessing finished"
        );
        metrics::counter!("reprocess_total", "result" => result_label).increment(1);
        metrics::histogram!("reprocess_duration_ms").record(duration_ms as f64);

        Ok(ReprocessReport {
            document_id: document_id.clone(),
            generation_id: staged.id,
            committed,
            cancelled: false,
            recovery_rate,
            outcomes,
        })
    }

    /// Builds structural units for a generation via the segmentation
    /// collaborator.
    fn build_units(&self, generation: &Generation) -> Result<Vec<StructuralUnit>> {
        let specs = self.segmenter.segment(&generation.text)?;
        let mut units = Vec::with_capacity(specs.len());
        for (index, spec) in specs.iter().enumerate() {
            units.push(StructuralUnit::from_spec(
                generation.document_id.clone(),
                generation.id.clone(),
                index,
                &generation.text,
                spec,
            )?);
        }
        Ok(units)
    }

    /// Resolves all anchors against the staged generation with a bounded
    /// worker fan-out. Anchors are independent against the same immutable
    /// text, so outcome equality is order-independent by construction.
    fn match_anchors(
        &self,
        anchors: &[Anchor],
        staged: &Generation,
        units: &[StructuralUnit],
        token: &CancellationToken,
    ) -> Result<Vec<RecoveryOutcome>> {
        if anchors.is_empty() {
            return Ok(Vec::new());
        }
        let workers = self.config.max_workers.clamp(1, anchors.len());
        let chunk_size = anchors.len().div_ceil(workers);

        std::thread::scope(|scope| {
            let handles: Vec<_> = anchors
                .chunks(chunk_size)
                .map(|batch| {
                    scope.spawn(move || -> Result<Vec<RecoveryOutcome>> {
                        let mut outcomes = Vec::with_capacity(batch.len());
                        for anchor in batch {
                            if token.is_cancelled() {
                                break;
                            }
                            outcomes.push(self.matcher.resolve(anchor, staged, units)?);
                        }
                        Ok(outcomes)
                    })
                })
                .collect();

            let mut outcomes = Vec::with_capacity(anchors.len());
            for handle in handles {
                let batch = handle.join().map_err(|_| Error::ExternalService {
                    operation: "match_worker".to_string(),
                    cause: "worker panicked".to_string(),
                })??;
                outcomes.extend(batch);
            }
            Ok(outcomes)
        })
    }

    /// Commits the staged generation: atomic flip, outcome persistence,
    /// validated-edge remapping, then retirement of the old generation.
    fn commit(
        &self,
        document_id: &DocumentId,
        retiring: &Generation,
        staged: &Generation,
        new_units: &[StructuralUnit],
        outcomes: &[RecoveryOutcome],
    ) -> Result<()> {
        self.store.flip_current(document_id, &retiring.id, &staged.id)?;
        self.store.record_outcomes(outcomes)?;

        // Remap while the retired units (and their embeddings) still exist.
        let old_units = self.store.units_for_generation(&retiring.id)?;
        let old_unit_ids: Vec<UnitId> = old_units.iter().map(|u| u.id.clone()).collect();
        let affected = self.store.relationships_touching(&old_unit_ids)?;
        if !affected.is_empty() {
            let remap = self.remapper.remap(&affected, &old_units, new_units);
            self.store.remove_touching(&old_unit_ids)?;
            self.store.upsert_relationships(&remap.surviving_edges())?;
        }

        self.store.delete_generation(&retiring.id)?;
        Ok(())
    }
}

/// Exact outcomes at the old offsets for the identity fast path.
fn identity_outcomes(anchors: &[Anchor], generation_id: &GenerationId) -> Vec<RecoveryOutcome> {
    anchors
        .iter()
        .map(|anchor| {
            RecoveryOutcome::resolved(
                anchor.id.clone(),
                generation_id.clone(),
                anchor.start_offset,
                anchor.end_offset,
                1.0,
                RecoveryTier::Exact,
                RecoveryStatus::Recovered,
            )
        })
        .collect()
}

/// Recovered anchors over total; trivially 1.0 with no anchors.
#[allow(clippy::cast_precision_loss)]
fn compute_recovery_rate(outcomes: &[RecoveryOutcome]) -> f32 {
    if outcomes.is_empty() {
        return 1.0;
    }
    let recovered = outcomes.iter().filter(|o| o.is_recovered()).count();
    recovered as f32 / outcomes.len() as f32
}
