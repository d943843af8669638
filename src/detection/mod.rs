//! Multi-engine relationship detection.
//!
//! Runs independent, side-effect-free detection engines over a document's
//! structural units, normalizes each engine's raw scores, and folds them
//! into weighted relationship edges.
//!
//! # Engines
//!
//! | Engine | Signal | External calls |
//! |--------|--------|----------------|
//! | [`SimilarityEngine`] | Embedding cosine similarity | none |
//! | [`ContradictionEngine`] | Opposed stances on a shared topic | none |
//! | [`BridgeEngine`] | Judged cross-domain conceptual links | one per surviving pair |
//!
//! Engines run concurrently, each under its own deadline inside a global
//! batch budget. A failed or overrunning engine contributes zero for its
//! pairs; the batch always completes with whatever the healthy engines
//! produced.

mod bridge;
mod contradiction;
mod normalize;
mod similarity;

pub use bridge::{BridgeConfig, BridgeEngine, keyword_overlap};
pub use contradiction::ContradictionEngine;
pub use normalize::{MinMaxNormalizer, ScoreNormalizer};
pub use similarity::SimilarityEngine;

use crate::models::{DocumentId, EngineKind, EngineVerdict, Relationship, StructuralUnit, UnitId};
use crate::storage::{GenerationStore, RelationshipStore};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::instrument;

/// Trait for relationship-detection engines.
///
/// Engines are pure detectors: given one source unit and a candidate set,
/// they return per-pair verdicts and touch nothing else.
pub trait DetectionEngine: Send + Sync {
    /// Returns the engine kind, which selects its combination weight.
    fn kind(&self) -> EngineKind;

    /// Scores the source unit against each candidate.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot produce verdicts at all; the
    /// orchestrator isolates the failure to this engine's contribution.
    fn detect(
        &self,
        source: &StructuralUnit,
        candidates: &[StructuralUnit],
    ) -> Result<Vec<EngineVerdict>>;
}

/// Per-engine combination weights.
///
/// A policy vector: set once for a deployment, not revisited per document.
#[derive(Debug, Clone, Copy)]
pub struct EngineWeights {
    /// Weight of the similarity engine.
    pub similarity: f32,
    /// Weight of the contradiction engine.
    pub contradiction: f32,
    /// Weight of the bridge engine.
    pub bridge: f32,
}

impl Default for EngineWeights {
    fn default() -> Self {
        Self {
            similarity: 0.35,
            contradiction: 0.25,
            bridge: 0.40,
        }
    }
}

impl EngineWeights {
    /// Returns the weight for an engine kind.
    #[must_use]
    pub const fn get(&self, kind: EngineKind) -> f32 {
        match kind {
            EngineKind::Similarity => self.similarity,
            EngineKind::Contradiction => self.contradiction,
            EngineKind::Bridge => self.bridge,
        }
    }
}

/// Configuration for the detection orchestrator.
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Per-engine combination weights.
    pub weights: EngineWeights,
    /// Combined strengths below this are discarded, not persisted as
    /// zero-strength noise.
    pub min_strength: f32,
    /// Deadline for a single engine within a batch.
    pub engine_timeout_ms: u64,
    /// Global deadline for the whole batch.
    pub batch_timeout_ms: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            weights: EngineWeights::default(),
            min_strength: 0.30,
            engine_timeout_ms: 10_000,
            batch_timeout_ms: 30_000,
        }
    }
}

impl DetectionConfig {
    /// Loads configuration from environment variables.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `PALIMPSEST_DETECTION_WEIGHT_SIMILARITY` | Similarity weight | 0.35 |
    /// | `PALIMPSEST_DETECTION_WEIGHT_CONTRADICTION` | Contradiction weight | 0.25 |
    /// | `PALIMPSEST_DETECTION_WEIGHT_BRIDGE` | Bridge weight | 0.40 |
    /// | `PALIMPSEST_DETECTION_MIN_STRENGTH` | Edge discard floor | 0.30 |
    /// | `PALIMPSEST_DETECTION_ENGINE_TIMEOUT_MS` | Per-engine deadline | 10000 |
    /// | `PALIMPSEST_DETECTION_BATCH_TIMEOUT_MS` | Batch deadline | 30000 |
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("PALIMPSEST_DETECTION_WEIGHT_SIMILARITY")
            && let Ok(parsed) = v.parse::<f32>()
        {
            self.weights.similarity = parsed.max(0.0);
        }
        if let Ok(v) = std::env::var("PALIMPSEST_DETECTION_WEIGHT_CONTRADICTION")
            && let Ok(parsed) = v.parse::<f32>()
        {
            self.weights.contradiction = parsed.max(0.0);
        }
        if let Ok(v) = std::env::var("PALIMPSEST_DETECTION_WEIGHT_BRIDGE")
            && let Ok(parsed) = v.parse::<f32>()
        {
            self.weights.bridge = parsed.max(0.0);
        }
        if let Ok(v) = std::env::var("PALIMPSEST_DETECTION_MIN_STRENGTH")
            && let Ok(parsed) = v.parse::<f32>()
        {
            self.min_strength = parsed.clamp(0.0, 1.0);
        }
        if let Ok(v) = std::env::var("PALIMPSEST_DETECTION_ENGINE_TIMEOUT_MS")
            && let Ok(parsed) = v.parse::<u64>()
        {
            self.engine_timeout_ms = parsed.max(1);
        }
        if let Ok(v) = std::env::var("PALIMPSEST_DETECTION_BATCH_TIMEOUT_MS")
            && let Ok(parsed) = v.parse::<u64>()
        {
            self.batch_timeout_ms = parsed.max(1);
        }
        self
    }

    /// Sets the combination weights.
    #[must_use]
    pub const fn with_weights(mut self, weights: EngineWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Sets the edge discard floor.
    #[must_use]
    pub fn with_min_strength(mut self, min_strength: f32) -> Self {
        self.min_strength = min_strength.clamp(0.0, 1.0);
        self
    }

    /// Sets the per-engine deadline.
    #[must_use]
    pub const fn with_engine_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.engine_timeout_ms = timeout_ms;
        self
    }
}

/// How source units pair with candidates in a batch.
#[derive(Debug, Clone, Copy)]
enum PairScope {
    /// Each unit against the units after it (no mirrored pairs).
    Within,
    /// Every source against every candidate.
    Between,
}

/// Runs detection engines concurrently and combines their scores.
///
/// # Example
///
/// ```rust,ignore
/// use palimpsest::detection::{DetectionOrchestrator, SimilarityEngine, ContradictionEngine};
/// use std::sync::Arc;
///
/// let orchestrator = DetectionOrchestrator::new(config)
///     .with_engine(Arc::new(SimilarityEngine::new()))
///     .with_engine(Arc::new(ContradictionEngine::new()));
/// let edges = orchestrator.detect_within(&units);
/// ```
pub struct DetectionOrchestrator {
    engines: Vec<Arc<dyn DetectionEngine>>,
    normalizer: Arc<dyn ScoreNormalizer>,
    config: DetectionConfig,
}

impl DetectionOrchestrator {
    /// Creates an orchestrator with no engines and min-max normalization.
    #[must_use]
    pub fn new(config: DetectionConfig) -> Self {
        Self {
            engines: Vec::new(),
            normalizer: Arc::new(MinMaxNormalizer),
            config,
        }
    }

    /// Adds an engine.
    #[must_use]
    pub fn with_engine(mut self, engine: Arc<dyn DetectionEngine>) -> Self {
        self.engines.push(engine);
        self
    }

    /// Replaces the normalization strategy.
    #[must_use]
    pub fn with_normalizer(mut self, normalizer: Arc<dyn ScoreNormalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Detects relationships among one document's units.
    #[must_use]
    pub fn detect_within(&self, units: &[StructuralUnit]) -> Vec<Relationship> {
        let units: Arc<Vec<StructuralUnit>> = Arc::new(units.to_vec());
        self.run_batch(&units, &units, PairScope::Within)
    }

    /// Detects relationships from one document's units to another's.
    #[must_use]
    pub fn detect_between(
        &self,
        sources: &[StructuralUnit],
        candidates: &[StructuralUnit],
    ) -> Vec<Relationship> {
        let sources = Arc::new(sources.to_vec());
        let candidates = Arc::new(candidates.to_vec());
        self.run_batch(&sources, &candidates, PairScope::Between)
    }

    /// Recomputes a document's unvalidated edges against its current
    /// generation and persists the result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an unknown document, or a store
    /// error. Engine failures never surface here.
    pub fn detect_relationships<S>(
        &self,
        store: &S,
        document_id: &DocumentId,
    ) -> Result<Vec<Relationship>>
    where
        S: GenerationStore + RelationshipStore,
    {
        let units = store.current_units(document_id)?;
        if units.is_empty() {
            return Err(Error::InvalidInput(format!(
                "document '{document_id}' has no current structural units"
            )));
        }
        let edges = self.detect_within(&units);

        let unit_ids: Vec<UnitId> = units.iter().map(|u| u.id.clone()).collect();
        store.remove_unvalidated_touching(&unit_ids)?;
        store.upsert_relationships(&edges)?;
        Ok(edges)
    }

    /// Detects and persists cross-document edges between two documents'
    /// current generations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if either document has no current
    /// units, or a store error.
    pub fn detect_cross_document<S>(
        &self,
        store: &S,
        source_document: &DocumentId,
        target_document: &DocumentId,
    ) -> Result<Vec<Relationship>>
    where
        S: GenerationStore + RelationshipStore,
    {
        let sources = store.current_units(source_document)?;
        let candidates = store.current_units(target_document)?;
        if sources.is_empty() || candidates.is_empty() {
            return Err(Error::InvalidInput(
                "cross-document detection requires current units on both sides".to_string(),
            ));
        }
        let edges = self.detect_between(&sources, &candidates);
        store.upsert_relationships(&edges)?;
        Ok(edges)
    }

    /// Fans the engines out, enforces deadlines, and combines the verdicts.
    #[allow(clippy::cast_possible_truncation)]
    #[instrument(skip_all, fields(engines = self.engines.len(), sources = sources.len()))]
    fn run_batch(
        &self,
        sources: &Arc<Vec<StructuralUnit>>,
        candidates: &Arc<Vec<StructuralUnit>>,
        scope: PairScope,
    ) -> Vec<Relationship> {
        let batch_start = Instant::now();
        let batch_budget = Duration::from_millis(self.config.batch_timeout_ms);
        let engine_budget = Duration::from_millis(self.config.engine_timeout_ms);

        // One detached worker per engine; an overrunning worker is
        // abandoned at its deadline and its late result discarded with the
        // channel.
        let mut pending = Vec::with_capacity(self.engines.len());
        for engine in &self.engines {
            let kind = engine.kind();
            let (tx, rx) = mpsc::channel();
            let engine = Arc::clone(engine);
            let sources = Arc::clone(sources);
            let candidates = Arc::clone(candidates);
            std::thread::spawn(move || {
                let result = run_engine(engine.as_ref(), &sources, &candidates, scope);
                let _ = tx.send(result);
            });
            pending.push((kind, rx));
        }

        let mut engine_results: Vec<(EngineKind, Vec<EngineVerdict>)> = Vec::new();
        for (kind, rx) in pending {
            let remaining = batch_budget.saturating_sub(batch_start.elapsed());
            let wait = engine_budget.min(remaining);
            match rx.recv_timeout(wait) {
                Ok(Ok(verdicts)) => {
                    tracing::debug!(engine = kind.as_str(), verdicts = verdicts.len(), "Engine finished");
                    engine_results.push((kind, verdicts));
                },
                Ok(Err(e)) => {
                    tracing::warn!(engine = kind.as_str(), error = %e, "Engine failed, zeroing its contribution");
                    metrics::counter!(
                        "detection_engine_failures_total",
                        "engine" => kind.as_str(),
                        "reason" => "error"
                    )
                    .increment(1);
                },
                Err(_) => {
                    tracing::warn!(engine = kind.as_str(), "Engine deadline exceeded, zeroing its contribution");
                    metrics::counter!(
                        "detection_engine_failures_total",
                        "engine" => kind.as_str(),
                        "reason" => "timeout"
                    )
                    .increment(1);
                },
            }
        }

        let edges = self.combine(engine_results);
        let duration_ms = batch_start.elapsed().as_millis() as u64;
        tracing::info!(edges = edges.len(), duration_ms = duration_ms, "Detection batch finished");
        metrics::histogram!("detection_batch_duration_ms").record(duration_ms as f64);
        edges
    }

    /// Normalizes per-engine scores and folds them into weighted edges.
    fn combine(&self, engine_results: Vec<(EngineKind, Vec<EngineVerdict>)>) -> Vec<Relationship> {
        struct Accumulated {
            strength: f32,
            top_engine: EngineKind,
            top_contribution: f32,
        }

        let mut pairs: HashMap<(UnitId, UnitId), Accumulated> = HashMap::new();
        for (kind, verdicts) in engine_results {
            let mut scores: Vec<f32> = verdicts.iter().map(|v| v.score).collect();
            self.normalizer.normalize(&mut scores);
            let weight = self.config.weights.get(kind);

            for (verdict, normalized) in verdicts.iter().zip(scores) {
                let contribution = weight * normalized;
                let entry = pairs
                    .entry((verdict.source_unit_id.clone(), verdict.target_unit_id.clone()))
                    .or_insert(Accumulated {
                        strength: 0.0,
                        top_engine: kind,
                        top_contribution: f32::NEG_INFINITY,
                    });
                entry.strength += contribution;
                if contribution > entry.top_contribution {
                    entry.top_engine = kind;
                    entry.top_contribution = contribution;
                }
            }
        }

        let total = pairs.len();
        let mut edges: Vec<Relationship> = pairs
            .into_iter()
            .filter(|(_, acc)| acc.strength >= self.config.min_strength)
            .map(|((source, target), acc)| {
                Relationship::new(source, target, acc.top_engine).with_strength(acc.strength)
            })
            .collect();
        if edges.len() < total {
            tracing::debug!(
                discarded = total - edges.len(),
                floor = self.config.min_strength,
                "Discarded sub-floor edges"
            );
        }

        edges.sort_by(|a, b| {
            b.strength
                .partial_cmp(&a.strength)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.source_unit_id.as_str().cmp(b.source_unit_id.as_str()))
                .then_with(|| a.target_unit_id.as_str().cmp(b.target_unit_id.as_str()))
        });
        edges
    }
}

/// Runs one engine over the whole batch.
fn run_engine(
    engine: &dyn DetectionEngine,
    sources: &[StructuralUnit],
    candidates: &[StructuralUnit],
    scope: PairScope,
) -> Result<Vec<EngineVerdict>> {
    let mut verdicts = Vec::new();
    match scope {
        PairScope::Within => {
            for i in 0..sources.len() {
                verdicts.extend(engine.detect(&sources[i], &sources[i + 1..])?);
            }
        },
        PairScope::Between => {
            for source in sources {
                verdicts.extend(engine.detect(source, candidates)?);
            }
        },
    }
    Ok(verdicts)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::models::{DocumentId, GenerationId, UnitId};

    fn unit(id: &str, embedding: Vec<f32>) -> StructuralUnit {
        StructuralUnit {
            id: UnitId::new(id),
            document_id: DocumentId::new("doc"),
            generation_id: GenerationId::new("gen"),
            index: 0,
            start_offset: 0,
            end_offset: 1,
            text: String::new(),
            embedding,
            domain_label: String::new(),
            importance_score: 0.5,
            topic: None,
            stance: None,
        }
    }

    /// Engine returning a fixed verdict per ordered pair.
    struct FixedEngine {
        kind: EngineKind,
        score: f32,
    }

    impl DetectionEngine for FixedEngine {
        fn kind(&self) -> EngineKind {
            self.kind
        }

        fn detect(
            &self,
            source: &StructuralUnit,
            candidates: &[StructuralUnit],
        ) -> Result<Vec<EngineVerdict>> {
            Ok(candidates
                .iter()
                .filter(|c| c.id != source.id)
                .map(|c| EngineVerdict::new(source.id.clone(), c.id.clone(), self.kind, self.score))
                .collect())
        }
    }

    struct FailingEngine;

    impl DetectionEngine for FailingEngine {
        fn kind(&self) -> EngineKind {
            EngineKind::Contradiction
        }

        fn detect(&self, _: &StructuralUnit, _: &[StructuralUnit]) -> Result<Vec<EngineVerdict>> {
            Err(Error::ExternalService {
                operation: "contradiction_metadata".to_string(),
                cause: "simulated".to_string(),
            })
        }
    }

    struct SleepyEngine {
        sleep_ms: u64,
    }

    impl DetectionEngine for SleepyEngine {
        fn kind(&self) -> EngineKind {
            EngineKind::Bridge
        }

        fn detect(
            &self,
            source: &StructuralUnit,
            candidates: &[StructuralUnit],
        ) -> Result<Vec<EngineVerdict>> {
            std::thread::sleep(Duration::from_millis(self.sleep_ms));
            Ok(candidates
                .iter()
                .map(|c| EngineVerdict::new(source.id.clone(), c.id.clone(), EngineKind::Bridge, 1.0))
                .collect())
        }
    }

    #[test]
    fn test_weighted_combination_is_deterministic() {
        let orchestrator = DetectionOrchestrator::new(DetectionConfig::default())
            .with_engine(Arc::new(FixedEngine {
                kind: EngineKind::Similarity,
                score: 0.9,
            }))
            .with_engine(Arc::new(FixedEngine {
                kind: EngineKind::Contradiction,
                score: 0.7,
            }));
        let units = vec![unit("u-1", vec![1.0]), unit("u-2", vec![1.0])];

        let first = orchestrator.detect_within(&units);
        let second = orchestrator.detect_within(&units);

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.strength, b.strength);
            assert_eq!(a.engine, b.engine);
            assert_eq!(a.source_unit_id, b.source_unit_id);
        }
    }

    #[test]
    fn test_engine_failure_zeroes_only_its_contribution() {
        let orchestrator = DetectionOrchestrator::new(
            DetectionConfig::default().with_min_strength(0.1),
        )
        .with_engine(Arc::new(FixedEngine {
            kind: EngineKind::Similarity,
            score: 0.9,
        }))
        .with_engine(Arc::new(FailingEngine));
        let units = vec![unit("u-1", vec![1.0]), unit("u-2", vec![1.0])];

        let edges = orchestrator.detect_within(&units);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].engine, EngineKind::Similarity);
        // Only the similarity weight contributes.
        assert!((edges[0].strength - 0.35).abs() < 1e-6);
    }

    #[test]
    fn test_slow_engine_is_cut_off_at_deadline() {
        let orchestrator = DetectionOrchestrator::new(
            DetectionConfig::default()
                .with_engine_timeout_ms(50)
                .with_min_strength(0.1),
        )
        .with_engine(Arc::new(FixedEngine {
            kind: EngineKind::Similarity,
            score: 0.9,
        }))
        .with_engine(Arc::new(SleepyEngine { sleep_ms: 2_000 }));
        let units = vec![unit("u-1", vec![1.0]), unit("u-2", vec![1.0])];

        let start = Instant::now();
        let edges = orchestrator.detect_within(&units);
        assert!(start.elapsed() < Duration::from_millis(1_500));
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].engine, EngineKind::Similarity);
    }

    #[test]
    fn test_sub_floor_edges_are_discarded() {
        let orchestrator = DetectionOrchestrator::new(
            DetectionConfig::default().with_min_strength(0.99),
        )
        .with_engine(Arc::new(FixedEngine {
            kind: EngineKind::Similarity,
            score: 0.9,
        }));
        let units = vec![unit("u-1", vec![1.0]), unit("u-2", vec![1.0])];

        assert!(orchestrator.detect_within(&units).is_empty());
    }

    #[test]
    fn test_within_scope_produces_no_mirrored_pairs() {
        let orchestrator = DetectionOrchestrator::new(
            DetectionConfig::default().with_min_strength(0.1),
        )
        .with_engine(Arc::new(FixedEngine {
            kind: EngineKind::Similarity,
            score: 1.0,
        }));
        let units = vec![unit("u-1", vec![1.0]), unit("u-2", vec![1.0]), unit("u-3", vec![1.0])];

        let edges = orchestrator.detect_within(&units);
        // 3 units -> 3 unordered pairs.
        assert_eq!(edges.len(), 3);
        let mut seen = std::collections::HashSet::new();
        for edge in &edges {
            let mut key = [edge.source_unit_id.as_str(), edge.target_unit_id.as_str()];
            key.sort_unstable();
            assert!(seen.insert(key.join("-")));
        }
    }
}
