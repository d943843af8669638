//! Cross-generation relationship remapping.
//!
//! After a commit retires a generation, validated edges whose endpoints
//! lived in it must be relocated onto the replacement units. Each mutated
//! endpoint is matched to the replacement unit with the highest embedding
//! cosine similarity; untouched endpoints pass through unchanged. The edge
//! is then classified by the *minimum* of its endpoint similarities — an
//! edge is only as trustworthy as its weakest endpoint. Edges below the
//! review band are dropped outright: a stale reference to a deleted unit is
//! a correctness bug, not a feature.

use crate::embedding::cosine_similarity;
use crate::models::{Relationship, StructuralUnit, UnitId};
use std::collections::HashMap;
use tracing::instrument;

/// Policy thresholds for endpoint remapping.
#[derive(Debug, Clone)]
pub struct RemapConfig {
    /// Minimum endpoint similarity to auto-remap without review.
    pub auto_threshold: f32,
    /// Minimum endpoint similarity to keep the edge flagged for review.
    pub review_threshold: f32,
}

impl Default for RemapConfig {
    fn default() -> Self {
        Self {
            auto_threshold: 0.95,
            review_threshold: 0.85,
        }
    }
}

impl RemapConfig {
    /// Loads configuration from environment variables.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `PALIMPSEST_REMAP_AUTO_THRESHOLD` | Auto-remap similarity | 0.95 |
    /// | `PALIMPSEST_REMAP_REVIEW_THRESHOLD` | Review-band similarity | 0.85 |
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("PALIMPSEST_REMAP_AUTO_THRESHOLD")
            && let Ok(parsed) = v.parse::<f32>()
        {
            self.auto_threshold = parsed.clamp(0.0, 1.0);
        }
        if let Ok(v) = std::env::var("PALIMPSEST_REMAP_REVIEW_THRESHOLD")
            && let Ok(parsed) = v.parse::<f32>()
        {
            self.review_threshold = parsed.clamp(0.0, 1.0);
        }
        self
    }

    /// Sets the auto-remap threshold.
    #[must_use]
    pub fn with_auto_threshold(mut self, threshold: f32) -> Self {
        self.auto_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Sets the review threshold.
    #[must_use]
    pub fn with_review_threshold(mut self, threshold: f32) -> Self {
        self.review_threshold = threshold.clamp(0.0, 1.0);
        self
    }
}

/// Structured result of one remapping pass, shaped so a caller can render a
/// review queue without re-deriving similarity scores.
#[derive(Debug, Clone, Default)]
pub struct RemapReport {
    /// Edges relocated with full confidence; `validated` stays true.
    pub remapped: Vec<Relationship>,
    /// Edges relocated into the review band; flagged for re-confirmation.
    pub needs_review: Vec<Relationship>,
    /// Edges whose best endpoint match fell below the review band.
    pub dropped: Vec<Relationship>,
}

impl RemapReport {
    /// Returns every edge that survives the pass, ready for upserting.
    #[must_use]
    pub fn surviving_edges(&self) -> Vec<Relationship> {
        let mut edges = self.remapped.clone();
        edges.extend(self.needs_review.iter().cloned());
        edges
    }

    /// Total number of edges considered.
    #[must_use]
    pub fn total(&self) -> usize {
        self.remapped.len() + self.needs_review.len() + self.dropped.len()
    }
}

/// How one endpoint fared against the replacement units.
#[derive(Debug)]
struct EndpointMatch {
    unit_id: UnitId,
    similarity: f32,
}

/// Relocates validated relationship edges after a generation swap.
#[derive(Debug, Clone, Default)]
pub struct ReferenceRemapper {
    config: RemapConfig,
}

impl ReferenceRemapper {
    /// Creates a remapper with the given thresholds.
    #[must_use]
    pub const fn new(config: RemapConfig) -> Self {
        Self { config }
    }

    /// Remaps edges touching the retired units onto the replacement units.
    ///
    /// Pure with respect to storage: the caller collects the affected edges
    /// beforehand and persists the surviving ones afterwards, inside its
    /// own transaction boundary. Unvalidated edges are dropped here; the
    /// detection orchestrator recomputes them against the new generation.
    #[instrument(skip_all, fields(edges = edges.len(), retired = retired_units.len(), replacement = replacement_units.len()))]
    #[must_use]
    pub fn remap(
        &self,
        edges: &[Relationship],
        retired_units: &[StructuralUnit],
        replacement_units: &[StructuralUnit],
    ) -> RemapReport {
        let retired: HashMap<&UnitId, &StructuralUnit> =
            retired_units.iter().map(|u| (&u.id, u)).collect();

        let mut report = RemapReport::default();
        for edge in edges {
            if !edge.validated {
                report.dropped.push(edge.clone());
                continue;
            }

            let source = Self::resolve_endpoint(&edge.source_unit_id, &retired, replacement_units);
            let target = Self::resolve_endpoint(&edge.target_unit_id, &retired, replacement_units);
            let (Some(source), Some(target)) = (source, target) else {
                tracing::debug!(edge_id = %edge.id, "Dropping edge with unresolvable endpoint");
                report.dropped.push(edge.clone());
                continue;
            };

            if source.unit_id == target.unit_id {
                // Both endpoints collapsed onto one unit; a self-edge says
                // nothing and is dropped.
                report.dropped.push(edge.clone());
                continue;
            }

            let min_similarity = source.similarity.min(target.similarity);
            let mut relocated = edge.clone();
            relocated.source_unit_id = source.unit_id;
            relocated.target_unit_id = target.unit_id;

            if min_similarity >= self.config.auto_threshold {
                relocated.needs_review = false;
                metrics::counter!("remap_edges_total", "result" => "auto").increment(1);
                report.remapped.push(relocated);
            } else if min_similarity >= self.config.review_threshold {
                relocated.needs_review = true;
                metrics::counter!("remap_edges_total", "result" => "needs_review").increment(1);
                report.needs_review.push(relocated);
            } else {
                metrics::counter!("remap_edges_total", "result" => "dropped").increment(1);
                report.dropped.push(edge.clone());
            }
        }

        tracing::info!(
            auto = report.remapped.len(),
            needs_review = report.needs_review.len(),
            dropped = report.dropped.len(),
            "Remap pass finished"
        );
        report
    }

    /// Resolves one endpoint: untouched endpoints pass through at full
    /// similarity, retired endpoints move to their best embedding match.
    fn resolve_endpoint(
        unit_id: &UnitId,
        retired: &HashMap<&UnitId, &StructuralUnit>,
        replacement_units: &[StructuralUnit],
    ) -> Option<EndpointMatch> {
        let Some(old_unit) = retired.get(unit_id) else {
            return Some(EndpointMatch {
                unit_id: unit_id.clone(),
                similarity: 1.0,
            });
        };

        let mut best: Option<EndpointMatch> = None;
        for candidate in replacement_units {
            let similarity = cosine_similarity(&old_unit.embedding, &candidate.embedding);
            if best.as_ref().is_none_or(|b| similarity > b.similarity) {
                best = Some(EndpointMatch {
                    unit_id: candidate.id.clone(),
                    similarity,
                });
            }
        }
        best
    }
}
