//! Cross-domain bridge engine.
//!
//! The only engine permitted to call the external semantic-judgment
//! collaborator, and therefore the only one whose cost must be actively
//! managed. Candidates are filtered hard before any call goes out:
//!
//! 1. Both endpoints important enough to be worth a judgment
//! 2. Cross-document pairs only
//! 3. Differing domain labels
//! 4. Keyword overlap inside the sweet-spot band: near-zero overlap means
//!    unrelated units, near-total overlap means redundant ones
//! 5. At most `max_candidates` survivors per source unit, best first
//!
//! Each surviving pair costs exactly one judgment call. A failed call
//! counts as "not connected" for that pair and is logged; it never aborts
//! the batch.

// Allow cast precision loss for token-set ratios.
#![allow(clippy::cast_precision_loss)]

use super::DetectionEngine;
use crate::Result;
use crate::judge::BridgeJudge;
use crate::models::{EngineKind, EngineVerdict, StructuralUnit};
use std::collections::HashSet;
use std::sync::Arc;

/// Minimum token length considered a keyword.
const KEYWORD_MIN_LEN: usize = 4;

/// Policy constants for bridge pre-filtering.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Both endpoints must score at least this importance.
    pub importance_floor: f32,
    /// Lower edge of the keyword-overlap sweet spot.
    pub overlap_min: f32,
    /// Upper edge of the keyword-overlap sweet spot.
    pub overlap_max: f32,
    /// Judgment-call cap per source unit.
    pub max_candidates: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            importance_floor: 0.5,
            overlap_min: 0.2,
            overlap_max: 0.7,
            max_candidates: 15,
        }
    }
}

impl BridgeConfig {
    /// Loads configuration from environment variables.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `PALIMPSEST_BRIDGE_IMPORTANCE_FLOOR` | Endpoint importance floor | 0.5 |
    /// | `PALIMPSEST_BRIDGE_OVERLAP_MIN` | Sweet-spot lower edge | 0.2 |
    /// | `PALIMPSEST_BRIDGE_OVERLAP_MAX` | Sweet-spot upper edge | 0.7 |
    /// | `PALIMPSEST_BRIDGE_MAX_CANDIDATES` | Calls per source unit | 15 |
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("PALIMPSEST_BRIDGE_IMPORTANCE_FLOOR")
            && let Ok(parsed) = v.parse::<f32>()
        {
            self.importance_floor = parsed.clamp(0.0, 1.0);
        }
        if let Ok(v) = std::env::var("PALIMPSEST_BRIDGE_OVERLAP_MIN")
            && let Ok(parsed) = v.parse::<f32>()
        {
            self.overlap_min = parsed.clamp(0.0, 1.0);
        }
        if let Ok(v) = std::env::var("PALIMPSEST_BRIDGE_OVERLAP_MAX")
            && let Ok(parsed) = v.parse::<f32>()
        {
            self.overlap_max = parsed.clamp(0.0, 1.0);
        }
        if let Ok(v) = std::env::var("PALIMPSEST_BRIDGE_MAX_CANDIDATES")
            && let Ok(parsed) = v.parse::<usize>()
        {
            self.max_candidates = parsed.max(1);
        }
        self
    }

    /// Sets the importance floor.
    #[must_use]
    pub fn with_importance_floor(mut self, floor: f32) -> Self {
        self.importance_floor = floor.clamp(0.0, 1.0);
        self
    }

    /// Sets the keyword-overlap band.
    #[must_use]
    pub fn with_overlap_band(mut self, min: f32, max: f32) -> Self {
        self.overlap_min = min.clamp(0.0, 1.0);
        self.overlap_max = max.clamp(0.0, 1.0);
        self
    }

    /// Sets the per-source judgment-call cap.
    #[must_use]
    pub const fn with_max_candidates(mut self, cap: usize) -> Self {
        self.max_candidates = cap;
        self
    }
}

/// Jaccard overlap of the keyword sets of two texts, in `[0, 1]`.
///
/// Keywords are lowercased alphanumeric tokens of at least four
/// characters, which drops most function words without a stopword list.
#[must_use]
pub fn keyword_overlap(a: &str, b: &str) -> f32 {
    let set_a = keyword_set(a);
    let set_b = keyword_set(b);
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.len() + set_b.len() - intersection;
    intersection as f32 / union as f32
}

fn keyword_set(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= KEYWORD_MIN_LEN)
        .map(str::to_lowercase)
        .collect()
}

/// Detects cross-domain conceptual links via the judgment collaborator.
pub struct BridgeEngine<J: BridgeJudge + ?Sized> {
    judge: Arc<J>,
    config: BridgeConfig,
}

impl<J: BridgeJudge + ?Sized> BridgeEngine<J> {
    /// Creates an engine over the given judge.
    #[must_use]
    pub fn new(judge: Arc<J>, config: BridgeConfig) -> Self {
        Self { judge, config }
    }

    /// Applies the pre-filter ladder and returns surviving candidates,
    /// best first, capped.
    fn prefilter<'a>(
        &self,
        source: &StructuralUnit,
        candidates: &'a [StructuralUnit],
    ) -> Vec<&'a StructuralUnit> {
        let mut survivors: Vec<&StructuralUnit> = candidates
            .iter()
            .filter(|c| {
                c.id != source.id
                    && c.importance_score >= self.config.importance_floor
                    && c.document_id != source.document_id
                    && c.domain_label != source.domain_label
                    && {
                        let overlap = keyword_overlap(&source.text, &c.text);
                        overlap >= self.config.overlap_min && overlap <= self.config.overlap_max
                    }
            })
            .collect();

        survivors.sort_by(|a, b| {
            b.importance_score
                .partial_cmp(&a.importance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        survivors.truncate(self.config.max_candidates);
        survivors
    }
}

impl<J: BridgeJudge + ?Sized> DetectionEngine for BridgeEngine<J> {
    fn kind(&self) -> EngineKind {
        EngineKind::Bridge
    }

    fn detect(
        &self,
        source: &StructuralUnit,
        candidates: &[StructuralUnit],
    ) -> Result<Vec<EngineVerdict>> {
        if source.importance_score < self.config.importance_floor {
            return Ok(Vec::new());
        }

        let survivors = self.prefilter(source, candidates);
        tracing::debug!(
            source = %source.id,
            candidates = candidates.len(),
            survivors = survivors.len(),
            "Bridge pre-filter finished"
        );

        let mut verdicts = Vec::new();
        for candidate in survivors {
            match self.judge.judge(source, candidate) {
                Ok(verdict) if verdict.connected => {
                    tracing::debug!(
                        source = %source.id,
                        target = %candidate.id,
                        bridge_type = %verdict.bridge_type,
                        strength = verdict.strength,
                        "Bridge connection found"
                    );
                    verdicts.push(EngineVerdict::new(
                        source.id.clone(),
                        candidate.id.clone(),
                        EngineKind::Bridge,
                        verdict.strength,
                    ));
                },
                Ok(_) => {},
                Err(e) => {
                    // One bad call degrades one pair, not the batch.
                    tracing::warn!(
                        source = %source.id,
                        target = %candidate.id,
                        error = %e,
                        "Judge call failed, scoring pair as not connected"
                    );
                    metrics::counter!("bridge_judge_failures_total").increment(1);
                },
            }
        }
        Ok(verdicts)
    }
}
