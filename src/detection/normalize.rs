//! Pluggable score normalization.
//!
//! Engines score on incompatible scales (cosine similarity, stance
//! agreement, judged strength), so each engine's raw scores are normalized
//! independently before the weighted combination.

/// Trait for score normalization strategies.
pub trait ScoreNormalizer: Send + Sync {
    /// Returns the strategy name for logging.
    fn name(&self) -> &'static str;

    /// Normalizes the scores in place to `[0, 1]`.
    fn normalize(&self, scores: &mut [f32]);
}

/// Linear min-max normalization.
///
/// Maps the batch minimum to 0 and the batch maximum to 1. A degenerate
/// batch (all scores equal) maps to 1.0 when positive, 0.0 otherwise, so a
/// single strong verdict is not erased by its own lack of competition.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinMaxNormalizer;

impl ScoreNormalizer for MinMaxNormalizer {
    fn name(&self) -> &'static str {
        "min_max"
    }

    fn normalize(&self, scores: &mut [f32]) {
        if scores.is_empty() {
            return;
        }
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for &score in scores.iter() {
            min = min.min(score);
            max = max.max(score);
        }
        let range = max - min;
        if range <= f32::EPSILON {
            let level = if max > 0.0 { 1.0 } else { 0.0 };
            for score in scores.iter_mut() {
                *score = level;
            }
            return;
        }
        for score in scores.iter_mut() {
            *score = (*score - min) / range;
        }
    }
}
