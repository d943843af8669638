//! Four-tier anchor relocation.
//!
//! Resolves one anchor's new location in a target generation's text through
//! strictly escalating strategies. Each tier is attempted only if the
//! previous one failed to clear its acceptance bar; a miss is a typed
//! `None`, never an error. Only malformed input (empty anchor text) is
//! rejected up front.

use crate::models::{Anchor, Generation, RecoveryOutcome, RecoveryStatus, RecoveryTier, StructuralUnit};
use crate::Result;
use std::time::Instant;
use tracing::instrument;

use super::shingle::ShingleSet;
use super::window::{WindowParams, windowed_similarity_bytes};

/// Policy constants for the tiered matcher.
///
/// All thresholds are policy, not derived values, and can be overridden via
/// the config file or `PALIMPSEST_MATCHER_*` environment variables.
#[derive(Debug, Clone)]
pub struct MatcherConfig {
    /// Confidence at or above which an outcome is commit-eligible.
    pub recovered_threshold: f32,
    /// Confidence at or above which an outcome enters the review band.
    pub review_threshold: f32,
    /// Jaccard floor for the global shingle fallback.
    pub shingle_floor: f32,
    /// Multiplier applied to context-guided confidences for the indirection.
    pub context_discount: f32,
    /// Sizing factor for the post-context search region.
    pub context_region_factor: f32,
    /// Similarity at which windowed scans stop early.
    pub early_exit: f32,
    /// Window length slack as a fraction of the needle length.
    pub window_tolerance: f32,
    /// Unit-index radius for the unit-bounded tier.
    pub unit_window: usize,
    /// Needles shorter than this many bytes are held to a stricter bar.
    pub short_needle_len: usize,
    /// Acceptance and recovery bar for short needles.
    pub short_needle_bar: f32,
    /// Needle-length divisor for the shingle sweep stride.
    pub shingle_stride_divisor: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            recovered_threshold: 0.85,
            review_threshold: 0.75,
            shingle_floor: 0.70,
            context_discount: 0.95,
            context_region_factor: 1.3,
            early_exit: 0.95,
            window_tolerance: 0.20,
            unit_window: 2,
            short_needle_len: 50,
            short_needle_bar: 0.90,
            shingle_stride_divisor: 10,
        }
    }
}

impl MatcherConfig {
    /// Creates a configuration with default thresholds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from environment variables.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `PALIMPSEST_MATCHER_RECOVERED_THRESHOLD` | Commit-eligible confidence | 0.85 |
    /// | `PALIMPSEST_MATCHER_REVIEW_THRESHOLD` | Review-band confidence | 0.75 |
    /// | `PALIMPSEST_MATCHER_SHINGLE_FLOOR` | Shingle fallback floor | 0.70 |
    /// | `PALIMPSEST_MATCHER_UNIT_WINDOW` | Unit-bounded index radius | 2 |
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("PALIMPSEST_MATCHER_RECOVERED_THRESHOLD")
            && let Ok(parsed) = v.parse::<f32>()
        {
            self.recovered_threshold = parsed.clamp(0.0, 1.0);
        }
        if let Ok(v) = std::env::var("PALIMPSEST_MATCHER_REVIEW_THRESHOLD")
            && let Ok(parsed) = v.parse::<f32>()
        {
            self.review_threshold = parsed.clamp(0.0, 1.0);
        }
        if let Ok(v) = std::env::var("PALIMPSEST_MATCHER_SHINGLE_FLOOR")
            && let Ok(parsed) = v.parse::<f32>()
        {
            self.shingle_floor = parsed.clamp(0.0, 1.0);
        }
        if let Ok(v) = std::env::var("PALIMPSEST_MATCHER_UNIT_WINDOW")
            && let Ok(parsed) = v.parse::<usize>()
        {
            self.unit_window = parsed;
        }
        self
    }

    /// Sets the commit-eligible confidence threshold.
    #[must_use]
    pub fn with_recovered_threshold(mut self, threshold: f32) -> Self {
        self.recovered_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Sets the review-band confidence threshold.
    #[must_use]
    pub fn with_review_threshold(mut self, threshold: f32) -> Self {
        self.review_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Sets the shingle fallback floor.
    #[must_use]
    pub fn with_shingle_floor(mut self, floor: f32) -> Self {
        self.shingle_floor = floor.clamp(0.0, 1.0);
        self
    }

    /// Sets the unit-bounded index radius.
    #[must_use]
    pub const fn with_unit_window(mut self, window: usize) -> Self {
        self.unit_window = window;
        self
    }

    fn window_params(&self) -> WindowParams {
        WindowParams {
            tolerance: self.window_tolerance,
            early_exit: self.early_exit,
        }
    }

    /// Acceptance bar for the windowed tiers. Short needles produce noisy
    /// edit-distance scores, so they are held to the stricter bar.
    fn windowed_bar(&self, needle: &str) -> f32 {
        if needle.len() < self.short_needle_len {
            self.review_threshold.max(self.short_needle_bar)
        } else {
            self.review_threshold
        }
    }

    /// Recovered-classification threshold, with the same short-needle
    /// strictness applied.
    fn effective_recovered(&self, needle: &str) -> f32 {
        if needle.len() < self.short_needle_len {
            self.recovered_threshold.max(self.short_needle_bar)
        } else {
            self.recovered_threshold
        }
    }
}

/// A scored tier result, pre-classification.
#[derive(Debug, Clone, Copy)]
struct TierCandidate {
    start: usize,
    end: usize,
    confidence: f32,
    tier: RecoveryTier,
}

/// Resolves anchors against a target generation through four escalating
/// tiers.
///
/// # Example
///
/// ```rust,ignore
/// use palimpsest::{MatcherConfig, TieredMatcher};
///
/// let matcher = TieredMatcher::new(MatcherConfig::default());
/// let outcome = matcher.resolve(&anchor, &generation, &units)?;
/// println!("{} via {:?}", outcome.status, outcome.tier);
/// ```
#[derive(Debug, Clone, Default)]
pub struct TieredMatcher {
    config: MatcherConfig,
}

impl TieredMatcher {
    /// Creates a matcher with the given policy constants.
    #[must_use]
    pub const fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    /// Returns the active configuration.
    #[must_use]
    pub const fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Resolves one anchor against the generation's text.
    ///
    /// Tier order: exact, context-guided, unit-bounded, global shingle. The
    /// first tier to clear its acceptance bar wins; otherwise the best
    /// rejected candidate is classified, which for sub-review confidences
    /// yields a terminal `lost` outcome.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a malformed anchor. Misses are
    /// never errors.
    #[allow(clippy::cast_possible_truncation)]
    #[instrument(
        skip(self, anchor, generation, units),
        fields(anchor_id = %anchor.id, generation_id = %generation.id)
    )]
    pub fn resolve(
        &self,
        anchor: &Anchor,
        generation: &Generation,
        units: &[StructuralUnit],
    ) -> Result<RecoveryOutcome> {
        anchor.validate()?;
        let start = Instant::now();
        let text = generation.text.as_str();
        let needle = anchor.original_text.as_str();
        let windowed_bar = self.config.windowed_bar(needle);

        let mut accepted: Option<TierCandidate> = None;
        let mut best_rejected: Option<TierCandidate> = None;
        let mut record = |candidate: Option<TierCandidate>, bar: f32| -> bool {
            let Some(candidate) = candidate else {
                return false;
            };
            if candidate.confidence >= bar {
                accepted = Some(candidate);
                true
            } else {
                if best_rejected.is_none_or(|b| candidate.confidence > b.confidence) {
                    best_rejected = Some(candidate);
                }
                false
            }
        };

        let found = record(Self::tier_exact(anchor, text), 1.0)
            || record(self.tier_context_guided(anchor, text), windowed_bar)
            || record(self.tier_unit_bounded(anchor, text, units), windowed_bar)
            || record(self.tier_global_shingle(anchor, text), self.config.shingle_floor);

        let best = if found { accepted } else { best_rejected };
        let outcome = self.classify(anchor, generation, best);

        let duration_ms = start.elapsed().as_millis() as u64;
        let tier_label = outcome.tier.as_ref().map_or("none", |t| t.as_str());
        tracing::debug!(
            tier = tier_label,
            status = %outcome.status,
            confidence = outcome.confidence,
            duration_ms = duration_ms,
            "Anchor resolution finished"
        );
        metrics::counter!(
            "anchor_recovery_total",
            "tier" => tier_label,
            "status" => outcome.status.as_str()
        )
        .increment(1);
        metrics::histogram!("anchor_recovery_duration_ms").record(duration_ms as f64);

        Ok(outcome)
    }

    /// Tier 0: literal substring search, preferring the lowest offset at or
    /// after the anchor's previous position.
    fn tier_exact(anchor: &Anchor, text: &str) -> Option<TierCandidate> {
        let needle = anchor.original_text.as_str();
        let hint = anchor.start_offset.min(text.len());
        let start = text
            .get(hint..)
            .and_then(|tail| tail.find(needle).map(|pos| pos + hint))
            .or_else(|| text.find(needle))?;
        Some(TierCandidate {
            start,
            end: start + needle.len(),
            confidence: 1.0,
            tier: RecoveryTier::Exact,
        })
    }

    /// Tier 1: locate the leading context, then run a windowed search in the
    /// narrow region immediately after it. The discount reflects that the
    /// span was found through its neighborhood, not itself.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn tier_context_guided(&self, anchor: &Anchor, text: &str) -> Option<TierCandidate> {
        let context = anchor.context_before.as_str();
        if context.trim().is_empty() {
            return None;
        }
        let needle = anchor.original_text.as_str();
        let params = self.config.window_params();

        let context_end = text.find(context).map(|pos| pos + context.len()).or_else(|| {
            let hit = windowed_similarity_bytes(context.as_bytes(), text.as_bytes(), 0, &params)?;
            (hit.confidence >= self.config.windowed_bar(context)).then_some(hit.end)
        })?;

        let region_len =
            context.len() + (needle.len() as f32 * self.config.context_region_factor) as usize;
        let region_end = (context_end + region_len).min(text.len());
        if context_end >= region_end {
            return None;
        }

        let hit = windowed_similarity_bytes(
            needle.as_bytes(),
            &text.as_bytes()[context_end..region_end],
            0,
            &params,
        )?;
        Some(TierCandidate {
            start: hit.offset + context_end,
            end: hit.end + context_end,
            confidence: hit.confidence * self.config.context_discount,
            tier: RecoveryTier::ContextGuided,
        })
    }

    /// Tier 2: windowed search restricted to the structural units around the
    /// anchor's source unit index. This bounds cost on large documents to
    /// O(window) per anchor instead of O(document).
    fn tier_unit_bounded(
        &self,
        anchor: &Anchor,
        text: &str,
        units: &[StructuralUnit],
    ) -> Option<TierCandidate> {
        let source_index = anchor.source_unit_index?;
        let lo = source_index.saturating_sub(self.config.unit_window);
        let hi = source_index + self.config.unit_window;

        let mut region_start = usize::MAX;
        let mut region_end = 0usize;
        for unit in units {
            if unit.index >= lo && unit.index <= hi {
                region_start = region_start.min(unit.start_offset);
                region_end = region_end.max(unit.end_offset);
            }
        }
        region_end = region_end.min(text.len());
        if region_start >= region_end {
            return None;
        }

        let hit = windowed_similarity_bytes(
            anchor.original_text.as_bytes(),
            &text.as_bytes()[region_start..region_end],
            0,
            &self.config.window_params(),
        )?;
        Some(TierCandidate {
            start: hit.offset + region_start,
            end: hit.end + region_start,
            confidence: hit.confidence,
            tier: RecoveryTier::UnitBounded,
        })
    }

    /// Tier 3: shingle-similarity sweep over the whole text. The stride
    /// trades recall for speed; it is a tunable, not a correctness lever.
    fn tier_global_shingle(&self, anchor: &Anchor, text: &str) -> Option<TierCandidate> {
        let needle = anchor.original_text.as_str();
        let needle_set = ShingleSet::new(needle);
        if needle_set.is_empty() || text.is_empty() {
            return None;
        }

        // Char-boundary offsets so every window is a valid slice.
        let mut boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        boundaries.push(text.len());
        let needle_chars = needle.chars().count();

        if boundaries.len() - 1 <= needle_chars {
            let confidence = needle_set.similarity(&ShingleSet::new(text));
            return Some(TierCandidate {
                start: 0,
                end: text.len(),
                confidence,
                tier: RecoveryTier::GlobalShingle,
            });
        }

        let stride = (needle_chars / self.config.shingle_stride_divisor.max(1)).clamp(1, 64);
        let last = boundaries.len() - 1 - needle_chars;
        let mut best: Option<TierCandidate> = None;
        let mut i = 0usize;
        while i <= last {
            let start = boundaries[i];
            let end = boundaries[i + needle_chars];
            let confidence = needle_set.similarity(&ShingleSet::new(&text[start..end]));
            if best.is_none_or(|b| confidence > b.confidence) {
                best = Some(TierCandidate {
                    start,
                    end,
                    confidence,
                    tier: RecoveryTier::GlobalShingle,
                });
            }
            if confidence >= self.config.early_exit {
                break;
            }
            i += stride;
        }
        best
    }

    /// Classifies the best candidate into a recovery outcome.
    fn classify(
        &self,
        anchor: &Anchor,
        generation: &Generation,
        best: Option<TierCandidate>,
    ) -> RecoveryOutcome {
        match best {
            Some(candidate) => {
                let status = RecoveryStatus::classify(
                    candidate.confidence,
                    self.config.effective_recovered(&anchor.original_text),
                    self.config.review_threshold,
                );
                if status == RecoveryStatus::Lost {
                    RecoveryOutcome::lost(
                        anchor.id.clone(),
                        generation.id.clone(),
                        candidate.confidence,
                        Some(candidate.tier),
                    )
                } else {
                    RecoveryOutcome::resolved(
                        anchor.id.clone(),
                        generation.id.clone(),
                        candidate.start,
                        candidate.end,
                        candidate.confidence,
                        candidate.tier,
                        status,
                    )
                }
            },
            None => RecoveryOutcome::lost(anchor.id.clone(), generation.id.clone(), 0.0, None),
        }
    }
}

/// Validates inputs the matcher cannot work without.
///
/// Exposed for callers that want to reject a batch before staging anything.
///
/// # Errors
///
/// Returns the first [`Error::InvalidInput`] found.
pub(crate) fn validate_anchors(anchors: &[Anchor]) -> Result<()> {
    for anchor in anchors {
        anchor.validate()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::Error;
    use crate::models::{DocumentId, UnitId};

    fn generation(text: &str) -> Generation {
        Generation::initial(DocumentId::new("doc-1"), text)
    }

    fn unit(index: usize, start: usize, end: usize, generation: &Generation) -> StructuralUnit {
        StructuralUnit {
            id: UnitId::generate(),
            document_id: generation.document_id.clone(),
            generation_id: generation.id.clone(),
            index,
            start_offset: start,
            end_offset: end,
            text: generation.text.get(start..end).unwrap_or_default().to_string(),
            embedding: Vec::new(),
            domain_label: String::new(),
            importance_score: 0.5,
            topic: None,
            stance: None,
        }
    }

    #[test]
    fn test_exact_match_at_hint() {
        let padding = "x".repeat(120);
        let text = format!("{padding}machine learning comes next");
        let generation = generation(&text);
        let anchor = Anchor::new(generation.document_id.clone(), "machine learning", 120, 136);

        let matcher = TieredMatcher::default();
        let outcome = matcher.resolve(&anchor, &generation, &[]).unwrap();

        assert_eq!(outcome.tier, Some(RecoveryTier::Exact));
        assert!((outcome.confidence - 1.0).abs() < f32::EPSILON);
        assert_eq!(outcome.new_start_offset, Some(120));
        assert_eq!(outcome.new_end_offset, Some(136));
        assert_eq!(outcome.status, RecoveryStatus::Recovered);
    }

    #[test]
    fn test_exact_match_falls_back_before_hint() {
        let generation = generation("machine learning early");
        let anchor = Anchor::new(generation.document_id.clone(), "machine learning", 500, 516);

        let matcher = TieredMatcher::default();
        let outcome = matcher.resolve(&anchor, &generation, &[]).unwrap();

        assert_eq!(outcome.new_start_offset, Some(0));
        assert_eq!(outcome.tier, Some(RecoveryTier::Exact));
    }

    #[test]
    fn test_context_guided_recovery() {
        let needle = "the reinforcement signal propagates backwards through time";
        let text = "Intro paragraph about unrelated things. As shown previously, \
                    the reinforcment signal propagates backward through time, which \
                    concludes the section.";
        let generation = generation(text);
        let anchor = Anchor::new(generation.document_id.clone(), needle, 0, needle.len())
            .with_context("As shown previously, ", " which concludes");

        let matcher = TieredMatcher::default();
        let outcome = matcher.resolve(&anchor, &generation, &[]).unwrap();

        assert_eq!(outcome.tier, Some(RecoveryTier::ContextGuided));
        assert!(outcome.confidence > 0.85, "confidence {}", outcome.confidence);
        let start = outcome.new_start_offset.unwrap();
        assert!(text[start..].starts_with("the reinforcment"));
    }

    #[test]
    fn test_unit_bounded_recovery_with_typo() {
        let text = "First paragraph here.\n\nSecond block mentions mashine learning briefly.\n\nThird paragraph closes.";
        let generation = generation(text);
        let units = vec![
            unit(0, 0, 21, &generation),
            unit(1, 23, 70, &generation),
            unit(2, 72, text.len(), &generation),
        ];
        let anchor = Anchor::new(generation.document_id.clone(), "machine learning", 40, 56)
            .with_source_unit_index(1);

        let matcher = TieredMatcher::default();
        let outcome = matcher.resolve(&anchor, &generation, &units).unwrap();

        assert_eq!(outcome.tier, Some(RecoveryTier::UnitBounded));
        assert!(
            outcome.confidence > 0.90 && outcome.confidence < 0.95,
            "confidence {}",
            outcome.confidence
        );
        assert_eq!(outcome.status, RecoveryStatus::Recovered);
        let start = outcome.new_start_offset.unwrap();
        assert!(text[start..].starts_with("mashine"));
    }

    #[test]
    fn test_absent_text_is_lost() {
        let generation = generation("Completely unrelated prose about gardening and soil quality.");
        let anchor = Anchor::new(
            generation.document_id.clone(),
            "quantum chromodynamics lattice",
            0,
            30,
        );

        let matcher = TieredMatcher::default();
        let outcome = matcher.resolve(&anchor, &generation, &[]).unwrap();

        assert_eq!(outcome.status, RecoveryStatus::Lost);
        assert!(outcome.confidence < 0.75);
        assert_eq!(outcome.new_start_offset, None);
    }

    #[test]
    fn test_empty_anchor_text_is_invalid_input() {
        let generation = generation("some text");
        let anchor = Anchor::new(generation.document_id.clone(), "", 0, 0);

        let matcher = TieredMatcher::default();
        assert!(matches!(
            matcher.resolve(&anchor, &generation, &[]),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let text = "A stable paragraph with a mashine learning reference inside it, \
                    plus enough surrounding prose to give the scan room.";
        let generation = generation(text);
        let anchor = Anchor::new(generation.document_id.clone(), "machine learning reference", 20, 46);

        let matcher = TieredMatcher::default();
        let first = matcher.resolve(&anchor, &generation, &[]).unwrap();
        let second = matcher.resolve(&anchor, &generation, &[]).unwrap();

        assert_eq!(first.confidence, second.confidence);
        assert_eq!(first.tier, second.tier);
        assert_eq!(first.new_start_offset, second.new_start_offset);
    }

    #[test]
    fn test_escalation_reaches_global_shingle() {
        // No exact hit, no context, no source unit index: only the shingle
        // sweep can place this paraphrased span.
        let text = "Opening filler sentence. The training corpus was deduplicated \
                    using trigram fingerprints across shards. Closing filler sentence.";
        let generation = generation(text);
        let anchor = Anchor::new(
            generation.document_id.clone(),
            "the training corpus was de-duplicated  using trigram fingerprints across shards",
            0,
            80,
        );

        let matcher = TieredMatcher::default();
        let outcome = matcher.resolve(&anchor, &generation, &[]).unwrap();

        assert_eq!(outcome.tier, Some(RecoveryTier::GlobalShingle));
        assert!(outcome.confidence >= 0.70, "confidence {}", outcome.confidence);
    }
}
