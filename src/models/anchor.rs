//! Anchor and recovery outcome types.
//!
//! An anchor is a positional reference into a document's text, owned by an
//! external feature (annotations, citations). Anchors survive text mutation
//! by being re-resolved against each new generation; they are reclassified,
//! never deleted, by reprocessing.

use super::{DocumentId, GenerationId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for an anchor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnchorId(String);

impl AnchorId {
    /// Creates a new anchor ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a new random anchor ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("anchor_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AnchorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AnchorId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AnchorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A positional reference into a document's text.
///
/// Offsets are byte offsets valid only for the generation the anchor was
/// last resolved against; after a text mutation they serve as hints, never
/// as truth. Anchors never hold a direct reference to a structural unit,
/// only the index of the unit they were created in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    /// Unique identifier.
    pub id: AnchorId,
    /// The document this anchor points into.
    pub document_id: DocumentId,
    /// The exact text the anchor covered when it was created.
    pub original_text: String,
    /// Byte offset where the anchored span started (inclusive).
    pub start_offset: usize,
    /// Byte offset where the anchored span ended (exclusive).
    pub end_offset: usize,
    /// Text immediately preceding the anchored span.
    pub context_before: String,
    /// Text immediately following the anchored span.
    pub context_after: String,
    /// Index of the structural unit the span fell in, if known.
    pub source_unit_index: Option<usize>,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
}

impl Anchor {
    /// Creates a new anchor over the given span.
    #[must_use]
    pub fn new(
        document_id: DocumentId,
        original_text: impl Into<String>,
        start_offset: usize,
        end_offset: usize,
    ) -> Self {
        Self {
            id: AnchorId::generate(),
            document_id,
            original_text: original_text.into(),
            start_offset,
            end_offset,
            context_before: String::new(),
            context_after: String::new(),
            source_unit_index: None,
            created_at: crate::current_timestamp(),
        }
    }

    /// Sets a specific ID.
    #[must_use]
    pub fn with_id(mut self, id: AnchorId) -> Self {
        self.id = id;
        self
    }

    /// Sets the surrounding context snippets.
    #[must_use]
    pub fn with_context(
        mut self,
        before: impl Into<String>,
        after: impl Into<String>,
    ) -> Self {
        self.context_before = before.into();
        self.context_after = after.into();
        self
    }

    /// Sets the source unit index.
    #[must_use]
    pub const fn with_source_unit_index(mut self, index: usize) -> Self {
        self.source_unit_index = Some(index);
        self
    }

    /// Validates the anchor before any matching attempt.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] for empty `original_text` or a
    /// reversed span. Malformed anchors are rejected up front; a miss during
    /// matching is never an error.
    pub fn validate(&self) -> crate::Result<()> {
        if self.original_text.trim().is_empty() {
            return Err(crate::Error::InvalidInput(format!(
                "anchor '{}' has empty original text",
                self.id
            )));
        }
        if self.start_offset > self.end_offset {
            return Err(crate::Error::InvalidInput(format!(
                "anchor '{}' has reversed span {}..{}",
                self.id, self.start_offset, self.end_offset
            )));
        }
        Ok(())
    }
}

/// The matching strategy that produced a recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryTier {
    /// Literal substring search.
    Exact,
    /// Windowed search bounded by a located context snippet.
    ContextGuided,
    /// Windowed search bounded by the source unit's positional window.
    UnitBounded,
    /// Whole-text shingle similarity sweep.
    GlobalShingle,
}

impl RecoveryTier {
    /// Returns all tiers in escalation order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Exact,
            Self::ContextGuided,
            Self::UnitBounded,
            Self::GlobalShingle,
        ]
    }

    /// Returns the tier as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::ContextGuided => "context_guided",
            Self::UnitBounded => "unit_bounded",
            Self::GlobalShingle => "global_shingle",
        }
    }

    /// Parses a tier from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "exact" => Some(Self::Exact),
            "context_guided" | "context" => Some(Self::ContextGuided),
            "unit_bounded" | "unit" => Some(Self::UnitBounded),
            "global_shingle" | "shingle" => Some(Self::GlobalShingle),
            _ => None,
        }
    }
}

impl fmt::Display for RecoveryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classification of a recovery outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    /// Confidence cleared the commit-eligible threshold.
    Recovered,
    /// Confidence landed in the review band; a human should confirm.
    NeedsReview,
    /// No tier produced a usable match.
    Lost,
}

impl RecoveryStatus {
    /// Classifies a confidence value against the policy thresholds.
    #[must_use]
    pub fn classify(confidence: f32, recovered_threshold: f32, review_threshold: f32) -> Self {
        if confidence >= recovered_threshold {
            Self::Recovered
        } else if confidence >= review_threshold {
            Self::NeedsReview
        } else {
            Self::Lost
        }
    }

    /// Returns the status as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Recovered => "recovered",
            Self::NeedsReview => "needs_review",
            Self::Lost => "lost",
        }
    }
}

impl fmt::Display for RecoveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The result of re-resolving one anchor against one generation.
///
/// Produced once per reprocessing attempt per anchor; superseded, never
/// mutated, by the next attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryOutcome {
    /// The anchor this outcome belongs to.
    pub anchor_id: AnchorId,
    /// The generation the anchor was resolved against.
    pub generation_id: GenerationId,
    /// New start offset, present unless the anchor is lost.
    pub new_start_offset: Option<usize>,
    /// New end offset, present unless the anchor is lost.
    pub new_end_offset: Option<usize>,
    /// Match confidence in `[0, 1]`.
    pub confidence: f32,
    /// The tier that produced the best candidate, if any tier did.
    pub tier: Option<RecoveryTier>,
    /// Classification against the policy thresholds.
    pub status: RecoveryStatus,
}

impl RecoveryOutcome {
    /// Creates an outcome for a located span.
    #[must_use]
    pub fn resolved(
        anchor_id: AnchorId,
        generation_id: GenerationId,
        start: usize,
        end: usize,
        confidence: f32,
        tier: RecoveryTier,
        status: RecoveryStatus,
    ) -> Self {
        Self {
            anchor_id,
            generation_id,
            new_start_offset: Some(start),
            new_end_offset: Some(end),
            confidence: confidence.clamp(0.0, 1.0),
            tier: Some(tier),
            status,
        }
    }

    /// Creates a terminal lost outcome.
    #[must_use]
    pub fn lost(
        anchor_id: AnchorId,
        generation_id: GenerationId,
        best_confidence: f32,
        tier: Option<RecoveryTier>,
    ) -> Self {
        Self {
            anchor_id,
            generation_id,
            new_start_offset: None,
            new_end_offset: None,
            confidence: best_confidence.clamp(0.0, 1.0),
            tier,
            status: RecoveryStatus::Lost,
        }
    }

    /// Returns true if the outcome is commit-eligible.
    #[must_use]
    pub fn is_recovered(&self) -> bool {
        self.status == RecoveryStatus::Recovered
    }

    /// Returns the recovered span, for callers that cannot proceed without
    /// one.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MatchNotFound`] unless the status is
    /// [`RecoveryStatus::Recovered`].
    pub fn require_recovered(&self) -> crate::Result<(usize, usize)> {
        match (self.status, self.new_start_offset, self.new_end_offset) {
            (RecoveryStatus::Recovered, Some(start), Some(end)) => Ok((start, end)),
            _ => Err(crate::Error::MatchNotFound {
                anchor_id: self.anchor_id.to_string(),
            }),
        }
    }
}
