//! Structural unit types.
//!
//! A structural unit is a contiguous span of one generation's text plus
//! derived metadata (embedding, domain label, importance). Offsets are byte
//! offsets relative to the owning generation's text and are never valid
//! across generations.

use super::{DocumentId, GenerationId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a structural unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    /// Creates a new unit ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a new random unit ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("unit_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UnitId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UnitId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Stance a unit takes toward its topic.
///
/// Populated by the segmentation collaborator when its upstream analysis
/// provides polarity; the contradiction engine compares opposed stances on
/// the same topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stance {
    /// The unit argues for its topic.
    Supports,
    /// The unit argues against its topic.
    Disputes,
    /// The unit is descriptive or neutral.
    Neutral,
}

impl Stance {
    /// Returns the stance as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Supports => "supports",
            Self::Disputes => "disputes",
            Self::Neutral => "neutral",
        }
    }

    /// Parses a stance from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "supports" | "support" | "pro" => Some(Self::Supports),
            "disputes" | "dispute" | "contra" | "against" => Some(Self::Disputes),
            "neutral" | "none" => Some(Self::Neutral),
            _ => None,
        }
    }

    /// Returns true if the two stances are in direct opposition.
    #[must_use]
    pub const fn opposes(&self, other: Self) -> bool {
        matches!(
            (self, other),
            (Self::Supports, Self::Disputes) | (Self::Disputes, Self::Supports)
        )
    }
}

impl fmt::Display for Stance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Span and metadata for one unit, as produced by the segmentation
/// collaborator for a staged text.
///
/// Offsets are byte offsets into the text being staged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSpec {
    /// Byte offset where the unit starts (inclusive).
    pub start_offset: usize,
    /// Byte offset where the unit ends (exclusive).
    pub end_offset: usize,
    /// Embedding vector for the unit's text.
    pub embedding: Vec<f32>,
    /// Domain label (e.g. "biology", "economics").
    pub domain_label: String,
    /// Importance score in `[0, 1]`.
    pub importance_score: f32,
    /// Optional topic the unit addresses.
    pub topic: Option<String>,
    /// Optional stance toward the topic.
    pub stance: Option<Stance>,
}

impl UnitSpec {
    /// Creates a spec with empty metadata.
    #[must_use]
    pub fn new(start_offset: usize, end_offset: usize) -> Self {
        Self {
            start_offset,
            end_offset,
            embedding: Vec::new(),
            domain_label: String::new(),
            importance_score: 0.5,
            topic: None,
            stance: None,
        }
    }

    /// Sets the embedding vector.
    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    /// Sets the domain label.
    #[must_use]
    pub fn with_domain_label(mut self, label: impl Into<String>) -> Self {
        self.domain_label = label.into();
        self
    }

    /// Sets the importance score, clamped to `[0, 1]`.
    #[must_use]
    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance_score = importance.clamp(0.0, 1.0);
        self
    }

    /// Sets the topic and stance.
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>, stance: Stance) -> Self {
        self.topic = Some(topic.into());
        self.stance = Some(stance);
        self
    }
}

/// A contiguous span of a generation's text plus derived metadata.
///
/// Created when a generation is staged, never mutated afterwards, destroyed
/// only when the owning generation is deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralUnit {
    /// Unique identifier.
    pub id: UnitId,
    /// The document this unit's generation belongs to.
    pub document_id: DocumentId,
    /// The owning generation.
    pub generation_id: GenerationId,
    /// Position within the generation's ordered unit sequence.
    pub index: usize,
    /// Byte offset where the unit starts (inclusive).
    pub start_offset: usize,
    /// Byte offset where the unit ends (exclusive).
    pub end_offset: usize,
    /// The unit's text.
    pub text: String,
    /// Embedding vector.
    pub embedding: Vec<f32>,
    /// Domain label.
    pub domain_label: String,
    /// Importance score in `[0, 1]`.
    pub importance_score: f32,
    /// Optional topic the unit addresses.
    pub topic: Option<String>,
    /// Optional stance toward the topic.
    pub stance: Option<Stance>,
}

impl StructuralUnit {
    /// Builds a unit from a segmentation spec against the staged text.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] if the span is empty, reversed,
    /// out of bounds, or off a UTF-8 boundary.
    pub fn from_spec(
        document_id: DocumentId,
        generation_id: GenerationId,
        index: usize,
        text: &str,
        spec: &UnitSpec,
    ) -> crate::Result<Self> {
        if spec.start_offset >= spec.end_offset {
            return Err(crate::Error::InvalidInput(format!(
                "unit {index} has empty or reversed span {}..{}",
                spec.start_offset, spec.end_offset
            )));
        }
        let slice = text.get(spec.start_offset..spec.end_offset).ok_or_else(|| {
            crate::Error::InvalidInput(format!(
                "unit {index} span {}..{} is out of bounds or off a UTF-8 boundary",
                spec.start_offset, spec.end_offset
            ))
        })?;

        Ok(Self {
            id: UnitId::generate(),
            document_id,
            generation_id,
            index,
            start_offset: spec.start_offset,
            end_offset: spec.end_offset,
            text: slice.to_string(),
            embedding: spec.embedding.clone(),
            domain_label: spec.domain_label.clone(),
            importance_score: spec.importance_score.clamp(0.0, 1.0),
            topic: spec.topic.clone(),
            stance: spec.stance,
        })
    }
}
