//! Relationship and engine verdict types.
//!
//! A relationship is a weighted edge between two structural units. Edges
//! marked `validated` were confirmed by a human and are preserved across
//! reprocessing via the reference remapper; unvalidated edges are discarded
//! and recomputed by the detection orchestrator after each commit.

use super::UnitId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a relationship edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationshipId(String);

impl RelationshipId {
    /// Creates a new relationship ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a new random relationship ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("rel_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelationshipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RelationshipId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RelationshipId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Kind of detection engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Embedding cosine similarity above a floor.
    Similarity,
    /// Same-topic stance disagreement from per-unit metadata.
    Contradiction,
    /// Cross-domain conceptual links via an external judgment call.
    Bridge,
}

impl EngineKind {
    /// Returns all engine kinds.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Similarity, Self::Contradiction, Self::Bridge]
    }

    /// Returns the engine kind as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Similarity => "similarity",
            Self::Contradiction => "contradiction",
            Self::Bridge => "bridge",
        }
    }

    /// Parses an engine kind from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "similarity" | "semantic" => Some(Self::Similarity),
            "contradiction" | "conflict" => Some(Self::Contradiction),
            "bridge" | "cross_domain" => Some(Self::Bridge),
            _ => None,
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A weighted edge between two structural units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Unique identifier.
    pub id: RelationshipId,
    /// Source endpoint.
    pub source_unit_id: UnitId,
    /// Target endpoint.
    pub target_unit_id: UnitId,
    /// The engine whose weighted contribution dominated the combined score.
    pub engine: EngineKind,
    /// Combined strength in `[0, 1]`.
    pub strength: f32,
    /// Whether a human confirmed this edge.
    pub validated: bool,
    /// Whether the remapper flagged this edge for re-confirmation.
    pub needs_review: bool,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
}

impl Relationship {
    /// Creates a new unvalidated edge.
    #[must_use]
    pub fn new(source_unit_id: UnitId, target_unit_id: UnitId, engine: EngineKind) -> Self {
        Self {
            id: RelationshipId::generate(),
            source_unit_id,
            target_unit_id,
            engine,
            strength: 0.0,
            validated: false,
            needs_review: false,
            created_at: crate::current_timestamp(),
        }
    }

    /// Sets the strength, clamped to `[0, 1]`.
    #[must_use]
    pub fn with_strength(mut self, strength: f32) -> Self {
        self.strength = strength.clamp(0.0, 1.0);
        self
    }

    /// Sets the validated flag.
    #[must_use]
    pub const fn with_validated(mut self, validated: bool) -> Self {
        self.validated = validated;
        self
    }

    /// Sets the needs-review flag.
    #[must_use]
    pub const fn with_needs_review(mut self, needs_review: bool) -> Self {
        self.needs_review = needs_review;
        self
    }

    /// Returns the endpoint pair, the edge's logical identity.
    #[must_use]
    pub fn pair(&self) -> (UnitId, UnitId) {
        (self.source_unit_id.clone(), self.target_unit_id.clone())
    }

    /// Returns true if either endpoint is in the given set.
    #[must_use]
    pub fn touches(&self, unit_ids: &std::collections::HashSet<&UnitId>) -> bool {
        unit_ids.contains(&self.source_unit_id) || unit_ids.contains(&self.target_unit_id)
    }
}

/// Ephemeral per-pair score from one engine.
///
/// Never persisted; folded into a [`Relationship`]'s combined strength by
/// the detection orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineVerdict {
    /// Source endpoint.
    pub source_unit_id: UnitId,
    /// Target endpoint.
    pub target_unit_id: UnitId,
    /// The engine that produced this verdict.
    pub engine: EngineKind,
    /// Raw (pre-normalization) score.
    pub score: f32,
}

impl EngineVerdict {
    /// Creates a new verdict.
    #[must_use]
    pub const fn new(
        source_unit_id: UnitId,
        target_unit_id: UnitId,
        engine: EngineKind,
        score: f32,
    ) -> Self {
        Self {
            source_unit_id,
            target_unit_id,
            engine,
            score,
        }
    }
}

/// The kind of conceptual bridge reported by the judgment collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeType {
    /// The units apply the same method in different domains.
    Methodological,
    /// The units instantiate the same abstract concept.
    Conceptual,
    /// One unit's subject causally influences the other's.
    Causal,
    /// Anything the collaborator reports that we do not model.
    #[serde(other)]
    Other,
}

impl BridgeType {
    /// Returns the bridge type as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Methodological => "methodological",
            Self::Conceptual => "conceptual",
            Self::Causal => "causal",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for BridgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured verdict from the semantic-judgment collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeVerdict {
    /// Whether the two units are conceptually connected.
    pub connected: bool,
    /// The kind of connection.
    pub bridge_type: BridgeType,
    /// The concept the two units share.
    pub shared_concept: String,
    /// Connection strength in `[0, 1]`.
    pub strength: f32,
}

impl BridgeVerdict {
    /// The documented fallback verdict for failed or malformed judgment
    /// calls.
    #[must_use]
    pub const fn not_connected() -> Self {
        Self {
            connected: false,
            bridge_type: BridgeType::Other,
            shared_concept: String::new(),
            strength: 0.0,
        }
    }

    /// Validates the verdict's numeric fields.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ExternalService`] if `strength` is not a
    /// finite value in `[0, 1]`.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.strength.is_finite() || !(0.0..=1.0).contains(&self.strength) {
            return Err(crate::Error::ExternalService {
                operation: "judge_bridge".to_string(),
                cause: format!("verdict strength {} outside [0, 1]", self.strength),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_strength_is_clamped() {
        let edge = Relationship::new(UnitId::new("u-1"), UnitId::new("u-2"), EngineKind::Bridge)
            .with_strength(1.7);
        assert!((edge.strength - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_engine_kind_roundtrip() {
        for kind in EngineKind::all() {
            assert_eq!(EngineKind::parse(kind.as_str()), Some(*kind));
        }
    }

    #[test]
    fn test_bridge_verdict_validation() {
        let mut verdict = BridgeVerdict::not_connected();
        assert!(verdict.validate().is_ok());

        verdict.strength = f32::NAN;
        assert!(verdict.validate().is_err());

        verdict.strength = 1.5;
        assert!(verdict.validate().is_err());
    }

    #[test]
    fn test_bridge_type_deserializes_unknown_as_other() {
        let parsed: BridgeType = serde_json::from_str("\"holographic\"").unwrap();
        assert_eq!(parsed, BridgeType::Other);
    }
}
