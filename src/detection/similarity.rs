//! Embedding similarity engine.
//!
//! The cheap baseline: cosine similarity between unit embeddings, reported
//! for every candidate above a floor. Runs first and needs no external
//! calls.

use super::DetectionEngine;
use crate::Result;
use crate::embedding::cosine_similarity;
use crate::models::{EngineKind, EngineVerdict, StructuralUnit};

/// Detects relationships by embedding cosine similarity.
#[derive(Debug, Clone)]
pub struct SimilarityEngine {
    floor: f32,
}

impl SimilarityEngine {
    /// Default similarity floor.
    pub const DEFAULT_FLOOR: f32 = 0.60;

    /// Creates an engine with the default floor.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            floor: Self::DEFAULT_FLOOR,
        }
    }

    /// Creates an engine with a specific floor.
    #[must_use]
    pub fn with_floor(floor: f32) -> Self {
        Self {
            floor: floor.clamp(0.0, 1.0),
        }
    }
}

impl Default for SimilarityEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionEngine for SimilarityEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Similarity
    }

    fn detect(
        &self,
        source: &StructuralUnit,
        candidates: &[StructuralUnit],
    ) -> Result<Vec<EngineVerdict>> {
        let mut verdicts = Vec::new();
        for candidate in candidates {
            if candidate.id == source.id {
                continue;
            }
            let similarity = cosine_similarity(&source.embedding, &candidate.embedding);
            if similarity >= self.floor {
                verdicts.push(EngineVerdict::new(
                    source.id.clone(),
                    candidate.id.clone(),
                    EngineKind::Similarity,
                    similarity,
                ));
            }
        }
        Ok(verdicts)
    }
}
