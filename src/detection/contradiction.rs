//! Contradiction engine.
//!
//! Flags same-topic disagreement using the structured stance metadata the
//! segmentation collaborator attaches to units. Purely local: no embedding
//! math, no external calls.

use super::DetectionEngine;
use crate::Result;
use crate::models::{EngineKind, EngineVerdict, StructuralUnit};

/// Detects opposed stances on a shared topic.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContradictionEngine;

impl ContradictionEngine {
    /// Creates the engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl DetectionEngine for ContradictionEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Contradiction
    }

    fn detect(
        &self,
        source: &StructuralUnit,
        candidates: &[StructuralUnit],
    ) -> Result<Vec<EngineVerdict>> {
        let (Some(topic), Some(stance)) = (source.topic.as_deref(), source.stance) else {
            return Ok(Vec::new());
        };

        let mut verdicts = Vec::new();
        for candidate in candidates {
            if candidate.id == source.id {
                continue;
            }
            let (Some(candidate_topic), Some(candidate_stance)) =
                (candidate.topic.as_deref(), candidate.stance)
            else {
                continue;
            };
            if !topic.eq_ignore_ascii_case(candidate_topic) || !stance.opposes(candidate_stance) {
                continue;
            }
            // Disagreement between two central claims matters more than
            // disagreement in the margins.
            let score = f32::midpoint(source.importance_score, candidate.importance_score);
            verdicts.push(EngineVerdict::new(
                source.id.clone(),
                candidate.id.clone(),
                EngineKind::Contradiction,
                score,
            ));
        }
        Ok(verdicts)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::models::{DocumentId, GenerationId, Stance, UnitId};

    fn unit(id: &str, topic: Option<&str>, stance: Option<Stance>) -> StructuralUnit {
        StructuralUnit {
            id: UnitId::new(id),
            document_id: DocumentId::new("doc"),
            generation_id: GenerationId::new("gen"),
            index: 0,
            start_offset: 0,
            end_offset: 1,
            text: String::new(),
            embedding: Vec::new(),
            domain_label: String::new(),
            importance_score: 0.8,
            topic: topic.map(str::to_string),
            stance,
        }
    }

    #[test]
    fn test_opposed_stances_on_same_topic() {
        let engine = ContradictionEngine::new();
        let source = unit("u-1", Some("carbon tax"), Some(Stance::Supports));
        let against = unit("u-2", Some("Carbon Tax"), Some(Stance::Disputes));

        let verdicts = engine
            .detect(&source, std::slice::from_ref(&against))
            .unwrap();
        assert_eq!(verdicts.len(), 1);
        assert!((verdicts[0].score - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn test_different_topics_do_not_contradict() {
        let engine = ContradictionEngine::new();
        let source = unit("u-1", Some("carbon tax"), Some(Stance::Supports));
        let other = unit("u-2", Some("rent control"), Some(Stance::Disputes));

        assert!(engine.detect(&source, &[other]).unwrap().is_empty());
    }

    #[test]
    fn test_neutral_stance_does_not_contradict() {
        let engine = ContradictionEngine::new();
        let source = unit("u-1", Some("carbon tax"), Some(Stance::Supports));
        let neutral = unit("u-2", Some("carbon tax"), Some(Stance::Neutral));

        assert!(engine.detect(&source, &[neutral]).unwrap().is_empty());
    }

    #[test]
    fn test_missing_metadata_yields_nothing() {
        let engine = ContradictionEngine::new();
        let source = unit("u-1", None, None);
        let candidate = unit("u-2", Some("carbon tax"), Some(Stance::Disputes));

        assert!(engine.detect(&source, &[candidate]).unwrap().is_empty());
    }
}
