//! Data models for palimpsest.
//!
//! This module contains all the core data structures used throughout the
//! system: documents and their generations, structural units, anchors with
//! their recovery outcomes, and relationship edges.

mod anchor;
mod document;
mod relationship;
mod unit;

pub use anchor::{Anchor, AnchorId, RecoveryOutcome, RecoveryStatus, RecoveryTier};
pub use document::{Document, DocumentId, Generation, GenerationId, content_hash};
pub use relationship::{
    BridgeType, BridgeVerdict, EngineKind, EngineVerdict, Relationship, RelationshipId,
};
pub use unit::{Stance, StructuralUnit, UnitId, UnitSpec};
