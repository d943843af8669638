//! # Palimpsest
//!
//! Anchor recovery and relationship detection for mutable documents.
//!
//! Palimpsest keeps positional references (annotations, cross-document
//! links) alive after the text they point into has been rewritten, and
//! discovers weighted relationships between structural units of text using
//! independent detection engines.
//!
//! ## Features
//!
//! - Four-tier fuzzy text relocation (exact, context-guided, unit-bounded,
//!   global shingle fallback)
//! - Transactional generation swaps: readers never observe a half-replaced
//!   document
//! - Embedding-based remapping of validated cross-document relationships
//! - Multi-engine relationship detection with weighted score combination
//!   and an AI-assisted cross-domain bridge engine
//!
//! ## Example
//!
//! ```rust,ignore
//! use palimpsest::{ReprocessingService, InMemoryStore};
//!
//! let service = ReprocessingService::new(store, segmenter, config);
//! let report = service.reprocess(&document_id, &new_text)?;
//! if !report.committed {
//!     println!("aborted at recovery rate {:.2}", report.recovery_rate);
//! }
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
// multiple_crate_versions is inherently crate-level (detects duplicate transitive dependencies).
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod cli;
pub mod config;
pub mod detection;
pub mod embedding;
pub mod judge;
pub mod matching;
pub mod models;
pub mod observability;
pub mod remap;
pub mod reprocessing;
pub mod segmentation;
pub mod storage;

// Re-exports for convenience
pub use config::PalimpsestConfig;
pub use detection::{DetectionConfig, DetectionOrchestrator, EngineWeights};
pub use embedding::{Embedder, HashEmbedder, cosine_similarity};
pub use judge::BridgeJudge;
pub use matching::{MatcherConfig, TieredMatcher};
pub use models::{
    Anchor, AnchorId, Document, DocumentId, EngineKind, EngineVerdict, Generation, GenerationId,
    RecoveryOutcome, RecoveryStatus, RecoveryTier, Relationship, RelationshipId, StructuralUnit,
    UnitId, UnitSpec,
};
pub use remap::{ReferenceRemapper, RemapConfig, RemapReport};
pub use reprocessing::{
    CancellationToken, ReprocessReport, ReprocessingConfig, ReprocessingService,
};
pub use segmentation::{ParagraphSegmenter, Segmenter};
pub use storage::{AnchorStore, GenerationStore, InMemoryStore, RelationshipStore};

/// Error type for palimpsest operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Empty anchor text, malformed spans, bad configuration values |
/// | `MatchNotFound` | A lookup references an anchor or unit that does not exist |
/// | `TransactionConflict` | A second reprocessing attempt starts on a document mid-flight |
/// | `RecoveryFloorNotMet` | Strict reprocessing aborted because too few anchors recovered |
/// | `ExternalService` | Embedding, judgment, or persistence collaborator failure |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - An anchor's `original_text` is empty
    /// - A segmentation span falls outside the staged text or off a UTF-8
    ///   boundary
    /// - A configuration value cannot be parsed
    ///
    /// Fatal for the call that supplied the input; rejected before any
    /// matching is attempted.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A referenced anchor or unit does not exist.
    ///
    /// Recoverable at the system level: an unrecoverable anchor is flagged
    /// `lost`, never fatal to a batch.
    #[error("match not found: {anchor_id}")]
    MatchNotFound {
        /// The anchor that could not be resolved.
        anchor_id: String,
    },

    /// A concurrent reprocessing attempt exists for the same document.
    ///
    /// The caller must retry later; attempts are never queued silently.
    #[error("reprocessing already in flight for document '{document_id}'")]
    TransactionConflict {
        /// The contended document.
        document_id: String,
    },

    /// The recovery rate fell below the configured floor.
    ///
    /// The whole reprocessing attempt was aborted and the prior generation
    /// preserved. Only surfaced by the strict API; the structured
    /// [`reprocessing::ReprocessReport`] is the default channel.
    #[error(
        "recovery floor not met: rate {rate:.3} < floor {floor:.3} ({lost} lost, {needs_review} needs review)"
    )]
    RecoveryFloorNotMet {
        /// The recovery rate that was achieved.
        rate: f32,
        /// The configured floor.
        floor: f32,
        /// Number of anchors classified lost.
        lost: usize,
        /// Number of anchors classified needs-review.
        needs_review: usize,
    },

    /// An external collaborator call failed.
    ///
    /// Isolated per call: degrades that single unit of work and never
    /// propagates to sibling work in the same batch.
    #[error("external service call '{operation}' failed: {cause}")]
    ExternalService {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

/// Result type alias for palimpsest operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in seconds.
///
/// Centralized to avoid duplicate implementations across the codebase.
/// Falls back to 0 if the system clock is before the Unix epoch.
#[must_use]
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("empty anchor text".to_string());
        assert_eq!(err.to_string(), "invalid input: empty anchor text");

        let err = Error::TransactionConflict {
            document_id: "doc-1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "reprocessing already in flight for document 'doc-1'"
        );

        let err = Error::ExternalService {
            operation: "judge_bridge".to_string(),
            cause: "timeout".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "external service call 'judge_bridge' failed: timeout"
        );
    }

    #[test]
    fn test_current_timestamp_is_recent() {
        assert!(current_timestamp() > 1_500_000_000);
    }
}
