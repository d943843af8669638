//! Document and generation types.
//!
//! A [`Document`] owns an ordered, append-only sequence of [`Generation`]s.
//! Exactly one generation is marked `current` at any time; the flag is
//! flipped only by the reprocessing orchestrator inside a single atomic
//! store operation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Unique identifier for a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Creates a new document ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a new random document ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("doc_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for a generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationId(String);

impl GenerationId {
    /// Creates a new generation ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a new random generation ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("gen_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for GenerationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for GenerationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A document whose text may be mutated by external collaborators.
///
/// The document itself holds no text; text lives on its generations. This
/// keeps "which version is live" an explicit per-document pointer rather
/// than process-wide state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier.
    pub id: DocumentId,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
}

impl Document {
    /// Creates a new document.
    #[must_use]
    pub fn new(id: DocumentId) -> Self {
        Self {
            id,
            created_at: crate::current_timestamp(),
        }
    }
}

/// One version of a document's text and structural unit set.
///
/// Immutable once committed: only the `current` flag is ever mutated after
/// creation, and only by the reprocessing orchestrator's atomic flip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    /// Unique identifier.
    pub id: GenerationId,
    /// The owning document.
    pub document_id: DocumentId,
    /// Monotonically increasing sequence number within the document.
    pub sequence: u64,
    /// The full text of this version.
    pub text: String,
    /// SHA-256 hex digest of `text`, used for the identity fast path.
    pub content_hash: String,
    /// Whether this generation is the document's live version.
    pub current: bool,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
}

impl Generation {
    /// Creates a staged (non-current) generation for a reprocessing attempt.
    #[must_use]
    pub fn staged(document_id: DocumentId, sequence: u64, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            id: GenerationId::generate(),
            document_id,
            sequence,
            content_hash: content_hash(&text),
            text,
            current: false,
            created_at: crate::current_timestamp(),
        }
    }

    /// Creates the initial, immediately-current generation of a document.
    #[must_use]
    pub fn initial(document_id: DocumentId, text: impl Into<String>) -> Self {
        let mut generation = Self::staged(document_id, 0, text);
        generation.current = true;
        generation
    }
}

/// Returns the SHA-256 hex digest of the given text.
#[must_use]
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}
