//! Persistence collaborator.
//!
//! Provides the abstraction layer the orchestrators write through. Backends
//! must make [`GenerationStore::flip_current`] observable as a single
//! atomic transition: a concurrent reader querying a document's current
//! units sees exactly one generation's worth at every instant, never a mix
//! and never an empty set mid-swap.
//!
//! # Available Implementations
//!
//! | Backend | Use Case |
//! |---------|----------|
//! | [`InMemoryStore`] | Reference implementation, tests, the CLI |
//!
//! Production deployments implement these traits over their own database;
//! every method takes `&self` and implementations are expected to provide
//! interior mutability.

mod memory;

pub use memory::InMemoryStore;

use crate::Result;
use crate::models::{
    Anchor, AnchorId, Document, DocumentId, Generation, GenerationId, RecoveryOutcome,
    Relationship, StructuralUnit, UnitId,
};

/// Storage surface for documents, generations, and structural units.
pub trait GenerationStore: Send + Sync {
    /// Inserts or replaces a document record.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn put_document(&self, document: &Document) -> Result<()>;

    /// Returns a document by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn document(&self, id: &DocumentId) -> Result<Option<Document>>;

    /// Returns the document's current generation, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn current_generation(&self, document_id: &DocumentId) -> Result<Option<Generation>>;

    /// Returns a generation by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn generation(&self, id: &GenerationId) -> Result<Option<Generation>>;

    /// Returns the units of a generation in index order.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn units_for_generation(&self, id: &GenerationId) -> Result<Vec<StructuralUnit>>;

    /// Returns the units of the document's current generation in index
    /// order.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn current_units(&self, document_id: &DocumentId) -> Result<Vec<StructuralUnit>>;

    /// Writes a staged generation and its units in one logical transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn stage_generation(&self, generation: &Generation, units: &[StructuralUnit]) -> Result<()>;

    /// Atomically retires one generation and promotes another.
    ///
    /// Both flag flips happen inside a single transition; no reader may
    /// observe zero or two current generations for the document.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] if `retiring` is not the
    /// document's current generation or `promoted` does not exist.
    fn flip_current(
        &self,
        document_id: &DocumentId,
        retiring: &GenerationId,
        promoted: &GenerationId,
    ) -> Result<()>;

    /// Deletes a generation and all of its structural units.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn delete_generation(&self, id: &GenerationId) -> Result<()>;
}

/// Storage surface for anchors and their recovery outcomes.
pub trait AnchorStore: Send + Sync {
    /// Inserts or replaces an anchor.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn put_anchor(&self, anchor: &Anchor) -> Result<()>;

    /// Returns an anchor by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn anchor(&self, id: &AnchorId) -> Result<Option<Anchor>>;

    /// Returns all anchors pointing into a document.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn anchors_for_document(&self, document_id: &DocumentId) -> Result<Vec<Anchor>>;

    /// Appends recovery outcomes. Outcomes are append-only: a new attempt
    /// supersedes, never rewrites, the previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn record_outcomes(&self, outcomes: &[RecoveryOutcome]) -> Result<()>;

    /// Returns the most recently recorded outcome for an anchor.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn latest_outcome(&self, anchor_id: &AnchorId) -> Result<Option<RecoveryOutcome>>;
}

/// Storage surface for relationship edges.
pub trait RelationshipStore: Send + Sync {
    /// Inserts or replaces edges, keyed by their endpoint pair.
    ///
    /// An existing validated edge is never overwritten by an unvalidated
    /// recomputation of the same pair; human confirmation outranks engine
    /// output.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn upsert_relationships(&self, edges: &[Relationship]) -> Result<()>;

    /// Returns all edges with at least one endpoint in the given set.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn relationships_touching(&self, unit_ids: &[UnitId]) -> Result<Vec<Relationship>>;

    /// Removes all edges with at least one endpoint in the given set and
    /// returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn remove_touching(&self, unit_ids: &[UnitId]) -> Result<usize>;

    /// Removes unvalidated edges with at least one endpoint in the given
    /// set, preserving validated ones, and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn remove_unvalidated_touching(&self, unit_ids: &[UnitId]) -> Result<usize>;

    /// Returns every stored edge.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn all_relationships(&self) -> Result<Vec<Relationship>>;
}

/// Convenience supertrait for services that need the whole persistence
/// surface.
pub trait Store: GenerationStore + AnchorStore + RelationshipStore {}

impl<T: GenerationStore + AnchorStore + RelationshipStore> Store for T {}
