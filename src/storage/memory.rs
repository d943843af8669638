//! In-memory reference backend.
//!
//! Uses a single `RwLock` over the whole dataset, which makes the
//! generation flip trivially atomic: readers take the read lock and always
//! observe either the pre-flip or post-flip world.

use super::{AnchorStore, GenerationStore, RelationshipStore};
use crate::models::{
    Anchor, AnchorId, Document, DocumentId, Generation, GenerationId, RecoveryOutcome,
    Relationship, StructuralUnit, UnitId,
};
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct StoreInner {
    documents: HashMap<DocumentId, Document>,
    generations: HashMap<GenerationId, Generation>,
    units: HashMap<GenerationId, Vec<StructuralUnit>>,
    anchors: HashMap<AnchorId, Anchor>,
    outcomes: HashMap<AnchorId, Vec<RecoveryOutcome>>,
    relationships: HashMap<(UnitId, UnitId), Relationship>,
}

/// In-memory store for tests, the CLI, and embedding applications that do
/// not need durability.
///
/// # Example
///
/// ```rust,ignore
/// use palimpsest::storage::{GenerationStore, InMemoryStore};
///
/// let store = InMemoryStore::new();
/// store.put_document(&document)?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored generations.
    #[must_use]
    pub fn generation_count(&self) -> usize {
        self.inner.read().map(|i| i.generations.len()).unwrap_or(0)
    }

    /// Returns the number of stored structural units.
    #[must_use]
    pub fn unit_count(&self) -> usize {
        self.inner
            .read()
            .map(|i| i.units.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Returns the number of stored relationship edges.
    #[must_use]
    pub fn relationship_count(&self) -> usize {
        self.inner.read().map(|i| i.relationships.len()).unwrap_or(0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreInner>> {
        self.inner.read().map_err(|_| Error::ExternalService {
            operation: "memory_store_read".to_string(),
            cause: "lock poisoned".to_string(),
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreInner>> {
        self.inner.write().map_err(|_| Error::ExternalService {
            operation: "memory_store_write".to_string(),
            cause: "lock poisoned".to_string(),
        })
    }
}

impl GenerationStore for InMemoryStore {
    fn put_document(&self, document: &Document) -> Result<()> {
        self.write()?
            .documents
            .insert(document.id.clone(), document.clone());
        Ok(())
    }

    fn document(&self, id: &DocumentId) -> Result<Option<Document>> {
        Ok(self.read()?.documents.get(id).cloned())
    }

    fn current_generation(&self, document_id: &DocumentId) -> Result<Option<Generation>> {
        Ok(self
            .read()?
            .generations
            .values()
            .find(|g| g.document_id == *document_id && g.current)
            .cloned())
    }

    fn generation(&self, id: &GenerationId) -> Result<Option<Generation>> {
        Ok(self.read()?.generations.get(id).cloned())
    }

    fn units_for_generation(&self, id: &GenerationId) -> Result<Vec<StructuralUnit>> {
        Ok(self.read()?.units.get(id).cloned().unwrap_or_default())
    }

    fn current_units(&self, document_id: &DocumentId) -> Result<Vec<StructuralUnit>> {
        let inner = self.read()?;
        let Some(current) = inner
            .generations
            .values()
            .find(|g| g.document_id == *document_id && g.current)
        else {
            return Ok(Vec::new());
        };
        Ok(inner.units.get(&current.id).cloned().unwrap_or_default())
    }

    fn stage_generation(&self, generation: &Generation, units: &[StructuralUnit]) -> Result<()> {
        let mut inner = self.write()?;
        inner
            .generations
            .insert(generation.id.clone(), generation.clone());
        inner.units.insert(generation.id.clone(), units.to_vec());
        Ok(())
    }

    fn flip_current(
        &self,
        document_id: &DocumentId,
        retiring: &GenerationId,
        promoted: &GenerationId,
    ) -> Result<()> {
        let mut inner = self.write()?;

        let retiring_ok = inner
            .generations
            .get(retiring)
            .is_some_and(|g| g.document_id == *document_id && g.current);
        if !retiring_ok {
            return Err(Error::InvalidInput(format!(
                "generation '{retiring}' is not current for document '{document_id}'"
            )));
        }
        if !inner.generations.contains_key(promoted) {
            return Err(Error::InvalidInput(format!(
                "generation '{promoted}' is not staged"
            )));
        }

        // Both flips happen under the same write guard; readers observe
        // either the old or the new world, nothing in between.
        if let Some(old) = inner.generations.get_mut(retiring) {
            old.current = false;
        }
        if let Some(new) = inner.generations.get_mut(promoted) {
            new.current = true;
        }
        Ok(())
    }

    fn delete_generation(&self, id: &GenerationId) -> Result<()> {
        let mut inner = self.write()?;
        inner.generations.remove(id);
        inner.units.remove(id);
        Ok(())
    }
}

impl AnchorStore for InMemoryStore {
    fn put_anchor(&self, anchor: &Anchor) -> Result<()> {
        self.write()?.anchors.insert(anchor.id.clone(), anchor.clone());
        Ok(())
    }

    fn anchor(&self, id: &AnchorId) -> Result<Option<Anchor>> {
        Ok(self.read()?.anchors.get(id).cloned())
    }

    fn anchors_for_document(&self, document_id: &DocumentId) -> Result<Vec<Anchor>> {
        let mut anchors: Vec<Anchor> = self
            .read()?
            .anchors
            .values()
            .filter(|a| a.document_id == *document_id)
            .cloned()
            .collect();
        anchors.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        Ok(anchors)
    }

    fn record_outcomes(&self, outcomes: &[RecoveryOutcome]) -> Result<()> {
        let mut inner = self.write()?;
        for outcome in outcomes {
            inner
                .outcomes
                .entry(outcome.anchor_id.clone())
                .or_default()
                .push(outcome.clone());
        }
        Ok(())
    }

    fn latest_outcome(&self, anchor_id: &AnchorId) -> Result<Option<RecoveryOutcome>> {
        Ok(self
            .read()?
            .outcomes
            .get(anchor_id)
            .and_then(|history| history.last().cloned()))
    }
}

impl RelationshipStore for InMemoryStore {
    fn upsert_relationships(&self, edges: &[Relationship]) -> Result<()> {
        let mut inner = self.write()?;
        for edge in edges {
            let key = edge.pair();
            let keep_existing = inner
                .relationships
                .get(&key)
                .is_some_and(|existing| existing.validated && !edge.validated);
            if !keep_existing {
                inner.relationships.insert(key, edge.clone());
            }
        }
        Ok(())
    }

    fn relationships_touching(&self, unit_ids: &[UnitId]) -> Result<Vec<Relationship>> {
        let wanted: HashSet<&UnitId> = unit_ids.iter().collect();
        let mut edges: Vec<Relationship> = self
            .read()?
            .relationships
            .values()
            .filter(|e| e.touches(&wanted))
            .cloned()
            .collect();
        edges.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        Ok(edges)
    }

    fn remove_touching(&self, unit_ids: &[UnitId]) -> Result<usize> {
        let wanted: HashSet<&UnitId> = unit_ids.iter().collect();
        let mut inner = self.write()?;
        let before = inner.relationships.len();
        inner.relationships.retain(|_, e| !e.touches(&wanted));
        Ok(before - inner.relationships.len())
    }

    fn remove_unvalidated_touching(&self, unit_ids: &[UnitId]) -> Result<usize> {
        let wanted: HashSet<&UnitId> = unit_ids.iter().collect();
        let mut inner = self.write()?;
        let before = inner.relationships.len();
        inner
            .relationships
            .retain(|_, e| e.validated || !e.touches(&wanted));
        Ok(before - inner.relationships.len())
    }

    fn all_relationships(&self) -> Result<Vec<Relationship>> {
        let mut edges: Vec<Relationship> =
            self.read()?.relationships.values().cloned().collect();
        edges.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        Ok(edges)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::models::{EngineKind, RecoveryStatus, RecoveryTier};

    fn seeded_document(store: &InMemoryStore, text: &str) -> (Document, Generation) {
        let document = Document::new(DocumentId::generate());
        store.put_document(&document).unwrap();
        let generation = Generation::initial(document.id.clone(), text);
        store.stage_generation(&generation, &[]).unwrap();
        (document, generation)
    }

    #[test]
    fn test_current_generation_roundtrip() {
        let store = InMemoryStore::new();
        let (document, generation) = seeded_document(&store, "hello");

        let current = store.current_generation(&document.id).unwrap().unwrap();
        assert_eq!(current.id, generation.id);
        assert!(current.current);
    }

    #[test]
    fn test_flip_current_swaps_exactly_one() {
        let store = InMemoryStore::new();
        let (document, old) = seeded_document(&store, "v1");
        let staged = Generation::staged(document.id.clone(), 1, "v2");
        store.stage_generation(&staged, &[]).unwrap();

        store.flip_current(&document.id, &old.id, &staged.id).unwrap();

        let current = store.current_generation(&document.id).unwrap().unwrap();
        assert_eq!(current.id, staged.id);
        assert!(!store.generation(&old.id).unwrap().unwrap().current);
    }

    #[test]
    fn test_flip_current_rejects_non_current_retiree() {
        let store = InMemoryStore::new();
        let (document, _old) = seeded_document(&store, "v1");
        let staged = Generation::staged(document.id.clone(), 1, "v2");
        store.stage_generation(&staged, &[]).unwrap();

        let bogus = GenerationId::new("not-there");
        assert!(matches!(
            store.flip_current(&document.id, &bogus, &staged.id),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_outcomes_are_append_only() {
        let store = InMemoryStore::new();
        let anchor_id = AnchorId::new("a-1");
        let generation_id = GenerationId::new("g-1");

        let first = RecoveryOutcome::lost(anchor_id.clone(), generation_id.clone(), 0.2, None);
        let second = RecoveryOutcome::resolved(
            anchor_id.clone(),
            generation_id,
            5,
            10,
            1.0,
            RecoveryTier::Exact,
            RecoveryStatus::Recovered,
        );
        store.record_outcomes(std::slice::from_ref(&first)).unwrap();
        store.record_outcomes(std::slice::from_ref(&second)).unwrap();

        let latest = store.latest_outcome(&anchor_id).unwrap().unwrap();
        assert_eq!(latest, second);
    }

    #[test]
    fn test_upsert_preserves_validated_edges() {
        let store = InMemoryStore::new();
        let validated = Relationship::new(
            UnitId::new("u-1"),
            UnitId::new("u-2"),
            EngineKind::Similarity,
        )
        .with_strength(0.9)
        .with_validated(true);
        store
            .upsert_relationships(std::slice::from_ref(&validated))
            .unwrap();

        let recomputed = Relationship::new(
            UnitId::new("u-1"),
            UnitId::new("u-2"),
            EngineKind::Similarity,
        )
        .with_strength(0.4);
        store
            .upsert_relationships(std::slice::from_ref(&recomputed))
            .unwrap();

        let stored = store.all_relationships().unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].validated);
        assert!((stored[0].strength - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_remove_unvalidated_touching_spares_validated() {
        let store = InMemoryStore::new();
        let validated =
            Relationship::new(UnitId::new("u-1"), UnitId::new("u-2"), EngineKind::Bridge)
                .with_validated(true);
        let unvalidated =
            Relationship::new(UnitId::new("u-1"), UnitId::new("u-3"), EngineKind::Similarity);
        store
            .upsert_relationships(&[validated, unvalidated])
            .unwrap();

        let removed = store
            .remove_unvalidated_touching(&[UnitId::new("u-1")])
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.relationship_count(), 1);
        assert!(store.all_relationships().unwrap()[0].validated);
    }

    #[test]
    fn test_delete_generation_removes_units() {
        let store = InMemoryStore::new();
        let (document, generation) = seeded_document(&store, "text");
        let unit = StructuralUnit {
            id: UnitId::generate(),
            document_id: document.id.clone(),
            generation_id: generation.id.clone(),
            index: 0,
            start_offset: 0,
            end_offset: 4,
            text: "text".to_string(),
            embedding: Vec::new(),
            domain_label: String::new(),
            importance_score: 0.5,
            topic: None,
            stance: None,
        };
        store.stage_generation(&generation, &[unit]).unwrap();
        assert_eq!(store.unit_count(), 1);

        store.delete_generation(&generation.id).unwrap();
        assert_eq!(store.unit_count(), 0);
        assert!(store.generation(&generation.id).unwrap().is_none());
    }
}
