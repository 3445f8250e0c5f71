//! Changesets and the write path
//!
//! All mutations of one logical transaction are collected in a
//! [`ChangesetBuilder`] and submitted to a backend as one [`Changeset`].
//!
//! Inserts and updates go through a [`WriteHandle`]: content is accumulated on
//! the handle and only joins the changeset when [`WriteHandle::finalize`] is
//! called. A handle dropped without finalizing (for example because `?`
//! returned early) leaves nothing behind.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::debug;

use crate::document::{Document, EntityReference};
use crate::storage::{StoreError, StoreResult};

/// What a change does to its entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Remove,
}

/// One operation of a changeset
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    kind: ChangeKind,
    reference: EntityReference,
    entity_type: String,
    document: Option<Document>,
    expected: Option<Document>,
}

impl Change {
    pub fn insert(document: Document) -> Self {
        Self {
            kind: ChangeKind::Insert,
            reference: document.identity.clone(),
            entity_type: document.entity_type.clone(),
            document: Some(document),
            expected: None,
        }
    }

    pub fn update(document: Document) -> Self {
        Self {
            kind: ChangeKind::Update,
            reference: document.identity.clone(),
            entity_type: document.entity_type.clone(),
            document: Some(document),
            expected: None,
        }
    }

    /// Update that only applies while the stored entity still equals
    /// `expected`
    ///
    /// Backends check the stored state inside their write path and report
    /// `Conflict` when another writer got there first.
    pub fn rewrite(document: Document, expected: Document) -> Self {
        Self {
            expected: Some(expected),
            ..Self::update(document)
        }
    }

    pub fn remove(reference: EntityReference, entity_type: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Remove,
            reference,
            entity_type: entity_type.into(),
            document: None,
            expected: None,
        }
    }

    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    pub fn reference(&self) -> &EntityReference {
        &self.reference
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// New content for inserts and updates; `None` for removals
    pub fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    /// Stored state a conditional rewrite was computed from
    pub fn expected(&self) -> Option<&Document> {
        self.expected.as_ref()
    }

    /// Fail with `Conflict` if `stored` is not the state this change expects
    pub fn check_expected(&self, stored: &Document) -> StoreResult<()> {
        match &self.expected {
            Some(expected) if expected != stored => Err(StoreError::Conflict {
                reference: self.reference.clone(),
                details: "stored entity changed since it was read".to_string(),
            }),
            _ => Ok(()),
        }
    }
}

/// Ordered, immutable batch of changes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changeset {
    changes: Vec<Change>,
}

impl Changeset {
    /// Build a changeset from raw changes
    ///
    /// Fails if two changes touch the same reference.
    pub fn from_changes(changes: Vec<Change>) -> StoreResult<Self> {
        let mut seen = BTreeSet::new();
        for change in &changes {
            if !seen.insert(change.reference.clone()) {
                return Err(StoreError::DuplicateChange {
                    reference: change.reference.clone(),
                });
            }
        }
        Ok(Self { changes })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Change> {
        self.changes.iter()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn references(&self) -> impl Iterator<Item = &EntityReference> {
        self.changes.iter().map(|c| &c.reference)
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.changes.iter().filter(|c| c.kind == kind).count()
    }
}

impl<'a> IntoIterator for &'a Changeset {
    type Item = &'a Change;
    type IntoIter = std::slice::Iter<'a, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}

/// Collects the changes of one logical transaction
#[derive(Debug, Default)]
pub struct ChangesetBuilder {
    changes: Vec<Change>,
}

impl ChangesetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start inserting a new entity
    pub fn insert(&mut self, document: Document) -> WriteHandle<'_> {
        WriteHandle::new(self, ChangeKind::Insert, document)
    }

    /// Start updating an existing entity with replacement content
    pub fn update(&mut self, document: Document) -> WriteHandle<'_> {
        WriteHandle::new(self, ChangeKind::Update, document)
    }

    /// Remove an entity
    pub fn remove(&mut self, reference: EntityReference, entity_type: impl Into<String>) {
        self.changes.push(Change::remove(reference, entity_type));
    }

    /// Changes finalized so far
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn build(self) -> StoreResult<Changeset> {
        Changeset::from_changes(self.changes)
    }
}

/// Scoped handle for writing one entity
///
/// Only [`finalize`](Self::finalize) adds the entity to the changeset.
#[derive(Debug)]
pub struct WriteHandle<'a> {
    builder: &'a mut ChangesetBuilder,
    kind: ChangeKind,
    document: Option<Document>,
}

impl<'a> WriteHandle<'a> {
    fn new(builder: &'a mut ChangesetBuilder, kind: ChangeKind, document: Document) -> Self {
        Self {
            builder,
            kind,
            document: Some(document),
        }
    }

    pub fn reference(&self) -> Option<&EntityReference> {
        self.document.as_ref().map(|d| &d.identity)
    }

    pub fn document(&self) -> &Document {
        // Only `finalize` takes the document, and it consumes the handle.
        self.document.as_ref().expect("write handle used after finalize")
    }

    pub fn document_mut(&mut self) -> &mut Document {
        self.document.as_mut().expect("write handle used after finalize")
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.document_mut().set_property(name, value);
        self
    }

    pub fn set_association(
        &mut self,
        name: impl Into<String>,
        reference: Option<EntityReference>,
    ) -> &mut Self {
        self.document_mut().set_association(name, reference);
        self
    }

    pub fn set_many_association(
        &mut self,
        name: impl Into<String>,
        references: Vec<EntityReference>,
    ) -> &mut Self {
        self.document_mut().set_many_association(name, references);
        self
    }

    /// Replace the accumulated content wholesale
    pub fn replace(&mut self, document: Document) -> &mut Self {
        self.document = Some(document);
        self
    }

    /// Commit the accumulated content into the changeset
    pub fn finalize(mut self) -> EntityReference {
        let document = self
            .document
            .take()
            .expect("write handle finalized twice");
        let reference = document.identity.clone();
        let change = match self.kind {
            ChangeKind::Insert => Change::insert(document),
            _ => Change::update(document),
        };
        self.builder.changes.push(change);
        reference
    }
}

impl Drop for WriteHandle<'_> {
    fn drop(&mut self) {
        if let Some(document) = self.document.take() {
            debug!(
                identity = %document.identity,
                kind = ?self.kind,
                "Discarding unfinalized write"
            );
        }
    }
}
