//! In-memory map backend
//!
//! Stores each entity as its serialized JSON string in an ordered map, so
//! every read hands out a fresh copy. A single write lock covers validation
//! and application of a changeset, which makes batches atomic.
//!
//! Enumeration walks the map in identity order one entry at a time, taking
//! the read lock only while fetching the next entry. A corrupt entry is
//! reported to the consumer and skipped past. Writers are never
//! blocked for the length of a scan, and because the cursor only moves to
//! strictly greater identities no entity can be seen twice.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use tracing::debug;

use crate::document::{Document, EntityReference};
use crate::storage::stream::{drive, CursorGuard, CursorTracker};
use crate::storage::{
    Atomicity, ChangeKind, Changeset, EntityStore, Flow, IterationSummary, StoreError,
    StoreResult,
};

const NAME: &str = "memory";

/// Map-backed entity store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<EntityReference, String>>,
    cursors: CursorTracker,
    fail_next_apply: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw serialized state, bypassing changeset checks
    ///
    /// Meant for seeding fixtures, including deliberately malformed ones.
    pub fn put_raw(&self, reference: EntityReference, state: impl Into<String>) -> StoreResult<()> {
        self.entries
            .write()
            .map_err(|_| poisoned())?
            .insert(reference, state.into());
        Ok(())
    }

    /// Make the next `apply_changes` fail with a backend fault after
    /// validation, before anything is written
    pub fn fail_next_apply(&self) {
        self.fail_next_apply.store(true, Ordering::SeqCst);
    }

    /// Cursors currently held by enumerations (leak detection)
    pub fn open_cursors(&self) -> usize {
        self.cursors.open_cursors()
    }

    pub fn cursor_tracker(&self) -> &CursorTracker {
        &self.cursors
    }

    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.entries.read().map_err(|_| poisoned())?.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl EntityStore for MemoryStore {
    fn name(&self) -> &'static str {
        NAME
    }

    fn atomicity(&self) -> Atomicity {
        Atomicity::Batch
    }

    fn get(&self, reference: &EntityReference) -> StoreResult<Document> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        let state = entries
            .get(reference)
            .ok_or_else(|| StoreError::not_found(reference))?;
        Document::parse(reference.as_str(), state)
    }

    fn apply_changes(&self, changes: Changeset) -> StoreResult<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;

        // Validate and serialize everything before touching the map
        let mut staged = Vec::with_capacity(changes.len());
        for change in &changes {
            let exists = entries.contains_key(change.reference());
            match change.kind() {
                ChangeKind::Insert if exists => {
                    return Err(StoreError::Conflict {
                        reference: change.reference().clone(),
                        details: "entity already exists".to_string(),
                    });
                }
                ChangeKind::Update | ChangeKind::Remove if !exists => {
                    return Err(StoreError::not_found(change.reference()));
                }
                _ => {}
            }
            if let (Some(_), Some(state)) = (change.expected(), entries.get(change.reference())) {
                let stored = Document::parse(change.reference().as_str(), state)?;
                change.check_expected(&stored)?;
            }
            let state = match change.document() {
                Some(doc) => Some(doc.to_json()?),
                None => None,
            };
            staged.push((change.reference().clone(), state));
        }

        if self.fail_next_apply.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Backend {
                backend: NAME,
                details: "injected write fault".to_string(),
            });
        }

        for (reference, state) in staged {
            match state {
                Some(state) => {
                    entries.insert(reference, state);
                }
                None => {
                    entries.remove(&reference);
                }
            }
        }
        debug!("Applied {} changes to memory store", changes.len());
        Ok(())
    }

    fn iterate(
        &self,
        consumer: &mut dyn FnMut(StoreResult<Document>) -> Flow,
    ) -> StoreResult<IterationSummary> {
        let cursor = MemoryCursor {
            store: self,
            last: None,
            _guard: self.cursors.acquire(),
        };
        drive(cursor, consumer)
    }
}

struct MemoryCursor<'a> {
    store: &'a MemoryStore,
    last: Option<EntityReference>,
    _guard: CursorGuard,
}

impl Iterator for MemoryCursor<'_> {
    type Item = StoreResult<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        let entries = match self.store.entries.read() {
            Ok(entries) => entries,
            Err(_) => return Some(Err(poisoned())),
        };
        let (reference, state) = match &self.last {
            None => entries.iter().next()?,
            Some(last) => entries
                .range::<EntityReference, _>((Bound::Excluded(last), Bound::Unbounded))
                .next()?,
        };
        let reference = reference.clone();
        let parsed = Document::parse(reference.as_str(), state);
        drop(entries);

        self.last = Some(reference);
        Some(parsed)
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend {
        backend: NAME,
        details: "store lock poisoned".to_string(),
    }
}
