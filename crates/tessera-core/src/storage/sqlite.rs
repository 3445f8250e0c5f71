//! SQLite backend
//!
//! Stores one row per entity. A changeset runs inside one SQL transaction,
//! so either every change commits or the transaction rolls back.
//!
//! Enumeration pages through the table by identity
//! (`identity > last ORDER BY identity LIMIT n`). Only one page is held in
//! memory, no statement stays open while the consumer runs, and identities
//! strictly increase, so a pass never yields an entity twice. A row whose
//! `state` does not parse is reported to the consumer and the pass moves on.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tracing::{debug, warn};

use crate::document::{Document, EntityReference};
use crate::storage::schema::{init_schema, needs_init};
use crate::storage::stream::{drive, CursorGuard, CursorTracker};
use crate::storage::{
    Atomicity, ChangeKind, Changeset, EntityStore, Flow, IterationSummary, StoreError,
    StoreResult,
};

const NAME: &str = "sqlite";

/// How long a writer waits on a locked database before reporting a conflict
const BUSY_TIMEOUT: Duration = Duration::from_millis(250);

/// SQLite-backed entity store
pub struct SqliteStore {
    conn: Mutex<Connection>,
    page_size: usize,
    cursors: CursorTracker,
}

impl SqliteStore {
    /// Open or create the database file
    pub fn open(path: &Path, page_size: usize) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::from_io(e, parent.to_path_buf()))?;
        }

        let conn = Connection::open(path)?;
        debug!("Opened SQLite entity store at {:?}", path);
        Self::with_connection(conn, page_size)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory(page_size: usize) -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, page_size)
    }

    fn with_connection(conn: Connection, page_size: usize) -> StoreResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        if needs_init(&conn) {
            init_schema(&conn)?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
            page_size: page_size.max(1),
            cursors: CursorTracker::new(),
        })
    }

    /// Number of stored entities
    pub fn count(&self) -> StoreResult<i64> {
        let conn = self.lock()?;
        let count = conn.query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Cursors currently held by enumerations (leak detection)
    pub fn open_cursors(&self) -> usize {
        self.cursors.open_cursors()
    }

    pub fn cursor_tracker(&self) -> &CursorTracker {
        &self.cursors
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Backend {
            backend: NAME,
            details: "connection lock poisoned".to_string(),
        })
    }

    fn fetch_page(&self, after: &str) -> StoreResult<Vec<(String, String)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT identity, state FROM entities WHERE identity > ?1 ORDER BY identity LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![after, self.page_size as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let page = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(page)
    }
}

impl EntityStore for SqliteStore {
    fn name(&self) -> &'static str {
        NAME
    }

    fn atomicity(&self) -> Atomicity {
        Atomicity::Batch
    }

    fn get(&self, reference: &EntityReference) -> StoreResult<Document> {
        let conn = self.lock()?;
        let state: Option<String> = conn
            .query_row(
                "SELECT state FROM entities WHERE identity = ?1",
                params![reference.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match state {
            Some(state) => Document::parse(reference.as_str(), &state),
            None => Err(StoreError::not_found(reference)),
        }
    }

    fn apply_changes(&self, changes: Changeset) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| classify_write_error(e, None))?;

        // Any early return drops `tx`, which rolls back
        for change in &changes {
            let reference = change.reference();
            match (change.kind(), change.document()) {
                (ChangeKind::Insert, Some(doc)) => {
                    tx.execute(
                        "INSERT INTO entities (identity, entity_type, schema_version, state) VALUES (?1, ?2, ?3, ?4)",
                        params![
                            reference.as_str(),
                            doc.entity_type,
                            doc.schema_version.as_str(),
                            doc.to_json()?
                        ],
                    )
                    .map_err(|e| classify_write_error(e, Some(reference)))?;
                }
                (ChangeKind::Update, Some(doc)) => {
                    if change.expected().is_some() {
                        let state: Option<String> = tx
                            .query_row(
                                "SELECT state FROM entities WHERE identity = ?1",
                                params![reference.as_str()],
                                |row| row.get(0),
                            )
                            .optional()?;
                        let state = state.ok_or_else(|| StoreError::not_found(reference))?;
                        let stored = Document::parse(reference.as_str(), &state)?;
                        change.check_expected(&stored)?;
                    }
                    let updated = tx
                        .execute(
                            "UPDATE entities SET entity_type = ?2, schema_version = ?3, state = ?4 WHERE identity = ?1",
                            params![
                                reference.as_str(),
                                doc.entity_type,
                                doc.schema_version.as_str(),
                                doc.to_json()?
                            ],
                        )
                        .map_err(|e| classify_write_error(e, Some(reference)))?;
                    if updated == 0 {
                        return Err(StoreError::not_found(reference));
                    }
                }
                (ChangeKind::Remove, _) => {
                    let removed = tx
                        .execute(
                            "DELETE FROM entities WHERE identity = ?1",
                            params![reference.as_str()],
                        )
                        .map_err(|e| classify_write_error(e, Some(reference)))?;
                    if removed == 0 {
                        return Err(StoreError::not_found(reference));
                    }
                }
                (kind, None) => {
                    return Err(StoreError::Backend {
                        backend: NAME,
                        details: format!("{:?} of '{}' carries no document", kind, reference),
                    });
                }
            }
        }

        tx.commit().map_err(|e| classify_write_error(e, None))?;
        debug!("Committed {} changes to SQLite", changes.len());
        Ok(())
    }

    fn iterate(
        &self,
        consumer: &mut dyn FnMut(StoreResult<Document>) -> Flow,
    ) -> StoreResult<IterationSummary> {
        let cursor = SqliteCursor {
            store: self,
            buffer: VecDeque::new(),
            last: String::new(),
            exhausted: false,
            _guard: self.cursors.acquire(),
        };
        drive(cursor, consumer)
    }
}

struct SqliteCursor<'a> {
    store: &'a SqliteStore,
    buffer: VecDeque<(String, String)>,
    last: String,
    exhausted: bool,
    _guard: CursorGuard,
}

impl Iterator for SqliteCursor<'_> {
    type Item = StoreResult<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() {
            if self.exhausted {
                return None;
            }
            match self.store.fetch_page(&self.last) {
                Ok(page) => {
                    if page.len() < self.store.page_size {
                        self.exhausted = true;
                    }
                    self.buffer.extend(page);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }

        let (identity, state) = self.buffer.pop_front()?;
        let parsed = Document::parse(&identity, &state);
        self.last = identity;
        Some(parsed)
    }
}

/// Map SQLite write failures onto the store taxonomy
///
/// Primary-key violations and lock contention are conflicts; everything
/// else is a database fault.
fn classify_write_error(error: rusqlite::Error, reference: Option<&EntityReference>) -> StoreError {
    let code = match &error {
        rusqlite::Error::SqliteFailure(failure, _) => Some(failure.code),
        _ => None,
    };
    let reference = reference
        .cloned()
        .unwrap_or_else(|| EntityReference::new("<transaction>"));

    match code {
        Some(ErrorCode::ConstraintViolation) => StoreError::Conflict {
            reference,
            details: "entity already exists".to_string(),
        },
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
            warn!("SQLite contention while writing '{}'", reference);
            StoreError::Conflict {
                reference,
                details: "database is locked by another writer".to_string(),
            }
        }
        _ => StoreError::Database(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ChangesetBuilder;
    use serde_json::json;
    use tempfile::TempDir;

    fn doc(id: &str) -> Document {
        let mut doc = Document::new(EntityReference::new(id), "Thing", "v1".into());
        doc.set_property("n", json!(id));
        doc
    }

    fn seed(store: &SqliteStore, count: usize) {
        let mut builder = ChangesetBuilder::new();
        for i in 0..count {
            builder.insert(doc(&format!("t-{i:04}"))).finalize();
        }
        store.apply_changes(builder.build().unwrap()).unwrap();
    }

    #[test]
    fn test_paging_crosses_page_boundaries() {
        let store = SqliteStore::open_in_memory(7).unwrap();
        seed(&store, 50);

        let mut ids = Vec::new();
        let summary = store
            .iterate(&mut |d| {
                ids.push(d.unwrap().identity.to_string());
                Flow::Continue
            })
            .unwrap();

        assert_eq!(summary.visited, 50);
        assert_eq!(ids.len(), 50);
        let mut deduped = ids.clone();
        deduped.dedup();
        assert_eq!(deduped, ids);
        assert_eq!(store.open_cursors(), 0);
    }

    #[test]
    fn test_exact_page_multiple() {
        let store = SqliteStore::open_in_memory(5).unwrap();
        seed(&store, 10);

        let summary = store.iterate(&mut |_| Flow::Continue).unwrap();
        assert_eq!(summary.visited, 10);
    }

    #[test]
    fn test_duplicate_insert_is_conflict_and_rolls_back() {
        let store = SqliteStore::open_in_memory(16).unwrap();
        seed(&store, 1);

        let mut builder = ChangesetBuilder::new();
        builder.insert(doc("fresh")).finalize();
        builder.insert(doc("t-0000")).finalize();
        let err = store.apply_changes(builder.build().unwrap()).unwrap_err();

        assert!(matches!(err, StoreError::Conflict { .. }));
        assert!(matches!(
            store.get(&EntityReference::new("fresh")),
            Err(StoreError::NotFound { .. })
        ));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("store.db");

        {
            let store = SqliteStore::open(&path, 64).unwrap();
            seed(&store, 3);
        }

        let store = SqliteStore::open(&path, 64).unwrap();
        assert_eq!(store.count().unwrap(), 3);
        let loaded = store.get(&EntityReference::new("t-0002")).unwrap();
        assert_eq!(loaded.property("n"), Some(&json!("t-0002")));
    }

    #[test]
    fn test_columns_mirror_document() {
        let store = SqliteStore::open_in_memory(16).unwrap();
        seed(&store, 1);

        let conn = store.lock().unwrap();
        let (entity_type, version): (String, String) = conn
            .query_row(
                "SELECT entity_type, schema_version FROM entities WHERE identity = 't-0000'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(entity_type, "Thing");
        assert_eq!(version, "v1");
    }

    #[test]
    fn test_unparseable_row_does_not_end_the_pass() {
        let store = SqliteStore::open_in_memory(2).unwrap();
        seed(&store, 3);
        store
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO entities (identity, entity_type, schema_version, state) VALUES ('t-0001a', 'Thing', 'v1', ?1)",
                params![r#"{"identity":"t-0001a","type":"Thing"}"#],
            )
            .unwrap();

        let mut seen = Vec::new();
        let mut unreadable = Vec::new();
        let summary = store
            .iterate(&mut |item| {
                match item {
                    Ok(d) => seen.push(d.identity.to_string()),
                    Err(e) => unreadable.push(e.subject().unwrap()),
                }
                Flow::Continue
            })
            .unwrap();

        assert_eq!(seen, vec!["t-0000", "t-0001", "t-0002"]);
        assert_eq!(unreadable, vec!["t-0001a"]);
        assert_eq!(summary.unreadable, 1);
        assert_eq!(store.open_cursors(), 0);
    }
}
