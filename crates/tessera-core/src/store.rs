//! Unified storage interface
//!
//! The `Store` pairs one [`EntityStore`] backend with the
//! [`MigrationEngine`] and is the entry point applications use:
//!
//! - reads migrate documents to the current schema version on the fly and,
//!   when `write_back` is on, persist the migrated form
//! - writes go through a [`ChangesetBuilder`] and are applied in one call
//! - operator tooling (`migrate_all`, `export`, `rollback`, `import`) works
//!   in terms of the same primitives
//!
//! ## Usage
//!
//! ```ignore
//! let store = Store::open(Config::load()?)?;
//!
//! let mut person = store.new_entity("Person")?;
//! person.set_property("name", json!("Ada"));
//!
//! let mut changes = store.begin();
//! let reference = changes.insert(person).finalize();
//! store.commit(changes)?;
//!
//! let person = store.get(&reference)?;
//! ```

use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::document::{Document, EntityReference, SchemaVersion};
use crate::migration::{
    load_schema, MigrationEngine, MigrationError, MigrationResult, StateLookup, VersionState,
};
use crate::registry::TypeRegistry;
use crate::storage::{
    open_backend, Change, Changeset, ChangesetBuilder, EntityStore, Flow, IterationSummary,
    StoreError, StoreResult,
};

/// Counts from a bulk migration or rollback pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrationReport {
    pub scanned: usize,
    /// Documents rewritten
    pub migrated: usize,
    /// Documents already at the requested version
    pub current: usize,
    pub failed: usize,
    pub failures: Vec<MigrationFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationFailure {
    /// Entity identity, or the backend's name for an entry it could not parse
    pub reference: String,
    pub error: String,
}

impl MigrationReport {
    fn record_failure(&mut self, error: &StoreError) {
        let reference = error.subject().unwrap_or_else(|| "<unknown>".to_string());
        warn!(identity = %reference, "Skipping entity: {}", error);
        self.failed += 1;
        self.failures.push(MigrationFailure {
            reference,
            error: error.to_string(),
        });
    }

    /// Count the outcome of rewriting one entity
    ///
    /// A conflicting concurrent write costs only this entity; any other
    /// fault ends the pass.
    fn record_rewrite(&mut self, result: StoreResult<()>) -> StoreResult<()> {
        match result {
            Ok(()) => self.migrated += 1,
            Err(e @ StoreError::Conflict { .. }) => self.record_failure(&e),
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

/// Counts from an export pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExportReport {
    pub exported: usize,
    pub skipped: usize,
}

/// Document counts as stored, before any migration
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub backend: String,
    pub atomicity: String,
    pub total: usize,
    /// Stored entries that could not be parsed
    pub unreadable: usize,
    /// Documents whose stamped version is older than their target
    pub behind: usize,
    /// Documents stamped with a version newer than this release knows
    pub ahead: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_version: BTreeMap<String, usize>,
}

/// Unified storage interface
///
/// Holds the backend and the migration engine for the lifetime of the
/// application.
pub struct Store {
    backend: Box<dyn EntityStore>,
    engine: MigrationEngine,
    config: Config,
}

/// Adapts the boxed backend to the read-only lookup migrations use
struct BackendLookup<'a>(&'a dyn EntityStore);

impl StateLookup for BackendLookup<'_> {
    fn exists(&self, reference: &EntityReference) -> MigrationResult<bool> {
        self.0
            .contains(reference)
            .map_err(|e| MigrationError::Lookup(e.to_string()))
    }
}

impl Store {
    /// Open the backend and load the schema file named by the configuration
    pub fn open(config: Config) -> Result<Self> {
        let engine = match config.schema_path() {
            Some(path) => load_schema(&path)
                .with_context(|| format!("Failed to load schema file: {:?}", path))?,
            None => MigrationEngine::default(),
        };
        let backend = open_backend(&config).context("Failed to open storage backend")?;

        info!(
            "Store ready: {} entity types, {} migration steps",
            engine.registry().len(),
            engine.ladder().len()
        );
        Ok(Self::with_backend(backend, engine, config))
    }

    pub fn with_backend(
        backend: Box<dyn EntityStore>,
        engine: MigrationEngine,
        config: Config,
    ) -> Self {
        Self {
            backend,
            engine,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn backend(&self) -> &dyn EntityStore {
        self.backend.as_ref()
    }

    pub fn engine(&self) -> &MigrationEngine {
        &self.engine
    }

    pub fn registry(&self) -> &TypeRegistry {
        self.engine.registry()
    }

    fn lookup(&self) -> BackendLookup<'_> {
        BackendLookup(self.backend.as_ref())
    }

    // ==================== Reads ====================

    /// Fetch an entity at the current schema version
    pub fn get(&self, reference: &EntityReference) -> StoreResult<Document> {
        let stored = self.backend.get(reference)?;
        self.migrate_on_read(stored)
    }

    /// Fetch an entity exactly as stored, without migrating it
    pub fn get_raw(&self, reference: &EntityReference) -> StoreResult<Document> {
        self.backend.get(reference)
    }

    /// Enumerate every entity at the current schema version
    ///
    /// Unreadable entries and migration faults reach the consumer as `Err`
    /// for that entity only and the pass continues; backend faults end the
    /// pass and are returned.
    pub fn iterate(
        &self,
        consumer: &mut dyn FnMut(StoreResult<Document>) -> Flow,
    ) -> StoreResult<IterationSummary> {
        self.backend.iterate(&mut |stored| {
            consumer(stored.and_then(|doc| self.migrate_on_read(doc)))
        })
    }

    fn migrate_on_read(&self, stored: Document) -> StoreResult<Document> {
        let outcome = self
            .engine
            .upgrade(&stored, &self.lookup())
            .map_err(|e| StoreError::from_migration(&stored.identity, e))?;

        if outcome.changed {
            debug!(
                identity = %outcome.document.identity,
                from = %outcome.from,
                to = %outcome.to,
                steps = outcome.steps_applied,
                "Migrated on read"
            );
            if self.config.write_back {
                self.write_back(stored, &outcome.document);
            }
        }
        Ok(outcome.document)
    }

    /// Persist a migrated document unless the stored entity changed since
    /// `read`; failure only costs a later re-migration
    fn write_back(&self, read: Document, migrated: &Document) {
        match self.store_rewrite(migrated.clone(), read) {
            Ok(()) => {}
            Err(StoreError::Conflict { .. }) => {
                debug!(
                    identity = %migrated.identity,
                    "Write-back skipped: entity changed since read"
                );
            }
            Err(e) => warn!(identity = %migrated.identity, "Write-back failed: {}", e),
        }
    }

    // ==================== Writes ====================

    /// Start a changeset
    pub fn begin(&self) -> ChangesetBuilder {
        ChangesetBuilder::new()
    }

    /// Create a document for a registered type at its current version
    ///
    /// The document is not stored until it is inserted into a changeset and
    /// committed.
    pub fn new_entity(&self, entity_type: &str) -> StoreResult<Document> {
        self.registry()
            .new_document(entity_type, EntityReference::generate())
    }

    /// Apply a changeset built with [`Store::begin`]
    pub fn commit(&self, builder: ChangesetBuilder) -> StoreResult<()> {
        let changes = builder.build()?;
        if changes.is_empty() {
            return Ok(());
        }
        let count = changes.len();
        self.backend.apply_changes(changes)?;
        debug!("Committed {} changes to {} backend", count, self.backend.name());
        Ok(())
    }

    // ==================== Operator tooling ====================

    /// Migrate every stored entity to its current version
    pub fn migrate_all(&self) -> StoreResult<MigrationReport> {
        let mut report = MigrationReport::default();
        let lookup = self.lookup();

        self.for_each_stored(|stored| {
            report.scanned += 1;
            let doc = match stored {
                Ok(doc) => doc,
                Err(e) => {
                    report.record_failure(&e);
                    return Ok(());
                }
            };
            let outcome = match self.engine.upgrade(&doc, &lookup) {
                Ok(outcome) => outcome,
                Err(e) => {
                    report.record_failure(&StoreError::from_migration(&doc.identity, e));
                    return Ok(());
                }
            };
            if outcome.changed {
                report.record_rewrite(self.store_rewrite(outcome.document, doc))
            } else {
                report.current += 1;
                Ok(())
            }
        })?;

        info!(
            "Migration pass complete: {} scanned, {} migrated, {} failed",
            report.scanned, report.migrated, report.failed
        );
        Ok(report)
    }

    /// Downgrade every stored entity to `to_version`
    ///
    /// Entities already at or below the version are left alone.
    pub fn rollback(&self, to_version: &SchemaVersion) -> StoreResult<MigrationReport> {
        let mut report = MigrationReport::default();
        let lookup = self.lookup();

        self.for_each_stored(|stored| {
            report.scanned += 1;
            let doc = match stored {
                Ok(doc) => doc,
                Err(e) => {
                    report.record_failure(&e);
                    return Ok(());
                }
            };
            if doc.schema_version <= *to_version {
                report.current += 1;
                return Ok(());
            }
            match self.engine.downgrade(&doc, to_version, &lookup) {
                Ok(outcome) => report.record_rewrite(self.store_rewrite(outcome.document, doc)),
                Err(e) => {
                    report.record_failure(&StoreError::from_migration(&doc.identity, e));
                    Ok(())
                }
            }
        })?;

        info!(
            "Rollback to {} complete: {} rewritten, {} failed",
            to_version, report.migrated, report.failed
        );
        Ok(report)
    }

    /// Write every entity as one JSON document per line
    ///
    /// Entities are brought to their current version first, then downgraded
    /// to `to_version` when one is given. Entities that cannot be read or
    /// migrated are skipped and counted. Nothing is written back to the
    /// store.
    pub fn export(
        &self,
        to_version: Option<&SchemaVersion>,
        writer: &mut dyn Write,
    ) -> StoreResult<ExportReport> {
        let mut report = ExportReport::default();
        let lookup = self.lookup();

        self.for_each_stored(|stored| {
            let doc = match stored {
                Ok(doc) => doc,
                Err(e) => {
                    warn!("Not exported: {}", e);
                    report.skipped += 1;
                    return Ok(());
                }
            };
            let exported = self.engine.upgrade(&doc, &lookup).and_then(|up| match to_version {
                Some(version) => self.engine.downgrade(&up.document, version, &lookup),
                None => Ok(up),
            });
            match exported {
                Ok(outcome) => {
                    let line = outcome.document.to_json()?;
                    writeln!(writer, "{}", line).map_err(export_fault)?;
                    report.exported += 1;
                }
                Err(e) => {
                    warn!(identity = %doc.identity, "Not exported: {}", e);
                    report.skipped += 1;
                }
            }
            Ok(())
        })?;

        writer.flush().map_err(export_fault)?;
        info!(
            "Exported {} entities ({} skipped)",
            report.exported, report.skipped
        );
        Ok(report)
    }

    /// Insert entities from JSON lines as one changeset
    ///
    /// Blank lines are ignored. Any malformed line, or any reference already
    /// stored, rejects the whole import on batch-atomic backends.
    pub fn import(&self, reader: &mut dyn BufRead) -> StoreResult<usize> {
        let mut builder = self.begin();
        for (index, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| StoreError::from_io(e, PathBuf::from("<import>")))?;
            if line.trim().is_empty() {
                continue;
            }
            let doc = Document::parse(&format!("import line {}", index + 1), &line)?;
            builder.insert(doc).finalize();
        }

        let count = builder.len();
        self.commit(builder)?;
        info!("Imported {} entities", count);
        Ok(count)
    }

    /// Count stored entities by type and stamped version
    pub fn stats(&self) -> StoreResult<StoreStats> {
        let mut stats = StoreStats {
            backend: self.backend.name().to_string(),
            atomicity: self.backend.atomicity().to_string(),
            ..StoreStats::default()
        };

        self.for_each_stored(|stored| {
            stats.total += 1;
            let doc = match stored {
                Ok(doc) => doc,
                Err(e) => {
                    warn!("Unreadable entry: {}", e);
                    stats.unreadable += 1;
                    return Ok(());
                }
            };
            match self.engine.classify(&doc) {
                VersionState::BehindVersion => stats.behind += 1,
                VersionState::AheadVersion => stats.ahead += 1,
                VersionState::AtTargetVersion => {}
            }
            *stats.by_type.entry(doc.entity_type).or_default() += 1;
            *stats
                .by_version
                .entry(doc.schema_version.to_string())
                .or_default() += 1;
            Ok(())
        })?;
        Ok(stats)
    }

    /// Visit stored documents unmigrated
    ///
    /// Unreadable entries are passed to `visit` as `Err`. The first error
    /// `visit` returns ends the pass.
    fn for_each_stored(
        &self,
        mut visit: impl FnMut(StoreResult<Document>) -> StoreResult<()>,
    ) -> StoreResult<()> {
        let mut fault = None;
        self.backend.iterate(&mut |stored| match visit(stored) {
            Ok(()) => Flow::Continue,
            Err(e) => {
                fault = Some(e);
                Flow::Stop
            }
        })?;
        match fault {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Replace `read` with `doc`, failing with `Conflict` if another writer
    /// changed the entity in between
    fn store_rewrite(&self, doc: Document, read: Document) -> StoreResult<()> {
        let changes = Changeset::from_changes(vec![Change::rewrite(doc, read)])?;
        self.backend.apply_changes(changes)
    }
}

fn export_fault(error: std::io::Error) -> StoreError {
    StoreError::from_io(error, PathBuf::from("<export>"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;
    use crate::migration::MigrationLadder;
    use crate::registry::EntityTypeDescriptor;
    use crate::storage::{Atomicity, MemoryStore};
    use serde_json::json;
    use std::io::Cursor;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn engine() -> MigrationEngine {
        let ladder = MigrationLadder::builder("v1")
            .to_version("v2")
            .for_entities(["Person"])
            .add_property("nickname", json!(""))
            .to_version("v3")
            .rename_property("name", "fullName")
            .build()
            .unwrap();
        let registry = TypeRegistry::new([EntityTypeDescriptor::new("Person", "v3")
            .with_property("fullName")
            .with_property("nickname")
            .with_many_association("friends")])
        .unwrap();
        MigrationEngine::new(ladder, registry)
    }

    fn memory_config() -> Config {
        Config {
            backend: BackendKind::Memory,
            ..Config::default()
        }
    }

    fn memory_store(config: Config) -> Store {
        Store::with_backend(Box::new(MemoryStore::new()), engine(), config)
    }

    fn legacy(id: &str, name: &str) -> String {
        json!({
            "identity": id,
            "schemaVersion": "v1",
            "type": "Person",
            "properties": { "name": name },
        })
        .to_string()
    }

    /// Store whose backend already holds v1 documents
    fn seeded(config: Config, ids: &[&str]) -> Store {
        let backend = MemoryStore::new();
        for id in ids {
            backend
                .put_raw(EntityReference::new(*id), legacy(id, "Ada"))
                .unwrap();
        }
        Store::with_backend(Box::new(backend), engine(), config)
    }

    /// Backend where another writer commits right after the next read
    struct RacingBackend {
        inner: MemoryStore,
        pending: Mutex<Option<Document>>,
    }

    impl RacingBackend {
        fn new(inner: MemoryStore, concurrent_write: Document) -> Self {
            Self {
                inner,
                pending: Mutex::new(Some(concurrent_write)),
            }
        }

        fn race(&self) {
            if let Some(doc) = self.pending.lock().unwrap().take() {
                let changes = Changeset::from_changes(vec![Change::update(doc)]).unwrap();
                self.inner.apply_changes(changes).unwrap();
            }
        }
    }

    impl EntityStore for RacingBackend {
        fn name(&self) -> &'static str {
            "racing"
        }

        fn atomicity(&self) -> Atomicity {
            self.inner.atomicity()
        }

        fn get(&self, reference: &EntityReference) -> StoreResult<Document> {
            let read = self.inner.get(reference)?;
            self.race();
            Ok(read)
        }

        fn apply_changes(&self, changes: Changeset) -> StoreResult<()> {
            self.inner.apply_changes(changes)
        }

        fn iterate(
            &self,
            consumer: &mut dyn FnMut(StoreResult<Document>) -> Flow,
        ) -> StoreResult<IterationSummary> {
            self.inner.iterate(&mut |item| {
                self.race();
                consumer(item)
            })
        }
    }

    fn racing(ids: &[&str], concurrent_write: &str) -> Store {
        let inner = MemoryStore::new();
        for id in ids {
            inner
                .put_raw(EntityReference::new(*id), legacy(id, "Ada"))
                .unwrap();
        }
        let concurrent = Document::parse("concurrent", concurrent_write).unwrap();
        let backend = RacingBackend::new(inner, concurrent);
        Store::with_backend(Box::new(backend), engine(), memory_config())
    }

    /// Store holding `a` and `c` as v1 documents and `b` without a version
    fn with_unreadable_entry() -> Store {
        let backend = MemoryStore::new();
        backend
            .put_raw(EntityReference::new("a"), legacy("a", "Ada"))
            .unwrap();
        backend
            .put_raw(
                EntityReference::new("b"),
                r#"{"identity":"b","type":"Person","properties":{"name":"Bob"}}"#,
            )
            .unwrap();
        backend
            .put_raw(EntityReference::new("c"), legacy("c", "Cy"))
            .unwrap();
        let config = Config {
            write_back: false,
            ..memory_config()
        };
        Store::with_backend(Box::new(backend), engine(), config)
    }

    #[test]
    fn test_new_entity_commit_and_get() {
        let store = memory_store(memory_config());

        let mut person = store.new_entity("Person").unwrap();
        person.set_property("fullName", json!("Ada Lovelace"));
        assert_eq!(person.schema_version.as_str(), "v3");

        let mut changes = store.begin();
        let reference = changes.insert(person).finalize();
        store.commit(changes).unwrap();

        let loaded = store.get(&reference).unwrap();
        assert_eq!(loaded.property("fullName"), Some(&json!("Ada Lovelace")));
        assert!(loaded.has_many_association("friends"));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let store = memory_store(memory_config());
        assert!(matches!(
            store.new_entity("Spaceship"),
            Err(StoreError::UnknownType { .. })
        ));
    }

    #[test]
    fn test_get_migrates_and_writes_back() {
        let store = seeded(memory_config(), &["p-1"]);
        let reference = EntityReference::new("p-1");

        let doc = store.get(&reference).unwrap();
        assert_eq!(doc.schema_version.as_str(), "v3");
        assert_eq!(doc.property("fullName"), Some(&json!("Ada")));

        let raw = store.get_raw(&reference).unwrap();
        assert_eq!(raw, doc);
    }

    #[test]
    fn test_get_without_write_back_leaves_stored_form() {
        let config = Config {
            write_back: false,
            ..memory_config()
        };
        let store = seeded(config, &["p-1"]);
        let reference = EntityReference::new("p-1");

        assert_eq!(store.get(&reference).unwrap().schema_version.as_str(), "v3");
        assert_eq!(store.get_raw(&reference).unwrap().schema_version.as_str(), "v1");
    }

    #[test]
    fn test_iterate_delivers_migration_faults_per_entity() {
        let backend = MemoryStore::new();
        backend
            .put_raw(EntityReference::new("a"), legacy("a", "Ada"))
            .unwrap();
        backend
            .put_raw(
                EntityReference::new("b"),
                json!({
                    "identity": "b",
                    "schemaVersion": "v2",
                    "type": "Person",
                    "properties": { "name": "Bob", "fullName": "Robert" },
                })
                .to_string(),
            )
            .unwrap();
        backend
            .put_raw(EntityReference::new("c"), legacy("c", "Cy"))
            .unwrap();
        let store = Store::with_backend(Box::new(backend), engine(), memory_config());

        let mut ok = Vec::new();
        let mut failed = Vec::new();
        store
            .iterate(&mut |item| {
                match item {
                    Ok(doc) => ok.push(doc.identity.to_string()),
                    Err(e) => {
                        assert!(matches!(e, StoreError::CorruptDocument { .. }));
                        failed.push(e.to_string());
                    }
                }
                Flow::Continue
            })
            .unwrap();

        assert_eq!(ok, vec!["a", "c"]);
        assert_eq!(failed.len(), 1);
        assert!(failed[0].contains("'b'"));
    }

    #[test]
    fn test_version_skew_on_read() {
        let backend = MemoryStore::new();
        backend
            .put_raw(
                EntityReference::new("p-9"),
                r#"{"identity":"p-9","schemaVersion":"v9","type":"Person"}"#,
            )
            .unwrap();
        let store = Store::with_backend(Box::new(backend), engine(), memory_config());

        let err = store.get(&EntityReference::new("p-9")).unwrap_err();
        assert!(matches!(err, StoreError::VersionSkew { .. }));
        let raw = store.get_raw(&EntityReference::new("p-9")).unwrap();
        assert_eq!(raw.schema_version.as_str(), "v9");
    }

    #[test]
    fn test_migrate_all_and_stats() {
        let config = Config {
            write_back: false,
            ..memory_config()
        };
        let store = seeded(config, &["p-1", "p-2", "p-3"]);

        let before = store.stats().unwrap();
        assert_eq!(before.total, 3);
        assert_eq!(before.behind, 3);
        assert_eq!(before.by_version.get("v1"), Some(&3));

        let report = store.migrate_all().unwrap();
        assert_eq!(report.scanned, 3);
        assert_eq!(report.migrated, 3);
        assert_eq!(report.failed, 0);

        let after = store.stats().unwrap();
        assert_eq!(after.behind, 0);
        assert_eq!(after.by_version.get("v3"), Some(&3));
        assert_eq!(after.by_type.get("Person"), Some(&3));

        let again = store.migrate_all().unwrap();
        assert_eq!(again.current, 3);
        assert_eq!(again.migrated, 0);
    }

    #[test]
    fn test_rollback_restores_old_shape() {
        let store = seeded(memory_config(), &["p-1"]);
        store.migrate_all().unwrap();

        let report = store.rollback(&SchemaVersion::new("v1")).unwrap();
        assert_eq!(report.migrated, 1);

        let raw = store.get_raw(&EntityReference::new("p-1")).unwrap();
        assert_eq!(raw.schema_version.as_str(), "v1");
        assert_eq!(raw.property("name"), Some(&json!("Ada")));
        assert!(!raw.has_property("nickname"));
    }

    #[test]
    fn test_export_to_older_version_then_import() {
        let source = seeded(memory_config(), &["p-1", "p-2"]);

        let mut buffer = Vec::new();
        let report = source
            .export(Some(&SchemaVersion::new("v2")), &mut buffer)
            .unwrap();
        assert_eq!(report.exported, 2);

        let text = String::from_utf8(buffer.clone()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("\"schemaVersion\":\"v2\""));
        assert!(text.contains("\"nickname\""));

        let target = memory_store(memory_config());
        let imported = target.import(&mut Cursor::new(buffer)).unwrap();
        assert_eq!(imported, 2);

        let doc = target.get(&EntityReference::new("p-2")).unwrap();
        assert_eq!(doc.schema_version.as_str(), "v3");
        assert_eq!(doc.property("fullName"), Some(&json!("Ada")));
    }

    #[test]
    fn test_import_rejects_malformed_line_atomically() {
        let store = memory_store(memory_config());
        let input = format!("{}\n\nnot json\n", legacy("p-1", "Ada"));

        let err = store.import(&mut Cursor::new(input)).unwrap_err();
        assert!(err.to_string().contains("import line 3"));
        assert_eq!(store.stats().unwrap().total, 0);
    }

    #[test]
    fn test_open_sqlite_backend_from_config() {
        let temp_dir = TempDir::new().unwrap();
        let schema_path = temp_dir.path().join("schema.toml");
        std::fs::write(
            &schema_path,
            r#"
[[entity_type]]
name = "Person"
version = "v2"

[[migration]]
from = "v1"
to = "v2"
op = "add_property"
name = "nickname"
default = "none"
"#,
        )
        .unwrap();

        let config = Config {
            data_dir: temp_dir.path().to_path_buf(),
            backend: BackendKind::Sqlite,
            schema_file: Some(schema_path),
            ..Config::default()
        };

        {
            let store = Store::open(config.clone()).unwrap();
            let person = store.new_entity("Person").unwrap();
            let mut changes = store.begin();
            changes.insert(person).finalize();
            store.commit(changes).unwrap();
        }

        assert!(config.sqlite_path().exists());
        let reopened = Store::open(config).unwrap();
        assert_eq!(reopened.stats().unwrap().total, 1);
        assert_eq!(reopened.stats().unwrap().backend, "sqlite");
    }

    #[test]
    fn test_write_back_never_overwrites_a_concurrent_commit() {
        let store = racing(&["p-1"], &legacy("p-1", "Grace"));
        let reference = EntityReference::new("p-1");

        // The read saw Ada; Grace was committed before the write-back
        let read = store.get(&reference).unwrap();
        assert_eq!(read.property("fullName"), Some(&json!("Ada")));

        let raw = store.get_raw(&reference).unwrap();
        assert_eq!(raw.schema_version.as_str(), "v1");
        assert_eq!(raw.property("name"), Some(&json!("Grace")));

        // The next read migrates the committed content and persists it
        assert_eq!(
            store.get(&reference).unwrap().property("fullName"),
            Some(&json!("Grace"))
        );
        let raw = store.get_raw(&reference).unwrap();
        assert_eq!(raw.schema_version.as_str(), "v3");
        assert_eq!(raw.property("fullName"), Some(&json!("Grace")));
    }

    #[test]
    fn test_migrate_all_skips_entity_changed_during_pass() {
        let store = racing(&["p-1"], &legacy("p-1", "Grace"));

        let report = store.migrate_all().unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.migrated, 0);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].reference, "p-1");

        let raw = store.get_raw(&EntityReference::new("p-1")).unwrap();
        assert_eq!(raw.property("name"), Some(&json!("Grace")));

        let again = store.migrate_all().unwrap();
        assert_eq!(again.migrated, 1);
        let raw = store.get_raw(&EntityReference::new("p-1")).unwrap();
        assert_eq!(raw.property("fullName"), Some(&json!("Grace")));
    }

    #[test]
    fn test_unreadable_entry_does_not_stop_migration() {
        let store = with_unreadable_entry();

        let report = store.migrate_all().unwrap();
        assert_eq!(report.scanned, 3);
        assert_eq!(report.migrated, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].reference, "b");
        assert!(report.failures[0].error.contains("schemaVersion"));

        for id in ["a", "c"] {
            let raw = store.get_raw(&EntityReference::new(id)).unwrap();
            assert_eq!(raw.schema_version.as_str(), "v3");
        }
    }

    #[test]
    fn test_unreadable_entry_is_skipped_by_export_and_counted() {
        let store = with_unreadable_entry();

        let mut buffer = Vec::new();
        let report = store.export(None, &mut buffer).unwrap();
        assert_eq!(report.exported, 2);
        assert_eq!(report.skipped, 1);
        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(text.lines().count(), 2);

        let stats = store.stats().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.unreadable, 1);
        assert_eq!(stats.behind, 2);

        let mut ok = Vec::new();
        let mut unreadable = Vec::new();
        store
            .iterate(&mut |item| {
                match item {
                    Ok(doc) => ok.push(doc.identity.to_string()),
                    Err(e) => unreadable.push(e),
                }
                Flow::Continue
            })
            .unwrap();
        assert_eq!(ok, vec!["a", "c"]);
        assert_eq!(unreadable.len(), 1);
        assert!(matches!(unreadable[0], StoreError::InvalidFormat { .. }));
    }
}
