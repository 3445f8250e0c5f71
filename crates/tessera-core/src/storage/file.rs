//! Directory-of-files backend
//!
//! Each entity is one JSON file in the store directory. Every file is
//! replaced atomically (write to temp file, fsync, rename) so a reader never
//! sees a half-written entity.
//!
//! **Weak atomicity.** A changeset is validated up front (conflicts and
//! missing entities fail before anything is written) but the entries are
//! then committed one at a time. An I/O fault part-way through leaves the
//! entries before it committed. This backend reports
//! [`Atomicity::PerEntry`] and must not be used where whole-batch atomicity
//! is required.
//!
//! Conditional rewrites are checked under the store's write lock, which
//! serializes writers within one process only.

use std::fs::{self, File, ReadDir};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::document::{Document, EntityReference};
use crate::storage::stream::{drive, CursorGuard, CursorTracker};
use crate::storage::{
    Atomicity, ChangeKind, Changeset, EntityStore, Flow, IterationSummary, StoreError,
    StoreResult,
};

const NAME: &str = "file";
const EXTENSION: &str = "json";

/// File-per-entity store
pub struct FileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
    cursors: CursorTracker,
}

impl FileStore {
    /// Open the store directory, creating it if needed
    pub fn open(dir: PathBuf) -> StoreResult<Self> {
        fs::create_dir_all(&dir).map_err(|e| StoreError::from_io(e, dir.clone()))?;
        debug!("Opened file entity store at {:?}", dir);
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
            cursors: CursorTracker::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cursors currently held by enumerations (leak detection)
    pub fn open_cursors(&self) -> usize {
        self.cursors.open_cursors()
    }

    pub fn cursor_tracker(&self) -> &CursorTracker {
        &self.cursors
    }

    /// Path of the file holding an entity
    pub fn entity_path(&self, reference: &EntityReference) -> PathBuf {
        self.dir
            .join(format!("{}.{}", encode_file_name(reference.as_str()), EXTENSION))
    }
}

impl EntityStore for FileStore {
    fn name(&self) -> &'static str {
        NAME
    }

    fn atomicity(&self) -> Atomicity {
        Atomicity::PerEntry
    }

    fn get(&self, reference: &EntityReference) -> StoreResult<Document> {
        let path = self.entity_path(reference);
        match fs::read_to_string(&path) {
            Ok(state) => Document::parse(reference.as_str(), &state),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::not_found(reference))
            }
            Err(e) => Err(StoreError::from_io(e, path)),
        }
    }

    fn apply_changes(&self, changes: Changeset) -> StoreResult<()> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Backend {
            backend: NAME,
            details: "write lock poisoned".to_string(),
        })?;

        // Validate and serialize everything first
        let mut staged = Vec::with_capacity(changes.len());
        for change in &changes {
            let path = self.entity_path(change.reference());
            let exists = path.exists();
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
            if change.expected().is_some() {
                let state = fs::read_to_string(&path)
                    .map_err(|e| StoreError::from_io(e, path.clone()))?;
                let stored = Document::parse(change.reference().as_str(), &state)?;
                change.check_expected(&stored)?;
            }
            let state = match change.document() {
                Some(doc) => Some(doc.to_json()?),
                None => None,
            };
            staged.push((path, state));
        }

        let total = staged.len();
        for (committed, (path, state)) in staged.into_iter().enumerate() {
            let result = match state {
                Some(state) => atomic_write(&path, state.as_bytes()),
                None => fs::remove_file(&path).map_err(|e| StoreError::from_io(e, path.clone())),
            };
            if let Err(e) = result {
                warn!(
                    "File store write failed after {} of {} entries were committed: {}",
                    committed, total, e
                );
                return Err(e);
            }
        }

        debug!("Committed {} changes to file store", total);
        Ok(())
    }

    fn iterate(
        &self,
        consumer: &mut dyn FnMut(StoreResult<Document>) -> Flow,
    ) -> StoreResult<IterationSummary> {
        let entries = fs::read_dir(&self.dir).map_err(|e| StoreError::from_io(e, self.dir.clone()))?;
        let cursor = FileCursor {
            entries,
            dir: self.dir.clone(),
            _guard: self.cursors.acquire(),
        };
        drive(cursor, consumer)
    }
}

struct FileCursor {
    entries: ReadDir,
    dir: PathBuf,
    _guard: CursorGuard,
}

impl Iterator for FileCursor {
    type Item = StoreResult<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.entries.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(StoreError::from_io(e, self.dir.clone()))),
            };
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            return Some(match fs::read_to_string(&path) {
                Ok(state) => Document::parse(&path.display().to_string(), &state),
                // Removed by a concurrent writer since the directory was listed
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => Err(StoreError::from_io(e, path)),
            });
        }
    }
}

/// Turn an opaque identity into a portable file name
///
/// Alphanumerics, `-` and `_` pass through; every other byte becomes `%XX`.
fn encode_file_name(identity: &str) -> String {
    let mut encoded = String::with_capacity(identity.len());
    for byte in identity.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

/// Write data to a file atomically
///
/// 1. Write to a uniquely named temporary file in the same directory
/// 2. Sync the file to disk
/// 3. Rename the temp file to the target path
///
/// The target file is never left in a partially-written state, and an
/// abandoned temp file is never mistaken for an entity.
fn atomic_write(path: &Path, data: &[u8]) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::from_io(e, parent.to_path_buf()))?;
    }

    let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));

    let write = || -> std::io::Result<()> {
        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()
    };
    if let Err(e) = write() {
        let _ = fs::remove_file(&temp_path);
        return Err(StoreError::from_io(e, temp_path));
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(StoreError::AtomicWriteFailed {
            from: temp_path,
            to: path.to_path_buf(),
            source: e,
        });
    }

    Ok(())
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

    #[test]
    fn test_file_names_are_escaped() {
        assert_eq!(encode_file_name("abc-123_x"), "abc-123_x");
        assert_eq!(encode_file_name("a/b.c"), "a%2Fb%2Ec");
        assert_eq!(encode_file_name("../etc"), "%2E%2E%2Fetc");
    }

    #[test]
    fn test_reference_with_slashes_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path().join("entities")).unwrap();

        let mut builder = ChangesetBuilder::new();
        builder.insert(doc("org/7:person/1")).finalize();
        store.apply_changes(builder.build().unwrap()).unwrap();

        let loaded = store.get(&EntityReference::new("org/7:person/1")).unwrap();
        assert_eq!(loaded.property("n"), Some(&json!("org/7:person/1")));
    }

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let nested_path = temp_dir.path().join("a").join("b").join("file.json");

        atomic_write(&nested_path, b"test data").unwrap();

        assert_eq!(fs::read_to_string(&nested_path).unwrap(), "test data");
        let leftovers: Vec<_> = fs::read_dir(nested_path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_enumeration_skips_foreign_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path().to_path_buf()).unwrap();

        let mut builder = ChangesetBuilder::new();
        builder.insert(doc("a")).finalize();
        builder.insert(doc("b")).finalize();
        store.apply_changes(builder.build().unwrap()).unwrap();
        fs::write(temp_dir.path().join("notes.txt"), "not an entity").unwrap();
        fs::write(temp_dir.path().join("a.1234.tmp"), "{").unwrap();

        let summary = store.iterate(&mut |_| Flow::Continue).unwrap();
        assert_eq!(summary.visited, 2);
        assert_eq!(store.open_cursors(), 0);
    }

    #[test]
    fn test_mid_batch_fault_keeps_earlier_entries() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path().to_path_buf()).unwrap();

        let mut builder = ChangesetBuilder::new();
        builder.insert(doc("blocked")).finalize();
        store.apply_changes(builder.build().unwrap()).unwrap();

        // A directory where the entity file should be makes the rename fail
        let blocked = store.entity_path(&EntityReference::new("blocked"));
        fs::remove_file(&blocked).unwrap();
        fs::create_dir(&blocked).unwrap();

        let mut builder = ChangesetBuilder::new();
        builder.insert(doc("first")).finalize();
        builder.update(doc("blocked")).finalize();
        let err = store.apply_changes(builder.build().unwrap()).unwrap_err();

        assert!(err.is_io_failure());
        // Per-entry commit: the entry before the fault stays visible
        assert!(store.get(&EntityReference::new("first")).is_ok());
    }

    #[test]
    fn test_malformed_file_is_reported_and_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path().to_path_buf()).unwrap();

        let mut builder = ChangesetBuilder::new();
        builder.insert(doc("a")).finalize();
        builder.insert(doc("c")).finalize();
        store.apply_changes(builder.build().unwrap()).unwrap();
        let broken = store.entity_path(&EntityReference::new("b"));
        fs::write(&broken, r#"{"identity":"b","type":"Thing"}"#).unwrap();

        let mut seen = Vec::new();
        let mut unreadable = Vec::new();
        let summary = store
            .iterate(&mut |item| {
                match item {
                    Ok(d) => seen.push(d.identity.to_string()),
                    Err(e) => unreadable.push(e),
                }
                Flow::Continue
            })
            .unwrap();

        seen.sort();
        assert_eq!(seen, vec!["a", "c"]);
        assert_eq!(unreadable.len(), 1);
        assert!(unreadable[0].is_unreadable_entry());
        assert_eq!(summary.unreadable, 1);
        assert_eq!(store.open_cursors(), 0);
    }
}
