//! Storage layer
//!
//! Every storage technology integrates by implementing [`EntityStore`]:
//! point lookup, batched write, and streaming full scan. Backends are
//! independent types picked from configuration by [`open_backend`].
//!
//! ## Backends
//!
//! - [`MemoryStore`]: in-process map, whole-batch atomic
//! - [`SqliteStore`]: one row per entity, whole-batch atomic (SQL transaction)
//! - [`FileStore`]: one JSON file per entity, per-entry atomic only

pub mod changeset;
pub mod error;
pub mod file;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod stream;


use std::fmt;

use tracing::info;

use crate::config::{BackendKind, Config};
use crate::document::{Document, EntityReference};

pub use changeset::{Change, ChangeKind, Changeset, ChangesetBuilder, WriteHandle};
pub use error::{StoreError, StoreResult};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use stream::{CursorGuard, CursorTracker, Flow, IterationSummary};

/// Write guarantee a backend offers for `apply_changes`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Atomicity {
    /// All changes of a changeset become visible together, or none do
    Batch,
    /// Each entry is committed on its own; a fault part-way through a
    /// changeset can leave earlier entries committed
    PerEntry,
}

impl fmt::Display for Atomicity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atomicity::Batch => f.write_str("batch"),
            Atomicity::PerEntry => f.write_str("per-entry"),
        }
    }
}

/// Backend contract for storing entity documents
pub trait EntityStore: Send + Sync {
    /// Short backend name for logs and status output
    fn name(&self) -> &'static str;

    /// Guarantee this backend gives for `apply_changes`
    fn atomicity(&self) -> Atomicity;

    /// Fetch the stored document, `NotFound` if absent
    fn get(&self, reference: &EntityReference) -> StoreResult<Document>;

    /// Apply every change of the changeset
    ///
    /// Inserting an existing reference is a `Conflict`; updating or removing
    /// an absent one is `NotFound`. A conditional rewrite
    /// ([`Change::rewrite`]) whose expected state no longer matches the
    /// stored one is a `Conflict`.
    fn apply_changes(&self, changes: Changeset) -> StoreResult<()>;

    /// Enumerate all stored documents lazily
    ///
    /// An entry whose stored state cannot be parsed reaches the consumer as
    /// `Err(InvalidFormat)` and the pass continues. Other faults end the
    /// pass and are returned.
    fn iterate(
        &self,
        consumer: &mut dyn FnMut(StoreResult<Document>) -> Flow,
    ) -> StoreResult<IterationSummary>;

    fn contains(&self, reference: &EntityReference) -> StoreResult<bool> {
        match self.get(reference) {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Open the backend selected by the configuration
pub fn open_backend(config: &Config) -> StoreResult<Box<dyn EntityStore>> {
    let backend: Box<dyn EntityStore> = match config.backend {
        BackendKind::Memory => Box::new(MemoryStore::new()),
        BackendKind::File => Box::new(FileStore::open(config.entities_dir())?),
        BackendKind::Sqlite => Box::new(SqliteStore::open(&config.sqlite_path(), config.page_size)?),
    };
    info!(
        "Opened {} backend ({} atomicity)",
        backend.name(),
        backend.atomicity()
    );
    Ok(backend)
}
