//! Tessera Core Library
//!
//! This crate stores entity documents in interchangeable backends and
//! migrates them between schema versions as they are read.
//!
//! # Architecture
//!
//! - **Backends**: anything implementing [`EntityStore`] (in-memory, one
//!   JSON file per entity, SQLite)
//! - **Migration engine**: a ladder of reversible operations applied on read
//!
//! # Quick Start
//!
//! ```text
//! let store = Store::open(Config::load()?)?;
//!
//! let mut changes = store.begin();
//! let reference = changes.insert(store.new_entity("Person")?).finalize();
//! store.commit(changes)?;
//!
//! let person = store.get(&reference)?;
//! ```
//!
//! # Modules
//!
//! - `store`: Unified storage interface (main entry point)
//! - `document`: Persisted document shape, references and versions
//! - `registry`: Entity type descriptors
//! - `storage`: Backend contract, backends, changesets, streaming
//! - `migration`: Operations, ladder, engine and schema files
//! - `config`: Application configuration

pub mod config;
pub mod document;
pub mod migration;
pub mod registry;
pub mod storage;
pub mod store;

pub use config::{BackendKind, Config};
pub use document::{Document, EntityReference, SchemaVersion};
pub use migration::{MigrationEngine, MigrationError, MigrationLadder, MigrationOutcome};
pub use registry::{EntityTypeDescriptor, TypeRegistry};
pub use storage::{
    Atomicity, ChangesetBuilder, EntityStore, Flow, IterationSummary, StoreError, StoreResult,
};
pub use store::{ExportReport, MigrationReport, Store, StoreStats};
