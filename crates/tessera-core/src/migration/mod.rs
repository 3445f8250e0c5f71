//! Schema migration
//!
//! Documents carry the schema version they were written with. The engine
//! walks a [`MigrationLadder`] of reversible operations to bring them to the
//! version the [`TypeRegistry`](crate::registry::TypeRegistry) declares for
//! their type, or back down for exports to older readers.

pub mod converter;
pub mod engine;
pub mod error;
pub mod ladder;
pub mod operation;
pub mod operations;
pub mod schema_file;

pub use converter::{NumberToString, PropertyConverter, ScalarToList, StringToNumber};
pub use engine::{MigrationEngine, MigrationOutcome, VersionState};
pub use error::{MigrationError, MigrationResult};
pub use ladder::{LadderBuilder, LadderEntry, MigrationLadder};
pub use operation::{AssumePresent, MigrationOperation, StateLookup, TypePredicate};
pub use schema_file::{load_schema, parse_schema, SchemaFileError};
