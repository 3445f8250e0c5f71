//! Migration errors

use thiserror::Error;

use crate::document::{EntityReference, SchemaVersion};

/// Why a document could not be migrated
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MigrationError {
    /// Source and target of a rename both exist
    #[error("'{field}' is ambiguous: {details}")]
    Ambiguous { field: String, details: String },

    /// A default reference points at an entity that is not stored
    #[error("'{field}' refers to missing entity '{reference}'")]
    MissingReference {
        field: String,
        reference: EntityReference,
    },

    /// A property converter rejected the stored value
    #[error("Cannot convert property '{field}': {details}")]
    Conversion { field: String, details: String },

    /// Stamped version is newer than anything the ladder knows
    #[error("Schema version {found} is newer than supported {supported}")]
    VersionSkew {
        found: SchemaVersion,
        supported: SchemaVersion,
    },

    /// Downgrade requested to a version above the stamped one
    #[error("Cannot downgrade from {current} to newer version {requested}")]
    InvalidTarget {
        current: SchemaVersion,
        requested: SchemaVersion,
    },

    /// The read-only state lookup failed
    #[error("State lookup failed: {0}")]
    Lookup(String),

    /// The ladder definition itself is inconsistent
    #[error("Invalid migration ladder: {0}")]
    InvalidLadder(String),
}

pub type MigrationResult<T> = Result<T, MigrationError>;
