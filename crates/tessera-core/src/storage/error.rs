//! Storage error handling
//!
//! Provides typed errors for entity store operations with descriptive
//! messages and recovery suggestions. Every backend reports faults through
//! this one taxonomy so callers never match on vendor errors.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::document::{EntityReference, SchemaVersion};
use crate::migration::MigrationError;

/// Errors that can occur during entity store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Reference absent on lookup, update or removal
    #[error("Entity not found: '{reference}'")]
    NotFound { reference: EntityReference },

    /// Concurrent-write contention detected by the backend
    #[error("Conflicting write for entity '{reference}': {details}")]
    Conflict {
        reference: EntityReference,
        details: String,
    },

    /// Migration could not resolve the shape it expected
    #[error("Entity '{reference}' is corrupt: {details}")]
    CorruptDocument {
        reference: EntityReference,
        details: String,
    },

    /// Stored version is newer than anything this engine knows about
    #[error("Entity '{reference}' has schema version {found}, newer than supported {supported}")]
    VersionSkew {
        reference: EntityReference,
        found: SchemaVersion,
        supported: SchemaVersion,
    },

    /// A changeset touched the same entity more than once
    #[error("Entity '{reference}' appears more than once in a changeset")]
    DuplicateChange { reference: EntityReference },

    /// Entity type is not in the type registry
    #[error("Unknown entity type '{entity_type}'")]
    UnknownType { entity_type: String },

    /// Stored state could not be parsed as a document
    #[error("Invalid document format for '{source_name}': {details}")]
    InvalidFormat { source_name: String, details: String },

    /// Permission denied accessing path
    #[error("Permission denied: cannot access '{path}'. Check file permissions.")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Disk is full or quota exceeded
    #[error(
        "Disk full or quota exceeded while writing to '{path}'. Free up disk space and try again."
    )]
    DiskFull {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Transport or storage fault with path context
    #[error("I/O failure on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Atomic write failed during rename
    #[error("Atomic write failed: could not rename '{from}' to '{to}': {source}")]
    AtomicWriteFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    /// SQLite database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Backend refused the operation for a reason of its own
    #[error("Backend '{backend}' failure: {details}")]
    Backend {
        backend: &'static str,
        details: String,
    },
}

impl StoreError {
    /// Create an error from an I/O error with path context
    ///
    /// Classifies the error based on its kind (permission, disk full, etc.)
    pub fn from_io(error: io::Error, path: PathBuf) -> Self {
        match error.kind() {
            io::ErrorKind::PermissionDenied => StoreError::PermissionDenied {
                path,
                source: error,
            },
            _ if is_disk_full_error(&error) => StoreError::DiskFull {
                path,
                source: error,
            },
            _ => StoreError::Io {
                path,
                source: error,
            },
        }
    }

    /// Wrap a migration failure for the entity it happened on
    pub fn from_migration(reference: &EntityReference, error: MigrationError) -> Self {
        match error {
            MigrationError::VersionSkew { found, supported } => StoreError::VersionSkew {
                reference: reference.clone(),
                found,
                supported,
            },
            MigrationError::Lookup(details) => StoreError::Backend {
                backend: "state lookup",
                details,
            },
            other => StoreError::CorruptDocument {
                reference: reference.clone(),
                details: other.to_string(),
            },
        }
    }

    pub fn not_found(reference: &EntityReference) -> Self {
        StoreError::NotFound {
            reference: reference.clone(),
        }
    }

    /// True for adapter-level faults (transport, storage, database)
    pub fn is_io_failure(&self) -> bool {
        matches!(
            self,
            StoreError::Io { .. }
                | StoreError::PermissionDenied { .. }
                | StoreError::DiskFull { .. }
                | StoreError::AtomicWriteFailed { .. }
                | StoreError::Database(_)
                | StoreError::Backend { .. }
        )
    }

    /// True when the fault belongs to a single document and enumeration
    /// over other documents can continue
    pub fn is_document_fault(&self) -> bool {
        matches!(
            self,
            StoreError::CorruptDocument { .. }
                | StoreError::VersionSkew { .. }
                | StoreError::InvalidFormat { .. }
        )
    }

    /// True when a stored entry could not be parsed
    ///
    /// Enumeration hands these to the consumer and moves on to the next
    /// entry instead of ending the pass.
    pub fn is_unreadable_entry(&self) -> bool {
        matches!(self, StoreError::InvalidFormat { .. })
    }

    /// Entity or source the error is about, if it names one
    pub fn subject(&self) -> Option<String> {
        match self {
            StoreError::NotFound { reference }
            | StoreError::Conflict { reference, .. }
            | StoreError::CorruptDocument { reference, .. }
            | StoreError::VersionSkew { reference, .. }
            | StoreError::DuplicateChange { reference } => Some(reference.to_string()),
            StoreError::InvalidFormat { source_name, .. } => Some(source_name.clone()),
            _ => None,
        }
    }

    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StoreError::DiskFull { .. }
                | StoreError::PermissionDenied { .. }
                | StoreError::Conflict { .. }
        )
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            StoreError::DiskFull { .. } => Some("Free up disk space and try again."),
            StoreError::PermissionDenied { .. } => {
                Some("Check file and directory permissions. You may need to run with different permissions or change ownership.")
            }
            StoreError::Conflict { .. } => {
                Some("Another writer changed the same entity. Reload it and retry the transaction.")
            }
            StoreError::VersionSkew { .. } => {
                Some("The data was written by a newer release. Upgrade this tool or export with the newer release first.")
            }
            StoreError::CorruptDocument { .. } => {
                Some("Inspect the entity with `tessera get` and repair it, or remove it from the store.")
            }
            StoreError::InvalidFormat { .. } => {
                Some("The stored entry is not a valid document. Repair or remove it; other entities are unaffected.")
            }
            _ => None,
        }
    }
}

/// Check if an I/O error indicates disk full condition
fn is_disk_full_error(error: &io::Error) -> bool {
    let msg = error.to_string().to_lowercase();
    msg.contains("no space left")
        || msg.contains("disk full")
        || msg.contains("quota exceeded")
        || msg.contains("not enough space")
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_classification() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err = StoreError::from_io(io_err, PathBuf::from("/test/path"));

        assert!(matches!(err, StoreError::PermissionDenied { .. }));
        assert!(err.is_recoverable());
        assert!(err.is_io_failure());
        assert!(err.recovery_suggestion().is_some());
    }

    #[test]
    fn test_disk_full_detection() {
        let io_err = io::Error::new(io::ErrorKind::Other, "No space left on device");
        let err = StoreError::from_io(io_err, PathBuf::from("/full/disk"));

        assert!(matches!(err, StoreError::DiskFull { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_other_io_is_plain_failure() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed");
        let err = StoreError::from_io(io_err, PathBuf::from("/some/file"));

        assert!(matches!(err, StoreError::Io { .. }));
        assert!(!err.is_recoverable());
        assert!(!err.is_document_fault());
    }

    #[test]
    fn test_migration_skew_keeps_versions() {
        let reference = EntityReference::new("person-1");
        let err = StoreError::from_migration(
            &reference,
            MigrationError::VersionSkew {
                found: SchemaVersion::new("v9"),
                supported: SchemaVersion::new("v4"),
            },
        );

        match err {
            StoreError::VersionSkew {
                found, supported, ..
            } => {
                assert_eq!(found.as_str(), "v9");
                assert_eq!(supported.as_str(), "v4");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_migration_fault_becomes_corrupt_document() {
        let reference = EntityReference::new("person-1");
        let err = StoreError::from_migration(
            &reference,
            MigrationError::Ambiguous {
                field: "name".to_string(),
                details: "both present".to_string(),
            },
        );

        assert!(matches!(err, StoreError::CorruptDocument { .. }));
        assert!(err.is_document_fault());
        assert!(err.to_string().contains("person-1"));
    }

    #[test]
    fn test_unreadable_entry_names_its_source() {
        let err = StoreError::InvalidFormat {
            source_name: "person-7".to_string(),
            details: "missing field `schemaVersion`".to_string(),
        };

        assert!(err.is_unreadable_entry());
        assert!(err.is_document_fault());
        assert_eq!(err.subject().as_deref(), Some("person-7"));

        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed");
        let fault = StoreError::from_io(io_err, PathBuf::from("/some/file"));
        assert!(!fault.is_unreadable_entry());
        assert_eq!(fault.subject(), None);
    }
}
