//! The migration operation contract

use std::collections::BTreeSet;
use std::fmt;

use crate::document::{Document, EntityReference};
use crate::migration::{MigrationError, MigrationResult};
use crate::storage::EntityStore;

/// A reversible transform on one document
///
/// Both directions edit the document in place and report whether anything
/// changed. Running a direction twice must be harmless: the second run
/// reports `false`. Operations keep no state between calls.
pub trait MigrationOperation: Send + Sync {
    fn upgrade(&self, doc: &mut Document, lookup: &dyn StateLookup) -> MigrationResult<bool>;

    fn downgrade(&self, doc: &mut Document, lookup: &dyn StateLookup) -> MigrationResult<bool>;

    /// Human-readable summary for logs
    fn describe(&self) -> String;
}

/// Read-only view of other stored entities
///
/// Migration only asks whether a reference exists; it never writes through
/// this collaborator.
pub trait StateLookup {
    fn exists(&self, reference: &EntityReference) -> MigrationResult<bool>;
}

impl<S: EntityStore + ?Sized> StateLookup for S {
    fn exists(&self, reference: &EntityReference) -> MigrationResult<bool> {
        self.contains(reference)
            .map_err(|e| MigrationError::Lookup(e.to_string()))
    }
}

/// Lookup that treats every reference as present
///
/// For offline tooling that transforms documents without a store at hand.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumePresent;

impl StateLookup for AssumePresent {
    fn exists(&self, _reference: &EntityReference) -> MigrationResult<bool> {
        Ok(true)
    }
}

/// Which entity types a ladder entry applies to
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TypePredicate {
    #[default]
    Any,
    Types(BTreeSet<String>),
}

impl TypePredicate {
    pub fn types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TypePredicate::Types(types.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, entity_type: &str) -> bool {
        match self {
            TypePredicate::Any => true,
            TypePredicate::Types(types) => types.contains(entity_type),
        }
    }
}

impl fmt::Display for TypePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypePredicate::Any => f.write_str("*"),
            TypePredicate::Types(types) => {
                let names: Vec<&str> = types.iter().map(String::as_str).collect();
                f.write_str(&names.join(","))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicate_matching() {
        assert!(TypePredicate::Any.matches("Anything"));

        let people = TypePredicate::types(["Person", "Employee"]);
        assert!(people.matches("Person"));
        assert!(!people.matches("Company"));
        assert_eq!(people.to_string(), "Employee,Person");
    }
}
