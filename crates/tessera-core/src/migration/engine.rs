//! Migration engine
//!
//! Brings documents from their stamped schema version to the current one
//! (and back, for operator-driven exports and rollbacks). The engine works
//! on a copy: a failing step leaves the caller's document exactly as it was.

use std::cmp::Ordering;

use tracing::debug;

use crate::document::{Document, SchemaVersion};
use crate::migration::{MigrationError, MigrationLadder, MigrationResult, StateLookup};
use crate::registry::TypeRegistry;

/// Where a document stands relative to its target version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionState {
    AtTargetVersion,
    BehindVersion,
    AheadVersion,
}

/// Result of migrating one document
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationOutcome {
    pub document: Document,
    pub from: SchemaVersion,
    pub to: SchemaVersion,
    /// Ladder entries whose predicate matched and which were run
    pub steps_applied: usize,
    /// True when the document differs from the input in any way
    pub changed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MigrationEngine {
    ladder: MigrationLadder,
    registry: TypeRegistry,
}

impl MigrationEngine {
    pub fn new(ladder: MigrationLadder, registry: TypeRegistry) -> Self {
        Self { ladder, registry }
    }

    pub fn ladder(&self) -> &MigrationLadder {
        &self.ladder
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Version documents of this type should end up at
    ///
    /// The registry's version wins for registered types; anything else
    /// targets the ladder's highest version.
    pub fn target_version(&self, entity_type: &str) -> Option<&SchemaVersion> {
        self.registry
            .current_version(entity_type)
            .or_else(|| self.ladder.max_version())
    }

    pub fn classify(&self, doc: &Document) -> VersionState {
        match self.target_version(&doc.entity_type) {
            None => VersionState::AtTargetVersion,
            Some(target) => match doc.schema_version.cmp(target) {
                Ordering::Equal => VersionState::AtTargetVersion,
                Ordering::Less => VersionState::BehindVersion,
                Ordering::Greater => VersionState::AheadVersion,
            },
        }
    }

    /// Migrate a document up to its target version
    pub fn upgrade(
        &self,
        doc: &Document,
        lookup: &dyn StateLookup,
    ) -> MigrationResult<MigrationOutcome> {
        let original = doc.schema_version.clone();
        let target = match self.target_version(&doc.entity_type) {
            Some(target) => target.clone(),
            None => return Ok(unchanged(doc)),
        };

        match original.cmp(&target) {
            Ordering::Equal => return Ok(unchanged(doc)),
            Ordering::Greater => {
                return Err(MigrationError::VersionSkew {
                    found: original,
                    supported: target,
                })
            }
            Ordering::Less => {}
        }

        let mut working = doc.clone();
        let mut steps_applied = 0;
        for entry in self.ladder.entries() {
            if entry.from < original || entry.to > target {
                continue;
            }
            if entry.predicate.matches(&working.entity_type) {
                let changed = entry.operation.upgrade(&mut working, lookup)?;
                steps_applied += 1;
                debug!(
                    identity = %working.identity,
                    from = %entry.from,
                    to = %entry.to,
                    operation = %entry.operation.describe(),
                    changed,
                    "Applied upgrade step"
                );
            }
            working.schema_version = entry.to.clone();
        }
        working.schema_version = target.clone();

        Ok(MigrationOutcome {
            changed: &working != doc,
            document: working,
            from: original,
            to: target,
            steps_applied,
        })
    }

    /// Migrate a document down to `to_version`
    ///
    /// Only operator tooling calls this; reads never downgrade.
    pub fn downgrade(
        &self,
        doc: &Document,
        to_version: &SchemaVersion,
        lookup: &dyn StateLookup,
    ) -> MigrationResult<MigrationOutcome> {
        let original = doc.schema_version.clone();
        if let Some(target) = self.target_version(&doc.entity_type) {
            if &original > target {
                return Err(MigrationError::VersionSkew {
                    found: original,
                    supported: target.clone(),
                });
            }
        }
        match original.cmp(to_version) {
            Ordering::Equal => return Ok(unchanged(doc)),
            Ordering::Less => {
                return Err(MigrationError::InvalidTarget {
                    current: original,
                    requested: to_version.clone(),
                })
            }
            Ordering::Greater => {}
        }

        let mut working = doc.clone();
        let mut steps_applied = 0;
        for entry in self.ladder.entries().iter().rev() {
            if entry.to > original || entry.from < *to_version {
                continue;
            }
            if entry.predicate.matches(&working.entity_type) {
                let changed = entry.operation.downgrade(&mut working, lookup)?;
                steps_applied += 1;
                debug!(
                    identity = %working.identity,
                    from = %entry.to,
                    to = %entry.from,
                    operation = %entry.operation.describe(),
                    changed,
                    "Applied downgrade step"
                );
            }
            working.schema_version = entry.from.clone();
        }
        working.schema_version = to_version.clone();

        Ok(MigrationOutcome {
            changed: &working != doc,
            document: working,
            from: original,
            to: to_version.clone(),
            steps_applied,
        })
    }
}

fn unchanged(doc: &Document) -> MigrationOutcome {
    MigrationOutcome {
        document: doc.clone(),
        from: doc.schema_version.clone(),
        to: doc.schema_version.clone(),
        steps_applied: 0,
        changed: false,
    }
}
