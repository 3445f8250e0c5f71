//! Ordered migration steps
//!
//! A ladder is a list of entries, each moving documents from one schema
//! version to the next. Entries sharing the same `from -> to` pair form one
//! step and run in declaration order.
//!
//! ```ignore
//! let ladder = MigrationLadder::builder("v1")
//!     .to_version("v2")
//!     .for_entities(["Person"])
//!     .add_property("nickname", json!(""))
//!     .to_version("v3")
//!     .for_all()
//!     .rename_property("name", "fullName")
//!     .build()?;
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::document::{EntityReference, SchemaVersion};
use crate::migration::converter::PropertyConverter;
use crate::migration::operations::*;
use crate::migration::{MigrationError, MigrationOperation, MigrationResult, TypePredicate};

/// One operation bound to a version step and an entity-type filter
#[derive(Clone)]
pub struct LadderEntry {
    pub from: SchemaVersion,
    pub to: SchemaVersion,
    pub operation: Arc<dyn MigrationOperation>,
    pub predicate: TypePredicate,
}

impl LadderEntry {
    pub fn new(
        from: SchemaVersion,
        to: SchemaVersion,
        operation: Arc<dyn MigrationOperation>,
        predicate: TypePredicate,
    ) -> Self {
        Self {
            from,
            to,
            operation,
            predicate,
        }
    }
}

impl fmt::Debug for LadderEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LadderEntry")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("operation", &self.operation.describe())
            .field("predicate", &self.predicate)
            .finish()
    }
}

/// Validated, ascending sequence of ladder entries
#[derive(Debug, Clone, Default)]
pub struct MigrationLadder {
    entries: Vec<LadderEntry>,
}

impl MigrationLadder {
    /// Validate and wrap a list of entries
    ///
    /// Every entry must move forward (`from < to`) and entries must be in
    /// ascending order: an entry either repeats the previous step or starts
    /// at or after the previous step's `to`.
    pub fn new(entries: Vec<LadderEntry>) -> MigrationResult<Self> {
        for entry in &entries {
            if entry.from >= entry.to {
                return Err(MigrationError::InvalidLadder(format!(
                    "step {} -> {} does not move forward ({})",
                    entry.from,
                    entry.to,
                    entry.operation.describe()
                )));
            }
        }
        for pair in entries.windows(2) {
            let (prev, cur) = (&pair[0], &pair[1]);
            let same_step = prev.from == cur.from && prev.to == cur.to;
            if !same_step && prev.to > cur.from {
                return Err(MigrationError::InvalidLadder(format!(
                    "step {} -> {} overlaps earlier step {} -> {}",
                    cur.from, cur.to, prev.from, prev.to
                )));
            }
        }
        Ok(Self { entries })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builder(start: impl Into<SchemaVersion>) -> LadderBuilder {
        LadderBuilder::new(start)
    }

    pub fn entries(&self) -> &[LadderEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest version any entry migrates to
    pub fn max_version(&self) -> Option<&SchemaVersion> {
        self.entries.iter().map(|e| &e.to).max()
    }

    /// Every version mentioned by the ladder, ascending
    pub fn versions(&self) -> BTreeSet<&SchemaVersion> {
        self.entries
            .iter()
            .flat_map(|e| [&e.from, &e.to])
            .collect()
    }
}

/// Fluent ladder construction
///
/// `to_version` opens a new step starting where the previous one ended;
/// `for_entities` and `for_all` set the type filter for the operations that
/// follow. Operations added before the first `to_version` make `build` fail.
pub struct LadderBuilder {
    current: SchemaVersion,
    step: Option<(SchemaVersion, SchemaVersion)>,
    predicate: TypePredicate,
    entries: Vec<LadderEntry>,
    error: Option<MigrationError>,
}

impl LadderBuilder {
    pub fn new(start: impl Into<SchemaVersion>) -> Self {
        Self {
            current: start.into(),
            step: None,
            predicate: TypePredicate::Any,
            entries: Vec::new(),
            error: None,
        }
    }

    pub fn to_version(mut self, version: impl Into<SchemaVersion>) -> Self {
        let to = version.into();
        let from = std::mem::replace(&mut self.current, to.clone());
        self.step = Some((from, to));
        self.predicate = TypePredicate::Any;
        self
    }

    pub fn for_entities<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.predicate = TypePredicate::types(types);
        self
    }

    pub fn for_all(mut self) -> Self {
        self.predicate = TypePredicate::Any;
        self
    }

    pub fn operation(self, operation: impl MigrationOperation + 'static) -> Self {
        let predicate = self.predicate.clone();
        self.push(Arc::new(operation), predicate)
    }

    pub fn add_property(self, name: impl Into<String>, default: Value) -> Self {
        self.operation(AddProperty::new(name, default))
    }

    pub fn remove_property(self, name: impl Into<String>, default: Value) -> Self {
        self.operation(RemoveProperty::new(name, default))
    }

    pub fn rename_property(self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.operation(RenameProperty::new(from, to))
    }

    pub fn change_property_type(
        self,
        name: impl Into<String>,
        converter: Arc<dyn PropertyConverter>,
    ) -> Self {
        self.operation(ChangePropertyType::with_converter(name, converter))
    }

    pub fn add_association(
        self,
        name: impl Into<String>,
        default: Option<EntityReference>,
    ) -> Self {
        self.operation(AddAssociation::new(name, default))
    }

    pub fn remove_association(
        self,
        name: impl Into<String>,
        default: Option<EntityReference>,
    ) -> Self {
        self.operation(RemoveAssociation::new(name, default))
    }

    pub fn rename_association(self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.operation(RenameAssociation::new(from, to))
    }

    pub fn add_many_association(
        self,
        name: impl Into<String>,
        defaults: Vec<EntityReference>,
    ) -> Self {
        self.operation(AddManyAssociation::new(name, defaults))
    }

    pub fn remove_many_association(
        self,
        name: impl Into<String>,
        defaults: Vec<EntityReference>,
    ) -> Self {
        self.operation(RemoveManyAssociation::new(name, defaults))
    }

    pub fn rename_many_association(self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.operation(RenameManyAssociation::new(from, to))
    }

    /// Rename an entity type
    ///
    /// Always applies to every type; the operation itself checks the name.
    pub fn rename_entity(self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.push(
            Arc::new(ChangeEntityType::new(from, to)),
            TypePredicate::Any,
        )
    }

    fn push(mut self, operation: Arc<dyn MigrationOperation>, predicate: TypePredicate) -> Self {
        match &self.step {
            Some((from, to)) => {
                let entry = LadderEntry::new(from.clone(), to.clone(), operation, predicate);
                self.entries.push(entry);
            }
            None if self.error.is_none() => {
                self.error = Some(MigrationError::InvalidLadder(format!(
                    "'{}' added before any to_version",
                    operation.describe()
                )));
            }
            None => {}
        }
        self
    }

    pub fn build(self) -> MigrationResult<MigrationLadder> {
        if let Some(error) = self.error {
            return Err(error);
        }
        MigrationLadder::new(self.entries)
    }
}
