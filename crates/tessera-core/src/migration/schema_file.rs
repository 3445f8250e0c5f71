//! Schema file loading
//!
//! Entity types and migration steps can be declared in TOML instead of code:
//!
//! ```toml
//! [[entity_type]]
//! name = "Person"
//! version = "v2"
//! properties = ["fullName", "nickname"]
//! many_associations = ["friends"]
//!
//! [entity_type.defaults]
//! nickname = ""
//!
//! [[migration]]
//! from = "v1"
//! to = "v2"
//! types = ["Person"]
//! op = "rename_property"
//! old = "name"
//! new = "fullName"
//! ```
//!
//! Steps keep their file order; the ladder validation rejects steps that
//! go backwards.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::document::{EntityReference, SchemaVersion};
use crate::migration::converter;
use crate::migration::operations::*;
use crate::migration::{
    LadderEntry, MigrationEngine, MigrationError, MigrationLadder, MigrationOperation,
    TypePredicate,
};
use crate::registry::{EntityTypeDescriptor, TypeRegistry};
use crate::storage::StoreError;

#[derive(Error, Debug)]
pub enum SchemaFileError {
    #[error("Failed to read schema file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse schema file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Migration step {index} ({op}): {details}")]
    InvalidStep {
        index: usize,
        op: String,
        details: String,
    },

    #[error(transparent)]
    Ladder(#[from] MigrationError),

    #[error(transparent)]
    Registry(#[from] StoreError),
}

#[derive(Debug, Deserialize)]
struct SchemaFile {
    #[serde(default)]
    entity_type: Vec<EntityTypeDescriptor>,
    #[serde(default)]
    migration: Vec<StepDef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StepDef {
    from: SchemaVersion,
    to: SchemaVersion,
    /// Empty means every type
    #[serde(default)]
    types: Vec<String>,
    op: String,
    name: Option<String>,
    old: Option<String>,
    new: Option<String>,
    default: Option<Value>,
    converter: Option<String>,
}

/// Read and parse a schema file into an engine
pub fn load_schema(path: &Path) -> Result<MigrationEngine, SchemaFileError> {
    let content = std::fs::read_to_string(path).map_err(|source| SchemaFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_schema(&content)
}

/// Parse schema TOML into an engine
pub fn parse_schema(content: &str) -> Result<MigrationEngine, SchemaFileError> {
    let file: SchemaFile = toml::from_str(content)?;
    let registry = TypeRegistry::new(file.entity_type)?;

    let entries = file
        .migration
        .into_iter()
        .enumerate()
        .map(|(index, step)| step.into_entry(index))
        .collect::<Result<Vec<_>, _>>()?;
    let ladder = MigrationLadder::new(entries)?;

    Ok(MigrationEngine::new(ladder, registry))
}

impl StepDef {
    fn into_entry(self, index: usize) -> Result<LadderEntry, SchemaFileError> {
        let operation = self.operation(index)?;
        let predicate = if self.op == "rename_entity" || self.types.is_empty() {
            TypePredicate::Any
        } else {
            TypePredicate::types(self.types)
        };
        Ok(LadderEntry::new(self.from, self.to, operation, predicate))
    }

    fn operation(&self, index: usize) -> Result<Arc<dyn MigrationOperation>, SchemaFileError> {
        let op: Arc<dyn MigrationOperation> = match self.op.as_str() {
            "add_property" => Arc::new(AddProperty::new(
                self.require(index, "name", &self.name)?,
                self.default.clone().unwrap_or(Value::Null),
            )),
            "remove_property" => Arc::new(RemoveProperty::new(
                self.require(index, "name", &self.name)?,
                self.default.clone().unwrap_or(Value::Null),
            )),
            "rename_property" => Arc::new(RenameProperty::new(
                self.require(index, "old", &self.old)?,
                self.require(index, "new", &self.new)?,
            )),
            "change_property_type" => {
                let name = self.require(index, "converter", &self.converter)?;
                let converter = converter::builtin(&name)
                    .ok_or_else(|| self.invalid(index, format!("unknown converter '{name}'")))?;
                Arc::new(ChangePropertyType::with_converter(
                    self.require(index, "name", &self.name)?,
                    Arc::from(converter),
                ))
            }
            "add_association" => Arc::new(AddAssociation::new(
                self.require(index, "name", &self.name)?,
                self.single_default(index)?,
            )),
            "remove_association" => Arc::new(RemoveAssociation::new(
                self.require(index, "name", &self.name)?,
                self.single_default(index)?,
            )),
            "rename_association" => Arc::new(RenameAssociation::new(
                self.require(index, "old", &self.old)?,
                self.require(index, "new", &self.new)?,
            )),
            "add_many_association" => Arc::new(AddManyAssociation::new(
                self.require(index, "name", &self.name)?,
                self.list_default(index)?,
            )),
            "remove_many_association" => Arc::new(RemoveManyAssociation::new(
                self.require(index, "name", &self.name)?,
                self.list_default(index)?,
            )),
            "rename_many_association" => Arc::new(RenameManyAssociation::new(
                self.require(index, "old", &self.old)?,
                self.require(index, "new", &self.new)?,
            )),
            "rename_entity" => Arc::new(ChangeEntityType::new(
                self.require(index, "old", &self.old)?,
                self.require(index, "new", &self.new)?,
            )),
            other => return Err(self.invalid(index, format!("unknown operation '{other}'"))),
        };
        Ok(op)
    }

    fn require(
        &self,
        index: usize,
        field: &str,
        value: &Option<String>,
    ) -> Result<String, SchemaFileError> {
        value
            .clone()
            .ok_or_else(|| self.invalid(index, format!("missing '{field}'")))
    }

    fn single_default(&self, index: usize) -> Result<Option<EntityReference>, SchemaFileError> {
        match &self.default {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(id)) => self.reference(index, id).map(Some),
            Some(_) => Err(self.invalid(index, "default must be an entity reference".to_string())),
        }
    }

    fn list_default(&self, index: usize) -> Result<Vec<EntityReference>, SchemaFileError> {
        match &self.default {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(id) => self.reference(index, id),
                    _ => Err(self.invalid(index, "default must list entity references".to_string())),
                })
                .collect(),
            Some(_) => Err(self.invalid(index, "default must be a list".to_string())),
        }
    }

    fn reference(&self, index: usize, id: &str) -> Result<EntityReference, SchemaFileError> {
        EntityReference::parse(id).map_err(|details| self.invalid(index, details))
    }

    fn invalid(&self, index: usize, details: String) -> SchemaFileError {
        SchemaFileError::InvalidStep {
            index,
            op: self.op.clone(),
            details,
        }
    }
}
