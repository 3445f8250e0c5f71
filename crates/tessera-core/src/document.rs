//! Persisted entity documents
//!
//! A `Document` is the backend-neutral serialized state of one entity. Every
//! backend stores exactly this JSON shape:
//!
//! ```text
//! {
//!   "identity": "person-1",
//!   "schemaVersion": "v2",
//!   "type": "Person",
//!   "properties": { "name": "Ada" },
//!   "associations": { "employer": "org-7" },
//!   "manyAssociations": { "friends": ["person-2", "person-3"] }
//! }
//! ```
//!
//! Unknown top-level fields survive a read/write cycle untouched.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::storage::{StoreError, StoreResult};

/// Opaque, globally unique identity of one entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityReference(String);

impl EntityReference {
    /// Wrap an identity known to be valid, such as a literal
    ///
    /// # Panics
    ///
    /// Panics if the identity is empty. Identities read from the command
    /// line, files or other outside input go through [`parse`](Self::parse).
    pub fn new(identity: impl Into<String>) -> Self {
        let identity = identity.into();
        assert!(!identity.is_empty(), "entity identity must not be empty");
        Self(identity)
    }

    /// Create a fresh random reference
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse an identity, rejecting blank strings
    pub fn parse(identity: &str) -> Result<Self, String> {
        let trimmed = identity.trim();
        if trimmed.is_empty() {
            return Err("entity identity must not be empty".to_string());
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EntityReference {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err("entity identity must not be empty".to_string());
        }
        Ok(Self(value))
    }
}

impl From<EntityReference> for String {
    fn from(reference: EntityReference) -> Self {
        reference.0
    }
}

/// Same contract as [`EntityReference::new`]: panics on an empty identity
impl From<&str> for EntityReference {
    fn from(identity: &str) -> Self {
        Self::new(identity)
    }
}

impl fmt::Display for EntityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Schema version token stamped on every document
///
/// Tokens such as `"v3"`, `"3"` or `"1.10.2"` are ordered by their numeric
/// segments, so `"1.10"` sorts after `"1.9"`. Ties fall back to plain string
/// order, which keeps `Ord` consistent with `Eq`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawVersion", into = "String")]
pub struct SchemaVersion(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawVersion {
    Text(String),
    Number(u64),
}

impl SchemaVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn segments(&self) -> Vec<u64> {
        self.0
            .split(|c: char| !c.is_ascii_digit())
            .filter(|part| !part.is_empty())
            .map(|part| part.parse::<u64>().unwrap_or(u64::MAX))
            .collect()
    }
}

impl TryFrom<RawVersion> for SchemaVersion {
    type Error = String;

    fn try_from(raw: RawVersion) -> Result<Self, Self::Error> {
        match raw {
            RawVersion::Text(text) if text.trim().is_empty() => {
                Err("schema version must not be empty".to_string())
            }
            RawVersion::Text(text) => Ok(Self(text)),
            RawVersion::Number(n) => Ok(Self(n.to_string())),
        }
    }
}

impl From<SchemaVersion> for String {
    fn from(version: SchemaVersion) -> Self {
        version.0
    }
}

impl From<&str> for SchemaVersion {
    fn from(version: &str) -> Self {
        Self::new(version)
    }
}

impl Ord for SchemaVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.segments()
            .cmp(&other.segments())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for SchemaVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serialized state of one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub identity: EntityReference,
    pub schema_version: SchemaVersion,
    /// Entity type name, matched by migration type predicates
    #[serde(rename = "type", default)]
    pub entity_type: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    #[serde(default)]
    pub associations: BTreeMap<String, Option<EntityReference>>,
    #[serde(default)]
    pub many_associations: BTreeMap<String, Vec<EntityReference>>,
    /// Top-level fields this release does not know about
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Document {
    /// Create an empty document
    pub fn new(
        identity: EntityReference,
        entity_type: impl Into<String>,
        schema_version: SchemaVersion,
    ) -> Self {
        Self {
            identity,
            schema_version,
            entity_type: entity_type.into(),
            properties: BTreeMap::new(),
            associations: BTreeMap::new(),
            many_associations: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Parse a stored document, naming the source in errors
    pub fn parse(source_name: &str, json: &str) -> StoreResult<Self> {
        serde_json::from_str(json).map_err(|e| StoreError::InvalidFormat {
            source_name: source_name.to_string(),
            details: e.to_string(),
        })
    }

    pub fn from_json(json: &str) -> StoreResult<Self> {
        Self::parse("document", json)
    }

    pub fn to_json(&self) -> StoreResult<String> {
        serde_json::to_string(self).map_err(|e| StoreError::InvalidFormat {
            source_name: self.identity.to_string(),
            details: e.to_string(),
        })
    }

    pub fn to_json_pretty(&self) -> StoreResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| StoreError::InvalidFormat {
            source_name: self.identity.to_string(),
            details: e.to_string(),
        })
    }

    // ==================== Properties ====================

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// Set a property, returning the previous value
    pub fn set_property(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.properties.insert(name.into(), value)
    }

    pub fn remove_property(&mut self, name: &str) -> Option<Value> {
        self.properties.remove(name)
    }

    // ==================== Associations ====================

    /// Look up an association slot
    ///
    /// `None` means the association is not declared on this document;
    /// `Some(None)` means it is declared but empty.
    pub fn association(&self, name: &str) -> Option<Option<&EntityReference>> {
        self.associations.get(name).map(|slot| slot.as_ref())
    }

    pub fn has_association(&self, name: &str) -> bool {
        self.associations.contains_key(name)
    }

    pub fn set_association(
        &mut self,
        name: impl Into<String>,
        reference: Option<EntityReference>,
    ) -> Option<Option<EntityReference>> {
        self.associations.insert(name.into(), reference)
    }

    pub fn remove_association(&mut self, name: &str) -> Option<Option<EntityReference>> {
        self.associations.remove(name)
    }

    // ==================== Many-associations ====================

    pub fn many_association(&self, name: &str) -> Option<&[EntityReference]> {
        self.many_associations.get(name).map(Vec::as_slice)
    }

    pub fn has_many_association(&self, name: &str) -> bool {
        self.many_associations.contains_key(name)
    }

    pub fn set_many_association(
        &mut self,
        name: impl Into<String>,
        references: Vec<EntityReference>,
    ) -> Option<Vec<EntityReference>> {
        self.many_associations.insert(name.into(), references)
    }

    /// Insert a reference at `index`, appending when the index is past the end
    ///
    /// Returns false if the reference is already present; a many-association
    /// never holds the same reference twice.
    pub fn insert_many_association(
        &mut self,
        name: &str,
        index: usize,
        reference: EntityReference,
    ) -> bool {
        let references = self.many_associations.entry(name.to_string()).or_default();
        if references.contains(&reference) {
            return false;
        }
        let index = index.min(references.len());
        references.insert(index, reference);
        true
    }

    /// Remove one reference from a many-association
    pub fn remove_from_many_association(&mut self, name: &str, reference: &EntityReference) -> bool {
        match self.many_associations.get_mut(name) {
            Some(references) => {
                let before = references.len();
                references.retain(|r| r != reference);
                references.len() != before
            }
            None => false,
        }
    }

    pub fn remove_many_association(&mut self, name: &str) -> Option<Vec<EntityReference>> {
        self.many_associations.remove(name)
    }

    /// Names of every field this document carries
    ///
    /// Used to compare documents structurally across a migration round-trip.
    pub fn field_set(&self) -> BTreeSet<String> {
        let mut fields = BTreeSet::new();
        fields.insert(format!("type:{}", self.entity_type));
        fields.extend(self.properties.keys().map(|k| format!("properties.{k}")));
        fields.extend(self.associations.keys().map(|k| format!("associations.{k}")));
        fields.extend(
            self.many_associations
                .keys()
                .map(|k| format!("manyAssociations.{k}")),
        );
        fields.extend(self.extra.keys().cloned());
        fields
    }

    /// Every reference this document points at
    pub fn outgoing_references(&self) -> impl Iterator<Item = &EntityReference> {
        self.associations
            .values()
            .flatten()
            .chain(self.many_associations.values().flatten())
    }
}
