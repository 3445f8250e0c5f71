//! Entity type registry
//!
//! A static table from entity type name to its declared fields and current
//! schema version. It is built once at startup, either in code or from the
//! schema file, and never changes afterwards.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{Document, EntityReference, SchemaVersion};
use crate::storage::{StoreError, StoreResult};

/// Declared shape of one entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTypeDescriptor {
    pub name: String,
    pub version: SchemaVersion,
    #[serde(default)]
    pub properties: Vec<String>,
    #[serde(default)]
    pub associations: Vec<String>,
    #[serde(default)]
    pub many_associations: Vec<String>,
    /// Initial values for properties; undeclared defaults are null
    #[serde(default)]
    pub defaults: BTreeMap<String, Value>,
}

impl EntityTypeDescriptor {
    pub fn new(name: impl Into<String>, version: impl Into<SchemaVersion>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            properties: Vec::new(),
            associations: Vec::new(),
            many_associations: Vec::new(),
            defaults: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>) -> Self {
        self.properties.push(name.into());
        self
    }

    pub fn with_default(mut self, name: impl Into<String>, value: Value) -> Self {
        let name = name.into();
        if !self.properties.contains(&name) {
            self.properties.push(name.clone());
        }
        self.defaults.insert(name, value);
        self
    }

    pub fn with_association(mut self, name: impl Into<String>) -> Self {
        self.associations.push(name.into());
        self
    }

    pub fn with_many_association(mut self, name: impl Into<String>) -> Self {
        self.many_associations.push(name.into());
        self
    }
}

/// Immutable lookup table of entity types
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: BTreeMap<String, EntityTypeDescriptor>,
}

impl TypeRegistry {
    /// Build a registry, rejecting duplicate type names
    pub fn new(descriptors: impl IntoIterator<Item = EntityTypeDescriptor>) -> StoreResult<Self> {
        let mut types = BTreeMap::new();
        for descriptor in descriptors {
            if types.contains_key(&descriptor.name) {
                return Err(StoreError::InvalidFormat {
                    source_name: "type registry".to_string(),
                    details: format!("entity type '{}' registered twice", descriptor.name),
                });
            }
            types.insert(descriptor.name.clone(), descriptor);
        }
        Ok(Self { types })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, entity_type: &str) -> Option<&EntityTypeDescriptor> {
        self.types.get(entity_type)
    }

    pub fn contains(&self, entity_type: &str) -> bool {
        self.types.contains_key(entity_type)
    }

    pub fn current_version(&self, entity_type: &str) -> Option<&SchemaVersion> {
        self.types.get(entity_type).map(|d| &d.version)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityTypeDescriptor> {
        self.types.values()
    }

    /// Create a fresh document for a registered type
    ///
    /// Declared properties start at their default (or null), associations
    /// start empty.
    pub fn new_document(
        &self,
        entity_type: &str,
        reference: EntityReference,
    ) -> StoreResult<Document> {
        let descriptor = self
            .types
            .get(entity_type)
            .ok_or_else(|| StoreError::UnknownType {
                entity_type: entity_type.to_string(),
            })?;

        let mut doc = Document::new(reference, entity_type, descriptor.version.clone());
        for name in &descriptor.properties {
            let value = descriptor.defaults.get(name).cloned().unwrap_or(Value::Null);
            doc.set_property(name.clone(), value);
        }
        for name in &descriptor.associations {
            doc.set_association(name.clone(), None);
        }
        for name in &descriptor.many_associations {
            doc.set_many_association(name.clone(), Vec::new());
        }
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn person() -> EntityTypeDescriptor {
        EntityTypeDescriptor::new("Person", "v3")
            .with_property("name")
            .with_default("age", json!(0))
            .with_association("employer")
            .with_many_association("friends")
    }

    #[test]
    fn test_new_document_initializes_declared_fields() {
        let registry = TypeRegistry::new([person()]).unwrap();
        let doc = registry
            .new_document("Person", EntityReference::new("p-1"))
            .unwrap();

        assert_eq!(doc.schema_version, SchemaVersion::new("v3"));
        assert_eq!(doc.entity_type, "Person");
        assert_eq!(doc.property("name"), Some(&Value::Null));
        assert_eq!(doc.property("age"), Some(&json!(0)));
        assert_eq!(doc.association("employer"), Some(None));
        assert_eq!(doc.many_association("friends"), Some(&[][..]));
    }

    #[test]
    fn test_unknown_type() {
        let registry = TypeRegistry::new([person()]).unwrap();
        let err = registry
            .new_document("Company", EntityReference::new("c-1"))
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownType { .. }));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        assert!(TypeRegistry::new([person(), person()]).is_err());
    }

    #[test]
    fn test_current_version_lookup() {
        let registry = TypeRegistry::new([person()]).unwrap();
        assert_eq!(
            registry.current_version("Person"),
            Some(&SchemaVersion::new("v3"))
        );
        assert_eq!(registry.current_version("Nope"), None);
        assert_eq!(registry.len(), 1);
    }
}
