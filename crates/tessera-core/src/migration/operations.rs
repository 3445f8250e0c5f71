//! Operation catalogue
//!
//! Every operation is paired with its inverse: the downgrade of one is the
//! upgrade of the other. Operations that drop data carry the value to
//! restore on downgrade.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::document::{Document, EntityReference};
use crate::migration::converter::PropertyConverter;
use crate::migration::{MigrationError, MigrationOperation, MigrationResult, StateLookup};

/// Add a property with a default value
#[derive(Debug, Clone, PartialEq)]
pub struct AddProperty {
    pub name: String,
    pub default: Value,
}

impl AddProperty {
    pub fn new(name: impl Into<String>, default: Value) -> Self {
        Self {
            name: name.into(),
            default,
        }
    }
}

impl MigrationOperation for AddProperty {
    fn upgrade(&self, doc: &mut Document, _lookup: &dyn StateLookup) -> MigrationResult<bool> {
        Ok(add_value(&mut doc.properties, &self.name, self.default.clone()))
    }

    fn downgrade(&self, doc: &mut Document, _lookup: &dyn StateLookup) -> MigrationResult<bool> {
        Ok(doc.remove_property(&self.name).is_some())
    }

    fn describe(&self) -> String {
        format!("Add property {}, default: {}", self.name, self.default)
    }
}

/// Remove a property; the default is restored on downgrade
#[derive(Debug, Clone, PartialEq)]
pub struct RemoveProperty {
    pub name: String,
    pub default: Value,
}

impl RemoveProperty {
    pub fn new(name: impl Into<String>, default: Value) -> Self {
        Self {
            name: name.into(),
            default,
        }
    }
}

impl MigrationOperation for RemoveProperty {
    fn upgrade(&self, doc: &mut Document, _lookup: &dyn StateLookup) -> MigrationResult<bool> {
        Ok(doc.remove_property(&self.name).is_some())
    }

    fn downgrade(&self, doc: &mut Document, _lookup: &dyn StateLookup) -> MigrationResult<bool> {
        Ok(add_value(&mut doc.properties, &self.name, self.default.clone()))
    }

    fn describe(&self) -> String {
        format!("Remove property {}", self.name)
    }
}

/// Rename a property
#[derive(Debug, Clone, PartialEq)]
pub struct RenameProperty {
    pub from: String,
    pub to: String,
}

impl RenameProperty {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl MigrationOperation for RenameProperty {
    fn upgrade(&self, doc: &mut Document, _lookup: &dyn StateLookup) -> MigrationResult<bool> {
        rename_key(&mut doc.properties, &self.from, &self.to, "property")
    }

    fn downgrade(&self, doc: &mut Document, _lookup: &dyn StateLookup) -> MigrationResult<bool> {
        rename_key(&mut doc.properties, &self.to, &self.from, "property")
    }

    fn describe(&self) -> String {
        format!("Rename property {} to {}", self.from, self.to)
    }
}

/// Convert a property value to a new shape
#[derive(Clone)]
pub struct ChangePropertyType {
    pub name: String,
    pub converter: Arc<dyn PropertyConverter>,
}

impl ChangePropertyType {
    pub fn new(name: impl Into<String>, converter: impl PropertyConverter + 'static) -> Self {
        Self {
            name: name.into(),
            converter: Arc::new(converter),
        }
    }

    pub fn with_converter(name: impl Into<String>, converter: Arc<dyn PropertyConverter>) -> Self {
        Self {
            name: name.into(),
            converter,
        }
    }

    fn convert(
        &self,
        doc: &mut Document,
        convert: impl Fn(&Value) -> Result<Value, String>,
        already_done: bool,
    ) -> MigrationResult<bool> {
        let current = match doc.property(&self.name) {
            Some(value) => value,
            None => return Ok(false),
        };
        if already_done {
            return Ok(false);
        }
        let converted = convert(current).map_err(|details| MigrationError::Conversion {
            field: self.name.clone(),
            details,
        })?;
        let changed = &converted != current;
        doc.set_property(self.name.clone(), converted);
        Ok(changed)
    }
}

impl MigrationOperation for ChangePropertyType {
    fn upgrade(&self, doc: &mut Document, _lookup: &dyn StateLookup) -> MigrationResult<bool> {
        let done = doc
            .property(&self.name)
            .map_or(true, |v| self.converter.is_upgraded(v));
        self.convert(doc, |v| self.converter.upgrade(v), done)
    }

    fn downgrade(&self, doc: &mut Document, _lookup: &dyn StateLookup) -> MigrationResult<bool> {
        let done = doc
            .property(&self.name)
            .map_or(true, |v| !self.converter.is_upgraded(v) || v.is_null());
        self.convert(doc, |v| self.converter.downgrade(v), done)
    }

    fn describe(&self) -> String {
        format!(
            "Change type of property {} using {}",
            self.name,
            self.converter.name()
        )
    }
}

/// Add an association with an optional default reference
#[derive(Debug, Clone, PartialEq)]
pub struct AddAssociation {
    pub name: String,
    pub default: Option<EntityReference>,
}

impl AddAssociation {
    pub fn new(name: impl Into<String>, default: Option<EntityReference>) -> Self {
        Self {
            name: name.into(),
            default,
        }
    }
}

impl MigrationOperation for AddAssociation {
    fn upgrade(&self, doc: &mut Document, lookup: &dyn StateLookup) -> MigrationResult<bool> {
        add_association(doc, &self.name, self.default.as_ref(), lookup)
    }

    fn downgrade(&self, doc: &mut Document, _lookup: &dyn StateLookup) -> MigrationResult<bool> {
        Ok(doc.remove_association(&self.name).is_some())
    }

    fn describe(&self) -> String {
        format!(
            "Add association {}, default: {}",
            self.name,
            describe_reference(self.default.as_ref())
        )
    }
}

/// Remove an association; the default is restored on downgrade
#[derive(Debug, Clone, PartialEq)]
pub struct RemoveAssociation {
    pub name: String,
    pub default: Option<EntityReference>,
}

impl RemoveAssociation {
    pub fn new(name: impl Into<String>, default: Option<EntityReference>) -> Self {
        Self {
            name: name.into(),
            default,
        }
    }
}

impl MigrationOperation for RemoveAssociation {
    fn upgrade(&self, doc: &mut Document, _lookup: &dyn StateLookup) -> MigrationResult<bool> {
        Ok(doc.remove_association(&self.name).is_some())
    }

    fn downgrade(&self, doc: &mut Document, lookup: &dyn StateLookup) -> MigrationResult<bool> {
        add_association(doc, &self.name, self.default.as_ref(), lookup)
    }

    fn describe(&self) -> String {
        format!("Remove association {}", self.name)
    }
}

/// Rename an association
#[derive(Debug, Clone, PartialEq)]
pub struct RenameAssociation {
    pub from: String,
    pub to: String,
}

impl RenameAssociation {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl MigrationOperation for RenameAssociation {
    fn upgrade(&self, doc: &mut Document, _lookup: &dyn StateLookup) -> MigrationResult<bool> {
        rename_key(&mut doc.associations, &self.from, &self.to, "association")
    }

    fn downgrade(&self, doc: &mut Document, _lookup: &dyn StateLookup) -> MigrationResult<bool> {
        rename_key(&mut doc.associations, &self.to, &self.from, "association")
    }

    fn describe(&self) -> String {
        format!("Rename association {} to {}", self.from, self.to)
    }
}

/// Add a many-association with default references
#[derive(Debug, Clone, PartialEq)]
pub struct AddManyAssociation {
    pub name: String,
    pub defaults: Vec<EntityReference>,
}

impl AddManyAssociation {
    pub fn new(name: impl Into<String>, defaults: Vec<EntityReference>) -> Self {
        Self {
            name: name.into(),
            defaults,
        }
    }
}

impl MigrationOperation for AddManyAssociation {
    fn upgrade(&self, doc: &mut Document, lookup: &dyn StateLookup) -> MigrationResult<bool> {
        add_many_association(doc, &self.name, &self.defaults, lookup)
    }

    fn downgrade(&self, doc: &mut Document, _lookup: &dyn StateLookup) -> MigrationResult<bool> {
        Ok(doc.remove_many_association(&self.name).is_some())
    }

    fn describe(&self) -> String {
        format!(
            "Add many-association {}, default: {:?}",
            self.name,
            self.defaults.iter().map(EntityReference::as_str).collect::<Vec<_>>()
        )
    }
}

/// Remove a many-association; the defaults are restored on downgrade
#[derive(Debug, Clone, PartialEq)]
pub struct RemoveManyAssociation {
    pub name: String,
    pub defaults: Vec<EntityReference>,
}

impl RemoveManyAssociation {
    pub fn new(name: impl Into<String>, defaults: Vec<EntityReference>) -> Self {
        Self {
            name: name.into(),
            defaults,
        }
    }
}

impl MigrationOperation for RemoveManyAssociation {
    fn upgrade(&self, doc: &mut Document, _lookup: &dyn StateLookup) -> MigrationResult<bool> {
        Ok(doc.remove_many_association(&self.name).is_some())
    }

    fn downgrade(&self, doc: &mut Document, lookup: &dyn StateLookup) -> MigrationResult<bool> {
        add_many_association(doc, &self.name, &self.defaults, lookup)
    }

    fn describe(&self) -> String {
        format!("Remove many-association {}", self.name)
    }
}

/// Rename a many-association
#[derive(Debug, Clone, PartialEq)]
pub struct RenameManyAssociation {
    pub from: String,
    pub to: String,
}

impl RenameManyAssociation {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl MigrationOperation for RenameManyAssociation {
    fn upgrade(&self, doc: &mut Document, _lookup: &dyn StateLookup) -> MigrationResult<bool> {
        rename_key(&mut doc.many_associations, &self.from, &self.to, "many-association")
    }

    fn downgrade(&self, doc: &mut Document, _lookup: &dyn StateLookup) -> MigrationResult<bool> {
        rename_key(&mut doc.many_associations, &self.to, &self.from, "many-association")
    }

    fn describe(&self) -> String {
        format!("Rename many-association {} to {}", self.from, self.to)
    }
}

/// Rename the entity type
///
/// Documents of any other type are left alone.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEntityType {
    pub from: String,
    pub to: String,
}

impl ChangeEntityType {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl MigrationOperation for ChangeEntityType {
    fn upgrade(&self, doc: &mut Document, _lookup: &dyn StateLookup) -> MigrationResult<bool> {
        Ok(swap_type(doc, &self.from, &self.to))
    }

    fn downgrade(&self, doc: &mut Document, _lookup: &dyn StateLookup) -> MigrationResult<bool> {
        Ok(swap_type(doc, &self.to, &self.from))
    }

    fn describe(&self) -> String {
        format!("Rename entity type {} to {}", self.from, self.to)
    }
}

fn swap_type(doc: &mut Document, from: &str, to: &str) -> bool {
    if doc.entity_type == from {
        doc.entity_type = to.to_string();
        true
    } else {
        false
    }
}

fn add_value<T>(map: &mut BTreeMap<String, T>, name: &str, value: T) -> bool {
    if map.contains_key(name) {
        return false;
    }
    map.insert(name.to_string(), value);
    true
}

/// Move `from` to `to`
///
/// Already renamed (or never present) is a no-op; both present is ambiguous.
fn rename_key<T>(
    map: &mut BTreeMap<String, T>,
    from: &str,
    to: &str,
    kind: &str,
) -> MigrationResult<bool> {
    match (map.contains_key(from), map.contains_key(to)) {
        (true, true) => Err(MigrationError::Ambiguous {
            field: from.to_string(),
            details: format!("cannot rename {kind} to '{to}', which already exists"),
        }),
        (true, false) => {
            if let Some(value) = map.remove(from) {
                map.insert(to.to_string(), value);
            }
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn require_exists(
    field: &str,
    reference: &EntityReference,
    lookup: &dyn StateLookup,
) -> MigrationResult<()> {
    if lookup.exists(reference)? {
        Ok(())
    } else {
        Err(MigrationError::MissingReference {
            field: field.to_string(),
            reference: reference.clone(),
        })
    }
}

fn add_association(
    doc: &mut Document,
    name: &str,
    default: Option<&EntityReference>,
    lookup: &dyn StateLookup,
) -> MigrationResult<bool> {
    if doc.has_association(name) {
        return Ok(false);
    }
    if let Some(reference) = default {
        require_exists(name, reference, lookup)?;
    }
    doc.set_association(name, default.cloned());
    Ok(true)
}

fn add_many_association(
    doc: &mut Document,
    name: &str,
    defaults: &[EntityReference],
    lookup: &dyn StateLookup,
) -> MigrationResult<bool> {
    if doc.has_many_association(name) {
        return Ok(false);
    }
    for reference in defaults {
        require_exists(name, reference, lookup)?;
    }
    doc.set_many_association(name, defaults.to_vec());
    Ok(true)
}

fn describe_reference(reference: Option<&EntityReference>) -> &str {
    reference.map_or("none", EntityReference::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::converter::{NumberToString, ScalarToList};
    use crate::migration::AssumePresent;
    use crate::storage::{ChangesetBuilder, EntityStore, MemoryStore};
    use serde_json::json;

    fn refs(ids: &[&str]) -> Vec<EntityReference> {
        ids.iter().map(|id| EntityReference::new(*id)).collect()
    }

    fn person() -> Document {
        let mut doc = Document::new(EntityReference::new("p-1"), "Person", "v1".into());
        doc.set_property("name", json!("Ada"));
        doc.set_property("age", json!(36));
        doc.set_association("employer", Some(EntityReference::new("org-1")));
        doc
    }

    /// upgrade ∘ upgrade == upgrade, and downgrade restores the field set
    fn assert_well_behaved(op: &dyn MigrationOperation, original: &Document) {
        let mut once = original.clone();
        let changed = op.upgrade(&mut once, &AssumePresent).unwrap();

        let mut twice = once.clone();
        assert!(!op.upgrade(&mut twice, &AssumePresent).unwrap());
        assert_eq!(twice, once, "{}", op.describe());

        if !changed {
            assert_eq!(&once, original);
            return;
        }
        let mut back = once.clone();
        op.downgrade(&mut back, &AssumePresent).unwrap();
        assert_eq!(back.field_set(), original.field_set(), "{}", op.describe());
    }

    #[test]
    fn test_catalogue_is_idempotent_and_invertible() {
        let ops: Vec<Box<dyn MigrationOperation>> = vec![
            Box::new(AddProperty::new("nickname", json!(""))),
            Box::new(RemoveProperty::new("age", json!(0))),
            Box::new(RenameProperty::new("name", "fullName")),
            Box::new(ChangePropertyType::new("age", NumberToString)),
            Box::new(AddAssociation::new("manager", None)),
            Box::new(RemoveAssociation::new("employer", None)),
            Box::new(RenameAssociation::new("employer", "company")),
            Box::new(AddManyAssociation::new("friends", refs(&["p-2"]))),
            Box::new(RemoveManyAssociation::new("friends", Vec::new())),
            Box::new(RenameManyAssociation::new("friends", "contacts")),
            Box::new(ChangeEntityType::new("Person", "Human")),
        ];

        let mut with_friends = person();
        with_friends.set_many_association("friends", refs(&["p-3"]));

        for op in &ops {
            assert_well_behaved(op.as_ref(), &person());
            assert_well_behaved(op.as_ref(), &with_friends);
        }
    }

    #[test]
    fn test_add_many_association_concrete_case() {
        let op = AddManyAssociation::new("friends", refs(&["ref-a", "ref-b"]));
        let mut doc = person();

        assert!(op.upgrade(&mut doc, &AssumePresent).unwrap());
        assert_eq!(
            doc.many_association("friends"),
            Some(&refs(&["ref-a", "ref-b"])[..])
        );

        let inverse = RemoveManyAssociation::new("friends", Vec::new());
        assert!(inverse.upgrade(&mut doc, &AssumePresent).unwrap());
        assert!(!doc.has_many_association("friends"));
    }

    #[test]
    fn test_remove_absent_property_reports_no_change() {
        let mut doc = person();
        let op = RemoveProperty::new("shoeSize", json!(0));
        assert!(!op.upgrade(&mut doc, &AssumePresent).unwrap());
        assert_eq!(doc, person());
    }

    #[test]
    fn test_rename_onto_existing_is_ambiguous() {
        let mut doc = person();
        let op = RenameProperty::new("name", "age");

        let err = op.upgrade(&mut doc, &AssumePresent).unwrap_err();
        assert!(matches!(err, MigrationError::Ambiguous { .. }));
    }

    #[test]
    fn test_default_reference_must_exist() {
        let store = MemoryStore::new();
        let mut builder = ChangesetBuilder::new();
        builder
            .insert(Document::new(EntityReference::new("org-1"), "Org", "v1".into()))
            .finalize();
        store.apply_changes(builder.build().unwrap()).unwrap();

        let ok = AddAssociation::new("owner", Some(EntityReference::new("org-1")));
        let mut doc = person();
        assert!(ok.upgrade(&mut doc, &store).unwrap());
        assert_eq!(doc.association("owner"), Some(Some(&EntityReference::new("org-1"))));

        let missing = AddManyAssociation::new("partners", refs(&["org-1", "org-404"]));
        let mut doc = person();
        let err = missing.upgrade(&mut doc, &store).unwrap_err();
        assert_eq!(
            err,
            MigrationError::MissingReference {
                field: "partners".to_string(),
                reference: EntityReference::new("org-404"),
            }
        );
        assert!(!doc.has_many_association("partners"));
    }

    #[test]
    fn test_change_property_type_conversion_failure() {
        let mut doc = person();
        doc.set_property("tags", json!(["a", "b"]));

        let op = ChangePropertyType::new("tags", ScalarToList);
        assert!(!op.upgrade(&mut doc, &AssumePresent).unwrap());

        let err = op.downgrade(&mut doc, &AssumePresent).unwrap_err();
        assert!(matches!(err, MigrationError::Conversion { .. }));
    }

    #[test]
    fn test_change_entity_type_ignores_other_types() {
        let mut doc = person();
        let op = ChangeEntityType::new("Company", "Organisation");
        assert!(!op.upgrade(&mut doc, &AssumePresent).unwrap());
        assert_eq!(doc.entity_type, "Person");
    }
}
