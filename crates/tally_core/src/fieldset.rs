//! Ordered collections of fields.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::field::{Field, FieldDef, FieldSpec, ValidationContext};
use crate::registry::TypeRegistry;

/// An ordered set of fields with modification and deletion state.
///
/// Rows wrap a field set; it can also be used on its own, for example for
/// search criteria. Calling `set` on a standalone field set runs no row
/// observers.
#[derive(Debug, Clone)]
pub struct FieldSet {
    fields: Vec<Field>,
    index: HashMap<String, usize>,
    modifiable: bool,
    modified: bool,
    deleting: bool,
}

impl FieldSet {
    /// Creates an empty field set.
    #[must_use]
    pub fn new(modifiable: bool) -> Self {
        Self {
            fields: Vec::new(),
            index: HashMap::new(),
            modifiable,
            modified: false,
            deleting: false,
        }
    }

    pub(crate) fn from_defs<'a>(defs: impl IntoIterator<Item = &'a Arc<FieldDef>>) -> Self {
        let mut set = Self::new(true);
        for def in defs {
            set.index.insert(def.id().to_string(), set.fields.len());
            set.fields.push(Field::new(Arc::clone(def)));
        }
        set
    }

    /// Adds a field described by a spec.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateId`] if the id is taken,
    /// [`CoreError::UnknownType`] if the type is not registered and
    /// [`CoreError::InvalidPattern`] if the pattern does not compile.
    pub fn add_field(&mut self, spec: FieldSpec, types: &TypeRegistry) -> CoreResult<&Field> {
        if self.index.contains_key(&spec.id) {
            return Err(CoreError::DuplicateId { id: spec.id });
        }
        let field_type = types.field_type(&spec.type_name)?;
        self.add_def(Arc::new(FieldDef::new(spec, field_type)?))
    }

    /// Adds an already registered field definition.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateId`] if the id is taken.
    pub fn add_def(&mut self, def: Arc<FieldDef>) -> CoreResult<&Field> {
        if self.index.contains_key(def.id()) {
            return Err(CoreError::DuplicateId {
                id: def.id().to_string(),
            });
        }
        let position = self.fields.len();
        self.index.insert(def.id().to_string(), position);
        self.fields.push(Field::new(def));
        Ok(&self.fields[position])
    }

    /// Returns the field, if present.
    #[must_use]
    pub fn field(&self, id: &str) -> Option<&Field> {
        self.index.get(id).map(|&i| &self.fields[i])
    }

    /// Returns the field.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownField`] if absent.
    pub fn get_field(&self, id: &str) -> CoreResult<&Field> {
        self.field(id).ok_or_else(|| self.unknown(id))
    }

    pub(crate) fn get_field_mut(&mut self, id: &str) -> CoreResult<&mut Field> {
        match self.index.get(id) {
            Some(&i) => Ok(&mut self.fields[i]),
            None => Err(self.unknown(id)),
        }
    }

    fn unknown(&self, id: &str) -> CoreError {
        CoreError::UnknownField {
            owner: "fieldset".to_string(),
            field: id.to_string(),
        }
    }

    /// Returns the field at a position.
    #[must_use]
    pub fn field_at(&self, position: usize) -> Option<&Field> {
        self.fields.get(position)
    }

    /// Iterates over the fields in order.
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Returns a field's value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownField`] if absent.
    pub fn get(&self, id: &str) -> CoreResult<&str> {
        self.get_field(id).map(Field::get)
    }

    /// Changes a field's value. Returns true if the value changed.
    ///
    /// # Errors
    ///
    /// Fails as [`FieldSet::prepare_change`] does.
    pub fn set(&mut self, id: &str, value: &str) -> CoreResult<bool> {
        let Some(value) = self.prepare_change(id, value)? else {
            return Ok(false);
        };
        self.commit_change(id, value)?;
        self.touch();
        Ok(true)
    }

    /// Normalizes a new value and checks that it may be stored.
    ///
    /// Returns `None` if the normalized value equals the current one.
    pub(crate) fn prepare_change(&self, id: &str, value: &str) -> CoreResult<Option<String>> {
        let field = self.get_field(id)?;
        let value = field.def().normalize(value);
        if !self.modifiable {
            return Err(CoreError::NotModifiable {
                field: id.to_string(),
            });
        }
        if field.is_fixed_key() {
            return Err(CoreError::FixedKey {
                field: id.to_string(),
            });
        }
        if value == field.get() {
            return Ok(None);
        }
        Ok(Some(value))
    }

    /// Stores a prepared value. Returns the replaced value.
    pub(crate) fn commit_change(&mut self, id: &str, value: String) -> CoreResult<String> {
        Ok(self.get_field_mut(id)?.apply(value))
    }

    /// Puts back a field taken before a refused change.
    pub(crate) fn restore_field(&mut self, field: Field, modified: bool) -> CoreResult<()> {
        let id = field.id().to_string();
        *self.get_field_mut(&id)? = field;
        self.modified = modified;
        Ok(())
    }

    /// Marks the set as modified.
    pub fn touch(&mut self) {
        self.modified = true;
    }

    /// Returns true if any change was made.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Returns true if values may be changed.
    #[must_use]
    pub fn is_modifiable(&self) -> bool {
        self.modifiable
    }

    pub(crate) fn set_modifiable(&mut self, modifiable: bool) {
        self.modifiable = modifiable;
    }

    /// Returns true if the set is marked for deletion.
    #[must_use]
    pub fn is_deleting(&self) -> bool {
        self.deleting
    }

    /// Marks or unmarks the set for deletion. Returns true if the flag changed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotModifiable`] if the set is not modifiable.
    pub fn set_deleting(&mut self, deleting: bool) -> CoreResult<bool> {
        if !self.modifiable {
            return Err(CoreError::NotModifiable {
                field: "_delete".to_string(),
            });
        }
        if self.deleting == deleting {
            return Ok(false);
        }
        self.deleting = deleting;
        self.modified = true;
        Ok(true)
    }

    /// Returns true if every field is valid; sets marked for deletion always are.
    ///
    /// With `group`, only fields of that validation group are checked.
    ///
    /// # Errors
    ///
    /// Returns an error only if a context lookup fails.
    pub fn is_valid(
        &mut self,
        modified_only: bool,
        group: Option<&str>,
        ctx: &mut dyn ValidationContext,
    ) -> CoreResult<bool> {
        if self.deleting {
            return Ok(true);
        }
        let mut valid = true;
        for field in &mut self.fields {
            if group.is_some() && field.def().spec().group.as_deref() != group {
                continue;
            }
            valid &= field.is_valid(modified_only, ctx)?;
        }
        Ok(valid)
    }

    /// Re-validates every field, replacing its messages.
    ///
    /// # Errors
    ///
    /// Returns an error only if a context lookup fails.
    pub fn validate(&mut self, ctx: &mut dyn ValidationContext) -> CoreResult<()> {
        for field in &mut self.fields {
            field.validate(ctx)?;
        }
        Ok(())
    }

    /// Gives every field with a default its default value.
    ///
    /// Defaulted fields count as modified so they are persisted and
    /// validated; the set itself is not touched.
    pub fn set_default_values(&mut self) {
        for field in &mut self.fields {
            if let Some(default) = field.def().spec().default_val.clone() {
                field.set_initial(&default);
                field.mark_modified();
            }
        }
    }

    /// Sets every field of this set that the other set also has.
    ///
    /// # Errors
    ///
    /// Fails as [`FieldSet::set`] does.
    pub fn copy_from(&mut self, other: &FieldSet) -> CoreResult<()> {
        for field in other.fields() {
            if self.index.contains_key(field.id()) {
                self.set(field.id(), field.get())?;
            }
        }
        Ok(())
    }

    /// Returns `(id, value)` pairs in field order.
    #[must_use]
    pub fn values(&self) -> Vec<(String, String)> {
        self.fields
            .iter()
            .map(|f| (f.id().to_string(), f.get().to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::NoContext;

    fn criteria() -> FieldSet {
        let types = TypeRegistry::builder().build();
        let mut set = FieldSet::new(true);
        set.add_field(FieldSpec::text("name").mandatory(), &types).unwrap();
        set.add_field(FieldSpec::number("weight").default_val("5"), &types)
            .unwrap();
        set.add_field(FieldSpec::text("note").group("extra"), &types)
            .unwrap();
        set
    }

    #[test]
    fn add_field_rejects_duplicates_and_unknown_types() {
        let types = TypeRegistry::builder().build();
        let mut set = criteria();
        assert!(matches!(
            set.add_field(FieldSpec::text("name"), &types),
            Err(CoreError::DuplicateId { .. })
        ));
        assert!(matches!(
            set.add_field(FieldSpec::new("x", "colourwheel"), &types),
            Err(CoreError::UnknownType { .. })
        ));
        assert_eq!(set.field_count(), 3);
        assert_eq!(set.field_at(1).unwrap().id(), "weight");
    }

    #[test]
    fn set_reports_changes() {
        let mut set = criteria();
        assert!(set.set("name", "bolt").unwrap());
        assert!(!set.set("name", "bolt").unwrap());
        assert!(set.is_modified());
        assert_eq!(set.get("name").unwrap(), "bolt");
        assert!(matches!(
            set.get("nope"),
            Err(CoreError::UnknownField { .. })
        ));
    }

    #[test]
    fn not_modifiable_rejects_even_equal_values() {
        let mut set = criteria();
        set.set_modifiable(false);
        assert!(matches!(
            set.set("name", ""),
            Err(CoreError::NotModifiable { .. })
        ));
    }

    #[test]
    fn defaults_mark_fields_not_set() {
        let mut set = criteria();
        set.set_default_values();
        assert_eq!(set.get("weight").unwrap(), "5");
        assert!(set.get_field("weight").unwrap().is_modified());
        assert!(!set.is_modified());
    }

    #[test]
    fn validity_by_group_and_deletion() {
        let mut set = criteria();
        assert!(!set.is_valid(false, None, &mut NoContext).unwrap());
        assert!(set.is_valid(false, Some("extra"), &mut NoContext).unwrap());

        assert!(set.set_deleting(true).unwrap());
        assert!(set.is_valid(false, None, &mut NoContext).unwrap());
    }

    #[test]
    fn copy_from_sets_shared_fields() {
        let types = TypeRegistry::builder().build();
        let mut source = FieldSet::new(true);
        source.add_field(FieldSpec::text("name"), &types).unwrap();
        source.add_field(FieldSpec::text("other"), &types).unwrap();
        source.set("name", "widget").unwrap();

        let mut target = criteria();
        target.copy_from(&source).unwrap();
        assert_eq!(target.get("name").unwrap(), "widget");
        assert_eq!(target.values()[0], ("name".to_string(), "widget".to_string()));
    }
}
