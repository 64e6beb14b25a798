//! Field definitions and field values.
//!
//! A [`FieldSpec`] is the declarative description of a field. Registering it
//! resolves the type and compiles the pattern into a shared [`FieldDef`].
//! Every row holds its own [`Field`] values built from those definitions.

mod types;

pub use types::{
    builtin_types, Boolean, Date, Email, FieldType, NoContext, Number, OptionList, Reference,
    Text, Textarea, ValidationContext,
};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::message::MessageList;

/// Declarative description of a field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldSpec {
    /// Field id, unique within its entity.
    pub id: String,
    /// Registered field type name.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Text shown to the user; the id when absent.
    pub label: Option<String>,
    /// Blank values are invalid.
    pub mandatory: bool,
    /// Maximum value length; the type's default when absent.
    pub data_length: Option<usize>,
    /// Pattern non-blank values must match.
    pub regex_pattern: Option<String>,
    /// Message shown when the pattern does not match.
    pub regex_label: Option<String>,
    /// Value given to new rows.
    pub default_val: Option<String>,
    /// The key field filled in by key generation.
    pub auto_generate: bool,
    /// Lower bound for number and date fields.
    pub min: Option<String>,
    /// Upper bound for number and date fields.
    pub max: Option<String>,
    /// Decimal places allowed in number fields.
    pub decimal_digits: Option<u32>,
    /// List backing an option field.
    pub list_id: Option<String>,
    /// Entity a reference field points at.
    pub ref_entity: Option<String>,
    /// Validation group the field belongs to.
    pub group: Option<String>,
}

impl FieldSpec {
    /// Creates a spec for a field of the named type.
    pub fn new(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
            ..Self::default()
        }
    }

    /// Creates a text field spec.
    pub fn text(id: impl Into<String>) -> Self {
        Self::new(id, "text")
    }

    /// Creates a textarea field spec.
    pub fn textarea(id: impl Into<String>) -> Self {
        Self::new(id, "textarea")
    }

    /// Creates a number field spec.
    pub fn number(id: impl Into<String>) -> Self {
        Self::new(id, "number")
    }

    /// Creates a date field spec.
    pub fn date(id: impl Into<String>) -> Self {
        Self::new(id, "date")
    }

    /// Creates a boolean field spec.
    pub fn boolean(id: impl Into<String>) -> Self {
        Self::new(id, "boolean")
    }

    /// Creates an email field spec.
    pub fn email(id: impl Into<String>) -> Self {
        Self::new(id, "email")
    }

    /// Creates an option field spec backed by a list.
    pub fn option(id: impl Into<String>, list_id: impl Into<String>) -> Self {
        Self {
            list_id: Some(list_id.into()),
            ..Self::new(id, "option")
        }
    }

    /// Creates a reference field spec pointing at an entity.
    pub fn reference(id: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            ref_entity: Some(entity.into()),
            ..Self::new(id, "reference")
        }
    }

    /// Sets the label.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Makes the field mandatory.
    #[must_use]
    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    /// Sets the maximum length.
    #[must_use]
    pub fn data_length(mut self, length: usize) -> Self {
        self.data_length = Some(length);
        self
    }

    /// Sets the pattern and its failure message.
    #[must_use]
    pub fn pattern(mut self, pattern: impl Into<String>, label: impl Into<String>) -> Self {
        self.regex_pattern = Some(pattern.into());
        self.regex_label = Some(label.into());
        self
    }

    /// Sets the default value for new rows.
    #[must_use]
    pub fn default_val(mut self, value: impl Into<String>) -> Self {
        self.default_val = Some(value.into());
        self
    }

    /// Marks the field as the generated part of its entity's key.
    #[must_use]
    pub fn auto_generate(mut self) -> Self {
        self.auto_generate = true;
        self
    }

    /// Sets the lower bound.
    #[must_use]
    pub fn min(mut self, min: impl Into<String>) -> Self {
        self.min = Some(min.into());
        self
    }

    /// Sets the upper bound.
    #[must_use]
    pub fn max(mut self, max: impl Into<String>) -> Self {
        self.max = Some(max.into());
        self
    }

    /// Sets the decimal places allowed.
    #[must_use]
    pub fn decimal_digits(mut self, digits: u32) -> Self {
        self.decimal_digits = Some(digits);
        self
    }

    /// Puts the field in a validation group.
    #[must_use]
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

/// A registered field: its spec, resolved type and compiled pattern.
#[derive(Debug)]
pub struct FieldDef {
    spec: FieldSpec,
    field_type: Arc<dyn FieldType>,
    data_length: Option<usize>,
    pattern: Option<(Regex, String)>,
}

impl FieldDef {
    /// Resolves a spec against its type.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPattern`] if the pattern does not compile.
    pub fn new(spec: FieldSpec, field_type: Arc<dyn FieldType>) -> CoreResult<Self> {
        let declared = spec
            .regex_pattern
            .as_deref()
            .map(|p| (p, spec.regex_label.as_deref().unwrap_or("match pattern")));
        let pattern = match declared.or_else(|| field_type.default_pattern()) {
            Some((pattern, label)) => {
                let regex = Regex::new(pattern).map_err(|e| CoreError::InvalidPattern {
                    field: spec.id.clone(),
                    message: e.to_string(),
                })?;
                Some((regex, label.to_string()))
            }
            None => None,
        };
        let data_length = spec.data_length.or_else(|| field_type.default_data_length());
        Ok(Self {
            spec,
            field_type,
            data_length,
            pattern,
        })
    }

    pub(crate) fn with_data_length(mut self, length: usize) -> Self {
        if self.spec.data_length.is_none() {
            self.data_length = Some(length);
        }
        self
    }

    /// Returns the field id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.spec.id
    }

    /// Returns the `FieldSpec` the field was built from.
    #[must_use]
    pub fn spec(&self) -> &FieldSpec {
        &self.spec
    }

    /// Returns the field type.
    #[must_use]
    pub fn field_type(&self) -> &Arc<dyn FieldType> {
        &self.field_type
    }

    /// Returns the label, falling back to the id.
    #[must_use]
    pub fn label(&self) -> &str {
        self.spec.label.as_deref().unwrap_or(&self.spec.id)
    }

    /// Returns the maximum value length, if limited.
    #[must_use]
    pub fn data_length(&self) -> Option<usize> {
        self.data_length
    }

    /// Returns the column type.
    #[must_use]
    pub fn sql_type(&self) -> String {
        self.field_type.sql_type(&self.spec, self.data_length)
    }

    /// Returns true if the field points at another entity's rows.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        self.field_type.is_reference()
    }

    /// Brings a raw value into the type's canonical form.
    #[must_use]
    pub fn normalize(&self, value: &str) -> String {
        self.field_type.normalize(value)
    }
}

/// A field value held by one row or field set.
#[derive(Debug, Clone)]
pub struct Field {
    def: Arc<FieldDef>,
    value: String,
    original: String,
    previous: String,
    modified: bool,
    validated: bool,
    fixed_key: bool,
    messages: MessageList,
}

impl Field {
    /// Creates a field holding its type's initial value.
    #[must_use]
    pub fn new(def: Arc<FieldDef>) -> Self {
        let initial = def.field_type.initial_value().to_string();
        Self {
            def,
            original: initial.clone(),
            previous: initial.clone(),
            value: initial,
            modified: false,
            validated: false,
            fixed_key: false,
            messages: MessageList::new(),
        }
    }

    /// Returns the field id.
    #[must_use]
    pub fn id(&self) -> &str {
        self.def.id()
    }

    /// Returns the definition.
    #[must_use]
    pub fn def(&self) -> &Arc<FieldDef> {
        &self.def
    }

    /// Returns the label.
    #[must_use]
    pub fn label(&self) -> &str {
        self.def.label()
    }

    /// Returns the current value.
    #[must_use]
    pub fn get(&self) -> &str {
        &self.value
    }

    /// Returns the value the field was initialized or loaded with.
    #[must_use]
    pub fn original_value(&self) -> &str {
        &self.original
    }

    /// Returns the value before the latest change.
    #[must_use]
    pub fn previous_value(&self) -> &str {
        &self.previous
    }

    /// Returns true if the value differs from its original.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Returns true if the value is empty.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.value.is_empty()
    }

    /// Returns true if the field is part of a key that can no longer change.
    #[must_use]
    pub fn is_fixed_key(&self) -> bool {
        self.fixed_key
    }

    /// Returns the messages raised by the latest validation.
    #[must_use]
    pub fn messages(&self) -> &MessageList {
        &self.messages
    }

    /// Sets a value that is not a change: defaults and values loaded from storage.
    pub(crate) fn set_initial(&mut self, value: &str) {
        let value = self.def.normalize(value);
        self.original.clone_from(&value);
        self.previous.clone_from(&value);
        self.value = value;
        self.modified = false;
        self.validated = false;
    }

    /// Stores an already normalized value. Returns the replaced value.
    pub(crate) fn apply(&mut self, value: String) -> String {
        let old = std::mem::replace(&mut self.value, value);
        self.previous.clone_from(&old);
        self.modified = self.value != self.original;
        self.validated = false;
        old
    }

    pub(crate) fn mark_modified(&mut self) {
        self.modified = true;
        self.validated = false;
    }

    pub(crate) fn fix_key(&mut self) {
        self.fixed_key = true;
    }

    /// Re-runs validation, replacing the field's messages.
    ///
    /// # Errors
    ///
    /// Returns an error only if a context lookup fails.
    pub fn validate(&mut self, ctx: &mut dyn ValidationContext) -> CoreResult<()> {
        self.messages.clear();
        let spec = &self.def.spec;
        if self.value.is_empty() {
            if spec.mandatory {
                self.messages.error("mandatory");
            }
        } else {
            if let Some(limit) = self.def.data_length {
                if self.value.chars().count() > limit {
                    self.messages
                        .error(format!("longer than {limit} characters"));
                }
            }
            if let Some((regex, label)) = &self.def.pattern {
                if !regex.is_match(&self.value) {
                    self.messages.error(label.clone());
                }
            }
            if !self.messages.has_errors() {
                self.def
                    .field_type
                    .validate(spec, &self.value, ctx, &mut self.messages)?;
            }
        }
        self.validated = true;
        Ok(())
    }

    /// Returns true if the field holds no error, validating first if needed.
    ///
    /// With `modified_only`, unmodified fields are taken as valid.
    ///
    /// # Errors
    ///
    /// Returns an error only if a context lookup fails.
    pub fn is_valid(
        &mut self,
        modified_only: bool,
        ctx: &mut dyn ValidationContext,
    ) -> CoreResult<bool> {
        if modified_only && !self.modified {
            return Ok(true);
        }
        if !self.validated {
            self.validate(ctx)?;
        }
        Ok(!self.messages.has_errors())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(spec: FieldSpec) -> Field {
        let field_type: Arc<dyn FieldType> = match spec.type_name.as_str() {
            "number" => Arc::new(Number),
            "email" => Arc::new(Email),
            "boolean" => Arc::new(Boolean),
            _ => Arc::new(Text),
        };
        Field::new(Arc::new(FieldDef::new(spec, field_type).unwrap()))
    }

    fn messages(field: &mut Field) -> Vec<String> {
        field.validate(&mut NoContext).unwrap();
        field.messages().iter().map(|m| m.text.clone()).collect()
    }

    #[test]
    fn mandatory_and_length() {
        let mut name = field(FieldSpec::text("name").mandatory().data_length(5));
        assert_eq!(messages(&mut name), vec!["mandatory"]);

        name.apply("abcdefg".into());
        assert_eq!(messages(&mut name), vec!["longer than 5 characters"]);

        name.apply("abc".into());
        assert!(name.is_valid(false, &mut NoContext).unwrap());
    }

    #[test]
    fn pattern_uses_label_or_default_text() {
        let mut code = field(FieldSpec::text("code").pattern("^[A-Z]+$", "upper case only"));
        code.apply("abc".into());
        assert_eq!(messages(&mut code), vec!["upper case only"]);

        let mut plain = field(FieldSpec {
            regex_pattern: Some("^x".into()),
            ..FieldSpec::text("plain")
        });
        plain.apply("y".into());
        assert_eq!(messages(&mut plain), vec!["match pattern"]);
    }

    #[test]
    fn email_default_pattern() {
        let mut email = field(FieldSpec::email("email"));
        email.apply("nobody".into());
        assert_eq!(messages(&mut email), vec!["invalid email address"]);
        email.apply("a@b.com".into());
        assert!(messages(&mut email).is_empty());
    }

    #[test]
    fn bad_pattern_is_rejected() {
        let err = FieldDef::new(FieldSpec::text("x").pattern("(", "bad"), Arc::new(Text))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidPattern { .. }));
    }

    #[test]
    fn modification_tracks_original() {
        let mut weight = field(FieldSpec::number("weight"));
        weight.set_initial("10");
        assert!(!weight.is_modified());

        let old = weight.apply("12".into());
        assert_eq!(old, "10");
        assert!(weight.is_modified());
        assert_eq!(weight.previous_value(), "10");

        weight.apply("10".into());
        assert!(!weight.is_modified());
    }

    #[test]
    fn modified_only_skips_untouched_fields() {
        let mut name = field(FieldSpec::text("name").mandatory());
        assert!(name.is_valid(true, &mut NoContext).unwrap());
        assert!(!name.is_valid(false, &mut NoContext).unwrap());
    }

    #[test]
    fn boolean_starts_as_no() {
        let flag = field(FieldSpec::boolean("flag"));
        assert_eq!(flag.get(), "N");
    }

    #[test]
    fn spec_from_json() {
        let spec: FieldSpec = serde_json::from_str(
            r#"{"id": "weight", "type": "number", "max": "1000", "decimal_digits": 2}"#,
        )
        .unwrap();
        assert_eq!(spec, FieldSpec::number("weight").max("1000").decimal_digits(2));
    }
}
