//! Field types: value normalization, SQL column types and type-specific validation.

use chrono::{Local, NaiveDate};
use std::fmt;
use std::sync::Arc;

use super::FieldSpec;
use crate::error::CoreResult;
use crate::lov::ListOfValues;
use crate::message::MessageList;

/// Lookups a field type may need while validating a value.
pub trait ValidationContext {
    /// Returns the named list of values, if it can be found.
    fn list_of_values(&mut self, list_id: &str) -> CoreResult<Option<Arc<ListOfValues>>>;

    /// Reports whether a row with this key exists for the entity.
    ///
    /// Returns `None` when the context cannot tell, in which case the
    /// reference is accepted.
    fn reference_exists(&mut self, entity: &str, key: &str) -> CoreResult<Option<bool>>;
}

/// A context with nothing to look up.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoContext;

impl ValidationContext for NoContext {
    fn list_of_values(&mut self, _list_id: &str) -> CoreResult<Option<Arc<ListOfValues>>> {
        Ok(None)
    }

    fn reference_exists(&mut self, _entity: &str, _key: &str) -> CoreResult<Option<bool>> {
        Ok(None)
    }
}

/// Behaviour shared by every field of one type.
///
/// Generic checks (mandatory, length, pattern) are applied by the field
/// itself; `validate` only adds what is specific to the type and is only
/// called for non-blank values.
pub trait FieldType: fmt::Debug + Send + Sync {
    /// Name used in field specs.
    fn name(&self) -> &str;

    /// Canonical form of a value about to be stored in a field.
    fn normalize(&self, value: &str) -> String {
        value.to_string()
    }

    /// Value of a freshly created field.
    fn initial_value(&self) -> &'static str {
        ""
    }

    /// Maximum value length when the `FieldSpec` does not give one.
    fn default_data_length(&self) -> Option<usize> {
        Some(255)
    }

    /// Pattern and failure message applied when the `FieldSpec` gives none.
    fn default_pattern(&self) -> Option<(&'static str, &'static str)> {
        None
    }

    /// Column type for a field of this type.
    fn sql_type(&self, _spec: &FieldSpec, length: Option<usize>) -> String {
        format!("VARCHAR({})", length.unwrap_or(255))
    }

    /// Whether values of this type are keys of another entity.
    fn is_reference(&self) -> bool {
        false
    }

    /// Adds type-specific messages for a non-blank value.
    fn validate(
        &self,
        _spec: &FieldSpec,
        _value: &str,
        _ctx: &mut dyn ValidationContext,
        _messages: &mut MessageList,
    ) -> CoreResult<()> {
        Ok(())
    }
}

/// Single-line text.
#[derive(Debug, Default)]
pub struct Text;

impl FieldType for Text {
    fn name(&self) -> &str {
        "text"
    }
}

/// Multi-line text without a length limit.
#[derive(Debug, Default)]
pub struct Textarea;

impl FieldType for Textarea {
    fn name(&self) -> &str {
        "textarea"
    }

    fn default_data_length(&self) -> Option<usize> {
        None
    }

    fn sql_type(&self, _spec: &FieldSpec, _length: Option<usize>) -> String {
        "TEXT".to_string()
    }
}

/// Decimal number with optional bounds and decimal places.
#[derive(Debug, Default)]
pub struct Number;

impl Number {
    fn parse(value: &str) -> Option<f64> {
        value.parse::<f64>().ok().filter(|n| n.is_finite())
    }
}

impl FieldType for Number {
    fn name(&self) -> &str {
        "number"
    }

    fn normalize(&self, value: &str) -> String {
        value.replace(',', "").trim().to_string()
    }

    fn default_data_length(&self) -> Option<usize> {
        Some(20)
    }

    fn sql_type(&self, spec: &FieldSpec, length: Option<usize>) -> String {
        match spec.decimal_digits {
            Some(digits) if digits > 0 => {
                format!("DECIMAL({},{})", length.unwrap_or(20), digits)
            }
            _ => "INT".to_string(),
        }
    }

    fn validate(
        &self,
        spec: &FieldSpec,
        value: &str,
        _ctx: &mut dyn ValidationContext,
        messages: &mut MessageList,
    ) -> CoreResult<()> {
        let Some(number) = Self::parse(value) else {
            messages.error(format!("{value} is not a number"));
            return Ok(());
        };
        let allowed = spec.decimal_digits.unwrap_or(0) as usize;
        let places = value.split_once('.').map_or(0, |(_, fraction)| fraction.len());
        if places > allowed {
            messages.error(format!(
                "{value} is more decimal places than the {allowed} allowed for this field"
            ));
        }
        let min = spec.min.as_deref().unwrap_or("0");
        if let Some(bound) = Self::parse(min) {
            if number < bound {
                messages.error(format!("{value} is lower than minimum value: {min}"));
            }
        }
        if let Some(max) = spec.max.as_deref() {
            if let Some(bound) = Self::parse(max) {
                if number > bound {
                    messages.error(format!("{value} is higher than maximum value: {max}"));
                }
            }
        }
        Ok(())
    }
}

/// Calendar date, stored as `YYYY-MM-DD`.
#[derive(Debug, Default)]
pub struct Date;

impl Date {
    const INPUT_FORMATS: [&'static str; 3] = ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"];

    fn parse(value: &str) -> Option<NaiveDate> {
        if value.eq_ignore_ascii_case("today") {
            return Some(Local::now().date_naive());
        }
        Self::INPUT_FORMATS
            .iter()
            .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
    }
}

impl FieldType for Date {
    fn name(&self) -> &str {
        "date"
    }

    fn normalize(&self, value: &str) -> String {
        let value = value.trim();
        Self::parse(value).map_or_else(
            || value.to_string(),
            |date| date.format("%Y-%m-%d").to_string(),
        )
    }

    fn default_data_length(&self) -> Option<usize> {
        Some(10)
    }

    fn sql_type(&self, _spec: &FieldSpec, _length: Option<usize>) -> String {
        "DATE".to_string()
    }

    fn validate(
        &self,
        spec: &FieldSpec,
        value: &str,
        _ctx: &mut dyn ValidationContext,
        messages: &mut MessageList,
    ) -> CoreResult<()> {
        let Some(date) = Self::parse(value) else {
            messages.error("not a valid date");
            return Ok(());
        };
        if let Some(min) = spec.min.as_deref().and_then(Self::parse) {
            if date < min {
                messages.error(format!("earlier than minimum value: {}", min.format("%Y-%m-%d")));
            }
        }
        if let Some(max) = spec.max.as_deref().and_then(Self::parse) {
            if date > max {
                messages.error(format!("later than maximum value: {}", max.format("%Y-%m-%d")));
            }
        }
        Ok(())
    }
}

/// Yes/no flag stored as `Y` or `N`.
#[derive(Debug, Default)]
pub struct Boolean;

impl FieldType for Boolean {
    fn name(&self) -> &str {
        "boolean"
    }

    fn normalize(&self, value: &str) -> String {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "n" | "no" | "false" => "N".to_string(),
            "y" | "yes" | "true" => "Y".to_string(),
            other => other.to_ascii_uppercase(),
        }
    }

    fn initial_value(&self) -> &'static str {
        "N"
    }

    fn default_data_length(&self) -> Option<usize> {
        Some(1)
    }

    fn sql_type(&self, _spec: &FieldSpec, _length: Option<usize>) -> String {
        "CHAR(1)".to_string()
    }

    fn validate(
        &self,
        _spec: &FieldSpec,
        value: &str,
        _ctx: &mut dyn ValidationContext,
        messages: &mut MessageList,
    ) -> CoreResult<()> {
        if value != "Y" && value != "N" {
            messages.error("must be Y or N");
        }
        Ok(())
    }
}

/// Choice from a list of values.
#[derive(Debug, Default)]
pub struct OptionList;

impl FieldType for OptionList {
    fn name(&self) -> &str {
        "option"
    }

    fn validate(
        &self,
        spec: &FieldSpec,
        value: &str,
        ctx: &mut dyn ValidationContext,
        messages: &mut MessageList,
    ) -> CoreResult<()> {
        let list = match spec.list_id.as_deref() {
            Some(list_id) => ctx.list_of_values(list_id)?,
            None => None,
        };
        let Some(list) = list else {
            messages.error("no lov found");
            return Ok(());
        };
        match list.get(value) {
            None => messages.error(format!("invalid option: {value}")),
            Some(item) if !item.active => {
                messages.error(format!("option is inactive: {}", item.label));
            }
            Some(_) => {}
        }
        Ok(())
    }
}

/// Key of a row of another entity.
#[derive(Debug, Default)]
pub struct Reference;

impl FieldType for Reference {
    fn name(&self) -> &str {
        "reference"
    }

    fn default_data_length(&self) -> Option<usize> {
        None
    }

    fn is_reference(&self) -> bool {
        true
    }

    fn validate(
        &self,
        spec: &FieldSpec,
        value: &str,
        ctx: &mut dyn ValidationContext,
        messages: &mut MessageList,
    ) -> CoreResult<()> {
        let Some(entity) = spec.ref_entity.as_deref() else {
            messages.error("no ref_entity property found");
            return Ok(());
        };
        if ctx.reference_exists(entity, value)? == Some(false) {
            messages.error(format!("invalid reference: {value}"));
        }
        Ok(())
    }
}

/// Email address.
#[derive(Debug, Default)]
pub struct Email;

impl FieldType for Email {
    fn name(&self) -> &str {
        "email"
    }

    fn default_data_length(&self) -> Option<usize> {
        Some(100)
    }

    fn default_pattern(&self) -> Option<(&'static str, &'static str)> {
        Some((r"^.+@.+\..+$", "invalid email address"))
    }
}

/// Returns the built-in field types.
#[must_use]
pub fn builtin_types() -> Vec<Arc<dyn FieldType>> {
    vec![
        Arc::new(Text),
        Arc::new(Textarea),
        Arc::new(Number),
        Arc::new(Date),
        Arc::new(Boolean),
        Arc::new(OptionList),
        Arc::new(Reference),
        Arc::new(Email),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(field_type: &dyn FieldType, spec: &FieldSpec, value: &str) -> Vec<String> {
        let mut messages = MessageList::new();
        field_type
            .validate(spec, value, &mut NoContext, &mut messages)
            .unwrap();
        messages.iter().map(|m| m.text.clone()).collect()
    }

    #[test]
    fn number_messages() {
        let spec = FieldSpec::number("weight").max("1000").decimal_digits(2);
        assert!(check(&Number, &spec, "12.5").is_empty());
        assert_eq!(check(&Number, &spec, "abc"), vec!["abc is not a number"]);
        assert_eq!(
            check(&Number, &spec, "1.234"),
            vec!["1.234 is more decimal places than the 2 allowed for this field"]
        );
        assert_eq!(
            check(&Number, &spec, "-1"),
            vec!["-1 is lower than minimum value: 0"]
        );
        assert_eq!(
            check(&Number, &spec, "1001"),
            vec!["1001 is higher than maximum value: 1000"]
        );
    }

    #[test]
    fn number_strips_commas() {
        assert_eq!(Number.normalize(" 1,250 "), "1250");
    }

    #[test]
    fn date_normalizes_and_bounds() {
        assert_eq!(Date.normalize("25/12/2024"), "2024-12-25");
        assert_eq!(Date.normalize("garbage"), "garbage");

        let spec = FieldSpec::date("due").min("2024-01-01").max("2024-12-31");
        assert!(check(&Date, &spec, "2024-06-01").is_empty());
        assert_eq!(check(&Date, &spec, "garbage"), vec!["not a valid date"]);
        assert_eq!(
            check(&Date, &spec, "2023-12-31"),
            vec!["earlier than minimum value: 2024-01-01"]
        );
        assert_eq!(
            check(&Date, &spec, "2025-01-01"),
            vec!["later than maximum value: 2024-12-31"]
        );
    }

    #[test]
    fn boolean_normalizes() {
        assert_eq!(Boolean.normalize("yes"), "Y");
        assert_eq!(Boolean.normalize(""), "N");
        assert_eq!(Boolean.normalize("maybe"), "MAYBE");
        assert_eq!(
            check(&Boolean, &FieldSpec::boolean("flag"), "MAYBE"),
            vec!["must be Y or N"]
        );
    }

    #[test]
    fn option_and_reference_without_context() {
        assert_eq!(
            check(&OptionList, &FieldSpec::option("colour", "colour"), "red"),
            vec!["no lov found"]
        );
        // An undecidable reference is accepted.
        assert!(check(&Reference, &FieldSpec::reference("customer", "customer"), "C1").is_empty());
        assert_eq!(
            check(&Reference, &FieldSpec::new("customer", "reference"), "C1"),
            vec!["no ref_entity property found"]
        );
    }

    #[test]
    fn option_checks_items() {
        struct Lists;
        impl ValidationContext for Lists {
            fn list_of_values(&mut self, _id: &str) -> CoreResult<Option<Arc<ListOfValues>>> {
                Ok(Some(Arc::new(
                    ListOfValues::new("colour")
                        .item("red", "Red")
                        .inactive_item("mauve", "Mauve"),
                )))
            }
            fn reference_exists(&mut self, _entity: &str, key: &str) -> CoreResult<Option<bool>> {
                Ok(Some(key == "C1"))
            }
        }

        let spec = FieldSpec::option("colour", "colour");
        let mut messages = MessageList::new();
        OptionList.validate(&spec, "red", &mut Lists, &mut messages).unwrap();
        OptionList.validate(&spec, "blue", &mut Lists, &mut messages).unwrap();
        OptionList.validate(&spec, "mauve", &mut Lists, &mut messages).unwrap();
        let reference = FieldSpec::reference("customer", "customer");
        Reference.validate(&reference, "C2", &mut Lists, &mut messages).unwrap();
        let texts: Vec<_> = messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "invalid option: blue",
                "option is inactive: Mauve",
                "invalid reference: C2"
            ]
        );
    }
}
