//! Validation rules attached to configuration fields.
//!
//! Rules only ever see values read from a configuration source. Declared
//! defaults are trusted and never validated.

use crate::types::TypedValue;
use farmconf_common::{ByteValue, TimeValue};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Value out of range for field {field}: {message}")]
    OutOfRange { field: String, message: String },

    #[error("Field {0} must not be empty")]
    Empty(String),

    #[error("Rule {rule} cannot check a {kind} value of field {field}")]
    NotApplicable {
        field: String,
        rule: &'static str,
        kind: String,
    },

    #[error("Invalid bound {bound:?} in rule for field {field}")]
    InvalidBound { field: String, bound: &'static str },
}

/// A rule a source value must satisfy before it is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationRule {
    /// Inclusive integer bounds, also applied to floats
    NumberRange { min: i64, max: i64 },
    /// Inclusive time bounds written like field values, e.g. `"0 ms"`
    TimeRange { min: &'static str, max: &'static str },
    /// Inclusive size bounds written like field values, e.g. `"1 KiB"`
    ByteRange { min: &'static str, max: &'static str },
    /// Strings and lists must contain something
    NotEmpty,
}

impl ValidationRule {
    fn name(&self) -> &'static str {
        match self {
            ValidationRule::NumberRange { .. } => "number range",
            ValidationRule::TimeRange { .. } => "time range",
            ValidationRule::ByteRange { .. } => "byte range",
            ValidationRule::NotEmpty => "not empty",
        }
    }

    /// Check `value` of `field` against this rule
    pub fn validate(&self, field: &str, value: &TypedValue) -> Result<(), ValidationError> {
        match (*self, value) {
            (ValidationRule::NumberRange { min, max }, TypedValue::Integer(v)) => {
                if *v < min || *v > max {
                    return Err(out_of_range(field, v, min, max));
                }
            }
            (ValidationRule::NumberRange { min, max }, TypedValue::Float(v)) => {
                if *v < min as f64 || *v > max as f64 || v.is_nan() {
                    return Err(out_of_range(field, v, min, max));
                }
            }
            (ValidationRule::TimeRange { min, max }, TypedValue::Time(v)) => {
                check_time(field, v, min, max)?;
            }
            (ValidationRule::TimeRange { min, max }, TypedValue::TimeList(items)) => {
                for v in items {
                    check_time(field, v, min, max)?;
                }
            }
            (ValidationRule::ByteRange { min, max }, TypedValue::Bytes(v)) => {
                let lo = bound(field, min, ByteValue::parse)?;
                let hi = bound(field, max, ByteValue::parse)?;
                if v.to_bytes() < lo.to_bytes() || v.to_bytes() > hi.to_bytes() {
                    return Err(out_of_range(field, v, min, max));
                }
            }
            (ValidationRule::NotEmpty, TypedValue::String(s)) => {
                if s.trim().is_empty() {
                    return Err(ValidationError::Empty(field.to_string()));
                }
            }
            (ValidationRule::NotEmpty, TypedValue::StringList(items)) => {
                if items.is_empty() {
                    return Err(ValidationError::Empty(field.to_string()));
                }
            }
            (ValidationRule::NotEmpty, TypedValue::TimeList(items)) => {
                if items.is_empty() {
                    return Err(ValidationError::Empty(field.to_string()));
                }
            }
            (rule, value) => {
                return Err(ValidationError::NotApplicable {
                    field: field.to_string(),
                    rule: rule.name(),
                    kind: value.kind().to_string(),
                });
            }
        }
        Ok(())
    }
}

fn check_time(
    field: &str,
    value: &TimeValue,
    min: &'static str,
    max: &'static str,
) -> Result<(), ValidationError> {
    let lo = bound(field, min, TimeValue::parse)?;
    let hi = bound(field, max, TimeValue::parse)?;
    if *value < lo || *value > hi {
        return Err(out_of_range(field, value, min, max));
    }
    Ok(())
}

fn bound<T, E>(
    field: &str,
    raw: &'static str,
    parse: impl Fn(&str) -> Result<T, E>,
) -> Result<T, ValidationError> {
    parse(raw).map_err(|_| ValidationError::InvalidBound {
        field: field.to_string(),
        bound: raw,
    })
}

fn out_of_range(
    field: &str,
    value: impl std::fmt::Display,
    min: impl std::fmt::Display,
    max: impl std::fmt::Display,
) -> ValidationError {
    ValidationError::OutOfRange {
        field: field.to_string(),
        message: format!("{} is outside [{}, {}]", value, min, max),
    }
}
