//! Field kinds and the typed values converted from raw configuration strings.

use farmconf_common::{ByteValue, TimeValue, TypeFormatError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator of list-valued fields.
pub const LIST_SEPARATOR: char = ':';

/// The datatype of a configuration field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Integer,
    Float,
    Boolean,
    String,
    Time,
    Bytes,
    StringList,
    TimeList,
    Json,
}

impl ValueKind {
    /// Convert a raw string into a value of this kind
    pub fn convert(&self, raw: &str) -> Result<TypedValue, TypeFormatError> {
        let value = match self {
            ValueKind::Integer => TypedValue::Integer(raw.trim().parse().map_err(|_| {
                TypeFormatError::new(format!("'{}' is not an integer", raw))
            })?),
            ValueKind::Float => TypedValue::Float(raw.trim().parse().map_err(|_| {
                TypeFormatError::new(format!("'{}' is not a number", raw))
            })?),
            ValueKind::Boolean => TypedValue::Boolean(parse_bool(raw)?),
            ValueKind::String => TypedValue::String(raw.to_string()),
            ValueKind::Time => TypedValue::Time(TimeValue::parse(raw)?),
            ValueKind::Bytes => TypedValue::Bytes(ByteValue::parse(raw)?),
            ValueKind::StringList => {
                TypedValue::StringList(split_list(raw).map(str::to_string).collect())
            }
            ValueKind::TimeList => TypedValue::TimeList(
                split_list(raw)
                    .map(TimeValue::parse)
                    .collect::<Result<_, _>>()?,
            ),
            ValueKind::Json => TypedValue::Json(
                serde_json::from_str(raw)
                    .map_err(|e| TypeFormatError::new(format!("invalid JSON '{}': {}", raw, e)))?,
            ),
        };
        Ok(value)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Integer => "integer",
            ValueKind::Float => "float",
            ValueKind::Boolean => "boolean",
            ValueKind::String => "string",
            ValueKind::Time => "time",
            ValueKind::Bytes => "bytes",
            ValueKind::StringList => "string list",
            ValueKind::TimeList => "time list",
            ValueKind::Json => "json",
        };
        f.write_str(name)
    }
}

/// Only `true` and `false` are accepted, in any case.
fn parse_bool(raw: &str) -> Result<bool, TypeFormatError> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if trimmed.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(TypeFormatError::new(format!("'{}' is not a boolean", raw)))
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(LIST_SEPARATOR)
        .map(str::trim)
        .filter(|item| !item.is_empty())
}

/// A converted configuration value
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
    Time(TimeValue),
    Bytes(ByteValue),
    StringList(Vec<String>),
    TimeList(Vec<TimeValue>),
    Json(serde_json::Value),
}

impl TypedValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            TypedValue::Integer(_) => ValueKind::Integer,
            TypedValue::Float(_) => ValueKind::Float,
            TypedValue::Boolean(_) => ValueKind::Boolean,
            TypedValue::String(_) => ValueKind::String,
            TypedValue::Time(_) => ValueKind::Time,
            TypedValue::Bytes(_) => ValueKind::Bytes,
            TypedValue::StringList(_) => ValueKind::StringList,
            TypedValue::TimeList(_) => ValueKind::TimeList,
            TypedValue::Json(_) => ValueKind::Json,
        }
    }

    /// Try to get value as string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TypedValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get value as integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            TypedValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get value as float
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TypedValue::Float(f) => Some(*f),
            TypedValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TypedValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<TimeValue> {
        match self {
            TypedValue::Time(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<ByteValue> {
        match self {
            TypedValue::Bytes(b) => Some(*b),
            _ => None,
        }
    }

    pub fn into_string_list(self) -> Option<Vec<String>> {
        match self {
            TypedValue::StringList(items) => Some(items),
            _ => None,
        }
    }

    pub fn into_time_list(self) -> Option<Vec<TimeValue>> {
        match self {
            TypedValue::TimeList(items) => Some(items),
            _ => None,
        }
    }

    pub fn into_string(self) -> Option<String> {
        match self {
            TypedValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_json(self) -> Option<serde_json::Value> {
        match self {
            TypedValue::Json(v) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_boolean_is_strict() {
        assert_eq!(ValueKind::Boolean.convert("TRUE").unwrap(), TypedValue::Boolean(true));
        assert_eq!(ValueKind::Boolean.convert(" false ").unwrap(), TypedValue::Boolean(false));
        assert!(ValueKind::Boolean.convert("yes").is_err());
        assert!(ValueKind::Boolean.convert("1").is_err());
        assert!(ValueKind::Boolean.convert("").is_err());
    }

    #[test]
    fn test_numbers() {
        assert_eq!(ValueKind::Integer.convert(" 42 ").unwrap().as_i64(), Some(42));
        assert!(ValueKind::Integer.convert("4.2").is_err());
        assert_eq!(ValueKind::Float.convert("4.5").unwrap().as_f64(), Some(4.5));
        assert!(ValueKind::Float.convert("four").is_err());
    }

    #[test]
    fn test_lists_split_on_colon() {
        let list = ValueKind::StringList.convert("a:b: c:").unwrap();
        assert_eq!(
            list.into_string_list().unwrap(),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );

        let times = ValueKind::TimeList.convert("1 s:250ms").unwrap().into_time_list().unwrap();
        assert_eq!(times.len(), 2);
        assert_eq!(times[1].to_duration(), Duration::from_millis(250));

        assert!(ValueKind::TimeList.convert("1 s:soon").is_err());
        assert!(ValueKind::StringList.convert("").unwrap().into_string_list().unwrap().is_empty());
    }

    #[test]
    fn test_time_bytes_and_json() {
        assert_eq!(
            ValueKind::Time.convert("15s").unwrap().as_time().unwrap().to_duration(),
            Duration::from_secs(15)
        );
        assert_eq!(ValueKind::Bytes.convert("1 KiB").unwrap().as_bytes().unwrap().to_bytes(), 1024);
        let json = ValueKind::Json.convert(r#"{"a": [1]}"#).unwrap();
        assert_eq!(json.kind(), ValueKind::Json);
        assert!(ValueKind::Json.convert("{oops").is_err());
    }
}
