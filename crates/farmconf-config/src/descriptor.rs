//! Static descriptions of configuration types.
//!
//! A configuration type lists its fields once, in a `static` table, and
//! implements [`Configurable`] to receive converted values:
//!
//! ```
//! use farmconf_config::{ConfigDescriptor, Configurable, FieldDescriptor, TypedValue, ValueKind};
//!
//! #[derive(Default)]
//! struct HttpClient {
//!     retries: i64,
//! }
//!
//! static FIELDS: &[FieldDescriptor] = &[FieldDescriptor::new("retries", ValueKind::Integer, "3")];
//!
//! static HTTP_CLIENT: ConfigDescriptor = ConfigDescriptor::new("HttpClient", FIELDS);
//!
//! impl Configurable for HttpClient {
//!     fn descriptor() -> &'static ConfigDescriptor {
//!         &HTTP_CLIENT
//!     }
//!
//!     fn apply(&mut self, field: &str, value: TypedValue) -> farmconf_config::Result<()> {
//!         match (field, value) {
//!             ("retries", TypedValue::Integer(v)) => self.retries = v,
//!             (field, _) => return Err(HTTP_CLIENT.unknown_field(field)),
//!         }
//!         Ok(())
//!     }
//! }
//! ```

use crate::types::{TypedValue, ValueKind};
use crate::validation::ValidationRule;
use crate::{ConfigError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How the central loader assembles the module a type reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoaderAdapter {
    /// App-specific section first, then the shared `Modules` section
    Standard,
    /// Built from a per-farm section of the consolidated document
    FarmScoped,
}

impl LoaderAdapter {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoaderAdapter::Standard => "standard",
            LoaderAdapter::FarmScoped => "farm-scoped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "standard" => Some(LoaderAdapter::Standard),
            "farm-scoped" => Some(LoaderAdapter::FarmScoped),
            _ => None,
        }
    }
}

impl fmt::Display for LoaderAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One field of a configuration type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    /// Preferred key in the source document, if it differs from `name`
    pub resource_id: Option<&'static str>,
    pub kind: ValueKind,
    /// Default literal, converted like a source value
    pub default: &'static str,
    pub required: bool,
    pub rule: Option<ValidationRule>,
    pub description: &'static str,
}

impl FieldDescriptor {
    pub const fn new(name: &'static str, kind: ValueKind, default: &'static str) -> Self {
        Self {
            name,
            resource_id: None,
            kind,
            default,
            required: false,
            rule: None,
            description: "",
        }
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub const fn resource_id(mut self, id: &'static str) -> Self {
        self.resource_id = Some(id);
        self
    }

    pub const fn rule(mut self, rule: ValidationRule) -> Self {
        self.rule = Some(rule);
        self
    }

    pub const fn describe(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Name the field is pushed and exposed under
    pub fn attribute_name(&self) -> &'static str {
        self.resource_id.unwrap_or(self.name)
    }

    /// Keys tried in order when resolving this field of `module`
    pub fn candidate_keys(&self, module: &str) -> Vec<String> {
        let mut keys = Vec::with_capacity(3);
        if let Some(id) = self.resource_id {
            keys.push(id.to_string());
        }
        keys.push(self.name.to_string());
        keys.push(format!("{}.{}", module, self.name));
        keys
    }

    /// Convert the default literal
    pub fn default_value(&self) -> Result<TypedValue> {
        self.kind
            .convert(self.default)
            .map_err(|e| ConfigError::InvalidDefault {
                field: self.name.to_string(),
                value: self.default.to_string(),
                source: e.into(),
            })
    }
}

/// Everything the materializer and the loader need to know about a type
#[derive(Debug, Clone, Copy)]
pub struct ConfigDescriptor {
    pub module: &'static str,
    pub description: &'static str,
    /// File holding this module when loading from the filesystem
    pub resource: Option<&'static str>,
    pub adapter: LoaderAdapter,
    pub fields: &'static [FieldDescriptor],
}

impl ConfigDescriptor {
    pub const fn new(module: &'static str, fields: &'static [FieldDescriptor]) -> Self {
        Self {
            module,
            description: "",
            resource: None,
            adapter: LoaderAdapter::Standard,
            fields,
        }
    }

    pub const fn describe(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub const fn resource(mut self, file: &'static str) -> Self {
        self.resource = Some(file);
        self
    }

    pub const fn adapter(mut self, adapter: LoaderAdapter) -> Self {
        self.adapter = adapter;
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Error for an `apply` call naming a field this type does not handle
    pub fn unknown_field(&self, field: &str) -> ConfigError {
        ConfigError::Descriptor(format!(
            "{} cannot apply field {} (unknown field or wrong kind)",
            self.module, field
        ))
    }
}

/// A typed configuration object built by the manager
pub trait Configurable: Default + Send + Sync + 'static {
    fn descriptor() -> &'static ConfigDescriptor;

    /// Set one field from its converted value
    fn apply(&mut self, field: &str, value: TypedValue) -> Result<()>;

    /// Called once per materialization with the build time
    fn touch(&mut self, _at: DateTime<Utc>) {}
}
