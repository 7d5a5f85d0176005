//! Field-type collaborator interface.
//!
//! The dispatcher and model definitions consume fields only through the
//! [`Field`] trait: validation plus the cache/column/export conversions.
//! Any type implementing the trait participates; [`basic::BasicField`]
//! covers the built-in taxonomy.

pub mod basic;

pub use basic::{create_field, BasicField};

use serde_json::Value;
use std::fmt;

/// Built-in field taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Boolean,
    Integer,
    Float,
    Char,
    Text,
    Date,
    Datetime,
    Binary,
    Selection,
    Json,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Char => "char",
            Self::Text => "text",
            Self::Date => "date",
            Self::Datetime => "datetime",
            Self::Binary => "binary",
            Self::Selection => "selection",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared field attributes.
#[derive(Debug, Clone)]
pub struct FieldAttributes {
    pub label: String,
    pub help: String,
    pub required: bool,
    pub readonly: bool,
    pub stored: bool,
    pub default: Option<Value>,
    /// Char length cap
    pub size: Option<usize>,
    /// Allowed values for selection fields
    pub selection: Vec<String>,
}

impl Default for FieldAttributes {
    fn default() -> Self {
        Self {
            label: String::new(),
            help: String::new(),
            required: false,
            readonly: false,
            stored: true,
            default: None,
            size: None,
            selection: Vec::new(),
        }
    }
}

/// Field-level validation or conversion failure.
#[derive(Debug)]
pub struct FieldError {
    message: String,
}

impl FieldError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for FieldError {}

/// Validator/converter contract every field instance provides.
pub trait Field: Send + Sync {
    fn kind(&self) -> FieldKind;
    fn name(&self) -> &str;
    fn set_name(&mut self, name: &str);
    fn attributes(&self) -> &FieldAttributes;

    fn validate(&self, value: &Value) -> Result<(), FieldError>;

    /// Cache form: the in-memory normalised value.
    fn convert_to_cache(&self, value: &Value) -> Result<Value, FieldError>;

    /// Column form: what gets written to the database.
    fn convert_to_column(&self, value: &Value) -> Result<Value, FieldError>;

    /// Export form: the serialisable representation.
    fn convert_to_export(&self, value: &Value) -> Result<Value, FieldError>;

    /// (database type, native type)
    fn column_type(&self) -> (&'static str, &'static str);

    fn is_required(&self) -> bool {
        self.attributes().required
    }

    fn is_stored(&self) -> bool {
        self.attributes().stored
    }

    fn default_value(&self) -> Option<Value> {
        self.attributes().default.clone()
    }
}
