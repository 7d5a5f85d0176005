use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::fields::{create_field, Field, FieldAttributes, FieldError, FieldKind};

/// Conversion target for [`ModelDefinition::convert_values`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionTarget {
    Cache,
    Column,
    Export,
}

/// Declarative model: a named, ordered collection of field definitions.
///
/// Carries the audit fields every model gets (id, create/write uid and
/// date) and validates/converts value mappings through the field
/// interfaces.
pub struct ModelDefinition {
    pub name: String,
    pub table: String,
    pub description: String,
    fields: BTreeMap<String, Box<dyn Field>>,
}

impl ModelDefinition {
    pub fn new(name: &str, table: &str) -> Self {
        let table = if table.is_empty() {
            to_snake_case(name)
        } else {
            table.to_string()
        };

        let mut model = Self {
            name: name.to_string(),
            table,
            description: String::new(),
            fields: BTreeMap::new(),
        };
        model.add_default_fields();
        model
    }

    fn add_default_fields(&mut self) {
        let readonly_int = |label: &str, default: Option<Value>| {
            create_field(
                FieldKind::Integer,
                FieldAttributes {
                    label: label.to_string(),
                    readonly: true,
                    default,
                    ..FieldAttributes::default()
                },
            )
        };
        let readonly_datetime = |label: &str| {
            create_field(
                FieldKind::Datetime,
                FieldAttributes {
                    label: label.to_string(),
                    readonly: true,
                    ..FieldAttributes::default()
                },
            )
        };

        self.add_field("id", readonly_int("ID", None));
        self.add_field("create_uid", readonly_int("Created by", Some(Value::from(1))));
        self.add_field("write_uid", readonly_int("Last Updated by", Some(Value::from(1))));
        self.add_field("create_date", readonly_datetime("Created on"));
        self.add_field("write_date", readonly_datetime("Last Updated on"));
    }

    pub fn add_field(&mut self, name: &str, field: impl Field + 'static) {
        let mut field: Box<dyn Field> = Box::new(field);
        field.set_name(name);
        self.fields.insert(name.to_string(), field);
    }

    pub fn field(&self, name: &str) -> Option<&dyn Field> {
        self.fields.get(name).map(|f| f.as_ref())
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.keys().map(String::as_str).collect()
    }

    pub fn stored_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, field)| field.is_stored())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Validate a values mapping: every required field must be present and
    /// non-null, and every supplied value must pass its field's validator.
    pub fn validate_values(&self, values: &Map<String, Value>) -> Result<(), FieldError> {
        for (name, field) in &self.fields {
            let value = values.get(name);

            if field.is_required() && value.map(Value::is_null).unwrap_or(true) {
                return Err(FieldError::new(format!("field '{}' is required", name)));
            }

            if let Some(value) = value {
                field.validate(value).map_err(|err| {
                    FieldError::new(format!("validation error for field '{}': {}", name, err))
                })?;
            }
        }
        Ok(())
    }

    /// Convert a values mapping through the per-field converters. Unknown
    /// keys are skipped.
    pub fn convert_values(
        &self,
        values: &Map<String, Value>,
        target: ConversionTarget,
    ) -> Result<Map<String, Value>, FieldError> {
        let mut converted = Map::new();
        for (name, value) in values {
            let Some(field) = self.fields.get(name) else {
                continue;
            };

            let result = match target {
                ConversionTarget::Cache => field.convert_to_cache(value),
                ConversionTarget::Column => field.convert_to_column(value),
                ConversionTarget::Export => field.convert_to_export(value),
            }
            .map_err(|err| {
                FieldError::new(format!("conversion error for field '{}': {}", name, err))
            })?;

            converted.insert(name.clone(), result);
        }
        Ok(converted)
    }
}

fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else if c == '.' {
            out.push('_');
        } else {
            out.push(c);
        }
    }
    out
}
