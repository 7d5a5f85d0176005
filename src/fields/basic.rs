use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;

use super::{Field, FieldAttributes, FieldError, FieldKind};

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Built-in implementation covering the whole taxonomy; behavior branches
/// on the kind so the conversion rules live in one place.
#[derive(Debug, Clone)]
pub struct BasicField {
    kind: FieldKind,
    name: String,
    attrs: FieldAttributes,
}

/// Construct a field of the given kind.
pub fn create_field(kind: FieldKind, attrs: FieldAttributes) -> BasicField {
    BasicField {
        kind,
        name: String::new(),
        attrs,
    }
}

impl BasicField {
    fn type_error(&self, value: &Value) -> FieldError {
        FieldError::new(format!(
            "expected {} value for field '{}', got {}",
            self.kind,
            self.name,
            type_name(value)
        ))
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl Field for BasicField {
    fn kind(&self) -> FieldKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    fn attributes(&self) -> &FieldAttributes {
        &self.attrs
    }

    fn validate(&self, value: &Value) -> Result<(), FieldError> {
        // Requiredness is enforced at the model level; a null here is a
        // deliberate absence.
        if value.is_null() {
            return Ok(());
        }

        match self.kind {
            FieldKind::Boolean => value
                .as_bool()
                .map(|_| ())
                .ok_or_else(|| self.type_error(value)),
            FieldKind::Integer => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(()),
                Value::Number(n) if n.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false) => Ok(()),
                _ => Err(self.type_error(value)),
            },
            FieldKind::Float => value
                .as_f64()
                .map(|_| ())
                .ok_or_else(|| self.type_error(value)),
            FieldKind::Char => {
                let text = value.as_str().ok_or_else(|| self.type_error(value))?;
                if let Some(size) = self.attrs.size {
                    if text.chars().count() > size {
                        return Err(FieldError::new(format!(
                            "field '{}' exceeds maximum size {}",
                            self.name, size
                        )));
                    }
                }
                Ok(())
            }
            FieldKind::Text | FieldKind::Binary => value
                .as_str()
                .map(|_| ())
                .ok_or_else(|| self.type_error(value)),
            FieldKind::Date => {
                let text = value.as_str().ok_or_else(|| self.type_error(value))?;
                NaiveDate::parse_from_str(text, DATE_FORMAT)
                    .map(|_| ())
                    .map_err(|_| {
                        FieldError::new(format!(
                            "field '{}' expects a {} date, got '{}'",
                            self.name, DATE_FORMAT, text
                        ))
                    })
            }
            FieldKind::Datetime => {
                let text = value.as_str().ok_or_else(|| self.type_error(value))?;
                NaiveDateTime::parse_from_str(text, DATETIME_FORMAT)
                    .map(|_| ())
                    .map_err(|_| {
                        FieldError::new(format!(
                            "field '{}' expects a {} datetime, got '{}'",
                            self.name, DATETIME_FORMAT, text
                        ))
                    })
            }
            FieldKind::Selection => {
                let text = value.as_str().ok_or_else(|| self.type_error(value))?;
                if self.attrs.selection.iter().any(|option| option == text) {
                    Ok(())
                } else {
                    Err(FieldError::new(format!(
                        "'{}' is not a valid selection for field '{}'",
                        text, self.name
                    )))
                }
            }
            FieldKind::Json => Ok(()),
        }
    }

    fn convert_to_cache(&self, value: &Value) -> Result<Value, FieldError> {
        if value.is_null() {
            return Ok(Value::Null);
        }

        match self.kind {
            FieldKind::Boolean => match value {
                Value::Bool(b) => Ok(Value::Bool(*b)),
                Value::Number(n) => Ok(Value::Bool(n.as_f64().unwrap_or(0.0) != 0.0)),
                Value::String(s) => Ok(Value::Bool(matches!(
                    s.to_lowercase().as_str(),
                    "true" | "1" | "yes" | "on"
                ))),
                _ => Err(self.type_error(value)),
            },
            FieldKind::Integer => match value {
                Value::Number(n) if n.is_i64() => Ok(value.clone()),
                Value::Number(n) => n
                    .as_f64()
                    .filter(|f| f.fract() == 0.0)
                    .map(|f| Value::from(f as i64))
                    .ok_or_else(|| self.type_error(value)),
                Value::String(s) => s
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| self.type_error(value)),
                _ => Err(self.type_error(value)),
            },
            FieldKind::Float => match value {
                Value::Number(n) => Ok(Value::from(n.as_f64().unwrap_or(0.0))),
                Value::String(s) => s
                    .parse::<f64>()
                    .map(Value::from)
                    .map_err(|_| self.type_error(value)),
                _ => Err(self.type_error(value)),
            },
            FieldKind::Char | FieldKind::Text | FieldKind::Binary | FieldKind::Selection => {
                self.validate(value)?;
                Ok(value.clone())
            }
            FieldKind::Date | FieldKind::Datetime => {
                self.validate(value)?;
                Ok(value.clone())
            }
            FieldKind::Json => Ok(value.clone()),
        }
    }

    fn convert_to_column(&self, value: &Value) -> Result<Value, FieldError> {
        let cached = self.convert_to_cache(value)?;
        if cached.is_null() {
            return Ok(Value::Null);
        }

        match self.kind {
            // Oversized char values are truncated at the column boundary.
            FieldKind::Char => {
                if let (Some(size), Some(text)) = (self.attrs.size, cached.as_str()) {
                    if text.chars().count() > size {
                        return Ok(Value::String(text.chars().take(size).collect()));
                    }
                }
                Ok(cached)
            }
            _ => Ok(cached),
        }
    }

    fn convert_to_export(&self, value: &Value) -> Result<Value, FieldError> {
        self.convert_to_cache(value)
    }

    fn column_type(&self) -> (&'static str, &'static str) {
        match self.kind {
            FieldKind::Boolean => ("bool", "bool"),
            FieldKind::Integer => ("int4", "i64"),
            FieldKind::Float => ("float8", "f64"),
            FieldKind::Char => ("varchar", "String"),
            FieldKind::Text => ("text", "String"),
            FieldKind::Date => ("date", "chrono::NaiveDate"),
            FieldKind::Datetime => ("timestamp", "chrono::NaiveDateTime"),
            FieldKind::Binary => ("bytea", "Vec<u8>"),
            FieldKind::Selection => ("varchar", "String"),
            FieldKind::Json => ("jsonb", "serde_json::Value"),
        }
    }
}
