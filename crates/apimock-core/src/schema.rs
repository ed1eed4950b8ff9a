//! Structural schema inferred from a sample body.
//!
//! Used as the response constraint for structured generation. Derivation is
//! shallow and best-effort: it never fails.

use serde_json::{Map, Value, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    String,
    Number,
    Boolean,
    Null,
}

impl ScalarType {
    pub fn as_str(self) -> &'static str {
        match self {
            ScalarType::String => "string",
            ScalarType::Number => "number",
            ScalarType::Boolean => "boolean",
            ScalarType::Null => "null",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    /// Closed object: every listed key required, nothing else allowed.
    Object {
        properties: Vec<(String, Schema)>,
        required: Vec<String>,
    },
    Array {
        items: Box<Schema>,
    },
    Scalar(ScalarType),
    /// Unconstrained value (item schema of an empty array).
    Any,
    /// Object that accepts anything; returned when the sample is unreadable.
    OpenObject,
}

impl Schema {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Object(map) => {
                let properties: Vec<(String, Schema)> = map
                    .iter()
                    .filter(|(key, _)| !key.is_empty())
                    .map(|(key, child)| (key.clone(), Schema::of(child)))
                    .collect();
                let required = properties.iter().map(|(key, _)| key.clone()).collect();
                Schema::Object {
                    properties,
                    required,
                }
            }
            Value::Array(items) => Schema::Array {
                items: Box::new(items.first().map_or(Schema::Any, Schema::of)),
            },
            Value::String(_) => Schema::Scalar(ScalarType::String),
            Value::Number(_) => Schema::Scalar(ScalarType::Number),
            Value::Bool(_) => Schema::Scalar(ScalarType::Boolean),
            Value::Null => Schema::Scalar(ScalarType::Null),
        }
    }

    /// Render as JSON Schema.
    pub fn to_json(&self) -> Value {
        match self {
            Schema::Object {
                properties,
                required,
            } => {
                let props: Map<String, Value> = properties
                    .iter()
                    .map(|(key, schema)| (key.clone(), schema.to_json()))
                    .collect();
                json!({
                    "type": "object",
                    "properties": props,
                    "required": required,
                    "additionalProperties": false,
                })
            }
            Schema::Array { items } => json!({ "type": "array", "items": items.to_json() }),
            Schema::Scalar(scalar) => json!({ "type": scalar.as_str() }),
            Schema::Any => json!({}),
            Schema::OpenObject => json!({ "type": "object", "additionalProperties": true }),
        }
    }
}

/// Derive a schema from clean (comment- and meta-free) JSON text.
pub fn derive_schema(clean_json: &str) -> Schema {
    match serde_json::from_str::<Value>(clean_json) {
        Ok(value) => Schema::of(&value),
        Err(e) => {
            tracing::debug!(error = %e, "schema sample unreadable, using open object");
            Schema::OpenObject
        }
    }
}
