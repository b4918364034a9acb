//! Input contracts: the typed fields a tool accepts.
//!
//! A contract renders to the JSON Schema offered to the reasoning provider
//! and validates raw arguments before the handler sees them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub ty: FieldType,
    pub description: String,
    pub required: bool,
}

/// Required and optional typed fields of a tool's input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputContract {
    fields: Vec<FieldSpec>,
}

impl InputContract {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(
        mut self,
        name: impl Into<String>,
        ty: FieldType,
        description: impl Into<String>,
    ) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            ty,
            description: description.into(),
            required: true,
        });
        self
    }

    pub fn optional(
        mut self,
        name: impl Into<String>,
        ty: FieldType,
        description: impl Into<String>,
    ) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            ty,
            description: description.into(),
            required: false,
        });
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Check raw arguments. `null` counts as an empty object; unknown keys
    /// are tolerated.
    pub fn validate(&self, input: &Value) -> Result<(), String> {
        let empty = serde_json::Map::new();
        let object = match input {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => return Err(format!("expected an object, got {}", type_of(other))),
        };

        let mut problems = Vec::new();
        for field in &self.fields {
            match object.get(&field.name) {
                None | Some(Value::Null) if field.required => {
                    problems.push(format!("missing required field '{}'", field.name));
                }
                None | Some(Value::Null) => {}
                Some(value) if !field.ty.accepts(value) => problems.push(format!(
                    "field '{}' must be {}, got {}",
                    field.name,
                    field.ty.as_str(),
                    type_of(value)
                )),
                Some(_) => {}
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }

    pub fn to_json_schema(&self) -> Value {
        let properties: serde_json::Map<String, Value> = self
            .fields
            .iter()
            .map(|f| {
                (
                    f.name.clone(),
                    serde_json::json!({
                        "type": f.ty.as_str(),
                        "description": f.description,
                    }),
                )
            })
            .collect();
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}
