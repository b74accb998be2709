//! Parameter schema translation.
//!
//! Servers describe tool parameters with a JSON-Schema-like object. This
//! module turns that into a flat, typed [`ToolSchema`] used to check
//! arguments before a call leaves the process. Translation never fails: an
//! unknown or missing type becomes [`FieldType::Any`] so that a sloppy schema
//! never hides a tool.

use serde::Serialize;

/// Validation primitive for one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    /// Unconstrained; accepts any JSON value.
    Any,
}

impl FieldType {
    /// Map a declared JSON-Schema `type` to a primitive.
    ///
    /// `integer` is treated as a number. A list of types (e.g.
    /// `["string", "null"]`) uses its first non-null entry.
    pub fn from_declared(declared: Option<&serde_json::Value>) -> Self {
        let name = match declared {
            Some(serde_json::Value::String(s)) => Some(s.as_str()),
            Some(serde_json::Value::Array(types)) => types
                .iter()
                .filter_map(|t| t.as_str())
                .find(|t| *t != "null"),
            _ => None,
        };
        match name {
            Some("string") => Self::String,
            Some("number") | Some("integer") => Self::Number,
            Some("boolean") => Self::Boolean,
            Some("array") => Self::Array,
            Some("object") => Self::Object,
            _ => Self::Any,
        }
    }

    fn accepts(&self, value: &serde_json::Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Any => true,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Any => "any",
        }
    }
}

/// One translated parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSchema {
    pub name: String,
    pub field_type: FieldType,
    pub description: Option<String>,
    pub required: bool,
}

/// Translated parameter schema of one tool, fields ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolSchema {
    pub fields: Vec<FieldSchema>,
}

impl ToolSchema {
    /// Translate a server-declared input schema.
    pub fn translate(input_schema: &serde_json::Value) -> Self {
        let required: Vec<&str> = input_schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|r| r.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();

        let Some(properties) = input_schema.get("properties").and_then(|p| p.as_object()) else {
            return Self::default();
        };

        let fields = properties
            .iter()
            .map(|(name, prop)| FieldSchema {
                name: name.clone(),
                field_type: FieldType::from_declared(prop.get("type")),
                description: prop
                    .get("description")
                    .and_then(|d| d.as_str())
                    .map(String::from),
                required: required.contains(&name.as_str()),
            })
            .collect();

        Self { fields }
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check call arguments against the schema.
    ///
    /// `null` counts as an empty object. Required fields must be present and
    /// non-null; present fields must match their type. Keys the schema does
    /// not mention are passed through untouched.
    pub fn validate(&self, arguments: &serde_json::Value) -> Result<(), String> {
        let empty = serde_json::Map::new();
        let args = match arguments {
            serde_json::Value::Null => &empty,
            serde_json::Value::Object(map) => map,
            other => return Err(format!("arguments must be an object, got {}", json_kind(other))),
        };

        for field in &self.fields {
            match args.get(&field.name) {
                None | Some(serde_json::Value::Null) if field.required => {
                    return Err(format!("missing required field: '{}'", field.name));
                }
                None | Some(serde_json::Value::Null) => {}
                Some(value) if !field.field_type.accepts(value) => {
                    return Err(format!(
                        "field '{}' must be {}, got {}",
                        field.name,
                        field.field_type.as_str(),
                        json_kind(value)
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Re-emit the translated schema as a JSON Schema object.
    pub fn to_json_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        for field in &self.fields {
            let mut prop = serde_json::Map::new();
            if field.field_type != FieldType::Any {
                prop.insert("type".into(), field.field_type.as_str().into());
            }
            if let Some(desc) = &field.description {
                prop.insert("description".into(), desc.clone().into());
            }
            properties.insert(field.name.clone(), serde_json::Value::Object(prop));
        }
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

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
