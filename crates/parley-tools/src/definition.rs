// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use parley_model::ToolSchema;

/// One parameter in a tool's schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    /// JSON Schema base type: `string`, `integer`, `number`, `boolean`,
    /// `array`, or `object`.
    pub param_type: String,
    pub description: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    /// Item schema for `array` parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Value>,
    /// Property schemas for `object` parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
}

impl ToolParameter {
    pub fn new(
        name: impl Into<String>,
        param_type: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            required,
            enum_values: None,
            items: None,
            properties: None,
        }
    }

    pub fn string(name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        Self::new(name, "string", description, required)
    }

    pub fn integer(
        name: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        Self::new(name, "integer", description, required)
    }

    pub fn with_enum(mut self, values: &[&str]) -> Self {
        self.enum_values = Some(values.iter().map(|s| s.to_string()).collect());
        self
    }
}

/// A tool's schema as advertised to models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<ToolParameter>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Render the JSON Schema subset used verbatim by every provider:
    /// `{"type":"object","properties":{...},"required":[...]}`.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for p in &self.parameters {
            let mut schema = serde_json::Map::new();
            schema.insert("type".into(), json!(p.param_type));
            schema.insert("description".into(), json!(p.description));
            if let Some(values) = &p.enum_values {
                schema.insert("enum".into(), json!(values));
            }
            if let Some(items) = &p.items {
                schema.insert("items".into(), items.clone());
            }
            if let Some(props) = &p.properties {
                schema.insert("properties".into(), props.clone());
            }
            properties.insert(p.name.clone(), Value::Object(schema));
            if p.required {
                required.push(p.name.clone());
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// The provider-facing schema handed to model clients.
    pub fn to_tool_schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.to_json_schema(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ToolDefinition {
        ToolDefinition::new("read_file", "Read a file").with_parameters(vec![
            ToolParameter::string("path", "File path", true),
            ToolParameter::integer("limit", "Max lines", false),
        ])
    }

    #[test]
    fn json_schema_has_object_shape() {
        let schema = sample().to_json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["path"]["type"], "string");
        assert_eq!(schema["properties"]["limit"]["type"], "integer");
    }

    #[test]
    fn required_lists_only_required_params() {
        let schema = sample().to_json_schema();
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 1);
        assert_eq!(required[0], "path");
    }

    #[test]
    fn enum_values_are_rendered() {
        let def = ToolDefinition::new("t", "d").with_parameters(vec![ToolParameter::string(
            "mode", "Mode", true,
        )
        .with_enum(&["a", "b"])]);
        let schema = def.to_json_schema();
        assert_eq!(schema["properties"]["mode"]["enum"], json!(["a", "b"]));
    }

    #[test]
    fn tool_schema_carries_name_and_description() {
        let ts = sample().to_tool_schema();
        assert_eq!(ts.name, "read_file");
        assert_eq!(ts.description, "Read a file");
        assert_eq!(ts.parameters["type"], "object");
    }
}
