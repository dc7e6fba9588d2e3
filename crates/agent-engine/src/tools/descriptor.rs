//! Tool descriptors and argument validation
//!
//! A [`ToolDescriptor`] is the single source of truth for a tool: it is
//! what the LLM sees when deciding to call the tool, and what the registry
//! validates call arguments against before the handler runs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The type of a tool parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterType {
    String,
    Integer,
    Float,
    Boolean,
    /// One of a fixed set of strings
    Enum { variants: Vec<String> },
    /// A JSON array whose items all have the given type
    List { items: Box<ParameterType> },
    /// A JSON object; listed properties are required
    Object { properties: Vec<ToolParameter> },
}

impl ParameterType {
    /// Check a JSON value against this type, describing the first mismatch
    pub fn check(&self, value: &Value) -> Result<(), String> {
        match self {
            Self::String if value.is_string() => Ok(()),
            Self::Integer if value.is_i64() || value.is_u64() => Ok(()),
            Self::Float if value.is_number() => Ok(()),
            Self::Boolean if value.is_boolean() => Ok(()),
            Self::Enum { variants } => match value.as_str() {
                Some(s) if variants.iter().any(|v| v == s) => Ok(()),
                _ => Err(format!("expected one of {:?}, got {}", variants, value)),
            },
            Self::List { items } => {
                let array = value
                    .as_array()
                    .ok_or_else(|| format!("expected a list, got {}", value))?;
                for (i, item) in array.iter().enumerate() {
                    items.check(item).map_err(|e| format!("item {}: {}", i, e))?;
                }
                Ok(())
            }
            Self::Object { properties } => {
                let object = value
                    .as_object()
                    .ok_or_else(|| format!("expected an object, got {}", value))?;
                for property in properties {
                    let field = object
                        .get(&property.name)
                        .ok_or_else(|| format!("missing property '{}'", property.name))?;
                    property
                        .param_type
                        .check(field)
                        .map_err(|e| format!("property '{}': {}", property.name, e))?;
                }
                Ok(())
            }
            other => Err(format!("expected {}, got {}", other.label(), value)),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::String => "a string",
            Self::Integer => "an integer",
            Self::Float => "a number",
            Self::Boolean => "a boolean",
            Self::Enum { .. } => "an enum value",
            Self::List { .. } => "a list",
            Self::Object { .. } => "an object",
        }
    }
}

/// A named, typed tool parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolParameter {
    pub name: String,
    pub description: String,
    pub param_type: ParameterType,
}

impl ToolParameter {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        param_type: ParameterType,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            param_type,
        }
    }
}

/// Complete description of a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Unique name within a registry
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub required_parameters: Vec<ToolParameter>,
    #[serde(default)]
    pub optional_parameters: Vec<ToolParameter>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required_parameters: Vec::new(),
            optional_parameters: Vec::new(),
        }
    }

    /// Add a required parameter
    pub fn required(mut self, parameter: ToolParameter) -> Self {
        self.required_parameters.push(parameter);
        self
    }

    /// Add an optional parameter
    pub fn optional(mut self, parameter: ToolParameter) -> Self {
        self.optional_parameters.push(parameter);
        self
    }

    /// Validate call arguments against this descriptor
    ///
    /// Every required parameter must be present and well-typed; optional
    /// parameters are type-checked when present and not null. A tool with no
    /// required parameters accepts `null` as "no arguments".
    pub fn validate(&self, args: &Value) -> Result<(), String> {
        let empty = serde_json::Map::new();
        let object = match args {
            Value::Object(map) => map,
            Value::Null if self.required_parameters.is_empty() => &empty,
            other => return Err(format!("arguments must be an object, got {}", other)),
        };

        for parameter in &self.required_parameters {
            let value = object
                .get(&parameter.name)
                .filter(|v| !v.is_null())
                .ok_or_else(|| format!("missing required parameter '{}'", parameter.name))?;
            parameter
                .param_type
                .check(value)
                .map_err(|e| format!("parameter '{}': {}", parameter.name, e))?;
        }

        for parameter in &self.optional_parameters {
            if let Some(value) = object.get(&parameter.name).filter(|v| !v.is_null()) {
                parameter
                    .param_type
                    .check(value)
                    .map_err(|e| format!("parameter '{}': {}", parameter.name, e))?;
            }
        }

        Ok(())
    }
}
