//! Capability trait
//!
//! A capability is a named, schema-described operation the model may request.
//! The engine never looks inside one: it advertises the schema, hands over
//! keyword arguments, and relays the result.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::types::{ToolArgs, ToolError, ToolResult};

/// Trait that every capability must implement
#[async_trait]
pub trait Capability: Send + Sync {
    /// Unique name across the registry
    fn name(&self) -> &str;

    /// One-line description shown to the model
    fn description(&self) -> &str;

    /// JSON-schema object describing the keyword arguments
    ///
    /// Property order is significant: it is the positional parameter order
    /// used by orchestration scripts.
    fn parameter_schema(&self) -> Value;

    /// Execute with keyword arguments matching the schema's properties
    async fn execute(&self, args: ToolArgs) -> Result<ToolResult, ToolError>;

    /// Schema entry for inclusion in a completion request
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameter_schema(),
        }
    }
}

/// Name, description and parameter schema of a capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSchema {
    /// Declared parameter names, in declaration order
    pub fn parameter_names(&self) -> Vec<String> {
        parameter_names(&self.parameters)
    }

    /// Names listed under `required`
    pub fn required(&self) -> Vec<String> {
        self.parameters
            .get("required")
            .and_then(|r| r.as_array())
            .map(|r| {
                r.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Build an object schema from `(name, property)` pairs and required names
pub fn object_schema(properties: Vec<(&str, Value)>, required: &[&str]) -> Value {
    let mut props = serde_json::Map::new();
    for (name, prop) in properties {
        props.insert(name.to_string(), prop);
    }
    json!({
        "type": "object",
        "properties": props,
        "required": required,
    })
}

/// Property names of an object schema, in declaration order
pub fn parameter_names(schema: &Value) -> Vec<String> {
    schema
        .get("properties")
        .and_then(|p| p.as_object())
        .map(|p| p.keys().cloned().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Capability for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the text back"
        }

        fn parameter_schema(&self) -> Value {
            object_schema(
                vec![
                    ("text", json!({"type": "string"})),
                    ("repeat", json!({"type": "integer", "default": 1})),
                ],
                &["text"],
            )
        }

        async fn execute(&self, args: ToolArgs) -> Result<ToolResult, ToolError> {
            let text = args.param_str("text")?;
            let repeat = args.param_i64_opt("repeat").unwrap_or(1).max(1) as usize;
            Ok(ToolResult::ok(text.repeat(repeat)))
        }
    }

    #[test]
    fn test_schema_preserves_parameter_order() {
        let schema = Echo.schema();
        assert_eq!(schema.name, "echo");
        assert_eq!(schema.parameter_names(), vec!["text", "repeat"]);
        assert_eq!(schema.required(), vec!["text"]);
    }

    #[tokio::test]
    async fn test_execute_with_keyword_args() {
        let args = ToolArgs::new()
            .with_param("text", json!("ab"))
            .with_param("repeat", json!(2));
        let result = Echo.execute(args).await.unwrap();
        assert_eq!(result, ToolResult::ok("abab"));
    }

    #[tokio::test]
    async fn test_missing_required_parameter() {
        let err = Echo.execute(ToolArgs::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::MissingParameter(ref p) if p == "text"));
    }
}
