//! Tool argument/result types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keyword arguments passed to a capability
///
/// A thin wrapper over a JSON object. Capabilities are only ever invoked with
/// keyword arguments matching the property names of their parameter schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolArgs {
    params: Map<String, Value>,
}

impl ToolArgs {
    /// Create an empty argument set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Insert a parameter in place
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.params.insert(key.into(), value);
    }

    /// Get a string parameter
    pub fn param_str(&self, key: &str) -> Result<String, ToolError> {
        match self.params.get(key) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Err(ToolError::InvalidParameter(format!(
                "{} must be a string, got {}",
                key, other
            ))),
            None => Err(ToolError::MissingParameter(key.to_string())),
        }
    }

    /// Get an i64 parameter
    pub fn param_i64(&self, key: &str) -> Result<i64, ToolError> {
        self.params
            .get(key)
            .ok_or_else(|| ToolError::MissingParameter(key.to_string()))
            .and_then(|v| {
                coerce_i64(v).ok_or_else(|| {
                    ToolError::InvalidParameter(format!("{} must be an integer, got {}", key, v))
                })
            })
    }

    /// Get a bool parameter
    pub fn param_bool(&self, key: &str) -> Result<bool, ToolError> {
        self.params
            .get(key)
            .ok_or_else(|| ToolError::MissingParameter(key.to_string()))
            .and_then(|v| {
                coerce_bool(v).ok_or_else(|| {
                    ToolError::InvalidParameter(format!("{} must be a boolean, got {}", key, v))
                })
            })
    }

    /// Get an optional string parameter
    ///
    /// Non-string scalars are rendered to text so that a model passing
    /// `"limit": 5` to a string field still gets through.
    pub fn param_str_opt(&self, key: &str) -> Option<String> {
        match self.params.get(key)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Get an optional i64 parameter
    pub fn param_i64_opt(&self, key: &str) -> Option<i64> {
        self.params.get(key).and_then(coerce_i64)
    }

    /// Get an optional bool parameter
    pub fn param_bool_opt(&self, key: &str) -> Option<bool> {
        self.params.get(key).and_then(coerce_bool)
    }

    /// Get a parameter as a JSON value
    pub fn param_json(&self, key: &str) -> Result<&Value, ToolError> {
        self.params
            .get(key)
            .ok_or_else(|| ToolError::MissingParameter(key.to_string()))
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether no parameters were supplied
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Borrow the underlying JSON object
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.params
    }

    /// Consume into the underlying JSON object
    pub fn into_map(self) -> Map<String, Value> {
        self.params
    }
}

impl From<Map<String, Value>> for ToolArgs {
    fn from(params: Map<String, Value>) -> Self {
        Self { params }
    }
}

// Models frequently quote numbers and booleans; accept both forms.
fn coerce_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Result of a capability invocation
///
/// `success` holds exactly when `error` is absent. Soft failures the model
/// should react to (file not found, no matches) are carried in `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub output: String,
    pub error: Option<String>,
}

impl ToolResult {
    /// Create a successful result
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            error: None,
        }
    }

    /// Create a failed result with an empty output
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            output: String::new(),
            error: Some(error.into()),
        }
    }

    /// Create a failed result that still carries partial output
    pub fn with_error(output: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            error: Some(error.into()),
        }
    }

    /// Whether the invocation succeeded
    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Tool-specific errors
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_args_new() {
        let args = ToolArgs::new();
        assert!(args.is_empty());
    }

    #[test]
    fn test_tool_args_with_param() {
        let args = ToolArgs::new()
            .with_param("key1", json!("value1"))
            .with_param("key2", json!(42));

        assert_eq!(args.len(), 2);
        assert_eq!(args.param_json("key1").unwrap(), &json!("value1"));
        assert_eq!(args.param_json("key2").unwrap(), &json!(42));
    }

    #[test]
    fn test_param_str_success() {
        let args = ToolArgs::new().with_param("name", json!("Alice"));
        assert_eq!(args.param_str("name").unwrap(), "Alice");
    }

    #[test]
    fn test_param_str_missing() {
        let args = ToolArgs::new();
        assert!(matches!(
            args.param_str("missing").unwrap_err(),
            ToolError::MissingParameter(_)
        ));
    }

    #[test]
    fn test_param_str_wrong_type() {
        let args = ToolArgs::new().with_param("name", json!(7));
        assert!(matches!(
            args.param_str("name").unwrap_err(),
            ToolError::InvalidParameter(_)
        ));
    }

    #[test]
    fn test_param_i64_accepts_quoted_numbers() {
        let args = ToolArgs::new()
            .with_param("count", json!(42))
            .with_param("quoted", json!("17"));

        assert_eq!(args.param_i64("count").unwrap(), 42);
        assert_eq!(args.param_i64("quoted").unwrap(), 17);
        assert!(args.param_i64("missing").is_err());
    }

    #[test]
    fn test_param_bool_accepts_strings() {
        let args = ToolArgs::new()
            .with_param("a", json!(true))
            .with_param("b", json!("false"));

        assert!(args.param_bool("a").unwrap());
        assert!(!args.param_bool("b").unwrap());
        assert_eq!(args.param_bool_opt("missing"), None);
    }

    #[test]
    fn test_param_str_opt() {
        let args = ToolArgs::new()
            .with_param("name", json!("Bob"))
            .with_param("null", Value::Null);

        assert_eq!(args.param_str_opt("name"), Some("Bob".to_string()));
        assert_eq!(args.param_str_opt("null"), None);
        assert_eq!(args.param_str_opt("missing"), None);
    }

    #[test]
    fn test_tool_args_serialization_is_transparent() {
        let args = ToolArgs::new().with_param("path", json!("a.txt"));
        let serialized = serde_json::to_string(&args).unwrap();
        assert_eq!(serialized, r#"{"path":"a.txt"}"#);

        let back: ToolArgs = serde_json::from_str(&serialized).unwrap();
        assert_eq!(back, args);
    }

    #[test]
    fn test_tool_result_success_iff_no_error() {
        assert!(ToolResult::ok("done").success());
        assert!(!ToolResult::err("boom").success());
        assert!(!ToolResult::with_error("partial", "boom").success());
    }

    #[test]
    fn test_tool_result_to_json() {
        let json_str = ToolResult::ok("test").to_json();
        assert_eq!(json_str, r#"{"output":"test","error":null}"#);
    }

    #[test]
    fn test_tool_error_display() {
        let err = ToolError::MissingParameter("test_param".to_string());
        assert_eq!(err.to_string(), "Missing parameter: test_param");

        let err = ToolError::InvalidParameter("bad_value".to_string());
        assert_eq!(err.to_string(), "Invalid parameter: bad_value");

        let err = ToolError::Execution("exit 1".to_string());
        assert_eq!(err.to_string(), "Execution failed: exit 1");
    }
}
