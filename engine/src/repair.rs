//! Tool argument repair
//!
//! Models emit tool arguments as a JSON string, and smaller models regularly
//! get it slightly wrong: literal newlines inside string values, a stray
//! unescaped quote in the middle of a shell command, raw control bytes.
//! This module salvages what it can without ever panicking or returning an
//! error type the caller has to unwind; a hopeless blob becomes a synthetic
//! `{error, raw}` object that is handed back to the model as a tool failure.
//!
//! Passes, in order:
//! 1. Direct parse.
//! 2. String-aware normalisation: inside string literals, escape literal
//!    control characters and quotes that are not followed by a structural
//!    token. Existing escape sequences are copied through untouched.
//! 3. Strip every remaining raw control character and parse again.
//!
//! Valid JSON is never rewritten, which makes the whole thing idempotent.

use serde_json::{Map, Value};
use thiserror::Error;

/// Longest prefix of the original input echoed back in a failure
const RAW_PREFIX_CHARS: usize = 200;

/// Arguments that could not be salvaged
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse failed: {message}")]
pub struct RepairFailure {
    /// Parser message from the last attempted pass
    pub message: String,
    /// Truncated original input
    pub raw: String,
}

impl RepairFailure {
    fn new(message: impl Into<String>, raw: &str) -> Self {
        Self {
            message: message.into(),
            raw: raw.chars().take(RAW_PREFIX_CHARS).collect(),
        }
    }

    /// The synthetic `{error, raw}` object shown to the model
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("error".to_string(), Value::String(self.to_string()));
        map.insert("raw".to_string(), Value::String(self.raw.clone()));
        map
    }
}

impl From<RepairFailure> for sdk::EngineError {
    fn from(failure: RepairFailure) -> Self {
        Self::ArgumentRepair(failure.to_string())
    }
}

/// Parse raw tool arguments, applying repairs when the direct parse fails
///
/// Empty or whitespace-only input is an empty argument map: models send that
/// for capabilities without parameters.
pub fn try_repair(raw: &str) -> Result<Map<String, Value>, RepairFailure> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }

    let first_error = match serde_json::from_str::<Value>(raw) {
        Ok(value) => return into_object(value, raw),
        Err(e) => e,
    };

    let normalised = escape_inside_strings(raw);
    if let Ok(value) = serde_json::from_str::<Value>(&normalised) {
        tracing::debug!("Repaired tool arguments with string normalisation");
        return into_object(value, raw);
    }

    let stripped: String = normalised.chars().filter(|c| (*c as u32) >= 0x20).collect();
    match serde_json::from_str::<Value>(&stripped) {
        Ok(value) => {
            tracing::debug!("Repaired tool arguments by stripping control characters");
            into_object(value, raw)
        }
        Err(_) => {
            tracing::warn!("Unrecoverable tool arguments: {}", first_error);
            Err(RepairFailure::new(first_error.to_string(), raw))
        }
    }
}

/// Parse raw tool arguments, folding failure into an `{error, raw}` map
pub fn repair(raw: &str) -> Map<String, Value> {
    try_repair(raw).unwrap_or_else(|failure| failure.to_map())
}

fn into_object(value: Value, raw: &str) -> Result<Map<String, Value>, RepairFailure> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(RepairFailure::new(
            format!("expected a JSON object, got {}", type_name(&other)),
            raw,
        )),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Rewrite string literals so that they parse
///
/// Outside strings the text is copied verbatim. Inside a string, a backslash
/// and the character after it are copied as one unit, so sequences that were
/// already escaped are never escaped twice.
fn escape_inside_strings(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    let mut out = String::with_capacity(raw.len() + 16);
    let mut in_string = false;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];

        if !in_string {
            if ch == '"' {
                in_string = true;
            }
            out.push(ch);
            i += 1;
            continue;
        }

        match ch {
            '\\' => {
                out.push(ch);
                if let Some(next) = chars.get(i + 1) {
                    match next {
                        // A control char after a backslash would still be invalid
                        c if (*c as u32) < 0x20 => push_escaped_control(&mut out, *c),
                        c => out.push(*c),
                    }
                    i += 1;
                }
            }
            '"' => {
                if closes_string(&chars, i + 1) {
                    in_string = false;
                    out.push('"');
                } else {
                    out.push_str("\\\"");
                }
            }
            c if (c as u32) < 0x20 => push_escaped_control(&mut out, c),
            c => out.push(c),
        }
        i += 1;
    }

    out
}

// A quote ends the literal when the next non-blank char is structural.
fn closes_string(chars: &[char], from: usize) -> bool {
    chars[from..]
        .iter()
        .find(|c| !c.is_whitespace())
        .map_or(true, |c| matches!(c, ',' | '}' | ']' | ':'))
}

fn push_escaped_control(out: &mut String, c: char) {
    match c {
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        '\t' => out.push_str("\\t"),
        other => out.push_str(&format!("\\u{:04x}", other as u32)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_failure_converts_to_recoverable_engine_error() {
        use sdk::{EngineError, LoomErrorExt};

        let failure = try_repair("{not json").unwrap_err();
        let err = EngineError::from(failure);
        assert!(matches!(err, EngineError::ArgumentRepair(ref msg) if msg.starts_with("parse failed")));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_valid_json_is_parsed_directly() {
        let raw = r#"{"path": "src/main.rs", "limit": 20}"#;
        assert_eq!(repair(raw), obj(json!({"path": "src/main.rs", "limit": 20})));
    }

    #[test]
    fn test_empty_input_is_empty_map() {
        assert!(repair("").is_empty());
        assert!(repair("   \n").is_empty());
        assert!(repair("null").is_empty());
    }

    #[test]
    fn test_literal_newline_inside_string() {
        let raw = "{\"path\": \"a.py\", \"content\": \"line one\nline two\r\n\"}";
        let map = repair(raw);
        assert_eq!(map["content"], json!("line one\nline two\r\n"));
        assert_eq!(map["path"], json!("a.py"));
    }

    #[test]
    fn test_literal_tab_inside_string() {
        let raw = "{\"content\": \"def f():\n\treturn 1\"}";
        assert_eq!(repair(raw)["content"], json!("def f():\n\treturn 1"));
    }

    #[test]
    fn test_already_escaped_sequences_are_preserved() {
        // Mixed: one escaped newline, one literal newline
        let raw = "{\"content\": \"a\\nb\nc\"}";
        assert_eq!(repair(raw)["content"], json!("a\nb\nc"));

        // An escaped backslash followed by n stays a backslash and an n
        let raw = "{\"content\": \"C:\\\\new\nline\"}";
        assert_eq!(repair(raw)["content"], json!("C:\\new\nline"));
    }

    #[test]
    fn test_unescaped_quote_inside_string() {
        let raw = r#"{"command": "echo "hello world" > out.txt"}"#;
        assert_eq!(repair(raw)["command"], json!(r#"echo "hello world" > out.txt"#));
    }

    #[test]
    fn test_unescaped_quote_with_literal_newline() {
        let raw = "{\"code\": \"print(\"hi\")\nprint(1)\", \"x\": 1}";
        let map = repair(raw);
        assert_eq!(map["code"], json!("print(\"hi\")\nprint(1)"));
        assert_eq!(map["x"], json!(1));
    }

    #[test]
    fn test_stray_control_character_outside_string() {
        let raw = "{\"a\": 1,\u{1}\"b\": 2}";
        assert_eq!(repair(raw), obj(json!({"a": 1, "b": 2})));
    }

    #[test]
    fn test_other_control_character_inside_string() {
        let raw = "{\"a\": \"x\u{7}y\"}";
        assert_eq!(repair(raw)["a"], json!("x\u{7}y"));
    }

    #[test]
    fn test_unrecoverable_input_yields_error_map() {
        let map = repair("{not json at all");
        let error = map["error"].as_str().unwrap();
        assert!(error.starts_with("parse failed"));
        assert_eq!(map["raw"], json!("{not json at all"));
    }

    #[test]
    fn test_raw_is_truncated() {
        let raw = format!("{{{}", "x".repeat(500));
        let map = repair(&raw);
        assert_eq!(map["raw"].as_str().unwrap().chars().count(), 200);
    }

    #[test]
    fn test_non_object_is_rejected() {
        let err = try_repair("[1, 2, 3]").unwrap_err();
        assert!(err.to_string().contains("an array"));
        assert!(try_repair("42").is_err());
    }

    #[test]
    fn test_repair_is_idempotent_on_examples() {
        for raw in [
            "{\"content\": \"a\nb\"}",
            r#"{"command": "echo "x""}"#,
            "garbage",
            "",
        ] {
            let once = repair(raw);
            let twice = repair(&Value::Object(once.clone()).to_string());
            assert_eq!(once, twice, "input: {:?}", raw);
        }
    }

    #[test]
    fn test_unicode_survives() {
        let raw = "{\"msg\": \"héllo 世界\nok\"}";
        assert_eq!(repair(raw)["msg"], json!("héllo 世界\nok"));
    }
}
