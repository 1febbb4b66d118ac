//! Filesystem capabilities
//!
//! `read_file`, `write_file` and `edit_file`. Relative paths resolve against
//! the workspace. A missing file is a soft failure the model can react to;
//! anything else the OS refuses is a hard `ToolError::Io`.

use async_trait::async_trait;
use sdk::{object_schema, Capability, ToolArgs, ToolError, ToolResult};
use serde_json::{json, Value};
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, info};

use super::resolve_path;

const DEFAULT_READ_LIMIT: i64 = 2000;

/// Read a file as numbered lines
#[derive(Debug)]
pub struct ReadFileTool {
    workspace: PathBuf,
}

impl ReadFileTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Capability for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file. Returns numbered lines `N: text`."
    }

    fn parameter_schema(&self) -> Value {
        object_schema(
            vec![
                ("path", json!({"type": "string", "description": "Path to the file"})),
                (
                    "offset",
                    json!({"type": "integer", "description": "First line to return (1-indexed)", "default": 1}),
                ),
                (
                    "limit",
                    json!({"type": "integer", "description": "Maximum number of lines", "default": DEFAULT_READ_LIMIT}),
                ),
            ],
            &["path"],
        )
    }

    async fn execute(&self, args: ToolArgs) -> Result<ToolResult, ToolError> {
        let path = args.param_str("path")?;
        let offset = args.param_i64_opt("offset").unwrap_or(1).max(1) as usize;
        let limit = args
            .param_i64_opt("limit")
            .unwrap_or(DEFAULT_READ_LIMIT)
            .max(0) as usize;

        let target = resolve_path(&self.workspace, &path);
        if !target.is_file() {
            return Ok(ToolResult::err(format!("File not found: {}", path)));
        }

        info!("Reading file: {}", target.display());
        let content = fs::read_to_string(&target).await?;
        debug!("Read {} bytes from {}", content.len(), target.display());

        let numbered: Vec<String> = content
            .lines()
            .enumerate()
            .skip(offset - 1)
            .take(limit)
            .map(|(i, line)| format!("{}: {}", i + 1, line))
            .collect();
        Ok(ToolResult::ok(numbered.join("\n")))
    }
}

/// Write a file, creating parent directories
#[derive(Debug)]
pub struct WriteFileTool {
    workspace: PathBuf,
}

impl WriteFileTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Capability for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating it and its parent directories if needed."
    }

    fn parameter_schema(&self) -> Value {
        object_schema(
            vec![
                ("path", json!({"type": "string", "description": "Path to the file"})),
                ("content", json!({"type": "string", "description": "Content to write"})),
            ],
            &["path", "content"],
        )
    }

    async fn execute(&self, args: ToolArgs) -> Result<ToolResult, ToolError> {
        let path = args.param_str("path")?;
        let content = args.param_str("content")?;
        let target = resolve_path(&self.workspace, &path);

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        info!("Writing {} bytes to: {}", content.len(), target.display());
        fs::write(&target, &content).await?;

        Ok(ToolResult::ok(format!(
            "Successfully wrote {} chars to {}",
            content.chars().count(),
            path
        )))
    }
}

/// Exact string replacement inside a file
#[derive(Debug)]
pub struct EditFileTool {
    workspace: PathBuf,
}

impl EditFileTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Capability for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Edit a file by replacing an exact string. Replaces the first match unless replace_all is set."
    }

    fn parameter_schema(&self) -> Value {
        object_schema(
            vec![
                ("path", json!({"type": "string", "description": "Path to the file"})),
                ("old_string", json!({"type": "string", "description": "Exact text to find"})),
                ("new_string", json!({"type": "string", "description": "Replacement text"})),
                (
                    "replace_all",
                    json!({"type": "boolean", "description": "Replace every occurrence", "default": false}),
                ),
            ],
            &["path", "old_string", "new_string"],
        )
    }

    async fn execute(&self, args: ToolArgs) -> Result<ToolResult, ToolError> {
        let path = args.param_str("path")?;
        let old = args.param_str("old_string")?;
        let new = args.param_str("new_string")?;
        let replace_all = args.param_bool_opt("replace_all").unwrap_or(false);

        if old.is_empty() {
            return Ok(ToolResult::err("old_string must not be empty"));
        }

        let target = resolve_path(&self.workspace, &path);
        if !target.is_file() {
            return Ok(ToolResult::err(format!("File not found: {}", path)));
        }

        let content = fs::read_to_string(&target).await?;
        let found = content.matches(old.as_str()).count();
        if found == 0 {
            return Ok(ToolResult::err("old_string not found in file"));
        }

        let (updated, replaced) = if replace_all {
            (content.replace(old.as_str(), &new), found)
        } else {
            (content.replacen(old.as_str(), &new, 1), 1)
        };

        info!("Editing {} ({} replacement(s))", target.display(), replaced);
        fs::write(&target, updated).await?;

        Ok(ToolResult::ok(format!(
            "Replaced {} occurrence(s) in {}",
            replaced, path
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(pairs: &[(&str, Value)]) -> ToolArgs {
        pairs
            .iter()
            .fold(ToolArgs::new(), |a, (k, v)| a.with_param(*k, v.clone()))
    }

    #[tokio::test]
    async fn test_write_and_read_file() {
        let temp = TempDir::new().unwrap();
        let ws = temp.path().to_path_buf();

        let written = WriteFileTool::new(ws.clone())
            .execute(args(&[("path", json!("hello.txt")), ("content", json!("one\ntwo\nthree"))]))
            .await
            .unwrap();
        assert_eq!(written.output, "Successfully wrote 13 chars to hello.txt");

        let read = ReadFileTool::new(ws)
            .execute(args(&[("path", json!("hello.txt"))]))
            .await
            .unwrap();
        assert_eq!(read.output, "1: one\n2: two\n3: three");
    }

    #[tokio::test]
    async fn test_read_with_offset_and_limit() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("f.txt"), "a\nb\nc\nd\n").unwrap();

        let read = ReadFileTool::new(temp.path().to_path_buf())
            .execute(args(&[
                ("path", json!("f.txt")),
                ("offset", json!(2)),
                ("limit", json!(2)),
            ]))
            .await
            .unwrap();
        assert_eq!(read.output, "2: b\n3: c");
    }

    #[tokio::test]
    async fn test_write_creates_parent_dirs() {
        let temp = TempDir::new().unwrap();
        WriteFileTool::new(temp.path().to_path_buf())
            .execute(args(&[("path", json!("a/b/c/deep.txt")), ("content", json!("deep"))]))
            .await
            .unwrap();
        let content = std::fs::read_to_string(temp.path().join("a/b/c/deep.txt")).unwrap();
        assert_eq!(content, "deep");
    }

    #[tokio::test]
    async fn test_read_nonexistent_file_is_soft_error() {
        let temp = TempDir::new().unwrap();
        let result = ReadFileTool::new(temp.path().to_path_buf())
            .execute(args(&[("path", json!("nope.txt"))]))
            .await
            .unwrap();
        assert_eq!(result.error.as_deref(), Some("File not found: nope.txt"));
    }

    #[tokio::test]
    async fn test_edit_first_and_all() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("e.txt");
        std::fs::write(&file, "foo foo foo").unwrap();
        let tool = EditFileTool::new(temp.path().to_path_buf());

        let once = tool
            .execute(args(&[
                ("path", json!("e.txt")),
                ("old_string", json!("foo")),
                ("new_string", json!("bar")),
            ]))
            .await
            .unwrap();
        assert_eq!(once.output, "Replaced 1 occurrence(s) in e.txt");
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "bar foo foo");

        let all = tool
            .execute(args(&[
                ("path", json!("e.txt")),
                ("old_string", json!("foo")),
                ("new_string", json!("baz")),
                ("replace_all", json!(true)),
            ]))
            .await
            .unwrap();
        assert_eq!(all.output, "Replaced 2 occurrence(s) in e.txt");
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "bar baz baz");
    }

    #[tokio::test]
    async fn test_edit_missing_old_string() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("e.txt"), "hello").unwrap();

        let result = EditFileTool::new(temp.path().to_path_buf())
            .execute(args(&[
                ("path", json!("e.txt")),
                ("old_string", json!("absent")),
                ("new_string", json!("x")),
            ]))
            .await
            .unwrap();
        assert_eq!(result.error.as_deref(), Some("old_string not found in file"));
    }

    #[tokio::test]
    async fn test_missing_path_parameter() {
        let temp = TempDir::new().unwrap();
        let err = ReadFileTool::new(temp.path().to_path_buf())
            .execute(ToolArgs::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::MissingParameter(_)));
    }
}
