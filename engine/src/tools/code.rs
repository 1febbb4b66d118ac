//! Code execution capability
//!
//! Runs a Python or JavaScript snippet with the host interpreter
//! (`python3 -c` / `node -e`) in the workspace, with the same process
//! handling as `shell`.

use async_trait::async_trait;
use sdk::{object_schema, Capability, ToolArgs, ToolError, ToolResult};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::info;

use super::terminal::run_captured;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Languages `execute_code` accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Python,
    JavaScript,
}

impl Language {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "python" | "python3" | "py" => Some(Self::Python),
            "javascript" | "js" | "node" => Some(Self::JavaScript),
            _ => None,
        }
    }

    fn command(self, code: &str) -> Command {
        let (program, flag) = match self {
            Self::Python => ("python3", "-c"),
            Self::JavaScript => ("node", "-e"),
        };
        let mut command = Command::new(program);
        command.arg(flag).arg(code);
        command
    }
}

#[derive(Debug)]
pub struct ExecuteCodeTool {
    workspace: PathBuf,
}

impl ExecuteCodeTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Capability for ExecuteCodeTool {
    fn name(&self) -> &str {
        "execute_code"
    }

    fn description(&self) -> &str {
        "Execute Python or JavaScript code in the workspace. Returns stdout, stderr and the exit code."
    }

    fn parameter_schema(&self) -> Value {
        object_schema(
            vec![
                ("code", json!({"type": "string", "description": "Code to execute"})),
                (
                    "language",
                    json!({"type": "string", "enum": ["python", "javascript"], "default": "python"}),
                ),
                (
                    "timeout",
                    json!({"type": "integer", "description": "Timeout in seconds", "default": DEFAULT_TIMEOUT_SECS}),
                ),
            ],
            &["code"],
        )
    }

    async fn execute(&self, args: ToolArgs) -> Result<ToolResult, ToolError> {
        let code = args.param_str("code")?;
        let requested = args
            .param_str_opt("language")
            .unwrap_or_else(|| "python".to_string());
        let Some(language) = Language::parse(&requested) else {
            return Ok(ToolResult::err(format!(
                "Unsupported language: {} (expected python or javascript)",
                requested
            )));
        };
        let timeout = Duration::from_secs(
            args.param_i64_opt("timeout")
                .filter(|t| *t > 0)
                .map(|t| t as u64)
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        );

        info!("Executing {:?} code ({} chars)", language, code.len());

        let mut command = language.command(&code);
        command.current_dir(&self.workspace);
        run_captured(command, timeout, "Code").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn python(code: &str) -> ToolArgs {
        ToolArgs::new().with_param("code", json!(code))
    }

    #[test]
    fn test_language_aliases() {
        assert_eq!(Language::parse("Python"), Some(Language::Python));
        assert_eq!(Language::parse("js"), Some(Language::JavaScript));
        assert_eq!(Language::parse("ruby"), None);
    }

    #[tokio::test]
    async fn test_python_runs_in_workspace() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("data.txt"), "42").unwrap();
        let tool = ExecuteCodeTool::new(temp.path().to_path_buf());

        let result = tool
            .execute(python("print(int(open('data.txt').read()) + 1)"))
            .await
            .unwrap();
        assert!(result.success(), "{:?}", result.error);
        assert_eq!(result.output, "43\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_soft_error() {
        let temp = TempDir::new().unwrap();
        let tool = ExecuteCodeTool::new(temp.path().to_path_buf());

        let result = tool
            .execute(python("import sys\nprint('partial')\nsys.exit(2)"))
            .await
            .unwrap();
        assert_eq!(result.error.as_deref(), Some("Code exited with code 2"));
        assert!(result.output.contains("partial"));
    }

    #[tokio::test]
    async fn test_unknown_language() {
        let temp = TempDir::new().unwrap();
        let tool = ExecuteCodeTool::new(temp.path().to_path_buf());

        let result = tool
            .execute(python("puts 1").with_param("language", json!("ruby")))
            .await
            .unwrap();
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .starts_with("Unsupported language: ruby"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let temp = TempDir::new().unwrap();
        let tool = ExecuteCodeTool::new(temp.path().to_path_buf());

        let result = tool
            .execute(python("import time\ntime.sleep(5)").with_param("timeout", json!(1)))
            .await
            .unwrap();
        assert_eq!(result.error.as_deref(), Some("Code timed out after 1s"));
    }
}
