//! Shell capability
//!
//! Runs a command through `sh -c` in the workspace (or a sub-directory of
//! it). There is no allowlist: the capability has the privileges of the
//! process running the agent.

use async_trait::async_trait;
use sdk::{object_schema, Capability, ToolArgs, ToolError, ToolResult};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::resolve_path;

/// Characters kept from each of stdout and stderr
pub(crate) const MAX_STREAM_CHARS: usize = 30_000;

#[derive(Debug)]
pub struct ShellTool {
    workspace: PathBuf,
    timeout: Duration,
}

impl ShellTool {
    pub fn new(workspace: PathBuf, timeout: Duration) -> Self {
        Self { workspace, timeout }
    }
}

#[async_trait]
impl Capability for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command. Returns stdout, stderr and the exit code."
    }

    fn parameter_schema(&self) -> Value {
        object_schema(
            vec![
                ("command", json!({"type": "string", "description": "Shell command to execute"})),
                (
                    "timeout",
                    json!({"type": "integer", "description": "Timeout in seconds", "default": self.timeout.as_secs()}),
                ),
                ("workdir", json!({"type": "string", "description": "Working directory"})),
            ],
            &["command"],
        )
    }

    async fn execute(&self, args: ToolArgs) -> Result<ToolResult, ToolError> {
        let command = args.param_str("command")?;
        if command.trim().is_empty() {
            return Err(ToolError::InvalidParameter("Empty command".to_string()));
        }
        let timeout = args
            .param_i64_opt("timeout")
            .filter(|t| *t > 0)
            .map(|t| Duration::from_secs(t as u64))
            .unwrap_or(self.timeout);
        let cwd = match args.param_str_opt("workdir") {
            Some(dir) => resolve_path(&self.workspace, &dir),
            None => self.workspace.clone(),
        };
        let is_dir = tokio::fs::metadata(&cwd)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Ok(ToolResult::err(format!(
                "Working directory not found: {}",
                cwd.display()
            )));
        }

        info!("Executing shell command: {}", command);

        let mut process = Command::new("sh");
        process.arg("-c").arg(&command).current_dir(&cwd);
        run_captured(process, timeout, "Command").await
    }
}

/// Spawn `command`, wait under `timeout` and fold its output into a result
///
/// Each stream is capped at [`MAX_STREAM_CHARS`]. A timeout or a non-zero
/// exit is a soft error prefixed with `label`.
pub(crate) async fn run_captured(
    mut command: Command,
    timeout: Duration,
    label: &str,
) -> Result<ToolResult, ToolError> {
    let child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            ToolError::Execution(format!("Failed to start {}: {}", label.to_lowercase(), e))
        })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => output?,
        Err(_) => {
            let msg = format!("{} timed out after {}s", label, timeout.as_secs());
            warn!("{}", msg);
            return Ok(ToolResult::err(msg));
        }
    };

    let stderr = cap_stream(&output.stderr);
    let code = output.status.code().unwrap_or(-1);

    let mut text = cap_stream(&output.stdout);
    if !stderr.trim().is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str("[stderr]\n");
        text.push_str(&stderr);
    }

    if output.status.success() {
        debug!("{} succeeded", label);
        Ok(ToolResult::ok(text))
    } else {
        warn!("{} exited with code {}", label, code);
        Ok(ToolResult::with_error(
            text,
            format!("{} exited with code {}", label, code),
        ))
    }
}

/// Lossy UTF-8, cut after [`MAX_STREAM_CHARS`] characters
fn cap_stream(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let total = text.chars().count();
    if total <= MAX_STREAM_CHARS {
        return text.into_owned();
    }
    let mut capped: String = text.chars().take(MAX_STREAM_CHARS).collect();
    capped.push_str(&format!(
        "\n... ({} more characters truncated)\n",
        total - MAX_STREAM_CHARS
    ));
    capped
}
