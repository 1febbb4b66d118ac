//! Git capabilities
//!
//! One capability per subcommand, all backed by the `git` binary running in
//! the workspace. A missing `git` binary is a soft error.

use async_trait::async_trait;
use sdk::{object_schema, Capability, ToolArgs, ToolError, ToolResult};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Supported git subcommands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitCommand {
    Status,
    Diff,
    Log,
    Add,
    Commit,
    Branch,
}

impl GitCommand {
    pub const ALL: [GitCommand; 6] = [
        GitCommand::Status,
        GitCommand::Diff,
        GitCommand::Log,
        GitCommand::Add,
        GitCommand::Commit,
        GitCommand::Branch,
    ];

    fn name(self) -> &'static str {
        match self {
            Self::Status => "git_status",
            Self::Diff => "git_diff",
            Self::Log => "git_log",
            Self::Add => "git_add",
            Self::Commit => "git_commit",
            Self::Branch => "git_branch",
        }
    }

    fn description(self) -> &'static str {
        match self {
            Self::Status => "Show the working tree status (porcelain format).",
            Self::Diff => "Show changes against a target revision.",
            Self::Log => "Show recent commits.",
            Self::Add => "Stage files for commit.",
            Self::Commit => "Create a commit with the staged changes.",
            Self::Branch => "List all branches.",
        }
    }

    fn schema(self) -> Value {
        match self {
            Self::Status | Self::Branch => object_schema(vec![], &[]),
            Self::Diff => object_schema(
                vec![(
                    "target",
                    json!({"type": "string", "description": "Revision to diff against", "default": "HEAD"}),
                )],
                &[],
            ),
            Self::Log => object_schema(
                vec![
                    (
                        "oneline",
                        json!({"type": "boolean", "description": "One line per commit", "default": false}),
                    ),
                    (
                        "limit",
                        json!({"type": "integer", "description": "Number of commits", "default": 10}),
                    ),
                ],
                &[],
            ),
            Self::Add => object_schema(
                vec![(
                    "files",
                    json!({"type": "string", "description": "Paths to stage", "default": "."}),
                )],
                &[],
            ),
            Self::Commit => object_schema(
                vec![("message", json!({"type": "string", "description": "Commit message"}))],
                &["message"],
            ),
        }
    }

    /// Arguments passed to `git`
    fn argv(self, args: &ToolArgs) -> Result<Vec<String>, ToolError> {
        let argv = match self {
            Self::Status => vec!["status".into(), "--porcelain".into()],
            Self::Diff => vec![
                "diff".into(),
                args.param_str_opt("target").unwrap_or_else(|| "HEAD".into()),
            ],
            Self::Log => {
                let limit = args.param_i64_opt("limit").unwrap_or(10).max(1);
                let mut argv = vec!["log".to_string(), format!("-{}", limit)];
                if args.param_bool_opt("oneline").unwrap_or(false) {
                    argv.push("--oneline".into());
                }
                argv
            }
            Self::Add => {
                let files = args.param_str_opt("files").unwrap_or_else(|| ".".into());
                let mut argv = vec!["add".to_string()];
                argv.extend(files.split_whitespace().map(String::from));
                argv
            }
            Self::Commit => vec!["commit".into(), "-m".into(), args.param_str("message")?],
            Self::Branch => vec!["branch".into(), "-a".into()],
        };
        Ok(argv)
    }

    // Output shown when git succeeds but prints nothing
    fn empty_output(self, args: &ToolArgs) -> String {
        match self {
            Self::Status => "Working tree clean".into(),
            Self::Diff => "No changes".into(),
            Self::Log => "No commits".into(),
            Self::Add => format!(
                "Staged: {}",
                args.param_str_opt("files").unwrap_or_else(|| ".".into())
            ),
            Self::Commit => "Committed".into(),
            Self::Branch => "No branches".into(),
        }
    }
}

/// A single git subcommand exposed as a capability
#[derive(Debug)]
pub struct GitTool {
    command: GitCommand,
    workspace: PathBuf,
}

impl GitTool {
    pub fn new(command: GitCommand, workspace: PathBuf) -> Self {
        Self { command, workspace }
    }
}

#[async_trait]
impl Capability for GitTool {
    fn name(&self) -> &str {
        self.command.name()
    }

    fn description(&self) -> &str {
        self.command.description()
    }

    fn parameter_schema(&self) -> Value {
        self.command.schema()
    }

    async fn execute(&self, args: ToolArgs) -> Result<ToolResult, ToolError> {
        let argv = self.command.argv(&args)?;
        info!("Running git {}", argv.join(" "));

        let output = match Command::new("git")
            .args(&argv)
            .current_dir(&self.workspace)
            .stdin(Stdio::null())
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ToolResult::with_error("Git not installed", "Git not found"));
            }
            Err(e) => return Err(e.into()),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        debug!("git exited with {}", output.status);

        if !output.status.success() {
            let msg = if stderr.is_empty() {
                format!("git exited with {}", output.status)
            } else {
                stderr
            };
            return Ok(ToolResult::with_error(stdout, msg));
        }

        if stdout.trim().is_empty() {
            Ok(ToolResult::ok(self.command.empty_output(&args)))
        } else {
            Ok(ToolResult::ok(stdout))
        }
    }
}
