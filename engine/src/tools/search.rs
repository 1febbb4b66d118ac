//! Search capabilities: `glob` and `grep`
//!
//! Both walk the tree with `walkdir` on a blocking thread and skip VCS and
//! dependency directories.

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use sdk::{object_schema, Capability, ToolArgs, ToolError, ToolResult};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use super::resolve_path;

const SKIP_DIRS: &[&str] = &[".git", "node_modules", "target", "__pycache__", ".venv"];
const MAX_GLOB_RESULTS: usize = 1000;
const MAX_GREP_FILES: usize = 100;
const MAX_GREP_MATCHES: usize = 200;
const MAX_LINE_CHARS: usize = 200;

/// Translate a shell glob into an anchored regex
///
/// `**/` matches zero or more directories, `*` and `?` never cross a `/`,
/// `{a,b}` is alternation. With `any_depth` the pattern may match at any
/// directory boundary, like a recursive glob.
pub fn glob_to_regex(pattern: &str, any_depth: bool) -> Result<Regex, regex::Error> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut re = String::from("^");
    if any_depth && !pattern.starts_with('/') {
        re.push_str("(?:.*/)?");
    }

    let mut i = 0;
    let mut in_group = false;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    re.push_str("(?:.*/)?");
                    i += 2;
                } else {
                    re.push_str(".*");
                    i += 1;
                }
            }
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            '{' => {
                in_group = true;
                re.push_str("(?:");
            }
            '}' if in_group => {
                in_group = false;
                re.push(')');
            }
            ',' if in_group => re.push('|'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    re.push('$');
    Regex::new(&re)
}

fn is_skipped(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIP_DIRS.contains(&name))
}

fn walk_files(root: &Path) -> impl Iterator<Item = DirEntry> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

async fn blocking<F>(f: F) -> Result<ToolResult, ToolError>
where
    F: FnOnce() -> ToolResult + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ToolError::Execution(format!("search task failed: {}", e)))
}

/// Recursive file name matching
#[derive(Debug)]
pub struct GlobTool {
    workspace: PathBuf,
}

impl GlobTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Capability for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern such as `**/*.rs`. Returns sorted relative paths."
    }

    fn parameter_schema(&self) -> Value {
        object_schema(
            vec![
                ("pattern", json!({"type": "string", "description": "Glob pattern"})),
                (
                    "path",
                    json!({"type": "string", "description": "Directory to search", "default": "."}),
                ),
            ],
            &["pattern"],
        )
    }

    async fn execute(&self, args: ToolArgs) -> Result<ToolResult, ToolError> {
        let pattern = args.param_str("pattern")?;
        let path = args.param_str_opt("path").unwrap_or_else(|| ".".to_string());
        let root = resolve_path(&self.workspace, &path);

        if !root.exists() {
            return Ok(ToolResult::err(format!("Path not found: {}", path)));
        }
        let matcher = glob_to_regex(&pattern, true)
            .map_err(|e| ToolError::InvalidParameter(format!("bad glob '{}': {}", pattern, e)))?;

        blocking(move || {
            let mut matches: Vec<String> = walk_files(&root)
                .map(|e| relative(&root, e.path()))
                .filter(|rel| matcher.is_match(rel))
                .collect();

            if matches.is_empty() {
                return ToolResult::ok(format!("No files matching '{}'", pattern));
            }
            matches.sort();
            let total = matches.len();
            matches.truncate(MAX_GLOB_RESULTS);
            let mut out = matches.join("\n");
            if total > MAX_GLOB_RESULTS {
                out.push_str(&format!("\n... ({} more)", total - MAX_GLOB_RESULTS));
            }
            ToolResult::ok(out)
        })
        .await
    }
}

/// Regex search over file contents
#[derive(Debug)]
pub struct GrepTool {
    workspace: PathBuf,
}

impl GrepTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Capability for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents with a regex. Returns `path:line: text` for each match."
    }

    fn parameter_schema(&self) -> Value {
        object_schema(
            vec![
                ("pattern", json!({"type": "string", "description": "Regular expression"})),
                (
                    "path",
                    json!({"type": "string", "description": "Directory to search", "default": "."}),
                ),
                (
                    "include",
                    json!({"type": "string", "description": "File name glob, e.g. *.py", "default": "*"}),
                ),
                (
                    "ignore_case",
                    json!({"type": "boolean", "description": "Case-insensitive match", "default": false}),
                ),
            ],
            &["pattern"],
        )
    }

    async fn execute(&self, args: ToolArgs) -> Result<ToolResult, ToolError> {
        let pattern = args.param_str("pattern")?;
        let path = args.param_str_opt("path").unwrap_or_else(|| ".".to_string());
        let include = args.param_str_opt("include").unwrap_or_else(|| "*".to_string());
        let ignore_case = args.param_bool_opt("ignore_case").unwrap_or(false);
        let root = resolve_path(&self.workspace, &path);

        if !root.exists() {
            return Ok(ToolResult::err(format!("Path not found: {}", path)));
        }
        let Ok(regex) = RegexBuilder::new(&pattern)
            .case_insensitive(ignore_case)
            .build()
        else {
            return Ok(ToolResult::err(format!("Invalid regex: {}", pattern)));
        };
        let name_filter = glob_to_regex(&include, false)
            .map_err(|e| ToolError::InvalidParameter(format!("bad include '{}': {}", include, e)))?;

        blocking(move || {
            let files = walk_files(&root)
                .filter(|e| {
                    e.file_name()
                        .to_str()
                        .is_some_and(|n| name_filter.is_match(n))
                })
                .take(MAX_GREP_FILES);

            let mut matches = Vec::new();
            'files: for entry in files {
                // Binary or unreadable files are skipped
                let Ok(bytes) = std::fs::read(entry.path()) else {
                    continue;
                };
                let content = String::from_utf8_lossy(&bytes);
                let rel = relative(&root, entry.path());
                for (i, line) in content.lines().enumerate() {
                    if regex.is_match(line) {
                        let text: String = line.trim().chars().take(MAX_LINE_CHARS).collect();
                        matches.push(format!("{}:{}: {}", rel, i + 1, text));
                        if matches.len() >= MAX_GREP_MATCHES {
                            break 'files;
                        }
                    }
                }
            }

            if matches.is_empty() {
                ToolResult::ok(format!("No matches found for '{}'", pattern))
            } else {
                ToolResult::ok(matches.join("\n"))
            }
        })
        .await
    }
}
