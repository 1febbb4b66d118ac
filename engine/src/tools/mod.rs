//! Capability registry and built-in capabilities
//!
//! The registry is a fixed name → capability map built once per session and
//! shared read-only afterwards. It never inspects arguments or results; side
//! effects belong entirely to each capability.

pub mod code;
pub mod filesystem;
pub mod git;
pub mod search;
pub mod terminal;

pub use code::{ExecuteCodeTool, Language};
pub use filesystem::{EditFileTool, ReadFileTool, WriteFileTool};
pub use git::{GitCommand, GitTool};
pub use search::{GlobTool, GrepTool};
pub use terminal::ShellTool;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sdk::{Capability, ToolArgs, ToolError, ToolResult, ToolSchema};
use tracing::{debug, warn};

use crate::config::Config;
use crate::sandbox::{CallObserver, OrchestrateTool};

/// Registry failures
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Duplicate capability name: {0}")]
    DuplicateName(String),

    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    #[error("{name} failed: {source}")]
    Execution {
        name: String,
        #[source]
        source: ToolError,
    },
}

impl From<RegistryError> for sdk::EngineError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::DuplicateName(name) => Self::DuplicateCapability(name),
            RegistryError::UnknownCapability(name) => Self::ToolNotFound(name),
            other => Self::ToolError(other.to_string()),
        }
    }
}

/// Name → capability map, in registration order
#[derive(Clone, Default)]
pub struct ToolRegistry {
    capabilities: Vec<Arc<dyn Capability>>,
    index: HashMap<String, usize>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("capabilities", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability; names must be unique
    pub fn register(&mut self, capability: Arc<dyn Capability>) -> Result<(), RegistryError> {
        let name = capability.name().to_string();
        if self.index.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        debug!("Registered capability '{}'", name);
        self.index.insert(name, self.capabilities.len());
        self.capabilities.push(capability);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Capability>> {
        self.index.get(name).map(|&i| &self.capabilities[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Capability names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.capabilities.iter().map(|c| c.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Schemas for inclusion in a completion request, in registration order
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.capabilities.iter().map(|c| c.schema()).collect()
    }

    /// Execute a capability by name
    ///
    /// A soft failure reported by the capability comes back as `Ok` with
    /// `ToolResult.error` set; only unknown names and hard faults are `Err`.
    pub async fn dispatch(&self, name: &str, args: ToolArgs) -> Result<ToolResult, RegistryError> {
        let Some(capability) = self.get(name) else {
            warn!("Unknown tool requested: {}", name);
            return Err(RegistryError::UnknownCapability(name.to_string()));
        };

        debug!("Dispatching tool '{}' with {} argument(s)", name, args.len());
        let started = Instant::now();
        let result = capability
            .execute(args)
            .await
            .map_err(|source| RegistryError::Execution {
                name: name.to_string(),
                source,
            });
        debug!(
            "Tool '{}' finished in {:?} (ok: {})",
            name,
            started.elapsed(),
            matches!(result, Ok(ref r) if r.success())
        );
        result
    }
}

/// Registry of the built-in file, shell, code, search and git capabilities
pub fn builtin_registry(config: &Config) -> Result<ToolRegistry, RegistryError> {
    let workspace = config.core.workspace.clone();
    let shell_timeout = Duration::from_secs(config.tools.shell_timeout_secs);

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(ReadFileTool::new(workspace.clone())))?;
    registry.register(Arc::new(WriteFileTool::new(workspace.clone())))?;
    registry.register(Arc::new(EditFileTool::new(workspace.clone())))?;
    registry.register(Arc::new(ShellTool::new(workspace.clone(), shell_timeout)))?;
    registry.register(Arc::new(ExecuteCodeTool::new(workspace.clone())))?;
    registry.register(Arc::new(GlobTool::new(workspace.clone())))?;
    registry.register(Arc::new(GrepTool::new(workspace.clone())))?;
    for command in GitCommand::ALL {
        registry.register(Arc::new(GitTool::new(command, workspace.clone())))?;
    }
    Ok(registry)
}

/// Registry handed to the agent loop
///
/// Always contains `orchestrate`, whose scripts reach every built-in. With
/// `tools.direct` the built-ins are also exposed to the model directly.
pub fn session_registry(
    config: &Config,
    call_observer: Option<Arc<dyn CallObserver>>,
) -> Result<ToolRegistry, RegistryError> {
    let builtins = Arc::new(builtin_registry(config)?);
    let timeout = Duration::from_secs(config.agent.orchestration_timeout_secs);

    let mut orchestrate = OrchestrateTool::new(Arc::clone(&builtins), timeout);
    if let Some(observer) = call_observer {
        orchestrate = orchestrate.with_observer(observer);
    }

    let mut registry = if config.tools.direct {
        (*builtins).clone()
    } else {
        ToolRegistry::new()
    };
    registry.register(Arc::new(orchestrate))?;
    Ok(registry)
}

/// Resolve a capability path argument against the workspace
pub(crate) fn resolve_path(workspace: &Path, path: &str) -> PathBuf {
    let target = Path::new(path);
    if target.is_absolute() {
        target.to_path_buf()
    } else {
        workspace.join(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Fixed(&'static str);

    #[async_trait]
    impl Capability for Fixed {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "fixed"
        }

        fn parameter_schema(&self) -> Value {
            sdk::object_schema(vec![("x", json!({"type": "integer"}))], &[])
        }

        async fn execute(&self, args: ToolArgs) -> Result<ToolResult, ToolError> {
            match args.param_i64_opt("x") {
                Some(x) if x < 0 => Err(ToolError::Execution("negative".into())),
                Some(x) => Ok(ToolResult::ok(format!("{}:{}", self.0, x))),
                None => Ok(ToolResult::err("x missing")),
            }
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Fixed("a"))).unwrap();
        registry.register(Arc::new(Fixed("b"))).unwrap();
        registry
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = registry();
        let err = registry.register(Arc::new(Fixed("a"))).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(ref n) if n == "a"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_schemas_in_registration_order() {
        let names: Vec<String> = registry().schemas().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_dispatch_known() {
        let result = registry()
            .dispatch("b", ToolArgs::new().with_param("x", json!(3)))
            .await
            .unwrap();
        assert_eq!(result, ToolResult::ok("b:3"));
    }

    #[tokio::test]
    async fn test_dispatch_soft_failure_is_ok() {
        let result = registry().dispatch("a", ToolArgs::new()).await.unwrap();
        assert_eq!(result.error.as_deref(), Some("x missing"));
    }

    #[tokio::test]
    async fn test_dispatch_hard_failure() {
        let err = registry()
            .dispatch("a", ToolArgs::new().with_param("x", json!(-1)))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "a failed: Execution failed: negative");
    }

    #[tokio::test]
    async fn test_dispatch_unknown() {
        let err = registry().dispatch("zzz", ToolArgs::new()).await.unwrap_err();
        assert!(matches!(err, RegistryError::UnknownCapability(ref n) if n == "zzz"));
    }

    #[test]
    fn test_builtin_registry_names() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.core.workspace = temp.path().to_path_buf();

        let registry = builtin_registry(&config).unwrap();
        assert_eq!(
            registry.names(),
            vec![
                "read_file",
                "write_file",
                "edit_file",
                "shell",
                "execute_code",
                "glob",
                "grep",
                "git_status",
                "git_diff",
                "git_log",
                "git_add",
                "git_commit",
                "git_branch",
            ]
        );
    }

    #[test]
    fn test_session_registry_respects_direct_flag() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.core.workspace = temp.path().to_path_buf();

        let direct = session_registry(&config, None).unwrap();
        assert!(direct.contains("read_file"));
        assert!(direct.contains("orchestrate"));

        config.tools.direct = false;
        let scripted = session_registry(&config, None).unwrap();
        assert_eq!(scripted.names(), vec!["orchestrate"]);
    }

    #[test]
    fn test_resolve_path() {
        let ws = Path::new("/work");
        assert_eq!(resolve_path(ws, "a/b.txt"), PathBuf::from("/work/a/b.txt"));
        assert_eq!(resolve_path(ws, "/etc/hosts"), PathBuf::from("/etc/hosts"));
    }
}
