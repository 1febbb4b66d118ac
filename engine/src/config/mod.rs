//! Configuration management
//!
//! This module handles loading, validation, and management of the Loom configuration.
//! Configuration is stored in TOML format.
//!
//! # Lookup Order
//!
//! 1. An explicit `--config` path
//! 2. `./loom.toml`
//! 3. `./.loom.toml`
//! 4. `~/.loom/config.toml` (written with defaults when nothing else exists)
//!
//! # Configuration Sections
//!
//! - **core**: Workspace path, log level
//! - **llm**: Default model and provider endpoints/pricing
//! - **agent**: Turn limit, orchestration timeout, agent types, instruction files
//! - **tools**: Direct exposure of built-ins, shell timeout
//!
//! # Path Expansion
//!
//! The configuration system automatically:
//! - Expands ~ to the user's home directory
//! - Canonicalizes the workspace, creating it if it doesn't exist
//! - Resolves instruction files relative to the config file
//!
//! There is no process-wide cache. A [`ConfigStore`] owns the loaded
//! configuration and is passed to whoever needs it.
//!
//! # Examples
//!
//! ```no_run
//! use loom_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Workspace: {:?}", config.core.workspace);
//! println!("Default model: {}", config.llm.default_model);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use crate::usage::Pricing;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Completion backends
    #[serde(default)]
    pub llm: LLMConfig,

    /// Agent loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Capability exposure
    #[serde(default)]
    pub tools: ToolsConfig,

    /// File this configuration was loaded from
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Workspace directory path (supports ~ expansion)
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Model used when neither an agent type nor `--model` picks one,
    /// in `provider/model` form
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Named provider endpoints
    #[serde(default = "default_providers")]
    pub providers: BTreeMap<String, ProviderConfig>,
}

/// Wire protocol spoken by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible `/chat/completions`
    #[serde(rename = "openai")]
    OpenAI,
    /// Anthropic `/messages`
    Anthropic,
    /// Ollama native `/api/chat`
    Ollama,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAI => write!(f, "openai"),
            Self::Anthropic => write!(f, "anthropic"),
            Self::Ollama => write!(f, "ollama"),
        }
    }
}

/// A single provider endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Wire protocol
    #[serde(default = "default_kind")]
    pub kind: ProviderKind,

    /// Base URL, without the endpoint path
    pub base_url: String,

    /// API key; falls back to the `<NAME>_API_KEY` environment variable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Dollars per 1000 prompt tokens
    #[serde(default)]
    pub input_cost_per_1k: f64,

    /// Dollars per 1000 completion tokens
    #[serde(default)]
    pub output_cost_per_1k: f64,
}

impl ProviderConfig {
    pub fn pricing(&self) -> Pricing {
        Pricing::new(self.input_cost_per_1k, self.output_cost_per_1k)
    }
}

/// Agent loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Completion requests allowed per run
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Wall-clock limit for one orchestration script
    #[serde(default = "default_orchestration_timeout")]
    pub orchestration_timeout_secs: u64,

    /// Files appended to the system prompt (relative to the config file)
    #[serde(default)]
    pub instruction_files: Vec<PathBuf>,

    /// Named agent personas
    #[serde(default = "default_agent_types")]
    pub types: BTreeMap<String, AgentTypeConfig>,
}

/// A named agent persona
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentTypeConfig {
    /// Model override in `provider/model` form
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Extra instructions for the system prompt
    #[serde(default)]
    pub instructions: String,
}

/// Capability exposure configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Expose built-ins to the model directly, next to `orchestrate`
    #[serde(default = "default_true")]
    pub direct: bool,

    /// Default timeout for the `shell` capability
    #[serde(default = "default_shell_timeout")]
    pub shell_timeout_secs: u64,
}

/// Outcome of model resolution
#[derive(Debug, Clone)]
pub struct ModelSelection {
    /// Provider name as configured
    pub provider: String,
    /// Model name as the backend expects it
    pub model: String,
    /// Provider endpoint
    pub endpoint: ProviderConfig,
    /// API key from config or environment
    pub api_key: Option<String>,
    /// Agent-type instructions, if an agent type was used
    pub instructions: Option<String>,
}

// Default value functions
fn default_workspace() -> PathBuf {
    PathBuf::from(".")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_model() -> String {
    "ollama/llama3.1:8b".to_string()
}

fn default_kind() -> ProviderKind {
    ProviderKind::OpenAI
}

fn default_max_turns() -> u32 {
    20
}

fn default_orchestration_timeout() -> u64 {
    120
}

fn default_shell_timeout() -> u64 {
    120
}

fn default_providers() -> BTreeMap<String, ProviderConfig> {
    let mut providers = BTreeMap::new();
    providers.insert(
        "ollama".to_string(),
        ProviderConfig {
            kind: ProviderKind::Ollama,
            base_url: "http://localhost:11434".to_string(),
            api_key: None,
            input_cost_per_1k: 0.0,
            output_cost_per_1k: 0.0,
        },
    );
    providers.insert(
        "openai".to_string(),
        ProviderConfig {
            kind: ProviderKind::OpenAI,
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            input_cost_per_1k: 0.00015,
            output_cost_per_1k: 0.0006,
        },
    );
    providers.insert(
        "anthropic".to_string(),
        ProviderConfig {
            kind: ProviderKind::Anthropic,
            base_url: "https://api.anthropic.com/v1".to_string(),
            api_key: None,
            input_cost_per_1k: 0.003,
            output_cost_per_1k: 0.015,
        },
    );
    providers
}

fn default_agent_types() -> BTreeMap<String, AgentTypeConfig> {
    let mut types = BTreeMap::new();
    types.insert(
        "explore".to_string(),
        AgentTypeConfig {
            model: None,
            instructions: "Investigate and report. Read and search freely; do not modify files."
                .to_string(),
        },
    );
    types.insert(
        "code".to_string(),
        AgentTypeConfig {
            model: None,
            instructions: "Make the requested change with minimal edits, then verify it.".to_string(),
        },
    );
    types
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            log_level: default_log_level(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            providers: default_providers(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            orchestration_timeout_secs: default_orchestration_timeout(),
            instruction_files: Vec::new(),
            types: default_agent_types(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            direct: true,
            shell_timeout_secs: default_shell_timeout(),
        }
    }
}

impl Config {
    /// Load configuration from the first file found in the lookup order
    ///
    /// If no configuration file exists, writes a default one to
    /// `~/.loom/config.toml`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails (invalid paths, unknown provider, bad log level)
    pub fn load_or_create() -> Result<Self, EngineError> {
        for candidate in ["loom.toml", ".loom.toml"] {
            let path = PathBuf::from(candidate);
            if path.is_file() {
                return Self::load_from_path(&path);
            }
        }

        let config_path = Self::default_config_path()?;
        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load from an explicit path, or fall back to the lookup order
    pub fn load(explicit: Option<&Path>) -> Result<Self, EngineError> {
        match explicit {
            Some(path) => Self::load_from_path(path),
            None => Self::load_or_create(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config = Self::from_toml(&contents)?;
        config.source = Some(path.to_path_buf());

        // Validate and process configuration
        config.validate_and_process()?;

        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse configuration text without validating it
    pub fn from_toml(contents: &str) -> Result<Self, EngineError> {
        toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default();

        // Serialize before processing so the file keeps the portable paths
        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;
        info!("Wrote default configuration to {}", path.display());

        config.source = Some(path.to_path_buf());
        config.validate_and_process()?;
        Ok(config)
    }

    /// Get the default configuration file path (~/.loom/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".loom").join("config.toml"))
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates the log level, default model and limits
    /// - Expands ~ in paths
    /// - Canonicalizes the workspace, creating it if needed
    /// - Resolves instruction files against the config file's directory
    pub fn validate_and_process(&mut self) -> Result<(), EngineError> {
        // Validate log level
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        // Validate default model
        let (provider, _) = split_model(&self.llm.default_model)?;
        if !self.llm.providers.contains_key(provider) {
            return Err(EngineError::Config(format!(
                "Unknown provider '{}' in default_model",
                provider
            )));
        }

        for (name, agent_type) in &self.agent.types {
            if let Some(model) = &agent_type.model {
                split_model(model).map_err(|e| {
                    EngineError::Config(format!("agent type '{}': {}", name, e))
                })?;
            }
        }

        // Validate limits
        if self.agent.max_turns == 0 {
            return Err(EngineError::Config("max_turns must be at least 1".to_string()));
        }
        if self.agent.orchestration_timeout_secs == 0 || self.tools.shell_timeout_secs == 0 {
            return Err(EngineError::Config("timeouts must be greater than 0".to_string()));
        }

        // Expand and validate workspace path
        self.core.workspace = expand_path(&self.core.workspace)?;
        self.core.workspace = canonicalize_or_create(&self.core.workspace)?;

        // Verify workspace is a directory
        if !self.core.workspace.is_dir() {
            return Err(EngineError::Config(format!(
                "Workspace path is not a directory: {:?}",
                self.core.workspace
            )));
        }

        // Instruction files are relative to the config file
        let base = self
            .source
            .as_ref()
            .and_then(|p| p.parent())
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let mut files = Vec::with_capacity(self.agent.instruction_files.len());
        for file in &self.agent.instruction_files {
            let expanded = expand_path(file)?;
            files.push(if expanded.is_absolute() {
                expanded
            } else {
                base.join(expanded)
            });
        }
        self.agent.instruction_files = files;

        Ok(())
    }

    /// Pick provider, model and instructions for a run
    ///
    /// Priority: agent type's model, then the explicit override, then
    /// `default_model`. An unknown agent type falls through with a warning.
    pub fn resolve_model(
        &self,
        agent_type: Option<&str>,
        model_override: Option<&str>,
    ) -> Result<ModelSelection, EngineError> {
        let persona = agent_type.and_then(|name| {
            let found = self.agent.types.get(name);
            if found.is_none() {
                warn!("Unknown agent type '{}', using defaults", name);
            }
            found
        });

        let spec = persona
            .and_then(|p| p.model.as_deref())
            .or(model_override)
            .unwrap_or(&self.llm.default_model);
        let (provider, model) = split_model(spec)?;

        let endpoint = self
            .llm
            .providers
            .get(provider)
            .cloned()
            .ok_or_else(|| EngineError::Config(format!("Unknown provider: {}", provider)))?;

        let api_key = endpoint
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var(api_key_env_var(provider)).ok());

        Ok(ModelSelection {
            provider: provider.to_string(),
            model: model.to_string(),
            endpoint,
            api_key,
            instructions: persona
                .map(|p| p.instructions.clone())
                .filter(|i| !i.is_empty()),
        })
    }

    /// Concatenated contents of the configured instruction files
    ///
    /// Unreadable files are skipped with a warning.
    pub fn load_instructions(&self) -> Vec<String> {
        self.agent
            .instruction_files
            .iter()
            .filter_map(|path| match fs::read_to_string(path) {
                Ok(text) => Some(text),
                Err(e) => {
                    warn!("Skipping instruction file {}: {}", path.display(), e);
                    None
                }
            })
            .collect()
    }
}

/// Split `provider/model` on the first `/`
///
/// Model names may themselves contain slashes (`together/meta-llama/Llama-3`).
pub fn split_model(spec: &str) -> Result<(&str, &str), EngineError> {
    match spec.split_once('/') {
        Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
            Ok((provider, model))
        }
        _ => Err(EngineError::Config(format!(
            "Invalid model format: {}. Expected 'provider/model'",
            spec
        ))),
    }
}

/// Environment variable holding a provider's API key
pub fn api_key_env_var(provider: &str) -> String {
    format!("{}_API_KEY", provider.to_uppercase().replace('-', "_"))
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

/// Canonicalize path, creating it if it doesn't exist
fn canonicalize_or_create(path: &Path) -> Result<PathBuf, EngineError> {
    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| {
            EngineError::Config(format!("Failed to create directory {:?}: {}", path, e))
        })?;
    }

    path.canonicalize()
        .map_err(|e| EngineError::PathCanonicalization(path.to_path_buf(), e.to_string()))
}

/// Owner of the loaded configuration
///
/// Replaces a module-level cache: load once, hand out shared snapshots,
/// and drop or refresh explicitly.
#[derive(Debug, Default)]
pub struct ConfigStore {
    explicit: Option<PathBuf>,
    cached: RwLock<Option<Arc<Config>>>,
}

impl ConfigStore {
    /// Store that loads lazily from `explicit` or the lookup order
    pub fn new(explicit: Option<PathBuf>) -> Self {
        Self {
            explicit,
            cached: RwLock::new(None),
        }
    }

    /// Store seeded with an already-loaded configuration
    pub fn from_config(config: Config) -> Self {
        Self {
            explicit: config.source.clone(),
            cached: RwLock::new(Some(Arc::new(config))),
        }
    }

    /// Current configuration, loading it on first use
    pub fn get(&self) -> Result<Arc<Config>, EngineError> {
        if let Some(config) = self
            .cached
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            return Ok(Arc::clone(config));
        }
        self.reload()
    }

    /// Drop the cached configuration; the next `get` reads from disk
    pub fn invalidate(&self) {
        *self.cached.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Read the configuration from disk again
    pub fn reload(&self) -> Result<Arc<Config>, EngineError> {
        let config = Arc::new(Config::load(self.explicit.as_deref())?);
        *self.cached.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&config));
        Ok(config)
    }

    /// File the current configuration came from
    pub fn source(&self) -> Option<PathBuf> {
        self.cached
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(|c| c.source.clone())
            .or_else(|| self.explicit.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("loom.toml");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.llm.default_model, "ollama/llama3.1:8b");
        assert_eq!(config.agent.max_turns, 20);
        assert_eq!(config.agent.orchestration_timeout_secs, 120);
        assert!(config.tools.direct);
        assert!(config.llm.providers.contains_key("ollama"));
        assert!(config.agent.types.contains_key("explore"));
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let expanded = expand_path(&PathBuf::from("~/test")).unwrap();
        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/absolute/path");
        assert_eq!(expand_path(&path).unwrap(), path);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_string = toml::to_string(&config).unwrap();

        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.llm.default_model, deserialized.llm.default_model);
        assert_eq!(
            deserialized.llm.providers["anthropic"].kind,
            ProviderKind::Anthropic
        );
    }

    #[test]
    fn test_load_from_path_processes_paths() {
        let temp = TempDir::new().unwrap();
        let ws = temp.path().join("ws");
        let body = format!(
            r#"
[core]
workspace = "{}"
log_level = "debug"

[agent]
max_turns = 5
instruction_files = ["AGENTS.md"]
"#,
            ws.display()
        );
        let path = write_config(temp.path(), &body);

        let config = Config::load_from_path(&path).unwrap();
        assert!(config.core.workspace.is_dir());
        assert_eq!(config.agent.max_turns, 5);
        assert_eq!(config.agent.instruction_files, vec![temp.path().join("AGENTS.md")]);
        assert_eq!(config.source.as_deref(), Some(path.as_path()));
        // Sections left out keep their defaults
        assert_eq!(config.agent.orchestration_timeout_secs, 120);
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let mut config = Config::default();
        config.core.log_level = "loud".to_string();
        let err = config.validate_and_process().unwrap_err();
        assert!(err.to_string().contains("Invalid log level"));
    }

    #[test]
    fn test_unknown_default_provider_rejected() {
        let mut config = Config::default();
        config.llm.default_model = "nowhere/model".to_string();
        assert!(config.validate_and_process().is_err());
    }

    #[test]
    fn test_split_model() {
        assert_eq!(split_model("openai/gpt-4o").unwrap(), ("openai", "gpt-4o"));
        assert_eq!(
            split_model("together/meta-llama/Llama-3").unwrap(),
            ("together", "meta-llama/Llama-3")
        );
        assert!(split_model("gpt-4o").is_err());
        assert!(split_model("/gpt").is_err());
    }

    #[test]
    fn test_resolve_model_priority() {
        let mut config = Config::default();
        config.agent.types.insert(
            "review".to_string(),
            AgentTypeConfig {
                model: Some("anthropic/claude-sonnet".to_string()),
                instructions: "Review carefully.".to_string(),
            },
        );

        let chosen = config.resolve_model(None, None).unwrap();
        assert_eq!((chosen.provider.as_str(), chosen.model.as_str()), ("ollama", "llama3.1:8b"));
        assert!(chosen.instructions.is_none());

        let chosen = config.resolve_model(None, Some("openai/gpt-4o")).unwrap();
        assert_eq!(chosen.provider, "openai");
        assert_eq!(chosen.endpoint.kind, ProviderKind::OpenAI);

        let chosen = config
            .resolve_model(Some("review"), Some("openai/gpt-4o"))
            .unwrap();
        assert_eq!(chosen.provider, "anthropic");
        assert_eq!(chosen.instructions.as_deref(), Some("Review carefully."));

        // Persona without a model keeps the override but adds instructions
        let chosen = config
            .resolve_model(Some("explore"), Some("openai/gpt-4o"))
            .unwrap();
        assert_eq!(chosen.provider, "openai");
        assert!(chosen.instructions.is_some());

        // Unknown agent type falls through
        let chosen = config.resolve_model(Some("nobody"), None).unwrap();
        assert_eq!(chosen.provider, "ollama");

        assert!(config.resolve_model(None, Some("missing/model")).is_err());
    }

    #[test]
    fn test_api_key_from_config() {
        let mut config = Config::default();
        if let Some(p) = config.llm.providers.get_mut("openai") {
            p.api_key = Some("sk-test".to_string());
        }
        let chosen = config.resolve_model(None, Some("openai/gpt-4o")).unwrap();
        assert_eq!(chosen.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_api_key_env_var() {
        assert_eq!(api_key_env_var("openai"), "OPENAI_API_KEY");
        assert_eq!(api_key_env_var("open-code"), "OPEN_CODE_API_KEY");
    }

    #[test]
    fn test_load_instructions_skips_missing() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.md"), "Use tabs.").unwrap();

        let mut config = Config::default();
        config.agent.instruction_files =
            vec![temp.path().join("a.md"), temp.path().join("missing.md")];
        assert_eq!(config.load_instructions(), vec!["Use tabs.".to_string()]);
    }

    #[test]
    fn test_config_store_invalidate_and_reload() {
        let temp = TempDir::new().unwrap();
        let ws = temp.path().join("ws");
        let path = write_config(
            temp.path(),
            &format!("[core]\nworkspace = \"{}\"\n[agent]\nmax_turns = 3\n", ws.display()),
        );

        let store = ConfigStore::new(Some(path.clone()));
        assert_eq!(store.get().unwrap().agent.max_turns, 3);

        fs::write(
            &path,
            format!("[core]\nworkspace = \"{}\"\n[agent]\nmax_turns = 9\n", ws.display()),
        )
        .unwrap();
        // Still the cached snapshot
        assert_eq!(store.get().unwrap().agent.max_turns, 3);

        store.invalidate();
        assert_eq!(store.get().unwrap().agent.max_turns, 9);

        fs::write(
            &path,
            format!("[core]\nworkspace = \"{}\"\n[agent]\nmax_turns = 4\n", ws.display()),
        )
        .unwrap();
        assert_eq!(store.reload().unwrap().agent.max_turns, 4);
        assert_eq!(store.source(), Some(path));
    }
}
