//! Error types and handling
//!
//! This module provides the error types used throughout the Loom engine.
//! All errors implement the `LoomErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! # Propagation
//!
//! Only a small subset of these errors ever aborts an agent run. Tool-level
//! failures (bad arguments, unknown capability, execution failure, sandbox
//! timeout) are folded into the conversation as tool results so the model can
//! react; `LLMProvider` is the turn-fatal category.

use thiserror::Error;

/// Trait for Loom error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait LoomErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users and does not contain secrets
    /// or internal implementation details.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors are surfaced to the model and the session goes on.
    /// Non-recoverable errors end the current run.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, LoomErrorExt};
///
/// let error = EngineError::ToolNotFound("frobnicate".to_string());
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal_error = EngineError::LLMProvider("connection refused".to_string());
/// assert!(!fatal_error.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Path canonicalization failed for {0:?}: {1}")]
    PathCanonicalization(std::path::PathBuf, String),

    // Completion backend errors
    #[error("LLM provider error: {0}")]
    LLMProvider(String),

    // Capability errors
    #[error("Duplicate capability name: {0}")]
    DuplicateCapability(String),

    #[error("Unknown capability: {0}")]
    ToolNotFound(String),

    #[error("Failed to parse tool arguments: {0}")]
    ArgumentRepair(String),

    #[error("Tool error: {0}")]
    ToolError(String),

    // Sandbox errors
    #[error("Orchestration timed out after {0}s")]
    SandboxTimeout(u64),

    #[error("Orchestration script error: {0}")]
    Script(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LoomErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            // Configuration errors
            Self::Config(_) => "Check your loom.toml file for errors",
            Self::PathCanonicalization(_, _) => "Invalid path specified",

            // Completion backend errors
            Self::LLMProvider(_) => "LLM provider unavailable. Check your API keys and network",

            // Capability errors
            Self::DuplicateCapability(_) => "Two capabilities share a name. Rename one of them",
            Self::ToolNotFound(_) => "The requested tool is not available",
            Self::ArgumentRepair(_) => "The model produced unreadable tool arguments",
            Self::ToolError(_) => "Tool operation failed",

            // Sandbox errors
            Self::SandboxTimeout(_) => "The orchestration script took too long. Split the work",
            Self::Script(_) => "The orchestration script failed",

            // Generic IO error
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Non-recoverable errors
            Self::Config(_)
            | Self::PathCanonicalization(_, _)
            | Self::LLMProvider(_)
            | Self::DuplicateCapability(_) => false,

            // All other errors are surfaced to the model as tool results
            _ => true,
        }
    }
}
