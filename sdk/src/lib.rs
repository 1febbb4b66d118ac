//! Loom SDK
//!
//! Shared library providing the capability contract and error types.
//! This crate is used by the engine and by anyone writing capabilities.

/// Capability trait and schema helpers
pub mod capability;

/// Error types and handling
pub mod errors;

/// Tool argument/result types
pub mod types;

// Re-export commonly used types
pub use capability::{object_schema, parameter_names, Capability, ToolSchema};
pub use errors::{EngineError, LoomErrorExt};
pub use types::{ToolArgs, ToolError, ToolResult};
