//! Loom Engine Library
//!
//! This library provides the core functionality of the Loom agent runtime.
//! It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Completion backend abstraction layer
pub mod llm;

/// Tool argument repair
pub mod repair;

/// Token and cost accounting
pub mod usage;

/// Capability registry and built-in capabilities
pub mod tools;

/// Orchestration sandbox
pub mod sandbox;

/// Agent loop module
pub mod agent;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
