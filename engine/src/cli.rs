//! CLI interface for Loom
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Loom agent runtime
///
/// Runs a language model against file, shell, search and git tools, with an
/// orchestration sandbox that batches tool calls into one round-trip.
#[derive(Parser, Debug)]
#[command(name = "loom")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Model selection shared by `run` and `chat`
#[derive(Args, Debug, Clone, Default)]
pub struct ModelArgs {
    /// Agent type from `[agent.types]`
    #[arg(long, value_name = "TYPE")]
    pub agent: Option<String>,

    /// Model override in `provider/model` form
    #[arg(long, value_name = "PROVIDER/MODEL")]
    pub model: Option<String>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one prompt and print the answer
    Run {
        /// The prompt to run
        prompt: String,

        #[command(flatten)]
        model: ModelArgs,

        /// Override `agent.max_turns`
        #[arg(long, value_name = "N")]
        max_turns: Option<u32>,
    },

    /// Interactive multi-turn session on stdin
    Chat {
        #[command(flatten)]
        model: ModelArgs,
    },

    /// List registered capabilities and their parameters
    Tools,

    /// Show the resolved configuration source and model
    Config {
        /// Also check that the provider answers
        #[arg(long)]
        check: bool,

        #[command(flatten)]
        model: ModelArgs,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["loom", "tools"]);
        assert!(matches!(cli.command, Command::Tools));
        assert!(!cli.json);
        assert!(cli.log.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from([
            "loom", "--json", "--log", "debug", "--config", "x.toml", "tools",
        ]);
        assert!(cli.json);
        assert_eq!(cli.log, Some("debug".to_string()));
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
    }

    #[test]
    fn test_run_command() {
        let cli = Cli::parse_from([
            "loom",
            "run",
            "list files in current directory",
            "--agent",
            "explore",
            "--model",
            "ollama/qwen3:8b",
            "--max-turns",
            "5",
        ]);
        if let Command::Run {
            prompt,
            model,
            max_turns,
        } = cli.command
        {
            assert_eq!(prompt, "list files in current directory");
            assert_eq!(model.agent.as_deref(), Some("explore"));
            assert_eq!(model.model.as_deref(), Some("ollama/qwen3:8b"));
            assert_eq!(max_turns, Some(5));
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn test_chat_defaults() {
        let cli = Cli::parse_from(["loom", "chat"]);
        if let Command::Chat { model } = cli.command {
            assert!(model.agent.is_none());
            assert!(model.model.is_none());
        } else {
            panic!("Expected Chat command");
        }
    }

    #[test]
    fn test_config_check() {
        let cli = Cli::parse_from(["loom", "config", "--check"]);
        assert!(matches!(cli.command, Command::Config { check: true, .. }));
    }
}
