// Loom agent runtime
// Main entry point for the loom binary

use clap::Parser;
use loom_engine::cli::{Cli, Command};
use loom_engine::config::ConfigStore;
use loom_engine::handlers::{handle_chat, handle_config, handle_run, handle_tools, OutputFormat};
use loom_engine::telemetry::{init_telemetry, init_telemetry_with_level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration (or use custom path if provided)
    let store = ConfigStore::new(cli.config.clone());
    let config = match store.get() {
        Ok(config) => config,
        Err(e) => {
            init_telemetry();
            return Err(e.into());
        }
    };

    // --log wins over the config file; RUST_LOG wins over both
    init_telemetry_with_level(cli.log.as_deref().unwrap_or(&config.core.log_level));

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");
    tracing::debug!("Loom v{} ({} - {})", version, commit, timestamp);

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Handle commands
    match cli.command {
        Command::Run {
            prompt,
            model,
            max_turns,
        } => {
            tracing::info!("Running prompt");
            handle_run(prompt, &model, max_turns, &config, format).await
        }

        Command::Chat { model } => handle_chat(&model, &config, format).await,

        Command::Tools => handle_tools(&config, format).await,

        Command::Config { check, model } => handle_config(&store, &model, check, format).await,
    }
}
