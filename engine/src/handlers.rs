//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - run: run one prompt and print the answer
//! - chat: line-oriented multi-turn session
//! - tools: list the capabilities the model sees
//! - config: show where the configuration came from and what it resolves to
//!
//! Answers go to stdout. Progress (tool calls, results, token totals) goes to
//! stderr so it can be dropped without losing the answer.

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::agent::{Agent, AgentObserver, NoopObserver, RunOutcome, StopReason};
use crate::cli::ModelArgs;
use crate::config::{Config, ConfigStore};
use crate::llm::build_client;
use crate::tools::session_registry;
use sdk::errors::{EngineError, LoomErrorExt};

/// Longest tool result echoed to the console
const RESULT_PREVIEW_CHARS: usize = 300;

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Prints loop progress to stderr
#[derive(Debug, Default)]
pub struct ConsoleObserver;

impl AgentObserver for ConsoleObserver {
    fn on_tool_call(&self, name: &str, args: &Map<String, Value>) {
        eprintln!("→ {} {}", name, Value::Object(args.clone()));
    }

    fn on_tool_result(&self, name: &str, _args: &Map<String, Value>, output: &str) {
        eprintln!("← {}: {}", name, truncate(output, RESULT_PREVIEW_CHARS));
    }

    fn on_token_update(&self, prompt: u64, completion: u64, total: u64, cost: f64) {
        eprintln!(
            "  tokens: {} in / {} out / {} total (${:.4})",
            prompt, completion, total, cost
        );
    }
}

fn observer_for(format: OutputFormat) -> Arc<dyn AgentObserver> {
    match format {
        OutputFormat::Text => Arc::new(ConsoleObserver),
        OutputFormat::Json => Arc::new(NoopObserver),
    }
}

fn build_agent(config: &Config, model: &ModelArgs, format: OutputFormat) -> Result<Agent> {
    let selection = config
        .resolve_model(model.agent.as_deref(), model.model.as_deref())
        .map_err(with_hint)?;
    Agent::from_config(config, &selection, observer_for(format))
        .map_err(with_hint)
        .context("Failed to start agent")
}

/// Run a single prompt
pub async fn handle_run(
    prompt: String,
    model: &ModelArgs,
    max_turns: Option<u32>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let mut agent = build_agent(config, model, format)?;
    if let Some(max_turns) = max_turns {
        agent.set_max_turns(max_turns);
    }

    match agent.run(&prompt).await {
        Ok(outcome) => {
            print_outcome(&agent, &outcome, format)?;
            Ok(())
        }
        Err(e) => {
            print_failure(&e, format)?;
            Err(e.into())
        }
    }
}

/// Interactive session: one prompt per line, history kept between prompts
pub async fn handle_chat(model: &ModelArgs, config: &Config, format: OutputFormat) -> Result<()> {
    let mut agent = build_agent(config, model, format)?;
    eprintln!(
        "loom chat ({}/{}), /exit to quit, /stats for metrics, /reset to clear history",
        agent.provider(),
        agent.model()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        std::io::stderr().flush().ok();

        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/exit" | "/quit" => break,
            "/stats" => {
                eprintln!("{}", agent.metrics().summary());
                eprintln!(
                    "Tokens: {} in / {} out, cost {}",
                    agent.ledger().prompt_tokens(),
                    agent.ledger().completion_tokens(),
                    agent.ledger().cost_string()
                );
                continue;
            }
            "/reset" => {
                agent.reset();
                eprintln!("History cleared.");
                continue;
            }
            _ => {}
        }

        match agent.run(line).await {
            Ok(outcome) => print_outcome(&agent, &outcome, format)?,
            // a failed turn is rolled back; the session goes on
            Err(e) => print_failure(&e, format)?,
        }
    }

    eprintln!("{}", agent.metrics().summary());
    Ok(())
}

/// List capabilities exposed to the model
pub async fn handle_tools(config: &Config, format: OutputFormat) -> Result<()> {
    let registry = session_registry(config, None)
        .map_err(EngineError::from)
        .map_err(with_hint)?;
    let schemas = registry.schemas();

    match format {
        OutputFormat::Text => {
            println!("Capabilities ({}):", schemas.len());
            println!();
            for schema in &schemas {
                println!("  {}", schema.name);
                println!("    {}", schema.description);
                let required = schema.required();
                for param in schema.parameter_names() {
                    let marker = if required.contains(&param) { "*" } else { "" };
                    println!("      - {}{}", param, marker);
                }
            }
            println!();
            println!("* required");
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&schemas)?);
        }
    }
    Ok(())
}

/// Show the configuration source and the resolved model
pub async fn handle_config(
    store: &ConfigStore,
    model: &ModelArgs,
    check: bool,
    format: OutputFormat,
) -> Result<()> {
    let config = store.get().map_err(with_hint)?;
    let selection = config
        .resolve_model(model.agent.as_deref(), model.model.as_deref())
        .map_err(with_hint)?;

    let health = if check {
        let client = build_client(&selection)
            .map_err(EngineError::from)
            .map_err(with_hint)?;
        Some(client.check_health().await)
    } else {
        None
    };

    let source = store
        .source()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults)".to_string());
    let agent_types: Vec<&String> = config.agent.types.keys().collect();

    match format {
        OutputFormat::Text => {
            println!("Configuration: {}", source);
            println!("  Workspace:     {}", config.core.workspace.display());
            println!("  Log level:     {}", config.core.log_level);
            println!(
                "  Model:         {}/{} ({})",
                selection.provider, selection.model, selection.endpoint.kind
            );
            println!("  Endpoint:      {}", selection.endpoint.base_url);
            println!(
                "  API key:       {}",
                if selection.api_key.is_some() {
                    "set"
                } else {
                    "not set"
                }
            );
            println!("  Max turns:     {}", config.agent.max_turns);
            println!(
                "  Orchestration: {}s timeout, direct tools {}",
                config.agent.orchestration_timeout_secs,
                if config.tools.direct { "on" } else { "off" }
            );
            if !agent_types.is_empty() {
                let names: Vec<&str> = agent_types.iter().map(|s| s.as_str()).collect();
                println!("  Agent types:   {}", names.join(", "));
            }
            if let Some(ok) = health {
                println!(
                    "  Provider:      {}",
                    if ok { "reachable" } else { "unreachable" }
                );
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "source": source,
                "workspace": config.core.workspace,
                "log_level": config.core.log_level,
                "provider": selection.provider,
                "model": selection.model,
                "kind": selection.endpoint.kind.to_string(),
                "base_url": selection.endpoint.base_url,
                "api_key_set": selection.api_key.is_some(),
                "max_turns": config.agent.max_turns,
                "orchestration_timeout_secs": config.agent.orchestration_timeout_secs,
                "direct_tools": config.tools.direct,
                "agent_types": agent_types,
                "reachable": health,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

fn print_outcome(agent: &Agent, outcome: &RunOutcome, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!("{}", outcome.text);
            if outcome.stop == StopReason::MaxTurns {
                eprintln!("⚠ Did not finish within {} turns", outcome.turns);
            }
            eprintln!(
                "  {} turn(s), {} tokens this run, session cost {}",
                outcome.turns,
                outcome.usage.total_tokens(),
                agent.ledger().cost_string()
            );
        }
        OutputFormat::Json => {
            let output = json!({
                "status": if outcome.stop.is_complete() { "completed" } else { "incomplete" },
                "answer": outcome.text,
                "stop": format!("{:?}", outcome.stop),
                "turns": outcome.turns,
                "usage": outcome.usage,
                "session": {
                    "prompt_tokens": agent.ledger().prompt_tokens(),
                    "completion_tokens": agent.ledger().completion_tokens(),
                    "total_tokens": agent.ledger().total_tokens(),
                    "cost": agent.ledger().cost(),
                },
                "provider": agent.provider(),
                "model": agent.model(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

fn print_failure(error: &EngineError, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            eprintln!("✗ Run failed: {}", error);
            eprintln!("  {}", error.user_hint());
        }
        OutputFormat::Json => {
            let output = json!({
                "status": "failed",
                "error": error.to_string(),
                "hint": error.user_hint(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Attach the user hint to an engine error on its way into `anyhow`
fn with_hint(error: EngineError) -> anyhow::Error {
    let hint = error.user_hint().to_string();
    anyhow::Error::new(error).context(hint)
}

fn truncate(text: &str, max: usize) -> String {
    let flat = text.replace('\n', "⏎");
    if flat.chars().count() <= max {
        return flat;
    }
    let mut cut: String = flat.chars().take(max).collect();
    cut.push('…');
    cut
}
