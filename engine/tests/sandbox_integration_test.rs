//! Integration tests for the orchestration sandbox
//!
//! Runs scripts against stub capabilities and against the real built-in
//! registry in a temporary workspace.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

use loom_engine::config::Config;
use loom_engine::sandbox::{self, Sandbox};
use loom_engine::tools::{builtin_registry, ToolRegistry};
use sdk::{object_schema, Capability, ToolArgs, ToolError, ToolResult};

/// Returns its label after a delay, logging completion order
struct DelayedTool {
    finished: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Capability for DelayedTool {
    fn name(&self) -> &str {
        "fetch"
    }

    fn description(&self) -> &str {
        "Return a label after a delay"
    }

    fn parameter_schema(&self) -> Value {
        object_schema(
            vec![
                ("label", json!({"type": "string"})),
                ("delay_ms", json!({"type": "integer"})),
            ],
            &["label", "delay_ms"],
        )
    }

    async fn execute(&self, args: ToolArgs) -> Result<ToolResult, ToolError> {
        let label = args.param_str("label")?;
        let delay = args.param_i64("delay_ms")?;
        tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        self.finished.lock().unwrap().push(label.clone());
        Ok(ToolResult::ok(label))
    }
}

fn delayed_registry() -> (Arc<ToolRegistry>, Arc<Mutex<Vec<String>>>) {
    let finished = Arc::new(Mutex::new(Vec::new()));
    let mut registry = ToolRegistry::new();
    registry
        .register(Arc::new(DelayedTool {
            finished: Arc::clone(&finished),
        }))
        .unwrap();
    (Arc::new(registry), finished)
}

fn workspace_config(dir: &TempDir) -> Config {
    let mut config = Config::from_toml(&format!(
        "[core]\nworkspace = {:?}\n",
        dir.path().display().to_string()
    ))
    .unwrap();
    config.validate_and_process().unwrap();
    config
}

#[tokio::test]
async fn test_fan_out_preserves_submission_order() {
    let (registry, finished) = delayed_registry();

    let started = Instant::now();
    let outcome = sandbox::run(
        r#"
        let results = gather([
            spawn fetch("first", 150),
            spawn fetch("second", 75),
            spawn fetch("third", 1),
        ])
        let labels = []
        for r in results { labels.push(r.output) }
        result = labels
        "#,
        registry,
        Duration::from_secs(5),
    )
    .await;

    assert!(outcome.success(), "{:?}", outcome.error);
    assert_eq!(
        outcome.return_value,
        Some(json!(["first", "second", "third"]))
    );
    assert_eq!(outcome.tool_call_count, 3);
    // the third call finished first, yet results keep submission order
    assert_eq!(
        *finished.lock().unwrap(),
        vec!["third".to_string(), "second".to_string(), "first".to_string()]
    );
    assert!(started.elapsed() < Duration::from_millis(300));
}

#[tokio::test]
async fn test_timeout_stops_script_but_keeps_completed_calls() {
    let (registry, finished) = delayed_registry();

    let outcome = sandbox::run(
        r#"
        fetch("quick", 1)
        print("after quick")
        fetch("slow", 10000)
        print("never")
        "#,
        registry,
        Duration::from_millis(250),
    )
    .await;

    let error = outcome.error.as_deref().unwrap();
    assert!(error.contains("timed out"), "{}", error);
    assert_eq!(outcome.stdout, "after quick\n");
    assert_eq!(outcome.tool_call_count, 2);
    assert_eq!(*finished.lock().unwrap(), vec!["quick".to_string()]);

    let result = outcome.to_tool_result();
    assert!(!result.success());
    assert!(result.output.contains("after quick"));
}

#[tokio::test]
async fn test_script_drives_builtin_tools() {
    let dir = TempDir::new().unwrap();
    let config = workspace_config(&dir);
    let registry = Arc::new(builtin_registry(&config).unwrap());

    let outcome = Sandbox::new(registry, Duration::from_secs(10))
        .run(
            r#"
            let names = ["a.txt", "b.txt", "c.txt"]
            for i, name in enumerate(names) {
                write_file(name, "line " + str(i) + "\nneedle\n")
            }
            let found = grep("needle", include="*.txt")
            let missing = read_file("nope.txt")
            result = {
                "files": glob("*.txt").output,
                "hits": len(lines(found.output)),
                "missing_ok": missing.ok,
                "missing_error": missing.error,
            }
            "#,
        )
        .await;

    assert!(outcome.success(), "{:?}", outcome.error);
    let result = outcome.return_value.unwrap();
    assert_eq!(result["hits"], 3);
    assert_eq!(result["missing_ok"], false);
    assert!(result["missing_error"]
        .as_str()
        .unwrap()
        .contains("not found"));
    let files = result["files"].as_str().unwrap();
    assert!(files.contains("a.txt") && files.contains("c.txt"));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("b.txt")).unwrap(),
        "line 1\nneedle\n"
    );
}

#[tokio::test]
async fn test_scripts_cannot_reach_the_host() {
    let (registry, _) = delayed_registry();
    for script in [
        "import os",
        "open('/etc/passwd')",
        "eval('1 + 1')",
        "std::process::exit(1)",
        "__builtins__",
    ] {
        let outcome = sandbox::run(script, Arc::clone(&registry), Duration::from_secs(1)).await;
        assert!(outcome.error.is_some(), "{} should be rejected", script);
        assert_eq!(outcome.tool_call_count, 0);
    }
}
