//! Orchestration sandbox
//!
//! Runs a model-authored script that can call capabilities directly, so one
//! completion round can drive many tool interactions. The script language is
//! small and purpose-built: the only names a script can resolve are its own
//! variables, the whitelisted builtins and the capabilities of the registry
//! the sandbox was built with. There is no import mechanism and no access to
//! the host.
//!
//! Capability calls made by a script are:
//! - recorded in an [`ExecutionRecord`]
//! - reported to an optional [`CallObserver`] before they run
//! - dispatched through the [`ToolRegistry`]
//!
//! A capability that reports a soft failure gives the script a map it can
//! branch on (`{ok, output, error}`). A hard failure aborts the script; the
//! sandbox turns it, like every other script error, into the `error` field of
//! the [`SandboxOutcome`]. Nothing raised inside a script escapes [`Sandbox::run`].

use async_trait::async_trait;
use sdk::{object_schema, Capability, ToolArgs, ToolError, ToolResult};
use serde_json::{json, Map, Value as Json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::tools::{RegistryError, ToolRegistry};

pub mod builtins;
mod interpreter;
pub mod parser;
pub mod value;

use builtins::{map_of, CallArgs};
use interpreter::Interpreter;
use value::{PendingCall, Value};

/// Captured output is cut off past this many bytes
const MAX_STDOUT: usize = 100_000;

/// Errors raised while running a script
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    #[error("syntax error: {0}")]
    Parse(String),

    #[error("name '{0}' is not defined")]
    UndefinedName(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("argument error: {0}")]
    Argument(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("{0}")]
    Runtime(String),

    #[error("Tool {name} failed: {message}")]
    Capability { name: String, message: String },

    #[error("timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),
}

impl From<ScriptError> for sdk::EngineError {
    fn from(err: ScriptError) -> Self {
        match err {
            ScriptError::Timeout(limit) => Self::SandboxTimeout(limit.as_secs_f64().ceil() as u64),
            other => Self::Script(other.to_string()),
        }
    }
}

/// Notified before each capability call a script makes
pub trait CallObserver: Send + Sync {
    fn on_script_call(&self, capability: &str, args: &Map<String, Json>);
}

/// One intercepted capability call
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub capability: String,
    pub positional: Vec<Json>,
    pub keyword: Map<String, Json>,
}

/// Calls made during one sandbox run, in the order they started
#[derive(Debug, Default)]
pub struct ExecutionRecord {
    calls: Mutex<Vec<RecordedCall>>,
}

impl ExecutionRecord {
    fn push(&self, call: RecordedCall) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
    }

    pub fn len(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Result of one sandbox run
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxOutcome {
    /// Everything the script printed
    pub stdout: String,
    /// Number of capability calls started
    pub tool_call_count: usize,
    /// Explicit `return` value, else the final `result` binding
    pub return_value: Option<Json>,
    /// Script error, capability hard failure or timeout
    pub error: Option<String>,
}

impl SandboxOutcome {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    /// Tool result handed back to the model
    pub fn to_tool_result(&self) -> ToolResult {
        let body = json!({
            "stdout": self.stdout,
            "result": self.return_value,
            "tool_calls": self.tool_call_count,
        });
        let output = serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string());
        match &self.error {
            Some(error) => ToolResult::with_error(output, error.clone()),
            None => ToolResult::ok(output),
        }
    }
}

/// State shared by a script and the calls it spawns
pub(crate) struct ScriptContext {
    registry: Arc<ToolRegistry>,
    params: HashMap<String, Vec<String>>,
    observer: Option<Arc<dyn CallObserver>>,
    record: ExecutionRecord,
    stdout: Mutex<String>,
}

impl ScriptContext {
    fn new(registry: Arc<ToolRegistry>, observer: Option<Arc<dyn CallObserver>>) -> Self {
        let params = registry
            .schemas()
            .into_iter()
            .map(|s| {
                let names = s.parameter_names();
                (s.name, names)
            })
            .collect();
        Self {
            registry,
            params,
            observer,
            record: ExecutionRecord::default(),
            stdout: Mutex::new(String::new()),
        }
    }

    pub(crate) fn is_capability(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    /// Bind positional and keyword arguments to declared parameter names
    pub(crate) fn bind(&self, name: &str, args: CallArgs) -> Result<PendingCall, ScriptError> {
        let params = self
            .params
            .get(name)
            .ok_or_else(|| ScriptError::UndefinedName(name.to_string()))?;

        if args.positional.len() > params.len() {
            return Err(ScriptError::Argument(format!(
                "{}() takes {} positional argument(s) but {} were given",
                name,
                params.len(),
                args.positional.len()
            )));
        }

        let positional: Vec<Json> = args.positional.iter().map(Value::to_json).collect();
        let mut bound: Map<String, Json> = params
            .iter()
            .cloned()
            .zip(positional.iter().cloned())
            .collect();
        let mut keyword = Map::new();
        for (key, value) in args.keyword {
            if !params.contains(&key) {
                return Err(ScriptError::Argument(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    name, key
                )));
            }
            if bound.contains_key(&key) {
                return Err(ScriptError::Argument(format!(
                    "{}() got multiple values for argument '{}'",
                    name, key
                )));
            }
            let json = value.to_json();
            keyword.insert(key.clone(), json.clone());
            bound.insert(key, json);
        }

        Ok(PendingCall {
            capability: name.to_string(),
            positional,
            keyword,
            bound,
        })
    }

    /// Execute a bound call through the registry
    pub(crate) async fn invoke(&self, call: PendingCall) -> Result<Value, ScriptError> {
        self.record.push(RecordedCall {
            capability: call.capability.clone(),
            positional: call.positional,
            keyword: call.keyword,
        });
        if let Some(observer) = &self.observer {
            observer.on_script_call(&call.capability, &call.bound);
        }
        debug!("Script calls '{}'", call.capability);

        match self
            .registry
            .dispatch(&call.capability, ToolArgs::from(call.bound))
            .await
        {
            Ok(result) => Ok(result_value(&result)),
            Err(RegistryError::Execution { name, source }) => Err(ScriptError::Capability {
                name,
                message: source.to_string(),
            }),
            Err(other) => Err(ScriptError::Capability {
                name: call.capability,
                message: other.to_string(),
            }),
        }
    }

    pub(crate) fn print(&self, args: &CallArgs) {
        let sep = keyword_str(args, "sep").unwrap_or_else(|| " ".to_string());
        let end = keyword_str(args, "end").unwrap_or_else(|| "\n".to_string());
        let line: Vec<String> = args.positional.iter().map(Value::to_string).collect();

        let mut stdout = self.stdout.lock().unwrap_or_else(|e| e.into_inner());
        if stdout.len() >= MAX_STDOUT {
            return;
        }
        stdout.push_str(&line.join(&sep));
        stdout.push_str(&end);
        if stdout.len() >= MAX_STDOUT {
            stdout.push_str("\n... (output truncated)\n");
        }
    }

    fn take_stdout(&self) -> String {
        std::mem::take(&mut *self.stdout.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

fn keyword_str(args: &CallArgs, key: &str) -> Option<String> {
    args.keyword
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.to_string())
}

/// Script view of a capability result
fn result_value(result: &ToolResult) -> Value {
    map_of(vec![
        ("ok", Value::Bool(result.success())),
        ("output", Value::Str(result.output.clone())),
        (
            "error",
            result
                .error
                .clone()
                .map(Value::Str)
                .unwrap_or(Value::Null),
        ),
    ])
}

/// Script runner bound to a registry
#[derive(Clone)]
pub struct Sandbox {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
    observer: Option<Arc<dyn CallObserver>>,
}

impl Sandbox {
    pub fn new(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        Self {
            registry,
            timeout,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn CallObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Capability names callable from scripts
    pub fn capability_names(&self) -> Vec<&str> {
        self.registry.names()
    }

    /// Execute a script under the wall-clock timeout
    ///
    /// Capability calls that completed before a timeout are not rolled back.
    pub async fn run(&self, script: &str) -> SandboxOutcome {
        let started = Instant::now();
        let ctx = Arc::new(ScriptContext::new(
            Arc::clone(&self.registry),
            self.observer.clone(),
        ));

        let result = match parser::parse_script(script) {
            Ok(program) => {
                let interpreter = Interpreter::new(Arc::clone(&ctx));
                match tokio::time::timeout(self.timeout, interpreter.run(&program)).await {
                    Ok(result) => result,
                    Err(_) => Err(ScriptError::Timeout(self.timeout)),
                }
            }
            Err(e) => Err(e),
        };

        let (return_value, error) = match result {
            Ok(value) => (value.map(|v| v.to_json()), None),
            Err(e) => {
                warn!("{}", sdk::EngineError::from(e.clone()));
                (None, Some(e.to_string()))
            }
        };

        let outcome = SandboxOutcome {
            stdout: ctx.take_stdout(),
            tool_call_count: ctx.record.len(),
            return_value,
            error,
        };
        info!(
            "Orchestration finished: {} tool call(s) in {:.1}s",
            outcome.tool_call_count,
            started.elapsed().as_secs_f64()
        );
        outcome
    }
}

/// Run a script against a registry
pub async fn run(script: &str, registry: Arc<ToolRegistry>, timeout: Duration) -> SandboxOutcome {
    Sandbox::new(registry, timeout).run(script).await
}

/// The `orchestrate` capability
pub struct OrchestrateTool {
    sandbox: Sandbox,
    description: String,
}

impl OrchestrateTool {
    pub fn new(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        let description = format!(
            "Run a script that calls tools directly and returns only what it prints, \
             returns or assigns to `result`. Use it for multi-step work. Callable: {}.",
            registry.names().join(", ")
        );
        Self {
            sandbox: Sandbox::new(registry, timeout),
            description,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn CallObserver>) -> Self {
        self.sandbox = self.sandbox.with_observer(observer);
        self
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }
}

#[async_trait]
impl Capability for OrchestrateTool {
    fn name(&self) -> &str {
        "orchestrate"
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameter_schema(&self) -> Json {
        object_schema(
            vec![(
                "code",
                json!({"type": "string", "description": "Orchestration script source"}),
            )],
            &["code"],
        )
    }

    async fn execute(&self, args: ToolArgs) -> Result<ToolResult, ToolError> {
        let code = args.param_str("code")?;
        Ok(self.sandbox.run(&code).await.to_tool_result())
    }
}
