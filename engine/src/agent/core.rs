//! Agent Core
//!
//! The conversation state machine. Each `run` drives the loop:
//!
//! 1. Request a completion with the conversation and the capability schemas
//! 2. Fold the reported usage into the session ledger
//! 3. No tool calls: the assistant text is the answer
//! 4. Otherwise repair, dispatch and answer every tool call in order
//! 5. Repeat until an answer, a repeated `orchestrate`, or `max_turns`
//!
//! # Failures
//!
//! Capability failures of any kind (bad arguments, unknown names, execution
//! errors, script errors, sandbox timeouts) become tool messages the model
//! can react to. Only a failed completion request ends a run with an error,
//! and then the conversation is rolled back to where the run started.
//!
//! # Orchestration
//!
//! `orchestrate` runs at most once per `run`. After the turn that ran it the
//! model is reminded to answer from the results, and a second request for it
//! ends the run with [`ORCHESTRATION_DONE_MESSAGE`].

use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{Config, ModelSelection};
use crate::llm::{build_client, CompletionClient, Message, ToolCall};
use crate::repair;
use crate::sandbox::CallObserver;
use crate::tools::{builtin_registry, session_registry, RegistryError, ToolRegistry};
use crate::usage::{Pricing, TokenLedger, TokenUsage};
use sdk::errors::EngineError;
use sdk::{ToolArgs, ToolResult, ToolSchema};

use super::conversation::Conversation;
use super::metrics::SessionMetrics;
use super::observer::{notify_tokens, AgentObserver, NoopObserver, ScriptCallBridge};
use super::prompt::{system_prompt, PromptParts};

/// Name of the orchestration capability
pub const ORCHESTRATE: &str = "orchestrate";

/// Default turn ceiling
pub const DEFAULT_MAX_TURNS: u32 = 20;

/// Answer when the turn ceiling is hit
pub const MAX_TURNS_MESSAGE: &str = "Max turns reached without completion.";

/// Answer when the model asks for `orchestrate` a second time
pub const ORCHESTRATION_DONE_MESSAGE: &str = "Task completed via orchestrate.";

const ORCHESTRATION_REMINDER: &str = "The orchestrate tool has been executed. \
Do not call any more tools. Your next response must contain the actual results \
found by the tools, not just 'done'. If there was an error, explain what went wrong.";

const SKIPPED_CALL: &str = "Skipped: orchestrate already ran for this request";

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model answered without requesting tools
    Answered,
    /// The model requested `orchestrate` after it already ran
    OrchestrationRepeated,
    /// The turn ceiling was reached
    MaxTurns,
}

impl StopReason {
    /// Whether the run produced the model's own answer
    pub fn is_complete(&self) -> bool {
        !matches!(self, StopReason::MaxTurns)
    }
}

/// Result of one `run`
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub text: String,
    pub stop: StopReason,
    /// Completion requests made
    pub turns: u32,
    /// Tokens used by this run alone
    pub usage: TokenUsage,
}

/// Loop settings
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub max_turns: u32,
    pub system_prompt: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            system_prompt: String::new(),
        }
    }
}

/// One agent session: a client, a registry and the conversation so far
pub struct Agent {
    client: Arc<dyn CompletionClient>,
    tools: Arc<ToolRegistry>,
    schemas: Vec<ToolSchema>,
    settings: AgentSettings,
    conversation: Conversation,
    ledger: TokenLedger,
    metrics: SessionMetrics,
    observer: Arc<dyn AgentObserver>,
}

impl Agent {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        tools: Arc<ToolRegistry>,
        settings: AgentSettings,
    ) -> Self {
        let schemas = tools.schemas();
        Self {
            client,
            tools,
            schemas,
            settings,
            conversation: Conversation::new(),
            ledger: TokenLedger::default(),
            metrics: SessionMetrics::new(),
            observer: Arc::new(NoopObserver),
        }
    }

    /// Build a session from configuration
    ///
    /// Calls made inside orchestration scripts are reported to `observer`
    /// as tool calls.
    pub fn from_config(
        config: &Config,
        selection: &ModelSelection,
        observer: Arc<dyn AgentObserver>,
    ) -> Result<Self, EngineError> {
        let client = build_client(selection)?;

        let bridge: Arc<dyn CallObserver> = Arc::new(ScriptCallBridge(Arc::clone(&observer)));
        let tools = Arc::new(session_registry(config, Some(bridge))?);
        let script_capabilities = builtin_registry(config)?
            .names()
            .into_iter()
            .map(String::from)
            .collect();

        let prompt = system_prompt(&PromptParts {
            workspace: &config.core.workspace,
            tools: tools.names().into_iter().map(String::from).collect(),
            script_capabilities,
            instructions: selection.instructions.as_deref(),
            instruction_files: config.load_instructions(),
        });

        info!(
            "Agent ready: {}/{} with {} tool(s)",
            selection.provider,
            selection.model,
            tools.len()
        );

        let settings = AgentSettings {
            max_turns: config.agent.max_turns,
            system_prompt: prompt,
        };
        Ok(Self::new(client, tools, settings)
            .with_pricing(selection.endpoint.pricing())
            .with_observer(observer))
    }

    pub fn with_pricing(mut self, pricing: Pricing) -> Self {
        self.ledger = TokenLedger::new(pricing);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn AgentObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn set_max_turns(&mut self, max_turns: u32) {
        self.settings.max_turns = max_turns;
    }

    pub fn provider(&self) -> &str {
        self.client.name()
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    pub fn system_prompt(&self) -> &str {
        &self.settings.system_prompt
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Session token totals
    pub fn ledger(&self) -> &TokenLedger {
        &self.ledger
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    /// Forget the conversation; usage and metrics are kept
    pub fn reset(&mut self) {
        self.conversation.clear();
    }

    /// Run a prompt to completion
    ///
    /// Errors only when a completion request fails.
    pub async fn run(&mut self, prompt: &str) -> Result<RunOutcome, EngineError> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        info!("Starting run {}: {}", run_id, preview(prompt, 80));

        self.metrics.record_prompt();
        let checkpoint = self.conversation.len();
        let before = self.ledger.totals();
        self.conversation.push(Message::user(prompt));

        match self.run_loop().await {
            Ok((text, stop, turns)) => {
                let after = self.ledger.totals();
                info!(
                    "Run {} finished ({:?}) after {} turn(s) in {:.1}s",
                    run_id,
                    stop,
                    turns,
                    started.elapsed().as_secs_f64()
                );
                Ok(RunOutcome {
                    text,
                    stop,
                    turns,
                    usage: TokenUsage::new(
                        after.prompt_tokens - before.prompt_tokens,
                        after.completion_tokens - before.completion_tokens,
                    ),
                })
            }
            Err(e) => {
                error!("Run {} failed: {}", run_id, e);
                self.conversation.truncate(checkpoint);
                Err(e)
            }
        }
    }

    async fn run_loop(&mut self) -> Result<(String, StopReason, u32), EngineError> {
        let max_turns = self.settings.max_turns;
        let mut orchestrated = false;
        let mut reminded = false;

        for turn in 1..=max_turns {
            debug!("Turn {}/{}", turn, max_turns);

            let request = self.conversation.with_system(&self.settings.system_prompt);
            let completion = self.client.complete(&request, &self.schemas).await?;

            self.ledger.add(completion.usage);
            notify_tokens(self.observer.as_ref(), &self.ledger);

            let message = completion.message;
            let text = message.text().to_string();
            if !text.is_empty() {
                self.observer.on_completion_text(&text);
            }
            let calls = message.calls().to_vec();
            self.conversation.push(message);

            if calls.is_empty() {
                return Ok((text, StopReason::Answered, turn));
            }

            for (i, call) in calls.iter().enumerate() {
                if call.name == ORCHESTRATE {
                    if orchestrated {
                        warn!("Model requested orchestrate again, ending run");
                        for skipped in &calls[i..] {
                            self.conversation.push(Message::tool_result(
                                ToolResult::err(SKIPPED_CALL).to_json(),
                                &skipped.id,
                            ));
                        }
                        return Ok((
                            ORCHESTRATION_DONE_MESSAGE.to_string(),
                            StopReason::OrchestrationRepeated,
                            turn,
                        ));
                    }
                    orchestrated = true;
                }

                let result = self.dispatch(call).await;
                self.conversation
                    .push(Message::tool_result(result.to_json(), &call.id));
            }

            if orchestrated && !reminded {
                self.conversation.push(Message::system(ORCHESTRATION_REMINDER));
                reminded = true;
            }
        }

        warn!("Reached max turns ({}) without an answer", max_turns);
        Ok((MAX_TURNS_MESSAGE.to_string(), StopReason::MaxTurns, max_turns))
    }

    /// Repair, execute and report one tool call; never fails
    async fn dispatch(&mut self, call: &ToolCall) -> ToolResult {
        let args = match repair::try_repair(&call.arguments) {
            Ok(args) => args,
            Err(failure) => {
                warn!("Tool '{}': {}", call.name, EngineError::from(failure.clone()));
                let args = failure.to_map();
                self.observer.on_tool_call(&call.name, &args);
                let result = ToolResult::err(format!(
                    "Invalid arguments for {}: {} (raw: {})",
                    call.name, failure, failure.raw
                ));
                self.finish(&call.name, &args, &result, Instant::now());
                return result;
            }
        };

        self.observer.on_tool_call(&call.name, &args);
        let started = Instant::now();
        let result = match self
            .tools
            .dispatch(&call.name, ToolArgs::from(args.clone()))
            .await
        {
            Ok(result) => result,
            Err(RegistryError::UnknownCapability(name)) => {
                ToolResult::err(format!("Unknown tool: {}", name))
            }
            Err(e) => ToolResult::err(e.to_string()),
        };
        self.finish(&call.name, &args, &result, started);
        result
    }

    fn finish(
        &mut self,
        name: &str,
        args: &Map<String, Value>,
        result: &ToolResult,
        started: Instant,
    ) {
        let elapsed = started.elapsed();
        self.metrics.record_tool_call(name, result.success(), elapsed);

        match &result.error {
            None => {
                info!("Tool '{}' succeeded in {:.1}s", name, elapsed.as_secs_f64());
                self.observer.on_tool_result(name, args, &result.output);
            }
            Some(error) => {
                warn!("Tool '{}' failed: {}", name, error);
                self.observer
                    .on_tool_result(name, args, &format!("Error: {}", error));
            }
        }
    }
}

/// First `max` characters of `text` on one line
fn preview(text: &str, max: usize) -> String {
    let line = text.replace('\n', " ");
    if line.chars().count() <= max {
        return line;
    }
    let mut cut: String = line.chars().take(max).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Completion, LLMError, MessageRole};
    use crate::sandbox::OrchestrateTool;
    use async_trait::async_trait;
    use sdk::{object_schema, Capability, ToolError};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays queued completions and records every request
    struct ScriptedClient {
        replies: Mutex<VecDeque<crate::llm::Result<Completion>>>,
        requests: Mutex<Vec<Vec<Message>>>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<crate::llm::Result<Completion>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "test"
        }

        async fn complete(
            &self,
            messages: &[Message],
            _tools: &[ToolSchema],
        ) -> crate::llm::Result<Completion> {
            self.requests.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(answer("out of replies")))
        }
    }

    fn answer(text: &str) -> Completion {
        Completion {
            message: Message::assistant(text),
            usage: TokenUsage::new(10, 5),
        }
    }

    fn calls(calls: Vec<(&str, &str, &str)>) -> Completion {
        Completion {
            message: Message::assistant_with_tools(
                None,
                calls
                    .into_iter()
                    .map(|(id, name, args)| ToolCall::new(id, name, args))
                    .collect(),
            ),
            usage: TokenUsage::new(100, 20),
        }
    }

    struct UpperTool;

    #[async_trait]
    impl Capability for UpperTool {
        fn name(&self) -> &str {
            "upper"
        }
        fn description(&self) -> &str {
            "Uppercase text"
        }
        fn parameter_schema(&self) -> Value {
            object_schema(vec![("text", json!({"type": "string"}))], &["text"])
        }
        async fn execute(&self, args: ToolArgs) -> Result<ToolResult, ToolError> {
            Ok(ToolResult::ok(args.param_str("text")?.to_uppercase()))
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let mut inner = ToolRegistry::new();
        inner.register(Arc::new(UpperTool)).unwrap();
        let inner = Arc::new(inner);

        let mut registry = (*inner).clone();
        registry
            .register(Arc::new(OrchestrateTool::new(inner, Duration::from_secs(5))))
            .unwrap();
        Arc::new(registry)
    }

    fn agent(client: Arc<ScriptedClient>) -> Agent {
        Agent::new(
            client,
            registry(),
            AgentSettings {
                max_turns: 5,
                system_prompt: "sys".into(),
            },
        )
    }

    #[tokio::test]
    async fn test_direct_answer() {
        let client = ScriptedClient::new(vec![Ok(answer("hello"))]);
        let mut agent = agent(Arc::clone(&client));

        let outcome = agent.run("hi").await.unwrap();
        assert_eq!(outcome.text, "hello");
        assert_eq!(outcome.stop, StopReason::Answered);
        assert_eq!(outcome.turns, 1);
        assert_eq!(outcome.usage, TokenUsage::new(10, 5));

        let request = &client.requests.lock().unwrap()[0];
        assert_eq!(request[0].role, MessageRole::System);
        assert_eq!(request[0].text(), "sys");
        assert_eq!(request[1].text(), "hi");
    }

    #[tokio::test]
    async fn test_tool_results_follow_their_calls() {
        let client = ScriptedClient::new(vec![
            Ok(calls(vec![
                ("a", "upper", r#"{"text": "one"}"#),
                ("b", "upper", r#"{"text": "two"}"#),
            ])),
            Ok(answer("ONE TWO")),
        ]);
        let mut agent = agent(client);
        agent.run("shout").await.unwrap();

        let messages = agent.conversation().messages();
        let roles: Vec<_> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                MessageRole::User,
                MessageRole::Assistant,
                MessageRole::Tool,
                MessageRole::Tool,
                MessageRole::Assistant
            ]
        );
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("a"));
        assert!(messages[2].text().contains("ONE"));
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("b"));
        assert!(messages[3].text().contains("TWO"));
    }

    #[tokio::test]
    async fn test_bad_arguments_become_tool_error() {
        let client = ScriptedClient::new(vec![
            Ok(calls(vec![("a", "upper", "not json at all")])),
            Ok(answer("sorry")),
        ]);
        let mut agent = agent(client);
        let outcome = agent.run("x").await.unwrap();
        assert_eq!(outcome.text, "sorry");

        let tool = &agent.conversation().messages()[2];
        assert!(tool.text().contains("Invalid arguments for upper"));
        assert!(tool.text().contains("not json at all"));
        assert_eq!(agent.metrics().tool("upper").unwrap().errors, 1);
    }

    #[tokio::test]
    async fn test_orchestrate_reminder_and_single_use() {
        let script = json!({"code": "result = upper('x').output"}).to_string();
        let client = ScriptedClient::new(vec![
            Ok(calls(vec![("o1", ORCHESTRATE, script.as_str())])),
            Ok(calls(vec![
                ("o2", ORCHESTRATE, script.as_str()),
                ("u", "upper", r#"{"text": "late"}"#),
            ])),
        ]);
        let mut agent = agent(Arc::clone(&client));
        let outcome = agent.run("go").await.unwrap();

        assert_eq!(outcome.text, ORCHESTRATION_DONE_MESSAGE);
        assert_eq!(outcome.stop, StopReason::OrchestrationRepeated);
        assert_eq!(client.request_count(), 2);
        assert_eq!(agent.metrics().orchestration_calls(), 1);
        assert!(agent.metrics().tool("upper").is_none());

        let messages = agent.conversation().messages();
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("o1"));
        assert!(messages[2].text().contains("X"));
        assert_eq!(messages[3].role, MessageRole::System);

        // every call of the last turn still has an answer
        let skipped: Vec<_> = messages[5..]
            .iter()
            .map(|m| m.tool_call_id.as_deref())
            .collect();
        assert_eq!(skipped, vec![Some("o2"), Some("u")]);
    }

    #[tokio::test]
    async fn test_backend_failure_rolls_back() {
        let client = ScriptedClient::new(vec![
            Ok(answer("first")),
            Ok(calls(vec![("a", "upper", r#"{"text": "x"}"#)])),
            Err(LLMError::RateLimitExceeded),
        ]);
        let mut agent = agent(client);
        agent.run("one").await.unwrap();
        assert_eq!(agent.conversation().len(), 2);

        let err = agent.run("two").await.unwrap_err();
        assert!(matches!(err, EngineError::LLMProvider(_)));
        assert_eq!(agent.conversation().len(), 2);
        // usage already incurred stays on the ledger
        assert_eq!(agent.ledger().prompt_tokens(), 110);
    }

    #[tokio::test]
    async fn test_history_carries_across_runs() {
        let client = ScriptedClient::new(vec![Ok(answer("a")), Ok(answer("b"))]);
        let mut agent = agent(Arc::clone(&client));
        agent.run("first").await.unwrap();
        agent.run("second").await.unwrap();

        let second = &client.requests.lock().unwrap()[1];
        let texts: Vec<_> = second.iter().map(|m| m.text().to_string()).collect();
        assert_eq!(texts, vec!["sys", "first", "a", "second"]);
        assert_eq!(agent.ledger().calls(), 2);
        assert_eq!(agent.metrics().prompts(), 2);

        agent.reset();
        assert!(agent.conversation().is_empty());
        assert_eq!(agent.ledger().calls(), 2);
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("a\nb", 10), "a b");
        assert_eq!(preview("abcdef", 3), "abc...");
    }
}
