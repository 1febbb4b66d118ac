//! Completion client abstraction layer
//!
//! This module provides a common interface over heterogeneous chat backends
//! (OpenAI-compatible, Anthropic, Ollama). The [`CompletionClient`] trait is
//! the only thing the agent loop depends on: one call takes the conversation
//! plus capability schemas and returns a canonical assistant [`Message`]
//! together with the token usage of that call.

use async_trait::async_trait;
use sdk::{EngineError, ToolSchema};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ModelSelection, ProviderKind};
use crate::usage::TokenUsage;

pub mod anthropic;
pub mod ollama;
pub mod openai;

pub use anthropic::AnthropicClient;
pub use ollama::OllamaClient;
pub use openai::OpenAIClient;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<LLMError> for EngineError {
    fn from(err: LLMError) -> Self {
        EngineError::LLMProvider(err.to_string())
    }
}

/// Message in a conversation history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender (user, assistant, system, tool)
    pub role: MessageRole,

    /// Text content; assistant messages that only call tools may have none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Tool invocations requested by an assistant message, in order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// Tool call this message answers (tool messages only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Create an assistant message that requests tool calls
    pub fn assistant_with_tools(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content,
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            tool_call_id: None,
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Create a new tool result message
    pub fn tool_result(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Text content, empty when absent
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    /// Requested tool calls, empty when none
    pub fn calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or(&[])
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.calls().is_empty()
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User message
    User,

    /// Assistant message
    Assistant,

    /// System message
    System,

    /// Tool result message
    Tool,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// Tool call request from the LLM
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCall {
    /// Identifier, unique within one assistant message
    pub id: String,

    /// Name of the tool to call
    pub name: String,

    /// Arguments exactly as the model emitted them (JSON text, maybe broken)
    pub arguments: String,
}

impl ToolCall {
    /// Create a new tool call
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// Normalised reply of one completion call
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// The assistant message to append to the conversation
    pub message: Message,

    /// Usage of this call; zero when the backend reports none
    pub usage: TokenUsage,
}

/// A chat backend
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Provider name (e.g., "openai", "anthropic", "ollama")
    fn name(&self) -> &str;

    /// Model identifier sent to the backend
    fn model(&self) -> &str;

    /// Request one completion
    ///
    /// # Arguments
    /// * `messages` - Conversation history including the system prompt
    /// * `tools` - Capability schemas the model may call; empty disables tools
    ///
    /// # Returns
    /// * `Ok(Completion)` - Assistant message with zero or more tool calls
    /// * `Err(LLMError)` - Transport, auth or payload failure
    async fn complete(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<Completion>;

    /// Check if the provider is currently reachable
    /// Default implementation returns true.
    async fn check_health(&self) -> bool {
        true
    }
}

/// Build the client for a resolved model
pub fn build_client(selection: &ModelSelection) -> Result<Arc<dyn CompletionClient>> {
    let endpoint = &selection.endpoint;
    let client: Arc<dyn CompletionClient> = match endpoint.kind {
        ProviderKind::OpenAI => Arc::new(OpenAIClient::new(
            &selection.provider,
            &endpoint.base_url,
            &selection.model,
            selection.api_key.clone(),
        )?),
        ProviderKind::Anthropic => Arc::new(AnthropicClient::new(
            &endpoint.base_url,
            &selection.model,
            selection.api_key.clone(),
        )?),
        ProviderKind::Ollama => Arc::new(OllamaClient::new(&endpoint.base_url, &selection.model)?),
    };
    tracing::debug!(
        "Built {} client for {}/{}",
        endpoint.kind,
        selection.provider,
        selection.model
    );
    Ok(client)
}

/// Shared HTTP client with a generous request timeout
pub(crate) fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(300))
        .build()
        .map_err(|e| LLMError::Unknown(format!("Failed to create HTTP client: {}", e)))
}

/// Map a transport error
pub(crate) fn send_error(err: reqwest::Error, base_url: &str) -> LLMError {
    if err.is_timeout() {
        LLMError::Timeout
    } else if err.is_connect() {
        LLMError::ProviderUnavailable(format!("Cannot connect to {}", base_url))
    } else {
        LLMError::NetworkError(err.to_string())
    }
}

/// Turn a non-2xx response into an error
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(match status.as_u16() {
        401 | 403 => LLMError::AuthenticationFailed(text),
        429 => LLMError::RateLimitExceeded,
        _ => LLMError::InvalidRequest(format!("{}: {}", status, text)),
    })
}

/// Fresh tool call id for backends that do not assign one
pub(crate) fn new_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// Recover a tool call that a model wrote as text instead of a structured call
///
/// Handles multiple LLM output formats:
/// 1. Raw JSON: `{"name": "...", "arguments": {...}}` (or `"function"` as key)
/// 2. Fenced JSON (with or without trailing text): ` ```json\n{...}\n``` `
/// 3. `<tool_call>name({...})</tool_call>` XML markers
/// 4. JSON embedded in prose
pub fn parse_tool_calls(content: &str) -> Option<ToolCall> {
    let trimmed = content.trim();

    // Pattern 1: Raw JSON
    if let Some(tc) = try_parse_function_json(trimmed) {
        return Some(tc);
    }

    // Pattern 2: Extract from markdown code fences (even with trailing text)
    if let Some(inner) = extract_fenced_json(trimmed) {
        if let Some(tc) = try_parse_function_json(inner.trim()) {
            return Some(tc);
        }
    }

    // Pattern 3: <tool_call>name({...})</tool_call> XML markers
    if let (Some(start), Some(end)) = (trimmed.find("<tool_call>"), trimmed.find("</tool_call>")) {
        if start + 11 <= end {
            let tool_content = &trimmed[start + 11..end];
            if let Some(tc) = try_parse_function_json(tool_content.trim()) {
                return Some(tc);
            }
            if let Some(paren_pos) = tool_content.find('(') {
                let tool_name = &tool_content[..paren_pos];
                let args_end = tool_content.rfind(')').unwrap_or(tool_content.len());
                if paren_pos < args_end {
                    return Some(ToolCall::new(
                        new_call_id(),
                        tool_name.trim(),
                        &tool_content[paren_pos + 1..args_end],
                    ));
                }
            }
        }
    }

    // Pattern 4: Scan for a call object anywhere in the content
    for marker in ["{\"name\"", "{\"function\""] {
        if let Some(pos) = trimmed.find(marker) {
            if let Some(json_str) = extract_balanced_json(&trimmed[pos..]) {
                if let Some(tc) = try_parse_function_json(json_str) {
                    return Some(tc);
                }
            }
        }
    }

    None
}

/// Try to parse `{"name" | "function": "...", "arguments" | "parameters": {...}}`
fn try_parse_function_json(s: &str) -> Option<ToolCall> {
    let json: serde_json::Value = serde_json::from_str(s).ok()?;
    let name = json
        .get("name")
        .or_else(|| json.get("function"))?
        .as_str()?;
    let arguments = json.get("arguments").or_else(|| json.get("parameters"))?;
    let arguments = match arguments {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Some(ToolCall::new(new_call_id(), name, arguments))
}

/// Extract the body of the first markdown code fence in the text.
///
/// Works even when there is trailing prose after the closing ```.
/// Returns `None` if no fenced block is found.
fn extract_fenced_json(content: &str) -> Option<&str> {
    // Find opening fence
    let fence_start = content.find("```")?;
    let after_opening = &content[fence_start + 3..];

    // Skip the language tag line (e.g. "json\n")
    let body_start_rel = after_opening.find('\n')? + 1;
    let body_start = fence_start + 3 + body_start_rel;

    // Find closing fence after the body starts
    let closing = content[body_start..].find("```")?;
    let body_end = body_start + closing;

    if body_start >= body_end {
        return None;
    }

    Some(&content[body_start..body_end])
}

/// Extract a balanced JSON object starting at position 0 of `s`.
///
/// Counts `{` / `}` depth, respecting string literals, to find the
/// matching close brace.
fn extract_balanced_json(s: &str) -> Option<&str> {
    if !s.starts_with('{') {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
