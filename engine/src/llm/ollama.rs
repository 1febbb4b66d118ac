//! Ollama completion client
//!
//! Talks to a local Ollama server (typically http://localhost:11434) through
//! `/api/chat` in non-streaming mode. Ollama returns tool arguments as JSON
//! objects; they are re-serialised to text so every backend hands the agent
//! the same shape. Models without native tool support often write the call
//! into the message text, which is recovered with [`super::parse_tool_calls`].

use async_trait::async_trait;
use reqwest::Client;
use sdk::ToolSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    check_status, http_client, new_call_id, send_error, Completion, CompletionClient, LLMError,
    Message, Result, ToolCall,
};
use crate::repair;
use crate::usage::TokenUsage;

/// Ollama client configuration
#[derive(Debug, Clone)]
pub struct OllamaClient {
    /// Base URL for Ollama API
    base_url: String,

    /// Model name to use (e.g., "llama3.1:8b")
    model: String,

    /// HTTP client for API requests
    client: Client,
}

impl OllamaClient {
    /// Create a new Ollama client
    ///
    /// # Arguments
    /// * `base_url` - Base URL for Ollama API (e.g., "http://localhost:11434")
    /// * `model` - Model name to use (e.g., "llama3.1:8b")
    pub fn new(base_url: &str, model: &str) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client: http_client()?,
        })
    }
}

/// Convert canonical messages to Ollama's format
fn convert_messages(messages: &[Message]) -> Vec<OllamaMessage> {
    messages
        .iter()
        .map(|msg| OllamaMessage {
            role: msg.role.to_string(),
            content: msg.text().to_string(),
            tool_calls: msg
                .calls()
                .iter()
                .map(|tc| OllamaToolCall {
                    function: OllamaFunction {
                        name: tc.name.clone(),
                        arguments: Value::Object(repair::repair(&tc.arguments)),
                    },
                })
                .collect(),
        })
        .collect()
}

fn convert_tools(tools: &[ToolSchema]) -> Vec<Value> {
    super::openai::wire_tools(tools)
}

/// Normalise an `/api/chat` response
fn normalise(response: OllamaResponse) -> Completion {
    let usage = TokenUsage::new(
        response.prompt_eval_count.unwrap_or(0),
        response.eval_count.unwrap_or(0),
    );
    let content = response.message.content;

    let mut tool_calls: Vec<ToolCall> = response
        .message
        .tool_calls
        .into_iter()
        .map(|tc| {
            let arguments = match tc.function.arguments {
                Value::String(s) => s,
                Value::Null => "{}".to_string(),
                other => other.to_string(),
            };
            ToolCall::new(new_call_id(), tc.function.name, arguments)
        })
        .collect();

    let content = if tool_calls.is_empty() {
        match super::parse_tool_calls(&content) {
            Some(tc) => {
                tracing::debug!("Recovered text tool call: {}", tc.name);
                tool_calls.push(tc);
                None
            }
            None => Some(content),
        }
    } else {
        Some(content)
    };
    let content = content.filter(|c| !c.trim().is_empty());

    Completion {
        message: Message::assistant_with_tools(content, tool_calls),
        usage,
    }
}

#[async_trait]
impl CompletionClient for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<Completion> {
        let ollama_messages = convert_messages(messages);

        tracing::debug!(
            "Ollama request: model={}, messages={}, total_chars={}",
            self.model,
            ollama_messages.len(),
            ollama_messages
                .iter()
                .map(|m| m.content.len())
                .sum::<usize>()
        );

        let request = OllamaRequest {
            model: self.model.clone(),
            messages: ollama_messages,
            tools: convert_tools(tools),
            stream: false,
        };

        let url = format!("{}/api/chat", self.base_url);
        let start = std::time::Instant::now();
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| send_error(e, &self.base_url))?;
        let response = check_status(response).await?;

        tracing::info!(
            "Ollama response received in {:.1}s",
            start.elapsed().as_secs_f64()
        );

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(format!("Failed to parse Ollama response: {}", e)))?;

        Ok(normalise(ollama_response))
    }

    async fn check_health(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

/// Ollama API request format
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    stream: bool,
}

/// Ollama message format
#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OllamaToolCall>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaToolCall {
    function: OllamaFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Ollama API response format
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MessageRole;
    use serde_json::json;

    #[test]
    fn test_client_properties() {
        let client = OllamaClient::new("http://localhost:11434/", "llama3.1:8b").unwrap();
        assert_eq!(client.name(), "ollama");
        assert_eq!(client.model(), "llama3.1:8b");
        assert_eq!(client.base_url, "http://localhost:11434");
    }

    #[test]
    fn test_message_conversion() {
        let messages = vec![
            Message::system("You are a helpful assistant"),
            Message::user("Hello"),
            Message::assistant_with_tools(
                None,
                vec![ToolCall::new("c1", "read_file", r#"{"path":"a.txt"}"#)],
            ),
            Message::tool_result("hi", "c1"),
        ];

        let converted = convert_messages(&messages);

        assert_eq!(converted.len(), 4);
        assert_eq!(converted[0].role, "system");
        assert_eq!(converted[2].content, "");
        assert_eq!(converted[2].tool_calls[0].function.arguments, json!({"path": "a.txt"}));
        assert_eq!(converted[3].role, MessageRole::Tool.to_string());
    }

    #[test]
    fn test_native_tool_calls_are_reserialised() {
        let response: OllamaResponse = serde_json::from_value(json!({
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [{"function": {"name": "glob", "arguments": {"pattern": "*.rs"}}}]
            },
            "done": true,
            "prompt_eval_count": 40,
            "eval_count": 8
        }))
        .unwrap();

        let completion = normalise(response);
        let calls = completion.message.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, r#"{"pattern":"*.rs"}"#);
        assert!(completion.message.content.is_none());
        assert_eq!(completion.usage, TokenUsage::new(40, 8));
    }

    #[test]
    fn test_text_tool_call_recovered() {
        let response: OllamaResponse = serde_json::from_value(json!({
            "message": {
                "role": "assistant",
                "content": "{\"name\": \"shell\", \"arguments\": {\"command\": \"ls\"}}"
            }
        }))
        .unwrap();

        let completion = normalise(response);
        assert_eq!(completion.message.calls()[0].name, "shell");
        assert!(completion.message.content.is_none());
        assert!(completion.usage.is_zero());
    }

    #[test]
    fn test_plain_answer() {
        let response: OllamaResponse = serde_json::from_value(json!({
            "message": {"role": "assistant", "content": "All done."}
        }))
        .unwrap();

        let completion = normalise(response);
        assert!(!completion.message.has_tool_calls());
        assert_eq!(completion.message.text(), "All done.");
    }
}
