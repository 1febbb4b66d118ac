use super::{
    check_status, http_client, new_call_id, send_error, Completion, CompletionClient, LLMError,
    Message, MessageRole, ToolCall,
};
use crate::usage::TokenUsage;
use async_trait::async_trait;
use sdk::ToolSchema;
use serde_json::{json, Value};

/// Client for OpenAI-compatible `/chat/completions` endpoints
///
/// Also covers OpenRouter, vLLM, LM Studio and any server speaking the same
/// protocol. The API key is optional so local servers work without one.
pub struct OpenAIClient {
    provider: String,
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAIClient {
    pub fn new(
        provider: &str,
        base_url: &str,
        model: &str,
        api_key: Option<String>,
    ) -> super::Result<Self> {
        Ok(Self {
            provider: provider.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            client: http_client()?,
        })
    }
}

/// Convert canonical messages into chat-completions wire format
pub(crate) fn wire_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| match msg.role {
            MessageRole::Assistant if msg.has_tool_calls() => json!({
                "role": "assistant",
                "content": msg.content,
                "tool_calls": msg.calls().iter().map(|tc| json!({
                    "id": tc.id,
                    "type": "function",
                    "function": {"name": tc.name, "arguments": tc.arguments},
                })).collect::<Vec<_>>(),
            }),
            MessageRole::Tool => json!({
                "role": "tool",
                "tool_call_id": msg.tool_call_id,
                "content": msg.text(),
            }),
            role => json!({"role": role.to_string(), "content": msg.text()}),
        })
        .collect()
}

/// Capability schemas in function-calling format
pub(crate) fn wire_tools(tools: &[ToolSchema]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                }
            })
        })
        .collect()
}

/// Normalise a chat-completions response body
pub(crate) fn parse_response(data: &Value) -> super::Result<Completion> {
    let message = data
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .ok_or_else(|| LLMError::ParseError("No choices in response".to_string()))?;

    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(String::from);

    let tool_calls = message
        .get("tool_calls")
        .and_then(|t| t.as_array())
        .map(|calls| calls.iter().filter_map(parse_tool_call).collect())
        .unwrap_or_default();

    let usage = data
        .get("usage")
        .map(|u| {
            TokenUsage::new(
                u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
                u.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
            )
        })
        .unwrap_or_default();

    Ok(Completion {
        message: Message::assistant_with_tools(content, tool_calls),
        usage,
    })
}

fn parse_tool_call(raw: &Value) -> Option<ToolCall> {
    let function = raw.get("function")?;
    let name = function.get("name")?.as_str()?;
    let id = raw
        .get("id")
        .and_then(|v| v.as_str())
        .filter(|id| !id.is_empty())
        .map(String::from)
        .unwrap_or_else(new_call_id);
    // Some servers send arguments as an object rather than a string
    let arguments = match function.get("arguments") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "{}".to_string(),
        Some(other) => other.to_string(),
    };
    Some(ToolCall::new(id, name, arguments))
}

#[async_trait]
impl CompletionClient for OpenAIClient {
    fn name(&self) -> &str {
        &self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> super::Result<Completion> {
        tracing::info!("Calling {} model: {}", self.provider, self.model);
        let start = std::time::Instant::now();

        let url = format!("{}/chat/completions", self.base_url);

        let mut payload = json!({
            "model": self.model,
            "messages": wire_messages(messages),
        });
        if !tools.is_empty() {
            payload["tools"] = Value::Array(wire_tools(tools));
            payload["tool_choice"] = json!("auto");
        }

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&payload);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| send_error(e, &self.base_url))?;
        let response = check_status(response).await?;

        let data: Value = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(e.to_string()))?;

        tracing::info!(
            "{} response received in {:.1}s",
            self.provider,
            start.elapsed().as_secs_f64()
        );
        parse_response(&data)
    }

    async fn check_health(&self) -> bool {
        let mut request = self.client.get(format!("{}/models", self.base_url));
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }
        request
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}
