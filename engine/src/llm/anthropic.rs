use super::{
    check_status, http_client, new_call_id, send_error, Completion, CompletionClient, LLMError,
    Message, MessageRole, ToolCall,
};
use crate::repair;
use crate::usage::TokenUsage;
use async_trait::async_trait;
use sdk::ToolSchema;
use serde_json::{json, Value};

const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

/// Client for the Anthropic Messages API
pub struct AnthropicClient {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(base_url: &str, model: &str, api_key: Option<String>) -> super::Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            client: http_client()?,
        })
    }
}

/// Split the conversation into the `system` field and content-block messages
///
/// System messages are concatenated. Consecutive tool results are merged into
/// a single user turn since the API requires strict role alternation.
pub(crate) fn wire_messages(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let mut system: Vec<&str> = Vec::new();
    let mut out: Vec<Value> = Vec::new();

    for msg in messages {
        match msg.role {
            MessageRole::System => system.push(msg.text()),
            MessageRole::User => out.push(json!({"role": "user", "content": msg.text()})),
            MessageRole::Assistant => {
                let mut blocks = Vec::new();
                if !msg.text().is_empty() {
                    blocks.push(json!({"type": "text", "text": msg.text()}));
                }
                for tc in msg.calls() {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": tc.id,
                        "name": tc.name,
                        "input": Value::Object(repair::repair(&tc.arguments)),
                    }));
                }
                out.push(json!({"role": "assistant", "content": blocks}));
            }
            MessageRole::Tool => {
                let block = json!({
                    "type": "tool_result",
                    "tool_use_id": msg.tool_call_id,
                    "content": msg.text(),
                });
                let merged = out.last_mut().is_some_and(|last| {
                    if last["role"] != "user" {
                        return false;
                    }
                    match last["content"].as_array_mut() {
                        Some(blocks) => {
                            blocks.push(block.clone());
                            true
                        }
                        None => false,
                    }
                });
                if !merged {
                    out.push(json!({"role": "user", "content": [block]}));
                }
            }
        }
    }

    let system = if system.is_empty() {
        None
    } else {
        Some(system.join("\n\n"))
    };
    (system, out)
}

pub(crate) fn wire_tools(tools: &[ToolSchema]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "input_schema": t.parameters,
            })
        })
        .collect()
}

/// Normalise a Messages API response body
pub(crate) fn parse_response(data: &Value) -> super::Result<Completion> {
    let blocks = data
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| LLMError::ParseError("No content in response".to_string()))?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in blocks {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                if let Some(t) = block.get("text").and_then(|t| t.as_str()) {
                    text.push_str(t);
                }
            }
            Some("tool_use") => {
                let Some(name) = block.get("name").and_then(|n| n.as_str()) else {
                    continue;
                };
                let id = block
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(String::from)
                    .unwrap_or_else(new_call_id);
                let input = block.get("input").cloned().unwrap_or_else(|| json!({}));
                tool_calls.push(ToolCall::new(id, name, input.to_string()));
            }
            _ => {}
        }
    }

    let usage = data
        .get("usage")
        .map(|u| {
            TokenUsage::new(
                u.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
                u.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
            )
        })
        .unwrap_or_default();

    let content = if text.is_empty() { None } else { Some(text) };
    Ok(Completion {
        message: Message::assistant_with_tools(content, tool_calls),
        usage,
    })
}

#[async_trait]
impl CompletionClient for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> super::Result<Completion> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            LLMError::AuthenticationFailed(
                "no API key configured (set ANTHROPIC_API_KEY)".to_string(),
            )
        })?;

        tracing::info!("Calling Anthropic model: {}", self.model);
        let start = std::time::Instant::now();

        let url = format!("{}/messages", self.base_url);
        let (system, api_messages) = wire_messages(messages);

        let mut payload = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": api_messages,
        });
        if let Some(system) = system {
            payload["system"] = json!(system);
        }
        if !tools.is_empty() {
            payload["tools"] = Value::Array(wire_tools(tools));
        }

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| send_error(e, &self.base_url))?;
        let response = check_status(response).await?;

        let data: Value = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(e.to_string()))?;

        tracing::info!(
            "Anthropic response received in {:.1}s",
            start.elapsed().as_secs_f64()
        );
        parse_response(&data)
    }

    async fn check_health(&self) -> bool {
        self.api_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_folded_and_tool_results_merged() {
        let messages = vec![
            Message::system("be brief"),
            Message::user("list"),
            Message::assistant_with_tools(
                Some("checking".into()),
                vec![
                    ToolCall::new("t1", "glob", r#"{"pattern":"*"}"#),
                    ToolCall::new("t2", "git_status", ""),
                ],
            ),
            Message::tool_result("a.rs", "t1"),
            Message::tool_result("clean", "t2"),
        ];
        let (system, wire) = wire_messages(&messages);
        assert_eq!(system.as_deref(), Some("be brief"));
        assert_eq!(wire.len(), 3);

        let assistant = wire[1]["content"].as_array().unwrap();
        assert_eq!(assistant[0]["type"], "text");
        assert_eq!(assistant[1]["input"], json!({"pattern": "*"}));
        assert_eq!(assistant[2]["input"], json!({}));

        let results = wire[2]["content"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1]["tool_use_id"], "t2");
    }

    #[test]
    fn test_parse_response() {
        let data = json!({
            "content": [
                {"type": "text", "text": "Let me look."},
                {"type": "tool_use", "id": "toolu_1", "name": "read_file", "input": {"path": "x"}}
            ],
            "usage": {"input_tokens": 100, "output_tokens": 20}
        });
        let completion = parse_response(&data).unwrap();
        assert_eq!(completion.message.text(), "Let me look.");
        assert_eq!(completion.message.calls()[0].id, "toolu_1");
        assert_eq!(completion.message.calls()[0].arguments, r#"{"path":"x"}"#);
        assert_eq!(completion.usage, TokenUsage::new(100, 20));
    }

    #[test]
    fn test_tools_use_input_schema() {
        let tools = vec![ToolSchema {
            name: "glob".into(),
            description: "find".into(),
            parameters: json!({"type": "object"}),
        }];
        assert_eq!(wire_tools(&tools)[0]["input_schema"], json!({"type": "object"}));
    }
}
