//! Anthropic client.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ChatMessage, ChatRole, ChatTurn, LlmClient, RequestedToolCall, TokenUsage, ToolDefinition};

/// Default Anthropic model
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// Anthropic Claude API client
#[derive(Clone)]
pub struct AnthropicClient {
    api_key: String,
    client: reqwest::Client,
    model: String,
}

impl AnthropicClient {
    pub fn new(api_key: String) -> Self {
        let model = std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Self {
            api_key,
            client: reqwest::Client::new(),
            model,
        }
    }

    pub fn with_model(api_key: String, model: &str) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            model: model.to_string(),
        }
    }

    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| anyhow!("ANTHROPIC_API_KEY environment variable not set"))?;
        Ok(Self::new(api_key))
    }

    async fn post(&self, body: Value) -> Result<Value> {
        let response = self
            .client
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Anthropic API error {}: {}", status, body));
        }
        Ok(response.json().await?)
    }

    /// Plain text call: one user turn, no tools, text blocks folded by
    /// `chat_with_tools`.
    async fn call_api(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let turn = self
            .chat_with_tools(system_prompt, &[ChatMessage::user(user_prompt)], &[])
            .await?;
        if turn.text.is_empty() {
            return Err(anyhow!("Empty response from Anthropic"));
        }
        Ok(turn.text)
    }

    /// Fold the provider-neutral history into Anthropic's user/assistant
    /// alternation; tool results become `tool_result` content blocks.
    fn render_messages(&self, messages: &[ChatMessage]) -> Vec<Value> {
        let mut rendered: Vec<Value> = Vec::new();
        for message in messages {
            match message.role {
                ChatRole::User => rendered.push(json!({"role": "user", "content": message.content})),
                ChatRole::Assistant if message.tool_calls.is_empty() => {
                    rendered.push(json!({"role": "assistant", "content": message.content}))
                }
                ChatRole::Assistant => {
                    let mut blocks: Vec<Value> = Vec::new();
                    if !message.content.is_empty() {
                        blocks.push(json!({"type": "text", "text": message.content}));
                    }
                    for call in &message.tool_calls {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": call.arguments,
                        }));
                    }
                    rendered.push(json!({"role": "assistant", "content": blocks}))
                }
                ChatRole::Tool => rendered.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": message.tool_call_id,
                        "content": message.content,
                    }]
                })),
            }
        }
        rendered
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        self.call_api(system_prompt, user_prompt).await
    }

    async fn chat_json(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        // No json_object mode; rely on prompt engineering.
        let json_system = format!(
            "{}\n\nIMPORTANT: Respond with valid JSON only. No markdown code blocks, no explanations.",
            system_prompt
        );
        self.call_api(&json_system, user_prompt).await
    }

    async fn chat_with_tools(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatTurn> {
        let rendered_tools: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect();

        let mut body = json!({
            "model": &self.model,
            "max_tokens": 4096,
            "system": system_prompt,
            "messages": self.render_messages(messages),
        });
        if !rendered_tools.is_empty() {
            body["tools"] = Value::Array(rendered_tools);
        }

        let payload = self.post(body).await?;

        #[derive(Deserialize)]
        struct ContentBlock {
            #[serde(rename = "type")]
            block_type: String,
            #[serde(default)]
            text: Option<String>,
            #[serde(default)]
            id: Option<String>,
            #[serde(default)]
            name: Option<String>,
            #[serde(default)]
            input: Option<Value>,
        }
        #[derive(Deserialize)]
        struct Usage {
            #[serde(default)]
            input_tokens: u64,
            #[serde(default)]
            output_tokens: u64,
        }
        #[derive(Deserialize)]
        struct ApiResponse {
            #[serde(default)]
            content: Vec<ContentBlock>,
            #[serde(default)]
            usage: Option<Usage>,
        }

        let api_response: ApiResponse = serde_json::from_value(payload)
            .map_err(|e| anyhow!("Failed to parse Anthropic response: {}", e))?;

        let mut turn = ChatTurn {
            usage: api_response
                .usage
                .map(|u| TokenUsage {
                    input_tokens: u.input_tokens,
                    output_tokens: u.output_tokens,
                })
                .unwrap_or_default(),
            ..Default::default()
        };

        for block in api_response.content {
            match block.block_type.as_str() {
                "text" => {
                    if let Some(text) = block.text {
                        if !turn.text.is_empty() {
                            turn.text.push('\n');
                        }
                        turn.text.push_str(&text);
                    }
                }
                "tool_use" => turn.tool_calls.push(RequestedToolCall {
                    id: block.id.unwrap_or_default(),
                    name: block.name.unwrap_or_default(),
                    arguments: block.input.unwrap_or(Value::Null),
                }),
                other => tracing::debug!(block_type = other, "ignoring content block"),
            }
        }

        Ok(turn)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        "Anthropic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_model() {
        let client = AnthropicClient::with_model("test-key".to_string(), "claude-3-opus");
        assert_eq!(client.model_name(), "claude-3-opus");
        assert_eq!(client.provider_name(), "Anthropic");
    }

    #[test]
    fn tool_results_become_tool_result_blocks() {
        let client = AnthropicClient::with_model("test-key".to_string(), DEFAULT_MODEL);
        let call = RequestedToolCall {
            id: "toolu_1".to_string(),
            name: "get_schema".to_string(),
            arguments: json!({}),
        };
        let rendered = client.render_messages(&[
            ChatMessage::user("question"),
            ChatMessage::assistant("calling tool"),
            ChatMessage::tool_result(&call, "Database: kgnormal"),
        ]);
        assert_eq!(rendered.len(), 3);
        assert_eq!(rendered[2]["role"], "user");
        assert_eq!(rendered[2]["content"][0]["type"], "tool_result");
        assert_eq!(rendered[2]["content"][0]["tool_use_id"], "toolu_1");
    }
}
