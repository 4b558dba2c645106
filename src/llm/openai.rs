//! OpenAI client.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ChatMessage, ChatRole, ChatTurn, LlmClient, RequestedToolCall, TokenUsage, ToolDefinition};

/// Default OpenAI model
const DEFAULT_MODEL: &str = "gpt-4o";

/// OpenAI API client
#[derive(Clone)]
pub struct OpenAiClient {
    api_key: String,
    client: reqwest::Client,
    model: String,
}

impl OpenAiClient {
    pub fn new(api_key: String) -> Self {
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
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
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self::new(api_key))
    }

    async fn post(&self, body: Value) -> Result<Value> {
        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("OpenAI API error {}: {}", status, body));
        }
        Ok(response.json().await?)
    }

    async fn call_api(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        json_mode: bool,
    ) -> Result<String> {
        let mut body = json!({
            "model": &self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt}
            ],
            "temperature": 0.1
        });
        if json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }

        let payload = self.post(body).await?;
        payload["choices"]
            .get(0)
            .and_then(|c| c["message"]["content"].as_str())
            .map(String::from)
            .ok_or_else(|| anyhow!("OpenAI returned no choices"))
    }

    fn render_messages(&self, system_prompt: &str, messages: &[ChatMessage]) -> Vec<Value> {
        let mut rendered = vec![json!({"role": "system", "content": system_prompt})];
        for message in messages {
            match message.role {
                ChatRole::User => rendered.push(json!({"role": "user", "content": message.content})),
                ChatRole::Assistant if message.tool_calls.is_empty() => {
                    rendered.push(json!({"role": "assistant", "content": message.content}))
                }
                ChatRole::Assistant => {
                    let calls: Vec<Value> = message
                        .tool_calls
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": call.arguments.to_string(),
                                }
                            })
                        })
                        .collect();
                    rendered.push(json!({
                        "role": "assistant",
                        "content": message.content,
                        "tool_calls": calls,
                    }))
                }
                ChatRole::Tool => rendered.push(json!({
                    "role": "tool",
                    "tool_call_id": message.tool_call_id,
                    "content": message.content,
                })),
            }
        }
        rendered
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        self.call_api(system_prompt, user_prompt, false).await
    }

    async fn chat_json(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        self.call_api(system_prompt, user_prompt, true).await
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
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": &self.model,
            "messages": self.render_messages(system_prompt, messages),
            "temperature": 0.1,
        });
        if !rendered_tools.is_empty() {
            body["tools"] = Value::Array(rendered_tools);
        }

        let payload = self.post(body).await?;

        #[derive(Deserialize)]
        struct FunctionCall {
            name: String,
            // OpenAI returns arguments as a JSON string
            arguments: String,
        }
        #[derive(Deserialize)]
        struct ToolCall {
            id: String,
            function: FunctionCall,
        }
        #[derive(Deserialize)]
        struct Message {
            #[serde(default)]
            content: Option<String>,
            #[serde(default)]
            tool_calls: Vec<ToolCall>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: Message,
        }
        #[derive(Deserialize)]
        struct Usage {
            #[serde(default)]
            prompt_tokens: u64,
            #[serde(default)]
            completion_tokens: u64,
        }
        #[derive(Deserialize)]
        struct ApiResponse {
            choices: Vec<Choice>,
            #[serde(default)]
            usage: Option<Usage>,
        }

        let api_response: ApiResponse = serde_json::from_value(payload)
            .map_err(|e| anyhow!("Failed to parse OpenAI response: {}", e))?;
        let usage = api_response
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("OpenAI returned no choices"))?;

        let mut tool_calls = Vec::new();
        for call in choice.message.tool_calls {
            let arguments: Value = serde_json::from_str(&call.function.arguments)
                .map_err(|e| anyhow!("Failed to parse tool arguments: {}", e))?;
            tool_calls.push(RequestedToolCall {
                id: call.id,
                name: call.function.name,
                arguments,
            });
        }

        Ok(ChatTurn {
            text: choice.message.content.unwrap_or_default(),
            tool_calls,
            usage,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        "OpenAI"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_model() {
        let client = OpenAiClient::with_model("test-key".to_string(), "gpt-4o-mini");
        assert_eq!(client.model_name(), "gpt-4o-mini");
        assert_eq!(client.provider_name(), "OpenAI");
    }

    #[test]
    fn tool_messages_carry_call_id() {
        let client = OpenAiClient::with_model("test-key".to_string(), "gpt-4o");
        let call = RequestedToolCall {
            id: "call_1".to_string(),
            name: "query_db".to_string(),
            arguments: json!({"query": "MATCH (n) RETURN n"}),
        };
        let rendered = client.render_messages(
            "system",
            &[
                ChatMessage::user("question"),
                ChatMessage::tool_result(&call, "rows"),
            ],
        );
        assert_eq!(rendered.len(), 3);
        assert_eq!(rendered[2]["role"], "tool");
        assert_eq!(rendered[2]["tool_call_id"], "call_1");
    }
}
