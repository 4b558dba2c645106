//! LLM client abstraction.
//!
//! Unified interface over the model providers (OpenAI, Anthropic). The
//! orchestration core only ever sees this trait; signature and wire-format
//! differences between the providers (tools vs functions, content blocks vs
//! choices) are absorbed by the implementations.

pub mod anthropic;
pub mod factory;
pub mod openai;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use factory::create_llm_client;

/// Tool definition handed to the model.
///
/// - Anthropic: rendered into the `tools` array (`input_schema`)
/// - OpenAI: rendered into `tools` as function definitions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (e.g. "query_db")
    pub name: String,
    /// Description of what the tool does
    pub description: String,
    /// JSON Schema for the tool's arguments
    pub parameters: serde_json::Value,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestedToolCall {
    /// Provider-assigned call id, echoed back with the result.
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Token accounting for one model call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// One turn of a tool-use conversation as the adapter sees it.
#[derive(Debug, Clone, Default)]
pub struct ChatTurn {
    /// Assistant text, possibly empty when the model only calls tools.
    pub text: String,
    pub tool_calls: Vec<RequestedToolCall>,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
    Tool,
}

/// Conversation message in provider-neutral shape.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    /// Set on `Assistant` messages that requested tool calls; both providers
    /// require the calls to be echoed back ahead of their results.
    pub tool_calls: Vec<RequestedToolCall>,
    /// Set on `Tool` messages: the call being answered.
    pub tool_call_id: Option<String>,
    pub tool_name: Option<String>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
        }
    }

    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<RequestedToolCall>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_calls: calls,
            tool_call_id: None,
            tool_name: None,
        }
    }

    pub fn tool_result(call: &RequestedToolCall, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call.id.clone()),
            tool_name: Some(call.name.clone()),
        }
    }
}

/// Unified LLM client interface.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Call the model with system + user prompts, return raw text.
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;

    /// Call the model expecting a JSON object response.
    /// - OpenAI: uses response_format json_object mode
    /// - Anthropic: adds a JSON instruction to the system prompt
    async fn chat_json(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;

    /// One turn of a tool-use conversation: the model may answer with text,
    /// tool calls, or both. The caller feeds tool results back as `Tool`
    /// messages and calls again.
    async fn chat_with_tools(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatTurn>;

    /// Model name for logging.
    fn model_name(&self) -> &str;

    /// Provider name for logging.
    fn provider_name(&self) -> &str;
}
