//! LLM client construction from configuration.

use std::sync::Arc;

use anyhow::Result;

use super::anthropic::AnthropicClient;
use super::openai::OpenAiClient;
use super::LlmClient;
use crate::config::{Config, LlmBackend};

/// Build the configured model client. The API key comes from the provider's
/// environment variable; `AGENT_MODEL` overrides the provider default.
pub fn create_llm_client(config: &Config) -> Result<Arc<dyn LlmClient>> {
    let client: Arc<dyn LlmClient> = match config.backend {
        LlmBackend::OpenAi => match &config.model {
            Some(model) => Arc::new(OpenAiClient::with_model(openai_key()?, model)),
            None => Arc::new(OpenAiClient::from_env()?),
        },
        LlmBackend::Anthropic => match &config.model {
            Some(model) => Arc::new(AnthropicClient::with_model(anthropic_key()?, model)),
            None => Arc::new(AnthropicClient::from_env()?),
        },
    };
    tracing::info!(
        provider = client.provider_name(),
        model = client.model_name(),
        "llm client initialized"
    );
    Ok(client)
}

fn openai_key() -> Result<String> {
    std::env::var("OPENAI_API_KEY")
        .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))
}

fn anthropic_key() -> Result<String> {
    std::env::var("ANTHROPIC_API_KEY")
        .map_err(|_| anyhow::anyhow!("ANTHROPIC_API_KEY environment variable not set"))
}
