//! Database-scoped agents and their tools.
//!
//! An [`Agent`] is a tool-using executor bound to exactly one database with
//! fixed instructions. Its tools are typed records whose handlers capture the
//! target database by value at creation time, so a call can never be
//! retargeted at another database. Tools are stateless between requests;
//! request-scoped state (shared memory, cancellation, spans) arrives with
//! each [`ToolInvocation`].

pub mod factory;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::llm::ToolDefinition;
use crate::memory::SharedMemory;
use crate::runtime::spans::SpanCollector;

pub use factory::{AgentFactory, AgentPool, PoolStatus};

/// Request-scoped context handed to every tool call.
#[derive(Clone)]
pub struct ToolInvocation {
    pub arguments: Value,
    /// The current request's shared memory, and only it.
    pub memory: Arc<SharedMemory>,
    pub cancel: CancellationToken,
    pub spans: SpanCollector,
    /// Span to nest tool-internal spans under.
    pub parent_span: Option<String>,
}

pub type ToolHandler =
    Arc<dyn Fn(ToolInvocation) -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync>;

/// A named callable with a typed argument shape.
#[derive(Clone)]
pub struct Tool {
    pub definition: ToolDefinition,
    pub handler: ToolHandler,
}

impl Tool {
    pub fn new(definition: ToolDefinition, handler: ToolHandler) -> Self {
        Self {
            definition,
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub async fn invoke(&self, invocation: ToolInvocation) -> anyhow::Result<String> {
        (self.handler)(invocation).await
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.definition.name)
            .finish()
    }
}

/// A tool-using executor with fixed instructions and a bound tool set.
#[derive(Clone)]
pub struct Agent {
    pub id: Uuid,
    /// Display name, e.g. `Agent_kgnormal`.
    pub name: String,
    /// Bound database; `None` for synthetic agents (supervisor, answer).
    pub database: Option<String>,
    pub instructions: String,
    pub tools: Vec<Tool>,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        database: Option<String>,
        instructions: impl Into<String>,
        tools: Vec<Tool>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            database,
            instructions: instructions.into(),
            tools,
            created_at: Utc::now(),
        }
    }

    pub fn tool(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition.clone()).collect()
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("database", &self.database)
            .field("tools", &self.tools.iter().map(Tool::name).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop_tool(name: &str) -> Tool {
        Tool::new(
            ToolDefinition {
                name: name.to_string(),
                description: "test tool".to_string(),
                parameters: json!({"type": "object", "properties": {}}),
            },
            Arc::new(|_inv| Box::pin(async { Ok("ok".to_string()) })),
        )
    }

    #[test]
    fn tools_are_found_by_name() {
        let agent = Agent::new(
            "Agent_kgnormal",
            Some("kgnormal".to_string()),
            "instructions",
            vec![noop_tool("query_db"), noop_tool("get_schema")],
        );
        assert!(agent.tool("query_db").is_some());
        assert!(agent.tool("missing").is_none());
        assert_eq!(agent.tool_definitions().len(), 2);
    }
}
