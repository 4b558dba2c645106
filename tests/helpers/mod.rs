//! Shared in-process fakes for integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use serde_json::{json, Value};

use graph_council::graph::{GraphError, GraphGateway, Row, Rows, SchemaSnapshot};
use graph_council::llm::{ChatMessage, ChatTurn, LlmClient, TokenUsage, ToolDefinition};

/// A scripted fulltext hit.
#[derive(Clone)]
pub struct Hit {
    pub node_id: &'static str,
    pub name: &'static str,
    pub score: f64,
    pub label: &'static str,
}

/// Graph gateway fake with per-database scripting.
#[derive(Default)]
pub struct FakeGraphGateway {
    pub unreachable: HashSet<String>,
    pub fulltext: HashMap<String, Vec<Hit>>,
    /// Rows served for the neighborhood expansion query, per database.
    pub neighbors: HashMap<String, Vec<Value>>,
    pub cypher_calls: AtomicUsize,
    pub ddl: Mutex<Vec<String>>,
}

impl FakeGraphGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unreachable(mut self, databases: &[&str]) -> Self {
        self.unreachable = databases.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_fulltext(mut self, database: &str, hits: Vec<Hit>) -> Self {
        self.fulltext.insert(database.to_string(), hits);
        self
    }

    pub fn with_neighbors(mut self, database: &str, rows: Vec<Value>) -> Self {
        self.neighbors.insert(database.to_string(), rows);
        self
    }

    pub fn calls(&self) -> usize {
        self.cypher_calls.load(Ordering::SeqCst)
    }

    fn check_reachable(&self, database: &str) -> Result<(), GraphError> {
        if self.unreachable.contains(database) {
            return Err(GraphError::Unreachable(format!("{database}: connection refused")));
        }
        Ok(())
    }
}

fn to_row(value: &Value) -> Row {
    value
        .as_object()
        .cloned()
        .unwrap_or_else(serde_json::Map::new)
}

#[async_trait]
impl GraphGateway for FakeGraphGateway {
    async fn run_cypher(&self, database: &str, query: &str, _params: Value) -> Result<Rows, GraphError> {
        self.check_reachable(database)?;
        self.cypher_calls.fetch_add(1, Ordering::SeqCst);

        if query.starts_with("SHOW") {
            return Ok(Vec::new());
        }
        if query.contains("db.index.fulltext.queryNodes") {
            return Ok(self
                .fulltext
                .get(database)
                .map(|hits| {
                    hits.iter()
                        .map(|hit| {
                            to_row(&json!({
                                "node_id": hit.node_id,
                                "labels": [hit.label],
                                "display_name": hit.name,
                                "score": hit.score,
                            }))
                        })
                        .collect()
                })
                .unwrap_or_default());
        }
        if query.contains("OPTIONAL MATCH") {
            return Ok(self
                .neighbors
                .get(database)
                .map(|rows| rows.iter().map(to_row).collect())
                .unwrap_or_default());
        }
        if query.contains("db.labels") {
            return Ok(vec![to_row(&json!({"label": "Company"}))]);
        }
        if query.contains("db.relationshipTypes") {
            return Ok(vec![to_row(&json!({"relationshipType": "SUPPLIES"}))]);
        }
        if query.contains("db.propertyKeys") {
            return Ok(vec![to_row(&json!({"propertyKey": "name"}))]);
        }
        Ok(Vec::new())
    }

    async fn run_ddl(&self, database: &str, statement: &str, _params: Value) -> Result<Rows, GraphError> {
        self.check_reachable(database)?;
        self.ddl.lock().unwrap().push(statement.to_string());
        Ok(Vec::new())
    }

    async fn schema_snapshot(&self, database: &str) -> Result<SchemaSnapshot, GraphError> {
        self.check_reachable(database)?;
        Ok(SchemaSnapshot {
            database: database.to_string(),
            labels: vec!["Company".to_string()],
            relationship_types: vec!["SUPPLIES".to_string()],
            property_keys: vec!["name".to_string()],
        })
    }
}

/// Model fake: answers immediately by echoing the prompt it was handed, so
/// assertions can check that findings flow into the answer. A `slow_marker`
/// in the system prompt makes the call hang past any realistic timeout.
#[derive(Default)]
pub struct FakeLlm {
    pub slow_marker: Option<String>,
    pub fail_marker: Option<String>,
}

impl FakeLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slow_on(marker: &str) -> Self {
        Self {
            slow_marker: Some(marker.to_string()),
            fail_marker: None,
        }
    }

    pub fn fail_on(marker: &str) -> Self {
        Self {
            slow_marker: None,
            fail_marker: Some(marker.to_string()),
        }
    }
}

#[async_trait]
impl LlmClient for FakeLlm {
    async fn chat(&self, _system: &str, _user: &str) -> AnyResult<String> {
        Ok("hybrid".to_string())
    }

    async fn chat_json(&self, _system: &str, _user: &str) -> AnyResult<String> {
        Ok("{\"entities\": []}".to_string())
    }

    async fn chat_with_tools(
        &self,
        system: &str,
        messages: &[ChatMessage],
        _tools: &[ToolDefinition],
    ) -> AnyResult<ChatTurn> {
        if let Some(marker) = &self.slow_marker {
            if system.contains(marker.as_str()) {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
        }
        if let Some(marker) = &self.fail_marker {
            if system.contains(marker.as_str()) {
                anyhow::bail!("scripted model failure");
            }
        }
        let prompt: String = messages
            .last()
            .map(|m| m.content.chars().take(2000).collect())
            .unwrap_or_default();
        Ok(ChatTurn {
            text: format!("ANSWER[{prompt}]"),
            tool_calls: vec![],
            usage: TokenUsage::default(),
        })
    }

    fn model_name(&self) -> &str {
        "fake-model"
    }

    fn provider_name(&self) -> &str {
        "fake"
    }
}
