//! Per-database agent construction and pooling.
//!
//! The factory snapshots each database's schema, builds the closure-bound
//! tool set, and parks the result in the pool. One agent per database at any
//! time; on schema re-probe the agent is replaced, never mutated. The pool's
//! readiness map is read-mostly and updated copy-on-write.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use serde::Serialize;
use serde_json::{json, Value};

use super::{Agent, Tool, ToolHandler, ToolInvocation};
use crate::config::Config;
use crate::graph::{GraphError, GraphGateway, SchemaSnapshot};
use crate::llm::ToolDefinition;
use crate::readiness::{AgentReadiness, ReadinessSummary};
use crate::semantic::resolver::{lexical_similarity, normalize_alias};

/// Per-database status row returned by listing endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub database: String,
    pub readiness: AgentReadiness,
    pub reason: String,
}

#[derive(Clone)]
struct PoolEntry {
    agent: Option<Arc<Agent>>,
    readiness: AgentReadiness,
    probed_at: Instant,
    reason: String,
}

/// Pool of database-bound agents with probe timestamps.
pub struct AgentPool {
    entries: RwLock<Arc<HashMap<String, PoolEntry>>>,
    probe_ttl: Duration,
}

impl AgentPool {
    pub fn new(probe_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(Arc::new(HashMap::new())),
            probe_ttl,
        }
    }

    pub fn agent(&self, database: &str) -> Option<Arc<Agent>> {
        self.snapshot().get(database).and_then(|e| e.agent.clone())
    }

    /// Effective readiness of one database, with stale probes downgraded.
    pub fn readiness_of(&self, database: &str) -> AgentReadiness {
        match self.snapshot().get(database) {
            Some(entry) => self.effective(entry),
            None => AgentReadiness::Unreachable,
        }
    }

    /// Readiness summary over `databases`.
    pub fn readiness(&self, databases: &[String]) -> ReadinessSummary {
        let mut summary = ReadinessSummary::default();
        for db in databases {
            summary.record(db, self.readiness_of(db));
        }
        summary
    }

    pub fn statuses(&self) -> Vec<PoolStatus> {
        let snapshot = self.snapshot();
        let mut rows: Vec<PoolStatus> = snapshot
            .iter()
            .map(|(db, entry)| PoolStatus {
                database: db.clone(),
                readiness: self.effective(entry),
                reason: entry.reason.clone(),
            })
            .collect();
        rows.sort_by(|a, b| a.database.cmp(&b.database));
        rows
    }

    fn effective(&self, entry: &PoolEntry) -> AgentReadiness {
        match entry.readiness {
            AgentReadiness::Ready if entry.probed_at.elapsed() > self.probe_ttl => {
                AgentReadiness::Degraded
            }
            other => other,
        }
    }

    fn fresh(&self, database: &str) -> bool {
        self.snapshot()
            .get(database)
            .map(|e| e.probed_at.elapsed() <= self.probe_ttl)
            .unwrap_or(false)
    }

    fn snapshot(&self) -> Arc<HashMap<String, PoolEntry>> {
        Arc::clone(&self.entries.read().expect("pool lock poisoned"))
    }

    fn store(&self, database: &str, entry: PoolEntry) {
        let mut guard = self.entries.write().expect("pool lock poisoned");
        let mut next = (**guard).clone();
        next.insert(database.to_string(), entry);
        *guard = Arc::new(next);
    }
}

/// Creates and manages per-database specialist agents.
pub struct AgentFactory {
    gateway: Arc<dyn GraphGateway>,
    config: Arc<Config>,
    pool: Arc<AgentPool>,
}

impl AgentFactory {
    pub fn new(gateway: Arc<dyn GraphGateway>, config: Arc<Config>) -> Self {
        let pool = Arc::new(AgentPool::new(config.probe_ttl));
        Self {
            gateway,
            config,
            pool,
        }
    }

    pub fn pool(&self) -> Arc<AgentPool> {
        Arc::clone(&self.pool)
    }

    /// Probe each database and make sure an agent exists for the reachable
    /// ones. Fresh pool entries are reused; stale ones are re-probed and the
    /// agent replaced. Returns one status row per requested database.
    pub async fn create_for_all(&self, databases: &[String]) -> Vec<PoolStatus> {
        let mut statuses = Vec::with_capacity(databases.len());
        for db in databases {
            if self.pool.fresh(db) && self.pool.readiness_of(db) != AgentReadiness::Unreachable {
                statuses.push(PoolStatus {
                    database: db.clone(),
                    readiness: self.pool.readiness_of(db),
                    reason: "cached".to_string(),
                });
                continue;
            }

            match self.gateway.schema_snapshot(db).await {
                Ok(schema) => {
                    let agent = Arc::new(self.build_agent(db, &schema));
                    self.pool.store(
                        db,
                        PoolEntry {
                            agent: Some(agent),
                            readiness: AgentReadiness::Ready,
                            probed_at: Instant::now(),
                            reason: "created".to_string(),
                        },
                    );
                    tracing::info!(database = db, "created agent");
                    statuses.push(PoolStatus {
                        database: db.clone(),
                        readiness: AgentReadiness::Ready,
                        reason: "created".to_string(),
                    });
                }
                Err(GraphError::Unreachable(reason)) => {
                    tracing::warn!(database = db, %reason, "database unreachable, no agent");
                    self.pool.store(
                        db,
                        PoolEntry {
                            agent: None,
                            readiness: AgentReadiness::Unreachable,
                            probed_at: Instant::now(),
                            reason: reason.clone(),
                        },
                    );
                    statuses.push(PoolStatus {
                        database: db.clone(),
                        readiness: AgentReadiness::Unreachable,
                        reason,
                    });
                }
                Err(err) => {
                    // Backend answered but the probe failed; keep an agent
                    // with a minimal schema so the debate can still attempt
                    // this database.
                    let reason = err.to_string();
                    tracing::warn!(database = db, %reason, "schema probe failed, degraded agent");
                    let schema = SchemaSnapshot {
                        database: db.clone(),
                        ..Default::default()
                    };
                    let agent = Arc::new(self.build_agent(db, &schema));
                    self.pool.store(
                        db,
                        PoolEntry {
                            agent: Some(agent),
                            readiness: AgentReadiness::Degraded,
                            probed_at: Instant::now(),
                            reason: reason.clone(),
                        },
                    );
                    statuses.push(PoolStatus {
                        database: db.clone(),
                        readiness: AgentReadiness::Degraded,
                        reason,
                    });
                }
            }
        }
        statuses
    }

    /// Build an agent bound to `database`. Every tool captures the database
    /// name by value, so calls cannot target another database.
    pub fn build_agent(&self, database: &str, schema: &SchemaSnapshot) -> Agent {
        let schema_text = schema.render();
        let tools = vec![
            self.query_db_tool(database),
            self.get_schema_tool(&schema_text),
            self.rerank_candidates_tool(),
            self.put_shared_result_tool(database),
        ];
        let instructions = format!(
            "You are a knowledge graph specialist for the '{database}' database.\n\n\
             Schema:\n{schema_text}\n\n\
             When answering questions:\n\
             1. Use get_schema to verify available node labels and relationships.\n\
             2. Use query_db to execute read-only Cypher against your database; bind values with params.\n\
             3. Store your final finding with put_shared_result so the supervisor can synthesize it.\n\
             4. Provide factual answers based on query results.\n\
             5. You may only query '{database}'. If the question needs another database, say so instead of querying."
        );
        Agent::new(
            format!("Agent_{database}"),
            Some(database.to_string()),
            instructions,
            tools,
        )
    }

    fn query_db_tool(&self, database: &str) -> Tool {
        let gateway = Arc::clone(&self.gateway);
        let database_owned = database.to_string();
        let database = database.to_string();
        let handler: ToolHandler = Arc::new(move |inv: ToolInvocation| {
            let gateway = Arc::clone(&gateway);
            let database = database_owned.clone();
            Box::pin(async move {
                let query = inv
                    .arguments
                    .get("query")
                    .and_then(Value::as_str)
                    .ok_or_else(|| anyhow!("query_db requires a 'query' string"))?
                    .to_string();
                let params = inv.arguments.get("params").cloned().unwrap_or(Value::Null);

                let span = inv.spans.start("graph.query", inv.parent_span.as_deref());
                if let Some(cached) = inv.memory.get_cached(&database, &query) {
                    inv.spans
                        .finish(span, json!({"database": database, "cache": "hit"}));
                    return Ok(cached);
                }
                match gateway.run_cypher(&database, &query, params).await {
                    Ok(rows) => {
                        let rendered = serde_json::to_string(&rows)?;
                        inv.memory.put_cached(&database, &query, &rendered);
                        inv.spans.finish(
                            span,
                            json!({"database": database, "cache": "miss", "rows": rows.len()}),
                        );
                        Ok(rendered)
                    }
                    Err(err) => {
                        inv.spans.finish(
                            span,
                            json!({"database": database, "error": err.to_string()}),
                        );
                        Err(err.into())
                    }
                }
            })
        });
        Tool::new(
            ToolDefinition {
                name: "query_db".to_string(),
                description: format!(
                    "Execute a read-only Cypher query against the '{database}' database. \
                     Bind values through the optional 'params' object."
                ),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string", "description": "Cypher query"},
                        "params": {"type": "object", "description": "Query parameters"}
                    },
                    "required": ["query"]
                }),
            },
            handler,
        )
    }

    fn get_schema_tool(&self, schema_text: &str) -> Tool {
        let schema_text = schema_text.to_string();
        let handler: ToolHandler = Arc::new(move |_inv: ToolInvocation| {
            let schema_text = schema_text.clone();
            Box::pin(async move { Ok(schema_text) })
        });
        Tool::new(
            ToolDefinition {
                name: "get_schema".to_string(),
                description: "Return the schema for this agent's database.".to_string(),
                parameters: json!({"type": "object", "properties": {}}),
            },
            handler,
        )
    }

    fn rerank_candidates_tool(&self) -> Tool {
        let weights = self.config.rerank_weights;
        let handler: ToolHandler = Arc::new(move |inv: ToolInvocation| {
            Box::pin(async move {
                let entity = inv
                    .arguments
                    .get("entity")
                    .and_then(Value::as_str)
                    .ok_or_else(|| anyhow!("rerank_candidates requires an 'entity' string"))?
                    .to_string();
                let hints: Vec<String> = inv
                    .arguments
                    .get("label_hints")
                    .and_then(Value::as_array)
                    .map(|arr| {
                        arr.iter()
                            .filter_map(Value::as_str)
                            .map(normalize_alias)
                            .collect()
                    })
                    .unwrap_or_default();
                let mut candidates: Vec<Value> = inv
                    .arguments
                    .get("candidates")
                    .and_then(Value::as_array)
                    .cloned()
                    .ok_or_else(|| anyhow!("rerank_candidates requires a 'candidates' array"))?;

                let entity_norm = normalize_alias(&entity);
                let mut scored: Vec<(f64, Value)> = candidates
                    .drain(..)
                    .map(|mut candidate| {
                        let name = candidate
                            .get("display_name")
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        let base = candidate
                            .get("score")
                            .and_then(Value::as_f64)
                            .unwrap_or(0.0)
                            .clamp(0.0, 1.0);
                        let lexical = lexical_similarity(&entity_norm, &normalize_alias(name));
                        let hinted = candidate
                            .get("labels")
                            .and_then(Value::as_array)
                            .map(|labels| {
                                labels
                                    .iter()
                                    .filter_map(Value::as_str)
                                    .any(|l| hints.contains(&normalize_alias(l)))
                            })
                            .unwrap_or(false);
                        let bonus = if hinted { 1.0 } else { 0.0 };
                        let score = weights.lexical * lexical
                            + weights.fulltext * base
                            + weights.label_hint * bonus;
                        if let Some(map) = candidate.as_object_mut() {
                            map.insert("final_score".to_string(), json!(score));
                        }
                        (score, candidate)
                    })
                    .collect();
                scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
                let ranked: Vec<Value> = scored.into_iter().map(|(_, c)| c).collect();
                Ok(serde_json::to_string(&ranked)?)
            })
        });
        Tool::new(
            ToolDefinition {
                name: "rerank_candidates".to_string(),
                description: "Deterministically rerank entity candidates by lexical similarity, \
                              base score, and label hints."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "entity": {"type": "string"},
                        "candidates": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "display_name": {"type": "string"},
                                    "labels": {"type": "array", "items": {"type": "string"}},
                                    "score": {"type": "number"}
                                }
                            }
                        },
                        "label_hints": {"type": "array", "items": {"type": "string"}}
                    },
                    "required": ["entity", "candidates"]
                }),
            },
            handler,
        )
    }

    fn put_shared_result_tool(&self, database: &str) -> Tool {
        let database = database.to_string();
        let handler: ToolHandler = Arc::new(move |inv: ToolInvocation| {
            let database = database.clone();
            Box::pin(async move {
                let answer = inv
                    .arguments
                    .get("answer")
                    .and_then(Value::as_str)
                    .ok_or_else(|| anyhow!("put_shared_result requires an 'answer' string"))?;
                inv.memory.put_result(&database, answer);
                Ok(format!("stored result for {database}"))
            })
        });
        Tool::new(
            ToolDefinition {
                name: "put_shared_result".to_string(),
                description: "Record this agent's final finding in the request's shared memory."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "answer": {"type": "string"}
                    },
                    "required": ["answer"]
                }),
            },
            handler,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Rows;
    use crate::memory::SharedMemory;
    use crate::runtime::spans::SpanCollector;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    struct CountingGateway {
        cypher_calls: AtomicUsize,
        unreachable: bool,
    }

    #[async_trait]
    impl GraphGateway for CountingGateway {
        async fn run_cypher(
            &self,
            _database: &str,
            _query: &str,
            _params: Value,
        ) -> Result<Rows, GraphError> {
            self.cypher_calls.fetch_add(1, Ordering::SeqCst);
            let mut row = serde_json::Map::new();
            row.insert("n".to_string(), json!(1));
            Ok(vec![row])
        }

        async fn run_ddl(
            &self,
            _database: &str,
            _statement: &str,
            _params: Value,
        ) -> Result<Rows, GraphError> {
            Ok(Vec::new())
        }

        async fn schema_snapshot(&self, database: &str) -> Result<SchemaSnapshot, GraphError> {
            if self.unreachable {
                return Err(GraphError::Unreachable(database.to_string()));
            }
            Ok(SchemaSnapshot {
                database: database.to_string(),
                labels: vec!["Company".to_string()],
                relationship_types: vec!["SUPPLIES".to_string()],
                property_keys: vec!["name".to_string()],
            })
        }
    }

    fn invocation(arguments: Value) -> ToolInvocation {
        ToolInvocation {
            arguments,
            memory: Arc::new(SharedMemory::new(100)),
            cancel: CancellationToken::new(),
            spans: SpanCollector::new(),
            parent_span: None,
        }
    }

    fn factory(unreachable: bool) -> (AgentFactory, Arc<CountingGateway>) {
        let gateway = Arc::new(CountingGateway {
            cypher_calls: AtomicUsize::new(0),
            unreachable,
        });
        let factory = AgentFactory::new(gateway.clone(), Arc::new(Config::default()));
        (factory, gateway)
    }

    #[tokio::test]
    async fn create_for_all_marks_ready_and_unreachable() {
        let (factory, _) = factory(false);
        let statuses = factory
            .create_for_all(&["kgnormal".to_string(), "kgfibo".to_string()])
            .await;
        assert_eq!(statuses.len(), 2);
        assert!(statuses
            .iter()
            .all(|s| s.readiness == AgentReadiness::Ready));
        assert!(factory.pool().agent("kgnormal").is_some());

        let (factory, _) = factory_unreachable();
        let statuses = factory.create_for_all(&["kgruntime".to_string()]).await;
        assert_eq!(statuses[0].readiness, AgentReadiness::Unreachable);
        assert!(factory.pool().agent("kgruntime").is_none());
    }

    fn factory_unreachable() -> (AgentFactory, Arc<CountingGateway>) {
        factory(true)
    }

    #[tokio::test]
    async fn second_create_reuses_fresh_entries() {
        let (factory, _) = factory(false);
        factory.create_for_all(&["kgnormal".to_string()]).await;
        let first = factory.pool().agent("kgnormal").unwrap();
        let statuses = factory.create_for_all(&["kgnormal".to_string()]).await;
        assert_eq!(statuses[0].reason, "cached");
        let second = factory.pool().agent("kgnormal").unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn query_db_tool_caches_per_request() {
        let (factory, gateway) = factory(false);
        factory.create_for_all(&["kgnormal".to_string()]).await;
        let agent = factory.pool().agent("kgnormal").unwrap();
        let tool = agent.tool("query_db").unwrap();

        let memory = Arc::new(SharedMemory::new(100));
        let spans = SpanCollector::new();
        let inv = ToolInvocation {
            arguments: json!({"query": "MATCH (n) RETURN n LIMIT 1"}),
            memory: memory.clone(),
            cancel: CancellationToken::new(),
            spans: spans.clone(),
            parent_span: None,
        };
        let first = tool.invoke(inv.clone()).await.unwrap();
        let second = tool.invoke(inv).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(gateway.cypher_calls.load(Ordering::SeqCst), 1);

        let cache_states: Vec<String> = spans
            .snapshot()
            .iter()
            .filter_map(|s| s.metadata.get("cache").and_then(Value::as_str).map(String::from))
            .collect();
        assert_eq!(cache_states, vec!["miss".to_string(), "hit".to_string()]);
    }

    #[tokio::test]
    async fn put_shared_result_writes_to_request_memory() {
        let (factory, _) = factory(false);
        factory.create_for_all(&["kgnormal".to_string()]).await;
        let agent = factory.pool().agent("kgnormal").unwrap();
        let tool = agent.tool("put_shared_result").unwrap();

        let inv = invocation(json!({"answer": "ACME is supplied by Initech"}));
        let memory = inv.memory.clone();
        tool.invoke(inv).await.unwrap();
        assert_eq!(
            memory.all_results().get("kgnormal").map(String::as_str),
            Some("ACME is supplied by Initech")
        );
    }

    #[tokio::test]
    async fn rerank_tool_orders_by_combined_score() {
        let (factory, _) = factory(false);
        let agent = factory.build_agent("kgnormal", &SchemaSnapshot::default());
        let tool = agent.tool("rerank_candidates").unwrap();

        let inv = invocation(json!({
            "entity": "ACME",
            "candidates": [
                {"display_name": "Acme Corp", "labels": ["Company"], "score": 0.4},
                {"display_name": "ACME", "labels": ["Company"], "score": 0.3},
            ],
            "label_hints": ["company"],
        }));
        let output = tool.invoke(inv).await.unwrap();
        let ranked: Vec<Value> = serde_json::from_str(&output).unwrap();
        assert_eq!(ranked[0]["display_name"], "ACME");
        assert!(ranked[0]["final_score"].as_f64().unwrap() > ranked[1]["final_score"].as_f64().unwrap());
    }
}
