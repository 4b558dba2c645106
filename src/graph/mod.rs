//! Graph gateway: read-only Cypher execution, schema snapshots, fulltext.
//!
//! The orchestration core never talks to a graph driver directly. Everything
//! goes through [`GraphGateway`], which production code implements over the
//! HTTP transactional API ([`http::HttpGraphGateway`]) and tests implement
//! in-process. A session is bound to exactly one database per call.

pub mod fulltext;
pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::OrchestratorError;

pub use fulltext::{CandidateHit, EnsureResult, FulltextIndexManager};

/// A single result row, keyed by return column.
pub type Row = Map<String, Value>;
pub type Rows = Vec<Row>;

#[derive(Debug, Clone, Error)]
pub enum GraphError {
    #[error("graph backend unreachable: {0}")]
    Unreachable(String),
    #[error("cypher error: {0}")]
    Syntax(String),
    #[error("graph call timed out after {0:?}")]
    Timeout(Duration),
    #[error("forbidden statement: {0}")]
    Forbidden(String),
}

impl From<GraphError> for OrchestratorError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::Unreachable(msg) => OrchestratorError::Unreachable(msg),
            other => OrchestratorError::Tool(other.to_string()),
        }
    }
}

/// Labels, relationship types, and property keys of one database, captured
/// at agent-creation time and embedded into agent instructions.
#[derive(Debug, Clone, Default)]
pub struct SchemaSnapshot {
    pub database: String,
    pub labels: Vec<String>,
    pub relationship_types: Vec<String>,
    pub property_keys: Vec<String>,
}

impl SchemaSnapshot {
    /// Human-readable rendering for prompts.
    pub fn render(&self) -> String {
        let join = |items: &[String]| {
            if items.is_empty() {
                "none".to_string()
            } else {
                items.join(", ")
            }
        };
        format!(
            "Database: {}\nNode Labels: {}\nRelationship Types: {}\nProperty Keys: {}",
            self.database,
            join(&self.labels),
            join(&self.relationship_types),
            join(&self.property_keys),
        )
    }
}

/// Read-only access to one or more graph databases.
#[async_trait]
pub trait GraphGateway: Send + Sync {
    /// Execute a read-only Cypher statement against `database`. Values are
    /// always bound through `params`; implementations reject statements that
    /// begin with a mutating keyword.
    async fn run_cypher(
        &self,
        database: &str,
        query: &str,
        params: Value,
    ) -> Result<Rows, GraphError>;

    /// Privileged DDL path used only by the fulltext index manager. Not
    /// subject to the read-only guard.
    async fn run_ddl(
        &self,
        database: &str,
        statement: &str,
        params: Value,
    ) -> Result<Rows, GraphError>;

    /// Snapshot labels, relationship types, and property types.
    async fn schema_snapshot(&self, database: &str) -> Result<SchemaSnapshot, GraphError>;
}

/// Keywords that open a mutating statement.
const MUTATING_KEYWORDS: &[&str] = &[
    "CREATE", "MERGE", "DELETE", "DETACH", "SET", "REMOVE", "DROP", "FOREACH", "LOAD", "GRANT",
    "DENY", "REVOKE", "ALTER",
];

/// Reject statements that begin with a mutating keyword. Applied before any
/// I/O by every [`GraphGateway::run_cypher`] implementation.
pub fn ensure_read_only(query: &str) -> Result<(), GraphError> {
    let first = query
        .trim_start()
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_uppercase();
    if MUTATING_KEYWORDS.contains(&first.as_str()) {
        return Err(GraphError::Forbidden(format!(
            "statement begins with mutating keyword {first}"
        )));
    }
    Ok(())
}

/// Fetch the schema via the standard introspection procedures.
pub(crate) async fn introspect_schema(
    gateway: &dyn GraphGateway,
    database: &str,
) -> Result<SchemaSnapshot, GraphError> {
    let labels = single_column(
        gateway
            .run_cypher(database, "CALL db.labels()", Value::Null)
            .await?,
        "label",
    );
    let relationship_types = single_column(
        gateway
            .run_cypher(database, "CALL db.relationshipTypes()", Value::Null)
            .await?,
        "relationshipType",
    );
    let property_keys = single_column(
        gateway
            .run_cypher(database, "CALL db.propertyKeys()", Value::Null)
            .await?,
        "propertyKey",
    );
    Ok(SchemaSnapshot {
        database: database.to_string(),
        labels,
        relationship_types,
        property_keys,
    })
}

fn single_column(rows: Rows, column: &str) -> Vec<String> {
    rows.into_iter()
        .filter_map(|row| row.get(column).and_then(Value::as_str).map(String::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_queries_pass_the_guard() {
        ensure_read_only("MATCH (n) RETURN n").unwrap();
        ensure_read_only("  CALL db.labels()").unwrap();
        ensure_read_only("SHOW FULLTEXT INDEXES").unwrap();
    }

    #[test]
    fn mutations_are_forbidden() {
        for q in [
            "CREATE (n:Thing)",
            "MERGE (n:Thing {id: 1})",
            "DELETE n",
            "detach delete n",
            "SET n.x = 1",
            "DROP INDEX foo",
        ] {
            assert!(matches!(
                ensure_read_only(q),
                Err(GraphError::Forbidden(_))
            ));
        }
    }

    #[test]
    fn schema_renders_placeholder_for_empty_sections() {
        let schema = SchemaSnapshot {
            database: "kgnormal".to_string(),
            labels: vec!["Company".to_string()],
            ..Default::default()
        };
        let text = schema.render();
        assert!(text.contains("Node Labels: Company"));
        assert!(text.contains("Relationship Types: none"));
    }
}
