//! Fulltext index discovery, bootstrap, and search.
//!
//! Works against DozerDB/Neo4j-compatible backends. Discovery tries the
//! `SHOW FULLTEXT INDEXES` form first and falls back to filtering
//! `SHOW INDEXES`; creation issues the DDL form and falls back to the
//! procedure call when the backend rejects it. Identifiers are validated
//! before interpolation; search terms are always bound as parameters.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{GraphError, GraphGateway};
use crate::error::OrchestratorResult;
use crate::registry::validate_labels;

/// Outcome of an ensure-index call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsureResult {
    pub database: String,
    pub index_name: String,
    pub exists: bool,
    pub created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub labels: Vec<String>,
    pub properties: Vec<String>,
    pub message: String,
}

/// A fulltext search hit with a stable element id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateHit {
    pub node_id: String,
    pub score: f64,
    pub labels: Vec<String>,
    pub display_name: String,
}

const FULLTEXT_SEARCH_QUERY: &str = "\
CALL db.index.fulltext.queryNodes($index_name, $query)
YIELD node, score
RETURN elementId(node) AS node_id,
       labels(node) AS labels,
       coalesce(node.name, node.title, node.id, node.uri, elementId(node)) AS display_name,
       score
ORDER BY score DESC
LIMIT $limit";

/// Inspect and ensure fulltext indexes.
pub struct FulltextIndexManager {
    gateway: Arc<dyn GraphGateway>,
}

impl FulltextIndexManager {
    pub fn new(gateway: Arc<dyn GraphGateway>) -> Self {
        Self { gateway }
    }

    /// Names of online fulltext indexes in `database`.
    pub async fn list_indexes(&self, database: &str) -> Vec<String> {
        let queries = [
            "SHOW FULLTEXT INDEXES YIELD name, state WHERE state = 'ONLINE' RETURN name",
            "SHOW INDEXES YIELD name, type, state WHERE type = 'FULLTEXT' AND state = 'ONLINE' RETURN name",
        ];
        for query in queries {
            match self.gateway.run_cypher(database, query, Value::Null).await {
                Ok(rows) if !rows.is_empty() => {
                    return rows
                        .into_iter()
                        .filter_map(|row| {
                            row.get("name").and_then(Value::as_str).map(String::from)
                        })
                        .collect();
                }
                Ok(_) => continue,
                Err(err) => {
                    tracing::debug!(database, %err, "index discovery query failed");
                    continue;
                }
            }
        }
        Vec::new()
    }

    /// Ensure a fulltext index exists; idempotent. With `create_if_missing`
    /// false this only reports existence.
    pub async fn ensure_index(
        &self,
        database: &str,
        index_name: &str,
        labels: &[String],
        properties: &[String],
        create_if_missing: bool,
    ) -> OrchestratorResult<EnsureResult> {
        let index_name = validate_labels(&[index_name.to_string()], "index_name")?
            .pop()
            .expect("validated index name");
        let safe_labels = validate_labels(labels, "labels")?;
        let safe_props = validate_labels(properties, "properties")?;

        if self.index_exists(database, &index_name).await {
            return Ok(EnsureResult {
                database: database.to_string(),
                index_name,
                exists: true,
                created: false,
                state: Some("ONLINE".to_string()),
                labels: safe_labels,
                properties: safe_props,
                message: "Index already exists.".to_string(),
            });
        }

        if !create_if_missing {
            return Ok(EnsureResult {
                database: database.to_string(),
                index_name,
                exists: false,
                created: false,
                state: None,
                labels: safe_labels,
                properties: safe_props,
                message: "Index not found.".to_string(),
            });
        }

        let (mode, error) = self
            .create_index(database, &index_name, &safe_labels, &safe_props)
            .await;
        let created = self.index_exists(database, &index_name).await;

        let message = if created {
            format!("Index created via {mode}.")
        } else {
            match error {
                Some(err) => format!("Index creation attempted via {mode} but not visible. Last error: {err}"),
                None => format!("Index creation attempted via {mode} but not visible."),
            }
        };
        Ok(EnsureResult {
            database: database.to_string(),
            index_name,
            exists: created,
            created,
            state: created.then(|| "ONLINE".to_string()),
            labels: safe_labels,
            properties: safe_props,
            message,
        })
    }

    /// Search a fulltext index for `terms`.
    pub async fn search(
        &self,
        database: &str,
        index_name: &str,
        terms: &str,
        limit: usize,
    ) -> Result<Vec<CandidateHit>, GraphError> {
        let rows = self
            .gateway
            .run_cypher(
                database,
                FULLTEXT_SEARCH_QUERY,
                json!({
                    "index_name": index_name,
                    "query": terms,
                    "limit": limit as i64,
                }),
            )
            .await?;
        Ok(rows.into_iter().filter_map(hit_from_row).collect())
    }

    async fn index_exists(&self, database: &str, index_name: &str) -> bool {
        self.list_indexes(database)
            .await
            .iter()
            .any(|name| name == index_name)
    }

    async fn create_index(
        &self,
        database: &str,
        index_name: &str,
        labels: &[String],
        properties: &[String],
    ) -> (&'static str, Option<String>) {
        // Identifiers were validated above; properties are interpolated as
        // `n.<prop>` per the DDL grammar, values never are.
        let label_expr = labels.join("|");
        let prop_expr = properties
            .iter()
            .map(|p| format!("n.{p}"))
            .collect::<Vec<_>>()
            .join(", ");
        let ddl = format!(
            "CREATE FULLTEXT INDEX {index_name} IF NOT EXISTS FOR (n:{label_expr}) ON EACH [{prop_expr}]"
        );

        match self.gateway.run_ddl(database, &ddl, Value::Null).await {
            Ok(_) => ("cypher_ddl", None),
            Err(ddl_err) => {
                tracing::debug!(database, %ddl_err, "ddl index creation failed, trying procedure");
                let fallback = self
                    .gateway
                    .run_ddl(
                        database,
                        "CALL db.index.fulltext.createNodeIndex($name, $labels, $properties)",
                        json!({
                            "name": index_name,
                            "labels": labels,
                            "properties": properties,
                        }),
                    )
                    .await;
                match fallback {
                    Ok(_) => ("procedure_fallback", None),
                    Err(err) => ("procedure_fallback", Some(err.to_string())),
                }
            }
        }
    }
}

fn hit_from_row(row: serde_json::Map<String, Value>) -> Option<CandidateHit> {
    Some(CandidateHit {
        node_id: row.get("node_id")?.as_str()?.to_string(),
        score: row.get("score").and_then(Value::as_f64).unwrap_or(0.0),
        labels: row
            .get("labels")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default(),
        display_name: row
            .get("display_name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestratorError;
    use crate::graph::{Rows, SchemaSnapshot};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Gateway fake that records DDL statements and serves canned rows.
    struct RecordingGateway {
        ddl: Mutex<Vec<String>>,
        index_rows: Mutex<Vec<Rows>>,
    }

    #[async_trait]
    impl GraphGateway for RecordingGateway {
        async fn run_cypher(
            &self,
            _database: &str,
            query: &str,
            _params: Value,
        ) -> Result<Rows, GraphError> {
            if query.starts_with("SHOW FULLTEXT INDEXES") {
                let mut canned = self.index_rows.lock().unwrap();
                if canned.is_empty() {
                    return Ok(Vec::new());
                }
                return Ok(canned.remove(0));
            }
            Ok(Vec::new())
        }

        async fn run_ddl(
            &self,
            _database: &str,
            statement: &str,
            _params: Value,
        ) -> Result<Rows, GraphError> {
            self.ddl.lock().unwrap().push(statement.to_string());
            Ok(Vec::new())
        }

        async fn schema_snapshot(&self, database: &str) -> Result<SchemaSnapshot, GraphError> {
            Ok(SchemaSnapshot {
                database: database.to_string(),
                ..Default::default()
            })
        }
    }

    fn index_row(name: &str) -> Rows {
        let mut row = serde_json::Map::new();
        row.insert("name".to_string(), json!(name));
        vec![row]
    }

    #[tokio::test]
    async fn ensure_is_idempotent_when_index_exists() {
        let gateway = Arc::new(RecordingGateway {
            ddl: Mutex::new(Vec::new()),
            index_rows: Mutex::new(vec![index_row("entity_fulltext")]),
        });
        let manager = FulltextIndexManager::new(gateway.clone());
        let result = manager
            .ensure_index(
                "kgnormal",
                "entity_fulltext",
                &["Company".to_string()],
                &["name".to_string()],
                true,
            )
            .await
            .unwrap();
        assert!(result.exists);
        assert!(!result.created);
        assert!(gateway.ddl.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn ensure_reports_missing_without_create() {
        let gateway = Arc::new(RecordingGateway {
            ddl: Mutex::new(Vec::new()),
            index_rows: Mutex::new(Vec::new()),
        });
        let manager = FulltextIndexManager::new(gateway.clone());
        let result = manager
            .ensure_index(
                "kgnormal",
                "entity_fulltext",
                &["Company".to_string()],
                &["name".to_string()],
                false,
            )
            .await
            .unwrap();
        assert!(!result.exists);
        assert!(!result.created);
        assert!(gateway.ddl.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn ensure_creates_via_ddl() {
        let gateway = Arc::new(RecordingGateway {
            ddl: Mutex::new(Vec::new()),
            // First discovery: absent. Post-create discovery: present.
            index_rows: Mutex::new(vec![Vec::new(), index_row("entity_fulltext")]),
        });
        let manager = FulltextIndexManager::new(gateway.clone());
        let result = manager
            .ensure_index(
                "kgnormal",
                "entity_fulltext",
                &["Company".to_string(), "Person".to_string()],
                &["name".to_string(), "title".to_string()],
                true,
            )
            .await
            .unwrap();
        assert!(result.created);
        let ddl = gateway.ddl.lock().unwrap();
        assert_eq!(ddl.len(), 1);
        assert!(ddl[0].contains("CREATE FULLTEXT INDEX entity_fulltext IF NOT EXISTS"));
        assert!(ddl[0].contains("(n:Company|Person)"));
        assert!(ddl[0].contains("[n.name, n.title]"));
    }

    #[tokio::test]
    async fn invalid_identifiers_are_rejected_before_io() {
        let gateway = Arc::new(RecordingGateway {
            ddl: Mutex::new(Vec::new()),
            index_rows: Mutex::new(Vec::new()),
        });
        let manager = FulltextIndexManager::new(gateway.clone());
        let err = manager
            .ensure_index(
                "kgnormal",
                "entity_fulltext",
                &["Bad Label".to_string()],
                &["name".to_string()],
                true,
            )
            .await;
        assert!(matches!(err, Err(OrchestratorError::InvalidIdentifier(_))));
        assert!(gateway.ddl.lock().unwrap().is_empty());
    }
}
