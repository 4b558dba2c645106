//! Graph gateway over the HTTP transactional API.
//!
//! Speaks `POST /db/{database}/tx/commit` against a Neo4j/DozerDB-compatible
//! backend, one statement per call, parameters always bound. Connection
//! failures surface as [`GraphError::Unreachable`]; statement errors reported
//! by the server surface as [`GraphError::Syntax`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ensure_read_only, introspect_schema, GraphError, GraphGateway, Row, Rows, SchemaSnapshot};
use crate::config::GraphConfig;

pub struct HttpGraphGateway {
    base_url: String,
    user: String,
    password: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpGraphGateway {
    pub fn new(config: &GraphConfig, timeout: Duration) -> Self {
        Self {
            base_url: config.uri.trim_end_matches('/').to_string(),
            user: config.user.clone(),
            password: config.password.clone(),
            client: reqwest::Client::new(),
            timeout,
        }
    }

    async fn commit(
        &self,
        database: &str,
        statement: &str,
        params: Value,
    ) -> Result<Rows, GraphError> {
        let parameters = match params {
            Value::Null => json!({}),
            other => other,
        };
        let url = format!("{}/db/{}/tx/commit", self.base_url, database);
        let body = json!({
            "statements": [{
                "statement": statement,
                "parameters": parameters,
            }]
        });

        let send = self
            .client
            .post(&url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send();

        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| GraphError::Timeout(self.timeout))?
            .map_err(|e| GraphError::Unreachable(format!("{database}: {e}")))?;

        if response.status().is_server_error() {
            return Err(GraphError::Unreachable(format!(
                "{database}: status {}",
                response.status()
            )));
        }

        let payload: TxResponse = response
            .json()
            .await
            .map_err(|e| GraphError::Unreachable(format!("{database}: bad response: {e}")))?;

        if let Some(err) = payload.errors.first() {
            return Err(GraphError::Syntax(format!("{}: {}", err.code, err.message)));
        }

        let result = match payload.results.into_iter().next() {
            Some(r) => r,
            None => return Ok(Vec::new()),
        };
        Ok(result
            .data
            .into_iter()
            .map(|entry| zip_row(&result.columns, entry.row))
            .collect())
    }
}

fn zip_row(columns: &[String], values: Vec<Value>) -> Row {
    columns
        .iter()
        .cloned()
        .zip(values)
        .collect::<serde_json::Map<_, _>>()
}

#[derive(Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<TxResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Deserialize)]
struct TxResult {
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<TxEntry>,
}

#[derive(Deserialize)]
struct TxEntry {
    row: Vec<Value>,
}

#[derive(Deserialize)]
struct TxError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[async_trait]
impl GraphGateway for HttpGraphGateway {
    async fn run_cypher(
        &self,
        database: &str,
        query: &str,
        params: Value,
    ) -> Result<Rows, GraphError> {
        ensure_read_only(query)?;
        tracing::debug!(database, "running cypher");
        self.commit(database, query, params).await
    }

    async fn run_ddl(
        &self,
        database: &str,
        statement: &str,
        params: Value,
    ) -> Result<Rows, GraphError> {
        tracing::info!(database, "running ddl statement");
        self.commit(database, statement, params).await
    }

    async fn schema_snapshot(&self, database: &str) -> Result<SchemaSnapshot, GraphError> {
        introspect_schema(self, database).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_zip_by_column() {
        let row = zip_row(
            &["name".to_string(), "count".to_string()],
            vec![json!("ACME"), json!(3)],
        );
        assert_eq!(row["name"], json!("ACME"));
        assert_eq!(row["count"], json!(3));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let gateway = HttpGraphGateway::new(
            &GraphConfig {
                uri: "http://localhost:7474/".to_string(),
                user: "neo4j".to_string(),
                password: "password".to_string(),
            },
            Duration::from_secs(10),
        );
        assert_eq!(gateway.base_url, "http://localhost:7474");
    }
}
