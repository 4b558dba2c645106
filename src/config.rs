//! Centralized runtime configuration.
//!
//! All knobs are read from the environment once at startup and carried as a
//! single `Config` value. Modules never call `std::env::var` themselves; the
//! explicit enumeration here is the full set of recognized options.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Model backend selection, driven by `AGENT_BACKEND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmBackend {
    OpenAi,
    Anthropic,
}

/// Weights for the semantic resolver reranker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RerankWeights {
    /// Weight for Jaro-Winkler lexical similarity.
    pub lexical: f64,
    /// Weight for the normalized fulltext score.
    pub fulltext: f64,
    /// Weight for the label hint bonus.
    pub label_hint: f64,
}

impl Default for RerankWeights {
    fn default() -> Self {
        Self {
            lexical: 0.5,
            fulltext: 0.4,
            label_hint: 0.1,
        }
    }
}

/// Graph backend connection settings.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

/// Runtime configuration for the orchestration core.
#[derive(Debug, Clone)]
pub struct Config {
    /// Logical tenant identifier propagated through every request.
    pub workspace_id: String,
    pub graph: GraphConfig,
    /// Default fulltext index probed by the resolver.
    pub fulltext_index: String,
    pub backend: LlmBackend,
    /// Optional model override; falls back to the provider default.
    pub model: Option<String>,

    /// Global request deadline.
    pub request_timeout: Duration,
    /// Per-debate-worker deadline.
    pub agent_timeout: Duration,
    /// Per-Cypher-call deadline.
    pub graph_timeout: Duration,
    /// Maximum age of a schema probe before an agent degrades.
    pub probe_ttl: Duration,
    /// Unwind budget after cancellation.
    pub grace_timeout: Duration,

    /// Upper bound on concurrent debate workers.
    pub debate_parallelism: usize,
    /// Shared-memory query cache capacity.
    pub cache_capacity: u64,
    /// Concurrent requests admitted at the HTTP boundary.
    pub max_concurrent_requests: usize,
    /// Upper bound on tool-use turns per agent run.
    pub max_tool_turns: usize,

    /// Candidates retained per question entity.
    pub candidate_limit: usize,
    /// Maximum question entities extracted per request.
    pub entity_cap: usize,
    /// Score gap required for a confident top candidate.
    pub confidence_gap: f64,
    /// Name similarity above which two candidates are merged.
    pub dedup_threshold: f64,
    pub rerank_weights: RerankWeights,
    /// Router confidence margin below which the route falls to hybrid.
    pub route_margin: f64,

    /// Optional offline ontology hint store.
    pub hints_path: Option<PathBuf>,
    pub server_port: u16,
    /// Turns retained per platform chat session.
    pub session_max_turns: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_id: "default".to_string(),
            graph: GraphConfig {
                uri: "http://localhost:7474".to_string(),
                user: "neo4j".to_string(),
                password: "password".to_string(),
            },
            fulltext_index: "entity_fulltext".to_string(),
            backend: LlmBackend::OpenAi,
            model: None,
            request_timeout: Duration::from_secs(120),
            agent_timeout: Duration::from_secs(60),
            graph_timeout: Duration::from_secs(10),
            probe_ttl: Duration::from_secs(30),
            grace_timeout: Duration::from_secs(1),
            debate_parallelism: 8,
            cache_capacity: 100,
            max_concurrent_requests: 200,
            max_tool_turns: 6,
            candidate_limit: 5,
            entity_cap: 8,
            confidence_gap: 0.15,
            dedup_threshold: 0.92,
            rerank_weights: RerankWeights::default(),
            route_margin: 0.2,
            hints_path: None,
            server_port: 3000,
            session_max_turns: 100,
        }
    }
}

impl Config {
    /// Build a config from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            workspace_id: env_or("WORKSPACE_ID", &defaults.workspace_id),
            graph: GraphConfig {
                uri: env_or("GRAPH_URI", &defaults.graph.uri),
                user: env_or("GRAPH_USER", &defaults.graph.user),
                password: env_or("GRAPH_PASSWORD", &defaults.graph.password),
            },
            fulltext_index: env_or("FULLTEXT_INDEX_NAME", &defaults.fulltext_index),
            backend: match env_or("AGENT_BACKEND", "openai").to_lowercase().as_str() {
                "anthropic" | "claude" => LlmBackend::Anthropic,
                _ => LlmBackend::OpenAi,
            },
            model: std::env::var("AGENT_MODEL").ok(),
            request_timeout: env_secs("T_REQUEST_SECS", defaults.request_timeout),
            agent_timeout: env_secs("T_AGENT_SECS", defaults.agent_timeout),
            graph_timeout: env_secs("T_GRAPH_SECS", defaults.graph_timeout),
            probe_ttl: env_secs("T_PROBE_SECS", defaults.probe_ttl),
            grace_timeout: env_secs("T_GRACE_SECS", defaults.grace_timeout),
            debate_parallelism: env_parse("DEBATE_PARALLELISM", defaults.debate_parallelism),
            cache_capacity: env_parse("SHARED_CACHE_CAPACITY", defaults.cache_capacity),
            max_concurrent_requests: env_parse("QMAX", defaults.max_concurrent_requests),
            max_tool_turns: env_parse("MAX_TOOL_TURNS", defaults.max_tool_turns),
            candidate_limit: env_parse("CANDIDATE_LIMIT", defaults.candidate_limit),
            entity_cap: env_parse("ENTITY_CAP", defaults.entity_cap),
            confidence_gap: env_parse("CONFIDENCE_GAP", defaults.confidence_gap),
            dedup_threshold: env_parse("DEDUP_THRESHOLD", defaults.dedup_threshold),
            rerank_weights: RerankWeights {
                lexical: env_parse("RERANK_W_LEXICAL", defaults.rerank_weights.lexical),
                fulltext: env_parse("RERANK_W_FULLTEXT", defaults.rerank_weights.fulltext),
                label_hint: env_parse("RERANK_W_LABEL_HINT", defaults.rerank_weights.label_hint),
            },
            route_margin: env_parse("ROUTE_MARGIN", defaults.route_margin),
            hints_path: std::env::var("ONTOLOGY_HINTS_PATH").ok().map(PathBuf::from),
            server_port: env_parse("SERVER_PORT", defaults.server_port),
            session_max_turns: env_parse("SESSION_MAX_TURNS", defaults.session_max_turns),
        }
    }

    /// Effective debate parallelism for an attempt set of `n` agents.
    pub fn effective_parallelism(&self, n: usize) -> usize {
        self.debate_parallelism.min(n).max(1)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.request_timeout, Duration::from_secs(120));
        assert_eq!(cfg.agent_timeout, Duration::from_secs(60));
        assert_eq!(cfg.graph_timeout, Duration::from_secs(10));
        assert_eq!(cfg.cache_capacity, 100);
        assert_eq!(cfg.max_concurrent_requests, 200);
        assert!((cfg.confidence_gap - 0.15).abs() < f64::EPSILON);
        assert!((cfg.dedup_threshold - 0.92).abs() < f64::EPSILON);
    }

    #[test]
    fn parallelism_is_capped_by_attempt_set() {
        let cfg = Config::default();
        assert_eq!(cfg.effective_parallelism(3), 3);
        assert_eq!(cfg.effective_parallelism(20), 8);
        assert_eq!(cfg.effective_parallelism(0), 1);
    }
}
