//! Semantic entity resolver.
//!
//! Resolves question entities against graph entities in three stages:
//! extraction (deterministic tokenizer plus one bounded model call),
//! candidate retrieval (fulltext first, `CONTAINS` fallback), and a
//! deterministic rerank with cross-database dedup. Caller-supplied overrides
//! outrank everything else.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::hints::OntologyHintStore;
use crate::config::Config;
use crate::graph::{FulltextIndexManager, GraphGateway};
use crate::llm::LlmClient;

/// Properties probed by the `CONTAINS` fallback.
const ENTITY_PROPERTIES: &[&str] = &["name", "title", "id", "uri", "code", "symbol", "alias"];

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "of", "to", "in", "on", "for", "and",
    "or", "do", "does", "did", "what", "which", "who", "whom", "where", "when", "why", "how",
    "tell", "show", "about", "please", "compare", "known", "entities", "list", "all",
];

static QUOTED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]+)""#).expect("quoted regex"));
static SINGLE_QUOTED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'([^']+)'").expect("single quoted regex"));
static CAPS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:[A-Z][a-zA-Z0-9&.-]+|[A-Z]{2,})(?:\s+(?:[A-Z][a-zA-Z0-9&.-]+|[A-Z]{2,}))*\b")
        .expect("caps regex")
});
static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9][A-Za-z0-9&._-]{2,}").expect("token regex"));
static NON_ALNUM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("alnum regex"));

/// Lowercase and strip punctuation to spaces before any lexical comparison.
pub fn normalize_alias(value: &str) -> String {
    NON_ALNUM_RE
        .replace_all(&value.to_lowercase(), " ")
        .trim()
        .to_string()
}

/// Jaro-Winkler similarity over already-normalized strings.
pub fn lexical_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    strsim::jaro_winkler(a, b)
}

/// Where a candidate came from. Declaration order is the tie-break priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    Override,
    Fulltext,
    Contains,
}

/// A ranked entity candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateEntity {
    pub question_entity: String,
    pub display_name: String,
    pub database: String,
    pub node_id: String,
    pub labels: Vec<String>,
    /// Combined rerank score.
    pub score: f64,
    pub lexical_score: f64,
    pub fulltext_score: f64,
    pub label_boost: f64,
    pub source: CandidateSource,
    pub is_confident: bool,
}

/// Caller-pinned resolution for one question entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityOverride {
    pub question_entity: String,
    pub database: String,
    pub node_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Output of the resolver: everything downstream stages need.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemanticContext {
    pub entities: Vec<String>,
    pub label_hints: Vec<String>,
    pub alias_resolved: BTreeMap<String, String>,
    pub matches: BTreeMap<String, Vec<CandidateEntity>>,
    pub unresolved_entities: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides_applied: BTreeMap<String, EntityOverride>,
}

impl SemanticContext {
    /// Best candidate per question entity, strongest first, capped at `n`.
    pub fn top_matches(&self, n: usize) -> Vec<CandidateEntity> {
        let mut best: Vec<CandidateEntity> = self
            .matches
            .values()
            .filter_map(|candidates| candidates.first().cloned())
            .collect();
        best.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.display_name.cmp(&b.display_name))
        });
        best.truncate(n);
        best
    }
}

struct RawCandidate {
    database: String,
    node_id: String,
    labels: Vec<String>,
    display_name: String,
    base_score: f64,
    source: CandidateSource,
}

/// Resolve question entities against graph entities.
pub struct SemanticEntityResolver {
    gateway: Arc<dyn GraphGateway>,
    fulltext: FulltextIndexManager,
    llm: Option<Arc<dyn LlmClient>>,
    hints: Arc<OntologyHintStore>,
    config: Arc<Config>,
}

impl SemanticEntityResolver {
    pub fn new(
        gateway: Arc<dyn GraphGateway>,
        llm: Option<Arc<dyn LlmClient>>,
        hints: Arc<OntologyHintStore>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            fulltext: FulltextIndexManager::new(Arc::clone(&gateway)),
            gateway,
            llm,
            hints,
            config,
        }
    }

    /// Deterministic extraction: quoted spans, capitalized spans, and as a
    /// last resort long tokens. Stopwords and duplicates are dropped.
    pub fn extract_entities(&self, question: &str) -> Vec<String> {
        let mut entities = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        let spans = QUOTED_RE
            .captures_iter(question)
            .chain(SINGLE_QUOTED_RE.captures_iter(question))
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .chain(CAPS_RE.find_iter(question).map(|m| m.as_str().to_string()));

        for span in spans {
            let cleaned = clean_span(&span);
            if cleaned.is_empty() {
                continue;
            }
            let key = cleaned.to_lowercase();
            if seen.contains(&key) || STOPWORDS.contains(&key.as_str()) {
                continue;
            }
            seen.insert(key);
            entities.push(cleaned);
        }

        if entities.is_empty() {
            for token in TOKEN_RE.find_iter(question) {
                let token = token.as_str();
                let key = token.to_lowercase();
                if STOPWORDS.contains(&key.as_str()) || key.chars().all(|c| c.is_ascii_digit()) {
                    continue;
                }
                if seen.insert(key) {
                    entities.push(token.to_string());
                }
                if entities.len() >= 3 {
                    break;
                }
            }
        }

        entities.truncate(self.config.entity_cap);
        entities
    }

    /// Resolve entities for a question across one or more databases.
    pub async fn resolve(
        &self,
        question: &str,
        databases: &[String],
        overrides: &[EntityOverride],
    ) -> SemanticContext {
        let mut entities = self.extract_entities(question);
        for extra in self.llm_assist(question).await {
            let key = extra.to_lowercase();
            if !entities.iter().any(|e| e.to_lowercase() == key) {
                entities.push(extra);
            }
        }
        entities.truncate(self.config.entity_cap);

        let label_hints = self.hints.infer_label_hints(question);
        let indexes_by_db = self.discover_indexes(databases).await;

        let mut context = SemanticContext {
            entities: entities.clone(),
            label_hints: label_hints.iter().cloned().collect(),
            ..Default::default()
        };

        for entity in &entities {
            let resolved_text = self.hints.resolve_alias(entity);
            context
                .alias_resolved
                .insert(entity.clone(), resolved_text.clone());

            let mut raw = Vec::new();
            for db in databases {
                let mut db_candidates = self
                    .fulltext_candidates(db, &resolved_text, indexes_by_db.get(db))
                    .await;
                if db_candidates.is_empty() {
                    db_candidates = self.contains_candidates(db, &resolved_text).await;
                }
                raw.extend(db_candidates);
            }

            let ranked = self.rank_and_dedup(entity, &resolved_text, raw, &label_hints);
            if ranked.is_empty() {
                context.unresolved_entities.push(entity.clone());
            } else {
                context.matches.insert(entity.clone(), ranked);
            }
        }

        self.apply_overrides(&mut context, overrides);
        context
    }

    /// One bounded model call to supplement the tokenizer. Failure or an
    /// absent model degrades to the deterministic extraction.
    async fn llm_assist(&self, question: &str) -> Vec<String> {
        let Some(llm) = &self.llm else {
            return Vec::new();
        };
        let system = "You extract named entities from questions about knowledge graphs. \
                      Return a JSON object: {\"entities\": [\"...\"]}. Entities only, no commentary.";
        match llm.chat_json(system, question).await {
            Ok(raw) => serde_json::from_str::<Value>(&raw)
                .ok()
                .and_then(|v| v.get("entities").cloned())
                .and_then(|v| serde_json::from_value::<Vec<String>>(v).ok())
                .unwrap_or_default()
                .into_iter()
                .map(|e| clean_span(&e))
                .filter(|e| !e.is_empty() && !STOPWORDS.contains(&e.to_lowercase().as_str()))
                .collect(),
            Err(err) => {
                tracing::debug!(%err, "entity extraction model call failed");
                Vec::new()
            }
        }
    }

    async fn discover_indexes(&self, databases: &[String]) -> BTreeMap<String, Vec<String>> {
        let mut by_db = BTreeMap::new();
        for db in databases {
            let mut indexes = self.fulltext.list_indexes(db).await;
            let hint = &self.config.fulltext_index;
            if !hint.is_empty() && !indexes.contains(hint) {
                indexes.insert(0, hint.clone());
            }
            by_db.insert(db.clone(), indexes);
        }
        by_db
    }

    async fn fulltext_candidates(
        &self,
        database: &str,
        entity_text: &str,
        indexes: Option<&Vec<String>>,
    ) -> Vec<RawCandidate> {
        let Some(indexes) = indexes else {
            return Vec::new();
        };
        for index in indexes {
            match self
                .fulltext
                .search(database, index, entity_text, self.config.candidate_limit)
                .await
            {
                Ok(hits) if !hits.is_empty() => {
                    return hits
                        .into_iter()
                        .map(|hit| RawCandidate {
                            database: database.to_string(),
                            node_id: hit.node_id,
                            labels: hit.labels,
                            display_name: hit.display_name,
                            base_score: hit.score,
                            source: CandidateSource::Fulltext,
                        })
                        .collect();
                }
                Ok(_) => continue,
                Err(err) => {
                    tracing::debug!(database, index, %err, "fulltext search failed");
                    continue;
                }
            }
        }
        Vec::new()
    }

    async fn contains_candidates(&self, database: &str, entity_text: &str) -> Vec<RawCandidate> {
        let query = "\
MATCH (n)
WHERE any(key IN $properties
      WHERE n[key] IS NOT NULL
        AND toLower(toString(n[key])) CONTAINS toLower($query))
RETURN elementId(n) AS node_id,
       labels(n) AS labels,
       coalesce(n.name, n.title, n.id, n.uri, elementId(n)) AS display_name
LIMIT $limit";
        let rows = match self
            .gateway
            .run_cypher(
                database,
                query,
                json!({
                    "properties": ENTITY_PROPERTIES,
                    "query": entity_text,
                    "limit": self.config.candidate_limit as i64,
                }),
            )
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                tracing::debug!(database, %err, "contains lookup failed");
                return Vec::new();
            }
        };

        rows.into_iter()
            .filter_map(|row| {
                Some(RawCandidate {
                    database: database.to_string(),
                    node_id: row.get("node_id")?.as_str()?.to_string(),
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
                    base_score: 0.0,
                    source: CandidateSource::Contains,
                })
            })
            .collect()
    }

    /// Deterministic rerank. Scores combine lexical similarity, normalized
    /// fulltext score, and a label hint bonus; ties break by source priority
    /// then display name, so the ranking is stable across calls.
    fn rank_and_dedup(
        &self,
        entity: &str,
        resolved_text: &str,
        raw: Vec<RawCandidate>,
        label_hints: &BTreeSet<String>,
    ) -> Vec<CandidateEntity> {
        let weights = self.config.rerank_weights;
        let normalized_entity = normalize_alias(resolved_text);
        let normalized_hints: BTreeSet<String> =
            label_hints.iter().map(|h| normalize_alias(h)).collect();

        let max_fulltext = raw
            .iter()
            .filter(|c| c.source == CandidateSource::Fulltext)
            .map(|c| c.base_score)
            .fold(0.0_f64, f64::max)
            .max(1.0);

        let mut seen_nodes: HashSet<(String, String)> = HashSet::new();
        let mut scored: Vec<CandidateEntity> = Vec::new();
        for candidate in raw {
            if !seen_nodes.insert((candidate.database.clone(), candidate.node_id.clone())) {
                continue;
            }
            let normalized_display = normalize_alias(&candidate.display_name);
            let lexical = lexical_similarity(&normalized_entity, &normalized_display);
            let fulltext_norm = match candidate.source {
                CandidateSource::Fulltext => candidate.base_score / max_fulltext,
                _ => 0.0,
            };
            let hinted = candidate
                .labels
                .iter()
                .any(|l| normalized_hints.contains(&normalize_alias(l)));
            let label_boost = if hinted { 1.0 } else { 0.0 };
            let score = weights.lexical * lexical
                + weights.fulltext * fulltext_norm
                + weights.label_hint * label_boost;

            scored.push(CandidateEntity {
                question_entity: entity.to_string(),
                display_name: candidate.display_name,
                database: candidate.database,
                node_id: candidate.node_id,
                labels: candidate.labels,
                score,
                lexical_score: lexical,
                fulltext_score: fulltext_norm,
                label_boost,
                source: candidate.source,
                is_confident: false,
            });
        }

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.source.cmp(&b.source))
                .then_with(|| a.display_name.cmp(&b.display_name))
        });

        // Cross-database dedup: identical (display_name, labels) always
        // collapse; near-identical names collapse only across databases.
        let mut kept: Vec<CandidateEntity> = Vec::new();
        for candidate in scored {
            let duplicate = kept.iter().any(|existing| {
                existing.labels == candidate.labels && {
                    let a = normalize_alias(&existing.display_name);
                    let b = normalize_alias(&candidate.display_name);
                    a == b
                        || (existing.database != candidate.database
                            && lexical_similarity(&a, &b) >= self.config.dedup_threshold)
                }
            });
            if !duplicate {
                kept.push(candidate);
            }
        }
        kept.truncate(self.config.candidate_limit);

        self.gate_confidence(&mut kept);
        kept
    }

    /// `is_confident` on the top candidate: override source, a singleton
    /// list, or a score gap of at least the configured threshold.
    fn gate_confidence(&self, candidates: &mut [CandidateEntity]) {
        let gap = self.config.confidence_gap;
        if let Some((first, rest)) = candidates.split_first_mut() {
            first.is_confident = first.source == CandidateSource::Override
                || rest.is_empty()
                || rest
                    .first()
                    .map(|second| first.score - second.score >= gap)
                    .unwrap_or(true);
        }
    }

    fn apply_overrides(&self, context: &mut SemanticContext, overrides: &[EntityOverride]) {
        for override_entry in overrides {
            let question_entity = override_entry.question_entity.trim();
            if question_entity.is_empty() {
                continue;
            }
            let display_name = override_entry
                .display_name
                .clone()
                .unwrap_or_else(|| question_entity.to_string());

            let candidate = CandidateEntity {
                question_entity: question_entity.to_string(),
                display_name,
                database: override_entry.database.clone(),
                node_id: override_entry.node_id.clone(),
                labels: override_entry.labels.clone(),
                score: 1.0,
                lexical_score: 1.0,
                fulltext_score: 0.0,
                label_boost: 0.0,
                source: CandidateSource::Override,
                is_confident: true,
            };

            let existing = context.matches.remove(question_entity).unwrap_or_default();
            let mut ranked = vec![candidate];
            ranked.extend(existing.into_iter().filter(|c| {
                !(c.database == override_entry.database && c.node_id == override_entry.node_id)
            }));
            ranked.truncate(self.config.candidate_limit);
            context.matches.insert(question_entity.to_string(), ranked);

            context
                .unresolved_entities
                .retain(|e| e != question_entity);
            if !context
                .entities
                .iter()
                .any(|e| e.eq_ignore_ascii_case(question_entity))
            {
                context.entities.push(question_entity.to_string());
            }
            context
                .overrides_applied
                .insert(question_entity.to_string(), override_entry.clone());
        }
    }
}

fn clean_span(value: &str) -> String {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_matches(|c: char| ".,:;!?()[]{}".contains(c))
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphError, Rows, SchemaSnapshot};
    use async_trait::async_trait;

    /// Gateway fake: serves one fulltext index and scripted candidate rows.
    struct ScriptedGateway {
        fulltext_rows: Vec<(String, Vec<(&'static str, &'static str, f64, &'static str)>)>,
        contains_rows: Vec<(String, Vec<(&'static str, &'static str, &'static str)>)>,
    }

    impl ScriptedGateway {
        fn empty() -> Self {
            Self {
                fulltext_rows: Vec::new(),
                contains_rows: Vec::new(),
            }
        }
    }

    fn fulltext_row(node_id: &str, name: &str, score: f64, label: &str) -> crate::graph::Row {
        let mut row = serde_json::Map::new();
        row.insert("node_id".to_string(), json!(node_id));
        row.insert("labels".to_string(), json!([label]));
        row.insert("display_name".to_string(), json!(name));
        row.insert("score".to_string(), json!(score));
        row
    }

    #[async_trait]
    impl GraphGateway for ScriptedGateway {
        async fn run_cypher(
            &self,
            database: &str,
            query: &str,
            _params: Value,
        ) -> Result<Rows, GraphError> {
            if query.starts_with("SHOW") {
                return Ok(Vec::new());
            }
            if query.contains("db.index.fulltext.queryNodes") {
                return Ok(self
                    .fulltext_rows
                    .iter()
                    .filter(|(db, _)| db == database)
                    .flat_map(|(_, rows)| {
                        rows.iter()
                            .map(|(id, name, score, label)| fulltext_row(id, name, *score, label))
                    })
                    .collect());
            }
            if query.contains("CONTAINS") {
                return Ok(self
                    .contains_rows
                    .iter()
                    .filter(|(db, _)| db == database)
                    .flat_map(|(_, rows)| {
                        rows.iter().map(|(id, name, label)| {
                            let mut row = serde_json::Map::new();
                            row.insert("node_id".to_string(), json!(id));
                            row.insert("labels".to_string(), json!([label]));
                            row.insert("display_name".to_string(), json!(name));
                            row
                        })
                    })
                    .collect());
            }
            Ok(Vec::new())
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
            Ok(SchemaSnapshot {
                database: database.to_string(),
                ..Default::default()
            })
        }
    }

    fn resolver(gateway: ScriptedGateway) -> SemanticEntityResolver {
        SemanticEntityResolver::new(
            Arc::new(gateway),
            None,
            Arc::new(OntologyHintStore::new()),
            Arc::new(Config::default()),
        )
    }

    #[test]
    fn extraction_finds_quoted_and_capitalized_spans() {
        let r = resolver(ScriptedGateway::empty());
        let entities = r.extract_entities("Who supplies \"ACME\" and Initech Systems?");
        assert!(entities.contains(&"ACME".to_string()));
        assert!(entities.contains(&"Initech Systems".to_string()));
    }

    #[test]
    fn extraction_falls_back_to_long_tokens() {
        let r = resolver(ScriptedGateway::empty());
        let entities = r.extract_entities("widget42 gadget7x?");
        assert_eq!(entities, vec!["widget42".to_string(), "gadget7x".to_string()]);
    }

    #[tokio::test]
    async fn exact_name_outranks_partial_match() {
        let gateway = ScriptedGateway {
            fulltext_rows: vec![(
                "kgnormal".to_string(),
                vec![
                    ("4:abc:1", "ACME", 2.5, "Company"),
                    ("4:abc:2", "ACME Holdings", 2.0, "Company"),
                ],
            )],
            contains_rows: Vec::new(),
        };
        let r = resolver(gateway);
        let context = r
            .resolve("Who supplies ACME?", &["kgnormal".to_string()], &[])
            .await;
        let ranked = &context.matches["ACME"];
        assert_eq!(ranked[0].display_name, "ACME");
        assert_eq!(ranked[0].source, CandidateSource::Fulltext);
    }

    #[tokio::test]
    async fn contains_fallback_when_fulltext_is_empty() {
        let gateway = ScriptedGateway {
            fulltext_rows: Vec::new(),
            contains_rows: vec![(
                "kgnormal".to_string(),
                vec![("4:abc:9", "Acme Corp", "Company")],
            )],
        };
        let r = resolver(gateway);
        let context = r
            .resolve("Who supplies ACME?", &["kgnormal".to_string()], &[])
            .await;
        let ranked = &context.matches["ACME"];
        assert_eq!(ranked[0].source, CandidateSource::Contains);
        assert!(ranked[0].fulltext_score == 0.0);
    }

    #[tokio::test]
    async fn override_is_pinned_at_rank_zero() {
        let gateway = ScriptedGateway {
            fulltext_rows: vec![(
                "kgnormal".to_string(),
                vec![("4:abc:2", "ACME Holdings", 2.5, "Company")],
            )],
            contains_rows: Vec::new(),
        };
        let r = resolver(gateway);
        let overrides = vec![EntityOverride {
            question_entity: "ACME".to_string(),
            database: "kgnormal".to_string(),
            node_id: "4:abc:1".to_string(),
            display_name: Some("ACME".to_string()),
            labels: vec!["Company".to_string()],
        }];
        let context = r
            .resolve("Who supplies ACME?", &["kgnormal".to_string()], &overrides)
            .await;
        let ranked = &context.matches["ACME"];
        assert_eq!(ranked[0].source, CandidateSource::Override);
        assert_eq!(ranked[0].node_id, "4:abc:1");
        assert!(ranked[0].is_confident);
        assert!(context.overrides_applied.contains_key("ACME"));
    }

    #[tokio::test]
    async fn close_scores_are_not_confident() {
        let gateway = ScriptedGateway {
            fulltext_rows: vec![(
                "kgnormal".to_string(),
                vec![
                    ("4:abc:1", "Acme East", 2.0, "Company"),
                    ("4:abc:2", "Acme West", 2.0, "Company"),
                ],
            )],
            contains_rows: Vec::new(),
        };
        let r = resolver(gateway);
        let context = r
            .resolve("Tell me about Acme", &["kgnormal".to_string()], &[])
            .await;
        let ranked = &context.matches["Acme"];
        assert!(ranked.len() >= 2);
        assert!(!ranked[0].is_confident);
    }

    #[tokio::test]
    async fn near_duplicates_across_databases_collapse() {
        let gateway = ScriptedGateway {
            fulltext_rows: vec![
                (
                    "kgnormal".to_string(),
                    vec![("4:abc:1", "ACME", 2.0, "Company")],
                ),
                (
                    "kgfibo".to_string(),
                    vec![("4:def:1", "ACME", 1.0, "Company")],
                ),
            ],
            contains_rows: Vec::new(),
        };
        let r = resolver(gateway);
        let context = r
            .resolve(
                "Who supplies ACME?",
                &["kgnormal".to_string(), "kgfibo".to_string()],
                &[],
            )
            .await;
        let ranked = &context.matches["ACME"];
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].database, "kgnormal");
        assert!(ranked[0].is_confident);
    }

    #[tokio::test]
    async fn ranking_is_stable_across_calls() {
        let build = || ScriptedGateway {
            fulltext_rows: vec![(
                "kgnormal".to_string(),
                vec![
                    ("4:abc:1", "Beta Industries", 2.0, "Company"),
                    ("4:abc:2", "Alpha Industries", 2.0, "Company"),
                ],
            )],
            contains_rows: Vec::new(),
        };
        let first = resolver(build())
            .resolve("industries", &["kgnormal".to_string()], &[])
            .await;
        let second = resolver(build())
            .resolve("industries", &["kgnormal".to_string()], &[])
            .await;
        let names = |ctx: &SemanticContext| {
            ctx.matches["industries"]
                .iter()
                .map(|c| c.display_name.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(&first), names(&second));
    }

    #[tokio::test]
    async fn unresolved_entities_are_reported() {
        let r = resolver(ScriptedGateway::empty());
        let context = r
            .resolve("Who supplies ACME?", &["kgnormal".to_string()], &[])
            .await;
        assert!(context.matches.is_empty());
        assert_eq!(context.unresolved_entities, vec!["ACME".to_string()]);
    }
}
