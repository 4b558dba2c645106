//! Deterministic intent router.
//!
//! Classifies a question to one of `{lpg, rdf, hybrid}` through a cascade of
//! keyword and shape matchers. When both signal families fire, or neither
//! does with enough margin, the route falls to hybrid; a single bounded model
//! call may break the tie when a client is configured. The cascade itself is
//! idempotent and reproducible modulo whitespace normalization.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::llm::LlmClient;

/// Signals for ontology-shaped questions: hierarchies, definitions, classes.
const RDF_HINTS: &[&str] = &[
    "rdf", "rdfs", "owl", "shacl", "sparql", "triple", "ontology", "uri", "class", "classes",
    "instance", "taxonomy", "hierarchy", "subclass", "definition", "is-a",
];

/// Signals for instance-shaped questions: entities, counts, neighborhoods.
const LPG_HINTS: &[&str] = &[
    "cypher", "node", "nodes", "edge", "edges", "path", "neighbor", "neighbors", "graph",
    "community", "relationship", "relationships", "connected", "count", "supplies", "supplier",
];

/// Phrase-level shapes, weightier than single keywords.
const RDF_SHAPES: &[&str] = &["is a", "type of", "kind of", "defined as", "what is the definition"];
const LPG_SHAPES: &[&str] = &["how many", "who supplies", "related to", "connected to", "between"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Lpg,
    Rdf,
    Hybrid,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Lpg => "lpg",
            Route::Rdf => "rdf",
            Route::Hybrid => "hybrid",
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Route a question to LPG, RDF, or the hybrid path.
pub struct QueryRouter {
    llm: Option<Arc<dyn LlmClient>>,
    margin: f64,
}

impl QueryRouter {
    pub fn new(llm: Option<Arc<dyn LlmClient>>, config: &Config) -> Self {
        Self {
            llm,
            margin: config.route_margin,
        }
    }

    /// Purely deterministic classifier; `None` means the cascade could not
    /// decide with enough margin.
    pub fn classify(&self, question: &str) -> Option<Route> {
        let q = normalize_question(question);

        let rdf_score = keyword_score(&q, RDF_HINTS) + 2.0 * shape_score(&q, RDF_SHAPES);
        let mut lpg_score = keyword_score(&q, LPG_HINTS) + 2.0 * shape_score(&q, LPG_SHAPES);
        // A concrete named entity is an instance-level signal. The leading
        // word is skipped; sentence case is not a signal.
        let has_entity = question
            .split_whitespace()
            .skip(1)
            .any(|w| w.chars().next().is_some_and(|c| c.is_ascii_uppercase()) && w.len() > 2);
        if has_entity {
            lpg_score += 1.0;
        }

        if rdf_score > 0.0 && lpg_score > 0.0 {
            return Some(Route::Hybrid);
        }
        let total = rdf_score + lpg_score;
        if total == 0.0 {
            return None;
        }
        let margin = (rdf_score - lpg_score).abs() / total;
        if margin < self.margin {
            return None;
        }
        if rdf_score > lpg_score {
            Some(Route::Rdf)
        } else {
            Some(Route::Lpg)
        }
    }

    /// Full routing: cascade first, then at most one model call, then hybrid.
    pub async fn route(&self, question: &str) -> Route {
        if let Some(route) = self.classify(question) {
            return route;
        }
        if let Some(llm) = &self.llm {
            let system = "Classify the question for graph query planning. \
                          Answer with exactly one word: lpg, rdf, or hybrid. \
                          lpg = specific entities, counts, attributes, neighborhoods. \
                          rdf = type hierarchies, definitions, ontology classes.";
            match llm.chat(system, question).await {
                Ok(answer) => {
                    let answer = answer.trim().to_lowercase();
                    if answer.contains("lpg") {
                        return Route::Lpg;
                    }
                    if answer.contains("rdf") {
                        return Route::Rdf;
                    }
                }
                Err(err) => tracing::debug!(%err, "router model fallback failed"),
            }
        }
        Route::Hybrid
    }
}

fn normalize_question(question: &str) -> String {
    question
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn keyword_score(question: &str, hints: &[&str]) -> f64 {
    let words: Vec<&str> = question
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '-')
        .filter(|w| !w.is_empty())
        .collect();
    hints
        .iter()
        .filter(|hint| words.contains(&hint.to_owned()))
        .count() as f64
}

fn shape_score(question: &str, shapes: &[&str]) -> f64 {
    shapes.iter().filter(|shape| question.contains(*shape)).count() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> QueryRouter {
        QueryRouter::new(None, &Config::default())
    }

    #[tokio::test]
    async fn entity_questions_route_to_lpg() {
        assert_eq!(router().route("Who supplies ACME?").await, Route::Lpg);
        assert_eq!(
            router().route("How many nodes are connected to Initech?").await,
            Route::Lpg
        );
    }

    #[tokio::test]
    async fn ontology_questions_route_to_rdf() {
        assert_eq!(
            router().route("what is the definition of the ontology class for suppliers").await,
            Route::Rdf
        );
    }

    #[tokio::test]
    async fn mixed_signals_route_to_hybrid() {
        assert_eq!(
            router()
                .route("Which ontology classes describe the neighbors of this node?")
                .await,
            Route::Hybrid
        );
    }

    #[tokio::test]
    async fn no_signal_without_model_routes_to_hybrid() {
        assert_eq!(router().route("hello there").await, Route::Hybrid);
    }

    #[tokio::test]
    async fn routing_is_idempotent_modulo_whitespace() {
        let a = router().route("Who   supplies\tACME?").await;
        let b = router().route("Who supplies ACME?").await;
        assert_eq!(a, b);
    }
}
