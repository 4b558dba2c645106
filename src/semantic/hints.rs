//! Offline ontology hints for entity resolution.
//!
//! A small store of alias rewrites and question-keyword to label-hint
//! mappings, optionally loaded from a JSON file produced offline. A missing
//! or malformed file degrades to the built-in keyword table.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde::Deserialize;

/// Built-in question-keyword clusters. A hit on any keyword adds the whole
/// cluster to the label hint set.
const QUESTION_LABEL_HINTS: &[(&str, &[&str])] = &[
    ("company", &["company", "organization", "org", "enterprise", "firm"]),
    ("person", &["person", "human", "individual", "employee", "ceo", "founder"]),
    ("product", &["product", "service", "offering"]),
    ("event", &["event", "incident", "meeting"]),
    ("document", &["document", "section", "chunk"]),
    ("ontology", &["ontology", "class", "property", "concept"]),
];

#[derive(Debug, Default, Deserialize)]
struct HintFile {
    #[serde(default)]
    aliases: HashMap<String, String>,
    #[serde(default)]
    label_hints: HashMap<String, Vec<String>>,
}

/// Alias rewrites plus label hints keyed by question keywords.
#[derive(Debug, Default)]
pub struct OntologyHintStore {
    aliases: HashMap<String, String>,
    label_hints: HashMap<String, Vec<String>>,
}

impl OntologyHintStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON file. Missing or unreadable files are not an error.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<HintFile>(&raw) {
                Ok(file) => {
                    tracing::info!(path = %path.display(), "loaded ontology hints");
                    Self {
                        aliases: file
                            .aliases
                            .into_iter()
                            .map(|(k, v)| (k.to_lowercase(), v))
                            .collect(),
                        label_hints: file
                            .label_hints
                            .into_iter()
                            .map(|(k, v)| (k.to_lowercase(), v))
                            .collect(),
                    }
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "malformed hint file, ignoring");
                    Self::default()
                }
            },
            Err(err) => {
                tracing::debug!(path = %path.display(), %err, "no ontology hint file");
                Self::default()
            }
        }
    }

    /// Rewrite a question entity through the alias table.
    pub fn resolve_alias(&self, entity: &str) -> String {
        self.aliases
            .get(&entity.to_lowercase())
            .cloned()
            .unwrap_or_else(|| entity.to_string())
    }

    /// Label hints inferred from the question text: built-in keyword
    /// clusters merged with the offline table.
    pub fn infer_label_hints(&self, question: &str) -> BTreeSet<String> {
        let q = question.to_lowercase();
        let mut hints = BTreeSet::new();
        for (_, cluster) in QUESTION_LABEL_HINTS {
            if cluster.iter().any(|token| q.contains(token)) {
                hints.extend(cluster.iter().map(|s| s.to_string()));
            }
        }
        for (keyword, labels) in &self.label_hints {
            if q.contains(keyword) {
                hints.extend(labels.iter().cloned());
            }
        }
        hints
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_hit_pulls_in_the_cluster() {
        let store = OntologyHintStore::new();
        let hints = store.infer_label_hints("Which company supplies ACME?");
        assert!(hints.contains("company"));
        assert!(hints.contains("organization"));
        assert!(!hints.contains("person"));
    }

    #[test]
    fn aliases_default_to_identity() {
        let store = OntologyHintStore::new();
        assert_eq!(store.resolve_alias("ACME"), "ACME");
    }

    #[test]
    fn missing_file_degrades_quietly() {
        let store = OntologyHintStore::load(Some(Path::new("/nonexistent/hints.json")));
        assert!(store.infer_label_hints("who founded it").contains("founder"));
    }
}
