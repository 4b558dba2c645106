//! Platform chat adapter.
//!
//! Session-bound layer between the UI and the orchestration core: a bounded
//! in-memory session store, mode dispatch accounting, and shaping of runtime
//! payloads into UI-friendly cards, a trace summary, and entity candidate
//! groups.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::supervisor::RunResult;

/// One turn of a platform chat session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTurn {
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Value,
}

/// In-memory session store for platform chat. Keeps at most `max_turns`
/// turns per session, trimming the oldest.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Vec<SessionTurn>>>,
    max_turns: usize,
}

impl SessionStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_turns: max_turns.max(1),
        }
    }

    pub async fn append(&self, session_id: &str, role: &str, content: &str, metadata: Value) {
        let mut sessions = self.sessions.write().await;
        let history = sessions.entry(session_id.to_string()).or_default();
        history.push(SessionTurn {
            role: role.to_string(),
            content: content.to_string(),
            metadata,
        });
        if history.len() > self.max_turns {
            let excess = history.len() - self.max_turns;
            history.drain(..excess);
        }
    }

    pub async fn history(&self, session_id: &str) -> Vec<SessionTurn> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn clear(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }
}

/// A display card for the chat UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiCard {
    pub kind: String,
    pub title: String,
    pub body: String,
}

/// One question entity with its candidate resolutions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityCandidateGroup {
    pub question_entity: String,
    pub candidates: Vec<UiEntityCandidate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiEntityCandidate {
    pub database: String,
    pub node_id: String,
    pub display_name: String,
    pub labels: Vec<String>,
    pub score: f64,
    pub source: String,
    pub is_confident: bool,
}

/// UI-shaped projection of a runtime payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiPayload {
    pub cards: Vec<UiCard>,
    pub trace_summary: BTreeMap<String, usize>,
    pub entity_candidates: Vec<EntityCandidateGroup>,
}

/// Shape a runtime result into the frontend payload.
pub fn build_ui_payload(mode: &str, result: &RunResult) -> UiPayload {
    let mut trace_summary: BTreeMap<String, usize> = BTreeMap::new();
    for step in &result.trace_steps {
        let key = serde_json::to_value(step.step_type)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| "UNKNOWN".to_string());
        *trace_summary.entry(key).or_insert(0) += 1;
    }

    let cards = vec![
        UiCard {
            kind: "summary".to_string(),
            title: format!("Mode: {mode}"),
            body: result.answer.clone(),
        },
        UiCard {
            kind: "trace".to_string(),
            title: "Trace Steps".to_string(),
            body: format!("{} steps", result.trace_steps.len()),
        },
    ];

    let entity_candidates = result
        .semantic_context
        .as_ref()
        .map(|context| {
            context
                .matches
                .iter()
                .map(|(question_entity, candidates)| EntityCandidateGroup {
                    question_entity: question_entity.clone(),
                    candidates: candidates
                        .iter()
                        .map(|c| UiEntityCandidate {
                            database: c.database.clone(),
                            node_id: c.node_id.clone(),
                            display_name: c.display_name.clone(),
                            labels: c.labels.clone(),
                            score: c.score,
                            source: serde_json::to_value(c.source)
                                .ok()
                                .and_then(|v| v.as_str().map(String::from))
                                .unwrap_or_default(),
                            is_confident: c.is_confident,
                        })
                        .collect(),
                })
                .collect()
        })
        .unwrap_or_default();

    UiPayload {
        cards,
        trace_summary,
        entity_candidates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RequestContext;
    use crate::trace::StepType;
    use serde_json::json;

    #[tokio::test]
    async fn sessions_trim_to_max_turns() {
        let store = SessionStore::new(3);
        for i in 0..5 {
            store
                .append("s1", "user", &format!("message {i}"), json!({}))
                .await;
        }
        let history = store.history("s1").await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "message 2");

        store.clear("s1").await;
        assert!(store.history("s1").await.is_empty());
    }

    #[test]
    fn ui_payload_counts_steps_by_type() {
        let ctx = RequestContext::new("default", 10);
        let root = ctx
            .trace
            .root(StepType::Resolve, "SemanticResolver", "semantic", "", json!({}))
            .unwrap();
        ctx.trace
            .child(&root, StepType::Route, "Router", "semantic", "", json!({}))
            .unwrap();

        let mut result = crate::supervisor::RunResult {
            answer: "answer".to_string(),
            trace_steps: ctx.trace.snapshot(),
            request_id: "r".to_string(),
            route: None,
            semantic_context: None,
            lpg_result: None,
            rdf_result: None,
            agent_statuses: None,
            debate_results: None,
            debate_state: None,
            fallback_from: None,
            runtime_control: None,
        };
        result.semantic_context = Some(Default::default());

        let payload = build_ui_payload("semantic", &result);
        assert_eq!(payload.trace_summary["RESOLVE"], 1);
        assert_eq!(payload.trace_summary["ROUTE"], 1);
        assert_eq!(payload.cards[0].title, "Mode: semantic");
    }
}
