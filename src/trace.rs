//! Trace topology emitted during a request.
//!
//! Every orchestration step is recorded as a [`TraceStep`] node. Linear chains
//! link through `parent_id`, joins through `parent_ids`, and the result forms
//! a DAG with exactly one root per request. The DAG UI renders strictly from
//! this topology, so the emitter refuses to record a step whose parent has not
//! been emitted earlier in the same request.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Step kinds, named for the orchestration phase that emits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    Orchestration,
    Fanout,
    FanOutChild,
    Collect,
    Synthesis,
    Route,
    Resolve,
    Specialist,
    Answer,
}

/// A single node in the request trace DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStep {
    /// Stable within the request; UUID-shaped.
    pub node_id: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    /// Display name of the emitting agent or component.
    pub agent: String,
    /// Coarse phase label for grouping in the UI.
    pub phase: String,
    /// Short human-readable content (previews, not payloads).
    pub content: String,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parent_ids: Vec<String>,
}

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("trace step references unknown parent '{0}'")]
    UnknownParent(String),
    #[error("trace already has a root step")]
    DuplicateRoot,
}

/// Request-scoped trace emitter shared by all components of one request.
///
/// Cheap to clone; all clones append to the same step list. A snapshot can be
/// taken at any point, which is how a timed-out request still returns the
/// trace captured so far.
#[derive(Clone, Default)]
pub struct TraceEmitter {
    inner: Arc<Mutex<TraceState>>,
}

#[derive(Default)]
struct TraceState {
    steps: Vec<TraceStep>,
    seen: HashSet<String>,
    has_root: bool,
}

impl TraceEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit the root step of the request. Exactly one root is allowed.
    pub fn root(
        &self,
        step_type: StepType,
        agent: &str,
        phase: &str,
        content: &str,
        metadata: Value,
    ) -> Result<String, TraceError> {
        let mut state = self.inner.lock().expect("trace lock poisoned");
        if state.has_root {
            return Err(TraceError::DuplicateRoot);
        }
        state.has_root = true;
        Ok(push_step(
            &mut state, step_type, agent, phase, content, metadata, None, vec![],
        ))
    }

    /// Emit a step chained under a single parent.
    pub fn child(
        &self,
        parent_id: &str,
        step_type: StepType,
        agent: &str,
        phase: &str,
        content: &str,
        metadata: Value,
    ) -> Result<String, TraceError> {
        let mut state = self.inner.lock().expect("trace lock poisoned");
        if !state.seen.contains(parent_id) {
            return Err(TraceError::UnknownParent(parent_id.to_string()));
        }
        Ok(push_step(
            &mut state,
            step_type,
            agent,
            phase,
            content,
            metadata,
            Some(parent_id.to_string()),
            vec![],
        ))
    }

    /// Emit a join step with edges from several parents.
    pub fn join(
        &self,
        parent_ids: &[String],
        step_type: StepType,
        agent: &str,
        phase: &str,
        content: &str,
        metadata: Value,
    ) -> Result<String, TraceError> {
        let mut state = self.inner.lock().expect("trace lock poisoned");
        for parent in parent_ids {
            if !state.seen.contains(parent) {
                return Err(TraceError::UnknownParent(parent.clone()));
            }
        }
        Ok(push_step(
            &mut state,
            step_type,
            agent,
            phase,
            content,
            metadata,
            None,
            parent_ids.to_vec(),
        ))
    }

    /// Steps emitted so far, in emission order.
    pub fn snapshot(&self) -> Vec<TraceStep> {
        self.inner.lock().expect("trace lock poisoned").steps.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("trace lock poisoned").steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[allow(clippy::too_many_arguments)]
fn push_step(
    state: &mut TraceState,
    step_type: StepType,
    agent: &str,
    phase: &str,
    content: &str,
    metadata: Value,
    parent_id: Option<String>,
    parent_ids: Vec<String>,
) -> String {
    let node_id = Uuid::new_v4().to_string();
    state.seen.insert(node_id.clone());
    state.steps.push(TraceStep {
        node_id: node_id.clone(),
        step_type,
        agent: agent.to_string(),
        phase: phase.to_string(),
        content: content.to_string(),
        metadata,
        parent_id,
        parent_ids,
    });
    node_id
}

/// Validate the universal trace properties: unique node ids, every parent
/// emitted earlier, and exactly one parentless root.
pub fn validate_topology(steps: &[TraceStep]) -> Result<(), String> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut roots = 0usize;
    for step in steps {
        if !seen.insert(&step.node_id) {
            return Err(format!("duplicate node_id {}", step.node_id));
        }
        let mut parents: Vec<&str> = step.parent_ids.iter().map(String::as_str).collect();
        if let Some(p) = &step.parent_id {
            parents.push(p);
        }
        if parents.is_empty() {
            roots += 1;
        }
        for parent in parents {
            if parent == step.node_id {
                return Err(format!("step {} is its own parent", step.node_id));
            }
            if !seen.contains(parent) {
                return Err(format!(
                    "step {} references parent {} emitted later or never",
                    step.node_id, parent
                ));
            }
        }
    }
    if roots != 1 {
        return Err(format!("expected exactly one root step, found {roots}"));
    }
    Ok(())
}
