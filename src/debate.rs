//! Parallel debate orchestrator.
//!
//! Society-of-mind pattern: every ready or degraded agent answers the
//! question independently, results land in shared memory, and a supervisor
//! synthesizes one coherent response. Worker failures are isolated; a single
//! success keeps the debate alive. Trace topology:
//! `ORCHESTRATION -> FANOUT -> (FAN_OUT_CHILD per attempted agent) -> COLLECT -> SYNTHESIS`
//! where COLLECT joins only the children that produced an answer.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Semaphore;

use crate::agents::{Agent, AgentPool};
use crate::config::Config;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::readiness::{DebateState, ReadinessSummary};
use crate::runtime::{AgentRuntime, RequestContext};
use crate::trace::StepType;

const SUPERVISOR_INSTRUCTIONS: &str = "\
You supervise a panel of database-bound graph specialists who answered the \
same question independently. Synthesize their responses into a single \
coherent answer. Weigh agreement across databases above any single claim, \
note disagreements explicitly, and ignore fragments that only report errors.";

/// Terminal status of one debate worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Success,
    Timeout,
    ToolError,
    Unreachable,
}

/// Result of a full debate cycle.
#[derive(Debug, Clone)]
pub struct DebateRun {
    /// Supervisor synthesis; `None` when the debate was blocked.
    pub answer: Option<String>,
    pub agent_statuses: BTreeMap<String, AgentStatus>,
    /// One fragment per attempted agent (answers or error text).
    pub fragments: BTreeMap<String, String>,
    pub debate_state: DebateState,
    pub readiness: ReadinessSummary,
}

struct WorkerOutcome {
    database: String,
    status: AgentStatus,
    fragment: String,
}

pub struct DebateOrchestrator {
    runtime: Arc<AgentRuntime>,
    pool: Arc<AgentPool>,
    config: Arc<Config>,
}

impl DebateOrchestrator {
    pub fn new(runtime: Arc<AgentRuntime>, pool: Arc<AgentPool>, config: Arc<Config>) -> Self {
        Self {
            runtime,
            pool,
            config,
        }
    }

    /// Execute the full debate cycle: fan-out, collect, synthesize.
    pub async fn run(
        &self,
        question: &str,
        databases: &[String],
        ctx: &RequestContext,
    ) -> OrchestratorResult<DebateRun> {
        let readiness = self.pool.readiness(databases);
        let attempted = readiness.attempted();

        let orchestration_step = ctx.trace.root(
            StepType::Orchestration,
            "DebateOrchestrator",
            "orchestration",
            "Parallel debate started",
            json!({
                "query": preview(question),
                "agent_count": attempted.len(),
                "databases": databases,
            }),
        )?;
        let fanout_step = ctx.trace.child(
            &orchestration_step,
            StepType::Fanout,
            "DebateOrchestrator",
            "orchestration",
            &format!("Dispatching query to {} agents", attempted.len()),
            json!({
                "agents": attempted.iter().map(|db| format!("Agent_{db}")).collect::<Vec<_>>(),
            }),
        )?;

        // Databases unreachable at snapshot time are accounted for without a
        // worker; their absence from shared memory marks them unreachable.
        let mut agent_statuses: BTreeMap<String, AgentStatus> = readiness
            .blocked
            .iter()
            .map(|db| (db.clone(), AgentStatus::Unreachable))
            .collect();
        let mut fragments = BTreeMap::new();

        if attempted.is_empty() {
            tracing::warn!("debate blocked: no ready or degraded agents");
            return Ok(DebateRun {
                answer: None,
                agent_statuses,
                fragments,
                debate_state: DebateState::Blocked,
                readiness,
            });
        }

        let debate_span = ctx.spans.start("debate.orchestration", None);
        let debate_span_id = debate_span.id.clone();

        let semaphore = Arc::new(Semaphore::new(
            self.config.effective_parallelism(attempted.len()),
        ));
        let workers = attempted.iter().map(|db| {
            self.run_worker(
                db.clone(),
                question.to_string(),
                ctx,
                Arc::clone(&semaphore),
                debate_span_id.clone(),
            )
        });
        let outcomes: Vec<WorkerOutcome> = join_all(workers).await;

        let mut answered_children = Vec::new();
        for outcome in &outcomes {
            let child = ctx.trace.child(
                &fanout_step,
                StepType::FanOutChild,
                &format!("Agent_{}", outcome.database),
                "fan-out",
                &preview(&outcome.fragment),
                json!({"db": outcome.database, "status": outcome.status}),
            )?;
            if outcome.status == AgentStatus::Success {
                answered_children.push(child);
            }
            agent_statuses.insert(outcome.database.clone(), outcome.status);
            fragments.insert(outcome.database.clone(), outcome.fragment.clone());
        }

        if answered_children.is_empty() {
            ctx.spans.finish(debate_span, json!({"successes": 0}));
            tracing::warn!("debate blocked: all workers failed");
            return Ok(DebateRun {
                answer: None,
                agent_statuses,
                fragments,
                debate_state: DebateState::Blocked,
                readiness,
            });
        }

        let collect_step = ctx.trace.join(
            &answered_children,
            StepType::Collect,
            "DebateOrchestrator",
            "orchestration",
            &format!("Collecting {} results", answered_children.len()),
            json!({"answered": answered_children.len(), "attempted": outcomes.len()}),
        )?;

        let answer = self
            .synthesize(question, &agent_statuses, &fragments, ctx, &debate_span_id)
            .await?;
        ctx.trace.child(
            &collect_step,
            StepType::Synthesis,
            "Supervisor",
            "synthesis",
            &preview(&answer),
            json!({"input_agents": answered_children.len()}),
        )?;
        ctx.spans
            .finish(debate_span, json!({"successes": answered_children.len()}));

        let failures = outcomes
            .iter()
            .filter(|o| o.status != AgentStatus::Success)
            .count();
        let debate_state = match readiness.debate_state() {
            // At least one answer arrived, so the debate is not blocked even
            // when nothing was nominally ready at snapshot time.
            DebateState::Blocked => DebateState::Degraded,
            DebateState::Ready if failures > 0 => DebateState::Degraded,
            state => state,
        };

        Ok(DebateRun {
            answer: Some(answer),
            agent_statuses,
            fragments,
            debate_state,
            readiness,
        })
    }

    async fn run_worker(
        &self,
        database: String,
        question: String,
        ctx: &RequestContext,
        semaphore: Arc<Semaphore>,
        debate_span_id: String,
    ) -> WorkerOutcome {
        let Ok(_permit) = semaphore.acquire().await else {
            return WorkerOutcome {
                database,
                status: AgentStatus::ToolError,
                fragment: "Error: worker pool closed".to_string(),
            };
        };
        let Some(agent) = self.pool.agent(&database) else {
            return WorkerOutcome {
                database,
                status: AgentStatus::Unreachable,
                fragment: "Error: no agent available".to_string(),
            };
        };

        let run = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                return WorkerOutcome {
                    database,
                    status: AgentStatus::Timeout,
                    fragment: "Error: request cancelled".to_string(),
                };
            }
            result = tokio::time::timeout(
                self.config.agent_timeout,
                self.runtime.run(&agent, &question, ctx, Some(&debate_span_id)),
            ) => result,
        };

        match run {
            Ok(Ok(result)) => {
                ctx.memory.put_result(&database, &result.text);
                WorkerOutcome {
                    database,
                    status: AgentStatus::Success,
                    fragment: result.text,
                }
            }
            Ok(Err(err)) => {
                tracing::warn!(database = %database, %err, "debate worker failed");
                WorkerOutcome {
                    database,
                    status: classify_error(&err),
                    fragment: format!("Error: {err}"),
                }
            }
            Err(_elapsed) => {
                tracing::warn!(database = %database, "debate worker timed out");
                WorkerOutcome {
                    database,
                    status: AgentStatus::Timeout,
                    fragment: format!(
                        "Error: no answer within {}s",
                        self.config.agent_timeout.as_secs()
                    ),
                }
            }
        }
    }

    async fn synthesize(
        &self,
        question: &str,
        statuses: &BTreeMap<String, AgentStatus>,
        fragments: &BTreeMap<String, String>,
        ctx: &RequestContext,
        debate_span_id: &str,
    ) -> OrchestratorResult<String> {
        let supervisor = Agent::new("Supervisor", None, SUPERVISOR_INSTRUCTIONS, vec![]);
        let input = format_for_supervisor(question, statuses, fragments, &ctx.memory.all_results());
        let result = self
            .runtime
            .run(&supervisor, &input, ctx, Some(debate_span_id))
            .await?;
        Ok(result.text)
    }
}

fn classify_error(err: &OrchestratorError) -> AgentStatus {
    match err {
        OrchestratorError::Timeout { .. } => AgentStatus::Timeout,
        OrchestratorError::Unreachable(_) => AgentStatus::Unreachable,
        _ => AgentStatus::ToolError,
    }
}

/// Synthesis input: the question, then one block per attempted agent with
/// its status and fragment. Shared-memory results win over the raw fragment
/// when an agent stored a refined finding.
fn format_for_supervisor(
    question: &str,
    statuses: &BTreeMap<String, AgentStatus>,
    fragments: &BTreeMap<String, String>,
    shared_results: &BTreeMap<String, String>,
) -> String {
    let mut parts = vec![format!("Original Question: {question}\n\nAgent Responses:")];
    for (database, fragment) in fragments {
        let status = statuses
            .get(database)
            .copied()
            .unwrap_or(AgentStatus::ToolError);
        let response = shared_results.get(database).unwrap_or(fragment);
        parts.push(format!(
            "--- Agent_{database} ({database}) [{status:?}] ---\n{response}"
        ));
    }
    parts.push(
        "Synthesize these responses into a single, coherent answer. \
         Highlight agreements and note disagreements."
            .to_string(),
    );
    parts.join("\n\n")
}

fn preview(text: &str) -> String {
    text.chars().take(120).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification_matches_taxonomy() {
        assert_eq!(
            classify_error(&OrchestratorError::Timeout {
                scope: "agent".to_string(),
                trace_steps: vec![]
            }),
            AgentStatus::Timeout
        );
        assert_eq!(
            classify_error(&OrchestratorError::Unreachable("kgfibo".to_string())),
            AgentStatus::Unreachable
        );
        assert_eq!(
            classify_error(&OrchestratorError::Tool("boom".to_string())),
            AgentStatus::ToolError
        );
    }

    #[test]
    fn supervisor_input_contains_every_fragment() {
        let mut statuses = BTreeMap::new();
        statuses.insert("kgnormal".to_string(), AgentStatus::Success);
        statuses.insert("kgfibo".to_string(), AgentStatus::Timeout);
        let mut fragments = BTreeMap::new();
        fragments.insert("kgnormal".to_string(), "ACME is supplied by Initech".to_string());
        fragments.insert("kgfibo".to_string(), "Error: no answer within 60s".to_string());

        let input = format_for_supervisor(
            "Who supplies ACME?",
            &statuses,
            &fragments,
            &BTreeMap::new(),
        );
        assert!(input.contains("Original Question: Who supplies ACME?"));
        assert!(input.contains("Agent_kgnormal (kgnormal)"));
        assert!(input.contains("Agent_kgfibo (kgfibo)"));
        assert!(input.contains("note disagreements"));
    }

    #[test]
    fn status_wire_names_are_snake_case() {
        assert_eq!(
            serde_json::to_value(AgentStatus::ToolError).unwrap(),
            serde_json::json!("tool_error")
        );
        assert_eq!(
            serde_json::to_value(AgentStatus::Unreachable).unwrap(),
            serde_json::json!("unreachable")
        );
    }
}
