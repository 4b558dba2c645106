//! Request supervisor: the single entry point for a run.
//!
//! Validates the workspace and database list, creates the request-scoped
//! shared memory and cancellation token, re-probes agent readiness, and
//! dispatches to the semantic flow, the debate orchestrator, or the legacy
//! single-route path. A blocked debate with fallback enabled re-dispatches
//! to the semantic flow; the global deadline cancels the context and returns
//! the trace captured so far.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::agents::AgentFactory;
use crate::config::Config;
use crate::debate::{AgentStatus, DebateOrchestrator, DebateRun};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::graph::GraphGateway;
use crate::llm::LlmClient;
use crate::policy::{self, RuntimePolicyEngine};
use crate::readiness::DebateState;
use crate::registry::DatabaseRegistry;
use crate::runtime::{AgentRuntime, RequestContext};
use crate::semantic::hints::OntologyHintStore;
use crate::semantic::{
    EntityOverride, QueryRouter, Route, SemanticContext, SemanticEntityResolver, SemanticFlow,
    SpecialistReport,
};
use crate::trace::{StepType, TraceStep};

/// Execution mode requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Legacy single-route execution.
    Router,
    Semantic,
    Debate,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Router => "router",
            RunMode::Semantic => "semantic",
            RunMode::Debate => "debate",
        }
    }
}

/// A validated run request.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub request_id: Uuid,
    pub query: String,
    pub workspace_id: String,
    pub databases: Vec<String>,
    pub overrides: Vec<EntityOverride>,
    pub mode: RunMode,
    pub fallback_enabled: bool,
    pub role: String,
}

impl RunRequest {
    pub fn new(query: impl Into<String>, workspace_id: impl Into<String>, mode: RunMode) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            query: query.into(),
            workspace_id: workspace_id.into(),
            databases: Vec::new(),
            overrides: Vec::new(),
            mode,
            fallback_enabled: true,
            role: "user".to_string(),
        }
    }

    pub fn with_databases(mut self, databases: Vec<String>) -> Self {
        self.databases = databases;
        self
    }

    pub fn with_overrides(mut self, overrides: Vec<EntityOverride>) -> Self {
        self.overrides = overrides;
        self
    }
}

/// Where a fallback came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackInfo {
    pub mode: String,
    pub debate_state: DebateState,
    pub agent_statuses: BTreeMap<String, AgentStatus>,
}

/// Requested-versus-executed mode accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeControl {
    pub requested_mode: String,
    pub executed_mode: String,
    pub reason: String,
}

/// One attempted agent's contribution to a debate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateFragment {
    pub agent: String,
    pub db: String,
    pub response: String,
}

/// Unified response payload for every execution mode.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub answer: String,
    pub trace_steps: Vec<TraceStep>,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<Route>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_context: Option<SemanticContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lpg_result: Option<SpecialistReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rdf_result: Option<SpecialistReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_statuses: Option<BTreeMap<String, AgentStatus>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debate_results: Option<Vec<DebateFragment>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debate_state: Option<DebateState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_from: Option<FallbackInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_control: Option<RuntimeControl>,
}

impl RunResult {
    fn base(answer: String, ctx: &RequestContext) -> Self {
        Self {
            answer,
            trace_steps: ctx.trace.snapshot(),
            request_id: ctx.request_id.to_string(),
            route: None,
            semantic_context: None,
            lpg_result: None,
            rdf_result: None,
            agent_statuses: None,
            debate_results: None,
            debate_state: None,
            fallback_from: None,
            runtime_control: None,
        }
    }
}

/// Wires shared memory, policy, readiness, and the two flows together.
pub struct RequestSupervisor {
    config: Arc<Config>,
    registry: Arc<DatabaseRegistry>,
    policy: Arc<RuntimePolicyEngine>,
    factory: Arc<AgentFactory>,
    runtime: Arc<AgentRuntime>,
    flow: SemanticFlow,
    debate: DebateOrchestrator,
}

impl RequestSupervisor {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<DatabaseRegistry>,
        gateway: Arc<dyn GraphGateway>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        let policy = Arc::new(RuntimePolicyEngine::new());
        let factory = Arc::new(AgentFactory::new(Arc::clone(&gateway), Arc::clone(&config)));
        let pool = factory.pool();
        let runtime = Arc::new(AgentRuntime::new(Arc::clone(&llm), config.max_tool_turns));
        let hints = Arc::new(OntologyHintStore::load(config.hints_path.as_deref()));
        let resolver = SemanticEntityResolver::new(
            Arc::clone(&gateway),
            Some(Arc::clone(&llm)),
            hints,
            Arc::clone(&config),
        );
        let router = QueryRouter::new(Some(Arc::clone(&llm)), &config);
        let flow = SemanticFlow::new(resolver, router, Arc::clone(&runtime), Arc::clone(&pool));
        let debate = DebateOrchestrator::new(
            Arc::clone(&runtime),
            Arc::clone(&pool),
            Arc::clone(&config),
        );
        Self {
            config,
            registry,
            policy,
            factory,
            runtime,
            flow,
            debate,
        }
    }

    pub fn factory(&self) -> &Arc<AgentFactory> {
        &self.factory
    }

    pub fn registry(&self) -> &Arc<DatabaseRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> &Arc<RuntimePolicyEngine> {
        &self.policy
    }

    /// Run a request end to end under the global deadline.
    pub async fn run(&self, request: RunRequest) -> OrchestratorResult<RunResult> {
        self.policy.authorize(
            &request.role,
            action_for(request.mode),
            &request.workspace_id,
        )?;
        let databases = self.resolve_databases(&request)?;
        for override_entry in &request.overrides {
            if !databases.contains(&override_entry.database) {
                return Err(OrchestratorError::InvalidIdentifier(format!(
                    "override for '{}' targets database '{}' outside the request",
                    override_entry.question_entity, override_entry.database
                )));
            }
        }

        let mut ctx = RequestContext::new(&request.workspace_id, self.config.cache_capacity);
        ctx.request_id = request.request_id;
        tracing::info!(
            request_id = %ctx.request_id,
            mode = request.mode.as_str(),
            databases = ?databases,
            "request accepted"
        );

        let run = self.dispatch(&request, &databases, &ctx);
        tokio::pin!(run);
        tokio::select! {
            result = &mut run => result,
            _ = tokio::time::sleep(self.config.request_timeout) => {
                // Deadline: cancel the context and give components the grace
                // window to unwind cooperatively before the future is dropped.
                ctx.cancel.cancel();
                let _ = tokio::time::timeout(self.config.grace_timeout, &mut run).await;
                Err(OrchestratorError::Timeout {
                    scope: "request".to_string(),
                    trace_steps: ctx.trace.snapshot(),
                })
            }
        }
    }

    async fn dispatch(
        &self,
        request: &RunRequest,
        databases: &[String],
        ctx: &RequestContext,
    ) -> OrchestratorResult<RunResult> {
        // Readiness is re-probed at the start of every request.
        self.factory.create_for_all(databases).await;

        match request.mode {
            RunMode::Semantic => self.run_semantic(request, databases, ctx, None).await,
            RunMode::Debate => self.run_debate(request, databases, ctx).await,
            RunMode::Router => self.run_single(request, databases, ctx).await,
        }
    }

    async fn run_semantic(
        &self,
        request: &RunRequest,
        databases: &[String],
        ctx: &RequestContext,
        fallback: Option<FallbackInfo>,
    ) -> OrchestratorResult<RunResult> {
        let run = self
            .flow
            .run(&request.query, databases, &request.overrides, ctx)
            .await?;

        let mut result = RunResult::base(run.answer, ctx);
        result.route = Some(run.route);
        result.semantic_context = Some(run.semantic_context);
        result.lpg_result = run.lpg;
        result.rdf_result = run.rdf;
        if let Some(fallback) = fallback {
            result.runtime_control = Some(RuntimeControl {
                requested_mode: RunMode::Debate.as_str().to_string(),
                executed_mode: RunMode::Semantic.as_str().to_string(),
                reason: "debate_blocked".to_string(),
            });
            result.fallback_from = Some(fallback);
        }
        Ok(result)
    }

    async fn run_debate(
        &self,
        request: &RunRequest,
        databases: &[String],
        ctx: &RequestContext,
    ) -> OrchestratorResult<RunResult> {
        let debate_run = self.debate.run(&request.query, databases, ctx).await?;

        if debate_run.debate_state == DebateState::Blocked {
            if !request.fallback_enabled {
                return Err(OrchestratorError::Blocked {
                    summary: debate_run.readiness,
                });
            }
            return self.fallback_to_semantic(request, databases, ctx, debate_run).await;
        }

        let DebateRun {
            answer,
            agent_statuses,
            fragments,
            debate_state,
            ..
        } = debate_run;
        let mut result = RunResult::base(answer.unwrap_or_default(), ctx);
        result.agent_statuses = Some(agent_statuses);
        result.debate_results = Some(
            fragments
                .into_iter()
                .map(|(db, response)| DebateFragment {
                    agent: format!("Agent_{db}"),
                    db,
                    response,
                })
                .collect(),
        );
        result.debate_state = Some(debate_state);
        Ok(result)
    }

    /// Blocked debate falls back to the semantic flow over the agents that
    /// were attempted, or the original database list when nothing was even
    /// attemptable. The debate trace is discarded; the response carries the
    /// semantic topology plus the fallback accounting.
    async fn fallback_to_semantic(
        &self,
        request: &RunRequest,
        databases: &[String],
        ctx: &RequestContext,
        debate_run: DebateRun,
    ) -> OrchestratorResult<RunResult> {
        let attempted = debate_run.readiness.attempted();
        let target: Vec<String> = if attempted.is_empty() {
            databases.to_vec()
        } else {
            attempted
        };
        if target.is_empty() {
            return Err(OrchestratorError::Blocked {
                summary: debate_run.readiness,
            });
        }
        tracing::warn!(
            request_id = %ctx.request_id,
            "debate blocked, falling back to semantic flow"
        );

        let fallback_ctx = ctx.with_fresh_trace();
        let info = FallbackInfo {
            mode: RunMode::Debate.as_str().to_string(),
            debate_state: DebateState::Blocked,
            agent_statuses: debate_run.agent_statuses,
        };
        self.run_semantic(request, &target, &fallback_ctx, Some(info))
            .await
    }

    /// Legacy single-route path: hand the question to the strongest ready
    /// agent and return its answer directly.
    async fn run_single(
        &self,
        request: &RunRequest,
        databases: &[String],
        ctx: &RequestContext,
    ) -> OrchestratorResult<RunResult> {
        let pool = self.factory.pool();
        let summary = pool.readiness(databases);
        let root = ctx.trace.root(
            StepType::Orchestration,
            "RequestSupervisor",
            "orchestration",
            "Single-route execution",
            json!({"databases": databases}),
        )?;

        let Some(database) = summary.attempted().into_iter().next() else {
            return Err(OrchestratorError::Blocked { summary });
        };
        let agent = pool
            .agent(&database)
            .ok_or_else(|| OrchestratorError::Unreachable(database.clone()))?;

        let run = self.runtime.run(&agent, &request.query, ctx, None).await?;
        ctx.trace.child(
            &root,
            StepType::Answer,
            &agent.name,
            "single-route",
            &run.text.chars().take(120).collect::<String>(),
            json!({"db": database}),
        )?;

        let mut result = RunResult::base(run.text, ctx);
        let mut statuses = BTreeMap::new();
        statuses.insert(database, AgentStatus::Success);
        result.agent_statuses = Some(statuses);
        Ok(result)
    }

    fn resolve_databases(&self, request: &RunRequest) -> OrchestratorResult<Vec<String>> {
        if request.databases.is_empty() {
            let databases = self.registry.list_user_databases();
            if databases.is_empty() {
                return Err(OrchestratorError::NotRegistered(
                    "no user databases registered".to_string(),
                ));
            }
            return Ok(databases);
        }
        for db in &request.databases {
            self.registry.check(db)?;
        }
        Ok(request.databases.clone())
    }
}

fn action_for(mode: RunMode) -> &'static str {
    match mode {
        RunMode::Router => policy::ACTION_RUN_AGENT,
        RunMode::Semantic => policy::ACTION_RUN_SEMANTIC,
        RunMode::Debate => policy::ACTION_RUN_DEBATE,
    }
}
