//! Request handlers for the runtime endpoints.

use axum::extract::{Path, State};
use axum::response::Json;
use axum::Extension;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{request_id_of, ApiError, AppState, RequestId};
use crate::error::OrchestratorError;
use crate::graph::EnsureResult;
use crate::platform::{build_ui_payload, SessionTurn, UiPayload};
use crate::policy;
use crate::readiness::AgentReadiness;
use crate::semantic::EntityOverride;
use crate::supervisor::{FallbackInfo, RunMode, RunRequest, RunResult, RuntimeControl};
use crate::trace::TraceStep;

fn default_workspace() -> String {
    "default".to_string()
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Run endpoints
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RunAgentRequest {
    pub query: String,
    #[serde(default = "default_workspace")]
    pub workspace_id: String,
    #[serde(default)]
    pub databases: Vec<String>,
}

/// POST /run_agent - legacy single-route execution.
pub async fn run_agent(
    State(state): State<AppState>,
    request_id: Option<Extension<RequestId>>,
    Json(body): Json<RunAgentRequest>,
) -> Result<Json<RunResult>, ApiError> {
    let request_id = request_id_of(&request_id);
    let mut request = RunRequest::new(body.query, body.workspace_id, RunMode::Router)
        .with_databases(body.databases);
    request.request_id = request_id;
    state
        .supervisor
        .run(request)
        .await
        .map(Json)
        .map_err(|err| ApiError::new(err, request_id))
}

#[derive(Debug, Deserialize)]
pub struct RunSemanticRequest {
    pub query: String,
    #[serde(default = "default_workspace")]
    pub workspace_id: String,
    #[serde(default)]
    pub databases: Vec<String>,
    #[serde(default)]
    pub entity_overrides: Vec<EntityOverride>,
}

/// POST /run_agent_semantic - semantic flow.
pub async fn run_agent_semantic(
    State(state): State<AppState>,
    request_id: Option<Extension<RequestId>>,
    Json(body): Json<RunSemanticRequest>,
) -> Result<Json<RunResult>, ApiError> {
    let request_id = request_id_of(&request_id);
    let mut request = RunRequest::new(body.query, body.workspace_id, RunMode::Semantic)
        .with_databases(body.databases)
        .with_overrides(body.entity_overrides);
    request.request_id = request_id;
    state
        .supervisor
        .run(request)
        .await
        .map(Json)
        .map_err(|err| ApiError::new(err, request_id))
}

#[derive(Debug, Deserialize)]
pub struct RunDebateRequest {
    pub query: String,
    #[serde(default = "default_workspace")]
    pub workspace_id: String,
    #[serde(default)]
    pub databases: Vec<String>,
    /// Redirect a blocked debate to the semantic flow.
    #[serde(default = "default_true")]
    pub fallback: bool,
}

/// POST /run_debate - parallel debate across ready agents.
pub async fn run_debate(
    State(state): State<AppState>,
    request_id: Option<Extension<RequestId>>,
    Json(body): Json<RunDebateRequest>,
) -> Result<Json<RunResult>, ApiError> {
    let request_id = request_id_of(&request_id);
    let mut request = RunRequest::new(body.query, body.workspace_id, RunMode::Debate)
        .with_databases(body.databases);
    request.request_id = request_id;
    request.fallback_enabled = body.fallback;
    state
        .supervisor
        .run(request)
        .await
        .map(Json)
        .map_err(|err| ApiError::new(err, request_id))
}

// ============================================================================
// Platform chat
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PlatformChatRequest {
    pub session_id: String,
    pub message: String,
    #[serde(default)]
    pub mode: Option<RunMode>,
    #[serde(default = "default_workspace")]
    pub workspace_id: String,
    #[serde(default)]
    pub databases: Vec<String>,
    #[serde(default)]
    pub entity_overrides: Vec<EntityOverride>,
}

#[derive(Debug, Serialize)]
pub struct PlatformChatResponse {
    pub assistant_message: String,
    pub trace_steps: Vec<TraceStep>,
    pub ui_payload: UiPayload,
    pub runtime_payload: RunResult,
    pub runtime_control: RuntimeControl,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_from: Option<FallbackInfo>,
}

/// POST /platform/chat/send - session-bound UI adapter.
pub async fn platform_chat_send(
    State(state): State<AppState>,
    request_id: Option<Extension<RequestId>>,
    Json(body): Json<PlatformChatRequest>,
) -> Result<Json<PlatformChatResponse>, ApiError> {
    let request_id = request_id_of(&request_id);
    let mode = body.mode.unwrap_or(RunMode::Semantic);

    state
        .sessions
        .append(&body.session_id, "user", &body.message, json!({"mode": mode}))
        .await;

    let mut request = RunRequest::new(&body.message, &body.workspace_id, mode)
        .with_databases(body.databases.clone())
        .with_overrides(body.entity_overrides.clone());
    request.request_id = request_id;
    let result = state
        .supervisor
        .run(request)
        .await
        .map_err(|err| ApiError::new(err, request_id))?;

    let executed_mode = result
        .runtime_control
        .as_ref()
        .map(|c| c.executed_mode.clone())
        .unwrap_or_else(|| mode.as_str().to_string());
    let runtime_control = result.runtime_control.clone().unwrap_or(RuntimeControl {
        requested_mode: mode.as_str().to_string(),
        executed_mode,
        reason: "requested".to_string(),
    });

    state
        .sessions
        .append(
            &body.session_id,
            "assistant",
            &result.answer,
            json!({"mode": runtime_control.executed_mode, "request_id": request_id}),
        )
        .await;

    let ui_payload = build_ui_payload(&runtime_control.executed_mode, &result);
    Ok(Json(PlatformChatResponse {
        assistant_message: result.answer.clone(),
        trace_steps: result.trace_steps.clone(),
        ui_payload,
        fallback_from: result.fallback_from.clone(),
        runtime_control,
        runtime_payload: result,
    }))
}

#[derive(Debug, Serialize)]
pub struct SessionHistoryResponse {
    pub session_id: String,
    pub turns: Vec<SessionTurn>,
}

/// GET /platform/chat/session/:session_id
pub async fn platform_session_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<SessionHistoryResponse> {
    let turns = state.sessions.history(&session_id).await;
    Json(SessionHistoryResponse { session_id, turns })
}

/// POST /platform/chat/session/:session_id/reset
pub async fn platform_session_reset(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<serde_json::Value> {
    state.sessions.clear(&session_id).await;
    Json(json!({"session_id": session_id, "cleared": true}))
}

// ============================================================================
// Index management
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct EnsureFulltextRequest {
    #[serde(default = "default_workspace")]
    pub workspace_id: String,
    pub databases: Vec<String>,
    #[serde(default)]
    pub index_name: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub properties: Vec<String>,
    #[serde(default = "default_true")]
    pub create_if_missing: bool,
}

#[derive(Debug, Serialize)]
pub struct EnsureFulltextResponse {
    pub results: Vec<EnsureResult>,
}

/// POST /indexes/fulltext/ensure
pub async fn ensure_fulltext_index(
    State(state): State<AppState>,
    request_id: Option<Extension<RequestId>>,
    Json(body): Json<EnsureFulltextRequest>,
) -> Result<Json<EnsureFulltextResponse>, ApiError> {
    let request_id = request_id_of(&request_id);
    let supervisor = &state.supervisor;
    supervisor
        .policy()
        .authorize("user", policy::ACTION_MANAGE_INDEXES, &body.workspace_id)
        .map_err(|err| ApiError::new(err, request_id))?;
    if body.databases.is_empty() {
        return Err(ApiError::new(
            OrchestratorError::InvalidIdentifier("'databases' must not be empty".to_string()),
            request_id,
        ));
    }
    for db in &body.databases {
        supervisor
            .registry()
            .check(db)
            .map_err(|err| ApiError::new(err, request_id))?;
    }

    let index_name = body
        .index_name
        .unwrap_or_else(|| state.config.fulltext_index.clone());
    let labels = if body.labels.is_empty() {
        vec!["Entity".to_string()]
    } else {
        body.labels
    };
    let properties = if body.properties.is_empty() {
        vec!["name".to_string(), "title".to_string(), "id".to_string(), "uri".to_string()]
    } else {
        body.properties
    };

    let mut results = Vec::new();
    for db in &body.databases {
        let result = state
            .fulltext
            .ensure_index(db, &index_name, &labels, &properties, body.create_if_missing)
            .await
            .map_err(|err| ApiError::new(err, request_id))?;
        results.push(result);
    }
    Ok(Json(EnsureFulltextResponse { results }))
}

// ============================================================================
// Listings and health
// ============================================================================

#[derive(Debug, Serialize)]
pub struct DatabasesResponse {
    pub databases: Vec<String>,
}

/// GET /databases - user-facing database names (excludes the trace store).
pub async fn list_databases(State(state): State<AppState>) -> Json<DatabasesResponse> {
    Json(DatabasesResponse {
        databases: state.supervisor.registry().list_user_databases(),
    })
}

#[derive(Debug, Serialize)]
pub struct AgentRow {
    pub database: String,
    pub agent: String,
    pub readiness: AgentReadiness,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct AgentsResponse {
    pub agents: Vec<AgentRow>,
}

/// GET /agents - active DB-bound agents with readiness.
pub async fn list_agents(State(state): State<AppState>) -> Json<AgentsResponse> {
    let agents = state
        .supervisor
        .factory()
        .pool()
        .statuses()
        .into_iter()
        .map(|status| AgentRow {
            agent: format!("Agent_{}", status.database),
            database: status.database,
            readiness: status.readiness,
            reason: status.reason,
        })
        .collect();
    Json(AgentsResponse { agents })
}

/// GET /health/runtime - orchestration runtime probe.
pub async fn health_runtime(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "workspace_id": state.config.workspace_id,
        "llm_provider": state.llm_provider,
        "llm_model": state.llm_model,
    }))
}

/// GET /health/batch - registry-side probe.
pub async fn health_batch(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "registered_databases": state.supervisor.registry().list_user_databases().len(),
    }))
}
