//! HTTP surface for the orchestration core.
//!
//! Runtime endpoints:
//! - POST `/run_agent`            - legacy single-route execution
//! - POST `/run_agent_semantic`   - semantic flow
//! - POST `/run_debate`           - parallel debate
//! - POST `/platform/chat/send`   - session-bound UI adapter
//! - GET  `/platform/chat/session/:id` / POST `.../reset` - session history
//! - POST `/indexes/fulltext/ensure` - fulltext index bootstrap
//! - GET  `/databases`, `/agents` - registry and pool listings
//! - GET  `/health/runtime`, `/health/batch` - split readiness probes
//!
//! Success responses are per-endpoint JSON; errors use the stable
//! `{error_code, message, request_id}` envelope. Load beyond the configured
//! concurrency bound is shed with 503.

pub mod routes;

use std::sync::Arc;

use axum::error_handling::HandleErrorLayer;
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use tower::{BoxError, ServiceBuilder};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{ErrorEnvelope, OrchestratorError};
use crate::graph::{FulltextIndexManager, GraphGateway};
use crate::llm::LlmClient;
use crate::platform::SessionStore;
use crate::registry::DatabaseRegistry;
use crate::supervisor::RequestSupervisor;

/// Correlation id minted (or propagated) per request.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub Uuid);

/// Shared application state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub supervisor: Arc<RequestSupervisor>,
    pub sessions: Arc<SessionStore>,
    pub fulltext: Arc<FulltextIndexManager>,
    pub llm_provider: String,
    pub llm_model: String,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<DatabaseRegistry>,
        gateway: Arc<dyn GraphGateway>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        let llm_provider = llm.provider_name().to_string();
        let llm_model = llm.model_name().to_string();
        let supervisor = Arc::new(RequestSupervisor::new(
            Arc::clone(&config),
            registry,
            Arc::clone(&gateway),
            llm,
        ));
        Self {
            sessions: Arc::new(SessionStore::new(config.session_max_turns)),
            fulltext: Arc::new(FulltextIndexManager::new(gateway)),
            config,
            supervisor,
            llm_provider,
            llm_model,
        }
    }
}

/// Handler error carrying the request correlation id.
pub struct ApiError {
    error: OrchestratorError,
    request_id: Uuid,
}

impl ApiError {
    pub fn new(error: OrchestratorError, request_id: Uuid) -> Self {
        Self { error, request_id }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.error.status_code();
        if status.is_server_error() {
            tracing::error!(request_id = %self.request_id, error = %self.error, "request failed");
        } else {
            tracing::warn!(request_id = %self.request_id, error = %self.error, "request rejected");
        }
        let envelope = ErrorEnvelope::from_error(&self.error, &self.request_id.to_string());
        (status, Json(envelope)).into_response()
    }
}

/// Build the runtime router with request correlation and backpressure.
pub fn create_runtime_router(state: AppState) -> Router {
    let qmax = state.config.max_concurrent_requests;
    Router::new()
        .route("/run_agent", post(routes::run_agent))
        .route("/run_agent_semantic", post(routes::run_agent_semantic))
        .route("/run_debate", post(routes::run_debate))
        .route("/platform/chat/send", post(routes::platform_chat_send))
        .route(
            "/platform/chat/session/:session_id",
            get(routes::platform_session_history),
        )
        .route(
            "/platform/chat/session/:session_id/reset",
            post(routes::platform_session_reset),
        )
        .route("/indexes/fulltext/ensure", post(routes::ensure_fulltext_index))
        .route("/databases", get(routes::list_databases))
        .route("/agents", get(routes::list_agents))
        .route("/health/runtime", get(routes::health_runtime))
        .route("/health/batch", get(routes::health_batch))
        .with_state(state)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_overload))
                .load_shed()
                .concurrency_limit(qmax),
        )
}

/// Read or mint `X-Request-ID`, expose it to handlers, echo it back, and log
/// the request boundary.
async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .unwrap_or_else(Uuid::new_v4);
    request.extensions_mut().insert(RequestId(request_id));

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    tracing::info!(%request_id, %method, %path, "request_start");

    let started = std::time::Instant::now();
    let mut response = next.run(request).await;
    tracing::info!(
        %request_id,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request_end"
    );

    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

async fn handle_overload(err: BoxError) -> Response {
    if err.is::<tower::load_shed::error::Overloaded>() {
        let envelope = ErrorEnvelope {
            error_code: "Overloaded".to_string(),
            message: "too many concurrent requests".to_string(),
            request_id: String::new(),
            readiness: None,
            trace_steps: None,
        };
        (axum::http::StatusCode::SERVICE_UNAVAILABLE, Json(envelope)).into_response()
    } else {
        let envelope = ErrorEnvelope {
            error_code: "Internal".to_string(),
            message: "internal error".to_string(),
            request_id: String::new(),
            readiness: None,
            trace_steps: None,
        };
        (axum::http::StatusCode::INTERNAL_SERVER_ERROR, Json(envelope)).into_response()
    }
}

/// Convenience extractor-style helper for handlers.
pub(crate) fn request_id_of(ext: &Option<Extension<RequestId>>) -> Uuid {
    ext.as_ref().map(|e| e.0 .0).unwrap_or_else(Uuid::new_v4)
}
