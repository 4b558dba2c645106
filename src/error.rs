//! Error taxonomy for the orchestration core.
//!
//! One `thiserror` enum carries every failure kind the request path can
//! surface. Structural errors (invalid identifiers, policy denials) abort the
//! request immediately; worker-level failures (tool errors, per-agent
//! timeouts, unreachable databases) are recovered locally and show up as
//! partial fragments instead. The HTTP layer maps each kind to a status code
//! and the stable `{error_code, message, request_id}` envelope.

use axum::http::StatusCode;
use serde::Serialize;

use crate::readiness::ReadinessSummary;
use crate::trace::{TraceError, TraceStep};

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Database name or Cypher label failed regex validation.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Database name is well-formed but unknown to the registry.
    #[error("database not registered: {0}")]
    NotRegistered(String),

    /// Graph backend down for a database.
    #[error("graph backend unreachable: {0}")]
    Unreachable(String),

    /// Tool execution failure inside an agent run.
    #[error("tool error: {0}")]
    Tool(String),

    /// Request-level deadline hit; carries the trace captured so far.
    #[error("{scope} timed out")]
    Timeout {
        scope: String,
        trace_steps: Vec<TraceStep>,
    },

    /// Debate has no ready agents and fallback is disabled or impossible.
    #[error("debate blocked: no ready agents")]
    Blocked { summary: ReadinessSummary },

    /// Action or workspace not permitted.
    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidIdentifier(_) => "InvalidIdentifier",
            Self::NotRegistered(_) => "NotRegistered",
            Self::Unreachable(_) => "Unreachable",
            Self::Tool(_) => "ToolError",
            Self::Timeout { .. } => "Timeout",
            Self::Blocked { .. } => "Blocked",
            Self::PolicyDenied(_) => "PolicyDenied",
            Self::Internal(_) => "Internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidIdentifier(_) => StatusCode::BAD_REQUEST,
            Self::NotRegistered(_) => StatusCode::NOT_FOUND,
            Self::Unreachable(_) => StatusCode::BAD_GATEWAY,
            Self::Tool(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Blocked { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::PolicyDenied(_) => StatusCode::FORBIDDEN,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<TraceError> for OrchestratorError {
    fn from(err: TraceError) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Stable wire envelope for error responses.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error_code: String,
    pub message: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readiness: Option<ReadinessSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_steps: Option<Vec<TraceStep>>,
}

impl ErrorEnvelope {
    pub fn from_error(err: &OrchestratorError, request_id: &str) -> Self {
        let readiness = match err {
            OrchestratorError::Blocked { summary } => Some(summary.clone()),
            _ => None,
        };
        let trace_steps = match err {
            OrchestratorError::Timeout { trace_steps, .. } if !trace_steps.is_empty() => {
                Some(trace_steps.clone())
            }
            _ => None,
        };
        Self {
            error_code: err.error_code().to_string(),
            // Internal details never leak past the boundary.
            message: match err {
                OrchestratorError::Internal(_) => "internal error".to_string(),
                other => other.to_string(),
            },
            request_id: request_id.to_string(),
            readiness,
            trace_steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(
            OrchestratorError::InvalidIdentifier("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            OrchestratorError::NotRegistered("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            OrchestratorError::PolicyDenied("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            OrchestratorError::Blocked {
                summary: ReadinessSummary::default()
            }
            .status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn internal_message_is_masked() {
        let err = OrchestratorError::Internal("secret detail".into());
        let envelope = ErrorEnvelope::from_error(&err, "req-1");
        assert_eq!(envelope.message, "internal error");
        assert_eq!(envelope.error_code, "Internal");
    }

    #[test]
    fn blocked_carries_readiness() {
        let mut summary = ReadinessSummary::default();
        summary.record("kgnormal", crate::readiness::AgentReadiness::Unreachable);
        let err = OrchestratorError::Blocked { summary };
        let envelope = ErrorEnvelope::from_error(&err, "req-2");
        assert!(envelope.readiness.is_some());
    }
}
