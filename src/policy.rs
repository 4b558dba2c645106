//! Runtime policy for the request surface.
//!
//! Single-tenant deployment, but every runtime call must carry a workspace
//! id. Authorization in the hot path is app-level role/action checks; no
//! ontology reasoning is ever consulted here.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{OrchestratorError, OrchestratorResult};

static WORKSPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_-]{1,63}$").expect("workspace regex"));

/// Actions recognized on the runtime surface.
pub const ACTION_RUN_AGENT: &str = "run_agent";
pub const ACTION_RUN_DEBATE: &str = "run_debate";
pub const ACTION_RUN_SEMANTIC: &str = "run_semantic";
pub const ACTION_RUN_PLATFORM: &str = "run_platform";
pub const ACTION_READ_DATABASES: &str = "read_databases";
pub const ACTION_READ_AGENTS: &str = "read_agents";
pub const ACTION_MANAGE_INDEXES: &str = "manage_indexes";

/// Role/action policy engine.
pub struct RuntimePolicyEngine {
    role_permissions: HashMap<&'static str, HashSet<&'static str>>,
}

impl Default for RuntimePolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimePolicyEngine {
    pub fn new() -> Self {
        let operator: HashSet<&'static str> = [
            ACTION_RUN_AGENT,
            ACTION_RUN_DEBATE,
            ACTION_RUN_SEMANTIC,
            ACTION_RUN_PLATFORM,
            ACTION_READ_DATABASES,
            ACTION_READ_AGENTS,
            ACTION_MANAGE_INDEXES,
        ]
        .into_iter()
        .collect();
        let viewer: HashSet<&'static str> = [ACTION_READ_DATABASES, ACTION_READ_AGENTS]
            .into_iter()
            .collect();

        let mut role_permissions = HashMap::new();
        role_permissions.insert("admin", operator.clone());
        role_permissions.insert("user", operator);
        role_permissions.insert("viewer", viewer);
        Self { role_permissions }
    }

    pub fn validate_workspace_id(&self, workspace_id: &str) -> OrchestratorResult<()> {
        if workspace_id.is_empty() {
            return Err(OrchestratorError::PolicyDenied(
                "workspace_id is required".to_string(),
            ));
        }
        if !WORKSPACE_RE.is_match(workspace_id) {
            return Err(OrchestratorError::PolicyDenied(format!(
                "invalid workspace_id '{workspace_id}'"
            )));
        }
        Ok(())
    }

    pub fn authorize(
        &self,
        role: &str,
        action: &str,
        workspace_id: &str,
    ) -> OrchestratorResult<()> {
        self.validate_workspace_id(workspace_id)?;
        let allowed = self
            .role_permissions
            .get(role)
            .map(|actions| actions.contains(action))
            .unwrap_or(false);
        if !allowed {
            return Err(OrchestratorError::PolicyDenied(format!(
                "role '{role}' not allowed for action '{action}'"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_validation() {
        let policy = RuntimePolicyEngine::new();
        policy.validate_workspace_id("default").unwrap();
        policy.validate_workspace_id("ws_prod-1").unwrap();
        assert!(policy.validate_workspace_id("").is_err());
        assert!(policy.validate_workspace_id("1leading-digit").is_err());
        assert!(policy.validate_workspace_id("has space").is_err());
    }

    #[test]
    fn viewer_cannot_run_debate() {
        let policy = RuntimePolicyEngine::new();
        policy
            .authorize("viewer", ACTION_READ_DATABASES, "default")
            .unwrap();
        assert!(matches!(
            policy.authorize("viewer", ACTION_RUN_DEBATE, "default"),
            Err(OrchestratorError::PolicyDenied(_))
        ));
    }

    #[test]
    fn unknown_role_is_denied() {
        let policy = RuntimePolicyEngine::new();
        assert!(policy.authorize("ghost", ACTION_RUN_AGENT, "default").is_err());
    }
}
