//! Per-database readiness and the debate state derived from it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Readiness of a single database-bound agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentReadiness {
    /// Agent exists and its schema probe is fresh.
    Ready,
    /// Agent exists but the last probe failed or went stale.
    Degraded,
    /// Graph backend down for this database; no agent.
    Unreachable,
}

/// Aggregate state of a debate attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateState {
    Ready,
    Degraded,
    Blocked,
}

/// Snapshot of the pool partitioned by readiness.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadinessSummary {
    pub ready: BTreeSet<String>,
    pub degraded: BTreeSet<String>,
    pub blocked: BTreeSet<String>,
}

impl ReadinessSummary {
    pub fn record(&mut self, database: &str, readiness: AgentReadiness) {
        let set = match readiness {
            AgentReadiness::Ready => &mut self.ready,
            AgentReadiness::Degraded => &mut self.degraded,
            AgentReadiness::Unreachable => &mut self.blocked,
        };
        set.insert(database.to_string());
    }

    /// Databases a debate will attempt: ready then degraded, each sorted.
    pub fn attempted(&self) -> Vec<String> {
        self.ready.iter().chain(self.degraded.iter()).cloned().collect()
    }

    /// Debate state per the readiness rule: blocked when nothing is ready,
    /// degraded when anything is not.
    pub fn debate_state(&self) -> DebateState {
        if self.ready.is_empty() {
            DebateState::Blocked
        } else if self.degraded.is_empty() && self.blocked.is_empty() {
            DebateState::Ready
        } else {
            DebateState::Degraded
        }
    }

    pub fn total(&self) -> usize {
        self.ready.len() + self.degraded.len() + self.blocked.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(ready: &[&str], degraded: &[&str], blocked: &[&str]) -> ReadinessSummary {
        let mut s = ReadinessSummary::default();
        for db in ready {
            s.record(db, AgentReadiness::Ready);
        }
        for db in degraded {
            s.record(db, AgentReadiness::Degraded);
        }
        for db in blocked {
            s.record(db, AgentReadiness::Unreachable);
        }
        s
    }

    #[test]
    fn all_ready_is_ready() {
        assert_eq!(
            summary(&["a", "b"], &[], &[]).debate_state(),
            DebateState::Ready
        );
    }

    #[test]
    fn any_unreachable_with_ready_is_degraded() {
        assert_eq!(
            summary(&["a"], &[], &["b"]).debate_state(),
            DebateState::Degraded
        );
    }

    #[test]
    fn no_ready_is_blocked() {
        assert_eq!(
            summary(&[], &["a"], &["b"]).debate_state(),
            DebateState::Blocked
        );
        assert_eq!(summary(&[], &[], &[]).debate_state(), DebateState::Blocked);
    }

    #[test]
    fn attempted_covers_ready_and_degraded() {
        let s = summary(&["b"], &["a"], &["c"]);
        assert_eq!(s.attempted(), vec!["b".to_string(), "a".to_string()]);
    }
}
