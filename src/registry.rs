//! Database name registry.
//!
//! Central allowlist of valid graph database names. Registration is
//! idempotent and append-only under a lock; every downstream component
//! consults the registry before accepting a database name from input.

use std::collections::BTreeSet;
use std::sync::RwLock;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{OrchestratorError, OrchestratorResult};

/// Database names: alphanumeric, must start with a letter. Case-sensitive.
static DB_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9]*$").expect("db name regex"));

/// Cypher labels and relationship types: letters, digits, underscore; must
/// not start with a digit.
static LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("label regex"));

/// Databases hidden from user-facing listings: driver defaults plus the
/// trace store.
const SYSTEM_DATABASES: &[&str] = &["neo4j", "system", "agenttraces"];

/// Seed set present in every deployment.
const SEED_DATABASES: &[&str] = &["neo4j", "system", "kgnormal", "kgfibo", "agenttraces"];

pub fn is_valid_db_name(name: &str) -> bool {
    DB_NAME_RE.is_match(name)
}

pub fn is_valid_label(value: &str) -> bool {
    LABEL_RE.is_match(value)
}

/// Validate a batch of Cypher identifiers (labels, property names, index
/// names) before any of them is interpolated into a statement.
pub fn validate_labels(values: &[String], field: &str) -> OrchestratorResult<Vec<String>> {
    let mut cleaned = Vec::new();
    for value in values {
        let ident = value.trim();
        if ident.is_empty() {
            continue;
        }
        if !is_valid_label(ident) {
            return Err(OrchestratorError::InvalidIdentifier(format!(
                "'{ident}' in '{field}'"
            )));
        }
        cleaned.push(ident.to_string());
    }
    if cleaned.is_empty() {
        return Err(OrchestratorError::InvalidIdentifier(format!(
            "'{field}' must contain at least one identifier"
        )));
    }
    Ok(cleaned)
}

/// Runtime-extensible registry of database names.
pub struct DatabaseRegistry {
    databases: RwLock<BTreeSet<String>>,
}

impl Default for DatabaseRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseRegistry {
    pub fn new() -> Self {
        Self {
            databases: RwLock::new(SEED_DATABASES.iter().map(|s| s.to_string()).collect()),
        }
    }

    /// Start from an explicit set instead of the seeds. Invalid names are
    /// rejected, not skipped.
    pub fn with_databases(names: &[&str]) -> OrchestratorResult<Self> {
        let registry = Self {
            databases: RwLock::new(BTreeSet::new()),
        };
        for name in names {
            registry.register(name)?;
        }
        Ok(registry)
    }

    /// Register a database name after validation. Idempotent.
    pub fn register(&self, name: &str) -> OrchestratorResult<()> {
        if !is_valid_db_name(name) {
            return Err(OrchestratorError::InvalidIdentifier(format!(
                "database name '{name}'"
            )));
        }
        self.databases
            .write()
            .expect("registry lock poisoned")
            .insert(name.to_string());
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.databases
            .read()
            .expect("registry lock poisoned")
            .contains(name)
    }

    /// User-facing database names, excluding system databases and the trace
    /// store.
    pub fn list_user_databases(&self) -> Vec<String> {
        self.databases
            .read()
            .expect("registry lock poisoned")
            .iter()
            .filter(|name| !SYSTEM_DATABASES.contains(&name.as_str()))
            .cloned()
            .collect()
    }

    /// Check a request-supplied database name: shape first, then membership.
    pub fn check(&self, name: &str) -> OrchestratorResult<()> {
        if !is_valid_db_name(name) {
            return Err(OrchestratorError::InvalidIdentifier(format!(
                "database name '{name}'"
            )));
        }
        if !self.is_registered(name) {
            return Err(OrchestratorError::NotRegistered(name.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_databases_are_registered() {
        let registry = DatabaseRegistry::new();
        assert!(registry.is_registered("kgnormal"));
        assert!(registry.is_registered("agenttraces"));
    }

    #[test]
    fn user_listing_excludes_system_and_trace_store() {
        let registry = DatabaseRegistry::new();
        let dbs = registry.list_user_databases();
        assert!(dbs.contains(&"kgnormal".to_string()));
        assert!(dbs.contains(&"kgfibo".to_string()));
        assert!(!dbs.contains(&"neo4j".to_string()));
        assert!(!dbs.contains(&"system".to_string()));
        assert!(!dbs.contains(&"agenttraces".to_string()));
    }

    #[test]
    fn registration_validates_and_is_idempotent() {
        let registry = DatabaseRegistry::new();
        registry.register("kgruntime").unwrap();
        registry.register("kgruntime").unwrap();
        assert!(registry.is_registered("kgruntime"));

        assert!(matches!(
            registry.register("9bad"),
            Err(OrchestratorError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            registry.register("bad name"),
            Err(OrchestratorError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            registry.register("bad_name"),
            Err(OrchestratorError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn names_are_case_sensitive() {
        let registry = DatabaseRegistry::new();
        assert!(registry.is_registered("kgnormal"));
        assert!(!registry.is_registered("KGnormal"));
    }

    #[test]
    fn check_distinguishes_shape_from_membership() {
        let registry = DatabaseRegistry::new();
        assert!(matches!(
            registry.check("bad name"),
            Err(OrchestratorError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            registry.check("kgunknown"),
            Err(OrchestratorError::NotRegistered(_))
        ));
        registry.check("kgnormal").unwrap();
    }

    #[test]
    fn label_validation() {
        assert!(is_valid_label("Company"));
        assert!(is_valid_label("_internal"));
        assert!(is_valid_label("Entity_2"));
        assert!(!is_valid_label("Bad Label"));
        assert!(!is_valid_label("2fast"));
        assert!(!is_valid_label(""));

        let err = validate_labels(&["Bad Label".to_string()], "labels");
        assert!(matches!(err, Err(OrchestratorError::InvalidIdentifier(_))));

        let ok = validate_labels(
            &[" Company ".to_string(), "Person".to_string()],
            "labels",
        )
        .unwrap();
        assert_eq!(ok, vec!["Company".to_string(), "Person".to_string()]);
    }
}
