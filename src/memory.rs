//! Request-scoped shared memory.
//!
//! One instance per request, shared by every agent participating in it.
//! Prevents duplicate Cypher executions through a bounded query cache and
//! collects per-agent answer fragments for supervisor synthesis. Never shared
//! between requests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use moka::sync::Cache;
use sha2::{Digest, Sha256};

/// Default query cache capacity (entries, not bytes).
pub const DEFAULT_CACHE_CAPACITY: u64 = 100;

/// Agent-shared memory with request-scoped lifecycle.
pub struct SharedMemory {
    results: Mutex<BTreeMap<String, String>>,
    query_cache: Cache<String, String>,
}

impl SharedMemory {
    pub fn new(cache_capacity: u64) -> Self {
        Self {
            results: Mutex::new(BTreeMap::new()),
            query_cache: Cache::new(cache_capacity.max(1)),
        }
    }

    /// Record an agent's answer fragment for its database.
    pub fn put_result(&self, database: &str, answer: &str) {
        self.results
            .lock()
            .expect("shared memory lock poisoned")
            .insert(database.to_string(), answer.to_string());
        tracing::debug!(database, "shared memory result stored");
    }

    /// All answer fragments recorded so far, keyed by database.
    pub fn all_results(&self) -> BTreeMap<String, String> {
        self.results
            .lock()
            .expect("shared memory lock poisoned")
            .clone()
    }

    /// Look up a previously cached query result.
    pub fn get_cached(&self, database: &str, query: &str) -> Option<String> {
        self.query_cache.get(&fingerprint(database, query))
    }

    /// Cache a Cypher query result to avoid re-execution within the request.
    pub fn put_cached(&self, database: &str, query: &str, result: &str) {
        let key = fingerprint(database, query);
        tracing::debug!(database, key = %&key[..16], "shared memory cache store");
        self.query_cache.insert(key, result.to_string());
    }

    pub fn result_count(&self) -> usize {
        self.results
            .lock()
            .expect("shared memory lock poisoned")
            .len()
    }
}

/// Cache key: hash of the database name and the normalized query.
fn fingerprint(database: &str, query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(database.as_bytes());
    hasher.update(b"\x00");
    hasher.update(normalize(query).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Strip line comments and trailing whitespace so trivially reformatted
/// queries share a cache entry. Nothing else is touched: Cypher is
/// case-sensitive, so case differences are distinct queries.
fn normalize(query: &str) -> String {
    query
        .lines()
        .map(|line| {
            let without_comment = match line.find("//") {
                Some(idx) => &line[..idx],
                None => line,
            };
            without_comment.trim_end()
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let memory = SharedMemory::new(DEFAULT_CACHE_CAPACITY);
        memory.put_cached("kgnormal", "MATCH (n) RETURN n LIMIT 5", "[{\"n\": 1}]");
        assert_eq!(
            memory.get_cached("kgnormal", "MATCH (n) RETURN n LIMIT 5"),
            Some("[{\"n\": 1}]".to_string())
        );
    }

    #[test]
    fn cache_keys_are_scoped_per_database() {
        let memory = SharedMemory::new(DEFAULT_CACHE_CAPACITY);
        memory.put_cached("kgnormal", "MATCH (n) RETURN n", "a");
        assert_eq!(memory.get_cached("kgfibo", "MATCH (n) RETURN n"), None);
    }

    #[test]
    fn normalization_ignores_comments_and_trailing_whitespace() {
        let memory = SharedMemory::new(DEFAULT_CACHE_CAPACITY);
        memory.put_cached("kgnormal", "MATCH (n) RETURN n  \n// count them", "rows");
        assert_eq!(
            memory.get_cached("kgnormal", "MATCH (n) RETURN n"),
            Some("rows".to_string())
        );
    }

    #[test]
    fn normalization_preserves_case() {
        let memory = SharedMemory::new(DEFAULT_CACHE_CAPACITY);
        memory.put_cached("kgnormal", "MATCH (n {name: \"ACME\"}) RETURN n", "rows");
        assert_eq!(
            memory.get_cached("kgnormal", "MATCH (n {name: \"acme\"}) RETURN n"),
            None
        );
    }

    #[test]
    fn results_accumulate_per_database() {
        let memory = SharedMemory::new(DEFAULT_CACHE_CAPACITY);
        memory.put_result("kgnormal", "answer a");
        memory.put_result("kgfibo", "answer b");
        memory.put_result("kgnormal", "answer a2");

        let all = memory.all_results();
        assert_eq!(all.len(), 2);
        assert_eq!(all["kgnormal"], "answer a2");
        assert_eq!(all["kgfibo"], "answer b");
    }
}
