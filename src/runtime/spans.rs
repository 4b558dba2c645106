//! Span records for the observability sink.
//!
//! Nested spans with `{name, start, end, metadata, parent}`. Debate workers
//! nest under the orchestration span; semantic steps form a linear chain.
//! The collector is request-scoped and cheap to clone.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanRecord {
    pub id: String,
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

/// An open span; finish it through the collector.
#[derive(Debug)]
pub struct SpanHandle {
    pub id: String,
    name: String,
    start: DateTime<Utc>,
    parent: Option<String>,
}

#[derive(Clone, Default)]
pub struct SpanCollector {
    inner: Arc<Mutex<Vec<SpanRecord>>>,
}

impl SpanCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, name: &str, parent: Option<&str>) -> SpanHandle {
        SpanHandle {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            start: Utc::now(),
            parent: parent.map(String::from),
        }
    }

    pub fn finish(&self, handle: SpanHandle, metadata: Value) {
        let record = SpanRecord {
            id: handle.id,
            name: handle.name,
            start: handle.start,
            end: Utc::now(),
            metadata,
            parent: handle.parent,
        };
        self.inner.lock().expect("span lock poisoned").push(record);
    }

    pub fn snapshot(&self) -> Vec<SpanRecord> {
        self.inner.lock().expect("span lock poisoned").clone()
    }

    /// Merge spans recorded by a run-local collector.
    pub fn extend(&self, records: Vec<SpanRecord>) {
        self.inner
            .lock()
            .expect("span lock poisoned")
            .extend(records);
    }
}
