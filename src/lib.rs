//! graph-council: multi-agent orchestration over knowledge graphs.
//!
//! Turns a natural-language question over one or more labeled-property graph
//! databases into a single synthesized answer. The crate provisions one
//! tool-using agent per database, dispatches a request across them under three
//! strategies (single-route, parallel debate, semantic-resolution flow),
//! enforces readiness and degradation semantics, shares request-scoped
//! intermediate state, and emits a strict trace topology for the DAG UI.
//!
//! External collaborators are reached only through traits:
//! - [`graph::GraphGateway`] for read-only Cypher and fulltext search
//! - [`llm::LlmClient`] for the tool-calling model backend
//!
//! Entry point for a request is [`supervisor::RequestSupervisor`].

pub mod agents;
pub mod api;
pub mod config;
pub mod debate;
pub mod error;
pub mod graph;
pub mod llm;
pub mod memory;
pub mod platform;
pub mod policy;
pub mod readiness;
pub mod registry;
pub mod runtime;
pub mod semantic;
pub mod supervisor;
pub mod trace;

pub use config::Config;
pub use error::{OrchestratorError, OrchestratorResult};
pub use supervisor::{RequestSupervisor, RunMode, RunRequest, RunResult};
