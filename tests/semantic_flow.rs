//! Semantic flow integration: resolver, router, specialists, and trace shape.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use graph_council::config::Config;
use graph_council::error::OrchestratorError;
use graph_council::registry::DatabaseRegistry;
use graph_council::semantic::resolver::EntityOverride;
use graph_council::supervisor::{RequestSupervisor, RunMode, RunRequest};
use graph_council::trace::{validate_topology, StepType};

use helpers::{FakeGraphGateway, FakeLlm, Hit};

fn supplier_gateway() -> FakeGraphGateway {
    FakeGraphGateway::new()
        .with_fulltext(
            "kgnormal",
            vec![
                Hit {
                    node_id: "4:abc:1",
                    name: "ACME",
                    score: 2.5,
                    label: "Company",
                },
                Hit {
                    node_id: "4:abc:2",
                    name: "ACME Holdings",
                    score: 2.0,
                    label: "Company",
                },
            ],
        )
        .with_neighbors(
            "kgnormal",
            vec![json!({
                "entity": "ACME",
                "labels": ["Company"],
                "neighbors": [
                    {"type": "SUPPLIES", "target": "Initech", "target_labels": ["Company"]}
                ]
            })],
        )
}

fn supervisor(gateway: FakeGraphGateway, llm: FakeLlm) -> RequestSupervisor {
    RequestSupervisor::new(
        Arc::new(Config::default()),
        Arc::new(DatabaseRegistry::new()),
        Arc::new(gateway),
        Arc::new(llm),
    )
}

fn acme_override() -> EntityOverride {
    EntityOverride {
        question_entity: "ACME".to_string(),
        database: "kgnormal".to_string(),
        node_id: "4:abc:1".to_string(),
        display_name: Some("ACME".to_string()),
        labels: vec!["Company".to_string()],
    }
}

#[tokio::test]
async fn semantic_happy_path_with_override() {
    let supervisor = supervisor(supplier_gateway(), FakeLlm::new());
    let request = RunRequest::new("Who supplies ACME?", "default", RunMode::Semantic)
        .with_databases(vec!["kgnormal".to_string()])
        .with_overrides(vec![acme_override()]);

    let result = supervisor.run(request).await.unwrap();

    // Route and resolution.
    assert_eq!(result.route.unwrap().as_str(), "lpg");
    let context = result.semantic_context.as_ref().unwrap();
    let top = &context.matches["ACME"][0];
    assert!(top.is_confident);
    assert_eq!(top.node_id, "4:abc:1");

    // The answer is grounded in kgnormal facts.
    assert!(result.answer.contains("Initech"));

    // Linear chain RESOLVE -> ROUTE -> SPECIALIST -> ANSWER.
    let steps = &result.trace_steps;
    validate_topology(steps).unwrap();
    let types: Vec<StepType> = steps.iter().map(|s| s.step_type).collect();
    assert_eq!(
        types,
        vec![
            StepType::Resolve,
            StepType::Route,
            StepType::Specialist,
            StepType::Answer
        ]
    );
    for pair in steps.windows(2) {
        assert_eq!(pair[1].parent_id.as_deref(), Some(pair[0].node_id.as_str()));
    }
}

#[tokio::test]
async fn override_outside_request_databases_is_rejected_before_io() {
    let gateway = supplier_gateway();
    let calls_probe = Arc::new(gateway);
    let supervisor = RequestSupervisor::new(
        Arc::new(Config::default()),
        Arc::new(DatabaseRegistry::new()),
        Arc::clone(&calls_probe) as Arc<dyn graph_council::graph::GraphGateway>,
        Arc::new(FakeLlm::new()),
    );

    let mut override_entry = acme_override();
    override_entry.database = "kgfibo".to_string();
    let request = RunRequest::new("Who supplies ACME?", "default", RunMode::Semantic)
        .with_databases(vec!["kgnormal".to_string()])
        .with_overrides(vec![override_entry]);

    let err = supervisor.run(request).await;
    assert!(matches!(err, Err(OrchestratorError::InvalidIdentifier(_))));
    assert_eq!(calls_probe.calls(), 0);
}

#[tokio::test]
async fn unknown_database_is_not_registered() {
    let supervisor = supervisor(supplier_gateway(), FakeLlm::new());
    let request = RunRequest::new("anything", "default", RunMode::Semantic)
        .with_databases(vec!["kgunknown".to_string()]);
    let err = supervisor.run(request).await;
    assert!(matches!(err, Err(OrchestratorError::NotRegistered(_))));
}

#[tokio::test]
async fn malformed_database_name_is_invalid() {
    let supervisor = supervisor(supplier_gateway(), FakeLlm::new());
    let request = RunRequest::new("anything", "default", RunMode::Semantic)
        .with_databases(vec!["bad name".to_string()]);
    let err = supervisor.run(request).await;
    assert!(matches!(err, Err(OrchestratorError::InvalidIdentifier(_))));
}

#[tokio::test]
async fn request_deadline_returns_partial_trace() {
    let config = Config {
        request_timeout: Duration::from_millis(200),
        ..Config::default()
    };
    // Answer generation hangs; everything before it completes.
    let llm = FakeLlm::slow_on("You compose the final answer");
    let supervisor = RequestSupervisor::new(
        Arc::new(config),
        Arc::new(DatabaseRegistry::new()),
        Arc::new(supplier_gateway()),
        Arc::new(llm),
    );
    let request = RunRequest::new("Who supplies ACME?", "default", RunMode::Semantic)
        .with_databases(vec!["kgnormal".to_string()]);

    match supervisor.run(request).await {
        Err(OrchestratorError::Timeout { trace_steps, .. }) => {
            assert!(!trace_steps.is_empty());
            assert_eq!(trace_steps[0].step_type, StepType::Resolve);
            assert!(trace_steps[0].parent_id.is_none());
            assert!(trace_steps
                .iter()
                .all(|s| s.step_type != StepType::Answer));
        }
        other => panic!("expected timeout with partial trace, got {other:?}"),
    }
}

#[tokio::test]
async fn invalid_workspace_is_policy_denied() {
    let supervisor = supervisor(supplier_gateway(), FakeLlm::new());
    let request = RunRequest::new("anything", "bad workspace!", RunMode::Semantic)
        .with_databases(vec!["kgnormal".to_string()]);
    let err = supervisor.run(request).await;
    assert!(matches!(err, Err(OrchestratorError::PolicyDenied(_))));
}
