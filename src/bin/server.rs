//! Council server binary.
//!
//! Wires the graph gateway, model client, and registry into the runtime
//! router and serves the orchestration endpoints.

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use graph_council::api::{create_runtime_router, AppState};
use graph_council::config::Config;
use graph_council::graph::http::HttpGraphGateway;
use graph_council::llm::create_llm_client;
use graph_council::registry::DatabaseRegistry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "graph_council=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env());
    tracing::info!(workspace_id = %config.workspace_id, "starting council server");

    let gateway = Arc::new(HttpGraphGateway::new(&config.graph, config.graph_timeout));
    let llm = match create_llm_client(&config) {
        Ok(client) => client,
        Err(err) => {
            tracing::error!(%err, "model client initialization failed");
            return Err(err.into());
        }
    };
    let registry = Arc::new(DatabaseRegistry::new());

    let state = AppState::new(Arc::clone(&config), registry, gateway, llm);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_runtime_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("council server listening on http://{addr}");
    tracing::info!("  POST /run_agent             - single-route execution");
    tracing::info!("  POST /run_agent_semantic    - semantic flow");
    tracing::info!("  POST /run_debate            - parallel debate");
    tracing::info!("  POST /platform/chat/send    - platform chat");
    tracing::info!("  GET  /databases, /agents    - listings");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(%addr, %err, "failed to bind");
            return Err(err.into());
        }
    };
    axum::serve(listener, app).await?;
    Ok(())
}
