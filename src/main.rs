use axum::{
    routing::{get, post},
    Extension, Router,
};
use backend_agent::agent::handlers::{handle_agent_stats, handle_heartbeat, handle_submit_task};
use backend_agent::agent::master::{HttpMasterClient, MasterState};
use backend_agent::agent::protocol::{
    ENDPOINT_AGENT_STATS, ENDPOINT_HEARTBEAT, ENDPOINT_SUBMIT_TASK,
};
use backend_agent::agent::service::{AgentCollaborators, AgentService};
use backend_agent::agent::types::BackendIdentity;
use backend_agent::config::AgentConfig;
use backend_agent::engine::memory::MemoryEngine;
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        eprintln!(
            "Usage: {} --bind <addr:port> [--master <addr:port>] [--data-root <path>]...",
            args[0]
        );
        eprintln!("Example: {} --bind 127.0.0.1:9060", args[0]);
        eprintln!(
            "Example: {} --bind 127.0.0.1:9060 --master 127.0.0.1:9020 --data-root /data/be",
            args[0]
        );
        std::process::exit(1);
    }

    let mut bind_addr: Option<SocketAddr> = None;
    let mut master_addr: Option<String> = None;
    let mut data_roots: Vec<String> = vec![];

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" => {
                bind_addr = Some(args[i + 1].parse()?);
                i += 2;
            }
            "--master" => {
                master_addr = Some(args[i + 1].clone());
                i += 2;
            }
            "--data-root" => {
                data_roots.push(args[i + 1].clone());
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    let bind_addr = bind_addr.expect("--bind is required");
    let http_port = bind_addr.port() + 1000;

    tracing::info!("Starting backend agent on {}", bind_addr);

    let config = AgentConfig::from_env();
    let backend = BackendIdentity {
        host: bind_addr.ip().to_string(),
        be_port: bind_addr.port(),
        http_port,
    };

    // Coordinator address: taken from the flag when given, otherwise filled
    // in by the first heartbeat.
    let master_state = Arc::new(MasterState::new());
    match master_addr {
        Some(addr) => master_state.set_addr(addr),
        None => tracing::info!("no --master given, waiting for coordinator heartbeat"),
    }
    let master = Arc::new(HttpMasterClient::new(master_state.clone()));

    let engine = Arc::new(MemoryEngine::new(data_roots));
    let collaborators = AgentCollaborators {
        engine: engine.clone(),
        tablets: engine.clone(),
        snapshots: engine.clone(),
        loader: engine.clone(),
    };

    let agent = AgentService::new(config, backend, master, master_state, collaborators);
    agent.start();

    let app = Router::new()
        .route(ENDPOINT_SUBMIT_TASK, post(handle_submit_task))
        .route(ENDPOINT_HEARTBEAT, post(handle_heartbeat))
        .route(ENDPOINT_AGENT_STATS, get(handle_agent_stats))
        .layer(Extension(agent.clone()));

    let http_addr = SocketAddr::new(bind_addr.ip(), http_port);
    tracing::info!("HTTP server listening on {}", http_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
