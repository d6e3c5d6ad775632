//! Compass application binary - composition root.
//!
//! Ties together all Compass crates into a single executable:
//! 1. Load configuration from TOML
//! 2. Initialize storage (SQLite)
//! 3. Build the handler registry, worker, workflow engine, and gate
//! 4. Start the background worker poll loop
//! 5. Start the axum REST API server

mod cli;
mod tool_call;

use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;

use compass_api::auth::load_or_generate_token;
use compass_api::{create_router, AppState};
use compass_core::config::CompassConfig;
use compass_exec::{HandlerRegistry, Worker, WorkerPoller, WorkflowEngine};
use compass_gate::{Gate, InMemoryReplayGuard, NullExecutor, ToolRegistry};
use compass_storage::{ArtifactRepository, Database};

use cli::{expand_home, CliArgs};
use tool_call::ToolCallHandler;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Configuration: CLI args > env vars > config file > defaults.
    let config_path = args.resolve_config_path();
    let mut config = CompassConfig::load_or_default(&config_path);
    if let Some(data_dir) = args.resolve_data_dir() {
        config.general.data_dir = data_dir;
    }
    if let Some(log_level) = args.resolve_log_level() {
        config.general.log_level = log_level;
    }
    config.general.port = args.resolve_port(config.general.port);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    let data_dir = expand_home(&config.general.data_dir);
    tracing::info!(data_dir = %data_dir.display(), port = config.general.port, "Compass starting");

    // Storage.
    let db = Arc::new(Database::new(&data_dir.join("compass.db"))?);

    // Credentials: operator bearer token and the gate's shared secret.
    let token_path = if config.api.token_path.is_empty() {
        data_dir.join("api.token")
    } else {
        expand_home(&config.api.token_path)
    };
    let api_token = load_or_generate_token(&token_path);
    let gate_credential = load_or_generate_token(&data_dir.join("gate.credential"));

    // One event stream for the whole core.
    let (events, _) = broadcast::channel(1024);

    // Authorization gate. The NullExecutor performs no external effects;
    // real telephony/email/calendar providers plug in here.
    let gate = Arc::new(Gate::new(
        Arc::clone(&db),
        gate_credential.clone(),
        config.gate.clone(),
        ToolRegistry::builtin()?,
        Arc::new(InMemoryReplayGuard::new(config.gate.nonce_ttl_secs)),
        Arc::new(NullExecutor),
        events.clone(),
    ));

    // Execution handlers, including the gate-routed step handler.
    let artifacts = Arc::new(ArtifactRepository::new(Arc::clone(&db)));
    let mut registry = HandlerRegistry::new();
    registry.register_defaults();
    registry.register(Arc::new(ToolCallHandler::new(
        Arc::clone(&gate),
        artifacts,
        gate_credential,
    )));
    let registry = Arc::new(registry);

    // Queue worker and workflow engine.
    let worker = Arc::new(Worker::new(
        Arc::clone(&db),
        registry,
        &config.worker,
        events.clone(),
    ));
    let engine = Arc::new(WorkflowEngine::new(
        Arc::clone(&db),
        config.worker.default_max_attempts,
        events,
    ));

    // Background poll loop.
    let poller = Arc::new(WorkerPoller::new(
        Arc::clone(&worker),
        Arc::clone(&engine),
        std::time::Duration::from_secs(config.worker.poll_interval_secs),
        config.worker.claim_batch_size,
    ));
    let poller_task = if args.no_poller {
        tracing::info!("worker poll loop disabled (--no-poller)");
        None
    } else {
        let poller = Arc::clone(&poller);
        Some(tokio::spawn(async move { poller.run().await }))
    };

    // HTTP server.
    let port = config.general.port;
    let state = AppState::new(config, db, worker, engine, gate, api_token);
    let router = create_router(state);

    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("API server listening on http://{}", addr);

    let shutdown_poller = Arc::clone(&poller);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            shutdown_poller.shutdown();
        })
        .await?;

    if let Some(task) = poller_task {
        let _ = task.await;
    }

    tracing::info!("Compass stopped");
    Ok(())
}
