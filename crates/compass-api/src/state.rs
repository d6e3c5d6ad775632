//! Application state shared across all route handlers.
//!
//! AppState holds references to the core services and shared resources.
//! It is passed to handlers via axum's State extractor.

use std::sync::Arc;
use std::time::Instant;

use compass_core::config::CompassConfig;
use compass_exec::{Worker, WorkflowEngine};
use compass_gate::Gate;
use compass_storage::Database;

/// Shared application state.
///
/// All fields use `Arc` for cheap cloning across handler tasks.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<CompassConfig>,
    /// SQLite database for persistent storage.
    pub database: Arc<Database>,
    /// Execution queue worker.
    pub worker: Arc<Worker>,
    /// Workflow state machine.
    pub engine: Arc<WorkflowEngine>,
    /// Authorization gate.
    pub gate: Arc<Gate>,
    /// Bearer token for operator endpoints.
    pub api_token: String,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: CompassConfig,
        database: Arc<Database>,
        worker: Arc<Worker>,
        engine: Arc<WorkflowEngine>,
        gate: Arc<Gate>,
        api_token: String,
    ) -> Self {
        Self {
            config: Arc::new(config),
            database,
            worker,
            engine,
            gate,
            api_token,
            start_time: Instant::now(),
        }
    }
}
