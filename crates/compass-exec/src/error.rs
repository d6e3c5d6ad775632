//! Error types for the execution engine.

use compass_core::error::CompassError;
use uuid::Uuid;

/// Errors from the execution queue worker and handlers.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("Execution handler failed: {0}")]
    HandlerFailed(String),
    #[error("No handler registered for kind: {0}")]
    UnregisteredHandler(String),
    #[error("Payload validation failed: {0}")]
    InvalidPayload(String),
    #[error("Execution not found: {0}")]
    NotFound(Uuid),
    #[error("Storage error: {0}")]
    Storage(#[from] CompassError),
}

/// Errors from the workflow state machine.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Workflow run not found: {0}")]
    NotFound(Uuid),
    #[error("Workflow plan is invalid: {0}")]
    InvalidPlan(String),
    #[error("Storage error: {0}")]
    Storage(#[from] CompassError),
}

/// Errors from the delegation contract gate.
#[derive(Debug, thiserror::Error)]
pub enum DelegationError {
    #[error("Delegation contract not found: {0}")]
    NotFound(Uuid),
    #[error("Delegation contract already revoked: {0}")]
    AlreadyRevoked(Uuid),
    #[error("Delegation budget exhausted for contract: {0}")]
    BudgetExhausted(Uuid),
    #[error("Active contract already exists for ({owner}, {intent_type}, {workflow_template_id})")]
    DuplicateGrant {
        owner: String,
        intent_type: String,
        workflow_template_id: String,
    },
    #[error("Storage error: {0}")]
    Storage(#[from] CompassError),
}
