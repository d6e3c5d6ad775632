use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{EffectStatus, Timestamp, Verdict};

/// All domain events that can occur in the Compass action core.
///
/// Events are emitted by the worker, workflow engine, delegation gate, and
/// authorization gate after state changes and consumed by:
/// - The broadcast channel (for dashboards / SSE)
/// - The structured log (for audit and test assertions)
///
/// Step-level events carry the **parent run id** of the workflow that spawned
/// them, so a single stream aggregates a workflow together with whatever
/// triggered it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum DomainEvent {
    // =========================================================================
    // Worker events
    // =========================================================================
    /// A worker won the claim race for a queued execution.
    ExecutionClaimed {
        execution_id: Uuid,
        owner: String,
        kind: String,
        attempt: u32,
        timestamp: Timestamp,
    },

    /// An attempt started; a fresh `ExecutionRun` row exists.
    RunStarted {
        execution_id: Uuid,
        run_id: Uuid,
        attempt: u32,
        trace_id: Uuid,
        timestamp: Timestamp,
    },

    /// The handler completed and the execution reached `succeeded`.
    ExecutionSucceeded {
        execution_id: Uuid,
        run_id: Uuid,
        attempt: u32,
        timestamp: Timestamp,
    },

    /// The handler failed with retry budget remaining; a retry is scheduled.
    ExecutionRetryScheduled {
        execution_id: Uuid,
        run_id: Uuid,
        attempt: u32,
        next_retry_at: Timestamp,
        timestamp: Timestamp,
    },

    /// The handler failed with the retry budget exhausted.
    ExecutionFailed {
        execution_id: Uuid,
        run_id: Uuid,
        attempt: u32,
        timestamp: Timestamp,
    },

    // =========================================================================
    // Workflow events
    // =========================================================================
    /// A workflow run left `queued`.
    WorkflowStarted {
        workflow_run_id: Uuid,
        parent_run_id: Uuid,
        timestamp: Timestamp,
    },

    /// A step's backing execution was enqueued.
    StepStarted {
        parent_run_id: Uuid,
        workflow_run_id: Uuid,
        step_id: String,
        step_index: usize,
        execution_id: Uuid,
        timestamp: Timestamp,
    },

    /// All steps completed; the workflow reached `succeeded`.
    WorkflowSucceeded {
        workflow_run_id: Uuid,
        parent_run_id: Uuid,
        timestamp: Timestamp,
    },

    /// A step's execution terminally failed; the workflow reached `failed`.
    WorkflowFailed {
        workflow_run_id: Uuid,
        parent_run_id: Uuid,
        step_index: usize,
        timestamp: Timestamp,
    },

    // =========================================================================
    // Gate events
    // =========================================================================
    /// The pre-flight effect row was written for an authorization decision.
    EffectRecorded {
        effect_id: Uuid,
        call_id: String,
        tool: String,
        verdict: Verdict,
        confidence: f64,
        timestamp: Timestamp,
    },

    /// An effect row received its completion write.
    EffectCompleted {
        effect_id: Uuid,
        status: EffectStatus,
        timestamp: Timestamp,
    },

    /// A proposal artifact was persisted for human review.
    ProposalCreated {
        proposal_id: Uuid,
        effect_id: Uuid,
        tool: String,
        timestamp: Timestamp,
    },

    // =========================================================================
    // Delegation events
    // =========================================================================
    /// A standing delegation contract was granted.
    ContractGranted {
        contract_id: Uuid,
        owner: String,
        intent_type: String,
        timestamp: Timestamp,
    },

    /// A delegation contract was revoked (one-way).
    ContractRevoked {
        contract_id: Uuid,
        timestamp: Timestamp,
    },
}
