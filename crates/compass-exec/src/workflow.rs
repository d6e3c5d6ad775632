//! Workflow state machine, ticked incrementally.
//!
//! A workflow run sequences a plan of steps, each backed by one execution on
//! the queue. `tick` is idempotently re-invocable and advances at most one
//! logical step per call, so an external poller can drive it at any cadence,
//! even with overlapping invocations. Crash-safety comes from never holding
//! more than one step's worth of unflushed state.

use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use compass_core::events::DomainEvent;
use compass_core::types::{
    ExecutionStatus, NewExecution, Step, Timestamp, WorkflowRun, WorkflowStatus,
};
use compass_storage::{Database, ExecutionRepository, WorkflowRepository};

use crate::error::WorkflowError;

/// What a single tick accomplished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The run left `queued` (and started its first step, if any).
    Started,
    /// The execution for the current step was enqueued.
    StepStarted { step_index: usize, execution_id: Uuid },
    /// The current step completed; the index advanced. The next step starts
    /// on the following tick.
    Advanced { new_index: usize },
    /// All steps completed; the run is terminally `succeeded`.
    Succeeded,
    /// The current step's execution exhausted its retry budget; the run is
    /// terminally `failed`.
    Failed,
    /// Nothing to do (step still in flight, or the run is terminal).
    NoProgress,
}

/// Tick-driven sequencer for multi-step workflow runs.
pub struct WorkflowEngine {
    workflows: WorkflowRepository,
    executions: ExecutionRepository,
    step_max_attempts: u32,
    events: broadcast::Sender<DomainEvent>,
}

impl WorkflowEngine {
    pub fn new(
        db: Arc<Database>,
        step_max_attempts: u32,
        events: broadcast::Sender<DomainEvent>,
    ) -> Self {
        Self {
            workflows: WorkflowRepository::new(Arc::clone(&db)),
            executions: ExecutionRepository::new(db),
            step_max_attempts,
            events,
        }
    }

    /// Persist a new workflow run in `queued` with its immutable plan.
    pub fn start(
        &self,
        parent_run_id: Uuid,
        owner: &str,
        plan: Vec<Step>,
    ) -> Result<WorkflowRun, WorkflowError> {
        for step in &plan {
            if step.executor_kind.is_empty() {
                return Err(WorkflowError::InvalidPlan(format!(
                    "step {} has no executor kind",
                    step.step_id
                )));
            }
        }
        Ok(self.workflows.create(parent_run_id, owner, &plan)?)
    }

    pub fn get(&self, id: Uuid) -> Result<Option<WorkflowRun>, WorkflowError> {
        Ok(self.workflows.get(id)?)
    }

    /// Workflow runs that still need ticking.
    pub fn list_active(&self, limit: u32) -> Result<Vec<WorkflowRun>, WorkflowError> {
        Ok(self.workflows.list_active(limit)?)
    }

    /// Advance the run by at most one logical step.
    pub fn tick(&self, id: Uuid) -> Result<TickOutcome, WorkflowError> {
        let run = self.workflows.get(id)?.ok_or(WorkflowError::NotFound(id))?;

        match run.status {
            WorkflowStatus::Queued => {
                self.workflows.mark_running(run.id)?;
                let _ = self.events.send(DomainEvent::WorkflowStarted {
                    workflow_run_id: run.id,
                    parent_run_id: run.parent_run_id,
                    timestamp: Timestamp::now(),
                });

                if run.plan.is_empty() {
                    self.workflows.mark_succeeded(run.id)?;
                    let _ = self.events.send(DomainEvent::WorkflowSucceeded {
                        workflow_run_id: run.id,
                        parent_run_id: run.parent_run_id,
                        timestamp: Timestamp::now(),
                    });
                    return Ok(TickOutcome::Succeeded);
                }

                self.start_step(&run, 0)?;
                Ok(TickOutcome::Started)
            }

            WorkflowStatus::Running => {
                let index = run.current_step_index;

                let Some(execution_id) = run.current_execution_id else {
                    // The previous tick advanced past a completed step; start
                    // the execution for the now-current step.
                    let execution_id = self.start_step(&run, index)?;
                    return Ok(TickOutcome::StepStarted {
                        step_index: index,
                        execution_id,
                    });
                };

                let execution = self
                    .executions
                    .get(execution_id)?
                    .ok_or_else(|| {
                        WorkflowError::InvalidPlan(format!(
                            "step execution {} missing for workflow {}",
                            execution_id, run.id
                        ))
                    })?;

                match execution.status {
                    ExecutionStatus::Succeeded => {
                        self.workflows.advance(run.id, index)?;
                        let new_index = index + 1;

                        if new_index == run.plan.len() {
                            self.workflows.mark_succeeded(run.id)?;
                            tracing::info!(
                                workflow_run_id = %run.id,
                                parent_run_id = %run.parent_run_id,
                                "workflow completed"
                            );
                            let _ = self.events.send(DomainEvent::WorkflowSucceeded {
                                workflow_run_id: run.id,
                                parent_run_id: run.parent_run_id,
                                timestamp: Timestamp::now(),
                            });
                            Ok(TickOutcome::Succeeded)
                        } else {
                            Ok(TickOutcome::Advanced { new_index })
                        }
                    }
                    ExecutionStatus::Failed => {
                        self.workflows.mark_failed(run.id)?;
                        tracing::warn!(
                            workflow_run_id = %run.id,
                            parent_run_id = %run.parent_run_id,
                            step_index = index,
                            "workflow failed"
                        );
                        let _ = self.events.send(DomainEvent::WorkflowFailed {
                            workflow_run_id: run.id,
                            parent_run_id: run.parent_run_id,
                            step_index: index,
                            timestamp: Timestamp::now(),
                        });
                        Ok(TickOutcome::Failed)
                    }
                    // Step still queued, claimed, or running.
                    _ => Ok(TickOutcome::NoProgress),
                }
            }

            WorkflowStatus::Succeeded | WorkflowStatus::Failed => Ok(TickOutcome::NoProgress),
        }
    }

    /// Enqueue the execution backing `plan[index]` and record it in flight.
    fn start_step(&self, run: &WorkflowRun, index: usize) -> Result<Uuid, WorkflowError> {
        let step = run.plan.get(index).ok_or_else(|| {
            WorkflowError::InvalidPlan(format!(
                "step index {} out of bounds for workflow {}",
                index, run.id
            ))
        })?;

        let execution = self.executions.create(&NewExecution {
            owner: run.owner.clone(),
            kind: step.executor_kind.clone(),
            payload: step.payload.clone(),
            priority: 0,
            run_at: Timestamp::now(),
            max_attempts: self.step_max_attempts,
        })?;

        self.workflows.set_current_execution(run.id, execution.id)?;

        // Step events are keyed by the parent run id, not the workflow id, so
        // one stream aggregates the workflow with whatever triggered it.
        tracing::info!(
            parent_run_id = %run.parent_run_id,
            workflow_run_id = %run.id,
            step_id = %step.step_id,
            step_index = index,
            execution_id = %execution.id,
            "STEP_STARTED"
        );
        let _ = self.events.send(DomainEvent::StepStarted {
            parent_run_id: run.parent_run_id,
            workflow_run_id: run.id,
            step_id: step.step_id.clone(),
            step_index: index,
            execution_id: execution.id,
            timestamp: Timestamp::now(),
        });

        Ok(execution.id)
    }
}
