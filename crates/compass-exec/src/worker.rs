//! Execution queue worker: claim, run, retry.
//!
//! Claiming is a compare-and-swap conditional UPDATE; exactly one worker wins
//! a given claim and losers treat the race as a benign no-op. A lost race
//! reports "no work" rather than falling through to the next candidate in the
//! same call — each invocation stays cheap, and the next poll picks the
//! candidate up. This is a recorded product decision, not an accident.

use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use compass_core::config::WorkerConfig;
use compass_core::events::DomainEvent;
use compass_core::types::{Execution, NewExecution, RunStatus, Timestamp};
use compass_storage::{ArtifactRepository, Database, ExecutionRepository, RunRepository};

use crate::error::ExecError;
use crate::handler::{HandlerContext, HandlerRegistry};

/// Delay before the nth retry: `base * 2^(attempt-1)` seconds.
pub fn backoff_delay_secs(base: i64, attempt: u32) -> i64 {
    let shift = attempt.saturating_sub(1).min(30);
    base.saturating_mul(1i64 << shift)
}

/// Outcome of one executed attempt.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub execution_id: Uuid,
    pub run_id: Uuid,
    pub attempt: u32,
    pub trace_id: Uuid,
    pub succeeded: bool,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// Stateless queue worker. Multiple instances may run concurrently; safety
/// rests entirely on the conditional-UPDATE claim.
pub struct Worker {
    executions: ExecutionRepository,
    runs: RunRepository,
    artifacts: ArtifactRepository,
    registry: Arc<HandlerRegistry>,
    retry_base_secs: i64,
    claim_batch_size: u32,
    events: broadcast::Sender<DomainEvent>,
}

impl Worker {
    pub fn new(
        db: Arc<Database>,
        registry: Arc<HandlerRegistry>,
        config: &WorkerConfig,
        events: broadcast::Sender<DomainEvent>,
    ) -> Self {
        Self {
            executions: ExecutionRepository::new(Arc::clone(&db)),
            runs: RunRepository::new(Arc::clone(&db)),
            artifacts: ArtifactRepository::new(db),
            registry,
            retry_base_secs: config.retry_base_secs,
            claim_batch_size: config.claim_batch_size,
            events,
        }
    }

    /// Subscribe to the worker's domain event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.events.subscribe()
    }

    /// Enqueue a new execution. The entry point used by external schedulers
    /// and the workflow engine.
    pub fn enqueue(&self, new: &NewExecution) -> Result<Execution, ExecError> {
        Ok(self.executions.create(new)?)
    }

    pub fn get_execution(&self, id: Uuid) -> Result<Option<Execution>, ExecError> {
        Ok(self.executions.get(id)?)
    }

    /// Claim the next due execution, if any.
    ///
    /// Returns `None` both when the queue is empty and when another worker
    /// won the race for the top candidate.
    pub fn claim_next(&self, owner: Option<&str>) -> Result<Option<Execution>, ExecError> {
        let now = Timestamp::now();
        let candidates = self
            .executions
            .claim_candidates(owner, now, self.claim_batch_size)?;

        let Some(candidate) = candidates.into_iter().next() else {
            return Ok(None);
        };

        if !self.executions.try_claim(candidate.id)? {
            tracing::debug!(execution_id = %candidate.id, "claim race lost");
            return Ok(None);
        }

        tracing::info!(
            execution_id = %candidate.id,
            owner = %candidate.owner,
            kind = %candidate.kind,
            attempt = candidate.attempts + 1,
            "worker:claimed"
        );
        let _ = self.events.send(DomainEvent::ExecutionClaimed {
            execution_id: candidate.id,
            owner: candidate.owner.clone(),
            kind: candidate.kind.clone(),
            attempt: candidate.attempts + 1,
            timestamp: Timestamp::now(),
        });

        Ok(Some(candidate))
    }

    /// Claim and execute one unit of work.
    ///
    /// The unit behind the trigger endpoint and the poll loop: at most one
    /// claim, at most one handler invocation.
    pub async fn run_once(&self, owner: Option<&str>) -> Result<Option<RunReport>, ExecError> {
        match self.claim_next(owner)? {
            Some(execution) => Ok(Some(self.execute_claimed(execution).await?)),
            None => Ok(None),
        }
    }

    /// Run a claimed execution through its handler and settle the outcome.
    async fn execute_claimed(&self, execution: Execution) -> Result<RunReport, ExecError> {
        let attempt = self.executions.start_attempt(execution.id)?;
        let run = self.runs.create(execution.id, attempt)?;

        self.artifacts.link(
            "execution",
            &execution.id.to_string(),
            "spawned",
            "execution_run",
            &run.id.to_string(),
        )?;
        self.artifacts.link(
            "execution_run",
            &run.id.to_string(),
            "has_trace",
            "trace",
            &run.trace_id.to_string(),
        )?;

        tracing::info!(
            execution_id = %execution.id,
            run_id = %run.id,
            attempt,
            trace_id = %run.trace_id,
            "worker:run_started"
        );
        let _ = self.events.send(DomainEvent::RunStarted {
            execution_id: execution.id,
            run_id: run.id,
            attempt,
            trace_id: run.trace_id,
            timestamp: Timestamp::now(),
        });

        let ctx = HandlerContext {
            execution_id: execution.id,
            run_id: run.id,
            owner: execution.owner.clone(),
            trace_id: run.trace_id,
            attempt,
        };

        let result = match self.registry.get(&execution.kind) {
            Some(handler) => handler.execute(&ctx, &execution.payload).await,
            // An unknown kind is an ordinary failure: a handler registered by
            // a later deploy can still pick the work up within the budget.
            None => Err(ExecError::UnregisteredHandler(execution.kind.clone())),
        };

        match result {
            Ok(output) => {
                self.runs
                    .finish(run.id, RunStatus::Succeeded, Some(&output), None)?;
                self.executions.mark_succeeded(execution.id)?;

                tracing::info!(
                    execution_id = %execution.id,
                    run_id = %run.id,
                    attempt,
                    trace_id = %run.trace_id,
                    "worker:succeeded"
                );
                let _ = self.events.send(DomainEvent::ExecutionSucceeded {
                    execution_id: execution.id,
                    run_id: run.id,
                    attempt,
                    timestamp: Timestamp::now(),
                });

                Ok(RunReport {
                    execution_id: execution.id,
                    run_id: run.id,
                    attempt,
                    trace_id: run.trace_id,
                    succeeded: true,
                    output: Some(output),
                    error: None,
                })
            }
            Err(err) => {
                let message = err.to_string();
                self.runs
                    .finish(run.id, RunStatus::Failed, None, Some(&message))?;

                if attempt < execution.max_attempts {
                    let delay = backoff_delay_secs(self.retry_base_secs, attempt);
                    let next_retry_at = Timestamp(Timestamp::now().0 + delay);
                    self.executions
                        .schedule_retry(execution.id, next_retry_at, &message)?;

                    tracing::warn!(
                        execution_id = %execution.id,
                        run_id = %run.id,
                        attempt,
                        trace_id = %run.trace_id,
                        retry_in_secs = delay,
                        error = %message,
                        "worker:failed"
                    );
                    let _ = self.events.send(DomainEvent::ExecutionRetryScheduled {
                        execution_id: execution.id,
                        run_id: run.id,
                        attempt,
                        next_retry_at,
                        timestamp: Timestamp::now(),
                    });
                } else {
                    self.executions.mark_failed(execution.id, &message)?;

                    tracing::error!(
                        execution_id = %execution.id,
                        run_id = %run.id,
                        attempt,
                        trace_id = %run.trace_id,
                        error = %message,
                        "worker:failed"
                    );
                    let _ = self.events.send(DomainEvent::ExecutionFailed {
                        execution_id: execution.id,
                        run_id: run.id,
                        attempt,
                        timestamp: Timestamp::now(),
                    });
                }

                Ok(RunReport {
                    execution_id: execution.id,
                    run_id: run.id,
                    attempt,
                    trace_id: run.trace_id,
                    succeeded: false,
                    output: None,
                    error: Some(message),
                })
            }
        }
    }
}
