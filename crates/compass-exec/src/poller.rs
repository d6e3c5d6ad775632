//! Poll loop driving the worker and workflow engine.
//!
//! An explicit interval ticker replaces the assumption of an external
//! repeated invocation. Every cycle is bounded: active workflows get one
//! tick each, then the worker drains at most one claim batch. Each unit of
//! work stays idempotent, so overlapping or missed cycles are harmless.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::worker::Worker;
use crate::workflow::WorkflowEngine;

/// Background poller that repeatedly drives claims and ticks.
pub struct WorkerPoller {
    worker: Arc<Worker>,
    engine: Arc<WorkflowEngine>,
    interval: Duration,
    batch: u32,
    shutdown: Arc<Notify>,
}

impl WorkerPoller {
    pub fn new(worker: Arc<Worker>, engine: Arc<WorkflowEngine>, interval: Duration, batch: u32) -> Self {
        Self {
            worker,
            engine,
            interval,
            batch,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Run the poll loop until a shutdown signal.
    pub async fn run(&self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "worker poll loop started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.drive_once().await;
                }
                _ = self.shutdown.notified() => {
                    tracing::info!("worker poll loop stopped");
                    return;
                }
            }
        }
    }

    /// One bounded poll cycle. Public so the trigger path and tests can
    /// drive the same unit the loop runs.
    pub async fn drive_once(&self) {
        match self.engine.list_active(self.batch) {
            Ok(active) => {
                for run in active {
                    if let Err(e) = self.engine.tick(run.id) {
                        tracing::warn!(workflow_run_id = %run.id, error = %e, "workflow tick failed");
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "listing active workflows failed"),
        }

        for _ in 0..self.batch {
            match self.worker.run_once(None).await {
                Ok(Some(report)) => {
                    tracing::debug!(execution_id = %report.execution_id, succeeded = report.succeeded, "poll cycle ran execution");
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "poll cycle execution failed");
                    break;
                }
            }
        }
    }

    /// Signal the poll loop to shut down gracefully.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}
