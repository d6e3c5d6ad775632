//! Repositories for the execution queue and workflow runs.
//!
//! All status moves are conditional UPDATEs filtered on the expected current
//! state and checked via the changed-row count, so every transition is a
//! compare-and-swap: concurrent writers cannot double-apply a move, and
//! terminal states are immutable by construction.

use std::sync::Arc;

use rusqlite::OptionalExtension;
use uuid::Uuid;

use compass_core::error::CompassError;
use compass_core::types::{
    Execution, ExecutionRun, ExecutionStatus, NewExecution, RunStatus, Step, Timestamp,
    WorkflowRun, WorkflowStatus,
};

use crate::db::Database;

pub(crate) fn storage_err(e: rusqlite::Error) -> CompassError {
    CompassError::Storage(e.to_string())
}

pub(crate) fn parse_uuid(s: &str, field: &str) -> Result<Uuid, CompassError> {
    Uuid::parse_str(s).map_err(|e| CompassError::Storage(format!("bad {} uuid: {}", field, e)))
}

pub(crate) fn parse_json(s: &str, field: &str) -> Result<serde_json::Value, CompassError> {
    serde_json::from_str(s).map_err(|e| CompassError::Storage(format!("bad {} json: {}", field, e)))
}

// =============================================================================
// Executions
// =============================================================================

/// Repository for execution queue rows.
pub struct ExecutionRepository {
    db: Arc<Database>,
}

impl ExecutionRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Enqueue a new execution.
    pub fn create(&self, new: &NewExecution) -> Result<Execution, CompassError> {
        let execution = Execution {
            id: Uuid::new_v4(),
            owner: new.owner.clone(),
            kind: new.kind.clone(),
            payload: new.payload.clone(),
            status: ExecutionStatus::Queued,
            priority: new.priority,
            run_at: new.run_at,
            next_retry_at: None,
            attempts: 0,
            max_attempts: new.max_attempts,
            last_error: None,
            created_at: Timestamp::now(),
        };

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO executions
                 (id, owner, kind, payload, status, priority, run_at, attempts, max_attempts, created_at)
                 VALUES (?1, ?2, ?3, ?4, 'queued', ?5, ?6, 0, ?7, ?8)",
                rusqlite::params![
                    execution.id.to_string(),
                    execution.owner,
                    execution.kind,
                    execution.payload.to_string(),
                    execution.priority,
                    execution.run_at.0,
                    execution.max_attempts,
                    execution.created_at.0,
                ],
            )
            .map_err(|e| CompassError::Storage(format!("Failed to enqueue execution: {}", e)))?;
            Ok(())
        })?;

        Ok(execution)
    }

    /// Fetch an execution by id.
    pub fn get(&self, id: Uuid) -> Result<Option<Execution>, CompassError> {
        self.db.with_conn(|conn| {
            let result = conn
                .query_row(
                    "SELECT id, owner, kind, payload, status, priority, run_at, next_retry_at,
                            attempts, max_attempts, last_error, created_at
                     FROM executions WHERE id = ?1",
                    rusqlite::params![id.to_string()],
                    |row| Ok(row_to_execution(row)),
                )
                .optional()
                .map_err(storage_err)?;

            match result {
                Some(execution) => Ok(Some(execution?)),
                None => Ok(None),
            }
        })
    }

    /// Select up to `limit` claimable executions, ordered by priority
    /// descending, then earliest `run_at`.
    ///
    /// Claimable means `queued`, due, and past any scheduled retry time.
    pub fn claim_candidates(
        &self,
        owner: Option<&str>,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<Execution>, CompassError> {
        self.db.with_conn(|conn| {
            let base = "SELECT id, owner, kind, payload, status, priority, run_at, next_retry_at,
                               attempts, max_attempts, last_error, created_at
                        FROM executions
                        WHERE status = 'queued'
                          AND run_at <= ?1
                          AND (next_retry_at IS NULL OR next_retry_at <= ?1)";

            let mut out = Vec::new();
            if let Some(owner) = owner {
                let sql = format!("{base} AND owner = ?2 ORDER BY priority DESC, run_at ASC LIMIT ?3");
                let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
                let rows = stmt
                    .query_map(rusqlite::params![now.0, owner, limit], |row| {
                        Ok(row_to_execution(row))
                    })
                    .map_err(storage_err)?;
                for row in rows {
                    out.push(row.map_err(storage_err)??);
                }
            } else {
                let sql = format!("{base} ORDER BY priority DESC, run_at ASC LIMIT ?2");
                let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
                let rows = stmt
                    .query_map(rusqlite::params![now.0, limit], |row| {
                        Ok(row_to_execution(row))
                    })
                    .map_err(storage_err)?;
                for row in rows {
                    out.push(row.map_err(storage_err)??);
                }
            }
            Ok(out)
        })
    }

    /// Atomically claim a queued execution.
    ///
    /// Returns `false` when another worker won the race; callers treat that
    /// as a benign no-op, not an error.
    pub fn try_claim(&self, id: Uuid) -> Result<bool, CompassError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE executions SET status = 'claimed'
                     WHERE id = ?1 AND status = 'queued'",
                    rusqlite::params![id.to_string()],
                )
                .map_err(storage_err)?;
            Ok(changed == 1)
        })
    }

    /// Move a claimed execution to `running` and charge one attempt.
    ///
    /// Returns the new attempt number.
    pub fn start_attempt(&self, id: Uuid) -> Result<u32, CompassError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE executions SET status = 'running', attempts = attempts + 1
                     WHERE id = ?1 AND status = 'claimed'",
                    rusqlite::params![id.to_string()],
                )
                .map_err(storage_err)?;
            if changed != 1 {
                return Err(CompassError::Storage(format!(
                    "execution {} was not in claimed state",
                    id
                )));
            }
            conn.query_row(
                "SELECT attempts FROM executions WHERE id = ?1",
                rusqlite::params![id.to_string()],
                |row| row.get(0),
            )
            .map_err(storage_err)
        })
    }

    /// Terminal success for a running execution.
    pub fn mark_succeeded(&self, id: Uuid) -> Result<(), CompassError> {
        self.conditional_move(
            id,
            "UPDATE executions SET status = 'succeeded', next_retry_at = NULL
             WHERE id = ?1 AND status = 'running'",
        )
    }

    /// Return a failed running execution to the queue with a scheduled retry.
    pub fn schedule_retry(
        &self,
        id: Uuid,
        next_retry_at: Timestamp,
        last_error: &str,
    ) -> Result<(), CompassError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE executions
                     SET status = 'queued', next_retry_at = ?2, last_error = ?3
                     WHERE id = ?1 AND status = 'running'",
                    rusqlite::params![id.to_string(), next_retry_at.0, last_error],
                )
                .map_err(storage_err)?;
            if changed != 1 {
                return Err(CompassError::Storage(format!(
                    "execution {} was not in running state",
                    id
                )));
            }
            Ok(())
        })
    }

    /// Terminal failure for a running execution.
    pub fn mark_failed(&self, id: Uuid, last_error: &str) -> Result<(), CompassError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE executions SET status = 'failed', last_error = ?2
                     WHERE id = ?1 AND status = 'running'",
                    rusqlite::params![id.to_string(), last_error],
                )
                .map_err(storage_err)?;
            if changed != 1 {
                return Err(CompassError::Storage(format!(
                    "execution {} was not in running state",
                    id
                )));
            }
            Ok(())
        })
    }

    fn conditional_move(&self, id: Uuid, sql: &str) -> Result<(), CompassError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(sql, rusqlite::params![id.to_string()])
                .map_err(storage_err)?;
            if changed != 1 {
                return Err(CompassError::Storage(format!(
                    "illegal status transition for execution {}",
                    id
                )));
            }
            Ok(())
        })
    }
}

fn row_to_execution(row: &rusqlite::Row<'_>) -> Result<Execution, CompassError> {
    let id: String = row.get(0).map_err(storage_err)?;
    let owner: String = row.get(1).map_err(storage_err)?;
    let kind: String = row.get(2).map_err(storage_err)?;
    let payload: String = row.get(3).map_err(storage_err)?;
    let status: String = row.get(4).map_err(storage_err)?;
    let priority: i64 = row.get(5).map_err(storage_err)?;
    let run_at: i64 = row.get(6).map_err(storage_err)?;
    let next_retry_at: Option<i64> = row.get(7).map_err(storage_err)?;
    let attempts: u32 = row.get(8).map_err(storage_err)?;
    let max_attempts: u32 = row.get(9).map_err(storage_err)?;
    let last_error: Option<String> = row.get(10).map_err(storage_err)?;
    let created_at: i64 = row.get(11).map_err(storage_err)?;

    Ok(Execution {
        id: parse_uuid(&id, "execution")?,
        owner,
        kind,
        payload: parse_json(&payload, "payload")?,
        status: status.parse::<ExecutionStatus>().map_err(CompassError::Storage)?,
        priority,
        run_at: Timestamp(run_at),
        next_retry_at: next_retry_at.map(Timestamp),
        attempts,
        max_attempts,
        last_error,
        created_at: Timestamp(created_at),
    })
}

// =============================================================================
// Execution runs
// =============================================================================

/// Repository for per-attempt execution run rows (append-only).
pub struct RunRepository {
    db: Arc<Database>,
}

impl RunRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Record the start of an attempt with a fresh trace id.
    pub fn create(&self, execution_id: Uuid, attempt: u32) -> Result<ExecutionRun, CompassError> {
        let run = ExecutionRun {
            id: Uuid::new_v4(),
            execution_id,
            attempt,
            status: RunStatus::Running,
            trace_id: Uuid::new_v4(),
            output: None,
            error: None,
            started_at: Timestamp::now(),
            finished_at: None,
        };

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO execution_runs (id, execution_id, attempt, status, trace_id, started_at)
                 VALUES (?1, ?2, ?3, 'running', ?4, ?5)",
                rusqlite::params![
                    run.id.to_string(),
                    execution_id.to_string(),
                    attempt,
                    run.trace_id.to_string(),
                    run.started_at.0,
                ],
            )
            .map_err(|e| CompassError::Storage(format!("Failed to create run: {}", e)))?;
            Ok(())
        })?;

        Ok(run)
    }

    /// Finish a running attempt with its terminal status.
    pub fn finish(
        &self,
        run_id: Uuid,
        status: RunStatus,
        output: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<(), CompassError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE execution_runs
                     SET status = ?2, output = ?3, error = ?4, finished_at = ?5
                     WHERE id = ?1 AND status = 'running'",
                    rusqlite::params![
                        run_id.to_string(),
                        status.to_string(),
                        output.map(|v| v.to_string()),
                        error,
                        Timestamp::now().0,
                    ],
                )
                .map_err(storage_err)?;
            if changed != 1 {
                return Err(CompassError::Storage(format!(
                    "run {} was not in running state",
                    run_id
                )));
            }
            Ok(())
        })
    }

    /// All attempts for an execution, oldest first.
    pub fn list_for_execution(&self, execution_id: Uuid) -> Result<Vec<ExecutionRun>, CompassError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, execution_id, attempt, status, trace_id, output, error,
                            started_at, finished_at
                     FROM execution_runs WHERE execution_id = ?1 ORDER BY attempt ASC",
                )
                .map_err(storage_err)?;
            let rows = stmt
                .query_map(rusqlite::params![execution_id.to_string()], |row| {
                    Ok(row_to_run(row))
                })
                .map_err(storage_err)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(storage_err)??);
            }
            Ok(out)
        })
    }

    pub fn get(&self, run_id: Uuid) -> Result<Option<ExecutionRun>, CompassError> {
        self.db.with_conn(|conn| {
            let result = conn
                .query_row(
                    "SELECT id, execution_id, attempt, status, trace_id, output, error,
                            started_at, finished_at
                     FROM execution_runs WHERE id = ?1",
                    rusqlite::params![run_id.to_string()],
                    |row| Ok(row_to_run(row)),
                )
                .optional()
                .map_err(storage_err)?;
            match result {
                Some(run) => Ok(Some(run?)),
                None => Ok(None),
            }
        })
    }
}

fn row_to_run(row: &rusqlite::Row<'_>) -> Result<ExecutionRun, CompassError> {
    let id: String = row.get(0).map_err(storage_err)?;
    let execution_id: String = row.get(1).map_err(storage_err)?;
    let attempt: u32 = row.get(2).map_err(storage_err)?;
    let status: String = row.get(3).map_err(storage_err)?;
    let trace_id: String = row.get(4).map_err(storage_err)?;
    let output: Option<String> = row.get(5).map_err(storage_err)?;
    let error: Option<String> = row.get(6).map_err(storage_err)?;
    let started_at: i64 = row.get(7).map_err(storage_err)?;
    let finished_at: Option<i64> = row.get(8).map_err(storage_err)?;

    Ok(ExecutionRun {
        id: parse_uuid(&id, "run")?,
        execution_id: parse_uuid(&execution_id, "execution")?,
        attempt,
        status: status.parse::<RunStatus>().map_err(CompassError::Storage)?,
        trace_id: parse_uuid(&trace_id, "trace")?,
        output: output.map(|s| parse_json(&s, "output")).transpose()?,
        error,
        started_at: Timestamp(started_at),
        finished_at: finished_at.map(Timestamp),
    })
}

// =============================================================================
// Workflow runs
// =============================================================================

/// Repository for workflow run rows.
pub struct WorkflowRepository {
    db: Arc<Database>,
}

impl WorkflowRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Persist a new workflow run in `queued` with its immutable plan.
    pub fn create(
        &self,
        parent_run_id: Uuid,
        owner: &str,
        plan: &[Step],
    ) -> Result<WorkflowRun, CompassError> {
        let run = WorkflowRun {
            id: Uuid::new_v4(),
            parent_run_id,
            owner: owner.to_string(),
            status: WorkflowStatus::Queued,
            plan: plan.to_vec(),
            current_step_index: 0,
            current_execution_id: None,
            created_at: Timestamp::now(),
            completed_at: None,
        };

        let plan_json = serde_json::to_string(&run.plan)
            .map_err(|e| CompassError::Storage(format!("bad plan json: {}", e)))?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO workflow_runs
                 (id, parent_run_id, owner, status, plan, current_step_index, created_at)
                 VALUES (?1, ?2, ?3, 'queued', ?4, 0, ?5)",
                rusqlite::params![
                    run.id.to_string(),
                    parent_run_id.to_string(),
                    run.owner,
                    plan_json,
                    run.created_at.0,
                ],
            )
            .map_err(|e| CompassError::Storage(format!("Failed to create workflow run: {}", e)))?;
            Ok(())
        })?;

        Ok(run)
    }

    pub fn get(&self, id: Uuid) -> Result<Option<WorkflowRun>, CompassError> {
        self.db.with_conn(|conn| {
            let result = conn
                .query_row(
                    "SELECT id, parent_run_id, owner, status, plan, current_step_index,
                            current_execution_id, created_at, completed_at
                     FROM workflow_runs WHERE id = ?1",
                    rusqlite::params![id.to_string()],
                    |row| Ok(row_to_workflow(row)),
                )
                .optional()
                .map_err(storage_err)?;
            match result {
                Some(run) => Ok(Some(run?)),
                None => Ok(None),
            }
        })
    }

    /// Workflow runs that still need ticking, oldest first.
    pub fn list_active(&self, limit: u32) -> Result<Vec<WorkflowRun>, CompassError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, parent_run_id, owner, status, plan, current_step_index,
                            current_execution_id, created_at, completed_at
                     FROM workflow_runs
                     WHERE status IN ('queued', 'running')
                     ORDER BY created_at ASC
                     LIMIT ?1",
                )
                .map_err(storage_err)?;
            let rows = stmt
                .query_map(rusqlite::params![limit], |row| Ok(row_to_workflow(row)))
                .map_err(storage_err)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(storage_err)??);
            }
            Ok(out)
        })
    }

    /// Move `queued -> running`.
    pub fn mark_running(&self, id: Uuid) -> Result<(), CompassError> {
        self.cas(
            id,
            "UPDATE workflow_runs SET status = 'running'
             WHERE id = ?1 AND status = 'queued'",
        )
    }

    /// Record the execution backing the in-flight step.
    pub fn set_current_execution(&self, id: Uuid, execution_id: Uuid) -> Result<(), CompassError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE workflow_runs SET current_execution_id = ?2
                     WHERE id = ?1 AND status = 'running' AND current_execution_id IS NULL",
                    rusqlite::params![id.to_string(), execution_id.to_string()],
                )
                .map_err(storage_err)?;
            if changed != 1 {
                return Err(CompassError::Storage(format!(
                    "workflow {} already has an in-flight step",
                    id
                )));
            }
            Ok(())
        })
    }

    /// Advance past a completed step.
    ///
    /// The CAS on `current_step_index` keeps the index monotone even under
    /// overlapping ticks.
    pub fn advance(&self, id: Uuid, from_index: usize) -> Result<(), CompassError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE workflow_runs
                     SET current_step_index = current_step_index + 1, current_execution_id = NULL
                     WHERE id = ?1 AND status = 'running' AND current_step_index = ?2",
                    rusqlite::params![id.to_string(), from_index as i64],
                )
                .map_err(storage_err)?;
            if changed != 1 {
                return Err(CompassError::Storage(format!(
                    "workflow {} advanced concurrently",
                    id
                )));
            }
            Ok(())
        })
    }

    /// Terminal success.
    pub fn mark_succeeded(&self, id: Uuid) -> Result<(), CompassError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE workflow_runs SET status = 'succeeded', completed_at = ?2
                     WHERE id = ?1 AND status = 'running'",
                    rusqlite::params![id.to_string(), Timestamp::now().0],
                )
                .map_err(storage_err)?;
            if changed != 1 {
                return Err(CompassError::Storage(format!(
                    "workflow {} was not running",
                    id
                )));
            }
            Ok(())
        })
    }

    /// Terminal failure.
    pub fn mark_failed(&self, id: Uuid) -> Result<(), CompassError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE workflow_runs SET status = 'failed', completed_at = ?2
                     WHERE id = ?1 AND status = 'running'",
                    rusqlite::params![id.to_string(), Timestamp::now().0],
                )
                .map_err(storage_err)?;
            if changed != 1 {
                return Err(CompassError::Storage(format!(
                    "workflow {} was not running",
                    id
                )));
            }
            Ok(())
        })
    }

    fn cas(&self, id: Uuid, sql: &str) -> Result<(), CompassError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(sql, rusqlite::params![id.to_string()])
                .map_err(storage_err)?;
            if changed != 1 {
                return Err(CompassError::Storage(format!(
                    "illegal status transition for workflow {}",
                    id
                )));
            }
            Ok(())
        })
    }
}

fn row_to_workflow(row: &rusqlite::Row<'_>) -> Result<WorkflowRun, CompassError> {
    let id: String = row.get(0).map_err(storage_err)?;
    let parent_run_id: String = row.get(1).map_err(storage_err)?;
    let owner: String = row.get(2).map_err(storage_err)?;
    let status: String = row.get(3).map_err(storage_err)?;
    let plan: String = row.get(4).map_err(storage_err)?;
    let current_step_index: i64 = row.get(5).map_err(storage_err)?;
    let current_execution_id: Option<String> = row.get(6).map_err(storage_err)?;
    let created_at: i64 = row.get(7).map_err(storage_err)?;
    let completed_at: Option<i64> = row.get(8).map_err(storage_err)?;

    let plan: Vec<Step> = serde_json::from_str(&plan)
        .map_err(|e| CompassError::Storage(format!("bad plan json: {}", e)))?;

    Ok(WorkflowRun {
        id: parse_uuid(&id, "workflow")?,
        parent_run_id: parse_uuid(&parent_run_id, "parent_run")?,
        owner,
        status: status.parse::<WorkflowStatus>().map_err(CompassError::Storage)?,
        plan,
        current_step_index: current_step_index as usize,
        current_execution_id: current_execution_id
            .map(|s| parse_uuid(&s, "current_execution"))
            .transpose()?,
        created_at: Timestamp(created_at),
        completed_at: completed_at.map(Timestamp),
    })
}
