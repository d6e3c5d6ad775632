//! Database schema migrations.
//!
//! Applies the initial schema: executions, execution_runs, workflow_runs,
//! delegation_contracts, effects, proposals, artifact_links, plus the
//! schema_migrations tracking table.

use rusqlite::Connection;
use tracing::info;

use compass_core::error::CompassError;

/// Run all pending database migrations.
///
/// Currently implements the initial schema (version 1). Future migrations
/// can be added by checking the current version and applying incremental changes.
pub fn run_migrations(conn: &Connection) -> Result<(), CompassError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| CompassError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| CompassError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<(), CompassError> {
    conn.execute_batch(
        "
        -- Execution queue. The claim path is a conditional UPDATE on
        -- (id, status), so status moves are compare-and-swap by construction.
        CREATE TABLE IF NOT EXISTS executions (
            id              TEXT PRIMARY KEY NOT NULL,
            owner           TEXT NOT NULL,
            kind            TEXT NOT NULL,
            payload         TEXT NOT NULL DEFAULT '{}',
            status          TEXT NOT NULL DEFAULT 'queued'
                            CHECK (status IN ('queued', 'claimed', 'running', 'succeeded', 'failed')),
            priority        INTEGER NOT NULL DEFAULT 0,
            run_at          INTEGER NOT NULL,
            next_retry_at   INTEGER,
            attempts        INTEGER NOT NULL DEFAULT 0,
            max_attempts    INTEGER NOT NULL DEFAULT 3,
            last_error      TEXT,
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_executions_claim
            ON executions (status, run_at, priority DESC);

        CREATE INDEX IF NOT EXISTS idx_executions_owner
            ON executions (owner, status);

        -- One row per attempt. Append-only.
        CREATE TABLE IF NOT EXISTS execution_runs (
            id              TEXT PRIMARY KEY NOT NULL,
            execution_id    TEXT NOT NULL REFERENCES executions (id),
            attempt         INTEGER NOT NULL,
            status          TEXT NOT NULL DEFAULT 'running'
                            CHECK (status IN ('running', 'succeeded', 'failed')),
            trace_id        TEXT NOT NULL,
            output          TEXT,
            error           TEXT,
            started_at      INTEGER NOT NULL,
            finished_at     INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_execution_runs_execution
            ON execution_runs (execution_id, attempt);

        -- Multi-step workflow runs. The plan is an ordered JSON list of steps,
        -- immutable once written.
        CREATE TABLE IF NOT EXISTS workflow_runs (
            id                    TEXT PRIMARY KEY NOT NULL,
            parent_run_id         TEXT NOT NULL,
            owner                 TEXT NOT NULL,
            status                TEXT NOT NULL DEFAULT 'queued'
                                  CHECK (status IN ('queued', 'running', 'succeeded', 'failed')),
            plan                  TEXT NOT NULL,
            current_step_index    INTEGER NOT NULL DEFAULT 0,
            current_execution_id  TEXT,
            created_at            INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            completed_at          INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_workflow_runs_status
            ON workflow_runs (status, created_at);

        -- Standing delegation grants. Never deleted; revocation is one-way.
        -- At most one active (non-revoked) contract per tuple.
        CREATE TABLE IF NOT EXISTS delegation_contracts (
            id                    TEXT PRIMARY KEY NOT NULL,
            owner                 TEXT NOT NULL,
            intent_type           TEXT NOT NULL,
            workflow_template_id  TEXT NOT NULL,
            max_executions        INTEGER NOT NULL DEFAULT 0,
            current_executions    INTEGER NOT NULL DEFAULT 0,
            created_at            INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            revoked_at            INTEGER
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_contracts_active_tuple
            ON delegation_contracts (owner, intent_type, workflow_template_id)
            WHERE revoked_at IS NULL;

        -- Authorization ledger. One pre-flight insert per accepted gate call,
        -- one completion update (completed_at IS NULL guards exactly-once).
        CREATE TABLE IF NOT EXISTS effects (
            id              TEXT PRIMARY KEY NOT NULL,
            call_id         TEXT NOT NULL,
            agent           TEXT NOT NULL,
            tool            TEXT NOT NULL,
            scope           TEXT NOT NULL DEFAULT '',
            intent          TEXT NOT NULL DEFAULT '',
            confidence      REAL NOT NULL DEFAULT 0.0,
            verdict         TEXT NOT NULL
                            CHECK (verdict IN ('allow', 'require_human', 'deny')),
            reason          TEXT NOT NULL DEFAULT '',
            status          TEXT NOT NULL DEFAULT 'proposed'
                            CHECK (status IN ('proposed', 'executed', 'require_human', 'denied', 'failed')),
            created_at      INTEGER NOT NULL,
            completed_at    INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_effects_call
            ON effects (call_id);

        CREATE INDEX IF NOT EXISTS idx_effects_created
            ON effects (created_at DESC);

        -- Held artifacts awaiting human approval.
        CREATE TABLE IF NOT EXISTS proposals (
            id              TEXT PRIMARY KEY NOT NULL,
            effect_id       TEXT NOT NULL REFERENCES effects (id),
            tool            TEXT NOT NULL,
            summary         TEXT NOT NULL DEFAULT '',
            artifacts       TEXT NOT NULL DEFAULT '[]',
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            approved_at     INTEGER
        );

        -- Lineage edges: execution -> run -> trace -> downstream artifacts.
        CREATE TABLE IF NOT EXISTS artifact_links (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            from_type       TEXT NOT NULL,
            from_id         TEXT NOT NULL,
            relation        TEXT NOT NULL,
            to_type         TEXT NOT NULL,
            to_id           TEXT NOT NULL,
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_artifact_links_from
            ON artifact_links (from_type, from_id);
        ",
    )
    .map_err(|e| CompassError::Storage(format!("Migration v1 failed: {}", e)))?;

    conn.execute(
        "INSERT INTO schema_migrations (version, name) VALUES (1, 'initial_schema')",
        [],
    )
    .map_err(|e| CompassError::Storage(format!("Failed to record migration v1: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_create_all_tables() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables = [
            "executions",
            "execution_runs",
            "workflow_runs",
            "delegation_contracts",
            "effects",
            "proposals",
            "artifact_links",
        ];
        for table in tables {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {}", table);
        }
    }

    #[test]
    fn test_active_contract_tuple_is_unique() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO delegation_contracts (id, owner, intent_type, workflow_template_id)
             VALUES ('c1', 'u1', 'checkin', 'tpl')",
            [],
        )
        .unwrap();

        let dup = conn.execute(
            "INSERT INTO delegation_contracts (id, owner, intent_type, workflow_template_id)
             VALUES ('c2', 'u1', 'checkin', 'tpl')",
            [],
        );
        assert!(dup.is_err());

        // Revoking the first frees the tuple for a fresh grant.
        conn.execute(
            "UPDATE delegation_contracts SET revoked_at = strftime('%s','now') WHERE id = 'c1'",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO delegation_contracts (id, owner, intent_type, workflow_template_id)
             VALUES ('c3', 'u1', 'checkin', 'tpl')",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_execution_status_check_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let bad = conn.execute(
            "INSERT INTO executions (id, owner, kind, run_at, status)
             VALUES ('e1', 'u1', 'notify', 0, 'bogus')",
            [],
        );
        assert!(bad.is_err());
    }
}
