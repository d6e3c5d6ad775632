//! Repositories for the authorization ledger: delegation contracts, effect
//! rows, held proposals, and artifact lineage links.

use std::sync::Arc;

use rusqlite::OptionalExtension;
use uuid::Uuid;

use compass_core::error::CompassError;
use compass_core::types::{
    ArtifactLink, DelegationContract, Effect, EffectStatus, Proposal, Timestamp, Verdict,
};

use crate::db::Database;
use crate::repository::{parse_json, parse_uuid, storage_err};

// =============================================================================
// Delegation contracts
// =============================================================================

/// Repository for standing delegation grants.
pub struct ContractRepository {
    db: Arc<Database>,
}

impl ContractRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Grant a new contract for the (owner, intent, workflow template) tuple.
    ///
    /// Fails if an active contract already exists for the tuple; the caller
    /// must revoke first.
    pub fn grant(
        &self,
        owner: &str,
        intent_type: &str,
        workflow_template_id: &str,
        max_executions: i64,
    ) -> Result<DelegationContract, CompassError> {
        let contract = DelegationContract {
            id: Uuid::new_v4(),
            owner: owner.to_string(),
            intent_type: intent_type.to_string(),
            workflow_template_id: workflow_template_id.to_string(),
            max_executions,
            current_executions: 0,
            created_at: Timestamp::now(),
            revoked_at: None,
        };

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO delegation_contracts
                 (id, owner, intent_type, workflow_template_id, max_executions, current_executions, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
                rusqlite::params![
                    contract.id.to_string(),
                    contract.owner,
                    contract.intent_type,
                    contract.workflow_template_id,
                    contract.max_executions,
                    contract.created_at.0,
                ],
            )
            .map_err(|e| CompassError::Storage(format!("Failed to grant contract: {}", e)))?;
            Ok(())
        })?;

        Ok(contract)
    }

    pub fn get(&self, id: Uuid) -> Result<Option<DelegationContract>, CompassError> {
        self.db.with_conn(|conn| {
            let result = conn
                .query_row(
                    "SELECT id, owner, intent_type, workflow_template_id, max_executions,
                            current_executions, created_at, revoked_at
                     FROM delegation_contracts WHERE id = ?1",
                    rusqlite::params![id.to_string()],
                    |row| Ok(row_to_contract(row)),
                )
                .optional()
                .map_err(storage_err)?;
            match result {
                Some(contract) => Ok(Some(contract?)),
                None => Ok(None),
            }
        })
    }

    /// The unique non-revoked contract for the tuple, if any.
    pub fn find_active(
        &self,
        owner: &str,
        intent_type: &str,
        workflow_template_id: &str,
    ) -> Result<Option<DelegationContract>, CompassError> {
        self.db.with_conn(|conn| {
            let result = conn
                .query_row(
                    "SELECT id, owner, intent_type, workflow_template_id, max_executions,
                            current_executions, created_at, revoked_at
                     FROM delegation_contracts
                     WHERE owner = ?1 AND intent_type = ?2 AND workflow_template_id = ?3
                       AND revoked_at IS NULL",
                    rusqlite::params![owner, intent_type, workflow_template_id],
                    |row| Ok(row_to_contract(row)),
                )
                .optional()
                .map_err(storage_err)?;
            match result {
                Some(contract) => Ok(Some(contract?)),
                None => Ok(None),
            }
        })
    }

    /// Revoke a contract. One-way; returns `false` if already revoked.
    pub fn revoke(&self, id: Uuid) -> Result<bool, CompassError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE delegation_contracts SET revoked_at = ?2
                     WHERE id = ?1 AND revoked_at IS NULL",
                    rusqlite::params![id.to_string(), Timestamp::now().0],
                )
                .map_err(storage_err)?;
            Ok(changed == 1)
        })
    }

    /// Atomically charge one execution against the contract's budget.
    ///
    /// The increment and the budget predicate are a single UPDATE, so
    /// concurrent recorders cannot push `current_executions` past
    /// `max_executions`. Returns `false` when the budget is exhausted or the
    /// contract is revoked.
    pub fn record_usage(&self, id: Uuid) -> Result<bool, CompassError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE delegation_contracts
                     SET current_executions = current_executions + 1
                     WHERE id = ?1 AND revoked_at IS NULL
                       AND (max_executions <= 0 OR current_executions < max_executions)",
                    rusqlite::params![id.to_string()],
                )
                .map_err(storage_err)?;
            Ok(changed == 1)
        })
    }

    /// All contracts ever granted to an owner, newest first. Includes revoked
    /// rows: the grant history is the audit trail.
    pub fn list_for_owner(&self, owner: &str) -> Result<Vec<DelegationContract>, CompassError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, owner, intent_type, workflow_template_id, max_executions,
                            current_executions, created_at, revoked_at
                     FROM delegation_contracts WHERE owner = ?1
                     ORDER BY created_at DESC",
                )
                .map_err(storage_err)?;
            let rows = stmt
                .query_map(rusqlite::params![owner], |row| Ok(row_to_contract(row)))
                .map_err(storage_err)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(storage_err)??);
            }
            Ok(out)
        })
    }
}

fn row_to_contract(row: &rusqlite::Row<'_>) -> Result<DelegationContract, CompassError> {
    let id: String = row.get(0).map_err(storage_err)?;
    let owner: String = row.get(1).map_err(storage_err)?;
    let intent_type: String = row.get(2).map_err(storage_err)?;
    let workflow_template_id: String = row.get(3).map_err(storage_err)?;
    let max_executions: i64 = row.get(4).map_err(storage_err)?;
    let current_executions: i64 = row.get(5).map_err(storage_err)?;
    let created_at: i64 = row.get(6).map_err(storage_err)?;
    let revoked_at: Option<i64> = row.get(7).map_err(storage_err)?;

    Ok(DelegationContract {
        id: parse_uuid(&id, "contract")?,
        owner,
        intent_type,
        workflow_template_id,
        max_executions,
        current_executions,
        created_at: Timestamp(created_at),
        revoked_at: revoked_at.map(Timestamp),
    })
}

// =============================================================================
// Effects
// =============================================================================

/// Repository for authorization effect rows.
pub struct EffectRepository {
    db: Arc<Database>,
}

impl EffectRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// The pre-flight ledger write. Must happen before any execution attempt.
    pub fn create(&self, effect: &Effect) -> Result<(), CompassError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO effects
                 (id, call_id, agent, tool, scope, intent, confidence, verdict, reason, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                rusqlite::params![
                    effect.id.to_string(),
                    effect.call_id,
                    effect.agent,
                    effect.tool,
                    effect.scope,
                    effect.intent,
                    effect.confidence,
                    effect.verdict.to_string(),
                    effect.reason,
                    effect.status.to_string(),
                    effect.created_at.0,
                ],
            )
            .map_err(|e| CompassError::Storage(format!("Failed to record effect: {}", e)))?;
            Ok(())
        })
    }

    /// The completion write. The `completed_at IS NULL` filter guarantees at
    /// most one completion per effect; returns `false` if already completed.
    pub fn complete(&self, id: Uuid, status: EffectStatus) -> Result<bool, CompassError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE effects SET status = ?2, completed_at = ?3
                     WHERE id = ?1 AND completed_at IS NULL",
                    rusqlite::params![id.to_string(), status.to_string(), Timestamp::now().0],
                )
                .map_err(storage_err)?;
            Ok(changed == 1)
        })
    }

    pub fn get(&self, id: Uuid) -> Result<Option<Effect>, CompassError> {
        self.db.with_conn(|conn| {
            let result = conn
                .query_row(
                    "SELECT id, call_id, agent, tool, scope, intent, confidence, verdict,
                            reason, status, created_at, completed_at
                     FROM effects WHERE id = ?1",
                    rusqlite::params![id.to_string()],
                    |row| Ok(row_to_effect(row)),
                )
                .optional()
                .map_err(storage_err)?;
            match result {
                Some(effect) => Ok(Some(effect?)),
                None => Ok(None),
            }
        })
    }

    /// Newest effects first.
    pub fn list(&self, limit: u32) -> Result<Vec<Effect>, CompassError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, call_id, agent, tool, scope, intent, confidence, verdict,
                            reason, status, created_at, completed_at
                     FROM effects ORDER BY created_at DESC, id DESC LIMIT ?1",
                )
                .map_err(storage_err)?;
            let rows = stmt
                .query_map(rusqlite::params![limit], |row| Ok(row_to_effect(row)))
                .map_err(storage_err)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(storage_err)??);
            }
            Ok(out)
        })
    }

    /// All effects recorded for a caller idempotency key.
    pub fn list_for_call(&self, call_id: &str) -> Result<Vec<Effect>, CompassError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, call_id, agent, tool, scope, intent, confidence, verdict,
                            reason, status, created_at, completed_at
                     FROM effects WHERE call_id = ?1 ORDER BY created_at ASC",
                )
                .map_err(storage_err)?;
            let rows = stmt
                .query_map(rusqlite::params![call_id], |row| Ok(row_to_effect(row)))
                .map_err(storage_err)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(storage_err)??);
            }
            Ok(out)
        })
    }
}

fn row_to_effect(row: &rusqlite::Row<'_>) -> Result<Effect, CompassError> {
    let id: String = row.get(0).map_err(storage_err)?;
    let call_id: String = row.get(1).map_err(storage_err)?;
    let agent: String = row.get(2).map_err(storage_err)?;
    let tool: String = row.get(3).map_err(storage_err)?;
    let scope: String = row.get(4).map_err(storage_err)?;
    let intent: String = row.get(5).map_err(storage_err)?;
    let confidence: f64 = row.get(6).map_err(storage_err)?;
    let verdict: String = row.get(7).map_err(storage_err)?;
    let reason: String = row.get(8).map_err(storage_err)?;
    let status: String = row.get(9).map_err(storage_err)?;
    let created_at: i64 = row.get(10).map_err(storage_err)?;
    let completed_at: Option<i64> = row.get(11).map_err(storage_err)?;

    Ok(Effect {
        id: parse_uuid(&id, "effect")?,
        call_id,
        agent,
        tool,
        scope,
        intent,
        confidence,
        verdict: verdict.parse::<Verdict>().map_err(CompassError::Storage)?,
        reason,
        status: status.parse::<EffectStatus>().map_err(CompassError::Storage)?,
        created_at: Timestamp(created_at),
        completed_at: completed_at.map(Timestamp),
    })
}

// =============================================================================
// Proposals
// =============================================================================

/// Repository for held proposals awaiting human approval.
pub struct ProposalRepository {
    db: Arc<Database>,
}

impl ProposalRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn create(
        &self,
        effect_id: Uuid,
        tool: &str,
        summary: &str,
        artifacts: &serde_json::Value,
    ) -> Result<Proposal, CompassError> {
        let proposal = Proposal {
            id: Uuid::new_v4(),
            effect_id,
            tool: tool.to_string(),
            summary: summary.to_string(),
            artifacts: artifacts.clone(),
            created_at: Timestamp::now(),
            approved_at: None,
        };

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO proposals (id, effect_id, tool, summary, artifacts, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    proposal.id.to_string(),
                    effect_id.to_string(),
                    proposal.tool,
                    proposal.summary,
                    proposal.artifacts.to_string(),
                    proposal.created_at.0,
                ],
            )
            .map_err(|e| CompassError::Storage(format!("Failed to create proposal: {}", e)))?;
            Ok(())
        })?;

        Ok(proposal)
    }

    pub fn get(&self, id: Uuid) -> Result<Option<Proposal>, CompassError> {
        self.db.with_conn(|conn| {
            let result = conn
                .query_row(
                    "SELECT id, effect_id, tool, summary, artifacts, created_at, approved_at
                     FROM proposals WHERE id = ?1",
                    rusqlite::params![id.to_string()],
                    |row| Ok(row_to_proposal(row)),
                )
                .optional()
                .map_err(storage_err)?;
            match result {
                Some(proposal) => Ok(Some(proposal?)),
                None => Ok(None),
            }
        })
    }

    /// Proposals still awaiting approval, oldest first.
    pub fn list_pending(&self, limit: u32) -> Result<Vec<Proposal>, CompassError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, effect_id, tool, summary, artifacts, created_at, approved_at
                     FROM proposals WHERE approved_at IS NULL
                     ORDER BY created_at ASC LIMIT ?1",
                )
                .map_err(storage_err)?;
            let rows = stmt
                .query_map(rusqlite::params![limit], |row| Ok(row_to_proposal(row)))
                .map_err(storage_err)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(storage_err)??);
            }
            Ok(out)
        })
    }

    /// Mark a proposal approved. Returns `false` if already approved.
    pub fn approve(&self, id: Uuid) -> Result<bool, CompassError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE proposals SET approved_at = ?2
                     WHERE id = ?1 AND approved_at IS NULL",
                    rusqlite::params![id.to_string(), Timestamp::now().0],
                )
                .map_err(storage_err)?;
            Ok(changed == 1)
        })
    }
}

fn row_to_proposal(row: &rusqlite::Row<'_>) -> Result<Proposal, CompassError> {
    let id: String = row.get(0).map_err(storage_err)?;
    let effect_id: String = row.get(1).map_err(storage_err)?;
    let tool: String = row.get(2).map_err(storage_err)?;
    let summary: String = row.get(3).map_err(storage_err)?;
    let artifacts: String = row.get(4).map_err(storage_err)?;
    let created_at: i64 = row.get(5).map_err(storage_err)?;
    let approved_at: Option<i64> = row.get(6).map_err(storage_err)?;

    Ok(Proposal {
        id: parse_uuid(&id, "proposal")?,
        effect_id: parse_uuid(&effect_id, "effect")?,
        tool,
        summary,
        artifacts: parse_json(&artifacts, "artifacts")?,
        created_at: Timestamp(created_at),
        approved_at: approved_at.map(Timestamp),
    })
}

// =============================================================================
// Artifact links
// =============================================================================

/// Repository for directed lineage edges between entities.
pub struct ArtifactRepository {
    db: Arc<Database>,
}

impl ArtifactRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn link(
        &self,
        from_type: &str,
        from_id: &str,
        relation: &str,
        to_type: &str,
        to_id: &str,
    ) -> Result<(), CompassError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO artifact_links (from_type, from_id, relation, to_type, to_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![from_type, from_id, relation, to_type, to_id, Timestamp::now().0],
            )
            .map_err(|e| CompassError::Storage(format!("Failed to link artifacts: {}", e)))?;
            Ok(())
        })
    }

    /// Outgoing edges from an entity, in insertion order.
    pub fn links_from(&self, from_type: &str, from_id: &str) -> Result<Vec<ArtifactLink>, CompassError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT from_type, from_id, relation, to_type, to_id
                     FROM artifact_links WHERE from_type = ?1 AND from_id = ?2
                     ORDER BY id ASC",
                )
                .map_err(storage_err)?;
            let rows = stmt
                .query_map(rusqlite::params![from_type, from_id], |row| {
                    Ok(ArtifactLink {
                        from_type: row.get(0)?,
                        from_id: row.get(1)?,
                        relation: row.get(2)?,
                        to_type: row.get(3)?,
                        to_id: row.get(4)?,
                    })
                })
                .map_err(storage_err)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(storage_err)?);
            }
            Ok(out)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contracts() -> ContractRepository {
        ContractRepository::new(Arc::new(Database::in_memory().unwrap()))
    }

    #[test]
    fn test_grant_find_revoke() {
        let repo = contracts();
        let contract = repo.grant("user-1", "weekly_checkin", "tpl-1", 3).unwrap();

        let active = repo.find_active("user-1", "weekly_checkin", "tpl-1").unwrap();
        assert_eq!(active.unwrap().id, contract.id);

        assert!(repo.revoke(contract.id).unwrap());
        assert!(repo.find_active("user-1", "weekly_checkin", "tpl-1").unwrap().is_none());
        // Revocation is one-way.
        assert!(!repo.revoke(contract.id).unwrap());
    }

    #[test]
    fn test_duplicate_active_grant_rejected() {
        let repo = contracts();
        repo.grant("user-1", "weekly_checkin", "tpl-1", 3).unwrap();
        assert!(repo.grant("user-1", "weekly_checkin", "tpl-1", 5).is_err());
    }

    #[test]
    fn test_record_usage_respects_budget() {
        let repo = contracts();
        let contract = repo.grant("user-1", "weekly_checkin", "tpl-1", 2).unwrap();

        assert!(repo.record_usage(contract.id).unwrap());
        assert!(repo.record_usage(contract.id).unwrap());
        // Budget exhausted; the guarded increment refuses.
        assert!(!repo.record_usage(contract.id).unwrap());

        let fetched = repo.get(contract.id).unwrap().unwrap();
        assert_eq!(fetched.current_executions, 2);
    }

    #[test]
    fn test_record_usage_unlimited() {
        let repo = contracts();
        let contract = repo.grant("user-1", "daily_log", "tpl-2", 0).unwrap();
        for _ in 0..10 {
            assert!(repo.record_usage(contract.id).unwrap());
        }
    }

    #[test]
    fn test_record_usage_revoked_contract() {
        let repo = contracts();
        let contract = repo.grant("user-1", "daily_log", "tpl-2", 0).unwrap();
        repo.revoke(contract.id).unwrap();
        assert!(!repo.record_usage(contract.id).unwrap());
    }

    #[test]
    fn test_effect_single_completion() {
        let db = Arc::new(Database::in_memory().unwrap());
        let repo = EffectRepository::new(db);

        let effect = Effect {
            id: Uuid::new_v4(),
            call_id: "call-1".to_string(),
            agent: "coach".to_string(),
            tool: "send_message".to_string(),
            scope: "messages:send".to_string(),
            intent: "send a check-in".to_string(),
            confidence: 0.9,
            verdict: Verdict::Allow,
            reason: "all inputs present".to_string(),
            status: EffectStatus::Proposed,
            created_at: Timestamp::now(),
            completed_at: None,
        };
        repo.create(&effect).unwrap();

        assert!(repo.complete(effect.id, EffectStatus::Executed).unwrap());
        // Exactly one completion write.
        assert!(!repo.complete(effect.id, EffectStatus::Failed).unwrap());

        let fetched = repo.get(effect.id).unwrap().unwrap();
        assert_eq!(fetched.status, EffectStatus::Executed);
        assert!(fetched.completed_at.is_some());
    }

    #[test]
    fn test_proposal_lifecycle() {
        let db = Arc::new(Database::in_memory().unwrap());
        let effects = EffectRepository::new(Arc::clone(&db));
        let proposals = ProposalRepository::new(db);

        let effect = Effect {
            id: Uuid::new_v4(),
            call_id: "call-2".to_string(),
            agent: "coach".to_string(),
            tool: "draft_email".to_string(),
            scope: "email:draft".to_string(),
            intent: "draft outreach".to_string(),
            confidence: 0.6,
            verdict: Verdict::RequireHuman,
            reason: "middle band".to_string(),
            status: EffectStatus::Proposed,
            created_at: Timestamp::now(),
            completed_at: None,
        };
        effects.create(&effect).unwrap();

        let proposal = proposals
            .create(effect.id, "draft_email", "Draft for Sam", &serde_json::json!([{"kind": "email"}]))
            .unwrap();

        let pending = proposals.list_pending(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, proposal.id);

        assert!(proposals.approve(proposal.id).unwrap());
        assert!(!proposals.approve(proposal.id).unwrap());
        assert!(proposals.list_pending(10).unwrap().is_empty());
    }

    #[test]
    fn test_artifact_links() {
        let db = Arc::new(Database::in_memory().unwrap());
        let repo = ArtifactRepository::new(db);

        repo.link("execution", "e1", "spawned", "execution_run", "r1").unwrap();
        repo.link("execution_run", "r1", "has_trace", "trace", "t1").unwrap();

        let links = repo.links_from("execution", "e1").unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].relation, "spawned");
        assert_eq!(links[0].to_id, "r1");

        let links = repo.links_from("execution_run", "r1").unwrap();
        assert_eq!(links[0].relation, "has_trace");
    }
}
