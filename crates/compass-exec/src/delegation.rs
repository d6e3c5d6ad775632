//! Delegation contract gate.
//!
//! Answers "does a standing, bounded grant of autonomy exist for this
//! (owner, intent, workflow) tuple?" with a three-way decision. `Escalate`
//! is distinct from `Deny`: it signals "budget exhausted, needs a fresh
//! grant," not "never authorized."

use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use compass_core::events::DomainEvent;
use compass_core::types::{DelegationContract, Timestamp};
use compass_storage::{ContractRepository, Database};

use crate::error::DelegationError;

/// Decision from a delegation check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegationDecision {
    Allow { contract_id: Uuid },
    Deny { reason: String },
    Escalate { reason: String },
}

/// Gate over standing delegation contracts.
pub struct DelegationGate {
    contracts: ContractRepository,
    events: broadcast::Sender<DomainEvent>,
}

impl DelegationGate {
    pub fn new(db: Arc<Database>, events: broadcast::Sender<DomainEvent>) -> Self {
        Self {
            contracts: ContractRepository::new(db),
            events,
        }
    }

    /// Check whether a standing grant covers the tuple.
    pub fn check_delegation(
        &self,
        owner: &str,
        intent_type: &str,
        workflow_template_id: &str,
    ) -> Result<DelegationDecision, DelegationError> {
        let contract = self
            .contracts
            .find_active(owner, intent_type, workflow_template_id)?;

        let decision = match contract {
            None => DelegationDecision::Deny {
                reason: format!(
                    "no active delegation contract for ({}, {}, {})",
                    owner, intent_type, workflow_template_id
                ),
            },
            Some(contract) if contract.has_budget() => DelegationDecision::Allow {
                contract_id: contract.id,
            },
            Some(contract) => DelegationDecision::Escalate {
                reason: format!(
                    "delegation budget exhausted ({}/{}); a fresh grant is required",
                    contract.current_executions, contract.max_executions
                ),
            },
        };

        tracing::debug!(
            owner = %owner,
            intent_type = %intent_type,
            workflow_template_id = %workflow_template_id,
            decision = ?decision_label(&decision),
            "delegation checked"
        );

        Ok(decision)
    }

    /// Charge one execution against a contract's budget.
    ///
    /// Must be called only after an execution has actually run under the
    /// contract, never speculatively. The increment is a single guarded
    /// UPDATE, so concurrent recorders cannot exceed the budget.
    pub fn record_usage(&self, contract_id: Uuid) -> Result<(), DelegationError> {
        if self.contracts.record_usage(contract_id)? {
            return Ok(());
        }

        // Distinguish the refusal cause for the caller.
        match self.contracts.get(contract_id)? {
            None => Err(DelegationError::NotFound(contract_id)),
            Some(contract) if contract.is_revoked() => {
                Err(DelegationError::AlreadyRevoked(contract_id))
            }
            Some(_) => Err(DelegationError::BudgetExhausted(contract_id)),
        }
    }

    /// Grant a fresh contract for the tuple.
    pub fn grant(
        &self,
        owner: &str,
        intent_type: &str,
        workflow_template_id: &str,
        max_executions: i64,
    ) -> Result<DelegationContract, DelegationError> {
        if self
            .contracts
            .find_active(owner, intent_type, workflow_template_id)?
            .is_some()
        {
            return Err(DelegationError::DuplicateGrant {
                owner: owner.to_string(),
                intent_type: intent_type.to_string(),
                workflow_template_id: workflow_template_id.to_string(),
            });
        }

        let contract = self
            .contracts
            .grant(owner, intent_type, workflow_template_id, max_executions)?;

        tracing::info!(
            contract_id = %contract.id,
            owner = %owner,
            intent_type = %intent_type,
            max_executions,
            "delegation granted"
        );
        let _ = self.events.send(DomainEvent::ContractGranted {
            contract_id: contract.id,
            owner: owner.to_string(),
            intent_type: intent_type.to_string(),
            timestamp: Timestamp::now(),
        });

        Ok(contract)
    }

    /// Revoke a contract. One-way: a revoked contract can never be
    /// un-revoked; a new contract must be created, preserving the full audit
    /// history of grants.
    pub fn revoke(&self, contract_id: Uuid) -> Result<(), DelegationError> {
        if self.contracts.revoke(contract_id)? {
            tracing::info!(contract_id = %contract_id, "delegation revoked");
            let _ = self.events.send(DomainEvent::ContractRevoked {
                contract_id,
                timestamp: Timestamp::now(),
            });
            return Ok(());
        }

        match self.contracts.get(contract_id)? {
            None => Err(DelegationError::NotFound(contract_id)),
            Some(_) => Err(DelegationError::AlreadyRevoked(contract_id)),
        }
    }

    pub fn list_for_owner(&self, owner: &str) -> Result<Vec<DelegationContract>, DelegationError> {
        Ok(self.contracts.list_for_owner(owner)?)
    }
}

fn decision_label(decision: &DelegationDecision) -> &'static str {
    match decision {
        DelegationDecision::Allow { .. } => "allow",
        DelegationDecision::Deny { .. } => "deny",
        DelegationDecision::Escalate { .. } => "escalate",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> DelegationGate {
        let db = Arc::new(Database::in_memory().unwrap());
        let (events, _) = broadcast::channel(16);
        DelegationGate::new(db, events)
    }

    #[test]
    fn test_no_contract_denies() {
        let gate = gate();
        let decision = gate.check_delegation("user-1", "checkin", "tpl").unwrap();
        assert!(matches!(decision, DelegationDecision::Deny { .. }));
    }

    #[test]
    fn test_grant_then_allow() {
        let gate = gate();
        let contract = gate.grant("user-1", "checkin", "tpl", 3).unwrap();
        let decision = gate.check_delegation("user-1", "checkin", "tpl").unwrap();
        assert_eq!(
            decision,
            DelegationDecision::Allow {
                contract_id: contract.id
            }
        );
    }

    #[test]
    fn test_unlimited_contract_always_allows() {
        let gate = gate();
        let contract = gate.grant("user-1", "daily_log", "tpl", 0).unwrap();
        for _ in 0..5 {
            gate.record_usage(contract.id).unwrap();
        }
        let decision = gate.check_delegation("user-1", "daily_log", "tpl").unwrap();
        assert!(matches!(decision, DelegationDecision::Allow { .. }));
    }

    #[test]
    fn test_exhausted_budget_escalates() {
        let gate = gate();
        let contract = gate.grant("user-1", "checkin", "tpl", 1).unwrap();

        // First check allows, usage is recorded after the execution ran.
        assert!(matches!(
            gate.check_delegation("user-1", "checkin", "tpl").unwrap(),
            DelegationDecision::Allow { .. }
        ));
        gate.record_usage(contract.id).unwrap();

        // Second check escalates rather than denying.
        let decision = gate.check_delegation("user-1", "checkin", "tpl").unwrap();
        assert!(matches!(decision, DelegationDecision::Escalate { .. }));

        // Recording past the budget is refused.
        let err = gate.record_usage(contract.id).unwrap_err();
        assert!(matches!(err, DelegationError::BudgetExhausted(_)));
    }

    #[test]
    fn test_revoked_contract_denies_regardless_of_budget() {
        let gate = gate();
        let contract = gate.grant("user-1", "checkin", "tpl", 10).unwrap();
        gate.revoke(contract.id).unwrap();

        let decision = gate.check_delegation("user-1", "checkin", "tpl").unwrap();
        assert!(matches!(decision, DelegationDecision::Deny { .. }));

        let err = gate.record_usage(contract.id).unwrap_err();
        assert!(matches!(err, DelegationError::AlreadyRevoked(_)));
    }

    #[test]
    fn test_revoke_is_one_way() {
        let gate = gate();
        let contract = gate.grant("user-1", "checkin", "tpl", 10).unwrap();
        gate.revoke(contract.id).unwrap();
        let err = gate.revoke(contract.id).unwrap_err();
        assert!(matches!(err, DelegationError::AlreadyRevoked(_)));
    }

    #[test]
    fn test_fresh_grant_after_revocation_keeps_history() {
        let gate = gate();
        let first = gate.grant("user-1", "checkin", "tpl", 1).unwrap();
        // A second active grant for the same tuple is rejected.
        assert!(matches!(
            gate.grant("user-1", "checkin", "tpl", 5).unwrap_err(),
            DelegationError::DuplicateGrant { .. }
        ));

        gate.revoke(first.id).unwrap();
        let second = gate.grant("user-1", "checkin", "tpl", 5).unwrap();
        assert_ne!(first.id, second.id);

        let history = gate.list_for_owner("user-1").unwrap();
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_record_usage_unknown_contract() {
        let gate = gate();
        let err = gate.record_usage(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, DelegationError::NotFound(_)));
    }
}
