//! Shared types and value objects for the Compass action core.
//!
//! Defines the persisted relations (executions, runs, workflows, delegation
//! contracts, effect ledger rows) and their supporting enumerations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// =============================================================================
// Time
// =============================================================================

/// Unix timestamp in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp())
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.0, 0).unwrap_or_default()
    }

    /// Seconds elapsed since this timestamp (zero if in the future).
    pub fn age_secs(&self) -> i64 {
        (Timestamp::now().0 - self.0).max(0)
    }
}

// =============================================================================
// Status enums
// =============================================================================

/// Execution lifecycle states.
///
/// Terminal states (`Succeeded`, `Failed`) are immutable once reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Queued,
    Claimed,
    Running,
    Succeeded,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Succeeded | ExecutionStatus::Failed)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Queued => write!(f, "queued"),
            ExecutionStatus::Claimed => write!(f, "claimed"),
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Succeeded => write!(f, "succeeded"),
            ExecutionStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(ExecutionStatus::Queued),
            "claimed" => Ok(ExecutionStatus::Claimed),
            "running" => Ok(ExecutionStatus::Running),
            "succeeded" => Ok(ExecutionStatus::Succeeded),
            "failed" => Ok(ExecutionStatus::Failed),
            _ => Err(format!("Unknown execution status: {}", s)),
        }
    }
}

/// Per-attempt run states. One `ExecutionRun` row exists per attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Succeeded => write!(f, "succeeded"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(format!("Unknown run status: {}", s)),
        }
    }
}

/// Workflow run lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Succeeded | WorkflowStatus::Failed)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowStatus::Queued => write!(f, "queued"),
            WorkflowStatus::Running => write!(f, "running"),
            WorkflowStatus::Succeeded => write!(f, "succeeded"),
            WorkflowStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(WorkflowStatus::Queued),
            "running" => Ok(WorkflowStatus::Running),
            "succeeded" => Ok(WorkflowStatus::Succeeded),
            "failed" => Ok(WorkflowStatus::Failed),
            _ => Err(format!("Unknown workflow status: {}", s)),
        }
    }
}

/// Risk classification of a workflow step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskClass {
    Low,
    #[default]
    Standard,
    High,
}

impl fmt::Display for RiskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskClass::Low => write!(f, "low"),
            RiskClass::Standard => write!(f, "standard"),
            RiskClass::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for RiskClass {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(RiskClass::Low),
            "standard" => Ok(RiskClass::Standard),
            "high" => Ok(RiskClass::High),
            _ => Err(format!("Unknown risk class: {}", s)),
        }
    }
}

/// Authorization verdict produced by the gate's confidence evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allow,
    RequireHuman,
    Deny,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Allow => write!(f, "allow"),
            Verdict::RequireHuman => write!(f, "require_human"),
            Verdict::Deny => write!(f, "deny"),
        }
    }
}

impl std::str::FromStr for Verdict {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(Verdict::Allow),
            "require_human" => Ok(Verdict::RequireHuman),
            "deny" => Ok(Verdict::Deny),
            _ => Err(format!("Unknown verdict: {}", s)),
        }
    }
}

/// Ledger status of an effect row.
///
/// Every row starts as `Proposed` (the pre-flight write) and receives exactly
/// one completion write moving it to one of the other states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectStatus {
    Proposed,
    Executed,
    RequireHuman,
    Denied,
    Failed,
}

impl fmt::Display for EffectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectStatus::Proposed => write!(f, "proposed"),
            EffectStatus::Executed => write!(f, "executed"),
            EffectStatus::RequireHuman => write!(f, "require_human"),
            EffectStatus::Denied => write!(f, "denied"),
            EffectStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for EffectStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proposed" => Ok(EffectStatus::Proposed),
            "executed" => Ok(EffectStatus::Executed),
            "require_human" => Ok(EffectStatus::RequireHuman),
            "denied" => Ok(EffectStatus::Denied),
            "failed" => Ok(EffectStatus::Failed),
            _ => Err(format!("Unknown effect status: {}", s)),
        }
    }
}

// =============================================================================
// Domain structs
// =============================================================================

/// A single unit of work on the execution queue.
///
/// Created by an external scheduler; mutated only by the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub owner: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub status: ExecutionStatus,
    pub priority: i64,
    pub run_at: Timestamp,
    pub next_retry_at: Option<Timestamp>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub created_at: Timestamp,
}

/// Parameters for enqueueing a new execution.
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub owner: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub priority: i64,
    pub run_at: Timestamp,
    pub max_attempts: u32,
}

impl NewExecution {
    /// A new execution due immediately with default priority.
    pub fn immediate(owner: impl Into<String>, kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            owner: owner.into(),
            kind: kind.into(),
            payload,
            priority: 0,
            run_at: Timestamp::now(),
            max_attempts: 3,
        }
    }
}

/// One attempt at an execution. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRun {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub attempt: u32,
    pub status: RunStatus,
    pub trace_id: Uuid,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: Timestamp,
    pub finished_at: Option<Timestamp>,
}

/// A planned workflow step. Immutable once the plan is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub step_id: String,
    pub executor_kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub risk: RiskClass,
    #[serde(default = "default_true")]
    pub mobile_allowed: bool,
}

fn default_true() -> bool {
    true
}

/// A multi-step workflow run, ticked incrementally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: Uuid,
    /// The run that triggered this workflow. Step events are recorded against
    /// this id so one observability stream aggregates the whole chain.
    pub parent_run_id: Uuid,
    pub owner: String,
    pub status: WorkflowStatus,
    pub plan: Vec<Step>,
    pub current_step_index: usize,
    /// Execution backing the in-flight step, if one has been started.
    pub current_execution_id: Option<Uuid>,
    pub created_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

/// A standing, bounded grant of autonomy for an (owner, intent, workflow)
/// tuple. Never physically deleted; revocation is one-way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationContract {
    pub id: Uuid,
    pub owner: String,
    pub intent_type: String,
    pub workflow_template_id: String,
    /// 0 means unlimited.
    pub max_executions: i64,
    pub current_executions: i64,
    pub created_at: Timestamp,
    pub revoked_at: Option<Timestamp>,
}

impl DelegationContract {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// True when the contract still has budget (or is unlimited).
    pub fn has_budget(&self) -> bool {
        self.max_executions <= 0 || self.current_executions < self.max_executions
    }
}

/// An audit-ledger row recording one authorization decision and its outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Effect {
    pub id: Uuid,
    /// Caller-supplied idempotency key.
    pub call_id: String,
    pub agent: String,
    pub tool: String,
    /// Space-joined scope set presented by the caller.
    pub scope: String,
    pub intent: String,
    pub confidence: f64,
    pub verdict: Verdict,
    pub reason: String,
    pub status: EffectStatus,
    pub created_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

/// A persisted, non-executing artifact held for human approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: Uuid,
    pub effect_id: Uuid,
    pub tool: String,
    pub summary: String,
    pub artifacts: serde_json::Value,
    pub created_at: Timestamp,
    pub approved_at: Option<Timestamp>,
}

/// A directed lineage edge between two entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactLink {
    pub from_type: String,
    pub from_id: String,
    pub relation: String,
    pub to_type: String,
    pub to_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_status_display_from_str_round_trip() {
        for variant in [
            ExecutionStatus::Queued,
            ExecutionStatus::Claimed,
            ExecutionStatus::Running,
            ExecutionStatus::Succeeded,
            ExecutionStatus::Failed,
        ] {
            let parsed: ExecutionStatus = variant.to_string().parse().unwrap();
            assert_eq!(variant, parsed);
        }
        assert!("invalid".parse::<ExecutionStatus>().is_err());
    }

    #[test]
    fn test_execution_status_terminal() {
        assert!(ExecutionStatus::Succeeded.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(!ExecutionStatus::Queued.is_terminal());
        assert!(!ExecutionStatus::Claimed.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
    }

    #[test]
    fn test_verdict_serde_json_format() {
        assert_eq!(
            serde_json::to_string(&Verdict::RequireHuman).unwrap(),
            "\"require_human\""
        );
        assert_eq!(serde_json::to_string(&Verdict::Allow).unwrap(), "\"allow\"");
        assert_eq!(
            "require_human".parse::<Verdict>().unwrap(),
            Verdict::RequireHuman
        );
    }

    #[test]
    fn test_effect_status_display_from_str_round_trip() {
        for variant in [
            EffectStatus::Proposed,
            EffectStatus::Executed,
            EffectStatus::RequireHuman,
            EffectStatus::Denied,
            EffectStatus::Failed,
        ] {
            let parsed: EffectStatus = variant.to_string().parse().unwrap();
            assert_eq!(variant, parsed);
        }
    }

    #[test]
    fn test_step_deserialize_defaults() {
        let json = r#"{"step_id": "s1", "executor_kind": "notify"}"#;
        let step: Step = serde_json::from_str(json).unwrap();
        assert_eq!(step.risk, RiskClass::Standard);
        assert!(step.mobile_allowed);
        assert!(step.payload.is_null());
    }

    #[test]
    fn test_contract_budget() {
        let mut contract = DelegationContract {
            id: Uuid::new_v4(),
            owner: "user-1".to_string(),
            intent_type: "weekly_checkin".to_string(),
            workflow_template_id: "tpl-checkin".to_string(),
            max_executions: 2,
            current_executions: 0,
            created_at: Timestamp::now(),
            revoked_at: None,
        };
        assert!(contract.has_budget());
        contract.current_executions = 2;
        assert!(!contract.has_budget());

        // 0 means unlimited.
        contract.max_executions = 0;
        assert!(contract.has_budget());
    }

    #[test]
    fn test_timestamp_age() {
        let past = Timestamp(Timestamp::now().0 - 120);
        assert!(past.age_secs() >= 120);
        let future = Timestamp(Timestamp::now().0 + 120);
        assert_eq!(future.age_secs(), 0);
    }

    #[test]
    fn test_new_execution_immediate_defaults() {
        let new = NewExecution::immediate("user-1", "notify", serde_json::json!({"m": 1}));
        assert_eq!(new.priority, 0);
        assert_eq!(new.max_attempts, 3);
        assert!(new.run_at.0 <= Timestamp::now().0);
    }

    #[test]
    fn test_workflow_run_serde_round_trip() {
        let run = WorkflowRun {
            id: Uuid::new_v4(),
            parent_run_id: Uuid::new_v4(),
            owner: "user-1".to_string(),
            status: WorkflowStatus::Running,
            plan: vec![Step {
                step_id: "s1".to_string(),
                executor_kind: "notify".to_string(),
                payload: serde_json::json!({"message": "hi"}),
                risk: RiskClass::Low,
                mobile_allowed: true,
            }],
            current_step_index: 0,
            current_execution_id: None,
            created_at: Timestamp::now(),
            completed_at: None,
        };
        let json = serde_json::to_string(&run).unwrap();
        let rt: WorkflowRun = serde_json::from_str(&json).unwrap();
        assert_eq!(rt.id, run.id);
        assert_eq!(rt.plan.len(), 1);
        assert_eq!(rt.plan[0].step_id, "s1");
        assert_eq!(rt.status, WorkflowStatus::Running);
    }
}
