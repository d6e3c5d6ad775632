//! Tool executor seam.
//!
//! The gate authorizes; an executor performs. Real executors talk to
//! telephony, email, calendar, or CRM providers and are collaborators of
//! this crate. `Preview` mode must be side-effect-free: it produces only a
//! summary and artifacts for a held proposal.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GateError;
use crate::types::AuthorizedCall;

/// Whether a tool runs for real or only renders what it would do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Live,
    Preview,
}

/// What a tool execution produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub summary: String,
    pub artifacts: serde_json::Value,
}

/// Executes validated, authorized tool calls.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        call: &AuthorizedCall,
        mode: ExecutionMode,
    ) -> Result<ToolOutcome, GateError>;
}

/// Executor that performs no external effects; it renders a summary of what
/// would happen. Used as the default wiring until real providers are
/// attached, and in tests.
pub struct NullExecutor;

#[async_trait]
impl ToolExecutor for NullExecutor {
    async fn execute(
        &self,
        call: &AuthorizedCall,
        mode: ExecutionMode,
    ) -> Result<ToolOutcome, GateError> {
        let verb = match mode {
            ExecutionMode::Live => "executed",
            ExecutionMode::Preview => "previewed",
        };
        tracing::info!(tool = %call.tool, agent = %call.agent, mode = ?mode, "tool call dispatched");
        Ok(ToolOutcome {
            summary: format!("{} {} for {}", verb, call.tool, call.agent),
            artifacts: serde_json::json!([{
                "kind": "tool_call",
                "tool": call.tool.to_string(),
                "mode": verb,
            }]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Scope, ToolId};
    use std::collections::BTreeSet;

    #[tokio::test]
    async fn test_null_executor_preview() {
        let call = AuthorizedCall {
            call_id: "c1".to_string(),
            agent: "coach".to_string(),
            tool: ToolId::DraftEmail,
            intent: "draft a reply".to_string(),
            inputs: serde_json::json!({"recipient": "sam", "subject": "hi"}),
            scopes: BTreeSet::from([Scope::EmailDraft]),
        };
        let outcome = NullExecutor
            .execute(&call, ExecutionMode::Preview)
            .await
            .unwrap();
        assert!(outcome.summary.contains("previewed"));
        assert_eq!(outcome.artifacts[0]["tool"], "draft_email");
    }
}
