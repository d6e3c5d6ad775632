//! Gate-routed execution handler.
//!
//! Workflow steps that perform real external effects carry kind
//! `tool_call`; this handler routes them through the authorization gate so
//! every step-level effect gets the same validation, scoring, and ledger
//! treatment as an ad hoc call. This is the one component that sees both the
//! execution engine and the gate, which is why it lives in the composition
//! root.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use compass_core::types::Timestamp;
use compass_exec::{ExecError, ExecutionHandler, HandlerContext};
use compass_gate::{Gate, GateCallBody, GateCallStatus, GateHeaders};
use compass_storage::ArtifactRepository;

/// Agent identity the workflow engine presents to the gate.
const WORKFLOW_AGENT: &str = "compass-workflow";

pub struct ToolCallHandler {
    gate: Arc<Gate>,
    artifacts: Arc<ArtifactRepository>,
    credential: String,
}

impl ToolCallHandler {
    pub fn new(gate: Arc<Gate>, artifacts: Arc<ArtifactRepository>, credential: String) -> Self {
        Self {
            gate,
            artifacts,
            credential,
        }
    }
}

#[async_trait]
impl ExecutionHandler for ToolCallHandler {
    fn kind(&self) -> &str {
        "tool_call"
    }

    async fn execute(
        &self,
        ctx: &HandlerContext,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, ExecError> {
        let tool = payload.get("tool").and_then(|v| v.as_str()).unwrap_or("");
        let intent = payload.get("intent").and_then(|v| v.as_str()).unwrap_or("");
        let scope = payload.get("scope").and_then(|v| v.as_str()).unwrap_or("");
        let inputs = payload
            .get("inputs")
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        if tool.is_empty() || intent.is_empty() || scope.is_empty() {
            return Err(ExecError::InvalidPayload(
                "tool_call payload requires tool, intent, and scope".to_string(),
            ));
        }

        let headers = GateHeaders {
            credential: self.credential.clone(),
            agent: WORKFLOW_AGENT.to_string(),
            scope: scope.to_string(),
            nonce: Uuid::new_v4().to_string(),
            timestamp: Timestamp::now().0,
        };
        let body = GateCallBody {
            // The run id keys idempotency: one attempt, one gate call.
            call_id: ctx.run_id.to_string(),
            tool: tool.to_string(),
            intent: intent.to_string(),
            inputs,
        };

        let response = self
            .gate
            .handle_call(&headers, &body)
            .await
            .map_err(|e| ExecError::HandlerFailed(e.to_string()))?;

        if let Some(audit_ref) = response.audit_ref {
            self.artifacts
                .link(
                    "execution_run",
                    &ctx.run_id.to_string(),
                    "caused",
                    "effect",
                    &audit_ref.to_string(),
                )
                .map_err(ExecError::Storage)?;
        }

        match response.status {
            GateCallStatus::Executed | GateCallStatus::Proposed => {
                serde_json::to_value(&response)
                    .map_err(|e| ExecError::HandlerFailed(e.to_string()))
            }
            GateCallStatus::Denied => Err(ExecError::HandlerFailed(format!(
                "gate denied tool call: {}",
                response.reason.unwrap_or_else(|| "no reason".to_string())
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compass_core::config::GateConfig;
    use compass_gate::{InMemoryReplayGuard, NullExecutor, ToolRegistry};
    use compass_storage::{Database, EffectRepository};
    use tokio::sync::broadcast;

    const CREDENTIAL: &str = "internal-credential";

    fn make_handler() -> (ToolCallHandler, Arc<Database>) {
        let db = Arc::new(Database::in_memory().unwrap());
        let (events, _) = broadcast::channel(64);
        let gate = Arc::new(Gate::new(
            Arc::clone(&db),
            CREDENTIAL.to_string(),
            GateConfig::default(),
            ToolRegistry::builtin().unwrap(),
            Arc::new(InMemoryReplayGuard::new(600)),
            Arc::new(NullExecutor),
            events,
        ));
        let artifacts = Arc::new(ArtifactRepository::new(Arc::clone(&db)));
        (
            ToolCallHandler::new(gate, artifacts, CREDENTIAL.to_string()),
            db,
        )
    }

    fn ctx() -> HandlerContext {
        HandlerContext {
            execution_id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            owner: "user-1".to_string(),
            trace_id: Uuid::new_v4(),
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn test_step_effect_goes_through_gate() {
        let (handler, db) = make_handler();
        let ctx = ctx();
        let payload = serde_json::json!({
            "tool": "send_message",
            "intent": "send the evening check-in message to Sam",
            "scope": "messages:send",
            "inputs": {"recipient": "sam", "body": "how did today go?"},
        });

        let output = handler.execute(&ctx, &payload).await.unwrap();
        assert_eq!(output["status"], "executed");

        // The decision landed in the ledger, keyed by the run id.
        let effects = EffectRepository::new(Arc::clone(&db))
            .list_for_call(&ctx.run_id.to_string())
            .unwrap();
        assert_eq!(effects.len(), 1);

        // Lineage: run -> effect.
        let links = ArtifactRepository::new(db)
            .links_from("execution_run", &ctx.run_id.to_string())
            .unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].relation, "caused");
        assert_eq!(links[0].to_id, effects[0].id.to_string());
    }

    #[tokio::test]
    async fn test_denied_tool_call_fails_the_step() {
        let (handler, _db) = make_handler();
        let payload = serde_json::json!({
            "tool": "send_message",
            "intent": "send a message",
            "scope": "messages:send",
            // Missing body: the gate denies on confidence.
            "inputs": {"recipient": "sam"},
        });

        let err = handler.execute(&ctx(), &payload).await.unwrap_err();
        assert!(err.to_string().contains("gate denied"));
    }

    #[tokio::test]
    async fn test_incomplete_payload_rejected() {
        let (handler, _db) = make_handler();
        let payload = serde_json::json!({"tool": "send_message"});
        let err = handler.execute(&ctx(), &payload).await.unwrap_err();
        assert!(matches!(err, ExecError::InvalidPayload(_)));
    }
}
