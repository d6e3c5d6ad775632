//! Notification execution handler.
//!
//! Delivers an in-app notification to the owner. Delivery itself is a
//! collaborator concern; this handler validates the payload and records the
//! delivery intent.

use async_trait::async_trait;

use crate::error::ExecError;
use crate::handler::{ExecutionHandler, HandlerContext};

pub struct NotifyHandler;

#[async_trait]
impl ExecutionHandler for NotifyHandler {
    fn kind(&self) -> &str {
        "notify"
    }

    async fn execute(
        &self,
        ctx: &HandlerContext,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, ExecError> {
        let message = payload
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("");

        if message.is_empty() {
            return Err(ExecError::InvalidPayload(
                "Notification message must not be empty".to_string(),
            ));
        }

        tracing::info!(owner = %ctx.owner, trace_id = %ctx.trace_id, message = %message, "Notification queued");

        Ok(serde_json::json!({
            "delivered": true,
            "message": message,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

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
    async fn test_notify_valid_payload() {
        let handler = NotifyHandler;
        let payload = serde_json::json!({"message": "time for your evening review"});
        let output = handler.execute(&ctx(), &payload).await.unwrap();
        assert_eq!(output["delivered"], true);
        assert_eq!(output["message"], "time for your evening review");
    }

    #[tokio::test]
    async fn test_notify_empty_message() {
        let handler = NotifyHandler;
        let payload = serde_json::json!({"message": ""});
        let err = handler.execute(&ctx(), &payload).await.unwrap_err();
        assert!(matches!(err, ExecError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn test_notify_missing_message() {
        let handler = NotifyHandler;
        let payload = serde_json::json!({});
        let err = handler.execute(&ctx(), &payload).await.unwrap_err();
        assert!(matches!(err, ExecError::InvalidPayload(_)));
    }
}
