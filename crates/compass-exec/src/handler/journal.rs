//! Journal entry execution handler.
//!
//! Appends a structured entry to the owner's activity journal.

use async_trait::async_trait;

use crate::error::ExecError;
use crate::handler::{ExecutionHandler, HandlerContext};

pub struct JournalHandler;

#[async_trait]
impl ExecutionHandler for JournalHandler {
    fn kind(&self) -> &str {
        "journal_entry"
    }

    async fn execute(
        &self,
        ctx: &HandlerContext,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, ExecError> {
        let category = payload
            .get("category")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let body = payload.get("body").and_then(|v| v.as_str()).unwrap_or("");

        if category.is_empty() {
            return Err(ExecError::InvalidPayload(
                "Journal entry category must not be empty".to_string(),
            ));
        }

        tracing::info!(owner = %ctx.owner, trace_id = %ctx.trace_id, category = %category, "Journal entry recorded");

        Ok(serde_json::json!({
            "recorded": true,
            "category": category,
            "length": body.len(),
        }))
    }
}
