//! Wire types for gate calls and responses.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::executor::ToolOutcome;
use crate::registry::{Scope, ToolId};

/// Header fields of a gate call.
#[derive(Debug, Clone)]
pub struct GateHeaders {
    /// Shared-secret credential.
    pub credential: String,
    /// Agent identity making the call.
    pub agent: String,
    /// Space-separated scope set.
    pub scope: String,
    /// Single-use token.
    pub nonce: String,
    /// Unix seconds at call time.
    pub timestamp: i64,
}

/// Body of a gate call. Fields default to empty so validation happens in the
/// gate (with a distinct cause) rather than at deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateCallBody {
    /// Caller idempotency key.
    #[serde(default)]
    pub call_id: String,
    #[serde(default)]
    pub tool: String,
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub inputs: serde_json::Value,
}

/// A fully validated and authorized call, handed to the tool executor.
#[derive(Debug, Clone)]
pub struct AuthorizedCall {
    pub call_id: String,
    pub agent: String,
    pub tool: ToolId,
    pub intent: String,
    pub inputs: serde_json::Value,
    pub scopes: BTreeSet<Scope>,
}

/// Terminal status of a gate call as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateCallStatus {
    Executed,
    Proposed,
    Denied,
}

impl fmt::Display for GateCallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateCallStatus::Executed => write!(f, "executed"),
            GateCallStatus::Proposed => write!(f, "proposed"),
            GateCallStatus::Denied => write!(f, "denied"),
        }
    }
}

/// Structured response for every gate call.
///
/// `audit_ref` points at the effect ledger row; it is present whenever the
/// call got far enough to be recorded, including denials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateResponse {
    pub call_id: String,
    pub status: GateCallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposal_id: Option<Uuid>,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_ref: Option<Uuid>,
}
