//! Route handler functions for all API endpoints.
//!
//! Each handler extracts parameters via axum extractors, interacts with the
//! AppState services, and returns JSON responses.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use compass_core::types::{Effect, Proposal, WorkflowRun};
use compass_gate::{GateCallBody, GateCallStatus, GateHeaders, ToolListing};

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Request / response types
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct TriggerRequest {
    pub owner: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub ok: bool,
    pub ran: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub succeeded: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TickResponse {
    pub workflow_run_id: Uuid,
    pub outcome: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApproveResponse {
    pub ok: bool,
    pub approved: bool,
}

// =============================================================================
// Public endpoints
// =============================================================================

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// POST /gate/call
///
/// The authorization boundary. Authenticates through the gate's own header
/// protocol; status maps executed to 200, proposed to 202, denied to 403.
pub async fn gate_call(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<GateCallBody>>,
) -> Response {
    let gate_headers = match extract_gate_headers(&headers) {
        Ok(h) => h,
        Err(e) => return e.into_response(),
    };
    let body = body.map(|Json(b)| b).unwrap_or_default();

    match state.gate.handle_call(&gate_headers, &body).await {
        Ok(response) => {
            let status = match response.status {
                GateCallStatus::Executed => StatusCode::OK,
                GateCallStatus::Proposed => StatusCode::ACCEPTED,
                GateCallStatus::Denied => StatusCode::FORBIDDEN,
            };
            (status, Json(response)).into_response()
        }
        Err(err) => ApiError::from(err).into_response(),
    }
}

fn extract_gate_headers(headers: &HeaderMap) -> Result<GateHeaders, ApiError> {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };

    let raw_timestamp = get("x-compass-timestamp");
    let timestamp = if raw_timestamp.is_empty() {
        // Absent timestamps fail the gate's skew check with a distinct cause.
        0
    } else {
        raw_timestamp.parse::<i64>().map_err(|_| {
            ApiError::UnprocessableEntity("x-compass-timestamp must be unix seconds".to_string())
        })?
    };

    Ok(GateHeaders {
        credential: get("x-compass-credential"),
        agent: get("x-compass-agent"),
        scope: get("x-compass-scope"),
        nonce: get("x-compass-nonce"),
        timestamp,
    })
}

// =============================================================================
// Operator endpoints (bearer token)
// =============================================================================

/// POST /worker/trigger
pub async fn trigger_worker(
    State(state): State<AppState>,
    body: Option<Json<TriggerRequest>>,
) -> Json<TriggerResponse> {
    let request = body.map(|Json(r)| r).unwrap_or_default();

    match state.worker.run_once(request.owner.as_deref()).await {
        Ok(Some(report)) => Json(TriggerResponse {
            ok: true,
            ran: true,
            execution_id: Some(report.execution_id),
            succeeded: Some(report.succeeded),
            output: report.output,
            error: report.error,
        }),
        Ok(None) => Json(TriggerResponse {
            ok: true,
            ran: false,
            execution_id: None,
            succeeded: None,
            output: None,
            error: None,
        }),
        Err(e) => Json(TriggerResponse {
            ok: false,
            ran: false,
            execution_id: None,
            succeeded: None,
            output: None,
            error: Some(e.to_string()),
        }),
    }
}

/// GET /gate/tools
pub async fn gate_tools(State(state): State<AppState>) -> Json<Vec<ToolListing>> {
    Json(state.gate.list_tools())
}

/// GET /gate/effects?limit=
pub async fn list_effects(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<Effect>>, ApiError> {
    let limit = params.limit.unwrap_or(50).min(500);
    Ok(Json(state.gate.list_effects(limit)?))
}

/// GET /gate/proposals
pub async fn list_proposals(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<Proposal>>, ApiError> {
    let limit = params.limit.unwrap_or(50).min(500);
    Ok(Json(state.gate.list_pending_proposals(limit)?))
}

/// POST /gate/proposals/{id}/approve
pub async fn approve_proposal(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApproveResponse>, ApiError> {
    let approved = state
        .gate
        .approve_proposal(id)
        .map_err(|e| match e {
            compass_gate::GateError::MalformedBody(msg) => ApiError::NotFound(msg),
            other => ApiError::from(other),
        })?;
    Ok(Json(ApproveResponse { ok: true, approved }))
}

/// GET /workflows/{id}
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkflowRun>, ApiError> {
    let run = state
        .engine
        .get(id)?
        .ok_or_else(|| ApiError::NotFound(format!("Workflow run not found: {}", id)))?;
    Ok(Json(run))
}

/// POST /workflows/{id}/tick
pub async fn tick_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TickResponse>, ApiError> {
    let outcome = state.engine.tick(id)?;
    Ok(Json(TickResponse {
        workflow_run_id: id,
        outcome: tick_outcome_label(&outcome).to_string(),
    }))
}

fn tick_outcome_label(outcome: &compass_exec::TickOutcome) -> &'static str {
    match outcome {
        compass_exec::TickOutcome::Started => "started",
        compass_exec::TickOutcome::StepStarted { .. } => "step_started",
        compass_exec::TickOutcome::Advanced { .. } => "advanced",
        compass_exec::TickOutcome::Succeeded => "succeeded",
        compass_exec::TickOutcome::Failed => "failed",
        compass_exec::TickOutcome::NoProgress => "no_progress",
    }
}
