//! Integration tests for the Compass API: authentication, the gate call
//! boundary with its status mapping, worker trigger, and workflow endpoints.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tokio::sync::broadcast;
use tower::ServiceExt;
use uuid::Uuid;

use compass_api::create_router;
use compass_api::state::AppState;
use compass_core::config::CompassConfig;
use compass_core::types::{NewExecution, RiskClass, Step, Timestamp};
use compass_exec::{HandlerRegistry, Worker, WorkflowEngine};
use compass_gate::{Gate, InMemoryReplayGuard, NullExecutor, ToolRegistry};
use compass_storage::Database;

// =============================================================================
// Helpers
// =============================================================================

const TEST_TOKEN: &str = "test-token-12345";
const TEST_CREDENTIAL: &str = "gate-credential-789";
const ALL_SCOPES: &str =
    "messages:send email:draft calendar:write contacts:write activity:write rewards:write";

/// Create a fresh AppState with an in-memory DB.
fn make_state() -> AppState {
    let config = CompassConfig::default();
    let db = Arc::new(Database::in_memory().unwrap());
    let (events, _) = broadcast::channel(256);

    let mut registry = HandlerRegistry::new();
    registry.register_defaults();

    let worker = Arc::new(Worker::new(
        Arc::clone(&db),
        Arc::new(registry),
        &config.worker,
        events.clone(),
    ));
    let engine = Arc::new(WorkflowEngine::new(
        Arc::clone(&db),
        config.worker.default_max_attempts,
        events.clone(),
    ));
    let gate = Arc::new(Gate::new(
        Arc::clone(&db),
        TEST_CREDENTIAL.to_string(),
        config.gate.clone(),
        ToolRegistry::builtin().unwrap(),
        Arc::new(InMemoryReplayGuard::new(config.gate.nonce_ttl_secs)),
        Arc::new(NullExecutor),
        events,
    ));

    AppState::new(config, db, worker, engine, gate, TEST_TOKEN.to_string())
}

fn make_app(state: &AppState) -> axum::Router {
    create_router(state.clone())
}

fn authed_get(uri: &str) -> Request<Body> {
    Request::get(uri)
        .header("authorization", format!("Bearer {}", TEST_TOKEN))
        .body(Body::empty())
        .unwrap()
}

fn authed_post_json(uri: &str, json: &str) -> Request<Body> {
    Request::post(uri)
        .header("authorization", format!("Bearer {}", TEST_TOKEN))
        .header("content-type", "application/json")
        .body(Body::from(json.to_string()))
        .unwrap()
}

fn gate_request(nonce: &str, body: &str) -> Request<Body> {
    Request::post("/gate/call")
        .header("content-type", "application/json")
        .header("x-compass-credential", TEST_CREDENTIAL)
        .header("x-compass-agent", "coach-agent")
        .header("x-compass-scope", ALL_SCOPES)
        .header("x-compass-nonce", nonce)
        .header("x-compass-timestamp", Timestamp::now().0.to_string())
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn send_message_call(call_id: &str, intent: &str) -> String {
    serde_json::json!({
        "call_id": call_id,
        "tool": "send_message",
        "intent": intent,
        "inputs": {"recipient": "sam", "body": "how did today go?"},
    })
    .to_string()
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// =============================================================================
// Health and auth
// =============================================================================

#[tokio::test]
async fn test_health_is_public() {
    let state = make_state();
    let resp = make_app(&state)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_operator_endpoints_require_token() {
    let state = make_state();

    let resp = make_app(&state)
        .oneshot(Request::get("/gate/tools").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = make_app(&state)
        .oneshot(
            Request::get("/gate/tools")
                .header("authorization", "Bearer wrong-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_gate_tools_listing() {
    let state = make_state();
    let resp = make_app(&state).oneshot(authed_get("/gate/tools")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    let tools = json.as_array().unwrap();
    assert_eq!(tools.len(), 6);
    let send = tools
        .iter()
        .find(|t| t["name"] == "send_message")
        .expect("send_message listed");
    assert_eq!(send["effect"], "irreversible");
    assert_eq!(send["scopes"][0], "messages:send");
}

// =============================================================================
// Worker trigger
// =============================================================================

#[tokio::test]
async fn test_trigger_with_empty_queue() {
    let state = make_state();
    let resp = make_app(&state)
        .oneshot(authed_post_json("/worker/trigger", "{}"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["ok"], true);
    assert_eq!(json["ran"], false);
}

#[tokio::test]
async fn test_trigger_runs_queued_execution() {
    let state = make_state();
    state
        .worker
        .enqueue(&NewExecution::immediate(
            "user-1",
            "notify",
            serde_json::json!({"message": "hello"}),
        ))
        .unwrap();

    let resp = make_app(&state)
        .oneshot(authed_post_json("/worker/trigger", "{}"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["ok"], true);
    assert_eq!(json["ran"], true);
    assert_eq!(json["succeeded"], true);
    assert_eq!(json["output"]["delivered"], true);
}

#[tokio::test]
async fn test_trigger_owner_scoped() {
    let state = make_state();
    state
        .worker
        .enqueue(&NewExecution::immediate(
            "user-2",
            "notify",
            serde_json::json!({"message": "hello"}),
        ))
        .unwrap();

    let resp = make_app(&state)
        .oneshot(authed_post_json("/worker/trigger", r#"{"owner": "user-1"}"#))
        .await
        .unwrap();
    let json = body_json(resp).await;
    assert_eq!(json["ran"], false);

    let resp = make_app(&state)
        .oneshot(authed_post_json("/worker/trigger", r#"{"owner": "user-2"}"#))
        .await
        .unwrap();
    let json = body_json(resp).await;
    assert_eq!(json["ran"], true);
}

// =============================================================================
// Gate call status mapping
// =============================================================================

#[tokio::test]
async fn test_gate_call_executed_maps_to_200() {
    let state = make_state();
    let resp = make_app(&state)
        .oneshot(gate_request(
            &Uuid::new_v4().to_string(),
            &send_message_call("call-1", "send the evening check-in message to Sam"),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    assert_eq!(json["status"], "executed");
    assert_eq!(json["call_id"], "call-1");
    assert!(json["confidence"].as_f64().unwrap() >= 0.8);
    assert!(json.get("audit_ref").is_some());
    assert!(json["result"]["summary"].as_str().unwrap().contains("send_message"));
}

#[tokio::test]
async fn test_gate_call_proposed_maps_to_202() {
    let state = make_state();
    let body = serde_json::json!({
        "call_id": "call-2",
        "tool": "draft_email",
        "intent": "prepare the quarterly summary for Jordan",
        "inputs": {"recipient": "jordan", "subject": "Q3 summary"},
    })
    .to_string();

    let resp = make_app(&state)
        .oneshot(gate_request(&Uuid::new_v4().to_string(), &body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let json = body_json(resp).await;
    assert_eq!(json["status"], "proposed");
    assert!(json.get("proposal_id").is_some());
}

#[tokio::test]
async fn test_gate_call_denied_maps_to_403() {
    let state = make_state();
    let body = serde_json::json!({
        "call_id": "call-3",
        "tool": "wire_transfer",
        "intent": "move money",
        "inputs": {"amount": 100},
    })
    .to_string();

    let resp = make_app(&state)
        .oneshot(gate_request(&Uuid::new_v4().to_string(), &body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let json = body_json(resp).await;
    assert_eq!(json["status"], "denied");
    assert!(json["reason"].as_str().unwrap().contains("allowlist"));
}

#[tokio::test]
async fn test_gate_call_bad_credential_maps_to_401() {
    let state = make_state();
    let request = Request::post("/gate/call")
        .header("content-type", "application/json")
        .header("x-compass-credential", "wrong")
        .header("x-compass-agent", "coach-agent")
        .header("x-compass-scope", ALL_SCOPES)
        .header("x-compass-nonce", Uuid::new_v4().to_string())
        .header("x-compass-timestamp", Timestamp::now().0.to_string())
        .body(Body::from(send_message_call("call-4", "send a message")))
        .unwrap();

    let resp = make_app(&state).oneshot(request).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_gate_call_replay_maps_to_409() {
    let state = make_state();
    let app = make_app(&state);
    let nonce = Uuid::new_v4().to_string();

    let resp = app
        .clone()
        .oneshot(gate_request(
            &nonce,
            &send_message_call("call-5", "send the evening check-in message"),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .oneshot(gate_request(
            &nonce,
            &send_message_call("call-5", "send the evening check-in message"),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_gate_call_malformed_body_maps_to_422() {
    let state = make_state();
    // Missing call_id.
    let body = serde_json::json!({
        "tool": "send_message",
        "intent": "send a message",
        "inputs": {"recipient": "sam", "body": "hi"},
    })
    .to_string();

    let resp = make_app(&state)
        .oneshot(gate_request(&Uuid::new_v4().to_string(), &body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_gate_call_non_numeric_timestamp_maps_to_422() {
    let state = make_state();
    let request = Request::post("/gate/call")
        .header("content-type", "application/json")
        .header("x-compass-credential", TEST_CREDENTIAL)
        .header("x-compass-agent", "coach-agent")
        .header("x-compass-scope", ALL_SCOPES)
        .header("x-compass-nonce", Uuid::new_v4().to_string())
        .header("x-compass-timestamp", "not-a-number")
        .body(Body::from(send_message_call("call-6", "send a message")))
        .unwrap();

    let resp = make_app(&state).oneshot(request).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

// =============================================================================
// Effects, proposals, workflows
// =============================================================================

#[tokio::test]
async fn test_effects_listing_shows_denials() {
    let state = make_state();
    let app = make_app(&state);

    let body = serde_json::json!({
        "call_id": "call-7",
        "tool": "wire_transfer",
        "intent": "move money",
        "inputs": {"amount": 100},
    })
    .to_string();
    app.clone()
        .oneshot(gate_request(&Uuid::new_v4().to_string(), &body))
        .await
        .unwrap();

    let resp = app.oneshot(authed_get("/gate/effects?limit=10")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    let effects = json.as_array().unwrap();
    assert_eq!(effects.len(), 1);
    assert_eq!(effects[0]["tool"], "wire_transfer");
    assert_eq!(effects[0]["status"], "denied");
}

#[tokio::test]
async fn test_proposal_approval_endpoint() {
    let state = make_state();
    let app = make_app(&state);

    let body = serde_json::json!({
        "call_id": "call-8",
        "tool": "draft_email",
        "intent": "prepare the quarterly summary for Jordan",
        "inputs": {"recipient": "jordan", "subject": "Q3 summary"},
    })
    .to_string();
    let resp = app
        .clone()
        .oneshot(gate_request(&Uuid::new_v4().to_string(), &body))
        .await
        .unwrap();
    let json = body_json(resp).await;
    let proposal_id = json["proposal_id"].as_str().unwrap().to_string();

    let resp = app
        .clone()
        .oneshot(authed_post_json(
            &format!("/gate/proposals/{}/approve", proposal_id),
            "{}",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["approved"], true);

    // Unknown proposal id is a 404.
    let resp = app
        .oneshot(authed_post_json(
            &format!("/gate/proposals/{}/approve", Uuid::new_v4()),
            "{}",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_workflow_endpoints() {
    let state = make_state();
    let app = make_app(&state);

    let plan = vec![Step {
        step_id: "s1".to_string(),
        executor_kind: "notify".to_string(),
        payload: serde_json::json!({"message": "hello"}),
        risk: RiskClass::Low,
        mobile_allowed: true,
    }];
    let run = state.engine.start(Uuid::new_v4(), "user-1", plan).unwrap();

    let resp = app
        .clone()
        .oneshot(authed_get(&format!("/workflows/{}", run.id)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["status"], "queued");

    let resp = app
        .clone()
        .oneshot(authed_post_json(&format!("/workflows/{}/tick", run.id), "{}"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["outcome"], "started");

    // Unknown workflow is a 404.
    let resp = app
        .oneshot(authed_get(&format!("/workflows/{}", Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
