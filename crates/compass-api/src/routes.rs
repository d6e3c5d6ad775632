//! Router setup with all API routes and middleware.
//!
//! Configures the axum Router with CORS, request tracing, and all endpoint
//! handlers. Operator endpoints sit behind bearer-token auth; the gate call
//! endpoint authenticates through its own header protocol.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::handlers;
use crate::state::AppState;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    // CORS middleware: allow localhost origins for dashboard access.
    let port = state.config.general.port;
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list([
            format!("http://127.0.0.1:{}", port)
                .parse::<HeaderValue>()
                .unwrap_or_else(|_| HeaderValue::from_static("http://127.0.0.1")),
            format!("http://localhost:{}", port)
                .parse::<HeaderValue>()
                .unwrap_or_else(|_| HeaderValue::from_static("http://localhost")),
        ]))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]);

    // Routes that do NOT require the operator token.
    let public_routes = Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/gate/call",
            post(handlers::gate_call).layer(DefaultBodyLimit::max(256 * 1024)),
        );

    // Operator routes behind bearer-token auth.
    let protected_routes = Router::new()
        .route("/worker/trigger", post(handlers::trigger_worker))
        .route("/gate/tools", get(handlers::gate_tools))
        .route("/gate/effects", get(handlers::list_effects))
        .route("/gate/proposals", get(handlers::list_proposals))
        .route(
            "/gate/proposals/{id}/approve",
            post(handlers::approve_proposal),
        )
        .route("/workflows/{id}", get(handlers::get_workflow))
        .route("/workflows/{id}/tick", post(handlers::tick_workflow))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
