//! HTTP surface for the Compass action core.
//!
//! Exposes the worker trigger, the gate call boundary, allowlist and ledger
//! introspection, and workflow ticking over axum.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
