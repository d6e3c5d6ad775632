//! Authorization gate for Compass.
//!
//! Every externally-effecting tool call passes through the gate: shared
//! secret and replay validation, a closed typed allowlist, confidence
//! scoring, and an append-and-update effect ledger that records every
//! decision before anything executes.

pub mod error;
pub mod executor;
pub mod gate;
pub mod registry;
pub mod replay;
pub mod scoring;
pub mod types;

pub use error::GateError;
pub use executor::{ExecutionMode, NullExecutor, ToolExecutor, ToolOutcome};
pub use gate::Gate;
pub use registry::{parse_scopes, EffectClass, Scope, ToolId, ToolListing, ToolRegistry, ToolSpec};
pub use replay::{InMemoryReplayGuard, ReplayGuard};
pub use scoring::{score_call, ConfidenceReport};
pub use types::{AuthorizedCall, GateCallBody, GateCallStatus, GateHeaders, GateResponse};
