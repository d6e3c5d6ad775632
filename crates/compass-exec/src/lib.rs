//! Execution engine for Compass.
//!
//! Schedules and runs single units of work with retry/backoff, sequences
//! multi-step workflow runs, and gates standing autonomy behind delegation
//! contracts.

pub mod delegation;
pub mod error;
pub mod handler;
pub mod poller;
pub mod worker;
pub mod workflow;

pub use delegation::{DelegationDecision, DelegationGate};
pub use error::{DelegationError, ExecError, WorkflowError};
pub use handler::{ExecutionHandler, HandlerContext, HandlerRegistry};
pub use poller::WorkerPoller;
pub use worker::{backoff_delay_secs, RunReport, Worker};
pub use workflow::{TickOutcome, WorkflowEngine};
