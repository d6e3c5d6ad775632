//! Shared kernel for the Compass action core.
//!
//! Holds the domain types, top-level error, configuration, and domain events
//! used across the execution queue, workflow engine, delegation gate, and
//! authorization gate.

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::CompassConfig;
pub use error::{CompassError, Result};
pub use events::DomainEvent;
pub use types::Timestamp;
