//! Error types for the authorization gate.
//!
//! Validation failures are distinct per cause so the HTTP layer can map each
//! to its own status code. A low confidence score is NOT an error: denials
//! are ordinary, fully audited responses.

use compass_core::error::CompassError;

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("Missing required header: {0}")]
    MissingHeader(&'static str),
    #[error("Malformed header {name}: {reason}")]
    MalformedHeader { name: &'static str, reason: String },
    #[error("Invalid credential")]
    BadCredential,
    #[error("Timestamp outside the allowed skew of {skew_secs}s")]
    StaleTimestamp { skew_secs: i64 },
    #[error("Nonce already used within its validity window")]
    ReplayedNonce,
    #[error("Malformed call body: {0}")]
    MalformedBody(String),
    #[error("Tool registry is invalid: {0}")]
    InvalidRegistry(String),
    #[error("Tool executor failed: {0}")]
    ExecutorFailed(String),
    #[error("Storage error: {0}")]
    Storage(#[from] CompassError),
}
