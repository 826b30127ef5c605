//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request on a frontend:
//!     → buffer (replayable request body, retry on the failover predicate)
//!     → circuit_breaker (fallback while tripped, metrics while in standby)
//!     → forward to backend (502 + NetworkError marker on transport failure)
//! ```
//!
//! # Design Decisions
//! - Both protections are tower layers so a retry can re-drive the inner
//!   chain with a fresh copy of the request
//! - Middleware settings arrive as JSON from the store and are compiled once
//!   into a [`MiddlewareSpec`]; predicate errors reject the configuration
//! - Transport failures are flagged on the response with [`NetworkError`]
//!   rather than surfaced as service errors

pub mod buffer;
pub mod circuit_breaker;

use thiserror::Error;

use crate::duration::DurationError;
use crate::predicate::PredicateError;

pub use buffer::{BufferLayer, BufferSpec};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerLayer, CircuitBreakerSpec};

/// Response extension set by the forwarder when the backend could not be
/// reached or did not answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkError;

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("unknown middleware type {0:?}")]
    UnknownKind(String),

    #[error("malformed spec: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{field}: {source}")]
    Predicate {
        field: &'static str,
        #[source]
        source: PredicateError,
    },

    #[error("{field}: {source}")]
    Duration {
        field: &'static str,
        #[source]
        source: DurationError,
    },

    #[error("{0}")]
    Invalid(String),
}

/// A validated middleware configuration.
#[derive(Debug, Clone)]
pub enum MiddlewareSpec {
    CircuitBreaker(CircuitBreakerSpec),
    Buffer(BufferSpec),
}

impl MiddlewareSpec {
    pub const CIRCUIT_BREAKER: &'static str = "cbreaker";
    pub const BUFFER: &'static str = "buffer";

    pub fn from_json(kind: &str, value: &serde_json::Value) -> Result<Self, SpecError> {
        match kind {
            Self::CIRCUIT_BREAKER => Ok(MiddlewareSpec::CircuitBreaker(
                CircuitBreakerSpec::from_json(value)?,
            )),
            Self::BUFFER => Ok(MiddlewareSpec::Buffer(BufferSpec::from_json(value)?)),
            other => Err(SpecError::UnknownKind(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_by_kind() {
        let buffer = MiddlewareSpec::from_json("buffer", &serde_json::json!({})).unwrap();
        assert!(matches!(buffer, MiddlewareSpec::Buffer(_)));

        let err = MiddlewareSpec::from_json("ratelimit", &serde_json::json!({})).unwrap_err();
        assert!(matches!(err, SpecError::UnknownKind(_)));
    }

    #[test]
    fn test_predicate_errors_reported_with_field() {
        let err = MiddlewareSpec::from_json(
            "buffer",
            &serde_json::json!({"Retry": "Attempts() <"}),
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("Retry:"));
    }
}
