//! Buffering and retry middleware.
//!
//! # Responsibilities
//! - Read the request body fully (memory, then a temp file) so it can be
//!   replayed on every attempt
//! - Reject bodies over the configured limit before forwarding anything
//! - Re-drive the inner chain while the retry predicate holds
//! - Capture the response under its own limits
//!
//! # Settings
//! ```json
//! {"MaxRequestBodyBytes": 1048576, "MemRequestBodyBytes": 65536,
//!  "MaxResponseBodyBytes": -1, "MemResponseBodyBytes": 0,
//!  "Retry": "IsNetworkError() && Attempts() <= 2"}
//! ```
//! Max limits of `0` or `-1` mean unlimited; memory thresholds of `0` or
//! `-1` fall back to 1 MiB.

pub mod body;
pub mod layer;
pub mod retry;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;
use serde::Deserialize;
use thiserror::Error;

use crate::predicate::Predicate;
use crate::resilience::SpecError;

pub use body::{read_body, Buffered, SpillBuffer};
pub use layer::{BufferLayer, BufferService};
pub use retry::{compile_retry, RetryContext, MAX_ATTEMPTS};

pub const DEFAULT_MEM_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("request body exceeds {limit} bytes")]
    Oversize { limit: u64 },

    #[error("response body exceeds {limit} bytes")]
    ResponseOversize { limit: u64 },

    #[error("buffer io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("body read failed: {0}")]
    Body(String),
}

/// Turns buffering failures into client responses.
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, err: &BufferError) -> Response;
}

/// `413` for oversized requests, `500` for everything else.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorHandler;

impl ErrorHandler for DefaultErrorHandler {
    fn handle(&self, err: &BufferError) -> Response {
        let (status, text) = match err {
            BufferError::Oversize { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "Request Entity Too Large"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"),
        };
        let mut resp = Response::new(Body::from(text));
        *resp.status_mut() = status;
        resp.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        resp
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct RawSpec {
    max_request_body_bytes: i64,
    mem_request_body_bytes: i64,
    max_response_body_bytes: i64,
    mem_response_body_bytes: i64,
    retry: String,
}

#[derive(Debug, Clone)]
pub struct BufferSpec {
    pub max_request_body: Option<u64>,
    pub mem_request_body: usize,
    pub max_response_body: Option<u64>,
    pub mem_response_body: usize,
    pub retry_text: String,
    pub retry: Option<Predicate<RetryContext>>,
}

impl Default for BufferSpec {
    fn default() -> Self {
        Self {
            max_request_body: None,
            mem_request_body: DEFAULT_MEM_BODY_BYTES,
            max_response_body: None,
            mem_response_body: DEFAULT_MEM_BODY_BYTES,
            retry_text: String::new(),
            retry: None,
        }
    }
}

impl BufferSpec {
    pub fn from_json(value: &serde_json::Value) -> Result<Self, SpecError> {
        let raw = RawSpec::deserialize(value)?;
        Ok(Self {
            max_request_body: max_limit("MaxRequestBodyBytes", raw.max_request_body_bytes)?,
            mem_request_body: mem_limit("MemRequestBodyBytes", raw.mem_request_body_bytes)?,
            max_response_body: max_limit("MaxResponseBodyBytes", raw.max_response_body_bytes)?,
            mem_response_body: mem_limit("MemResponseBodyBytes", raw.mem_response_body_bytes)?,
            retry: compile_optional(&raw.retry)?,
            retry_text: raw.retry,
        })
    }

    /// The buffer every frontend gets from its own settings.
    pub fn for_frontend(max_body: i64, max_mem_body: i64, failover: &str) -> Result<Self, SpecError> {
        Ok(Self {
            max_request_body: max_limit("MaxBodyBytes", max_body)?,
            mem_request_body: mem_limit("MaxMemBodyBytes", max_mem_body)?,
            retry: compile_optional(failover)?,
            retry_text: failover.to_string(),
            ..Self::default()
        })
    }
}

fn compile_optional(text: &str) -> Result<Option<Predicate<RetryContext>>, SpecError> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    compile_retry(text)
        .map(Some)
        .map_err(|source| SpecError::Predicate {
            field: "Retry",
            source,
        })
}

fn max_limit(field: &str, value: i64) -> Result<Option<u64>, SpecError> {
    match value {
        -1 | 0 => Ok(None),
        v if v > 0 => Ok(Some(v as u64)),
        v => Err(SpecError::Invalid(format!("{} must be >= -1, got {}", field, v))),
    }
}

fn mem_limit(field: &str, value: i64) -> Result<usize, SpecError> {
    match value {
        -1 | 0 => Ok(DEFAULT_MEM_BODY_BYTES),
        v if v > 0 => Ok(usize::try_from(v).unwrap_or(usize::MAX)),
        v => Err(SpecError::Invalid(format!("{} must be >= -1, got {}", field, v))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_limits_normalized() {
        let spec = BufferSpec::from_json(&json!({
            "MaxRequestBodyBytes": -1,
            "MemRequestBodyBytes": 0,
            "MaxResponseBodyBytes": 4096,
            "MemResponseBodyBytes": 512
        }))
        .unwrap();
        assert_eq!(spec.max_request_body, None);
        assert_eq!(spec.mem_request_body, DEFAULT_MEM_BODY_BYTES);
        assert_eq!(spec.max_response_body, Some(4096));
        assert_eq!(spec.mem_response_body, 512);
        assert!(spec.retry.is_none());
    }

    #[test]
    fn test_negative_limit_rejected() {
        assert!(BufferSpec::from_json(&json!({"MaxRequestBodyBytes": -5})).is_err());
    }

    #[test]
    fn test_frontend_buffer() {
        let spec = BufferSpec::for_frontend(10, 0, "IsNetworkError() && Attempts() <= 2").unwrap();
        assert_eq!(spec.max_request_body, Some(10));
        assert!(spec.retry.is_some());
        assert!(BufferSpec::for_frontend(0, 0, "Nope()").is_err());
    }

    #[test]
    fn test_default_error_handler() {
        let h = DefaultErrorHandler;
        assert_eq!(
            h.handle(&BufferError::Oversize { limit: 1 }).status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            h.handle(&BufferError::Body("reset".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
