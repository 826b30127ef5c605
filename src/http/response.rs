//! Responses the proxy produces itself.
//!
//! # Responsibilities
//! - Plain-text error responses (no route, no servers)
//! - Map upstream transport failures to 502/504 and flag them so the
//!   breaker and retry predicates can tell them apart from upstream replies
//!
//! # Design Decisions
//! - Backend timeouts result in 504 Gateway Timeout
//! - Connection failures result in 502 Bad Gateway

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;

use crate::resilience::NetworkError;

pub fn text(status: StatusCode, body: &'static str) -> Response {
    let mut resp = Response::new(Body::from(body));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp
}

pub fn no_route() -> Response {
    text(StatusCode::NOT_FOUND, "No matching route found")
}

pub fn gateway_timeout() -> Response {
    network_error(StatusCode::GATEWAY_TIMEOUT, "Upstream timed out")
}

pub fn bad_gateway() -> Response {
    network_error(StatusCode::BAD_GATEWAY, "Upstream request failed")
}

fn network_error(status: StatusCode, body: &'static str) -> Response {
    let mut resp = text(status, body);
    resp.extensions_mut().insert(NetworkError);
    resp
}
