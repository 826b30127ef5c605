//! Frontend route expressions.
//!
//! # Responsibilities
//! - Match host header (exact match, case-insensitive, port ignored)
//! - Match path exactly, by prefix, or by regular expression (case-sensitive)
//! - Match request method
//! - Combine conditions with `&&` / `||` through the predicate compiler
//!
//! # Examples
//! ```text
//! Host("example.com") && PathPrefix("/api")
//! Path("/health") || Method("OPTIONS")
//! ```

use axum::http::{header, Request};

use crate::predicate::{BinaryOp, Functions, Operators, Parser, Predicate, PredicateError, Value};

/// The parts of a request a route can look at.
#[derive(Debug, Clone, Default)]
pub struct RouteContext {
    /// Lowercased, without port.
    pub host: String,
    pub path: String,
    pub method: String,
}

impl RouteContext {
    pub fn from_request<B>(req: &Request<B>) -> Self {
        let host = req
            .headers()
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .or_else(|| req.uri().host())
            .map(normalize_host)
            .unwrap_or_default();
        Self {
            host,
            path: req.uri().path().to_string(),
            method: req.method().as_str().to_string(),
        }
    }
}

fn normalize_host(raw: &str) -> String {
    let raw = raw.trim();
    let without_port = if raw.starts_with('[') {
        // [v6]:port
        raw.split(']').next().map(|h| format!("{}]", h)).unwrap_or_default()
    } else {
        raw.rsplit_once(':')
            .filter(|(_, port)| port.chars().all(|c| c.is_ascii_digit()))
            .map(|(h, _)| h.to_string())
            .unwrap_or_else(|| raw.to_string())
    };
    without_port.to_lowercase()
}

pub fn compile_route(text: &str) -> Result<Predicate<RouteContext>, PredicateError> {
    let functions = Functions::new()
        .with_str("Host", |expected| {
            let expected = normalize_host(expected);
            Ok(Value::predicate(move |c: &RouteContext| c.host == expected))
        })
        .with_str("Path", |expected| {
            let expected = expected.to_string();
            Ok(Value::predicate(move |c: &RouteContext| c.path == expected))
        })
        .with_str("PathPrefix", |prefix| {
            let prefix = prefix.to_string();
            Ok(Value::predicate(move |c: &RouteContext| c.path.starts_with(&prefix)))
        })
        .with_str("PathRegexp", |pattern| {
            let re = regex::Regex::new(pattern).map_err(|e| e.to_string())?;
            Ok(Value::predicate(move |c: &RouteContext| re.is_match(&c.path)))
        })
        .with_str("Method", |method| {
            let method = method.to_ascii_uppercase();
            Ok(Value::predicate(move |c: &RouteContext| c.method == method))
        });
    // Routes are boolean only.
    let operators = Operators::standard()
        .without(BinaryOp::Lt)
        .without(BinaryOp::Gt)
        .without(BinaryOp::Le)
        .without(BinaryOp::Ge);
    Parser::new(functions, operators).parse(text)
}
