//! Responses served instead of the backend while a breaker is tripped.

use axum::body::Body;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::response::Response;
use regex::Regex;
use serde::Deserialize;

use crate::resilience::SpecError;

/// Fallback body: plain text, raw bytes, or a JSON object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FallbackBody {
    Text(String),
    Bytes(Vec<u8>),
    Object(serde_json::Map<String, serde_json::Value>),
}

impl FallbackBody {
    /// Encoded bytes and the content type they imply.
    pub fn encode(self) -> Result<(Vec<u8>, &'static str), serde_json::Error> {
        Ok(match self {
            FallbackBody::Text(text) => (text.into_bytes(), "text/plain; charset=utf-8"),
            FallbackBody::Bytes(bytes) => (bytes, "application/octet-stream"),
            FallbackBody::Object(map) => (
                serde_json::to_vec(&serde_json::Value::Object(map))?,
                "application/json",
            ),
        })
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FallbackBody::Text(text) => text.is_empty(),
            FallbackBody::Bytes(bytes) => bytes.is_empty(),
            FallbackBody::Object(_) => false,
        }
    }
}

impl Default for FallbackBody {
    fn default() -> Self {
        FallbackBody::Text(String::new())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResponseAction {
    #[serde(default = "default_status")]
    status_code: u16,
    #[serde(default)]
    content_type: String,
    #[serde(default)]
    body: FallbackBody,
}

fn default_status() -> u16 {
    503
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RedirectAction {
    #[serde(rename = "URL", default)]
    url: String,
    #[serde(default)]
    regex: String,
    #[serde(default)]
    replacement: String,
    #[serde(default)]
    permanent: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "Type", content = "Action", rename_all = "lowercase")]
enum RawFallback {
    Response(ResponseAction),
    Redirect(RedirectAction),
}

#[derive(Debug, Clone)]
pub enum Fallback {
    Response {
        status: StatusCode,
        content_type: String,
        body: Vec<u8>,
    },
    Redirect {
        /// Fixed target when no regex is configured.
        url: String,
        pattern: Option<Regex>,
        replacement: String,
        permanent: bool,
    },
}

impl Fallback {
    pub fn from_json(value: &serde_json::Value) -> Result<Self, SpecError> {
        match RawFallback::deserialize(value)? {
            RawFallback::Response(action) => {
                let status = StatusCode::from_u16(action.status_code).map_err(|_| {
                    SpecError::Invalid(format!("Fallback: bad status code {}", action.status_code))
                })?;
                let (body, default_type) = action.body.encode()?;
                let content_type = if action.content_type.is_empty() {
                    default_type.to_string()
                } else {
                    action.content_type
                };
                HeaderValue::from_str(&content_type).map_err(|_| {
                    SpecError::Invalid(format!("Fallback: bad content type {:?}", content_type))
                })?;
                Ok(Fallback::Response {
                    status,
                    content_type,
                    body,
                })
            }
            RawFallback::Redirect(action) => {
                let pattern = if action.regex.is_empty() {
                    if action.url.is_empty() {
                        return Err(SpecError::Invalid(
                            "Fallback: redirect needs URL or Regex".to_string(),
                        ));
                    }
                    None
                } else {
                    Some(Regex::new(&action.regex).map_err(|e| {
                        SpecError::Invalid(format!("Fallback: bad regex: {}", e))
                    })?)
                };
                Ok(Fallback::Redirect {
                    url: action.url,
                    pattern,
                    replacement: action.replacement,
                    permanent: action.permanent,
                })
            }
        }
    }

    pub fn respond<B>(&self, req: &Request<B>) -> Response {
        match self {
            Fallback::Response {
                status,
                content_type,
                body,
            } => {
                let mut resp = Response::new(Body::from(body.clone()));
                *resp.status_mut() = *status;
                if let Ok(value) = HeaderValue::from_str(content_type) {
                    resp.headers_mut().insert(header::CONTENT_TYPE, value);
                }
                resp.headers_mut()
                    .insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
                resp
            }
            Fallback::Redirect {
                url,
                pattern,
                replacement,
                permanent,
            } => {
                let location = match pattern {
                    Some(re) => {
                        let original = full_url(req);
                        // A URL the pattern does not match is redirected to itself.
                        re.replace(&original, replacement.as_str()).into_owned()
                    }
                    None => url.clone(),
                };
                let status = if *permanent {
                    StatusCode::MOVED_PERMANENTLY
                } else {
                    StatusCode::FOUND
                };
                let mut resp = Response::new(Body::empty());
                *resp.status_mut() = status;
                match HeaderValue::from_str(&location) {
                    Ok(value) => {
                        resp.headers_mut().insert(header::LOCATION, value);
                    }
                    Err(_) => {
                        tracing::warn!(location = %location, "Redirect target is not a valid header value");
                        *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                    }
                }
                resp
            }
        }
    }
}

/// `scheme://host/path?query` as seen by the client.
pub(crate) fn full_url<B>(req: &Request<B>) -> String {
    let uri = req.uri();
    if uri.scheme().is_some() && uri.authority().is_some() {
        return uri.to_string();
    }
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.authority().map(|a| a.as_str()))
        .unwrap_or("localhost");
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    format!("http://{}{}", host, path)
}
