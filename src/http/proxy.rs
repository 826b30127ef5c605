//! Forwarding to backend servers.
//!
//! # Responsibilities
//! - Keep one pooled client per backend, configured from its settings
//! - Pick a server round-robin
//! - Rewrite the request for the upstream (URI, Host, X-Forwarded-*)
//! - Turn transport failures into 502/504 responses flagged with
//!   [`NetworkError`](crate::resilience::NetworkError)
//!
//! # Design Decisions
//! - Hop-by-hop headers are stripped in both directions
//! - The pool is immutable; the routing table swaps in a new one when the
//!   backend or its servers change

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode, Uri};
use axum::response::Response;
use futures_util::future::BoxFuture;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tower::Service;

use crate::duration::parse_duration;
use crate::engine::{Backend, FrontendSettings, Server};
use crate::http::response;

pub type HttpClient = Client<HttpConnector, Body>;

static HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
static X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

#[derive(Debug, Clone)]
struct Upstream {
    id: String,
    scheme: Scheme,
    authority: Authority,
}

/// Servers of one backend plus the client used to reach them.
pub struct BackendPool {
    backend_id: String,
    client: HttpClient,
    read_timeout: Option<Duration>,
    servers: Vec<Upstream>,
    cursor: AtomicUsize,
}

impl BackendPool {
    pub fn new(backend: &Backend, servers: &[Server]) -> Self {
        let timeouts = &backend.settings.timeouts;
        let parse = |value: &str| {
            if value.is_empty() {
                return None;
            }
            parse_duration(value)
                .map_err(|e| tracing::warn!(backend = %backend.id, error = %e, "Ignoring bad timeout"))
                .ok()
        };

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(parse(&timeouts.dial));
        connector.set_nodelay(true);
        let mut builder = Client::builder(TokioExecutor::new());
        let idle = backend.settings.keep_alive.max_idle_conns_per_host;
        if idle > 0 {
            builder.pool_max_idle_per_host(idle as usize);
        }

        let servers = servers
            .iter()
            .filter_map(|s| match upstream(s) {
                Some(u) => Some(u),
                None => {
                    tracing::warn!(backend = %backend.id, server = %s.id, url = %s.url, "Skipping server with unusable URL");
                    None
                }
            })
            .collect();

        Self {
            backend_id: backend.id.clone(),
            client: builder.build(connector),
            read_timeout: parse(&timeouts.read),
            servers,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    fn next(&self) -> Option<&Upstream> {
        if self.servers.is_empty() {
            return None;
        }
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.servers.len();
        self.servers.get(i)
    }
}

fn upstream(server: &Server) -> Option<Upstream> {
    let uri: Uri = server.url.parse().ok()?;
    Some(Upstream {
        id: server.id.clone(),
        scheme: uri.scheme().cloned()?,
        authority: uri.authority().cloned()?,
    })
}

/// Frontend settings that shape the upstream request.
#[derive(Debug, Clone, Default)]
pub struct ForwardSettings {
    pub pass_host_header: bool,
    pub trust_forward_header: bool,
    pub hostname: String,
}

impl From<&FrontendSettings> for ForwardSettings {
    fn from(s: &FrontendSettings) -> Self {
        Self {
            pass_host_header: s.pass_host_header,
            trust_forward_header: s.trust_forward_header,
            hostname: s.hostname.clone(),
        }
    }
}

/// Innermost service of every frontend chain.
#[derive(Clone)]
pub struct ForwardService {
    pool: Option<Arc<BackendPool>>,
    settings: Arc<ForwardSettings>,
}

impl ForwardService {
    pub fn new(pool: Option<Arc<BackendPool>>, settings: ForwardSettings) -> Self {
        Self {
            pool,
            settings: Arc::new(settings),
        }
    }
}

impl Service<Request> for ForwardService {
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let pool = self.pool.clone();
        let settings = Arc::clone(&self.settings);
        Box::pin(async move {
            let Some(pool) = pool else {
                return Ok(response::text(StatusCode::SERVICE_UNAVAILABLE, "No backend configured"));
            };
            Ok(forward(&pool, &settings, req).await)
        })
    }
}

async fn forward(pool: &BackendPool, settings: &ForwardSettings, req: Request) -> Response {
    let Some(server) = pool.next() else {
        tracing::warn!(backend = %pool.backend_id, "No servers available");
        return response::text(StatusCode::SERVICE_UNAVAILABLE, "No servers available");
    };

    let (mut parts, body) = req.into_parts();
    let client_ip = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let original_host = parts.headers.get(header::HOST).cloned();

    let path = parts
        .uri
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));
    let mut uri_parts = axum::http::uri::Parts::default();
    uri_parts.scheme = Some(server.scheme.clone());
    uri_parts.authority = Some(server.authority.clone());
    uri_parts.path_and_query = Some(path);
    parts.uri = match Uri::from_parts(uri_parts) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::warn!(server = %server.id, error = %e, "Could not build upstream URI");
            return response::text(StatusCode::BAD_GATEWAY, "Bad upstream address");
        }
    };

    strip_hop_by_hop(&mut parts.headers);
    rewrite_forward_headers(&mut parts.headers, settings, client_ip, original_host.as_ref());
    if !settings.hostname.is_empty() {
        if let Ok(v) = HeaderValue::from_str(&settings.hostname) {
            parts.headers.insert(header::HOST, v);
        }
    } else if !settings.pass_host_header {
        if let Ok(v) = HeaderValue::from_str(server.authority.as_str()) {
            parts.headers.insert(header::HOST, v);
        }
    }

    let upstream_req = Request::from_parts(parts, body);
    let sent = pool.client.request(upstream_req);
    let result = match pool.read_timeout {
        Some(limit) => match tokio::time::timeout(limit, sent).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(backend = %pool.backend_id, server = %server.id, "Upstream timed out");
                return response::gateway_timeout();
            }
        },
        None => sent.await,
    };

    match result {
        Ok(resp) => {
            let (mut parts, body) = resp.into_parts();
            strip_hop_by_hop(&mut parts.headers);
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            tracing::warn!(backend = %pool.backend_id, server = %server.id, error = %e, "Upstream request failed");
            response::bad_gateway()
        }
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}

fn rewrite_forward_headers(
    headers: &mut HeaderMap,
    settings: &ForwardSettings,
    client_ip: Option<String>,
    original_host: Option<&HeaderValue>,
) {
    if !settings.trust_forward_header {
        headers.remove(&X_FORWARDED_FOR);
        headers.remove(&X_FORWARDED_HOST);
        headers.remove(&X_FORWARDED_PROTO);
    }
    if let Some(ip) = client_ip {
        let value = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(prior) => format!("{}, {}", prior, ip),
            None => ip,
        };
        if let Ok(v) = HeaderValue::from_str(&value) {
            headers.insert(X_FORWARDED_FOR.clone(), v);
        }
    }
    if !headers.contains_key(&X_FORWARDED_PROTO) {
        headers.insert(X_FORWARDED_PROTO.clone(), HeaderValue::from_static("http"));
    }
    if let Some(host) = original_host {
        if !headers.contains_key(&X_FORWARDED_HOST) {
            headers.insert(X_FORWARDED_HOST.clone(), host.clone());
        }
    }
}
