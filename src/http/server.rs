//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the proxy handler
//! - Wire up middleware (tracing, timeout, request ID)
//! - Bind server to listener
//! - Dispatch requests through the routing table
//! - Observability (metrics, correlation IDs)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::response::Response;
use axum::Router;
use tokio::net::TcpListener;
use tower::ServiceExt;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::ProxyConfig;
use crate::http::request::{RequestIdExt, RequestIdLayer};
use crate::http::response;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::routing::{RouteContext, RouteTable};

/// HTTP server for the reverse proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
}

impl HttpServer {
    pub fn new(config: ProxyConfig, table: Arc<RouteTable>) -> Self {
        let router = build_router(table, Duration::from_secs(config.timeouts.request_secs));
        Self { router, config }
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(table: Arc<RouteTable>, request_timeout: Duration) -> Router {
    Router::new()
        .fallback(proxy_handler)
        .with_state(table)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(RequestIdLayer)
        .layer(TraceLayer::new_for_http())
}

/// Matches the request to a frontend and runs its chain.
async fn proxy_handler(State(table): State<Arc<RouteTable>>, request: Request) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let request_id = request
        .request_id()
        .map(ToString::to_string)
        .unwrap_or_default();
    let ctx = RouteContext::from_request(&request);

    let Some(resolved) = table.resolve(&ctx) else {
        tracing::warn!(request_id = %request_id, host = %ctx.host, path = %ctx.path, "No route matched");
        metrics::record_request(&method, 404, "none", start);
        return response::no_route();
    };

    tracing::debug!(
        request_id = %request_id,
        frontend = %resolved.frontend,
        method = %method,
        path = %ctx.path,
        "Proxying request"
    );

    let resp = match resolved.service.oneshot(request).await {
        Ok(resp) => resp,
        Err(never) => match never {},
    };
    metrics::record_request(&method, resp.status().as_u16(), &resolved.frontend.id, start);
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ChangeEvent, Frontend, FrontendSettings};
    use axum::body::Body;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_unmatched_request_is_404() {
        let router = build_router(Arc::new(RouteTable::new()), Duration::from_secs(5));
        let resp = router
            .oneshot(Request::builder().uri("/nothing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(resp.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_frontend_without_backend_is_503() {
        let table = Arc::new(RouteTable::new());
        table.apply(ChangeEvent::FrontendUpserted(Frontend {
            id: "f1".into(),
            route: r#"PathPrefix("/")"#.into(),
            kind: "http".into(),
            backend_id: "missing".into(),
            settings: FrontendSettings::default(),
        }));
        let router = build_router(table, Duration::from_secs(5));
        let resp = router
            .oneshot(Request::builder().uri("/a").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
