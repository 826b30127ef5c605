//! Admin API over the sync engine.
//!
//! Every write goes to the configuration store; the proxy picks changes up
//! through its subscription, never from this API directly.

pub mod auth;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::engine::Engine;
use crate::lifecycle::Shutdown;

#[derive(Clone)]
pub struct AdminState {
    pub engine: Arc<Engine>,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(engine: Arc<Engine>, api_key: &str) -> Self {
        Self {
            engine,
            api_key: Arc::from(api_key),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/v2/hosts", get(get_hosts).post(upsert_host))
        .route("/v2/hosts/{name}", get(get_host).delete(delete_host))
        .route("/v2/listeners", get(get_listeners).post(upsert_listener))
        .route("/v2/listeners/{id}", get(get_listener).delete(delete_listener))
        .route("/v2/backends", get(get_backends).post(upsert_backend))
        .route("/v2/backends/{id}", get(get_backend).delete(delete_backend))
        .route("/v2/backends/{id}/servers", get(get_servers).post(upsert_server))
        .route(
            "/v2/backends/{id}/servers/{sid}",
            get(get_server).delete(delete_server),
        )
        .route("/v2/frontends", get(get_frontends).post(upsert_frontend))
        .route("/v2/frontends/{id}", get(get_frontend).delete(delete_frontend))
        .route(
            "/v2/frontends/{id}/middlewares",
            get(get_middlewares).post(upsert_middleware),
        )
        .route(
            "/v2/frontends/{id}/middlewares/{mid}",
            get(get_middleware).delete(delete_middleware),
        )
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .route("/v2/status", get(get_status))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve the admin API until shutdown.
pub async fn run_admin(
    listener: TcpListener,
    state: AdminState,
    shutdown: Shutdown,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Admin API starting");
    let app = setup_admin_router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await?;
    tracing::info!("Admin API stopped");
    Ok(())
}
