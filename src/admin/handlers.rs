//! Admin API handlers: thin JSON wrappers over the sync engine.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::admin::AdminState;
use crate::duration::parse_duration;
use crate::engine::{
    Backend, BackendKey, EngineError, Frontend, FrontendKey, Host, HostKey, Listener, ListenerKey,
    Middleware, MiddlewareKey, Server, ServerKey,
};

/// Engine errors mapped onto HTTP statuses.
#[derive(Debug)]
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::AlreadyExists(_) => StatusCode::CONFLICT,
            EngineError::InvalidFormat(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Admin request failed");
        }
        (status, Json(json!({ "message": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn parse_ttl(raw: &str) -> Result<Option<Duration>, ApiError> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    parse_duration(raw)
        .map(Some)
        .map_err(|e| ApiError(EngineError::invalid(format!("TTL: {}", e))))
}

fn deleted(what: String) -> Json<serde_json::Value> {
    Json(json!({ "message": format!("{} deleted", what) }))
}

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
}

pub async fn get_status() -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "ok",
    })
}

// Hosts

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostBody {
    pub host: Host,
}

pub async fn get_hosts(State(state): State<AdminState>) -> ApiResult<serde_json::Value> {
    let hosts = state.engine.get_hosts().await?;
    Ok(Json(json!({ "Hosts": hosts })))
}

pub async fn get_host(State(state): State<AdminState>, Path(name): Path<String>) -> ApiResult<Host> {
    Ok(Json(state.engine.get_host(&HostKey::new(name)).await?))
}

pub async fn upsert_host(State(state): State<AdminState>, Json(body): Json<HostBody>) -> ApiResult<Host> {
    state.engine.upsert_host(&body.host).await?;
    tracing::info!(host = %body.host.name, "Host upserted");
    Ok(Json(body.host))
}

pub async fn delete_host(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> ApiResult<serde_json::Value> {
    state.engine.delete_host(&HostKey::new(name.clone())).await?;
    Ok(deleted(format!("host {}", name)))
}

// Listeners

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListenerBody {
    pub listener: Listener,
}

pub async fn get_listeners(State(state): State<AdminState>) -> ApiResult<serde_json::Value> {
    let listeners = state.engine.get_listeners().await?;
    Ok(Json(json!({ "Listeners": listeners })))
}

pub async fn get_listener(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> ApiResult<Listener> {
    Ok(Json(state.engine.get_listener(&ListenerKey::new(id)).await?))
}

pub async fn upsert_listener(
    State(state): State<AdminState>,
    Json(body): Json<ListenerBody>,
) -> ApiResult<Listener> {
    state.engine.upsert_listener(&body.listener).await?;
    tracing::info!(listener = %body.listener.id, "Listener upserted");
    Ok(Json(body.listener))
}

pub async fn delete_listener(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> ApiResult<serde_json::Value> {
    state.engine.delete_listener(&ListenerKey::new(id.clone())).await?;
    Ok(deleted(format!("listener {}", id)))
}

// Backends and servers

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BackendBody {
    pub backend: Backend,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerBody {
    pub server: Server,
    #[serde(default, rename = "TTL")]
    pub ttl: String,
}

pub async fn get_backends(State(state): State<AdminState>) -> ApiResult<serde_json::Value> {
    let backends = state.engine.get_backends().await?;
    Ok(Json(json!({ "Backends": backends })))
}

pub async fn get_backend(State(state): State<AdminState>, Path(id): Path<String>) -> ApiResult<Backend> {
    Ok(Json(state.engine.get_backend(&BackendKey::new(id)).await?))
}

pub async fn upsert_backend(
    State(state): State<AdminState>,
    Json(body): Json<BackendBody>,
) -> ApiResult<Backend> {
    state.engine.upsert_backend(&body.backend).await?;
    tracing::info!(backend = %body.backend.id, "Backend upserted");
    Ok(Json(body.backend))
}

pub async fn delete_backend(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> ApiResult<serde_json::Value> {
    state.engine.delete_backend(&BackendKey::new(id.clone())).await?;
    Ok(deleted(format!("backend {}", id)))
}

pub async fn get_servers(
    State(state): State<AdminState>,
    Path(backend): Path<String>,
) -> ApiResult<serde_json::Value> {
    let servers = state.engine.get_servers(&BackendKey::new(backend)).await?;
    Ok(Json(json!({ "Servers": servers })))
}

pub async fn get_server(
    State(state): State<AdminState>,
    Path((backend, id)): Path<(String, String)>,
) -> ApiResult<Server> {
    let key = ServerKey::new(BackendKey::new(backend), id);
    Ok(Json(state.engine.get_server(&key).await?))
}

pub async fn upsert_server(
    State(state): State<AdminState>,
    Path(backend): Path<String>,
    Json(body): Json<ServerBody>,
) -> ApiResult<Server> {
    let ttl = parse_ttl(&body.ttl)?;
    state
        .engine
        .upsert_server(&BackendKey::new(backend.clone()), &body.server, ttl)
        .await?;
    tracing::info!(backend = %backend, server = %body.server.id, "Server upserted");
    Ok(Json(body.server))
}

pub async fn delete_server(
    State(state): State<AdminState>,
    Path((backend, id)): Path<(String, String)>,
) -> ApiResult<serde_json::Value> {
    let key = ServerKey::new(BackendKey::new(backend), id);
    state.engine.delete_server(&key).await?;
    Ok(deleted(format!("server {}", key)))
}

// Frontends and middlewares

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FrontendBody {
    pub frontend: Frontend,
    #[serde(default, rename = "TTL")]
    pub ttl: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MiddlewareBody {
    pub middleware: Middleware,
    #[serde(default, rename = "TTL")]
    pub ttl: String,
}

pub async fn get_frontends(State(state): State<AdminState>) -> ApiResult<serde_json::Value> {
    let frontends = state.engine.get_frontends().await?;
    Ok(Json(json!({ "Frontends": frontends })))
}

pub async fn get_frontend(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> ApiResult<Frontend> {
    Ok(Json(state.engine.get_frontend(&FrontendKey::new(id)).await?))
}

pub async fn upsert_frontend(
    State(state): State<AdminState>,
    Json(body): Json<FrontendBody>,
) -> ApiResult<Frontend> {
    let ttl = parse_ttl(&body.ttl)?;
    state.engine.upsert_frontend(&body.frontend, ttl).await?;
    tracing::info!(frontend = %body.frontend.id, route = %body.frontend.route, "Frontend upserted");
    Ok(Json(body.frontend))
}

pub async fn delete_frontend(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> ApiResult<serde_json::Value> {
    state.engine.delete_frontend(&FrontendKey::new(id.clone())).await?;
    Ok(deleted(format!("frontend {}", id)))
}

pub async fn get_middlewares(
    State(state): State<AdminState>,
    Path(frontend): Path<String>,
) -> ApiResult<serde_json::Value> {
    let middlewares = state.engine.get_middlewares(&FrontendKey::new(frontend)).await?;
    Ok(Json(json!({ "Middlewares": middlewares })))
}

pub async fn get_middleware(
    State(state): State<AdminState>,
    Path((frontend, id)): Path<(String, String)>,
) -> ApiResult<Middleware> {
    let key = MiddlewareKey::new(FrontendKey::new(frontend), id);
    Ok(Json(state.engine.get_middleware(&key).await?))
}

pub async fn upsert_middleware(
    State(state): State<AdminState>,
    Path(frontend): Path<String>,
    Json(body): Json<MiddlewareBody>,
) -> ApiResult<Middleware> {
    let ttl = parse_ttl(&body.ttl)?;
    state
        .engine
        .upsert_middleware(&FrontendKey::new(frontend.clone()), &body.middleware, ttl)
        .await?;
    tracing::info!(
        frontend = %frontend,
        middleware = %body.middleware.id,
        kind = %body.middleware.kind,
        "Middleware upserted"
    );
    Ok(Json(body.middleware))
}

pub async fn delete_middleware(
    State(state): State<AdminState>,
    Path((frontend, id)): Path<(String, String)>,
) -> ApiResult<serde_json::Value> {
    let key = MiddlewareKey::new(FrontendKey::new(frontend), id);
    state.engine.delete_middleware(&key).await?;
    Ok(deleted(format!("middleware {}", key)))
}
