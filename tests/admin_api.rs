//! Admin API round trips and error mapping.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use reverse_proxy::admin::{setup_admin_router, AdminState};

use common::engine;

fn app() -> Router {
    let (_store, engine) = engine();
    setup_admin_router(AdminState::new(engine, "key"))
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder()
        .method(method)
        .uri(uri)
        .header("Authorization", "Bearer key");
    let body = match body {
        Some(v) => {
            req = req.header("Content-Type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_backend_frontend_round_trip() {
    let app = app();

    let (status, _) = call(&app, "POST", "/v2/backends", Some(json!({"Backend": {"Id": "b1", "Type": "http"}}))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(
        &app,
        "POST",
        "/v2/backends/b1/servers",
        Some(json!({"Server": {"Id": "s1", "URL": "http://127.0.0.1:5000"}, "TTL": "30s"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(
        &app,
        "POST",
        "/v2/frontends",
        Some(json!({"Frontend": {"Id": "f1", "Route": "PathPrefix(\"/\")", "Type": "http", "BackendId": "b1"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, "GET", "/v2/frontends/f1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["BackendId"], "b1");

    let (_, body) = call(&app, "GET", "/v2/backends/b1/servers", None).await;
    assert_eq!(body["Servers"][0]["URL"], "http://127.0.0.1:5000");

    let (status, _) = call(
        &app,
        "POST",
        "/v2/frontends/f1/middlewares",
        Some(json!({"Middleware": {
            "Id": "buf",
            "Priority": 1,
            "Type": "buffer",
            "Middleware": {"Retry": "IsNetworkError() && Attempts() <= 2"}
        }})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = call(&app, "GET", "/v2/frontends/f1/middlewares/buf", None).await;
    assert_eq!(body["Type"], "buffer");

    let (status, _) = call(&app, "DELETE", "/v2/frontends/f1", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, "DELETE", "/v2/backends/b1", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_error_mapping() {
    let app = app();

    let (status, body) = call(&app, "GET", "/v2/backends/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["message"].as_str().unwrap().contains("not found"));

    // Frontend pointing at an unknown backend.
    let (status, _) = call(
        &app,
        "POST",
        "/v2/frontends",
        Some(json!({"Frontend": {"Id": "f1", "Route": "Path(\"/\")", "BackendId": "nope"}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let listener = json!({"Listener": {"Id": "l1", "Protocol": "http", "Address": {"Address": "0.0.0.0:80"}}});
    let (status, _) = call(&app, "POST", "/v2/listeners", Some(listener)).await;
    assert_eq!(status, StatusCode::OK);
    let clash = json!({"Listener": {"Id": "l2", "Protocol": "http", "Address": {"Address": "0.0.0.0:80"}}});
    let (status, _) = call(&app, "POST", "/v2/listeners", Some(clash)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(
        &app,
        "POST",
        "/v2/backends/b1/servers",
        Some(json!({"Server": {"Id": "s1", "URL": "http://x"}, "TTL": "soon"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_middleware_with_bad_condition_rejected() {
    let app = app();
    call(&app, "POST", "/v2/backends", Some(json!({"Backend": {"Id": "b1"}}))).await;
    call(
        &app,
        "POST",
        "/v2/frontends",
        Some(json!({"Frontend": {"Id": "f1", "Route": "Path(\"/\")", "BackendId": "b1"}})),
    )
    .await;

    let (status, _) = call(
        &app,
        "POST",
        "/v2/frontends/f1/middlewares",
        Some(json!({"Middleware": {
            "Id": "cb",
            "Type": "cbreaker",
            "Middleware": {"Condition": "Bogus() > 1", "Fallback": {"Type": "response", "Action": {}}}
        }})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
