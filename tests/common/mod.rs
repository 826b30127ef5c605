//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use reverse_proxy::engine::{
    Backend, BackendSettings, ChangeEvent, Engine, Frontend, FrontendSettings, Server,
};
use reverse_proxy::MemoryStore;

pub const PREFIX: &str = "/vulcand";

/// A store plus an engine connected to it through its own session.
pub fn engine() -> (MemoryStore, Arc<Engine>) {
    let store = MemoryStore::new();
    let engine = Engine::new(Arc::new(store.clone()), PREFIX, None).unwrap();
    (store, Arc::new(engine))
}

pub fn backend(id: &str) -> Backend {
    Backend {
        id: id.to_string(),
        kind: "http".to_string(),
        settings: BackendSettings::default(),
    }
}

pub fn frontend(id: &str, route: &str, backend_id: &str) -> Frontend {
    Frontend {
        id: id.to_string(),
        route: route.to_string(),
        kind: "http".to_string(),
        backend_id: backend_id.to_string(),
        settings: FrontendSettings::default(),
    }
}

pub fn server(id: &str, url: &str) -> Server {
    Server {
        id: id.to_string(),
        url: url.to_string(),
    }
}

/// Next event, failing the test if none arrives in time.
pub async fn next_event(rx: &mut mpsc::Receiver<ChangeEvent>) -> ChangeEvent {
    tokio::time::timeout(Duration::from_secs(30), rx.recv())
        .await
        .expect("timed out waiting for change event")
        .expect("event channel closed")
}

/// Mock upstream answering with `statuses` in order (the last one repeats).
/// Returns its address and a counter of requests served.
pub async fn start_backend(statuses: Vec<u16>) -> (SocketAddr, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let app = Router::new().fallback(move |req: Request<Body>| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        let status = statuses[n.min(statuses.len() - 1)];
        async move {
            let path = req.uri().path().to_string();
            let mut resp = Response::new(Body::from(format!("upstream {}", path)));
            *resp.status_mut() = StatusCode::from_u16(status).unwrap();
            resp
        }
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, hits)
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Polls `check` until it holds or a few seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
