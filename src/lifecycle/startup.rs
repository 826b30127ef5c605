//! Keeping the routing table in sync with the configuration store.
//!
//! # Responsibilities
//! - Load a snapshot, then apply every later change in order
//! - Restart from a fresh snapshot when the subscription ends early
//!   (watch failure, history window passed, client closed)
//!
//! # Design Decisions
//! - Events are applied from a single task, in the order they arrive
//! - Restarts back off exponentially, reset after a clean snapshot

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::engine::Engine;
use crate::lifecycle::Shutdown;
use crate::routing::RouteTable;

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Runs until shutdown is triggered.
pub async fn run_sync(
    engine: Arc<Engine>,
    table: Arc<RouteTable>,
    event_buffer: usize,
    shutdown: Shutdown,
) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        if shutdown.is_triggered() {
            return;
        }

        match engine.snapshot().await {
            Ok(snapshot) => {
                backoff = INITIAL_BACKOFF;
                let index = snapshot.index;
                table.reconcile(snapshot);

                let (tx, mut rx) = mpsc::channel(event_buffer.max(1));
                let apply = async {
                    while let Some(event) = rx.recv().await {
                        table.apply(event);
                    }
                };
                let (result, ()) = tokio::join!(engine.subscribe(tx, index, shutdown.subscribe()), apply);
                if let Err(e) = result {
                    tracing::warn!(error = %e, "Subscription ended, resynchronizing");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, delay = ?backoff, "Failed to load configuration snapshot");
            }
        }

        if shutdown.is_triggered() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown.wait() => return,
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
        if let Err(e) = engine.reconnect().await {
            tracing::warn!(error = %e, "Failed to reconnect to configuration store");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Backend, BackendSettings, FrontendKey};
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_sync_applies_changes_and_stops() {
        let store = MemoryStore::new();
        let engine = Arc::new(Engine::new(Arc::new(store), "/test", None).unwrap());
        let table = Arc::new(RouteTable::new());
        let shutdown = Shutdown::new();

        let task = tokio::spawn(run_sync(
            Arc::clone(&engine),
            Arc::clone(&table),
            8,
            shutdown.clone(),
        ));

        engine
            .upsert_backend(&Backend {
                id: "b1".into(),
                kind: "http".into(),
                settings: BackendSettings::default(),
            })
            .await
            .unwrap();
        engine
            .upsert_frontend(
                &crate::engine::Frontend {
                    id: "f1".into(),
                    route: r#"Path("/")"#.into(),
                    kind: "http".into(),
                    backend_id: "b1".into(),
                    settings: Default::default(),
                },
                None,
            )
            .await
            .unwrap();

        for _ in 0..100 {
            if table.frontend(&FrontendKey::new("f1")).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(table.backend_count(), 1);
        assert!(table.frontend(&FrontendKey::new("f1")).is_some());

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
