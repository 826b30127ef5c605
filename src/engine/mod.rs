//! Configuration sync engine.
//!
//! # Responsibilities
//! - Typed CRUD over the routing topology stored in a [`KvStore`]
//! - Referential integrity between frontends, backends and their children
//! - Compile-time validation of routes, retry predicates and middleware specs
//! - Translating raw store notifications into [`ChangeEvent`]s
//!
//! # Data Flow
//! ```text
//! admin API ──► Engine::upsert_* / delete_* ──► KvStore
//!                                                  │ watch
//! routing table ◄── mpsc<ChangeEvent> ◄── Engine::subscribe
//! ```
//!
//! # Design Decisions
//! - The store client sits behind `ArcSwap` so `reconnect()` can replace it
//!   while readers hold the old one
//! - Upsert events re-read the entity instead of decoding the watch payload,
//!   so consumers always see what CRUD readers see
//! - Update (TTL refresh) and compare-and-swap notifications produce no event

pub mod error;
pub mod events;
pub mod keys;
pub mod model;
pub mod seal;

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::resilience::MiddlewareSpec;
use crate::store::{Action, KvStore, SetOptions, StoreConnector, StoreError, WatchEvent};

pub use error::EngineError;
pub use events::ChangeEvent;
pub use keys::{EntityRef, KeyLayout};
pub use model::*;
pub use seal::{SealError, Sealer};

struct Connection {
    store: Arc<dyn KvStore>,
}

/// Frontend with the middlewares stored under it.
#[derive(Debug, Clone)]
pub struct FrontendSnapshot {
    pub frontend: Frontend,
    pub middlewares: Vec<Middleware>,
}

/// Backend with its servers.
#[derive(Debug, Clone)]
pub struct BackendSnapshot {
    pub backend: Backend,
    pub servers: Vec<Server>,
}

/// Whole topology as of `index`. Subscribing after `index` yields every
/// later change.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub index: u64,
    pub hosts: Vec<Host>,
    pub listeners: Vec<Listener>,
    pub frontends: Vec<FrontendSnapshot>,
    pub backends: Vec<BackendSnapshot>,
}

/// Host as written to the store, with the key pair sealed.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StoredHost {
    name: String,
    settings: StoredHostSettings,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StoredHostSettings {
    #[serde(default)]
    default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key_pair: Option<String>,
}

pub struct Engine {
    conn: ArcSwap<Connection>,
    connector: Arc<dyn StoreConnector>,
    layout: KeyLayout,
    sealer: Option<Arc<dyn Sealer>>,
}

impl Engine {
    pub fn new(
        connector: Arc<dyn StoreConnector>,
        prefix: &str,
        sealer: Option<Arc<dyn Sealer>>,
    ) -> Result<Self, EngineError> {
        let store = connector.connect()?;
        Ok(Self {
            conn: ArcSwap::from_pointee(Connection { store }),
            connector,
            layout: KeyLayout::new(prefix),
            sealer,
        })
    }

    pub fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    fn store(&self) -> Arc<dyn KvStore> {
        Arc::clone(&self.conn.load().store)
    }

    /// Drops the current store client and connects a fresh one.
    pub async fn reconnect(&self) -> Result<(), EngineError> {
        let store = self.connector.connect()?;
        let old = self.conn.swap(Arc::new(Connection { store }));
        old.store.close().await;
        tracing::info!(prefix = %self.layout.prefix(), "Reconnected to configuration store");
        Ok(())
    }

    /// Closes the store client; a running `subscribe` returns `Ok(())`.
    pub async fn close(&self) {
        self.store().close().await;
    }

    pub async fn current_index(&self) -> Result<u64, EngineError> {
        Ok(self.store().current_index().await?)
    }

    pub async fn snapshot(&self) -> Result<Snapshot, EngineError> {
        let index = self.current_index().await?;
        let mut frontends = Vec::new();
        for frontend in self.get_frontends().await? {
            let middlewares = self.get_middlewares(&frontend.key()).await?;
            frontends.push(FrontendSnapshot {
                frontend,
                middlewares,
            });
        }
        let mut backends = Vec::new();
        for backend in self.get_backends().await? {
            let servers = self.get_servers(&backend.key()).await?;
            backends.push(BackendSnapshot { backend, servers });
        }
        Ok(Snapshot {
            index,
            hosts: self.get_hosts().await?,
            listeners: self.get_listeners().await?,
            frontends,
            backends,
        })
    }

    // --- hosts ---

    pub async fn get_hosts(&self) -> Result<Vec<Host>, EngineError> {
        let mut hosts = Vec::new();
        for name in self.children(&self.layout.hosts_dir()).await? {
            match self.get_host(&HostKey::new(name)).await {
                Ok(host) => hosts.push(host),
                Err(EngineError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(hosts)
    }

    pub async fn get_host(&self, key: &HostKey) -> Result<Host, EngineError> {
        let stored: StoredHost = self.read_json(&self.layout.host(key)).await?;
        let key_pair = match stored.settings.key_pair {
            None => None,
            Some(sealed) => {
                let sealer = self.sealer()?;
                let plain = seal::open_from_string(sealer.as_ref(), &sealed)
                    .map_err(|e| EngineError::Seal(e.to_string()))?;
                Some(serde_json::from_slice::<KeyPair>(&plain)?)
            }
        };
        Ok(Host {
            name: stored.name,
            settings: HostSettings {
                default: stored.settings.default,
                key_pair,
            },
        })
    }

    pub async fn upsert_host(&self, host: &Host) -> Result<(), EngineError> {
        check_id("host name", &host.name)?;
        let key_pair = match &host.settings.key_pair {
            None => None,
            Some(kp) => {
                let sealer = self.sealer()?;
                let plain = serde_json::to_vec(kp)?;
                Some(
                    seal::seal_to_string(sealer.as_ref(), &plain)
                        .map_err(|e| EngineError::Seal(e.to_string()))?,
                )
            }
        };
        let stored = StoredHost {
            name: host.name.clone(),
            settings: StoredHostSettings {
                default: host.settings.default,
                key_pair,
            },
        };
        self.write_json(&self.layout.host(&host.key()), &stored, None).await
    }

    pub async fn delete_host(&self, key: &HostKey) -> Result<(), EngineError> {
        self.remove(&self.layout.host_dir(key), true).await
    }

    // --- listeners ---

    pub async fn get_listeners(&self) -> Result<Vec<Listener>, EngineError> {
        let mut listeners = Vec::new();
        for id in self.children(&self.layout.listeners_dir()).await? {
            match self.get_listener(&ListenerKey::new(id)).await {
                Ok(l) => listeners.push(l),
                Err(EngineError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(listeners)
    }

    pub async fn get_listener(&self, key: &ListenerKey) -> Result<Listener, EngineError> {
        self.read_json(&self.layout.listener(key)).await
    }

    pub async fn upsert_listener(&self, listener: &Listener) -> Result<(), EngineError> {
        check_id("listener id", &listener.id)?;
        match listener.protocol.as_str() {
            "http" | "https" => {}
            other => {
                return Err(EngineError::invalid(format!(
                    "listener {}: unsupported protocol {:?}",
                    listener.id, other
                )))
            }
        }
        if listener.address.address.is_empty() {
            return Err(EngineError::invalid(format!(
                "listener {}: address is required",
                listener.id
            )));
        }
        for existing in self.get_listeners().await? {
            if existing.id != listener.id && existing.address == listener.address {
                return Err(EngineError::AlreadyExists(format!(
                    "listener {} already uses {}://{}",
                    existing.id, listener.address.network, listener.address.address
                )));
            }
        }
        self.write_json(&self.layout.listener(&listener.key()), listener, None)
            .await
    }

    pub async fn delete_listener(&self, key: &ListenerKey) -> Result<(), EngineError> {
        self.remove(&self.layout.listener(key), false).await
    }

    // --- frontends ---

    pub async fn get_frontends(&self) -> Result<Vec<Frontend>, EngineError> {
        let mut frontends = Vec::new();
        for id in self.children(&self.layout.frontends_dir()).await? {
            match self.get_frontend(&FrontendKey::new(id)).await {
                Ok(f) => frontends.push(f),
                Err(EngineError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(frontends)
    }

    pub async fn get_frontend(&self, key: &FrontendKey) -> Result<Frontend, EngineError> {
        self.read_json(&self.layout.frontend(key)).await
    }

    pub async fn upsert_frontend(
        &self,
        frontend: &Frontend,
        ttl: Option<Duration>,
    ) -> Result<(), EngineError> {
        check_id("frontend id", &frontend.id)?;
        if frontend.kind != "http" {
            return Err(EngineError::invalid(format!(
                "frontend {}: unsupported type {:?}",
                frontend.id, frontend.kind
            )));
        }
        crate::routing::matcher::compile_route(&frontend.route).map_err(|e| {
            EngineError::invalid(format!("frontend {}: route: {}", frontend.id, e))
        })?;
        let failover = &frontend.settings.failover_predicate;
        if !failover.is_empty() {
            crate::resilience::buffer::compile_retry(failover).map_err(|e| {
                EngineError::invalid(format!("frontend {}: failover predicate: {}", frontend.id, e))
            })?;
        }
        let limits = frontend.settings.limits;
        if limits.max_body_bytes < -1 || limits.max_mem_body_bytes < -1 {
            return Err(EngineError::invalid(format!(
                "frontend {}: body limits must be >= -1",
                frontend.id
            )));
        }

        match self.get_backend(&frontend.backend_key()).await {
            Ok(_) => {}
            Err(EngineError::NotFound(_)) => {
                return Err(EngineError::invalid(format!(
                    "frontend {}: backend {} does not exist",
                    frontend.id, frontend.backend_id
                )))
            }
            Err(e) => return Err(e),
        }

        for existing in self.get_frontends().await? {
            if existing.id != frontend.id && existing.route == frontend.route {
                return Err(EngineError::AlreadyExists(format!(
                    "frontend {} already uses route {}",
                    existing.id, frontend.route
                )));
            }
        }

        self.write_json(&self.layout.frontend(&frontend.key()), frontend, ttl)
            .await
    }

    /// Removes the frontend together with its middlewares.
    pub async fn delete_frontend(&self, key: &FrontendKey) -> Result<(), EngineError> {
        self.remove(&self.layout.frontend_dir(key), true).await
    }

    // --- middlewares ---

    pub async fn get_middlewares(&self, frontend: &FrontendKey) -> Result<Vec<Middleware>, EngineError> {
        let mut middlewares = Vec::new();
        for id in self.children(&self.layout.middlewares_dir(frontend)).await? {
            match self
                .get_middleware(&MiddlewareKey::new(frontend.clone(), id))
                .await
            {
                Ok(m) => middlewares.push(m),
                Err(EngineError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        middlewares.sort_by(|a, b| (a.priority, &a.id).cmp(&(b.priority, &b.id)));
        Ok(middlewares)
    }

    pub async fn get_middleware(&self, key: &MiddlewareKey) -> Result<Middleware, EngineError> {
        self.read_json(&self.layout.middleware(key)).await
    }

    pub async fn upsert_middleware(
        &self,
        frontend: &FrontendKey,
        middleware: &Middleware,
        ttl: Option<Duration>,
    ) -> Result<(), EngineError> {
        check_id("middleware id", &middleware.id)?;
        MiddlewareSpec::from_json(&middleware.kind, &middleware.middleware).map_err(|e| {
            EngineError::invalid(format!("middleware {}: {}", middleware.id, e))
        })?;
        self.get_frontend(frontend).await?;
        let key = MiddlewareKey::new(frontend.clone(), middleware.id.clone());
        self.write_json(&self.layout.middleware(&key), middleware, ttl)
            .await
    }

    pub async fn delete_middleware(&self, key: &MiddlewareKey) -> Result<(), EngineError> {
        self.remove(&self.layout.middleware(key), false).await
    }

    // --- backends ---

    pub async fn get_backends(&self) -> Result<Vec<Backend>, EngineError> {
        let mut backends = Vec::new();
        for id in self.children(&self.layout.backends_dir()).await? {
            match self.get_backend(&BackendKey::new(id)).await {
                Ok(b) => backends.push(b),
                Err(EngineError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(backends)
    }

    pub async fn get_backend(&self, key: &BackendKey) -> Result<Backend, EngineError> {
        self.read_json(&self.layout.backend(key)).await
    }

    pub async fn upsert_backend(&self, backend: &Backend) -> Result<(), EngineError> {
        check_id("backend id", &backend.id)?;
        if backend.kind != "http" {
            return Err(EngineError::invalid(format!(
                "backend {}: unsupported type {:?}",
                backend.id, backend.kind
            )));
        }
        let timeouts = &backend.settings.timeouts;
        for (name, value) in [("read", &timeouts.read), ("dial", &timeouts.dial)] {
            if !value.is_empty() {
                crate::duration::parse_duration(value).map_err(|e| {
                    EngineError::invalid(format!("backend {}: {} timeout: {}", backend.id, name, e))
                })?;
            }
        }
        self.write_json(&self.layout.backend(&backend.key()), backend, None)
            .await
    }

    /// Fails with `InvalidFormat` while any frontend references the backend.
    pub async fn delete_backend(&self, key: &BackendKey) -> Result<(), EngineError> {
        let users: Vec<String> = self
            .get_frontends()
            .await?
            .into_iter()
            .filter(|f| f.backend_id == key.id)
            .map(|f| f.id)
            .collect();
        if !users.is_empty() {
            return Err(EngineError::invalid(format!(
                "backend {} is used by frontends: {}",
                key.id,
                users.join(", ")
            )));
        }
        self.remove(&self.layout.backend_dir(key), true).await
    }

    // --- servers ---

    pub async fn get_servers(&self, backend: &BackendKey) -> Result<Vec<Server>, EngineError> {
        let mut servers = Vec::new();
        for id in self.children(&self.layout.servers_dir(backend)).await? {
            match self.get_server(&ServerKey::new(backend.clone(), id)).await {
                Ok(s) => servers.push(s),
                Err(EngineError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(servers)
    }

    pub async fn get_server(&self, key: &ServerKey) -> Result<Server, EngineError> {
        self.read_json(&self.layout.server(key)).await
    }

    pub async fn upsert_server(
        &self,
        backend: &BackendKey,
        server: &Server,
        ttl: Option<Duration>,
    ) -> Result<(), EngineError> {
        check_id("server id", &server.id)?;
        let url = url::Url::parse(&server.url)
            .map_err(|e| EngineError::invalid(format!("server {}: url: {}", server.id, e)))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(EngineError::invalid(format!(
                "server {}: url must be absolute http(s), got {}",
                server.id, server.url
            )));
        }
        self.get_backend(backend).await?;
        let key = ServerKey::new(backend.clone(), server.id.clone());
        self.write_json(&self.layout.server(&key), server, ttl).await
    }

    pub async fn delete_server(&self, key: &ServerKey) -> Result<(), EngineError> {
        self.remove(&self.layout.server(key), false).await
    }

    // --- change stream ---

    /// Streams changes after `after_index` into `events` until cancelled.
    ///
    /// Returns `Ok(())` when `cancel` flips to `true` (or its sender is
    /// dropped), when the receiver goes away, or when the store client is
    /// closed. Any other watch failure is returned and the caller is expected
    /// to resubscribe.
    pub async fn subscribe(
        &self,
        events: mpsc::Sender<ChangeEvent>,
        after_index: u64,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<(), EngineError> {
        let store = self.store();
        let prefix = self.layout.prefix().to_string();
        let mut index = after_index;
        tracing::info!(prefix = %prefix, after_index, "Subscribing to configuration changes");

        loop {
            if *cancel.borrow() {
                return Ok(());
            }
            let watched = tokio::select! {
                res = store.watch(&prefix, index + 1) => res,
                _ = cancelled(&mut cancel) => return Ok(()),
            };
            let event = match watched {
                Ok(event) => event,
                Err(StoreError::WatchStopped) => {
                    tracing::info!(prefix = %prefix, "Configuration watch stopped");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(prefix = %prefix, index, error = %e, "Configuration watch failed");
                    return Err(EngineError::Store(e));
                }
            };
            index = event.index();

            let change = match self.translate(&event).await {
                Ok(Some(change)) => change,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(
                        key = %event.node.key,
                        action = %event.action,
                        error = %e,
                        "Skipping change that could not be loaded"
                    );
                    continue;
                }
            };
            tracing::debug!(kind = change.kind(), index, "Configuration change");

            tokio::select! {
                sent = events.send(change) => {
                    if sent.is_err() {
                        return Ok(());
                    }
                }
                _ = cancelled(&mut cancel) => return Ok(()),
            }
        }
    }

    async fn translate(&self, event: &WatchEvent) -> Result<Option<ChangeEvent>, EngineError> {
        let Some(entity) = self.layout.classify(&event.node.key) else {
            return Ok(None);
        };
        let change = match event.action {
            Action::Create | Action::Set => match entity {
                EntityRef::Host(key) => ChangeEvent::HostUpserted(self.get_host(&key).await?),
                EntityRef::Listener(key) => {
                    ChangeEvent::ListenerUpserted(self.get_listener(&key).await?)
                }
                EntityRef::Frontend(key) => {
                    ChangeEvent::FrontendUpserted(self.get_frontend(&key).await?)
                }
                EntityRef::Middleware(key) => ChangeEvent::MiddlewareUpserted {
                    middleware: self.get_middleware(&key).await?,
                    frontend: key.frontend,
                },
                EntityRef::Backend(key) => {
                    ChangeEvent::BackendUpserted(self.get_backend(&key).await?)
                }
                EntityRef::Server(key) => ChangeEvent::ServerUpserted {
                    server: self.get_server(&key).await?,
                    backend: key.backend,
                },
            },
            Action::Delete | Action::Expire => match entity {
                EntityRef::Host(key) => ChangeEvent::HostDeleted(key),
                EntityRef::Listener(key) => ChangeEvent::ListenerDeleted(key),
                EntityRef::Frontend(key) => ChangeEvent::FrontendDeleted(key),
                EntityRef::Middleware(key) => ChangeEvent::MiddlewareDeleted(key),
                EntityRef::Backend(key) => ChangeEvent::BackendDeleted(key),
                EntityRef::Server(key) => ChangeEvent::ServerDeleted(key),
            },
            Action::Update | Action::CompareAndSwap => return Ok(None),
        };
        Ok(Some(change))
    }

    // --- store helpers ---

    fn sealer(&self) -> Result<&Arc<dyn Sealer>, EngineError> {
        self.sealer
            .as_ref()
            .ok_or_else(|| EngineError::Seal("no sealer configured".to_string()))
    }

    async fn children(&self, dir: &str) -> Result<Vec<String>, EngineError> {
        match self.store().list(dir).await {
            Ok(names) => Ok(names),
            Err(StoreError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<T, EngineError> {
        let node = self.store().get(key).await?;
        if node.dir {
            return Err(EngineError::NotFound(key.to_string()));
        }
        Ok(serde_json::from_str(&node.value)?)
    }

    async fn write_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), EngineError> {
        let json = serde_json::to_string(value)?;
        self.store()
            .set(key, &json, SetOptions::with_ttl(ttl))
            .await?;
        Ok(())
    }

    async fn remove(&self, key: &str, recursive: bool) -> Result<(), EngineError> {
        Ok(self.store().delete(key, recursive).await?)
    }
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    // A dropped sender counts as cancellation.
    let _ = cancel.wait_for(|stop| *stop).await;
}

fn check_id(what: &str, id: &str) -> Result<(), EngineError> {
    if id.is_empty() || id.contains('/') {
        return Err(EngineError::invalid(format!(
            "{} must be non-empty and must not contain '/': {:?}",
            what, id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::seal::testing::XorSealer;
    use crate::store::MemoryStore;

    fn engine_with(store: &MemoryStore) -> Engine {
        Engine::new(Arc::new(store.clone()), "/vulcand", Some(Arc::new(XorSealer(42)))).unwrap()
    }

    fn backend(id: &str) -> Backend {
        Backend {
            id: id.into(),
            kind: "http".into(),
            settings: BackendSettings::default(),
        }
    }

    fn frontend(id: &str, backend: &str, route: &str) -> Frontend {
        Frontend {
            id: id.into(),
            route: route.into(),
            kind: "http".into(),
            backend_id: backend.into(),
            settings: FrontendSettings::default(),
        }
    }

    #[tokio::test]
    async fn test_host_key_pair_is_sealed_at_rest() {
        let store = MemoryStore::new();
        let engine = engine_with(&store);
        let host = Host {
            name: "example.com".into(),
            settings: HostSettings {
                default: true,
                key_pair: Some(KeyPair {
                    cert: "CERT".into(),
                    key: "PRIVATE".into(),
                }),
            },
        };
        engine.upsert_host(&host).await.unwrap();

        let raw = store.get("/vulcand/hosts/example.com/host").await.unwrap();
        assert!(!raw.value.contains("PRIVATE"));
        assert_eq!(engine.get_host(&host.key()).await.unwrap(), host);
    }

    #[tokio::test]
    async fn test_key_pair_without_sealer_fails() {
        let store = MemoryStore::new();
        let engine = Engine::new(Arc::new(store), "/vulcand", None).unwrap();
        let host = Host {
            name: "h".into(),
            settings: HostSettings {
                default: false,
                key_pair: Some(KeyPair {
                    cert: "c".into(),
                    key: "k".into(),
                }),
            },
        };
        assert!(matches!(engine.upsert_host(&host).await, Err(EngineError::Seal(_))));
    }

    #[tokio::test]
    async fn test_frontend_requires_existing_backend() {
        let engine = engine_with(&MemoryStore::new());
        let err = engine
            .upsert_frontend(&frontend("f1", "missing", r#"Path("/")"#), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidFormat(_)));
    }

    #[tokio::test]
    async fn test_frontend_route_must_compile() {
        let engine = engine_with(&MemoryStore::new());
        engine.upsert_backend(&backend("b1")).await.unwrap();
        let err = engine
            .upsert_frontend(&frontend("f1", "b1", "Path("), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidFormat(_)));
    }

    #[tokio::test]
    async fn test_duplicate_route_rejected() {
        let engine = engine_with(&MemoryStore::new());
        engine.upsert_backend(&backend("b1")).await.unwrap();
        engine
            .upsert_frontend(&frontend("f1", "b1", r#"Path("/a")"#), None)
            .await
            .unwrap();
        // Re-upserting the same frontend is fine.
        engine
            .upsert_frontend(&frontend("f1", "b1", r#"Path("/a")"#), None)
            .await
            .unwrap();
        assert!(matches!(
            engine
                .upsert_frontend(&frontend("f2", "b1", r#"Path("/a")"#), None)
                .await,
            Err(EngineError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_listener_address_rejected() {
        let engine = engine_with(&MemoryStore::new());
        let listener = |id: &str| Listener {
            id: id.into(),
            protocol: "http".into(),
            address: Address {
                network: "tcp".into(),
                address: "0.0.0.0:8081".into(),
            },
            scope: String::new(),
        };
        engine.upsert_listener(&listener("l1")).await.unwrap();
        assert!(matches!(
            engine.upsert_listener(&listener("l2")).await,
            Err(EngineError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_backend_in_use_cannot_be_deleted() {
        let engine = engine_with(&MemoryStore::new());
        engine.upsert_backend(&backend("b1")).await.unwrap();
        engine
            .upsert_frontend(&frontend("f1", "b1", r#"Path("/")"#), None)
            .await
            .unwrap();
        assert!(matches!(
            engine.delete_backend(&BackendKey::new("b1")).await,
            Err(EngineError::InvalidFormat(_))
        ));
        engine.delete_frontend(&FrontendKey::new("f1")).await.unwrap();
        engine.delete_backend(&BackendKey::new("b1")).await.unwrap();
        assert!(matches!(
            engine.get_backend(&BackendKey::new("b1")).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_children_require_parent() {
        let engine = engine_with(&MemoryStore::new());
        let server = Server {
            id: "s1".into(),
            url: "http://127.0.0.1:5000".into(),
        };
        assert!(matches!(
            engine.upsert_server(&BackendKey::new("nope"), &server, None).await,
            Err(EngineError::NotFound(_))
        ));

        let mw = Middleware {
            id: "cb".into(),
            priority: 1,
            kind: "cbreaker".into(),
            middleware: serde_json::json!({
                "Condition": "NetworkErrorRatio() > 0.5",
                "Fallback": {"Type": "response", "Action": {"StatusCode": 503, "Body": "down"}}
            }),
        };
        assert!(matches!(
            engine.upsert_middleware(&FrontendKey::new("nope"), &mw, None).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_middleware_and_server_rejected() {
        let engine = engine_with(&MemoryStore::new());
        engine.upsert_backend(&backend("b1")).await.unwrap();
        engine
            .upsert_frontend(&frontend("f1", "b1", r#"Path("/")"#), None)
            .await
            .unwrap();
        let mw = Middleware {
            id: "x".into(),
            priority: 0,
            kind: "rewrite".into(),
            middleware: serde_json::json!({}),
        };
        assert!(matches!(
            engine.upsert_middleware(&FrontendKey::new("f1"), &mw, None).await,
            Err(EngineError::InvalidFormat(_))
        ));
        let bad = Server {
            id: "s1".into(),
            url: "not a url".into(),
        };
        assert!(matches!(
            engine.upsert_server(&BackendKey::new("b1"), &bad, None).await,
            Err(EngineError::InvalidFormat(_))
        ));
    }

    #[tokio::test]
    async fn test_middlewares_sorted_by_priority_then_id() {
        let engine = engine_with(&MemoryStore::new());
        engine.upsert_backend(&backend("b1")).await.unwrap();
        engine
            .upsert_frontend(&frontend("f1", "b1", r#"Path("/")"#), None)
            .await
            .unwrap();
        for (id, priority) in [("c", 1), ("a", 2), ("b", 1)] {
            let mw = Middleware {
                id: id.into(),
                priority,
                kind: "buffer".into(),
                middleware: serde_json::json!({}),
            };
            engine
                .upsert_middleware(&FrontendKey::new("f1"), &mw, None)
                .await
                .unwrap();
        }
        let ids: Vec<String> = engine
            .get_middlewares(&FrontendKey::new("f1"))
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_subscribe_ends_on_cancel_and_on_close() {
        let store = MemoryStore::new();
        let engine = Arc::new(engine_with(&store));
        let (tx, _rx) = mpsc::channel(4);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let e = Arc::clone(&engine);
        let task = tokio::spawn(async move { e.subscribe(tx, 0, cancel_rx).await });
        tokio::task::yield_now().await;
        cancel_tx.send(true).unwrap();
        assert!(task.await.unwrap().is_ok());

        let (tx, _rx) = mpsc::channel(4);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let e = Arc::clone(&engine);
        let task = tokio::spawn(async move { e.subscribe(tx, 0, cancel_rx).await });
        tokio::task::yield_now().await;
        engine.close().await;
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_subscribe_surfaces_cleared_index() {
        let store = MemoryStore::with_history(1);
        let engine = engine_with(&store);
        engine.upsert_backend(&backend("b1")).await.unwrap();
        engine.upsert_backend(&backend("b2")).await.unwrap();
        let (tx, _rx) = mpsc::channel(4);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        assert!(matches!(
            engine.subscribe(tx, 0, cancel_rx).await,
            Err(EngineError::Store(StoreError::EventIndexCleared { .. }))
        ));
    }

    #[tokio::test]
    async fn test_reconnect_keeps_data() {
        let store = MemoryStore::new();
        let engine = engine_with(&store);
        engine.upsert_backend(&backend("b1")).await.unwrap();
        engine.reconnect().await.unwrap();
        assert_eq!(engine.get_backends().await.unwrap().len(), 1);
    }
}
