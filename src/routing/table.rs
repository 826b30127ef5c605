//! Live routing table fed by change events.
//!
//! # Responsibilities
//! - Hold the current hosts, listeners, frontends, middlewares, backends
//!   and servers
//! - Compile route and middleware settings as they arrive
//! - Resolve a request to its frontend and build the service chain
//!
//! # Design Decisions
//! - A change that fails to compile is logged and the previous version of
//!   the entity is kept
//! - Circuit breakers live as long as their middleware entry, so breaker
//!   state survives unrelated updates
//! - When several routes match, the longest route expression wins, ties go
//!   to the smallest frontend id

use std::collections::{BTreeMap, HashSet};
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::Request;
use axum::response::Response;
use dashmap::DashMap;
use tower::util::BoxCloneService;
use tower::Layer;

use crate::engine::{
    Backend, BackendKey, ChangeEvent, Frontend, FrontendKey, Host, HostKey, Listener, ListenerKey,
    Middleware, MiddlewareKey, Server, ServerKey, Snapshot,
};
use crate::http::proxy::{BackendPool, ForwardService, ForwardSettings};
use crate::predicate::Predicate;
use crate::resilience::{
    BufferLayer, BufferSpec, CircuitBreaker, CircuitBreakerLayer, MiddlewareSpec, SpecError,
};
use crate::routing::matcher::{compile_route, RouteContext};

pub type ProxyService = BoxCloneService<Request, Response, Infallible>;

struct CompiledFrontend {
    frontend: Frontend,
    route: Predicate<RouteContext>,
    buffer: Arc<BufferSpec>,
}

impl CompiledFrontend {
    fn compile(frontend: Frontend) -> Result<Self, SpecError> {
        let route = compile_route(&frontend.route).map_err(|source| SpecError::Predicate {
            field: "Route",
            source,
        })?;
        let settings = &frontend.settings;
        let buffer = BufferSpec::for_frontend(
            settings.limits.max_body_bytes,
            settings.limits.max_mem_body_bytes,
            &settings.failover_predicate,
        )?;
        Ok(Self {
            frontend,
            route,
            buffer: Arc::new(buffer),
        })
    }
}

#[derive(Clone)]
enum CompiledLayer {
    CircuitBreaker(Arc<CircuitBreaker>),
    Buffer(Arc<BufferSpec>),
}

struct CompiledMiddleware {
    middleware: Middleware,
    layer: CompiledLayer,
}

/// A matched frontend and the service that handles its requests.
pub struct Resolved {
    pub frontend: FrontendKey,
    pub service: ProxyService,
}

#[derive(Default)]
pub struct RouteTable {
    hosts: DashMap<HostKey, Host>,
    listeners: DashMap<ListenerKey, Listener>,
    frontends: DashMap<FrontendKey, Arc<CompiledFrontend>>,
    middlewares: DashMap<FrontendKey, BTreeMap<String, Arc<CompiledMiddleware>>>,
    backends: DashMap<BackendKey, Backend>,
    servers: DashMap<BackendKey, BTreeMap<String, Server>>,
    pools: DashMap<BackendKey, Arc<BackendPool>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from a full snapshot.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let table = Self::new();
        table.load(snapshot);
        table
    }

    /// Replays a snapshot as upserts on top of the current contents.
    pub fn load(&self, snapshot: Snapshot) {
        for host in snapshot.hosts {
            self.apply(ChangeEvent::HostUpserted(host));
        }
        for listener in snapshot.listeners {
            self.apply(ChangeEvent::ListenerUpserted(listener));
        }
        for b in snapshot.backends {
            let key = b.backend.key();
            self.apply(ChangeEvent::BackendUpserted(b.backend));
            for server in b.servers {
                self.apply(ChangeEvent::ServerUpserted {
                    backend: key.clone(),
                    server,
                });
            }
        }
        for f in snapshot.frontends {
            let key = f.frontend.key();
            self.apply(ChangeEvent::FrontendUpserted(f.frontend));
            for middleware in f.middlewares {
                self.apply(ChangeEvent::MiddlewareUpserted {
                    frontend: key.clone(),
                    middleware,
                });
            }
        }
        tracing::info!(
            index = snapshot.index,
            frontends = self.frontends.len(),
            backends = self.backends.len(),
            "Routing table loaded"
        );
    }

    /// Brings the table in line with a fresh snapshot: entities missing from
    /// it are deleted, everything else is upserted. Used after the
    /// subscription had to be restarted and changes may have been missed.
    pub fn reconcile(&self, snapshot: Snapshot) {
        let hosts: HashSet<HostKey> = snapshot.hosts.iter().map(Host::key).collect();
        let listeners: HashSet<ListenerKey> = snapshot.listeners.iter().map(Listener::key).collect();
        let mut frontends = HashSet::new();
        let mut middlewares = HashSet::new();
        for f in &snapshot.frontends {
            let key = f.frontend.key();
            for m in &f.middlewares {
                middlewares.insert(MiddlewareKey::new(key.clone(), m.id.clone()));
            }
            frontends.insert(key);
        }
        let mut backends = HashSet::new();
        let mut servers = HashSet::new();
        for b in &snapshot.backends {
            let key = b.backend.key();
            for s in &b.servers {
                servers.insert(ServerKey::new(key.clone(), s.id.clone()));
            }
            backends.insert(key);
        }

        let mut stale = Vec::new();
        stale.extend(
            self.hosts
                .iter()
                .filter(|e| !hosts.contains(e.key()))
                .map(|e| ChangeEvent::HostDeleted(e.key().clone())),
        );
        stale.extend(
            self.listeners
                .iter()
                .filter(|e| !listeners.contains(e.key()))
                .map(|e| ChangeEvent::ListenerDeleted(e.key().clone())),
        );
        for entry in self.middlewares.iter() {
            for id in entry.value().keys() {
                let key = MiddlewareKey::new(entry.key().clone(), id.clone());
                if !middlewares.contains(&key) {
                    stale.push(ChangeEvent::MiddlewareDeleted(key));
                }
            }
        }
        stale.extend(
            self.frontends
                .iter()
                .filter(|e| !frontends.contains(e.key()))
                .map(|e| ChangeEvent::FrontendDeleted(e.key().clone())),
        );
        for entry in self.servers.iter() {
            for id in entry.value().keys() {
                let key = ServerKey::new(entry.key().clone(), id.clone());
                if !servers.contains(&key) {
                    stale.push(ChangeEvent::ServerDeleted(key));
                }
            }
        }
        stale.extend(
            self.backends
                .iter()
                .filter(|e| !backends.contains(e.key()))
                .map(|e| ChangeEvent::BackendDeleted(e.key().clone())),
        );

        if !stale.is_empty() {
            tracing::info!(removed = stale.len(), "Dropping entities missing from snapshot");
        }
        // Iterators above are done, so no shard lock is held while applying.
        for event in stale {
            self.apply(event);
        }
        self.load(snapshot);
    }

    pub fn apply(&self, event: ChangeEvent) {
        metrics::counter!("proxy_change_events_total", "kind" => event.kind()).increment(1);
        tracing::debug!(kind = event.kind(), "Applying change");
        match event {
            ChangeEvent::HostUpserted(host) => {
                self.hosts.insert(host.key(), host);
            }
            ChangeEvent::HostDeleted(key) => {
                self.hosts.remove(&key);
            }
            ChangeEvent::ListenerUpserted(listener) => {
                self.listeners.insert(listener.key(), listener);
            }
            ChangeEvent::ListenerDeleted(key) => {
                self.listeners.remove(&key);
            }
            ChangeEvent::FrontendUpserted(frontend) => {
                let id = frontend.id.clone();
                match CompiledFrontend::compile(frontend) {
                    Ok(compiled) => {
                        self.frontends.insert(compiled.frontend.key(), Arc::new(compiled));
                    }
                    Err(e) => {
                        tracing::warn!(frontend = %id, error = %e, "Rejected frontend change");
                    }
                }
            }
            ChangeEvent::FrontendDeleted(key) => {
                self.frontends.remove(&key);
                // Dropping the entries stops their breakers.
                self.middlewares.remove(&key);
            }
            ChangeEvent::MiddlewareUpserted {
                frontend,
                middleware,
            } => self.upsert_middleware(frontend, middleware),
            ChangeEvent::MiddlewareDeleted(key) => {
                if let Some(mut entries) = self.middlewares.get_mut(&key.frontend) {
                    entries.remove(&key.id);
                }
            }
            ChangeEvent::BackendUpserted(backend) => {
                let key = backend.key();
                self.backends.insert(key.clone(), backend);
                self.rebuild_pool(&key);
            }
            ChangeEvent::BackendDeleted(key) => {
                self.backends.remove(&key);
                self.servers.remove(&key);
                self.pools.remove(&key);
            }
            ChangeEvent::ServerUpserted { backend, server } => {
                self.servers
                    .entry(backend.clone())
                    .or_default()
                    .insert(server.id.clone(), server);
                self.rebuild_pool(&backend);
            }
            ChangeEvent::ServerDeleted(key) => {
                if let Some(mut servers) = self.servers.get_mut(&key.backend) {
                    servers.remove(&key.id);
                }
                self.rebuild_pool(&key.backend);
            }
        }
    }

    fn upsert_middleware(&self, frontend: FrontendKey, middleware: Middleware) {
        let spec = match MiddlewareSpec::from_json(&middleware.kind, &middleware.middleware) {
            Ok(spec) => spec,
            Err(e) => {
                tracing::warn!(
                    frontend = %frontend,
                    middleware = %middleware.id,
                    error = %e,
                    "Rejected middleware change"
                );
                return;
            }
        };

        let mut entries = self.middlewares.entry(frontend.clone()).or_default();
        let layer = match spec {
            MiddlewareSpec::Buffer(spec) => CompiledLayer::Buffer(Arc::new(spec)),
            MiddlewareSpec::CircuitBreaker(spec) => {
                // Keep the running breaker when only the priority moved.
                let reusable = entries.get(&middleware.id).and_then(|existing| match &existing.layer {
                    CompiledLayer::CircuitBreaker(cb)
                        if existing.middleware.middleware == middleware.middleware =>
                    {
                        Some(Arc::clone(cb))
                    }
                    _ => None,
                });
                let breaker = reusable.unwrap_or_else(|| {
                    Arc::new(CircuitBreaker::new(format!("{}/{}", frontend, middleware.id), spec))
                });
                CompiledLayer::CircuitBreaker(breaker)
            }
        };
        entries.insert(
            middleware.id.clone(),
            Arc::new(CompiledMiddleware { middleware, layer }),
        );
    }

    fn rebuild_pool(&self, key: &BackendKey) {
        let Some(backend) = self.backends.get(key).map(|b| b.clone()) else {
            // Servers may arrive before their backend; the pool is built
            // once the backend shows up.
            return;
        };
        let servers: Vec<Server> = self
            .servers
            .get(key)
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default();
        let pool = BackendPool::new(&backend, &servers);
        tracing::debug!(backend = %key, servers = pool.len(), "Backend pool rebuilt");
        self.pools.insert(key.clone(), Arc::new(pool));
    }

    /// Finds the frontend for a request.
    pub fn lookup(&self, ctx: &RouteContext) -> Option<FrontendKey> {
        self.best_match(ctx).map(|f| f.frontend.key())
    }

    fn best_match(&self, ctx: &RouteContext) -> Option<Arc<CompiledFrontend>> {
        let mut best: Option<Arc<CompiledFrontend>> = None;
        for entry in self.frontends.iter() {
            let candidate = entry.value();
            if !candidate.route.eval(ctx) {
                continue;
            }
            let better = match &best {
                None => true,
                Some(current) => {
                    let (a, b) = (&candidate.frontend, &current.frontend);
                    a.route.len() > b.route.len()
                        || (a.route.len() == b.route.len() && a.id < b.id)
                }
            };
            if better {
                best = Some(Arc::clone(candidate));
            }
        }
        best
    }

    /// Resolves a request to its frontend and the chain that serves it:
    /// the frontend buffer, then middlewares by ascending priority, then
    /// the forwarder.
    pub fn resolve(&self, ctx: &RouteContext) -> Option<Resolved> {
        let compiled = self.best_match(ctx)?;
        let frontend = &compiled.frontend;
        let pool = self
            .pools
            .get(&frontend.backend_key())
            .map(|p| Arc::clone(p.value()));

        let mut chain: Vec<Arc<CompiledMiddleware>> = self
            .middlewares
            .get(&frontend.key())
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        chain.sort_by(|a, b| {
            (a.middleware.priority, &a.middleware.id).cmp(&(b.middleware.priority, &b.middleware.id))
        });

        let mut service = ProxyService::new(ForwardService::new(
            pool,
            ForwardSettings::from(&frontend.settings),
        ));
        for entry in chain.iter().rev() {
            service = match &entry.layer {
                CompiledLayer::CircuitBreaker(cb) => {
                    ProxyService::new(CircuitBreakerLayer::new(Arc::clone(cb)).layer(service))
                }
                CompiledLayer::Buffer(spec) => {
                    ProxyService::new(BufferLayer::shared(Arc::clone(spec)).layer(service))
                }
            };
        }
        service = ProxyService::new(BufferLayer::shared(Arc::clone(&compiled.buffer)).layer(service));

        Some(Resolved {
            frontend: frontend.key(),
            service,
        })
    }

    pub fn breaker(&self, frontend: &FrontendKey, middleware_id: &str) -> Option<Arc<CircuitBreaker>> {
        let entries = self.middlewares.get(frontend)?;
        match &entries.get(middleware_id)?.layer {
            CompiledLayer::CircuitBreaker(cb) => Some(Arc::clone(cb)),
            CompiledLayer::Buffer(_) => None,
        }
    }

    pub fn host(&self, key: &HostKey) -> Option<Host> {
        self.hosts.get(key).map(|h| h.clone())
    }

    pub fn listeners(&self) -> Vec<Listener> {
        let mut all: Vec<Listener> = self.listeners.iter().map(|l| l.value().clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn frontend(&self, key: &FrontendKey) -> Option<Frontend> {
        self.frontends.get(key).map(|f| f.frontend.clone())
    }

    pub fn frontend_count(&self) -> usize {
        self.frontends.len()
    }

    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    pub fn server_count(&self, key: &BackendKey) -> usize {
        self.servers.get(key).map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{BackendSettings, BackendSnapshot, FrontendSettings, FrontendSnapshot};
    use serde_json::json;

    fn frontend(id: &str, route: &str) -> Frontend {
        Frontend {
            id: id.into(),
            route: route.into(),
            kind: "http".into(),
            backend_id: "b1".into(),
            settings: FrontendSettings::default(),
        }
    }

    fn ctx(host: &str, path: &str) -> RouteContext {
        RouteContext {
            host: host.into(),
            path: path.into(),
            method: "GET".into(),
        }
    }

    fn breaker_middleware(id: &str, priority: i32) -> Middleware {
        Middleware {
            id: id.into(),
            priority,
            kind: "cbreaker".into(),
            middleware: json!({"Condition": "NetworkErrorRatio() > 0.5"}),
        }
    }

    #[test]
    fn test_longest_route_wins() {
        let table = RouteTable::new();
        table.apply(ChangeEvent::FrontendUpserted(frontend("f1", r#"PathPrefix("/")"#)));
        table.apply(ChangeEvent::FrontendUpserted(frontend("f2", r#"PathPrefix("/api")"#)));

        assert_eq!(table.lookup(&ctx("a", "/api/x")), Some(FrontendKey::new("f2")));
        assert_eq!(table.lookup(&ctx("a", "/other")), Some(FrontendKey::new("f1")));
    }

    #[test]
    fn test_no_match() {
        let table = RouteTable::new();
        table.apply(ChangeEvent::FrontendUpserted(frontend("f1", r#"Host("a.com")"#)));
        assert!(table.lookup(&ctx("b.com", "/")).is_none());
    }

    #[test]
    fn test_bad_route_keeps_previous() {
        let table = RouteTable::new();
        table.apply(ChangeEvent::FrontendUpserted(frontend("f1", r#"Path("/a")"#)));
        table.apply(ChangeEvent::FrontendUpserted(frontend("f1", "Path(")));
        assert_eq!(table.frontend(&FrontendKey::new("f1")).unwrap().route, r#"Path("/a")"#);
    }

    #[tokio::test]
    async fn test_frontend_delete_drops_middlewares() {
        let table = RouteTable::new();
        let key = FrontendKey::new("f1");
        table.apply(ChangeEvent::FrontendUpserted(frontend("f1", r#"Path("/")"#)));
        table.apply(ChangeEvent::MiddlewareUpserted {
            frontend: key.clone(),
            middleware: breaker_middleware("cb1", 1),
        });
        assert!(table.breaker(&key, "cb1").is_some());

        table.apply(ChangeEvent::FrontendDeleted(key.clone()));
        assert!(table.breaker(&key, "cb1").is_none());
        assert_eq!(table.frontend_count(), 0);
    }

    #[tokio::test]
    async fn test_breaker_reused_when_settings_unchanged() {
        let table = RouteTable::new();
        let key = FrontendKey::new("f1");
        table.apply(ChangeEvent::MiddlewareUpserted {
            frontend: key.clone(),
            middleware: breaker_middleware("cb1", 1),
        });
        let first = table.breaker(&key, "cb1").unwrap();
        table.apply(ChangeEvent::MiddlewareUpserted {
            frontend: key.clone(),
            middleware: breaker_middleware("cb1", 5),
        });
        assert!(Arc::ptr_eq(&first, &table.breaker(&key, "cb1").unwrap()));

        table.apply(ChangeEvent::MiddlewareDeleted(MiddlewareKey::new(key.clone(), "cb1")));
        assert!(table.breaker(&key, "cb1").is_none());
    }

    #[tokio::test]
    async fn test_reconcile_drops_missing_entities() {
        let table = RouteTable::new();
        let key = FrontendKey::new("f1");
        table.apply(ChangeEvent::FrontendUpserted(frontend("f1", r#"Path("/a")"#)));
        table.apply(ChangeEvent::FrontendUpserted(frontend("gone", r#"Path("/b")"#)));
        table.apply(ChangeEvent::MiddlewareUpserted {
            frontend: key.clone(),
            middleware: breaker_middleware("cb1", 1),
        });
        table.apply(ChangeEvent::ServerUpserted {
            backend: BackendKey::new("b1"),
            server: Server { id: "old".into(), url: "http://127.0.0.1:1".into() },
        });

        let backend = Backend {
            id: "b1".into(),
            kind: "http".into(),
            settings: BackendSettings::default(),
        };
        table.reconcile(Snapshot {
            index: 7,
            hosts: vec![],
            listeners: vec![],
            frontends: vec![FrontendSnapshot {
                frontend: frontend("f1", r#"Path("/a")"#),
                middlewares: vec![],
            }],
            backends: vec![BackendSnapshot {
                backend,
                servers: vec![Server { id: "new".into(), url: "http://127.0.0.1:2".into() }],
            }],
        });

        assert_eq!(table.frontend_count(), 1);
        assert!(table.frontend(&FrontendKey::new("gone")).is_none());
        assert!(table.breaker(&key, "cb1").is_none());
        assert_eq!(table.server_count(&BackendKey::new("b1")), 1);
        assert_eq!(table.pools.get(&BackendKey::new("b1")).unwrap().len(), 1);
    }

    #[test]
    fn test_server_lifecycle() {
        let table = RouteTable::new();
        let key = BackendKey::new("b1");
        table.apply(ChangeEvent::ServerUpserted {
            backend: key.clone(),
            server: Server { id: "s1".into(), url: "http://127.0.0.1:1".into() },
        });
        assert!(table.pools.get(&key).is_none());

        table.apply(ChangeEvent::BackendUpserted(Backend {
            id: "b1".into(),
            kind: "http".into(),
            settings: BackendSettings::default(),
        }));
        assert_eq!(table.pools.get(&key).unwrap().len(), 1);

        table.apply(ChangeEvent::ServerDeleted(ServerKey::new(key.clone(), "s1")));
        assert_eq!(table.server_count(&key), 0);
        assert!(table.pools.get(&key).unwrap().is_empty());

        table.apply(ChangeEvent::BackendDeleted(key.clone()));
        assert_eq!(table.backend_count(), 0);
    }
}
