//! Reverse proxy control plane and request-path protection.
//!
//! The routing topology (hosts, listeners, frontends, backends, servers and
//! middlewares) lives in a watchable key-value store. The sync engine turns
//! store notifications into typed change events, the routing table applies
//! them, and each request runs through its frontend's buffer, circuit
//! breakers and finally the forwarder.

// Core subsystems
pub mod config;
pub mod engine;
pub mod http;
pub mod predicate;
pub mod routing;
pub mod store;

// Request-path protection
pub mod resilience;

// Cross-cutting concerns
pub mod admin;
pub mod duration;
pub mod lifecycle;
pub mod observability;

pub use config::schema::ProxyConfig;
pub use engine::{ChangeEvent, Engine, EngineError};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use routing::RouteTable;
pub use store::{KvStore, MemoryStore};
