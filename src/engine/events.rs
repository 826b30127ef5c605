//! Typed change notifications produced by [`Engine::subscribe`](crate::engine::Engine::subscribe).

use crate::engine::model::{
    Backend, BackendKey, Frontend, FrontendKey, Host, HostKey, Listener, ListenerKey, Middleware,
    MiddlewareKey, Server, ServerKey,
};

/// One event per observed store mutation. Upserts carry the entity as
/// re-read from the store; deletions carry only the key.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    HostUpserted(Host),
    HostDeleted(HostKey),
    ListenerUpserted(Listener),
    ListenerDeleted(ListenerKey),
    FrontendUpserted(Frontend),
    FrontendDeleted(FrontendKey),
    MiddlewareUpserted {
        frontend: FrontendKey,
        middleware: Middleware,
    },
    MiddlewareDeleted(MiddlewareKey),
    BackendUpserted(Backend),
    BackendDeleted(BackendKey),
    ServerUpserted {
        backend: BackendKey,
        server: Server,
    },
    ServerDeleted(ServerKey),
}

impl ChangeEvent {
    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::HostUpserted(_) => "host_upserted",
            ChangeEvent::HostDeleted(_) => "host_deleted",
            ChangeEvent::ListenerUpserted(_) => "listener_upserted",
            ChangeEvent::ListenerDeleted(_) => "listener_deleted",
            ChangeEvent::FrontendUpserted(_) => "frontend_upserted",
            ChangeEvent::FrontendDeleted(_) => "frontend_deleted",
            ChangeEvent::MiddlewareUpserted { .. } => "middleware_upserted",
            ChangeEvent::MiddlewareDeleted(_) => "middleware_deleted",
            ChangeEvent::BackendUpserted(_) => "backend_upserted",
            ChangeEvent::BackendDeleted(_) => "backend_deleted",
            ChangeEvent::ServerUpserted { .. } => "server_upserted",
            ChangeEvent::ServerDeleted(_) => "server_deleted",
        }
    }
}
