//! Store key layout.
//!
//! ```text
//! P/hosts/<name>/host
//! P/listeners/<id>
//! P/frontends/<id>/frontend
//! P/frontends/<id>/middlewares/<mwId>
//! P/backends/<id>/backend
//! P/backends/<id>/servers/<srvId>
//! ```
//!
//! Watch notifications are classified by an ordered list of matchers; the
//! first one that accepts the key wins. Directory keys (`P/frontends/<id>`)
//! match the same entity as their leaf, which is how recursive deletes and
//! directory expiry are reported.

use crate::engine::model::{
    BackendKey, FrontendKey, HostKey, ListenerKey, MiddlewareKey, ServerKey,
};

/// Builds keys under a prefix.
#[derive(Debug, Clone)]
pub struct KeyLayout {
    prefix: String,
}

impl KeyLayout {
    pub fn new(prefix: &str) -> Self {
        let trimmed = prefix.trim_end_matches('/');
        let prefix = if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        };
        Self { prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn path(&self, parts: &[&str]) -> String {
        let mut out = self.prefix.clone();
        for part in parts {
            out.push('/');
            out.push_str(part);
        }
        out
    }

    pub fn hosts_dir(&self) -> String {
        self.path(&["hosts"])
    }

    pub fn host_dir(&self, key: &HostKey) -> String {
        self.path(&["hosts", &key.name])
    }

    pub fn host(&self, key: &HostKey) -> String {
        self.path(&["hosts", &key.name, "host"])
    }

    pub fn listeners_dir(&self) -> String {
        self.path(&["listeners"])
    }

    pub fn listener(&self, key: &ListenerKey) -> String {
        self.path(&["listeners", &key.id])
    }

    pub fn frontends_dir(&self) -> String {
        self.path(&["frontends"])
    }

    pub fn frontend_dir(&self, key: &FrontendKey) -> String {
        self.path(&["frontends", &key.id])
    }

    pub fn frontend(&self, key: &FrontendKey) -> String {
        self.path(&["frontends", &key.id, "frontend"])
    }

    pub fn middlewares_dir(&self, key: &FrontendKey) -> String {
        self.path(&["frontends", &key.id, "middlewares"])
    }

    pub fn middleware(&self, key: &MiddlewareKey) -> String {
        self.path(&["frontends", &key.frontend.id, "middlewares", &key.id])
    }

    pub fn backends_dir(&self) -> String {
        self.path(&["backends"])
    }

    pub fn backend_dir(&self, key: &BackendKey) -> String {
        self.path(&["backends", &key.id])
    }

    pub fn backend(&self, key: &BackendKey) -> String {
        self.path(&["backends", &key.id, "backend"])
    }

    pub fn servers_dir(&self, key: &BackendKey) -> String {
        self.path(&["backends", &key.id, "servers"])
    }

    pub fn server(&self, key: &ServerKey) -> String {
        self.path(&["backends", &key.backend.id, "servers", &key.id])
    }

    /// Classifies a store key. Keys outside the prefix or the layout yield
    /// `None`.
    pub fn classify(&self, key: &str) -> Option<EntityRef> {
        let rest = key.strip_prefix(self.prefix.as_str())?;
        let rest = rest.strip_prefix('/')?;
        let segments: Vec<&str> = rest.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return None;
        }
        MATCHERS.iter().find_map(|matcher| matcher(&segments))
    }
}

/// The entity a store key refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRef {
    Host(HostKey),
    Listener(ListenerKey),
    Frontend(FrontendKey),
    Middleware(MiddlewareKey),
    Backend(BackendKey),
    Server(ServerKey),
}

type Matcher = fn(&[&str]) -> Option<EntityRef>;

const MATCHERS: &[Matcher] = &[
    match_host,
    match_listener,
    match_frontend,
    match_middleware,
    match_backend,
    match_server,
];

fn match_host(s: &[&str]) -> Option<EntityRef> {
    match s {
        ["hosts", name] | ["hosts", name, "host"] => Some(EntityRef::Host(HostKey::new(*name))),
        _ => None,
    }
}

fn match_listener(s: &[&str]) -> Option<EntityRef> {
    match s {
        ["listeners", id] => Some(EntityRef::Listener(ListenerKey::new(*id))),
        _ => None,
    }
}

fn match_frontend(s: &[&str]) -> Option<EntityRef> {
    match s {
        ["frontends", id] | ["frontends", id, "frontend"] => {
            Some(EntityRef::Frontend(FrontendKey::new(*id)))
        }
        _ => None,
    }
}

fn match_middleware(s: &[&str]) -> Option<EntityRef> {
    match s {
        ["frontends", fid, "middlewares", id] => Some(EntityRef::Middleware(MiddlewareKey::new(
            FrontendKey::new(*fid),
            *id,
        ))),
        _ => None,
    }
}

fn match_backend(s: &[&str]) -> Option<EntityRef> {
    match s {
        ["backends", id] | ["backends", id, "backend"] => {
            Some(EntityRef::Backend(BackendKey::new(*id)))
        }
        _ => None,
    }
}

fn match_server(s: &[&str]) -> Option<EntityRef> {
    match s {
        ["backends", bid, "servers", id] => Some(EntityRef::Server(ServerKey::new(
            BackendKey::new(*bid),
            *id,
        ))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> KeyLayout {
        KeyLayout::new("/vulcand")
    }

    #[test]
    fn test_builders_round_trip_through_classify() {
        let l = layout();
        let mw = MiddlewareKey::new(FrontendKey::new("f1"), "cb");
        let srv = ServerKey::new(BackendKey::new("b1"), "s1");
        assert_eq!(l.middleware(&mw), "/vulcand/frontends/f1/middlewares/cb");
        assert_eq!(l.classify(&l.middleware(&mw)), Some(EntityRef::Middleware(mw)));
        assert_eq!(l.classify(&l.server(&srv)), Some(EntityRef::Server(srv)));
        assert_eq!(
            l.classify(&l.host(&HostKey::new("example.com"))),
            Some(EntityRef::Host(HostKey::new("example.com")))
        );
    }

    #[test]
    fn test_directory_keys_match_their_entity() {
        let l = layout();
        assert_eq!(
            l.classify("/vulcand/frontends/f1"),
            Some(EntityRef::Frontend(FrontendKey::new("f1")))
        );
        assert_eq!(
            l.classify("/vulcand/backends/b1"),
            Some(EntityRef::Backend(BackendKey::new("b1")))
        );
    }

    #[test]
    fn test_unrelated_keys_ignored() {
        let l = layout();
        assert_eq!(l.classify("/other/frontends/f1"), None);
        assert_eq!(l.classify("/vulcandx/frontends/f1"), None);
        assert_eq!(l.classify("/vulcand/frontends/f1/middlewares"), None);
        assert_eq!(l.classify("/vulcand/backends/b1/servers"), None);
        assert_eq!(l.classify("/vulcand/unknown/x"), None);
        assert_eq!(l.classify("/vulcand"), None);
    }

    #[test]
    fn test_prefix_normalized() {
        assert_eq!(KeyLayout::new("vulcand/").prefix(), "/vulcand");
    }
}
