//! Routing topology entities and their keys.
//!
//! Entities serialize with PascalCase field names, the same shape the admin
//! API accepts and the store holds.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Host {
    pub name: String,
    #[serde(default)]
    pub settings: HostSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct HostSettings {
    pub default: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_pair: Option<KeyPair>,
}

/// PEM-encoded certificate and private key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyPair {
    pub cert: String,
    pub key: String,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("cert", &format_args!("{} bytes", self.cert.len()))
            .field("key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Listener {
    pub id: String,
    pub protocol: String,
    pub address: Address,
    #[serde(default)]
    pub scope: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Address {
    #[serde(default = "default_network")]
    pub network: String,
    pub address: String,
}

fn default_network() -> String {
    "tcp".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Frontend {
    pub id: String,
    /// Request predicate, e.g. `Host("example.com") && PathPrefix("/api")`.
    pub route: String,
    #[serde(rename = "Type", default = "default_http")]
    pub kind: String,
    pub backend_id: String,
    #[serde(default)]
    pub settings: FrontendSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct FrontendSettings {
    pub limits: Limits,
    /// Retry predicate applied by the frontend's buffer.
    pub failover_predicate: String,
    pub hostname: String,
    pub trust_forward_header: bool,
    pub pass_host_header: bool,
}

/// Body limits in bytes; `0` or `-1` leaves a limit at its default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Limits {
    pub max_mem_body_bytes: i64,
    pub max_body_bytes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Backend {
    pub id: String,
    #[serde(rename = "Type", default = "default_http")]
    pub kind: String,
    #[serde(default)]
    pub settings: BackendSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct BackendSettings {
    pub timeouts: BackendTimeouts,
    pub keep_alive: KeepAlive,
}

/// Duration strings (`"5s"`); empty means no explicit timeout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct BackendTimeouts {
    pub read: String,
    pub dial: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct KeepAlive {
    pub max_idle_conns_per_host: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "URL")]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Middleware {
    pub id: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(rename = "Type")]
    pub kind: String,
    pub middleware: serde_json::Value,
}

fn default_http() -> String {
    "http".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostKey {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListenerKey {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrontendKey {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MiddlewareKey {
    pub frontend: FrontendKey,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BackendKey {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerKey {
    pub backend: BackendKey,
    pub id: String,
}

macro_rules! key_ctor {
    ($key:ident, $field:ident) => {
        impl $key {
            pub fn new(value: impl Into<String>) -> Self {
                Self {
                    $field: value.into(),
                }
            }
        }

        impl std::fmt::Display for $key {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.$field)
            }
        }
    };
}

key_ctor!(HostKey, name);
key_ctor!(ListenerKey, id);
key_ctor!(FrontendKey, id);
key_ctor!(BackendKey, id);

impl MiddlewareKey {
    pub fn new(frontend: FrontendKey, id: impl Into<String>) -> Self {
        Self {
            frontend,
            id: id.into(),
        }
    }
}

impl std::fmt::Display for MiddlewareKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.frontend, self.id)
    }
}

impl ServerKey {
    pub fn new(backend: BackendKey, id: impl Into<String>) -> Self {
        Self {
            backend,
            id: id.into(),
        }
    }
}

impl std::fmt::Display for ServerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.backend, self.id)
    }
}

impl Host {
    pub fn key(&self) -> HostKey {
        HostKey::new(&self.name)
    }
}

impl Listener {
    pub fn key(&self) -> ListenerKey {
        ListenerKey::new(&self.id)
    }
}

impl Frontend {
    pub fn key(&self) -> FrontendKey {
        FrontendKey::new(&self.id)
    }

    pub fn backend_key(&self) -> BackendKey {
        BackendKey::new(&self.backend_id)
    }
}

impl Backend {
    pub fn key(&self) -> BackendKey {
        BackendKey::new(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frontend_wire_shape() {
        let json = r#"{
            "Id": "f1",
            "Route": "PathPrefix(\"/\")",
            "Type": "http",
            "BackendId": "b1",
            "Settings": {"Limits": {"MaxBodyBytes": 1024}, "PassHostHeader": true}
        }"#;
        let f: Frontend = serde_json::from_str(json).unwrap();
        assert_eq!(f.backend_id, "b1");
        assert_eq!(f.settings.limits.max_body_bytes, 1024);
        assert_eq!(f.settings.limits.max_mem_body_bytes, 0);
        assert!(f.settings.pass_host_header);

        let back = serde_json::to_value(&f).unwrap();
        assert_eq!(back["BackendId"], "b1");
        assert_eq!(back["Type"], "http");
    }

    #[test]
    fn test_server_and_listener_defaults() {
        let s: Server = serde_json::from_str(r#"{"Id":"s1","URL":"http://127.0.0.1:5000"}"#).unwrap();
        assert_eq!(s.url, "http://127.0.0.1:5000");

        let l: Listener = serde_json::from_str(
            r#"{"Id":"l1","Protocol":"http","Address":{"Address":"0.0.0.0:80"}}"#,
        )
        .unwrap();
        assert_eq!(l.address.network, "tcp");
        assert_eq!(l.scope, "");
    }

    #[test]
    fn test_key_pair_debug_redacts_key() {
        let kp = KeyPair {
            cert: "CERT".into(),
            key: "SECRET".into(),
        };
        assert!(!format!("{:?}", kp).contains("SECRET"));
    }
}
