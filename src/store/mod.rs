//! Configuration store client boundary.
//!
//! # Data Flow
//! ```text
//! engine (CRUD)      → KvStore::get / list / set / delete / compare_and_swap
//! engine (subscribe) → KvStore::watch(prefix, after_index) → WatchEvent
//! ```
//!
//! # Design Decisions
//! - Hierarchical keys (`/a/b/c`); directories are implied by their children
//! - Every mutation bumps a store-wide monotonic index
//! - Watches are long polls: one event per call, resumable by index
//! - `memory.rs` is a complete in-process implementation used by the binary
//!   when no external store is configured, and by tests

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryStore;

/// Mutation kinds reported by a watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    Create,
    Set,
    Delete,
    Expire,
    /// TTL refresh on an existing key or directory.
    Update,
    CompareAndSwap,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Action::Create => "create",
            Action::Set => "set",
            Action::Delete => "delete",
            Action::Expire => "expire",
            Action::Update => "update",
            Action::CompareAndSwap => "compareAndSwap",
        };
        f.write_str(s)
    }
}

/// A key and its value as of `modified_index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub key: String,
    pub value: String,
    /// True for a directory node (reported by recursive deletes and TTL
    /// refreshes on a directory).
    pub dir: bool,
    pub created_index: u64,
    pub modified_index: u64,
    /// Remaining time to live when the node was read.
    pub ttl: Option<Duration>,
}

/// One observed mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub action: Action,
    pub node: Node,
    pub prev_node: Option<Node>,
}

impl WatchEvent {
    pub fn index(&self) -> u64 {
        self.node.modified_index
    }
}

/// Write options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    pub ttl: Option<Duration>,
    /// `Some(false)`: fail if the key exists. `Some(true)`: fail unless it does.
    pub prev_exist: Option<bool>,
}

impl SetOptions {
    pub fn with_ttl(ttl: Option<Duration>) -> Self {
        Self {
            ttl,
            prev_exist: None,
        }
    }

    pub fn create() -> Self {
        Self {
            ttl: None,
            prev_exist: Some(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("key already exists: {0}")]
    AlreadyExists(String),

    #[error("compare failed on {key}: expected index {expected}, found {actual}")]
    CompareFailed {
        key: String,
        expected: u64,
        actual: u64,
    },

    /// The requested watch index is older than the retained history.
    #[error("event index {requested} cleared, oldest retained is {oldest}")]
    EventIndexCleared { requested: u64, oldest: u64 },

    /// The watch was stopped by the caller (client closed).
    #[error("watch stopped")]
    WatchStopped,

    #[error("store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Node, StoreError>;

    /// Names of the immediate children of `dir`, sorted.
    async fn list(&self, dir: &str) -> Result<Vec<String>, StoreError>;

    async fn set(&self, key: &str, value: &str, opts: SetOptions) -> Result<Node, StoreError>;

    /// Deletes `key`; with `recursive`, everything below it as well.
    async fn delete(&self, key: &str, recursive: bool) -> Result<(), StoreError>;

    async fn compare_and_swap(
        &self,
        key: &str,
        value: &str,
        prev_index: u64,
    ) -> Result<Node, StoreError>;

    /// Re-arms the TTL of a key or directory without changing its value.
    async fn refresh_ttl(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Waits for the first mutation below `prefix` with index `>= from_index`.
    async fn watch(&self, prefix: &str, from_index: u64) -> Result<WatchEvent, StoreError>;

    /// Index of the latest mutation.
    async fn current_index(&self) -> Result<u64, StoreError>;

    /// Ends pending and future watches with [`StoreError::WatchStopped`].
    async fn close(&self);
}

/// Creates store clients; used for the initial connection and reconnects.
pub trait StoreConnector: Send + Sync {
    fn connect(&self) -> Result<std::sync::Arc<dyn KvStore>, StoreError>;
}
