//! In-process versioned key-value store.
//!
//! Keeps a bounded history of mutations so watchers can resume from an index,
//! expires keys and directories by TTL (reported as `expire` events), and
//! supports compare-and-swap on a key's modified index.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::store::{Action, KvStore, Node, SetOptions, StoreConnector, StoreError, WatchEvent};

const DEFAULT_HISTORY: usize = 1000;

#[derive(Debug)]
struct Entry {
    value: String,
    created_index: u64,
    modified_index: u64,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct State {
    entries: BTreeMap<String, Entry>,
    dir_expiry: BTreeMap<String, Instant>,
    index: u64,
    history: VecDeque<WatchEvent>,
    history_limit: usize,
    /// Highest index dropped from `history`.
    cleared_through: u64,
}

struct Shared {
    state: Mutex<State>,
    changed: Notify,
}

/// Per-client session; closing it stops this client's watches only.
struct Session {
    closed: AtomicBool,
    stopped: Notify,
}

impl Session {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            closed: AtomicBool::new(false),
            stopped: Notify::new(),
        })
    }
}

/// Cheap to clone; clones share both data and session.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
    session: Arc<Session>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_history(DEFAULT_HISTORY)
    }

    /// Store retaining at most `limit` events for resuming watches.
    pub fn with_history(limit: usize) -> Self {
        let state = State {
            history_limit: limit.max(1),
            ..State::default()
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                changed: Notify::new(),
            }),
            session: Session::new(),
        }
    }

    /// A new client session over the same data.
    pub fn reopen(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            session: Session::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.session.closed.load(Ordering::SeqCst) {
            Err(StoreError::Backend("client closed".to_string()))
        } else {
            Ok(())
        }
    }

    /// Runs `f` on swept state and wakes watchers if anything was recorded.
    fn mutate<T>(&self, f: impl FnOnce(&mut State) -> Result<T, StoreError>) -> Result<T, StoreError> {
        self.ensure_open()?;
        let (result, recorded) = {
            let mut state = self.lock();
            let before = state.index;
            state.sweep(Instant::now());
            let result = f(&mut state);
            (result, state.index != before)
        };
        if recorded {
            self.shared.changed.notify_waiters();
        }
        result
    }
}

impl StoreConnector for MemoryStore {
    fn connect(&self) -> Result<Arc<dyn KvStore>, StoreError> {
        Ok(Arc::new(self.reopen()))
    }
}

fn clean_key(key: &str) -> String {
    let trimmed = key.trim_matches('/');
    let mut out = String::with_capacity(trimmed.len() + 1);
    out.push('/');
    for (i, part) in trimmed.split('/').filter(|p| !p.is_empty()).enumerate() {
        if i > 0 {
            out.push('/');
        }
        out.push_str(part);
    }
    out
}

fn is_under(key: &str, prefix: &str) -> bool {
    prefix == "/" || key == prefix || (key.starts_with(prefix) && key.as_bytes().get(prefix.len()) == Some(&b'/'))
}

fn dir_prefix(key: &str) -> String {
    if key == "/" {
        key.to_string()
    } else {
        format!("{}/", key)
    }
}

impl State {
    fn next_index(&mut self) -> u64 {
        self.index += 1;
        self.index
    }

    fn record(&mut self, event: WatchEvent) {
        self.history.push_back(event);
        while self.history.len() > self.history_limit {
            if let Some(dropped) = self.history.pop_front() {
                self.cleared_through = dropped.index();
            }
        }
    }

    fn node(key: &str, entry: &Entry, now: Instant) -> Node {
        Node {
            key: key.to_string(),
            value: entry.value.clone(),
            dir: false,
            created_index: entry.created_index,
            modified_index: entry.modified_index,
            ttl: entry.expires_at.map(|at| at.saturating_duration_since(now)),
        }
    }

    fn dir_node(key: &str, index: u64) -> Node {
        Node {
            key: key.to_string(),
            value: String::new(),
            dir: true,
            created_index: index,
            modified_index: index,
            ttl: None,
        }
    }

    fn has_children(&self, key: &str) -> bool {
        let prefix = dir_prefix(key);
        self.entries
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(&prefix))
    }

    fn remove_tree(&mut self, key: &str) -> usize {
        let prefix = dir_prefix(key);
        let doomed: Vec<String> = self
            .entries
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for k in &doomed {
            self.entries.remove(k);
        }
        self.dir_expiry.retain(|k, _| !(k == key || k.starts_with(&prefix)));
        doomed.len() + usize::from(self.entries.remove(key).is_some())
    }

    /// Drops expired keys and directories, recording `expire` events.
    fn sweep(&mut self, now: Instant) {
        let expired_dirs: Vec<String> = self
            .dir_expiry
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for dir in expired_dirs {
            if !self.dir_expiry.contains_key(&dir) {
                continue;
            }
            self.remove_tree(&dir);
            let index = self.next_index();
            self.record(WatchEvent {
                action: Action::Expire,
                node: Self::dir_node(&dir, index),
                prev_node: None,
            });
        }

        let expired_keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at.is_some_and(|at| at <= now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired_keys {
            if let Some(entry) = self.entries.remove(&key) {
                let prev = Self::node(&key, &entry, now);
                let index = self.next_index();
                let mut node = prev.clone();
                node.value.clear();
                node.modified_index = index;
                node.ttl = None;
                self.record(WatchEvent {
                    action: Action::Expire,
                    node,
                    prev_node: Some(prev),
                });
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        let keys = self.entries.values().filter_map(|e| e.expires_at);
        let dirs = self.dir_expiry.values().copied();
        keys.chain(dirs).min()
    }

    fn find(&self, prefix: &str, from_index: u64) -> Result<Option<WatchEvent>, StoreError> {
        if from_index > 0 && from_index <= self.cleared_through {
            return Err(StoreError::EventIndexCleared {
                requested: from_index,
                oldest: self.cleared_through + 1,
            });
        }
        Ok(self
            .history
            .iter()
            .find(|e| e.index() >= from_index && is_under(&e.node.key, prefix))
            .cloned())
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Node, StoreError> {
        let key = clean_key(key);
        self.mutate(|state| {
            let now = Instant::now();
            if let Some(entry) = state.entries.get(&key) {
                return Ok(State::node(&key, entry, now));
            }
            if state.has_children(&key) {
                return Ok(State::dir_node(&key, state.index));
            }
            Err(StoreError::NotFound(key.clone()))
        })
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>, StoreError> {
        let dir = clean_key(dir);
        self.mutate(|state| {
            let prefix = dir_prefix(&dir);
            let names: BTreeSet<String> = state
                .entries
                .range(prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(&prefix))
                .filter_map(|(k, _)| k[prefix.len()..].split('/').next().map(str::to_string))
                .collect();
            if names.is_empty() {
                return Err(StoreError::NotFound(dir.clone()));
            }
            Ok(names.into_iter().collect())
        })
    }

    async fn set(&self, key: &str, value: &str, opts: SetOptions) -> Result<Node, StoreError> {
        let key = clean_key(key);
        self.mutate(|state| {
            let now = Instant::now();
            if state.has_children(&key) {
                return Err(StoreError::Backend(format!("{} is a directory", key)));
            }
            let existing = state.entries.get(&key);
            match (opts.prev_exist, existing.is_some()) {
                (Some(false), true) => return Err(StoreError::AlreadyExists(key.clone())),
                (Some(true), false) => return Err(StoreError::NotFound(key.clone())),
                _ => {}
            }
            let prev_node = existing.map(|e| State::node(&key, e, now));
            let index = state.next_index();
            let entry = Entry {
                value: value.to_string(),
                created_index: prev_node.as_ref().map_or(index, |p| p.created_index),
                modified_index: index,
                expires_at: opts.ttl.map(|ttl| now + ttl),
            };
            let node = State::node(&key, &entry, now);
            state.entries.insert(key.clone(), entry);
            let action = if opts.prev_exist == Some(false) {
                Action::Create
            } else {
                Action::Set
            };
            state.record(WatchEvent {
                action,
                node: node.clone(),
                prev_node,
            });
            Ok(node)
        })
    }

    async fn delete(&self, key: &str, recursive: bool) -> Result<(), StoreError> {
        let key = clean_key(key);
        self.mutate(|state| {
            let now = Instant::now();
            let is_dir = state.has_children(&key);
            if is_dir && !recursive {
                return Err(StoreError::Backend(format!("{} is a directory", key)));
            }
            if is_dir {
                state.remove_tree(&key);
                let index = state.next_index();
                state.record(WatchEvent {
                    action: Action::Delete,
                    node: State::dir_node(&key, index),
                    prev_node: None,
                });
                return Ok(());
            }
            let entry = state
                .entries
                .remove(&key)
                .ok_or_else(|| StoreError::NotFound(key.clone()))?;
            state.dir_expiry.remove(&key);
            let prev = State::node(&key, &entry, now);
            let index = state.next_index();
            let mut node = prev.clone();
            node.value.clear();
            node.modified_index = index;
            node.ttl = None;
            state.record(WatchEvent {
                action: Action::Delete,
                node,
                prev_node: Some(prev),
            });
            Ok(())
        })
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        value: &str,
        prev_index: u64,
    ) -> Result<Node, StoreError> {
        let key = clean_key(key);
        self.mutate(|state| {
            let now = Instant::now();
            let current = state
                .entries
                .get(&key)
                .ok_or_else(|| StoreError::NotFound(key.clone()))?;
            if current.modified_index != prev_index {
                return Err(StoreError::CompareFailed {
                    key: key.clone(),
                    expected: prev_index,
                    actual: current.modified_index,
                });
            }
            let prev = State::node(&key, current, now);
            let index = state.next_index();
            let node = match state.entries.get_mut(&key) {
                Some(entry) => {
                    entry.value = value.to_string();
                    entry.modified_index = index;
                    State::node(&key, entry, now)
                }
                None => return Err(StoreError::NotFound(key.clone())),
            };
            state.record(WatchEvent {
                action: Action::CompareAndSwap,
                node: node.clone(),
                prev_node: Some(prev),
            });
            Ok(node)
        })
    }

    async fn refresh_ttl(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let key = clean_key(key);
        self.mutate(|state| {
            let now = Instant::now();
            let deadline = now + ttl;
            if !state.entries.contains_key(&key) && !state.has_children(&key) {
                return Err(StoreError::NotFound(key.clone()));
            }
            let index = state.next_index();
            let node = if let Some(entry) = state.entries.get_mut(&key) {
                entry.expires_at = Some(deadline);
                entry.modified_index = index;
                State::node(&key, entry, now)
            } else {
                state.dir_expiry.insert(key.clone(), deadline);
                let mut node = State::dir_node(&key, index);
                node.ttl = Some(ttl);
                node
            };
            state.record(WatchEvent {
                action: Action::Update,
                node,
                prev_node: None,
            });
            Ok(())
        })
    }

    async fn watch(&self, prefix: &str, from_index: u64) -> Result<WatchEvent, StoreError> {
        let prefix = clean_key(prefix);
        loop {
            let changed = self.shared.changed.notified();
            let stopped = self.session.stopped.notified();
            tokio::pin!(changed);
            tokio::pin!(stopped);
            changed.as_mut().enable();
            stopped.as_mut().enable();

            if self.session.closed.load(Ordering::SeqCst) {
                return Err(StoreError::WatchStopped);
            }

            let (found, deadline, swept) = {
                let mut state = self.lock();
                let before = state.index;
                state.sweep(Instant::now());
                let found = state.find(&prefix, from_index);
                (found, state.next_deadline(), state.index != before)
            };
            if swept {
                self.shared.changed.notify_waiters();
            }
            if let Some(event) = found? {
                return Ok(event);
            }

            match deadline {
                Some(at) => {
                    tokio::select! {
                        _ = &mut changed => {}
                        _ = &mut stopped => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => {
                    tokio::select! {
                        _ = &mut changed => {}
                        _ = &mut stopped => {}
                    }
                }
            }
        }
    }

    async fn current_index(&self) -> Result<u64, StoreError> {
        self.ensure_open()?;
        Ok(self.lock().index)
    }

    async fn close(&self) {
        self.session.closed.store(true, Ordering::SeqCst);
        self.session.stopped.notify_waiters();
    }
}
