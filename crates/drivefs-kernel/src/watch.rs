//! Prefix-scoped change notifications.
//!
//! Watchers register a callback against a path prefix such as `user/notes/`.
//! Every change dispatched with a full path (`user/notes/todo.txt`) reaches
//! each watcher whose prefix is a literal prefix of that path. No globbing.
//!
//! Dispatch is synchronous and runs callbacks after the registry lock is
//! released, so a callback may itself watch or cancel.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::drive::ChangeKind;

/// A watcher callback.
pub type WatchCallback = Arc<dyn Fn(ChangeKind) + Send + Sync>;

/// Multicast set of callbacks sharing one prefix.
#[derive(Default)]
struct Listener {
    subscribers: Vec<(u64, WatchCallback)>,
}

/// Registry of watchers keyed by prefix.
#[derive(Default)]
pub struct WatchBus {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<String, Listener>>,
}

impl WatchBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `callback` for changes under `prefix`.
    pub fn watch(self: &Arc<Self>, prefix: impl Into<String>, callback: WatchCallback) -> WatchHandle {
        let prefix = prefix.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(prefix.clone())
            .or_default()
            .subscribers
            .push((id, callback));

        WatchHandle {
            bus: Arc::downgrade(self),
            prefix,
            id,
        }
    }

    /// Deliver `kind` to every watcher whose prefix matches `path`.
    pub fn dispatch(&self, kind: ChangeKind, path: &str) {
        let targets: Vec<WatchCallback> = {
            let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            listeners
                .iter()
                .filter(|(prefix, _)| path.starts_with(prefix.as_str()))
                .flat_map(|(_, listener)| listener.subscribers.iter().map(|(_, cb)| cb.clone()))
                .collect()
        };

        tracing::trace!(%kind, path, watchers = targets.len(), "dispatch");
        for callback in targets {
            callback(kind);
        }
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|l| l.subscribers.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cancel(&self, prefix: &str, id: u64) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(listener) = listeners.get_mut(prefix) {
            listener.subscribers.retain(|(sub, _)| *sub != id);
            if listener.subscribers.is_empty() {
                listeners.remove(prefix);
            }
        }
    }
}

impl fmt::Debug for WatchBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchBus")
            .field("watchers", &self.len())
            .finish()
    }
}

/// Cancels one registration.
///
/// Dropping the handle leaves the watch in place.
#[derive(Debug)]
pub struct WatchHandle {
    bus: Weak<WatchBus>,
    prefix: String,
    id: u64,
}

impl WatchHandle {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Unregister this watch. Other watches on the same prefix are untouched.
    pub fn cancel(self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.cancel(&self.prefix, self.id);
        }
    }
}
