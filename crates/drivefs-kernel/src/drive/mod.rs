//! Drive contract and the backends that implement it.
//!
//! A drive is an isolated namespace of [`Item`](crate::item::Item)s. The façade reads a drive's
//! [`Items`] directly and mutates it only through the four verbs on
//! [`Drive`]. Backends share no state, only this shape:
//!
//! - **BundledDrive**: read-only tree compiled into the binary (`sys`)
//! - **PersistedDrive**: SQLite-backed durable drive (`user`)
//! - **MountedDrive**: live host directory, optionally watched for edits

mod bundled;
mod mounted;
mod persisted;

pub use bundled::BundledDrive;
pub use mounted::MountedDrive;
pub use persisted::PersistedDrive;

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::error::FsResult;
use crate::item::Items;

/// What happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChangeKind::Created => "created",
            ChangeKind::Modified => "modified",
            ChangeKind::Removed => "removed",
        })
    }
}

/// Callback a drive invokes on every change, with the drive-relative path.
pub type Notify = Arc<dyn Fn(ChangeKind, &str) + Send + Sync>;

/// Abstract drive interface.
///
/// Paths are drive-relative keys: `notes/todo.txt` for files, `notes/` for
/// folders. Every mutator updates [`Drive::items`] before returning and calls
/// the mount-time [`Notify`] once per meaningful change. Mutations that change
/// nothing (an existing folder, identical content, a missing entry) stay
/// silent, and removing a folder notifies its root only.
#[async_trait]
pub trait Drive: Send + Sync {
    /// The live item map.
    fn items(&self) -> &Items;

    /// Attach the drive. Returns once `items` reflects the backend.
    async fn mount(&self, notify: Notify) -> FsResult<()>;

    /// Release backend resources. Detaching is otherwise purely in-memory.
    fn unmount(&self) {}

    /// Create the folder `path` (ends with `/`).
    async fn putdir(&self, path: &str) -> FsResult<()>;

    /// Create or overwrite the file `path`.
    async fn putfile(&self, path: &str, content: &str) -> FsResult<()>;

    /// Remove the file `path`. Missing files are ignored.
    async fn rmfile(&self, path: &str) -> FsResult<()>;

    /// Remove the folder `path` (ends with `/`) and everything beneath it.
    async fn rmdir(&self, path: &str) -> FsResult<()>;
}

/// Holder for the [`Notify`] a drive receives at mount.
///
/// Clones share the slot, so a backend can hand one to a watcher thread.
#[derive(Clone, Default)]
pub struct NotifySlot {
    inner: Arc<RwLock<Option<Notify>>>,
}

impl NotifySlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, notify: Notify) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(notify);
    }

    /// Invoke the callback, if mounted. The slot lock is released first.
    pub fn emit(&self, kind: ChangeKind, path: &str) {
        let notify = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(notify) = notify {
            notify(kind, path);
        }
    }
}

impl fmt::Debug for NotifySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifySlot").finish_non_exhaustive()
    }
}

/// `path` with exactly one trailing `/`. The drive root is `""`.
pub(crate) fn folder_key(path: &str) -> String {
    match path.trim_end_matches('/') {
        "" => String::new(),
        trimmed => format!("{trimmed}/"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn folder_key_normalizes_trailing_slashes() {
        assert_eq!(folder_key("a/b"), "a/b/");
        assert_eq!(folder_key("a/b/"), "a/b/");
        assert_eq!(folder_key("a/b//"), "a/b/");
    }

    #[test]
    fn folder_key_of_root_is_empty() {
        assert_eq!(folder_key(""), "");
        assert_eq!(folder_key("/"), "");
    }

    #[test]
    fn notify_slot_is_silent_until_set() {
        let slot = NotifySlot::new();
        slot.emit(ChangeKind::Created, "ignored");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        slot.set(Arc::new(move |kind: ChangeKind, path: &str| {
            sink.lock().unwrap().push((kind, path.to_string()));
        }));
        slot.clone().emit(ChangeKind::Removed, "a/");

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(ChangeKind::Removed, "a/".to_string())]
        );
    }
}
