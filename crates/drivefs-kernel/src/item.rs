//! Item model: the in-memory entries a drive exposes.
//!
//! Keys are relative to the drive root with no leading `/`. A folder is either
//! an explicit entry whose key ends in `/`, or implied by deeper keys sharing
//! its prefix:
//!
//! ```text
//! notes/            Folder   (explicit)
//! notes/todo.txt    File
//! apps/paint/main   File     (implies apps/ and apps/paint/)
//! ```
//!
//! [`Items::children`] is the only place that turns this flat map into
//! directory semantics.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

/// Kind of entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Folder,
}

impl ItemKind {
    /// Folders list before files.
    fn rank(self) -> u8 {
        match self {
            ItemKind::Folder => 0,
            ItemKind::File => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::File => "file",
            ItemKind::Folder => "folder",
        }
    }
}

/// One file or folder inside a drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    File { content: String },
    Folder,
}

impl Item {
    /// Create a file item. Line endings are normalized to `\n`.
    pub fn file(content: &str) -> Self {
        Item::File {
            content: normalize_newlines(content).into_owned(),
        }
    }

    pub fn kind(&self) -> ItemKind {
        match self {
            Item::File { .. } => ItemKind::File,
            Item::Folder => ItemKind::Folder,
        }
    }

    /// File content, or `None` for folders.
    pub fn content(&self) -> Option<&str> {
        match self {
            Item::File { content } => Some(content),
            Item::Folder => None,
        }
    }
}

/// A direct child returned by `list`.
///
/// Folder names keep their trailing `/` so `parent + name` is a valid path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
}

impl ListEntry {
    pub fn new(name: impl Into<String>, kind: ItemKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Replace `\r\n` with `\n`.
pub fn normalize_newlines(content: &str) -> Cow<'_, str> {
    if content.contains("\r\n") {
        Cow::Owned(content.replace("\r\n", "\n"))
    } else {
        Cow::Borrowed(content)
    }
}

/// Live, shared map from key to [`Item`].
///
/// Cloning shares the same map. Drives mutate it; the façade only reads.
/// Locks are taken per call and never held by callers, so a poisoned lock
/// still guards a consistent map and is recovered rather than propagated.
#[derive(Debug, Clone, Default)]
pub struct Items {
    inner: Arc<RwLock<BTreeMap<String, Item>>>,
}

impl Items {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Item>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Item>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<Item> {
        self.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// All keys in order.
    pub fn keys(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Insert or replace an entry, returning the previous one.
    pub fn insert(&self, key: impl Into<String>, item: Item) -> Option<Item> {
        self.write().insert(key.into(), item)
    }

    pub fn remove(&self, key: &str) -> Option<Item> {
        self.write().remove(key)
    }

    /// Remove every entry whose key starts with `prefix`. Returns the count.
    pub fn remove_tree(&self, prefix: &str) -> usize {
        let mut map = self.write();
        let doomed: Vec<String> = keys_under(&map, prefix).map(str::to_owned).collect();
        for key in &doomed {
            map.remove(key);
        }
        doomed.len()
    }

    /// Swap in a freshly loaded map.
    pub fn replace(&self, items: BTreeMap<String, Item>) {
        *self.write() = items;
    }

    /// Direct children of the folder `prefix` (`""` for the drive root).
    ///
    /// A key is a direct child when it starts with `prefix` and the rest is a
    /// single segment with an optional trailing `/`. Deeper keys contribute
    /// their first segment as an implied folder. Folders come first, then
    /// files, each ordered by name.
    pub fn children(&self, prefix: &str) -> Vec<ListEntry> {
        let map = self.read();
        let mut found: BTreeMap<String, ItemKind> = BTreeMap::new();

        for key in keys_under(&map, prefix) {
            let rest = &key[prefix.len()..];
            match rest.find('/') {
                _ if rest.is_empty() => {}
                Some(0) => {}
                None => {
                    if let Some(item) = map.get(key) {
                        found.insert(rest.to_owned(), item.kind());
                    }
                }
                Some(slash) if slash + 1 == rest.len() => {
                    if let Some(item) = map.get(key) {
                        found.insert(rest.to_owned(), item.kind());
                    }
                }
                Some(slash) => {
                    found
                        .entry(rest[..=slash].to_owned())
                        .or_insert(ItemKind::Folder);
                }
            }
        }

        let mut entries: Vec<ListEntry> = found
            .into_iter()
            .map(|(name, kind)| ListEntry { name, kind })
            .collect();
        entries.sort_by(|a, b| {
            a.kind
                .rank()
                .cmp(&b.kind.rank())
                .then_with(|| a.name.cmp(&b.name))
        });
        entries
    }
}

/// Keys starting with `prefix`, in order.
fn keys_under<'a>(
    map: &'a BTreeMap<String, Item>,
    prefix: &'a str,
) -> impl Iterator<Item = &'a str> + 'a {
    map.range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
        .map(|(key, _)| key.as_str())
        .take_while(move |key| key.starts_with(prefix))
}
