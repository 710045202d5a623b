//! BundledDrive: read-only drive compiled into the binary.
//!
//! The embedded tree lives under `assets/sys/`. Its `default/` folder is what
//! first-run seeding copies into the user drive.

use std::collections::BTreeMap;
use std::path::{Component, Path};

use async_trait::async_trait;
use include_dir::{include_dir, Dir, DirEntry};

use super::{folder_key, Drive, Notify};
use crate::error::{FsError, FsResult};
use crate::item::{Item, Items};

static SYS_TREE: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/assets/sys");

/// A read-only drive over a fixed tree.
///
/// Mutators always fail with [`FsError::ReadOnly`]; the drive never notifies.
#[derive(Debug)]
pub struct BundledDrive {
    tree: BTreeMap<String, Item>,
    items: Items,
}

impl BundledDrive {
    /// The `sys` tree embedded at build time.
    pub fn embedded() -> Self {
        Self::from_dir(&SYS_TREE)
    }

    /// Build from an `include_dir!` tree.
    pub fn from_dir(dir: &Dir<'_>) -> Self {
        let mut tree = BTreeMap::new();
        collect(dir, &mut tree);
        Self {
            tree,
            items: Items::new(),
        }
    }

    /// Build from explicit entries (keys as they appear in `items`).
    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Item)>,
        K: Into<String>,
    {
        Self {
            tree: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            items: Items::new(),
        }
    }
}

fn collect(dir: &Dir<'_>, tree: &mut BTreeMap<String, Item>) {
    for entry in dir.entries() {
        match entry {
            DirEntry::Dir(sub) => {
                tree.insert(folder_key(&key_of(sub.path())), Item::Folder);
                collect(sub, tree);
            }
            DirEntry::File(file) => match file.contents_utf8() {
                Some(text) => {
                    tree.insert(key_of(file.path()), Item::file(text));
                }
                None => {
                    tracing::warn!(path = %file.path().display(), "skipping non-UTF-8 bundled file");
                }
            },
        }
    }
}

/// `/`-joined key for an embedded path, whatever the host separator.
fn key_of(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait]
impl Drive for BundledDrive {
    fn items(&self) -> &Items {
        &self.items
    }

    async fn mount(&self, _notify: Notify) -> FsResult<()> {
        self.items.replace(self.tree.clone());
        tracing::debug!(entries = self.tree.len(), "bundled drive loaded");
        Ok(())
    }

    async fn putdir(&self, _path: &str) -> FsResult<()> {
        Err(FsError::ReadOnly)
    }

    async fn putfile(&self, _path: &str, _content: &str) -> FsResult<()> {
        Err(FsError::ReadOnly)
    }

    async fn rmfile(&self, _path: &str) -> FsResult<()> {
        Err(FsError::ReadOnly)
    }

    async fn rmdir(&self, _path: &str) -> FsResult<()> {
        Err(FsError::ReadOnly)
    }
}
