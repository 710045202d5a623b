//! PersistedDrive: durable drive stored in the state database.
//!
//! Every item is a row in `user_items`. The full table is loaded at mount;
//! afterwards each mutation writes the row first and then updates `items`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use rusqlite::params;

use super::{folder_key, ChangeKind, Drive, Notify, NotifySlot};
use crate::error::FsResult;
use crate::item::{Item, Items};
use crate::store::Database;

/// A drive whose items live in SQLite.
#[derive(Debug)]
pub struct PersistedDrive {
    db: Database,
    items: Items,
    notify: NotifySlot,
}

impl PersistedDrive {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            items: Items::new(),
            notify: NotifySlot::new(),
        }
    }

    fn load(&self) -> FsResult<BTreeMap<String, Item>> {
        let rows = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT path, kind, content FROM user_items")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        Ok(rows
            .into_iter()
            .map(|(path, kind, content)| {
                let item = match kind.as_str() {
                    "folder" => Item::Folder,
                    _ => Item::file(content.as_deref().unwrap_or_default()),
                };
                (path, item)
            })
            .collect())
    }

    fn save(&self, path: &str, item: &Item) -> FsResult<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO user_items (path, kind, content) VALUES (?1, ?2, ?3)
                 ON CONFLICT (path) DO UPDATE SET kind = excluded.kind, content = excluded.content",
                params![path, item.kind().as_str(), item.content()],
            )
        })?;
        Ok(())
    }

    fn delete(&self, path: &str) -> FsResult<usize> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM user_items WHERE path = ?1", params![path])
        })
    }

    fn delete_tree(&self, prefix: &str) -> FsResult<usize> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM user_items WHERE substr(path, 1, length(?1)) = ?1",
                params![prefix],
            )
        })
    }
}

#[async_trait]
impl Drive for PersistedDrive {
    fn items(&self) -> &Items {
        &self.items
    }

    async fn mount(&self, notify: Notify) -> FsResult<()> {
        let loaded = self.load()?;
        tracing::debug!(entries = loaded.len(), "persisted drive loaded");
        self.items.replace(loaded);
        self.notify.set(notify);
        Ok(())
    }

    async fn putdir(&self, path: &str) -> FsResult<()> {
        let key = folder_key(path);
        if key.is_empty() || self.items.get(&key) == Some(Item::Folder) {
            return Ok(());
        }
        self.save(&key, &Item::Folder)?;
        self.items.insert(key.clone(), Item::Folder);
        self.notify.emit(ChangeKind::Created, &key);
        Ok(())
    }

    async fn putfile(&self, path: &str, content: &str) -> FsResult<()> {
        let item = Item::file(content);
        let previous = self.items.get(path);
        if previous.as_ref() == Some(&item) {
            return Ok(());
        }
        self.save(path, &item)?;
        self.items.insert(path, item);
        let kind = if previous.is_some() {
            ChangeKind::Modified
        } else {
            ChangeKind::Created
        };
        self.notify.emit(kind, path);
        Ok(())
    }

    async fn rmfile(&self, path: &str) -> FsResult<()> {
        self.delete(path)?;
        if self.items.remove(path).is_some() {
            self.notify.emit(ChangeKind::Removed, path);
        }
        Ok(())
    }

    async fn rmdir(&self, path: &str) -> FsResult<()> {
        let key = folder_key(path);
        self.delete_tree(&key)?;
        if self.items.remove_tree(&key) > 0 {
            self.notify.emit(ChangeKind::Removed, &key);
        }
        Ok(())
    }
}
