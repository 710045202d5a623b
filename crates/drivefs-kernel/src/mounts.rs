//! External drive mounts: the persisted registry and directory acquisition.
//!
//! A mount is recorded as `(name, DirHandle)` in the `mounts` key-value store
//! before the drive is attached, and every record is reattached on the next
//! [`Vfs::init`](crate::Vfs::init).

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{FsError, FsResult};
use crate::store::{Database, KvStore};

/// Name of the key-value store holding mount records.
pub const MOUNTS_STORE: &str = "mounts";

/// Opaque handle to an external directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirHandle {
    pub path: PathBuf,
}

impl DirHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Access requested on a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionMode {
    Read,
    ReadWrite,
}

/// Outcome of a permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
}

/// Obtains a directory to mount and the right to use it.
///
/// Interactive front ends prompt the user here; either step may fail or be
/// refused.
#[async_trait]
pub trait DirectoryPicker: Send + Sync {
    /// Choose a directory.
    async fn pick(&self) -> FsResult<DirHandle>;

    /// Ask for access to a chosen directory.
    async fn request_permission(
        &self,
        handle: &DirHandle,
        mode: PermissionMode,
    ) -> FsResult<PermissionState>;
}

/// Picks a fixed host path.
///
/// Write access is denied when the directory is read-only on the host.
#[derive(Debug, Clone)]
pub struct PathPicker {
    path: PathBuf,
}

impl PathPicker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DirectoryPicker for PathPicker {
    async fn pick(&self) -> FsResult<DirHandle> {
        let meta = tokio::fs::metadata(&self.path).await?;
        if !meta.is_dir() {
            return Err(FsError::NotADirectory(self.path.clone()));
        }
        let canonical = tokio::fs::canonicalize(&self.path).await?;
        Ok(DirHandle::new(canonical))
    }

    async fn request_permission(
        &self,
        handle: &DirHandle,
        mode: PermissionMode,
    ) -> FsResult<PermissionState> {
        let meta = tokio::fs::metadata(&handle.path).await?;
        let denied = mode == PermissionMode::ReadWrite && meta.permissions().readonly();
        Ok(if denied {
            PermissionState::Denied
        } else {
            PermissionState::Granted
        })
    }
}

/// Durable record of which external drives are mounted.
#[derive(Debug, Clone)]
pub struct MountRegistry {
    store: KvStore,
}

impl MountRegistry {
    pub fn new(db: &Database) -> Self {
        Self {
            store: db.open_store(MOUNTS_STORE),
        }
    }

    /// All records, in the order they were first written.
    pub fn all(&self) -> FsResult<Vec<(String, DirHandle)>> {
        self.store.all()
    }

    pub fn set(&self, name: &str, handle: &DirHandle) -> FsResult<()> {
        self.store.set(name, handle)
    }

    /// Remove a record. Returns whether one existed.
    pub fn del(&self, name: &str) -> FsResult<bool> {
        self.store.del(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_round_trips_handles_in_order() {
        let db = Database::in_memory().unwrap();
        let registry = MountRegistry::new(&db);

        registry.set("work", &DirHandle::new("/srv/work")).unwrap();
        registry.set("notes", &DirHandle::new("/srv/notes")).unwrap();

        let again = MountRegistry::new(&db);
        assert_eq!(
            again.all().unwrap(),
            vec![
                ("work".to_string(), DirHandle::new("/srv/work")),
                ("notes".to_string(), DirHandle::new("/srv/notes")),
            ]
        );

        assert!(again.del("work").unwrap());
        assert!(!again.del("work").unwrap());
        assert_eq!(
            again.all().unwrap(),
            vec![("notes".to_string(), DirHandle::new("/srv/notes"))]
        );
    }

    #[tokio::test]
    async fn path_picker_canonicalizes_directories() {
        let dir = tempfile::tempdir().unwrap();
        let picker = PathPicker::new(dir.path().join("."));

        let handle = picker.pick().await.unwrap();
        assert_eq!(handle.path, dir.path().canonicalize().unwrap());
        assert_eq!(
            picker
                .request_permission(&handle, PermissionMode::Read)
                .await
                .unwrap(),
            PermissionState::Granted
        );
    }

    #[tokio::test]
    async fn path_picker_rejects_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, "").unwrap();

        assert!(matches!(
            PathPicker::new(&file).pick().await,
            Err(FsError::NotADirectory(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn path_picker_denies_write_to_read_only_dir() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let locked = dir.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o555)).unwrap();

        let picker = PathPicker::new(&locked);
        let handle = picker.pick().await.unwrap();
        let state = picker
            .request_permission(&handle, PermissionMode::ReadWrite)
            .await
            .unwrap();

        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(state, PermissionState::Denied);
    }
}
