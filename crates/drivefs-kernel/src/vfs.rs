//! Vfs: one path-addressed filesystem over every attached drive.
//!
//! Paths are `drive/sub/path`; folder paths end with `/`:
//!
//! ```text
//! sys/                  # BundledDrive, read-only
//! ├── default/          # copied into user/ on first run
//! user/                 # PersistedDrive
//! └── <mounted>/        # MountedDrive per registry record
//! ```
//!
//! The first segment picks the drive and the rest is handed to it unchanged.
//! Each drive's notifications are re-addressed with the drive name and fanned
//! out through the [`WatchBus`].

use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::VfsConfig;
use crate::drive::{BundledDrive, ChangeKind, Drive, MountedDrive, Notify, PersistedDrive};
use crate::error::{FsError, FsResult};
use crate::item::{normalize_newlines, Item, ItemKind, ListEntry};
use crate::mounts::{DirHandle, DirectoryPicker, MountRegistry, PermissionMode, PermissionState};
use crate::store::Database;
use crate::watch::{WatchBus, WatchHandle};

/// Name of the bundled read-only drive.
pub const SYS_DRIVE: &str = "sys";

/// Name of the durable user drive.
pub const USER_DRIVE: &str = "user";

/// Copied into the user drive when it is empty at startup.
const SEED_SOURCE: &str = "sys/default/";
const SEED_TARGET: &str = "user/";

type DriveTable = Vec<(String, Arc<dyn Drive>)>;

/// The filesystem façade.
///
/// Construct once at startup, call [`Vfs::init`], then share it (`Arc<Vfs>`
/// or `&Vfs`). Nothing else is safe before `init` returns.
pub struct Vfs {
    drives: RwLock<DriveTable>,
    sys: Arc<dyn Drive>,
    user: Arc<dyn Drive>,
    mounts: MountRegistry,
    bus: Arc<WatchBus>,
    watch_external: bool,
}

impl Vfs {
    /// Assemble a façade from its built-in drives and mount registry.
    pub fn new(sys: Arc<dyn Drive>, user: Arc<dyn Drive>, mounts: MountRegistry) -> Self {
        Self {
            drives: RwLock::new(Vec::new()),
            sys,
            user,
            mounts,
            bus: WatchBus::new(),
            watch_external: false,
        }
    }

    /// Track host-side edits in drives attached by [`Vfs::mount`] or restored
    /// by [`Vfs::init`].
    pub fn watch_external(mut self, watch: bool) -> Self {
        self.watch_external = watch;
        self
    }

    /// Open the state database named by `config`, build the standard drives,
    /// and initialize.
    pub async fn open(config: &VfsConfig) -> FsResult<Self> {
        let db = Database::open(config.database_path())?;
        let vfs = Self::new(
            Arc::new(BundledDrive::embedded()),
            Arc::new(PersistedDrive::new(db.clone())),
            MountRegistry::new(&db),
        )
        .watch_external(config.watch_external);
        vfs.init().await?;
        Ok(vfs)
    }

    /// Attach `sys` and `user`, seed an empty user drive from
    /// `sys/default/`, and reattach every registered mount in order.
    pub async fn init(&self) -> FsResult<()> {
        self.add_drive(SYS_DRIVE, self.sys.clone()).await?;
        self.add_drive(USER_DRIVE, self.user.clone()).await?;

        if self.list(SEED_TARGET)?.is_empty() {
            tracing::debug!(from = SEED_SOURCE, to = SEED_TARGET, "seeding empty user drive");
            self.copy_tree(SEED_SOURCE, SEED_TARGET).await?;
        }

        for (name, handle) in self.mounts.all()? {
            tracing::debug!(drive = %name, path = %handle.path.display(), "restoring mount");
            self.add_drive(&name, self.external(handle)).await?;
        }
        Ok(())
    }

    /// Pick a directory, get write access, record it, and attach it as `name`.
    ///
    /// A denied permission leaves no record and no drive.
    pub async fn mount(&self, name: &str, picker: &dyn DirectoryPicker) -> FsResult<()> {
        let name = name.trim_end_matches('/');
        check_mount_name(name)?;

        let handle = picker.pick().await?;
        let state = picker
            .request_permission(&handle, PermissionMode::ReadWrite)
            .await?;
        if state == PermissionState::Denied {
            return Err(FsError::PermissionDenied(handle.path));
        }

        self.mounts.set(name, &handle)?;
        self.add_drive(name, self.external(handle)).await
    }

    /// Forget a mounted drive. `sys` and `user` are left alone.
    pub fn unmount(&self, name: &str) -> FsResult<()> {
        let name = name.trim_end_matches('/');
        if is_builtin(name) {
            return Ok(());
        }
        self.mounts.del(name)?;
        self.remove_drive(name);
        Ok(())
    }

    /// Attached drive names with a trailing `/`, in attach order.
    pub fn drives(&self) -> Vec<String> {
        self.table()
            .iter()
            .map(|(name, _)| format!("{name}/"))
            .collect()
    }

    /// Create `path` and every missing folder above it.
    pub async fn mkdirp(&self, path: &str) -> FsResult<()> {
        let (drive, subpath) = self.prepare(path.trim_end_matches('/'))?;

        let mut dir = String::new();
        for part in subpath.split('/').filter(|p| !p.is_empty()) {
            dir.push_str(part);
            dir.push('/');
            if !drive.items().contains(&dir) {
                drive.putdir(&dir).await?;
            }
        }
        Ok(())
    }

    /// Delete a file.
    pub async fn rm(&self, path: &str) -> FsResult<()> {
        let (drive, subpath) = self.prepare(path)?;
        drive.rmfile(subpath).await
    }

    /// Delete a folder and everything under it.
    pub async fn rmdir(&self, path: &str) -> FsResult<()> {
        let path: Cow<'_, str> = if path.ends_with('/') {
            Cow::Borrowed(path)
        } else {
            Cow::Owned(format!("{path}/"))
        };
        let (drive, subpath) = self.prepare(&path)?;
        drive.rmdir(subpath).await
    }

    /// Direct children of a folder: folders first, then files, by name.
    pub fn list(&self, path: &str) -> FsResult<Vec<ListEntry>> {
        let (drive, subpath) = self.prepare(path)?;
        Ok(drive.items().children(subpath))
    }

    /// File content with `\n` line endings; `None` if missing or a folder.
    pub fn get(&self, path: &str) -> FsResult<Option<String>> {
        let (drive, subpath) = self.prepare(path)?;
        Ok(match drive.items().get(subpath) {
            Some(Item::File { content }) => Some(normalize_newlines(&content).into_owned()),
            _ => None,
        })
    }

    /// Write a file, creating it if needed. Parent folders are not created.
    pub async fn put(&self, path: &str, content: &str) -> FsResult<()> {
        let (drive, subpath) = self.prepare(path)?;
        drive.putfile(subpath, &normalize_newlines(content)).await
    }

    /// Copy everything under folder `from` into folder `to`, depth first.
    ///
    /// Each folder is created and fully copied before its next sibling. The
    /// source is listed in full before anything is written, so `to` may lie
    /// inside `from`.
    pub async fn copy_tree(&self, from: &str, to: &str) -> FsResult<()> {
        for (rel, kind) in self.walk(from)? {
            let target = format!("{to}{rel}");
            match kind {
                ItemKind::Folder => self.mkdirp(&target).await?,
                ItemKind::File => {
                    if let Some(content) = self.get(&format!("{from}{rel}"))? {
                        self.put(&target, &content).await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Every entry below folder `root` as `(relative path, kind)`, in
    /// depth-first listing order.
    fn walk(&self, root: &str) -> FsResult<Vec<(String, ItemKind)>> {
        let mut found = Vec::new();
        let mut pending = self.children_of(root, "")?;

        while let Some((rel, kind)) = pending.pop() {
            if kind == ItemKind::Folder {
                pending.extend(self.children_of(root, &rel)?);
            }
            found.push((rel, kind));
        }
        Ok(found)
    }

    /// Children of `root` + `rel`, reversed so popping yields listing order.
    fn children_of(&self, root: &str, rel: &str) -> FsResult<Vec<(String, ItemKind)>> {
        Ok(self
            .list(&format!("{root}{rel}"))?
            .into_iter()
            .rev()
            .map(|entry| (format!("{rel}{}", entry.name), entry.kind))
            .collect())
    }

    /// Call `callback` for every change at or below `path`.
    pub fn watch_tree<F>(&self, path: &str, callback: F) -> WatchHandle
    where
        F: Fn(ChangeKind) + Send + Sync + 'static,
    {
        self.bus.watch(path, Arc::new(callback))
    }

    /// Split `drive/sub/path` into the drive and `sub/path`.
    fn prepare<'p>(&self, path: &'p str) -> FsResult<(Arc<dyn Drive>, &'p str)> {
        let (name, subpath) = path.split_once('/').unwrap_or((path, ""));
        let drive = self
            .table()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d.clone())
            .ok_or_else(|| FsError::UnknownDrive(name.to_string()))?;
        Ok((drive, subpath))
    }

    fn external(&self, handle: DirHandle) -> Arc<dyn Drive> {
        Arc::new(MountedDrive::new(handle.path).watch_external(self.watch_external))
    }

    /// Mount `drive` and attach it as `name`, replacing any drive of that name
    /// in place.
    async fn add_drive(&self, name: &str, drive: Arc<dyn Drive>) -> FsResult<()> {
        let bus = self.bus.clone();
        let prefix = format!("{name}/");
        let notify: Notify = Arc::new(move |kind: ChangeKind, path: &str| {
            bus.dispatch(kind, &format!("{prefix}{path}"));
        });
        drive.mount(notify).await?;

        let replaced = {
            let mut table = self.table_mut();
            match table.iter_mut().find(|(n, _)| n == name) {
                Some(slot) => Some(std::mem::replace(&mut slot.1, drive.clone())),
                None => {
                    table.push((name.to_string(), drive.clone()));
                    None
                }
            }
        };
        // re-attaching the same drive (a second init) must not detach it
        if let Some(old) = replaced.filter(|old| !Arc::ptr_eq(old, &drive)) {
            old.unmount();
        }
        tracing::debug!(drive = name, "attached drive");
        Ok(())
    }

    fn remove_drive(&self, name: &str) {
        let removed = {
            let mut table = self.table_mut();
            let index = table.iter().position(|(n, _)| n == name);
            index.map(|i| table.remove(i))
        };
        if let Some((_, drive)) = removed {
            drive.unmount();
            tracing::debug!(drive = name, "detached drive");
        }
    }

    fn table(&self) -> RwLockReadGuard<'_, DriveTable> {
        self.drives.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn table_mut(&self) -> RwLockWriteGuard<'_, DriveTable> {
        self.drives.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Vfs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vfs")
            .field("drives", &self.drives())
            .field("watchers", &self.bus.len())
            .finish_non_exhaustive()
    }
}

fn is_builtin(name: &str) -> bool {
    name == SYS_DRIVE || name == USER_DRIVE
}

fn check_mount_name(name: &str) -> FsResult<()> {
    if name.is_empty() || name.contains('/') {
        return Err(FsError::InvalidDriveName(name.to_string()));
    }
    if is_builtin(name) {
        return Err(FsError::ReservedDrive(name.to_string()));
    }
    Ok(())
}
