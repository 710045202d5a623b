//! drivefs-kernel: the core of drivefs.
//!
//! This crate provides:
//!
//! - **Drives**: the [`Drive`] contract and its three backends (bundled,
//!   SQLite-persisted, host-mounted)
//! - **Items**: the flat key map every drive exposes, with folder listing
//! - **Watch bus**: prefix-scoped change notifications
//! - **Mounts**: the durable registry of external directories
//! - **Vfs**: the path-addressed façade tying them together
//!
//! ```no_run
//! # async fn demo() -> drivefs_kernel::FsResult<()> {
//! use drivefs_kernel::{Vfs, VfsConfig};
//!
//! let vfs = Vfs::open(&VfsConfig::load()?).await?;
//! vfs.mkdirp("user/notes/").await?;
//! vfs.put("user/notes/todo.txt", "buy milk\n").await?;
//! assert_eq!(vfs.get("user/notes/todo.txt")?.as_deref(), Some("buy milk\n"));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod drive;
pub mod error;
pub mod item;
pub mod mounts;
pub mod paths;
pub mod store;
pub mod vfs;
pub mod watch;

pub use config::VfsConfig;
pub use drive::{BundledDrive, ChangeKind, Drive, MountedDrive, Notify, NotifySlot, PersistedDrive};
pub use error::{FsError, FsResult};
pub use item::{Item, ItemKind, Items, ListEntry};
pub use mounts::{
    DirHandle, DirectoryPicker, MountRegistry, PathPicker, PermissionMode, PermissionState,
};
pub use store::{Database, KvStore};
pub use vfs::{Vfs, SYS_DRIVE, USER_DRIVE};
pub use watch::{WatchBus, WatchCallback, WatchHandle};
