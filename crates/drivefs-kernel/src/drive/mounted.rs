//! MountedDrive: live drive over a host directory.
//!
//! All operations are relative to `root`: with `root = /home/amy/notes`,
//! `putfile("todo.txt", ..)` writes `/home/amy/notes/todo.txt`.
//!
//! The whole tree is scanned into `items` at mount. With external watching on,
//! a `notify` watcher reconciles host-side edits into `items` from its own
//! thread. Both paths go through [`Items::insert`]/[`Items::remove`] and only
//! notify when the map actually changed.
//!
//! While the drive is changing a path itself, that path is claimed and the
//! watcher ignores events under it. Claims are taken and released under the
//! same lock the watcher holds while it reads the disk, so the watcher never
//! sees a half-written file and each write is reported once.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::fs;

use super::{folder_key, ChangeKind, Drive, Notify, NotifySlot};
use crate::error::{FsError, FsResult};
use crate::item::{Item, Items};

/// A drive backed by a real directory.
pub struct MountedDrive {
    root: PathBuf,
    watch_external: bool,
    items: Items,
    notify: NotifySlot,
    busy: Busy,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl MountedDrive {
    /// Create a drive rooted at `root`. The directory must exist at mount.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            watch_external: false,
            items: Items::new(),
            notify: NotifySlot::new(),
            busy: Busy::default(),
            watcher: Mutex::new(None),
        }
    }

    /// Also track edits made outside drivefs.
    pub fn watch_external(mut self, watch: bool) -> Self {
        self.watch_external = watch;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host path for a drive-relative key. `..` is refused.
    fn resolve(&self, path: &str) -> FsResult<PathBuf> {
        let mut full = self.root.clone();
        for segment in path.split('/') {
            match segment {
                "" | "." => {}
                ".." => return Err(FsError::PathEscapesRoot(path.to_string())),
                s => full.push(s),
            }
        }
        Ok(full)
    }

    fn start_watcher(&self, root: PathBuf) -> FsResult<()> {
        let items = self.items.clone();
        let slot = self.notify.clone();
        let busy = self.busy.clone();
        let base = root.clone();

        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        for path in event.paths {
                            reconcile(&base, &items, &busy, &slot, &path);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "mounted drive watcher error");
                    }
                }
            })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        *self.watcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(watcher);
        Ok(())
    }
}

impl std::fmt::Debug for MountedDrive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountedDrive")
            .field("root", &self.root)
            .field("watch_external", &self.watch_external)
            .finish_non_exhaustive()
    }
}

type Claims = HashMap<String, usize>;

/// Keys the drive is changing itself, with a count per key.
#[derive(Clone, Default)]
struct Busy {
    claims: Arc<Mutex<Claims>>,
}

impl Busy {
    fn lock(&self) -> MutexGuard<'_, Claims> {
        self.claims.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `key` (a file key, a folder key ending in `/`, or `""` for the
    /// whole drive) until the returned claim is finished or dropped.
    fn claim(&self, key: &str) -> Claim<'_> {
        *self.lock().entry(key.to_string()).or_default() += 1;
        Claim {
            busy: self,
            key: key.to_string(),
            released: false,
        }
    }
}

/// Whether the watcher key `key` (no trailing `/`) lies under a claim.
fn is_claimed(claims: &Claims, key: &str) -> bool {
    claims.keys().any(|claim| match claim.strip_suffix('/') {
        Some(dir) => key == dir || key.starts_with(claim.as_str()),
        None => claim.is_empty() || key == claim,
    })
}

fn release(claims: &mut Claims, key: &str) {
    if let Some(count) = claims.get_mut(key) {
        *count -= 1;
        if *count == 0 {
            claims.remove(key);
        }
    }
}

struct Claim<'a> {
    busy: &'a Busy,
    key: String,
    released: bool,
}

impl Claim<'_> {
    /// Run `update` under the claims lock, then release.
    fn finish<T>(mut self, update: impl FnOnce() -> T) -> T {
        let busy = self.busy;
        let mut claims = busy.lock();
        let out = update();
        release(&mut claims, &self.key);
        self.released = true;
        out
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.released {
            release(&mut self.busy.lock(), &self.key);
        }
    }
}

/// Read the whole tree under `root` into item form.
async fn scan(root: &Path) -> FsResult<BTreeMap<String, Item>> {
    let mut tree = BTreeMap::new();
    let mut pending = vec![(root.to_path_buf(), String::new())];

    while let Some((dir, prefix)) = pending.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                tracing::warn!(path = %entry.path().display(), "skipping non-UTF-8 file name");
                continue;
            };
            let file_type = entry.file_type().await?;

            if file_type.is_dir() {
                let key = format!("{prefix}{name}/");
                tree.insert(key.clone(), Item::Folder);
                pending.push((entry.path(), key));
            } else if file_type.is_file() {
                match String::from_utf8(fs::read(entry.path()).await?) {
                    Ok(text) => {
                        tree.insert(format!("{prefix}{name}"), Item::file(&text));
                    }
                    Err(_) => {
                        tracing::warn!(path = %entry.path().display(), "skipping non-UTF-8 file");
                    }
                }
            }
        }
    }

    Ok(tree)
}

/// Remove everything inside `dir`, keeping `dir` itself.
async fn clear_dir(dir: &Path) -> io::Result<()> {
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_dir() {
            ignore_missing(fs::remove_dir_all(&path).await)?;
        } else {
            ignore_missing(fs::remove_file(&path).await)?;
        }
    }
    Ok(())
}

/// Bring `items` in line with what is on disk at `abs`.
fn reconcile(root: &Path, items: &Items, busy: &Busy, slot: &NotifySlot, abs: &Path) {
    let Ok(rel) = abs.strip_prefix(root) else {
        return;
    };
    let Some(key) = key_for(rel) else {
        return;
    };

    let change = {
        let claims = busy.lock();
        if is_claimed(&claims, &key) {
            return;
        }
        observe(items, &key, abs)
    };
    if let Some((kind, changed)) = change {
        slot.emit(kind, &changed);
    }
}

/// Apply the disk state at `abs` to `items` under `key`; returns what changed.
fn observe(items: &Items, key: &str, abs: &Path) -> Option<(ChangeKind, String)> {
    match std::fs::symlink_metadata(abs) {
        Ok(meta) if meta.is_dir() => {
            let dir_key = folder_key(key);
            items
                .insert(dir_key.clone(), Item::Folder)
                .is_none()
                .then_some((ChangeKind::Created, dir_key))
        }
        Ok(meta) if meta.is_file() => match std::fs::read_to_string(abs) {
            Ok(text) => {
                let item = Item::file(&text);
                match items.insert(key, item.clone()) {
                    None => Some((ChangeKind::Created, key.to_string())),
                    Some(previous) if previous != item => {
                        Some((ChangeKind::Modified, key.to_string()))
                    }
                    Some(_) => None,
                }
            }
            Err(e) => {
                tracing::warn!(path = %abs.display(), error = %e, "cannot read changed file");
                None
            }
        },
        Ok(_) => None,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let dir_key = folder_key(key);
            if items.remove_tree(&dir_key) > 0 {
                Some((ChangeKind::Removed, dir_key))
            } else if items.remove(key).is_some() {
                Some((ChangeKind::Removed, key.to_string()))
            } else {
                None
            }
        }
        Err(e) => {
            tracing::warn!(path = %abs.display(), error = %e, "cannot stat changed path");
            None
        }
    }
}

/// `/`-joined key for a path relative to the root; `None` for the root itself.
fn key_for(rel: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(s) => parts.push(s.to_str()?),
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

fn ignore_missing(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[async_trait]
impl Drive for MountedDrive {
    fn items(&self) -> &Items {
        &self.items
    }

    async fn mount(&self, notify: Notify) -> FsResult<()> {
        let meta = fs::metadata(&self.root).await?;
        if !meta.is_dir() {
            return Err(FsError::NotADirectory(self.root.clone()));
        }

        let tree = scan(&self.root).await?;
        tracing::debug!(root = %self.root.display(), entries = tree.len(), "mounted drive scanned");
        self.items.replace(tree);
        self.notify.set(notify);

        if self.watch_external {
            let canonical = fs::canonicalize(&self.root).await?;
            self.start_watcher(canonical)?;
        }
        Ok(())
    }

    fn unmount(&self) {
        let watcher = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if watcher.is_some() {
            tracing::debug!(root = %self.root.display(), "stopped mounted drive watcher");
        }
    }

    async fn putdir(&self, path: &str) -> FsResult<()> {
        let key = folder_key(path);
        if key.is_empty() {
            return Ok(());
        }
        let target = self.resolve(path)?;

        let claim = self.busy.claim(&key);
        fs::create_dir_all(target).await?;
        let created = claim.finish(|| self.items.insert(key.clone(), Item::Folder).is_none());

        if created {
            self.notify.emit(ChangeKind::Created, &key);
        }
        Ok(())
    }

    async fn putfile(&self, path: &str, content: &str) -> FsResult<()> {
        let item = Item::file(content);
        let target = self.resolve(path)?;

        let claim = self.busy.claim(path);
        fs::write(target, item.content().unwrap_or_default()).await?;
        let change = claim.finish(|| match self.items.insert(path, item.clone()) {
            None => Some(ChangeKind::Created),
            Some(previous) if previous != item => Some(ChangeKind::Modified),
            Some(_) => None,
        });

        if let Some(kind) = change {
            self.notify.emit(kind, path);
        }
        Ok(())
    }

    async fn rmfile(&self, path: &str) -> FsResult<()> {
        if path.is_empty() {
            return Ok(());
        }
        let target = self.resolve(path)?;

        let claim = self.busy.claim(path);
        ignore_missing(fs::remove_file(target).await)?;
        let removed = claim.finish(|| self.items.remove(path).is_some());

        if removed {
            self.notify.emit(ChangeKind::Removed, path);
        }
        Ok(())
    }

    /// Remove a folder and its contents. For the drive root (`""`) only the
    /// contents go; the mounted directory stays.
    async fn rmdir(&self, path: &str) -> FsResult<()> {
        let key = folder_key(path);
        let target = self.resolve(path)?;

        let claim = self.busy.claim(&key);
        if key.is_empty() {
            clear_dir(&target).await?;
        } else {
            ignore_missing(fs::remove_dir_all(target).await)?;
        }
        let removed = claim.finish(|| self.items.remove_tree(&key) > 0);

        if removed {
            self.notify.emit(ChangeKind::Removed, &key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    type Seen = Arc<std::sync::Mutex<Vec<(ChangeKind, String)>>>;

    fn recorder() -> (Notify, Seen) {
        let seen: Seen = Arc::default();
        let sink = seen.clone();
        let notify: Notify = Arc::new(move |kind: ChangeKind, path: &str| {
            sink.lock().unwrap().push((kind, path.to_string()));
        });
        (notify, seen)
    }

    #[tokio::test]
    async fn mount_scans_existing_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/bin")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "// lib\r\n").unwrap();
        std::fs::write(dir.path().join("README"), "hi").unwrap();

        let drive = MountedDrive::new(dir.path());
        drive.mount(recorder().0).await.unwrap();

        assert_eq!(
            drive.items().keys(),
            vec!["README", "src/", "src/bin/", "src/lib.rs"]
        );
        assert_eq!(drive.items().get("src/lib.rs"), Some(Item::file("// lib\n")));
    }

    #[tokio::test]
    async fn mount_fails_for_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let drive = MountedDrive::new(dir.path().join("gone"));
        let err = drive.mount(recorder().0).await.unwrap_err();
        assert!(matches!(err, FsError::Io(ref e) if e.kind() == io::ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn mount_fails_for_file_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        std::fs::write(&file, "x").unwrap();

        let drive = MountedDrive::new(&file);
        assert!(matches!(
            drive.mount(recorder().0).await,
            Err(FsError::NotADirectory(_))
        ));
    }

    #[tokio::test]
    async fn writes_reach_disk_and_items() {
        let dir = tempfile::tempdir().unwrap();
        let drive = MountedDrive::new(dir.path());
        let (notify, seen) = recorder();
        drive.mount(notify).await.unwrap();

        drive.putdir("docs/").await.unwrap();
        drive.putfile("docs/a.md", "a\r\nb").await.unwrap();
        drive.putfile("docs/a.md", "a\nb").await.unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("docs/a.md")).unwrap(),
            "a\nb"
        );
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (ChangeKind::Created, "docs/".to_string()),
                (ChangeKind::Created, "docs/a.md".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn putfile_without_parent_fails() {
        let dir = tempfile::tempdir().unwrap();
        let drive = MountedDrive::new(dir.path());
        drive.mount(recorder().0).await.unwrap();

        assert!(drive.putfile("missing/a.txt", "x").await.is_err());
        assert!(!drive.items().contains("missing/a.txt"));
    }

    #[tokio::test]
    async fn removals_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/b/c.txt"), "c").unwrap();
        std::fs::write(dir.path().join("f.txt"), "f").unwrap();

        let drive = MountedDrive::new(dir.path());
        let (notify, seen) = recorder();
        drive.mount(notify).await.unwrap();

        drive.rmdir("a/").await.unwrap();
        drive.rmdir("a/").await.unwrap();
        drive.rmfile("f.txt").await.unwrap();
        drive.rmfile("f.txt").await.unwrap();

        assert!(!dir.path().join("a").exists());
        assert!(!dir.path().join("f.txt").exists());
        assert!(drive.items().is_empty());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (ChangeKind::Removed, "a/".to_string()),
                (ChangeKind::Removed, "f.txt".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn parent_segments_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let drive = MountedDrive::new(dir.path().join("inner"));
        std::fs::create_dir_all(drive.root()).unwrap();
        drive.mount(recorder().0).await.unwrap();

        assert!(matches!(
            drive.putfile("../escape.txt", "x").await,
            Err(FsError::PathEscapesRoot(_))
        ));
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn rmdir_of_root_keeps_the_mount_point() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/b/c.txt"), "c").unwrap();
        std::fs::write(dir.path().join("keep.txt"), "k").unwrap();

        let drive = MountedDrive::new(dir.path());
        let (notify, seen) = recorder();
        drive.mount(notify).await.unwrap();

        drive.rmdir("").await.unwrap();

        assert!(dir.path().is_dir());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(drive.items().is_empty());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(ChangeKind::Removed, String::new())]
        );

        drive.putfile("new.txt", "n").await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("new.txt")).unwrap(),
            "n"
        );
    }

    #[tokio::test]
    async fn rmfile_of_root_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.txt"), "k").unwrap();
        let drive = MountedDrive::new(dir.path());
        drive.mount(recorder().0).await.unwrap();

        drive.rmfile("").await.unwrap();
        assert!(dir.path().join("keep.txt").is_file());
        assert!(drive.items().contains("keep.txt"));
    }

    #[test]
    fn claims_cover_their_subtree() {
        let claims: Claims = [("a/".to_string(), 1), ("f.txt".to_string(), 1)].into();
        assert!(is_claimed(&claims, "a"));
        assert!(is_claimed(&claims, "a/b/c"));
        assert!(is_claimed(&claims, "f.txt"));
        assert!(!is_claimed(&claims, "ab"));
        assert!(!is_claimed(&claims, "f.txt.bak"));

        let root: Claims = [(String::new(), 1)].into();
        assert!(is_claimed(&root, "anything/at/all"));
    }

    #[test]
    fn dropped_claim_is_released() {
        let busy = Busy::default();
        {
            let _first = busy.claim("x");
            let second = busy.claim("x");
            second.finish(|| ());
            assert!(is_claimed(&busy.lock(), "x"));
        }
        assert!(busy.lock().is_empty());
    }

    #[test]
    fn key_for_skips_root_and_joins() {
        assert_eq!(key_for(Path::new("")), None);
        assert_eq!(key_for(Path::new("a/b.txt")), Some("a/b.txt".to_string()));
    }

    #[tokio::test]
    async fn external_edits_are_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let drive = MountedDrive::new(dir.path()).watch_external(true);
        let (notify, seen) = recorder();
        drive.mount(notify).await.unwrap();

        std::fs::write(dir.path().join("outside.txt"), "from the host").unwrap();

        let expected = Some(Item::file("from the host"));
        let mut waited = Duration::ZERO;
        while drive.items().get("outside.txt") != expected && waited < Duration::from_secs(5) {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waited += Duration::from_millis(20);
        }

        assert_eq!(drive.items().get("outside.txt"), expected);
        assert!(seen
            .lock()
            .unwrap()
            .contains(&(ChangeKind::Created, "outside.txt".to_string())));
        drive.unmount();
    }

    #[tokio::test]
    async fn own_writes_notify_once_while_watching() {
        let dir = tempfile::tempdir().unwrap();
        let drive = MountedDrive::new(dir.path()).watch_external(true);
        let (notify, seen) = recorder();
        drive.mount(notify).await.unwrap();

        let rounds = 20u8;
        for round in 0..rounds {
            let body = char::from(b'a' + round).to_string().repeat(1 << 20);
            drive.putfile("big.txt", &body).await.unwrap();
            assert_eq!(drive.items().get("big.txt"), Some(Item::file(&body)));
        }
        drive.rmdir("").await.unwrap();

        // late watcher events must not add anything
        tokio::time::sleep(Duration::from_millis(500)).await;
        drive.unmount();

        let mut expected = vec![(ChangeKind::Created, "big.txt".to_string())];
        expected.extend((1..rounds).map(|_| (ChangeKind::Modified, "big.txt".to_string())));
        expected.push((ChangeKind::Removed, String::new()));
        assert_eq!(*seen.lock().unwrap(), expected);
        assert!(drive.items().is_empty());
    }
}
