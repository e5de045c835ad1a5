// src/tree.rs
//! Recursive watch bookkeeping for one or more root directories.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::error::WatchError;
use crate::event::WatchId;

/// The watch operations [`WatchTree`] needs from an event source.
pub trait WatchBackend {
    fn add_watch(&self, path: &Path, mask: u32) -> Result<WatchId, WatchError>;
    fn remove_watch(&self, wd: WatchId) -> Result<(), WatchError>;
}

/// Bidirectional `path <-> watch id` map. A path is tracked at most once.
#[derive(Debug, Default)]
pub struct WatchTable {
    by_path: HashMap<PathBuf, WatchId>,
    by_id: HashMap<WatchId, PathBuf>,
}

impl WatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a watch. Returns `false` if `path` was already tracked.
    ///
    /// The kernel returns the existing id when an already watched inode is
    /// added again (a rename whose moved-from half was missed), so a stale
    /// path for the same id is dropped.
    pub fn insert(&mut self, path: PathBuf, wd: WatchId) -> bool {
        if self.by_path.contains_key(&path) {
            return false;
        }
        if let Some(stale) = self.by_id.insert(wd, path.clone()) {
            self.by_path.remove(&stale);
        }
        self.by_path.insert(path, wd);
        true
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.by_path.contains_key(path)
    }

    pub fn id_of(&self, path: &Path) -> Option<WatchId> {
        self.by_path.get(path).copied()
    }

    pub fn path_of(&self, wd: WatchId) -> Option<&Path> {
        self.by_id.get(&wd).map(PathBuf::as_path)
    }

    pub fn remove_path(&mut self, path: &Path) -> Option<WatchId> {
        let wd = self.by_path.remove(path)?;
        self.by_id.remove(&wd);
        Some(wd)
    }

    pub fn remove_id(&mut self, wd: WatchId) -> Option<PathBuf> {
        let path = self.by_id.remove(&wd)?;
        self.by_path.remove(&path);
        Some(path)
    }

    /// Drops `root` and every tracked path below it.
    pub fn remove_tree(&mut self, root: &Path) -> Vec<(PathBuf, WatchId)> {
        let doomed: Vec<PathBuf> = self
            .by_path
            .keys()
            .filter(|p| p.starts_with(root))
            .cloned()
            .collect();

        doomed
            .into_iter()
            .filter_map(|p| self.remove_path(&p).map(|wd| (p, wd)))
            .collect()
    }

    pub fn drain(&mut self) -> Vec<(PathBuf, WatchId)> {
        self.by_id.clear();
        self.by_path.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    /// Tracked paths, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.by_path.keys().cloned().collect();
        paths.sort();
        paths
    }
}

/// Outcome of enumerating a directory tree.
#[derive(Debug, Default)]
pub struct Discovery {
    /// Watches newly registered.
    pub added: usize,
    /// Non-directory entries seen while walking.
    pub files: Vec<PathBuf>,
}

/// Keeps a [`WatchTable`] in sync with the directories under the roots.
#[derive(Debug)]
pub struct WatchTree<B> {
    backend: B,
    mask: u32,
    table: Mutex<WatchTable>,
}

impl<B: WatchBackend> WatchTree<B> {
    pub fn new(backend: B, mask: u32) -> Self {
        Self {
            backend,
            mask,
            table: Mutex::new(WatchTable::new()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Watches `root` and every directory below it, breadth first.
    ///
    /// Each directory is watched before it is listed, so a child created while
    /// we walk is either listed here or reported by the parent's watch.
    pub fn watch_tree(&self, root: &Path) -> Discovery {
        let mut discovery = Discovery::default();
        let mut queue = VecDeque::from([root.to_path_buf()]);

        while let Some(dir) = queue.pop_front() {
            if self.add_watch(&dir) {
                discovery.added += 1;
            }

            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound && dir.as_path() != root => {
                    debug!("Directory vanished while walking: {}", dir.display());
                    continue;
                }
                Err(e) => {
                    error!("Failed to list {}: {}", dir.display(), e);
                    continue;
                }
            };

            for entry in entries.flatten() {
                let Ok(file_type) = entry.file_type() else {
                    continue;
                };
                if file_type.is_dir() {
                    queue.push_back(entry.path());
                } else {
                    discovery.files.push(entry.path());
                }
            }
        }

        discovery
    }

    /// A directory appeared under a watched one. It may already be gone again,
    /// which is not an error.
    pub fn handle_directory_created(&self, path: &Path) -> Discovery {
        if !path.is_dir() {
            debug!(
                "New directory disappeared before it could be watched: {}",
                path.display()
            );
            return Discovery::default();
        }
        debug!("A directory has been created, adding watches: {}", path.display());
        self.watch_tree(path)
    }

    /// A directory was deleted. The kernel has already dropped the watches,
    /// so only local bookkeeping is cleaned up.
    pub fn handle_directory_removed(&self, path: &Path) -> usize {
        let removed = self.table.lock().remove_tree(path);
        for (p, wd) in &removed {
            debug!("Forgetting watch ({}): {}", wd, p.display());
        }
        removed.len()
    }

    /// A directory was renamed away. Its watches survive the move, so they are
    /// released as well as forgotten. A rename inside the tree is followed by
    /// a create for the new name, which watches it again.
    pub fn handle_directory_moved_out(&self, path: &Path) -> usize {
        let removed = self.table.lock().remove_tree(path);
        for (p, wd) in &removed {
            self.release(p, *wd);
        }
        removed.len()
    }

    /// The kernel reported that `wd` is gone.
    pub fn forget_watch(&self, wd: WatchId) -> Option<PathBuf> {
        self.table.lock().remove_id(wd)
    }

    /// Directory watched by `wd`.
    pub fn resolve(&self, wd: WatchId) -> Option<PathBuf> {
        self.table.lock().path_of(wd).map(Path::to_path_buf)
    }

    pub fn watch_id(&self, path: &Path) -> Option<WatchId> {
        self.table.lock().id_of(path)
    }

    pub fn is_watched(&self, path: &Path) -> bool {
        self.table.lock().contains(path)
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.table.lock().paths()
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }

    /// Removes every watch we still track.
    pub fn unwatch_all(&self) {
        let drained = self.table.lock().drain();
        for (path, wd) in drained {
            self.release(&path, wd);
        }
    }

    fn release(&self, path: &Path, wd: WatchId) {
        match self.backend.remove_watch(wd) {
            Ok(()) => debug!("Removed watch ({}): {}", wd, path.display()),
            // EINVAL: already invalidated by the kernel.
            Err(WatchError::Io(e)) if e.raw_os_error() == Some(libc::EINVAL) => {
                debug!("Watch ({}) on {} already gone", wd, path.display());
            }
            Err(e) => warn!("Could not remove watch ({}) on {}: {}", wd, path.display(), e),
        }
    }

    fn add_watch(&self, path: &Path) -> bool {
        // The lock is held across the syscall so two threads cannot both
        // decide the path is new.
        let mut table = self.table.lock();
        if table.contains(path) {
            return false;
        }
        match self.backend.add_watch(path, self.mask) {
            Ok(wd) => {
                debug!("Added watch ({}): {}", wd, path.display());
                table.insert(path.to_path_buf(), wd)
            }
            Err(WatchError::AddWatch { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                debug!("Directory vanished before watch: {}", path.display());
                false
            }
            Err(e) => {
                error!("{}", e);
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::fs;

    /// Hands out sequential ids and remembers what it was asked to do.
    #[derive(Debug, Default)]
    pub(crate) struct FakeBackend {
        next: Mutex<WatchId>,
        pub added: Mutex<Vec<PathBuf>>,
        pub removed: Mutex<Vec<WatchId>>,
        pub refuse: Mutex<HashSet<PathBuf>>,
    }

    impl WatchBackend for FakeBackend {
        fn add_watch(&self, path: &Path, _mask: u32) -> Result<WatchId, WatchError> {
            if self.refuse.lock().contains(path) {
                return Err(WatchError::AddWatch {
                    path: path.to_path_buf(),
                    source: std::io::Error::from_raw_os_error(libc::EACCES),
                });
            }
            self.added.lock().push(path.to_path_buf());
            let mut next = self.next.lock();
            *next += 1;
            Ok(*next)
        }

        fn remove_watch(&self, wd: WatchId) -> Result<(), WatchError> {
            self.removed.lock().push(wd);
            Ok(())
        }
    }

    fn tree() -> WatchTree<FakeBackend> {
        WatchTree::new(FakeBackend::default(), crate::event::SCAN_MASK)
    }

    #[test]
    fn table_tracks_a_path_once() {
        let mut table = WatchTable::new();
        assert!(table.insert(PathBuf::from("/a"), 1));
        assert!(!table.insert(PathBuf::from("/a"), 2));
        assert_eq!(table.id_of(Path::new("/a")), Some(1));
        assert_eq!(table.path_of(1), Some(Path::new("/a")));
        assert_eq!(table.path_of(2), None);
    }

    #[test]
    fn table_reinsert_of_same_id_drops_stale_path() {
        let mut table = WatchTable::new();
        table.insert(PathBuf::from("/media/old"), 5);
        table.insert(PathBuf::from("/media/new"), 5);
        assert!(!table.contains(Path::new("/media/old")));
        assert_eq!(table.path_of(5), Some(Path::new("/media/new")));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn remove_tree_is_component_wise() {
        let mut table = WatchTable::new();
        table.insert(PathBuf::from("/m/show"), 1);
        table.insert(PathBuf::from("/m/show/s01"), 2);
        table.insert(PathBuf::from("/m/show/s01/extras"), 3);
        table.insert(PathBuf::from("/m/showcase"), 4);

        let mut removed: Vec<WatchId> =
            table.remove_tree(Path::new("/m/show")).into_iter().map(|(_, wd)| wd).collect();
        removed.sort();
        assert_eq!(removed, vec![1, 2, 3]);
        assert_eq!(table.paths(), vec![PathBuf::from("/m/showcase")]);
        assert_eq!(table.path_of(2), None);
    }

    #[test]
    fn watch_tree_registers_every_directory() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("a/b/c")).unwrap();
        fs::create_dir_all(root.path().join("d")).unwrap();
        fs::write(root.path().join("a/film.mkv"), b"x").unwrap();

        let tree = tree();
        let discovery = tree.watch_tree(root.path());

        assert_eq!(discovery.added, 5);
        assert_eq!(discovery.files, vec![root.path().join("a/film.mkv")]);
        for dir in ["", "a", "a/b", "a/b/c", "d"] {
            assert!(tree.is_watched(&root.path().join(dir)), "{} not watched", dir);
        }
    }

    #[test]
    fn watch_tree_twice_does_not_duplicate_watches() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("a")).unwrap();

        let tree = tree();
        tree.watch_tree(root.path());
        let again = tree.watch_tree(root.path());

        assert_eq!(again.added, 0);
        assert_eq!(tree.backend().added.lock().len(), 2);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn created_directory_is_walked_including_existing_content() {
        let root = tempfile::tempdir().unwrap();
        let tree = tree();
        tree.watch_tree(root.path());

        let new_dir = root.path().join("NewFilm");
        fs::create_dir_all(new_dir.join("Subs")).unwrap();
        fs::write(new_dir.join("film.mkv"), b"x").unwrap();

        let discovery = tree.handle_directory_created(&new_dir);
        assert_eq!(discovery.added, 2);
        assert_eq!(discovery.files, vec![new_dir.join("film.mkv")]);
        assert!(tree.is_watched(&new_dir.join("Subs")));
    }

    #[test]
    fn created_directory_that_already_vanished_is_tolerated() {
        let root = tempfile::tempdir().unwrap();
        let tree = tree();
        tree.watch_tree(root.path());

        let discovery = tree.handle_directory_created(&root.path().join("gone"));
        assert_eq!(discovery.added, 0);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn removed_directory_drops_descendants_without_syscalls() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("show/s01")).unwrap();
        let tree = tree();
        tree.watch_tree(root.path());
        assert_eq!(tree.len(), 3);

        let removed = tree.handle_directory_removed(&root.path().join("show"));
        assert_eq!(removed, 2);
        assert_eq!(tree.watched_paths(), vec![root.path().to_path_buf()]);
        assert!(tree.backend().removed.lock().is_empty());
    }

    #[test]
    fn moved_out_directory_releases_descendant_watches() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("show/s01")).unwrap();
        let tree = tree();
        tree.watch_tree(root.path());
        let show = tree.watch_id(&root.path().join("show")).unwrap();
        let season = tree.watch_id(&root.path().join("show/s01")).unwrap();

        let released = tree.handle_directory_moved_out(&root.path().join("show"));
        assert_eq!(released, 2);
        assert_eq!(tree.watched_paths(), vec![root.path().to_path_buf()]);
        let mut removed = tree.backend().removed.lock().clone();
        removed.sort();
        let mut expected = vec![show, season];
        expected.sort();
        assert_eq!(removed, expected);
    }

    #[test]
    fn refused_watch_is_skipped_and_the_rest_continue() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("locked")).unwrap();
        fs::create_dir(root.path().join("open")).unwrap();

        let tree = tree();
        tree.backend()
            .refuse
            .lock()
            .insert(root.path().join("locked"));
        tree.watch_tree(root.path());

        assert!(!tree.is_watched(&root.path().join("locked")));
        assert!(tree.is_watched(&root.path().join("open")));
    }

    #[test]
    fn unwatch_all_releases_everything() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("a")).unwrap();
        let tree = tree();
        tree.watch_tree(root.path());

        tree.unwatch_all();
        assert!(tree.is_empty());
        assert_eq!(tree.backend().removed.lock().len(), 2);
    }
}
