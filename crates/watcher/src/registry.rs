//! Registry of watched roots and their directory handles
//!
//! A root owns one handle for its own directory and, when recursive, one
//! handle per subdirectory. Every handle belongs to exactly one root; two
//! overlapping roots each hold their own handle on a shared directory.
//!
//! Directories are kept in a `BTreeMap` so a subtree is a contiguous range
//! of keys.

use crate::backend::{Backend, HandleId, WatchHandle};
use crate::error::{Result, WatchError};
use crate::filter::EventFilter;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};
use treewatch_core::WatchId;
use walkdir::WalkDir;

/// Read-only view of a registered root
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchInfo {
    pub id: WatchId,
    pub path: PathBuf,
    pub recursive: bool,
    pub created_at: SystemTime,
    /// Directory handles held, the root's own included
    pub directories: usize,
}

/// What a handle resolves to
#[derive(Debug, Clone, Copy)]
pub struct Resolved<'a> {
    /// Directory the handle watches
    pub dir: &'a Path,
    pub root: WatchId,
    pub root_path: &'a Path,
    pub recursive: bool,
    /// Whether this is the root's own handle
    pub is_root: bool,
}

/// Outcome of `lose_handle`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LostEntry {
    /// A root's own directory is gone; the root was removed
    Root { id: WatchId, path: PathBuf },

    /// A subdirectory is gone; it and its descendants were dropped
    Subdirectory { root: WatchId, path: PathBuf },
}

#[derive(Debug)]
struct WatchRoot {
    path: PathBuf,
    recursive: bool,
    handle: HandleId,
    created_at: SystemTime,
    handles: HashSet<HandleId>,
}

#[derive(Debug)]
struct HandleEntry {
    path: PathBuf,
    root: WatchId,
    handle: WatchHandle,
}

/// Watched roots and the handles they own
#[derive(Debug, Default)]
pub struct PathRegistry {
    roots: HashMap<WatchId, WatchRoot>,
    entries: HashMap<HandleId, HandleEntry>,
    /// Directory -> handles on it, one per covering root
    dirs: BTreeMap<PathBuf, Vec<HandleId>>,
    next_id: u64,
}

impl PathRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Default::default()
        }
    }

    /// Start watching `path`
    ///
    /// Recursive roots get a handle on every existing subdirectory before
    /// this returns. Subdirectories that disappear meanwhile are skipped;
    /// any other failure closes every handle this call opened.
    pub fn register(
        &mut self,
        backend: &mut dyn Backend,
        path: &Path,
        recursive: bool,
    ) -> Result<WatchId> {
        self.register_filtered(backend, path, recursive, None)
    }

    /// Like `register`, but ignored subdirectories get no handle
    pub fn register_filtered(
        &mut self,
        backend: &mut dyn Backend,
        path: &Path,
        recursive: bool,
        filter: Option<&EventFilter>,
    ) -> Result<WatchId> {
        let canonical = match path.canonicalize() {
            Ok(canonical) if canonical.is_dir() => canonical,
            _ => {
                return Err(WatchError::PathNotFound {
                    path: path.to_path_buf(),
                })
            }
        };

        if self.roots.values().any(|root| root.path == canonical) {
            return Err(WatchError::AlreadyWatched { path: canonical });
        }

        let handle = match backend.open(&canonical) {
            Ok(handle) => handle,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(WatchError::PathNotFound { path: canonical })
            }
            Err(err) => return Err(WatchError::backend(canonical, err)),
        };

        let id = WatchId::from_raw(self.next_id);
        self.next_id += 1;

        self.roots.insert(
            id,
            WatchRoot {
                path: canonical.clone(),
                recursive,
                handle: handle.id(),
                created_at: SystemTime::now(),
                handles: HashSet::new(),
            },
        );
        self.insert_entry(id, canonical.clone(), handle);

        if recursive {
            if let Err(err) =
                self.watch_existing_subdirectories(backend, id, &canonical, filter)
            {
                self.remove_root(backend, id);
                warn!(
                    "Rolled back recursive watch on {}: {}",
                    canonical.display(),
                    err
                );
                return Err(err);
            }
        }

        debug!(
            "Registered {} {} ({}, {} directories)",
            id,
            canonical.display(),
            if recursive { "recursive" } else { "flat" },
            self.roots.get(&id).map(|root| root.handles.len()).unwrap_or(0)
        );
        Ok(id)
    }

    fn watch_existing_subdirectories(
        &mut self,
        backend: &mut dyn Backend,
        id: WatchId,
        root: &Path,
        filter: Option<&EventFilter>,
    ) -> Result<()> {
        let walker = WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                let pruned = entry.file_type().is_dir()
                    && filter
                        .map(|filter| filter.should_ignore(root, entry.path(), true))
                        .unwrap_or(false);
                if pruned {
                    debug!("Not watching ignored directory {}", entry.path().display());
                }
                !pruned
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    if err.io_error().map(|e| e.kind()) == Some(io::ErrorKind::NotFound) {
                        continue;
                    }
                    let path = err.path().map(Path::to_path_buf);
                    return Err(WatchError::Backend {
                        path,
                        source: err.into(),
                    });
                }
            };

            if !entry.file_type().is_dir() {
                continue;
            }

            match backend.open(entry.path()) {
                Ok(handle) => self.insert_entry(id, entry.path().to_path_buf(), handle),
                Err(_) if !entry.path().is_dir() => {
                    debug!(
                        "Subdirectory vanished during registration: {}",
                        entry.path().display()
                    );
                }
                Err(err) => return Err(WatchError::backend(entry.path(), err)),
            }
        }

        Ok(())
    }

    /// Stop watching a root and release all of its handles
    pub fn unregister(&mut self, backend: &mut dyn Backend, id: WatchId) -> Result<()> {
        match self.remove_root(backend, id) {
            Some(path) => {
                debug!("Unregistered {} {}", id, path.display());
                Ok(())
            }
            None => Err(WatchError::NotFound { id }),
        }
    }

    fn remove_root(&mut self, backend: &mut dyn Backend, id: WatchId) -> Option<PathBuf> {
        let root = self.roots.remove(&id)?;
        for handle in root.handles {
            self.close_entry(backend, handle);
        }
        Some(root.path)
    }

    fn insert_entry(&mut self, root: WatchId, path: PathBuf, handle: WatchHandle) {
        let id = handle.id();
        self.dirs.entry(path.clone()).or_default().push(id);
        self.entries.insert(id, HandleEntry { path, root, handle });
        if let Some(root) = self.roots.get_mut(&root) {
            root.handles.insert(id);
        }
    }

    /// Drop one entry and close its handle
    fn close_entry(&mut self, backend: &mut dyn Backend, id: HandleId) -> Option<PathBuf> {
        let entry = self.entries.remove(&id)?;

        if let Some(ids) = self.dirs.get_mut(&entry.path) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.dirs.remove(&entry.path);
            }
        }
        if let Some(root) = self.roots.get_mut(&entry.root) {
            root.handles.remove(&id);
        }

        if let Err(err) = backend.close(entry.handle) {
            warn!("Failed to close handle on {}: {}", entry.path.display(), err);
        }
        Some(entry.path)
    }

    /// Directory a handle watches; `None` once it was released
    pub fn resolve(&self, handle: HandleId) -> Option<&Path> {
        self.entries.get(&handle).map(|entry| entry.path.as_path())
    }

    /// Full resolution of a handle, including its root
    pub fn lookup(&self, handle: HandleId) -> Option<Resolved<'_>> {
        let entry = self.entries.get(&handle)?;
        let root = self.roots.get(&entry.root)?;
        Some(Resolved {
            dir: &entry.path,
            root: entry.root,
            root_path: &root.path,
            recursive: root.recursive,
            is_root: root.handle == handle,
        })
    }

    /// Watch `name` below the directory of `parent`, for recursive roots
    ///
    /// Returns `None` for flat roots, released parents, directories the
    /// root already watches, and directories that vanished again.
    pub fn note_new_subdirectory(
        &mut self,
        backend: &mut dyn Backend,
        parent: HandleId,
        name: &OsStr,
    ) -> Result<Option<HandleId>> {
        let Some(entry) = self.entries.get(&parent) else {
            return Ok(None);
        };
        let root = entry.root;
        let path = entry.path.join(name);
        self.adopt(backend, root, path)
    }

    /// Watch `path` as part of recursive root `root`
    pub fn adopt(
        &mut self,
        backend: &mut dyn Backend,
        root: WatchId,
        path: PathBuf,
    ) -> Result<Option<HandleId>> {
        match self.roots.get(&root) {
            Some(watch_root) if watch_root.recursive => {}
            _ => return Ok(None),
        }
        if self.is_watched_by(root, &path) {
            return Ok(None);
        }

        match backend.open(&path) {
            Ok(handle) => {
                let id = handle.id();
                debug!("Watching new subdirectory {}", path.display());
                self.insert_entry(root, path, handle);
                Ok(Some(id))
            }
            Err(_) if !path.is_dir() => Ok(None),
            Err(err) => Err(WatchError::backend(path, err)),
        }
    }

    fn is_watched_by(&self, root: WatchId, path: &Path) -> bool {
        self.dirs
            .get(path)
            .map(|ids| {
                ids.iter()
                    .any(|id| self.entries.get(id).map(|e| e.root == root).unwrap_or(false))
            })
            .unwrap_or(false)
    }

    /// Handles of `root` on `dir` and below, the root's own excluded
    fn subtree(&self, root: WatchId, dir: &Path) -> Vec<HandleId> {
        let root_handle = self.roots.get(&root).map(|r| r.handle);
        self.dirs
            .range(dir.to_path_buf()..)
            .take_while(|(path, _)| path.starts_with(dir))
            .flat_map(|(_, ids)| ids.iter().copied())
            .filter(|id| Some(*id) != root_handle)
            .filter(|id| self.entries.get(id).map(|e| e.root == root).unwrap_or(false))
            .collect()
    }

    /// Release the handles of `root` on `dir` and everything below it
    pub fn forget_subtree(
        &mut self,
        backend: &mut dyn Backend,
        root: WatchId,
        dir: &Path,
    ) -> usize {
        let handles = self.subtree(root, dir);
        for id in &handles {
            self.close_entry(backend, *id);
        }
        if !handles.is_empty() {
            debug!("Released {} handles under {}", handles.len(), dir.display());
        }
        handles.len()
    }

    /// Re-key the handles of `root` after `from` was renamed to `to`
    ///
    /// Handles follow the directory, so only the paths change. A moved
    /// handle that would collide with one the root already holds at the
    /// destination is closed instead.
    pub fn rename_subtree(
        &mut self,
        backend: &mut dyn Backend,
        root: WatchId,
        from: &Path,
        to: &Path,
    ) -> usize {
        let handles = self.subtree(root, from);
        let mut moved = 0;

        for id in handles {
            let Some(old_path) = self.entries.get(&id).map(|e| e.path.clone()) else {
                continue;
            };
            let Ok(suffix) = old_path.strip_prefix(from) else {
                continue;
            };
            let new_path = if suffix.as_os_str().is_empty() {
                to.to_path_buf()
            } else {
                to.join(suffix)
            };

            if self.is_watched_by(root, &new_path) {
                self.close_entry(backend, id);
                continue;
            }

            if let Some(ids) = self.dirs.get_mut(&old_path) {
                ids.retain(|other| *other != id);
                if ids.is_empty() {
                    self.dirs.remove(&old_path);
                }
            }
            self.dirs.entry(new_path.clone()).or_default().push(id);
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.path = new_path;
            }
            moved += 1;
        }

        moved
    }

    /// Handle the loss of a handle the backend can no longer serve
    pub fn lose_handle(
        &mut self,
        backend: &mut dyn Backend,
        handle: HandleId,
    ) -> Option<LostEntry> {
        let entry = self.entries.get(&handle)?;
        let root_id = entry.root;
        let path = entry.path.clone();

        let is_root = self
            .roots
            .get(&root_id)
            .map(|root| root.handle == handle)
            .unwrap_or(false);

        if is_root {
            let path = self.remove_root(backend, root_id)?;
            warn!("Watched root {} disappeared: {}", root_id, path.display());
            Some(LostEntry::Root { id: root_id, path })
        } else {
            self.forget_subtree(backend, root_id, &path);
            Some(LostEntry::Subdirectory {
                root: root_id,
                path,
            })
        }
    }

    /// Release every handle and forget every root
    pub fn close_all(&mut self, backend: &mut dyn Backend) {
        let ids: Vec<HandleId> = self.entries.keys().copied().collect();
        for id in ids {
            self.close_entry(backend, id);
        }
        self.roots.clear();
        self.dirs.clear();
    }

    /// Snapshot of every root, ordered by id
    pub fn roots(&self) -> Vec<WatchInfo> {
        let mut infos: Vec<WatchInfo> = self
            .roots
            .iter()
            .map(|(id, root)| WatchInfo {
                id: *id,
                path: root.path.clone(),
                recursive: root.recursive,
                created_at: root.created_at,
                directories: root.handles.len(),
            })
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    pub fn contains(&self, id: WatchId) -> bool {
        self.roots.contains_key(&id)
    }

    /// Number of roots
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Number of open handles across all roots
    pub fn handle_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::scripted::ScriptedBackend;
    use std::ffi::OsString;
    use std::fs;
    use tempfile::TempDir;

    fn tree() -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::create_dir_all(root.join("c")).unwrap();
        fs::write(root.join("a/file.txt"), b"x").unwrap();
        (temp_dir, root)
    }

    #[test]
    fn test_ignored_subdirectories_get_no_handle() {
        let (_temp, root) = tree();
        fs::create_dir_all(root.join("target/debug/deps")).unwrap();
        let (mut backend, script) = ScriptedBackend::new();
        let mut registry = PathRegistry::new();
        let filter = EventFilter::new(&treewatch_core::IgnoreConfig {
            patterns: vec!["target/".to_string()],
            editor_temp_files: false,
        })
        .unwrap();

        registry
            .register_filtered(&mut backend, &root, true, Some(&filter))
            .unwrap();

        let open = script.open_paths();
        assert_eq!(open.len(), 4);
        assert!(open.contains(&root.join("a/b")));
        assert!(!open.iter().any(|path| path.starts_with(root.join("target"))));
    }

    #[test]
    fn test_flat_register_opens_one_handle() {
        let (_temp, root) = tree();
        let (mut backend, script) = ScriptedBackend::new();
        let mut registry = PathRegistry::new();

        let id = registry.register(&mut backend, &root, false).unwrap();
        assert_eq!(script.opened(), vec![root.clone()]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.roots()[0].id, id);
        assert!(!registry.roots()[0].recursive);
    }

    #[test]
    fn test_recursive_register_watches_every_directory() {
        let (_temp, root) = tree();
        let (mut backend, script) = ScriptedBackend::new();
        let mut registry = PathRegistry::new();

        registry.register(&mut backend, &root, true).unwrap();

        let open = script.open_paths();
        assert_eq!(open.len(), 4);
        assert!(open.contains(&root));
        assert!(open.contains(&root.join("a")));
        assert!(open.contains(&root.join("a/b")));
        assert!(open.contains(&root.join("c")));
        assert_eq!(registry.handle_count(), 4);
        assert_eq!(registry.roots()[0].directories, 4);
    }

    #[test]
    fn test_missing_path_and_files_rejected() {
        let (_temp, root) = tree();
        let (mut backend, script) = ScriptedBackend::new();
        let mut registry = PathRegistry::new();

        let missing = registry.register(&mut backend, &root.join("nope"), true);
        assert!(matches!(missing, Err(WatchError::PathNotFound { .. })));

        let file = registry.register(&mut backend, &root.join("a/file.txt"), false);
        assert!(matches!(file, Err(WatchError::PathNotFound { .. })));

        assert_eq!(script.open_count(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_root_rejected() {
        let (_temp, root) = tree();
        let (mut backend, _script) = ScriptedBackend::new();
        let mut registry = PathRegistry::new();

        registry.register(&mut backend, &root, false).unwrap();
        // Same directory spelled differently
        let again = registry.register(&mut backend, &root.join("a/.."), true);

        assert!(matches!(again, Err(WatchError::AlreadyWatched { .. })));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_overlapping_roots_allowed() {
        let (_temp, root) = tree();
        let (mut backend, script) = ScriptedBackend::new();
        let mut registry = PathRegistry::new();

        registry.register(&mut backend, &root, true).unwrap();
        registry.register(&mut backend, &root.join("a"), false).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(script.open_count(), 5);
    }

    #[test]
    fn test_failed_subdirectory_rolls_back() {
        let (_temp, root) = tree();
        let (mut backend, script) = ScriptedBackend::new();
        script.fail_open(root.join("a/b"), io::ErrorKind::PermissionDenied);
        let mut registry = PathRegistry::new();

        let result = registry.register(&mut backend, &root, true);

        assert!(matches!(result, Err(WatchError::Backend { .. })));
        assert_eq!(script.open_count(), 0);
        assert!(registry.is_empty());
        assert_eq!(registry.handle_count(), 0);
    }

    #[test]
    fn test_unregister_releases_everything() {
        let (_temp, root) = tree();
        let (mut backend, script) = ScriptedBackend::new();
        let mut registry = PathRegistry::new();

        let id = registry.register(&mut backend, &root, true).unwrap();
        let handle = script.handle_for(&root.join("a")).unwrap();

        registry.unregister(&mut backend, id).unwrap();
        assert_eq!(script.open_count(), 0);
        assert_eq!(script.closed().len(), 4);
        assert!(registry.resolve(handle).is_none());

        let again = registry.unregister(&mut backend, id);
        assert!(matches!(again, Err(WatchError::NotFound { .. })));
    }

    #[test]
    fn test_lookup_reports_root() {
        let (_temp, root) = tree();
        let (mut backend, script) = ScriptedBackend::new();
        let mut registry = PathRegistry::new();

        let id = registry.register(&mut backend, &root, true).unwrap();

        let sub = script.handle_for(&root.join("a/b")).unwrap();
        let resolved = registry.lookup(sub).unwrap();
        assert_eq!(resolved.dir, root.join("a/b"));
        assert_eq!(resolved.root, id);
        assert_eq!(resolved.root_path, root);
        assert!(!resolved.is_root);

        let top = script.handle_for(&root).unwrap();
        assert!(registry.lookup(top).unwrap().is_root);
    }

    #[test]
    fn test_new_subdirectory_only_for_recursive_roots() {
        let (_temp, root) = tree();
        let (mut backend, script) = ScriptedBackend::new();
        let mut registry = PathRegistry::new();

        registry.register(&mut backend, &root, false).unwrap();
        fs::create_dir(root.join("fresh")).unwrap();

        let parent = script.handle_for(&root).unwrap();
        let added = registry
            .note_new_subdirectory(&mut backend, parent, OsStr::new("fresh"))
            .unwrap();
        assert!(added.is_none());
        assert_eq!(script.open_count(), 1);
    }

    #[test]
    fn test_new_subdirectory_registered_once() {
        let (_temp, root) = tree();
        let (mut backend, script) = ScriptedBackend::new();
        let mut registry = PathRegistry::new();

        registry.register(&mut backend, &root, true).unwrap();
        fs::create_dir(root.join("c/fresh")).unwrap();

        let parent = script.handle_for(&root.join("c")).unwrap();
        let name = OsString::from("fresh");
        let first = registry.note_new_subdirectory(&mut backend, parent, &name).unwrap();
        let second = registry.note_new_subdirectory(&mut backend, parent, &name).unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(registry.resolve(first.unwrap()), Some(root.join("c/fresh").as_path()));
    }

    #[test]
    fn test_vanished_subdirectory_ignored() {
        let (_temp, root) = tree();
        let (mut backend, script) = ScriptedBackend::new();
        let mut registry = PathRegistry::new();

        registry.register(&mut backend, &root, true).unwrap();
        script.fail_open(root.join("ghost"), io::ErrorKind::NotFound);

        let parent = script.handle_for(&root).unwrap();
        let added = registry
            .note_new_subdirectory(&mut backend, parent, OsStr::new("ghost"))
            .unwrap();
        assert!(added.is_none());
    }

    #[test]
    fn test_unknown_parent_ignored() {
        let (mut backend, _script) = ScriptedBackend::new();
        let mut registry = PathRegistry::new();

        let added = registry
            .note_new_subdirectory(&mut backend, HandleId::from_raw(99), OsStr::new("x"))
            .unwrap();
        assert!(added.is_none());
    }

    #[test]
    fn test_forget_subtree_keeps_siblings() {
        let (_temp, root) = tree();
        let (mut backend, script) = ScriptedBackend::new();
        let mut registry = PathRegistry::new();

        let id = registry.register(&mut backend, &root, true).unwrap();
        let closed = registry.forget_subtree(&mut backend, id, &root.join("a"));

        assert_eq!(closed, 2);
        let open = script.open_paths();
        assert!(open.contains(&root));
        assert!(open.contains(&root.join("c")));
        assert!(!open.contains(&root.join("a/b")));
    }

    #[test]
    fn test_forget_subtree_ignores_similar_prefix() {
        let (_temp, root) = tree();
        fs::create_dir(root.join("a-sibling")).unwrap();
        let (mut backend, script) = ScriptedBackend::new();
        let mut registry = PathRegistry::new();

        let id = registry.register(&mut backend, &root, true).unwrap();
        registry.forget_subtree(&mut backend, id, &root.join("a"));

        assert!(script.open_paths().contains(&root.join("a-sibling")));
    }

    #[test]
    fn test_rename_subtree_rekeys_paths() {
        let (_temp, root) = tree();
        let (mut backend, script) = ScriptedBackend::new();
        let mut registry = PathRegistry::new();

        let id = registry.register(&mut backend, &root, true).unwrap();
        let inner = script.handle_for(&root.join("a/b")).unwrap();

        let moved = registry.rename_subtree(&mut backend, id, &root.join("a"), &root.join("z"));

        assert_eq!(moved, 2);
        assert_eq!(registry.resolve(inner), Some(root.join("z/b").as_path()));
        assert_eq!(script.open_count(), 4);
    }

    #[test]
    fn test_lost_root_removes_root() {
        let (_temp, root) = tree();
        let (mut backend, script) = ScriptedBackend::new();
        let mut registry = PathRegistry::new();

        let id = registry.register(&mut backend, &root, true).unwrap();
        let handle = script.handle_for(&root).unwrap();

        let lost = registry.lose_handle(&mut backend, handle);
        assert_eq!(lost, Some(LostEntry::Root { id, path: root }));
        assert!(registry.is_empty());
        assert_eq!(script.open_count(), 0);
    }

    #[test]
    fn test_lost_subdirectory_drops_descendants() {
        let (_temp, root) = tree();
        let (mut backend, script) = ScriptedBackend::new();
        let mut registry = PathRegistry::new();

        registry.register(&mut backend, &root, true).unwrap();
        let handle = script.handle_for(&root.join("a")).unwrap();

        let lost = registry.lose_handle(&mut backend, handle);
        assert!(matches!(lost, Some(LostEntry::Subdirectory { .. })));
        assert_eq!(registry.len(), 1);
        assert_eq!(script.open_count(), 2);
    }

    #[test]
    fn test_close_all() {
        let (_temp, root) = tree();
        let (mut backend, script) = ScriptedBackend::new();
        let mut registry = PathRegistry::new();

        registry.register(&mut backend, &root, true).unwrap();
        registry.register(&mut backend, &root.join("a"), false).unwrap();
        registry.close_all(&mut backend);

        assert!(registry.is_empty());
        assert_eq!(registry.handle_count(), 0);
        assert_eq!(script.open_count(), 0);
    }
}
