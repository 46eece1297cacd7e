//! Raw event normalization
//!
//! Turns handle-relative backend records into absolute `ChangeEvent`s:
//! - resolves handles to directories through the registry
//! - pairs split rename halves by (root, cookie) within the pairing window
//! - adopts directories created inside recursive roots, then lists them
//! - keeps the registry in step with removals, renames and lost handles
//!
//! Unpaired rename halves are never dropped: an expired `From` becomes
//! `Removed`, an expired `To` becomes `Created`.

use crate::backend::{Backend, HandleId, LostReason, RawEvent, RenameHalf};
use crate::error::{Result, WatchError};
use crate::filter::EventFilter;
use crate::metrics::WatcherMetrics;
use crate::reconcile;
use crate::registry::{LostEntry, PathRegistry};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};
use treewatch_core::{ChangeEvent, ConfigError, WatchId, WatcherConfig};

/// Root an event belongs to
#[derive(Debug, Clone)]
struct Scope {
    root: WatchId,
    root_path: PathBuf,
}

/// A rename half waiting for its partner
#[derive(Debug)]
struct PendingFragment {
    half: RenameHalf,
    path: PathBuf,
    scope: Scope,
    is_dir: bool,
    at: Instant,
}

/// Stateful raw-event translator, owned by the background thread
pub struct Normalizer {
    pending: HashMap<(WatchId, u32), PendingFragment>,
    pairing_window: Duration,
    reconcile_new_directories: bool,
    filter: Option<EventFilter>,
    metrics: Arc<WatcherMetrics>,
}

impl Normalizer {
    pub fn new(config: &WatcherConfig, metrics: Arc<WatcherMetrics>) -> Result<Self> {
        let filter = EventFilter::from_config(&config.ignore).map_err(|err| {
            WatchError::Config(ConfigError::Invalid {
                field: "ignore.patterns",
                reason: err.to_string(),
            })
        })?;

        Ok(Self {
            pending: HashMap::new(),
            pairing_window: config.rename_pairing_window(),
            reconcile_new_directories: config.reconcile_new_directories,
            filter,
            metrics,
        })
    }

    /// Compiled ignore rules, if any are configured
    pub fn filter(&self) -> Option<&EventFilter> {
        self.filter.as_ref()
    }

    /// Rename halves currently waiting for a partner
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Translate one backend read
    pub fn process_batch(
        &mut self,
        events: Vec<RawEvent>,
        registry: &mut PathRegistry,
        backend: &mut dyn Backend,
        now: Instant,
        out: &mut Vec<ChangeEvent>,
    ) {
        self.metrics.record_raw(events.len() as u64);
        for raw in events {
            self.process(raw, registry, backend, now, out);
        }
    }

    /// Translate one raw event
    pub fn process(
        &mut self,
        raw: RawEvent,
        registry: &mut PathRegistry,
        backend: &mut dyn Backend,
        now: Instant,
        out: &mut Vec<ChangeEvent>,
    ) {
        trace!("raw event {:?}", raw);

        match raw {
            RawEvent::Overflow => {
                warn!("Backend dropped events; consumers must rescan");
                self.metrics.record_kernel_overflow();
                out.push(ChangeEvent::Overflow);
            }
            RawEvent::HandleLost { handle, reason } => {
                self.handle_lost(handle, reason, registry, backend, out)
            }
            RawEvent::Created {
                handle,
                name,
                is_dir,
            } => {
                let Some((dir, recursive, scope)) = self.context(registry, handle) else {
                    return;
                };
                let path = dir.join(&name);
                self.settle(&scope, &path, None, registry, backend, out);
                if self.is_ignored(&scope, &path, is_dir) {
                    return;
                }

                if is_dir && recursive {
                    let added = registry.note_new_subdirectory(backend, handle, &name);
                    self.enter_directory(added, registry, backend, &scope, path, out);
                } else {
                    out.push(ChangeEvent::Created(path));
                }
            }
            RawEvent::Modified { handle, name } => {
                let Some((dir, _, scope)) = self.context(registry, handle) else {
                    return;
                };
                let path = dir.join(&name);
                self.settle(&scope, &path, None, registry, backend, out);
                if !self.is_ignored(&scope, &path, false) {
                    out.push(ChangeEvent::Modified(path));
                }
            }
            RawEvent::Removed { handle, name } => {
                let Some((dir, _, scope)) = self.context(registry, handle) else {
                    return;
                };
                let path = dir.join(&name);
                self.settle(&scope, &path, None, registry, backend, out);
                let released = registry.forget_subtree(backend, scope.root, &path);
                if !self.is_ignored(&scope, &path, released > 0) {
                    out.push(ChangeEvent::Removed(path));
                }
            }
            RawEvent::RenameFragment {
                handle,
                name,
                cookie,
                half,
                is_dir,
            } => {
                let Some((dir, _, scope)) = self.context(registry, handle) else {
                    return;
                };
                let path = dir.join(&name);
                self.fragment(
                    PendingFragment {
                        half,
                        path,
                        scope,
                        is_dir,
                        at: now,
                    },
                    cookie,
                    registry,
                    backend,
                    out,
                );
            }
            RawEvent::RenameAtomic { handle, from, to } => {
                let Some((dir, _, scope)) = self.context(registry, handle) else {
                    return;
                };
                let from = dir.join(&from);
                let to = dir.join(&to);
                self.settle(&scope, &from, None, registry, backend, out);
                self.settle(&scope, &to, None, registry, backend, out);
                let is_dir = to.is_dir();
                self.renamed(&scope, from, to, is_dir, registry, backend, out);
            }
        }
    }

    /// Resolve a handle to (directory, recursive, scope)
    fn context(&self, registry: &PathRegistry, handle: HandleId) -> Option<(PathBuf, bool, Scope)> {
        match registry.lookup(handle) {
            Some(resolved) => Some((
                resolved.dir.to_path_buf(),
                resolved.recursive,
                Scope {
                    root: resolved.root,
                    root_path: resolved.root_path.to_path_buf(),
                },
            )),
            None => {
                trace!("Dropping event for released handle {:?}", handle);
                self.metrics.record_unresolved();
                None
            }
        }
    }

    fn is_ignored(&self, scope: &Scope, path: &Path, is_dir: bool) -> bool {
        self.filter
            .as_ref()
            .map(|filter| filter.should_ignore(&scope.root_path, path, is_dir))
            .unwrap_or(false)
    }

    fn fragment(
        &mut self,
        fragment: PendingFragment,
        cookie: u32,
        registry: &mut PathRegistry,
        backend: &mut dyn Backend,
        out: &mut Vec<ChangeEvent>,
    ) {
        let key = (fragment.scope.root, cookie);
        self.settle(&fragment.scope, &fragment.path, Some(key), registry, backend, out);

        match self.pending.remove(&key) {
            Some(partner) if partner.half == fragment.half.opposite() => {
                let (from, to, is_dir) = match fragment.half {
                    RenameHalf::To => (partner.path, fragment.path, fragment.is_dir),
                    RenameHalf::From => (fragment.path, partner.path, partner.is_dir),
                };
                self.metrics.record_rename_paired();
                self.renamed(&fragment.scope, from, to, is_dir, registry, backend, out);
            }
            Some(stale) => {
                // Same half twice under one cookie; the older one lost its partner
                self.expire(stale, registry, backend, out);
                self.pending.insert(key, fragment);
            }
            None => {
                self.pending.insert(key, fragment);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn renamed(
        &mut self,
        scope: &Scope,
        from: PathBuf,
        to: PathBuf,
        is_dir: bool,
        registry: &mut PathRegistry,
        backend: &mut dyn Backend,
        out: &mut Vec<ChangeEvent>,
    ) {
        let from_ignored = self.is_ignored(scope, &from, is_dir);
        let to_ignored = self.is_ignored(scope, &to, is_dir);

        if to_ignored {
            registry.forget_subtree(backend, scope.root, &from);
        } else {
            registry.rename_subtree(backend, scope.root, &from, &to);
        }

        match (from_ignored, to_ignored) {
            (false, false) => out.push(ChangeEvent::Renamed { from, to }),
            (false, true) => out.push(ChangeEvent::Removed(from)),
            (true, false) if is_dir => {
                let added = registry.adopt(backend, scope.root, to.clone());
                self.enter_directory(added, registry, backend, scope, to, out);
            }
            (true, false) => out.push(ChangeEvent::Created(to)),
            (true, true) => {}
        }
    }

    /// Report a new directory, after its handle (if any) was opened
    fn enter_directory(
        &mut self,
        added: Result<Option<HandleId>>,
        registry: &mut PathRegistry,
        backend: &mut dyn Backend,
        scope: &Scope,
        path: PathBuf,
        out: &mut Vec<ChangeEvent>,
    ) {
        match added {
            Ok(Some(_)) => self.metrics.record_subdirectory_added(),
            Ok(None) => {}
            Err(err) => {
                // The subtree is no longer observed
                warn!("Cannot watch new directory {}: {}", path.display(), err);
                out.push(ChangeEvent::Created(path));
                out.push(ChangeEvent::Overflow);
                return;
            }
        }

        out.push(ChangeEvent::Created(path.clone()));

        if self.reconcile_new_directories && registry.contains(scope.root) {
            self.list_new_directory(registry, backend, scope, &path, out);
        }
    }

    /// Report what a new directory already holds, adopting nested directories
    fn list_new_directory(
        &mut self,
        registry: &mut PathRegistry,
        backend: &mut dyn Backend,
        scope: &Scope,
        dir: &Path,
        out: &mut Vec<ChangeEvent>,
    ) {
        let filter = self.filter.as_ref();
        let listed = reconcile::list_tree(dir, |path, is_dir| {
            filter
                .map(|filter| filter.should_ignore(&scope.root_path, path, is_dir))
                .unwrap_or(false)
        });
        if listed.is_empty() {
            return;
        }

        let count = listed.len() as u64;
        for entry in listed {
            if entry.is_dir {
                match registry.adopt(backend, scope.root, entry.path.clone()) {
                    Ok(Some(_)) => self.metrics.record_subdirectory_added(),
                    Ok(None) => {}
                    Err(err) => {
                        warn!("Cannot watch new directory {}: {}", entry.path.display(), err);
                        out.push(ChangeEvent::Overflow);
                    }
                }
            }
            out.push(ChangeEvent::Created(entry.path));
        }

        debug!("Listed {} entries in new directory {}", count, dir.display());
        self.metrics.record_synthesized(count);
    }

    /// Flush a rename half whose partner never came
    fn expire(
        &mut self,
        fragment: PendingFragment,
        registry: &mut PathRegistry,
        backend: &mut dyn Backend,
        out: &mut Vec<ChangeEvent>,
    ) {
        self.metrics.record_rename_unpaired();
        let scope = fragment.scope;

        match fragment.half {
            RenameHalf::From => {
                // Moved out of every watched directory of this root
                let released = registry.forget_subtree(backend, scope.root, &fragment.path);
                if !self.is_ignored(&scope, &fragment.path, fragment.is_dir || released > 0) {
                    out.push(ChangeEvent::Removed(fragment.path));
                }
            }
            RenameHalf::To => {
                if self.is_ignored(&scope, &fragment.path, fragment.is_dir) {
                    return;
                }
                if fragment.is_dir {
                    let added = registry.adopt(backend, scope.root, fragment.path.clone());
                    self.enter_directory(added, registry, backend, &scope, fragment.path, out);
                } else {
                    out.push(ChangeEvent::Created(fragment.path));
                }
            }
        }
    }

    /// Flush rename halves older than the pairing window
    pub fn flush_expired(
        &mut self,
        now: Instant,
        registry: &mut PathRegistry,
        backend: &mut dyn Backend,
        out: &mut Vec<ChangeEvent>,
    ) {
        let window = self.pairing_window;
        self.flush_where(registry, backend, out, |_, fragment| {
            now.saturating_duration_since(fragment.at) >= window
        });
    }

    /// Flush every waiting rename half
    pub fn flush_all(
        &mut self,
        registry: &mut PathRegistry,
        backend: &mut dyn Backend,
        out: &mut Vec<ChangeEvent>,
    ) {
        self.flush_where(registry, backend, out, |_, _| true);
    }

    /// Flush `From` halves still waiting on `path` ahead of a newer event there
    ///
    /// Whatever left `path` is gone before anything new shows up at it, and
    /// its handles must be released before the new entry is looked at.
    fn settle(
        &mut self,
        scope: &Scope,
        path: &Path,
        partner: Option<(WatchId, u32)>,
        registry: &mut PathRegistry,
        backend: &mut dyn Backend,
        out: &mut Vec<ChangeEvent>,
    ) {
        if self.pending.is_empty() {
            return;
        }
        let root = scope.root;
        self.flush_where(registry, backend, out, |key, fragment| {
            Some(*key) != partner
                && fragment.half == RenameHalf::From
                && fragment.scope.root == root
                && fragment.path == path
        });
    }

    fn flush_where(
        &mut self,
        registry: &mut PathRegistry,
        backend: &mut dyn Backend,
        out: &mut Vec<ChangeEvent>,
        due: impl Fn(&(WatchId, u32), &PendingFragment) -> bool,
    ) {
        let mut keys: Vec<(Instant, (WatchId, u32))> = self
            .pending
            .iter()
            .filter(|(key, fragment)| due(key, fragment))
            .map(|(key, fragment)| (fragment.at, *key))
            .collect();
        keys.sort();

        for (_, key) in keys {
            if let Some(fragment) = self.pending.remove(&key) {
                self.expire(fragment, registry, backend, out);
            }
        }
    }

    /// Drop waiting rename halves of an unregistered root
    pub fn discard_root(&mut self, id: WatchId) {
        self.pending.retain(|(root, _), _| *root != id);
    }

    fn handle_lost(
        &mut self,
        handle: HandleId,
        reason: LostReason,
        registry: &mut PathRegistry,
        backend: &mut dyn Backend,
        out: &mut Vec<ChangeEvent>,
    ) {
        let Some(resolved) = registry.lookup(handle) else {
            self.metrics.record_unresolved();
            return;
        };

        // A moved subdirectory is reported by its parent's rename records
        if !resolved.is_root && reason == LostReason::Moved {
            return;
        }

        if let Some(LostEntry::Root { id, path }) = registry.lose_handle(backend, handle) {
            self.metrics.record_root_lost();
            self.discard_root(id);
            out.push(ChangeEvent::Removed(path));
        }
    }
}
