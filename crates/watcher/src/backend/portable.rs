//! Portable backend on top of notify-rs
//!
//! Each handle is a non-recursive notify watch on one directory. notify
//! delivers events from its own thread; they are forwarded over a crossbeam
//! channel and translated into raw events on the reading thread.
//!
//! Rename reporting differs per platform:
//! - inotify: `From`/`To` halves carrying a tracker id, plus a `Both` record
//! - ReadDirectoryChangesW: adjacent `From`/`To` halves without a tracker
//! - FSEvents: one ambiguous record per side
//!
//! Tracked halves become rename fragments keyed by the tracker. Untracked
//! halves get a synthetic cookie so the normalizer can still pair them.
//! Ambiguous records are resolved by checking whether the path exists.

use super::{Backend, HandleId, LostReason, RawBatch, RawEvent, RenameHalf, WatchHandle};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{trace, warn};

/// Synthetic cookies live above any tracker id notify hands out in practice
const SYNTHETIC_COOKIE_BASE: u32 = 0x8000_0000;

/// notify-rs based backend
pub struct NotifyBackend {
    watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    /// Watched directory -> handles on it
    dirs: HashMap<PathBuf, Vec<HandleId>>,
    /// Handle -> watched directory
    handles: HashMap<HandleId, PathBuf>,
    next_id: u64,
    next_synthetic_cookie: u32,
    /// Cookie of an untracked `From` waiting for the next untracked `To`
    untracked_from: Option<u32>,
}

impl NotifyBackend {
    /// Create the platform's recommended notify watcher
    pub fn new() -> io::Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // Receiver gone means the backend was dropped
            let _ = tx.send(res);
        })
        .map_err(into_io_error)?;

        Ok(Self {
            watcher,
            rx,
            dirs: HashMap::new(),
            handles: HashMap::new(),
            next_id: 1,
            next_synthetic_cookie: SYNTHETIC_COOKIE_BASE,
            untracked_from: None,
        })
    }

    fn synthetic_cookie(&mut self) -> u32 {
        let cookie = self.next_synthetic_cookie;
        self.next_synthetic_cookie = self
            .next_synthetic_cookie
            .wrapping_add(1)
            .max(SYNTHETIC_COOKIE_BASE);
        cookie
    }

    /// Push one raw event per handle watching `path`'s parent
    fn emit_child(
        &self,
        path: &Path,
        batch: &mut RawBatch,
        make: impl Fn(HandleId, OsString) -> RawEvent,
    ) {
        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            batch.malformed += 1;
            return;
        };

        if let Some(ids) = self.dirs.get(parent) {
            for id in ids {
                batch.events.push(make(*id, name.to_os_string()));
            }
        }
    }

    fn translate(&mut self, result: notify::Result<Event>, batch: &mut RawBatch) {
        let event = match result {
            Ok(event) => event,
            Err(err) => {
                warn!("notify reported an error: {}", err);
                batch.malformed += 1;
                return;
            }
        };

        if event.need_rescan() {
            batch.events.push(RawEvent::Overflow);
            return;
        }

        trace!("notify event {:?} {:?}", event.kind, event.paths);

        match event.kind {
            EventKind::Create(kind) => {
                for path in &event.paths {
                    let is_dir = matches!(kind, CreateKind::Folder) || path.is_dir();
                    self.emit_child(path, batch, |handle, name| RawEvent::Created {
                        handle,
                        name,
                        is_dir,
                    });
                }
            }
            EventKind::Remove(kind) => {
                for path in &event.paths {
                    if !matches!(kind, RemoveKind::File) {
                        if let Some(ids) = self.dirs.get(path) {
                            for handle in ids {
                                batch.events.push(RawEvent::HandleLost {
                                    handle: *handle,
                                    reason: LostReason::Deleted,
                                });
                            }
                        }
                    }
                    self.emit_child(path, batch, |handle, name| RawEvent::Removed {
                        handle,
                        name,
                    });
                }
            }
            EventKind::Modify(ModifyKind::Name(mode)) => self.translate_rename(mode, &event, batch),
            EventKind::Modify(_) => {
                for path in &event.paths {
                    self.emit_child(path, batch, |handle, name| RawEvent::Modified {
                        handle,
                        name,
                    });
                }
            }
            EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
        }
    }

    fn translate_rename(&mut self, mode: RenameMode, event: &Event, batch: &mut RawBatch) {
        match mode {
            RenameMode::From | RenameMode::To => {
                let half = if mode == RenameMode::From {
                    RenameHalf::From
                } else {
                    RenameHalf::To
                };

                let cookie = match (event.tracker(), half) {
                    (Some(tracker), _) => tracker as u32,
                    (None, RenameHalf::From) => {
                        let cookie = self.synthetic_cookie();
                        self.untracked_from = Some(cookie);
                        cookie
                    }
                    (None, RenameHalf::To) => match self.untracked_from.take() {
                        Some(cookie) => cookie,
                        None => self.synthetic_cookie(),
                    },
                };

                for path in &event.paths {
                    let is_dir = half == RenameHalf::To && path.is_dir();
                    self.emit_child(path, batch, |handle, name| RawEvent::RenameFragment {
                        handle,
                        name,
                        cookie,
                        half,
                        is_dir,
                    });
                }
            }
            RenameMode::Both => {
                // Tracked halves were already reported individually
                if event.tracker().is_some() || event.paths.len() != 2 {
                    return;
                }

                let (from, to) = (&event.paths[0], &event.paths[1]);
                let same_parent = from.parent().is_some() && from.parent() == to.parent();
                let to_name = to.file_name().map(|n| n.to_os_string());

                match (same_parent, to_name) {
                    (true, Some(to_name)) => {
                        self.emit_child(from, batch, |handle, name| RawEvent::RenameAtomic {
                            handle,
                            from: name,
                            to: to_name.clone(),
                        });
                    }
                    _ => {
                        let is_dir = to.is_dir();
                        self.emit_child(from, batch, |handle, name| RawEvent::Removed {
                            handle,
                            name,
                        });
                        self.emit_child(to, batch, |handle, name| RawEvent::Created {
                            handle,
                            name,
                            is_dir,
                        });
                    }
                }
            }
            RenameMode::Any | RenameMode::Other => {
                for path in &event.paths {
                    if path.exists() {
                        let is_dir = path.is_dir();
                        self.emit_child(path, batch, |handle, name| RawEvent::Created {
                            handle,
                            name,
                            is_dir,
                        });
                    } else {
                        self.emit_child(path, batch, |handle, name| RawEvent::Removed {
                            handle,
                            name,
                        });
                    }
                }
            }
        }
    }
}

impl Backend for NotifyBackend {
    fn name(&self) -> &'static str {
        "notify"
    }

    fn open(&mut self, path: &Path) -> io::Result<WatchHandle> {
        if !path.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a directory: {}", path.display()),
            ));
        }

        let path = path.to_path_buf();
        if !self.dirs.contains_key(&path) {
            self.watcher
                .watch(&path, RecursiveMode::NonRecursive)
                .map_err(into_io_error)?;
        }

        let id = HandleId::from_raw(self.next_id);
        self.next_id += 1;
        self.dirs.entry(path.clone()).or_default().push(id);
        self.handles.insert(id, path);

        Ok(WatchHandle::new(id))
    }

    fn close(&mut self, handle: WatchHandle) -> io::Result<()> {
        let id = handle.id();
        let Some(path) = self.handles.remove(&id) else {
            return Ok(());
        };

        let last = match self.dirs.get_mut(&path) {
            Some(ids) => {
                ids.retain(|other| *other != id);
                ids.is_empty()
            }
            None => false,
        };
        if !last {
            return Ok(());
        }

        self.dirs.remove(&path);
        match self.watcher.unwatch(&path) {
            Ok(()) => Ok(()),
            // notify drops watches of deleted directories on its own
            Err(err) if matches!(err.kind, notify::ErrorKind::WatchNotFound) => Ok(()),
            Err(err) => Err(into_io_error(err)),
        }
    }

    fn read_events(&mut self, timeout: Duration) -> io::Result<RawBatch> {
        let mut batch = RawBatch::default();

        let first = match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => return Ok(batch),
            Err(RecvTimeoutError::Disconnected) => {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "notify event channel closed",
                ))
            }
        };
        self.translate(first, &mut batch);

        while let Ok(result) = self.rx.try_recv() {
            self.translate(result, &mut batch);
        }

        Ok(batch)
    }
}

/// Convert a notify error into the I/O error the backend contract uses
fn into_io_error(err: notify::Error) -> io::Error {
    match err.kind {
        notify::ErrorKind::Io(err) => err,
        notify::ErrorKind::PathNotFound => {
            io::Error::new(io::ErrorKind::NotFound, "watch path not found")
        }
        notify::ErrorKind::WatchNotFound => {
            io::Error::new(io::ErrorKind::NotFound, "watch not found")
        }
        notify::ErrorKind::MaxFilesWatch => io::Error::new(
            io::ErrorKind::Other,
            "operating system watch limit reached",
        ),
        notify::ErrorKind::Generic(message) => io::Error::new(io::ErrorKind::Other, message),
        notify::ErrorKind::InvalidConfig(config) => io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid notify config: {:?}", config),
        ),
    }
}
