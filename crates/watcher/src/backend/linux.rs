//! Linux inotify backend
//!
//! One inotify instance per backend and one kernel watch per directory.
//! The kernel hands out a single watch descriptor per inode, so two handles
//! on the same directory share it; the kernel watch is removed together
//! with the last handle.

use super::{Backend, HandleId, LostReason, RawBatch, RawEvent, RenameHalf, WatchHandle};
use inotify::{EventMask, Inotify, WatchDescriptor, WatchMask};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, trace};

/// Enough for several hundred records per read
const BUFFER_SIZE: usize = 64 * 1024;

/// inotify-based backend
pub struct InotifyBackend {
    inotify: Inotify,
    buffer: Vec<u8>,
    /// Kernel watch -> handles sharing it
    watches: HashMap<WatchDescriptor, Vec<HandleId>>,
    /// Handle -> kernel watch
    handles: HashMap<HandleId, WatchDescriptor>,
    next_id: u64,
}

/// What a record means for every handle on its watch
#[derive(Clone, Copy)]
enum Change {
    Created,
    Removed,
    Modified,
    Fragment(RenameHalf),
}

impl InotifyBackend {
    /// Initialize a new inotify instance
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            inotify: Inotify::init()?,
            buffer: vec![0u8; BUFFER_SIZE],
            watches: HashMap::new(),
            handles: HashMap::new(),
            next_id: 1,
        })
    }

    /// Number of kernel watches currently held
    pub fn kernel_watch_count(&self) -> usize {
        self.watches.len()
    }

    fn watch_mask() -> WatchMask {
        WatchMask::CREATE
            | WatchMask::DELETE
            | WatchMask::MODIFY
            | WatchMask::ATTRIB
            | WatchMask::MOVED_FROM
            | WatchMask::MOVED_TO
            | WatchMask::DELETE_SELF
            | WatchMask::MOVE_SELF
            | WatchMask::ONLYDIR
            | WatchMask::DONT_FOLLOW
            | WatchMask::EXCL_UNLINK
    }

    /// Wait until the inotify descriptor is readable
    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        let mut pollfd = libc::pollfd {
            fd: self.inotify.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

        // SAFETY: `pollfd` is a valid array of length 1 for the whole call
        let ready = unsafe { libc::poll(&mut pollfd, 1, millis) };
        match ready {
            -1 => {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
            0 => Ok(false),
            _ => Ok(true),
        }
    }

    /// Forget a kernel watch the kernel already released
    fn release(&mut self, wd: &WatchDescriptor) -> Vec<HandleId> {
        let ids = self.watches.remove(wd).unwrap_or_default();
        for id in &ids {
            self.handles.remove(id);
        }
        ids
    }
}

impl Backend for InotifyBackend {
    fn name(&self) -> &'static str {
        "inotify"
    }

    fn open(&mut self, path: &Path) -> io::Result<WatchHandle> {
        let wd = self.inotify.watches().add(path, Self::watch_mask())?;

        let id = HandleId::from_raw(self.next_id);
        self.next_id += 1;

        let sharing = self.watches.entry(wd.clone()).or_default();
        sharing.push(id);
        if sharing.len() > 1 {
            debug!(
                "inotify watch on {} shared by {} handles",
                path.display(),
                sharing.len()
            );
        }
        self.handles.insert(id, wd);

        trace!("inotify open {:?} -> {}", id, path.display());
        Ok(WatchHandle::new(id))
    }

    fn close(&mut self, handle: WatchHandle) -> io::Result<()> {
        let id = handle.id();

        // Already released by an IN_IGNORED record
        let Some(wd) = self.handles.remove(&id) else {
            return Ok(());
        };

        let last = match self.watches.get_mut(&wd) {
            Some(ids) => {
                ids.retain(|other| *other != id);
                ids.is_empty()
            }
            None => false,
        };
        if !last {
            return Ok(());
        }

        self.watches.remove(&wd);
        match self.inotify.watches().remove(wd) {
            Ok(()) => Ok(()),
            // The kernel dropped the watch before we did
            Err(err) if err.raw_os_error() == Some(libc::EINVAL) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn read_events(&mut self, timeout: Duration) -> io::Result<RawBatch> {
        let mut batch = RawBatch::default();

        if !self.wait_readable(timeout)? {
            return Ok(batch);
        }

        let mut records = Vec::new();
        match self.inotify.read_events(&mut self.buffer) {
            Ok(events) => {
                for event in events {
                    records.push((
                        event.wd.clone(),
                        event.mask,
                        event.cookie,
                        event.name.map(|name| name.to_os_string()),
                    ));
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(batch),
            Err(err) => return Err(err),
        }

        for (wd, mask, cookie, name) in records {
            if mask.contains(EventMask::Q_OVERFLOW) {
                batch.events.push(RawEvent::Overflow);
                continue;
            }

            // Records for watches we closed ourselves
            let Some(ids) = self.watches.get(&wd).cloned() else {
                continue;
            };

            if mask.contains(EventMask::IGNORED) {
                for handle in self.release(&wd) {
                    batch.events.push(RawEvent::HandleLost {
                        handle,
                        reason: LostReason::Deleted,
                    });
                }
                continue;
            }

            if mask.contains(EventMask::MOVE_SELF) {
                for handle in ids {
                    batch.events.push(RawEvent::HandleLost {
                        handle,
                        reason: LostReason::Moved,
                    });
                }
                continue;
            }

            // IN_IGNORED follows
            if mask.contains(EventMask::DELETE_SELF) {
                continue;
            }

            let Some(name) = name else {
                batch.malformed += 1;
                continue;
            };

            let change = if mask.contains(EventMask::CREATE) {
                Change::Created
            } else if mask.contains(EventMask::DELETE) {
                Change::Removed
            } else if mask.contains(EventMask::MOVED_FROM) {
                Change::Fragment(RenameHalf::From)
            } else if mask.contains(EventMask::MOVED_TO) {
                Change::Fragment(RenameHalf::To)
            } else if mask.intersects(EventMask::MODIFY | EventMask::ATTRIB) {
                Change::Modified
            } else {
                batch.malformed += 1;
                continue;
            };
            let is_dir = mask.contains(EventMask::ISDIR);

            for handle in ids {
                let name = name.clone();
                batch.events.push(match change {
                    Change::Created => RawEvent::Created {
                        handle,
                        name,
                        is_dir,
                    },
                    Change::Removed => RawEvent::Removed { handle, name },
                    Change::Modified => RawEvent::Modified { handle, name },
                    Change::Fragment(half) => RawEvent::RenameFragment {
                        handle,
                        name,
                        cookie,
                        half,
                        is_dir,
                    },
                });
            }
        }

        Ok(batch)
    }
}
