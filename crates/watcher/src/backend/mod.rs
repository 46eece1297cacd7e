//! Platform notification backends
//!
//! Provides a unified interface (`Backend` trait) over the kernel facilities:
//! inotify on Linux, and notify-rs everywhere else (FSEvents, kqueue,
//! ReadDirectoryChangesW). Every backend reports changes for the direct
//! children of a watched directory only; recursion is the registry's job.

#[cfg(target_os = "linux")]
pub mod linux;

pub mod portable;

#[cfg(test)]
pub(crate) mod scripted;

use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::time::Duration;
use treewatch_core::BackendKind;

#[cfg(target_os = "linux")]
pub use linux::InotifyBackend;

pub use portable::NotifyBackend;

/// Identifier of one open backend subscription, carried by raw events
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct HandleId(u64);

impl HandleId {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

/// An open subscription on a single directory
///
/// Handles are minted by a backend's `open` and released by passing them
/// back to `close`, which consumes them. There is no `Clone`: whoever holds
/// the handle is the only party that can close it.
#[derive(Debug, PartialEq, Eq)]
pub struct WatchHandle {
    id: HandleId,
}

impl WatchHandle {
    /// Mint a handle; only backends should call this
    pub fn new(id: HandleId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }
}

/// Which half of a split rename a fragment carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenameHalf {
    From,
    To,
}

impl RenameHalf {
    pub fn opposite(self) -> Self {
        match self {
            RenameHalf::From => RenameHalf::To,
            RenameHalf::To => RenameHalf::From,
        }
    }
}

/// Why a backend stopped delivering events for a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LostReason {
    /// The watched directory was deleted; the kernel released the watch
    Deleted,

    /// The watched directory itself was moved
    Moved,
}

/// A backend event, before path resolution
///
/// Names are raw bytes relative to the directory of `handle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    Created {
        handle: HandleId,
        name: OsString,
        is_dir: bool,
    },
    Modified {
        handle: HandleId,
        name: OsString,
    },
    Removed {
        handle: HandleId,
        name: OsString,
    },
    /// One half of a rename reported as two records sharing a cookie
    RenameFragment {
        handle: HandleId,
        name: OsString,
        cookie: u32,
        half: RenameHalf,
        is_dir: bool,
    },
    /// Rename reported as a single record with both names
    RenameAtomic {
        handle: HandleId,
        from: OsString,
        to: OsString,
    },
    /// The subscription itself is gone
    HandleLost { handle: HandleId, reason: LostReason },
    /// The kernel (or backend) queue dropped events
    Overflow,
}

impl RawEvent {
    /// Handle the event belongs to, if any
    pub fn handle(&self) -> Option<HandleId> {
        match self {
            RawEvent::Created { handle, .. }
            | RawEvent::Modified { handle, .. }
            | RawEvent::Removed { handle, .. }
            | RawEvent::RenameFragment { handle, .. }
            | RawEvent::RenameAtomic { handle, .. }
            | RawEvent::HandleLost { handle, .. } => Some(*handle),
            RawEvent::Overflow => None,
        }
    }
}

/// Result of one backend read
#[derive(Debug, Default)]
pub struct RawBatch {
    pub events: Vec<RawEvent>,

    /// Records that could not be translated and were skipped
    pub malformed: u64,
}

impl RawBatch {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.malformed == 0
    }
}

/// Platform-agnostic notification backend
///
/// All methods are called from one thread at a time: the caller's thread
/// while the watcher is stopped, the background thread while it runs.
pub trait Backend: Send {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Subscribe to changes of the direct children of `path`
    fn open(&mut self, path: &Path) -> io::Result<WatchHandle>;

    /// Release a subscription
    ///
    /// Closing a handle whose watch the kernel already dropped succeeds.
    fn close(&mut self, handle: WatchHandle) -> io::Result<()>;

    /// Wait up to `timeout` for events
    ///
    /// Returns an empty batch when the timeout elapses. Backend-side event
    /// loss must be surfaced as `RawEvent::Overflow`.
    fn read_events(&mut self, timeout: Duration) -> io::Result<RawBatch>;
}

/// Create the backend selected by `kind`
pub fn create_backend(kind: BackendKind) -> io::Result<Box<dyn Backend>> {
    match kind {
        BackendKind::Auto => create_platform_backend(),
        BackendKind::Inotify => create_inotify_backend(),
        BackendKind::Portable => Ok(Box::new(NotifyBackend::new()?)),
    }
}

/// Create the preferred backend for the current platform
#[cfg(target_os = "linux")]
pub fn create_platform_backend() -> io::Result<Box<dyn Backend>> {
    create_inotify_backend()
}

#[cfg(not(target_os = "linux"))]
pub fn create_platform_backend() -> io::Result<Box<dyn Backend>> {
    Ok(Box::new(NotifyBackend::new()?))
}

#[cfg(target_os = "linux")]
fn create_inotify_backend() -> io::Result<Box<dyn Backend>> {
    Ok(Box::new(InotifyBackend::new()?))
}

#[cfg(not(target_os = "linux"))]
fn create_inotify_backend() -> io::Result<Box<dyn Backend>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "inotify backend is only available on Linux",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rename_half_opposite() {
        assert_eq!(RenameHalf::From.opposite(), RenameHalf::To);
        assert_eq!(RenameHalf::To.opposite(), RenameHalf::From);
    }

    #[test]
    fn test_raw_event_handle() {
        let handle = HandleId::from_raw(4);
        let event = RawEvent::Removed {
            handle,
            name: OsString::from("a"),
        };
        assert_eq!(event.handle(), Some(handle));
        assert_eq!(RawEvent::Overflow.handle(), None);
    }

    #[test]
    fn test_create_platform_backend() {
        let backend = create_backend(BackendKind::Auto).unwrap();
        #[cfg(target_os = "linux")]
        assert_eq!(backend.name(), "inotify");
        #[cfg(not(target_os = "linux"))]
        assert_eq!(backend.name(), "notify");
    }
}
