//! Normalized change events
//!
//! `ChangeEvent` is what callers drain from a watcher. Paths are always
//! absolute. `WireEvent` is the flat serialized shape used when events cross
//! a process boundary:
//!
//! ```json
//! {"kind": "renamed", "path": "/w/new.txt", "old_path": "/w/old.txt"}
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A normalized file system change
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChangeEvent {
    /// File or directory created (or moved in from an unwatched location)
    Created(PathBuf),

    /// File contents or metadata changed
    Modified(PathBuf),

    /// File or directory removed (or moved out of the watched tree)
    Removed(PathBuf),

    /// Rename with both halves resolved
    Renamed {
        /// Path before the rename
        from: PathBuf,
        /// Path after the rename
        to: PathBuf,
    },

    /// Events were dropped or merged; the caller's view may be stale
    Overflow,
}

impl ChangeEvent {
    /// Kind of this event
    pub fn kind(&self) -> EventKind {
        match self {
            ChangeEvent::Created(_) => EventKind::Created,
            ChangeEvent::Modified(_) => EventKind::Modified,
            ChangeEvent::Removed(_) => EventKind::Removed,
            ChangeEvent::Renamed { .. } => EventKind::Renamed,
            ChangeEvent::Overflow => EventKind::Overflow,
        }
    }

    /// Primary path of the event
    ///
    /// For renames this is the destination. Overflow markers have no path.
    pub fn path(&self) -> Option<&Path> {
        match self {
            ChangeEvent::Created(path)
            | ChangeEvent::Modified(path)
            | ChangeEvent::Removed(path) => Some(path),
            ChangeEvent::Renamed { to, .. } => Some(to),
            ChangeEvent::Overflow => None,
        }
    }

    /// Whether this event mentions `path` on either side
    pub fn touches(&self, path: &Path) -> bool {
        match self {
            ChangeEvent::Renamed { from, to } => from == path || to == path,
            other => other.path() == Some(path),
        }
    }

    /// Check if this is an overflow marker
    pub fn is_overflow(&self) -> bool {
        matches!(self, ChangeEvent::Overflow)
    }

    /// Serialize to the JSON wire shape
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&WireEvent::from(self))
    }

    /// Parse from the JSON wire shape
    pub fn from_json(json: &str) -> Result<Self, WireError> {
        let wire: WireEvent = serde_json::from_str(json)?;
        ChangeEvent::try_from(wire)
    }
}

/// Type of change, as named on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Created,
    Modified,
    Removed,
    Renamed,
    Overflow,
}

/// Serialized event shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEvent {
    pub kind: EventKind,

    /// Affected path (destination for renames, empty for overflow)
    #[serde(default)]
    pub path: String,

    /// Source path, only present for renames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
}

impl From<&ChangeEvent> for WireEvent {
    fn from(event: &ChangeEvent) -> Self {
        let lossy = |p: &Path| p.to_string_lossy().into_owned();

        match event {
            ChangeEvent::Renamed { from, to } => WireEvent {
                kind: EventKind::Renamed,
                path: lossy(to),
                old_path: Some(lossy(from)),
            },
            ChangeEvent::Overflow => WireEvent {
                kind: EventKind::Overflow,
                path: String::new(),
                old_path: None,
            },
            other => WireEvent {
                kind: other.kind(),
                path: other.path().map(lossy).unwrap_or_default(),
                old_path: None,
            },
        }
    }
}

/// Errors decoding a wire event
#[derive(Error, Debug)]
pub enum WireError {
    #[error("Malformed event JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Event of kind {kind:?} requires a non-empty path")]
    MissingPath { kind: EventKind },

    #[error("Renamed event requires old_path")]
    MissingOldPath,
}

impl TryFrom<WireEvent> for ChangeEvent {
    type Error = WireError;

    fn try_from(wire: WireEvent) -> Result<Self, Self::Error> {
        if wire.kind == EventKind::Overflow {
            return Ok(ChangeEvent::Overflow);
        }

        if wire.path.is_empty() {
            return Err(WireError::MissingPath { kind: wire.kind });
        }
        let path = PathBuf::from(wire.path);

        Ok(match wire.kind {
            EventKind::Created => ChangeEvent::Created(path),
            EventKind::Modified => ChangeEvent::Modified(path),
            EventKind::Removed => ChangeEvent::Removed(path),
            EventKind::Renamed => {
                let from = wire.old_path.ok_or(WireError::MissingOldPath)?;
                ChangeEvent::Renamed {
                    from: PathBuf::from(from),
                    to: path,
                }
            }
            EventKind::Overflow => ChangeEvent::Overflow,
        })
    }
}
