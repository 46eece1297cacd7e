//! Error types for watcher operations

use std::path::PathBuf;
use thiserror::Error;
use treewatch_core::{ConfigError, WatchId};

/// Errors returned by registry and facade operations
///
/// Queue overflow is not an error; it is reported in-band as
/// `ChangeEvent::Overflow`.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Path not found or not a directory: {path}")]
    PathNotFound { path: PathBuf },

    #[error("Path is already watched: {path}")]
    AlreadyWatched { path: PathBuf },

    #[error("No watch registered with id {id}")]
    NotFound { id: WatchId },

    #[error("Backend failure{}: {source}", fmt_path(.path))]
    Backend {
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },

    #[error("Watcher is already running")]
    AlreadyRunning,

    #[error("Watcher thread is gone")]
    Disconnected,

    #[error("Failed to spawn watcher thread: {0}")]
    Thread(#[source] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl WatchError {
    /// Wrap a backend I/O error for the given path
    pub fn backend(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        WatchError::Backend {
            path: Some(path.into()),
            source,
        }
    }

    /// OS error code of a backend failure (e.g. ENOSPC for inotify limits)
    pub fn os_code(&self) -> Option<i32> {
        match self {
            WatchError::Backend { source, .. } | WatchError::Thread(source) => {
                source.raw_os_error()
            }
            _ => None,
        }
    }
}

fn fmt_path(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!(" for {}", path.display()),
        None => String::new(),
    }
}

/// Result type for watcher operations
pub type Result<T> = std::result::Result<T, WatchError>;
