//! Directory tree watching for treewatch
//!
//! This crate turns the kernel's per-directory change notifications into
//! one normalized event stream:
//! - Recursive watches with automatic adoption of new subdirectories
//! - Rename pairing across split kernel records
//! - Bounded coalescing queue with in-band overflow reporting
//! - One background thread per watcher; callers drain on their own thread
//!
//! ```no_run
//! use std::time::Duration;
//! use treewatch::{Watcher, WatcherConfig};
//!
//! # fn main() -> treewatch::Result<()> {
//! let watcher = Watcher::new(WatcherConfig::default())?;
//! watcher.register("/srv/data", true)?;
//! watcher.start()?;
//!
//! while let Some(event) = watcher.drain(true, Some(Duration::from_secs(1))) {
//!     println!("{:?}", event);
//! }
//! watcher.stop();
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod normalize;
pub mod queue;
pub mod reconcile;
pub mod registry;
mod worker;

pub use backend::{create_backend, Backend};
pub use error::{Result, WatchError};
pub use metrics::{MetricsSnapshot, WatcherMetrics};
pub use queue::{EventQueue, QueueStats};
pub use registry::WatchInfo;
pub use treewatch_core::{
    BackendKind, ChangeEvent, EventKind, IgnoreConfig, WatchId, WatcherConfig, WireEvent,
};

use crossbeam_channel::Sender;
use normalize::Normalizer;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};
use worker::{Command, Core};

/// Combined counters of a watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WatcherStats {
    pub metrics: MetricsSnapshot,
    pub queue: QueueStats,
}

enum State {
    /// Caller's thread drives the core directly
    Idle(Box<Core>),

    /// Background thread owns the core
    Running {
        commands: Sender<Command>,
        stop: Arc<AtomicBool>,
        thread: JoinHandle<Box<Core>>,
    },

    /// The background thread died or could not be spawned
    Failed,
}

/// File system watcher
///
/// All methods take `&self`; a watcher can be shared across threads so one
/// thread drains while another registers paths.
pub struct Watcher {
    config: WatcherConfig,
    queue: Arc<EventQueue>,
    metrics: Arc<WatcherMetrics>,
    state: Mutex<State>,
}

/// Create a watcher using the backend selected by `config`
pub fn create_watcher(config: WatcherConfig) -> Result<Watcher> {
    Watcher::new(config)
}

impl Watcher {
    /// Create a stopped watcher using the backend selected by `config`
    pub fn new(config: WatcherConfig) -> Result<Self> {
        config.validate()?;
        let backend = create_backend(config.backend)
            .map_err(|source| WatchError::Backend { path: None, source })?;
        Self::with_backend(config, backend)
    }

    /// Create a stopped watcher on a caller-supplied backend
    pub fn with_backend(config: WatcherConfig, backend: Box<dyn Backend>) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(WatcherMetrics::new());
        let normalizer = Normalizer::new(&config, metrics.clone())?;
        let core = Core::new(backend, normalizer, metrics.clone());
        let queue = Arc::new(EventQueue::new(config.queue_capacity));
        // Nothing produces events until `start`
        queue.close();

        Ok(Self {
            config,
            queue,
            metrics,
            state: Mutex::new(State::Idle(Box::new(core))),
        })
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Watch a directory, optionally with all of its subdirectories
    ///
    /// Returns once every existing subdirectory of a recursive watch has a
    /// handle.
    pub fn register(&self, path: impl AsRef<Path>, recursive: bool) -> Result<WatchId> {
        let path = path.as_ref().to_path_buf();
        let mut state = self.state.lock();

        match &mut *state {
            State::Idle(core) => core.register(path, recursive),
            State::Running { commands, .. } => {
                let (reply, result) = crossbeam_channel::bounded(1);
                commands
                    .send(Command::Register {
                        path,
                        recursive,
                        reply,
                    })
                    .map_err(|_| WatchError::Disconnected)?;
                result.recv().map_err(|_| WatchError::Disconnected)?
            }
            State::Failed => Err(WatchError::Disconnected),
        }
    }

    /// Stop watching a root
    ///
    /// Once this returns, no further events for the root are produced.
    pub fn unregister(&self, id: WatchId) -> Result<()> {
        let mut state = self.state.lock();

        match &mut *state {
            State::Idle(core) => core.unregister(id),
            State::Running { commands, .. } => {
                let (reply, result) = crossbeam_channel::bounded(1);
                commands
                    .send(Command::Unregister { id, reply })
                    .map_err(|_| WatchError::Disconnected)?;
                result.recv().map_err(|_| WatchError::Disconnected)?
            }
            State::Failed => Err(WatchError::Disconnected),
        }
    }

    /// Snapshot of the registered roots
    pub fn roots(&self) -> Vec<WatchInfo> {
        let state = self.state.lock();

        match &*state {
            State::Idle(core) => core.roots(),
            State::Running { commands, .. } => {
                let (reply, result) = crossbeam_channel::bounded(1);
                if commands.send(Command::Roots { reply }).is_err() {
                    return Vec::new();
                }
                result.recv().unwrap_or_default()
            }
            State::Failed => Vec::new(),
        }
    }

    /// Take the oldest pending event
    ///
    /// With `block`, waits up to `timeout` (or indefinitely for `None`)
    /// while the watcher runs. A stopped watcher never blocks once its
    /// queue is empty.
    pub fn drain(&self, block: bool, timeout: Option<Duration>) -> Option<ChangeEvent> {
        if block {
            self.queue.pop_blocking(timeout)
        } else {
            self.queue.pop()
        }
    }

    /// Take every pending event without waiting
    pub fn drain_all(&self) -> Vec<ChangeEvent> {
        self.queue.drain_all()
    }

    /// Spawn the background thread
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();

        let core = match std::mem::replace(&mut *state, State::Failed) {
            State::Idle(core) => core,
            running @ State::Running { .. } => {
                *state = running;
                return Err(WatchError::AlreadyRunning);
            }
            State::Failed => return Err(WatchError::Disconnected),
        };

        self.queue.reopen();
        let (commands, receiver) = crossbeam_channel::unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let poll_interval = self.config.poll_interval();

        let spawned = thread::Builder::new().name("treewatch".to_string()).spawn({
            let stop = stop.clone();
            let queue = self.queue.clone();
            move || worker::run(core, receiver, stop, queue, poll_interval)
        });

        match spawned {
            Ok(thread) => {
                *state = State::Running {
                    commands,
                    stop,
                    thread,
                };
                info!("Watcher started");
                Ok(())
            }
            Err(err) => {
                self.queue.close();
                Err(WatchError::Thread(err))
            }
        }
    }

    /// Stop the background thread and release every handle
    ///
    /// Waiting rename halves are flushed into the queue first, so events
    /// can still be drained afterwards. Calling `stop` again does nothing.
    pub fn stop(&self) {
        let mut state = self.state.lock();

        let mut core = match std::mem::replace(&mut *state, State::Failed) {
            State::Idle(core) => core,
            State::Running {
                commands,
                stop,
                thread,
            } => {
                stop.store(true, Ordering::Release);
                drop(commands);
                match thread.join() {
                    Ok(core) => core,
                    Err(_) => {
                        warn!("Watcher thread panicked; handles were not closed");
                        self.queue.close();
                        return;
                    }
                }
            }
            State::Failed => {
                self.queue.close();
                return;
            }
        };

        let was_watching = !core.roots().is_empty();
        core.shutdown(&self.queue);
        *state = State::Idle(core);
        self.queue.close();

        if was_watching {
            info!("Watcher stopped");
        }
    }

    /// Whether the background thread is running
    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock(), State::Running { .. })
    }

    pub fn stats(&self) -> WatcherStats {
        WatcherStats {
            metrics: self.metrics.snapshot(),
            queue: self.queue.stats(),
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.stop();
    }
}
