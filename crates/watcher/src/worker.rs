//! Background thread
//!
//! While running, the thread owns the backend, the registry and the
//! normalizer. Callers reach them through `Command`s; every backend call
//! therefore happens on this one thread and a handle is never closed while
//! a read is in flight.

use crate::backend::Backend;
use crate::error::Result;
use crate::metrics::WatcherMetrics;
use crate::normalize::Normalizer;
use crate::queue::EventQueue;
use crate::registry::{PathRegistry, WatchInfo};
use crossbeam_channel::{Receiver, Sender};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use treewatch_core::{ChangeEvent, WatchId};

/// Requests executed by the background thread
pub(crate) enum Command {
    Register {
        path: PathBuf,
        recursive: bool,
        reply: Sender<Result<WatchId>>,
    },
    Unregister {
        id: WatchId,
        reply: Sender<Result<()>>,
    },
    Roots {
        reply: Sender<Vec<WatchInfo>>,
    },
}

/// Everything that touches the backend
pub(crate) struct Core {
    backend: Box<dyn Backend>,
    registry: PathRegistry,
    normalizer: Normalizer,
    metrics: Arc<WatcherMetrics>,
}

impl Core {
    pub(crate) fn new(
        backend: Box<dyn Backend>,
        normalizer: Normalizer,
        metrics: Arc<WatcherMetrics>,
    ) -> Self {
        Self {
            backend,
            registry: PathRegistry::new(),
            normalizer,
            metrics,
        }
    }

    pub(crate) fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub(crate) fn register(&mut self, path: PathBuf, recursive: bool) -> Result<WatchId> {
        self.registry.register_filtered(
            self.backend.as_mut(),
            &path,
            recursive,
            self.normalizer.filter(),
        )
    }

    pub(crate) fn unregister(&mut self, id: WatchId) -> Result<()> {
        self.registry.unregister(self.backend.as_mut(), id)?;
        self.normalizer.discard_root(id);
        Ok(())
    }

    pub(crate) fn roots(&self) -> Vec<WatchInfo> {
        self.registry.roots()
    }

    fn execute(&mut self, command: Command) {
        // A caller that gave up waiting is not an error
        match command {
            Command::Register {
                path,
                recursive,
                reply,
            } => {
                let _ = reply.send(self.register(path, recursive));
            }
            Command::Unregister { id, reply } => {
                let _ = reply.send(self.unregister(id));
            }
            Command::Roots { reply } => {
                let _ = reply.send(self.roots());
            }
        }
    }

    /// One read-normalize-enqueue cycle
    fn pump(&mut self, timeout: Duration, queue: &EventQueue) {
        let batch = match self.backend.read_events(timeout) {
            Ok(batch) => batch,
            Err(err) => {
                warn!("Failed to read {} events: {}", self.backend.name(), err);
                self.metrics.record_read_error();
                thread::sleep(timeout);
                return;
            }
        };

        if batch.malformed > 0 {
            debug!("Skipped {} malformed backend records", batch.malformed);
            self.metrics.record_malformed(batch.malformed);
        }

        let now = Instant::now();
        let mut out = Vec::new();
        self.normalizer.process_batch(
            batch.events,
            &mut self.registry,
            self.backend.as_mut(),
            now,
            &mut out,
        );
        self.normalizer
            .flush_expired(now, &mut self.registry, self.backend.as_mut(), &mut out);

        self.enqueue(out, queue);
    }

    fn enqueue(&self, events: Vec<ChangeEvent>, queue: &EventQueue) {
        if events.is_empty() {
            return;
        }
        self.metrics.record_emitted(events.len() as u64);
        queue.push_all(events);
    }

    /// Flush waiting rename halves, then release every handle
    pub(crate) fn shutdown(&mut self, queue: &EventQueue) {
        let mut out = Vec::new();
        self.normalizer
            .flush_all(&mut self.registry, self.backend.as_mut(), &mut out);
        self.enqueue(out, queue);

        let handles = self.registry.handle_count();
        self.registry.close_all(self.backend.as_mut());
        if handles > 0 {
            debug!("Closed {} handles", handles);
        }
    }
}

/// Thread body: runs until `stop` is set, then hands the core back
pub(crate) fn run(
    mut core: Box<Core>,
    commands: Receiver<Command>,
    stop: Arc<AtomicBool>,
    queue: Arc<EventQueue>,
    poll_interval: Duration,
) -> Box<Core> {
    info!(
        "Watcher thread started ({} backend, {} roots)",
        core.backend_name(),
        core.registry.len()
    );

    while !stop.load(Ordering::Acquire) {
        while let Ok(command) = commands.try_recv() {
            core.execute(command);
        }
        core.pump(poll_interval, &queue);
    }

    while let Ok(command) = commands.try_recv() {
        core.execute(command);
    }

    info!("Watcher thread stopping");
    core
}
