//! In-memory backend driven by tests
//!
//! Tests push raw events through a `Script` and inspect which directories
//! are open. Nothing touches the kernel.

use super::{Backend, HandleId, RawBatch, RawEvent, WatchHandle};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct ScriptState {
    open: HashMap<HandleId, PathBuf>,
    opened: Vec<PathBuf>,
    closed: Vec<PathBuf>,
    failing: HashMap<PathBuf, io::ErrorKind>,
    next_id: u64,
}

pub(crate) struct ScriptedBackend {
    state: Arc<Mutex<ScriptState>>,
    rx: Receiver<RawBatch>,
}

/// Test-side controls for a `ScriptedBackend`
#[derive(Clone)]
pub(crate) struct Script {
    state: Arc<Mutex<ScriptState>>,
    tx: Sender<RawBatch>,
}

impl ScriptedBackend {
    pub(crate) fn new() -> (Self, Script) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let state = Arc::new(Mutex::new(ScriptState {
            next_id: 1,
            ..Default::default()
        }));
        (
            Self {
                state: state.clone(),
                rx,
            },
            Script { state, tx },
        )
    }
}

impl Script {
    /// Deliver events in one batch
    pub(crate) fn push(&self, events: Vec<RawEvent>) {
        let _ = self.tx.send(RawBatch {
            events,
            malformed: 0,
        });
    }

    /// Deliver a batch with skipped records
    pub(crate) fn push_batch(&self, batch: RawBatch) {
        let _ = self.tx.send(batch);
    }

    /// Make `open` fail for `path`
    pub(crate) fn fail_open(&self, path: impl Into<PathBuf>, kind: io::ErrorKind) {
        self.state.lock().failing.insert(path.into(), kind);
    }

    /// Handle currently open on `path`
    pub(crate) fn handle_for(&self, path: &Path) -> Option<HandleId> {
        let state = self.state.lock();
        let mut ids: Vec<HandleId> = state
            .open
            .iter()
            .filter(|(_, open)| open.as_path() == path)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids.pop()
    }

    pub(crate) fn open_paths(&self) -> HashSet<PathBuf> {
        self.state.lock().open.values().cloned().collect()
    }

    pub(crate) fn open_count(&self) -> usize {
        self.state.lock().open.len()
    }

    pub(crate) fn opened(&self) -> Vec<PathBuf> {
        self.state.lock().opened.clone()
    }

    pub(crate) fn closed(&self) -> Vec<PathBuf> {
        self.state.lock().closed.clone()
    }
}

impl Backend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn open(&mut self, path: &Path) -> io::Result<WatchHandle> {
        let mut state = self.state.lock();
        if let Some(kind) = state.failing.get(path) {
            return Err(io::Error::new(*kind, "scripted open failure"));
        }

        let id = HandleId::from_raw(state.next_id);
        state.next_id += 1;
        state.open.insert(id, path.to_path_buf());
        state.opened.push(path.to_path_buf());
        Ok(WatchHandle::new(id))
    }

    fn close(&mut self, handle: WatchHandle) -> io::Result<()> {
        let mut state = self.state.lock();
        if let Some(path) = state.open.remove(&handle.id()) {
            state.closed.push(path);
        }
        Ok(())
    }

    fn read_events(&mut self, timeout: Duration) -> io::Result<RawBatch> {
        let mut batch = match self.rx.recv_timeout(timeout) {
            Ok(batch) => batch,
            Err(RecvTimeoutError::Timeout) => return Ok(RawBatch::default()),
            Err(RecvTimeoutError::Disconnected) => {
                std::thread::sleep(timeout);
                return Ok(RawBatch::default());
            }
        };

        while let Ok(more) = self.rx.try_recv() {
            batch.events.extend(more.events);
            batch.malformed += more.malformed;
        }
        Ok(batch)
    }
}
