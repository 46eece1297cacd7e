//! Common utilities for integration tests

pub mod fixtures;

pub use fixtures::TestTree;

use std::sync::Once;
use std::time::{Duration, Instant};
use treewatch::{ChangeEvent, Watcher, WatcherConfig};

static INIT: Once = Once::new();

/// Route library logs to the test harness output (RUST_LOG controls level)
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Watcher config tuned for fast tests
pub fn test_config() -> WatcherConfig {
    WatcherConfig {
        poll_interval_ms: 10,
        rename_pairing_window_ms: 200,
        ..Default::default()
    }
}

/// Drain until `done` holds for the collected events or `timeout` passes
pub fn collect_until(
    watcher: &Watcher,
    timeout: Duration,
    mut done: impl FnMut(&[ChangeEvent]) -> bool,
) -> Vec<ChangeEvent> {
    let deadline = Instant::now() + timeout;
    let mut events = Vec::new();

    while !done(&events) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        if let Some(event) = watcher.drain(true, Some(deadline - now)) {
            events.push(event);
        }
    }

    events
}

/// Drain everything that arrives within `window`
pub fn collect_for(watcher: &Watcher, window: Duration) -> Vec<ChangeEvent> {
    collect_until(watcher, window, |_| false)
}
