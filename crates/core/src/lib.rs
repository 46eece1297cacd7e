//! Shared data model for treewatch
//!
//! This crate provides:
//! - Normalized change events and their serialized wire shape
//! - Watch identifiers handed out by the registry
//! - Watcher configuration (TOML loadable, validated)

pub mod config;
pub mod event;
pub mod id;

// Re-exports
pub use config::{BackendKind, ConfigError, IgnoreConfig, WatcherConfig};
pub use event::{ChangeEvent, EventKind, WireError, WireEvent};
pub use id::WatchId;
