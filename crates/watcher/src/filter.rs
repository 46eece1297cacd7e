//! Event filtering
//!
//! Two sources of rules:
//! 1. Gitignore-style patterns from the configuration
//! 2. Editor temp files and OS metadata files (optional)
//!
//! Patterns are matched against the path relative to the watch root that
//! produced the event, so `target/` ignores `<root>/target` and everything
//! below it.

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::Path;
use treewatch_core::IgnoreConfig;

/// Compiled ignore rules
#[derive(Debug)]
pub struct EventFilter {
    patterns: Option<Gitignore>,
    editor_temp_files: bool,
}

impl EventFilter {
    /// Compile the configured rules
    pub fn new(config: &IgnoreConfig) -> Result<Self, ignore::Error> {
        let patterns = if config.patterns.is_empty() {
            None
        } else {
            let mut builder = GitignoreBuilder::new("/");
            for pattern in &config.patterns {
                builder.add_line(None, pattern)?;
            }
            Some(builder.build()?)
        };

        Ok(Self {
            patterns,
            editor_temp_files: config.editor_temp_files,
        })
    }

    /// Build a filter only if the configuration asks for one
    pub fn from_config(config: &IgnoreConfig) -> Result<Option<Self>, ignore::Error> {
        if config.is_active() {
            Self::new(config).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Check whether events for `path` (absolute, under `root`) are dropped
    pub fn should_ignore(&self, root: &Path, path: &Path, is_dir: bool) -> bool {
        let Ok(relative) = path.strip_prefix(root) else {
            return false;
        };
        if relative.as_os_str().is_empty() {
            return false;
        }

        if self.editor_temp_files && matches_editor_temp(relative) {
            return true;
        }

        let Some(ref patterns) = self.patterns else {
            return false;
        };

        // An ignored directory ignores everything below it
        let mut current = Some(relative);
        let mut leaf = true;
        while let Some(candidate) = current {
            if candidate.as_os_str().is_empty() {
                break;
            }
            let candidate_is_dir = if leaf { is_dir } else { true };
            if patterns.matched(candidate, candidate_is_dir).is_ignore() {
                return true;
            }
            current = candidate.parent();
            leaf = false;
        }

        false
    }
}

/// Editor swap, backup and lock files, plus OS metadata files
fn matches_editor_temp(path: &Path) -> bool {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("");

    // Vim swap files
    if filename.ends_with(".swp")
        || filename.ends_with(".swo")
        || filename.ends_with(".swx")
        || filename == "4913"
    {
        return true;
    }

    // Backup files
    if filename.ends_with('~') {
        return true;
    }

    // Emacs auto-save and lock files
    if (filename.starts_with('#') && filename.ends_with('#')) || filename.starts_with(".#") {
        return true;
    }

    // MacOS and Windows metadata
    filename == ".DS_Store"
        || filename.starts_with("._")
        || filename == "Thumbs.db"
        || filename == "desktop.ini"
}
