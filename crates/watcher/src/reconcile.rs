//! Listing of newly created directories
//!
//! A directory created inside a recursive watch can receive entries before
//! its own handle exists. Listing it right after the handle is opened
//! recovers those entries; whatever the listing finds is reported as
//! created.

use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// One entry found by `list_tree`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedEntry {
    pub path: PathBuf,
    pub is_dir: bool,
}

/// List everything below `dir`, parents before their children
///
/// `skip` is asked about every entry; skipped directories are not
/// descended into. Entries that vanish while listing are left out.
pub fn list_tree(dir: &Path, mut skip: impl FnMut(&Path, bool) -> bool) -> Vec<ListedEntry> {
    let mut listed = Vec::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !skip(e.path(), e.file_type().is_dir()))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Skipping entry while listing {}: {}", dir.display(), e);
                continue;
            }
        };

        listed.push(ListedEntry {
            is_dir: entry.file_type().is_dir(),
            path: entry.into_path(),
        });
    }

    listed
}
