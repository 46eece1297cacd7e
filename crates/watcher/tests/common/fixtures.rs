//! Temporary directory trees

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary directory with a canonical root path
///
/// Kernel backends report canonical paths, so assertions compare against
/// `root` rather than the raw temp dir path.
pub struct TestTree {
    _temp_dir: TempDir,
    pub root: PathBuf,
}

impl TestTree {
    pub fn new() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().canonicalize()?;
        Ok(Self {
            _temp_dir: temp_dir,
            root,
        })
    }

    /// Create a tree with a few nested directories and files
    pub fn nested() -> Result<Self> {
        let tree = Self::new()?;
        tree.mkdir("src/bin")?;
        tree.mkdir("docs")?;
        tree.write("src/lib.rs", "pub fn lib() {}\n")?;
        tree.write("README.md", "# tree\n")?;
        Ok(tree)
    }

    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    pub fn mkdir(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        let path = self.path(relative);
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    pub fn write(&self, relative: impl AsRef<Path>, contents: &str) -> Result<PathBuf> {
        let path = self.path(relative);
        fs::write(&path, contents)?;
        Ok(path)
    }
}
