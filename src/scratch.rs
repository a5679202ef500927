//! Scratch area for raw uploads and temporary archives.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::{Builder, TempPath};

use crate::Result;

/// Shared scratch directory, never addressable as a tenant item.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// Create a scratch area at `path`, creating the directory if needed.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create a fresh, empty file in the scratch area.
    pub fn allocate(&self, suffix: &str) -> Result<ScratchFile> {
        self.allocate_named("", suffix)
    }

    /// Like `allocate`, with a recognizable name prefix.
    pub fn allocate_named(&self, prefix: &str, suffix: &str) -> Result<ScratchFile> {
        let file = Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempfile_in(&self.path)?;
        Ok(ScratchFile {
            path: file.into_temp_path(),
        })
    }
}

/// A scratch file, deleted when dropped.
///
/// Dropping runs on every exit path, including errors, cancelled futures and
/// dropped download streams. A file already moved away is not an error.
#[derive(Debug)]
pub struct ScratchFile {
    path: TempPath,
}

impl ScratchFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_allocate_unique_paths() {
        let temp_dir = TempDir::new().unwrap();
        let scratch = ScratchDir::new(temp_dir.path().join("scratch")).unwrap();

        let a = scratch.allocate(".gz").unwrap();
        let b = scratch.allocate(".gz").unwrap();

        assert_ne!(a.path(), b.path());
        assert!(a.path().starts_with(scratch.path()));
        assert!(a.path().to_string_lossy().ends_with(".gz"));
        assert!(a.path().is_file());
    }

    #[test]
    fn test_allocate_named() {
        let temp_dir = TempDir::new().unwrap();
        let scratch = ScratchDir::new(temp_dir.path()).unwrap();

        let file = scratch.allocate_named("abc123-", ".zip").unwrap();
        let name = file.path().file_name().unwrap().to_string_lossy().into_owned();

        assert!(name.starts_with("abc123-"));
        assert!(name.ends_with(".zip"));
    }

    #[test]
    fn test_drop_removes_file() {
        let temp_dir = TempDir::new().unwrap();
        let scratch = ScratchDir::new(temp_dir.path()).unwrap();

        let file = scratch.allocate(".bin").unwrap();
        fs::write(file.path(), b"data").unwrap();
        let path = file.path().to_path_buf();
        assert!(path.exists());

        drop(file);
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_tolerates_moved_file() {
        let temp_dir = TempDir::new().unwrap();
        let scratch = ScratchDir::new(temp_dir.path().join("scratch")).unwrap();

        let file = scratch.allocate(".gz").unwrap();
        let moved = temp_dir.path().join("stored.gz");
        fs::rename(file.path(), &moved).unwrap();

        drop(file);
        assert!(moved.exists());
    }

    #[test]
    fn test_allocate_missing_dir_fails() {
        let temp_dir = TempDir::new().unwrap();
        let scratch = ScratchDir::new(temp_dir.path().join("scratch")).unwrap();
        fs::remove_dir(scratch.path()).unwrap();

        assert!(scratch.allocate(".tmp").is_err());
    }
}
