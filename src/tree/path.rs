//! Tenant-relative item paths.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::{Result, StorageError};

/// Suffix appended to the logical name of stored compressed artifacts.
pub const COMPRESSED_SUFFIX: &str = ".gz";

/// A validated path inside a tenant space.
///
/// Parsing splits on `/`, drops empty and `.` segments and refuses `..`,
/// backslashes and NUL bytes, so joining an `ItemPath` onto a tenant root can
/// never leave that root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemPath {
    segments: Vec<String>,
}

impl ItemPath {
    /// Parse a request path such as `"/docs/readme.txt"` or `"docs"`.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.contains('\0') {
            return Err(StorageError::InvalidPath(
                "path contains a NUL byte".to_string(),
            ));
        }
        if raw.contains('\\') {
            return Err(StorageError::InvalidPath(format!(
                "path contains a backslash: {raw}"
            )));
        }

        let mut segments = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" | "." => continue,
                ".." => {
                    return Err(StorageError::InvalidPath(format!(
                        "path escapes the user space: {raw}"
                    )))
                }
                s => segments.push(s.to_string()),
            }
        }

        if segments.is_empty() {
            return Err(StorageError::InvalidPath(format!(
                "path names no item: {raw:?}"
            )));
        }

        Ok(Self { segments })
    }

    /// The last segment.
    pub fn name(&self) -> &str {
        // Non-empty by construction.
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// Path segments from the tenant root down.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The same path with `suffix` appended to its last segment.
    pub fn with_suffix(&self, suffix: &str) -> Self {
        let mut segments = self.segments.clone();
        if let Some(last) = segments.last_mut() {
            last.push_str(suffix);
        }
        Self { segments }
    }

    /// Path of the stored compressed artifact for this logical name.
    pub fn compressed(&self) -> Self {
        self.with_suffix(COMPRESSED_SUFFIX)
    }

    /// Resolve onto a tenant root directory.
    pub fn resolve(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        path.extend(&self.segments);
        path
    }
}

impl fmt::Display for ItemPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}
