//! Test helpers for integration tests.
//!
//! Provides a `TestStorage` fixture backed by a temporary directory.

#![allow(dead_code)]

use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use sharebox::{
    JsonMetadataStore, LocalTree, MemoryLinkRegistry, ScratchDir, StorageService, WorkerPool,
};

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A storage service over a throwaway directory.
pub struct TestStorage {
    pub service: Arc<StorageService>,
    temp_dir: TempDir,
}

impl TestStorage {
    /// Service with the default one-hour link lifetime.
    pub fn new() -> Self {
        Self::with_link_ttl(chrono::Duration::minutes(60))
    }

    /// Service whose links live for `ttl`.
    pub fn with_link_ttl(ttl: chrono::Duration) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path();

        let service = StorageService::new(
            Arc::new(LocalTree::new(root.join("users")).expect("Failed to open tree")),
            Arc::new(
                JsonMetadataStore::new(root.join("metadata")).expect("Failed to open metadata"),
            ),
            Arc::new(MemoryLinkRegistry::new()),
            Arc::new(WorkerPool::new(2, Some(DEFAULT_TIMEOUT))),
            ScratchDir::new(root.join("downloads")).expect("Failed to open scratch"),
            ttl,
        );

        Self {
            service: Arc::new(service),
            temp_dir,
        }
    }

    pub fn users_dir(&self) -> PathBuf {
        self.temp_dir.path().join("users")
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.temp_dir.path().join("downloads")
    }

    /// Names of the files currently in the scratch directory.
    pub fn scratch_entries(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.scratch_dir())
            .expect("Failed to read scratch dir")
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Wait until the scratch directory is empty (stream producers clean up
    /// on their own thread).
    pub async fn wait_for_empty_scratch(&self) -> Vec<String> {
        for _ in 0..200 {
            if self.scratch_entries().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.scratch_entries()
    }
}

/// Read every entry of a zip archive as `(name, content)`, sorted by name.
pub fn unzip(bytes: Vec<u8>) -> Vec<(String, Vec<u8>)> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).expect("Not a zip archive");
    let mut entries = Vec::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).unwrap();
        let mut content = Vec::new();
        file.read_to_end(&mut content).unwrap();
        entries.push((file.name().to_string(), content));
    }
    entries.sort();
    entries
}
