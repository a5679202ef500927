//! Metadata side-table.
//!
//! Each tenant has one JSON document mapping item paths to arbitrary
//! documents. The table lives outside the tenant space so it can never be
//! listed, deleted or shared as an item.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tempfile::NamedTempFile;
use tokio::fs as afs;
use tracing::debug;

use crate::tenant::TenantId;
use crate::tree::ItemPath;
use crate::{Result, StorageError};

/// A tenant's whole side-table.
pub type MetadataTable = BTreeMap<String, Value>;

/// Storage backend for metadata side-tables.
///
/// Implementations do not check that the item exists and do not serialize
/// concurrent writers; the facade does both under the tenant lock.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Upsert the document for `item`.
    async fn attach(&self, tenant: &TenantId, item: &ItemPath, document: Value) -> Result<()>;

    /// The document for `item`.
    async fn fetch(&self, tenant: &TenantId, item: &ItemPath) -> Result<Value>;
}

/// Side-tables stored as pretty-printed JSON files, one per tenant.
#[derive(Debug, Clone)]
pub struct JsonMetadataStore {
    dir: PathBuf,
}

impl JsonMetadataStore {
    /// Create a store writing into `dir`, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Location of a tenant's table.
    pub fn table_path(&self, tenant: &TenantId) -> PathBuf {
        self.dir.join(format!("{tenant}.json"))
    }

    async fn read_table(&self, path: &Path) -> Result<Option<MetadataTable>> {
        match afs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the table file in one step.
    ///
    /// The new table is written to a temp file in the same directory and
    /// persisted over the old one; on any failure the temp file is removed.
    async fn write_table(&self, path: &Path, table: &MetadataTable) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(table)?;
        let dir = self.dir.clone();
        let path = path.to_path_buf();

        tokio::task::spawn_blocking(move || -> io::Result<()> {
            let mut temp = NamedTempFile::new_in(&dir)?;
            temp.write_all(&bytes)?;
            temp.as_file().sync_all()?;
            temp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| StorageError::Io(io::Error::other(e)))??;
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for JsonMetadataStore {
    async fn attach(&self, tenant: &TenantId, item: &ItemPath, document: Value) -> Result<()> {
        let path = self.table_path(tenant);
        let mut table = self.read_table(&path).await?.unwrap_or_default();

        table.insert(item.to_string(), document);
        self.write_table(&path, &table).await?;

        debug!(tenant = %tenant, item = %item, entries = table.len(), "Metadata attached");
        Ok(())
    }

    async fn fetch(&self, tenant: &TenantId, item: &ItemPath) -> Result<Value> {
        let mut table = self
            .read_table(&self.table_path(tenant))
            .await?
            .ok_or(StorageError::NoMetadataFile)?;

        table
            .remove(&item.to_string())
            .ok_or_else(|| StorageError::NoMetadataForItem(item.to_string()))
    }
}
