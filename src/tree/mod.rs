//! Per-tenant item tree.
//!
//! This module provides the hierarchical storage for each tenant:
//! - Validated, traversal-safe item paths
//! - Folder/file creation with sibling name uniqueness
//! - Recursive listing
//! - Deletion that refuses non-empty folders

mod local;
mod path;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::tenant::TenantId;
use crate::Result;

pub use local::LocalTree;
pub use path::{ItemPath, COMPRESSED_SUFFIX};

/// Kind of a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Folder,
}

impl ItemKind {
    pub fn is_folder(self) -> bool {
        self == ItemKind::Folder
    }
}

/// A node in a tenant's tree, as returned by listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Path segment, unique among siblings.
    pub name: String,
    /// File or folder.
    #[serde(rename = "type")]
    pub kind: ItemKind,
    /// Children (folders only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<Item>>,
}

impl Item {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ItemKind::File,
            children: None,
        }
    }

    pub fn folder(name: impl Into<String>, children: Vec<Item>) -> Self {
        Self {
            name: name.into(),
            kind: ItemKind::Folder,
            children: Some(children),
        }
    }
}

/// Look up an item in a listing by path.
pub fn find_item<'a>(items: &'a [Item], path: &ItemPath) -> Option<&'a Item> {
    let mut level = items;
    let mut found = None;
    for segment in path.segments() {
        let item = level.iter().find(|i| &i.name == segment)?;
        level = item.children.as_deref().unwrap_or_default();
        found = Some(item);
    }
    found
}

/// Storage backend for tenant trees.
///
/// The facade only talks to this trait; `LocalTree` keeps the tree on the
/// local filesystem.
#[async_trait]
pub trait TreeBackend: Send + Sync {
    /// Whether the tenant has a space yet.
    async fn space_exists(&self, tenant: &TenantId) -> Result<bool>;

    /// Create the tenant's space if missing.
    async fn ensure_space(&self, tenant: &TenantId) -> Result<()>;

    /// Create an empty file or folder, including missing parents.
    async fn create(&self, tenant: &TenantId, path: &ItemPath, kind: ItemKind) -> Result<()>;

    /// The whole tree of a tenant.
    async fn list(&self, tenant: &TenantId) -> Result<Vec<Item>>;

    /// Remove a file or an empty folder.
    async fn delete(&self, tenant: &TenantId, path: &ItemPath) -> Result<()>;

    /// Kind of the node at `path`, if any.
    async fn stat(&self, tenant: &TenantId, path: &ItemPath) -> Result<Option<ItemKind>>;

    /// Move a finished scratch file into the tree, replacing an existing file.
    async fn put_file(&self, tenant: &TenantId, path: &ItemPath, source: &Path) -> Result<()>;

    /// Local filesystem location of an item, for workers and streams.
    fn locate(&self, tenant: &TenantId, path: &ItemPath) -> PathBuf;
}
