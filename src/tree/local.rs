//! Local filesystem tree backend.
//!
//! Each tenant space is a directory under the base path:
//! ```text
//! {base_path}/
//! ├── alice/
//! │   ├── docs/
//! │   │   └── readme.txt.gz
//! │   └── notes.txt
//! └── bob/
//!     └── ...
//! ```

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::fs as afs;
use tracing::debug;

use super::{Item, ItemKind, ItemPath, TreeBackend};
use crate::tenant::TenantId;
use crate::{Result, StorageError};

/// Tree backend storing every tenant space as a directory.
#[derive(Debug, Clone)]
pub struct LocalTree {
    /// Directory holding all tenant spaces.
    base_path: PathBuf,
}

impl LocalTree {
    /// Create a new LocalTree rooted at `base_path`.
    ///
    /// The base directory will be created if it doesn't exist.
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path)?;

        Ok(Self { base_path })
    }

    /// Get the base path of this tree.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Root directory of a tenant's space.
    pub fn space_root(&self, tenant: &TenantId) -> PathBuf {
        self.base_path.join(tenant.as_str())
    }

    /// Reject paths that run through an existing file.
    async fn check_ancestors(&self, tenant: &TenantId, path: &ItemPath) -> Result<()> {
        let segments = path.segments();
        let parents = &segments[..segments.len().saturating_sub(1)];
        let mut current = self.space_root(tenant);
        for (depth, segment) in parents.iter().enumerate() {
            current.push(segment);
            match lstat(&current).await? {
                None => break,
                Some(meta) if meta.is_dir() => {}
                Some(_) => {
                    return Err(StorageError::InvalidPath(format!(
                        "{} is a file",
                        segments[..=depth].join("/")
                    )));
                }
            }
        }
        Ok(())
    }
}

/// `symlink_metadata` that maps a missing node to `None`.
///
/// A path running through a file names no node either.
async fn lstat(path: &Path) -> Result<Option<fs::Metadata>> {
    match afs::symlink_metadata(path).await {
        Ok(m) => Ok(Some(m)),
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
            ) =>
        {
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn kind_of(meta: &fs::Metadata) -> ItemKind {
    if meta.is_dir() {
        ItemKind::Folder
    } else {
        ItemKind::File
    }
}

/// Replace `target` with a copy of `source`.
///
/// The copy is written next to the target and renamed over it, so readers of
/// the old file keep their content and a failed copy leaves it untouched.
fn replace_by_copy(source: &Path, target: &Path) -> io::Result<()> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    io::copy(&mut File::open(source)?, &mut temp)?;
    temp.as_file().sync_all()?;
    temp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

/// Read a directory recursively into listing items, siblings sorted by name.
fn read_tree(dir: &Path) -> io::Result<Vec<Item>> {
    let mut items = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_dir() {
            items.push(Item::folder(name, read_tree(&entry.path())?));
        } else {
            items.push(Item::file(name));
        }
    }
    items.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(items)
}

#[async_trait]
impl TreeBackend for LocalTree {
    async fn space_exists(&self, tenant: &TenantId) -> Result<bool> {
        Ok(lstat(&self.space_root(tenant))
            .await?
            .is_some_and(|m| m.is_dir()))
    }

    async fn ensure_space(&self, tenant: &TenantId) -> Result<()> {
        afs::create_dir_all(self.space_root(tenant)).await?;
        Ok(())
    }

    async fn create(&self, tenant: &TenantId, path: &ItemPath, kind: ItemKind) -> Result<()> {
        self.check_ancestors(tenant, path).await?;
        let target = self.locate(tenant, path);
        if lstat(&target).await?.is_some() {
            return Err(StorageError::AlreadyExists(path.to_string()));
        }

        if let Some(parent) = target.parent() {
            afs::create_dir_all(parent).await?;
        }

        let created = match kind {
            ItemKind::Folder => afs::create_dir(&target).await,
            ItemKind::File => afs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&target)
                .await
                .map(drop),
        };

        match created {
            Ok(()) => {
                debug!(tenant = %tenant, path = %path, ?kind, "Item created");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(StorageError::AlreadyExists(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, tenant: &TenantId) -> Result<Vec<Item>> {
        if !self.space_exists(tenant).await? {
            return Err(StorageError::SpaceNotFound);
        }

        let root = self.space_root(tenant);
        let items = tokio::task::spawn_blocking(move || read_tree(&root))
            .await
            .map_err(|e| StorageError::Io(io::Error::other(e)))??;
        Ok(items)
    }

    async fn delete(&self, tenant: &TenantId, path: &ItemPath) -> Result<()> {
        let target = self.locate(tenant, path);
        let meta = lstat(&target)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("item {path}")))?;

        if meta.is_dir() {
            let mut entries = afs::read_dir(&target).await?;
            if entries.next_entry().await?.is_some() {
                return Err(StorageError::FolderNotEmpty(path.to_string()));
            }
            afs::remove_dir(&target).await?;
        } else {
            afs::remove_file(&target).await?;
        }

        debug!(tenant = %tenant, path = %path, "Item deleted");
        Ok(())
    }

    async fn stat(&self, tenant: &TenantId, path: &ItemPath) -> Result<Option<ItemKind>> {
        Ok(lstat(&self.locate(tenant, path)).await?.map(|m| kind_of(&m)))
    }

    async fn put_file(&self, tenant: &TenantId, path: &ItemPath, source: &Path) -> Result<()> {
        self.check_ancestors(tenant, path).await?;
        let target = self.locate(tenant, path);
        if let Some(ItemKind::Folder) = self.stat(tenant, path).await? {
            return Err(StorageError::InvalidPath(format!(
                "a folder already exists at {path}"
            )));
        }
        if let Some(parent) = target.parent() {
            afs::create_dir_all(parent).await?;
        }

        // Rename is atomic when scratch and tree share a filesystem.
        if afs::rename(source, &target).await.is_ok() {
            return Ok(());
        }

        let source = source.to_path_buf();
        tokio::task::spawn_blocking(move || replace_by_copy(&source, &target))
            .await
            .map_err(|e| StorageError::Io(io::Error::other(e)))??;
        Ok(())
    }

    fn locate(&self, tenant: &TenantId, path: &ItemPath) -> PathBuf {
        path.resolve(&self.space_root(tenant))
    }
}
