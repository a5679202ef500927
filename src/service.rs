//! Storage facade.
//!
//! `StorageService` is the only surface the transport layer talks to. It
//! parses raw tenant ids and paths, serializes writers per tenant, and drives
//! the codec workers for uploads and folder shares.

use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::fs as afs;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::metadata::{JsonMetadataStore, MetadataStore};
use crate::scratch::ScratchDir;
use crate::share::{LinkRegistry, MemoryLinkRegistry, ShareLink};
use crate::stream::{self, Download};
use crate::tenant::{TenantId, TenantLocks};
use crate::tree::{Item, ItemKind, ItemPath, LocalTree, TreeBackend};
use crate::worker::{Job, JobExecutor, WorkerPool};
use crate::{Result, StorageError};

/// Shortest period the link sweeper will tick at.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Tenant-scoped storage operations.
pub struct StorageService {
    tree: Arc<dyn TreeBackend>,
    metadata: Arc<dyn MetadataStore>,
    links: Arc<dyn LinkRegistry>,
    executor: Arc<dyn JobExecutor>,
    scratch: ScratchDir,
    locks: TenantLocks,
    link_ttl: chrono::Duration,
}

impl StorageService {
    /// Assemble a service from its collaborators.
    pub fn new(
        tree: Arc<dyn TreeBackend>,
        metadata: Arc<dyn MetadataStore>,
        links: Arc<dyn LinkRegistry>,
        executor: Arc<dyn JobExecutor>,
        scratch: ScratchDir,
        link_ttl: chrono::Duration,
    ) -> Self {
        Self {
            tree,
            metadata,
            links,
            executor,
            scratch,
            locks: TenantLocks::new(),
            link_ttl,
        }
    }

    /// Build the local-filesystem service described by `config`.
    ///
    /// Creates the tenant root, metadata and scratch directories if needed.
    pub fn from_config(config: &Config) -> Result<Self> {
        let tree = LocalTree::new(&config.storage.root)?;
        let metadata = JsonMetadataStore::new(&config.storage.metadata_dir)?;
        let scratch = ScratchDir::new(&config.storage.scratch_dir)?;

        info!(
            root = %config.storage.root,
            metadata_dir = %config.storage.metadata_dir,
            scratch_dir = %config.storage.scratch_dir,
            link_ttl_minutes = config.share.link_ttl_minutes,
            pool_size = config.workers.pool_size,
            "Storage service ready"
        );

        Ok(Self::new(
            Arc::new(tree),
            Arc::new(metadata),
            Arc::new(MemoryLinkRegistry::new()),
            Arc::new(WorkerPool::from_config(&config.workers)),
            scratch,
            config.share.link_ttl(),
        ))
    }

    /// Create an empty file or folder.
    pub async fn create_item(&self, tenant: &str, item_path: &str, is_folder: bool) -> Result<()> {
        let tenant = TenantId::parse(tenant)?;
        let path = ItemPath::parse(item_path)?;
        let kind = if is_folder {
            ItemKind::Folder
        } else {
            ItemKind::File
        };

        let _guard = self.locks.lock(&tenant).await;
        self.tree.create(&tenant, &path, kind).await?;

        info!(tenant = %tenant, path = %path, ?kind, "Item created");
        Ok(())
    }

    /// The tenant's whole tree.
    pub async fn list_items(&self, tenant: &str) -> Result<Vec<Item>> {
        let tenant = TenantId::parse(tenant)?;
        self.tree.list(&tenant).await
    }

    /// Delete a file or an empty folder.
    pub async fn delete_item(&self, tenant: &str, item_path: &str) -> Result<()> {
        let tenant = TenantId::parse(tenant)?;
        let path = ItemPath::parse(item_path)?;

        let _guard = self.locks.lock(&tenant).await;
        self.tree.delete(&tenant, &path).await?;

        info!(tenant = %tenant, path = %path, "Item deleted");
        Ok(())
    }

    /// Compress `data` and store it as `<file_name>.gz`.
    ///
    /// Both scratch files are removed on every exit path. A failed upload
    /// never leaves a stored item behind.
    pub async fn upload(&self, tenant: &str, file_name: &str, data: &[u8]) -> Result<()> {
        let tenant = TenantId::parse(tenant)?;
        let path = ItemPath::parse(file_name)?;
        let stored = path.compressed();

        let raw = self.scratch.allocate(".upload")?;
        let packed = self.scratch.allocate(".gz")?;
        afs::write(raw.path(), data).await?;

        self.executor
            .submit(Job::Compress {
                input: raw.path().to_path_buf(),
                output: packed.path().to_path_buf(),
            })
            .await?;

        let _guard = self.locks.lock(&tenant).await;
        self.tree.ensure_space(&tenant).await?;
        self.tree.put_file(&tenant, &stored, packed.path()).await?;

        info!(tenant = %tenant, path = %stored, bytes = data.len(), "Upload stored");
        Ok(())
    }

    /// Attach (or replace) the metadata document of an item.
    ///
    /// The item may be named by its own path or, for uploads, by the logical
    /// name of its stored `.gz` artifact.
    pub async fn attach_metadata(
        &self,
        tenant: &str,
        item_name: &str,
        document: Value,
    ) -> Result<()> {
        let tenant = TenantId::parse(tenant)?;
        let path = ItemPath::parse(item_name)?;
        if document.is_null() {
            return Err(StorageError::InvalidInput(
                "metadata document is missing".to_string(),
            ));
        }

        let _guard = self.locks.lock(&tenant).await;
        let exists = self.tree.stat(&tenant, &path).await?.is_some()
            || self.tree.stat(&tenant, &path.compressed()).await?.is_some();
        if !exists {
            return Err(StorageError::NotFound(format!("item {path}")));
        }
        self.metadata.attach(&tenant, &path, document).await?;

        info!(tenant = %tenant, item = %path, "Metadata attached");
        Ok(())
    }

    /// The metadata document of an item.
    pub async fn get_metadata(&self, tenant: &str, item_name: &str) -> Result<Value> {
        let tenant = TenantId::parse(tenant)?;
        let path = ItemPath::parse(item_name)?;
        self.metadata.fetch(&tenant, &path).await
    }

    /// Issue a single-use, time-limited link to an item.
    pub async fn issue_share_link(&self, tenant: &str, item_path: &str) -> Result<ShareLink> {
        let tenant = TenantId::parse(tenant)?;
        let path = ItemPath::parse(item_path)?;

        let kind = self
            .tree
            .stat(&tenant, &path)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("item {path}")))?;

        let link = ShareLink::new(
            tenant.clone(),
            self.tree.locate(&tenant, &path),
            kind.is_folder(),
            Utc::now() + self.link_ttl,
        );
        self.links.insert(link.clone()).await?;

        info!(
            tenant = %tenant,
            path = %path,
            link_id = %link.id,
            is_folder = link.is_folder,
            expires_at = %link.expires_at,
            "Share link issued"
        );
        Ok(link)
    }

    /// Redeem a share link.
    ///
    /// The link is consumed before anything else happens, so it is gone
    /// whatever the outcome. Folders are zipped into a temporary archive that
    /// is removed once the returned stream is finished or dropped.
    pub async fn redeem_share_link(&self, link_id: &str) -> Result<Download> {
        let link = self
            .links
            .take(link_id)
            .await?
            .ok_or(StorageError::LinkNotFound)?;

        if link.is_expired_at(Utc::now()) {
            info!(link_id = %link.id, tenant = %link.tenant, "Expired share link redeemed");
            return Err(StorageError::LinkExpired);
        }

        let name = link
            .target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| link.id.clone());

        let download = if link.is_folder {
            let archive = self
                .scratch
                .allocate_named(&format!("{}-", link.id), ".zip")?;
            let archive_path = archive.path().to_path_buf();
            self.executor
                .submit(Job::Archive {
                    folder: link.target.clone(),
                    output: archive_path.clone(),
                })
                .await?;

            Download {
                file_name: format!("{name}.zip"),
                stream: stream::stream_file(&archive_path, Some(archive)).await?,
            }
        } else {
            let stream = stream::stream_file(&link.target, None)
                .await
                .map_err(|e| not_found_or_io(e, "shared item"))?;
            Download {
                file_name: name,
                stream,
            }
        };

        info!(
            link_id = %link.id,
            tenant = %link.tenant,
            is_folder = link.is_folder,
            "Share link redeemed"
        );
        Ok(download)
    }

    /// Stream a stored upload back, decompressed.
    pub async fn download_stored(&self, tenant: &str, item_name: &str) -> Result<Download> {
        let tenant = TenantId::parse(tenant)?;
        let path = ItemPath::parse(item_name)?;
        let stored = path.compressed();

        if self.tree.stat(&tenant, &stored).await? != Some(ItemKind::File) {
            return Err(StorageError::NotFound(format!("stored file {path}")));
        }
        let stream = stream::stream_gunzip(&self.tree.locate(&tenant, &stored))
            .await
            .map_err(|e| not_found_or_io(e, &format!("stored file {path}")))?;

        debug!(tenant = %tenant, path = %path, "Streaming stored file");
        Ok(Download {
            file_name: path.name().to_string(),
            stream,
        })
    }

    /// Stream a file's bytes as stored, without decompression.
    pub async fn download_item(&self, tenant: &str, item_path: &str) -> Result<Download> {
        let tenant = TenantId::parse(tenant)?;
        let path = ItemPath::parse(item_path)?;

        match self.tree.stat(&tenant, &path).await? {
            Some(ItemKind::File) => {}
            Some(ItemKind::Folder) => {
                return Err(StorageError::InvalidPath(format!("{path} is a folder")))
            }
            None => return Err(StorageError::NotFound(format!("item {path}"))),
        }
        let stream = stream::stream_file(&self.tree.locate(&tenant, &path), None)
            .await
            .map_err(|e| not_found_or_io(e, &format!("item {path}")))?;

        debug!(tenant = %tenant, path = %path, "Streaming item");
        Ok(Download {
            file_name: path.name().to_string(),
            stream,
        })
    }

    /// Drop every expired link, returning how many were removed.
    pub async fn purge_expired_links(&self) -> Result<usize> {
        self.links.purge_expired(Utc::now()).await
    }

    /// Number of links that have not been redeemed or purged yet.
    pub async fn active_links(&self) -> Result<usize> {
        self.links.len().await
    }

    /// Periodically purge expired links.
    ///
    /// The task holds only a weak reference and ends once the service is
    /// dropped.
    pub fn spawn_link_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let service: Weak<Self> = Arc::downgrade(self);
        let period = interval.max(MIN_SWEEP_INTERVAL);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(live) = service.upgrade() else {
                    break;
                };
                match live.purge_expired_links().await {
                    Ok(0) => {}
                    Ok(purged) => info!(purged, "Expired share links purged"),
                    Err(e) => warn!(error = %e, "Failed to purge share links"),
                }
            }
            debug!("Link sweeper stopped");
        })
    }

    /// Tear down the link registry. Outstanding links stop working.
    pub async fn shutdown(&self) -> Result<()> {
        let active = self.links.len().await?;
        self.links.clear().await?;
        info!(dropped_links = active, "Storage service shut down");
        Ok(())
    }

    /// Local location of a tenant item.
    pub fn locate(&self, tenant: &TenantId, path: &ItemPath) -> PathBuf {
        self.tree.locate(tenant, path)
    }
}

fn not_found_or_io(e: std::io::Error, what: &str) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(what.to_string())
    } else {
        StorageError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    struct FailingExecutor;

    #[async_trait]
    impl JobExecutor for FailingExecutor {
        async fn submit(&self, job: Job) -> Result<()> {
            // Leave a partial output behind, like a crashed codec would.
            let output = match &job {
                Job::Compress { output, .. } | Job::Archive { output, .. } => output,
            };
            std::fs::write(output, b"partial")?;
            Err(StorageError::Worker(format!("{} worker crashed", job.label())))
        }
    }

    fn setup_service(executor: Arc<dyn JobExecutor>) -> (TempDir, StorageService) {
        let temp_dir = TempDir::new().unwrap();
        let service = StorageService::new(
            Arc::new(LocalTree::new(temp_dir.path().join("users")).unwrap()),
            Arc::new(JsonMetadataStore::new(temp_dir.path().join("meta")).unwrap()),
            Arc::new(MemoryLinkRegistry::new()),
            executor,
            ScratchDir::new(temp_dir.path().join("scratch")).unwrap(),
            chrono::Duration::minutes(60),
        );
        (temp_dir, service)
    }

    fn scratch_entries(temp_dir: &TempDir) -> usize {
        std::fs::read_dir(temp_dir.path().join("scratch"))
            .unwrap()
            .count()
    }

    #[tokio::test]
    async fn test_failed_upload_leaves_nothing() {
        let (temp_dir, service) = setup_service(Arc::new(FailingExecutor));

        let result = service.upload("u1", "a.txt", b"hello").await;

        match result {
            Err(StorageError::Worker(msg)) => assert!(msg.contains("crashed")),
            other => panic!("Expected Worker error, got {other:?}"),
        }
        assert_eq!(scratch_entries(&temp_dir), 0);
        assert!(matches!(
            service.download_stored("u1", "a.txt").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_folder_redeem_consumes_link() {
        let (temp_dir, service) = setup_service(Arc::new(FailingExecutor));
        service.create_item("u1", "docs", true).await.unwrap();
        let link = service.issue_share_link("u1", "docs").await.unwrap();

        assert!(matches!(
            service.redeem_share_link(&link.id).await,
            Err(StorageError::Worker(_))
        ));
        assert!(matches!(
            service.redeem_share_link(&link.id).await,
            Err(StorageError::LinkNotFound)
        ));
        assert_eq!(scratch_entries(&temp_dir), 0);
    }

    #[tokio::test]
    async fn test_invalid_tenant_rejected() {
        let (_temp_dir, service) = setup_service(Arc::new(WorkerPool::new(1, None)));

        let result = service.create_item("../evil", "a", true).await;
        assert!(matches!(result, Err(StorageError::InvalidTenant(_))));
    }

    #[tokio::test]
    async fn test_attach_null_document_rejected() {
        let (_temp_dir, service) = setup_service(Arc::new(WorkerPool::new(1, None)));
        service.create_item("u1", "a.txt", false).await.unwrap();

        let result = service.attach_metadata("u1", "a.txt", Value::Null).await;
        assert!(matches!(result, Err(StorageError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_attach_requires_item() {
        let (_temp_dir, service) = setup_service(Arc::new(WorkerPool::new(1, None)));

        let result = service.attach_metadata("u1", "ghost", json!({"k": 1})).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_attach_by_logical_upload_name() {
        let (_temp_dir, service) = setup_service(Arc::new(WorkerPool::new(1, None)));
        service.upload("u1", "a.txt", b"data").await.unwrap();

        service
            .attach_metadata("u1", "a.txt", json!({"tag": "x"}))
            .await
            .unwrap();
        assert_eq!(
            service.get_metadata("u1", "a.txt").await.unwrap(),
            json!({"tag": "x"})
        );
    }

    #[tokio::test]
    async fn test_download_item_rejects_folder() {
        let (_temp_dir, service) = setup_service(Arc::new(WorkerPool::new(1, None)));
        service.create_item("u1", "docs", true).await.unwrap();

        assert!(matches!(
            service.download_item("u1", "docs").await,
            Err(StorageError::InvalidPath(_))
        ));
        assert!(matches!(
            service.download_item("u1", "nope").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_clears_links() {
        let (_temp_dir, service) = setup_service(Arc::new(WorkerPool::new(1, None)));
        service.create_item("u1", "a.txt", false).await.unwrap();
        let link = service.issue_share_link("u1", "a.txt").await.unwrap();
        assert_eq!(service.active_links().await.unwrap(), 1);

        service.shutdown().await.unwrap();

        assert!(matches!(
            service.redeem_share_link(&link.id).await,
            Err(StorageError::LinkNotFound)
        ));
    }

    #[tokio::test]
    async fn test_sweeper_purges_expired_links() {
        let temp_dir = TempDir::new().unwrap();
        let service = Arc::new(StorageService::new(
            Arc::new(LocalTree::new(temp_dir.path().join("users")).unwrap()),
            Arc::new(JsonMetadataStore::new(temp_dir.path().join("meta")).unwrap()),
            Arc::new(MemoryLinkRegistry::new()),
            Arc::new(WorkerPool::new(1, None)),
            ScratchDir::new(temp_dir.path().join("scratch")).unwrap(),
            chrono::Duration::zero(),
        ));
        service.create_item("u1", "a.txt", false).await.unwrap();
        service.issue_share_link("u1", "a.txt").await.unwrap();

        let sweeper = service.spawn_link_sweeper(Duration::from_millis(20));
        for _ in 0..100 {
            if service.active_links().await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(service.active_links().await.unwrap(), 0);

        drop(service);
        tokio::time::timeout(Duration::from_secs(2), sweeper)
            .await
            .unwrap()
            .unwrap();
    }
}
