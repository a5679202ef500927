//! Share-link registry.
//!
//! A link grants one anonymous download of an item until it expires. Links
//! live in memory only and are lost on restart.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::tenant::TenantId;
use crate::Result;

/// An issued share link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShareLink {
    /// Random 128-bit id (32 hex chars).
    pub id: String,
    #[serde(skip)]
    pub tenant: TenantId,
    /// Local path of the shared item.
    #[serde(skip)]
    pub target: PathBuf,
    /// Whether the item was a folder when the link was issued.
    pub is_folder: bool,
    pub expires_at: DateTime<Utc>,
}

impl ShareLink {
    /// Create a link with a fresh random id.
    pub fn new(
        tenant: TenantId,
        target: PathBuf,
        is_folder: bool,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            tenant,
            target,
            is_folder,
            expires_at,
        }
    }

    /// Path a recipient uses to redeem the link.
    pub fn download_path(&self) -> String {
        format!("/download/{}", self.id)
    }

    /// Check if the link is expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Backing store for active links.
///
/// `take` must be atomic: of any number of concurrent calls for one id, at
/// most one gets the link.
#[async_trait]
pub trait LinkRegistry: Send + Sync {
    async fn insert(&self, link: ShareLink) -> Result<()>;

    /// Remove and return the link.
    async fn take(&self, id: &str) -> Result<Option<ShareLink>>;

    /// Drop every link expired at `now`, returning how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;

    async fn len(&self) -> Result<usize>;

    async fn clear(&self) -> Result<()>;
}

/// In-memory registry.
#[derive(Debug, Default)]
pub struct MemoryLinkRegistry {
    links: DashMap<String, ShareLink>,
}

impl MemoryLinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LinkRegistry for MemoryLinkRegistry {
    async fn insert(&self, link: ShareLink) -> Result<()> {
        self.links.insert(link.id.clone(), link);
        Ok(())
    }

    async fn take(&self, id: &str) -> Result<Option<ShareLink>> {
        Ok(self.links.remove(id).map(|(_, link)| link))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let before = self.links.len();
        self.links.retain(|_, link| !link.is_expired_at(now));
        Ok(before.saturating_sub(self.links.len()))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.links.len())
    }

    async fn clear(&self) -> Result<()> {
        self.links.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    fn link_expiring_at(expires_at: DateTime<Utc>) -> ShareLink {
        ShareLink::new(
            TenantId::parse("u1").unwrap(),
            PathBuf::from("/srv/u1/a.txt"),
            false,
            expires_at,
        )
    }

    #[test]
    fn test_link_ids_are_unique_hex() {
        let expires = Utc::now();
        let a = link_expiring_at(expires);
        let b = link_expiring_at(expires);

        assert_ne!(a.id, b.id);
        assert_eq!(a.id.len(), 32);
        assert!(a.id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a.download_path(), format!("/download/{}", a.id));
    }

    #[test]
    fn test_is_expired_at() {
        let now = Utc::now();
        let link = link_expiring_at(now);

        assert!(!link.is_expired_at(now - Duration::seconds(1)));
        assert!(!link.is_expired_at(now));
        assert!(link.is_expired_at(now + Duration::seconds(1)));
    }

    #[test]
    fn test_serialized_link_hides_location() {
        let link = link_expiring_at(Utc::now());
        let json = serde_json::to_value(&link).unwrap();

        assert!(json.get("id").is_some());
        assert!(json.get("expires_at").is_some());
        assert!(json.get("target").is_none());
        assert!(json.get("tenant").is_none());
    }

    #[tokio::test]
    async fn test_take_is_single_use() {
        let registry = MemoryLinkRegistry::new();
        let link = link_expiring_at(Utc::now() + Duration::minutes(5));
        let id = link.id.clone();
        registry.insert(link.clone()).await.unwrap();

        assert_eq!(registry.take(&id).await.unwrap(), Some(link));
        assert_eq!(registry.take(&id).await.unwrap(), None);
        assert_eq!(registry.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let registry = MemoryLinkRegistry::new();
        let now = Utc::now();
        registry
            .insert(link_expiring_at(now - Duration::minutes(1)))
            .await
            .unwrap();
        registry
            .insert(link_expiring_at(now - Duration::minutes(2)))
            .await
            .unwrap();
        let live = link_expiring_at(now + Duration::minutes(1));
        let live_id = live.id.clone();
        registry.insert(live).await.unwrap();

        assert_eq!(registry.purge_expired(now).await.unwrap(), 2);
        assert_eq!(registry.len().await.unwrap(), 1);
        assert!(registry.take(&live_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clear() {
        let registry = MemoryLinkRegistry::new();
        registry.insert(link_expiring_at(Utc::now())).await.unwrap();

        registry.clear().await.unwrap();
        assert_eq!(registry.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_take_has_one_winner() {
        let registry = Arc::new(MemoryLinkRegistry::new());
        let link = link_expiring_at(Utc::now() + Duration::minutes(5));
        let id = link.id.clone();
        registry.insert(link).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                registry.take(&id).await.unwrap().is_some()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
