//! Tenant identifiers and per-tenant mutual exclusion.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{Result, StorageError};

/// Maximum length for a tenant identifier (in characters).
pub const MAX_TENANT_ID_LENGTH: usize = 128;

/// Opaque, already-authenticated tenant identifier.
///
/// The id doubles as the name of the tenant's space directory, so only
/// `[A-Za-z0-9_.@-]` is accepted and a leading `.` is refused.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantId(String);

impl TenantId {
    /// Validate and wrap a tenant identifier.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(StorageError::InvalidTenant("tenant id is empty".to_string()));
        }
        if raw.chars().count() > MAX_TENANT_ID_LENGTH {
            return Err(StorageError::InvalidTenant(format!(
                "tenant id exceeds {MAX_TENANT_ID_LENGTH} characters"
            )));
        }
        if raw.starts_with('.') {
            return Err(StorageError::InvalidTenant(format!(
                "tenant id may not start with '.': {raw}"
            )));
        }
        if let Some(c) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '@')))
        {
            return Err(StorageError::InvalidTenant(format!(
                "tenant id contains {c:?}: {raw}"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One async mutex per tenant.
///
/// Held around tree mutations and the metadata read-modify-write so that
/// two writers in the same space never interleave. A tenant's entry lives
/// only while someone holds or waits for its lock.
#[derive(Debug, Default)]
pub struct TenantLocks {
    locks: DashMap<TenantId, Arc<Mutex<()>>>,
}

impl TenantLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a tenant's space.
    pub async fn lock(&self, tenant: &TenantId) -> TenantGuard<'_> {
        // Clone the Arc out so the map shard is not held across the await.
        let mutex = self
            .locks
            .entry(tenant.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        // Built before waiting so a cancelled wait still cleans up.
        let mut guard = TenantGuard {
            locks: self,
            tenant: tenant.clone(),
            mutex: Some(Arc::clone(&mutex)),
            held: None,
        };
        guard.held = Some(mutex.lock_owned().await);
        guard
    }

    /// Number of tenants currently locked or waited on.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one tenant's space, released on drop.
#[derive(Debug)]
pub struct TenantGuard<'a> {
    locks: &'a TenantLocks,
    tenant: TenantId,
    mutex: Option<Arc<Mutex<()>>>,
    held: Option<OwnedMutexGuard<()>>,
}

impl Drop for TenantGuard<'_> {
    fn drop(&mut self) {
        self.held.take();
        self.mutex.take();
        // New holders clone under the shard lock, so a count of one here
        // means only the map still refers to the mutex.
        self.locks
            .locks
            .remove_if(&self.tenant, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
