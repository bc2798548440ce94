//! In-memory [`TenantDirectory`] implementation.
//!
//! [`MemoryDirectory`] keeps tenant records in a `BTreeMap` behind a
//! `parking_lot` lock so domain uniqueness checks and inserts happen
//! atomically. It also exposes a few knobs (availability, artificial
//! latency, lookup counter) that make directory behavior observable in
//! tests and local runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tenantry_core::{normalize_host, NewTenant, Tenant, TenantId, TenantUpdate};

use super::DirectoryError;
use crate::traits::TenantDirectory;

/// Tenant directory held entirely in process memory.
pub struct MemoryDirectory {
    tenants: RwLock<BTreeMap<TenantId, Tenant>>,
    next_id: AtomicI64,
    domain_lookups: AtomicU64,
    available: AtomicBool,
    lookup_delay: Mutex<Duration>,
}

impl MemoryDirectory {
    /// Creates an empty directory. Ids start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tenants: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
            domain_lookups: AtomicU64::new(0),
            available: AtomicBool::new(true),
            lookup_delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Number of `find_by_domain` calls served so far.
    #[must_use]
    pub fn domain_lookup_count(&self) -> u64 {
        self.domain_lookups.load(Ordering::SeqCst)
    }

    /// Simulates the control-plane store going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Adds a fixed delay before every domain lookup.
    pub fn set_lookup_delay(&self, delay: Duration) {
        *self.lookup_delay.lock() = delay;
    }

    fn ensure_available(&self) -> Result<(), DirectoryError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DirectoryError::Unavailable(anyhow::anyhow!(
                "in-memory directory is offline"
            )))
        }
    }
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TenantDirectory for MemoryDirectory {
    async fn find_by_domain(&self, domain: &str) -> Result<Option<Tenant>, DirectoryError> {
        self.domain_lookups.fetch_add(1, Ordering::SeqCst);

        let delay = *self.lookup_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.ensure_available()?;

        let Some(key) = normalize_host(domain) else {
            return Ok(None);
        };
        Ok(self
            .tenants
            .read()
            .values()
            .find(|t| t.domain == key)
            .cloned())
    }

    async fn get(&self, id: TenantId) -> Result<Option<Tenant>, DirectoryError> {
        self.ensure_available()?;
        Ok(self.tenants.read().get(&id).cloned())
    }

    async fn list(&self, include_inactive: bool) -> Result<Vec<Tenant>, DirectoryError> {
        self.ensure_available()?;
        Ok(self
            .tenants
            .read()
            .values()
            .filter(|t| include_inactive || t.active)
            .cloned()
            .collect())
    }

    async fn create(&self, tenant: NewTenant) -> Result<Tenant, DirectoryError> {
        self.ensure_available()?;
        let tenant = tenant.validated()?;

        let mut tenants = self.tenants.write();
        if tenants.values().any(|t| t.domain == tenant.domain) {
            return Err(DirectoryError::Conflict {
                domain: tenant.domain,
            });
        }

        let now = Utc::now();
        let id = TenantId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let record = Tenant {
            id,
            name: tenant.name,
            domain: tenant.domain,
            connection: tenant.connection,
            active: true,
            created_at: now,
            updated_at: now,
        };
        tenants.insert(id, record.clone());
        Ok(record)
    }

    async fn update(&self, id: TenantId, update: &TenantUpdate) -> Result<Tenant, DirectoryError> {
        self.ensure_available()?;
        let update = update.clone().validated()?;

        let mut tenants = self.tenants.write();
        if let Some(domain) = &update.domain {
            if tenants.values().any(|t| t.id != id && &t.domain == domain) {
                return Err(DirectoryError::Conflict {
                    domain: domain.clone(),
                });
            }
        }

        let record = tenants
            .get_mut(&id)
            .ok_or(DirectoryError::NotFound { id })?;
        update.apply_to(record, Utc::now());
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use tenantry_core::ConnectionDescriptor;

    use super::*;

    fn new_tenant(name: &str, domain: &str) -> NewTenant {
        NewTenant {
            name: name.to_string(),
            domain: domain.to_string(),
            connection: ConnectionDescriptor::new(format!("memory://{name}")),
        }
    }

    #[tokio::test]
    async fn create_assigns_ids_and_normalizes_domain() {
        let dir = MemoryDirectory::new();
        let a = dir.create(new_tenant("acme", "ACME.example")).await.unwrap();
        let b = dir.create(new_tenant("globex", "globex.example")).await.unwrap();

        assert_eq!(a.id, TenantId(1));
        assert_eq!(b.id, TenantId(2));
        assert_eq!(a.domain, "acme.example");
        assert!(a.active);
    }

    #[tokio::test]
    async fn duplicate_domain_is_rejected_case_insensitively() {
        let dir = MemoryDirectory::new();
        dir.create(new_tenant("acme", "acme.example")).await.unwrap();

        let err = dir
            .create(new_tenant("other", "Acme.Example"))
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::Conflict { domain } if domain == "acme.example"));
    }

    #[tokio::test]
    async fn find_by_domain_matches_any_case_and_counts_lookups() {
        let dir = MemoryDirectory::new();
        dir.create(new_tenant("acme", "acme.example")).await.unwrap();

        let found = dir.find_by_domain("ACME.example").await.unwrap();
        assert_eq!(found.map(|t| t.name), Some("acme".to_string()));
        assert!(dir.find_by_domain("ghost.example").await.unwrap().is_none());
        assert_eq!(dir.domain_lookup_count(), 2);
    }

    #[tokio::test]
    async fn unavailable_directory_reports_transient_error() {
        let dir = MemoryDirectory::new();
        dir.set_available(false);

        let err = dir.find_by_domain("acme.example").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn update_rejects_domain_taken_by_another_tenant() {
        let dir = MemoryDirectory::new();
        dir.create(new_tenant("acme", "acme.example")).await.unwrap();
        let globex = dir.create(new_tenant("globex", "globex.example")).await.unwrap();

        let update = TenantUpdate {
            domain: Some("acme.example".to_string()),
            ..TenantUpdate::default()
        };
        let err = dir.update(globex.id, &update).await.unwrap_err();
        assert!(matches!(err, DirectoryError::Conflict { .. }));
    }

    #[tokio::test]
    async fn deactivated_tenants_are_hidden_from_active_listing() {
        let dir = MemoryDirectory::new();
        let acme = dir.create(new_tenant("acme", "acme.example")).await.unwrap();
        dir.create(new_tenant("globex", "globex.example")).await.unwrap();

        let update = TenantUpdate {
            active: Some(false),
            ..TenantUpdate::default()
        };
        let updated = dir.update(acme.id, &update).await.unwrap();
        assert!(!updated.active);

        assert_eq!(dir.list(false).await.unwrap().len(), 1);
        assert_eq!(dir.list(true).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn update_unknown_id_is_not_found() {
        let dir = MemoryDirectory::new();
        let err = dir
            .update(TenantId(99), &TenantUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::NotFound { id } if id == TenantId(99)));
    }
}
