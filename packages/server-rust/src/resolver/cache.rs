//! Concurrent TTL cache of resolved tenants keyed by normalized host.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tenantry_core::Tenant;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry {
    tenant: Arc<Tenant>,
    expires_at: Instant,
}

/// Normalized host -> tenant, each entry living for a fixed TTL.
///
/// Expired entries are never returned. They are dropped lazily on lookup
/// and in bulk by [`TenantCache::purge_expired`].
///
/// Every invalidation bumps a generation counter. A resolver captures the
/// generation before its directory lookup and stores the result with
/// [`TenantCache::insert_if_current`], so a lookup that raced an
/// invalidation cannot put the superseded record back.
#[derive(Debug)]
pub struct TenantCache {
    entries: DashMap<String, CacheEntry>,
    generation: AtomicU64,
    ttl: Duration,
}

impl TenantCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            generation: AtomicU64::new(0),
            ttl,
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the live entry for `key`, if any.
    pub fn get(&self, key: &str) -> Option<Arc<Tenant>> {
        let now = Instant::now();
        {
            let entry = self.entries.get(key)?;
            if entry.expires_at > now {
                return Some(Arc::clone(&entry.tenant));
            }
        }
        // The read guard is gone; removing under it would deadlock the shard.
        self.entries.remove_if(key, |_, e| e.expires_at <= now);
        None
    }

    pub fn insert(&self, key: String, tenant: Arc<Tenant>) {
        let expires_at = Instant::now() + self.ttl;
        self.entries.insert(key, CacheEntry { tenant, expires_at });
    }

    /// Current invalidation generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Inserts only if no invalidation happened since `seen` was read from
    /// [`TenantCache::generation`]. Returns whether the entry was stored.
    pub fn insert_if_current(&self, key: String, tenant: Arc<Tenant>, seen: u64) -> bool {
        // The shard stays locked until the entry is written, so an
        // invalidation either bumps first (we skip) or removes after us.
        let entry = self.entries.entry(key);
        if self.generation() != seen {
            return false;
        }
        let expires_at = Instant::now() + self.ttl;
        match entry {
            Entry::Occupied(mut e) => {
                e.insert(CacheEntry { tenant, expires_at });
            }
            Entry::Vacant(e) => {
                e.insert(CacheEntry { tenant, expires_at });
            }
        }
        true
    }

    /// Returns `true` if an entry was removed.
    pub fn invalidate(&self, key: &str) -> bool {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.remove(key).is_some()
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.clear();
    }

    /// Number of stored entries, including expired ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tenantry_core::{ConnectionDescriptor, TenantId};

    use super::*;

    fn tenant(name: &str) -> Arc<Tenant> {
        let now = Utc::now();
        Arc::new(Tenant {
            id: TenantId(1),
            name: name.to_string(),
            domain: format!("{name}.example"),
            connection: ConnectionDescriptor::new(format!("memory://{name}")),
            active: true,
            created_at: now,
            updated_at: now,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = TenantCache::new(Duration::from_secs(60));
        cache.insert("acme.example".into(), tenant("acme"));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get("acme.example").is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("acme.example").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_removes_only_expired_entries() {
        let cache = TenantCache::new(Duration::from_secs(60));
        cache.insert("old.example".into(), tenant("old"));
        tokio::time::advance(Duration::from_secs(30)).await;
        cache.insert("new.example".into(), tenant("new"));
        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("new.example").is_some());
    }

    #[tokio::test]
    async fn invalidate_is_idempotent() {
        let cache = TenantCache::new(Duration::from_secs(60));
        cache.insert("acme.example".into(), tenant("acme"));

        assert!(cache.invalidate("acme.example"));
        assert!(!cache.invalidate("acme.example"));
        assert!(cache.get("acme.example").is_none());
    }

    #[tokio::test]
    async fn insert_after_invalidation_is_skipped() {
        let cache = TenantCache::new(Duration::from_secs(60));
        let seen = cache.generation();

        cache.invalidate("acme.example");

        assert!(!cache.insert_if_current("acme.example".into(), tenant("acme"), seen));
        assert!(cache.get("acme.example").is_none());

        let fresh = cache.generation();
        assert!(cache.insert_if_current("acme.example".into(), tenant("acme"), fresh));
        assert!(cache.get("acme.example").is_some());
    }

    #[tokio::test]
    async fn clear_also_bumps_generation() {
        let cache = TenantCache::new(Duration::from_secs(60));
        let seen = cache.generation();
        cache.clear();
        assert!(!cache.insert_if_current("acme.example".into(), tenant("acme"), seen));
    }

    #[tokio::test]
    async fn reinsert_replaces_entry() {
        let cache = TenantCache::new(Duration::from_secs(60));
        cache.insert("acme.example".into(), tenant("acme"));
        cache.insert("acme.example".into(), tenant("acme-renamed"));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("acme.example").unwrap().name, "acme-renamed");
    }
}
