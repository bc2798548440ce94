//! In-memory tenant stores addressed by `memory://<store>` descriptors.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use tenantry_core::{ConnectionDescriptor, DescriptorError, DescriptorKind, NewToken, Token};
use tracing::{debug, error};

use super::{ConnectionError, DataContext, DataContextError, HandleLedger};
use crate::traits::{DataContextFactory, TenantConnection};

/// Descriptor scheme served by [`MemoryDataContextFactory`].
pub const MEMORY_SCHEME: &str = "memory";

/// Token table of one in-memory tenant store.
#[derive(Debug)]
pub struct MemoryTenantStore {
    tokens: Mutex<BTreeMap<i64, Token>>,
    next_id: AtomicI64,
}

impl MemoryTenantStore {
    fn new() -> Self {
        Self {
            tokens: Mutex::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }

    fn insert(&self, token: &NewToken) -> Result<Token, DataContextError> {
        let hash = token.hash();
        let mut tokens = self.tokens.lock();
        if tokens.values().any(|t| t.hash == hash) {
            return Err(DataContextError::Conflict { hash });
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let stored = Token {
            id,
            hash,
            data: token.data.clone(),
            creation_date: Utc::now(),
        };
        tokens.insert(id, stored.clone());
        Ok(stored)
    }
}

#[derive(Debug, Default)]
struct Counters {
    opens: AtomicU64,
    releases: AtomicU64,
    fail_release: AtomicBool,
}

/// [`DataContextFactory`] over process-local stores.
///
/// Stores are created on first use. Individual stores can be marked
/// unreachable and the liveness probe can be slowed down, which makes the
/// failure paths of request binding reproducible without a database.
pub struct MemoryDataContextFactory {
    stores: DashMap<String, Arc<MemoryTenantStore>>,
    unreachable: DashSet<String>,
    probe_delay: Mutex<Duration>,
    probe_timeout: Duration,
    counters: Arc<Counters>,
    retired: Mutex<Vec<String>>,
    ledger: HandleLedger,
}

impl MemoryDataContextFactory {
    #[must_use]
    pub fn new(probe_timeout: Duration, ledger: HandleLedger) -> Self {
        Self {
            stores: DashMap::new(),
            unreachable: DashSet::new(),
            probe_delay: Mutex::new(Duration::ZERO),
            probe_timeout,
            counters: Arc::new(Counters::default()),
            retired: Mutex::new(Vec::new()),
            ledger,
        }
    }

    /// Returns the store named `name`, creating it if needed.
    pub fn store(&self, name: &str) -> Arc<MemoryTenantStore> {
        Arc::clone(
            self.stores
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(MemoryTenantStore::new()))
                .value(),
        )
    }

    pub fn set_reachable(&self, name: &str, reachable: bool) {
        if reachable {
            self.unreachable.remove(name);
        } else {
            self.unreachable.insert(name.to_string());
        }
    }

    /// Delay applied to every liveness probe.
    pub fn set_probe_delay(&self, delay: Duration) {
        *self.probe_delay.lock() = delay;
    }

    /// Makes every subsequent backend release report an error.
    pub fn set_release_failure(&self, fail: bool) {
        self.counters.fail_release.store(fail, Ordering::SeqCst);
    }

    #[must_use]
    pub fn open_count(&self) -> u64 {
        self.counters.opens.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn release_count(&self) -> u64 {
        self.counters.releases.load(Ordering::SeqCst)
    }

    /// Masked descriptors passed to `retire`, oldest first. Stores keep
    /// their data when retired.
    #[must_use]
    pub fn retired(&self) -> Vec<String> {
        self.retired.lock().clone()
    }

    #[must_use]
    pub fn ledger(&self) -> &HandleLedger {
        &self.ledger
    }

    fn store_name(descriptor: &ConnectionDescriptor) -> Result<String, ConnectionError> {
        match descriptor.parse() {
            Ok(DescriptorKind::Url { scheme, rest }) if scheme.eq_ignore_ascii_case(MEMORY_SCHEME) => {
                // Credentials in `memory://user:pw@store` are accepted and ignored.
                let name = rest
                    .rsplit_once('@')
                    .map_or(rest, |(_, store)| store)
                    .trim_end_matches('/');
                if name.is_empty() {
                    Err(ConnectionError::invalid(
                        descriptor,
                        DescriptorError::InvalidValue {
                            key: "store".to_string(),
                        },
                    ))
                } else {
                    Ok(name.to_ascii_lowercase())
                }
            }
            Ok(DescriptorKind::Url { scheme, .. }) => Err(ConnectionError::Unsupported {
                descriptor: descriptor.masked(),
                scheme: scheme.to_string(),
            }),
            Ok(DescriptorKind::KeyValue(_)) => Err(ConnectionError::Unsupported {
                descriptor: descriptor.masked(),
                scheme: "key/value".to_string(),
            }),
            Err(source) => Err(ConnectionError::invalid(descriptor, source)),
        }
    }

    async fn probe(&self, name: &str) -> Result<(), String> {
        let delay = *self.probe_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.unreachable.contains(name) {
            Err(format!("store `{name}` refused the connection"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DataContextFactory for MemoryDataContextFactory {
    async fn open(&self, descriptor: &ConnectionDescriptor) -> Result<DataContext, ConnectionError> {
        let name = Self::store_name(descriptor)?;

        let probed = tokio::time::timeout(self.probe_timeout, self.probe(&name)).await;
        let err = match probed {
            Ok(Ok(())) => None,
            Ok(Err(reason)) => Some(ConnectionError::unreachable(descriptor, reason)),
            Err(_elapsed) => Some(ConnectionError::timeout(descriptor, self.probe_timeout)),
        };
        if let Some(err) = err {
            error!(descriptor = %descriptor.masked(), error = %err, "tenant store probe failed");
            return Err(err);
        }

        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        let conn = MemoryConnection {
            store: self.store(&name),
            counters: Arc::clone(&self.counters),
        };
        let ctx = DataContext::new(Box::new(conn), &self.ledger);
        debug!(handle = %ctx.id(), store = %name, "opened in-memory data context");
        Ok(ctx)
    }

    fn retire(&self, descriptor: &ConnectionDescriptor) {
        self.retired.lock().push(descriptor.masked());
    }
}

struct MemoryConnection {
    store: Arc<MemoryTenantStore>,
    counters: Arc<Counters>,
}

#[async_trait]
impl TenantConnection for MemoryConnection {
    async fn list_tokens(&self) -> Result<Vec<Token>, DataContextError> {
        Ok(self.store.tokens.lock().values().cloned().collect())
    }

    async fn get_token(&self, id: i64) -> Result<Option<Token>, DataContextError> {
        Ok(self.store.tokens.lock().get(&id).cloned())
    }

    async fn insert_token(&self, token: NewToken) -> Result<Token, DataContextError> {
        self.store.insert(&token)
    }

    async fn delete_token(&self, id: i64) -> Result<bool, DataContextError> {
        Ok(self.store.tokens.lock().remove(&id).is_some())
    }

    async fn release(&self) -> anyhow::Result<()> {
        self.counters.releases.fetch_add(1, Ordering::SeqCst);
        if self.counters.fail_release.load(Ordering::SeqCst) {
            anyhow::bail!("in-memory session already torn down");
        }
        Ok(())
    }
}
