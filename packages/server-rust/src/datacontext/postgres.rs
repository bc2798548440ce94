//! `PostgreSQL` tenant stores.
//!
//! One lazily connected `PgPool` is kept per distinct descriptor, keyed by
//! the descriptor fingerprint, until the descriptor is retired. Each [`DataContext`] checks out a dedicated
//! pooled connection, probed with `SELECT 1` before the handle is handed
//! out, and returns it to the pool on release.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{FromRow, PgPool, Postgres};
use tenantry_core::{ConnectionDescriptor, DescriptorError, DescriptorKind, NewToken, Token};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{ConnectionError, DataContext, DataContextError, HandleLedger};
use crate::traits::{DataContextFactory, TenantConnection};

/// Builds driver options from either descriptor syntax.
///
/// # Errors
///
/// Returns [`ConnectionError`] for malformed descriptors and for URL schemes
/// other than `postgres`/`postgresql`.
pub fn pg_connect_options(descriptor: &ConnectionDescriptor) -> Result<PgConnectOptions, ConnectionError> {
    match descriptor.parse() {
        Ok(DescriptorKind::Url { scheme, .. })
            if scheme.eq_ignore_ascii_case("postgres") || scheme.eq_ignore_ascii_case("postgresql") =>
        {
            PgConnectOptions::from_str(descriptor.expose()).map_err(|_| {
                ConnectionError::invalid(
                    descriptor,
                    DescriptorError::InvalidValue {
                        key: "url".to_string(),
                    },
                )
            })
        }
        Ok(DescriptorKind::Url { scheme, .. }) => Err(ConnectionError::Unsupported {
            descriptor: descriptor.masked(),
            scheme: scheme.to_string(),
        }),
        Ok(DescriptorKind::KeyValue(parts)) => {
            let mut options = PgConnectOptions::new();
            if let Some(host) = &parts.host {
                options = options.host(host);
            }
            if let Some(port) = parts.port {
                options = options.port(port);
            }
            if let Some(user) = &parts.user {
                options = options.username(user);
            }
            if let Some(password) = &parts.password {
                options = options.password(password);
            }
            if let Some(database) = &parts.database {
                options = options.database(database);
            }
            Ok(options)
        }
        Err(source) => Err(ConnectionError::invalid(descriptor, source)),
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().is_some_and(|code| code == "23505");
    }
    false
}

/// [`DataContextFactory`] for tenant stores living in `PostgreSQL`.
pub struct PgDataContextFactory {
    pools: DashMap<String, PgPool>,
    max_connections: u32,
    probe_timeout: Duration,
    ledger: HandleLedger,
}

impl PgDataContextFactory {
    #[must_use]
    pub fn new(max_connections: u32, probe_timeout: Duration, ledger: HandleLedger) -> Self {
        Self {
            pools: DashMap::new(),
            max_connections,
            probe_timeout,
            ledger,
        }
    }

    /// Number of distinct tenant pools created so far.
    #[must_use]
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    fn pool_for(&self, descriptor: &ConnectionDescriptor) -> Result<PgPool, ConnectionError> {
        let key = descriptor.fingerprint();
        if let Some(pool) = self.pools.get(&key) {
            return Ok(pool.clone());
        }

        let options = pg_connect_options(descriptor)?;
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.probe_timeout)
            .connect_lazy_with(options);
        debug!(descriptor = %descriptor.masked(), "created tenant pool");
        Ok(self.pools.entry(key).or_insert(pool).clone())
    }

    /// Removes the pool for `descriptor` and closes it in the background.
    /// Returns whether a pool was removed.
    pub fn evict(&self, descriptor: &ConnectionDescriptor) -> bool {
        let Some((_, pool)) = self.pools.remove(&descriptor.fingerprint()) else {
            return false;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(async move { pool.close().await });
            }
            Err(_) => warn!(descriptor = %descriptor.masked(), "no runtime to close retired tenant pool on"),
        }
        debug!(descriptor = %descriptor.masked(), "evicted tenant pool");
        true
    }

    /// Applies the tenant-store schema migrations to the store behind `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached or a migration fails.
    pub async fn migrate(&self, descriptor: &ConnectionDescriptor) -> anyhow::Result<()> {
        let pool = self.pool_for(descriptor)?;
        sqlx::migrate!("./migrations/tenant").run(&pool).await?;
        info!(descriptor = %descriptor.masked(), "tenant store migrated");
        Ok(())
    }

    async fn probe(pool: &PgPool) -> Result<PoolConnection<Postgres>, sqlx::Error> {
        let mut conn = pool.acquire().await?;
        sqlx::query("SELECT 1").execute(&mut *conn).await?;
        Ok(conn)
    }
}

#[async_trait]
impl DataContextFactory for PgDataContextFactory {
    async fn open(&self, descriptor: &ConnectionDescriptor) -> Result<DataContext, ConnectionError> {
        let result = match self.pool_for(descriptor) {
            Ok(pool) => match tokio::time::timeout(self.probe_timeout, Self::probe(&pool)).await {
                Ok(Ok(conn)) => Ok(conn),
                Ok(Err(e)) => Err(ConnectionError::unreachable(descriptor, e)),
                Err(_elapsed) => Err(ConnectionError::timeout(descriptor, self.probe_timeout)),
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(conn) => {
                let session = PgTenantConnection {
                    conn: Mutex::new(Some(conn)),
                };
                Ok(DataContext::new(Box::new(session), &self.ledger))
            }
            Err(err) => {
                error!(descriptor = %descriptor.masked(), error = %err, "tenant store probe failed");
                Err(err)
            }
        }
    }

    fn retire(&self, descriptor: &ConnectionDescriptor) {
        self.evict(descriptor);
    }
}

#[derive(Debug, FromRow)]
struct DbToken {
    id: i64,
    hash: String,
    data: String,
    creation_date: DateTime<Utc>,
}

impl From<DbToken> for Token {
    fn from(row: DbToken) -> Self {
        Self {
            id: row.id,
            hash: row.hash,
            data: row.data,
            creation_date: row.creation_date,
        }
    }
}

fn backend(err: sqlx::Error) -> DataContextError {
    DataContextError::Backend(err.into())
}

struct PgTenantConnection {
    conn: Mutex<Option<PoolConnection<Postgres>>>,
}

#[async_trait]
impl TenantConnection for PgTenantConnection {
    async fn list_tokens(&self) -> Result<Vec<Token>, DataContextError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(DataContextError::Released)?;
        let rows = sqlx::query_as::<_, DbToken>(
            "SELECT id, hash, data, creation_date FROM tokens ORDER BY id",
        )
        .fetch_all(&mut **conn)
        .await
        .map_err(backend)?;
        Ok(rows.into_iter().map(Token::from).collect())
    }

    async fn get_token(&self, id: i64) -> Result<Option<Token>, DataContextError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(DataContextError::Released)?;
        let row = sqlx::query_as::<_, DbToken>(
            "SELECT id, hash, data, creation_date FROM tokens WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut **conn)
        .await
        .map_err(backend)?;
        Ok(row.map(Token::from))
    }

    async fn insert_token(&self, token: NewToken) -> Result<Token, DataContextError> {
        let hash = token.hash();
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(DataContextError::Released)?;
        let inserted = sqlx::query_as::<_, DbToken>(
            "INSERT INTO tokens (hash, data, creation_date) VALUES ($1, $2, $3) \
             RETURNING id, hash, data, creation_date",
        )
        .bind(&hash)
        .bind(&token.data)
        .bind(Utc::now())
        .fetch_one(&mut **conn)
        .await;
        match inserted {
            Ok(row) => Ok(row.into()),
            Err(err) if is_unique_violation(&err) => Err(DataContextError::Conflict { hash }),
            Err(err) => Err(backend(err)),
        }
    }

    async fn delete_token(&self, id: i64) -> Result<bool, DataContextError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(DataContextError::Released)?;
        let result = sqlx::query("DELETE FROM tokens WHERE id = $1")
            .bind(id)
            .execute(&mut **conn)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn release(&self) -> anyhow::Result<()> {
        match self.conn.lock().await.take() {
            Some(conn) => {
                drop(conn);
                Ok(())
            }
            None => anyhow::bail!("pooled connection already returned"),
        }
    }
}
