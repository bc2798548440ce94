//! `PostgreSQL` tenant directory.
//!
//! The `tenants` table is the authoritative catalog. Domains are stored
//! lower-cased and a unique index on `lower(domain)` backs the uniqueness
//! invariant, so concurrent creates cannot slip past each other.
//! The directory URL may carry credentials and is never logged unmasked.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use tenantry_core::{
    normalize_host, ConnectionDescriptor, NewTenant, Tenant, TenantId, TenantUpdate,
};
use tracing::info;

use super::DirectoryError;
use crate::datacontext::pg_connect_options;
use crate::traits::TenantDirectory;

#[derive(Debug, Clone, FromRow)]
struct DbTenant {
    id: i64,
    name: String,
    domain: String,
    connection_string: String,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<DbTenant> for Tenant {
    fn from(row: DbTenant) -> Self {
        Self {
            id: TenantId(row.id),
            name: row.name,
            domain: row.domain,
            connection: ConnectionDescriptor::new(row.connection_string),
            active: row.active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const SELECT_TENANT: &str =
    "SELECT id, name, domain, connection_string, active, created_at, updated_at FROM tenants";

fn classify(err: sqlx::Error) -> DirectoryError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => DirectoryError::Unavailable(err.into()),
        other => DirectoryError::Backend(other.into()),
    }
}

/// Durable tenant directory backed by `PostgreSQL`.
#[derive(Debug, Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    /// Connects to the control-plane database and applies its migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor is invalid, the database cannot be
    /// reached, or a migration fails.
    pub async fn connect(
        url: &ConnectionDescriptor,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let options = pg_connect_options(url)?;
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations/control").run(&pool).await?;
        info!(database = %url.masked(), "tenant directory ready");

        Ok(Self { pool })
    }

    /// Wraps an existing pool. The schema is assumed to be in place.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantDirectory for PgDirectory {
    async fn find_by_domain(&self, domain: &str) -> Result<Option<Tenant>, DirectoryError> {
        let Some(key) = normalize_host(domain) else {
            return Ok(None);
        };
        let row = sqlx::query_as::<_, DbTenant>(&format!(
            "{SELECT_TENANT} WHERE lower(domain) = $1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;
        Ok(row.map(Tenant::from))
    }

    async fn get(&self, id: TenantId) -> Result<Option<Tenant>, DirectoryError> {
        let row = sqlx::query_as::<_, DbTenant>(&format!("{SELECT_TENANT} WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;
        Ok(row.map(Tenant::from))
    }

    async fn list(&self, include_inactive: bool) -> Result<Vec<Tenant>, DirectoryError> {
        let rows = sqlx::query_as::<_, DbTenant>(&format!(
            "{SELECT_TENANT} WHERE active OR $1 ORDER BY id"
        ))
        .bind(include_inactive)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;
        Ok(rows.into_iter().map(Tenant::from).collect())
    }

    async fn create(&self, tenant: NewTenant) -> Result<Tenant, DirectoryError> {
        let tenant = tenant.validated()?;
        let now = Utc::now();
        let inserted = sqlx::query_as::<_, DbTenant>(
            "INSERT INTO tenants (name, domain, connection_string, active, created_at, updated_at) \
             VALUES ($1, $2, $3, TRUE, $4, $4) \
             RETURNING id, name, domain, connection_string, active, created_at, updated_at",
        )
        .bind(&tenant.name)
        .bind(&tenant.domain)
        .bind(tenant.connection.expose())
        .bind(now)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(row) => Ok(row.into()),
            Err(err) if crate::datacontext::is_unique_violation(&err) => {
                Err(DirectoryError::Conflict {
                    domain: tenant.domain,
                })
            }
            Err(err) => Err(classify(err)),
        }
    }

    async fn update(&self, id: TenantId, update: &TenantUpdate) -> Result<Tenant, DirectoryError> {
        let update = update.clone().validated()?;
        let mut tx = self.pool.begin().await.map_err(classify)?;

        let current = sqlx::query_as::<_, DbTenant>(&format!(
            "{SELECT_TENANT} WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(classify)?;
        let mut tenant = Tenant::from(current.ok_or(DirectoryError::NotFound { id })?);
        update.apply_to(&mut tenant, Utc::now());

        let written = sqlx::query(
            "UPDATE tenants SET name = $2, domain = $3, connection_string = $4, active = $5, \
             updated_at = $6 WHERE id = $1",
        )
        .bind(id.0)
        .bind(&tenant.name)
        .bind(&tenant.domain)
        .bind(tenant.connection.expose())
        .bind(tenant.active)
        .bind(tenant.updated_at)
        .execute(&mut *tx)
        .await;

        match written {
            Ok(_) => {}
            Err(err) if crate::datacontext::is_unique_violation(&err) => {
                return Err(DirectoryError::Conflict {
                    domain: tenant.domain,
                });
            }
            Err(err) => return Err(classify(err)),
        }

        tx.commit().await.map_err(classify)?;
        Ok(tenant)
    }
}
