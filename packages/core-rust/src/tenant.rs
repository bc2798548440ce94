//! Tenant records and host-name normalization.
//!
//! A [`Tenant`] is an isolated customer with its own backing data store,
//! addressed by a unique routing domain. The record carries a private
//! [`ConnectionDescriptor`] and therefore does not implement `Serialize`;
//! anything that leaves the process goes through [`TenantSummary`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::descriptor::ConnectionDescriptor;

/// Numeric tenant identifier assigned by the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub i64);

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A tenant as stored in the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tenant {
    /// Directory-assigned identifier.
    pub id: TenantId,
    /// Human-readable name (e.g. `"acme"`).
    pub name: String,
    /// Routing domain, stored normalized (see [`normalize_host`]).
    pub domain: String,
    /// Private connection descriptor. Never exposed to clients.
    pub connection: ConnectionDescriptor,
    /// Soft-delete flag. Inactive tenants do not resolve.
    pub active: bool,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last modified.
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    /// Returns the client-safe projection of this tenant.
    #[must_use]
    pub fn summary(&self) -> TenantSummary {
        TenantSummary {
            id: self.id,
            name: self.name.clone(),
            domain: self.domain.clone(),
            active: self.active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Client-facing view of a tenant without its connection descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantSummary {
    pub id: TenantId,
    pub name: String,
    pub domain: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a tenant (seeding or the admin API).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTenant {
    pub name: String,
    pub domain: String,
    #[serde(alias = "connectionString")]
    pub connection: ConnectionDescriptor,
}

impl NewTenant {
    /// Returns a copy with the domain normalized.
    ///
    /// # Errors
    ///
    /// Returns [`TenantValidationError`] if the name or domain is blank.
    pub fn validated(mut self) -> Result<Self, TenantValidationError> {
        if self.name.trim().is_empty() {
            return Err(TenantValidationError::EmptyName);
        }
        self.domain = normalize_host(&self.domain).ok_or(TenantValidationError::EmptyDomain)?;
        self.name = self.name.trim().to_string();
        Ok(self)
    }
}

/// Partial update for an existing tenant. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantUpdate {
    pub name: Option<String>,
    pub domain: Option<String>,
    #[serde(alias = "connectionString")]
    pub connection: Option<ConnectionDescriptor>,
    pub active: Option<bool>,
}

impl TenantUpdate {
    /// Normalizes the domain (if present) and rejects blank values.
    ///
    /// # Errors
    ///
    /// Returns [`TenantValidationError`] if a provided name or domain is blank.
    pub fn validated(mut self) -> Result<Self, TenantValidationError> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(TenantValidationError::EmptyName);
            }
            self.name = Some(name.trim().to_string());
        }
        if let Some(domain) = &self.domain {
            self.domain = Some(normalize_host(domain).ok_or(TenantValidationError::EmptyDomain)?);
        }
        Ok(self)
    }

    /// Whether the update touches anything that affects host resolution.
    #[must_use]
    pub fn affects_routing(&self) -> bool {
        self.domain.is_some() || self.connection.is_some() || self.active.is_some()
    }

    /// Applies this update to `tenant` in place.
    pub fn apply_to(&self, tenant: &mut Tenant, now: DateTime<Utc>) {
        if let Some(name) = &self.name {
            tenant.name.clone_from(name);
        }
        if let Some(domain) = &self.domain {
            tenant.domain.clone_from(domain);
        }
        if let Some(connection) = &self.connection {
            tenant.connection = connection.clone();
        }
        if let Some(active) = self.active {
            tenant.active = active;
        }
        tenant.updated_at = now;
    }
}

/// Validation failures for tenant write shapes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TenantValidationError {
    #[error("tenant name must not be empty")]
    EmptyName,
    #[error("tenant domain must not be empty")]
    EmptyDomain,
}

/// Normalizes a host name into the key used for directory lookups and caching.
///
/// Trims surrounding whitespace, drops trailing `.` (fully-qualified form)
/// and lower-cases ASCII. Returns `None` when nothing is left.
///
/// ```
/// use tenantry_core::normalize_host;
///
/// assert_eq!(normalize_host("ACME.example").as_deref(), Some("acme.example"));
/// assert_eq!(normalize_host("acme.example.").as_deref(), Some("acme.example"));
/// assert_eq!(normalize_host("   "), None);
/// ```
#[must_use]
pub fn normalize_host(host: &str) -> Option<String> {
    let trimmed = host.trim();
    let trimmed = trimmed.trim_end_matches('.');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_ascii_lowercase())
    }
}
