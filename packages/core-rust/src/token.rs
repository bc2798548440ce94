//! Token resource stored in each tenant's isolated data store.
//!
//! The content hash is unique within one tenant store only; two tenants may
//! hold tokens with identical hashes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A stored token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub id: i64,
    /// Hex SHA-256 of `data`.
    pub hash: String,
    /// Opaque payload.
    pub data: String,
    pub creation_date: DateTime<Utc>,
}

/// Request body for creating a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewToken {
    pub data: String,
}

impl NewToken {
    /// Hash this payload would be stored under.
    #[must_use]
    pub fn hash(&self) -> String {
        content_hash(&self.data)
    }
}

/// Computes the content hash used for per-tenant deduplication.
///
/// ```
/// use tenantry_core::content_hash;
///
/// assert_eq!(
///     content_hash("hello"),
///     "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
/// );
/// ```
#[must_use]
pub fn content_hash(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}
