//! Startup seeding of the tenant directory.
//!
//! Seeding is idempotent: a tenant whose domain already exists is skipped,
//! so the same seed file can be applied on every start.

use std::path::Path;

use anyhow::Context as _;
use tenantry_core::{normalize_host, ConnectionDescriptor, NewTenant};
use tracing::{info, warn};

use super::DirectoryError;
use crate::traits::TenantDirectory;

/// Outcome of [`seed_tenants`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedReport {
    pub created: usize,
    pub skipped: usize,
}

/// Inserts each tenant whose domain is not yet present in `directory`.
///
/// # Errors
///
/// Stops at the first directory error other than a domain conflict.
pub async fn seed_tenants(
    directory: &dyn TenantDirectory,
    tenants: Vec<NewTenant>,
) -> Result<SeedReport, DirectoryError> {
    let mut report = SeedReport::default();

    for tenant in tenants {
        let domain = normalize_host(&tenant.domain).unwrap_or_default();
        if directory.find_by_domain(&domain).await?.is_some() {
            report.skipped += 1;
            continue;
        }

        match directory.create(tenant).await {
            Ok(created) => {
                info!(tenant = %created.name, domain = %created.domain, "seeded tenant");
                report.created += 1;
            }
            Err(DirectoryError::Conflict { domain }) => {
                warn!(%domain, "seed skipped, domain taken concurrently");
                report.skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(report)
}

/// Reads a JSON array of tenants (`name`, `domain`, `connection`).
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not valid JSON.
pub fn load_seed_file(path: &Path) -> anyhow::Result<Vec<NewTenant>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading seed file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing seed file {}", path.display()))
}

/// Two demo tenants served from in-memory stores on `localhost` and
/// `localhost2`.
#[must_use]
pub fn demo_tenants() -> Vec<NewTenant> {
    vec![
        NewTenant {
            name: "ssprintl".to_string(),
            domain: "localhost".to_string(),
            connection: ConnectionDescriptor::new("memory://ssprintl"),
        },
        NewTenant {
            name: "infisquare".to_string(),
            domain: "localhost2".to_string(),
            connection: ConnectionDescriptor::new("memory://infisquare"),
        },
    ]
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::directory::MemoryDirectory;

    #[tokio::test]
    async fn seeding_twice_creates_each_tenant_once() {
        let dir = MemoryDirectory::new();

        let first = seed_tenants(&dir, demo_tenants()).await.unwrap();
        assert_eq!(first, SeedReport { created: 2, skipped: 0 });

        let second = seed_tenants(&dir, demo_tenants()).await.unwrap();
        assert_eq!(second, SeedReport { created: 0, skipped: 2 });
        assert_eq!(dir.list(true).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn seeding_skips_domains_that_differ_only_in_case() {
        let dir = MemoryDirectory::new();
        seed_tenants(&dir, demo_tenants()).await.unwrap();

        let shouty = vec![NewTenant {
            name: "copy".to_string(),
            domain: "LOCALHOST".to_string(),
            connection: ConnectionDescriptor::new("memory://copy"),
        }];
        let report = seed_tenants(&dir, shouty).await.unwrap();
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn seeding_fails_when_directory_is_down() {
        let dir = MemoryDirectory::new();
        dir.set_available(false);
        let err = seed_tenants(&dir, demo_tenants()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn load_seed_file_reads_connection_string_alias() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"name":"acme","domain":"acme.example","connectionString":"server=db;user=root;password=pw;database=acme;"}}]"#
        )
        .unwrap();

        let tenants = load_seed_file(file.path()).unwrap();
        assert_eq!(tenants.len(), 1);
        assert_eq!(tenants[0].domain, "acme.example");
        assert_eq!(tenants[0].connection.masked(), "server=db;user=root;password=***;database=acme;");
    }

    #[test]
    fn load_seed_file_reports_missing_file() {
        let err = load_seed_file(Path::new("/nonexistent/seed.json")).unwrap_err();
        assert!(err.to_string().contains("seed file"));
    }
}
