//! `tenantry` server binary.
//!
//! Without `--database-url` the server runs entirely in memory with two demo
//! tenants (`localhost`, `localhost2`). With it, the tenant directory lives
//! in `PostgreSQL` and each tenant's descriptor points at its own database.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use metrics_exporter_prometheus::PrometheusBuilder;
use tenantry_server::datacontext::{HandleLedger, MemoryDataContextFactory};
use tenantry_server::directory::seed::{demo_tenants, load_seed_file, seed_tenants};
use tenantry_server::directory::MemoryDirectory;
use tenantry_server::network::{NetworkConfig, TlsConfig};
use tenantry_server::service::TenancyConfig;
use tenantry_server::traits::{DataContextFactory, TenantDirectory};
use tenantry_server::NetworkModule;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "tenantry", version, about = "Host-routed multi-tenant HTTP server")]
struct Args {
    #[arg(long, env = "TENANTRY_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "TENANTRY_PORT", default_value_t = 8080)]
    port: u16,

    /// Control-plane database holding the tenant directory. In-memory
    /// directory with demo tenants when omitted.
    #[arg(long, env = "TENANTRY_DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    #[arg(long, env = "TENANTRY_LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Serve Prometheus metrics on this address.
    #[arg(long, env = "TENANTRY_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,

    #[arg(long, env = "TENANTRY_CACHE_TTL_SECS", default_value_t = 1800)]
    cache_ttl_secs: u64,

    #[arg(long, env = "TENANTRY_LOOKUP_TIMEOUT_MS", default_value_t = 5000)]
    lookup_timeout_ms: u64,

    #[arg(long, env = "TENANTRY_PROBE_TIMEOUT_MS", default_value_t = 5000)]
    probe_timeout_ms: u64,

    #[arg(long, env = "TENANTRY_SWEEP_INTERVAL_SECS", default_value_t = 60)]
    sweep_interval_secs: u64,

    #[arg(long, env = "TENANTRY_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    request_timeout_secs: u64,

    #[arg(long, env = "TENANTRY_MAX_CONNECTIONS_PER_TENANT", default_value_t = 10)]
    max_connections_per_tenant: u32,

    /// Enables the admin API, guarded by this bearer token.
    #[arg(long, env = "TENANTRY_ADMIN_TOKEN", hide_env_values = true)]
    admin_token: Option<String>,

    /// JSON array of tenants to insert at startup (existing domains are skipped).
    #[arg(long, env = "TENANTRY_SEED_FILE")]
    seed_file: Option<PathBuf>,

    /// Apply tenant-store migrations to every active tenant at startup.
    #[arg(long, env = "TENANTRY_MIGRATE_TENANTS")]
    migrate_tenants: bool,

    /// Comma-separated allowed CORS origins.
    #[arg(long, env = "TENANTRY_CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    cors_origins: Vec<String>,

    #[arg(long, env = "TENANTRY_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    #[arg(long, env = "TENANTRY_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,
}

impl Args {
    fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            tls: TlsConfig::from_paths(self.tls_cert.clone(), self.tls_key.clone()),
            cors_origins: self.cors_origins.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            ..NetworkConfig::default()
        }
    }

    fn tenancy_config(&self) -> TenancyConfig {
        TenancyConfig {
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            lookup_timeout: Duration::from_millis(self.lookup_timeout_ms),
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            max_connections_per_tenant: self.max_connections_per_tenant,
            admin_token: self.admin_token.clone(),
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
    }
}

struct Backends {
    directory: Arc<dyn TenantDirectory>,
    factory: Arc<dyn DataContextFactory>,
}

fn memory_backends(tenancy: &TenancyConfig, ledger: &HandleLedger) -> Backends {
    Backends {
        directory: Arc::new(MemoryDirectory::new()),
        factory: Arc::new(MemoryDataContextFactory::new(
            tenancy.probe_timeout,
            ledger.clone(),
        )),
    }
}

#[cfg(feature = "postgres")]
async fn postgres_backends(
    url: &str,
    tenancy: &TenancyConfig,
    ledger: &HandleLedger,
    migrate_tenants: bool,
) -> anyhow::Result<Backends> {
    use tenantry_core::ConnectionDescriptor;
    use tenantry_server::datacontext::PgDataContextFactory;
    use tenantry_server::directory::PgDirectory;

    let directory = PgDirectory::connect(
        &ConnectionDescriptor::new(url),
        tenancy.max_connections_per_tenant,
        tenancy.lookup_timeout,
    )
    .await
    .context("connecting to tenant directory")?;

    let factory = PgDataContextFactory::new(
        tenancy.max_connections_per_tenant,
        tenancy.probe_timeout,
        ledger.clone(),
    );

    if migrate_tenants {
        for tenant in directory.list(false).await? {
            if let Err(e) = factory.migrate(&tenant.connection).await {
                warn!(tenant = %tenant.name, error = %e, "tenant store migration failed");
            }
        }
    }

    Ok(Backends {
        directory: Arc::new(directory),
        factory: Arc::new(factory),
    })
}

#[cfg(not(feature = "postgres"))]
async fn postgres_backends(
    _url: &str,
    _tenancy: &TenancyConfig,
    _ledger: &HandleLedger,
    _migrate_tenants: bool,
) -> anyhow::Result<Backends> {
    anyhow::bail!("--database-url requires the `postgres` feature")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    if let Some(addr) = args.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("installing Prometheus exporter")?;
        info!(%addr, "metrics exporter listening");
    }

    let network = args.network_config();
    let tenancy = args.tenancy_config();
    let ledger = HandleLedger::new();

    let backends = match args.database_url.as_deref() {
        Some(url) => postgres_backends(url, &tenancy, &ledger, args.migrate_tenants).await?,
        None => {
            if args.migrate_tenants {
                warn!("--migrate-tenants ignored without --database-url");
            }
            let backends = memory_backends(&tenancy, &ledger);
            if args.seed_file.is_none() {
                let report = seed_tenants(backends.directory.as_ref(), demo_tenants()).await?;
                info!(created = report.created, "in-memory directory seeded with demo tenants");
            }
            backends
        }
    };

    if let Some(path) = &args.seed_file {
        let tenants = load_seed_file(path)?;
        let report = seed_tenants(backends.directory.as_ref(), tenants).await?;
        info!(created = report.created, skipped = report.skipped, "seed file applied");
    }

    let mut module = NetworkModule::new(
        network,
        tenancy,
        backends.directory,
        backends.factory,
        ledger,
    );
    let port = module.start().await?;
    info!(port, "tenantry listening");

    module.serve(shutdown_signal()).await
}
