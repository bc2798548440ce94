#![allow(dead_code)]

use std::io;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, Response};
use axum::Router;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tenantry_core::{ConnectionDescriptor, NewTenant, Tenant, TenantId};
use tenantry_server::datacontext::{HandleLedger, MemoryDataContextFactory};
use tenantry_server::directory::{DirectoryError, MemoryDirectory};
use tenantry_server::network::NetworkConfig;
use tenantry_server::service::TenancyConfig;
use tenantry_server::traits::{DataContextFactory, TenantDirectory, TenantResolver};
use tenantry_server::{NetworkModule, ResolveError};

pub const ADMIN_TOKEN: &str = "test-admin-token";

/// Server assembled over in-memory backends.
pub struct TestApp {
    pub module: NetworkModule,
    pub router: Router,
    pub directory: Arc<MemoryDirectory>,
    pub factory: Arc<MemoryDataContextFactory>,
    pub ledger: HandleLedger,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(TenancyConfig {
            admin_token: Some(ADMIN_TOKEN.to_string()),
            ..TenancyConfig::default()
        })
    }

    pub fn with_config(tenancy: TenancyConfig) -> Self {
        let ledger = HandleLedger::new();
        let directory = Arc::new(MemoryDirectory::new());
        let factory = Arc::new(MemoryDataContextFactory::new(
            tenancy.probe_timeout,
            ledger.clone(),
        ));
        let module = NetworkModule::new(
            NetworkConfig::default(),
            tenancy,
            Arc::clone(&directory) as Arc<dyn TenantDirectory>,
            Arc::clone(&factory) as Arc<dyn DataContextFactory>,
            ledger.clone(),
        );
        let router = module.build_router();
        Self {
            module,
            router,
            directory,
            factory,
            ledger,
        }
    }

    pub async fn add_tenant(&self, name: &str, domain: &str, connection: &str) -> Tenant {
        self.directory
            .create(NewTenant {
                name: name.to_string(),
                domain: domain.to_string(),
                connection: ConnectionDescriptor::new(connection),
            })
            .await
            .unwrap()
    }

    pub async fn send(&self, req: Request<Body>) -> Response<Body> {
        use tower::ServiceExt;
        self.router.clone().oneshot(req).await.unwrap()
    }
}

pub fn get(uri: &str, host: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::HOST, host)
        .body(Body::empty())
        .unwrap()
}

pub fn post_json(uri: &str, host: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::HOST, host)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn admin(method: &str, uri: &str, body: Option<&serde_json::Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {ADMIN_TOKEN}"));
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

/// In-memory sink for formatted log output.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }

    /// Routes this thread's `tracing` output into the buffer until the guard drops.
    pub fn capture(&self) -> tracing::subscriber::DefaultGuard {
        let sink = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || sink.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub const SETTLE: Duration = Duration::from_secs(2);

/// What [`StubResolver`] answers with.
#[derive(Clone)]
pub enum Scripted {
    Resolve(Arc<Tenant>),
    NotFound,
    Unavailable,
}

/// [`TenantResolver`] returning a scripted outcome and recording each host it is asked for.
pub struct StubResolver {
    outcome: Mutex<Scripted>,
    hosts: Mutex<Vec<String>>,
}

impl StubResolver {
    pub fn new(outcome: Scripted) -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(outcome),
            hosts: Mutex::new(Vec::new()),
        })
    }

    pub fn script(&self, outcome: Scripted) {
        *self.outcome.lock() = outcome;
    }

    /// Hosts passed to `resolve`, in call order.
    pub fn hosts(&self) -> Vec<String> {
        self.hosts.lock().clone()
    }
}

#[async_trait]
impl TenantResolver for StubResolver {
    async fn resolve(&self, host: &str) -> Result<Arc<Tenant>, ResolveError> {
        self.hosts.lock().push(host.to_string());
        let outcome = self.outcome.lock().clone();
        match outcome {
            Scripted::Resolve(tenant) => Ok(tenant),
            Scripted::NotFound => Err(ResolveError::NotFound {
                host: host.to_string(),
            }),
            Scripted::Unavailable => Err(ResolveError::DirectoryUnavailable(
                DirectoryError::Unavailable(anyhow::anyhow!("control plane connection refused")),
            )),
        }
    }

    fn invalidate(&self, _host: &str) {}
}

/// An active tenant record that never went through a directory.
pub fn tenant(id: i64, name: &str, connection: &str) -> Arc<Tenant> {
    let now = Utc::now();
    Arc::new(Tenant {
        id: TenantId(id),
        name: name.to_string(),
        domain: format!("{name}.example"),
        connection: ConnectionDescriptor::new(connection),
        active: true,
        created_at: now,
        updated_at: now,
    })
}
