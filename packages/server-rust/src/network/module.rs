//! Network module with deferred startup lifecycle.
//!
//! `new()` wires the tenancy components together, `start()` binds the TCP
//! listener, and `serve()` accepts connections until shutdown, then drains
//! open tenant data contexts.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::binding::TenantBindingLayer;
use super::config::{NetworkConfig, TlsConfig};
use super::handlers::admin;
use super::handlers::{
    create_token, current_tenant, delete_token, get_token, health_handler, list_tokens,
    liveness_handler, readiness_handler, tenant_health_handler, AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::Lifecycle;
use crate::datacontext::HandleLedger;
use crate::resolver::{CachingTenantResolver, TenantCache};
use crate::service::{BackgroundWorker, CacheSweeper, TenancyConfig, TenantService};
use crate::traits::{DataContextFactory, TenantDirectory, TenantResolver};

/// Owns the HTTP server and the request-path tenancy components.
///
/// Follows the deferred startup pattern:
/// 1. `new()` -- builds cache, resolver, tenant service and lifecycle
/// 2. `start()` -- binds the TCP listener to the configured address
/// 3. `serve()` -- accepts connections until shutdown is signalled
pub struct NetworkModule {
    config: NetworkConfig,
    tenancy: TenancyConfig,
    listener: Option<TcpListener>,
    lifecycle: Arc<Lifecycle>,
    cache: Arc<TenantCache>,
    resolver: Arc<CachingTenantResolver>,
    factory: Arc<dyn DataContextFactory>,
    tenants: Arc<TenantService>,
}

impl NetworkModule {
    /// `ledger` must be the ledger `factory` records its handles in.
    #[must_use]
    pub fn new(
        config: NetworkConfig,
        tenancy: TenancyConfig,
        directory: Arc<dyn TenantDirectory>,
        factory: Arc<dyn DataContextFactory>,
        ledger: HandleLedger,
    ) -> Self {
        let cache = Arc::new(TenantCache::new(tenancy.cache_ttl));
        let resolver = Arc::new(CachingTenantResolver::new(
            Arc::clone(&directory),
            Arc::clone(&cache),
            tenancy.lookup_timeout,
        ));
        let tenants = Arc::new(TenantService::new(
            directory,
            Arc::clone(&resolver) as Arc<dyn TenantResolver>,
            Arc::clone(&factory),
        ));

        Self {
            config,
            tenancy,
            listener: None,
            lifecycle: Arc::new(Lifecycle::new(ledger)),
            cache,
            resolver,
            factory,
            tenants,
        }
    }

    #[must_use]
    pub fn lifecycle(&self) -> Arc<Lifecycle> {
        Arc::clone(&self.lifecycle)
    }

    #[must_use]
    pub fn cache(&self) -> Arc<TenantCache> {
        Arc::clone(&self.cache)
    }

    #[must_use]
    pub fn resolver(&self) -> Arc<dyn TenantResolver> {
        Arc::clone(&self.resolver) as Arc<dyn TenantResolver>
    }

    #[must_use]
    pub fn tenants(&self) -> Arc<TenantService> {
        Arc::clone(&self.tenants)
    }

    /// Assembles the axum router.
    ///
    /// Unbound routes:
    /// - `GET /health`, `/health/live`, `/health/ready`, `/health/tenants`
    /// - `/admin/tenants...` (only with an admin token configured)
    ///
    /// Tenant-bound routes (host resolved, data context bound):
    /// - `GET|POST /tokens`, `GET|DELETE /tokens/{id}`
    /// - `GET /test-muilti-tenant` (legacy alias of `GET /tokens`)
    /// - `GET /tenant`
    pub fn build_router(&self) -> Router {
        let state = AppState {
            lifecycle: Arc::clone(&self.lifecycle),
            cache: Arc::clone(&self.cache),
            tenants: Arc::clone(&self.tenants),
            admin_token: self.tenancy.admin_token.as_deref().map(Arc::from),
            start_time: Instant::now(),
        };

        let binding = TenantBindingLayer::new(
            Arc::clone(&self.resolver) as Arc<dyn TenantResolver>,
            Arc::clone(&self.factory),
        );

        let tenant_routes = Router::new()
            .route("/tokens", get(list_tokens).post(create_token))
            .route("/tokens/{id}", get(get_token).delete(delete_token))
            .route("/test-muilti-tenant", get(list_tokens))
            .route("/tenant", get(current_tenant))
            .route_layer(binding);

        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .route("/health/tenants", get(tenant_health_handler))
            .merge(tenant_routes);

        if state.admin_token.is_some() {
            let admin_routes = Router::new()
                .route(
                    "/admin/tenants",
                    get(admin::list_tenants).post(admin::create_tenant),
                )
                .route(
                    "/admin/tenants/{id}",
                    get(admin::get_tenant)
                        .put(admin::update_tenant)
                        .delete(admin::deactivate_tenant),
                )
                .route("/admin/tenants/{id}/probe", post(admin::probe_tenant))
                .route_layer(middleware::from_fn_with_state(
                    state.clone(),
                    admin::require_admin,
                ));
            router = router.merge(admin_routes);
        }

        router
            .layer(build_http_layers(&self.config))
            .with_state(state)
    }

    /// Binds the TCP listener and returns the bound port (useful with port 0).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let port = listener.local_addr()?.port();

        info!("TCP listener bound to {}:{}", self.config.host, port);

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves.
    ///
    /// When the signal fires the lifecycle moves to Draining (readiness
    /// starts failing), in-flight requests finish, then shutdown waits up to
    /// `drain_timeout` for every open data context to be released.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first or the server hits
    /// a fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let Some(listener) = self.listener.take() else {
            anyhow::bail!("start() must be called before serve()");
        };
        let router = self.build_router();

        let mut sweeper = BackgroundWorker::start(
            CacheSweeper::new(Arc::clone(&self.cache)),
            self.tenancy.sweep_interval,
        );

        let lifecycle = Arc::clone(&self.lifecycle);
        let signal = async move {
            shutdown.await;
            lifecycle.trigger_shutdown();
        };

        self.lifecycle.set_ready();

        let served = match self.config.tls.clone() {
            Some(tls) => serve_tls(listener, router, &tls, signal).await,
            None => serve_plain(listener, router, signal).await,
        };

        sweeper.stop().await;
        self.drain().await;
        served
    }

    async fn drain(&self) {
        self.lifecycle.trigger_shutdown();

        let open = self.lifecycle.ledger().open_count();
        if open > 0 {
            info!(open, "waiting for tenant data contexts to be released");
        }
        if self.lifecycle.wait_for_drain(self.config.drain_timeout).await {
            info!("all tenant data contexts released");
        } else {
            warn!(
                open = self.lifecycle.ledger().open_count(),
                "drain timeout expired with tenant data contexts still open"
            );
        }
    }
}

async fn serve_plain(
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!("Serving plain HTTP connections");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Serves TLS connections using `axum-server` with rustls, reusing the
/// pre-bound listener.
async fn serve_tls(
    listener: TcpListener,
    router: Router,
    tls_config: &TlsConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    let rustls_config = RustlsConfig::from_pem_file(&tls_config.cert_path, &tls_config.key_path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load TLS certificates: {e}"))?;

    let addr = listener.local_addr()?;
    let std_listener = listener.into_std()?;
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();

    tokio::spawn(async move {
        shutdown.await;
        shutdown_handle.graceful_shutdown(None);
    });

    info!("Serving TLS connections on {}", addr);

    axum_server::from_tcp_rustls(std_listener, rustls_config)
        .handle(handle)
        .serve(router.into_make_service())
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::datacontext::MemoryDataContextFactory;
    use crate::directory::MemoryDirectory;

    fn module(tenancy: TenancyConfig) -> NetworkModule {
        let ledger = HandleLedger::new();
        let factory = Arc::new(MemoryDataContextFactory::new(
            Duration::from_secs(5),
            ledger.clone(),
        ));
        NetworkModule::new(
            NetworkConfig::default(),
            tenancy,
            Arc::new(MemoryDirectory::new()),
            factory,
            ledger,
        )
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::HOST, "nobody.example")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn new_creates_module_without_binding() {
        let module = module(TenancyConfig::default());
        assert!(module.listener.is_none());
    }

    #[test]
    fn lifecycle_returns_shared_arc() {
        let module = module(TenancyConfig::default());
        assert!(Arc::ptr_eq(&module.lifecycle(), &module.lifecycle()));
    }

    #[tokio::test]
    async fn health_routes_skip_tenant_binding() {
        let router = module(TenancyConfig::default()).build_router();
        let response = router.oneshot(get_req("/health/live")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_paths_are_plain_404_without_resolution() {
        let module = module(TenancyConfig::default());
        let router = module.build_router();
        let response = router.oneshot(get_req("/nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(module.cache().is_empty());
    }

    #[tokio::test]
    async fn admin_routes_absent_without_token() {
        let router = module(TenancyConfig::default()).build_router();
        let response = router.oneshot(get_req("/admin/tenants")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn admin_routes_require_bearer_token() {
        let tenancy = TenancyConfig {
            admin_token: Some("s3cret".to_string()),
            ..TenancyConfig::default()
        };
        let router = module(tenancy).build_router();

        let denied = router.clone().oneshot(get_req("/admin/tenants")).await.unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

        let allowed = router
            .oneshot(
                Request::builder()
                    .uri("/admin/tenants")
                    .header(header::AUTHORIZATION, "Bearer s3cret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(allowed.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn start_binds_to_os_assigned_port() {
        let mut module = module(TenancyConfig::default());
        let port = module.start().await.unwrap();
        assert!(port > 0);
        assert!(module.listener.is_some());
    }

    #[tokio::test]
    async fn serve_without_start_is_an_error() {
        let module = module(TenancyConfig::default());
        let err = module.serve(std::future::pending::<()>()).await.unwrap_err();
        assert!(err.to_string().contains("start()"));
    }

    #[tokio::test]
    async fn serve_stops_on_shutdown_signal() {
        let mut module = module(TenancyConfig::default());
        module.start().await.unwrap();
        let lifecycle = module.lifecycle();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(module.serve(async move {
            let _ = rx.await;
        }));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(lifecycle.health_state(), crate::network::HealthState::Ready);

        tx.send(()).unwrap();
        server.await.unwrap().unwrap();
        assert_eq!(lifecycle.health_state(), crate::network::HealthState::Stopped);
    }
}
