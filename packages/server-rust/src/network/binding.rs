//! Tenant-binding middleware.
//!
//! For every request on the tenant-bound routes, [`TenantBindingService`]
//! resolves the request host to a tenant, opens a [`DataContext`] for that
//! tenant, publishes both as a [`TenantContext`] request extension and
//! dispatches to the inner service. The data context is released exactly
//! once when the request ends: after a normal response, after a handler
//! panic, or (through a drop guard) when the request future is cancelled.
//!
//! Rejections carry only generic bodies. Causes are logged server-side.

use std::convert::Infallible;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::FutureExt;
use tenantry_core::Tenant;
use tower::{Layer, Service};
use tracing::{error, field, info_span, warn, Instrument, Span};

use crate::datacontext::DataContext;
use crate::resolver::ResolveError;
use crate::traits::{DataContextFactory, TenantResolver};

/// Log field name under which the resolved tenant is reported.
pub const TENANT_KEY: &str = "Tenant";
/// Log field name under which the request's data context is reported.
pub const DATA_CONTEXT_KEY: &str = "DataContext";

/// Body of every 500 produced by the binding layer.
pub const INTERNAL_ERROR_BODY: &str = "Internal server error occurred";

/// Where a request currently is in the binding pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingStage {
    Start,
    HostExtracted,
    TenantResolved,
    ContextOpened,
    Dispatched,
    Completed,
    RejectedNotFound,
    RejectedInternalError,
}

impl BindingStage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::HostExtracted => "host_extracted",
            Self::TenantResolved => "tenant_resolved",
            Self::ContextOpened => "context_opened",
            Self::Dispatched => "dispatched",
            Self::Completed => "completed",
            Self::RejectedNotFound => "rejected_not_found",
            Self::RejectedInternalError => "rejected_internal_error",
        }
    }

    fn enter(self) {
        Span::current().record("stage", self.as_str());
    }
}

/// Tenant and data context bound to one request.
///
/// Extract it in handlers with `ctx: TenantContext`. It exists only on
/// routes behind [`TenantBindingLayer`].
#[derive(Clone, Debug)]
pub struct TenantContext {
    tenant: Arc<Tenant>,
    data: Arc<DataContext>,
}

impl TenantContext {
    #[must_use]
    pub fn tenant(&self) -> &Tenant {
        &self.tenant
    }

    #[must_use]
    pub fn data(&self) -> &DataContext {
        &self.data
    }
}

impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<TenantContext>().cloned().ok_or_else(|| {
            error!(
                path = %parts.uri.path(),
                "handler requires a tenant context but the route is not tenant-bound"
            );
            internal_error()
        })
    }
}

/// Host name of the request with any port removed.
///
/// Taken from the `Host` header, else from the URI authority. IPv6 literals
/// keep their brackets.
#[must_use]
pub fn request_host<B>(req: &Request<B>) -> Option<String> {
    if let Some(value) = req.headers().get(header::HOST) {
        return value.to_str().ok().map(|h| strip_port(h.trim()).to_string());
    }
    req.uri().host().map(str::to_string)
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

fn internal_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_BODY).into_response()
}

fn reject(stage: BindingStage, reason: &'static str, response: Response) -> Response {
    stage.enter();
    metrics::counter!("tenantry_binding_rejections_total", "reason" => reason).increment(1);
    response
}

/// Releases the data context if the request future is dropped before the
/// normal release point.
struct ReleaseGuard {
    ctx: Option<Arc<DataContext>>,
}

impl ReleaseGuard {
    async fn release(mut self) {
        if let Some(ctx) = self.ctx.take() {
            release_logged(&ctx).await;
        }
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let Some(ctx) = self.ctx.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { release_logged(&ctx).await });
            }
            Err(_) => warn!(handle = %ctx.id(), "no runtime to release data context on"),
        }
    }
}

async fn release_logged(ctx: &DataContext) {
    if let Err(e) = ctx.release().await {
        warn!(handle = %e.handle, error = %e, "HandleReleaseFailure");
    }
}

// ---------------------------------------------------------------------------
// TenantBindingLayer
// ---------------------------------------------------------------------------

/// Tower layer that binds a tenant and its data context to each request.
#[derive(Clone)]
pub struct TenantBindingLayer {
    resolver: Arc<dyn TenantResolver>,
    factory: Arc<dyn DataContextFactory>,
}

impl TenantBindingLayer {
    #[must_use]
    pub fn new(resolver: Arc<dyn TenantResolver>, factory: Arc<dyn DataContextFactory>) -> Self {
        Self { resolver, factory }
    }
}

impl<S> Layer<S> for TenantBindingLayer {
    type Service = TenantBindingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TenantBindingService {
            inner,
            resolver: Arc::clone(&self.resolver),
            factory: Arc::clone(&self.factory),
        }
    }
}

// ---------------------------------------------------------------------------
// TenantBindingService
// ---------------------------------------------------------------------------

/// Service wrapper produced by [`TenantBindingLayer`].
#[derive(Clone)]
pub struct TenantBindingService<S> {
    inner: S,
    resolver: Arc<dyn TenantResolver>,
    factory: Arc<dyn DataContextFactory>,
}

impl<S> Service<Request<Body>> for TenantBindingService<S>
where
    S: Service<Request<Body>, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        // Use the instance that was driven to readiness; leave a fresh clone behind.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let resolver = Arc::clone(&self.resolver);
        let factory = Arc::clone(&self.factory);

        let host = request_host(&req).unwrap_or_default();
        let span = info_span!(
            "tenant_binding",
            host = %host,
            tenant = field::Empty,
            handle = field::Empty,
            stage = BindingStage::Start.as_str(),
        );

        Box::pin(bind(inner, resolver, factory, host, req).instrument(span))
    }
}

async fn bind<S>(
    mut inner: S,
    resolver: Arc<dyn TenantResolver>,
    factory: Arc<dyn DataContextFactory>,
    host: String,
    mut req: Request<Body>,
) -> Result<Response, Infallible>
where
    S: Service<Request<Body>, Response = Response, Error = Infallible> + Send + 'static,
    S::Future: Send + 'static,
{
    BindingStage::HostExtracted.enter();

    let tenant = match resolver.resolve(&host).await {
        Ok(tenant) => tenant,
        Err(ResolveError::NotFound { host }) => {
            warn!(%host, "tenant not found");
            let body = format!("Tenant not found for host: {host}");
            return Ok(reject(
                BindingStage::RejectedNotFound,
                "not_found",
                (StatusCode::NOT_FOUND, body).into_response(),
            ));
        }
        Err(ResolveError::DirectoryUnavailable(cause)) => {
            error!(%host, error = %cause, "tenant resolution failed, directory unavailable");
            return Ok(reject(
                BindingStage::RejectedInternalError,
                "directory_unavailable",
                internal_error(),
            ));
        }
    };
    Span::current().record("tenant", tenant.name.as_str());
    BindingStage::TenantResolved.enter();

    let data = match factory.open(&tenant.connection).await {
        Ok(data) => Arc::new(data),
        Err(e) => {
            error!(
                tenant = %tenant.name,
                descriptor = %e.descriptor(),
                error = %e,
                "error opening {DATA_CONTEXT_KEY} for tenant"
            );
            return Ok(reject(
                BindingStage::RejectedInternalError,
                "connection_failed",
                internal_error(),
            ));
        }
    };
    Span::current().record("handle", field::display(data.id()));
    BindingStage::ContextOpened.enter();

    let guard = ReleaseGuard {
        ctx: Some(Arc::clone(&data)),
    };
    req.extensions_mut().insert(TenantContext {
        tenant: Arc::clone(&tenant),
        data,
    });

    BindingStage::Dispatched.enter();
    let outcome = AssertUnwindSafe(async move { inner.call(req).await })
        .catch_unwind()
        .await;
    guard.release().await;

    match outcome {
        Ok(Ok(response)) => {
            BindingStage::Completed.enter();
            Ok(response)
        }
        Ok(Err(never)) => match never {},
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            error!(tenant = %tenant.name, panic = %message, "handler panicked with {TENANT_KEY} bound");
            Ok(reject(
                BindingStage::RejectedInternalError,
                "handler_panic",
                internal_error(),
            ))
        }
    }
}
