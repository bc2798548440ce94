//! HTTP surface: configuration, middleware, tenant binding, handlers and
//! shutdown control.

pub mod binding;
pub mod config;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use binding::{
    request_host, BindingStage, TenantBindingLayer, TenantBindingService, TenantContext,
    DATA_CONTEXT_KEY, INTERNAL_ERROR_BODY, TENANT_KEY,
};
pub use config::*;
pub use handlers::AppState;
pub use module::NetworkModule;
pub use shutdown::*;
