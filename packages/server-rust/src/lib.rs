//! `tenantry` server: resolves each HTTP request's host to a tenant, binds a
//! request-scoped data context onto that tenant's store, and releases it when
//! the request ends.
//!
//! - [`resolver`] maps hosts to tenants through a TTL cache over the
//!   [`directory`].
//! - [`datacontext`] opens and releases per-request store handles.
//! - [`network`] hosts the binding middleware, handlers and server lifecycle.
//! - [`service`] carries tenant administration and background cache sweeps.

pub mod datacontext;
pub mod directory;
pub mod network;
pub mod resolver;
pub mod service;
pub mod traits;

pub use datacontext::{DataContext, HandleLedger};
pub use network::{NetworkModule, TenantContext};
pub use resolver::{CachingTenantResolver, ResolveError, TenantCache};
pub use traits::{DataContextFactory, TenantConnection, TenantDirectory, TenantResolver};
