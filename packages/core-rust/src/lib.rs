//! `tenantry` core: tenant records, private connection descriptors, host
//! normalization, and the token resource held in each tenant store.

pub mod descriptor;
pub mod tenant;
pub mod token;

pub use descriptor::{ConnectionDescriptor, DescriptorError, DescriptorKind, DescriptorParts, MASK};
pub use tenant::{
    normalize_host, NewTenant, Tenant, TenantId, TenantSummary, TenantUpdate,
    TenantValidationError,
};
pub use token::{content_hash, NewToken, Token};
