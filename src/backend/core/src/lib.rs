#![allow(clippy::result_large_err)]
//! # Warden Core
//!
//! Permission resolution engine for project-management workflows.
//!
//! ## Architecture
//!
//! - **Catalog**: known permission slugs and role grants, published as atomic snapshots
//! - **Stores**: global role assignments and per-resource membership overrides
//! - **Resolver**: fail-closed single checks and batched global checks
//! - **Cache**: short-TTL role and membership caches with synchronous invalidation
//! - **API**: the `/permissions/check` wire contract plus membership administration
//! - **Observability**: structured logging, optional OTLP tracing, Prometheus metrics

pub mod api;
pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;
pub mod rbac;
pub mod store;

pub use error::{ErrorCode, ErrorDetails, ErrorSeverity, Result, WardenError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::api::{build_router, ApiResponse, AppState};
    pub use crate::cache::{InvalidationEvent, ResolverCache};
    pub use crate::config::Config;
    pub use crate::error::{ErrorCode, ErrorDetails, ErrorSeverity, Result, WardenError};
    pub use crate::middleware::{Authenticator, Identity, IdentityLayer, RequireUser};
    pub use crate::rbac::{
        builtin_catalog, CatalogDefinition, CatalogHandle, CatalogSnapshot, CheckRequest,
        DenyReason, GrantSource, MemberGrant, MembershipManager, PermissionDecision,
        PermissionResolver, PermissionSlug, PredefinedRole, RequirePermissionLayer, ResolverOptions,
        ResourceKind, ResourceMember, ResourceRef, RoleSlug, UserId,
    };
    pub use crate::store::{InMemoryStore, MembershipStore, PgStore, RoleStore};
}
