//! Authorization engine.
//!
//! This module provides:
//! - **Models**: user, role and permission slugs, resource references, memberships, decisions
//! - **Catalog**: known permission slugs, their admissible scopes and role grants
//! - **Resolver**: single and batch permission checks
//! - **Membership**: validated writes to resource memberships and role assignments
//! - **Middleware**: a tower layer guarding routes on a global permission
//!
//! # Usage
//!
//! ```rust,ignore
//! use warden_core::rbac::{CheckRequest, ResourceRef, PermissionResolver};
//!
//! let scoped = CheckRequest::scoped(
//!     "legal_instruments.manage",
//!     ResourceRef::project("proj-123")?,
//! );
//! let allowed = resolver.can(&user_id, &scoped).await?;
//!
//! let gates = resolver.can_many(&user_id, &["projects.create", "users.manage"]).await?;
//! ```

pub mod catalog;
pub mod membership;
pub mod middleware;
pub mod models;
pub mod resolver;
pub mod roles;

pub use catalog::{CatalogDefinition, CatalogHandle, CatalogSnapshot, CatalogSummary, PermissionDef, RoleDef};
pub use membership::{MemberGrant, MembershipManager};
pub use middleware::{GuardContext, RequirePermissionLayer, RequirePermissionService};
pub use models::{
    CheckRequest, DenyReason, GrantSource, PermissionDecision, PermissionSlug, ResourceKind,
    ResourceMember, ResourceRef, RoleSlug, UserId,
};
pub use resolver::{PermissionResolver, ResolverOptions};
pub use roles::{builtin_catalog, PredefinedRole};
