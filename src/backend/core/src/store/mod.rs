//! Role and membership storage.
//!
//! The resolver issues exactly two read shapes against storage: all roles of a
//! user, and the membership of one user on one exact resource. Everything else
//! here is the write surface used by membership and role management.
//!
//! Implementations:
//! - [`InMemoryStore`]: process-local, used for tests and single-node setups
//! - [`PgStore`]: PostgreSQL via sqlx, with migrations in `migrations/`

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::error::Result;
use crate::rbac::catalog::CatalogDefinition;
use crate::rbac::models::{ResourceMember, ResourceRef, RoleSlug, UserId};

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// Global role assignments and the persisted catalog.
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Roles held by `user`, or `None` when the user is unknown.
    async fn user_roles(&self, user: &UserId) -> Result<Option<Vec<RoleSlug>>>;

    /// Current catalog definition (permissions, roles and their grants).
    async fn load_catalog(&self) -> Result<CatalogDefinition>;

    /// Make a user known. Idempotent.
    async fn register_user(&self, user: &UserId) -> Result<()>;

    /// Grant a global role, registering the user if needed. Returns `false`
    /// when the user already held it.
    async fn assign_role(&self, user: &UserId, role: &RoleSlug) -> Result<bool>;

    /// Returns `false` when the user did not hold the role.
    async fn unassign_role(&self, user: &UserId, role: &RoleSlug) -> Result<bool>;
}

/// Per-resource membership overrides.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Membership of `user` on exactly `resource`.
    async fn find_member(&self, user: &UserId, resource: &ResourceRef)
        -> Result<Option<ResourceMember>>;

    async fn list_members(&self, resource: &ResourceRef) -> Result<Vec<ResourceMember>>;

    /// Insert or replace the membership of `member.user_id` on `member.resource`.
    async fn upsert_member(&self, member: &ResourceMember) -> Result<ResourceMember>;

    /// Returns `false` when there was nothing to remove.
    async fn remove_member(&self, user: &UserId, resource: &ResourceRef) -> Result<bool>;

    /// Drop every membership of a deleted resource. Returns the number removed.
    async fn remove_resource(&self, resource: &ResourceRef) -> Result<u64>;

    async fn health_check(&self) -> Result<()>;
}
