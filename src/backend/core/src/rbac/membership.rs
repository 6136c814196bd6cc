//! Write path for resource memberships and global role assignments.
//!
//! Members are validated against the current catalog before they are stored:
//! the role must exist, and every explicit slug must exist and be admissible
//! for the resource kind. Each write invalidates the resolver cache before
//! returning, so the next check observes it.

use std::sync::Arc;
use tracing::{info, instrument};

use super::catalog::{CatalogHandle, CatalogSnapshot};
use super::models::{PermissionSlug, ResourceMember, ResourceRef, RoleSlug, UserId};
use crate::cache::{InvalidationEvent, ResolverCache};
use crate::error::{Result, WardenError};
use crate::store::{MembershipStore, RoleStore};

/// What to grant a member; the user and resource come from the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MemberGrant {
    #[serde(default)]
    pub role: Option<RoleSlug>,
    #[serde(default)]
    pub permissions: Vec<PermissionSlug>,
}

#[derive(Clone)]
pub struct MembershipManager {
    catalog: Arc<CatalogHandle>,
    roles: Arc<dyn RoleStore>,
    members: Arc<dyn MembershipStore>,
    cache: Arc<ResolverCache>,
}

impl MembershipManager {
    pub fn new(
        catalog: Arc<CatalogHandle>,
        roles: Arc<dyn RoleStore>,
        members: Arc<dyn MembershipStore>,
        cache: Arc<ResolverCache>,
    ) -> Self {
        Self {
            catalog,
            roles,
            members,
            cache,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Memberships
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a member or replace its grant.
    #[instrument(skip_all, fields(user_id = %user, resource = %resource))]
    pub async fn upsert_member(
        &self,
        user: UserId,
        resource: ResourceRef,
        grant: MemberGrant,
        granted_by: Option<UserId>,
    ) -> Result<ResourceMember> {
        if user.is_empty() {
            return Err(WardenError::invalid_argument("user id must not be empty"));
        }

        let mut member = ResourceMember::new(user, resource).with_permissions(grant.permissions);
        member.role = grant.role;
        member.granted_by = granted_by;
        validate_member(&self.catalog.load(), &member)?;

        let result = self.members.upsert_member(&member).await;
        self.cache.invalidate(InvalidationEvent::membership(
            member.user_id.clone(),
            member.resource.clone(),
        ));
        let stored = result?;

        info!(
            member_id = %stored.id,
            role = ?stored.role,
            permissions = stored.permissions.len(),
            "Resource member saved"
        );
        Ok(stored)
    }

    /// Returns `false` when the user was not a member.
    #[instrument(skip_all, fields(user_id = %user, resource = %resource))]
    pub async fn remove_member(&self, user: &UserId, resource: &ResourceRef) -> Result<bool> {
        let result = self.members.remove_member(user, resource).await;
        self.cache
            .invalidate(InvalidationEvent::membership(user.clone(), resource.clone()));
        let removed = result?;

        if removed {
            info!("Resource member removed");
        }
        Ok(removed)
    }

    /// Cascade for a deleted resource.
    #[instrument(skip_all, fields(resource = %resource))]
    pub async fn remove_resource(&self, resource: &ResourceRef) -> Result<u64> {
        let result = self.members.remove_resource(resource).await;
        self.cache.invalidate(InvalidationEvent::resource(resource.clone()));
        let removed = result?;

        info!(removed, "Resource memberships dropped");
        Ok(removed)
    }

    pub async fn list_members(&self, resource: &ResourceRef) -> Result<Vec<ResourceMember>> {
        self.members.list_members(resource).await
    }

    pub async fn find_member(
        &self,
        user: &UserId,
        resource: &ResourceRef,
    ) -> Result<Option<ResourceMember>> {
        self.members.find_member(user, resource).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Global roles
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn register_user(&self, user: &UserId) -> Result<()> {
        if user.is_empty() {
            return Err(WardenError::invalid_argument("user id must not be empty"));
        }
        let result = self.roles.register_user(user).await;
        self.cache.invalidate(InvalidationEvent::user(user.clone()));
        result
    }

    #[instrument(skip_all, fields(user_id = %user, role = %role))]
    pub async fn assign_role(&self, user: &UserId, role: &RoleSlug) -> Result<bool> {
        if user.is_empty() {
            return Err(WardenError::invalid_argument("user id must not be empty"));
        }
        if !self.catalog.load().contains_role(role.as_str()) {
            return Err(WardenError::invalid_argument(format!("Unknown role: {}", role)));
        }

        let result = self.roles.assign_role(user, role).await;
        self.cache.invalidate(InvalidationEvent::user(user.clone()));
        let changed = result?;

        if changed {
            info!("Role assigned");
        }
        Ok(changed)
    }

    #[instrument(skip_all, fields(user_id = %user, role = %role))]
    pub async fn unassign_role(&self, user: &UserId, role: &RoleSlug) -> Result<bool> {
        let result = self.roles.unassign_role(user, role).await;
        self.cache.invalidate(InvalidationEvent::user(user.clone()));
        let changed = result?;

        if changed {
            info!("Role unassigned");
        }
        Ok(changed)
    }
}

/// Write-time integrity checks for a member.
pub fn validate_member(catalog: &CatalogSnapshot, member: &ResourceMember) -> Result<()> {
    if member.resource.reference_id.trim().is_empty() {
        return Err(WardenError::invalid_argument("referenceId must not be empty"));
    }
    if member.is_empty_grant() {
        return Err(WardenError::invalid_argument(
            "A member needs a role or at least one permission",
        ));
    }

    if let Some(role) = &member.role {
        if !catalog.contains_role(role.as_str()) {
            return Err(WardenError::invalid_argument(format!("Unknown role: {}", role)));
        }
    }

    let kind = member.resource.kind();
    for slug in &member.permissions {
        if !catalog.contains(slug.as_str()) {
            return Err(WardenError::invalid_argument(format!("Unknown permission: {}", slug))
                .with_context("permission", slug.as_str()));
        }
        if !catalog.is_admissible(slug.as_str(), kind) {
            return Err(WardenError::invalid_argument(format!(
                "Permission {} cannot be scoped to {}",
                slug, kind
            ))
            .with_context("permission", slug.as_str())
            .with_context("reference_table", kind.as_str()));
        }
    }

    Ok(())
}
