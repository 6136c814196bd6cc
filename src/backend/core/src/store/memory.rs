//! In-process store backed by `DashMap`.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use super::{MembershipStore, RoleStore};
use crate::error::{Result, WardenError};
use crate::rbac::catalog::CatalogDefinition;
use crate::rbac::models::{ResourceMember, ResourceRef, RoleSlug, UserId};

/// Role and membership store kept in memory.
///
/// Memberships are indexed by resource so that resource deletion and listing
/// touch one shard; the exact `(user, resource)` lookup is a nested map hit.
pub struct InMemoryStore {
    users: DashMap<UserId, BTreeSet<RoleSlug>>,
    members: DashMap<ResourceRef, HashMap<UserId, ResourceMember>>,
    catalog: RwLock<CatalogDefinition>,
    available: AtomicBool,
}

impl InMemoryStore {
    pub fn new(catalog: CatalogDefinition) -> Self {
        Self {
            users: DashMap::new(),
            members: DashMap::new(),
            catalog: RwLock::new(catalog),
            available: AtomicBool::new(true),
        }
    }

    /// Replace the stored catalog; picked up on the next catalog refresh.
    pub fn set_catalog(&self, catalog: CatalogDefinition) {
        *self.catalog.write() = catalog;
    }

    /// Simulate an outage: every call fails with `StorageUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(WardenError::storage_unavailable("in-memory store marked unavailable"))
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(crate::rbac::roles::builtin_catalog())
    }
}

#[async_trait]
impl RoleStore for InMemoryStore {
    async fn user_roles(&self, user: &UserId) -> Result<Option<Vec<RoleSlug>>> {
        self.ensure_available()?;
        Ok(self
            .users
            .get(user)
            .map(|roles| roles.iter().cloned().collect()))
    }

    async fn load_catalog(&self) -> Result<CatalogDefinition> {
        self.ensure_available()?;
        Ok(self.catalog.read().clone())
    }

    async fn register_user(&self, user: &UserId) -> Result<()> {
        self.ensure_available()?;
        self.users.entry(user.clone()).or_default();
        Ok(())
    }

    async fn assign_role(&self, user: &UserId, role: &RoleSlug) -> Result<bool> {
        self.ensure_available()?;
        Ok(self.users.entry(user.clone()).or_default().insert(role.clone()))
    }

    async fn unassign_role(&self, user: &UserId, role: &RoleSlug) -> Result<bool> {
        self.ensure_available()?;
        Ok(self
            .users
            .get_mut(user)
            .map(|mut roles| roles.remove(role))
            .unwrap_or(false))
    }
}

#[async_trait]
impl MembershipStore for InMemoryStore {
    async fn find_member(
        &self,
        user: &UserId,
        resource: &ResourceRef,
    ) -> Result<Option<ResourceMember>> {
        self.ensure_available()?;
        Ok(self
            .members
            .get(resource)
            .and_then(|members| members.get(user).cloned()))
    }

    async fn list_members(&self, resource: &ResourceRef) -> Result<Vec<ResourceMember>> {
        self.ensure_available()?;
        let mut members: Vec<ResourceMember> = self
            .members
            .get(resource)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        members.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.user_id.cmp(&b.user_id)));
        Ok(members)
    }

    async fn upsert_member(&self, member: &ResourceMember) -> Result<ResourceMember> {
        self.ensure_available()?;
        self.users.entry(member.user_id.clone()).or_default();

        let mut members = self.members.entry(member.resource.clone()).or_default();
        let stored = match members.get(&member.user_id) {
            // Replacing keeps the original row identity.
            Some(existing) => ResourceMember {
                id: existing.id,
                created_at: existing.created_at,
                ..member.clone()
            },
            None => member.clone(),
        };
        members.insert(member.user_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn remove_member(&self, user: &UserId, resource: &ResourceRef) -> Result<bool> {
        self.ensure_available()?;
        let removed = self
            .members
            .get_mut(resource)
            .map(|mut members| members.remove(user).is_some())
            .unwrap_or(false);
        self.members.remove_if(resource, |_, members| members.is_empty());
        Ok(removed)
    }

    async fn remove_resource(&self, resource: &ResourceRef) -> Result<u64> {
        self.ensure_available()?;
        Ok(self
            .members
            .remove(resource)
            .map(|(_, members)| members.len() as u64)
            .unwrap_or(0))
    }

    async fn health_check(&self) -> Result<()> {
        self.ensure_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn project(id: &str) -> ResourceRef {
        ResourceRef::project(id).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_user_has_no_roles() {
        let store = InMemoryStore::default();
        assert!(store.user_roles(&"ghost".into()).await.unwrap().is_none());

        store.register_user(&"u1".into()).await.unwrap();
        assert_eq!(store.user_roles(&"u1".into()).await.unwrap(), Some(vec![]));
    }

    #[tokio::test]
    async fn test_assign_and_unassign_role() {
        let store = InMemoryStore::default();
        let user = UserId::from("u1");
        let role = RoleSlug::from("editor");

        assert!(store.assign_role(&user, &role).await.unwrap());
        assert!(!store.assign_role(&user, &role).await.unwrap());
        assert_eq!(store.user_roles(&user).await.unwrap(), Some(vec![role.clone()]));

        assert!(store.unassign_role(&user, &role).await.unwrap());
        assert!(!store.unassign_role(&user, &role).await.unwrap());
    }

    #[tokio::test]
    async fn test_membership_lookup_is_exact() {
        let store = InMemoryStore::default();
        let user = UserId::from("u1");
        let member = ResourceMember::new(user.clone(), project("p-1")).with_permission("projects.edit");
        store.upsert_member(&member).await.unwrap();

        assert!(store.find_member(&user, &project("p-1")).await.unwrap().is_some());
        assert!(store.find_member(&user, &project("p-2")).await.unwrap().is_none());
        let other_kind = ResourceRef::legal_instrument("p-1").unwrap();
        assert!(store.find_member(&user, &other_kind).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_keeps_identity() {
        let store = InMemoryStore::default();
        let user = UserId::from("u1");
        let first = store
            .upsert_member(&ResourceMember::new(user.clone(), project("p")).with_role("viewer"))
            .await
            .unwrap();
        let second = store
            .upsert_member(&ResourceMember::new(user.clone(), project("p")).with_role("editor"))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.role, Some(RoleSlug::from("editor")));
        assert_eq!(store.list_members(&project("p")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_resource_cascades() {
        let store = InMemoryStore::default();
        for user in ["a", "b", "c"] {
            store
                .upsert_member(&ResourceMember::new(user.into(), project("p")).with_role("viewer"))
                .await
                .unwrap();
        }
        assert_eq!(store.remove_resource(&project("p")).await.unwrap(), 3);
        assert!(store.list_members(&project("p")).await.unwrap().is_empty());
        assert_eq!(store.remove_resource(&project("p")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = InMemoryStore::default();
        store.set_available(false);
        let err = store.user_roles(&"u".into()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::StorageUnavailable);
        assert!(store.health_check().await.is_err());
    }
}
