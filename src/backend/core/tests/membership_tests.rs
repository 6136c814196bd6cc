//! Tests for the membership and role-assignment write path.

use std::sync::Arc;

use warden_core::bootstrap;
use warden_core::cache::InvalidationEvent;
use warden_core::config::Config;
use warden_core::error::ErrorCode;
use warden_core::rbac::{
    builtin_catalog, MemberGrant, MembershipManager, PermissionResolver, ResourceRef, RoleSlug,
    UserId,
};
use warden_core::store::InMemoryStore;

async fn setup() -> (PermissionResolver, MembershipManager, Arc<InMemoryStore>) {
    let (resolver, store) = bootstrap::in_memory_resolver(&Config::default(), builtin_catalog())
        .await
        .unwrap();
    let manager = resolver.membership_manager();
    (resolver, manager, store)
}

fn project(id: &str) -> ResourceRef {
    ResourceRef::project(id).unwrap()
}

fn permissions(slugs: &[&str]) -> MemberGrant {
    MemberGrant {
        role: None,
        permissions: slugs.iter().map(|s| (*s).into()).collect(),
    }
}

// ============================================================================
// Upsert
// ============================================================================

#[tokio::test]
async fn test_upsert_replaces_grant_and_keeps_identity() {
    let (_, manager, _) = setup().await;
    let user = UserId::from("u1");

    let first = manager
        .upsert_member(user.clone(), project("p"), permissions(&["projects.view"]), None)
        .await
        .unwrap();
    let second = manager
        .upsert_member(
            user.clone(),
            project("p"),
            permissions(&["projects.edit", "files.upload"]),
            Some(UserId::from("admin")),
        )
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.created_at, second.created_at);
    assert!(!second.has_explicit("projects.view"));
    assert!(second.has_explicit("files.upload"));
    assert_eq!(second.granted_by, Some(UserId::from("admin")));

    let members = manager.list_members(&project("p")).await.unwrap();
    assert_eq!(members.len(), 1);
}

#[tokio::test]
async fn test_upsert_rejects_invalid_grants() {
    let (_, manager, _) = setup().await;
    let user = UserId::from("u1");

    let err = manager
        .upsert_member(user.clone(), project("p"), MemberGrant::default(), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    let err = manager
        .upsert_member(user.clone(), project("p"), permissions(&["projects.fly"]), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    let unknown_role = MemberGrant {
        role: Some(RoleSlug::from("owner")),
        permissions: vec![],
    };
    let err = manager
        .upsert_member(user.clone(), project("p"), unknown_role, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    let instrument = ResourceRef::legal_instrument("li-1").unwrap();
    let err = manager
        .upsert_member(user.clone(), instrument, permissions(&["projects.edit"]), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    let err = manager
        .upsert_member(UserId::from(""), project("p"), permissions(&["projects.view"]), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    assert!(manager.list_members(&project("p")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_remove_missing_member_reports_false() {
    let (_, manager, _) = setup().await;
    assert!(!manager
        .remove_member(&UserId::from("nobody"), &project("p"))
        .await
        .unwrap());
}

// ============================================================================
// Roles
// ============================================================================

#[tokio::test]
async fn test_assign_role_validates_against_catalog() {
    let (_, manager, _) = setup().await;
    let user = UserId::from("u1");

    assert!(manager.assign_role(&user, &RoleSlug::from("viewer")).await.unwrap());
    assert!(!manager.assign_role(&user, &RoleSlug::from("viewer")).await.unwrap());

    let err = manager
        .assign_role(&user, &RoleSlug::from("overlord"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
}

#[tokio::test]
async fn test_register_user_makes_user_known() {
    let (_, manager, store) = setup().await;
    manager.register_user(&UserId::from("fresh")).await.unwrap();
    manager.register_user(&UserId::from("fresh")).await.unwrap();
    assert_eq!(store.user_count(), 1);
}

// ============================================================================
// Invalidation
// ============================================================================

#[tokio::test]
async fn test_writes_broadcast_invalidation_events() {
    let (resolver, manager, _) = setup().await;
    let mut events = resolver.cache().subscribe();
    let user = UserId::from("u1");

    manager
        .upsert_member(user.clone(), project("p"), permissions(&["projects.view"]), None)
        .await
        .unwrap();
    manager.remove_resource(&project("p")).await.unwrap();
    manager.assign_role(&user, &RoleSlug::from("editor")).await.unwrap();

    assert_eq!(
        events.recv().await.unwrap(),
        InvalidationEvent::membership(user.clone(), project("p"))
    );
    assert_eq!(
        events.recv().await.unwrap(),
        InvalidationEvent::resource(project("p"))
    );
    assert_eq!(events.recv().await.unwrap(), InvalidationEvent::user(user));
}

#[tokio::test]
async fn test_failed_write_still_invalidates() {
    let (resolver, manager, store) = setup().await;
    let epoch_before = resolver.cache().stats().epoch;
    store.set_available(false);

    let err = manager
        .remove_member(&UserId::from("u1"), &project("p"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::StorageUnavailable);
    assert!(resolver.cache().stats().epoch > epoch_before);
}
