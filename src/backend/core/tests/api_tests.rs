//! HTTP-level tests for the API router.
//!
//! Tests cover:
//! - The `/permissions/check` wire contract (200 / 400 / 401)
//! - Batch checks, including anonymous callers
//! - Identity from bearer tokens and the trusted user header
//! - Membership administration guarded by `*.members.manage`
//! - Global-permission guards on admin routes
//! - Storage failures surfacing as 503

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use warden_core::api::{build_router, AppState};
use warden_core::bootstrap;
use warden_core::config::{AuthConfig, Config, RoleAssignment};
use warden_core::middleware::{Authenticator, Claims};
use warden_core::rbac::{builtin_catalog, MemberGrant, PermissionResolver, ResourceRef, RoleSlug, UserId};
use warden_core::store::InMemoryStore;

const SECRET: &str = "test-secret";

// ============================================================================
// Helpers
// ============================================================================

struct TestApp {
    router: Router,
    resolver: Arc<PermissionResolver>,
    store: Arc<InMemoryStore>,
}

async fn app() -> TestApp {
    let (resolver, store) = bootstrap::in_memory_resolver(&Config::default(), builtin_catalog())
        .await
        .unwrap();
    let resolver = Arc::new(resolver);
    let authenticator = Authenticator::from_config(&AuthConfig {
        jwt_secret: Some(SECRET.to_string()),
        jwt_issuer: None,
        trust_user_header: true,
    });

    let router = build_router(AppState::new(Arc::clone(&resolver), Arc::new(authenticator)));
    TestApp {
        router,
        resolver,
        store,
    }
}

impl TestApp {
    async fn grant_role(&self, user: &str, role: &str) {
        self.resolver
            .membership_manager()
            .assign_role(&UserId::from(user), &RoleSlug::from(role))
            .await
            .unwrap();
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }
}

fn request(method: Method, uri: &str, user: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn check(user: Option<&str>, body: Value) -> Request<Body> {
    request(Method::POST, "/permissions/check", user, Some(body))
}

fn token(sub: &str) -> String {
    let claims = Claims {
        sub: sub.to_string(),
        exp: chrono::Utc::now().timestamp() + 3600,
        iat: None,
        iss: None,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

// ============================================================================
// /permissions/check
// ============================================================================

#[tokio::test]
async fn test_check_global_permission() {
    let app = app().await;
    app.grant_role("alice", "editor").await;

    let (status, body) = app.send(check(Some("alice"), json!({"slug": "projects.edit"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"can": true}));

    let (status, body) = app.send(check(Some("alice"), json!({"slug": "users.manage"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"can": false}));
}

#[tokio::test]
async fn test_check_scoped_permission() {
    let app = app().await;
    app.grant_role("bob", "editor").await;
    app.resolver
        .membership_manager()
        .upsert_member(
            UserId::from("bob"),
            ResourceRef::project("proj-123").unwrap(),
            MemberGrant {
                role: None,
                permissions: vec!["legal_instruments.manage".into()],
            },
            None,
        )
        .await
        .unwrap();

    let scoped = |id: &str| {
        json!({
            "slug": "legal_instruments.manage",
            "referenceTable": "PROJECT",
            "referenceId": id,
        })
    };

    let (_, body) = app.send(check(Some("bob"), scoped("proj-123"))).await;
    assert_eq!(body["can"], true);

    let (_, body) = app.send(check(Some("bob"), scoped("proj-999"))).await;
    assert_eq!(body["can"], false);
}

#[tokio::test]
async fn test_check_without_session_is_401() {
    let app = app().await;
    let (status, body) = app.send(check(None, json!({"slug": "projects.view"}))).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({"error": "unauthorized"}));
}

#[tokio::test]
async fn test_session_is_checked_before_body() {
    let app = app().await;
    let (status, _) = app.send(check(None, json!({}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_check_missing_slug_is_400() {
    let app = app().await;

    for body in [json!({}), json!({"slug": ""}), json!({"slug": "   "})] {
        let (status, body) = app.send(check(Some("alice"), body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "missing_slug"}));
    }
}

#[tokio::test]
async fn test_check_invalid_reference() {
    let app = app().await;

    let (status, body) = app
        .send(check(
            Some("alice"),
            json!({"slug": "projects.view", "referenceTable": "TASK", "referenceId": "t-1"}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_reference_table");

    let (status, body) = app
        .send(check(
            Some("alice"),
            json!({"slug": "projects.view", "referenceTable": "PROJECT"}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_reference");
}

#[tokio::test]
async fn test_check_unknown_user_and_slug_are_false() {
    let app = app().await;

    let (status, body) = app.send(check(Some("ghost"), json!({"slug": "projects.view"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["can"], false);

    app.grant_role("root", "admin").await;
    let (_, body) = app.send(check(Some("root"), json!({"slug": "projects.teleport"}))).await;
    assert_eq!(body["can"], false);
}

#[tokio::test]
async fn test_check_storage_failure_is_503() {
    let app = app().await;
    app.grant_role("alice", "editor").await;
    app.store.set_available(false);

    let (status, body) = app.send(check(Some("alice"), json!({"slug": "projects.edit"}))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], false);
    assert!(body.get("can").is_none());
}

// ============================================================================
// Identity
// ============================================================================

#[tokio::test]
async fn test_bearer_token_identifies_user() {
    let app = app().await;
    app.grant_role("carol", "viewer").await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/permissions/check")
        .header(header::AUTHORIZATION, format!("Bearer {}", token("carol")))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"slug": "projects.view"}).to_string()))
        .unwrap();

    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["can"], true);
}

#[tokio::test]
async fn test_invalid_token_does_not_fall_back_to_header() {
    let app = app().await;
    app.grant_role("carol", "viewer").await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/permissions/check")
        .header(header::AUTHORIZATION, "Bearer not-a-token")
        .header("x-user-id", "carol")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"slug": "projects.view"}).to_string()))
        .unwrap();

    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ============================================================================
// /permissions/check-many and /permissions/decide
// ============================================================================

#[tokio::test]
async fn test_check_many() {
    let app = app().await;
    app.grant_role("vic", "viewer").await;

    let body = json!({"slugs": ["projects.view", "projects.edit", "projects.view"]});
    let (status, result) = app
        .send(request(Method::POST, "/permissions/check-many", Some("vic"), Some(body.clone())))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result, json!({"projects.edit": false, "projects.view": true}));

    let (status, result) = app
        .send(request(Method::POST, "/permissions/check-many", None, Some(body)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result, json!({"projects.edit": false, "projects.view": false}));

    let (status, result) = app
        .send(request(
            Method::POST,
            "/permissions/check-many",
            Some("vic"),
            Some(json!({"slugs": []})),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(result["error"], "missing_slugs");
}

#[tokio::test]
async fn test_decide_reports_source() {
    let app = app().await;
    app.grant_role("vic", "viewer").await;

    let (status, body) = app
        .send(request(
            Method::POST,
            "/permissions/decide",
            Some("vic"),
            Some(json!({"slug": "projects.view"})),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["can"], true);
    assert_eq!(body["source"]["type"], "global_role");
}

// ============================================================================
// Resource Members
// ============================================================================

#[tokio::test]
async fn test_member_administration_requires_members_manage() {
    let app = app().await;
    app.grant_role("editor", "editor").await;
    app.grant_role("boss", "manager").await;

    let grant = json!({"permissions": ["projects.edit"]});
    let uri = "/resources/PROJECT/proj-1/members/dan";

    let (status, _) = app
        .send(request(Method::PUT, uri, Some("editor"), Some(grant.clone())))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .send(request(Method::PUT, uri, Some("boss"), Some(grant)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user_id"], "dan");

    let (status, body) = app
        .send(request(Method::GET, "/resources/PROJECT/proj-1/members", Some("boss"), None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().map(Vec::len), Some(1));

    let (status, _) = app.send(request(Method::DELETE, uri, Some("boss"), None)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.send(request(Method::DELETE, uri, Some("boss"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_scoped_members_manage_is_enough() {
    let app = app().await;
    app.resolver
        .membership_manager()
        .upsert_member(
            UserId::from("lead"),
            ResourceRef::legal_instrument("li-9").unwrap(),
            MemberGrant {
                role: None,
                permissions: vec!["legal_instruments.members.manage".into()],
            },
            None,
        )
        .await
        .unwrap();

    let (status, _) = app
        .send(request(Method::GET, "/resources/LEGAL_INSTRUMENT/li-9/members", Some("lead"), None))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .send(request(Method::GET, "/resources/LEGAL_INSTRUMENT/li-10/members", Some("lead"), None))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_member_routes_reject_unknown_kind() {
    let app = app().await;
    app.grant_role("root", "admin").await;

    let (status, _) = app
        .send(request(Method::GET, "/resources/TASK/t-1/members", Some("root"), None))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_member_routes_require_session() {
    let app = app().await;
    let (status, _) = app
        .send(request(Method::GET, "/resources/PROJECT/p/members", None, None))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ============================================================================
// Admin Routes
// ============================================================================

#[tokio::test]
async fn test_role_assignment_guarded_by_users_manage() {
    let app = app().await;
    app.grant_role("root", "admin").await;
    app.grant_role("vic", "viewer").await;

    let (status, _) = app
        .send(request(Method::PUT, "/users/erin/roles/editor", None, None))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .send(request(Method::PUT, "/users/erin/roles/editor", Some("vic"), None))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .send(request(Method::PUT, "/users/erin/roles/editor", Some("root"), None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["assigned"], true);
    assert_eq!(body["data"]["changed_by"], "root");

    let (_, body) = app.send(check(Some("erin"), json!({"slug": "projects.edit"}))).await;
    assert_eq!(body["can"], true);

    let (status, body) = app
        .send(request(Method::DELETE, "/users/erin/roles/editor", Some("root"), None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["removed"], true);
    assert_eq!(body["data"]["changed_by"], "root");

    let (_, body) = app.send(check(Some("erin"), json!({"slug": "projects.edit"}))).await;
    assert_eq!(body["can"], false);
}

#[tokio::test]
async fn test_bootstrap_admin_can_administer_fresh_store() {
    let mut config = Config::default();
    config.auth.trust_user_header = true;
    config.bootstrap.assignments.push(RoleAssignment {
        user: "alice".into(),
        role: "admin".into(),
    });

    let resolver = Arc::new(bootstrap::build_resolver(&config).await.unwrap());
    let authenticator = Arc::new(Authenticator::from_config(&config.auth));
    let app = TestApp {
        router: build_router(AppState::new(Arc::clone(&resolver), authenticator)),
        resolver,
        store: Arc::new(InMemoryStore::new(builtin_catalog())),
    };

    let (status, _) = app
        .send(request(Method::PUT, "/users/bob/roles/editor", Some("bob"), None))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .send(request(Method::PUT, "/users/bob/roles/editor", Some("alice"), None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["assigned"], true);

    let (status, _) = app
        .send(request(
            Method::PUT,
            "/resources/PROJECT/p1/members/carol",
            Some("alice"),
            Some(json!({"role": "editor"})),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    // Re-applying the same assignments is a no-op.
    bootstrap::seed_assignments(&config, &app.resolver).await.unwrap();
    let (_, body) = app.send(check(Some("bob"), json!({"slug": "projects.edit"}))).await;
    assert_eq!(body["can"], true);
}

#[tokio::test]
async fn test_bootstrap_rejects_unknown_role() {
    let mut config = Config::default();
    config.bootstrap.assignments.push(RoleAssignment {
        user: "alice".into(),
        role: "overlord".into(),
    });
    assert!(bootstrap::build_resolver(&config).await.is_err());
}

#[tokio::test]
async fn test_catalog_routes() {
    let app = app().await;
    app.grant_role("root", "admin").await;
    app.grant_role("vic", "viewer").await;

    let (status, body) = app.send(request(Method::GET, "/catalog", Some("vic"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["permissions"].as_array().is_some());

    let (status, _) = app
        .send(request(Method::POST, "/catalog/reload", Some("vic"), None))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .send(request(Method::POST, "/catalog/reload", Some("root"), None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["version"], 2);
    assert_eq!(body["data"]["reloaded_by"], "root");
}

#[tokio::test]
async fn test_health() {
    let app = app().await;
    let (status, body) = app.send(request(Method::GET, "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    app.store.set_available(false);
    let (status, _) = app.send(request(Method::GET, "/health", None, None)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
