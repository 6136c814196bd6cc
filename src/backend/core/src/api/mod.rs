//! HTTP boundary for Warden Core.
//!
//! # Routes
//!
//! | Method | Path                                   | Guard                         |
//! |--------|----------------------------------------|-------------------------------|
//! | POST   | `/permissions/check`                   | session (401)                 |
//! | POST   | `/permissions/check-many`              | none; anonymous is all-false  |
//! | POST   | `/permissions/decide`                  | session (401)                 |
//! | GET    | `/resources/:kind/:id/members`         | kind's `*.members.manage`     |
//! | DELETE | `/resources/:kind/:id/members`         | kind's `*.members.manage`     |
//! | PUT    | `/resources/:kind/:id/members/:user`   | kind's `*.members.manage`     |
//! | DELETE | `/resources/:kind/:id/members/:user`   | kind's `*.members.manage`     |
//! | PUT    | `/users/:user/roles/:role`             | `users.manage`                |
//! | DELETE | `/users/:user/roles/:role`             | `users.manage`                |
//! | GET    | `/catalog`                             | session                       |
//! | POST   | `/catalog/reload`                      | `catalog.manage`              |
//! | GET    | `/health`, `/metrics`                  | none                          |
//!
//! The three `/permissions/*` routes keep the compatibility error shape
//! `{ "error": "<code>" }`; every other route uses [`ApiResponse`] or the
//! error envelope.

mod handlers;

use axum::{
    routing::{get, post, put},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::middleware::auth::{Authenticator, IdentityLayer};
use crate::rbac::{MembershipManager, PermissionResolver, RequirePermissionLayer};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<PermissionResolver>,
    pub memberships: MembershipManager,
    pub authenticator: Arc<Authenticator>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(resolver: Arc<PermissionResolver>, authenticator: Arc<Authenticator>) -> Self {
        Self {
            memberships: resolver.membership_manager(),
            resolver,
            authenticator,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Build the API router.
///
/// # Example
///
/// ```rust,ignore
/// let state = AppState::new(resolver, Arc::new(Authenticator::from_config(&config.auth)));
/// let app = build_router(state);
/// ```
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let users_admin = Router::new()
        .route(
            "/users/:user/roles/:role",
            put(handlers::assign_role).delete(handlers::unassign_role),
        )
        .route_layer(RequirePermissionLayer::new(
            Arc::clone(&state.resolver),
            "users.manage",
        ));

    let catalog_admin = Router::new()
        .route("/catalog/reload", post(handlers::reload_catalog))
        .route_layer(RequirePermissionLayer::new(
            Arc::clone(&state.resolver),
            "catalog.manage",
        ));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::prometheus_metrics))
        .route("/permissions/check", post(handlers::check_permission))
        .route("/permissions/check-many", post(handlers::check_many))
        .route("/permissions/decide", post(handlers::decide_permission))
        .route(
            "/resources/:kind/:id/members",
            get(handlers::list_members).delete(handlers::purge_members),
        )
        .route(
            "/resources/:kind/:id/members/:user",
            put(handlers::upsert_member).delete(handlers::remove_member),
        )
        .route("/catalog", get(handlers::get_catalog))
        .merge(users_admin)
        .merge(catalog_admin)
        .layer(IdentityLayer::new(Arc::clone(&state.authenticator)))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Success envelope for management routes. Failures use the error
/// envelope produced by [`crate::error::WardenError`].
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}
