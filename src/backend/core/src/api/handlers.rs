//! API request handlers.
//!
//! Management handlers return `Result<impl IntoResponse, WardenError>` so that
//! errors map to HTTP statuses through `WardenError`'s `IntoResponse`. The
//! permission check handlers answer with the compatibility shape instead.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ApiResponse, AppState};
use crate::cache::InvalidationEvent;
use crate::error::{ErrorCode, WardenError};
use crate::middleware::auth::{Identity, RequireUser};
use crate::rbac::{
    CheckRequest, GuardContext, MemberGrant, ResourceKind, ResourceRef, RoleSlug, UserId,
};

// ═══════════════════════════════════════════════════════════════════════════════
// Compatibility Errors
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
struct CompatError {
    error: &'static str,
}

fn compat_error(status: StatusCode, code: &'static str) -> Response {
    (status, Json(CompatError { error: code })).into_response()
}

fn unauthorized() -> Response {
    compat_error(StatusCode::UNAUTHORIZED, "unauthorized")
}

/// Argument errors keep the short wire code; anything else is the envelope.
fn compat_from(err: WardenError) -> Response {
    match err.code() {
        ErrorCode::MissingSlug => compat_error(StatusCode::BAD_REQUEST, "missing_slug"),
        ErrorCode::InvalidArgument => compat_error(StatusCode::BAD_REQUEST, "invalid_reference"),
        ErrorCode::InvalidResourceKind => {
            compat_error(StatusCode::BAD_REQUEST, "invalid_reference_table")
        }
        _ => err.into_response(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Health / Metrics
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn health_check(State(state): State<AppState>) -> Result<impl IntoResponse, WardenError> {
    state.resolver.membership_store().health_check().await?;
    let catalog = state.resolver.catalog().load();

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "catalog_version": catalog.version(),
        "cache": state.resolver.cache().stats(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

pub async fn prometheus_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Permission Checks
// ═══════════════════════════════════════════════════════════════════════════════

/// Body of `/permissions/check` and `/permissions/decide`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckBody {
    pub slug: Option<String>,
    pub reference_table: Option<String>,
    pub reference_id: Option<String>,
}

impl CheckBody {
    fn into_request(self) -> crate::error::Result<CheckRequest> {
        CheckRequest::from_parts(
            self.slug.as_deref(),
            self.reference_table.as_deref(),
            self.reference_id.as_deref(),
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckResponse {
    pub can: bool,
}

pub async fn check_permission(
    State(state): State<AppState>,
    identity: Identity,
    body: Result<Json<CheckBody>, JsonRejection>,
) -> Response {
    let Some(user) = identity.0 else {
        return unauthorized();
    };
    let Ok(Json(body)) = body else {
        return compat_error(StatusCode::BAD_REQUEST, "invalid_body");
    };
    let request = match body.into_request() {
        Ok(request) => request,
        Err(e) => return compat_from(e),
    };

    match state.resolver.can(&user, &request).await {
        Ok(can) => Json(CheckResponse { can }).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn decide_permission(
    State(state): State<AppState>,
    identity: Identity,
    body: Result<Json<CheckBody>, JsonRejection>,
) -> Response {
    let Some(user) = identity.0 else {
        return unauthorized();
    };
    let Ok(Json(body)) = body else {
        return compat_error(StatusCode::BAD_REQUEST, "invalid_body");
    };
    let request = match body.into_request() {
        Ok(request) => request,
        Err(e) => return compat_from(e),
    };

    match state.resolver.decide(&user, &request).await {
        Ok(decision) => Json(decision).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckManyBody {
    #[serde(default)]
    pub slugs: Vec<String>,
}

/// Anonymous callers get every slug mapped to `false`.
pub async fn check_many(
    State(state): State<AppState>,
    identity: Identity,
    body: Result<Json<CheckManyBody>, JsonRejection>,
) -> Response {
    let Ok(Json(body)) = body else {
        return compat_error(StatusCode::BAD_REQUEST, "invalid_body");
    };
    if body.slugs.is_empty() {
        return compat_error(StatusCode::BAD_REQUEST, "missing_slugs");
    }

    match state.resolver.can_many_as(identity.user(), &body.slugs).await {
        Ok(decisions) => Json(decisions).into_response(),
        Err(e) => compat_from(e),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Resource Members
// ═══════════════════════════════════════════════════════════════════════════════

fn resource_from_path(kind: &str, id: &str) -> crate::error::Result<ResourceRef> {
    ResourceRef::new(kind.parse::<ResourceKind>()?, id)
}

/// The caller must hold the kind's members-manage slug, globally or on this
/// exact resource.
async fn authorize_members_manage(
    state: &AppState,
    caller: &UserId,
    resource: &ResourceRef,
) -> Result<(), WardenError> {
    let slug = resource.kind().members_manage_slug();
    let check = CheckRequest::scoped(slug, resource.clone());
    if state.resolver.can(caller, &check).await? {
        Ok(())
    } else {
        Err(WardenError::forbidden(format!("You do not have permission: {}", slug)))
    }
}

pub async fn list_members(
    State(state): State<AppState>,
    RequireUser(caller): RequireUser,
    Path((kind, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, WardenError> {
    let resource = resource_from_path(&kind, &id)?;
    authorize_members_manage(&state, &caller, &resource).await?;

    let members = state.memberships.list_members(&resource).await?;
    Ok(Json(ApiResponse::success(members)))
}

pub async fn upsert_member(
    State(state): State<AppState>,
    RequireUser(caller): RequireUser,
    Path((kind, id, user)): Path<(String, String, String)>,
    Json(grant): Json<MemberGrant>,
) -> Result<impl IntoResponse, WardenError> {
    let resource = resource_from_path(&kind, &id)?;
    authorize_members_manage(&state, &caller, &resource).await?;

    let member = state
        .memberships
        .upsert_member(UserId::from(user), resource, grant, Some(caller))
        .await?;
    Ok(Json(ApiResponse::success(member)))
}

pub async fn remove_member(
    State(state): State<AppState>,
    RequireUser(caller): RequireUser,
    Path((kind, id, user)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, WardenError> {
    let resource = resource_from_path(&kind, &id)?;
    authorize_members_manage(&state, &caller, &resource).await?;

    let user = UserId::from(user);
    if !state.memberships.remove_member(&user, &resource).await? {
        return Err(WardenError::not_found("ResourceMember", format!("{}@{}", user, resource)));
    }
    Ok(Json(ApiResponse::success(serde_json::json!({ "removed": true }))))
}

pub async fn purge_members(
    State(state): State<AppState>,
    RequireUser(caller): RequireUser,
    Path((kind, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, WardenError> {
    let resource = resource_from_path(&kind, &id)?;
    authorize_members_manage(&state, &caller, &resource).await?;

    let removed = state.memberships.remove_resource(&resource).await?;
    Ok(Json(ApiResponse::success(serde_json::json!({ "removed": removed }))))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Global Roles
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn assign_role(
    State(state): State<AppState>,
    guard: GuardContext,
    Path((user, role)): Path<(String, String)>,
) -> Result<impl IntoResponse, WardenError> {
    let assigned = state
        .memberships
        .assign_role(&UserId::from(user.as_str()), &RoleSlug::from(role.as_str()))
        .await?;
    if assigned {
        info!(user_id = %user, role = %role, assigned_by = %guard.user_id, "Role assigned via API");
    }
    Ok(Json(ApiResponse::success(serde_json::json!({
        "assigned": assigned,
        "changed_by": guard.user_id,
    }))))
}

pub async fn unassign_role(
    State(state): State<AppState>,
    guard: GuardContext,
    Path((user, role)): Path<(String, String)>,
) -> Result<impl IntoResponse, WardenError> {
    let removed = state
        .memberships
        .unassign_role(&UserId::from(user.as_str()), &RoleSlug::from(role.as_str()))
        .await?;
    if removed {
        info!(user_id = %user, role = %role, removed_by = %guard.user_id, "Role removed via API");
    }
    Ok(Json(ApiResponse::success(serde_json::json!({
        "removed": removed,
        "changed_by": guard.user_id,
    }))))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Catalog
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn get_catalog(
    State(state): State<AppState>,
    RequireUser(_caller): RequireUser,
) -> impl IntoResponse {
    Json(ApiResponse::success(state.resolver.catalog().load().summary()))
}

pub async fn reload_catalog(
    State(state): State<AppState>,
    guard: GuardContext,
) -> Result<impl IntoResponse, WardenError> {
    let snapshot = state
        .resolver
        .catalog()
        .reload(state.resolver.role_store().as_ref())
        .await?;
    state.resolver.cache().invalidate(InvalidationEvent::All);

    info!(
        version = snapshot.version(),
        requested_by = %guard.user_id,
        "Catalog reloaded on request"
    );
    Ok(Json(ApiResponse::success(serde_json::json!({
        "version": snapshot.version(),
        "built_at": snapshot.built_at(),
        "reloaded_by": guard.user_id,
    }))))
}
