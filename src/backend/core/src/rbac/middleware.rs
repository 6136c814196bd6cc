//! Route guard that requires a global permission.
//!
//! Reads the [`Identity`] inserted by the identity layer and asks the
//! resolver. No identity is 401, a denial is 403, and a storage failure is
//! the resolver's retryable error (503) rather than a denial.

use axum::{
    body::Body,
    extract::{FromRequestParts, Request},
    http::request::Parts,
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::warn;

use super::models::{CheckRequest, PermissionSlug, UserId};
use super::resolver::PermissionResolver;
use crate::error::WardenError;
use crate::middleware::auth::Identity;

// ═══════════════════════════════════════════════════════════════════════════════
// Guard Context
// ═══════════════════════════════════════════════════════════════════════════════

/// Inserted by the guard for downstream handlers.
#[derive(Debug, Clone)]
pub struct GuardContext {
    pub user_id: UserId,
    pub checked_permission: PermissionSlug,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for GuardContext
where
    S: Send + Sync,
{
    type Rejection = WardenError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<GuardContext>()
            .cloned()
            .ok_or_else(|| WardenError::internal("guard context missing; route is not guarded"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Layer
// ═══════════════════════════════════════════════════════════════════════════════

/// Layer that wraps services with permission enforcement.
///
/// # Example
///
/// ```rust,ignore
/// let app = Router::new()
///     .route("/catalog/reload", post(reload_catalog))
///     .layer(RequirePermissionLayer::new(resolver.clone(), "catalog.manage"));
/// ```
#[derive(Clone)]
pub struct RequirePermissionLayer {
    resolver: Arc<PermissionResolver>,
    permission: PermissionSlug,
}

impl RequirePermissionLayer {
    pub fn new(resolver: Arc<PermissionResolver>, permission: &str) -> Self {
        Self {
            resolver,
            permission: PermissionSlug::from(permission),
        }
    }
}

impl<S> Layer<S> for RequirePermissionLayer {
    type Service = RequirePermissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequirePermissionService {
            inner,
            resolver: Arc::clone(&self.resolver),
            permission: self.permission.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Service
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct RequirePermissionService<S> {
    inner: S,
    resolver: Arc<PermissionResolver>,
    permission: PermissionSlug,
}

impl<S> Service<Request<Body>> for RequirePermissionService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let resolver = Arc::clone(&self.resolver);
        let permission = self.permission.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let user_id = match request.extensions().get::<Identity>().and_then(|i| i.0.clone()) {
                Some(user) => user,
                None => {
                    return Ok(WardenError::unauthorized("Authentication required").into_response())
                }
            };

            let check = CheckRequest::global(permission.clone());
            match resolver.can(&user_id, &check).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(user_id = %user_id, permission = %permission, "Permission denied");
                    return Ok(WardenError::forbidden(format!(
                        "You do not have permission: {}",
                        permission
                    ))
                    .into_response());
                }
                Err(e) => return Ok(e.into_response()),
            }

            request.extensions_mut().insert(GuardContext {
                user_id,
                checked_permission: permission,
            });

            inner.call(request).await
        })
    }
}
