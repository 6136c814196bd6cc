//! Identity resolution.
//!
//! Sessions are issued elsewhere. This layer only answers "who is asking" for
//! each request and stores the answer as an [`Identity`] extension:
//!
//! - `Authorization: Bearer <jwt>` verified with the configured HS256 secret,
//!   where `sub` is the user id
//! - `x-user-id`, only when an authenticating proxy is trusted to set it
//!
//! A missing or invalid credential yields an anonymous identity, never a
//! rejection. Routes decide what anonymity means: the check endpoint answers
//! 401, the batch endpoint maps every slug to `false`.
//!
//! # Example
//!
//! ```rust,ignore
//! let auth = Arc::new(Authenticator::from_config(&config.auth));
//! let app = Router::new()
//!     .route("/permissions/check", post(check))
//!     .layer(IdentityLayer::new(auth));
//! ```

use axum::{
    extract::{FromRequestParts, Request},
    http::{request::Parts, HeaderMap},
    response::Response,
};
use futures::future::BoxFuture;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::{
    convert::Infallible,
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};
use tracing::debug;

use crate::config::AuthConfig;
use crate::error::WardenError;
use crate::rbac::models::UserId;

pub const USER_HEADER: &str = "x-user-id";

// ═══════════════════════════════════════════════════════════════════════════════
// Claims
// ═══════════════════════════════════════════════════════════════════════════════

/// Session token claims Warden reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,

    /// Expiration timestamp
    pub exp: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Authenticator
// ═══════════════════════════════════════════════════════════════════════════════

/// Extracts a user id from request headers.
pub struct Authenticator {
    decoding_key: Option<DecodingKey>,
    validation: Validation,
    trust_user_header: bool,
}

impl Authenticator {
    pub fn from_config(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 30;
        if let Some(issuer) = &config.jwt_issuer {
            validation.set_issuer(&[issuer]);
        }

        Self {
            decoding_key: config
                .jwt_secret
                .as_deref()
                .map(|s| DecodingKey::from_secret(s.as_bytes())),
            validation,
            trust_user_header: config.trust_user_header,
        }
    }

    /// Accepts nothing; every request is anonymous.
    pub fn anonymous_only() -> Self {
        Self::from_config(&AuthConfig::default())
    }

    pub fn identify(&self, headers: &HeaderMap) -> Option<UserId> {
        if let Some(token) = bearer_token(headers) {
            return self.verify(token);
        }

        if self.trust_user_header {
            return headers
                .get(USER_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(UserId::from);
        }

        None
    }

    fn verify(&self, token: &str) -> Option<UserId> {
        let Some(key) = &self.decoding_key else {
            debug!("Bearer token presented but no JWT secret is configured");
            return None;
        };

        match decode::<Claims>(token, key, &self.validation) {
            Ok(data) if !data.claims.sub.trim().is_empty() => Some(UserId::from(data.claims.sub)),
            Ok(_) => {
                debug!("Token has an empty subject");
                None
            }
            Err(e) => {
                debug!(error = %e, "Token rejected");
                None
            }
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Extractors
// ═══════════════════════════════════════════════════════════════════════════════

/// The caller's identity, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity(pub Option<UserId>);

impl Identity {
    pub fn user(&self) -> Option<&UserId> {
        self.0.as_ref()
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<Identity>().cloned().unwrap_or_default())
    }
}

/// An authenticated caller; rejects with 401 otherwise.
#[derive(Debug, Clone)]
pub struct RequireUser(pub UserId);

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequireUser
where
    S: Send + Sync,
{
    type Rejection = WardenError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .and_then(|identity| identity.0.clone())
            .map(RequireUser)
            .ok_or_else(|| WardenError::unauthorized("Authentication required"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Layer
// ═══════════════════════════════════════════════════════════════════════════════

/// Resolves the caller and inserts an [`Identity`] extension.
#[derive(Clone)]
pub struct IdentityLayer {
    authenticator: Arc<Authenticator>,
}

impl IdentityLayer {
    pub fn new(authenticator: Arc<Authenticator>) -> Self {
        Self { authenticator }
    }
}

impl<S> Layer<S> for IdentityLayer {
    type Service = IdentityService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        IdentityService {
            inner,
            authenticator: Arc::clone(&self.authenticator),
        }
    }
}

#[derive(Clone)]
pub struct IdentityService<S> {
    inner: S,
    authenticator: Arc<Authenticator>,
}

impl<S> Service<Request> for IdentityService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request) -> Self::Future {
        let identity = Identity(self.authenticator.identify(request.headers()));
        request.extensions_mut().insert(identity);

        let mut inner = self.inner.clone();
        Box::pin(async move { inner.call(request).await })
    }
}
