//! HTTP middleware for Warden Core.
pub mod auth;

pub use auth::{Authenticator, Claims, Identity, IdentityLayer, IdentityService, RequireUser};
