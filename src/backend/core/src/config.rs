//! Configuration management.
//!
//! Values come from an optional TOML file followed by `WARDEN__*` environment
//! variables, e.g. `WARDEN__CACHE__ROLE_TTL=10s`.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, WardenError};

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    /// Absent `url` selects the in-memory store.
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_acquire_timeout", with = "humantime_serde")]
    pub acquire_timeout: Duration,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout: default_acquire_timeout(),
            run_migrations: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// TTL of cached user role lists
    #[serde(default = "default_role_ttl", with = "humantime_serde")]
    pub role_ttl: Duration,

    /// TTL of cached membership lookups; zero disables membership caching
    #[serde(default = "default_membership_ttl", with = "humantime_serde")]
    pub membership_ttl: Duration,

    /// Age after which the catalog snapshot is reloaded from storage
    #[serde(default = "default_catalog_ttl", with = "humantime_serde")]
    pub catalog_ttl: Duration,

    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            role_ttl: default_role_ttl(),
            membership_ttl: default_membership_ttl(),
            catalog_ttl: default_catalog_ttl(),
            max_entries: default_max_entries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    /// Upper bound on the concurrent role + membership lookups of one check
    #[serde(default = "default_lookup_timeout", with = "humantime_serde")]
    pub lookup_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            lookup_timeout: default_lookup_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret for verifying session tokens
    #[serde(default)]
    pub jwt_secret: Option<String>,

    #[serde(default)]
    pub jwt_issuer: Option<String>,

    /// Accept `x-user-id` from an authenticating proxy
    #[serde(default)]
    pub trust_user_header: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogConfig {
    /// TOML catalog definition; the built-in catalog is used when absent
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Global roles applied at startup, so a fresh store has someone able to
/// administer it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub assignments: Vec<RoleAssignment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoleAssignment {
    pub user: String,
    pub role: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_true")]
    pub json_logging: bool,

    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: true,
            otlp_endpoint: None,
            metrics_enabled: true,
        }
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_acquire_timeout() -> Duration { Duration::from_secs(5) }
fn default_role_ttl() -> Duration { Duration::from_secs(5) }
fn default_membership_ttl() -> Duration { Duration::from_secs(1) }
fn default_catalog_ttl() -> Duration { Duration::from_secs(30) }
fn default_max_entries() -> usize { 100_000 }
fn default_lookup_timeout() -> Duration { Duration::from_secs(2) }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

impl Config {
    /// Load configuration from environment variables, plus the file named by
    /// `WARDEN_CONFIG` when set.
    pub fn load() -> Result<Self> {
        match std::env::var("WARDEN_CONFIG") {
            Ok(path) if !path.is_empty() => Self::from_file(&path),
            _ => Self::build(None),
        }
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> Result<Self> {
        Self::build(Some(path))
    }

    fn build(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("WARDEN")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.min_connections > self.database.max_connections {
            return Err(WardenError::configuration(
                "database.min_connections exceeds database.max_connections",
            ));
        }
        if self.resolver.lookup_timeout.is_zero() {
            return Err(WardenError::configuration("resolver.lookup_timeout must be positive"));
        }
        if matches!(&self.auth.jwt_secret, Some(secret) if secret.is_empty()) {
            return Err(WardenError::configuration("auth.jwt_secret must not be empty"));
        }
        if self
            .bootstrap
            .assignments
            .iter()
            .any(|a| a.user.trim().is_empty() || a.role.trim().is_empty())
        {
            return Err(WardenError::configuration(
                "bootstrap.assignments entries need a user and a role",
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert!(config.database.url.is_none());
        assert_eq!(config.cache.role_ttl, Duration::from_secs(5));
        assert_eq!(config.cache.membership_ttl, Duration::from_secs(1));
        assert_eq!(config.resolver.lookup_timeout, Duration::from_secs(2));
        assert!(!config.auth.trust_user_header);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_with_humantime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.toml");
        std::fs::write(
            &path,
            r#"
            [server]
            port = 9090

            [cache]
            role_ttl = "250ms"
            membership_ttl = "0s"

            [auth]
            trust_user_header = true

            [[bootstrap.assignments]]
            user = "alice"
            role = "admin"
            "#,
        )
        .unwrap();

        let config = Config::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.cache.role_ttl, Duration::from_millis(250));
        assert!(config.cache.membership_ttl.is_zero());
        assert_eq!(config.cache.catalog_ttl, Duration::from_secs(30));
        assert!(config.auth.trust_user_header);
        assert_eq!(
            config.bootstrap.assignments,
            vec![RoleAssignment {
                user: "alice".into(),
                role: "admin".into()
            }]
        );
    }

    #[test]
    fn test_validation_rejects_blank_bootstrap_assignment() {
        let mut config = Config::default();
        config.bootstrap.assignments.push(RoleAssignment {
            user: " ".into(),
            role: "admin".into(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_inverted_pool() {
        let mut config = Config::default();
        config.database.min_connections = 50;
        assert!(config.validate().is_err());
    }
}
