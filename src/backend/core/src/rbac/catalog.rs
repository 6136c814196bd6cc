//! Permission catalog: known slugs, their admissible scopes, and role grants.
//!
//! A [`CatalogSnapshot`] is immutable once built. [`CatalogHandle`] publishes
//! snapshots through an `ArcSwap`, so readers take a lock-free `Arc` and never
//! observe a half-updated catalog. Refreshing means building a complete new
//! snapshot and storing it with a single pointer swap.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::models::{PermissionSlug, ResourceKind, RoleSlug};
use crate::error::{Result, WardenError};
use crate::store::RoleStore;

// ═══════════════════════════════════════════════════════════════════════════════
// Definition
// ═══════════════════════════════════════════════════════════════════════════════

/// A permission as declared in a catalog definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDef {
    pub slug: PermissionSlug,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Resource kinds this permission may be scoped to. Empty means global-only.
    #[serde(default)]
    pub scopes: Vec<ResourceKind>,
}

impl PermissionDef {
    pub fn new(slug: &str, name: &str, scopes: &[ResourceKind]) -> Self {
        Self {
            slug: PermissionSlug::from(slug),
            name: name.to_string(),
            description: None,
            scopes: scopes.to_vec(),
        }
    }
}

/// A role as declared in a catalog definition.
///
/// Grant entries are exact slugs, `prefix.*` or `*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDef {
    pub slug: RoleSlug,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Serializable catalog source, loaded from TOML or the role store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogDefinition {
    #[serde(default)]
    pub permissions: Vec<PermissionDef>,
    #[serde(default)]
    pub roles: Vec<RoleDef>,
}

impl CatalogDefinition {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            WardenError::configuration(format!("Cannot read catalog {}", path.display()))
                .with_source(e)
        })?;
        Self::from_toml_str(&source)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Snapshot
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct RoleEntry {
    name: String,
    description: Option<String>,
    grants: HashSet<PermissionSlug>,
}

/// Immutable, validated catalog with role wildcards already expanded.
#[derive(Debug)]
pub struct CatalogSnapshot {
    version: u64,
    built_at: DateTime<Utc>,
    loaded_at: Instant,
    permissions: HashMap<PermissionSlug, PermissionDef>,
    roles: HashMap<RoleSlug, RoleEntry>,
    definition: CatalogDefinition,
}

impl CatalogSnapshot {
    /// Validate a definition and expand role wildcards.
    pub fn build(definition: CatalogDefinition) -> Result<Self> {
        let mut permissions = HashMap::with_capacity(definition.permissions.len());
        for def in &definition.permissions {
            if def.slug.is_empty() {
                return Err(WardenError::catalog_invalid("permission slug must not be empty"));
            }
            if def.slug.as_str().contains('*') {
                return Err(WardenError::catalog_invalid(format!(
                    "permission slug '{}' must not contain '*'",
                    def.slug
                )));
            }
            if permissions.insert(def.slug.clone(), def.clone()).is_some() {
                return Err(WardenError::catalog_invalid(format!(
                    "duplicate permission slug '{}'",
                    def.slug
                )));
            }
        }

        let mut roles = HashMap::with_capacity(definition.roles.len());
        for role in &definition.roles {
            if role.slug.is_empty() {
                return Err(WardenError::catalog_invalid("role slug must not be empty"));
            }
            let mut grants = HashSet::new();
            for pattern in &role.permissions {
                let matched = expand_pattern(pattern, &permissions);
                if matched.is_empty() {
                    return Err(WardenError::catalog_invalid(format!(
                        "role '{}' grants unknown permission '{}'",
                        role.slug, pattern
                    )));
                }
                grants.extend(matched);
            }
            let entry = RoleEntry {
                name: role.name.clone(),
                description: role.description.clone(),
                grants,
            };
            if roles.insert(role.slug.clone(), entry).is_some() {
                return Err(WardenError::catalog_invalid(format!(
                    "duplicate role slug '{}'",
                    role.slug
                )));
            }
        }

        Ok(Self {
            version: 0,
            built_at: Utc::now(),
            loaded_at: Instant::now(),
            permissions,
            roles,
            definition,
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn age(&self) -> Duration {
        self.loaded_at.elapsed()
    }

    pub fn definition(&self) -> &CatalogDefinition {
        &self.definition
    }

    pub fn permission(&self, slug: &str) -> Option<&PermissionDef> {
        self.permissions.get(slug)
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.permissions.contains_key(slug)
    }

    pub fn contains_role(&self, role: &str) -> bool {
        self.roles.contains_key(role)
    }

    /// Whether `slug` may be checked against a resource of `kind`.
    pub fn is_admissible(&self, slug: &str, kind: ResourceKind) -> bool {
        self.permissions
            .get(slug)
            .map(|p| p.scopes.contains(&kind))
            .unwrap_or(false)
    }

    /// Expanded grants of a role; `None` for a role the catalog does not know.
    pub fn role_grants(&self, role: &str) -> Option<&HashSet<PermissionSlug>> {
        self.roles.get(role).map(|r| &r.grants)
    }

    /// Whether `role` grants `slug`. Unknown roles grant nothing.
    pub fn role_grants_slug(&self, role: &str, slug: &str) -> bool {
        self.roles
            .get(role)
            .map(|r| r.grants.contains(slug))
            .unwrap_or(false)
    }

    /// Flat listing for display and the catalog endpoint.
    pub fn summary(&self) -> CatalogSummary {
        let mut permissions: Vec<PermissionDef> = self.permissions.values().cloned().collect();
        permissions.sort_by(|a, b| a.slug.cmp(&b.slug));

        let mut roles: Vec<RoleSummary> = self
            .roles
            .iter()
            .map(|(slug, entry)| RoleSummary {
                slug: slug.clone(),
                name: entry.name.clone(),
                description: entry.description.clone(),
                permissions: entry.grants.iter().cloned().collect(),
            })
            .collect();
        roles.sort_by(|a, b| a.slug.cmp(&b.slug));

        CatalogSummary {
            version: self.version,
            built_at: self.built_at,
            permissions,
            roles,
        }
    }
}

fn expand_pattern(
    pattern: &str,
    permissions: &HashMap<PermissionSlug, PermissionDef>,
) -> Vec<PermissionSlug> {
    if pattern == "*" {
        return permissions.keys().cloned().collect();
    }
    if let Some(prefix) = pattern.strip_suffix(".*") {
        let prefix = format!("{}.", prefix);
        return permissions
            .keys()
            .filter(|slug| slug.as_str().starts_with(&prefix))
            .cloned()
            .collect();
    }
    if permissions.contains_key(pattern) {
        vec![PermissionSlug::from(pattern)]
    } else {
        Vec::new()
    }
}

/// Serializable view of a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSummary {
    pub version: u64,
    pub built_at: DateTime<Utc>,
    pub permissions: Vec<PermissionDef>,
    pub roles: Vec<RoleSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleSummary {
    pub slug: RoleSlug,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub permissions: BTreeSet<PermissionSlug>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Handle
// ═══════════════════════════════════════════════════════════════════════════════

/// Shared, atomically swappable catalog.
pub struct CatalogHandle {
    current: ArcSwap<CatalogSnapshot>,
    next_version: AtomicU64,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl CatalogHandle {
    pub fn new(definition: CatalogDefinition) -> Result<Self> {
        let mut snapshot = CatalogSnapshot::build(definition)?;
        snapshot.version = 1;
        Ok(Self {
            current: ArcSwap::from_pointee(snapshot),
            next_version: AtomicU64::new(2),
            refresh_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Current snapshot. Lock-free; the returned `Arc` stays valid across swaps.
    pub fn load(&self) -> Arc<CatalogSnapshot> {
        self.current.load_full()
    }

    /// Build and publish a new snapshot. On failure the current one stays.
    pub fn publish(&self, definition: CatalogDefinition) -> Result<Arc<CatalogSnapshot>> {
        let mut snapshot = match CatalogSnapshot::build(definition) {
            Ok(s) => s,
            Err(e) => {
                counter!("warden_catalog_reloads_total", "outcome" => "invalid").increment(1);
                return Err(e);
            }
        };
        snapshot.version = self.next_version.fetch_add(1, Ordering::Relaxed);
        let snapshot = Arc::new(snapshot);
        self.current.store(Arc::clone(&snapshot));

        counter!("warden_catalog_reloads_total", "outcome" => "published").increment(1);
        info!(
            version = snapshot.version,
            permissions = snapshot.permissions.len(),
            roles = snapshot.roles.len(),
            "Published permission catalog"
        );
        Ok(snapshot)
    }

    /// Reload from the role store unconditionally.
    pub async fn reload(&self, source: &dyn RoleStore) -> Result<Arc<CatalogSnapshot>> {
        let _guard = self.refresh_lock.lock().await;
        let definition = source.load_catalog().await?;
        self.publish(definition)
    }

    /// Reload from the role store when the snapshot is older than `ttl`.
    ///
    /// Only one caller refreshes at a time; others keep reading the current
    /// snapshot. A zero `ttl` disables refresh. Failures are logged and the
    /// previous snapshot keeps serving.
    pub async fn refresh_if_stale(&self, source: &dyn RoleStore, ttl: Duration) -> bool {
        if ttl.is_zero() || self.current.load().age() < ttl {
            return false;
        }

        let Ok(_guard) = self.refresh_lock.try_lock() else {
            debug!("Catalog refresh already in flight");
            return false;
        };

        // Another caller may have refreshed while we waited for the guard.
        if self.current.load().age() < ttl {
            return false;
        }

        match source.load_catalog().await {
            Ok(definition) => match self.publish(definition) {
                Ok(_) => true,
                Err(e) => {
                    warn!(error = %e, "Refreshed catalog is invalid, keeping previous snapshot");
                    false
                }
            },
            Err(e) => {
                counter!("warden_catalog_reloads_total", "outcome" => "failed").increment(1);
                warn!(error = %e, "Catalog refresh failed, keeping previous snapshot");
                false
            }
        }
    }
}

impl std::fmt::Debug for CatalogHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let current = self.current.load();
        f.debug_struct("CatalogHandle")
            .field("version", &current.version)
            .field("permissions", &current.permissions.len())
            .field("roles", &current.roles.len())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    const SAMPLE: &str = r#"
        [[permissions]]
        slug = "projects.view"
        name = "View projects"
        scopes = ["PROJECT"]

        [[permissions]]
        slug = "projects.edit"
        name = "Edit projects"
        scopes = ["PROJECT"]

        [[permissions]]
        slug = "users.manage"
        name = "Manage users"

        [[roles]]
        slug = "admin"
        name = "Admin"
        permissions = ["*"]

        [[roles]]
        slug = "editor"
        name = "Editor"
        permissions = ["projects.*"]
    "#;

    fn sample() -> CatalogDefinition {
        CatalogDefinition::from_toml_str(SAMPLE).unwrap()
    }

    #[test]
    fn test_wildcards_expand_at_build() {
        let snapshot = CatalogSnapshot::build(sample()).unwrap();
        assert_eq!(snapshot.role_grants("admin").unwrap().len(), 3);
        assert!(snapshot.role_grants_slug("editor", "projects.edit"));
        assert!(!snapshot.role_grants_slug("editor", "users.manage"));
        assert!(!snapshot.role_grants_slug("ghost", "projects.view"));
    }

    #[test]
    fn test_admissibility() {
        let snapshot = CatalogSnapshot::build(sample()).unwrap();
        assert!(snapshot.is_admissible("projects.view", ResourceKind::Project));
        assert!(!snapshot.is_admissible("projects.view", ResourceKind::LegalInstrument));
        assert!(!snapshot.is_admissible("users.manage", ResourceKind::Project));
        assert!(!snapshot.is_admissible("unknown", ResourceKind::Project));
    }

    #[test]
    fn test_rejects_duplicate_permission() {
        let mut def = sample();
        def.permissions.push(def.permissions[0].clone());
        let err = CatalogSnapshot::build(def).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CatalogInvalid);
    }

    #[test]
    fn test_rejects_unknown_grant() {
        let mut def = sample();
        def.roles[1].permissions.push("work_plans.*".to_string());
        assert!(CatalogSnapshot::build(def).is_err());
    }

    #[test]
    fn test_rejects_bad_toml() {
        let err = CatalogDefinition::from_toml_str("permissions = 3").unwrap_err();
        assert_eq!(err.code(), ErrorCode::CatalogInvalid);
    }

    #[test]
    fn test_publish_swaps_whole_snapshot() {
        let handle = CatalogHandle::new(sample()).unwrap();
        let before = handle.load();
        assert_eq!(before.version(), 1);

        let mut def = sample();
        def.roles.retain(|r| r.slug.as_str() == "admin");
        let after = handle.publish(def).unwrap();

        assert_eq!(after.version(), 2);
        assert!(before.contains_role("editor"));
        assert!(!handle.load().contains_role("editor"));
    }

    #[test]
    fn test_failed_publish_keeps_current() {
        let handle = CatalogHandle::new(sample()).unwrap();
        let mut bad = sample();
        bad.roles[0].permissions = vec!["nope".to_string()];

        assert!(handle.publish(bad).is_err());
        assert_eq!(handle.load().version(), 1);
        assert!(handle.load().contains_role("editor"));
    }

    #[test]
    fn test_catalog_file_loading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let def = CatalogDefinition::from_file(&path).unwrap();
        assert_eq!(def.permissions.len(), 3);

        let missing = CatalogDefinition::from_file(dir.path().join("missing.toml"));
        assert_eq!(missing.unwrap_err().code(), ErrorCode::ConfigurationError);
    }

    #[test]
    fn test_summary_is_sorted() {
        let summary = CatalogSnapshot::build(sample()).unwrap().summary();
        let slugs: Vec<_> = summary.permissions.iter().map(|p| p.slug.as_str()).collect();
        assert_eq!(slugs, vec!["projects.edit", "projects.view", "users.manage"]);
        assert_eq!(summary.roles[0].slug.as_str(), "admin");
    }
}
