//! Permission resolver.
//!
//! Answers "can user U do `slug`, optionally on resource R?" by combining
//! global role grants from the catalog with per-resource membership
//! overrides. Everything that is not an explicit grant resolves to `false`;
//! only storage failures surface as errors.

use metrics::{counter, histogram};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, instrument};

use super::catalog::{CatalogHandle, CatalogSnapshot};
use super::membership::MembershipManager;
use super::models::{
    CheckRequest, DenyReason, GrantSource, PermissionDecision, PermissionSlug, ResourceMember,
    ResourceRef, RoleSlug, UserId,
};
use crate::cache::{CacheEpoch, ResolverCache};
use crate::config::Config;
use crate::error::{Result, WardenError};
use crate::store::{MembershipStore, RoleStore};

// ═══════════════════════════════════════════════════════════════════════════════
// Options
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
pub struct ResolverOptions {
    /// Bound on the storage lookups behind one check.
    pub lookup_timeout: Duration,
    /// Catalog snapshot age that triggers a reload; zero disables reloads.
    pub catalog_ttl: Duration,
}

impl ResolverOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            lookup_timeout: config.resolver.lookup_timeout,
            catalog_ttl: config.cache.catalog_ttl,
        }
    }
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Resolver
// ═══════════════════════════════════════════════════════════════════════════════

/// Decision core shared by single and batch checks.
#[derive(Clone)]
pub struct PermissionResolver {
    catalog: Arc<CatalogHandle>,
    roles: Arc<dyn RoleStore>,
    members: Arc<dyn MembershipStore>,
    cache: Arc<ResolverCache>,
    options: ResolverOptions,
}

impl PermissionResolver {
    pub fn new(
        catalog: Arc<CatalogHandle>,
        roles: Arc<dyn RoleStore>,
        members: Arc<dyn MembershipStore>,
        cache: Arc<ResolverCache>,
        options: ResolverOptions,
    ) -> Self {
        Self {
            catalog,
            roles,
            members,
            cache,
            options,
        }
    }

    pub fn catalog(&self) -> &Arc<CatalogHandle> {
        &self.catalog
    }

    pub fn cache(&self) -> &Arc<ResolverCache> {
        &self.cache
    }

    pub fn role_store(&self) -> &Arc<dyn RoleStore> {
        &self.roles
    }

    pub fn membership_store(&self) -> &Arc<dyn MembershipStore> {
        &self.members
    }

    /// Write path sharing this resolver's stores, catalog and cache.
    pub fn membership_manager(&self) -> MembershipManager {
        MembershipManager::new(
            Arc::clone(&self.catalog),
            Arc::clone(&self.roles),
            Arc::clone(&self.members),
            Arc::clone(&self.cache),
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Single checks
    // ─────────────────────────────────────────────────────────────────────────

    /// `true` only for an explicit global or exact-scope grant.
    pub async fn can(&self, user: &UserId, request: &CheckRequest) -> Result<bool> {
        self.decide(user, request).await.map(|d| d.can)
    }

    /// Resolve one check and report where the answer came from.
    #[instrument(
        skip_all,
        fields(user_id = %user, slug = %request.slug, scope = ?request.scope)
    )]
    pub async fn decide(&self, user: &UserId, request: &CheckRequest) -> Result<PermissionDecision> {
        let catalog = self.current_catalog().await;
        let slug = &request.slug;

        let decision = if !catalog.contains(slug.as_str()) {
            PermissionDecision::deny(slug.clone(), DenyReason::UnknownPermission)
        } else if matches!(&request.scope, Some(r) if !catalog.is_admissible(slug.as_str(), r.kind())) {
            PermissionDecision::deny(slug.clone(), DenyReason::ScopeNotAdmissible)
        } else {
            let (roles, member) = self.lookup(user, request.scope.as_ref()).await?;
            evaluate(&catalog, slug, roles.as_deref(), member.as_deref())
        };

        counter!(
            "warden_checks_total",
            "outcome" => if decision.can { "allow" } else { "deny" },
            "source" => decision.source_label(),
        )
        .increment(1);
        debug!(can = decision.can, source = decision.source_label(), "Permission resolved");

        Ok(decision)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Batch checks
    // ─────────────────────────────────────────────────────────────────────────

    /// Resolve many global slugs with a single role lookup.
    ///
    /// Duplicates collapse into one entry. No resource scope is considered.
    #[instrument(skip_all, fields(user_id = %user, requested = slugs.len()))]
    pub async fn can_many<S: AsRef<str>>(
        &self,
        user: &UserId,
        slugs: &[S],
    ) -> Result<BTreeMap<String, bool>> {
        validate_batch(slugs)?;

        let catalog = self.current_catalog().await;
        let started = Instant::now();
        let epoch = self.cache.epoch();
        let roles = tokio::time::timeout(self.options.lookup_timeout, self.load_roles(user, epoch))
            .await
            .map_err(WardenError::from)
            .and_then(|r| r)
            .map_err(log_storage_failure)?;
        histogram!("warden_lookup_duration_seconds").record(started.elapsed().as_secs_f64());

        let decisions: BTreeMap<String, bool> = slugs
            .iter()
            .map(|slug| {
                let slug = slug.as_ref();
                let can = roles
                    .as_deref()
                    .map(|roles| roles.iter().any(|r| catalog.role_grants_slug(r.as_str(), slug)))
                    .unwrap_or(false);
                (slug.to_string(), can)
            })
            .collect();

        counter!("warden_batch_checks_total").increment(1);
        counter!("warden_batch_slugs_total").increment(decisions.len() as u64);
        debug!(
            distinct = decisions.len(),
            granted = decisions.values().filter(|c| **c).count(),
            "Batch resolved"
        );

        Ok(decisions)
    }

    /// Boundary form of [`can_many`](Self::can_many): without an identity
    /// every slug maps to `false`.
    pub async fn can_many_as<S: AsRef<str>>(
        &self,
        user: Option<&UserId>,
        slugs: &[S],
    ) -> Result<BTreeMap<String, bool>> {
        match user {
            Some(user) => self.can_many(user, slugs).await,
            None => {
                validate_batch(slugs)?;
                Ok(slugs
                    .iter()
                    .map(|s| (s.as_ref().to_string(), false))
                    .collect())
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lookups
    // ─────────────────────────────────────────────────────────────────────────

    async fn current_catalog(&self) -> Arc<CatalogSnapshot> {
        self.catalog
            .refresh_if_stale(self.roles.as_ref(), self.options.catalog_ttl)
            .await;
        self.catalog.load()
    }

    /// Both lookups run concurrently under one timeout; if either fails or
    /// the deadline passes, the other is dropped with it.
    async fn lookup(
        &self,
        user: &UserId,
        scope: Option<&ResourceRef>,
    ) -> Result<(Option<Arc<[RoleSlug]>>, Option<Arc<ResourceMember>>)> {
        let started = Instant::now();
        let epoch = self.cache.epoch();

        let joined = async {
            tokio::try_join!(self.load_roles(user, epoch), self.load_member(user, scope, epoch))
        };
        let result = tokio::time::timeout(self.options.lookup_timeout, joined)
            .await
            .map_err(WardenError::from)
            .and_then(|r| r)
            .map_err(log_storage_failure);

        histogram!("warden_lookup_duration_seconds").record(started.elapsed().as_secs_f64());
        result
    }

    async fn load_roles(&self, user: &UserId, epoch: CacheEpoch) -> Result<Option<Arc<[RoleSlug]>>> {
        if let Some(cached) = self.cache.get_roles(user) {
            return Ok(cached);
        }
        let roles = self.roles.user_roles(user).await?;
        self.cache.put_roles(epoch, user, roles.clone());
        Ok(roles.map(Arc::from))
    }

    async fn load_member(
        &self,
        user: &UserId,
        scope: Option<&ResourceRef>,
        epoch: CacheEpoch,
    ) -> Result<Option<Arc<ResourceMember>>> {
        let Some(resource) = scope else {
            return Ok(None);
        };
        if let Some(cached) = self.cache.get_member(user, resource) {
            return Ok(cached);
        }
        let member = self.members.find_member(user, resource).await?;
        self.cache.put_member(epoch, user, resource, member.clone());
        Ok(member.map(Arc::new))
    }
}

impl std::fmt::Debug for PermissionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionResolver")
            .field("catalog", &self.catalog)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Evaluation
// ═══════════════════════════════════════════════════════════════════════════════

/// Pure decision over already-loaded data.
///
/// `roles == None` means the user is unknown. `member` must already be the
/// membership on the exact requested resource.
pub fn evaluate(
    catalog: &CatalogSnapshot,
    slug: &PermissionSlug,
    roles: Option<&[RoleSlug]>,
    member: Option<&ResourceMember>,
) -> PermissionDecision {
    let Some(roles) = roles else {
        return PermissionDecision::deny(slug.clone(), DenyReason::UnknownUser);
    };

    if let Some(role) = roles
        .iter()
        .find(|r| catalog.role_grants_slug(r.as_str(), slug.as_str()))
    {
        return PermissionDecision::allow(slug.clone(), GrantSource::GlobalRole { role: role.clone() });
    }

    if let Some(member) = member {
        if member.has_explicit(slug.as_str()) {
            return PermissionDecision::allow(
                slug.clone(),
                GrantSource::ResourceMembership {
                    resource: member.resource.clone(),
                    via_role: None,
                },
            );
        }
        if let Some(role) = member
            .role
            .as_ref()
            .filter(|r| catalog.role_grants_slug(r.as_str(), slug.as_str()))
        {
            return PermissionDecision::allow(
                slug.clone(),
                GrantSource::ResourceMembership {
                    resource: member.resource.clone(),
                    via_role: Some(role.clone()),
                },
            );
        }
    }

    PermissionDecision::deny(slug.clone(), DenyReason::NoGrant)
}

fn validate_batch<S: AsRef<str>>(slugs: &[S]) -> Result<()> {
    if slugs.is_empty() {
        return Err(WardenError::invalid_argument("At least one slug is required"));
    }
    if slugs.iter().any(|s| s.as_ref().trim().is_empty()) {
        return Err(WardenError::missing_slug());
    }
    Ok(())
}

fn log_storage_failure(e: WardenError) -> WardenError {
    error!(error = %e, retryable = e.is_retryable(), "Permission lookup failed");
    e
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
