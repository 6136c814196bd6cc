//! Wiring: stores, catalog, cache and resolver from configuration.

use std::sync::Arc;
use tracing::info;

use crate::cache::ResolverCache;
use crate::config::Config;
use crate::error::Result;
use crate::rbac::{
    builtin_catalog, CatalogDefinition, CatalogHandle, PermissionResolver, ResolverOptions, RoleSlug,
    UserId,
};
use crate::store::{InMemoryStore, MembershipStore, PgStore, RoleStore};

/// Catalog from `catalog.path`, or the built-in one.
pub fn configured_catalog(config: &Config) -> Result<CatalogDefinition> {
    match &config.catalog.path {
        Some(path) => {
            info!(path = %path.display(), "Loading catalog definition");
            CatalogDefinition::from_file(path)
        }
        None => Ok(builtin_catalog()),
    }
}

/// Resolver over the given stores, with the catalog loaded from `roles`.
pub async fn resolver_with_stores(
    config: &Config,
    roles: Arc<dyn RoleStore>,
    members: Arc<dyn MembershipStore>,
) -> Result<PermissionResolver> {
    let catalog = Arc::new(CatalogHandle::new(roles.load_catalog().await?)?);
    let cache = Arc::new(ResolverCache::new(&config.cache));

    Ok(PermissionResolver::new(
        catalog,
        roles,
        members,
        cache,
        ResolverOptions::from_config(config),
    ))
}

/// Resolver backed by an in-memory store seeded with `catalog`.
pub async fn in_memory_resolver(
    config: &Config,
    catalog: CatalogDefinition,
) -> Result<(PermissionResolver, Arc<InMemoryStore>)> {
    let store = Arc::new(InMemoryStore::new(catalog));
    let resolver = resolver_with_stores(config, store.clone(), store.clone()).await?;
    Ok((resolver, store))
}

/// Apply `bootstrap.assignments` through the validated write path.
/// Assignments that already exist are left alone.
pub async fn seed_assignments(config: &Config, resolver: &PermissionResolver) -> Result<()> {
    let manager = resolver.membership_manager();
    for assignment in &config.bootstrap.assignments {
        let user = UserId::from(assignment.user.as_str());
        let role = RoleSlug::from(assignment.role.as_str());
        if manager.assign_role(&user, &role).await? {
            info!(user_id = %user, role = %role, "Bootstrap role assigned");
        }
    }
    Ok(())
}

/// Postgres when `database.url` is set, otherwise in-memory. Bootstrap
/// assignments are applied either way.
pub async fn build_resolver(config: &Config) -> Result<PermissionResolver> {
    let resolver = open_resolver(config).await?;
    seed_assignments(config, &resolver).await?;
    Ok(resolver)
}

async fn open_resolver(config: &Config) -> Result<PermissionResolver> {
    let catalog = configured_catalog(config)?;

    match &config.database.url {
        Some(url) => {
            let store = PgStore::connect(&config.database, url).await?;
            info!("Connected to database");
            if config.database.run_migrations {
                store.migrate().await?;
                info!("Migrations applied");
            }
            store.seed_catalog(&catalog).await?;

            let store = Arc::new(store);
            resolver_with_stores(config, store.clone(), store).await
        }
        None => {
            info!("No database configured, using in-memory store");
            Ok(in_memory_resolver(config, catalog).await?.0)
        }
    }
}
