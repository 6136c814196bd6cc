//! PostgreSQL store.
//!
//! Uses sqlx with runtime-checked queries against the schema in `migrations/`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::collections::{BTreeSet, HashMap};
use tracing::{info, instrument};
use uuid::Uuid;

use super::{MembershipStore, RoleStore};
use crate::config::DatabaseConfig;
use crate::error::{Result, WardenError};
use crate::rbac::catalog::{CatalogDefinition, CatalogSnapshot, PermissionDef, RoleDef};
use crate::rbac::models::{PermissionSlug, ResourceKind, ResourceMember, ResourceRef, RoleSlug, UserId};

/// Role and membership store backed by PostgreSQL.
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new connection pool.
    pub async fn connect(config: &DatabaseConfig, url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Write a catalog definition.
    ///
    /// Permissions are insert-only: an existing slug keeps its stored
    /// definition. Roles are upserted and their grants replaced with the
    /// expanded set.
    #[instrument(skip(self, definition))]
    pub async fn seed_catalog(&self, definition: &CatalogDefinition) -> Result<()> {
        let snapshot = CatalogSnapshot::build(definition.clone())?;
        let mut tx = self.pool.begin().await?;

        for perm in &definition.permissions {
            let scopes: Vec<&str> = perm.scopes.iter().map(|k| k.as_str()).collect();
            sqlx::query(
                r#"
                INSERT INTO permissions (slug, name, description, scopes)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (slug) DO NOTHING
                "#,
            )
            .bind(perm.slug.as_str())
            .bind(&perm.name)
            .bind(&perm.description)
            .bind(&scopes)
            .execute(&mut *tx)
            .await?;
        }

        for role in &definition.roles {
            sqlx::query(
                r#"
                INSERT INTO roles (slug, name, description)
                VALUES ($1, $2, $3)
                ON CONFLICT (slug) DO UPDATE
                SET name = EXCLUDED.name, description = EXCLUDED.description
                "#,
            )
            .bind(role.slug.as_str())
            .bind(&role.name)
            .bind(&role.description)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM role_grants WHERE role_slug = $1")
                .bind(role.slug.as_str())
                .execute(&mut *tx)
                .await?;

            let grants: Vec<String> = snapshot
                .role_grants(role.slug.as_str())
                .map(|g| g.iter().map(|s| s.to_string()).collect())
                .unwrap_or_default();

            sqlx::query(
                r#"
                INSERT INTO role_grants (role_slug, permission_slug)
                SELECT $1, UNNEST($2::TEXT[])
                "#,
            )
            .bind(role.slug.as_str())
            .bind(&grants)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(
            permissions = definition.permissions.len(),
            roles = definition.roles.len(),
            "Seeded permission catalog"
        );
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Rows
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, sqlx::FromRow)]
struct PermissionRow {
    slug: String,
    name: String,
    description: Option<String>,
    scopes: Vec<String>,
}

impl TryFrom<PermissionRow> for PermissionDef {
    type Error = WardenError;

    fn try_from(row: PermissionRow) -> Result<Self> {
        let scopes = row
            .scopes
            .iter()
            .map(|s| s.parse::<ResourceKind>())
            .collect::<Result<Vec<_>>>()
            .map_err(|e| {
                WardenError::catalog_invalid(format!("permission '{}' has a bad scope", row.slug))
                    .with_source(e)
            })?;
        Ok(Self {
            slug: PermissionSlug::from(row.slug),
            name: row.name,
            description: row.description,
            scopes,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RoleRow {
    slug: String,
    name: String,
    description: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct MemberRow {
    id: Uuid,
    user_id: String,
    reference_table: String,
    reference_id: String,
    role_slug: Option<String>,
    permissions: Vec<String>,
    granted_by: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MemberRow> for ResourceMember {
    type Error = WardenError;

    fn try_from(row: MemberRow) -> Result<Self> {
        let kind = row.reference_table.parse::<ResourceKind>().map_err(|e| {
            WardenError::internal(format!("stored member {} has a bad reference_table", row.id))
                .with_source(e)
        })?;
        Ok(Self {
            id: row.id,
            user_id: UserId::from(row.user_id),
            resource: ResourceRef::new(kind, row.reference_id)?,
            role: row.role_slug.map(RoleSlug::from),
            permissions: row.permissions.into_iter().map(PermissionSlug::from).collect::<BTreeSet<_>>(),
            created_at: row.created_at,
            granted_by: row.granted_by.map(UserId::from),
        })
    }
}

const MEMBER_COLUMNS: &str = "id, user_id, reference_table, reference_id, role_slug, permissions, granted_by, created_at";

// ═══════════════════════════════════════════════════════════════════════════════
// Role Store
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl RoleStore for PgStore {
    async fn user_roles(&self, user: &UserId) -> Result<Option<Vec<RoleSlug>>> {
        let rows: Vec<(Option<String>,)> = sqlx::query_as(
            r#"
            SELECT ur.role_slug
            FROM users u
            LEFT JOIN user_roles ur ON ur.user_id = u.id
            WHERE u.id = $1
            "#,
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            rows.into_iter()
                .filter_map(|(role,)| role.map(RoleSlug::from))
                .collect(),
        ))
    }

    async fn load_catalog(&self) -> Result<CatalogDefinition> {
        let permission_rows = sqlx::query_as::<_, PermissionRow>(
            "SELECT slug, name, description, scopes FROM permissions ORDER BY slug",
        )
        .fetch_all(&self.pool)
        .await?;

        let role_rows = sqlx::query_as::<_, RoleRow>(
            "SELECT slug, name, description FROM roles ORDER BY slug",
        )
        .fetch_all(&self.pool)
        .await?;

        let grant_rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT role_slug, permission_slug FROM role_grants ORDER BY role_slug, permission_slug",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut grants: HashMap<String, Vec<String>> = HashMap::new();
        for (role, permission) in grant_rows {
            grants.entry(role).or_default().push(permission);
        }

        let permissions = permission_rows
            .into_iter()
            .map(PermissionDef::try_from)
            .collect::<Result<Vec<_>>>()?;

        let roles = role_rows
            .into_iter()
            .map(|row| RoleDef {
                permissions: grants.remove(&row.slug).unwrap_or_default(),
                slug: RoleSlug::from(row.slug),
                name: row.name,
                description: row.description,
            })
            .collect();

        Ok(CatalogDefinition { permissions, roles })
    }

    async fn register_user(&self, user: &UserId) -> Result<()> {
        sqlx::query("INSERT INTO users (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(user.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn assign_role(&self, user: &UserId, role: &RoleSlug) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO users (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(user.as_str())
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(
            r#"
            INSERT INTO user_roles (user_id, role_slug)
            VALUES ($1, $2)
            ON CONFLICT (user_id, role_slug) DO NOTHING
            "#,
        )
        .bind(user.as_str())
        .bind(role.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn unassign_role(&self, user: &UserId, role: &RoleSlug) -> Result<bool> {
        let result = sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role_slug = $2")
            .bind(user.as_str())
            .bind(role.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Membership Store
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl MembershipStore for PgStore {
    async fn find_member(
        &self,
        user: &UserId,
        resource: &ResourceRef,
    ) -> Result<Option<ResourceMember>> {
        let row = sqlx::query_as::<_, MemberRow>(&format!(
            "SELECT {MEMBER_COLUMNS} FROM resource_members \
             WHERE user_id = $1 AND reference_table = $2 AND reference_id = $3"
        ))
        .bind(user.as_str())
        .bind(resource.reference_table.as_str())
        .bind(&resource.reference_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ResourceMember::try_from).transpose()
    }

    async fn list_members(&self, resource: &ResourceRef) -> Result<Vec<ResourceMember>> {
        let rows = sqlx::query_as::<_, MemberRow>(&format!(
            "SELECT {MEMBER_COLUMNS} FROM resource_members \
             WHERE reference_table = $1 AND reference_id = $2 \
             ORDER BY created_at, user_id"
        ))
        .bind(resource.reference_table.as_str())
        .bind(&resource.reference_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ResourceMember::try_from).collect()
    }

    async fn upsert_member(&self, member: &ResourceMember) -> Result<ResourceMember> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO users (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(member.user_id.as_str())
            .execute(&mut *tx)
            .await?;

        let permissions: Vec<&str> = member.permissions.iter().map(|p| p.as_str()).collect();
        let row = sqlx::query_as::<_, MemberRow>(&format!(
            r#"
            INSERT INTO resource_members
                (id, user_id, reference_table, reference_id, role_slug, permissions, granted_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT ON CONSTRAINT resource_members_unique_member DO UPDATE
            SET role_slug = EXCLUDED.role_slug,
                permissions = EXCLUDED.permissions,
                granted_by = EXCLUDED.granted_by
            RETURNING {MEMBER_COLUMNS}
            "#
        ))
        .bind(member.id)
        .bind(member.user_id.as_str())
        .bind(member.resource.reference_table.as_str())
        .bind(&member.resource.reference_id)
        .bind(member.role.as_ref().map(|r| r.as_str()))
        .bind(&permissions)
        .bind(member.granted_by.as_ref().map(|u| u.as_str()))
        .bind(member.created_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        ResourceMember::try_from(row)
    }

    async fn remove_member(&self, user: &UserId, resource: &ResourceRef) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM resource_members
            WHERE user_id = $1 AND reference_table = $2 AND reference_id = $3
            "#,
        )
        .bind(user.as_str())
        .bind(resource.reference_table.as_str())
        .bind(&resource.reference_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_resource(&self, resource: &ResourceRef) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM resource_members WHERE reference_table = $1 AND reference_id = $2",
        )
        .bind(resource.reference_table.as_str())
        .bind(&resource.reference_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| WardenError::storage_unavailable(e.to_string()).with_source(e))?;
        Ok(())
    }
}
