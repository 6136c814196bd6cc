//! Authorization data model: identifiers, resource references, memberships and decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Result, WardenError};

// ═══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════════

macro_rules! slug_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

slug_newtype!(
    /// Opaque user identifier supplied by the external session provider.
    UserId
);

slug_newtype!(
    /// Unique role slug, e.g. `admin`.
    RoleSlug
);

slug_newtype!(
    /// Unique permission slug, e.g. `legal_instruments.manage`.
    PermissionSlug
);

// ═══════════════════════════════════════════════════════════════════════════════
// Resource Kinds
// ═══════════════════════════════════════════════════════════════════════════════

/// Closed set of resource kinds that support per-instance membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceKind {
    Project,
    LegalInstrument,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 2] = [ResourceKind::Project, ResourceKind::LegalInstrument];

    /// Wire and storage name (`reference_table` column value).
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "PROJECT",
            Self::LegalInstrument => "LEGAL_INSTRUMENT",
        }
    }

    /// Slug a caller needs to manage members of a resource of this kind.
    pub const fn members_manage_slug(&self) -> &'static str {
        match self {
            Self::Project => "projects.members.manage",
            Self::LegalInstrument => "legal_instruments.members.manage",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PROJECT" => Ok(Self::Project),
            "LEGAL_INSTRUMENT" => Ok(Self::LegalInstrument),
            other => Err(WardenError::invalid_resource_kind(other)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Resource Reference
// ═══════════════════════════════════════════════════════════════════════════════

/// Identifies one resource instance, e.g. `(PROJECT, "proj-123")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    pub reference_table: ResourceKind,
    pub reference_id: String,
}

impl ResourceRef {
    pub fn new(reference_table: ResourceKind, reference_id: impl Into<String>) -> Result<Self> {
        let reference_id = reference_id.into();
        if reference_id.trim().is_empty() {
            return Err(WardenError::invalid_argument("referenceId must not be empty"));
        }
        Ok(Self {
            reference_table,
            reference_id,
        })
    }

    pub fn project(id: impl Into<String>) -> Result<Self> {
        Self::new(ResourceKind::Project, id)
    }

    pub fn legal_instrument(id: impl Into<String>) -> Result<Self> {
        Self::new(ResourceKind::LegalInstrument, id)
    }

    pub fn kind(&self) -> ResourceKind {
        self.reference_table
    }

    pub fn id(&self) -> &str {
        &self.reference_id
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.reference_table, self.reference_id)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Resource Member
// ═══════════════════════════════════════════════════════════════════════════════

/// A per-resource override granting a user access to one resource instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMember {
    pub id: Uuid,
    pub user_id: UserId,
    pub resource: ResourceRef,
    /// Member role; its catalog grants apply on this resource only.
    pub role: Option<RoleSlug>,
    /// Explicit permission slugs granted on this resource.
    #[serde(default)]
    pub permissions: BTreeSet<PermissionSlug>,
    pub created_at: DateTime<Utc>,
    pub granted_by: Option<UserId>,
}

impl ResourceMember {
    pub fn new(user_id: UserId, resource: ResourceRef) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            resource,
            role: None,
            permissions: BTreeSet::new(),
            created_at: Utc::now(),
            granted_by: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<RoleSlug>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_permission(mut self, slug: impl Into<PermissionSlug>) -> Self {
        self.permissions.insert(slug.into());
        self
    }

    pub fn with_permissions<I, S>(mut self, slugs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<PermissionSlug>,
    {
        self.permissions.extend(slugs.into_iter().map(Into::into));
        self
    }

    pub fn granted_by(mut self, user: UserId) -> Self {
        self.granted_by = Some(user);
        self
    }

    /// A member must confer something: a role, a permission, or both.
    pub fn is_empty_grant(&self) -> bool {
        self.role.is_none() && self.permissions.is_empty()
    }

    pub fn has_explicit(&self, slug: &str) -> bool {
        self.permissions.contains(slug)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Check Request
// ═══════════════════════════════════════════════════════════════════════════════

/// Typed permission check: a slug with an optional exact resource scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRequest {
    pub slug: PermissionSlug,
    pub scope: Option<ResourceRef>,
}

impl CheckRequest {
    pub fn global(slug: impl Into<PermissionSlug>) -> Self {
        Self {
            slug: slug.into(),
            scope: None,
        }
    }

    pub fn scoped(slug: impl Into<PermissionSlug>, resource: ResourceRef) -> Self {
        Self {
            slug: slug.into(),
            scope: Some(resource),
        }
    }

    /// Builds a request from loosely-typed boundary input.
    ///
    /// `reference_table` and `reference_id` must be given together or not at
    /// all. An unknown table is `InvalidResourceKind`.
    pub fn from_parts(
        slug: Option<&str>,
        reference_table: Option<&str>,
        reference_id: Option<&str>,
    ) -> Result<Self> {
        let slug = match slug.map(str::trim) {
            Some(s) if !s.is_empty() => PermissionSlug::from(s),
            _ => return Err(WardenError::missing_slug()),
        };

        let scope = match (reference_table, reference_id) {
            (None, None) => None,
            (Some(table), Some(id)) => Some(ResourceRef::new(table.parse()?, id)?),
            (Some(_), None) => {
                return Err(WardenError::invalid_argument(
                    "referenceTable requires referenceId",
                ))
            }
            (None, Some(_)) => {
                return Err(WardenError::invalid_argument(
                    "referenceId requires referenceTable",
                ))
            }
        };

        Ok(Self { slug, scope })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Decisions
// ═══════════════════════════════════════════════════════════════════════════════

/// Where an allowing decision came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GrantSource {
    GlobalRole {
        role: RoleSlug,
    },
    ResourceMembership {
        resource: ResourceRef,
        /// Set when the grant came from the member role rather than an explicit slug.
        via_role: Option<RoleSlug>,
    },
}

/// Why a decision came out `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    UnknownUser,
    UnknownPermission,
    ScopeNotAdmissible,
    NoGrant,
}

/// Outcome of resolving one check. Transient, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDecision {
    pub slug: PermissionSlug,
    pub can: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<GrantSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deny_reason: Option<DenyReason>,
}

impl PermissionDecision {
    pub fn allow(slug: PermissionSlug, source: GrantSource) -> Self {
        Self {
            slug,
            can: true,
            source: Some(source),
            deny_reason: None,
        }
    }

    pub fn deny(slug: PermissionSlug, reason: DenyReason) -> Self {
        Self {
            slug,
            can: false,
            source: None,
            deny_reason: Some(reason),
        }
    }

    /// Metric label for the source of the decision.
    pub fn source_label(&self) -> &'static str {
        match (&self.source, self.deny_reason) {
            (Some(GrantSource::GlobalRole { .. }), _) => "global_role",
            (Some(GrantSource::ResourceMembership { .. }), _) => "membership",
            (None, Some(DenyReason::UnknownUser)) => "unknown_user",
            (None, Some(DenyReason::UnknownPermission)) => "unknown_permission",
            (None, Some(DenyReason::ScopeNotAdmissible)) => "scope_not_admissible",
            (None, _) => "no_grant",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_resource_kind_wire_names() {
        assert_eq!("PROJECT".parse::<ResourceKind>().unwrap(), ResourceKind::Project);
        assert_eq!(
            "LEGAL_INSTRUMENT".parse::<ResourceKind>().unwrap(),
            ResourceKind::LegalInstrument
        );
        assert_eq!(
            serde_json::to_string(&ResourceKind::LegalInstrument).unwrap(),
            "\"LEGAL_INSTRUMENT\""
        );
    }

    #[test]
    fn test_resource_kind_rejects_unknown() {
        let err = "project".parse::<ResourceKind>().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidResourceKind);
        assert!("WORK_PLAN".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn test_resource_ref_rejects_empty_id() {
        let err = ResourceRef::project("  ").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_check_request_from_parts() {
        let req = CheckRequest::from_parts(Some("projects.edit"), None, None).unwrap();
        assert_eq!(req.slug.as_str(), "projects.edit");
        assert!(req.scope.is_none());

        let req =
            CheckRequest::from_parts(Some("projects.edit"), Some("PROJECT"), Some("p-1")).unwrap();
        assert_eq!(req.scope, Some(ResourceRef::project("p-1").unwrap()));
    }

    #[test]
    fn test_check_request_requires_slug() {
        for slug in [None, Some(""), Some("   ")] {
            let err = CheckRequest::from_parts(slug, None, None).unwrap_err();
            assert_eq!(err.code(), ErrorCode::MissingSlug);
        }
    }

    #[test]
    fn test_check_request_half_reference_is_invalid() {
        let err = CheckRequest::from_parts(Some("a"), Some("PROJECT"), None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);

        let err = CheckRequest::from_parts(Some("a"), None, Some("p-1")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_member_grant_builders() {
        let member = ResourceMember::new(UserId::from("u1"), ResourceRef::project("p").unwrap());
        assert!(member.is_empty_grant());

        let member = member
            .with_role("editor")
            .with_permissions(["files.upload", "files.upload"]);
        assert!(!member.is_empty_grant());
        assert_eq!(member.permissions.len(), 1);
        assert!(member.has_explicit("files.upload"));
    }

    #[test]
    fn test_decision_serialization() {
        let decision = PermissionDecision::allow(
            PermissionSlug::from("projects.view"),
            GrantSource::GlobalRole {
                role: RoleSlug::from("viewer"),
            },
        );
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["can"], true);
        assert_eq!(json["source"]["type"], "global_role");
        assert!(json.get("deny_reason").is_none());
        assert_eq!(decision.source_label(), "global_role");
    }
}
