//! Built-in project-management catalog.
//!
//! Warden ships with four roles:
//!
//! | Role     | Description                                                    |
//! |----------|----------------------------------------------------------------|
//! | Admin    | Every permission, including user and catalog administration    |
//! | Manager  | Full control of projects and legal instruments                 |
//! | Editor   | Edit projects and work plans, upload files; cannot manage legal instruments |
//! | Viewer   | Read-only access to projects and legal instruments             |
//!
//! A deployment may replace this catalog with a TOML file (`catalog.path`).

use super::catalog::{CatalogDefinition, PermissionDef, RoleDef};
use super::models::{ResourceKind, RoleSlug};

use ResourceKind::{LegalInstrument, Project};

/// Built-in role templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredefinedRole {
    Admin,
    Manager,
    Editor,
    Viewer,
}

impl PredefinedRole {
    pub fn slug(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::Editor => "editor",
            Self::Viewer => "viewer",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Admin => "Admin",
            Self::Manager => "Manager",
            Self::Editor => "Editor",
            Self::Viewer => "Viewer",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Admin => "Every permission, including user and catalog administration",
            Self::Manager => "Full control of projects and legal instruments",
            Self::Editor => "Edit projects and work plans, upload files",
            Self::Viewer => "Read-only access to projects and legal instruments",
        }
    }

    /// Grant patterns; wildcards expand when the catalog is built.
    pub fn grants(&self) -> &'static [&'static str] {
        match self {
            Self::Admin => &["*"],
            Self::Manager => &[
                "projects.*",
                "legal_instruments.*",
                "work_plans.edit",
                "files.upload",
            ],
            Self::Editor => &[
                "projects.view",
                "projects.edit",
                "legal_instruments.view",
                "legal_instruments.create",
                "work_plans.edit",
                "files.upload",
            ],
            Self::Viewer => &["projects.view", "legal_instruments.view"],
        }
    }

    pub fn role_slug(&self) -> RoleSlug {
        RoleSlug::from(self.slug())
    }

    pub fn to_role_def(&self) -> RoleDef {
        RoleDef {
            slug: self.role_slug(),
            name: self.name().to_string(),
            description: Some(self.description().to_string()),
            permissions: self.grants().iter().map(|g| g.to_string()).collect(),
        }
    }

    pub fn all() -> Vec<PredefinedRole> {
        vec![Self::Admin, Self::Manager, Self::Editor, Self::Viewer]
    }
}

/// Permissions known to the built-in catalog.
pub fn builtin_permissions() -> Vec<PermissionDef> {
    vec![
        PermissionDef::new("projects.create", "Create projects", &[]),
        PermissionDef::new("projects.view", "View projects", &[Project]),
        PermissionDef::new("projects.edit", "Edit projects", &[Project]),
        PermissionDef::new("projects.delete", "Delete projects", &[Project]),
        PermissionDef::new("projects.members.manage", "Manage project members", &[Project]),
        PermissionDef::new(
            "legal_instruments.view",
            "View legal instruments",
            &[Project, LegalInstrument],
        ),
        PermissionDef::new("legal_instruments.create", "Create legal instruments", &[Project]),
        PermissionDef::new(
            "legal_instruments.manage",
            "Manage legal instruments",
            &[Project, LegalInstrument],
        ),
        PermissionDef::new(
            "legal_instruments.members.manage",
            "Manage legal instrument members",
            &[LegalInstrument],
        ),
        PermissionDef::new("work_plans.edit", "Edit work plans", &[Project]),
        PermissionDef::new("files.upload", "Upload files", &[Project, LegalInstrument]),
        PermissionDef::new("users.manage", "Assign global roles", &[]),
        PermissionDef::new("catalog.manage", "Reload the permission catalog", &[]),
    ]
}

/// The catalog used when no catalog file is configured.
pub fn builtin_catalog() -> CatalogDefinition {
    CatalogDefinition {
        permissions: builtin_permissions(),
        roles: PredefinedRole::all().iter().map(|r| r.to_role_def()).collect(),
    }
}
