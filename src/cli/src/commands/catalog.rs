//! Permission catalog commands.

use anyhow::Result;
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{self, Outcome, OutputFormat};

#[derive(Subcommand)]
pub enum CatalogCommands {
    /// Show known permissions and roles
    Show {
        /// Only show roles and their expanded grants
        #[arg(long)]
        roles: bool,
    },

    /// Reload the catalog from storage (requires catalog.manage)
    Reload,
}

#[derive(Debug, Deserialize, Serialize)]
struct CatalogSummary {
    version: u64,
    built_at: String,
    permissions: Vec<PermissionInfo>,
    roles: Vec<RoleInfo>,
}

#[derive(Debug, Deserialize, Serialize)]
struct PermissionInfo {
    slug: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    scopes: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct RoleInfo {
    slug: String,
    name: String,
    #[serde(default)]
    permissions: Vec<String>,
}

#[derive(Serialize, Tabled)]
struct PermissionRow {
    #[tabled(rename = "Slug")]
    slug: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Scopes")]
    scopes: String,
}

#[derive(Serialize, Tabled)]
struct RoleRow {
    #[tabled(rename = "Role")]
    slug: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Grants")]
    grants: usize,
}

pub async fn execute(cmd: CatalogCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        CatalogCommands::Show { roles } => {
            let catalog: CatalogSummary = client.get("/catalog").await?;
            if !matches!(format, OutputFormat::Table) {
                return if roles {
                    output::print_value(&catalog.roles, format)
                } else {
                    output::print_value(&catalog, format)
                };
            }

            output::field("Version", &catalog.version.to_string());
            output::field("Built", &catalog.built_at);

            if !roles {
                output::section("Permissions");
                let rows: Vec<PermissionRow> = catalog
                    .permissions
                    .iter()
                    .map(|p| PermissionRow {
                        slug: p.slug.clone(),
                        name: p.name.clone(),
                        scopes: if p.scopes.is_empty() {
                            "global".into()
                        } else {
                            p.scopes.join(", ")
                        },
                    })
                    .collect();
                output::print_rows(&rows, format, "No permissions defined.")?;
            }

            output::section("Roles");
            let rows: Vec<RoleRow> = catalog
                .roles
                .iter()
                .map(|r| RoleRow {
                    slug: r.slug.clone(),
                    name: r.name.clone(),
                    grants: r.permissions.len(),
                })
                .collect();
            output::print_rows(&rows, format, "No roles defined.")?;

            if roles {
                for role in &catalog.roles {
                    output::section(&role.slug);
                    for slug in &role.permissions {
                        println!("  {}", slug);
                    }
                }
            }
        }

        CatalogCommands::Reload => {
            let resp: serde_json::Value = client.post_empty("/catalog/reload").await?;
            match format {
                OutputFormat::Table => {
                    let version = resp.get("version").and_then(|v| v.as_u64()).unwrap_or(0);
                    output::report(Outcome::Changed, &format!("Catalog reloaded (version {})", version));
                }
                _ => output::print_value(&resp, format)?,
            }
        }
    }

    Ok(())
}
