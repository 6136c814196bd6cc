//! Resource membership commands.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use super::check::ReferenceTable;
use crate::client::ApiClient;
use crate::output::{self, Outcome, OutputFormat};

#[derive(Subcommand)]
pub enum MembersCommands {
    /// List members of a resource
    List {
        #[arg(value_enum)]
        table: ReferenceTable,
        id: String,
    },

    /// Add a member or replace its grant
    #[command(alias = "set")]
    Add {
        #[arg(value_enum)]
        table: ReferenceTable,
        id: String,
        user: String,

        /// Member role
        #[arg(short, long)]
        role: Option<String>,

        /// Explicit permission slug (repeatable)
        #[arg(short, long = "permission")]
        permissions: Vec<String>,

        /// Read the grant from a YAML file instead
        #[arg(short, long, conflicts_with_all = ["role", "permissions"])]
        file: Option<String>,
    },

    /// Remove a member
    Remove {
        #[arg(value_enum)]
        table: ReferenceTable,
        id: String,
        user: String,
    },

    /// Drop every member of a resource (after the resource is deleted)
    Purge {
        #[arg(value_enum)]
        table: ReferenceTable,
        id: String,

        /// Skip confirmation
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MemberGrant {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    permissions: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct MemberInfo {
    user_id: String,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    permissions: Vec<String>,
    created_at: String,
    #[serde(default)]
    granted_by: Option<String>,
}

#[derive(Serialize, Tabled)]
struct MemberRow {
    #[tabled(rename = "User")]
    user: String,
    #[tabled(rename = "Role")]
    role: String,
    #[tabled(rename = "Permissions")]
    permissions: String,
    #[tabled(rename = "Granted By")]
    granted_by: String,
    #[tabled(rename = "Since")]
    created_at: String,
}

impl From<&MemberInfo> for MemberRow {
    fn from(m: &MemberInfo) -> Self {
        Self {
            user: m.user_id.clone(),
            role: m.role.clone().unwrap_or_else(|| "-".into()),
            permissions: output::slug_list(&m.permissions),
            granted_by: m.granted_by.clone().unwrap_or_else(|| "-".into()),
            created_at: m.created_at.clone(),
        }
    }
}

fn members_path(table: ReferenceTable, id: &str) -> String {
    format!("/resources/{}/{}/members", table.as_str(), id)
}

pub async fn execute(cmd: MembersCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        MembersCommands::List { table, id } => {
            let members: Vec<MemberInfo> = client.get(&members_path(table, &id)).await?;
            match format {
                OutputFormat::Table => {
                    let rows: Vec<MemberRow> = members.iter().map(MemberRow::from).collect();
                    output::print_rows(&rows, format, "No members.")?;
                }
                _ => output::print_value(&members, format)?,
            }
        }

        MembersCommands::Add {
            table,
            id,
            user,
            role,
            permissions,
            file,
        } => {
            let grant = match file {
                Some(path) => {
                    let content = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read grant file: {}", path))?;
                    serde_yaml::from_str(&content).context("Failed to parse grant YAML")?
                }
                None => MemberGrant { role, permissions },
            };
            if grant.role.is_none() && grant.permissions.is_empty() {
                anyhow::bail!("Provide --role, at least one --permission, or --file");
            }

            let path = format!("{}/{}", members_path(table, &id), user);
            let member: MemberInfo = client.put(&path, &grant).await?;
            match format {
                OutputFormat::Table => {
                    output::report(Outcome::Changed, &format!("{} is a member of {}:{}", user, table.as_str(), id));
                    output::field("Role", member.role.as_deref().unwrap_or("-"));
                    output::field("Permissions", &output::slug_list(&member.permissions));
                }
                _ => output::print_value(&member, format)?,
            }
        }

        MembersCommands::Remove { table, id, user } => {
            let path = format!("{}/{}", members_path(table, &id), user);
            let resp: serde_json::Value = client.delete(&path).await?;
            match format {
                OutputFormat::Table => {
                    output::report(Outcome::Changed, &format!("Removed {} from {}:{}", user, table.as_str(), id))
                }
                _ => output::print_value(&resp, format)?,
            }
        }

        MembersCommands::Purge { table, id, force } => {
            if !force {
                output::report(Outcome::Unchanged, "This removes every member of the resource. Use --force to confirm.");
                return Ok(());
            }
            let resp: serde_json::Value = client.delete(&members_path(table, &id)).await?;
            match format {
                OutputFormat::Table => {
                    let removed = resp.get("removed").and_then(|v| v.as_u64()).unwrap_or(0);
                    output::report(Outcome::Changed, &format!("Removed {} member(s)", removed));
                }
                _ => output::print_value(&resp, format)?,
            }
        }
    }

    Ok(())
}
