//! Global role assignment commands.

use anyhow::Result;
use clap::Subcommand;

use crate::client::ApiClient;
use crate::output::{self, Outcome, OutputFormat};

#[derive(Subcommand)]
pub enum RolesCommands {
    /// Grant a global role to a user
    Assign { user: String, role: String },

    /// Revoke a global role from a user
    Unassign { user: String, role: String },
}

pub async fn execute(cmd: RolesCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let (user, role, assign) = match cmd {
        RolesCommands::Assign { user, role } => (user, role, true),
        RolesCommands::Unassign { user, role } => (user, role, false),
    };
    let path = format!("/users/{}/roles/{}", user, role);

    let resp: serde_json::Value = if assign {
        client.put(&path, &serde_json::json!({})).await?
    } else {
        client.delete(&path).await?
    };

    if !matches!(format, OutputFormat::Table) {
        return output::print_value(&resp, format);
    }

    let changed = resp
        .get(if assign { "assigned" } else { "removed" })
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let msg = match (assign, changed) {
        (true, true) => format!("{} now holds {}", user, role),
        (true, false) => format!("{} already held {}", user, role),
        (false, true) => format!("{} no longer holds {}", user, role),
        (false, false) => format!("{} did not hold {}", user, role),
    };
    output::report(Outcome::from_changed(changed), &msg);
    Ok(())
}
