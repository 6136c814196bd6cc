//! Health check command.
//!
//! Queries `/health` and shows storage status, catalog version and cache size.

use anyhow::Result;
use clap::Args;

use crate::client::ApiClient;
use crate::output::{self, Outcome, OutputFormat};

#[derive(Args)]
pub struct HealthArgs {
    /// Include cache statistics
    #[arg(short, long)]
    detailed: bool,
}

pub async fn execute(args: HealthArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health: serde_json::Value = client.get_raw("/health").await?;

    if !matches!(format, OutputFormat::Table) {
        return output::print_value(&health, format);
    }

    let status = health
        .get("status")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");

    output::section("Warden Health");
    output::field("Status", status);
    output::field("API URL", client.base_url());

    if let Some(version) = health.get("version").and_then(|v| v.as_str()) {
        output::field("Version", version);
    }
    if let Some(catalog) = health.get("catalog_version").and_then(|v| v.as_u64()) {
        output::field("Catalog", &format!("v{}", catalog));
    }

    if args.detailed {
        if let Some(cache) = health.get("cache") {
            output::section("Cache");
            for key in ["role_entries", "member_entries", "epoch"] {
                if let Some(value) = cache.get(key) {
                    output::field(key, &value.to_string());
                }
            }
        }
    }

    if status == "healthy" {
        output::field("Storage", "reachable");
    } else {
        output::report(Outcome::Failed, &format!("Server reports {}", status));
    }

    Ok(())
}
