//! Warden CLI - query and administer a Warden permission server.
//!
//! Provides permission checks, membership and role administration, catalog
//! inspection, health and local configuration commands.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use client::Credentials;
use commands::{catalog, check, config, health, members, roles};
use output::{Outcome, OutputFormat};

/// Warden - Permission Resolution Engine CLI
#[derive(Parser)]
#[command(
    name = "warden",
    author = "Aezi <aezi.zhu@icloud.com>",
    version = "0.1.0",
    about = "Warden - Permission Resolution Engine",
    long_about = "CLI tool for checking permissions and administering roles, resource memberships and the permission catalog.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// API server URL
    #[arg(long, global = true, env = "WARDEN_API_URL")]
    api_url: Option<String>,

    /// Bearer token for the session
    #[arg(long, global = true, env = "WARDEN_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// User id sent as x-user-id (servers that trust the header only)
    #[arg(long, global = true, env = "WARDEN_USER")]
    user: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check one permission, optionally on a resource
    Check(check::CheckArgs),

    /// Check several global permissions at once
    CheckMany(check::CheckManyArgs),

    /// Resource membership administration
    #[command(subcommand)]
    Members(members::MembersCommands),

    /// Global role assignment
    #[command(subcommand)]
    Roles(roles::RolesCommands),

    /// Permission catalog
    #[command(subcommand)]
    Catalog(catalog::CatalogCommands),

    /// Check server health
    Health(health::HealthArgs),

    /// Configuration management
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let api_url = cli
        .api_url
        .clone()
        .or_else(|| config::load_value("api-url"))
        .unwrap_or_else(|| "http://localhost:8080".to_string());
    let credentials = Credentials {
        token: cli.token.clone().or_else(|| config::load_value("token")),
        user: cli.user.clone().or_else(|| config::load_value("user")),
    };

    let client = client::ApiClient::new(&api_url, credentials)?;
    let format = cli.output;

    let result = match cli.command {
        Commands::Check(args) => check::execute(args, &client, format).await,
        Commands::CheckMany(args) => check::execute_many(args, &client, format).await,
        Commands::Members(cmd) => members::execute(cmd, &client, format).await,
        Commands::Roles(cmd) => roles::execute(cmd, &client, format).await,
        Commands::Catalog(cmd) => catalog::execute(cmd, &client, format).await,
        Commands::Health(args) => health::execute(args, &client, format).await,
        Commands::Config(cmd) => config::execute(cmd, format).await,
    };

    if let Err(e) = result {
        output::report(Outcome::Failed, &format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
