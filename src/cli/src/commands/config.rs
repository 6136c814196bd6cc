//! Configuration management commands.
//!
//! Stores CLI configuration in `~/.warden/config.toml`. Recognized keys are
//! `api-url`, `token` and `user`; command-line flags and environment
//! variables take precedence.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::output::{self, Outcome, OutputFormat};

pub const KNOWN_KEYS: &[&str] = &["api-url", "token", "user"];

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Set a configuration value
    Set {
        /// Configuration key (api-url, token, user)
        key: String,
        value: String,
    },

    /// Get a configuration value
    Get { key: String },

    /// Remove a configuration value
    Unset { key: String },

    /// Show all configuration
    Show,

    /// Reset configuration to defaults
    Reset {
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

fn config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".warden").join("config.toml"))
}

fn load_config() -> Result<CliConfig> {
    let path = config_path()?;
    if !path.exists() {
        return Ok(CliConfig::default());
    }
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&content).context("Failed to parse config file")
}

fn save_config(cfg: &CliConfig) -> Result<()> {
    let path = config_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(cfg).context("Failed to serialize config")?;
    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// A stored value, if the config file exists and has it.
pub fn load_value(key: &str) -> Option<String> {
    load_config().ok().and_then(|mut cfg| cfg.values.remove(key))
}

/// Tokens are shown truncated.
fn display_value(key: &str, value: &str) -> String {
    if key == "token" && value.chars().count() > 8 {
        format!("{}…", value.chars().take(8).collect::<String>())
    } else {
        value.to_string()
    }
}

pub async fn execute(cmd: ConfigCommands, format: OutputFormat) -> Result<()> {
    match cmd {
        ConfigCommands::Set { key, value } => {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                anyhow::bail!("Unknown key '{}'; expected one of {}", key, KNOWN_KEYS.join(", "));
            }
            let mut cfg = load_config()?;
            cfg.values.insert(key.clone(), value.clone());
            save_config(&cfg)?;

            match format {
                OutputFormat::Table => {
                    output::report(Outcome::Changed, &format!("{} = {}", key, display_value(&key, &value)))
                }
                _ => output::print_value(&serde_json::json!({ "key": key, "value": value }), format)?,
            }
        }

        ConfigCommands::Get { key } => match load_config()?.values.get(&key) {
            Some(value) => match format {
                OutputFormat::Table => println!("{}", value),
                _ => output::print_value(&serde_json::json!({ "key": key, "value": value }), format)?,
            },
            None => anyhow::bail!("Key '{}' not found", key),
        },

        ConfigCommands::Unset { key } => {
            let mut cfg = load_config()?;
            if cfg.values.remove(&key).is_some() {
                save_config(&cfg)?;
                output::report(Outcome::Changed, &format!("Removed {}", key));
            } else {
                output::report(Outcome::Unchanged, &format!("{} was not set", key));
            }
        }

        ConfigCommands::Show => {
            let cfg = load_config()?;
            if cfg.values.is_empty() {
                output::report(Outcome::Unchanged, "No configuration values set.");
                return Ok(());
            }

            match format {
                OutputFormat::Table => {
                    output::section("Configuration");
                    for (k, v) in &cfg.values {
                        output::field(k, &display_value(k, v));
                    }
                }
                _ => output::print_value(&cfg.values, format)?,
            }
        }

        ConfigCommands::Reset { force } => {
            if !force {
                output::report(Outcome::Unchanged, "This will reset all CLI configuration. Use --force to confirm.");
                return Ok(());
            }

            let path = config_path()?;
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }
            output::report(Outcome::Changed, "Configuration reset to defaults");
        }
    }

    Ok(())
}
