//! Output formatting for the Warden CLI.
//!
//! Machine formats (JSON, YAML) print the server's payload unchanged. The
//! table format prints verdicts, outcome lines and `key: value` fields.

use anyhow::{Context, Result};
use clap::ValueEnum;
use colored::*;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable tables and verdict lines
    #[default]
    Table,
    Json,
    Yaml,
}

/// What an administrative command did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The server or local config now differs
    Changed,
    /// Already in the requested state, or not confirmed
    Unchanged,
    Failed,
}

impl Outcome {
    pub fn from_changed(changed: bool) -> Self {
        if changed {
            Self::Changed
        } else {
            Self::Unchanged
        }
    }

    fn marker(self) -> ColoredString {
        match self {
            Self::Changed => format!("{:>9}", "changed").green().bold(),
            Self::Unchanged => "unchanged".yellow(),
            Self::Failed => format!("{:>9}", "failed").red().bold(),
        }
    }
}

/// One outcome line; failures go to stderr.
pub fn report(outcome: Outcome, msg: &str) {
    let line = format!("{}  {}", outcome.marker(), msg);
    match outcome {
        Outcome::Failed => eprintln!("{}", line),
        _ => println!("{}", line),
    }
}

/// ALLOW / DENY marker for a permission verdict.
pub fn verdict(can: bool) -> ColoredString {
    if can {
        "ALLOW".green().bold()
    } else {
        "DENY".red().bold()
    }
}

/// Rows as a table, or the raw rows in a machine format. `empty` is shown
/// instead of an empty table.
pub fn print_rows<T: Tabled + Serialize>(rows: &[T], format: OutputFormat, empty: &str) -> Result<()> {
    match format {
        OutputFormat::Table if rows.is_empty() => {
            println!("{}", empty.dimmed());
            Ok(())
        }
        OutputFormat::Table => {
            println!("{}", Table::new(rows).with(Style::psql()));
            Ok(())
        }
        _ => print_value(&rows, format),
    }
}

/// A payload in the requested format; tables fall back to pretty JSON.
pub fn print_value<T: Serialize + ?Sized>(value: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table | OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value).context("Failed to encode JSON")?);
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(value).context("Failed to encode YAML")?);
        }
    }
    Ok(())
}

pub fn section(title: &str) {
    println!("\n{}", title.bold());
}

pub fn field(key: &str, value: &str) {
    println!("  {} {}", format!("{:<12}", format!("{}:", key)).cyan(), value);
}

/// Comma-joined slugs, or `-` when there are none.
pub fn slug_list(slugs: &[String]) -> String {
    if slugs.is_empty() {
        "-".into()
    } else {
        slugs.join(", ")
    }
}
