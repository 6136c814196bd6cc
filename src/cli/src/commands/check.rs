//! Permission check commands.
//!
//! `check` asks `/permissions/check` (or `/permissions/decide` with
//! `--explain`); `check-many` asks `/permissions/check-many`.

use anyhow::Result;
use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ReferenceTable {
    #[value(name = "PROJECT", alias = "project")]
    Project,
    #[value(name = "LEGAL_INSTRUMENT", alias = "legal-instrument")]
    LegalInstrument,
}

impl ReferenceTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "PROJECT",
            Self::LegalInstrument => "LEGAL_INSTRUMENT",
        }
    }
}

#[derive(Args)]
pub struct CheckArgs {
    /// Permission slug, e.g. legal_instruments.manage
    slug: String,

    /// Resource kind to scope the check to
    #[arg(long = "table", short = 't', requires = "reference_id")]
    reference_table: Option<ReferenceTable>,

    /// Resource id to scope the check to
    #[arg(long = "id", requires = "reference_table")]
    reference_id: Option<String>,

    /// Show where the decision came from
    #[arg(short, long)]
    explain: bool,

    /// Exit with status 2 when the permission is denied
    #[arg(long)]
    exit_code: bool,
}

#[derive(Args)]
pub struct CheckManyArgs {
    /// Permission slugs
    #[arg(required = true)]
    slugs: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckBody<'a> {
    slug: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference_table: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference_id: Option<&'a str>,
}

#[derive(Debug, Deserialize, Serialize)]
struct CheckResponse {
    can: bool,
}

#[derive(Debug, Deserialize, Serialize)]
struct Decision {
    slug: String,
    can: bool,
    #[serde(default)]
    source: Option<serde_json::Value>,
    #[serde(default)]
    deny_reason: Option<String>,
}

#[derive(Serialize, Tabled)]
struct CheckRow {
    #[tabled(rename = "Permission")]
    slug: String,
    #[tabled(rename = "Allowed")]
    can: bool,
}

pub async fn execute(args: CheckArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let body = CheckBody {
        slug: &args.slug,
        reference_table: args.reference_table.map(|t| t.as_str()),
        reference_id: args.reference_id.as_deref(),
    };
    let scope = match (&body.reference_table, &body.reference_id) {
        (Some(table), Some(id)) => format!(" on {}:{}", table, id),
        _ => String::new(),
    };

    let can = if args.explain {
        let decision: Decision = client.post_raw("/permissions/decide", &body).await?;
        match format {
            OutputFormat::Table => {
                println!("{} {}{}", output::verdict(decision.can), decision.slug, scope);
                if let Some(source) = &decision.source {
                    output::field("Source", &source.to_string());
                }
                if let Some(reason) = &decision.deny_reason {
                    output::field("Reason", reason);
                }
            }
            _ => output::print_value(&decision, format)?,
        }
        decision.can
    } else {
        let resp: CheckResponse = client.post_raw("/permissions/check", &body).await?;
        match format {
            OutputFormat::Table => println!("{} {}{}", output::verdict(resp.can), args.slug, scope),
            _ => output::print_value(&resp, format)?,
        }
        resp.can
    };

    if args.exit_code && !can {
        std::process::exit(2);
    }
    Ok(())
}

pub async fn execute_many(args: CheckManyArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let body = serde_json::json!({ "slugs": args.slugs });
    let decisions: BTreeMap<String, bool> = client.post_raw("/permissions/check-many", &body).await?;

    match format {
        OutputFormat::Table => {
            let rows: Vec<CheckRow> = decisions
                .into_iter()
                .map(|(slug, can)| CheckRow { slug, can })
                .collect();
            output::print_rows(&rows, format, "No permissions checked.")
        }
        _ => output::print_value(&decisions, format),
    }
}
