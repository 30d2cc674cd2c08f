use anyhow::Result;
use clap::Args;
use metals_schema::database::{InitMode, InitReport, COMPLETION_MESSAGE};
use metals_schema::output::{render_rows, render_value};
use metals_schema::OutputFormat;
use serde::Serialize;
use tabled::Tabled;
use tracing::info;

use super::Store;

/// Arguments for the Init command
#[derive(Args)]
pub struct InitArgs {
    /// Fail when any schema object already exists instead of skipping it
    #[clap(long)]
    pub strict: bool,
}

#[derive(Tabled, Serialize)]
struct InitRow {
    object: String,
    kind: String,
    definition: String,
    action: String,
}

fn report_rows(report: &InitReport) -> Vec<InitRow> {
    report
        .objects
        .iter()
        .map(|o| InitRow {
            object: o.object.name.clone(),
            kind: o.object.kind.to_string(),
            definition: o.object.definition.clone(),
            action: o.action.to_string(),
        })
        .collect()
}

pub async fn run(store: &Store, args: InitArgs, output_format: OutputFormat) -> Result<()> {
    let mode = if args.strict {
        InitMode::Strict
    } else {
        InitMode::Idempotent
    };
    info!("initializing schema at {} ({:?} mode)", store.location(), mode);

    let report = store.initialize(mode).await?;

    match render_value(&report, output_format)? {
        Some(json) => println!("{}", json),
        None => println!("{}", render_rows(&report_rows(&report), output_format)?),
    }

    println!("{}", COMPLETION_MESSAGE);
    Ok(())
}
