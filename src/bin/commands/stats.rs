use anyhow::Result;
use metals_schema::output::{render_rows, render_value};
use metals_schema::{OutputFormat, SchemaStatus};
use serde::Serialize;

use super::{FieldRow, Store};

#[derive(Debug, Serialize)]
struct StatsInfo {
    location: String,
    status: SchemaStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    record_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    recent_view_count: Option<usize>,
}

pub async fn run(store: &Store, output_format: OutputFormat) -> Result<()> {
    let report = store.inspect().await?;

    let record_count = if report.collection_exists() {
        Some(store.count().await?)
    } else {
        None
    };
    let recent_view_count = match &report.view {
        Some(view) if view.matches => Some(store.recent_view().await?.len()),
        _ => None,
    };

    let info = StatsInfo {
        location: store.location(),
        status: report.status,
        record_count,
        recent_view_count,
    };

    if let Some(json) = render_value(&info, output_format)? {
        println!("{}", json);
        return Ok(());
    }

    let or_na = |v: Option<String>| v.unwrap_or_else(|| "n/a".to_string());
    let rows = vec![
        FieldRow::new("location", &info.location),
        FieldRow::new("schema status", &info.status),
        FieldRow::new("records", or_na(info.record_count.map(|c| c.to_string()))),
        FieldRow::new(
            "recent_prices rows",
            or_na(info.recent_view_count.map(|c| c.to_string())),
        ),
    ];
    println!("{}", render_rows(&rows, output_format)?);
    Ok(())
}
