use anyhow::Result;
use clap::Args;
use metals_schema::database::{Metal, PriceRecord, RECENT_PRICES_LIMIT};
use metals_schema::output::render_rows;
use metals_schema::OutputFormat;
use serde::Serialize;
use std::str::FromStr;
use tabled::Tabled;
use tracing::warn;

use super::Store;

/// Arguments for the Recent command
#[derive(Args)]
pub struct RecentArgs {
    /// Maximum number of records to list
    #[clap(short, long, default_value_t = RECENT_PRICES_LIMIT)]
    pub limit: u32,

    /// Only list records for this metal, e.g. gold or copper
    #[clap(short, long)]
    pub metal: Option<String>,

    /// Read from the recent_prices view instead of querying prices directly
    #[clap(long, conflicts_with_all = ["metal", "limit"])]
    pub view: bool,
}

#[derive(Tabled, Serialize)]
struct PriceRow {
    event_id: String,
    metal: String,
    price: String,
    unit: String,
    timestamp: String,
    market: String,
    volume: String,
}

fn or_dash<T: ToString>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string())
}

impl From<&PriceRecord> for PriceRow {
    fn from(r: &PriceRecord) -> Self {
        PriceRow {
            event_id: r.event_id.clone(),
            metal: or_dash(&r.metal),
            price: or_dash(&r.price),
            unit: or_dash(&r.unit),
            timestamp: or_dash(&r.timestamp.map(|t| t.to_rfc3339())),
            market: or_dash(&r.market),
            volume: or_dash(&r.volume),
        }
    }
}

pub async fn run(store: &Store, args: RecentArgs, output_format: OutputFormat) -> Result<()> {
    let RecentArgs { limit, metal, view } = args;

    if let Some(m) = &metal {
        if let Err(e) = Metal::from_str(m) {
            warn!("{}", e);
        }
    }

    let records = if view {
        store.recent_view().await?
    } else {
        store.recent(limit, metal.as_deref()).await?
    };

    if output_format.is_json() {
        // keep every stored field in machine-readable output
        match output_format {
            OutputFormat::JsonLine => {
                for r in &records {
                    println!("{}", serde_json::to_string(r)?);
                }
            }
            OutputFormat::JsonPretty => println!("{}", serde_json::to_string_pretty(&records)?),
            _ => println!("{}", serde_json::to_string(&records)?),
        }
        return Ok(());
    }

    let rows: Vec<PriceRow> = records.iter().map(PriceRow::from).collect();
    println!("{}", render_rows(&rows, output_format)?);
    Ok(())
}
