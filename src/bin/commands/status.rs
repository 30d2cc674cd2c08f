use anyhow::Result;
use metals_schema::database::{ObjectKind, SchemaLayout, SchemaObject, SchemaReport};
use metals_schema::output::{render_rows, render_value};
use metals_schema::OutputFormat;
use serde::Serialize;
use tabled::Tabled;

use super::Store;

#[derive(Tabled, Serialize)]
struct StatusRow {
    object: String,
    kind: String,
    state: String,
    found: String,
}

const MISSING: &str = "missing";

/// Compare one expected object with what the catalog reported
fn check_object(object: &SchemaObject, report: &SchemaReport) -> (String, String) {
    match object.kind {
        ObjectKind::Collection => match report.collection.as_ref() {
            Some(c) if c.matches => ("ok".to_string(), c.definition.clone()),
            Some(c) => ("conflict".to_string(), c.definition.clone()),
            None => (MISSING.to_string(), "-".to_string()),
        },
        ObjectKind::View => match report.view.as_ref().filter(|v| v.name == object.name) {
            Some(v) if v.matches => ("ok".to_string(), v.definition.clone()),
            Some(v) => ("conflict".to_string(), v.definition.clone()),
            None => (MISSING.to_string(), "-".to_string()),
        },
        ObjectKind::Index | ObjectKind::UniqueIndex => {
            let name = object
                .name
                .split_once('.')
                .map(|(_, n)| n)
                .unwrap_or(object.name.as_str());
            let found = report.indexes.iter().find(|i| i.name == name);
            match (found, SchemaLayout::index_by_name(name)) {
                (Some(i), Some(spec)) if i.matches(spec) => ("ok".to_string(), i.describe()),
                (Some(i), _) => ("conflict".to_string(), i.describe()),
                (None, _) => (MISSING.to_string(), "-".to_string()),
            }
        }
    }
}

fn status_rows(report: &SchemaReport) -> Vec<StatusRow> {
    SchemaLayout::objects()
        .into_iter()
        .map(|object| {
            let (state, found) = check_object(&object, report);
            StatusRow {
                object: object.name,
                kind: object.kind.to_string(),
                state,
                found,
            }
        })
        .collect()
}

pub async fn run(store: &Store, output_format: OutputFormat) -> Result<()> {
    let report = store.inspect().await?;

    match render_value(&report, output_format)? {
        Some(json) => println!("{}", json),
        None => {
            println!("{}", render_rows(&status_rows(&report), output_format)?);
            println!("schema status at {}: {}", store.location(), report.status);
        }
    }
    Ok(())
}
