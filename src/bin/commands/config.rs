use anyhow::Result;
use metals_schema::output::{render_rows, render_value};
use metals_schema::{Backend, MetalsConfig, OutputFormat};
use serde::Serialize;
use std::path::Path;

use super::FieldRow;

#[derive(Debug, Serialize)]
struct ConfigInfo<'a> {
    config_file: String,
    active_backend: Backend,
    sqlite_exists: bool,
    #[serde(flatten)]
    config: &'a MetalsConfig,
}

pub fn run(
    config: &MetalsConfig,
    config_path: &Option<String>,
    backend: Backend,
    output_format: OutputFormat,
) -> Result<()> {
    let config_file = config_path
        .clone()
        .unwrap_or_else(MetalsConfig::config_file_path);
    let sqlite_exists = Path::new(&config.sqlite_path()).exists();

    let info = ConfigInfo {
        config_file,
        active_backend: backend,
        sqlite_exists,
        config,
    };

    if let Some(json) = render_value(&info, output_format)? {
        println!("{}", json);
        return Ok(());
    }

    match output_format {
        OutputFormat::Table => {
            println!("Config File:        {}", info.config_file);
            println!("Active Backend:     {}", info.active_backend);
            println!("{}", config.summary());
            if !sqlite_exists && backend == Backend::Sqlite {
                println!();
                println!("SQLite database not created yet; run `metals-schema init`.");
            }
        }
        _ => {
            let rows = vec![
                FieldRow::new("config_file", &info.config_file),
                FieldRow::new("active_backend", info.active_backend),
                FieldRow::new("data_dir", &config.data_dir),
                FieldRow::new("sqlite_path", config.sqlite_path()),
                FieldRow::new("sqlite_exists", sqlite_exists),
                FieldRow::new("database", &config.database),
                FieldRow::new("mongodb_host", &config.mongodb_host),
                FieldRow::new("mongodb_port", config.mongodb_port),
                FieldRow::new("mongodb_auth_source", &config.mongodb_auth_source),
            ];
            println!("{}", render_rows(&rows, output_format)?);
        }
    }
    Ok(())
}
