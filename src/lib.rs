#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! metals-schema - storage layout bootstrap for metal price records
//!
//! Creates and inspects the layout that price consumers rely on: a `prices`
//! collection, five indexes over it, and a `recent_prices` view holding the
//! 100 newest records. The layout can be materialized in SQLite (local and
//! test use) or MongoDB (production).
//!
//! # Feature Flags
//!
//! | Feature | Description | Key Dependencies |
//! |---------|-------------|------------------|
//! | (none) | SQLite backend, config, output formats | `rusqlite`, `config` |
//! | `mongodb` | MongoDB backend | `mongodb`, `tokio`, `futures` |
//! | `display` | Table formatting with `tabled` | `tabled` |
//! | `cli` | The `metals-schema` binary | All above + `clap` |
//!
//! ## Choosing Features
//!
//! ```toml
//! # SQLite only
//! metals-schema = { version = "0.1", default-features = false }
//!
//! # Both backends, no CLI
//! metals-schema = { version = "0.1", default-features = false, features = ["mongodb"] }
//!
//! # Default (CLI binary)
//! metals-schema = "0.1"
//! ```
//!
//! # Architecture
//!
//! - **[`database`]**: Schema contract and both backends
//!   - `core`: layout, init modes and reports, SQLite schema management
//!   - `prices`: price records and the SQLite repository
//!   - `mongo`: MongoDB schema manager and repository (requires `mongodb`)
//! - **[`config`]**: Configuration management
//! - **[`output`]**: Output formats shared by the CLI commands
//!
//! # Quick Start Examples
//!
//! ## SQLite
//!
//! ```rust,ignore
//! use metals_schema::database::{InitMode, MetalsDatabase, COMPLETION_MESSAGE};
//!
//! let db = MetalsDatabase::open_in_dir("~/.metals")?;
//! db.initialize(InitMode::Idempotent)?;
//! println!("{}", COMPLETION_MESSAGE);
//! ```
//!
//! ## MongoDB (feature = "mongodb")
//!
//! ```rust,ignore
//! use metals_schema::database::{InitMode, MongoConn, MongoSettings};
//! use metals_schema::MetalsConfig;
//!
//! let config = MetalsConfig::new(&None)?;
//! let conn = MongoConn::connect(&MongoSettings::from_config(&config)).await?;
//! let report = conn.schema().initialize(InitMode::Strict).await?;
//! ```

pub mod config;
pub mod database;
pub mod output;

pub use config::{Backend, MetalsConfig};

pub use database::{
    DuplicateEventId, InitMode, InitReport, MetalsDatabase, PriceRecord, SchemaConflict,
    SchemaReport, SchemaStatus, COMPLETION_MESSAGE,
};

#[cfg(feature = "mongodb")]
pub use database::{MongoConn, MongoSettings};

pub use output::OutputFormat;
