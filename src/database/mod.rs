//! Database module
//!
//! This module provides the storage layout for metal price records and the
//! backends that materialize it:
//!
//! - **core**: The schema contract plus the SQLite connection and schema manager
//! - **prices**: Price records and the SQLite price repository
//! - **mongo**: MongoDB schema manager and price repository (feature `mongodb`)
//!
//! # Architecture
//!
//! ```text
//! database/
//! ├── core/           # Foundation
//! │   ├── layout      # prices collection, five indexes, recent_prices view
//! │   ├── status      # InitMode, InitReport, SchemaStatus
//! │   ├── connection  # SQLite DatabaseConn wrapper
//! │   └── schema      # SQLite schema initialization and inspection
//! │
//! ├── prices/         # Price records
//! │   └── sqlite      # PriceRepository (SQLite)
//! │
//! └── mongo/          # MongoDB backend
//!     ├── schema      # MongoSchemaManager
//!     └── prices      # MongoPriceRepository
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use metals_schema::database::{InitMode, MetalsDatabase};
//!
//! let db = MetalsDatabase::open_in_dir("~/.metals")?;
//! let report = db.initialize(InitMode::Idempotent)?;
//!
//! let latest = db.prices().recent_view()?;
//! ```

pub mod core;
#[cfg(feature = "mongodb")]
pub mod mongo;
pub mod prices;

use anyhow::Result;
use tracing::info;

pub use core::{
    CollectionDescription, DatabaseConn, IndexDescription, InitMode, InitReport, ObjectAction, ObjectKind, SchemaConflict,
    SchemaDefinitions, SchemaLayout, SchemaManager, SchemaObject, SchemaReport, SchemaStatus,
    ViewDescription, COMPLETION_MESSAGE, DATABASE_NAME, PRICES_COLLECTION, RECENT_PRICES_LIMIT,
};
pub use prices::{DuplicateEventId, Metal, PriceRecord, PriceRepository, UpsertOutcome};

#[cfg(feature = "mongodb")]
pub use mongo::{MongoConn, MongoPriceRepository, MongoSchemaManager, MongoSettings};

/// File name of the SQLite database inside the data directory
pub const SQLITE_FILE_NAME: &str = "metals.sqlite3";

/// Metals database on the SQLite backend
///
/// Unlike opening a connection directly, this keeps schema management and
/// record access behind one handle. Opening never creates schema objects;
/// call [`MetalsDatabase::initialize`] for that.
pub struct MetalsDatabase {
    db: DatabaseConn,
}

impl MetalsDatabase {
    /// Open (or create) the database file at `path`
    pub fn open(path: &str) -> Result<Self> {
        let db = DatabaseConn::open_path(path)?;
        info!("opened metals database at {}", path);
        Ok(Self { db })
    }

    /// Open the database from a data directory
    ///
    /// Creates the directory when needed and uses `{data_dir}/metals.sqlite3`.
    pub fn open_in_dir(data_dir: &str) -> Result<Self> {
        ensure_data_dir(data_dir)?;
        let path = format!("{}/{}", data_dir.trim_end_matches('/'), SQLITE_FILE_NAME);
        Self::open(&path)
    }

    /// Create an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            db: DatabaseConn::open_in_memory()?,
        })
    }

    /// Create the layout objects according to `mode`
    pub fn initialize(&self, mode: InitMode) -> Result<InitReport> {
        self.schema().initialize(mode)
    }

    pub fn schema(&self) -> SchemaManager<'_> {
        SchemaManager::new(&self.db.conn)
    }

    pub fn prices(&self) -> PriceRepository<'_> {
        PriceRepository::new(&self.db.conn)
    }

    /// Get the underlying connection
    pub fn connection(&self) -> &rusqlite::Connection {
        &self.db.conn
    }

    pub fn location(&self) -> String {
        self.db.location()
    }
}

/// Ensure the data directory exists
pub fn ensure_data_dir(data_dir: &str) -> Result<()> {
    std::fs::create_dir_all(data_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create data directory '{}': {}", data_dir, e))
}
