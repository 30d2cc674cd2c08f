//! Core database infrastructure
//!
//! This module provides the foundational components shared by both backends:
//! - `layout`: The schema contract (collection, indexes, view)
//! - `status`: Initialization modes, reports and schema status
//! - `DatabaseConn`: SQLite connection wrapper with configuration
//! - `SchemaManager`: SQLite schema initialization and inspection

mod connection;
mod layout;
mod schema;
mod status;

pub use connection::DatabaseConn;
pub use layout::{
    describe_key_pairs, IndexKey, IndexSpec, ObjectKind, SchemaLayout, SchemaObject, SortOrder,
    ViewSpec, DATABASE_NAME, PRICES_COLLECTION, PRICE_INDEXES, RECENT_PRICES_LIMIT,
    RECENT_PRICES_VIEW,
};
pub use schema::{SchemaDefinitions, SchemaManager};
pub use status::{
    CollectionDescription, IndexDescription, InitMode, InitReport, ObjectAction, ObjectOutcome, SchemaConflict,
    SchemaReport, SchemaStatus, ViewDescription, COMPLETION_MESSAGE,
};
