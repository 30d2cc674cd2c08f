pub mod config;
pub mod init;
pub mod recent;
pub mod stats;
pub mod status;

use anyhow::Result;
use metals_schema::database::{
    InitMode, InitReport, MetalsDatabase, MongoConn, MongoSettings, PriceRecord, SchemaReport,
};
use metals_schema::{Backend, MetalsConfig};
use serde::Serialize;
use tabled::Tabled;

/// Backend-independent handle the commands run against
pub enum Store {
    Sqlite(MetalsDatabase),
    Mongo {
        conn: MongoConn,
        location: String,
    },
}

impl Store {
    pub async fn open(config: &MetalsConfig, backend: Backend) -> Result<Self> {
        match backend {
            Backend::Sqlite => Ok(Store::Sqlite(MetalsDatabase::open_in_dir(&config.data_dir)?)),
            Backend::Mongodb => {
                let settings = MongoSettings::from_config(config);
                let location = match &settings.uri {
                    // the URI may carry credentials, keep it out of output
                    Some(_) => format!("mongodb (configured uri) / {}", settings.database),
                    None => format!("{}{}", settings.connection_string(), settings.database),
                };
                let conn = MongoConn::connect(&settings).await?;
                Ok(Store::Mongo { conn, location })
            }
        }
    }

    pub fn location(&self) -> String {
        match self {
            Store::Sqlite(db) => db.location(),
            Store::Mongo { location, .. } => location.clone(),
        }
    }

    pub async fn initialize(&self, mode: InitMode) -> Result<InitReport> {
        match self {
            Store::Sqlite(db) => db.initialize(mode),
            Store::Mongo { conn, .. } => conn.schema().initialize(mode).await,
        }
    }

    pub async fn inspect(&self) -> Result<SchemaReport> {
        match self {
            Store::Sqlite(db) => db.schema().inspect(),
            Store::Mongo { conn, .. } => conn.schema().inspect().await,
        }
    }

    pub async fn count(&self) -> Result<u64> {
        match self {
            Store::Sqlite(db) => db.prices().count(),
            Store::Mongo { conn, .. } => conn.prices().count().await,
        }
    }

    pub async fn recent(&self, limit: u32, metal: Option<&str>) -> Result<Vec<PriceRecord>> {
        match (self, metal) {
            (Store::Sqlite(db), Some(m)) => db.prices().recent_for_metal(m, limit),
            (Store::Sqlite(db), None) => db.prices().recent(limit),
            (Store::Mongo { conn, .. }, Some(m)) => conn.prices().recent_for_metal(m, limit).await,
            (Store::Mongo { conn, .. }, None) => conn.prices().recent(limit).await,
        }
    }

    pub async fn recent_view(&self) -> Result<Vec<PriceRecord>> {
        match self {
            Store::Sqlite(db) => db.prices().recent_view(),
            Store::Mongo { conn, .. } => conn.prices().recent_view().await,
        }
    }
}

/// Single-column table row for free-form `key: value` listings
#[derive(Tabled, Serialize)]
pub(crate) struct FieldRow {
    pub field: String,
    pub value: String,
}

impl FieldRow {
    pub fn new(field: &str, value: impl ToString) -> Self {
        Self {
            field: field.to_string(),
            value: value.to_string(),
        }
    }
}
