//! MongoDB backend
//!
//! The production target for the metals layout. All operations are async
//! and run sequentially against a single client.
//!
//! ```rust,ignore
//! use metals_schema::database::mongo::{MongoConn, MongoSettings};
//! use metals_schema::database::InitMode;
//!
//! let conn = MongoConn::connect(&MongoSettings::from_config(&config)).await?;
//! let report = conn.schema().initialize(InitMode::Idempotent).await?;
//! println!("{} objects created", report.created_count());
//! ```

mod prices;
mod schema;

pub use prices::MongoPriceRepository;
pub use schema::MongoSchemaManager;

use anyhow::{anyhow, Result};
use mongodb::bson::{doc, Bson};
use mongodb::options::{ClientOptions, Credential};
use mongodb::{Client, Database};
use std::time::Duration;
use tracing::info;

use crate::config::MetalsConfig;

/// Connection settings for the MongoDB backend
#[derive(Debug, Clone)]
pub struct MongoSettings {
    /// Full connection string; takes precedence over host and port
    pub uri: Option<String>,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub auth_source: String,
    pub database: String,
    pub server_selection_timeout: Duration,
}

impl MongoSettings {
    pub fn from_config(config: &MetalsConfig) -> Self {
        Self {
            uri: config.mongodb_uri.clone(),
            host: config.mongodb_host.clone(),
            port: config.mongodb_port,
            username: config.mongodb_username.clone(),
            password: config.resolve_mongodb_password(),
            auth_source: config.mongodb_auth_source.clone(),
            database: config.database.clone(),
            server_selection_timeout: Duration::from_secs(config.server_selection_timeout_secs),
        }
    }

    /// Connection string with credentials left out
    pub fn connection_string(&self) -> String {
        match &self.uri {
            Some(uri) => uri.clone(),
            None => format!("mongodb://{}:{}/", self.host, self.port),
        }
    }

    async fn client_options(&self) -> Result<ClientOptions> {
        let mut options = ClientOptions::parse(self.connection_string())
            .await
            .map_err(|e| anyhow!("Invalid MongoDB connection string: {}", e))?;

        // credentials embedded in a URI win over configured ones
        if options.credential.is_none() {
            if let (Some(username), Some(password)) = (&self.username, &self.password) {
                options.credential = Some(
                    Credential::builder()
                        .username(username.clone())
                        .password(password.clone())
                        .source(self.auth_source.clone())
                        .build(),
                );
            }
        }

        options.server_selection_timeout = Some(self.server_selection_timeout);
        options.app_name = Some("metals-schema".to_string());
        Ok(options)
    }
}

/// Connected MongoDB client with the target database selected
pub struct MongoConn {
    db: Database,
}

impl MongoConn {
    /// Connect and verify the server answers a ping
    pub async fn connect(settings: &MongoSettings) -> Result<Self> {
        info!(
            "connecting to MongoDB at {} (database '{}')",
            settings.connection_string(),
            settings.database
        );

        let client = Client::with_options(settings.client_options().await?)
            .map_err(|e| anyhow!("Failed to create MongoDB client: {}", e))?;

        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| anyhow!("Failed to reach MongoDB: {}", e))?;

        let db = client.database(&settings.database);
        Ok(Self { db })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn schema(&self) -> MongoSchemaManager<'_> {
        MongoSchemaManager::new(&self.db)
    }

    pub fn prices(&self) -> MongoPriceRepository {
        MongoPriceRepository::new(&self.db)
    }
}

/// Integer value of a numeric BSON field
///
/// The server may echo numbers back as a different width than they were
/// written with, so all integral numeric types are accepted.
pub(crate) fn bson_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(v) => Some(i64::from(*v)),
        Bson::Int64(v) => Some(*v),
        Bson::Double(v) if v.fract() == 0.0 => Some(*v as i64),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    /// Connect to a throwaway database when `METALS_TEST_MONGODB_URI` is set
    pub(crate) async fn test_conn() -> Option<MongoConn> {
        let uri = std::env::var("METALS_TEST_MONGODB_URI").ok()?;
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        let settings = MongoSettings {
            uri: Some(uri),
            host: String::new(),
            port: 0,
            username: None,
            password: None,
            auth_source: "admin".to_string(),
            database: format!("metals_test_{}_{}", std::process::id(), nanos),
            server_selection_timeout: Duration::from_secs(5),
        };
        MongoConn::connect(&settings).await.ok()
    }
}
