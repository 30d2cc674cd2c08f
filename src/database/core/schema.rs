//! SQLite schema management
//!
//! Materializes the metals layout in SQLite: the `prices` collection becomes
//! a table, indexes keep their MongoDB-style names, and `recent_prices` is a
//! plain SQL view. No column carries a NOT NULL or type constraint; the only
//! enforced rule is the unique `event_id_1` index.

use anyhow::{anyhow, Result};
use rusqlite::Connection;
use std::collections::HashMap;
use tracing::{debug, info};

use super::layout::{
    IndexSpec, SchemaObject, SortOrder, ViewSpec, PRICES_COLLECTION, PRICE_INDEXES,
    RECENT_PRICES_VIEW,
};
use super::status::{
    CollectionDescription, IndexDescription, InitMode, InitReport, ObjectAction, SchemaReport, SchemaStatus,
    ViewDescription,
};

/// SQL definitions for the SQLite rendition of the layout
pub struct SchemaDefinitions;

impl SchemaDefinitions {
    /// SQL for creating the prices table
    pub const PRICES_TABLE: &'static str = r#"
        CREATE TABLE prices (
            event_id TEXT,
            metal TEXT,
            price REAL,
            unit TEXT,
            timestamp TEXT,
            source TEXT,
            market TEXT,
            volume INTEGER,
            processed_at TEXT,
            processor_id TEXT
        )
    "#;

    /// Columns the prices table must carry, in creation order
    pub const PRICE_COLUMNS: [&'static str; 10] = [
        "event_id",
        "metal",
        "price",
        "unit",
        "timestamp",
        "source",
        "market",
        "volume",
        "processed_at",
        "processor_id",
    ];

    /// SQL for creating one of the layout indexes
    pub fn index_sql(spec: &IndexSpec) -> String {
        let columns = spec
            .keys
            .iter()
            .map(|k| format!("{} {}", k.field, k.order.sql_keyword()))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CREATE {}INDEX \"{}\" ON {} ({})",
            if spec.unique { "UNIQUE " } else { "" },
            spec.name(),
            PRICES_COLLECTION,
            columns
        )
    }

    /// SQL for creating a layout view
    pub fn view_sql(view: &ViewSpec) -> String {
        format!(
            "CREATE VIEW {} AS SELECT * FROM {} ORDER BY {} {} LIMIT {}",
            view.name,
            view.source,
            view.sort.field,
            view.sort.order.sql_keyword(),
            view.limit
        )
    }
}

/// Collapse whitespace so stored view SQL can be compared to the generated one
fn normalize_sql(sql: &str) -> String {
    sql.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(';')
        .to_lowercase()
}

/// Schema manager for the SQLite backend
///
/// Handles initialization and inspection of the metals layout.
pub struct SchemaManager<'a> {
    conn: &'a Connection,
}

impl<'a> SchemaManager<'a> {
    /// Create a new schema manager for the given connection
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn location(&self) -> String {
        match self.conn.path() {
            Some(p) if !p.is_empty() => p.to_string(),
            _ => ":memory:".to_string(),
        }
    }

    /// Initialize the database schema
    ///
    /// Creates the prices table, its five indexes and the recent prices view.
    /// Existing objects are handled according to `mode`.
    pub fn initialize(&self, mode: InitMode) -> Result<InitReport> {
        let mut report = InitReport::new("sqlite", &self.location(), mode);

        // Collection
        let collection = SchemaObject::collection(PRICES_COLLECTION);
        match self.describe_collection()? {
            Some(found) => {
                let action = mode.resolve_existing(&collection, found.matches, &found.definition)?;
                report.record(collection, action);
            }
            None => {
                self.conn
                    .execute(SchemaDefinitions::PRICES_TABLE, [])
                    .map_err(|e| anyhow!("Failed to create prices table: {}", e))?;
                info!("created collection '{}'", PRICES_COLLECTION);
                report.record(collection, ObjectAction::Created);
            }
        }

        // Indexes
        let existing: HashMap<String, IndexDescription> = self
            .describe_indexes()?
            .into_iter()
            .map(|i| (i.name.clone(), i))
            .collect();

        for spec in PRICE_INDEXES.iter() {
            let object = SchemaObject::index(PRICES_COLLECTION, spec);
            match existing.get(&spec.name()) {
                Some(found) => {
                    let action =
                        mode.resolve_existing(&object, found.matches(spec), &found.describe())?;
                    report.record(object, action);
                }
                None => {
                    self.conn
                        .execute(&SchemaDefinitions::index_sql(spec), [])
                        .map_err(|e| anyhow!("Failed to create index {}: {}", object.name, e))?;
                    info!("created {} '{}'", object.kind, object.name);
                    report.record(object, ObjectAction::Created);
                }
            }
        }

        // View
        let object = SchemaObject::view(&RECENT_PRICES_VIEW);
        match self.describe_view()? {
            Some(found) => {
                let action = mode.resolve_existing(&object, found.matches, &found.definition)?;
                report.record(object, action);
            }
            None => {
                self.conn
                    .execute(&SchemaDefinitions::view_sql(&RECENT_PRICES_VIEW), [])
                    .map_err(|e| anyhow!("Failed to create view {}: {}", object.name, e))?;
                info!("created view '{}'", object.name);
                report.record(object, ObjectAction::Created);
            }
        }

        debug!(
            "sqlite initialization finished: {} created, {} already present",
            report.created_count(),
            report.present_count()
        );
        Ok(report)
    }

    /// Inspect the schema and compare it with the expected layout
    pub fn inspect(&self) -> Result<SchemaReport> {
        let collection = self.describe_collection()?;
        let indexes = self.describe_indexes()?;
        let view = self.describe_view()?;
        Ok(SchemaReport::new(collection, indexes, view))
    }

    /// Check the current schema status
    pub fn check_status(&self) -> Result<SchemaStatus> {
        Ok(self.inspect()?.status)
    }

    /// Read the prices table from the SQLite catalog, if it exists
    ///
    /// The table matches when it carries every column of the layout; extra
    /// columns are tolerated and declared types are not compared. A view
    /// named `prices` never matches.
    pub fn describe_collection(&self) -> Result<Option<CollectionDescription>> {
        let kind = match self.conn.query_row(
            "SELECT type FROM sqlite_master WHERE name = ?1 AND type IN ('table', 'view')",
            [PRICES_COLLECTION],
            |row| row.get::<_, String>(0),
        ) {
            Ok(kind) => kind,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(anyhow!("Failed to check table existence: {}", e)),
        };

        if kind != "table" {
            return Ok(Some(CollectionDescription {
                name: PRICES_COLLECTION.to_string(),
                definition: kind,
                matches: false,
            }));
        }

        let mut stmt = self
            .conn
            .prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")
            .map_err(|e| anyhow!("Failed to list columns: {}", e))?;
        let columns = stmt
            .query_map([PRICES_COLLECTION], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| anyhow!("Failed to read column list: {}", e))?;

        let missing: Vec<&str> = SchemaDefinitions::PRICE_COLUMNS
            .iter()
            .copied()
            .filter(|expected| !columns.iter().any(|c| c.eq_ignore_ascii_case(expected)))
            .collect();

        let definition = if missing.is_empty() {
            format!("table with columns: {}", columns.join(", "))
        } else {
            format!("table missing columns: {}", missing.join(", "))
        };

        Ok(Some(CollectionDescription {
            name: PRICES_COLLECTION.to_string(),
            definition,
            matches: missing.is_empty(),
        }))
    }

    /// Read index definitions on the prices table from the SQLite catalog
    ///
    /// Only explicitly created indexes are listed; key columns come back in
    /// index order together with their sort direction.
    pub fn describe_indexes(&self) -> Result<Vec<IndexDescription>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT name, \"unique\" FROM pragma_index_list(?1) WHERE origin = 'c' ORDER BY name",
            )
            .map_err(|e| anyhow!("Failed to list indexes: {}", e))?;

        let listed = stmt
            .query_map([PRICES_COLLECTION], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| anyhow!("Failed to read index list: {}", e))?;

        let mut key_stmt = self
            .conn
            .prepare(
                "SELECT name, \"desc\" FROM pragma_index_xinfo(?1) WHERE key = 1 ORDER BY seqno",
            )
            .map_err(|e| anyhow!("Failed to prepare index key query: {}", e))?;

        let mut indexes = Vec::with_capacity(listed.len());
        for (name, unique) in listed {
            let keys = key_stmt
                .query_map([name.as_str()], |row| {
                    let column: Option<String> = row.get(0)?;
                    let desc: bool = row.get(1)?;
                    Ok((
                        column.unwrap_or_else(|| "<expression>".to_string()),
                        if desc {
                            SortOrder::Descending
                        } else {
                            SortOrder::Ascending
                        },
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| anyhow!("Failed to read keys of index {}: {}", name, e))?;

            indexes.push(IndexDescription { name, keys, unique });
        }

        Ok(indexes)
    }

    /// Read the recent prices view definition, if the view exists
    pub fn describe_view(&self) -> Result<Option<ViewDescription>> {
        let result = self.conn.query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'view' AND name = ?1",
            [RECENT_PRICES_VIEW.name],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(sql) => {
                let expected = SchemaDefinitions::view_sql(&RECENT_PRICES_VIEW);
                Ok(Some(ViewDescription {
                    name: RECENT_PRICES_VIEW.name.to_string(),
                    matches: normalize_sql(&sql) == normalize_sql(&expected),
                    definition: sql.split_whitespace().collect::<Vec<_>>().join(" "),
                }))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(anyhow!("Failed to read view definition: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::core::layout::ObjectKind;
    use crate::database::core::status::SchemaConflict;
    use crate::database::core::DatabaseConn;

    fn setup_test_db() -> DatabaseConn {
        DatabaseConn::open_in_memory().unwrap()
    }

    #[test]
    fn test_index_sql() {
        assert_eq!(
            SchemaDefinitions::index_sql(&PRICE_INDEXES[0]),
            "CREATE UNIQUE INDEX \"event_id_1\" ON prices (event_id ASC)"
        );
        assert_eq!(
            SchemaDefinitions::index_sql(&PRICE_INDEXES[4]),
            "CREATE INDEX \"metal_1_timestamp_-1\" ON prices (metal ASC, timestamp DESC)"
        );
    }

    #[test]
    fn test_view_sql() {
        assert_eq!(
            SchemaDefinitions::view_sql(&RECENT_PRICES_VIEW),
            "CREATE VIEW recent_prices AS SELECT * FROM prices ORDER BY timestamp DESC LIMIT 100"
        );
    }

    #[test]
    fn test_initialize_empty_database() {
        let db = setup_test_db();
        let manager = SchemaManager::new(&db.conn);

        assert_eq!(manager.check_status().unwrap(), SchemaStatus::NotInitialized);

        let report = manager.initialize(InitMode::Idempotent).unwrap();
        assert_eq!(report.created_count(), 7);
        assert_eq!(report.present_count(), 0);

        assert!(db.table_exists("prices").unwrap());
        assert!(db.view_exists("recent_prices").unwrap());
        assert_eq!(manager.check_status().unwrap(), SchemaStatus::Current);
    }

    #[test]
    fn test_indexes_have_exact_keys() {
        let db = setup_test_db();
        let manager = SchemaManager::new(&db.conn);
        manager.initialize(InitMode::Idempotent).unwrap();

        let indexes = manager.describe_indexes().unwrap();
        assert_eq!(indexes.len(), 5);

        for spec in PRICE_INDEXES.iter() {
            let found = indexes
                .iter()
                .find(|i| i.name == spec.name())
                .unwrap_or_else(|| panic!("missing index {}", spec.name()));
            assert_eq!(found.keys, spec.key_pairs(), "keys of {}", spec.name());
            assert_eq!(found.unique, spec.unique, "uniqueness of {}", spec.name());
        }
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let db = setup_test_db();
        let manager = SchemaManager::new(&db.conn);
        manager.initialize(InitMode::Idempotent).unwrap();

        let report = manager.initialize(InitMode::Idempotent).unwrap();
        assert_eq!(report.created_count(), 0);
        assert_eq!(report.present_count(), 7);
        assert!(report
            .objects
            .iter()
            .all(|o| o.action == ObjectAction::AlreadyPresent));
    }

    #[test]
    fn test_strict_rerun_fails() {
        let db = setup_test_db();
        let manager = SchemaManager::new(&db.conn);
        manager.initialize(InitMode::Strict).unwrap();

        let err = manager.initialize(InitMode::Strict).unwrap_err();
        let conflict = err.downcast_ref::<SchemaConflict>().unwrap();
        assert_eq!(
            conflict,
            &SchemaConflict::AlreadyExists {
                kind: ObjectKind::Collection,
                name: "prices".to_string(),
            }
        );
    }

    #[test]
    fn test_conflicting_index_is_not_replaced() {
        let db = setup_test_db();
        db.execute(SchemaDefinitions::PRICES_TABLE).unwrap();
        db.execute("CREATE INDEX \"metal_1\" ON prices (timestamp)")
            .unwrap();

        let manager = SchemaManager::new(&db.conn);
        let err = manager.initialize(InitMode::Idempotent).unwrap_err();
        match err.downcast_ref::<SchemaConflict>() {
            Some(SchemaConflict::ConflictingDefinition { name, found, .. }) => {
                assert_eq!(name, "prices.metal_1");
                assert_eq!(found, "keys: timestamp ascending");
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let status = manager.check_status().unwrap();
        assert!(matches!(status, SchemaStatus::Drifted { .. }));
    }

    #[test]
    fn test_partial_schema_is_completed() {
        let db = setup_test_db();
        db.execute(SchemaDefinitions::PRICES_TABLE).unwrap();
        db.execute(&SchemaDefinitions::index_sql(&PRICE_INDEXES[0]))
            .unwrap();

        let manager = SchemaManager::new(&db.conn);
        match manager.check_status().unwrap() {
            SchemaStatus::Incomplete { missing } => {
                assert_eq!(missing.len(), 5);
                assert!(missing.contains(&"recent_prices".to_string()));
            }
            other => panic!("unexpected status: {}", other),
        }

        let report = manager.initialize(InitMode::Idempotent).unwrap();
        assert_eq!(report.present_count(), 2);
        assert_eq!(report.created_count(), 5);
        assert!(manager.check_status().unwrap().is_current());
    }

    #[test]
    fn test_modified_view_is_drift() {
        let db = setup_test_db();
        let manager = SchemaManager::new(&db.conn);
        manager.initialize(InitMode::Idempotent).unwrap();

        db.execute("DROP VIEW recent_prices").unwrap();
        db.execute("CREATE VIEW recent_prices AS SELECT * FROM prices LIMIT 10")
            .unwrap();

        let view = manager.describe_view().unwrap().unwrap();
        assert!(!view.matches);
        assert!(matches!(
            manager.check_status().unwrap(),
            SchemaStatus::Drifted { .. }
        ));

        let err = manager.initialize(InitMode::Idempotent).unwrap_err();
        match err.downcast_ref::<SchemaConflict>() {
            Some(SchemaConflict::ConflictingDefinition { kind, name, found, .. }) => {
                assert_eq!(*kind, ObjectKind::View);
                assert_eq!(name, "recent_prices");
                assert!(found.ends_with("LIMIT 10"), "found: {}", found);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        let sql: String = db
            .conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type = 'view' AND name = 'recent_prices'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(sql.ends_with("LIMIT 10"));
    }

    #[test]
    fn test_table_with_missing_columns_is_conflict() {
        let db = setup_test_db();
        db.execute(
            "CREATE TABLE prices (event_id TEXT, metal TEXT, timestamp TEXT, processed_at TEXT)",
        )
        .unwrap();

        let manager = SchemaManager::new(&db.conn);
        let found = manager.describe_collection().unwrap().unwrap();
        assert!(!found.matches);
        assert_eq!(
            found.definition,
            "table missing columns: price, unit, source, market, volume, processor_id"
        );

        let err = manager.initialize(InitMode::Idempotent).unwrap_err();
        match err.downcast_ref::<SchemaConflict>() {
            Some(SchemaConflict::ConflictingDefinition { kind, name, .. }) => {
                assert_eq!(*kind, ObjectKind::Collection);
                assert_eq!(name, "prices");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(manager.describe_indexes().unwrap().is_empty());

        match manager.check_status().unwrap() {
            SchemaStatus::Drifted { conflicts } => {
                assert!(conflicts[0].starts_with("prices (table missing columns"));
            }
            other => panic!("unexpected status: {}", other),
        }
    }

    #[test]
    fn test_table_with_extra_columns_matches() {
        let db = setup_test_db();
        db.execute(
            "CREATE TABLE prices (event_id TEXT, metal TEXT, price REAL, unit TEXT, timestamp TEXT, \
             source TEXT, market TEXT, volume INTEGER, processed_at TEXT, processor_id TEXT, \
             currency TEXT)",
        )
        .unwrap();

        let manager = SchemaManager::new(&db.conn);
        let found = manager.describe_collection().unwrap().unwrap();
        assert!(found.matches, "{}", found.definition);

        let report = manager.initialize(InitMode::Idempotent).unwrap();
        assert_eq!(report.present_count(), 1);
        assert!(manager.check_status().unwrap().is_current());
    }
}
