//! Price repository for the SQLite backend

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{ffi, params, Connection, Row};
use tracing::debug;

use super::{
    default_processor_id, format_timestamp, parse_timestamp, DuplicateEventId, PriceRecord,
    UpsertOutcome,
};
use crate::database::core::{SchemaDefinitions, PRICES_COLLECTION, RECENT_PRICES_VIEW};

fn columns() -> String {
    SchemaDefinitions::PRICE_COLUMNS.join(", ")
}

/// Repository for price records stored in SQLite
///
/// Expects the layout created by `SchemaManager::initialize`.
pub struct PriceRepository<'a> {
    conn: &'a Connection,
}

impl<'a> PriceRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a new record
    ///
    /// A second record with the same `event_id` is rejected by the unique
    /// index and surfaces as a [`DuplicateEventId`] error.
    pub fn insert(&self, record: &PriceRecord) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            PRICES_COLLECTION,
            columns()
        );
        let result = self.conn.execute(
            &sql,
            params![
                record.event_id,
                record.metal,
                record.price,
                record.unit,
                record.timestamp.as_ref().map(format_timestamp),
                record.source,
                record.market,
                record.volume,
                record.processed_at.as_ref().map(format_timestamp),
                record.processor_id,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Err(DuplicateEventId {
                    event_id: record.event_id.clone(),
                }
                .into())
            }
            Err(e) => Err(anyhow!(
                "Failed to insert price record '{}': {}",
                record.event_id,
                e
            )),
        }
    }

    /// Insert or replace a record keyed by `event_id`, stamping it as processed
    ///
    /// Without a `processor_id` the host name is recorded.
    pub fn upsert(&self, record: &PriceRecord, processor_id: Option<&str>) -> Result<UpsertOutcome> {
        let existed = self.get(&record.event_id)?.is_some();
        let processor_id = processor_id
            .map(str::to_string)
            .unwrap_or_else(default_processor_id);
        let stamped = record.processed(&processor_id, Utc::now());

        let sql = format!(
            "INSERT INTO {} ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(event_id) DO UPDATE SET
                metal = excluded.metal,
                price = excluded.price,
                unit = excluded.unit,
                timestamp = excluded.timestamp,
                source = excluded.source,
                market = excluded.market,
                volume = excluded.volume,
                processed_at = excluded.processed_at,
                processor_id = excluded.processor_id",
            PRICES_COLLECTION,
            columns()
        );
        self.conn
            .execute(
                &sql,
                params![
                    stamped.event_id,
                    stamped.metal,
                    stamped.price,
                    stamped.unit,
                    stamped.timestamp.as_ref().map(format_timestamp),
                    stamped.source,
                    stamped.market,
                    stamped.volume,
                    stamped.processed_at.as_ref().map(format_timestamp),
                    stamped.processor_id,
                ],
            )
            .map_err(|e| anyhow!("Failed to upsert price record '{}': {}", record.event_id, e))?;

        let outcome = if existed {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        };
        debug!("upserted '{}': {:?}", record.event_id, outcome);
        Ok(outcome)
    }

    /// Look up a record by its event id
    pub fn get(&self, event_id: &str) -> Result<Option<PriceRecord>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE event_id = ?1",
            columns(),
            PRICES_COLLECTION
        );
        let mut records = self.query(&sql, params![event_id])?;
        Ok(records.pop())
    }

    /// Get the number of stored records
    pub fn count(&self) -> Result<u64> {
        let count: u64 = self
            .conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", PRICES_COLLECTION),
                [],
                |row| row.get(0),
            )
            .map_err(|e| anyhow!("Failed to get price count: {}", e))?;
        Ok(count)
    }

    /// Newest records straight from the base table
    pub fn recent(&self, limit: u32) -> Result<Vec<PriceRecord>> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY timestamp DESC LIMIT ?1",
            columns(),
            PRICES_COLLECTION
        );
        self.query(&sql, params![limit])
    }

    /// Newest records of one metal, served by the `metal_1_timestamp_-1` index
    pub fn recent_for_metal(&self, metal: &str, limit: u32) -> Result<Vec<PriceRecord>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE metal = ?1 ORDER BY timestamp DESC LIMIT ?2",
            columns(),
            PRICES_COLLECTION
        );
        self.query(&sql, params![metal, limit])
    }

    /// Contents of the `recent_prices` view
    pub fn recent_view(&self) -> Result<Vec<PriceRecord>> {
        // the outer ORDER BY pins the row order SQLite returns from the view
        let sql = format!(
            "SELECT {} FROM {} ORDER BY timestamp DESC",
            columns(),
            RECENT_PRICES_VIEW.name
        );
        self.query(&sql, [])
    }

    fn query<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<PriceRecord>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| anyhow!("Failed to prepare price query: {}", e))?;

        let rows = stmt
            .query_map(params, read_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| anyhow!("Failed to read price records: {}", e))?;
        Ok(rows)
    }
}

/// Optional timestamp column; NULL reads as `None`
fn read_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|text| {
            parse_timestamp(&text)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
        })
        .transpose()
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<PriceRecord> {
    Ok(PriceRecord {
        event_id: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
        metal: row.get(1)?,
        price: row.get(2)?,
        unit: row.get(3)?,
        timestamp: read_time(row, 4)?,
        source: row.get(5)?,
        market: row.get(6)?,
        volume: row.get(7)?,
        processed_at: read_time(row, 8)?,
        processor_id: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::core::{DatabaseConn, InitMode, SchemaManager};
    use chrono::{Duration, TimeZone};

    fn setup_test_db() -> DatabaseConn {
        let db = DatabaseConn::open_in_memory().unwrap();
        SchemaManager::new(&db.conn)
            .initialize(InitMode::Idempotent)
            .unwrap();
        db
    }

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_insert_and_get() {
        let db = setup_test_db();
        let repo = PriceRepository::new(&db.conn);

        let record = PriceRecord::new("gold-1", "gold", base_time())
            .with_price(1950.25)
            .with_market("COMEX")
            .with_volume(420);
        repo.insert(&record).unwrap();

        assert_eq!(repo.count().unwrap(), 1);
        assert_eq!(repo.get("gold-1").unwrap(), Some(record));
        assert_eq!(repo.get("gold-2").unwrap(), None);
    }

    #[test]
    fn test_duplicate_event_id_rejected() {
        let db = setup_test_db();
        let repo = PriceRepository::new(&db.conn);

        repo.insert(&PriceRecord::new("1", "gold", base_time()))
            .unwrap();
        let err = repo
            .insert(&PriceRecord::new("1", "silver", base_time() + Duration::seconds(1)))
            .unwrap_err();

        assert_eq!(
            err.downcast_ref::<DuplicateEventId>(),
            Some(&DuplicateEventId {
                event_id: "1".to_string()
            })
        );
        assert_eq!(repo.count().unwrap(), 1);
        assert_eq!(repo.get("1").unwrap().unwrap().metal.as_deref(), Some("gold"));
    }

    #[test]
    fn test_recent_view_returns_newest_hundred() {
        let db = setup_test_db();
        let repo = PriceRepository::new(&db.conn);

        for i in 1..=150 {
            let ts = base_time() + Duration::seconds(i);
            repo.insert(&PriceRecord::new(&i.to_string(), "gold", ts))
                .unwrap();
        }

        let view = repo.recent_view().unwrap();
        assert_eq!(view.len(), 100);

        let ids: Vec<String> = view.iter().map(|r| r.event_id.clone()).collect();
        let expected: Vec<String> = (51..=150).rev().map(|i: i32| i.to_string()).collect();
        assert_eq!(ids, expected);

        assert!(view.windows(2).all(|w| w[0].timestamp > w[1].timestamp));
        assert_eq!(view, repo.recent(100).unwrap());
    }

    #[test]
    fn test_recent_view_tracks_base_table() {
        let db = setup_test_db();
        let repo = PriceRepository::new(&db.conn);
        assert!(repo.recent_view().unwrap().is_empty());

        repo.insert(&PriceRecord::new("a", "copper", base_time()))
            .unwrap();
        repo.insert(&PriceRecord::new("b", "copper", base_time() + Duration::hours(1)))
            .unwrap();

        let view = repo.recent_view().unwrap();
        assert_eq!(view.len(), 2);
        assert_eq!(view[0].event_id, "b");
    }

    #[test]
    fn test_recent_for_metal() {
        let db = setup_test_db();
        let repo = PriceRepository::new(&db.conn);

        for (i, metal) in ["gold", "silver", "gold", "copper", "gold"].iter().enumerate() {
            let ts = base_time() + Duration::minutes(i as i64);
            repo.insert(&PriceRecord::new(&format!("e{}", i), metal, ts))
                .unwrap();
        }

        let gold = repo.recent_for_metal("gold", 2).unwrap();
        let ids: Vec<&str> = gold.iter().map(|r| r.event_id.as_str()).collect();
        assert_eq!(ids, vec!["e4", "e2"]);
        assert!(repo.recent_for_metal("platinum", 10).unwrap().is_empty());
    }

    #[test]
    fn test_upsert_inserts_then_updates() {
        let db = setup_test_db();
        let repo = PriceRepository::new(&db.conn);

        let record = PriceRecord::new("evt", "platinum", base_time()).with_price(980.0);
        assert_eq!(
            repo.upsert(&record, Some("proc-a")).unwrap(),
            UpsertOutcome::Inserted
        );

        let updated = record.clone().with_price(990.5);
        assert_eq!(
            repo.upsert(&updated, Some("proc-b")).unwrap(),
            UpsertOutcome::Updated
        );

        assert_eq!(repo.count().unwrap(), 1);
        let stored = repo.get("evt").unwrap().unwrap();
        assert_eq!(stored.price, Some(990.5));
        assert_eq!(stored.processor_id.as_deref(), Some("proc-b"));
        assert!(stored.processed_at.is_some());
    }

    #[test]
    fn test_upsert_defaults_processor_id() {
        let db = setup_test_db();
        let repo = PriceRepository::new(&db.conn);

        let record = PriceRecord::new("evt", "gold", base_time());
        repo.upsert(&record, None).unwrap();

        let stored = repo.get("evt").unwrap().unwrap();
        assert_eq!(stored.processor_id, Some(default_processor_id()));
    }

    #[test]
    fn test_rows_without_timestamp_or_metal_are_readable() {
        let db = setup_test_db();
        let repo = PriceRepository::new(&db.conn);

        repo.insert(&PriceRecord::new("dated", "gold", base_time()))
            .unwrap();
        db.execute("INSERT INTO prices (event_id, metal) VALUES ('x1', 'gold')")
            .unwrap();
        db.execute("INSERT INTO prices (event_id, price) VALUES ('x2', 12.5)")
            .unwrap();
        db.execute(
            "INSERT INTO prices (metal, timestamp) VALUES ('copper', '2024-06-01T00:00:05')",
        )
        .unwrap();

        let view = repo.recent_view().unwrap();
        assert_eq!(view.len(), 4);
        assert_eq!(view[0].metal.as_deref(), Some("copper"));
        assert_eq!(view[0].event_id, "");
        assert_eq!(view[0].timestamp, Some(base_time() + Duration::seconds(5)));
        assert_eq!(view[1].event_id, "dated");
        assert!(view[2..].iter().all(|r| r.timestamp.is_none()));

        let x2 = repo.get("x2").unwrap().unwrap();
        assert_eq!(x2.metal, None);
        assert_eq!(x2.price, Some(12.5));
        assert_eq!(repo.recent(2).unwrap(), view[..2].to_vec());
    }

    #[test]
    fn test_sub_millisecond_timestamp_round_trips() {
        let db = setup_test_db();
        let repo = PriceRepository::new(&db.conn);

        let ts = base_time() + Duration::nanoseconds(987_654_321);
        let record = PriceRecord::new("precise", "palladium", ts);
        repo.insert(&record).unwrap();

        let stored = repo.get("precise").unwrap().unwrap();
        assert_eq!(stored, record);
        assert_eq!(
            stored.timestamp,
            Some(base_time() + Duration::milliseconds(987))
        );
    }
}
