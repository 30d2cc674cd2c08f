//! Price repository for the MongoDB backend

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, DateTime as BsonDateTime, Document};
use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use mongodb::{Collection, Database};
use tracing::debug;

use super::bson_i64;
use crate::database::core::{PRICES_COLLECTION, RECENT_PRICES_VIEW};
use crate::database::prices::{
    default_processor_id, parse_timestamp, truncate_to_millis, DuplicateEventId, PriceRecord,
    UpsertOutcome,
};

/// Server error code for a unique index violation
const DUPLICATE_KEY: i32 = 11000;

fn to_bson_datetime(ts: &DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_millis(truncate_to_millis(*ts).timestamp_millis())
}

fn from_bson_time(value: &Bson) -> Result<DateTime<Utc>> {
    match value {
        Bson::DateTime(dt) => DateTime::<Utc>::from_timestamp_millis(dt.timestamp_millis())
            .ok_or_else(|| anyhow!("Timestamp out of range: {}", dt)),
        // producers that publish ISO strings end up stored verbatim
        Bson::String(s) => parse_timestamp(s),
        other => Err(anyhow!("Unexpected timestamp value: {}", other)),
    }
}

/// Document form of a record; absent optional fields are left out
pub fn to_document(record: &PriceRecord) -> Document {
    let mut doc = doc! { "event_id": record.event_id.as_str() };
    if let Some(metal) = &record.metal {
        doc.insert("metal", metal.as_str());
    }
    if let Some(price) = record.price {
        doc.insert("price", price);
    }
    if let Some(unit) = &record.unit {
        doc.insert("unit", unit.as_str());
    }
    if let Some(timestamp) = &record.timestamp {
        doc.insert("timestamp", to_bson_datetime(timestamp));
    }
    if let Some(source) = &record.source {
        doc.insert("source", source.as_str());
    }
    if let Some(market) = &record.market {
        doc.insert("market", market.as_str());
    }
    if let Some(volume) = record.volume {
        doc.insert("volume", volume);
    }
    if let Some(processed_at) = &record.processed_at {
        doc.insert("processed_at", to_bson_datetime(processed_at));
    }
    if let Some(processor_id) = &record.processor_id {
        doc.insert("processor_id", processor_id.as_str());
    }
    doc
}

/// Record form of a stored document
///
/// Missing or null fields read as absent; a timestamp of an unexpected type
/// is an error.
pub fn from_document(doc: &Document) -> Result<PriceRecord> {
    let text = |key: &str| doc.get_str(key).ok().map(|s| s.to_string());
    let time = |key: &str| match doc.get(key) {
        None | Some(Bson::Null) => Ok(None),
        Some(value) => from_bson_time(value).map(Some),
    };

    Ok(PriceRecord {
        event_id: match doc.get("event_id") {
            Some(Bson::String(s)) => s.clone(),
            None | Some(Bson::Null) => String::new(),
            Some(other) => other.to_string(),
        },
        metal: text("metal"),
        price: doc
            .get("price")
            .and_then(|v| v.as_f64().or_else(|| bson_i64(v).map(|i| i as f64))),
        unit: text("unit"),
        timestamp: time("timestamp")?,
        source: text("source"),
        market: text("market"),
        volume: doc.get("volume").and_then(bson_i64),
        processed_at: time("processed_at")?,
        processor_id: text("processor_id"),
    })
}

fn is_duplicate_key(error: &MongoError) -> bool {
    matches!(
        &*error.kind,
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY
    )
}

/// Repository for price records stored in MongoDB
pub struct MongoPriceRepository {
    prices: Collection<Document>,
    recent: Collection<Document>,
}

impl MongoPriceRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            prices: db.collection(PRICES_COLLECTION),
            recent: db.collection(RECENT_PRICES_VIEW.name),
        }
    }

    /// Insert a new record; a duplicate `event_id` yields [`DuplicateEventId`]
    pub async fn insert(&self, record: &PriceRecord) -> Result<()> {
        match self.prices.insert_one(to_document(record)).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(DuplicateEventId {
                event_id: record.event_id.clone(),
            }
            .into()),
            Err(e) => Err(anyhow!(
                "Failed to insert price record '{}': {}",
                record.event_id,
                e
            )),
        }
    }

    /// Insert or update a record keyed by `event_id`, stamping it as processed
    ///
    /// Without a `processor_id` the host name is recorded.
    pub async fn upsert(
        &self,
        record: &PriceRecord,
        processor_id: Option<&str>,
    ) -> Result<UpsertOutcome> {
        let processor_id = processor_id
            .map(str::to_string)
            .unwrap_or_else(default_processor_id);
        let stamped = record.processed(&processor_id, Utc::now());
        let result = self
            .prices
            .update_one(
                doc! { "event_id": record.event_id.as_str() },
                doc! { "$set": to_document(&stamped) },
            )
            .upsert(true)
            .await
            .map_err(|e| anyhow!("Failed to upsert price record '{}': {}", record.event_id, e))?;

        let outcome = if result.upserted_id.is_some() {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        };
        debug!("upserted '{}': {:?}", record.event_id, outcome);
        Ok(outcome)
    }

    pub async fn get(&self, event_id: &str) -> Result<Option<PriceRecord>> {
        let found = self
            .prices
            .find_one(doc! { "event_id": event_id })
            .await
            .map_err(|e| anyhow!("Failed to look up price record '{}': {}", event_id, e))?;
        found.as_ref().map(from_document).transpose()
    }

    pub async fn count(&self) -> Result<u64> {
        self.prices
            .count_documents(doc! {})
            .await
            .map_err(|e| anyhow!("Failed to get price count: {}", e))
    }

    /// Newest records straight from the base collection
    pub async fn recent(&self, limit: u32) -> Result<Vec<PriceRecord>> {
        self.find_sorted(&self.prices, doc! {}, Some(limit)).await
    }

    /// Newest records of one metal, served by the `metal_1_timestamp_-1` index
    pub async fn recent_for_metal(&self, metal: &str, limit: u32) -> Result<Vec<PriceRecord>> {
        self.find_sorted(&self.prices, doc! { "metal": metal }, Some(limit))
            .await
    }

    /// Contents of the `recent_prices` view, in view order
    pub async fn recent_view(&self) -> Result<Vec<PriceRecord>> {
        let docs: Vec<Document> = self
            .recent
            .find(doc! {})
            .await
            .map_err(|e| anyhow!("Failed to query recent_prices: {}", e))?
            .try_collect()
            .await
            .map_err(|e| anyhow!("Failed to read recent_prices: {}", e))?;
        docs.iter().map(from_document).collect()
    }

    async fn find_sorted(
        &self,
        collection: &Collection<Document>,
        filter: Document,
        limit: Option<u32>,
    ) -> Result<Vec<PriceRecord>> {
        let mut find = collection.find(filter).sort(doc! { "timestamp": -1 });
        if let Some(limit) = limit {
            find = find.limit(i64::from(limit));
        }
        let docs: Vec<Document> = find
            .await
            .map_err(|e| anyhow!("Failed to query prices: {}", e))?
            .try_collect()
            .await
            .map_err(|e| anyhow!("Failed to read prices: {}", e))?;
        docs.iter().map(from_document).collect()
    }
}
