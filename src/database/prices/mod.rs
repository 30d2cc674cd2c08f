//! Price records
//!
//! The single entity stored in the `prices` collection, plus the small
//! amount of shared logic both backends need to read and write it.

mod sqlite;

pub use sqlite::PriceRepository;

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A metal price event
///
/// The collection enforces no required fields, so everything except
/// `event_id` is optional; a stored record without an `event_id` reads back
/// with an empty one. Timestamps are kept at millisecond precision, the
/// finest both backends store, and the constructors truncate to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub event_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processor_id: Option<String>,
}

impl PriceRecord {
    pub fn new(event_id: &str, metal: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_id: event_id.to_string(),
            metal: Some(metal.to_string()),
            price: None,
            unit: None,
            timestamp: Some(truncate_to_millis(timestamp)),
            source: None,
            market: None,
            volume: None,
            processed_at: None,
            processor_id: None,
        }
    }

    /// Set the price and, for known metals, the matching unit
    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        if self.unit.is_none() {
            self.unit = self
                .metal
                .as_deref()
                .and_then(|m| Metal::from_str(m).ok())
                .map(|m| m.unit().to_string());
        }
        self
    }

    pub fn with_market(mut self, market: &str) -> Self {
        self.market = Some(market.to_string());
        self
    }

    pub fn with_volume(mut self, volume: i64) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    /// Copy of the record stamped by a processor at `now`
    pub fn processed(&self, processor_id: &str, now: DateTime<Utc>) -> Self {
        let mut record = self.clone();
        record.processed_at = Some(truncate_to_millis(now));
        record.processor_id = Some(processor_id.to_string());
        record
    }
}

/// Second insertion of an `event_id` rejected by the unique index
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("price record with event_id '{event_id}' already exists")]
pub struct DuplicateEventId {
    pub event_id: String,
}

/// Whether an upsert created a new record or updated an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Metals known to the price producers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metal {
    Gold,
    Silver,
    Platinum,
    Palladium,
    Copper,
    Aluminum,
}

impl Metal {
    pub fn all() -> &'static [Metal] {
        &[
            Metal::Gold,
            Metal::Silver,
            Metal::Platinum,
            Metal::Palladium,
            Metal::Copper,
            Metal::Aluminum,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Metal::Gold => "gold",
            Metal::Silver => "silver",
            Metal::Platinum => "platinum",
            Metal::Palladium => "palladium",
            Metal::Copper => "copper",
            Metal::Aluminum => "aluminum",
        }
    }

    /// Quoting unit: precious metals per troy ounce, base metals per pound
    pub fn unit(&self) -> &'static str {
        match self {
            Metal::Gold | Metal::Silver | Metal::Platinum | Metal::Palladium => "USD/oz",
            Metal::Copper | Metal::Aluminum => "USD/lb",
        }
    }

    pub fn all_names() -> Vec<&'static str> {
        Self::all().iter().map(|m| m.name()).collect()
    }
}

impl fmt::Display for Metal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Metal {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::all()
            .iter()
            .find(|m| m.name() == s.to_lowercase())
            .copied()
            .ok_or_else(|| {
                format!(
                    "Unknown metal '{}'. Known metals: {}",
                    s,
                    Self::all_names().join(", ")
                )
            })
    }
}

/// Drop sub-millisecond digits
pub fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(3)
}

/// Fixed-width RFC 3339 text (UTC, milliseconds) so lexical order is time order
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    truncate_to_millis(*ts).to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse RFC 3339 text; timestamps without an offset are taken as UTC
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(s) {
        Ok(dt) => Ok(dt.with_timezone(&Utc)),
        Err(e) => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|_| anyhow!("Invalid timestamp '{}': {}", s, e)),
    }
}

/// Host name used as `processor_id` when an upsert names none
pub fn default_processor_id() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_metal_from_str() {
        assert_eq!(Metal::from_str("gold").unwrap(), Metal::Gold);
        assert_eq!(Metal::from_str("Copper").unwrap(), Metal::Copper);
        assert!(Metal::from_str("unobtainium").is_err());
    }

    #[test]
    fn test_metal_units() {
        assert_eq!(Metal::Palladium.unit(), "USD/oz");
        assert_eq!(Metal::Aluminum.unit(), "USD/lb");
    }

    #[test]
    fn test_with_price_fills_unit() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let record = PriceRecord::new("e1", "silver", ts).with_price(24.1);
        assert_eq!(record.unit.as_deref(), Some("USD/oz"));

        let record = PriceRecord::new("e2", "rhodium", ts).with_price(4500.0);
        assert_eq!(record.unit, None);
    }

    #[test]
    fn test_timestamp_text_sorts_chronologically() {
        let early = Utc.with_ymd_and_hms(2024, 3, 1, 9, 59, 59).unwrap();
        let late = early + chrono::Duration::milliseconds(1500);

        let early_text = format_timestamp(&early);
        let late_text = format_timestamp(&late);
        assert_eq!(early_text, "2024-03-01T09:59:59.000Z");
        assert_eq!(early_text.len(), late_text.len());
        assert!(early_text < late_text);
        assert_eq!(parse_timestamp(&late_text).unwrap(), late);
    }

    #[test]
    fn test_parse_timestamp_with_offset() {
        let parsed = parse_timestamp("2024-03-01T10:00:00+02:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap());
        assert!(parse_timestamp("yesterday").is_err());

        let naive = parse_timestamp("2024-03-01T10:00:00.250000").unwrap();
        assert_eq!(
            naive,
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap() + chrono::Duration::milliseconds(250)
        );
    }

    #[test]
    fn test_processed_stamps_copy() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let record = PriceRecord::new("e1", "gold", ts).with_source("producer-1");
        let stamped = record.processed("proc-1", ts);
        assert_eq!(stamped.source.as_deref(), Some("producer-1"));
        assert_eq!(stamped.processor_id.as_deref(), Some("proc-1"));
        assert_eq!(stamped.processed_at, Some(ts));
        assert_eq!(record.processed_at, None);
    }

    #[test]
    fn test_constructors_truncate_to_millis() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        let record = PriceRecord::new("e1", "gold", ts).processed("proc-1", ts);
        let millis = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
            + chrono::Duration::milliseconds(123);
        assert_eq!(record.timestamp, Some(millis));
        assert_eq!(record.processed_at, Some(millis));
        assert_eq!(format_timestamp(&ts), "2024-03-01T12:00:00.123Z");
    }

    #[test]
    fn test_default_processor_id_is_never_empty() {
        assert!(!default_processor_id().is_empty());
    }
}
