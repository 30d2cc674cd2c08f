//! Initialization modes, reports and schema status
//!
//! Types shared by the SQLite and MongoDB schema managers.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use super::layout::{
    describe_key_pairs, IndexSpec, ObjectKind, SchemaObject, SortOrder, PRICES_COLLECTION,
    PRICE_INDEXES, RECENT_PRICES_VIEW,
};

/// Message printed once initialization has finished
pub const COMPLETION_MESSAGE: &str = "metals database initialization complete";

/// How `initialize` treats objects that already exist
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InitMode {
    /// Leave objects matching the layout untouched, fail on conflicting ones
    #[default]
    Idempotent,
    /// Fail on any pre-existing object
    Strict,
}

impl InitMode {
    /// Decide what to do with an object that is already in the database
    ///
    /// `matches` tells whether the existing definition equals the expected
    /// one; `found` describes what the database reported.
    pub fn resolve_existing(
        &self,
        object: &SchemaObject,
        matches: bool,
        found: &str,
    ) -> Result<ObjectAction, SchemaConflict> {
        match self {
            _ if !matches => Err(SchemaConflict::ConflictingDefinition {
                kind: object.kind,
                name: object.name.clone(),
                expected: object.definition.clone(),
                found: found.to_string(),
            }),
            InitMode::Strict => Err(SchemaConflict::AlreadyExists {
                kind: object.kind,
                name: object.name.clone(),
            }),
            InitMode::Idempotent => Ok(ObjectAction::AlreadyPresent),
        }
    }
}

/// Existing schema object that prevents initialization
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaConflict {
    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: ObjectKind, name: String },

    #[error("{kind} '{name}' exists with a conflicting definition (expected {expected}; found {found})")]
    ConflictingDefinition {
        kind: ObjectKind,
        name: String,
        expected: String,
        found: String,
    },
}

/// Action taken for one schema object during initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectAction {
    Created,
    AlreadyPresent,
}

impl fmt::Display for ObjectAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectAction::Created => write!(f, "created"),
            ObjectAction::AlreadyPresent => write!(f, "already present"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectOutcome {
    #[serde(flatten)]
    pub object: SchemaObject,
    pub action: ObjectAction,
}

/// Result of an initialization run
#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub backend: String,
    pub database: String,
    pub mode: InitMode,
    pub objects: Vec<ObjectOutcome>,
}

impl InitReport {
    pub fn new(backend: &str, database: &str, mode: InitMode) -> Self {
        Self {
            backend: backend.to_string(),
            database: database.to_string(),
            mode,
            objects: Vec::new(),
        }
    }

    pub fn record(&mut self, object: SchemaObject, action: ObjectAction) {
        self.objects.push(ObjectOutcome { object, action });
    }

    pub fn created_count(&self) -> usize {
        self.objects
            .iter()
            .filter(|o| o.action == ObjectAction::Created)
            .count()
    }

    pub fn present_count(&self) -> usize {
        self.objects
            .iter()
            .filter(|o| o.action == ObjectAction::AlreadyPresent)
            .count()
    }
}

/// Index as reported by the database catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexDescription {
    pub name: String,
    pub keys: Vec<(String, SortOrder)>,
    pub unique: bool,
}

impl IndexDescription {
    pub fn matches(&self, spec: &IndexSpec) -> bool {
        self.unique == spec.unique && self.keys == spec.key_pairs()
    }

    pub fn describe(&self) -> String {
        format!(
            "{}keys: {}",
            if self.unique { "unique, " } else { "" },
            describe_key_pairs(&self.keys)
        )
    }
}

/// Prices collection as reported by the database catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionDescription {
    pub name: String,
    pub definition: String,
    pub matches: bool,
}

/// View as reported by the database catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewDescription {
    pub name: String,
    pub definition: String,
    pub matches: bool,
}

/// State of the persisted schema compared to the expected layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SchemaStatus {
    /// None of the layout objects exist
    NotInitialized,
    /// Every object exists with the expected definition
    Current,
    /// Some objects are missing; the present ones match
    Incomplete { missing: Vec<String> },
    /// At least one object exists with a different definition
    Drifted { conflicts: Vec<String> },
}

impl SchemaStatus {
    /// Compare catalog data against the layout
    ///
    /// Indexes not named in the layout (such as MongoDB's `_id_`) are ignored.
    pub fn evaluate(
        collection: Option<&CollectionDescription>,
        indexes: &[IndexDescription],
        view: Option<&ViewDescription>,
    ) -> SchemaStatus {
        let by_name: HashMap<&str, &IndexDescription> =
            indexes.iter().map(|i| (i.name.as_str(), i)).collect();

        if collection.is_none() && view.is_none() {
            return SchemaStatus::NotInitialized;
        }

        let mut missing = Vec::new();
        let mut conflicts = Vec::new();

        match collection {
            Some(c) if c.matches => {}
            Some(c) => conflicts.push(format!("{} ({})", c.name, c.definition)),
            None => missing.push(PRICES_COLLECTION.to_string()),
        }

        for spec in PRICE_INDEXES.iter() {
            let qualified = spec.qualified_name(PRICES_COLLECTION);
            match by_name.get(spec.name().as_str()) {
                Some(found) if found.matches(spec) => {}
                Some(found) => conflicts.push(format!("{} ({})", qualified, found.describe())),
                None => missing.push(qualified),
            }
        }

        match view {
            Some(v) if v.matches => {}
            Some(v) => conflicts.push(format!("{} ({})", v.name, v.definition)),
            None => missing.push(RECENT_PRICES_VIEW.name.to_string()),
        }

        if !conflicts.is_empty() {
            SchemaStatus::Drifted { conflicts }
        } else if !missing.is_empty() {
            SchemaStatus::Incomplete { missing }
        } else {
            SchemaStatus::Current
        }
    }

    pub fn is_current(&self) -> bool {
        matches!(self, SchemaStatus::Current)
    }
}

impl fmt::Display for SchemaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaStatus::NotInitialized => write!(f, "not initialized"),
            SchemaStatus::Current => write!(f, "current"),
            SchemaStatus::Incomplete { missing } => {
                write!(f, "incomplete (missing: {})", missing.join(", "))
            }
            SchemaStatus::Drifted { conflicts } => {
                write!(f, "drifted (conflicts: {})", conflicts.join("; "))
            }
        }
    }
}

/// Full inspection result: status plus what the catalog reported
#[derive(Debug, Clone, Serialize)]
pub struct SchemaReport {
    pub status: SchemaStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<CollectionDescription>,
    pub indexes: Vec<IndexDescription>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view: Option<ViewDescription>,
}

impl SchemaReport {
    pub fn new(
        collection: Option<CollectionDescription>,
        indexes: Vec<IndexDescription>,
        view: Option<ViewDescription>,
    ) -> Self {
        let status = SchemaStatus::evaluate(collection.as_ref(), &indexes, view.as_ref());
        Self {
            status,
            collection,
            indexes,
            view,
        }
    }

    pub fn collection_exists(&self) -> bool {
        self.collection.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected_indexes() -> Vec<IndexDescription> {
        PRICE_INDEXES
            .iter()
            .map(|spec| IndexDescription {
                name: spec.name(),
                keys: spec.key_pairs(),
                unique: spec.unique,
            })
            .collect()
    }

    fn matching_collection() -> CollectionDescription {
        CollectionDescription {
            name: "prices".to_string(),
            definition: "table".to_string(),
            matches: true,
        }
    }

    fn matching_view() -> ViewDescription {
        ViewDescription {
            name: "recent_prices".to_string(),
            definition: "sort by timestamp descending, limit 100".to_string(),
            matches: true,
        }
    }

    #[test]
    fn test_strict_mode_rejects_existing() {
        let object = SchemaObject::collection("prices");
        let err = InitMode::Strict
            .resolve_existing(&object, true, "collection")
            .unwrap_err();
        assert_eq!(err.to_string(), "collection 'prices' already exists");

        let index = SchemaObject::index("prices", &PRICE_INDEXES[1]);
        let err = InitMode::Strict
            .resolve_existing(&index, false, "keys: timestamp ascending")
            .unwrap_err();
        assert!(matches!(err, SchemaConflict::ConflictingDefinition { .. }));
    }

    #[test]
    fn test_idempotent_mode_keeps_matching() {
        let object = SchemaObject::collection("prices");
        let action = InitMode::Idempotent
            .resolve_existing(&object, true, "collection")
            .unwrap();
        assert_eq!(action, ObjectAction::AlreadyPresent);
    }

    #[test]
    fn test_idempotent_mode_rejects_conflicts() {
        let object = SchemaObject::index("prices", &PRICE_INDEXES[1]);
        let err = InitMode::Idempotent
            .resolve_existing(&object, false, "keys: timestamp ascending")
            .unwrap_err();
        assert!(matches!(
            err,
            SchemaConflict::ConflictingDefinition { ref name, .. } if name == "prices.metal_1"
        ));
    }

    #[test]
    fn test_index_description_matches() {
        let mut desc = expected_indexes().remove(0);
        assert!(desc.matches(&PRICE_INDEXES[0]));

        desc.unique = false;
        assert!(!desc.matches(&PRICE_INDEXES[0]));
        assert_eq!(desc.describe(), "keys: event_id ascending");
    }

    #[test]
    fn test_status_not_initialized() {
        assert_eq!(
            SchemaStatus::evaluate(None, &[], None),
            SchemaStatus::NotInitialized
        );
    }

    #[test]
    fn test_status_current() {
        let collection = matching_collection();
        let view = matching_view();
        let status = SchemaStatus::evaluate(Some(&collection), &expected_indexes(), Some(&view));
        assert!(status.is_current());
    }

    #[test]
    fn test_status_ignores_unknown_indexes() {
        let mut indexes = expected_indexes();
        indexes.push(IndexDescription {
            name: "_id_".to_string(),
            keys: vec![("_id".to_string(), SortOrder::Ascending)],
            unique: false,
        });
        let collection = matching_collection();
        let view = matching_view();
        assert!(SchemaStatus::evaluate(Some(&collection), &indexes, Some(&view)).is_current());
    }

    #[test]
    fn test_status_incomplete() {
        let mut indexes = expected_indexes();
        indexes.retain(|i| i.name != "processed_at_1");
        let collection = matching_collection();
        let status = SchemaStatus::evaluate(Some(&collection), &indexes, None);
        assert_eq!(
            status,
            SchemaStatus::Incomplete {
                missing: vec![
                    "prices.processed_at_1".to_string(),
                    "recent_prices".to_string()
                ]
            }
        );
    }

    #[test]
    fn test_status_drifted() {
        let mut indexes = expected_indexes();
        indexes[4].keys[1].1 = SortOrder::Ascending;
        let collection = matching_collection();
        let view = matching_view();
        match SchemaStatus::evaluate(Some(&collection), &indexes, Some(&view)) {
            SchemaStatus::Drifted { conflicts } => {
                assert_eq!(conflicts.len(), 1);
                assert!(conflicts[0].starts_with("prices.metal_1_timestamp_-1"));
            }
            other => panic!("unexpected status: {}", other),
        }
    }

    #[test]
    fn test_status_drifted_collection() {
        let collection = CollectionDescription {
            name: "prices".to_string(),
            definition: "table missing columns: price, unit".to_string(),
            matches: false,
        };
        let view = matching_view();
        let report = SchemaReport::new(Some(collection), expected_indexes(), Some(view));
        assert!(report.collection_exists());
        assert_eq!(
            report.status,
            SchemaStatus::Drifted {
                conflicts: vec!["prices (table missing columns: price, unit)".to_string()]
            }
        );
    }

    #[test]
    fn test_report_counts() {
        let mut report = InitReport::new("sqlite", ":memory:", InitMode::Idempotent);
        report.record(SchemaObject::collection("prices"), ObjectAction::Created);
        report.record(
            SchemaObject::view(&RECENT_PRICES_VIEW),
            ObjectAction::AlreadyPresent,
        );
        assert_eq!(report.created_count(), 1);
        assert_eq!(report.present_count(), 1);
    }
}
