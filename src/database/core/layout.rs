//! Schema contract for the metals price store
//!
//! This module is the single source of truth for every object the
//! initializer creates. Both the SQLite and the MongoDB schema managers
//! materialize these definitions, and status checks compare whatever the
//! database reports against them.

use serde::Serialize;
use std::fmt;

/// Name of the database selected by default
pub const DATABASE_NAME: &str = "metals";

/// Base collection holding price records
pub const PRICES_COLLECTION: &str = "prices";

/// Maximum number of documents exposed by the recent prices view
pub const RECENT_PRICES_LIMIT: u32 = 100;

/// Sort direction of an index key or a view sort stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    /// Numeric direction as written in MongoDB key documents
    pub fn direction(&self) -> i32 {
        match self {
            SortOrder::Ascending => 1,
            SortOrder::Descending => -1,
        }
    }

    pub fn from_direction(direction: i64) -> Option<SortOrder> {
        match direction {
            1 => Some(SortOrder::Ascending),
            -1 => Some(SortOrder::Descending),
            _ => None,
        }
    }

    pub fn sql_keyword(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Ascending => write!(f, "ascending"),
            SortOrder::Descending => write!(f, "descending"),
        }
    }
}

/// One field of an index key (or of a sort stage)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexKey {
    pub field: &'static str,
    pub order: SortOrder,
}

impl IndexKey {
    pub const fn asc(field: &'static str) -> Self {
        Self {
            field,
            order: SortOrder::Ascending,
        }
    }

    pub const fn desc(field: &'static str) -> Self {
        Self {
            field,
            order: SortOrder::Descending,
        }
    }
}

/// Definition of an index on the prices collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpec {
    pub keys: &'static [IndexKey],
    pub unique: bool,
}

impl IndexSpec {
    /// Index name following MongoDB's default naming rule
    ///
    /// Each key contributes `<field>_<direction>`, joined with `_`, so
    /// `{ metal: 1, timestamp: -1 }` becomes `metal_1_timestamp_-1`.
    pub fn name(&self) -> String {
        self.keys
            .iter()
            .map(|k| format!("{}_{}", k.field, k.order.direction()))
            .collect::<Vec<_>>()
            .join("_")
    }

    /// Name prefixed with the owning collection, e.g. `prices.metal_1`
    pub fn qualified_name(&self, collection: &str) -> String {
        format!("{}.{}", collection, self.name())
    }

    /// Ordered key list in owned form, for comparison against catalog data
    pub fn key_pairs(&self) -> Vec<(String, SortOrder)> {
        self.keys
            .iter()
            .map(|k| (k.field.to_string(), k.order))
            .collect()
    }

    /// Human-readable key description, e.g. `metal ascending, timestamp descending`
    pub fn describe_keys(&self) -> String {
        describe_key_pairs(&self.key_pairs())
    }
}

/// Render an ordered key list as `field order, field order`
pub fn describe_key_pairs(keys: &[(String, SortOrder)]) -> String {
    keys.iter()
        .map(|(field, order)| format!("{} {}", field, order))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Definition of a read-only view over a base collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewSpec {
    pub name: &'static str,
    pub source: &'static str,
    pub sort: IndexKey,
    pub limit: u32,
}

impl ViewSpec {
    pub fn describe(&self) -> String {
        format!(
            "pipeline: sort by {} {}, then limit to {}",
            self.sort.field, self.sort.order, self.limit
        )
    }
}

/// Indexes on the prices collection, in creation order
pub const PRICE_INDEXES: [IndexSpec; 5] = [
    IndexSpec {
        keys: &[IndexKey::asc("event_id")],
        unique: true,
    },
    IndexSpec {
        keys: &[IndexKey::asc("metal")],
        unique: false,
    },
    IndexSpec {
        keys: &[IndexKey::asc("timestamp")],
        unique: false,
    },
    IndexSpec {
        keys: &[IndexKey::asc("processed_at")],
        unique: false,
    },
    IndexSpec {
        keys: &[IndexKey::asc("metal"), IndexKey::desc("timestamp")],
        unique: false,
    },
];

/// Live view over the newest price records
pub const RECENT_PRICES_VIEW: ViewSpec = ViewSpec {
    name: "recent_prices",
    source: PRICES_COLLECTION,
    sort: IndexKey::desc("timestamp"),
    limit: RECENT_PRICES_LIMIT,
};

/// Kind of a schema object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Collection,
    Index,
    UniqueIndex,
    View,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Collection => write!(f, "collection"),
            ObjectKind::Index => write!(f, "index"),
            ObjectKind::UniqueIndex => write!(f, "unique index"),
            ObjectKind::View => write!(f, "view"),
        }
    }
}

/// A named object of the persisted layout together with its definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaObject {
    pub name: String,
    pub kind: ObjectKind,
    pub definition: String,
}

impl SchemaObject {
    pub fn collection(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ObjectKind::Collection,
            definition: "stores price records".to_string(),
        }
    }

    pub fn index(collection: &str, spec: &IndexSpec) -> Self {
        Self {
            name: spec.qualified_name(collection),
            kind: if spec.unique {
                ObjectKind::UniqueIndex
            } else {
                ObjectKind::Index
            },
            definition: format!("keys: {}", spec.describe_keys()),
        }
    }

    pub fn view(spec: &ViewSpec) -> Self {
        Self {
            name: spec.name.to_string(),
            kind: ObjectKind::View,
            definition: spec.describe(),
        }
    }
}

/// Complete persisted layout of the metals database
pub struct SchemaLayout;

impl SchemaLayout {
    /// Every schema object in creation order: collection, indexes, view
    pub fn objects() -> Vec<SchemaObject> {
        let mut objects = vec![SchemaObject::collection(PRICES_COLLECTION)];
        objects.extend(
            PRICE_INDEXES
                .iter()
                .map(|spec| SchemaObject::index(PRICES_COLLECTION, spec)),
        );
        objects.push(SchemaObject::view(&RECENT_PRICES_VIEW));
        objects
    }

    /// Look up the expected index by its (unqualified) name
    pub fn index_by_name(name: &str) -> Option<&'static IndexSpec> {
        PRICE_INDEXES.iter().find(|spec| spec.name() == name)
    }
}
