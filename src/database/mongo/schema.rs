//! MongoDB schema management
//!
//! Creates the prices collection, its indexes and the `recent_prices` view,
//! and reads them back from `listCollections` / `listIndexes` for status
//! checks.

use anyhow::{anyhow, Result};
use futures::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::options::IndexOptions;
use mongodb::results::{CollectionSpecification, CollectionType};
use mongodb::{Database, IndexModel};
use std::collections::HashMap;
use tracing::{debug, info};

use super::bson_i64;
use crate::database::core::{
    CollectionDescription, IndexDescription, IndexSpec, InitMode, InitReport, ObjectAction, SchemaObject, SchemaReport,
    SchemaStatus, SortOrder, ViewDescription, ViewSpec, PRICES_COLLECTION, PRICE_INDEXES,
    RECENT_PRICES_VIEW,
};

/// Key document for an index, e.g. `{ metal: 1, timestamp: -1 }`
pub fn index_keys(spec: &IndexSpec) -> Document {
    let mut keys = Document::new();
    for key in spec.keys {
        keys.insert(key.field, key.order.direction());
    }
    keys
}

/// Index model with the name written out explicitly
pub fn index_model(spec: &IndexSpec) -> IndexModel {
    let options = if spec.unique {
        IndexOptions::builder().name(spec.name()).unique(true).build()
    } else {
        IndexOptions::builder().name(spec.name()).build()
    };
    IndexModel::builder()
        .keys(index_keys(spec))
        .options(options)
        .build()
}

/// Aggregation pipeline backing a view: `$sort` then `$limit`
pub fn view_pipeline(view: &ViewSpec) -> Vec<Document> {
    let mut sort = Document::new();
    sort.insert(view.sort.field, view.sort.order.direction());
    vec![
        doc! { "$sort": sort },
        doc! { "$limit": i64::from(view.limit) },
    ]
}

/// Check a stored pipeline against the expected view definition
fn pipeline_matches(pipeline: &[Document], view: &ViewSpec) -> bool {
    let [sort, limit] = pipeline else {
        return false;
    };

    let sort_ok = match sort.get_document("$sort") {
        Ok(stage) => {
            stage.len() == 1
                && stage
                    .get(view.sort.field)
                    .and_then(bson_i64)
                    .and_then(SortOrder::from_direction)
                    == Some(view.sort.order)
        }
        Err(_) => false,
    };
    let limit_ok = limit.get("$limit").and_then(bson_i64) == Some(i64::from(view.limit));

    sort_ok && limit_ok
}

fn describe_pipeline(source: Option<&str>, pipeline: &[Document]) -> String {
    format!(
        "viewOn: {}, pipeline: [{}]",
        source.unwrap_or("<none>"),
        pipeline
            .iter()
            .map(|stage| stage.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    )
}

/// Schema manager for the MongoDB backend
pub struct MongoSchemaManager<'a> {
    db: &'a Database,
}

impl<'a> MongoSchemaManager<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Initialize the database schema
    ///
    /// Creates the collection, then the five indexes, then the view.
    /// Existing objects are handled according to `mode`.
    pub async fn initialize(&self, mode: InitMode) -> Result<InitReport> {
        let mut report = InitReport::new("mongodb", self.db.name(), mode);

        // Collection
        let collection = SchemaObject::collection(PRICES_COLLECTION);
        match self.describe_collection().await? {
            Some(found) => {
                let action = mode.resolve_existing(&collection, found.matches, &found.definition)?;
                report.record(collection, action);
            }
            None => {
                self.db
                    .create_collection(PRICES_COLLECTION)
                    .await
                    .map_err(|e| anyhow!("Failed to create collection prices: {}", e))?;
                info!("created collection '{}'", PRICES_COLLECTION);
                report.record(collection, ObjectAction::Created);
            }
        }

        // Indexes
        let existing: HashMap<String, IndexDescription> = self
            .describe_indexes()
            .await?
            .into_iter()
            .map(|i| (i.name.clone(), i))
            .collect();

        let prices = self.db.collection::<Document>(PRICES_COLLECTION);
        for spec in PRICE_INDEXES.iter() {
            let object = SchemaObject::index(PRICES_COLLECTION, spec);
            match existing.get(&spec.name()) {
                Some(found) => {
                    let action =
                        mode.resolve_existing(&object, found.matches(spec), &found.describe())?;
                    report.record(object, action);
                }
                None => {
                    let created = prices
                        .create_index(index_model(spec))
                        .await
                        .map_err(|e| anyhow!("Failed to create index {}: {}", object.name, e))?;
                    info!("created {} '{}'", object.kind, created.index_name);
                    report.record(object, ObjectAction::Created);
                }
            }
        }

        // View
        let object = SchemaObject::view(&RECENT_PRICES_VIEW);
        match self.describe_view().await? {
            Some(found) => {
                let action = mode.resolve_existing(&object, found.matches, &found.definition)?;
                report.record(object, action);
            }
            None => {
                self.db
                    .create_collection(RECENT_PRICES_VIEW.name)
                    .view_on(RECENT_PRICES_VIEW.source.to_string())
                    .pipeline(view_pipeline(&RECENT_PRICES_VIEW))
                    .await
                    .map_err(|e| anyhow!("Failed to create view {}: {}", object.name, e))?;
                info!("created view '{}'", object.name);
                report.record(object, ObjectAction::Created);
            }
        }

        debug!(
            "mongodb initialization finished: {} created, {} already present",
            report.created_count(),
            report.present_count()
        );
        Ok(report)
    }

    /// Inspect the schema and compare it with the expected layout
    pub async fn inspect(&self) -> Result<SchemaReport> {
        let collection = self.describe_collection().await?;
        let indexes = self.describe_indexes().await?;
        let view = self.describe_view().await?;
        Ok(SchemaReport::new(collection, indexes, view))
    }

    /// Check the current schema status
    pub async fn check_status(&self) -> Result<SchemaStatus> {
        Ok(self.inspect().await?.status)
    }

    /// Read the prices collection entry, if it exists
    ///
    /// Documents carry no schema, so any regular collection matches; a view
    /// or timeseries collection under the same name does not.
    pub async fn describe_collection(&self) -> Result<Option<CollectionDescription>> {
        Ok(self
            .collection_spec(PRICES_COLLECTION)
            .await?
            .map(|spec| CollectionDescription {
                name: PRICES_COLLECTION.to_string(),
                definition: format!("{:?}", spec.collection_type).to_lowercase(),
                matches: matches!(spec.collection_type, CollectionType::Collection),
            }))
    }

    /// Read index definitions on the prices collection
    ///
    /// Returns an empty list when the collection does not exist yet.
    pub async fn describe_indexes(&self) -> Result<Vec<IndexDescription>> {
        let exists = self
            .collection_spec(PRICES_COLLECTION)
            .await?
            .is_some_and(|spec| matches!(spec.collection_type, CollectionType::Collection));
        if !exists {
            return Ok(Vec::new());
        }

        let models: Vec<IndexModel> = self
            .db
            .collection::<Document>(PRICES_COLLECTION)
            .list_indexes()
            .await
            .map_err(|e| anyhow!("Failed to list indexes: {}", e))?
            .try_collect()
            .await
            .map_err(|e| anyhow!("Failed to read index list: {}", e))?;

        Ok(models.iter().map(describe_index_model).collect())
    }

    /// Read the recent prices view definition, if the view exists
    pub async fn describe_view(&self) -> Result<Option<ViewDescription>> {
        let Some(spec) = self.collection_spec(RECENT_PRICES_VIEW.name).await? else {
            return Ok(None);
        };

        let source = spec.options.view_on.as_deref();
        let pipeline = spec.options.pipeline.clone().unwrap_or_default();
        let matches = matches!(spec.collection_type, CollectionType::View)
            && source == Some(RECENT_PRICES_VIEW.source)
            && pipeline_matches(&pipeline, &RECENT_PRICES_VIEW);

        Ok(Some(ViewDescription {
            name: RECENT_PRICES_VIEW.name.to_string(),
            definition: describe_pipeline(source, &pipeline),
            matches,
        }))
    }

    async fn collection_spec(&self, name: &str) -> Result<Option<CollectionSpecification>> {
        let mut specs: Vec<CollectionSpecification> = self
            .db
            .list_collections()
            .filter(doc! { "name": name })
            .await
            .map_err(|e| anyhow!("Failed to list collections: {}", e))?
            .try_collect()
            .await
            .map_err(|e| anyhow!("Failed to read collection list: {}", e))?;
        Ok(specs.pop())
    }
}

fn describe_index_model(model: &IndexModel) -> IndexDescription {
    let options = model.options.as_ref();
    let keys = model
        .keys
        .iter()
        .filter_map(|(field, value)| {
            bson_i64(value)
                .and_then(SortOrder::from_direction)
                .map(|order| (field.clone(), order))
        })
        .collect();

    IndexDescription {
        name: options
            .and_then(|o| o.name.clone())
            .unwrap_or_default(),
        keys,
        unique: options.and_then(|o| o.unique).unwrap_or(false),
    }
}
