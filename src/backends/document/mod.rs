//! Document store adapter.
//!
//! # Data Flow
//! ```text
//! Database::new(driver).collection("orders")
//!     .monitor(ctx, monitor, request_id, capture_error)
//!     .find_all::<Order>(json!({ "status": "open" }), FindOptions::default())
//!         → Guard::observe(Call "document" / "FindAll", database, collection)
//!         → DocumentDriver::find(collection, filter, options)
//!         → documents decoded into Order
//! ```
//!
//! # Design Decisions
//! - Filters and updates are JSON objects in the usual operator form
//!   (`{"age": {"$gt": 30}}`, `{"$set": {..}}`); a non-object is rejected before I/O
//! - Inserted documents without `_id` get a generated one, returned to the caller
//! - Database-level calls carry only the `database` tag; collection calls add `collection`

pub mod memory;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::backends::{Call, Guard, Instrument, SpanError};
use crate::monitor::SpanStatus;

pub use memory::MemoryDocuments;

const OPERATION: &str = "document";

/// Field holding a document's identity.
pub const ID_FIELD: &str = "_id";

pub type Document = Map<String, Value>;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("no document in {0} matches the filter")]
    NotFound(String),

    #[error("duplicate _id {id} in {collection}")]
    DuplicateKey { collection: String, id: String },

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("failed to encode document for {collection}: {source}")]
    Encode {
        collection: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode document from {collection}: {source}")]
    Decode {
        collection: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("document store connection closed")]
    Closed,

    #[error("document store error: {0}")]
    Driver(String),
}

impl SpanError for DocumentError {
    fn span_status(&self) -> SpanStatus {
        match self {
            DocumentError::NotFound(_) => SpanStatus::NotFound,
            DocumentError::DuplicateKey { .. } => SpanStatus::AlreadyExists,
            DocumentError::InvalidDocument(_) | DocumentError::Encode { .. } => SpanStatus::InvalidArgument,
            DocumentError::Decode { .. } => SpanStatus::DataLoss,
            DocumentError::Closed => SpanStatus::Unavailable,
            DocumentError::Driver(_) => SpanStatus::InternalError,
        }
    }
}

/// Options for `find` style calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// `(field, 1)` ascending, `(field, -1)` descending.
    pub sort: Vec<(String, i8)>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

impl FindOptions {
    pub fn sort(mut self, field: impl Into<String>, order: i8) -> Self {
        self.sort.push((field.into(), order));
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Connection to a document database.
#[async_trait]
pub trait DocumentDriver: Send + Sync + fmt::Debug + 'static {
    fn database(&self) -> &str;

    async fn ping(&self) -> Result<(), DocumentError>;
    async fn find(&self, collection: &str, filter: &Document, options: &FindOptions) -> Result<Vec<Document>, DocumentError>;
    async fn count(&self, collection: &str, filter: &Document) -> Result<u64, DocumentError>;
    /// Returns the `_id` of every inserted document, in order.
    async fn insert(&self, collection: &str, documents: Vec<Document>) -> Result<Vec<String>, DocumentError>;
    /// Returns the number of matched documents.
    async fn update(&self, collection: &str, filter: &Document, update: &Document, many: bool) -> Result<u64, DocumentError>;
    async fn delete(&self, collection: &str, filter: &Document, many: bool) -> Result<u64, DocumentError>;
    /// Returns the document after the update.
    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Document,
        update: &Document,
    ) -> Result<Option<Document>, DocumentError>;
    async fn find_one_and_delete(&self, collection: &str, filter: &Document) -> Result<Option<Document>, DocumentError>;
    async fn distinct(&self, collection: &str, field: &str, filter: &Document) -> Result<Vec<Value>, DocumentError>;
    async fn create_collection(&self, collection: &str) -> Result<(), DocumentError>;
    async fn collection_names(&self) -> Result<Vec<String>, DocumentError>;
    async fn drop_database(&self) -> Result<(), DocumentError>;
    async fn close(&self) -> Result<(), DocumentError>;
}

/// Database handle, bare or monitored.
#[derive(Debug)]
pub struct Database<D> {
    driver: Arc<D>,
    guard: Guard,
}

impl<D> Clone for Database<D> {
    fn clone(&self) -> Self {
        Self {
            driver: self.driver.clone(),
            guard: self.guard.clone(),
        }
    }
}

impl<D: DocumentDriver> Instrument for Database<D> {
    fn guard(&self) -> &Guard {
        &self.guard
    }

    fn guard_mut(&mut self) -> &mut Guard {
        &mut self.guard
    }
}

impl<D: DocumentDriver> Database<D> {
    pub fn new(driver: D) -> Self {
        Self::from_arc(Arc::new(driver))
    }

    pub fn from_arc(driver: Arc<D>) -> Self {
        Self {
            driver,
            guard: Guard::bare(),
        }
    }

    /// Connect and verify the store answers.
    pub async fn connect(driver: D) -> Result<Self, DocumentError> {
        let db = Self::new(driver);
        if let Err(e) = db.driver.ping().await {
            tracing::error!(database = db.driver.database(), error = %e, "Failed ping on new document store connection");
            return Err(e);
        }
        Ok(db)
    }

    pub fn name(&self) -> &str {
        self.driver.database()
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    /// Collection handle inheriting this handle's instrumentation.
    pub fn collection(&self, name: impl Into<String>) -> Collection<D> {
        Collection {
            driver: self.driver.clone(),
            name: name.into(),
            guard: self.guard.clone(),
        }
    }

    fn call(&self, action: &str) -> Call {
        Call::new(OPERATION, action).tag("database", self.driver.database())
    }

    pub async fn ping(&self) -> Result<(), DocumentError> {
        self.driver.ping().await
    }

    pub async fn create_collection(&self, name: &str) -> Result<Collection<D>, DocumentError> {
        self.guard
            .observe(self.call("CreateCollection"), self.driver.create_collection(name))
            .await?;
        Ok(self.collection(name))
    }

    pub async fn has_collection(&self, name: &str) -> Result<bool, DocumentError> {
        self.guard
            .observe(self.call("HasCollection"), async {
                Ok(self.driver.collection_names().await?.iter().any(|n| n == name))
            })
            .await
    }

    pub async fn collection_names(&self) -> Result<Vec<String>, DocumentError> {
        self.guard
            .observe(self.call("CollectionNames"), self.driver.collection_names())
            .await
    }

    pub async fn drop(&self) -> Result<(), DocumentError> {
        self.guard.observe(self.call("Drop"), self.driver.drop_database()).await
    }

    pub async fn close(&self) -> Result<(), DocumentError> {
        self.driver.close().await
    }
}

/// Collection handle, bare or monitored.
#[derive(Debug)]
pub struct Collection<D> {
    driver: Arc<D>,
    name: String,
    guard: Guard,
}

impl<D> Clone for Collection<D> {
    fn clone(&self) -> Self {
        Self {
            driver: self.driver.clone(),
            name: self.name.clone(),
            guard: self.guard.clone(),
        }
    }
}

impl<D: DocumentDriver> Instrument for Collection<D> {
    fn guard(&self) -> &Guard {
        &self.guard
    }

    fn guard_mut(&mut self) -> &mut Guard {
        &mut self.guard
    }
}

impl<D: DocumentDriver> Collection<D> {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, action: &str) -> Call {
        Call::new(OPERATION, action)
            .tag("database", self.driver.database())
            .tag("collection", self.name.as_str())
    }

    pub async fn find_one<T: DeserializeOwned>(&self, filter: Value, options: FindOptions) -> Result<T, DocumentError> {
        self.guard
            .observe(self.call("FindOne"), async {
                let filter = as_document(filter)?;
                let options = options.limit(1);
                match self.driver.find(&self.name, &filter, &options).await?.into_iter().next() {
                    Some(doc) => self.decode(doc),
                    None => Err(DocumentError::NotFound(self.name.clone())),
                }
            })
            .await
    }

    pub async fn find_all<T: DeserializeOwned>(&self, filter: Value, options: FindOptions) -> Result<Vec<T>, DocumentError> {
        self.guard
            .observe(self.call("FindAll"), async {
                let filter = as_document(filter)?;
                self.driver
                    .find(&self.name, &filter, &options)
                    .await?
                    .into_iter()
                    .map(|doc| self.decode(doc))
                    .collect()
            })
            .await
    }

    /// Apply `update` to the first match and return it as updated.
    pub async fn find_one_and_update<T: DeserializeOwned>(&self, filter: Value, update: Value) -> Result<T, DocumentError> {
        self.guard
            .observe(self.call("FindOneAndUpdate"), async {
                let filter = as_document(filter)?;
                let update = as_update(update)?;
                match self.driver.find_one_and_update(&self.name, &filter, &update).await? {
                    Some(doc) => self.decode(doc),
                    None => Err(DocumentError::NotFound(self.name.clone())),
                }
            })
            .await
    }

    /// Delete the first match and return it.
    pub async fn find_one_and_delete<T: DeserializeOwned>(&self, filter: Value) -> Result<T, DocumentError> {
        self.guard
            .observe(self.call("FindOneAndDelete"), async {
                let filter = as_document(filter)?;
                match self.driver.find_one_and_delete(&self.name, &filter).await? {
                    Some(doc) => self.decode(doc),
                    None => Err(DocumentError::NotFound(self.name.clone())),
                }
            })
            .await
    }

    pub async fn insert<T: Serialize + ?Sized>(&self, document: &T) -> Result<String, DocumentError> {
        self.guard
            .observe(self.call("Insert"), async {
                let doc = self.encode(document)?;
                let mut ids = self.driver.insert(&self.name, vec![doc]).await?;
                ids.pop()
                    .ok_or_else(|| DocumentError::Driver("insert returned no id".to_string()))
            })
            .await
    }

    pub async fn insert_many<T: Serialize>(&self, documents: &[T]) -> Result<Vec<String>, DocumentError> {
        self.guard
            .observe(self.call("InsertMany"), async {
                let docs = documents
                    .iter()
                    .map(|d| self.encode(d))
                    .collect::<Result<Vec<_>, _>>()?;
                if docs.is_empty() {
                    return Ok(Vec::new());
                }
                self.driver.insert(&self.name, docs).await
            })
            .await
    }

    /// Update the first match. Returns the number of matched documents.
    pub async fn update(&self, filter: Value, update: Value) -> Result<u64, DocumentError> {
        self.update_inner("Update", filter, update, false).await
    }

    pub async fn update_many(&self, filter: Value, update: Value) -> Result<u64, DocumentError> {
        self.update_inner("UpdateMany", filter, update, true).await
    }

    async fn update_inner(&self, action: &str, filter: Value, update: Value, many: bool) -> Result<u64, DocumentError> {
        self.guard
            .observe(self.call(action), async {
                let filter = as_document(filter)?;
                let update = as_update(update)?;
                self.driver.update(&self.name, &filter, &update, many).await
            })
            .await
    }

    /// Delete the first match. Returns the number of deleted documents.
    pub async fn delete(&self, filter: Value) -> Result<u64, DocumentError> {
        self.delete_inner("Delete", filter, false).await
    }

    pub async fn delete_many(&self, filter: Value) -> Result<u64, DocumentError> {
        self.delete_inner("DeleteMany", filter, true).await
    }

    async fn delete_inner(&self, action: &str, filter: Value, many: bool) -> Result<u64, DocumentError> {
        self.guard
            .observe(self.call(action), async {
                let filter = as_document(filter)?;
                self.driver.delete(&self.name, &filter, many).await
            })
            .await
    }

    pub async fn count(&self) -> Result<u64, DocumentError> {
        self.guard
            .observe(self.call("Count"), self.driver.count(&self.name, &Document::new()))
            .await
    }

    pub async fn count_with_filter(&self, filter: Value) -> Result<u64, DocumentError> {
        self.guard
            .observe(self.call("CountWithFilter"), async {
                let filter = as_document(filter)?;
                self.driver.count(&self.name, &filter).await
            })
            .await
    }

    /// Distinct values of `field` among the matches, in first-seen order.
    pub async fn distinct(&self, field: &str, filter: Value) -> Result<Vec<Value>, DocumentError> {
        self.guard
            .observe(self.call("Distinct"), async {
                let filter = as_document(filter)?;
                self.driver.distinct(&self.name, field, &filter).await
            })
            .await
    }

    fn encode<T: Serialize + ?Sized>(&self, document: &T) -> Result<Document, DocumentError> {
        let value = serde_json::to_value(document).map_err(|source| DocumentError::Encode {
            collection: self.name.clone(),
            source,
        })?;
        as_document(value)
    }

    fn decode<T: DeserializeOwned>(&self, document: Document) -> Result<T, DocumentError> {
        serde_json::from_value(Value::Object(document)).map_err(|source| DocumentError::Decode {
            collection: self.name.clone(),
            source,
        })
    }
}

fn as_document(value: Value) -> Result<Document, DocumentError> {
    match value {
        Value::Object(doc) => Ok(doc),
        Value::Null => Ok(Document::new()),
        other => Err(DocumentError::InvalidDocument(format!("expected an object, got {}", other))),
    }
}

/// Updates must be made of `$` operators only.
fn as_update(value: Value) -> Result<Document, DocumentError> {
    let update = as_document(value)?;
    if update.is_empty() {
        return Err(DocumentError::InvalidDocument("update document is empty".to_string()));
    }
    if let Some(key) = update.keys().find(|k| !k.starts_with('$')) {
        return Err(DocumentError::InvalidDocument(format!(
            "update document must use operators, found field '{}'",
            key
        )));
    }
    Ok(update)
}
