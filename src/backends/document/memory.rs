//! In-process document driver.
//!
//! Filters support plain equality plus `$eq`, `$ne`, `$gt`, `$gte`, `$lt`,
//! `$lte`, `$in`, `$nin` and `$exists`. Updates support `$set`, `$unset` and `$inc`.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::backends::document::{Document, DocumentDriver, DocumentError, FindOptions, ID_FIELD};
use crate::backends::sql::memory::compare;

#[derive(Debug)]
pub struct MemoryDocuments {
    name: String,
    collections: DashMap<String, Vec<Document>>,
    closed: AtomicBool,
}

impl MemoryDocuments {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collections: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> Result<(), DocumentError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DocumentError::Closed);
        }
        Ok(())
    }

    fn matching(&self, collection: &str, filter: &Document) -> Result<Vec<Document>, DocumentError> {
        let Some(docs) = self.collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for doc in docs.iter() {
            if matches(doc, filter)? {
                out.push(doc.clone());
            }
        }
        Ok(out)
    }

    /// Apply `update` to the first (or every) match. Returns the updated copies.
    fn apply(&self, collection: &str, filter: &Document, update: &Document, many: bool) -> Result<Vec<Document>, DocumentError> {
        let Some(mut docs) = self.collections.get_mut(collection) else {
            return Ok(Vec::new());
        };
        let mut updated = Vec::new();
        for doc in docs.iter_mut() {
            if !matches(doc, filter)? {
                continue;
            }
            let mut next = doc.clone();
            apply_update(&mut next, update)?;
            *doc = next.clone();
            updated.push(next);
            if !many {
                break;
            }
        }
        Ok(updated)
    }
}

#[async_trait]
impl DocumentDriver for MemoryDocuments {
    fn database(&self) -> &str {
        &self.name
    }

    async fn ping(&self) -> Result<(), DocumentError> {
        self.check_open()
    }

    async fn find(&self, collection: &str, filter: &Document, options: &FindOptions) -> Result<Vec<Document>, DocumentError> {
        self.check_open()?;
        let mut docs = self.matching(collection, filter)?;
        for (field, order) in options.sort.iter().rev() {
            docs.sort_by(|a, b| {
                let ord = compare(a.get(field), b.get(field));
                if *order < 0 {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }
        Ok(docs
            .into_iter()
            .skip(options.skip.unwrap_or(0))
            .take(options.limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn count(&self, collection: &str, filter: &Document) -> Result<u64, DocumentError> {
        self.check_open()?;
        Ok(self.matching(collection, filter)?.len() as u64)
    }

    async fn insert(&self, collection: &str, documents: Vec<Document>) -> Result<Vec<String>, DocumentError> {
        self.check_open()?;
        let mut docs = self.collections.entry(collection.to_string()).or_default();
        let mut ids = Vec::with_capacity(documents.len());
        let mut staged = Vec::with_capacity(documents.len());
        for mut doc in documents {
            let id = match doc.get(ID_FIELD) {
                Some(Value::String(id)) => id.clone(),
                Some(other) => other.to_string(),
                None => {
                    let id = uuid::Uuid::new_v4().simple().to_string();
                    doc.insert(ID_FIELD.to_string(), Value::String(id.clone()));
                    id
                }
            };
            let taken = docs.iter().chain(staged.iter()).any(|d: &Document| same_id(d, &doc));
            if taken {
                return Err(DocumentError::DuplicateKey {
                    collection: collection.to_string(),
                    id,
                });
            }
            ids.push(id);
            staged.push(doc);
        }
        docs.extend(staged);
        Ok(ids)
    }

    async fn update(&self, collection: &str, filter: &Document, update: &Document, many: bool) -> Result<u64, DocumentError> {
        self.check_open()?;
        Ok(self.apply(collection, filter, update, many)?.len() as u64)
    }

    async fn delete(&self, collection: &str, filter: &Document, many: bool) -> Result<u64, DocumentError> {
        self.check_open()?;
        let Some(mut docs) = self.collections.get_mut(collection) else {
            return Ok(0);
        };
        let mut deleted = 0;
        let mut i = 0;
        while i < docs.len() {
            if (many || deleted == 0) && matches(&docs[i], filter)? {
                docs.remove(i);
                deleted += 1;
            } else {
                i += 1;
            }
        }
        Ok(deleted)
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Document,
        update: &Document,
    ) -> Result<Option<Document>, DocumentError> {
        self.check_open()?;
        Ok(self.apply(collection, filter, update, false)?.into_iter().next())
    }

    async fn find_one_and_delete(&self, collection: &str, filter: &Document) -> Result<Option<Document>, DocumentError> {
        self.check_open()?;
        let Some(mut docs) = self.collections.get_mut(collection) else {
            return Ok(None);
        };
        for i in 0..docs.len() {
            if matches(&docs[i], filter)? {
                return Ok(Some(docs.remove(i)));
            }
        }
        Ok(None)
    }

    async fn distinct(&self, collection: &str, field: &str, filter: &Document) -> Result<Vec<Value>, DocumentError> {
        self.check_open()?;
        let mut values: Vec<Value> = Vec::new();
        for doc in self.matching(collection, filter)? {
            if let Some(value) = doc.get(field) {
                if !values.contains(value) {
                    values.push(value.clone());
                }
            }
        }
        Ok(values)
    }

    async fn create_collection(&self, collection: &str) -> Result<(), DocumentError> {
        self.check_open()?;
        self.collections.entry(collection.to_string()).or_default();
        Ok(())
    }

    async fn collection_names(&self) -> Result<Vec<String>, DocumentError> {
        self.check_open()?;
        let mut names: Vec<String> = self.collections.iter().map(|e| e.key().clone()).collect();
        names.sort();
        Ok(names)
    }

    async fn drop_database(&self) -> Result<(), DocumentError> {
        self.check_open()?;
        self.collections.clear();
        Ok(())
    }

    async fn close(&self) -> Result<(), DocumentError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

fn same_id(a: &Document, b: &Document) -> bool {
    matches!((a.get(ID_FIELD), b.get(ID_FIELD)), (Some(x), Some(y)) if x == y)
}

fn matches(doc: &Document, filter: &Document) -> Result<bool, DocumentError> {
    for (field, expected) in filter {
        let actual = doc.get(field);
        let ok = match expected {
            Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                let mut all = true;
                for (op, operand) in ops {
                    all &= holds(actual, op, operand)?;
                }
                all
            }
            _ => equal(actual, expected),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn holds(actual: Option<&Value>, op: &str, operand: &Value) -> Result<bool, DocumentError> {
    let ord = || compare(actual, Some(operand));
    Ok(match op {
        "$eq" => equal(actual, operand),
        "$ne" => !equal(actual, operand),
        "$gt" => actual.is_some() && ord() == CmpOrdering::Greater,
        "$gte" => actual.is_some() && ord() != CmpOrdering::Less,
        "$lt" => actual.is_some() && ord() == CmpOrdering::Less,
        "$lte" => actual.is_some() && ord() != CmpOrdering::Greater,
        "$in" => in_list(actual, operand)?,
        "$nin" => !in_list(actual, operand)?,
        "$exists" => actual.is_some() == operand.as_bool().unwrap_or(true),
        other => return Err(DocumentError::InvalidDocument(format!("unsupported filter operator '{}'", other))),
    })
}

fn in_list(actual: Option<&Value>, operand: &Value) -> Result<bool, DocumentError> {
    let items = operand
        .as_array()
        .ok_or_else(|| DocumentError::InvalidDocument("$in needs an array".to_string()))?;
    Ok(items.iter().any(|item| equal(actual, item)))
}

fn equal(actual: Option<&Value>, expected: &Value) -> bool {
    match (actual, expected) {
        (None, Value::Null) => true,
        (Some(Value::Number(_)), Value::Number(_)) => compare(actual, Some(expected)) == CmpOrdering::Equal,
        (Some(a), e) => a == e,
        (None, _) => false,
    }
}

fn apply_update(doc: &mut Document, update: &Document) -> Result<(), DocumentError> {
    for (op, fields) in update {
        let fields = fields
            .as_object()
            .ok_or_else(|| DocumentError::InvalidDocument(format!("{} needs an object", op)))?;
        for (field, value) in fields {
            if field == ID_FIELD {
                return Err(DocumentError::InvalidDocument("_id is immutable".to_string()));
            }
            match op.as_str() {
                "$set" => {
                    doc.insert(field.clone(), value.clone());
                }
                "$unset" => {
                    doc.remove(field);
                }
                "$inc" => {
                    let next = increment(doc.get(field), value)
                        .ok_or_else(|| DocumentError::InvalidDocument(format!("cannot $inc non-numeric field '{}'", field)))?;
                    doc.insert(field.clone(), next);
                }
                other => {
                    return Err(DocumentError::InvalidDocument(format!("unsupported update operator '{}'", other)));
                }
            }
        }
    }
    Ok(())
}

fn increment(current: Option<&Value>, by: &Value) -> Option<Value> {
    let zero = Value::from(0);
    let current = current.unwrap_or(&zero);
    if let (Some(a), Some(b)) = (current.as_i64(), by.as_i64()) {
        return Some(Value::from(a.checked_add(b)?));
    }
    let sum = current.as_f64()? + by.as_f64()?;
    serde_json::Number::from_f64(sum).map(Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    async fn count(db: &MemoryDocuments, filter: Value) -> u64 {
        db.count("items", &doc(filter)).await.unwrap()
    }

    #[tokio::test]
    async fn test_operator_filters() {
        let db = MemoryDocuments::new("t");
        db.insert(
            "items",
            vec![
                doc(json!({ "n": 1, "tag": "a" })),
                doc(json!({ "n": 2, "tag": "b" })),
                doc(json!({ "n": 3 })),
            ],
        )
        .await
        .unwrap();

        assert_eq!(count(&db, json!({ "n": { "$gt": 1 } })).await, 2);
        assert_eq!(count(&db, json!({ "n": { "$gte": 1, "$lt": 3 } })).await, 2);
        assert_eq!(count(&db, json!({ "tag": { "$in": ["a", "z"] } })).await, 1);
        assert_eq!(count(&db, json!({ "tag": { "$exists": false } })).await, 1);
        assert_eq!(count(&db, json!({ "tag": null })).await, 1);
        assert_eq!(count(&db, json!({ "n": 2.0 })).await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected_atomically() {
        let db = MemoryDocuments::new("t");
        db.insert("items", vec![doc(json!({ "_id": "x" }))]).await.unwrap();
        let err = db
            .insert("items", vec![doc(json!({ "_id": "y" })), doc(json!({ "_id": "x" }))])
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::DuplicateKey { ref id, .. } if id == "x"));
        assert_eq!(db.count("items", &Document::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_inc_and_unset() {
        let db = MemoryDocuments::new("t");
        db.insert("items", vec![doc(json!({ "_id": "a", "n": 1, "tmp": true }))])
            .await
            .unwrap();
        let updated = db
            .find_one_and_update(
                "items",
                &doc(json!({ "_id": "a" })),
                &doc(json!({ "$inc": { "n": 4, "fresh": 1 }, "$unset": { "tmp": "" } })),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated, doc(json!({ "_id": "a", "n": 5, "fresh": 1 })));
    }

    #[tokio::test]
    async fn test_unknown_operator_is_rejected() {
        let db = MemoryDocuments::new("t");
        db.insert("items", vec![doc(json!({ "n": 1 }))]).await.unwrap();
        let err = db
            .count("items", &doc(json!({ "n": { "$regex": "1" } })))
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::InvalidDocument(_)));
    }

    #[tokio::test]
    async fn test_closed_store() {
        let db = MemoryDocuments::new("t");
        db.close().await.unwrap();
        assert!(matches!(db.ping().await, Err(DocumentError::Closed)));
    }
}
