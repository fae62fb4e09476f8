//! In-process object store.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;

use crate::backends::storage::{BucketOptions, GetOptions, ObjectStore, PutOptions, RemoveOptions, StorageError};

/// A stored object with the options it was written with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    buckets: DashMap<String, BucketOptions>,
    objects: DashMap<(String, String), StoredObject>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.clone())
    }

    fn check_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        if !self.buckets.contains_key(bucket) {
            return Err(StorageError::NoSuchBucket(bucket.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StorageError> {
        Ok(self.buckets.contains_key(bucket))
    }

    async fn make_bucket(&self, bucket: &str, options: &BucketOptions) -> Result<(), StorageError> {
        self.buckets.entry(bucket.to_string()).or_insert_with(|| options.clone());
        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str, data: Vec<u8>, options: &PutOptions) -> Result<(), StorageError> {
        self.check_bucket(bucket)?;
        self.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                content_type: options.content_type.clone(),
                metadata: options.metadata.clone(),
            },
        );
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str, options: &GetOptions) -> Result<Vec<u8>, StorageError> {
        self.check_bucket(bucket)?;
        let object = self
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;
        match &options.range {
            None => Ok(object.data.clone()),
            Some(range) => {
                let size = object.data.len() as u64;
                if range.start > range.end || range.end > size {
                    return Err(StorageError::InvalidRange {
                        start: range.start,
                        end: range.end,
                        size,
                    });
                }
                Ok(object.data[range.start as usize..range.end as usize].to_vec())
            }
        }
    }

    async fn remove_object(&self, bucket: &str, key: &str, _options: &RemoveOptions) -> Result<(), StorageError> {
        self.check_bucket(bucket)?;
        match self.objects.remove(&(bucket.to_string(), key.to_string())) {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_bucket_is_rejected() {
        let store = MemoryObjectStore::new();
        let err = store
            .put_object("b", "k", vec![1], &PutOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NoSuchBucket(_)));
    }

    #[tokio::test]
    async fn test_range_outside_object() {
        let store = MemoryObjectStore::new();
        store.make_bucket("b", &BucketOptions::default()).await.unwrap();
        store.put_object("b", "k", vec![1, 2, 3], &PutOptions::default()).await.unwrap();

        let options = GetOptions { range: Some(1..3) };
        assert_eq!(store.get_object("b", "k", &options).await.unwrap(), vec![2, 3]);
        let options = GetOptions { range: Some(2..9) };
        assert!(matches!(
            store.get_object("b", "k", &options).await,
            Err(StorageError::InvalidRange { size: 3, .. })
        ));
    }
}
