//! Object storage adapter.
//!
//! # Data Flow
//! ```text
//! Uploader::put(bytes, name)
//!     → ensure bucket: span "BucketExists" → (missing) span "MakeBucket"
//!     → span "PutObject" (key = name) → ObjectStore::put_object
//! ```
//!
//! # Design Decisions
//! - Options are typed; `set_*_option` returns a new uploader and leaves `self` as is
//! - The bucket check runs before every call, each step under its own span
//! - An error is captured once, by the step that produced it

pub mod memory;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use thiserror::Error;

use crate::backends::{Call, Guard, Instrument, SpanError};
use crate::monitor::SpanStatus;

pub use memory::MemoryObjectStore;

const OPERATION: &str = "storage";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object {key} not found in bucket {bucket}")]
    NotFound { bucket: String, key: String },

    #[error("bucket {0} does not exist")]
    NoSuchBucket(String),

    #[error("range {start}..{end} is outside an object of {size} bytes")]
    InvalidRange { start: u64, end: u64, size: u64 },

    #[error("object store connection closed")]
    Closed,

    #[error("object store error: {0}")]
    Backend(String),
}

impl SpanError for StorageError {
    fn span_status(&self) -> SpanStatus {
        match self {
            StorageError::NotFound { .. } | StorageError::NoSuchBucket(_) => SpanStatus::NotFound,
            StorageError::InvalidRange { .. } => SpanStatus::OutOfRange,
            StorageError::Closed => SpanStatus::Unavailable,
            StorageError::Backend(_) => SpanStatus::InternalError,
        }
    }
}

/// Settings used when the bucket has to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketOptions {
    pub region: String,
    pub object_locking: bool,
}

impl Default for BucketOptions {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            object_locking: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// Byte range to read instead of the whole object.
    pub range: Option<Range<u64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Succeed when the object is already gone.
    pub ignore_missing: bool,
}

/// Object storage connection.
#[async_trait]
pub trait ObjectStore: Send + Sync + fmt::Debug + 'static {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StorageError>;
    async fn make_bucket(&self, bucket: &str, options: &BucketOptions) -> Result<(), StorageError>;
    async fn put_object(&self, bucket: &str, key: &str, data: Vec<u8>, options: &PutOptions) -> Result<(), StorageError>;
    async fn get_object(&self, bucket: &str, key: &str, options: &GetOptions) -> Result<Vec<u8>, StorageError>;
    async fn remove_object(&self, bucket: &str, key: &str, options: &RemoveOptions) -> Result<(), StorageError>;
}

/// File uploader bound to one bucket, bare or monitored.
#[derive(Debug)]
pub struct Uploader<S> {
    store: Arc<S>,
    bucket: String,
    bucket_options: BucketOptions,
    put_options: PutOptions,
    get_options: GetOptions,
    remove_options: RemoveOptions,
    guard: Guard,
}

impl<S> Clone for Uploader<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            bucket: self.bucket.clone(),
            bucket_options: self.bucket_options.clone(),
            put_options: self.put_options.clone(),
            get_options: self.get_options.clone(),
            remove_options: self.remove_options.clone(),
            guard: self.guard.clone(),
        }
    }
}

impl<S: ObjectStore> Instrument for Uploader<S> {
    fn guard(&self) -> &Guard {
        &self.guard
    }

    fn guard_mut(&mut self) -> &mut Guard {
        &mut self.guard
    }
}

impl<S: ObjectStore> Uploader<S> {
    pub fn new(store: S, bucket: impl Into<String>) -> Self {
        Self::from_arc(Arc::new(store), bucket)
    }

    pub fn from_arc(store: Arc<S>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            bucket_options: BucketOptions::default(),
            put_options: PutOptions::default(),
            get_options: GetOptions::default(),
            remove_options: RemoveOptions::default(),
            guard: Guard::bare(),
        }
    }

    pub fn with_bucket_options(mut self, options: BucketOptions) -> Self {
        self.bucket_options = options;
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn set_put_option(&self, options: PutOptions) -> Self {
        let mut next = self.clone();
        next.put_options = options;
        next
    }

    pub fn set_get_option(&self, options: GetOptions) -> Self {
        let mut next = self.clone();
        next.get_options = options;
        next
    }

    pub fn set_remove_option(&self, options: RemoveOptions) -> Self {
        let mut next = self.clone();
        next.remove_options = options;
        next
    }

    pub async fn put(&self, file: impl Into<Vec<u8>>, file_name: &str) -> Result<(), StorageError> {
        self.ensure_bucket().await?;
        let data = file.into();
        tracing::debug!(bucket = %self.bucket, key = file_name, size = data.len(), "Uploading object");
        self.guard
            .observe(
                Call::new(OPERATION, "PutObject").keys(&[file_name]),
                self.store.put_object(&self.bucket, file_name, data, &self.put_options),
            )
            .await
    }

    pub async fn get(&self, file_name: &str) -> Result<Vec<u8>, StorageError> {
        self.ensure_bucket().await?;
        self.guard
            .observe(
                Call::new(OPERATION, "GetObject").keys(&[file_name]),
                self.store.get_object(&self.bucket, file_name, &self.get_options),
            )
            .await
    }

    pub async fn remove(&self, file_name: &str) -> Result<(), StorageError> {
        self.ensure_bucket().await?;
        self.guard
            .observe(Call::new(OPERATION, "RemoveObject").keys(&[file_name]), async {
                match self.store.remove_object(&self.bucket, file_name, &self.remove_options).await {
                    Err(StorageError::NotFound { .. }) if self.remove_options.ignore_missing => Ok(()),
                    other => other,
                }
            })
            .await
    }

    async fn ensure_bucket(&self) -> Result<(), StorageError> {
        let found = self
            .guard
            .observe(Call::new(OPERATION, "BucketExists"), self.store.bucket_exists(&self.bucket))
            .await?;
        if found {
            return Ok(());
        }
        tracing::info!(bucket = %self.bucket, region = %self.bucket_options.region, "Creating missing bucket");
        self.guard
            .observe(
                Call::new(OPERATION, "MakeBucket"),
                self.store.make_bucket(&self.bucket, &self.bucket_options),
            )
            .await
    }
}
