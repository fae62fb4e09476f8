//! Cache adapter.
//!
//! # Data Flow
//! ```text
//! Cache::get(key)
//!     → Guard::observe(Call "cache" / "Get", key)
//!     → CacheStore::get (raw string)
//!     → serde_json decode
//!
//! Cache::mset(data)
//!     → CacheStore::mset (all pairs)
//!     → one expiry worker per key, each with its own "Expire" child span
//!     → failed keys deleted, joined, reported as PartialFailure
//!
//! Cache::remove_by_pattern(pattern)
//!     → SCAN cursor loop
//!     → batches of max_del_per_operation keys deleted concurrently
//!     → every worker joined before returning
//! ```
//!
//! # Design Decisions
//! - Values are JSON-encoded; the store only sees strings
//! - A missing key is an error (`NotFound`), not an empty value
//! - Fan-out workers report through their return value, so no result is lost

pub mod memory;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::backends::{Call, Guard, Instrument, SpanError};
use crate::config::CacheConfig;
use crate::monitor::SpanStatus;

pub use memory::MemoryCache;

const OPERATION: &str = "cache";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("key {0} does not exist")]
    NotFound(String),

    #[error("field {field} in key {key} does not exist")]
    FieldNotFound { key: String, field: String },

    #[error("key {0} holds a value of the wrong type")]
    WrongType(String),

    #[error("failed to encode value for key {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode value for key {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed when insert keys {}", .keys.join(","))]
    PartialFailure { keys: Vec<String> },

    #[error("failed to delete keys [{}] matching pattern {pattern}", .keys.join(","))]
    DeleteFailed { pattern: String, keys: Vec<String> },

    #[error("cache connection closed")]
    Closed,

    #[error("cache backend error: {0}")]
    Backend(String),
}

impl SpanError for CacheError {
    fn span_status(&self) -> SpanStatus {
        match self {
            CacheError::NotFound(_) | CacheError::FieldNotFound { .. } => SpanStatus::NotFound,
            CacheError::WrongType(_) => SpanStatus::FailedPrecondition,
            CacheError::Encode { .. } => SpanStatus::InvalidArgument,
            CacheError::Decode { .. } => SpanStatus::DataLoss,
            CacheError::PartialFailure { .. } | CacheError::DeleteFailed { .. } => SpanStatus::Aborted,
            CacheError::Closed => SpanStatus::Unavailable,
            CacheError::Backend(_) => SpanStatus::InternalError,
        }
    }
}

/// Raw key/value store driven by [`Cache`].
///
/// `ttl` of `None` keeps the key until deleted.
#[async_trait]
pub trait CacheStore: Send + Sync + fmt::Debug + 'static {
    async fn ping(&self) -> Result<(), CacheError>;
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), CacheError>;
    /// Returns `false` when the key already existed.
    async fn set_nx(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<bool, CacheError>;
    /// Returns `false` when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;
    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, CacheError>;
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError>;
    async fn hset(&self, key: &str, fields: Vec<(String, String)>) -> Result<u64, CacheError>;
    async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64, CacheError>;
    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>, CacheError>;
    async fn mset(&self, pairs: Vec<(String, String)>) -> Result<(), CacheError>;
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError>;
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError>;
    /// One SCAN step. A returned cursor of 0 ends the iteration.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(Vec<String>, u64), CacheError>;
    async fn del(&self, keys: &[String]) -> Result<u64, CacheError>;
    async fn flush_db(&self) -> Result<(), CacheError>;
    async fn flush_all(&self) -> Result<(), CacheError>;
    async fn close(&self) -> Result<(), CacheError>;
}

/// One entry of a multi-set: an encoded value and its own TTL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MSetData {
    pub key: String,
    pub value: String,
    pub ttl: Duration,
}

impl MSetData {
    pub fn new<T: Serialize + ?Sized>(key: impl Into<String>, value: &T, ttl: Duration) -> Result<Self, CacheError> {
        let key = key.into();
        let value = encode(&key, value)?;
        Ok(Self { key, value, ttl })
    }
}

/// Cache client over a [`CacheStore`], bare or monitored.
#[derive(Debug)]
pub struct Cache<S> {
    store: Arc<S>,
    max_del_per_operation: usize,
    scan_count: usize,
    guard: Guard,
}

impl<S> Clone for Cache<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            max_del_per_operation: self.max_del_per_operation,
            scan_count: self.scan_count,
            guard: self.guard.clone(),
        }
    }
}

impl<S: CacheStore> Instrument for Cache<S> {
    fn guard(&self) -> &Guard {
        &self.guard
    }

    fn guard_mut(&mut self) -> &mut Guard {
        &mut self.guard
    }
}

impl<S: CacheStore> Cache<S> {
    pub fn new(store: S, config: &CacheConfig) -> Self {
        Self::from_arc(Arc::new(store), config)
    }

    pub fn from_arc(store: Arc<S>, config: &CacheConfig) -> Self {
        Self {
            store,
            max_del_per_operation: config.max_del_per_operation.max(1),
            scan_count: config.scan_count.max(1),
            guard: Guard::bare(),
        }
    }

    /// Connect and verify the store answers.
    pub async fn connect(store: S, config: &CacheConfig) -> Result<Self, CacheError> {
        let cache = Self::new(store, config);
        if let Err(e) = cache.store.ping().await {
            tracing::error!(error = %e, "Failed ping on new cache connection");
            return Err(e);
        }
        Ok(cache)
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn ping(&self) -> Result<(), CacheError> {
        self.guard
            .observe(Call::new(OPERATION, "Ping"), self.store.ping())
            .await
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, CacheError> {
        self.guard
            .observe(Call::new(OPERATION, "Get").keys(&[key]), async {
                match self.store.get(key).await? {
                    Some(raw) => decode(key, &raw),
                    None => Err(CacheError::NotFound(key.to_string())),
                }
            })
            .await
    }

    /// `ttl` of zero keeps the key until deleted.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), CacheError> {
        self.guard
            .observe(Call::new(OPERATION, "Set").keys(&[key]), async {
                let raw = encode(key, value)?;
                self.store.set(key, raw, non_zero(ttl)).await
            })
            .await
    }

    pub async fn set_nx<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> Result<bool, CacheError> {
        self.guard
            .observe(Call::new(OPERATION, "SetNX").keys(&[key]), async {
                let raw = encode(key, value)?;
                self.store.set_nx(key, raw, non_zero(ttl)).await
            })
            .await
    }

    pub async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        self.guard
            .observe(Call::new(OPERATION, "HGetAll").keys(&[key]), self.store.hget_all(key))
            .await
    }

    pub async fn hget<T: DeserializeOwned>(&self, key: &str, field: &str) -> Result<T, CacheError> {
        self.guard
            .observe(Call::new(OPERATION, "HGet").keys(&[key]), async {
                match self.store.hget(key, field).await? {
                    Some(raw) => decode(key, &raw),
                    None => Err(CacheError::FieldNotFound {
                        key: key.to_string(),
                        field: field.to_string(),
                    }),
                }
            })
            .await
    }

    /// Set one hash field, then (re)apply `ttl` to the whole hash.
    pub async fn hset<T: Serialize + ?Sized>(
        &self,
        key: &str,
        field: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.guard
            .observe(Call::new(OPERATION, "HSet").keys(&[key]), async {
                let raw = encode(key, value)?;
                self.store.hset(key, vec![(field.to_string(), raw)]).await?;
                self.apply_ttl(key, ttl).await
            })
            .await
    }

    pub async fn hdel(&self, key: &str, fields: &[&str]) -> Result<u64, CacheError> {
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        self.guard
            .observe(Call::new(OPERATION, "HDel").keys(&[key]), self.store.hdel(key, &fields))
            .await
    }

    /// Values of `fields`, `None` where a field is absent. A missing hash is `NotFound`.
    pub async fn hmget<T: DeserializeOwned>(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<T>>, CacheError> {
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        self.guard
            .observe(Call::new(OPERATION, "HMGet").keys(&[key]), async {
                let raw = self.store.hmget(key, &fields).await?;
                if raw.iter().all(Option::is_none) && self.store.hget_all(key).await?.is_empty() {
                    return Err(CacheError::NotFound(key.to_string()));
                }
                raw.iter()
                    .map(|v| v.as_deref().map(|s| decode(key, s)).transpose())
                    .collect()
            })
            .await
    }

    /// Set several hash fields, then (re)apply `ttl` to the whole hash.
    pub async fn hmset<T: Serialize>(&self, key: &str, values: &HashMap<String, T>, ttl: Duration) -> Result<(), CacheError> {
        self.guard
            .observe(Call::new(OPERATION, "HMSet").keys(&[key]), async {
                let mut fields = Vec::with_capacity(values.len());
                for (field, value) in values {
                    fields.push((field.clone(), encode(key, value)?));
                }
                self.store.hset(key, fields).await?;
                self.apply_ttl(key, ttl).await
            })
            .await
    }

    /// Write every pair, then apply each key's TTL from its own worker.
    ///
    /// A key whose expiry cannot be set is deleted; all such keys are
    /// reported together once every worker has finished.
    pub async fn mset(&self, data: Vec<MSetData>) -> Result<(), CacheError> {
        let keys: Vec<String> = data.iter().map(|d| d.key.clone()).collect();
        let span = self.guard.begin(Call::new(OPERATION, "MSet").keys(&keys));
        let result = self.mset_inner(data, &self.guard.child(&span)).await;
        self.guard.end(span, &result);
        result
    }

    async fn mset_inner(&self, data: Vec<MSetData>, child: &Guard) -> Result<(), CacheError> {
        let pairs = data.iter().map(|d| (d.key.clone(), d.value.clone())).collect();
        self.store.mset(pairs).await?;

        let mut workers = Vec::new();
        for datum in data.into_iter().filter(|d| !d.ttl.is_zero()) {
            let store = self.store.clone();
            let guard = child.clone();
            let key = datum.key.clone();
            let handle = tokio::spawn(async move {
                let call = Call::new(OPERATION, "Expire").keys(&[datum.key.as_str()]);
                let result = guard
                    .observe(call, async {
                        match store.expire(&datum.key, datum.ttl).await? {
                            true => Ok(()),
                            false => Err(CacheError::NotFound(datum.key.clone())),
                        }
                    })
                    .await;
                if let Err(e) = &result {
                    tracing::error!(key = %datum.key, error = %e, "Failed to set expiry, deleting key");
                    if let Err(e) = store.del(std::slice::from_ref(&datum.key)).await {
                        tracing::error!(key = %datum.key, error = %e, "Failed to delete key after expiry failure");
                    }
                }
                result
            });
            workers.push((key, handle));
        }

        let mut failed = Vec::new();
        for (key, handle) in workers {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => failed.push(key),
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "Expiry worker aborted");
                    failed.push(key);
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(CacheError::PartialFailure { keys: failed })
        }
    }

    /// Values of `keys` in order, `None` where a key is absent.
    pub async fn mget<T: DeserializeOwned>(&self, keys: &[&str]) -> Result<Vec<Option<T>>, CacheError> {
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        self.guard
            .observe(Call::new(OPERATION, "MGet").keys(&keys), async {
                let raw = self.store.mget(&keys).await?;
                keys.iter()
                    .zip(raw)
                    .map(|(k, v)| v.map(|s| decode(k, &s)).transpose())
                    .collect()
            })
            .await
    }

    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        self.guard
            .observe(Call::new(OPERATION, "Keys").keys(&[pattern]), self.store.keys(pattern))
            .await
    }

    pub async fn remove(&self, keys: &[&str]) -> Result<u64, CacheError> {
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        self.guard
            .observe(Call::new(OPERATION, "Remove").keys(&keys), self.store.del(&keys))
            .await
    }

    /// Delete every key matching `pattern`. Returns the number of keys deleted.
    pub async fn remove_by_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let span = self.guard.begin(Call::new(OPERATION, "RemoveByPattern").keys(&[pattern]));
        let result = self.remove_by_pattern_inner(pattern, &self.guard.child(&span)).await;
        self.guard.end(span, &result);
        result
    }

    async fn remove_by_pattern_inner(&self, pattern: &str, child: &Guard) -> Result<u64, CacheError> {
        let mut workers = Vec::new();
        let mut pending: Vec<String> = Vec::new();
        let mut cursor = 0;

        loop {
            let (keys, next) = self.store.scan(cursor, pattern, self.scan_count).await?;
            pending.extend(keys);
            while pending.len() >= self.max_del_per_operation {
                let batch: Vec<String> = pending.drain(..self.max_del_per_operation).collect();
                workers.push(self.spawn_delete(batch, child));
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        if !pending.is_empty() {
            workers.push(self.spawn_delete(pending, child));
        }

        let mut deleted = 0;
        let mut failed = Vec::new();
        for (batch, handle) in workers {
            match handle.await {
                Ok(Ok(n)) => deleted += n,
                Ok(Err(_)) => failed.extend(batch),
                Err(e) => {
                    tracing::error!(error = %e, "Delete worker aborted");
                    failed.extend(batch);
                }
            }
        }

        if failed.is_empty() {
            Ok(deleted)
        } else {
            Err(CacheError::DeleteFailed {
                pattern: pattern.to_string(),
                keys: failed,
            })
        }
    }

    fn spawn_delete(
        &self,
        batch: Vec<String>,
        child: &Guard,
    ) -> (Vec<String>, tokio::task::JoinHandle<Result<u64, CacheError>>) {
        let store = self.store.clone();
        let guard = child.clone();
        let keys = batch.clone();
        let handle = tokio::spawn(async move {
            let call = Call::new(OPERATION, "Del").tag("count", keys.len().to_string());
            guard.observe(call, store.del(&keys)).await
        });
        (batch, handle)
    }

    pub async fn flush_db(&self) -> Result<(), CacheError> {
        self.guard
            .observe(Call::new(OPERATION, "FlushDB"), self.store.flush_db())
            .await
    }

    pub async fn flush_all(&self) -> Result<(), CacheError> {
        self.guard
            .observe(Call::new(OPERATION, "FlushAll"), self.store.flush_all())
            .await
    }

    pub async fn close(&self) -> Result<(), CacheError> {
        self.guard
            .observe(Call::new(OPERATION, "Close"), self.store.close())
            .await
    }

    async fn apply_ttl(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Ok(());
        }
        match self.store.expire(key, ttl).await? {
            true => Ok(()),
            false => Err(CacheError::NotFound(key.to_string())),
        }
    }
}

fn non_zero(ttl: Duration) -> Option<Duration> {
    (!ttl.is_zero()).then_some(ttl)
}

fn encode<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<String, CacheError> {
    serde_json::to_string(value).map_err(|source| CacheError::Encode {
        key: key.to_string(),
        source,
    })
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T, CacheError> {
    serde_json::from_str(raw).map_err(|source| CacheError::Decode {
        key: key.to_string(),
        source,
    })
}
