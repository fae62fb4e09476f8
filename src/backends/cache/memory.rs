//! In-process cache store with TTLs and glob patterns.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::backends::cache::{CacheError, CacheStore};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
    /// Insertion order; scan cursors are positions in this sequence.
    seq: u64,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Cache store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
    next_seq: AtomicU64,
    closed: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            next_seq: AtomicU64::new(1),
            ..Self::default()
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining time to live, `None` for persistent or missing keys.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let entry = self.live(key)?;
        entry
            .expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    fn check_open(&self) -> Result<(), CacheError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        Ok(())
    }

    fn seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed).max(1)
    }

    fn live(&self, key: &str) -> Option<Entry> {
        let now = Instant::now();
        let entry = self.entries.get(key)?.clone();
        if entry.is_expired(now) {
            self.entries.remove_if(key, |_, e| e.is_expired(now));
            return None;
        }
        Some(entry)
    }

    fn put(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let now = Instant::now();
        let expires_at = ttl.filter(|t| !t.is_zero()).map(|t| now + t);
        if let Some(mut entry) = self.entries.get_mut(key) {
            if !entry.is_expired(now) {
                entry.value = value;
                entry.expires_at = expires_at;
                return;
            }
        }
        let seq = self.seq();
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at,
                seq,
            },
        );
    }

    fn hash(&self, key: &str) -> Result<Option<HashMap<String, String>>, CacheError> {
        match self.live(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Hash(h),
                ..
            }) => Ok(Some(h)),
            Some(_) => Err(CacheError::WrongType(key.to_string())),
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn ping(&self) -> Result<(), CacheError> {
        self.check_open()
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check_open()?;
        match self.live(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s)),
            Some(_) => Err(CacheError::WrongType(key.to_string())),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.check_open()?;
        self.put(key, Value::Str(value), ttl);
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<bool, CacheError> {
        self.check_open()?;
        let now = Instant::now();
        let expires_at = ttl.filter(|t| !t.is_zero()).map(|t| now + t);
        let seq = self.seq();
        let mut inserted = false;
        self.entries
            .entry(key.to_string())
            .and_modify(|e| {
                if e.is_expired(now) {
                    *e = Entry {
                        value: Value::Str(value.clone()),
                        expires_at,
                        seq,
                    };
                    inserted = true;
                }
            })
            .or_insert_with(|| {
                inserted = true;
                Entry {
                    value: Value::Str(value.clone()),
                    expires_at,
                    seq,
                }
            });
        Ok(inserted)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.check_open()?;
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        self.check_open()?;
        Ok(self.hash(key)?.unwrap_or_default())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError> {
        self.check_open()?;
        Ok(self.hash(key)?.and_then(|mut h| h.remove(field)))
    }

    async fn hset(&self, key: &str, fields: Vec<(String, String)>) -> Result<u64, CacheError> {
        self.check_open()?;
        let mut hash = self.hash(key)?.unwrap_or_default();
        let mut added = 0;
        for (field, value) in fields {
            if hash.insert(field, value).is_none() {
                added += 1;
            }
        }
        let ttl = self.ttl(key);
        self.put(key, Value::Hash(hash), ttl);
        Ok(added)
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64, CacheError> {
        self.check_open()?;
        let Some(mut hash) = self.hash(key)? else {
            return Ok(0);
        };
        let removed = fields.iter().filter(|f| hash.remove(f.as_str()).is_some()).count() as u64;
        if hash.is_empty() {
            self.entries.remove(key);
        } else {
            let ttl = self.ttl(key);
            self.put(key, Value::Hash(hash), ttl);
        }
        Ok(removed)
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        self.check_open()?;
        let hash = self.hash(key)?.unwrap_or_default();
        Ok(fields.iter().map(|f| hash.get(f).cloned()).collect())
    }

    async fn mset(&self, pairs: Vec<(String, String)>) -> Result<(), CacheError> {
        self.check_open()?;
        for (key, value) in pairs {
            self.put(&key, Value::Str(value), None);
        }
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        self.check_open()?;
        Ok(keys
            .iter()
            .map(|k| match self.live(k) {
                Some(Entry {
                    value: Value::Str(s),
                    ..
                }) => Some(s),
                _ => None,
            })
            .collect())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        self.check_open()?;
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| !e.is_expired(now) && glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(Vec<String>, u64), CacheError> {
        self.check_open()?;
        let now = Instant::now();
        let mut window: Vec<(u64, String)> = self
            .entries
            .iter()
            .filter(|e| e.seq >= cursor && !e.is_expired(now))
            .map(|e| (e.seq, e.key().clone()))
            .collect();
        window.sort_unstable();

        let count = count.max(1);
        let next = if window.len() > count {
            window[count].0
        } else {
            0
        };
        let keys = window
            .into_iter()
            .take(count)
            .filter(|(_, k)| glob_match(pattern, k))
            .map(|(_, k)| k)
            .collect();
        Ok((keys, next))
    }

    async fn del(&self, keys: &[String]) -> Result<u64, CacheError> {
        self.check_open()?;
        Ok(keys.iter().filter(|k| self.entries.remove(k.as_str()).is_some()).count() as u64)
    }

    async fn flush_db(&self) -> Result<(), CacheError> {
        self.check_open()?;
        self.entries.clear();
        Ok(())
    }

    async fn flush_all(&self) -> Result<(), CacheError> {
        self.flush_db().await
    }

    async fn close(&self) -> Result<(), CacheError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Glob match supporting `*` (any run) and `?` (any single character).
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((spi, sti)) = star {
            pi = spi + 1;
            ti = sti + 1;
            star = Some((spi, sti + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("orders:*", "orders:42"));
        assert!(glob_match("*", ""));
        assert!(glob_match("o?ders:*2", "orders:42"));
        assert!(!glob_match("orders:?", "orders:42"));
        assert!(!glob_match("users:*", "orders:42"));
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = MemoryCache::new();
        cache
            .set("k", "v".into(), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_nx() {
        let cache = MemoryCache::new();
        assert!(cache.set_nx("lock", "a".into(), None).await.unwrap());
        assert!(!cache.set_nx("lock", "b".into(), None).await.unwrap());
        assert_eq!(cache.get("lock").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_scan_survives_concurrent_deletes() {
        let cache = MemoryCache::new();
        for i in 0..10 {
            cache.set(&format!("k:{}", i), "v".into(), None).await.unwrap();
        }

        let mut seen = Vec::new();
        let mut cursor = 0;
        loop {
            let (keys, next) = cache.scan(cursor, "k:*", 3).await.unwrap();
            cache.del(&keys).await.unwrap();
            seen.extend(keys);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        assert_eq!(seen.len(), 10);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_type_and_close() {
        let cache = MemoryCache::new();
        cache.hset("h", vec![("f".into(), "1".into())]).await.unwrap();
        assert!(matches!(cache.get("h").await, Err(CacheError::WrongType(_))));

        cache.close().await.unwrap();
        assert!(matches!(cache.ping().await, Err(CacheError::Closed)));
    }
}
