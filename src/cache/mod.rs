//! Cache backend abstraction and the in-memory implementation.
//!
//! The engine never talks to a concrete cache directly; it goes through
//! [`CacheBackend`]. Every operation is best-effort: errors are logged by
//! callers and never promoted to a dispatch failure. Production deployments
//! plug in a Redis-backed implementation on the host side; the in-memory
//! backend serves tests and single-process development.

pub mod coordinator;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Errors from a cache backend. Always logged, never propagated to callers
/// of the engine.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backend could not be reached or rejected the operation.
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

/// Pluggable cache operations the engine relies on.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch a value by key; `None` on miss or expiry.
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// Store a value under a key with a TTL in seconds.
    async fn set(&self, key: &str, value: Value, ttl_secs: u64) -> Result<(), CacheError>;

    /// Atomically increment an integer counter, refreshing its TTL.
    /// Returns the post-increment value.
    async fn increment(&self, key: &str, ttl_secs: u64) -> Result<i64, CacheError>;

    /// Drop every entry belonging to a tenant within a namespace.
    /// Returns the number of entries removed, when the backend knows it.
    async fn invalidate_tenant(&self, tenant: Uuid, namespace: &str) -> Result<u64, CacheError>;
}

struct Entry {
    value: Value,
    expires_at: DateTime<Utc>,
}

/// In-memory cache backend with lazy expiry.
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of live (unexpired) entries; test and introspection helper.
    pub async fn live_len(&self) -> usize {
        let now = Utc::now();
        let entries = self.entries.read().await;
        entries.values().filter(|e| e.expires_at > now).count()
    }

    fn expiry(ttl_secs: u64) -> DateTime<Utc> {
        let ttl = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
        Utc::now()
            .checked_add_signed(Duration::seconds(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Utc::now() => Ok(Some(entry.value.clone())),
            _ => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl_secs: u64) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_owned(),
            Entry {
                value,
                expires_at: Self::expiry(ttl_secs),
            },
        );
        Ok(())
    }

    async fn increment(&self, key: &str, ttl_secs: u64) -> Result<i64, CacheError> {
        let mut entries = self.entries.write().await;
        let now = Utc::now();
        let current = match entries.get(key) {
            Some(entry) if entry.expires_at > now => entry.value.as_i64().unwrap_or(0),
            _ => 0,
        };
        let next = current.saturating_add(1);
        entries.insert(
            key.to_owned(),
            Entry {
                value: Value::from(next),
                expires_at: Self::expiry(ttl_secs),
            },
        );
        Ok(next)
    }

    async fn invalidate_tenant(&self, tenant: Uuid, namespace: &str) -> Result<u64, CacheError> {
        let prefix = format!("{namespace}:{tenant}:");
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(&prefix));
        let removed = before.saturating_sub(entries.len());
        Ok(u64::try_from(removed).unwrap_or(u64::MAX))
    }
}

/// A backend that fails every operation; exercises the fail-open paths in tests.
#[cfg(test)]
pub struct FailingCache;

#[cfg(test)]
#[async_trait]
impl CacheBackend for FailingCache {
    async fn get(&self, _key: &str) -> Result<Option<Value>, CacheError> {
        Err(CacheError::Unavailable("down".to_owned()))
    }

    async fn set(&self, _key: &str, _value: Value, _ttl_secs: u64) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("down".to_owned()))
    }

    async fn increment(&self, _key: &str, _ttl_secs: u64) -> Result<i64, CacheError> {
        Err(CacheError::Unavailable("down".to_owned()))
    }

    async fn invalidate_tenant(
        &self,
        _tenant: Uuid,
        _namespace: &str,
    ) -> Result<u64, CacheError> {
        Err(CacheError::Unavailable("down".to_owned()))
    }
}
