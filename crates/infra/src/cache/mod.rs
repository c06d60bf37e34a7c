//! Volatile cache boundary.
//!
//! Everything stored here is advisory: callers treat a miss, an expired entry and a
//! failed call the same way, and never make durable decisions from a cached value.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

mod memory;
#[cfg(feature = "redis")]
mod redis_cache;

pub use memory::InMemoryCache;
#[cfg(feature = "redis")]
pub use redis_cache::RedisCache;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache call timed out")]
    Timeout,

    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("cached value could not be decoded: {0}")]
    Decode(String),
}

impl From<tokio::time::error::Elapsed> for CacheError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        CacheError::Timeout
    }
}

/// String key-value store with optional per-key expiry.
#[async_trait]
pub trait KeyValueCache: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Overwrite `key`. `ttl: None` keeps the entry until overwritten or deleted.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

/// Atomic counters, used for fixed-window admission.
#[async_trait]
pub trait CounterStore: Send + Sync + 'static {
    /// Increment and return the post-increment value. A missing key counts from 0.
    async fn incr(&self, key: &str) -> Result<u64, CacheError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Whether `key` will go away on its own. A missing key counts as expiring.
    async fn has_expiry(&self, key: &str) -> Result<bool, CacheError>;
}

/// Key layout shared by every cache user.
#[derive(Debug, Clone)]
pub struct CacheKeys {
    prefix: String,
}

impl CacheKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn job(&self, job_id: impl std::fmt::Display) -> String {
        format!("{}:job:{}", self.prefix, job_id)
    }

    pub fn document_text(&self, document_id: &str) -> String {
        format!("{}:cache:drive:file:{}", self.prefix, document_id)
    }

    pub fn rate(&self, client: &str) -> String {
        format!("{}:rate:{}", self.prefix, client)
    }
}

impl Default for CacheKeys {
    fn default() -> Self {
        Self::new("contractdesk")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        let keys = CacheKeys::new("cd");
        assert_eq!(keys.job("abc"), "cd:job:abc");
        assert_eq!(keys.document_text("file-1"), "cd:cache:drive:file:file-1");
        assert_eq!(keys.rate("10.0.0.1"), "cd:rate:10.0.0.1");
    }
}
