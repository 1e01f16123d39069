//! Response cache for Strata
//!
//! Responses are keyed by query signature. Signatures change whenever the
//! availability behind them changes, so entries are never invalidated by the
//! pipeline; stale entries become unreachable and age out of the backing.

mod coalesce;
mod memory;
mod noop;
mod redis_cache;

pub use coalesce::{FlightGuard, Follower, Join, RequestCollapser};
pub use memory::MemoryCache;
pub use noop::DisabledCache;
pub use redis_cache::RedisCache;

use crate::query::QuerySignature;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};

/// Which backing store holds cached responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheBacking {
    /// In-process, size-bounded
    #[default]
    Memory,
    /// Shared across gateway instances
    Redis,
    /// Always misses
    Disabled,
}

impl std::str::FromStr for CacheBacking {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            "disabled" | "none" | "off" => Ok(Self::Disabled),
            other => Err(format!("unknown cache backend '{}'", other)),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub errors: u64,
}

/// Response cache contract
///
/// Implementations must be safe under concurrent callers. Errors are
/// reported, and the pipeline treats them as misses.
#[async_trait]
pub trait DataCache: Send + Sync {
    /// Short name for logs and status output
    fn backing(&self) -> &'static str;

    async fn get(&self, signature: &QuerySignature) -> Result<Option<Bytes>>;

    async fn put(&self, signature: &QuerySignature, value: Bytes) -> Result<()>;

    fn stats(&self) -> CacheStats;
}

#[derive(Debug, Default)]
struct CacheStatistics {
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    errors: AtomicU64,
}

impl CacheStatistics {
    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}
