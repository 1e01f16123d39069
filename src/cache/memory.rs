//! In-process cache backed by moka

use super::{CacheStatistics, CacheStats, DataCache};
use crate::query::QuerySignature;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use moka::future::Cache;
use std::time::Duration;

/// Size-weighted in-memory cache with a time-to-live
pub struct MemoryCache {
    entries: Cache<String, Bytes>,
    stats: CacheStatistics,
}

impl MemoryCache {
    /// `max_bytes` bounds the total size of cached responses.
    pub fn new(max_bytes: u64, ttl: Duration) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_bytes)
            .weigher(|_key: &String, value: &Bytes| -> u32 {
                value.len().try_into().unwrap_or(u32::MAX)
            })
            .time_to_live(ttl)
            .build();
        Self {
            entries,
            stats: CacheStatistics::default(),
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }
}

#[async_trait]
impl DataCache for MemoryCache {
    fn backing(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, signature: &QuerySignature) -> Result<Option<Bytes>> {
        let value = self.entries.get(signature.as_str()).await;
        if value.is_some() {
            self.stats.hit();
        } else {
            self.stats.miss();
        }
        Ok(value)
    }

    async fn put(&self, signature: &QuerySignature, value: Bytes) -> Result<()> {
        self.entries
            .insert(signature.as_str().to_string(), value)
            .await;
        self.stats.put();
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }
}
