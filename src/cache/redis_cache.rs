//! Distributed cache backed by Redis

use super::{CacheStatistics, CacheStats, DataCache};
use crate::query::QuerySignature;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

/// Cache shared by every gateway instance pointing at the same Redis
///
/// Each call opens a multiplexed connection and is bounded by `call_timeout`.
pub struct RedisCache {
    client: redis::Client,
    prefix: String,
    ttl: Duration,
    call_timeout: Duration,
    stats: CacheStatistics,
}

impl RedisCache {
    pub fn new(url: &str, prefix: &str, ttl: Duration, call_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::Config(format!("invalid redis url '{}': {}", url, e)))?;
        Ok(Self {
            client,
            prefix: prefix.to_string(),
            ttl,
            call_timeout,
            stats: CacheStatistics::default(),
        })
    }

    fn key(&self, signature: &QuerySignature) -> String {
        format!("{}:result:{}", self.prefix, signature)
    }

    async fn bounded<T, Fut>(&self, op: Fut) -> Result<T>
    where
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        match timeout(self.call_timeout, op).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::Cache("redis call timed out".into())),
        }
    }
}

#[async_trait]
impl DataCache for RedisCache {
    fn backing(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, signature: &QuerySignature) -> Result<Option<Bytes>> {
        let key = self.key(signature);
        let result = self
            .bounded(async {
                let mut conn = self.client.get_multiplexed_async_connection().await?;
                redis::cmd("GET")
                    .arg(&key)
                    .query_async::<_, Option<Vec<u8>>>(&mut conn)
                    .await
            })
            .await;

        match result {
            Ok(Some(value)) => {
                self.stats.hit();
                Ok(Some(Bytes::from(value)))
            }
            Ok(None) => {
                self.stats.miss();
                Ok(None)
            }
            Err(e) => {
                self.stats.error();
                warn!(error = %e, "Redis cache read failed");
                Err(e)
            }
        }
    }

    async fn put(&self, signature: &QuerySignature, value: Bytes) -> Result<()> {
        let key = self.key(signature);
        let ttl_secs = self.ttl.as_secs().max(1);
        let result = self
            .bounded(async {
                let mut conn = self.client.get_multiplexed_async_connection().await?;
                redis::cmd("SET")
                    .arg(&key)
                    .arg(value.to_vec())
                    .arg("EX")
                    .arg(ttl_secs)
                    .query_async::<_, ()>(&mut conn)
                    .await
            })
            .await;

        match result {
            Ok(()) => {
                self.stats.put();
                Ok(())
            }
            Err(e) => {
                self.stats.error();
                warn!(error = %e, "Redis cache write failed");
                Err(e)
            }
        }
    }

    fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }
}
