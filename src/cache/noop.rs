//! Cache backing that stores nothing

use super::{CacheStatistics, CacheStats, DataCache};
use crate::query::QuerySignature;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Default)]
pub struct DisabledCache {
    stats: CacheStatistics,
}

impl DisabledCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DataCache for DisabledCache {
    fn backing(&self) -> &'static str {
        "disabled"
    }

    async fn get(&self, _signature: &QuerySignature) -> Result<Option<Bytes>> {
        self.stats.miss();
        Ok(None)
    }

    async fn put(&self, _signature: &QuerySignature, _value: Bytes) -> Result<()> {
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }
}
