//! Response cache lookup and request collapsing

use super::{telemetry, Next, PipelineCounters, PipelineRequest, RequestHandler};
use crate::cache::{DataCache, Join, RequestCollapser};
use crate::query::{QuerySignature, QuerySigningService, ResultSet};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct CacheLookupHandler {
    signer: QuerySigningService,
    cache: Arc<dyn DataCache>,
    collapser: RequestCollapser,
    counters: Arc<PipelineCounters>,
}

impl CacheLookupHandler {
    pub fn new(
        signer: QuerySigningService,
        cache: Arc<dyn DataCache>,
        counters: Arc<PipelineCounters>,
    ) -> Self {
        Self {
            signer,
            cache,
            collapser: RequestCollapser::new(),
            counters,
        }
    }

    /// Requests currently being computed by a leader.
    pub fn inflight(&self) -> usize {
        self.collapser.inflight_count()
    }

    /// Cached response, if any. Backing and decode failures read as a miss.
    async fn read(&self, signature: &QuerySignature) -> Option<ResultSet> {
        let bytes = match self.cache.get(signature).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(signature = %signature, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };
        match ResultSet::from_bytes(&bytes) {
            Ok(rs) => Some(rs),
            Err(e) => {
                warn!(signature = %signature, error = %e, "Cached response is unreadable");
                None
            }
        }
    }

    async fn write(&self, signature: &QuerySignature, rs: &ResultSet) {
        let bytes = match rs.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(signature = %signature, error = %e, "Cannot encode response for cache");
                return;
            }
        };
        if let Err(e) = self.cache.put(signature, bytes).await {
            warn!(signature = %signature, error = %e, "Cache write failed");
        }
    }

    fn hit(&self, rs: ResultSet) -> Result<ResultSet> {
        PipelineCounters::bump(&self.counters.cache_hits, 1);
        telemetry::record_cache_lookup("hit");
        Ok(rs)
    }
}

#[async_trait]
impl RequestHandler for CacheLookupHandler {
    fn name(&self) -> &'static str {
        "cache_lookup"
    }

    async fn handle(&self, request: PipelineRequest, next: Next<'_>) -> Result<ResultSet> {
        let signature = self.signer.sign(
            &request.logical,
            &request.resolution,
            &request.availability,
            request.is_partial(),
        )?;

        if let Some(rs) = self.read(&signature).await {
            debug!(signature = %signature, "Cache hit");
            return self.hit(rs);
        }
        PipelineCounters::bump(&self.counters.cache_misses, 1);
        telemetry::record_cache_lookup("miss");

        loop {
            match self.collapser.join(signature.as_str()) {
                Join::Leader(guard) => {
                    // A previous leader may have finished between our read and join.
                    if let Some(rs) = self.read(&signature).await {
                        let outcome = Ok(rs);
                        guard.complete(&outcome);
                        return outcome;
                    }
                    let outcome = next.run(request).await;
                    if let Ok(rs) = &outcome {
                        self.write(&signature, rs).await;
                    }
                    guard.complete(&outcome);
                    return outcome;
                }
                Join::Follower(follower) => {
                    debug!(signature = %signature, "Waiting on in-flight request");
                    if let Some(outcome) = follower.wait().await {
                        PipelineCounters::bump(&self.counters.collapsed, 1);
                        telemetry::record_cache_lookup("collapsed");
                        return outcome;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{DisabledCache, MemoryCache};
    use crate::query::{LogicalQuery, ResultRow};
    use crate::table::{PhysicalTable, Resolution};
    use crate::time::TimeGrain;
    use crate::Error;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;
    use tokio::task::JoinSet;

    /// Terminal handler counting how often it runs
    struct Counting {
        calls: AtomicU64,
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl RequestHandler for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn handle(&self, _request: PipelineRequest, _next: Next<'_>) -> Result<ResultSet> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(Error::BackendRejected("no".into()));
            }
            Ok(ResultSet::new(vec![ResultRow::new(Utc::now()).with_metric("views", 1.0)]))
        }
    }

    fn request() -> PipelineRequest {
        let intervals = "2024-01-01/2024-01-02".parse().unwrap();
        let table = Arc::new(PhysicalTable::new("daily", TimeGrain::Day));
        PipelineRequest {
            logical: Arc::new(
                LogicalQuery::new("traffic", TimeGrain::Day, "2024-01-01/2024-01-02".parse().unwrap())
                    .with_metrics(["views"]),
            ),
            resolution: Arc::new(Resolution::single(table, intervals)),
            availability: Default::default(),
            queries: Vec::new(),
            missing: Default::default(),
        }
    }

    fn chain(
        cache: Arc<dyn DataCache>,
        terminal: Arc<Counting>,
    ) -> (Vec<Arc<dyn RequestHandler>>, Arc<PipelineCounters>) {
        let counters = Arc::new(PipelineCounters::new());
        let handler = CacheLookupHandler::new(
            QuerySigningService::new(),
            cache,
            Arc::clone(&counters),
        );
        let handlers: Vec<Arc<dyn RequestHandler>> = vec![Arc::new(handler), terminal];
        (handlers, counters)
    }

    fn counting(delay: Duration, fail: bool) -> Arc<Counting> {
        Arc::new(Counting {
            calls: AtomicU64::new(0),
            delay,
            fail,
        })
    }

    #[tokio::test]
    async fn test_concurrent_identical_requests_run_once() {
        let terminal = counting(Duration::from_millis(200), false);
        let (handlers, counters) = chain(Arc::new(DisabledCache::new()), terminal.clone());
        let handlers = Arc::new(handlers);

        let mut tasks = JoinSet::new();
        for _ in 0..8 {
            let handlers = Arc::clone(&handlers);
            tasks.spawn(async move { Next::new(&handlers).run(request()).await });
        }
        let mut results = Vec::new();
        while let Some(result) = tasks.join_next().await {
            results.push(result.unwrap().unwrap());
        }

        assert_eq!(terminal.calls.load(Ordering::SeqCst), 1);
        assert!(results.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(counters.snapshot().collapsed, 7);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let terminal = counting(Duration::ZERO, true);
        let cache = Arc::new(MemoryCache::new(1024 * 1024, Duration::from_secs(60)));
        let (handlers, _) = chain(cache, terminal.clone());

        assert!(Next::new(&handlers).run(request()).await.is_err());
        assert!(Next::new(&handlers).run(request()).await.is_err());
        assert_eq!(terminal.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_success_populates_cache() {
        let terminal = counting(Duration::ZERO, false);
        let cache = Arc::new(MemoryCache::new(1024 * 1024, Duration::from_secs(60)));
        let (handlers, counters) = chain(cache, terminal.clone());

        let first = Next::new(&handlers).run(request()).await.unwrap();
        let second = Next::new(&handlers).run(request()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(terminal.calls.load(Ordering::SeqCst), 1);
        assert_eq!(counters.snapshot().cache_hits, 1);
    }
}
