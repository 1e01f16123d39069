//! Request pipeline
//!
//! A request is validated, then the availability of every dataset it can
//! touch is captured once. Resolution, the partial data policy and the cache
//! signature all read that one snapshot. The planned request then runs
//! through a chain of `RequestHandler`s. Each handler either answers or
//! passes the request on through `Next`. The default chain is:
//!
//! 1. `CacheLookupHandler`: signature, cache read, request collapsing
//! 2. `WeightCheckHandler`: reject requests estimated too expensive
//! 3. `ResponseMergeHandler`: fan out per backend query, merge results
//! 4. `QuerySplitHandler`: break long intervals into grain-aligned chunks
//! 5. `BackendDispatchHandler`: execute with bounded retries

mod cache_lookup;
mod dispatch;
mod merge;
mod split;
mod telemetry;
mod weight_check;

pub use cache_lookup::CacheLookupHandler;
pub use dispatch::{BackendDispatchHandler, RetryPolicy};
pub use merge::{lookback_metric_name, ResponseMergeHandler};
pub use split::{QuerySplitHandler, SplitMode};
pub use weight_check::WeightCheckHandler;

use crate::backend::BackendClient;
use crate::cache::DataCache;
use crate::config::GatewayConfig;
use crate::metadata::{AvailabilitySnapshot, MetadataStore};
use crate::query::{
    BackendQuery, LogicalQuery, PartialDataHandler, QuerySigningService, ResultSet,
    WeightEstimator,
};
use crate::table::{
    DefaultTableResolver, PhysicalTableDictionary, PhysicalTableResolver, Resolution,
};
use crate::time::IntervalSet;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info_span, warn, Instrument};

/// A planned request travelling down the chain
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub logical: Arc<LogicalQuery>,
    pub resolution: Arc<Resolution>,
    /// Availability the resolution and partial data were computed from
    pub availability: Arc<AvailabilitySnapshot>,
    /// Backend queries still to answer, after the partial data policy
    pub queries: Vec<BackendQuery>,
    /// Requested intervals with no published data
    pub missing: IntervalSet,
}

impl PipelineRequest {
    pub fn is_partial(&self) -> bool {
        !self.missing.is_empty()
    }

    /// Same request, narrowed to `queries`.
    pub fn with_queries(&self, queries: Vec<BackendQuery>) -> Self {
        Self {
            logical: Arc::clone(&self.logical),
            resolution: Arc::clone(&self.resolution),
            availability: Arc::clone(&self.availability),
            queries,
            missing: self.missing.clone(),
        }
    }
}

/// One stage of the request pipeline
#[async_trait]
pub trait RequestHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Answer `request`, or delegate to the rest of the chain via `next`.
    async fn handle(&self, request: PipelineRequest, next: Next<'_>) -> Result<ResultSet>;
}

/// Cursor over the handlers after the current one
#[derive(Clone, Copy)]
pub struct Next<'a> {
    handlers: &'a [Arc<dyn RequestHandler>],
}

impl<'a> Next<'a> {
    pub fn new(handlers: &'a [Arc<dyn RequestHandler>]) -> Self {
        Self { handlers }
    }

    pub async fn run(self, request: PipelineRequest) -> Result<ResultSet> {
        match self.handlers.split_first() {
            Some((handler, rest)) => handler.handle(request, Next { handlers: rest }).await,
            None => Err(Error::Internal(
                "request reached the end of the pipeline unanswered".to_string(),
            )),
        }
    }
}

/// Plain counters, readable by any exporter
#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub(crate) requests: AtomicU64,
    pub(crate) failures: AtomicU64,
    pub(crate) cache_hits: AtomicU64,
    pub(crate) cache_misses: AtomicU64,
    pub(crate) collapsed: AtomicU64,
    pub(crate) splits: AtomicU64,
    pub(crate) weight_rejections: AtomicU64,
    pub(crate) dispatches: AtomicU64,
    pub(crate) retries: AtomicU64,
    pub(crate) partial_responses: AtomicU64,
    pub(crate) partial_rejections: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub requests: u64,
    pub failures: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Requests answered by another caller's in-flight request
    pub collapsed: u64,
    /// Sub-queries produced by splitting
    pub splits: u64,
    pub weight_rejections: u64,
    /// Backend calls, retries included
    pub dispatches: u64,
    pub retries: u64,
    pub partial_responses: u64,
    pub partial_rejections: u64,
}

impl PipelineCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PipelineStats {
            requests: load(&self.requests),
            failures: load(&self.failures),
            cache_hits: load(&self.cache_hits),
            cache_misses: load(&self.cache_misses),
            collapsed: load(&self.collapsed),
            splits: load(&self.splits),
            weight_rejections: load(&self.weight_rejections),
            dispatches: load(&self.dispatches),
            retries: load(&self.retries),
            partial_responses: load(&self.partial_responses),
            partial_rejections: load(&self.partial_rejections),
        }
    }
}

/// Entry point for data requests
pub struct RequestPipeline {
    dictionary: Arc<PhysicalTableDictionary>,
    store: Arc<MetadataStore>,
    resolver: Arc<dyn PhysicalTableResolver>,
    partial: PartialDataHandler,
    handlers: Vec<Arc<dyn RequestHandler>>,
    counters: Arc<PipelineCounters>,
    request_timeout: Duration,
}

impl RequestPipeline {
    /// Pipeline with the default resolver and handler chain.
    pub fn new(
        config: &GatewayConfig,
        dictionary: Arc<PhysicalTableDictionary>,
        store: Arc<MetadataStore>,
        cache: Arc<dyn DataCache>,
        backend: Arc<dyn BackendClient>,
    ) -> Self {
        let counters = Arc::new(PipelineCounters::new());
        let resolver = Arc::new(DefaultTableResolver::new(Arc::clone(&dictionary)));
        let handlers: Vec<Arc<dyn RequestHandler>> = vec![
            Arc::new(CacheLookupHandler::new(
                QuerySigningService::new(),
                cache,
                Arc::clone(&counters),
            )),
            Arc::new(WeightCheckHandler::new(
                WeightEstimator::new(
                    Arc::clone(&store),
                    config.default_cardinality,
                    config.sketch_weight,
                ),
                config.weight_limit,
                Arc::clone(&counters),
            )),
            Arc::new(ResponseMergeHandler::new(Arc::clone(&counters))),
            Arc::new(QuerySplitHandler::new(
                config.split_threshold,
                config.split_mode,
                Arc::clone(&counters),
            )),
            Arc::new(BackendDispatchHandler::new(
                backend,
                RetryPolicy::from_config(config),
                Arc::clone(&counters),
            )),
        ];

        Self {
            dictionary,
            store,
            resolver,
            partial: PartialDataHandler::new(config.partial_data_policy),
            handlers,
            counters,
            request_timeout: config.request_timeout,
        }
    }

    /// Replace the table resolution strategy.
    pub fn with_resolver(mut self, resolver: Arc<dyn PhysicalTableResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Replace the handler chain.
    pub fn with_handlers(mut self, handlers: Vec<Arc<dyn RequestHandler>>) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn counters(&self) -> &Arc<PipelineCounters> {
        &self.counters
    }

    pub fn handler_names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Answer `query`, within the configured request timeout.
    pub async fn execute(&self, query: LogicalQuery) -> Result<ResultSet> {
        let span = info_span!(
            "pipeline.execute",
            table = %query.table,
            grain = %query.grain,
            kind = query.kind.name(),
        );
        let start = Instant::now();
        PipelineCounters::bump(&self.counters.requests, 1);

        let result = match tokio::time::timeout(
            self.request_timeout,
            self.run(query).instrument(span),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "Request timed out"
                );
                Err(Error::Timeout)
            }
        };

        let (outcome, error_class, rows) = match &result {
            Ok(rs) => ("success", None, rs.len() as u64),
            Err(e) => {
                PipelineCounters::bump(&self.counters.failures, 1);
                ("error", Some(e.error_class()), 0)
            }
        };
        telemetry::record_request(telemetry::RequestMetrics {
            outcome,
            error_class,
            duration_seconds: start.elapsed().as_secs_f64(),
            rows_returned: rows,
        });
        result
    }

    /// Availability of every dataset behind the logical table's members.
    fn capture_availability(&self, query: &LogicalQuery) -> Result<AvailabilitySnapshot> {
        let members = self.dictionary.members(&query.table)?;
        let datasets: BTreeSet<&str> = members
            .iter()
            .flat_map(|table| table.datasets.iter().map(String::as_str))
            .collect();
        Ok(self.store.snapshot(datasets))
    }

    async fn run(&self, query: LogicalQuery) -> Result<ResultSet> {
        query.validate()?;
        let availability = self.capture_availability(&query)?;
        let resolution = self.resolver.resolve(&query, &availability)?;
        debug!(
            tables = resolution.tables.len(),
            datasets = availability.datasets().count(),
            "Resolved physical tables"
        );
        let planned = BackendQuery::plan(&query, &resolution, &self.dictionary)?;

        let outcome = match self.partial.apply(planned, &availability) {
            Ok(outcome) => outcome,
            Err(e) => {
                PipelineCounters::bump(&self.counters.partial_rejections, 1);
                telemetry::record_partial("rejected");
                return Err(e);
            }
        };
        if !outcome.missing.is_empty() {
            telemetry::record_partial("served");
        }

        let request = PipelineRequest {
            logical: Arc::new(query),
            resolution: Arc::new(resolution),
            availability: Arc::new(availability),
            queries: outcome.queries,
            missing: outcome.missing,
        };
        Next::new(&self.handlers).run(request).await
    }
}
