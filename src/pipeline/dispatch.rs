//! Backend dispatch with bounded retries

use super::{telemetry, Next, PipelineCounters, PipelineRequest, RequestHandler};
use crate::backend::{BackendClient, BackendError};
use crate::config::GatewayConfig;
use crate::query::{BackendQuery, ResultSet};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Exponential backoff for transport failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            max_retries: config.dispatch_retries,
            initial_backoff: config.retry_backoff,
            max_backoff: config.max_retry_backoff,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::default())
    }
}

pub struct BackendDispatchHandler {
    backend: Arc<dyn BackendClient>,
    retry: RetryPolicy,
    counters: Arc<PipelineCounters>,
}

impl BackendDispatchHandler {
    pub fn new(
        backend: Arc<dyn BackendClient>,
        retry: RetryPolicy,
        counters: Arc<PipelineCounters>,
    ) -> Self {
        Self {
            backend,
            retry,
            counters,
        }
    }

    async fn dispatch(&self, query: &BackendQuery) -> Result<ResultSet> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            PipelineCounters::bump(&self.counters.dispatches, 1);
            match self.backend.execute(query).await {
                Ok(rs) => {
                    telemetry::record_dispatch("success");
                    debug!(table = %query.table, attempt, rows = rs.len(), "Backend query answered");
                    return Ok(rs);
                }
                Err(BackendError::Rejected(msg)) => {
                    telemetry::record_dispatch("rejected");
                    warn!(table = %query.table, error = %msg, "Backend rejected query");
                    return Err(Error::BackendRejected(msg));
                }
                Err(BackendError::Transport(msg)) => {
                    telemetry::record_dispatch("transport");
                    if attempt > self.retry.max_retries {
                        warn!(
                            table = %query.table,
                            attempts = attempt,
                            error = %msg,
                            "Backend unavailable, giving up"
                        );
                        return Err(Error::BackendUnavailable {
                            attempts: attempt,
                            last_error: msg,
                        });
                    }
                    let delay = self.retry.backoff(attempt);
                    PipelineCounters::bump(&self.counters.retries, 1);
                    warn!(
                        table = %query.table,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %msg,
                        "Transport failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl RequestHandler for BackendDispatchHandler {
    fn name(&self) -> &'static str {
        "backend_dispatch"
    }

    async fn handle(&self, request: PipelineRequest, _next: Next<'_>) -> Result<ResultSet> {
        let mut merged = ResultSet::default();
        for query in &request.queries {
            merged.rows.extend(self.dispatch(query).await?.rows);
        }
        Ok(merged)
    }
}
