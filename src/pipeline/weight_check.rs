//! Rejects requests whose estimated result is too large

use super::{telemetry, Next, PipelineCounters, PipelineRequest, RequestHandler};
use crate::query::{ResultSet, WeightEstimator};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

pub struct WeightCheckHandler {
    estimator: WeightEstimator,
    limit: u64,
    counters: Arc<PipelineCounters>,
}

impl WeightCheckHandler {
    pub fn new(estimator: WeightEstimator, limit: u64, counters: Arc<PipelineCounters>) -> Self {
        Self {
            estimator,
            limit,
            counters,
        }
    }
}

#[async_trait]
impl RequestHandler for WeightCheckHandler {
    fn name(&self) -> &'static str {
        "weight_check"
    }

    async fn handle(&self, request: PipelineRequest, next: Next<'_>) -> Result<ResultSet> {
        let estimate = self.estimator.estimate(&request.queries);
        let rejected = estimate.weight > self.limit;
        telemetry::record_weight(estimate.weight, rejected);

        if rejected {
            PipelineCounters::bump(&self.counters.weight_rejections, 1);
            warn!(
                table = %request.logical.table,
                rows = estimate.rows,
                weight = estimate.weight,
                limit = self.limit,
                "Request rejected by weight check"
            );
            return Err(Error::WeightExceeded {
                weight: estimate.weight,
                limit: self.limit,
            });
        }
        next.run(request).await
    }
}
