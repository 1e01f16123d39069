//! Splitting long backend queries into grain-aligned chunks

use super::{telemetry, Next, PipelineCounters, PipelineRequest, RequestHandler};
use crate::query::ResultSet;
use crate::time::{IntervalSet, TimeGrain};
use crate::Result;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How split sub-queries are run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitMode {
    /// One chunk at a time, in interval order
    Sequential,
    /// Up to `max_in_flight` chunks at once; results keep interval order
    Parallel { max_in_flight: usize },
}

pub struct QuerySplitHandler {
    threshold: Duration,
    mode: SplitMode,
    counters: Arc<PipelineCounters>,
}

impl QuerySplitHandler {
    pub fn new(threshold: Duration, mode: SplitMode, counters: Arc<PipelineCounters>) -> Self {
        Self {
            threshold,
            mode,
            counters,
        }
    }

    /// Chunks for `intervals`, or `None` when no split is needed.
    fn chunks(&self, grain: TimeGrain, intervals: &IntervalSet) -> Option<Vec<IntervalSet>> {
        if grain == TimeGrain::All {
            return None;
        }
        let threshold_secs = i64::try_from(self.threshold.as_secs()).unwrap_or(i64::MAX);
        let span = intervals.span()?;
        if span.duration().num_seconds() <= threshold_secs {
            return None;
        }
        let periods = grain.periods_covering(chrono::Duration::seconds(threshold_secs));
        let chunks: Vec<IntervalSet> = intervals
            .split_every(grain, periods)
            .into_iter()
            .map(IntervalSet::from)
            .collect();
        (chunks.len() > 1).then_some(chunks)
    }
}

#[async_trait]
impl RequestHandler for QuerySplitHandler {
    fn name(&self) -> &'static str {
        "query_split"
    }

    async fn handle(&self, request: PipelineRequest, next: Next<'_>) -> Result<ResultSet> {
        let [query] = request.queries.as_slice() else {
            return next.run(request).await;
        };
        let Some(chunks) = self.chunks(query.grain, &query.intervals) else {
            return next.run(request).await;
        };

        let count = chunks.len();
        PipelineCounters::bump(&self.counters.splits, count as u64);
        telemetry::record_split(count as u64);
        debug!(table = %query.table, chunks = count, mode = ?self.mode, "Splitting backend query");

        let sub_requests: Vec<PipelineRequest> = chunks
            .into_iter()
            .map(|chunk| request.with_queries(vec![query.with_intervals(chunk)]))
            .collect();

        let results: Vec<ResultSet> = match self.mode {
            SplitMode::Sequential => {
                let mut results = Vec::with_capacity(count);
                for sub in sub_requests {
                    results.push(next.run(sub).await?);
                }
                results
            }
            SplitMode::Parallel { max_in_flight } => {
                futures::stream::iter(sub_requests.into_iter().map(|sub| next.run(sub)))
                    .buffered(max_in_flight.max(1))
                    .try_collect::<Vec<_>>()
                    .await?
            }
        };

        let rows = results.into_iter().flat_map(|rs| rs.rows).collect();
        Ok(ResultSet::new(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{BackendQuery, LogicalQuery, QueryRole, ResultRow};
    use crate::table::{Aggregation, Metric, PhysicalTable, Resolution};
    use parking_lot::Mutex;

    /// Records the intervals it is asked for and returns one row per chunk
    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<IntervalSet>>,
    }

    #[async_trait]
    impl RequestHandler for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn handle(&self, request: PipelineRequest, _next: Next<'_>) -> Result<ResultSet> {
            let intervals = request.queries[0].intervals.clone();
            self.seen.lock().push(intervals.clone());
            let start = intervals.span().map(|s| s.start()).unwrap_or_default();
            Ok(ResultSet::new(vec![ResultRow::new(start).with_metric("views", 1.0)]))
        }
    }

    fn request(grain: TimeGrain, intervals: &str) -> PipelineRequest {
        let intervals: IntervalSet = intervals.parse().unwrap();
        PipelineRequest {
            logical: Arc::new(LogicalQuery::new("traffic", grain, intervals.clone())),
            resolution: Arc::new(Resolution::single(
                Arc::new(PhysicalTable::new("daily", TimeGrain::Day)),
                intervals.clone(),
            )),
            availability: Default::default(),
            queries: vec![BackendQuery {
                table: "daily".into(),
                datasets: vec!["daily".into()],
                grain,
                dimensions: vec![],
                metrics: vec![Metric::new("views", Aggregation::LongSum)],
                filters: vec![],
                intervals,
                role: QueryRole::Primary,
            }],
            missing: IntervalSet::empty(),
        }
    }

    fn chain(mode: SplitMode) -> (Vec<Arc<dyn RequestHandler>>, Arc<Recording>) {
        let recording = Arc::new(Recording::default());
        let handlers: Vec<Arc<dyn RequestHandler>> = vec![
            Arc::new(QuerySplitHandler::new(
                Duration::from_secs(10 * 86_400),
                mode,
                Arc::new(PipelineCounters::new()),
            )),
            recording.clone(),
        ];
        (handlers, recording)
    }

    #[tokio::test]
    async fn test_thirty_days_become_three_ordered_chunks() {
        for mode in [SplitMode::Sequential, SplitMode::Parallel { max_in_flight: 3 }] {
            let (handlers, recording) = chain(mode);
            let rs = Next::new(&handlers)
                .run(request(TimeGrain::Day, "2024-01-01/2024-01-31"))
                .await
                .unwrap();

            let starts: Vec<String> = rs
                .rows
                .iter()
                .map(|r| r.timestamp.format("%Y-%m-%d").to_string())
                .collect();
            assert_eq!(starts, vec!["2024-01-01", "2024-01-11", "2024-01-21"]);
            assert_eq!(recording.seen.lock().len(), 3);
        }
    }

    #[tokio::test]
    async fn test_short_interval_is_not_split() {
        let (handlers, recording) = chain(SplitMode::Sequential);
        Next::new(&handlers)
            .run(request(TimeGrain::Day, "2024-01-01/2024-01-08"))
            .await
            .unwrap();
        assert_eq!(recording.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_all_grain_is_never_split() {
        let (handlers, recording) = chain(SplitMode::Sequential);
        Next::new(&handlers)
            .run(request(TimeGrain::All, "2024-01-01/2024-06-01"))
            .await
            .unwrap();
        assert_eq!(recording.seen.lock().len(), 1);
    }
}
