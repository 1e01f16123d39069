//! Fan-out per backend query and response merging
//!
//! Primary results from every resolved table are combined into one series.
//! Baseline results are moved forward by their offset and attached to the
//! primary rows they line up with. Missing data is flagged last.

use super::{Next, PipelineCounters, PipelineRequest, RequestHandler};
use crate::query::{PartialDataMarker, QueryRole, ResultRow, ResultSet};
use crate::table::Metric;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Name of the baseline column for `metric` at `offset` periods.
pub fn lookback_metric_name(metric: &str, offset: i64) -> String {
    format!("{}_lookback_{}", metric, offset)
}

pub struct ResponseMergeHandler {
    counters: Arc<PipelineCounters>,
}

impl ResponseMergeHandler {
    pub fn new(counters: Arc<PipelineCounters>) -> Self {
        Self { counters }
    }
}

#[async_trait]
impl RequestHandler for ResponseMergeHandler {
    fn name(&self) -> &'static str {
        "response_merge"
    }

    async fn handle(&self, request: PipelineRequest, next: Next<'_>) -> Result<ResultSet> {
        let metrics: Vec<Metric> = request
            .queries
            .first()
            .map(|q| q.metrics.clone())
            .unwrap_or_default();
        let grain = request.logical.grain;

        let results = try_join_all(
            request
                .queries
                .iter()
                .map(|query| next.run(request.with_queries(vec![query.clone()]))),
        )
        .await?;

        let mut primary = Vec::new();
        let mut baselines: BTreeMap<i64, Vec<ResultRow>> = BTreeMap::new();
        for (query, result) in request.queries.iter().zip(results) {
            match query.role {
                QueryRole::Primary => primary.extend(result.rows),
                QueryRole::Baseline { offset } => baselines
                    .entry(offset)
                    .or_default()
                    .extend(result.shift(grain, offset.saturating_neg())?.rows),
            }
        }

        let mut merged = ResultSet::new(primary).combine_duplicates(&metrics);
        for (offset, rows) in baselines {
            let baseline = ResultSet::new(rows).combine_duplicates(&metrics);
            attach_baseline(&mut merged, baseline, offset, &metrics);
        }

        if request.is_partial() {
            PipelineCounters::bump(&self.counters.partial_responses, 1);
            debug!(missing = %request.missing, "Marking response as partial");
            merged.partial = Some(PartialDataMarker {
                missing: request.missing.clone(),
            });
        }
        Ok(merged)
    }
}

fn attach_baseline(primary: &mut ResultSet, baseline: ResultSet, offset: i64, metrics: &[Metric]) {
    let index: HashMap<(DateTime<Utc>, &BTreeMap<String, String>), &BTreeMap<String, f64>> =
        baseline
            .rows
            .iter()
            .map(|row| (row.key(), &row.metrics))
            .collect();

    for row in &mut primary.rows {
        let Some(values) = index.get(&(row.timestamp, &row.dimensions)) else {
            continue;
        };
        for metric in metrics {
            if let Some(value) = values.get(&metric.name) {
                row.metrics
                    .insert(lookback_metric_name(&metric.name, offset), *value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{BackendQuery, LogicalQuery};
    use crate::table::{Aggregation, PhysicalTable, Resolution};
    use crate::time::{IntervalSet, TimeGrain};

    /// Answers each query from fixed rows keyed by table and role
    struct Scripted;

    #[async_trait]
    impl RequestHandler for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn handle(&self, request: PipelineRequest, _next: Next<'_>) -> Result<ResultSet> {
            let query = &request.queries[0];
            let rows = match (query.table.as_str(), query.role) {
                ("daily_old", QueryRole::Primary) => vec![
                    row("2024-01-01", 1.0),
                    row("2024-01-02", 2.0),
                ],
                ("daily_new", QueryRole::Primary) => vec![row("2024-01-03", 3.0)],
                // Baseline a week earlier
                (_, QueryRole::Baseline { offset: -7 }) => vec![row("2023-12-25", 10.0)],
                _ => vec![],
            };
            Ok(ResultSet::new(rows))
        }
    }

    fn row(day: &str, views: f64) -> ResultRow {
        ResultRow::new(format!("{}T00:00:00Z", day).parse().unwrap())
            .with_dimension("country", "us")
            .with_metric("views", views)
    }

    fn query(table: &str, intervals: &str, role: QueryRole) -> BackendQuery {
        BackendQuery {
            table: table.into(),
            datasets: vec![table.into()],
            grain: TimeGrain::Day,
            dimensions: vec!["country".into()],
            metrics: vec![Metric::new("views", Aggregation::LongSum)],
            filters: vec![],
            intervals: intervals.parse().unwrap(),
            role,
        }
    }

    fn request(queries: Vec<BackendQuery>, missing: &str) -> PipelineRequest {
        let intervals: IntervalSet = "2024-01-01/2024-01-04".parse().unwrap();
        PipelineRequest {
            logical: Arc::new(LogicalQuery::new("traffic", TimeGrain::Day, intervals.clone())),
            resolution: Arc::new(Resolution::single(
                Arc::new(PhysicalTable::new("daily_old", TimeGrain::Day)),
                intervals,
            )),
            availability: Default::default(),
            queries,
            missing: if missing.is_empty() {
                IntervalSet::empty()
            } else {
                missing.parse().unwrap()
            },
        }
    }

    fn chain() -> (Vec<Arc<dyn RequestHandler>>, Arc<PipelineCounters>) {
        let counters = Arc::new(PipelineCounters::new());
        let handlers: Vec<Arc<dyn RequestHandler>> = vec![
            Arc::new(ResponseMergeHandler::new(Arc::clone(&counters))),
            Arc::new(Scripted),
        ];
        (handlers, counters)
    }

    #[tokio::test]
    async fn test_primary_results_concatenate_in_time_order() {
        let (handlers, _) = chain();
        let rs = Next::new(&handlers)
            .run(request(
                vec![
                    query("daily_new", "2024-01-03/2024-01-04", QueryRole::Primary),
                    query("daily_old", "2024-01-01/2024-01-03", QueryRole::Primary),
                ],
                "",
            ))
            .await
            .unwrap();

        let views: Vec<f64> = rs.rows.iter().map(|r| r.metrics["views"]).collect();
        assert_eq!(views, vec![1.0, 2.0, 3.0]);
        assert!(!rs.is_partial());
    }

    #[tokio::test]
    async fn test_baseline_attaches_to_aligned_primary_row() {
        let (handlers, _) = chain();
        let rs = Next::new(&handlers)
            .run(request(
                vec![
                    query("daily_old", "2024-01-01/2024-01-03", QueryRole::Primary),
                    query(
                        "daily_old",
                        "2023-12-25/2023-12-27",
                        QueryRole::Baseline { offset: -7 },
                    ),
                ],
                "",
            ))
            .await
            .unwrap();

        assert_eq!(rs.len(), 2);
        assert_eq!(rs.rows[0].metrics["views_lookback_-7"], 10.0);
        assert!(!rs.rows[1].metrics.contains_key("views_lookback_-7"));
    }

    #[tokio::test]
    async fn test_missing_intervals_mark_response_partial() {
        let (handlers, counters) = chain();
        let rs = Next::new(&handlers)
            .run(request(
                vec![query("daily_old", "2024-01-01/2024-01-03", QueryRole::Primary)],
                "2024-01-03/2024-01-04",
            ))
            .await
            .unwrap();

        let marker = rs.partial.expect("partial marker");
        assert_eq!(
            marker.missing,
            "2024-01-03/2024-01-04".parse::<IntervalSet>().unwrap()
        );
        assert_eq!(counters.snapshot().partial_responses, 1);
    }

    #[test]
    fn test_lookback_metric_name() {
        assert_eq!(lookback_metric_name("revenue", -1), "revenue_lookback_-1");
    }
}
