//! In-memory backend for development and testing
//!
//! `InMemoryBackend` answers queries from rows held per dataset, rolling them
//! up to the requested grain and dimensions. `InMemoryMetadataSource` serves
//! segment lists and dimension values. Both can be told to fail.

use super::{BackendClient, BackendError, MetadataSource};
use crate::metadata::{AvailabilityRecord, SegmentInfo};
use crate::query::{BackendQuery, FilterOp, ResultRow, ResultSet};
use crate::time::TimeGrain;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct InMemoryBackend {
    /// Raw rows by dataset
    rows: RwLock<HashMap<String, Vec<ResultRow>>>,
    /// Every query executed, in arrival order
    executed: Mutex<Vec<BackendQuery>>,
    /// Failures returned by the next calls, one per call
    failures: Mutex<VecDeque<BackendError>>,
    calls: AtomicU64,
    latency: Duration,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn insert_rows(&self, dataset: &str, rows: impl IntoIterator<Item = ResultRow>) {
        self.rows
            .write()
            .entry(dataset.to_string())
            .or_default()
            .extend(rows);
    }

    /// Make the next call fail with `error`. Calls queue up.
    pub fn fail_next(&self, error: BackendError) {
        self.failures.lock().push_back(error);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<BackendQuery> {
        self.executed.lock().clone()
    }

    fn answer(&self, query: &BackendQuery) -> ResultSet {
        let rows = self.rows.read();
        let source = query
            .datasets
            .first()
            .and_then(|d| rows.get(d))
            .map(Vec::as_slice)
            .unwrap_or_default();
        let bucket_start = query.intervals.span().map(|s| s.start());

        let selected = source
            .iter()
            .filter(|row| query.intervals.iter().any(|i| i.contains(row.timestamp)))
            .filter(|row| {
                query.filters.iter().all(|f| {
                    let hit = row
                        .dimensions
                        .get(&f.dimension)
                        .is_some_and(|v| f.values.contains(v));
                    match f.op {
                        FilterOp::In => hit,
                        FilterOp::NotIn => !hit,
                    }
                })
            })
            .map(|row| {
                let timestamp = match (query.grain, bucket_start) {
                    (TimeGrain::All, Some(start)) => start,
                    (grain, _) => grain.align(row.timestamp),
                };
                let dimensions: BTreeMap<String, String> = query
                    .dimensions
                    .iter()
                    .filter_map(|d| row.dimensions.get(d).map(|v| (d.clone(), v.clone())))
                    .collect();
                let metrics: BTreeMap<String, f64> = query
                    .metrics
                    .iter()
                    .filter_map(|m| row.metrics.get(&m.name).map(|v| (m.name.clone(), *v)))
                    .collect();
                ResultRow {
                    timestamp,
                    dimensions,
                    metrics,
                }
            })
            .collect();

        ResultSet::new(selected).combine_duplicates(&query.metrics)
    }
}

#[async_trait]
impl BackendClient for InMemoryBackend {
    async fn execute(&self, query: &BackendQuery) -> Result<ResultSet, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.executed.lock().push(query.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }
        Ok(self.answer(query))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMetadataSource {
    segments: RwLock<HashMap<String, Vec<SegmentInfo>>>,
    dimension_values: RwLock<HashMap<(String, String), Vec<String>>>,
    /// Datasets whose fetches fail with a transport error
    failing: RwLock<HashSet<String>>,
    calls: AtomicU64,
}

impl InMemoryMetadataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_segments(&self, dataset: &str, segments: Vec<SegmentInfo>) {
        self.segments.write().insert(dataset.to_string(), segments);
    }

    pub fn set_dimension_values(&self, dataset: &str, dimension: &str, values: Vec<String>) {
        self.dimension_values
            .write()
            .insert((dataset.to_string(), dimension.to_string()), values);
    }

    pub fn fail_dataset(&self, dataset: &str) {
        self.failing.write().insert(dataset.to_string());
    }

    pub fn recover_dataset(&self, dataset: &str) {
        self.failing.write().remove(dataset);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self, dataset: &str) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.read().contains(dataset) {
            return Err(BackendError::Transport(format!(
                "coordinator unreachable for '{}'",
                dataset
            )));
        }
        Ok(())
    }

    fn segments_of(&self, dataset: &str) -> Result<Vec<SegmentInfo>, BackendError> {
        self.segments
            .read()
            .get(dataset)
            .cloned()
            .ok_or_else(|| BackendError::Rejected(format!("unknown datasource '{}'", dataset)))
    }
}

#[async_trait]
impl MetadataSource for InMemoryMetadataSource {
    async fn fetch_segments(&self, dataset: &str) -> Result<AvailabilityRecord, BackendError> {
        self.check(dataset)?;
        let segments = self.segments_of(dataset)?;
        Ok(AvailabilityRecord::from_intervals(
            segments.iter().map(|s| s.interval).collect(),
        ))
    }

    async fn fetch_datasource_metadata(
        &self,
        dataset: &str,
    ) -> Result<Vec<SegmentInfo>, BackendError> {
        self.check(dataset)?;
        self.segments_of(dataset)
    }

    async fn fetch_dimension_values(
        &self,
        dataset: &str,
        dimension: &str,
    ) -> Result<Vec<String>, BackendError> {
        self.check(dataset)?;
        Ok(self
            .dimension_values
            .read()
            .get(&(dataset.to_string(), dimension.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Filter, QueryRole};
    use crate::table::{Aggregation, Metric};
    use chrono::{DateTime, Utc};

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn query(grain: TimeGrain, dimensions: &[&str], intervals: &str) -> BackendQuery {
        BackendQuery {
            table: "hourly".into(),
            datasets: vec!["hourly".into()],
            grain,
            dimensions: dimensions.iter().map(|d| d.to_string()).collect(),
            metrics: vec![Metric::new("views", Aggregation::LongSum)],
            filters: vec![],
            intervals: intervals.parse().unwrap(),
            role: QueryRole::Primary,
        }
    }

    fn backend() -> InMemoryBackend {
        let backend = InMemoryBackend::new();
        backend.insert_rows(
            "hourly",
            vec![
                ResultRow::new(ts("2024-01-01T01:00:00Z")).with_dimension("country", "us").with_metric("views", 1.0),
                ResultRow::new(ts("2024-01-01T02:00:00Z")).with_dimension("country", "us").with_metric("views", 2.0),
                ResultRow::new(ts("2024-01-01T03:00:00Z")).with_dimension("country", "de").with_metric("views", 4.0),
                ResultRow::new(ts("2024-01-02T01:00:00Z")).with_dimension("country", "us").with_metric("views", 8.0),
            ],
        );
        backend
    }

    #[tokio::test]
    async fn test_rolls_up_to_grain_and_dimensions() {
        let backend = backend();
        let rs = backend
            .execute(&query(TimeGrain::Day, &[], "2024-01-01/2024-01-03"))
            .await
            .unwrap();
        assert_eq!(rs.len(), 2);
        assert_eq!(rs.rows[0].metrics["views"], 7.0);
        assert_eq!(rs.rows[1].metrics["views"], 8.0);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_applies_interval_and_filters() {
        let backend = backend();
        let mut q = query(TimeGrain::Day, &["country"], "2024-01-01/2024-01-02");
        q.filters.push(Filter::not_in("country", ["de"]));
        let rs = backend.execute(&q).await.unwrap();
        assert_eq!(rs.len(), 1);
        assert_eq!(rs.rows[0].dimensions["country"], "us");
        assert_eq!(rs.rows[0].metrics["views"], 3.0);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed_in_order() {
        let backend = backend();
        backend.fail_next(BackendError::Transport("reset".into()));
        let q = query(TimeGrain::Day, &[], "2024-01-01/2024-01-02");
        assert!(backend.execute(&q).await.is_err());
        assert!(backend.execute(&q).await.is_ok());
        assert_eq!(backend.executed().len(), 2);
    }

    #[tokio::test]
    async fn test_metadata_source_failures_are_per_dataset() {
        let source = InMemoryMetadataSource::new();
        let segment = SegmentInfo {
            interval: "2024-01-01/2024-01-02".parse().unwrap(),
            version: "v1".into(),
            partition: 0,
        };
        source.set_segments("a", vec![segment.clone()]);
        source.set_segments("b", vec![segment]);
        source.fail_dataset("a");

        assert!(matches!(
            source.fetch_segments("a").await,
            Err(BackendError::Transport(_))
        ));
        assert_eq!(source.fetch_datasource_metadata("b").await.unwrap().len(), 1);
        assert!(matches!(
            source.fetch_segments("c").await,
            Err(BackendError::Rejected(_))
        ));
    }
}
