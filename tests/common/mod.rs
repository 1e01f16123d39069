//! Shared fixtures for integration tests

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use strata::backend::InMemoryBackend;
use strata::cache::MemoryCache;
use strata::config::GatewayConfig;
use strata::metadata::{AvailabilityRecord, MetadataStore};
use strata::pipeline::RequestPipeline;
use strata::query::{LogicalQuery, ResultRow};
use strata::table::{Aggregation, PhysicalTable, PhysicalTableDictionary};
use strata::time::{IntervalSet, TimeGrain};

pub fn set(intervals: &str) -> IntervalSet {
    intervals.parse().unwrap()
}

pub fn ts(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

/// One daily table behind the `traffic` logical table.
pub fn dictionary() -> Arc<PhysicalTableDictionary> {
    let dictionary = PhysicalTableDictionary::new(vec![PhysicalTable::new(
        "traffic_daily",
        TimeGrain::Day,
    )
    .with_dimensions(["country", "device"])
    .with_metric("views", Aggregation::LongSum)
    .with_metric("users", Aggregation::Sketch)])
    .unwrap()
    .with_logical_table("traffic", ["traffic_daily"])
    .unwrap();
    Arc::new(dictionary)
}

pub fn store_with_availability(intervals: &str) -> Arc<MetadataStore> {
    let store = Arc::new(MetadataStore::new());
    store.update_availability("traffic_daily", AvailabilityRecord::from_intervals(set(intervals)));
    store
        .dimension_values()
        .update("country", ["us", "de"].map(String::from));
    store
}

/// Two countries, one row each per day of January 2024.
pub fn backend() -> InMemoryBackend {
    let backend = InMemoryBackend::new();
    seed(&backend);
    backend
}

pub fn seed(backend: &InMemoryBackend) {
    let start = ts("2024-01-01T00:00:00Z");
    let rows = (0..31).flat_map(|day| {
        let at = start + Duration::days(day);
        [
            ResultRow::new(at)
                .with_dimension("country", "us")
                .with_metric("views", 10.0 + day as f64),
            ResultRow::new(at)
                .with_dimension("country", "de")
                .with_metric("views", 1.0),
        ]
    });
    backend.insert_rows("traffic_daily", rows);
}

pub fn query(intervals: &str) -> LogicalQuery {
    LogicalQuery::new("traffic", TimeGrain::Day, set(intervals))
        .with_dimensions(["country"])
        .with_metrics(["views"])
}

pub fn pipeline(
    config: &GatewayConfig,
    store: Arc<MetadataStore>,
    backend: Arc<InMemoryBackend>,
) -> RequestPipeline {
    let cache = Arc::new(MemoryCache::new(16 * 1024 * 1024, std::time::Duration::from_secs(60)));
    RequestPipeline::new(config, dictionary(), store, cache, backend)
}
