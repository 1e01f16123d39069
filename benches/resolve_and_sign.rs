//! Resolution and signing latency
//!
//! Both run on every request before the cache is consulted.

use strata::metadata::{AvailabilityRecord, MetadataStore};
use strata::query::{LogicalQuery, QuerySigningService};
use strata::table::{
    Aggregation, DefaultTableResolver, PhysicalTable, PhysicalTableDictionary,
    PhysicalTableResolver,
};
use strata::time::{IntervalSet, TimeGrain};

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;

const TABLES: usize = 40;

fn setup() -> (Arc<PhysicalTableDictionary>, Arc<MetadataStore>) {
    let mut tables = Vec::with_capacity(TABLES);
    for i in 0..TABLES {
        let grain = if i % 2 == 0 { TimeGrain::Hour } else { TimeGrain::Day };
        let dimensions: Vec<String> = (0..=(i % 8)).map(|d| format!("dim_{}", d)).collect();
        tables.push(
            PhysicalTable::new(format!("table_{:02}", i), grain)
                .with_dimensions(dimensions)
                .with_metric("page_views", Aggregation::LongSum)
                .with_metric("users", Aggregation::Sketch),
        );
    }
    let names: Vec<String> = tables.iter().map(|t| t.name.clone()).collect();
    let dictionary = PhysicalTableDictionary::new(tables)
        .unwrap()
        .with_logical_table("network", names)
        .unwrap();

    let store = Arc::new(MetadataStore::new());
    let available: IntervalSet = "2023-01-01/2024-06-01".parse().unwrap();
    for dataset in dictionary.datasets() {
        store.update_availability(&dataset, AvailabilityRecord::from_intervals(available.clone()));
    }
    (Arc::new(dictionary), store)
}

fn query() -> LogicalQuery {
    LogicalQuery::new(
        "network",
        TimeGrain::Day,
        "2024-01-01/2024-03-01".parse().unwrap(),
    )
    .with_dimensions(["dim_0", "dim_3"])
    .with_metrics(["page_views", "users"])
}

fn benchmark_resolve(c: &mut Criterion) {
    let (dictionary, store) = setup();
    let resolver = DefaultTableResolver::new(Arc::clone(&dictionary));
    let query = query();

    let mut group = c.benchmark_group("resolve");
    group.throughput(Throughput::Elements(1));
    group.bench_function("forty_tables", |b| {
        b.iter(|| {
            let availability = store.snapshot(dictionary.datasets());
            black_box(resolver.resolve(black_box(&query), &availability).unwrap())
        });
    });
    group.finish();
}

fn benchmark_sign(c: &mut Criterion) {
    let (dictionary, store) = setup();
    let resolver = DefaultTableResolver::new(Arc::clone(&dictionary));
    let signer = QuerySigningService::new();
    let query = query();
    let availability = store.snapshot(dictionary.datasets());
    let resolution = resolver.resolve(&query, &availability).unwrap();

    let mut group = c.benchmark_group("sign");
    group.throughput(Throughput::Elements(1));
    group.bench_function("single_table", |b| {
        b.iter(|| {
            black_box(
                signer
                    .sign(black_box(&query), &resolution, &availability, false)
                    .unwrap(),
            )
        });
    });
    group.finish();
}

criterion_group!(benches, benchmark_resolve, benchmark_sign);

criterion_main!(benches);
