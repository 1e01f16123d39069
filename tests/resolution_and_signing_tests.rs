//! Table resolution from a JSON dictionary and the signatures it produces

mod common;

use common::set;
use std::sync::Arc;
use strata::metadata::{AvailabilityRecord, MetadataStore};
use strata::query::{LogicalQuery, QuerySigningService};
use strata::table::{DefaultTableResolver, PhysicalTableDictionary, PhysicalTableResolver};
use strata::time::TimeGrain;
use strata::{Error, ResolutionError};

const DICTIONARY: &str = r#"{
    "logical_tables": { "network": ["net_b_daily", "net_a_daily", "net_hourly", "net_joined"] },
    "tables": [
        {
            "name": "net_b_daily",
            "grain": "day",
            "dimensions": ["country"],
            "metrics": [{ "name": "views", "aggregation": "longSum" }],
            "datasets": ["net_b_daily"]
        },
        {
            "name": "net_a_daily",
            "grain": "day",
            "dimensions": ["country"],
            "metrics": [{ "name": "views", "aggregation": "longSum" }],
            "datasets": ["net_a_daily"]
        },
        {
            "name": "net_hourly",
            "grain": "hour",
            "dimensions": ["country", "device"],
            "metrics": [{ "name": "views", "aggregation": "longSum" }],
            "datasets": ["net_hourly"]
        },
        {
            "name": "net_joined",
            "grain": "day",
            "dimensions": ["country", "device", "browser"],
            "metrics": [{ "name": "views", "aggregation": "longSum" }],
            "datasets": ["joined_left", "joined_right"]
        }
    ]
}"#;

fn setup() -> (Arc<PhysicalTableDictionary>, Arc<MetadataStore>) {
    let dictionary = Arc::new(PhysicalTableDictionary::from_json(DICTIONARY).unwrap());
    let store = Arc::new(MetadataStore::new());
    for dataset in dictionary.datasets() {
        store.update_availability(
            &dataset,
            AvailabilityRecord::from_intervals(set("2024-01-01/2024-03-01")),
        );
    }
    (dictionary, store)
}

fn query(dimensions: &[&str]) -> LogicalQuery {
    LogicalQuery::new("network", TimeGrain::Day, set("2024-01-01/2024-01-15"))
        .with_dimensions(dimensions.iter().copied())
        .with_metrics(["views"])
}

#[test]
fn test_identical_candidates_resolve_by_name() {
    let (dictionary, store) = setup();
    let resolver = DefaultTableResolver::new(dictionary);
    let availability = store.snapshot_all();

    for _ in 0..5 {
        let resolution = resolver.resolve(&query(&["country"]), &availability).unwrap();
        assert_eq!(resolution.tables.len(), 1);
        assert_eq!(resolution.tables[0].table.name, "net_a_daily");
    }
}

#[test]
fn test_wider_surface_resolves_to_table_carrying_it() {
    let (dictionary, store) = setup();
    let resolver = DefaultTableResolver::new(dictionary);
    let availability = store.snapshot_all();

    let device = resolver.resolve(&query(&["device"]), &availability).unwrap();
    assert_eq!(device.tables[0].table.name, "net_joined", "day grain beats hour grain");

    let err = resolver.resolve(&query(&["os"]), &availability).unwrap_err();
    match err {
        Error::Resolution(ResolutionError::NoMatchingTable { dimensions, .. }) => {
            assert_eq!(dimensions, vec!["os".to_string()]);
        }
        other => panic!("expected resolution failure, got {other:?}"),
    }
}

#[test]
fn test_signature_is_stable_across_services() {
    let (dictionary, store) = setup();
    let resolver = DefaultTableResolver::new(dictionary);
    let q = query(&["country"]);
    let resolution = resolver.resolve(&q, &store.snapshot_all()).unwrap();

    let first = QuerySigningService::new()
        .sign(&q, &resolution, &store.snapshot_all(), false)
        .unwrap();
    let second = QuerySigningService::new()
        .sign(&q, &resolution, &store.snapshot_all(), false)
        .unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_signature_tracks_only_contributing_datasets() {
    let (dictionary, store) = setup();
    let resolver = DefaultTableResolver::new(dictionary);
    let signer = QuerySigningService::new();
    let q = query(&["device"]);
    let resolution = resolver.resolve(&q, &store.snapshot_all()).unwrap();
    let before = signer
        .sign(&q, &resolution, &store.snapshot_all(), false)
        .unwrap();

    // Unrelated dataset
    store.update_availability(
        "net_hourly",
        AvailabilityRecord::from_intervals(set("2024-01-01/2024-04-01")),
    );
    assert_eq!(
        signer
            .sign(&q, &resolution, &store.snapshot_all(), false)
            .unwrap(),
        before
    );

    // Either side of a joined table
    store.update_availability(
        "joined_right",
        AvailabilityRecord::from_intervals(set("2024-01-01/2024-04-01")),
    );
    let after = signer
        .sign(&q, &resolution, &store.snapshot_all(), false)
        .unwrap();
    assert_ne!(after, before);
}

#[test]
fn test_dictionary_loads_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tables.json");
    std::fs::write(&path, DICTIONARY).unwrap();

    let dictionary = PhysicalTableDictionary::from_path(&path).unwrap();
    assert!(dictionary.get("net_joined").is_some());

    let missing = PhysicalTableDictionary::from_path(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(missing, Error::Config(ref msg) if msg.contains("absent.json")));
}
