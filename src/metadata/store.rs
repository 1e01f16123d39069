//! In-memory metadata store with atomic per-dataset snapshots

use super::{AvailabilityRecord, DimensionValueStore, SegmentInfo};
use crate::time::IntervalSet;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Metadata store
///
/// Each dataset maps to an `Arc` snapshot. Writers swap the whole snapshot,
/// so a reader holding an `Arc` always sees one complete record, never a mix
/// of old and new state. Reads never touch the network.
#[derive(Debug)]
pub struct MetadataStore {
    /// Availability by dataset
    availability: DashMap<String, Arc<AvailabilityRecord>>,
    /// Last segment list reported per dataset
    segments: DashMap<String, Arc<Vec<SegmentInfo>>>,
    /// Distinct values per dimension
    dimensions: DimensionValueStore,
    /// Shared record returned for unknown datasets
    empty: Arc<AvailabilityRecord>,
    /// Number of availability replacements since start
    updates: AtomicU64,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self {
            availability: DashMap::new(),
            segments: DashMap::new(),
            dimensions: DimensionValueStore::new(),
            empty: Arc::new(AvailabilityRecord::empty()),
            updates: AtomicU64::new(0),
        }
    }

    /// Current snapshot for a dataset; empty when nothing was loaded yet.
    pub fn availability(&self, dataset: &str) -> Arc<AvailabilityRecord> {
        self.availability
            .get(dataset)
            .map(|entry| Arc::clone(entry.value()))
            .unwrap_or_else(|| Arc::clone(&self.empty))
    }

    /// Replace a dataset's availability snapshot.
    pub fn update_availability(&self, dataset: &str, record: AvailabilityRecord) {
        debug!(
            dataset = dataset,
            intervals = record.intervals.len(),
            version = %record.version,
            "Replacing availability snapshot"
        );
        self.availability
            .insert(dataset.to_string(), Arc::new(record));
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    /// Intervals available in every one of `datasets`.
    pub fn joint_availability(&self, datasets: &[String]) -> IntervalSet {
        intersect_all(datasets.iter().map(|d| self.availability(d)))
    }

    /// Capture the current records of `datasets` together.
    ///
    /// Everything derived from one snapshot agrees on availability even
    /// while loaders keep writing.
    pub fn snapshot<I, S>(&self, datasets: I) -> AvailabilitySnapshot
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let records = datasets
            .into_iter()
            .map(|d| (d.as_ref().to_string(), self.availability(d.as_ref())))
            .collect();
        AvailabilitySnapshot {
            records,
            empty: Arc::clone(&self.empty),
        }
    }

    /// Snapshot of every loaded dataset.
    pub fn snapshot_all(&self) -> AvailabilitySnapshot {
        self.snapshot(self.datasets())
    }

    /// Store a segment list and the availability derived from it.
    pub fn update_segments(&self, dataset: &str, segments: Vec<SegmentInfo>) {
        let record = AvailabilityRecord::from_segments(&segments);
        self.segments
            .insert(dataset.to_string(), Arc::new(segments));
        self.update_availability(dataset, record);
    }

    pub fn segments(&self, dataset: &str) -> Arc<Vec<SegmentInfo>> {
        self.segments
            .get(dataset)
            .map(|entry| Arc::clone(entry.value()))
            .unwrap_or_default()
    }

    /// Datasets with a loaded record, sorted.
    pub fn datasets(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .availability
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn dimension_values(&self) -> &DimensionValueStore {
        &self.dimensions
    }

    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }
}

fn intersect_all(mut records: impl Iterator<Item = Arc<AvailabilityRecord>>) -> IntervalSet {
    match records.next() {
        Some(first) => records.fold(first.intervals.clone(), |acc, r| {
            acc.intersect(&r.intervals)
        }),
        None => IntervalSet::empty(),
    }
}

/// Availability records read once and held for the life of a request
#[derive(Debug, Clone)]
pub struct AvailabilitySnapshot {
    records: BTreeMap<String, Arc<AvailabilityRecord>>,
    empty: Arc<AvailabilityRecord>,
}

impl AvailabilitySnapshot {
    /// Record captured for `dataset`; empty when it was not captured or
    /// nothing was loaded for it.
    pub fn availability(&self, dataset: &str) -> Arc<AvailabilityRecord> {
        self.records
            .get(dataset)
            .map(Arc::clone)
            .unwrap_or_else(|| Arc::clone(&self.empty))
    }

    /// Intervals available in every one of `datasets`.
    pub fn joint_availability(&self, datasets: &[String]) -> IntervalSet {
        intersect_all(datasets.iter().map(|d| self.availability(d)))
    }

    pub fn datasets(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }
}

impl Default for AvailabilitySnapshot {
    fn default() -> Self {
        Self {
            records: BTreeMap::new(),
            empty: Arc::new(AvailabilityRecord::empty()),
        }
    }
}

impl Default for MetadataStore {
    fn default() -> Self {
        Self::new()
    }
}
