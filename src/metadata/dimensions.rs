//! Distinct dimension values, as loaded from the backend

use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct DimensionValueStore {
    values: DashMap<String, Arc<BTreeSet<String>>>,
}

impl DimensionValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the known values of a dimension.
    pub fn update(&self, dimension: &str, values: impl IntoIterator<Item = String>) {
        self.values
            .insert(dimension.to_string(), Arc::new(values.into_iter().collect()));
    }

    /// Merge values reported for one dataset into what other datasets reported.
    pub fn extend(&self, dimension: &str, values: impl IntoIterator<Item = String>) {
        let mut entry = self.values.entry(dimension.to_string()).or_default();
        let mut merged: BTreeSet<String> = (**entry.value()).clone();
        merged.extend(values);
        *entry.value_mut() = Arc::new(merged);
    }

    pub fn values(&self, dimension: &str) -> Option<Arc<BTreeSet<String>>> {
        self.values.get(dimension).map(|e| Arc::clone(e.value()))
    }

    /// Number of distinct values, if the dimension has been loaded.
    pub fn cardinality(&self, dimension: &str) -> Option<u64> {
        self.values.get(dimension).map(|e| e.value().len() as u64)
    }

    pub fn dimensions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.values.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
