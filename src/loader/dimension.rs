//! Dimension value loader
//!
//! Collects the distinct values of each dimension across every dataset that
//! carries it. A pass where every dataset answered replaces the stored set; a
//! pass with failures only adds values, so a flaky dataset never shrinks the
//! known cardinality.

use super::{FetchRetry, Loader, LoaderSchedule, LoaderTracker};
use crate::backend::MetadataSource;
use crate::clock::Clock;
use crate::metadata::MetadataStore;
use crate::table::PhysicalTableDictionary;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// One dimension and the datasets its values are read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionTarget {
    pub dimension: String,
    pub datasets: Vec<String>,
}

impl DimensionTarget {
    pub fn new<I, S>(dimension: impl Into<String>, datasets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            dimension: dimension.into(),
            datasets: datasets.into_iter().map(Into::into).collect(),
        }
    }

    /// Every dictionary dimension, paired with the datasets of the tables declaring it.
    pub fn from_dictionary(dictionary: &PhysicalTableDictionary) -> Vec<Self> {
        let mut by_dimension: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for table in dictionary.iter() {
            for dimension in &table.dimensions {
                by_dimension
                    .entry(dimension.as_str())
                    .or_default()
                    .extend(table.datasets.iter().map(String::as_str));
            }
        }
        by_dimension
            .into_iter()
            .map(|(dimension, datasets)| Self::new(dimension, datasets))
            .collect()
    }
}

pub struct DimensionValuesLoader {
    source: Arc<dyn MetadataSource>,
    store: Arc<MetadataStore>,
    targets: Vec<DimensionTarget>,
    schedule: LoaderSchedule,
    retry: FetchRetry,
    tracker: LoaderTracker,
}

impl DimensionValuesLoader {
    pub fn new(
        source: Arc<dyn MetadataSource>,
        store: Arc<MetadataStore>,
        targets: Vec<DimensionTarget>,
        schedule: LoaderSchedule,
    ) -> Self {
        Self {
            source,
            store,
            targets,
            schedule,
            retry: FetchRetry::default(),
            tracker: LoaderTracker::default(),
        }
    }

    pub fn with_retry(mut self, retry: FetchRetry) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.tracker = LoaderTracker::new(clock);
        self
    }

    /// Load one dimension; returns the failed datasets.
    async fn load_target(&self, target: &DimensionTarget) -> Vec<String> {
        let mut values = BTreeSet::new();
        let mut failed = Vec::new();
        for dataset in &target.datasets {
            let fetched = self
                .retry
                .run(|| self.source.fetch_dimension_values(dataset, &target.dimension))
                .await;
            match fetched {
                Ok(fetched) => values.extend(fetched),
                Err(e) => {
                    warn!(
                        dimension = %target.dimension,
                        dataset = %dataset,
                        error = %e,
                        "Dimension value fetch failed"
                    );
                    failed.push(format!("{}/{} ({})", target.dimension, dataset, e));
                }
            }
        }

        let values_store = self.store.dimension_values();
        if failed.is_empty() {
            debug!(dimension = %target.dimension, values = values.len(), "Replaced dimension values");
            values_store.update(&target.dimension, values);
        } else {
            values_store.extend(&target.dimension, values);
        }
        failed
    }
}

#[async_trait]
impl Loader for DimensionValuesLoader {
    fn name(&self) -> &str {
        "dimension_values"
    }

    fn schedule(&self) -> LoaderSchedule {
        self.schedule
    }

    fn tracker(&self) -> &LoaderTracker {
        &self.tracker
    }

    async fn run(&self) -> Result<()> {
        let mut failed = Vec::new();
        for target in &self.targets {
            failed.extend(self.load_target(target).await);
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::Metadata(format!(
                "{} dimension fetches failed: {}",
                failed.len(),
                failed.join("; ")
            )))
        }
    }
}
