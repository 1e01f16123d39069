//! Availability loader backed by coordinator availability documents

use super::{for_each_dataset, FetchRetry, Loader, LoaderSchedule, LoaderTracker};
use crate::backend::{BackendError, MetadataSource};
use crate::clock::Clock;
use crate::metadata::MetadataStore;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

pub struct SegmentMetadataLoader {
    source: Arc<dyn MetadataSource>,
    store: Arc<MetadataStore>,
    datasets: Vec<String>,
    schedule: LoaderSchedule,
    retry: FetchRetry,
    tracker: LoaderTracker,
}

impl SegmentMetadataLoader {
    pub fn new(
        source: Arc<dyn MetadataSource>,
        store: Arc<MetadataStore>,
        datasets: Vec<String>,
        schedule: LoaderSchedule,
    ) -> Self {
        Self {
            source,
            store,
            datasets,
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
}

#[async_trait]
impl Loader for SegmentMetadataLoader {
    fn name(&self) -> &str {
        "segment_metadata"
    }

    fn schedule(&self) -> LoaderSchedule {
        self.schedule
    }

    fn tracker(&self) -> &LoaderTracker {
        &self.tracker
    }

    async fn run(&self) -> Result<()> {
        let result = for_each_dataset(self.name(), &self.datasets, |dataset| async move {
            let record = self
                .retry
                .run(|| self.source.fetch_segments(&dataset))
                .await?;
            self.store.update_availability(&dataset, record);
            Ok::<_, BackendError>(())
        })
        .await;
        if result.is_ok() {
            info!(datasets = self.datasets.len(), "Loaded dataset availability");
        }
        result
    }
}
