//! Segment-list loader
//!
//! Stores each dataset's full segment list and derives its availability from
//! it, with a version token digested from the segment ids.

use super::{for_each_dataset, FetchRetry, Loader, LoaderSchedule, LoaderTracker};
use crate::backend::{BackendError, MetadataSource};
use crate::clock::Clock;
use crate::metadata::MetadataStore;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub struct DataSourceMetadataLoader {
    source: Arc<dyn MetadataSource>,
    store: Arc<MetadataStore>,
    datasets: Vec<String>,
    schedule: LoaderSchedule,
    retry: FetchRetry,
    tracker: LoaderTracker,
}

impl DataSourceMetadataLoader {
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
impl Loader for DataSourceMetadataLoader {
    fn name(&self) -> &str {
        "datasource_metadata"
    }

    fn schedule(&self) -> LoaderSchedule {
        self.schedule
    }

    fn tracker(&self) -> &LoaderTracker {
        &self.tracker
    }

    async fn run(&self) -> Result<()> {
        for_each_dataset(self.name(), &self.datasets, |dataset| async move {
            let segments = self
                .retry
                .run(|| self.source.fetch_datasource_metadata(&dataset))
                .await?;
            debug!(dataset = %dataset, segments = segments.len(), "Loaded segment list");
            // Replaces the segment list and the availability derived from it
            self.store.update_segments(&dataset, segments);
            Ok::<_, BackendError>(())
        })
        .await
    }
}
