//! Metadata loaders
//!
//! Loaders pull availability, segment lists and dimension values from the
//! backend into the `MetadataStore`. Each loader runs on its own schedule
//! under a `LoaderScheduler`. A failed fetch for one dataset is retried,
//! then recorded, and never disturbs what other datasets already have.

mod datasource;
mod dimension;
mod health;
mod scheduler;
mod segment;

pub use datasource::DataSourceMetadataLoader;
pub use dimension::{DimensionTarget, DimensionValuesLoader};
pub use health::{
    DimensionsLoadedHealthCheck, HealthCheck, HealthRegistry, HealthReport, HealthStatus,
    LoaderHealthCheck,
};
pub use scheduler::LoaderScheduler;
pub use segment::SegmentMetadataLoader;

use crate::backend::{BackendError, MetadataSource};
use crate::clock::{Clock, MonotonicClock};
use crate::config::LoaderConfig;
use crate::metadata::MetadataStore;
use crate::table::PhysicalTableDictionary;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use parking_lot::RwLock;
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tracing::{info_span, warn, Instrument};

/// When a loader first runs and how often it repeats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderSchedule {
    pub initial_delay: Duration,
    /// `None` runs once
    pub period: Option<Duration>,
}

impl LoaderSchedule {
    pub fn periodic(initial_delay: Duration, period: Duration) -> Self {
        Self {
            initial_delay,
            period: Some(period),
        }
    }

    pub fn once(initial_delay: Duration) -> Self {
        Self {
            initial_delay,
            period: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoaderFailure {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Observable bookkeeping of one loader
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoaderState {
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<LoaderFailure>,
    pub runs: u64,
    pub failures: u64,
}

/// Holds a loader's state and the clock it is stamped with
pub struct LoaderTracker {
    state: RwLock<LoaderState>,
    clock: Arc<dyn Clock>,
}

impl LoaderTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(LoaderState::default()),
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn snapshot(&self) -> LoaderState {
        self.state.read().clone()
    }

    /// Record a finished run that started at `started`.
    pub fn record(&self, started: DateTime<Utc>, outcome: &Result<()>) {
        let mut state = self.state.write();
        state.last_run = Some(started);
        state.runs += 1;
        match outcome {
            Ok(()) => state.last_success = Some(started),
            Err(e) => {
                state.failures += 1;
                state.last_failure = Some(LoaderFailure {
                    at: started,
                    message: e.to_string(),
                });
            }
        }
    }
}

impl Default for LoaderTracker {
    fn default() -> Self {
        Self::new(Arc::new(MonotonicClock::new()))
    }
}

/// A periodic metadata task
#[async_trait]
pub trait Loader: Send + Sync {
    fn name(&self) -> &str;

    fn schedule(&self) -> LoaderSchedule;

    /// One full pass over the loader's datasets.
    async fn run(&self) -> Result<()>;

    fn tracker(&self) -> &LoaderTracker;

    fn state(&self) -> LoaderState {
        self.tracker().snapshot()
    }

    /// `run` plus bookkeeping: last run, last success, last failure.
    async fn tick(&self) -> Result<()> {
        let tracker = self.tracker();
        let started = tracker.now();
        let timer = Instant::now();
        let outcome = self
            .run()
            .instrument(info_span!("loader.tick", loader = self.name()))
            .await;
        tracker.record(started, &outcome);
        record_run(
            self.name(),
            if outcome.is_ok() { "success" } else { "failure" },
            timer.elapsed().as_secs_f64(),
        );
        outcome
    }
}

/// Retry policy for one dataset fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRetry {
    /// Attempts after the first
    pub max_retries: u32,
    /// Delay before retry `n` is `backoff × n`
    pub backoff: Duration,
}

impl FetchRetry {
    pub fn from_config(config: &LoaderConfig) -> Self {
        Self {
            max_retries: config.fetch_retries,
            backoff: config.fetch_backoff,
        }
    }

    /// Run `fetch`, retrying transport failures.
    pub async fn run<T, F, Fut>(&self, mut fetch: F) -> std::result::Result<T, BackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, BackendError>>,
    {
        let mut retry = 0;
        loop {
            match fetch().await {
                Err(e) if e.is_transient() && retry < self.max_retries => {
                    retry += 1;
                    tokio::time::sleep(self.backoff.saturating_mul(retry)).await;
                }
                outcome => return outcome,
            }
        }
    }
}

impl Default for FetchRetry {
    fn default() -> Self {
        Self::from_config(&LoaderConfig::default())
    }
}

/// Load every dataset independently; report all failures together.
async fn for_each_dataset<F, Fut>(loader: &str, datasets: &[String], mut load: F) -> Result<()>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = std::result::Result<(), BackendError>>,
{
    let mut failed = Vec::new();
    for dataset in datasets {
        if let Err(e) = load(dataset.clone()).await {
            warn!(loader, dataset = %dataset, error = %e, "Dataset load failed");
            failed.push(format!("{} ({})", dataset, e));
        }
    }
    if failed.is_empty() {
        Ok(())
    } else {
        Err(Error::Metadata(format!(
            "{} of {} datasets failed to load: {}",
            failed.len(),
            datasets.len(),
            failed.join("; ")
        )))
    }
}

/// Which loader owns dataset availability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AvailabilitySource {
    /// Availability documents published by the coordinator
    #[default]
    Coordinator,
    /// Derived from full segment lists
    SegmentList,
}

impl std::str::FromStr for AvailabilitySource {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "coordinator" => Ok(Self::Coordinator),
            "segments" | "segment_list" => Ok(Self::SegmentList),
            other => Err(format!("unknown availability source '{}'", other)),
        }
    }
}

/// Loaders covering every dataset and dimension in `dictionary`.
///
/// Exactly one loader writes availability, chosen by
/// `config.availability_source`, so version tokens stay stable between runs.
pub fn default_loaders(
    config: &LoaderConfig,
    dictionary: &PhysicalTableDictionary,
    source: Arc<dyn MetadataSource>,
    store: Arc<MetadataStore>,
) -> Vec<Arc<dyn Loader>> {
    let datasets = dictionary.datasets();
    let retry = FetchRetry::from_config(config);
    let availability: Arc<dyn Loader> = match config.availability_source {
        AvailabilitySource::Coordinator => Arc::new(
            SegmentMetadataLoader::new(
                Arc::clone(&source),
                Arc::clone(&store),
                datasets,
                LoaderSchedule::periodic(config.initial_delay, config.segment_period),
            )
            .with_retry(retry),
        ),
        AvailabilitySource::SegmentList => Arc::new(
            DataSourceMetadataLoader::new(
                Arc::clone(&source),
                Arc::clone(&store),
                datasets,
                LoaderSchedule::periodic(config.initial_delay, config.datasource_period),
            )
            .with_retry(retry),
        ),
    };
    let dimensions: Arc<dyn Loader> = Arc::new(
        DimensionValuesLoader::new(
            source,
            store,
            DimensionTarget::from_dictionary(dictionary),
            LoaderSchedule::periodic(config.initial_delay, config.dimension_period),
        )
        .with_retry(retry),
    );
    vec![availability, dimensions]
}

struct LoaderInstruments {
    runs: Counter<u64>,
    duration_seconds: Histogram<f64>,
}

fn instruments() -> &'static LoaderInstruments {
    static INSTRUMENTS: OnceLock<LoaderInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("strata.loader");
        LoaderInstruments {
            runs: meter
                .u64_counter("strata.loader.runs")
                .with_description("Metadata loader runs by outcome")
                .init(),
            duration_seconds: meter
                .f64_histogram("strata.loader.duration")
                .with_description("Metadata loader run duration")
                .with_unit("s")
                .init(),
        }
    })
}

fn record_run(loader: &str, outcome: &'static str, duration_seconds: f64) {
    let i = instruments();
    let attrs = [
        KeyValue::new("loader", loader.to_string()),
        KeyValue::new("outcome", outcome),
    ];
    i.runs.add(1, &attrs);
    i.duration_seconds.record(duration_seconds, &attrs);
}
