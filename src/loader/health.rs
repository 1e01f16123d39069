//! Health checks over loader freshness
//!
//! A gateway whose metadata stopped refreshing still answers, but from a view
//! of availability that drifts from the backend. `/health` reports it.

use super::{DimensionTarget, Loader};
use crate::clock::Clock;
use crate::metadata::MetadataStore;
use crate::table::PhysicalTableDictionary;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthStatus {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            message: None,
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: Some(message.into()),
        }
    }
}

pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self) -> HealthStatus;
}

/// Unhealthy until the loader succeeds, and again once its last success is
/// older than `staleness`.
pub struct LoaderHealthCheck {
    loader: Arc<dyn Loader>,
    staleness: Duration,
    clock: Arc<dyn Clock>,
}

impl LoaderHealthCheck {
    pub fn new(loader: Arc<dyn Loader>, staleness: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            loader,
            staleness,
            clock,
        }
    }
}

impl HealthCheck for LoaderHealthCheck {
    fn name(&self) -> &str {
        self.loader.name()
    }

    fn check(&self) -> HealthStatus {
        let state = self.loader.state();
        let Some(last_success) = state.last_success else {
            return match state.last_failure {
                Some(failure) => HealthStatus::unhealthy(format!(
                    "never succeeded, last failure: {}",
                    failure.message
                )),
                None => HealthStatus::unhealthy("not run yet"),
            };
        };
        let age = (self.clock.now() - last_success).to_std().unwrap_or_default();
        if age > self.staleness {
            HealthStatus::unhealthy(format!(
                "last success {}s ago exceeds {}s",
                age.as_secs(),
                self.staleness.as_secs()
            ))
        } else {
            HealthStatus::healthy()
        }
    }
}

/// Unhealthy while any dictionary dimension has no values in the store.
pub struct DimensionsLoadedHealthCheck {
    dimensions: Vec<String>,
    store: Arc<MetadataStore>,
}

impl DimensionsLoadedHealthCheck {
    pub fn new(dictionary: &PhysicalTableDictionary, store: Arc<MetadataStore>) -> Self {
        Self {
            dimensions: DimensionTarget::from_dictionary(dictionary)
                .into_iter()
                .map(|target| target.dimension)
                .collect(),
            store,
        }
    }
}

impl HealthCheck for DimensionsLoadedHealthCheck {
    fn name(&self) -> &str {
        "dimensions_loaded"
    }

    fn check(&self) -> HealthStatus {
        let values = self.store.dimension_values();
        let missing: Vec<&str> = self
            .dimensions
            .iter()
            .filter(|dimension| values.cardinality(dimension).is_none())
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            HealthStatus::healthy()
        } else {
            HealthStatus::unhealthy(format!("no values loaded for {}", missing.join(", ")))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub checks: BTreeMap<String, HealthStatus>,
}

/// Named checks, evaluated together
#[derive(Default)]
pub struct HealthRegistry {
    checks: RwLock<Vec<Arc<dyn HealthCheck>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, check: Arc<dyn HealthCheck>) {
        self.checks.write().push(check);
    }

    pub fn len(&self) -> usize {
        self.checks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.read().is_empty()
    }

    pub fn report(&self) -> HealthReport {
        let checks: BTreeMap<String, HealthStatus> = self
            .checks
            .read()
            .iter()
            .map(|c| (c.name().to_string(), c.check()))
            .collect();
        HealthReport {
            healthy: checks.values().all(|s| s.healthy),
            checks,
        }
    }
}
