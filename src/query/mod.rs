//! Query model for Strata
//!
//! - `LogicalQuery`: the backend-agnostic request, validated once on entry
//! - `BackendQuery`: what is sent to the backend for one physical table
//! - `ResultSet`: rows returned by the backend and by the pipeline
//!
//! Submodules hold the partial data handler, the signing service and the
//! weight estimator.

pub mod partial;
mod result;
pub mod signing;
pub mod weight;

pub use partial::{PartialDataHandler, PartialDataPolicy, PartialDataReport};
pub use result::{PartialDataMarker, ResultRow, ResultSet};
pub use signing::{QuerySignature, QuerySigningService, RequestedIntervals};
pub use weight::{WeightEstimate, WeightEstimator};

use crate::table::{Metric, PhysicalTableDictionary, Resolution};
use crate::time::{IntervalSet, TimeGrain};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Shape of a logical query
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryKind {
    #[default]
    Aggregate,
    /// Each offset (in request-grain periods, negative is the past) adds a
    /// baseline series attached to the primary rows.
    Lookback { offsets: Vec<i64> },
}

impl QueryKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Aggregate => "aggregate",
            Self::Lookback { .. } => "lookback",
        }
    }

    pub fn offsets(&self) -> &[i64] {
        match self {
            Self::Aggregate => &[],
            Self::Lookback { offsets } => offsets,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    In,
    NotIn,
}

/// Selector filter on one dimension
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Filter {
    pub dimension: String,
    pub op: FilterOp,
    pub values: BTreeSet<String>,
}

impl Filter {
    pub fn is_in<I, S>(dimension: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            dimension: dimension.into(),
            op: FilterOp::In,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn not_in<I, S>(dimension: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            op: FilterOp::NotIn,
            ..Self::is_in(dimension, values)
        }
    }
}

/// Backend-agnostic aggregation request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogicalQuery {
    /// Logical table the request is addressed to
    pub table: String,
    #[serde(default)]
    pub kind: QueryKind,
    #[serde(default)]
    pub dimensions: Vec<String>,
    pub metrics: Vec<String>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    pub grain: TimeGrain,
    pub intervals: IntervalSet,
}

impl LogicalQuery {
    pub fn new(table: impl Into<String>, grain: TimeGrain, intervals: IntervalSet) -> Self {
        Self {
            table: table.into(),
            kind: QueryKind::Aggregate,
            dimensions: Vec::new(),
            metrics: Vec::new(),
            filters: Vec::new(),
            grain,
            intervals,
        }
    }

    pub fn with_dimensions<I, S>(mut self, dimensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dimensions.extend(dimensions.into_iter().map(Into::into));
        self
    }

    pub fn with_metrics<I, S>(mut self, metrics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metrics.extend(metrics.into_iter().map(Into::into));
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_lookback(mut self, offsets: Vec<i64>) -> Self {
        self.kind = QueryKind::Lookback { offsets };
        self
    }

    /// Grouping dimensions plus filtered dimensions.
    pub fn required_dimensions(&self) -> BTreeSet<&str> {
        self.dimensions
            .iter()
            .map(String::as_str)
            .chain(self.filters.iter().map(|f| f.dimension.as_str()))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.metrics.is_empty() {
            return Err(Error::InvalidQuery("at least one metric is required".into()));
        }
        if self.intervals.is_empty() {
            return Err(Error::InvalidQuery("at least one interval is required".into()));
        }
        if let Some(dup) = first_duplicate(&self.metrics) {
            return Err(Error::InvalidQuery(format!("metric '{}' requested twice", dup)));
        }
        if let Some(dup) = first_duplicate(&self.dimensions) {
            return Err(Error::InvalidQuery(format!("dimension '{}' requested twice", dup)));
        }
        if let Some(filter) = self.filters.iter().find(|f| f.values.is_empty()) {
            return Err(Error::InvalidQuery(format!(
                "filter on '{}' has no values",
                filter.dimension
            )));
        }
        if let Some(interval) = self
            .intervals
            .iter()
            .find(|i| !i.is_aligned_to(self.grain))
        {
            return Err(Error::InvalidQuery(format!(
                "'{}' does not align with granularity '{}'",
                interval, self.grain
            )));
        }
        if let QueryKind::Lookback { offsets } = &self.kind {
            if offsets.is_empty() {
                return Err(Error::InvalidQuery("lookback requires at least one offset".into()));
            }
            if offsets.contains(&0) {
                return Err(Error::InvalidQuery("lookback offset must not be zero".into()));
            }
            if first_duplicate(offsets).is_some() {
                return Err(Error::InvalidQuery("lookback offsets must be distinct".into()));
            }
            if self.grain == TimeGrain::All {
                return Err(Error::InvalidQuery(
                    "lookback is not supported with granularity 'all'".into(),
                ));
            }
            if let Some(offset) = offsets
                .iter()
                .find(|&&offset| self.intervals.shift(self.grain, offset).is_none())
            {
                return Err(Error::InvalidQuery(format!(
                    "lookback offset {} moves the request outside the supported time range",
                    offset
                )));
            }
        }
        Ok(())
    }
}

fn first_duplicate<T: Eq + std::hash::Hash>(items: &[T]) -> Option<&T> {
    let mut seen = HashSet::new();
    items.iter().find(|item| !seen.insert(*item))
}

/// Why a backend query was issued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum QueryRole {
    Primary,
    /// Series shifted by `offset` request-grain periods
    Baseline { offset: i64 },
}

/// Query sent to the backend for one physical table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendQuery {
    pub table: String,
    pub datasets: Vec<String>,
    pub grain: TimeGrain,
    pub dimensions: Vec<String>,
    pub metrics: Vec<Metric>,
    pub filters: Vec<Filter>,
    pub intervals: IntervalSet,
    #[serde(flatten)]
    pub role: QueryRole,
}

impl BackendQuery {
    pub fn with_intervals(&self, intervals: IntervalSet) -> Self {
        Self {
            intervals,
            ..self.clone()
        }
    }

    pub fn is_primary(&self) -> bool {
        self.role == QueryRole::Primary
    }

    /// Build one primary query per resolved table, plus one baseline per
    /// lookback offset. Baselines cover the resolved interval shifted by
    /// their offset.
    pub fn plan(
        logical: &LogicalQuery,
        resolution: &Resolution,
        dictionary: &PhysicalTableDictionary,
    ) -> Result<Vec<BackendQuery>> {
        let mut queries = Vec::new();
        for resolved in resolution.iter() {
            let metrics = logical
                .metrics
                .iter()
                .map(|name| {
                    resolved
                        .table
                        .metric(name)
                        .cloned()
                        .or_else(|| {
                            dictionary
                                .aggregation_of(name)
                                .map(|agg| Metric::new(name.clone(), agg))
                        })
                        .ok_or_else(|| {
                            Error::Internal(format!(
                                "metric '{}' missing from resolved table '{}'",
                                name, resolved.table.name
                            ))
                        })
                })
                .collect::<Result<Vec<_>>>()?;

            let primary = BackendQuery {
                table: resolved.table.name.clone(),
                datasets: resolved.table.datasets.clone(),
                grain: logical.grain,
                dimensions: logical.dimensions.clone(),
                metrics,
                filters: logical.filters.clone(),
                intervals: resolved.interval.clone(),
                role: QueryRole::Primary,
            };
            let baselines = logical
                .kind
                .offsets()
                .iter()
                .map(|&offset| {
                    let intervals =
                        resolved.interval.shift(logical.grain, offset).ok_or_else(|| {
                            Error::InvalidQuery(format!(
                                "lookback offset {} moves {} outside the supported time range",
                                offset, resolved.interval
                            ))
                        })?;
                    Ok(BackendQuery {
                        intervals,
                        role: QueryRole::Baseline { offset },
                        ..primary.clone()
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            queries.push(primary);
            queries.extend(baselines);
        }
        Ok(queries)
    }
}
