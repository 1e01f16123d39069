//! Result rows and result sets

use crate::table::Metric;
use crate::time::{IntervalSet, TimeGrain};
use crate::{Error, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One bucket of one dimension combination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub dimensions: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
}

impl ResultRow {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            dimensions: BTreeMap::new(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_dimension(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.dimensions.insert(name.into(), value.into());
        self
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    /// Rows with equal keys describe the same bucket.
    pub fn key(&self) -> (DateTime<Utc>, &BTreeMap<String, String>) {
        (self.timestamp, &self.dimensions)
    }
}

/// Annotation on results served while some requested data was missing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialDataMarker {
    pub missing: IntervalSet,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub rows: Vec<ResultRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial: Option<PartialDataMarker>,
}

impl ResultSet {
    pub fn new(rows: Vec<ResultRow>) -> Self {
        Self {
            rows,
            partial: None,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_partial(&self) -> bool {
        self.partial.is_some()
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Append another result, keeping rows in time order.
    pub fn concat(mut self, other: ResultSet) -> Self {
        self.rows.extend(other.rows);
        self.rows.sort_by_key(|r| r.timestamp);
        self
    }

    /// Combine rows sharing a timestamp and dimension key, using each metric's
    /// aggregation. Output is ordered by timestamp, then dimensions.
    pub fn combine_duplicates(self, metrics: &[Metric]) -> Self {
        let mut combined: BTreeMap<(DateTime<Utc>, BTreeMap<String, String>), ResultRow> =
            BTreeMap::new();
        for row in self.rows {
            let key = (row.timestamp, row.dimensions.clone());
            match combined.get_mut(&key) {
                Some(existing) => merge_metrics(existing, row, metrics),
                None => {
                    combined.insert(key, row);
                }
            }
        }
        Self {
            rows: combined.into_values().collect(),
            partial: self.partial,
        }
    }

    /// Move every row by `periods` buckets of `grain`.
    pub fn shift(mut self, grain: TimeGrain, periods: i64) -> Result<Self> {
        for row in &mut self.rows {
            row.timestamp = grain.add(row.timestamp, periods).ok_or_else(|| {
                Error::Internal(format!(
                    "row at {} cannot be moved by {} {} buckets",
                    row.timestamp.to_rfc3339(),
                    periods,
                    grain
                ))
            })?;
        }
        Ok(self)
    }
}

fn merge_metrics(into: &mut ResultRow, from: ResultRow, metrics: &[Metric]) {
    for (name, value) in from.metrics {
        let aggregation = metrics.iter().find(|m| m.name == name).map(|m| m.aggregation);
        match (into.metrics.get_mut(&name), aggregation) {
            (Some(existing), Some(aggregation)) => *existing = aggregation.combine(*existing, value),
            // Unknown metrics keep the first value seen
            (Some(_), None) => {}
            (None, _) => {
                into.metrics.insert(name, value);
            }
        }
    }
}
