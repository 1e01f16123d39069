//! Availability-aware query signatures
//!
//! A signature is a SHA-256 digest over the canonical JSON form of the
//! logical query, the resolved tables, the version token and in-range
//! availability of every contributing dataset, and the partial flag. It is a
//! pure function of those inputs, so it is stable across restarts and changes
//! whenever any contributing dataset's availability changes.

use super::{Filter, LogicalQuery, QueryKind};
use crate::metadata::{AvailabilitySnapshot, VersionToken};
use crate::table::Resolution;
use crate::time::{IntervalSet, TimeGrain};
use crate::{Error, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Hex-encoded signature; used as the cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct QuerySignature(String);

impl QuerySignature {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QuerySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Range of time a query's answer depends on
pub trait RequestedIntervals: Send + Sync {
    fn requested(&self, query: &LogicalQuery) -> Result<IntervalSet>;
}

/// The query's own intervals
#[derive(Debug, Default)]
pub struct QueryIntervals;

impl RequestedIntervals for QueryIntervals {
    fn requested(&self, query: &LogicalQuery) -> Result<IntervalSet> {
        Ok(query.intervals.clone())
    }
}

/// The query's intervals plus every baseline-shifted copy of them
#[derive(Debug, Default)]
pub struct LookbackIntervals;

impl RequestedIntervals for LookbackIntervals {
    fn requested(&self, query: &LogicalQuery) -> Result<IntervalSet> {
        query
            .kind
            .offsets()
            .iter()
            .try_fold(query.intervals.clone(), |acc, &offset| {
                let baseline = query.intervals.shift(query.grain, offset).ok_or_else(|| {
                    Error::InvalidQuery(format!(
                        "lookback offset {} moves the request outside the supported time range",
                        offset
                    ))
                })?;
                Ok(acc.union(&baseline))
            })
    }
}

#[derive(Serialize)]
struct CanonicalQuery<'a> {
    table: &'a str,
    kind: &'a QueryKind,
    dimensions: BTreeSet<&'a str>,
    metrics: BTreeSet<&'a str>,
    filters: BTreeSet<&'a Filter>,
    grain: TimeGrain,
    intervals: &'a IntervalSet,
}

#[derive(Serialize)]
struct SignedTable<'a> {
    name: &'a str,
    interval: &'a IntervalSet,
}

#[derive(Serialize)]
struct SignedDataset {
    version: VersionToken,
    available: IntervalSet,
}

#[derive(Serialize)]
struct SignatureInput<'a> {
    query: CanonicalQuery<'a>,
    tables: Vec<SignedTable<'a>>,
    datasets: BTreeMap<&'a str, SignedDataset>,
    partial: bool,
}

/// Signs logical queries against an availability snapshot
pub struct QuerySigningService {
    functions: HashMap<String, Arc<dyn RequestedIntervals>>,
    default_function: Arc<dyn RequestedIntervals>,
}

impl QuerySigningService {
    /// Service with the query-intervals default and the lookback function registered.
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
            default_function: Arc::new(QueryIntervals),
        }
        .with_function("lookback", Arc::new(LookbackIntervals))
    }

    /// Register the requested-interval function for a query kind.
    pub fn with_function(mut self, kind: &str, function: Arc<dyn RequestedIntervals>) -> Self {
        self.functions.insert(kind.to_string(), function);
        self
    }

    pub fn requested_intervals(&self, query: &LogicalQuery) -> Result<IntervalSet> {
        self.functions
            .get(query.kind.name())
            .unwrap_or(&self.default_function)
            .requested(query)
    }

    /// Sign `query` as resolved, using the same `availability` the
    /// resolution and partial data classification were computed from.
    pub fn sign(
        &self,
        query: &LogicalQuery,
        resolution: &Resolution,
        availability: &AvailabilitySnapshot,
        partial: bool,
    ) -> Result<QuerySignature> {
        let requested = self.requested_intervals(query)?;

        let mut datasets = BTreeMap::new();
        for resolved in resolution.iter() {
            for dataset in &resolved.table.datasets {
                datasets.entry(dataset.as_str()).or_insert_with(|| {
                    let record = availability.availability(dataset);
                    SignedDataset {
                        version: record.version.clone(),
                        available: requested.intersect(&record.intervals),
                    }
                });
            }
        }

        let input = SignatureInput {
            query: CanonicalQuery {
                table: &query.table,
                kind: &query.kind,
                dimensions: query.dimensions.iter().map(String::as_str).collect(),
                metrics: query.metrics.iter().map(String::as_str).collect(),
                filters: query.filters.iter().collect(),
                grain: query.grain,
                intervals: &query.intervals,
            },
            tables: resolution
                .iter()
                .map(|r| SignedTable {
                    name: &r.table.name,
                    interval: &r.interval,
                })
                .collect(),
            datasets,
            partial,
        };

        let canonical = serde_json::to_vec(&input)?;
        Ok(QuerySignature(hex::encode(Sha256::digest(&canonical))))
    }
}

impl Default for QuerySigningService {
    fn default() -> Self {
        Self::new()
    }
}
