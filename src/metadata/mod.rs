//! Metadata service for Strata
//!
//! Holds what the gateway knows about backend availability: per-dataset
//! availability records, the segment lists they were derived from, and the
//! distinct values of each dimension. Loaders write, request pipelines read.

mod dimensions;
mod store;

pub use dimensions::DimensionValueStore;
pub use store::{AvailabilitySnapshot, MetadataStore};

use crate::time::{Interval, IntervalSet};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Opaque token that changes whenever a dataset's availability changes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Content-derived token over an interval list.
    pub fn from_intervals(intervals: &IntervalSet) -> Self {
        let mut hasher = Sha256::new();
        for interval in intervals.iter() {
            hasher.update(interval.to_string().as_bytes());
            hasher.update(b";");
        }
        Self(hex::encode(hasher.finalize()))
    }

    /// Content-derived token over segment identifiers, independent of order.
    pub fn from_segments(segments: &[SegmentInfo]) -> Self {
        let mut ids: Vec<String> = segments.iter().map(SegmentInfo::id).collect();
        ids.sort();
        let mut hasher = Sha256::new();
        for id in &ids {
            hasher.update(id.as_bytes());
            hasher.update(b";");
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One published backend segment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub interval: Interval,
    pub version: String,
    #[serde(default)]
    pub partition: u32,
}

impl SegmentInfo {
    pub fn id(&self) -> String {
        format!("{}_{}_{}", self.interval, self.version, self.partition)
    }
}

/// What a dataset can currently answer, with the token identifying that state
///
/// Records are immutable; the store replaces them wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRecord {
    pub intervals: IntervalSet,
    pub version: VersionToken,
}

impl AvailabilityRecord {
    pub fn new(intervals: IntervalSet, version: VersionToken) -> Self {
        Self { intervals, version }
    }

    pub fn from_intervals(intervals: IntervalSet) -> Self {
        let version = VersionToken::from_intervals(&intervals);
        Self { intervals, version }
    }

    pub fn from_segments(segments: &[SegmentInfo]) -> Self {
        Self {
            intervals: segments.iter().map(|s| s.interval).collect(),
            version: VersionToken::from_segments(segments),
        }
    }

    pub fn empty() -> Self {
        Self::from_intervals(IntervalSet::empty())
    }
}
