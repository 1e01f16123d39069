//! Partial data detection
//!
//! Compares what a backend query asks for with what its datasets have
//! published. The handler only classifies; `PartialDataPolicy` decides.

use super::BackendQuery;
use crate::metadata::AvailabilitySnapshot;
use crate::time::IntervalSet;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What to do when requested data is not fully available
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialDataPolicy {
    /// Fail the request before anything is dispatched
    Reject,
    /// Query only the available subset and mark the result as partial
    #[default]
    ServeAvailable,
}

impl std::str::FromStr for PartialDataPolicy {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "serve" | "serve_available" => Ok(Self::ServeAvailable),
            other => Err(format!("unknown partial data policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialDataReport {
    pub requested: IntervalSet,
    pub available: IntervalSet,
    pub missing: IntervalSet,
}

impl PartialDataReport {
    pub fn is_partial(&self) -> bool {
        !self.missing.is_empty()
    }
}

/// Backend queries after the policy has been applied
#[derive(Debug, Clone, PartialEq)]
pub struct PartialDataOutcome {
    pub queries: Vec<BackendQuery>,
    pub missing: IntervalSet,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PartialDataHandler {
    policy: PartialDataPolicy,
}

impl PartialDataHandler {
    pub fn new(policy: PartialDataPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> PartialDataPolicy {
        self.policy
    }

    /// `available = requested ∩ availability` over every dataset of the query.
    pub fn classify(
        &self,
        query: &BackendQuery,
        availability: &AvailabilitySnapshot,
    ) -> PartialDataReport {
        let joint = availability.joint_availability(&query.datasets);
        let available = query.intervals.intersect(&joint);
        let missing = query.intervals.subtract(&available);
        PartialDataReport {
            requested: query.intervals.clone(),
            available,
            missing,
        }
    }

    pub fn classify_all(
        &self,
        queries: &[BackendQuery],
        availability: &AvailabilitySnapshot,
    ) -> Vec<PartialDataReport> {
        queries.iter().map(|q| self.classify(q, availability)).collect()
    }

    /// Apply the policy to classified queries.
    ///
    /// Under `ServeAvailable` each query is narrowed to its available subset
    /// and queries with nothing available are dropped.
    pub fn apply(
        &self,
        queries: Vec<BackendQuery>,
        availability: &AvailabilitySnapshot,
    ) -> Result<PartialDataOutcome> {
        let policy = self.policy;
        let reports = self.classify_all(&queries, availability);
        let missing = reports
            .iter()
            .fold(IntervalSet::empty(), |acc, r| acc.union(&r.missing));

        if missing.is_empty() {
            return Ok(PartialDataOutcome { queries, missing });
        }

        debug!(missing = %missing, policy = ?policy, "Request touches unavailable data");
        match policy {
            PartialDataPolicy::Reject => Err(Error::PartialData {
                missing: missing.as_slice().to_vec(),
            }),
            PartialDataPolicy::ServeAvailable => {
                let narrowed = queries
                    .into_iter()
                    .zip(reports)
                    .filter(|(_, report)| !report.available.is_empty())
                    .map(|(query, report)| query.with_intervals(report.available))
                    .collect();
                Ok(PartialDataOutcome {
                    queries: narrowed,
                    missing,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{AvailabilityRecord, MetadataStore};
    use crate::query::QueryRole;
    use crate::time::TimeGrain;

    fn set(intervals: &str) -> IntervalSet {
        intervals.parse().unwrap()
    }

    fn backend_query(intervals: &str) -> BackendQuery {
        BackendQuery {
            table: "daily".into(),
            datasets: vec!["daily".into()],
            grain: TimeGrain::Day,
            dimensions: vec![],
            metrics: vec![],
            filters: vec![],
            intervals: set(intervals),
            role: QueryRole::Primary,
        }
    }

    fn snapshot(available: &str) -> AvailabilitySnapshot {
        let store = MetadataStore::new();
        store.update_availability(
            "daily",
            AvailabilityRecord::from_intervals(set(available)),
        );
        store.snapshot(["daily"])
    }

    #[test]
    fn test_classifies_missing_tail() {
        let handler = PartialDataHandler::default();
        let report = handler.classify(
            &backend_query("2024-01-01/2024-01-10"),
            &snapshot("2024-01-01/2024-01-05"),
        );
        assert!(report.is_partial());
        assert_eq!(report.available, set("2024-01-01/2024-01-05"));
        assert_eq!(report.missing, set("2024-01-05/2024-01-10"));
    }

    #[test]
    fn test_full_availability_is_not_partial() {
        let handler = PartialDataHandler::default();
        let report = handler.classify(
            &backend_query("2024-01-01/2024-01-10"),
            &snapshot("2023-12-01/2024-02-01"),
        );
        assert!(!report.is_partial());
    }

    #[test]
    fn test_reject_policy_fails_with_missing_intervals() {
        let handler = PartialDataHandler::new(PartialDataPolicy::Reject);
        let err = handler
            .apply(
                vec![backend_query("2024-01-01/2024-01-10")],
                &snapshot("2024-01-01/2024-01-05"),
            )
            .unwrap_err();
        match err {
            Error::PartialData { missing } => {
                assert_eq!(missing, set("2024-01-05/2024-01-10").as_slice().to_vec());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_serve_policy_narrows_and_drops_empty_queries() {
        let handler = PartialDataHandler::new(PartialDataPolicy::ServeAvailable);
        let outcome = handler
            .apply(
                vec![
                    backend_query("2024-01-01/2024-01-10"),
                    backend_query("2024-02-01/2024-02-03"),
                ],
                &snapshot("2024-01-01/2024-01-05"),
            )
            .unwrap();
        assert_eq!(outcome.queries.len(), 1);
        assert_eq!(outcome.queries[0].intervals, set("2024-01-01/2024-01-05"));
        assert_eq!(
            outcome.missing,
            set("2024-01-05/2024-01-10,2024-02-01/2024-02-03")
        );
    }

    #[test]
    fn test_parse_policy() {
        assert_eq!("reject".parse::<PartialDataPolicy>().unwrap(), PartialDataPolicy::Reject);
        assert_eq!(
            "serve".parse::<PartialDataPolicy>().unwrap(),
            PartialDataPolicy::ServeAvailable
        );
        assert!("maybe".parse::<PartialDataPolicy>().is_err());
    }
}
