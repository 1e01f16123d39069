//! Physical table selection
//!
//! The default resolver filters a logical table's members down to those that
//! can answer the request surface, ranks them, and assigns request intervals
//! to tables by availability.

use super::{PhysicalTable, PhysicalTableDictionary, Resolution, ResolvedTable};
use crate::error::ResolutionError;
use crate::metadata::AvailabilitySnapshot;
use crate::query::LogicalQuery;
use crate::time::IntervalSet;
use crate::Result;
use std::cmp::Reverse;
use std::sync::Arc;
use tracing::debug;

/// A table able to answer the request, with its in-range availability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedCandidate {
    pub table: Arc<PhysicalTable>,
    pub available: IntervalSet,
}

/// Strategy for choosing physical tables
///
/// Resolvers pick among the logical table's members and read availability
/// only from the snapshot they are handed.
pub trait PhysicalTableResolver: Send + Sync {
    /// Candidates able to answer `query`, best first.
    fn rank_candidates(
        &self,
        query: &LogicalQuery,
        availability: &AvailabilitySnapshot,
    ) -> Result<Vec<RankedCandidate>>;

    /// Disjoint assignment of the request's intervals to tables.
    fn resolve(
        &self,
        query: &LogicalQuery,
        availability: &AvailabilitySnapshot,
    ) -> Result<Resolution>;
}

pub struct DefaultTableResolver {
    dictionary: Arc<PhysicalTableDictionary>,
}

impl DefaultTableResolver {
    pub fn new(dictionary: Arc<PhysicalTableDictionary>) -> Self {
        Self { dictionary }
    }

    fn covers_surface(table: &PhysicalTable, query: &LogicalQuery) -> bool {
        table.grain.satisfies(query.grain)
            && query.required_dimensions().iter().all(|d| table.has_dimension(d))
            && query.metrics.iter().all(|m| table.has_metric(m))
    }

    /// Error naming what the closest table lacks.
    fn no_match(members: &[Arc<PhysicalTable>], query: &LogicalQuery) -> ResolutionError {
        let gaps = |table: &PhysicalTable| {
            let dimensions: Vec<String> = query
                .required_dimensions()
                .into_iter()
                .filter(|d| !table.has_dimension(d))
                .map(String::from)
                .collect();
            let metrics: Vec<String> = query
                .metrics
                .iter()
                .filter(|m| !table.has_metric(m))
                .cloned()
                .collect();
            (dimensions, metrics, !table.grain.satisfies(query.grain))
        };

        let closest = members
            .iter()
            .map(|t| (t, gaps(t)))
            .min_by_key(|(t, (dims, metrics, grain_gap))| {
                (dims.len() + metrics.len() + usize::from(*grain_gap), t.name.clone())
            });

        match closest {
            Some((_, (dimensions, metrics, _))) => ResolutionError::NoMatchingTable {
                dimensions,
                metrics,
                grain: query.grain,
            },
            None => ResolutionError::EmptyDictionary,
        }
    }
}

impl PhysicalTableResolver for DefaultTableResolver {
    fn rank_candidates(
        &self,
        query: &LogicalQuery,
        availability: &AvailabilitySnapshot,
    ) -> Result<Vec<RankedCandidate>> {
        let members = self.dictionary.members(&query.table)?;
        if members.is_empty() {
            return Err(ResolutionError::EmptyDictionary.into());
        }

        let mut ranked: Vec<RankedCandidate> = members
            .iter()
            .filter(|t| Self::covers_surface(t, query))
            .map(|t| RankedCandidate {
                table: Arc::clone(t),
                available: query
                    .intervals
                    .intersect(&availability.joint_availability(&t.datasets)),
            })
            .collect();

        if ranked.is_empty() {
            return Err(Self::no_match(&members, query).into());
        }

        ranked.sort_by_key(|c| {
            (
                c.table.grain != query.grain,
                Reverse(c.table.grain.coarseness()),
                c.table.surface_size(),
                Reverse(c.available.total_duration()),
                c.table.name.clone(),
            )
        });
        Ok(ranked)
    }

    fn resolve(
        &self,
        query: &LogicalQuery,
        availability: &AvailabilitySnapshot,
    ) -> Result<Resolution> {
        let ranked = self.rank_candidates(query, availability)?;
        let best = &ranked[0];

        if best.available.contains_set(&query.intervals) {
            debug!(table = %best.table.name, "Resolved to a single table");
            return Ok(Resolution::single(
                Arc::clone(&best.table),
                query.intervals.clone(),
            ));
        }

        // Best-first, each candidate takes what it has of the unassigned remainder
        let mut remaining = query.intervals.clone();
        let mut assigned: Vec<IntervalSet> = vec![IntervalSet::empty(); ranked.len()];
        for (idx, candidate) in ranked.iter().enumerate() {
            if remaining.is_empty() {
                break;
            }
            let take = remaining.intersect(&candidate.available);
            if !take.is_empty() {
                remaining = remaining.subtract(&take);
                assigned[idx] = take;
            }
        }
        // Nobody has it; the best table answers and the gap is reported as partial
        if !remaining.is_empty() {
            assigned[0] = assigned[0].union(&remaining);
        }

        let mut tables: Vec<ResolvedTable> = ranked
            .iter()
            .zip(assigned)
            .flat_map(|(candidate, intervals)| {
                intervals
                    .iter()
                    .map(|interval| ResolvedTable {
                        table: Arc::clone(&candidate.table),
                        interval: IntervalSet::from(*interval),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        tables.sort_by_key(|t| t.interval.span().map(|s| s.start()));

        debug!(
            entries = tables.len(),
            tables = ?tables.iter().map(|t| t.table.name.as_str()).collect::<Vec<_>>(),
            "Partitioned request across tables"
        );
        Ok(Resolution { tables })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::metadata::{AvailabilityRecord, MetadataStore};
    use crate::table::Aggregation;
    use crate::time::TimeGrain;

    fn set(s: &str) -> IntervalSet {
        s.parse().unwrap()
    }

    fn resolver(
        tables: Vec<PhysicalTable>,
        availability: &[(&str, &str)],
    ) -> (DefaultTableResolver, AvailabilitySnapshot) {
        let names: Vec<String> = tables.iter().map(|t| t.name.clone()).collect();
        let dictionary = PhysicalTableDictionary::new(tables)
            .unwrap()
            .with_logical_table("network", names)
            .unwrap();
        let store = MetadataStore::new();
        for (dataset, intervals) in availability {
            store.update_availability(dataset, AvailabilityRecord::from_intervals(set(intervals)));
        }
        let snapshot = store.snapshot(dictionary.datasets());
        (DefaultTableResolver::new(Arc::new(dictionary)), snapshot)
    }

    fn table(name: &str, grain: TimeGrain, dims: &[&str]) -> PhysicalTable {
        PhysicalTable::new(name, grain)
            .with_dimensions(dims.iter().copied())
            .with_metric("views", Aggregation::LongSum)
    }

    fn query(grain: TimeGrain, dims: &[&str], intervals: &str) -> LogicalQuery {
        LogicalQuery::new("network", grain, set(intervals))
            .with_dimensions(dims.iter().copied())
            .with_metrics(["views"])
    }

    #[test]
    fn test_prefers_exact_then_coarsest_grain() {
        let (r, a) = resolver(
            vec![
                table("hourly", TimeGrain::Hour, &["country"]),
                table("daily", TimeGrain::Day, &["country"]),
            ],
            &[("hourly", "2024-01-01/2024-03-01"), ("daily", "2024-01-01/2024-03-01")],
        );
        let ranked = r.rank_candidates(&query(TimeGrain::Day, &["country"], "2024-01-01/2024-01-10"), &a).unwrap();
        assert_eq!(ranked[0].table.name, "daily");

        let monthly = r.rank_candidates(&query(TimeGrain::Month, &["country"], "2024-01-01/2024-02-01"), &a).unwrap();
        assert_eq!(monthly[0].table.name, "daily");
        assert_eq!(monthly[1].table.name, "hourly");
    }

    #[test]
    fn test_prefers_narrowest_surface() {
        let (r, a) = resolver(
            vec![
                table("wide", TimeGrain::Day, &["country", "device", "browser"]),
                table("narrow", TimeGrain::Day, &["country"]),
            ],
            &[("wide", "2024-01-01/2024-03-01"), ("narrow", "2024-01-01/2024-03-01")],
        );
        let resolution = r.resolve(&query(TimeGrain::Day, &["country"], "2024-01-01/2024-01-10"), &a).unwrap();
        assert!(resolution.is_single());
        assert_eq!(resolution.tables[0].table.name, "narrow");
    }

    #[test]
    fn test_availability_breaks_ties() {
        let (r, a) = resolver(
            vec![
                table("a_daily", TimeGrain::Day, &["country"]),
                table("b_daily", TimeGrain::Day, &["country"]),
            ],
            &[("a_daily", "2024-01-01/2024-01-04"), ("b_daily", "2024-01-01/2024-01-08")],
        );
        let ranked = r.rank_candidates(&query(TimeGrain::Day, &["country"], "2024-01-01/2024-01-10"), &a).unwrap();
        assert_eq!(ranked[0].table.name, "b_daily");
        assert_eq!(ranked[0].available, set("2024-01-01/2024-01-08"));
    }

    #[test]
    fn test_partitions_across_tables() {
        let (r, a) = resolver(
            vec![
                table("recent", TimeGrain::Day, &["country"]),
                table("archive", TimeGrain::Day, &["country", "device"]),
            ],
            &[("recent", "2024-01-15/2024-03-01"), ("archive", "2023-01-01/2024-01-20")],
        );
        let resolution = r.resolve(&query(TimeGrain::Day, &["country"], "2024-01-01/2024-02-01"), &a).unwrap();

        let entries: Vec<(&str, IntervalSet)> = resolution
            .iter()
            .map(|t| (t.table.name.as_str(), t.interval.clone()))
            .collect();
        assert_eq!(
            entries,
            vec![
                ("archive", set("2024-01-01/2024-01-15")),
                ("recent", set("2024-01-15/2024-02-01")),
            ]
        );
        assert_eq!(resolution.coverage(), set("2024-01-01/2024-02-01"));
    }

    #[test]
    fn test_uncovered_remainder_goes_to_best_table() {
        let (r, a) = resolver(
            vec![table("daily", TimeGrain::Day, &["country"])],
            &[("daily", "2024-01-01/2024-01-05")],
        );
        let resolution = r.resolve(&query(TimeGrain::Day, &["country"], "2024-01-01/2024-01-10"), &a).unwrap();
        assert!(resolution.is_single());
        assert_eq!(resolution.tables[0].interval, set("2024-01-01/2024-01-10"));
    }

    #[test]
    fn test_no_match_names_missing_surface() {
        let (r, a) = resolver(
            vec![
                table("daily", TimeGrain::Day, &["country"]),
                table("monthly", TimeGrain::Month, &["country", "device"]),
            ],
            &[],
        );
        let err = r
            .resolve(&query(TimeGrain::Day, &["country", "device"], "2024-01-01/2024-01-10"), &a)
            .unwrap_err();
        match err {
            Error::Resolution(ResolutionError::NoMatchingTable { dimensions, metrics, grain }) => {
                assert_eq!(dimensions, vec!["device".to_string()]);
                assert!(metrics.is_empty());
                assert_eq!(grain, TimeGrain::Day);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
