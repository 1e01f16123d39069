//! Result-size estimation for the weight check

use super::{BackendQuery, FilterOp};
use crate::metadata::MetadataStore;
use crate::time::TimeGrain;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeightEstimate {
    /// Estimated result rows
    pub rows: u64,
    /// Rows scaled by metric cost
    pub weight: u64,
}

/// Estimates query cost from loaded dimension cardinalities
///
/// `rows = Π cardinality(grouping dimension) × time buckets` and
/// `weight = rows × (plain metrics + sketch metrics × sketch_weight)`.
/// Dimensions without loaded values count as `default_cardinality`. An `in`
/// filter caps a dimension's cardinality at the number of selected values.
pub struct WeightEstimator {
    store: Arc<MetadataStore>,
    default_cardinality: u64,
    sketch_weight: u64,
}

impl WeightEstimator {
    pub fn new(store: Arc<MetadataStore>, default_cardinality: u64, sketch_weight: u64) -> Self {
        Self {
            store,
            default_cardinality: default_cardinality.max(1),
            sketch_weight,
        }
    }

    pub fn estimate(&self, queries: &[BackendQuery]) -> WeightEstimate {
        queries
            .iter()
            .map(|q| self.estimate_query(q))
            .fold(WeightEstimate::default(), |acc, e| WeightEstimate {
                rows: acc.rows.saturating_add(e.rows),
                weight: acc.weight.saturating_add(e.weight),
            })
    }

    pub fn estimate_query(&self, query: &BackendQuery) -> WeightEstimate {
        let values = self.store.dimension_values();
        let cardinality = query.dimensions.iter().fold(1u64, |acc, dimension| {
            let mut card = values
                .cardinality(dimension)
                .unwrap_or(self.default_cardinality);
            for filter in query.filters.iter().filter(|f| &f.dimension == dimension) {
                if filter.op == FilterOp::In {
                    card = card.min(filter.values.len() as u64);
                }
            }
            acc.saturating_mul(card.max(1))
        });

        let buckets = if query.grain == TimeGrain::All {
            1
        } else {
            query
                .intervals
                .iter()
                .map(|i| query.grain.bucket_count(i.start(), i.end()))
                .fold(0u64, u64::saturating_add)
        };

        let sketches = query
            .metrics
            .iter()
            .filter(|m| m.aggregation.is_sketch())
            .count() as u64;
        let plain = query.metrics.len() as u64 - sketches;
        let metric_cost = plain.saturating_add(sketches.saturating_mul(self.sketch_weight));

        let rows = cardinality.saturating_mul(buckets);
        WeightEstimate {
            rows,
            weight: rows.saturating_mul(metric_cost),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Filter, QueryRole};
    use crate::table::{Aggregation, Metric};

    fn query(dimensions: &[&str], metrics: Vec<Metric>) -> BackendQuery {
        BackendQuery {
            table: "daily".into(),
            datasets: vec!["daily".into()],
            grain: TimeGrain::Day,
            dimensions: dimensions.iter().map(|d| d.to_string()).collect(),
            metrics,
            filters: vec![],
            intervals: "2024-01-01/2024-01-31".parse().unwrap(),
            role: QueryRole::Primary,
        }
    }

    fn store() -> Arc<MetadataStore> {
        let store = Arc::new(MetadataStore::new());
        store
            .dimension_values()
            .update("country", (0..200).map(|i| format!("c{i}")));
        store
            .dimension_values()
            .update("device", ["mobile", "desktop", "tablet"].map(String::from));
        store
    }

    #[test]
    fn test_rows_times_metric_cost() {
        let estimator = WeightEstimator::new(store(), 10, 4);
        let q = query(
            &["country", "device"],
            vec![
                Metric::new("views", Aggregation::LongSum),
                Metric::new("users", Aggregation::Sketch),
            ],
        );
        let estimate = estimator.estimate_query(&q);
        // 200 countries × 3 devices × 30 days
        assert_eq!(estimate.rows, 18_000);
        assert_eq!(estimate.weight, 18_000 * (1 + 4));
    }

    #[test]
    fn test_unknown_dimension_uses_default_and_filters_cap() {
        let estimator = WeightEstimator::new(store(), 10, 4);
        let mut q = query(&["browser", "country"], vec![Metric::new("views", Aggregation::LongSum)]);
        q.filters.push(Filter::is_in("country", ["c1", "c2"]));
        let estimate = estimator.estimate_query(&q);
        assert_eq!(estimate.rows, 10 * 2 * 30);
    }

    #[test]
    fn test_saturates_instead_of_overflowing() {
        let estimator = WeightEstimator::new(store(), u64::MAX, u64::MAX);
        let q = query(
            &["a", "b", "c"],
            vec![Metric::new("users", Aggregation::Sketch)],
        );
        assert_eq!(estimator.estimate_query(&q).weight, u64::MAX);
    }
}
