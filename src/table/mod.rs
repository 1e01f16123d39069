//! Physical table definitions
//!
//! A physical table is a concrete backend dataset (or set of datasets) with
//! fixed dimension, metric and grain coverage. Logical tables group the
//! physical tables a request may be answered from.

mod resolver;

pub use resolver::{DefaultTableResolver, PhysicalTableResolver, RankedCandidate};

use crate::error::{Error, Result};
use crate::time::{IntervalSet, TimeGrain};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

/// How a metric's values combine when buckets or tables are merged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Aggregation {
    LongSum,
    DoubleSum,
    Min,
    Max,
    /// Approximate distinct-count sketch; merged numerically as a max
    Sketch,
}

impl Aggregation {
    pub fn combine(&self, left: f64, right: f64) -> f64 {
        match self {
            Self::LongSum | Self::DoubleSum => left + right,
            Self::Min => left.min(right),
            Self::Max | Self::Sketch => left.max(right),
        }
    }

    pub fn is_sketch(&self) -> bool {
        matches!(self, Self::Sketch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub aggregation: Aggregation,
}

impl Metric {
    pub fn new(name: impl Into<String>, aggregation: Aggregation) -> Self {
        Self {
            name: name.into(),
            aggregation,
        }
    }
}

/// A concrete backend dataset and the surface it can answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalTable {
    pub name: String,
    pub grain: TimeGrain,
    pub dimensions: BTreeSet<String>,
    pub metrics: Vec<Metric>,
    /// Backend datasets backing this table; data is available only where all are
    pub datasets: Vec<String>,
}

impl PhysicalTable {
    pub fn new(name: impl Into<String>, grain: TimeGrain) -> Self {
        let name = name.into();
        Self {
            datasets: vec![name.clone()],
            name,
            grain,
            dimensions: BTreeSet::new(),
            metrics: Vec::new(),
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

    pub fn with_metric(mut self, name: impl Into<String>, aggregation: Aggregation) -> Self {
        self.metrics.push(Metric::new(name, aggregation));
        self
    }

    pub fn with_datasets<I, S>(mut self, datasets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.datasets = datasets.into_iter().map(Into::into).collect();
        self
    }

    pub fn has_dimension(&self, dimension: &str) -> bool {
        self.dimensions.contains(dimension)
    }

    pub fn metric(&self, name: &str) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.name == name)
    }

    pub fn has_metric(&self, name: &str) -> bool {
        self.metric(name).is_some()
    }

    /// Dimension plus metric count, a proxy for scan and join cost.
    pub fn surface_size(&self) -> usize {
        self.dimensions.len() + self.metrics.len()
    }
}

/// Table paired with the portion of the request it answers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTable {
    pub table: Arc<PhysicalTable>,
    pub interval: IntervalSet,
}

/// Ordered, disjoint assignment of request intervals to tables
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Resolution {
    pub tables: Vec<ResolvedTable>,
}

impl Resolution {
    pub fn single(table: Arc<PhysicalTable>, interval: IntervalSet) -> Self {
        Self {
            tables: vec![ResolvedTable { table, interval }],
        }
    }

    pub fn is_single(&self) -> bool {
        self.tables.len() == 1
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolvedTable> {
        self.tables.iter()
    }

    /// Union of the intervals every entry answers.
    pub fn coverage(&self) -> IntervalSet {
        self.tables
            .iter()
            .fold(IntervalSet::empty(), |acc, t| acc.union(&t.interval))
    }
}

#[derive(Debug, Deserialize)]
struct DictionaryDocument {
    #[serde(default)]
    logical_tables: BTreeMap<String, Vec<String>>,
    tables: Vec<PhysicalTable>,
}

/// Immutable table catalogue
#[derive(Debug, Clone, Default)]
pub struct PhysicalTableDictionary {
    tables: BTreeMap<String, Arc<PhysicalTable>>,
    logical_tables: BTreeMap<String, Vec<String>>,
}

impl PhysicalTableDictionary {
    pub fn new(tables: Vec<PhysicalTable>) -> Result<Self> {
        let mut by_name = BTreeMap::new();
        for table in tables {
            if table.datasets.is_empty() {
                return Err(Error::Config(format!(
                    "physical table '{}' declares no datasets",
                    table.name
                )));
            }
            if table.grain == TimeGrain::All {
                return Err(Error::Config(format!(
                    "physical table '{}' cannot be stored at grain 'all'",
                    table.name
                )));
            }
            let name = table.name.clone();
            if by_name.insert(name.clone(), Arc::new(table)).is_some() {
                return Err(Error::Config(format!("duplicate physical table '{}'", name)));
            }
        }
        Ok(Self {
            tables: by_name,
            logical_tables: BTreeMap::new(),
        })
    }

    /// Register a logical table made of existing physical tables.
    pub fn with_logical_table<I, S>(mut self, name: impl Into<String>, members: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let members: Vec<String> = members.into_iter().map(Into::into).collect();
        if let Some(unknown) = members.iter().find(|m| !self.tables.contains_key(*m)) {
            return Err(Error::Config(format!(
                "logical table '{}' references unknown physical table '{}'",
                name, unknown
            )));
        }
        self.logical_tables.insert(name, members);
        Ok(self)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let doc: DictionaryDocument = serde_json::from_str(json)?;
        doc.logical_tables
            .into_iter()
            .try_fold(Self::new(doc.tables)?, |dict, (name, members)| {
                dict.with_logical_table(name, members)
            })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "cannot read table dictionary {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_json(&json)
    }

    pub fn get(&self, name: &str) -> Option<Arc<PhysicalTable>> {
        self.tables.get(name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<PhysicalTable>> {
        self.tables.values()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Physical tables a logical table may be answered from.
    pub fn members(&self, logical: &str) -> Result<Vec<Arc<PhysicalTable>>> {
        let members = self
            .logical_tables
            .get(logical)
            .ok_or_else(|| Error::InvalidQuery(format!("unknown logical table '{}'", logical)))?;
        Ok(members.iter().filter_map(|m| self.get(m)).collect())
    }

    pub fn logical_tables(&self) -> impl Iterator<Item = &String> {
        self.logical_tables.keys()
    }

    /// Every backend dataset referenced by any table, deduplicated and sorted.
    pub fn datasets(&self) -> Vec<String> {
        let set: BTreeSet<&String> = self.tables.values().flat_map(|t| t.datasets.iter()).collect();
        set.into_iter().cloned().collect()
    }

    /// Dimensions declared by any table, deduplicated and sorted.
    pub fn dimensions(&self) -> Vec<String> {
        let set: BTreeSet<&String> = self.tables.values().flat_map(|t| t.dimensions.iter()).collect();
        set.into_iter().cloned().collect()
    }

    /// Aggregation of a metric as declared by the first table defining it.
    pub fn aggregation_of(&self, metric: &str) -> Option<Aggregation> {
        self.tables
            .values()
            .find_map(|t| t.metric(metric).map(|m| m.aggregation))
    }
}
