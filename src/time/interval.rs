//! Half-open UTC intervals and normalized interval sets

use super::TimeGrain;
use crate::error::{Error, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// `[start, end)` in UTC, with `start < end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawInterval")]
pub struct Interval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawInterval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TryFrom<RawInterval> for Interval {
    type Error = Error;

    fn try_from(raw: RawInterval) -> Result<Self> {
        Interval::new(raw.start, raw.end)
    }
}

impl Interval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(Error::InvalidQuery(format!(
                "interval start {} must be before end {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }

    pub fn intersect(&self, other: &Interval) -> Option<Interval> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(Interval { start, end })
    }

    /// Move both bounds by `periods` buckets of `grain`; `None` when either
    /// bound leaves the representable range.
    pub fn shift(&self, grain: TimeGrain, periods: i64) -> Option<Interval> {
        let start = grain.add(self.start, periods)?;
        let end = grain.add(self.end, periods)?;
        Interval::new(start, end).ok()
    }

    pub fn is_aligned_to(&self, grain: TimeGrain) -> bool {
        grain.is_aligned(self.start) && grain.is_aligned(self.end)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Accepts `start/end` where each side is RFC 3339 or a plain `YYYY-MM-DD` date.
impl std::str::FromStr for Interval {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let (start, end) = value
            .split_once('/')
            .ok_or_else(|| Error::InvalidQuery(format!("interval '{}' is not start/end", value)))?;
        Interval::new(parse_instant(start)?, parse_instant(end)?)
    }
}

fn parse_instant(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
        .ok_or_else(|| Error::InvalidQuery(format!("cannot parse instant '{}'", value)))
}

/// Sorted, non-overlapping set of intervals; adjacent intervals are merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<Interval>", into = "Vec<Interval>")]
pub struct IntervalSet {
    intervals: Vec<Interval>,
}

impl From<Vec<Interval>> for IntervalSet {
    fn from(intervals: Vec<Interval>) -> Self {
        Self::from_intervals(intervals)
    }
}

impl From<IntervalSet> for Vec<Interval> {
    fn from(set: IntervalSet) -> Self {
        set.intervals
    }
}

impl From<Interval> for IntervalSet {
    fn from(interval: Interval) -> Self {
        Self {
            intervals: vec![interval],
        }
    }
}

impl FromIterator<Interval> for IntervalSet {
    fn from_iter<I: IntoIterator<Item = Interval>>(iter: I) -> Self {
        Self::from_intervals(iter)
    }
}

impl IntervalSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_intervals(intervals: impl IntoIterator<Item = Interval>) -> Self {
        let mut sorted: Vec<Interval> = intervals.into_iter().collect();
        sorted.sort();

        let mut merged: Vec<Interval> = Vec::with_capacity(sorted.len());
        for interval in sorted {
            match merged.last_mut() {
                Some(last) if interval.start <= last.end => {
                    last.end = last.end.max(interval.end);
                }
                _ => merged.push(interval),
            }
        }
        Self { intervals: merged }
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interval> {
        self.intervals.iter()
    }

    pub fn as_slice(&self) -> &[Interval] {
        &self.intervals
    }

    /// Smallest single interval enclosing the whole set.
    pub fn span(&self) -> Option<Interval> {
        let first = self.intervals.first()?;
        let last = self.intervals.last()?;
        Some(Interval {
            start: first.start,
            end: last.end,
        })
    }

    pub fn total_duration(&self) -> Duration {
        self.intervals
            .iter()
            .fold(Duration::zero(), |acc, i| acc + i.duration())
    }

    pub fn union(&self, other: &IntervalSet) -> IntervalSet {
        Self::from_intervals(self.intervals.iter().chain(other.intervals.iter()).copied())
    }

    pub fn intersect(&self, other: &IntervalSet) -> IntervalSet {
        let mut out = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.intervals.len() && j < other.intervals.len() {
            let a = self.intervals[i];
            let b = other.intervals[j];
            if let Some(overlap) = a.intersect(&b) {
                out.push(overlap);
            }
            if a.end <= b.end {
                i += 1;
            } else {
                j += 1;
            }
        }
        Self { intervals: out }
    }

    /// Portions of `self` not covered by `other`.
    pub fn subtract(&self, other: &IntervalSet) -> IntervalSet {
        let mut out = Vec::new();
        let mut first_candidate = 0;

        for a in &self.intervals {
            while first_candidate < other.intervals.len()
                && other.intervals[first_candidate].end <= a.start
            {
                first_candidate += 1;
            }

            let mut cursor = a.start;
            let mut k = first_candidate;
            while k < other.intervals.len() && other.intervals[k].start < a.end {
                let b = other.intervals[k];
                if b.start > cursor {
                    out.push(Interval {
                        start: cursor,
                        end: b.start,
                    });
                }
                cursor = cursor.max(b.end);
                if cursor >= a.end {
                    break;
                }
                k += 1;
            }
            if cursor < a.end {
                out.push(Interval {
                    start: cursor,
                    end: a.end,
                });
            }
        }
        Self { intervals: out }
    }

    pub fn contains_set(&self, other: &IntervalSet) -> bool {
        other.subtract(self).is_empty()
    }

    /// Shift every interval by `periods` buckets of `grain`. All or nothing:
    /// `None` if any interval cannot be shifted.
    pub fn shift(&self, grain: TimeGrain, periods: i64) -> Option<IntervalSet> {
        self.intervals
            .iter()
            .map(|i| i.shift(grain, periods))
            .collect::<Option<Vec<_>>>()
            .map(Self::from_intervals)
    }

    /// Cut the set into consecutive pieces of at most `periods` buckets each,
    /// anchored at the start of each interval. Pieces are returned in order.
    pub fn split_every(&self, grain: TimeGrain, periods: i64) -> Vec<Interval> {
        if grain == TimeGrain::All || periods <= 0 {
            return self.intervals.clone();
        }
        let mut pieces = Vec::new();
        for interval in &self.intervals {
            let mut cursor = interval.start;
            while cursor < interval.end {
                let next = grain
                    .add(cursor, periods)
                    .map_or(interval.end, |t| t.min(interval.end));
                if next <= cursor {
                    break;
                }
                pieces.push(Interval {
                    start: cursor,
                    end: next,
                });
                cursor = next;
            }
        }
        pieces
    }

    pub fn is_aligned_to(&self, grain: TimeGrain) -> bool {
        self.intervals.iter().all(|i| i.is_aligned_to(grain))
    }
}

/// Comma-separated list of `start/end` intervals.
impl std::str::FromStr for IntervalSet {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        value
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::parse::<Interval>)
            .collect::<Result<Vec<_>>>()
            .map(Self::from_intervals)
    }
}

impl fmt::Display for IntervalSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (idx, interval) in self.intervals.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", interval)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iv(s: &str) -> Interval {
        s.parse().unwrap()
    }

    fn set(items: &[&str]) -> IntervalSet {
        items.iter().map(|s| iv(s)).collect()
    }

    #[test]
    fn test_rejects_inverted_interval() {
        assert!("2024-01-05/2024-01-01".parse::<Interval>().is_err());
        assert!("2024-01-05/2024-01-05".parse::<Interval>().is_err());
    }

    #[test]
    fn test_normalization_merges_adjacent_and_overlapping() {
        let s = set(&[
            "2024-01-05/2024-01-07",
            "2024-01-01/2024-01-03",
            "2024-01-03/2024-01-04",
            "2024-01-06/2024-01-09",
        ]);
        assert_eq!(
            s,
            set(&["2024-01-01/2024-01-04", "2024-01-05/2024-01-09"])
        );
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn test_intersect_and_subtract() {
        let requested = set(&["2024-01-01/2024-01-10"]);
        let available = set(&["2024-01-01/2024-01-05", "2024-01-07/2024-01-08"]);

        assert_eq!(requested.intersect(&available), available);
        assert_eq!(
            requested.subtract(&available),
            set(&["2024-01-05/2024-01-07", "2024-01-08/2024-01-10"])
        );
        assert!(requested.contains_set(&available));
        assert!(!available.contains_set(&requested));
    }

    #[test]
    fn test_subtract_spanning_interval() {
        let a = set(&["2024-01-01/2024-01-03", "2024-01-05/2024-01-08"]);
        let b = set(&["2024-01-02/2024-01-06"]);
        assert_eq!(
            a.subtract(&b),
            set(&["2024-01-01/2024-01-02", "2024-01-06/2024-01-08"])
        );
    }

    #[test]
    fn test_total_duration_and_span() {
        let s = set(&["2024-01-01/2024-01-03", "2024-01-05/2024-01-06"]);
        assert_eq!(s.total_duration(), Duration::days(3));
        assert_eq!(s.span(), Some(iv("2024-01-01/2024-01-06")));
        assert_eq!(IntervalSet::empty().span(), None);
    }

    #[test]
    fn test_split_every_thirty_days_in_three() {
        let s = set(&["2024-01-01/2024-01-31"]);
        let pieces = s.split_every(TimeGrain::Day, 10);
        assert_eq!(
            pieces,
            vec![
                iv("2024-01-01/2024-01-11"),
                iv("2024-01-11/2024-01-21"),
                iv("2024-01-21/2024-01-31"),
            ]
        );
    }

    #[test]
    fn test_shift_by_calendar_grain() {
        let s = set(&["2024-03-01/2024-04-01"]);
        assert_eq!(s.shift(TimeGrain::Year, -1), Some(set(&["2023-03-01/2023-04-01"])));
    }

    #[test]
    fn test_shift_out_of_range_drops_nothing() {
        let s = set(&["2024-01-01/2024-01-05", "2024-02-01/2024-02-03"]);
        assert_eq!(s.shift(TimeGrain::Day, -200_000_000), None);
        assert_eq!(iv("2024-01-01/2024-01-05").shift(TimeGrain::Hour, i64::MAX), None);
    }

    #[test]
    fn test_serde_roundtrip_normalizes() {
        let json = r#"[{"start":"2024-01-03T00:00:00Z","end":"2024-01-04T00:00:00Z"},
                       {"start":"2024-01-01T00:00:00Z","end":"2024-01-03T00:00:00Z"}]"#;
        let parsed: IntervalSet = serde_json::from_str(json).unwrap();
        assert_eq!(parsed, set(&["2024-01-01/2024-01-04"]));

        let bad = r#"[{"start":"2024-01-03T00:00:00Z","end":"2024-01-01T00:00:00Z"}]"#;
        assert!(serde_json::from_str::<IntervalSet>(bad).is_err());
    }
}
