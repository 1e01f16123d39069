//! Time grains and calendar arithmetic

use chrono::{DateTime, Datelike, Days, Duration, Months, NaiveDate, TimeDelta, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bucketing granularity of a request or a physical table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeGrain {
    Hour,
    Day,
    /// ISO week, starting on Monday
    Week,
    Month,
    Quarter,
    Year,
    /// A single bucket spanning the whole request
    All,
}

impl TimeGrain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Quarter => "quarter",
            Self::Year => "year",
            Self::All => "all",
        }
    }

    /// Whether a table stored at `self` can answer a request bucketed at `request`
    /// by rolling whole buckets up. Weeks straddle month boundaries, so a weekly
    /// table only answers weekly (or `all`) requests.
    pub fn satisfies(&self, request: TimeGrain) -> bool {
        if request == TimeGrain::All || *self == request {
            return true;
        }
        match self {
            Self::Hour => true,
            Self::Day => matches!(
                request,
                Self::Week | Self::Month | Self::Quarter | Self::Year
            ),
            Self::Week => false,
            Self::Month => matches!(request, Self::Quarter | Self::Year),
            Self::Quarter => request == Self::Year,
            Self::Year | Self::All => false,
        }
    }

    /// Floor a timestamp to the start of its bucket.
    pub fn align(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let date = ts.date_naive();
        match self {
            Self::Hour => ts
                .with_minute(0)
                .and_then(|t| t.with_second(0))
                .and_then(|t| t.with_nanosecond(0))
                .unwrap_or(ts),
            Self::Day => midnight(date),
            Self::Week => {
                let back = u64::from(date.weekday().num_days_from_monday());
                midnight(date.checked_sub_days(Days::new(back)).unwrap_or(date))
            }
            Self::Month => first_of_month(date.year(), date.month()),
            Self::Quarter => first_of_month(date.year(), ((date.month() - 1) / 3) * 3 + 1),
            Self::Year => first_of_month(date.year(), 1),
            Self::All => ts,
        }
    }

    pub fn is_aligned(&self, ts: DateTime<Utc>) -> bool {
        self.align(ts) == ts
    }

    /// Move a timestamp by `periods` buckets (negative moves into the past).
    ///
    /// `None` when the result falls outside the representable time range.
    pub fn add(&self, ts: DateTime<Utc>, periods: i64) -> Option<DateTime<Utc>> {
        match self {
            Self::Hour => ts.checked_add_signed(TimeDelta::try_hours(periods)?),
            Self::Day => ts.checked_add_signed(TimeDelta::try_days(periods)?),
            Self::Week => ts.checked_add_signed(TimeDelta::try_weeks(periods)?),
            Self::Month => add_months(ts, periods),
            Self::Quarter => add_months(ts, periods.checked_mul(3)?),
            Self::Year => add_months(ts, periods.checked_mul(12)?),
            Self::All => Some(ts),
        }
    }

    /// Nominal length of one bucket; calendar grains use average lengths.
    pub fn nominal_duration(&self) -> Option<Duration> {
        match self {
            Self::Hour => Some(Duration::hours(1)),
            Self::Day => Some(Duration::days(1)),
            Self::Week => Some(Duration::weeks(1)),
            Self::Month => Some(Duration::days(30)),
            Self::Quarter => Some(Duration::days(91)),
            Self::Year => Some(Duration::days(365)),
            Self::All => None,
        }
    }

    /// Smallest whole number of buckets at least as long as `span` (minimum 1).
    pub fn periods_covering(&self, span: Duration) -> i64 {
        match self.nominal_duration() {
            Some(unit) => {
                let unit = unit.num_seconds().max(1);
                let span = span.num_seconds().max(1);
                ((span + unit - 1) / unit).max(1)
            }
            None => 1,
        }
    }

    /// Number of buckets touched by `[start, end)`.
    pub fn bucket_count(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
        if end <= start {
            return 0;
        }
        let first = self.align(start);
        match self {
            Self::All => 1,
            Self::Hour | Self::Day | Self::Week => {
                let unit = self
                    .nominal_duration()
                    .map(|d| d.num_seconds())
                    .unwrap_or(1)
                    .max(1);
                let span = (end - first).num_seconds();
                ((span + unit - 1) / unit) as u64
            }
            Self::Month | Self::Quarter | Self::Year => {
                let step = match self {
                    Self::Month => 1,
                    Self::Quarter => 3,
                    _ => 12,
                };
                let months = month_index(end) - month_index(first);
                let partial = if TimeGrain::Month.is_aligned(end) { 0 } else { 1 };
                let months = (months + partial).max(1);
                ((months + step - 1) / step) as u64
            }
        }
    }

    /// Ordinal from finest to coarsest.
    pub fn coarseness(&self) -> u8 {
        match self {
            Self::Hour => 0,
            Self::Day => 1,
            Self::Week => 2,
            Self::Month => 3,
            Self::Quarter => 4,
            Self::Year => 5,
            Self::All => 6,
        }
    }
}

impl fmt::Display for TimeGrain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TimeGrain {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "quarter" => Ok(Self::Quarter),
            "year" => Ok(Self::Year),
            "all" => Ok(Self::All),
            other => Err(format!(
                "'{}' is not a valid granularity. Try 'hour', 'day', 'week', 'month', 'quarter', 'year' or 'all'",
                other
            )),
        }
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default())
}

fn first_of_month(year: i32, month: u32) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .map(midnight)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn month_index(ts: DateTime<Utc>) -> i64 {
    ts.year() as i64 * 12 + (ts.month() as i64 - 1)
}

fn add_months(ts: DateTime<Utc>, months: i64) -> Option<DateTime<Utc>> {
    let magnitude = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
    if months >= 0 {
        ts.checked_add_months(magnitude)
    } else {
        ts.checked_sub_months(magnitude)
    }
}
