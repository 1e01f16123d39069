//! Time model for Strata
//!
//! Requests and availability are both expressed as normalized sets of
//! half-open UTC intervals. Grains carry the calendar arithmetic needed to
//! align, step and count time buckets.

mod grain;
mod interval;

pub use grain::TimeGrain;
pub use interval::{Interval, IntervalSet};
