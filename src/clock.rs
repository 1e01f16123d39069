//! Time sources for loader bookkeeping and health checks
//!
//! `MonotonicClock` never goes backward, so a wall-clock step cannot make a
//! loader look fresher or staler than it is. `ManualClock` is moved by hand.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock guarded by a high-water mark
#[derive(Debug, Default)]
pub struct MonotonicClock {
    /// Largest timestamp handed out so far (micros)
    high_water_us: AtomicI64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current time in microseconds, never below a previous reading.
    pub fn now_micros(&self) -> i64 {
        let wall = Utc::now().timestamp_micros();
        let mut prev = self.high_water_us.load(Ordering::Acquire);
        loop {
            let ts = wall.max(prev);
            match self.high_water_us.compare_exchange_weak(
                prev,
                ts,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return ts,
                Err(actual) => prev = actual,
            }
        }
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.now_micros()).unwrap_or_else(Utc::now)
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: std::time::Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_monotonic_never_decreases() {
        let clock = MonotonicClock::new();
        let mut prev = 0i64;
        for _ in 0..100 {
            let ts = clock.now_micros();
            assert!(ts >= prev, "timestamps must not go backward");
            prev = ts;
        }
        assert!(clock.now().timestamp() > 1_577_836_800);
    }

    #[test]
    fn test_concurrent_readers_stay_monotonic() {
        let clock = Arc::new(MonotonicClock::new());
        let mut handles = vec![];
        for _ in 0..4 {
            let c = clock.clone();
            handles.push(std::thread::spawn(move || {
                let mut prev = 0i64;
                for _ in 0..1000 {
                    let ts = c.now_micros();
                    assert!(ts >= prev);
                    prev = ts;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_manual_clock_advances() {
        let start: DateTime<Utc> = "2024-01-01T00:00:00Z".parse().unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now(), "2024-01-01T00:01:30Z".parse::<DateTime<Utc>>().unwrap());
    }
}
