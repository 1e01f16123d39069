//! Request collapsing
//!
//! The first caller for a key becomes the leader and computes the result;
//! concurrent callers for the same key follow and receive the leader's
//! outcome. The leader's entry is removed exactly once, when its
//! `FlightGuard` drops, whether it completed, failed or was cancelled. A
//! follower whose leader vanished without completing gets `None` and should
//! join again.

use crate::query::ResultSet;
use crate::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

type Outcome = Result<ResultSet>;
type Inflight = Arc<Mutex<HashMap<String, Flight>>>;

struct Flight {
    id: u64,
    rx: watch::Receiver<Option<Outcome>>,
}

pub struct RequestCollapser {
    inflight: Inflight,
    next_id: AtomicU64,
}

pub enum Join {
    Leader(FlightGuard),
    Follower(Follower),
}

impl RequestCollapser {
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn join(&self, key: &str) -> Join {
        let mut inflight = self.inflight.lock();
        if let Some(flight) = inflight.get(key) {
            return Join::Follower(Follower {
                rx: flight.rx.clone(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        inflight.insert(key.to_string(), Flight { id, rx });
        Join::Leader(FlightGuard {
            key: key.to_string(),
            id,
            tx,
            inflight: Arc::clone(&self.inflight),
        })
    }

    /// Keys with a leader currently running.
    pub fn inflight_count(&self) -> usize {
        self.inflight.lock().len()
    }
}

impl Default for RequestCollapser {
    fn default() -> Self {
        Self::new()
    }
}

/// Held by the leader; releases the key on drop
pub struct FlightGuard {
    key: String,
    id: u64,
    tx: watch::Sender<Option<Outcome>>,
    inflight: Inflight,
}

impl FlightGuard {
    /// Publish the outcome to followers and release the key.
    pub fn complete(self, outcome: &Outcome) {
        self.tx.send_replace(Some(outcome.clone()));
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let mut inflight = self.inflight.lock();
        if inflight.get(&self.key).map(|f| f.id) == Some(self.id) {
            inflight.remove(&self.key);
        }
    }
}

pub struct Follower {
    rx: watch::Receiver<Option<Outcome>>,
}

impl Follower {
    /// Leader's outcome, or `None` if the leader was dropped first.
    pub async fn wait(mut self) -> Option<Outcome> {
        let outcome = match self.rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        outcome
    }
}
