//! Loader scheduling
//!
//! Each registered loader gets its own task. Runs across all loaders share a
//! semaphore sized by the pool. Every task listens on a child of the
//! scheduler's shutdown token, so one loader can be cancelled by name and
//! all of them at once.

use super::{Loader, LoaderState};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct LoaderScheduler {
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
    loaders: RwLock<Vec<Arc<dyn Loader>>>,
    tokens: Mutex<HashMap<String, CancellationToken>>,
    tasks: Mutex<JoinSet<()>>,
}

impl LoaderScheduler {
    pub fn new(pool_size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(pool_size.max(1))),
            shutdown: CancellationToken::new(),
            loaders: RwLock::new(Vec::new()),
            tokens: Mutex::new(HashMap::new()),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn register(&self, loader: Arc<dyn Loader>) {
        self.loaders.write().push(loader);
    }

    pub fn with_loader(self, loader: Arc<dyn Loader>) -> Self {
        self.register(loader);
        self
    }

    pub fn loaders(&self) -> Vec<Arc<dyn Loader>> {
        self.loaders.read().clone()
    }

    /// Spawn a task for every registered loader not already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let loaders = self.loaders.read().clone();
        let mut tokens = self.tokens.lock();
        let mut tasks = self.tasks.lock();
        for loader in loaders {
            let name = loader.name().to_string();
            if tokens.contains_key(&name) {
                continue;
            }
            let token = self.shutdown.child_token();
            tokens.insert(name.clone(), token.clone());
            info!(
                loader = %name,
                initial_delay_ms = loader.schedule().initial_delay.as_millis() as u64,
                period_secs = loader.schedule().period.map(|p| p.as_secs()),
                "Starting metadata loader"
            );
            tasks.spawn(drive(loader, Arc::clone(&self.permits), token));
        }
    }

    /// Stop one loader. Returns false if no task by that name was started.
    pub fn cancel(&self, name: &str) -> bool {
        match self.tokens.lock().get(name) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Token that stops every loader when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancel all loaders and wait for their tasks to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.wait().await;
        info!("Loader scheduler stopped");
    }

    /// Wait for every started task to finish.
    pub async fn wait(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    error!(error = %e, "Loader task panicked");
                }
            }
        }
    }

    pub fn states(&self) -> Vec<(String, LoaderState)> {
        self.loaders
            .read()
            .iter()
            .map(|l| (l.name().to_string(), l.state()))
            .collect()
    }
}

async fn drive(loader: Arc<dyn Loader>, permits: Arc<Semaphore>, token: CancellationToken) {
    let schedule = loader.schedule();
    tokio::select! {
        _ = token.cancelled() => return,
        _ = tokio::time::sleep(schedule.initial_delay) => {}
    }

    loop {
        let permit = tokio::select! {
            _ = token.cancelled() => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        tokio::select! {
            _ = token.cancelled() => break,
            outcome = loader.tick() => {
                if let Err(e) = outcome {
                    warn!(loader = loader.name(), error = %e, "Loader run failed");
                }
            }
        }
        drop(permit);

        let Some(period) = schedule.period else {
            break;
        };
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(period) => {}
        }
    }
    debug!(loader = loader.name(), "Loader task exiting");
}
