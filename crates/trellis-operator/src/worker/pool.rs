//! The periodic worker loop

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use trellis_common::Result;

use super::task::{TaskRegistry, WorkerTarget};

/// Discovers the targets to run tasks against
#[async_trait]
pub trait TargetSource: Send + Sync {
    /// Current targets
    async fn list_targets(&self) -> Result<Vec<WorkerTarget>>;
}

/// Builds a client for a target from its credentials
#[async_trait]
pub trait ClientFactory<C>: Send + Sync {
    /// A client for `target`, built from `kubeconfig`
    async fn client_for(&self, target: &WorkerTarget, kubeconfig: &str) -> Result<C>;
}

/// A (task, target) pair with a run queued or running
type RunKey = (String, String);

/// Releases a run's slot in the in-flight set when the run ends or is dropped
struct InFlight {
    runs: Arc<DashSet<RunKey>>,
    key: RunKey,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.runs.remove(&self.key);
    }
}

/// Runs every registered task against every target on a fixed interval,
/// with at most `pool_size` task runs in flight.
///
/// A task is not queued against a target while its previous run there is
/// still queued or running, so slow tasks do not pile up across ticks.
pub struct PeriodicWorker<C> {
    interval: Duration,
    pool: Arc<Semaphore>,
    in_flight: Arc<DashSet<RunKey>>,
    tasks: Arc<TaskRegistry<C>>,
    targets: Arc<dyn TargetSource>,
    clients: Arc<dyn ClientFactory<C>>,
    shared: C,
}

impl<C> PeriodicWorker<C>
where
    C: Clone + Send + Sync + 'static,
{
    /// Create a worker; `pool_size` is clamped to at least one
    pub fn new(
        interval: Duration,
        pool_size: usize,
        tasks: Arc<TaskRegistry<C>>,
        targets: Arc<dyn TargetSource>,
        clients: Arc<dyn ClientFactory<C>>,
        shared: C,
    ) -> Self {
        Self {
            interval,
            pool: Arc::new(Semaphore::new(pool_size.max(1))),
            in_flight: Arc::new(DashSet::new()),
            tasks,
            targets,
            clients,
            shared,
        }
    }

    /// Run the worker on the runtime until `cancel` fires
    ///
    /// The handle completes once every in-flight task has finished.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Run the worker until `cancel` fires, then drain in-flight tasks
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut runs: JoinSet<()> = JoinSet::new();
        info!(interval = ?self.interval, "periodic worker started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.tick(&cancel, &mut runs).await,
            }
            while let Some(finished) = runs.try_join_next() {
                if let Err(e) = finished {
                    warn!(error = %e, "worker task panicked");
                }
            }
        }

        info!(in_flight = runs.len(), "periodic worker stopping");
        while let Some(finished) = runs.join_next().await {
            if let Err(e) = finished {
                warn!(error = %e, "worker task panicked");
            }
        }
        info!("periodic worker stopped");
    }

    async fn tick(&self, cancel: &CancellationToken, runs: &mut JoinSet<()>) {
        if self.tasks.is_empty() {
            debug!("no tasks registered, skipping target listing");
            return;
        }
        let targets = match self.targets.list_targets().await {
            Ok(targets) => targets,
            Err(e) => {
                warn!(error = %e, "failed to list worker targets");
                return;
            }
        };

        for target in targets {
            let Some(kubeconfig) = target.kubeconfig.as_deref() else {
                warn!(target = %target, "target has no credentials yet, skipping");
                continue;
            };
            let client = match self.clients.client_for(&target, kubeconfig).await {
                Ok(client) => client,
                Err(e) => {
                    warn!(target = %target, error = %e, "invalid target credentials, skipping");
                    continue;
                }
            };

            let target = Arc::new(target);
            for task in self.tasks.snapshot() {
                let key = (task.name().to_string(), target.to_string());
                if !self.in_flight.insert(key.clone()) {
                    debug!(task = task.name(), target = %target, "previous run still in flight");
                    continue;
                }
                let slot = InFlight {
                    runs: self.in_flight.clone(),
                    key,
                };
                let registry = self.tasks.clone();
                let pool = self.pool.clone();
                let cancel = cancel.clone();
                let shared = self.shared.clone();
                let client = client.clone();
                let target = target.clone();
                runs.spawn(async move {
                    let _slot = slot;
                    let Ok(_permit) = pool.acquire_owned().await else {
                        return;
                    };
                    // Unregistered while queued for a permit
                    if cancel.is_cancelled() || !registry.contains(task.name()) {
                        return;
                    }
                    match task.run(&cancel, &target, &shared, &client).await {
                        Ok(()) => debug!(task = task.name(), target = %target, "task completed"),
                        Err(e) => {
                            warn!(task = task.name(), target = %target, error = %e, "task failed")
                        }
                    }
                });
            }
        }
    }
}
