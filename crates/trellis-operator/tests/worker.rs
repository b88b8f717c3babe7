//! Periodic worker stories with in-memory targets and clients

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use trellis_common::Result;
use trellis_operator::worker::{
    ClientFactory, PeriodicWorker, Task, TaskRegistry, TargetSource, WorkerTarget,
};

type Runs = Arc<Mutex<BTreeMap<(String, String), usize>>>;

struct StaticTargets;

#[async_trait]
impl TargetSource for StaticTargets {
    async fn list_targets(&self) -> Result<Vec<WorkerTarget>> {
        Ok(["east", "west"]
            .into_iter()
            .map(|name| WorkerTarget {
                namespace: "tenants".to_string(),
                name: name.to_string(),
                kubeconfig: Some(format!("kubeconfig-{name}")),
            })
            .collect())
    }
}

struct EchoClients;

#[async_trait]
impl ClientFactory<String> for EchoClients {
    async fn client_for(&self, _target: &WorkerTarget, kubeconfig: &str) -> Result<String> {
        Ok(kubeconfig.to_string())
    }
}

struct Recording {
    name: &'static str,
    runs: Runs,
}

#[async_trait]
impl Task<String> for Recording {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(
        &self,
        _cancel: &CancellationToken,
        target: &WorkerTarget,
        _shared: &String,
        target_client: &String,
    ) -> Result<()> {
        assert_eq!(target_client, &format!("kubeconfig-{}", target.name));
        *self
            .runs
            .lock()
            .unwrap()
            .entry((self.name.to_string(), target.name.clone()))
            .or_default() += 1;
        Ok(())
    }
}

fn count(runs: &Runs, task: &str) -> usize {
    runs.lock()
        .unwrap()
        .iter()
        .filter(|((name, _), _)| name == task)
        .map(|(_, n)| n)
        .sum()
}

/// Story: every task runs against every target, and an unregistered task
/// stops running while the others continue
#[tokio::test]
async fn story_unregistered_task_stops_running() {
    let runs: Runs = Arc::default();
    let tasks = Arc::new(TaskRegistry::new());
    for name in ["inventory", "audit"] {
        tasks.register(Arc::new(Recording {
            name,
            runs: runs.clone(),
        }));
    }

    let worker = PeriodicWorker::new(
        Duration::from_millis(50),
        4,
        tasks.clone(),
        Arc::new(StaticTargets),
        Arc::new(EchoClients),
        "shared".to_string(),
    );
    let cancel = CancellationToken::new();
    let handle = worker.spawn(cancel.clone());

    tokio::time::sleep(Duration::from_millis(130)).await;
    {
        let runs = runs.lock().unwrap();
        for task in ["inventory", "audit"] {
            for target in ["east", "west"] {
                assert!(
                    runs.get(&(task.to_string(), target.to_string())).is_some(),
                    "{task} never ran on {target}"
                );
            }
        }
    }

    assert!(tasks.unregister("audit"));
    // Let any run that was already in flight finish
    tokio::time::sleep(Duration::from_millis(30)).await;
    let audit_runs = count(&runs, "audit");
    let inventory_runs = count(&runs, "inventory");

    tokio::time::sleep(Duration::from_millis(150)).await;
    cancel.cancel();
    handle.await.unwrap();

    assert_eq!(count(&runs, "audit"), audit_runs);
    assert!(count(&runs, "inventory") > inventory_runs);
}
