//! Production target discovery and client construction

use async_trait::async_trait;
use kube::api::ListParams;
use kube::{Api, Client};
use tracing::debug;

use trellis_common::crd::CloudOrchestrator;
use trellis_common::kube_utils::{
    create_client_from_kubeconfig, is_terminating, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT,
};
use trellis_common::{Error, Result};

use super::pool::{ClientFactory, TargetSource};
use super::task::WorkerTarget;

/// Targets are the clusters provisioned by CloudOrchestrator components
pub struct CloudOrchestratorTargets {
    client: Client,
}

impl CloudOrchestratorTargets {
    /// Discover targets through `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TargetSource for CloudOrchestratorTargets {
    async fn list_targets(&self) -> Result<Vec<WorkerTarget>> {
        let api: Api<CloudOrchestrator> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        let targets: Vec<_> = list
            .items
            .into_iter()
            .filter(|o| !is_terminating(&o.metadata))
            .map(to_target)
            .collect();
        debug!(count = targets.len(), "listed worker targets");
        Ok(targets)
    }
}

fn to_target(orchestrator: CloudOrchestrator) -> WorkerTarget {
    let kubeconfig = orchestrator
        .status
        .and_then(|s| s.external)
        .and_then(|e| e.kubeconfig)
        .filter(|k| !k.trim().is_empty());
    WorkerTarget {
        namespace: orchestrator.metadata.namespace.unwrap_or_default(),
        name: orchestrator.metadata.name.unwrap_or_default(),
        kubeconfig,
    }
}

/// Builds kube clients from the kubeconfig a target publishes
#[derive(Default)]
pub struct KubeconfigClientFactory;

#[async_trait]
impl ClientFactory<Client> for KubeconfigClientFactory {
    async fn client_for(&self, target: &WorkerTarget, kubeconfig: &str) -> Result<Client> {
        create_client_from_kubeconfig(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT)
            .await
            .map_err(|e| Error::credentials(target.to_string(), e.to_string()))
    }
}
