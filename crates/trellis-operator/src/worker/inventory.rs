//! Built-in task: record what runs on each target cluster

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::ListParams;
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use trellis_common::Result;

use super::task::{Task, WorkerTarget};

/// Lists the namespaces of each target and logs the count
#[derive(Default)]
pub struct ComponentInventoryTask;

impl ComponentInventoryTask {
    /// Registered task name
    pub const NAME: &'static str = "component-inventory";
}

#[async_trait]
impl Task<Client> for ComponentInventoryTask {
    fn name(&self) -> &str {
        Self::NAME
    }

    #[instrument(skip_all, fields(target = %target))]
    async fn run(
        &self,
        cancel: &CancellationToken,
        target: &WorkerTarget,
        _shared: &Client,
        target_client: &Client,
    ) -> Result<()> {
        let api: Api<Namespace> = Api::all(target_client.clone());
        let lp = ListParams::default();
        let list = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            list = api.list_metadata(&lp) => list?,
        };
        debug!(namespaces = list.items.len(), "target inventory");
        Ok(())
    }
}
