//! Controller runner: wires the ControlPlane reconciler into a kube-runtime
//! `Controller` watching the parent and every component kind it owns.

use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use trellis_common::crd::{
    ApiServer, Authentication, Authorization, CloudOrchestrator, ControlPlane, DeploymentService,
};

use crate::controller::{error_policy, reconcile, Context, RequeueTimings};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Run the ControlPlane controller until a shutdown signal arrives
pub async fn run_control_plane_controller(client: Client, timings: RequeueTimings) {
    let ctx = Arc::new(Context::builder(client.clone()).timings(timings).build());
    let watcher = || WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);

    tracing::info!("- ControlPlane controller");

    Controller::new(Api::<ControlPlane>::all(client.clone()), watcher())
        .owns(Api::<ApiServer>::all(client.clone()), watcher())
        .owns(Api::<Authentication>::all(client.clone()), watcher())
        .owns(Api::<Authorization>::all(client.clone()), watcher())
        .owns(Api::<DeploymentService>::all(client.clone()), watcher())
        .owns(Api::<CloudOrchestrator>::all(client), watcher())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(log_reconcile_result("ControlPlane"))
        .await;
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
