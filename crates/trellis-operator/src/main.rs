//! Trellis operator - control-plane orchestration for Kubernetes

use std::sync::Arc;

use clap::Parser;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;

use trellis_common::crd::all_crds;
use trellis_common::kube_utils::create_client;
use trellis_common::retry::{retry_with_backoff, RetryConfig};
use trellis_common::telemetry::{init_telemetry, TelemetryConfig};
use trellis_common::FIELD_MANAGER;
use trellis_operator::config::OperatorConfig;
use trellis_operator::controller_runner::run_control_plane_controller;
use trellis_operator::worker::{
    CloudOrchestratorTargets, ComponentInventoryTask, KubeconfigClientFactory, PeriodicWorker,
    TaskRegistry,
};

/// Trellis - orchestrates control-plane components from a single ControlPlane resource
#[derive(Parser, Debug)]
#[command(name = "trellis", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    config: OperatorConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        for crd in all_crds() {
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    cli.config.validate()?;
    init_telemetry(TelemetryConfig {
        service_name: "trellis-operator".to_string(),
        otlp_endpoint: cli.config.otlp_endpoint.clone(),
        json: cli.config.log_json,
    })?;

    run(cli.config).await
}

async fn run(config: OperatorConfig) -> anyhow::Result<()> {
    let client = create_client().await?;

    retry_with_backoff(&RetryConfig::with_max_attempts(5), "install_crds", || {
        ensure_crds_installed(&client)
    })
    .await?;

    let cancel = CancellationToken::new();
    let worker = if config.disable_worker {
        tracing::info!("periodic worker disabled");
        None
    } else {
        let tasks = Arc::new(TaskRegistry::new());
        tasks.register(Arc::new(ComponentInventoryTask));
        let worker = PeriodicWorker::new(
            config.worker_interval(),
            config.worker_pool_size,
            tasks,
            Arc::new(CloudOrchestratorTargets::new(client.clone())),
            Arc::new(KubeconfigClientFactory),
            client.clone(),
        );
        Some(worker.spawn(cancel.clone()))
    };

    tracing::info!("Starting Trellis controllers");
    run_control_plane_controller(client, config.requeue_timings()).await;

    cancel.cancel();
    if let Some(handle) = worker {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "periodic worker exited abnormally");
        }
    }
    tracing::info!("Shutting down");
    Ok(())
}

/// Ensure all Trellis CRDs are installed
///
/// The operator installs its own CRDs on startup using server-side apply.
/// This ensures the CRD versions always match the operator version.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for crd in all_crds() {
        let name = crd.metadata.name.clone().unwrap_or_default();
        tracing::info!(crd = %name, "Installing CRD");
        crds.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to install {} CRD: {}", name, e))?;
    }

    tracing::info!("All Trellis CRDs installed/updated");
    Ok(())
}
