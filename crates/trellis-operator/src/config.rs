//! Operator configuration from flags and environment

use std::time::Duration;

use clap::Args;
use thiserror::Error;

use crate::controller::RequeueTimings;

/// Invalid operator configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A duration or count that must be positive was zero
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Runtime settings for the controller and the periodic worker
#[derive(Args, Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Seconds between periodic worker ticks
    #[arg(long, env = "TRELLIS_WORKER_INTERVAL_SECS", default_value_t = 300)]
    pub worker_interval_secs: u64,

    /// Maximum concurrent worker task runs
    #[arg(long, env = "TRELLIS_WORKER_POOL_SIZE", default_value_t = 8)]
    pub worker_pool_size: usize,

    /// Do not start the periodic worker
    #[arg(long, env = "TRELLIS_DISABLE_WORKER")]
    pub disable_worker: bool,

    /// Seconds between resyncs of a settled ControlPlane
    #[arg(long, env = "TRELLIS_RESYNC_SECS", default_value_t = 60)]
    pub resync_secs: u64,

    /// Seconds between reconciles while components wait on dependents
    #[arg(long, env = "TRELLIS_WAITING_REQUEUE_SECS", default_value_t = 10)]
    pub waiting_requeue_secs: u64,

    /// Seconds before retrying after a transient error
    #[arg(long, env = "TRELLIS_ERROR_REQUEUE_SECS", default_value_t = 30)]
    pub error_requeue_secs: u64,

    /// Emit JSON log lines
    #[arg(long, env = "TRELLIS_LOG_JSON")]
    pub log_json: bool,

    /// OTLP gRPC endpoint for span export
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            worker_interval_secs: 300,
            worker_pool_size: 8,
            disable_worker: false,
            resync_secs: 60,
            waiting_requeue_secs: 10,
            error_requeue_secs: 30,
            log_json: false,
            otlp_endpoint: None,
        }
    }
}

impl OperatorConfig {
    /// Reject settings that would spin or stall the operator
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.worker_interval_secs == 0, "worker interval"),
            (self.worker_pool_size == 0, "worker pool size"),
            (self.resync_secs == 0, "resync interval"),
            (self.waiting_requeue_secs == 0, "waiting requeue interval"),
            (self.error_requeue_secs == 0, "error requeue interval"),
        ];
        match checks.into_iter().find(|(zero, _)| *zero) {
            Some((_, field)) => Err(ConfigError::Zero(field)),
            None => Ok(()),
        }
    }

    /// Worker tick interval
    pub fn worker_interval(&self) -> Duration {
        Duration::from_secs(self.worker_interval_secs)
    }

    /// Reconciler requeue intervals
    pub fn requeue_timings(&self) -> RequeueTimings {
        RequeueTimings {
            resync: Duration::from_secs(self.resync_secs),
            waiting: Duration::from_secs(self.waiting_requeue_secs),
            error: Duration::from_secs(self.error_requeue_secs),
        }
    }
}
