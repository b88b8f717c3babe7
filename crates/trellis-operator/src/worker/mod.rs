//! Periodic cross-cluster worker
//!
//! On a fixed interval the worker lists target clusters, builds a client for
//! each from its published credentials and runs every registered task
//! against it on a bounded pool. Tasks can be registered and unregistered
//! while the worker runs; a task removed mid-tick does not start again.

mod inventory;
mod pool;
mod sources;
mod task;

pub use inventory::ComponentInventoryTask;
pub use pool::{ClientFactory, PeriodicWorker, TargetSource};
pub use sources::{CloudOrchestratorTargets, KubeconfigClientFactory};
pub use task::{Task, TaskRegistry, WorkerTarget};
