//! Tasks and the runtime task registry

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use trellis_common::Result;

/// A remote cluster the worker runs tasks against
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerTarget {
    /// Namespace of the resource describing the target
    pub namespace: String,
    /// Name of the resource describing the target
    pub name: String,
    /// Credentials for the target, if it has published any yet
    pub kubeconfig: Option<String>,
}

impl std::fmt::Display for WorkerTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A named unit of periodic work against one target
///
/// Runs may overlap with runs of other tasks on the same target and with a
/// slow previous run of the same task, so implementations must be
/// idempotent.
#[async_trait]
pub trait Task<C: Send + Sync>: Send + Sync {
    /// Unique name, used to register and unregister the task
    fn name(&self) -> &str;

    /// Do the work once
    ///
    /// `shared` talks to the cluster the operator runs in; `target_client`
    /// talks to `target`. Long operations should watch `cancel`.
    async fn run(
        &self,
        cancel: &CancellationToken,
        target: &WorkerTarget,
        shared: &C,
        target_client: &C,
    ) -> Result<()>;
}

/// Concurrency-safe set of tasks, editable while the worker runs
pub struct TaskRegistry<C> {
    tasks: DashMap<String, Arc<dyn Task<C>>>,
}

impl<C: Send + Sync> Default for TaskRegistry<C> {
    fn default() -> Self {
        Self {
            tasks: DashMap::new(),
        }
    }
}

impl<C: Send + Sync> TaskRegistry<C> {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task, replacing any task with the same name
    pub fn register(&self, task: Arc<dyn Task<C>>) -> Option<Arc<dyn Task<C>>> {
        self.tasks.insert(task.name().to_string(), task)
    }

    /// Remove a task by name, returning whether it was registered
    pub fn unregister(&self, name: &str) -> bool {
        self.tasks.remove(name).is_some()
    }

    /// Whether a task with this name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Registered tasks sorted by name
    pub fn snapshot(&self) -> Vec<Arc<dyn Task<C>>> {
        let mut tasks: Vec<_> = self.tasks.iter().map(|e| e.value().clone()).collect();
        tasks.sort_by(|a, b| a.name().cmp(b.name()));
        tasks
    }

    /// Whether no task is registered
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl Task<()> for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn run(
            &self,
            _cancel: &CancellationToken,
            _target: &WorkerTarget,
            _shared: &(),
            _target_client: &(),
        ) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn register_replace_unregister() {
        let registry: TaskRegistry<()> = TaskRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.register(Arc::new(Named("b"))).is_none());
        assert!(registry.register(Arc::new(Named("a"))).is_none());
        assert!(registry.register(Arc::new(Named("a"))).is_some());

        let names: Vec<_> = registry
            .snapshot()
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(names, ["a", "b"]);

        assert!(registry.unregister("a"));
        assert!(!registry.unregister("a"));
        assert!(!registry.contains("a"));
        assert!(registry.contains("b"));
    }

    #[test]
    fn target_displays_as_namespaced_name() {
        let target = WorkerTarget {
            namespace: "tenants".to_string(),
            name: "prod".to_string(),
            kubeconfig: None,
        };
        assert_eq!(target.to_string(), "tenants/prod");
    }
}
