//! Dependency finalizer protocol
//!
//! A component that depends on another places a finalizer token named after
//! its own type on the dependency's resource. The store will not finish
//! deleting a resource while any finalizer remains, so the dependency
//! outlives every dependent. Each dependent adds and clears only its own
//! token; there is no central coordinator.
//!
//! Writes go through a read-modify-write cycle guarded by a mutex owned by
//! [`DependencyFinalizers`], and every patch carries the `resourceVersion`
//! that was read, so a write racing another replica fails with 409 Conflict
//! instead of clobbering the list. The mutex only serializes writers inside
//! this process; running more than one active replica still requires leader
//! election.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, DynamicObject, Patch, PatchParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::crd::ComponentType;
use crate::kube_utils::component_api_resource;
use crate::{Error, Result};

/// Ordered set of finalizer tokens as stored in `metadata.finalizers`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FinalizerSet(Vec<String>);

impl FinalizerSet {
    /// Wrap a finalizer list read from the store
    pub fn new(finalizers: Vec<String>) -> Self {
        Self(finalizers)
    }

    /// Whether `token` is present
    pub fn has(&self, token: &str) -> bool {
        self.0.iter().any(|f| f == token)
    }

    /// Append `token` if absent, returning whether the set changed
    pub fn add(&mut self, token: &str) -> bool {
        if self.has(token) {
            return false;
        }
        self.0.push(token.to_string());
        true
    }

    /// Remove every occurrence of `token`, returning whether the set changed
    pub fn remove(&mut self, token: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|f| f != token);
        self.0.len() != before
    }

    /// Component types currently holding a dependency token
    pub fn dependents(&self) -> Vec<ComponentType> {
        let mut dependents: Vec<_> = self
            .0
            .iter()
            .filter_map(|f| ComponentType::from_finalizer_token(f))
            .collect();
        dependents.sort();
        dependents.dedup();
        dependents
    }

    /// Whether no finalizer at all is present
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the tokens in stored order
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl From<Option<Vec<String>>> for FinalizerSet {
    fn from(finalizers: Option<Vec<String>>) -> Self {
        Self(finalizers.unwrap_or_default())
    }
}

/// Identity of a component resource
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ComponentRef {
    /// Component kind
    pub kind: ComponentType,
    /// Namespace of the resource
    pub namespace: String,
    /// Name of the resource
    pub name: String,
}

impl ComponentRef {
    /// Reference a component resource
    pub fn new(kind: ComponentType, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// The resource of another kind sharing this one's name and namespace
    pub fn sibling(&self, kind: ComponentType) -> Self {
        Self {
            kind,
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

impl std::fmt::Display for ComponentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Finalizers of a resource as read from the store
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FinalizerSnapshot {
    /// The finalizer list
    pub finalizers: Vec<String>,
    /// `metadata.resourceVersion` at read time
    pub resource_version: Option<String>,
}

/// Store access needed by the protocol, mockable for tests
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FinalizerStore: Send + Sync {
    /// Fetch the current finalizers of `target`, `None` if it does not exist
    async fn get_finalizers(&self, target: &ComponentRef) -> Result<Option<FinalizerSnapshot>>;

    /// Replace the finalizers of `target`, failing if it changed since `resource_version`
    async fn patch_finalizers(
        &self,
        target: &ComponentRef,
        finalizers: &[String],
        resource_version: Option<String>,
    ) -> Result<()>;
}

/// Finalizer store backed by the Kubernetes API
pub struct KubeFinalizerStore {
    client: Client,
}

impl KubeFinalizerStore {
    /// Create a store using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, target: &ComponentRef) -> Api<DynamicObject> {
        Api::namespaced_with(
            self.client.clone(),
            &target.namespace,
            &component_api_resource(target.kind),
        )
    }
}

#[async_trait]
impl FinalizerStore for KubeFinalizerStore {
    async fn get_finalizers(&self, target: &ComponentRef) -> Result<Option<FinalizerSnapshot>> {
        let obj = self.api(target).get_opt(&target.name).await?;
        Ok(obj.map(|o| FinalizerSnapshot {
            finalizers: o.metadata.finalizers.unwrap_or_default(),
            resource_version: o.metadata.resource_version,
        }))
    }

    async fn patch_finalizers(
        &self,
        target: &ComponentRef,
        finalizers: &[String],
        resource_version: Option<String>,
    ) -> Result<()> {
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": resource_version,
            }
        });
        self.api(target)
            .patch(&target.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Serialized add/remove of dependency finalizer tokens
pub struct DependencyFinalizers {
    store: Arc<dyn FinalizerStore>,
    lock: Mutex<()>,
}

impl DependencyFinalizers {
    /// Create the protocol over a store
    pub fn new(store: Arc<dyn FinalizerStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    /// Make the presence of `dependent`'s token on `requirement` equal `expected`.
    ///
    /// Returns whether a write was made. A second call with the same
    /// `expected` re-reads and writes nothing. A missing requirement is fine
    /// when removing and a `DependencyNotFound` error when adding.
    pub async fn ensure(
        &self,
        requirement: &ComponentRef,
        dependent: ComponentType,
        expected: bool,
    ) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let token = dependent.finalizer_token();

        let Some(snapshot) = self.store.get_finalizers(requirement).await? else {
            if expected {
                return Err(Error::DependencyNotFound {
                    kind: requirement.kind,
                    namespace: requirement.namespace.clone(),
                    name: requirement.name.clone(),
                });
            }
            return Ok(false);
        };

        let mut set = FinalizerSet::new(snapshot.finalizers);
        let changed = if expected {
            set.add(&token)
        } else {
            set.remove(&token)
        };
        if !changed {
            debug!(
                requirement = %requirement,
                token = %token,
                expected,
                "dependency finalizer already in place"
            );
            return Ok(false);
        }

        self.store
            .patch_finalizers(requirement, set.as_slice(), snapshot.resource_version)
            .await?;
        info!(requirement = %requirement, token = %token, expected, "updated dependency finalizer");
        Ok(true)
    }

    /// Ensure `dependent` holds (or released) its token on every declared dependency.
    ///
    /// Every dependency is attempted; failures are joined.
    pub async fn ensure_dependency_finalizers(
        &self,
        dependent: &ComponentRef,
        expected: bool,
    ) -> Result<()> {
        let mut errors = Vec::new();
        for requirement in dependent.kind.dependencies() {
            let requirement = dependent.sibling(*requirement);
            if let Err(e) = self.ensure(&requirement, dependent.kind, expected).await {
                errors.push(e);
            }
        }
        match Error::join(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::*;

    fn auth_ref() -> ComponentRef {
        ComponentRef::new(ComponentType::Authentication, "tenants", "prod")
    }

    fn snapshot(finalizers: &[&str]) -> FinalizerSnapshot {
        FinalizerSnapshot {
            finalizers: finalizers.iter().map(|s| s.to_string()).collect(),
            resource_version: Some("42".to_string()),
        }
    }

    #[test]
    fn finalizer_set_add_remove_has() {
        let mut set = FinalizerSet::from(None);
        assert!(set.is_empty());
        assert!(set.add("a"));
        assert!(!set.add("a"));
        assert!(set.has("a"));

        let mut dup = FinalizerSet::new(vec!["a".into(), "b".into(), "a".into()]);
        assert!(dup.remove("a"));
        assert_eq!(dup.as_slice(), ["b".to_string()]);
        assert!(!dup.remove("a"));
    }

    #[test]
    fn dependents_lists_only_dependency_tokens() {
        let set = FinalizerSet::new(vec![
            "trellis.dev/control-plane".to_string(),
            ComponentType::DeploymentService.finalizer_token(),
            ComponentType::Authorization.finalizer_token(),
        ]);
        assert_eq!(
            set.dependents(),
            vec![ComponentType::Authorization, ComponentType::DeploymentService]
        );
    }

    /// Story: adding a token writes once, with the read resourceVersion
    #[tokio::test]
    async fn story_add_patches_with_resource_version() {
        let mut store = MockFinalizerStore::new();
        store
            .expect_get_finalizers()
            .with(eq(auth_ref()))
            .returning(|_| Ok(Some(snapshot(&["other.io/keep"]))));
        store
            .expect_patch_finalizers()
            .withf(|target, finalizers, rv| {
                target.kind == ComponentType::Authentication
                    && finalizers
                        == [
                            "other.io/keep".to_string(),
                            ComponentType::ApiServer.finalizer_token(),
                        ]
                    && rv.as_deref() == Some("42")
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let protocol = DependencyFinalizers::new(Arc::new(store));
        let wrote = protocol
            .ensure(&auth_ref(), ComponentType::ApiServer, true)
            .await
            .unwrap();
        assert!(wrote);
    }

    /// Story: a second identical call is a full no-op
    #[tokio::test]
    async fn story_already_correct_presence_writes_nothing() {
        let token = ComponentType::ApiServer.finalizer_token();
        let mut store = MockFinalizerStore::new();
        store
            .expect_get_finalizers()
            .times(2)
            .returning(move |_| Ok(Some(snapshot(&[token.as_str()]))));
        store.expect_patch_finalizers().never();

        let protocol = DependencyFinalizers::new(Arc::new(store));
        assert!(!protocol
            .ensure(&auth_ref(), ComponentType::ApiServer, true)
            .await
            .unwrap());
        assert!(!protocol
            .ensure(&auth_ref(), ComponentType::ApiServer, true)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn removal_drops_every_occurrence() {
        let token = ComponentType::Authorization.finalizer_token();
        let t = token.clone();
        let mut store = MockFinalizerStore::new();
        store
            .expect_get_finalizers()
            .returning(move |_| Ok(Some(snapshot(&[t.as_str(), "x/y", t.as_str()]))));
        store
            .expect_patch_finalizers()
            .withf(|_, finalizers, _| finalizers == ["x/y".to_string()])
            .times(1)
            .returning(|_, _, _| Ok(()));

        let protocol = DependencyFinalizers::new(Arc::new(store));
        assert!(protocol
            .ensure(&auth_ref(), ComponentType::Authorization, false)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn missing_requirement_is_fine_only_when_removing() {
        let mut store = MockFinalizerStore::new();
        store.expect_get_finalizers().returning(|_| Ok(None));
        store.expect_patch_finalizers().never();
        let protocol = DependencyFinalizers::new(Arc::new(store));

        assert!(!protocol
            .ensure(&auth_ref(), ComponentType::ApiServer, false)
            .await
            .unwrap());
        let err = protocol
            .ensure(&auth_ref(), ComponentType::ApiServer, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DependencyNotFound { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn store_errors_propagate_unmodified() {
        let mut store = MockFinalizerStore::new();
        store
            .expect_get_finalizers()
            .returning(|_| Ok(Some(snapshot(&[]))));
        store.expect_patch_finalizers().returning(|_, _, _| {
            Err(Error::Kube {
                source: kube::Error::Api(kube::core::ErrorResponse {
                    status: "Failure".to_string(),
                    message: "the object has been modified".to_string(),
                    reason: "Conflict".to_string(),
                    code: 409,
                }),
            })
        });

        let protocol = DependencyFinalizers::new(Arc::new(store));
        let err = protocol
            .ensure(&auth_ref(), ComponentType::ApiServer, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Kube { source: kube::Error::Api(ref ae) } if ae.code == 409));
    }

    /// Story: Authorization takes tokens on everything it depends on
    #[tokio::test]
    async fn story_ensure_dependency_finalizers_covers_all_dependencies() {
        let mut store = MockFinalizerStore::new();
        store
            .expect_get_finalizers()
            .times(ComponentType::Authorization.dependencies().len())
            .returning(|_| Ok(Some(snapshot(&[]))));
        store
            .expect_patch_finalizers()
            .withf(|target, finalizers, _| {
                target.name == "prod"
                    && ComponentType::Authorization.dependencies().contains(&target.kind)
                    && finalizers == [ComponentType::Authorization.finalizer_token()]
            })
            .times(ComponentType::Authorization.dependencies().len())
            .returning(|_, _, _| Ok(()));

        let protocol = DependencyFinalizers::new(Arc::new(store));
        let dependent = ComponentRef::new(ComponentType::Authorization, "tenants", "prod");
        protocol
            .ensure_dependency_finalizers(&dependent, true)
            .await
            .unwrap();
    }
}
