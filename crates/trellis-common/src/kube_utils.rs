//! Kubernetes helpers shared by the orchestrator and the periodic worker

use std::collections::BTreeMap;
use std::time::Duration;

use kube::api::{Api, ObjectMeta, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};

use crate::crd::{
    ApiServer, Authentication, Authorization, CloudOrchestrator, ComponentType, DeploymentService,
};
use crate::{Error, OPERATION_ANNOTATION};

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// `ApiResource` of a component kind, for dynamic access by type
pub fn component_api_resource(kind: ComponentType) -> ApiResource {
    match kind {
        ComponentType::ApiServer => ApiResource::erase::<ApiServer>(&()),
        ComponentType::Authentication => ApiResource::erase::<Authentication>(&()),
        ComponentType::Authorization => ApiResource::erase::<Authorization>(&()),
        ComponentType::DeploymentService => ApiResource::erase::<DeploymentService>(&()),
        ComponentType::CloudOrchestrator => ApiResource::erase::<CloudOrchestrator>(&()),
    }
}

/// Build a client for a remote cluster from a kubeconfig document
pub async fn create_client_from_kubeconfig(
    kubeconfig: &str,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let kubeconfig = Kubeconfig::from_yaml(kubeconfig).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to parse kubeconfig: {}", e))
    })?;
    let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| {
            Error::internal_with_context(
                "create_client",
                format!("failed to load kubeconfig: {}", e),
            )
        })?;
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Create the in-cluster (or local kubeconfig) client with default timeouts
pub async fn create_client() -> Result<Client, Error> {
    let mut config = Config::infer().await.map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
    })?;
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Patch the status sub-resource of a namespaced Kubernetes resource.
///
/// Serializes `status` into `{ "status": <status> }` and applies it via
/// merge-patch.
pub async fn patch_resource_status<T>(
    client: &Client,
    name: &str,
    namespace: &str,
    status: &impl serde::Serialize,
    field_manager: &str,
) -> std::result::Result<(), kube::Error>
where
    T: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug,
    <T as kube::Resource>::DynamicType: Default,
{
    let api: Api<T> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::apply(field_manager), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Value of the operation annotation, if set
pub fn operation(meta: &ObjectMeta) -> Option<&str> {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(OPERATION_ANNOTATION))
        .map(String::as_str)
}

/// Whether a resource is being deleted
pub fn is_terminating(meta: &ObjectMeta) -> bool {
    meta.deletion_timestamp.is_some()
}

/// Whether `meta` carries the finalizer `token`
pub fn has_finalizer(meta: &ObjectMeta, token: &str) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|s| s == token))
}

/// Merge `extra` into a label or annotation map, creating it if needed
pub fn merge_string_map(
    target: &mut Option<BTreeMap<String, String>>,
    extra: &BTreeMap<String, String>,
) {
    let map = target.get_or_insert_with(BTreeMap::new);
    for (k, v) in extra {
        map.insert(k.clone(), v.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OPERATION_RECONCILE;

    #[test]
    fn api_resources_follow_the_catalog() {
        for kind in crate::crd::ALL_COMPONENT_TYPES {
            let ar = component_api_resource(*kind);
            assert_eq!(ar.kind, kind.kind_str());
            assert_eq!(ar.group, "trellis.dev");
            assert_eq!(ar.plural, format!("{}s", kind.id()));
        }
    }

    #[test]
    fn operation_annotation_is_read() {
        let mut meta = ObjectMeta::default();
        assert_eq!(operation(&meta), None);
        meta.annotations = Some(BTreeMap::from([(
            OPERATION_ANNOTATION.to_string(),
            OPERATION_RECONCILE.to_string(),
        )]));
        assert_eq!(operation(&meta), Some(OPERATION_RECONCILE));
    }

    #[test]
    fn finalizer_and_termination_checks() {
        let meta = ObjectMeta {
            finalizers: Some(vec!["a/b".to_string()]),
            ..Default::default()
        };
        assert!(has_finalizer(&meta, "a/b"));
        assert!(!has_finalizer(&meta, "c/d"));
        assert!(!is_terminating(&meta));
    }

    #[test]
    fn merge_string_map_overwrites_and_keeps_existing() {
        let mut target = Some(BTreeMap::from([
            ("keep".to_string(), "1".to_string()),
            ("over".to_string(), "old".to_string()),
        ]));
        merge_string_map(&mut target, &BTreeMap::from([("over".to_string(), "new".to_string())]));
        let map = target.unwrap();
        assert_eq!(map["keep"], "1");
        assert_eq!(map["over"], "new");

        let mut empty = None;
        merge_string_map(&mut empty, &BTreeMap::new());
        assert_eq!(empty, Some(BTreeMap::new()));
    }

    #[tokio::test]
    async fn garbage_kubeconfig_is_an_internal_error() {
        let err = create_client_from_kubeconfig(
            "{not: [valid",
            DEFAULT_CONNECT_TIMEOUT,
            DEFAULT_READ_TIMEOUT,
        )
        .await
        .err().unwrap();
        assert_eq!(err.context(), Some("create_client"));
    }
}
