//! Kubernetes access for the orchestration reconciler
//!
//! Every store interaction the reconciler makes goes through
//! [`ControlPlaneKubeClient`], so reconcile logic can be driven by mocks or
//! an in-memory store in tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use trellis_common::crd::{ControlPlane, ControlPlaneStatus, InternalConfig};
use trellis_common::finalizer::ComponentRef;
use trellis_common::kube_utils::{component_api_resource, patch_resource_status};
use trellis_common::{Error, FIELD_MANAGER};

use crate::component::ComponentResource;

/// Trait abstracting Kubernetes client operations for ControlPlane reconciliation
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlPlaneKubeClient: Send + Sync {
    /// Fetch a component resource, `None` if it does not exist
    async fn get_component(&self, target: &ComponentRef)
        -> Result<Option<ComponentResource>, Error>;

    /// Server-side apply a component resource and return the stored object
    ///
    /// Fields owned by other managers (the component's status, foreign
    /// labels and finalizers) are preserved.
    async fn apply_component(&self, resource: &ComponentResource)
        -> Result<ComponentResource, Error>;

    /// Set (`Some`) or remove (`None`) labels on a component resource
    async fn patch_component_labels(
        &self,
        target: &ComponentRef,
        labels: &BTreeMap<String, Option<String>>,
    ) -> Result<(), Error>;

    /// Request deletion of a component resource; a missing resource is not an error
    async fn delete_component(&self, target: &ComponentRef) -> Result<(), Error>;

    /// Set an annotation on a component resource
    ///
    /// Fails with `AnnotationAlreadyExists` if the annotation already has
    /// `value`. A missing resource is not an error.
    async fn annotate_component(
        &self,
        target: &ComponentRef,
        key: &str,
        value: &str,
    ) -> Result<(), Error>;

    /// Fetch the InternalConfig sharing the ControlPlane's identity
    async fn get_internal_config(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<InternalConfig>, Error>;

    /// Merge-patch the status of a ControlPlane; absent fields are cleared
    async fn patch_control_plane_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ControlPlaneStatus,
    ) -> Result<(), Error>;

    /// Add a finalizer to a ControlPlane if absent
    async fn add_control_plane_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error>;

    /// Remove a finalizer from a ControlPlane if present
    async fn remove_control_plane_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error>;

    /// Remove an annotation from a ControlPlane
    async fn remove_control_plane_annotation(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct ControlPlaneKubeClientImpl {
    client: Client,
}

impl ControlPlaneKubeClientImpl {
    /// Create a new client wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn component_api(&self, target: &ComponentRef) -> Api<DynamicObject> {
        Api::namespaced_with(
            self.client.clone(),
            &target.namespace,
            &component_api_resource(target.kind),
        )
    }

    fn control_planes(&self, namespace: &str) -> Api<ControlPlane> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn decode(target: &ComponentRef, obj: DynamicObject) -> Result<ComponentResource, Error> {
    let value = serde_json::to_value(&obj)
        .map_err(|e| Error::serialization_for_kind(target.kind.kind_str(), e.to_string()))?;
    ComponentResource::from_value(target.kind, value)
}

#[async_trait]
impl ControlPlaneKubeClient for ControlPlaneKubeClientImpl {
    async fn get_component(
        &self,
        target: &ComponentRef,
    ) -> Result<Option<ComponentResource>, Error> {
        match self.component_api(target).get_opt(&target.name).await? {
            Some(obj) => Ok(Some(decode(target, obj)?)),
            None => Ok(None),
        }
    }

    async fn apply_component(
        &self,
        resource: &ComponentResource,
    ) -> Result<ComponentResource, Error> {
        let target = resource.component_ref();
        let body = resource.to_apply_value()?;
        let applied = self
            .component_api(&target)
            .patch(
                &target.name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&body),
            )
            .await?;
        decode(&target, applied)
    }

    async fn patch_component_labels(
        &self,
        target: &ComponentRef,
        labels: &BTreeMap<String, Option<String>>,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({ "metadata": { "labels": labels } });
        self.component_api(target)
            .patch(&target.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn delete_component(&self, target: &ComponentRef) -> Result<(), Error> {
        match self
            .component_api(target)
            .delete(&target.name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn annotate_component(
        &self,
        target: &ComponentRef,
        key: &str,
        value: &str,
    ) -> Result<(), Error> {
        let api = self.component_api(target);
        let Some(obj) = api.get_opt(&target.name).await? else {
            debug!(component = %target, "component gone, not annotating");
            return Ok(());
        };
        let current = obj
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str);
        if current == Some(value) {
            return Err(Error::AnnotationAlreadyExists {
                key: key.to_string(),
                resource: format!("{}/{}", target.namespace, target.name),
            });
        }

        let patch = serde_json::json!({
            "metadata": {
                "annotations": { key: value },
                "resourceVersion": obj.metadata.resource_version,
            }
        });
        api.patch(&target.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_internal_config(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<InternalConfig>, Error> {
        let api: Api<InternalConfig> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_control_plane_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ControlPlaneStatus,
    ) -> Result<(), Error> {
        let patch = status
            .to_merge_patch()
            .map_err(|e| Error::serialization_for_kind("ControlPlane", e.to_string()))?;
        patch_resource_status::<ControlPlane>(
            &self.client, name, namespace, &patch, FIELD_MANAGER,
        )
        .await?;
        Ok(())
    }

    async fn add_control_plane_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let api = self.control_planes(namespace);
        let cp = api.get(name).await?;
        let mut finalizers = cp.metadata.finalizers.unwrap_or_default();
        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        finalizers.push(finalizer.to_string());

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": cp.metadata.resource_version,
            }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn remove_control_plane_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let api = self.control_planes(namespace);
        let Some(cp) = api.get_opt(name).await? else {
            return Ok(());
        };
        let finalizers: Vec<String> = cp
            .metadata
            .finalizers
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f != finalizer)
            .collect();

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": cp.metadata.resource_version,
            }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn remove_control_plane_annotation(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({ "metadata": { "annotations": { key: null } } });
        self.control_planes(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}
