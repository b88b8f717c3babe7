//! InternalConfig CRD, operator-supplied side configuration for a ControlPlane

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// InternalConfig carries settings the platform team controls and tenants do
/// not. It shares its name and namespace with the ControlPlane it applies to.
/// Its generation is stamped on every component resource, so editing it makes
/// all components stale until their controllers catch up.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "trellis.dev",
    version = "v1alpha1",
    kind = "InternalConfig",
    namespaced,
    printcolumn = r#"{"name":"Registry","type":"string","jsonPath":".spec.imageRegistry"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct InternalConfigSpec {
    /// Registry component images are pulled from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_registry: Option<String>,

    /// Replica count used when a component block does not set one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_replicas: Option<u32>,

    /// Free-form settings passed through to component controllers
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, String>,
}

/// Registry used when no InternalConfig overrides it
pub const DEFAULT_IMAGE_REGISTRY: &str = "ghcr.io/trellis";

/// Replica count used when neither the component nor InternalConfig sets one
pub const DEFAULT_REPLICAS: u32 = 1;

impl InternalConfigSpec {
    /// Registry to pull component images from
    pub fn registry(&self) -> &str {
        self.image_registry
            .as_deref()
            .unwrap_or(DEFAULT_IMAGE_REGISTRY)
    }

    /// Resolve a replica count against the configured default
    pub fn replicas(&self, requested: Option<u32>) -> u32 {
        requested
            .or(self.default_replicas)
            .unwrap_or(DEFAULT_REPLICAS)
    }
}
