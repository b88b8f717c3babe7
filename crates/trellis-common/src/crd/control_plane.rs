//! ControlPlane CRD, the parent resource the orchestrator reconciles

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::components::{
    ApiServerExternalStatus, AuthenticationExternalStatus, AuthorizationExternalStatus,
    CloudOrchestratorExternalStatus, DeploymentServiceExternalStatus,
};
use super::types::{ComponentCondition, Condition};
use super::ComponentType;

/// ControlPlane declares a managed control plane and the components it runs.
///
/// Every component block is optional; an absent or `disabled` block means the
/// component is not desired and any existing component resource is torn down.
///
/// Example:
/// ```yaml
/// apiVersion: trellis.dev/v1alpha1
/// kind: ControlPlane
/// metadata:
///   name: prod
///   namespace: tenants
/// spec:
///   apiServer:
///     version: "1.32"
///   authentication:
///     issuerUrl: https://idp.example.com
///     clientId: trellis
///   deploymentService: {}
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "trellis.dev",
    version = "v1alpha1",
    kind = "ControlPlane",
    namespaced,
    status = "ControlPlaneStatus",
    shortname = "cp",
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneSpec {
    /// API server configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server: Option<ApiServerConfig>,

    /// Identity provider configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<AuthenticationConfig>,

    /// RBAC configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<AuthorizationConfig>,

    /// Deployment service configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_service: Option<DeploymentServiceConfig>,

    /// Target cluster provisioning configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_orchestrator: Option<CloudOrchestratorConfig>,
}

impl ControlPlaneSpec {
    /// Whether the block for `component` is present and not disabled
    pub fn is_enabled(&self, component: ComponentType) -> bool {
        let disabled = match component {
            ComponentType::ApiServer => self.api_server.as_ref().map(|c| c.disabled),
            ComponentType::Authentication => self.authentication.as_ref().map(|c| c.disabled),
            ComponentType::Authorization => self.authorization.as_ref().map(|c| c.disabled),
            ComponentType::DeploymentService => {
                self.deployment_service.as_ref().map(|c| c.disabled)
            }
            ComponentType::CloudOrchestrator => {
                self.cloud_orchestrator.as_ref().map(|c| c.disabled)
            }
        };
        disabled == Some(false)
    }
}

/// API server block
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiServerConfig {
    /// Turn the component off without deleting its configuration
    #[serde(default)]
    pub disabled: bool,

    /// Kubernetes version
    #[serde(default = "default_version")]
    pub version: String,

    /// Replica count (falls back to the InternalConfig default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u32>,
}

/// Authentication block
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationConfig {
    /// Turn the component off without deleting its configuration
    #[serde(default)]
    pub disabled: bool,

    /// OIDC issuer URL
    pub issuer_url: String,

    /// OIDC client ID
    pub client_id: String,

    /// Username claim (default: `sub`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_claim: Option<String>,
}

/// Authorization block
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationConfig {
    /// Turn the component off without deleting its configuration
    #[serde(default)]
    pub disabled: bool,

    /// Subjects granted cluster-admin
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub admins: Vec<String>,

    /// Role for every authenticated user (default: `view`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_role: Option<String>,
}

/// Deployment service block
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentServiceConfig {
    /// Turn the component off without deleting its configuration
    #[serde(default)]
    pub disabled: bool,

    /// Replica count (falls back to the InternalConfig default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u32>,
}

/// Cloud orchestrator block
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudOrchestratorConfig {
    /// Turn the component off without deleting its configuration
    #[serde(default)]
    pub disabled: bool,

    /// Cloud provider name
    pub provider: String,

    /// Provider region
    pub region: String,

    /// Worker node count
    #[serde(default = "default_node_count")]
    pub node_count: u32,
}

fn default_version() -> String {
    "1.32".to_string()
}

fn default_node_count() -> u32 {
    3
}

/// ControlPlane status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneStatus {
    /// Generation of the spec this status was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Whether every desired component is ready at the current generation
    #[serde(default)]
    pub ready: bool,

    /// Orchestration-level conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Conditions reported by component controllers, tagged by component
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub component_conditions: Vec<ComponentCondition>,

    /// ApiServer external status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server: Option<ApiServerExternalStatus>,

    /// Authentication external status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<AuthenticationExternalStatus>,

    /// Authorization external status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<AuthorizationExternalStatus>,

    /// DeploymentService external status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_service: Option<DeploymentServiceExternalStatus>,

    /// CloudOrchestrator external status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_orchestrator: Option<CloudOrchestratorExternalStatus>,
}

/// Wire names of every `ControlPlaneStatus` field
const STATUS_FIELDS: &[&str] = &[
    "observedGeneration",
    "ready",
    "conditions",
    "componentConditions",
    "apiServer",
    "authentication",
    "authorization",
    "deploymentService",
    "cloudOrchestrator",
];

impl ControlPlaneStatus {
    /// JSON merge patch body that replaces the stored status with this one
    ///
    /// Empty and absent fields are sent as `null` so the store drops them;
    /// a merge patch leaves keys it does not mention untouched.
    pub fn to_merge_patch(&self) -> serde_json::Result<serde_json::Value> {
        let mut value = serde_json::to_value(self)?;
        if let Some(fields) = value.as_object_mut() {
            for field in STATUS_FIELDS {
                fields
                    .entry(field.to_string())
                    .or_insert(serde_json::Value::Null);
            }
        }
        Ok(value)
    }

    /// Find an orchestration-level condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Find a component condition by type
    pub fn component_condition(&self, type_: &str) -> Option<&ComponentCondition> {
        self.component_conditions
            .iter()
            .find(|c| c.condition.type_ == type_)
    }

    /// Clear the external status slot of one component
    pub fn clear_external(&mut self, component: ComponentType) {
        match component {
            ComponentType::ApiServer => self.api_server = None,
            ComponentType::Authentication => self.authentication = None,
            ComponentType::Authorization => self.authorization = None,
            ComponentType::DeploymentService => self.deployment_service = None,
            ComponentType::CloudOrchestrator => self.cloud_orchestrator = None,
        }
    }
}
