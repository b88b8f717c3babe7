//! Component CRDs managed on behalf of a ControlPlane
//!
//! Each component resource has the same name and namespace as its owning
//! ControlPlane. Its spec is derived from the parent (and the optional
//! InternalConfig) by the orchestrator; its status is written by the
//! component's own controller and carries the common condition and
//! generation fragment plus a component-specific `external` block that the
//! orchestrator copies onto the parent.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::ChildStatus;
use super::ComponentType;

/// ApiServer runs the control plane's Kubernetes API server
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "trellis.dev",
    version = "v1alpha1",
    kind = "ApiServer",
    namespaced,
    derive = "PartialEq",
    status = "ApiServerStatus",
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Endpoint","type":"string","jsonPath":".status.external.endpoint"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ApiServerSpec {
    /// Kubernetes version to run
    pub version: String,

    /// Number of API server replicas
    pub replicas: u32,

    /// Fully qualified container image
    pub image: String,
}

/// Status the ApiServer controller surfaces on the parent
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiServerExternalStatus {
    /// URL clients use to reach the API server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Version actually running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// ApiServer status
pub type ApiServerStatus = ChildStatus<ApiServerExternalStatus>;

/// Authentication wires an OIDC identity provider into the control plane
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "trellis.dev",
    version = "v1alpha1",
    kind = "Authentication",
    namespaced,
    derive = "PartialEq",
    status = "AuthenticationStatus",
    printcolumn = r#"{"name":"Issuer","type":"string","jsonPath":".spec.issuerUrl"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationSpec {
    /// OIDC issuer URL
    pub issuer_url: String,

    /// OIDC client ID
    pub client_id: String,

    /// JWT claim used as the username
    pub username_claim: String,
}

/// Status the Authentication controller surfaces on the parent
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationExternalStatus {
    /// Issuer the API server was configured with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
}

/// Authentication status
pub type AuthenticationStatus = ChildStatus<AuthenticationExternalStatus>;

/// Authorization manages the control plane's RBAC bindings
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "trellis.dev",
    version = "v1alpha1",
    kind = "Authorization",
    namespaced,
    derive = "PartialEq",
    status = "AuthorizationStatus",
    printcolumn = r#"{"name":"Default Role","type":"string","jsonPath":".spec.defaultRole"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationSpec {
    /// Subjects bound to cluster-admin
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub admins: Vec<String>,

    /// Role granted to every authenticated user
    pub default_role: String,
}

/// Status the Authorization controller surfaces on the parent
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationExternalStatus {
    /// Roles currently bound
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bound_roles: Vec<String>,
}

/// Authorization status
pub type AuthorizationStatus = ChildStatus<AuthorizationExternalStatus>;

/// DeploymentService runs the workload deployment API on the control plane
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "trellis.dev",
    version = "v1alpha1",
    kind = "DeploymentService",
    namespaced,
    derive = "PartialEq",
    status = "DeploymentServiceStatus",
    printcolumn = r#"{"name":"Revision","type":"string","jsonPath":".status.external.revision"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentServiceSpec {
    /// Number of replicas
    pub replicas: u32,

    /// Fully qualified container image
    pub image: String,
}

/// Status the DeploymentService controller surfaces on the parent
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentServiceExternalStatus {
    /// Revision currently rolled out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

/// DeploymentService status
pub type DeploymentServiceStatus = ChildStatus<DeploymentServiceExternalStatus>;

/// CloudOrchestrator provisions the remote target cluster in a cloud provider
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "trellis.dev",
    version = "v1alpha1",
    kind = "CloudOrchestrator",
    namespaced,
    derive = "PartialEq",
    status = "CloudOrchestratorStatus",
    printcolumn = r#"{"name":"Provider","type":"string","jsonPath":".spec.provider"}"#,
    printcolumn = r#"{"name":"Region","type":"string","jsonPath":".spec.region"}"#,
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".status.external.clusterId"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CloudOrchestratorSpec {
    /// Cloud provider name (e.g., aws, openstack)
    pub provider: String,

    /// Provider region
    pub region: String,

    /// Number of worker nodes in the target cluster
    pub node_count: u32,
}

/// Status the CloudOrchestrator controller surfaces on the parent
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudOrchestratorExternalStatus {
    /// Provider-assigned identifier of the target cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,

    /// Kubeconfig for the target cluster, used by the periodic worker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<String>,
}

/// CloudOrchestrator status
pub type CloudOrchestratorStatus = ChildStatus<CloudOrchestratorExternalStatus>;

/// A component spec of any kind
#[derive(Clone, Debug, PartialEq)]
pub enum ComponentSpec {
    /// ApiServer spec
    ApiServer(ApiServerSpec),
    /// Authentication spec
    Authentication(AuthenticationSpec),
    /// Authorization spec
    Authorization(AuthorizationSpec),
    /// DeploymentService spec
    DeploymentService(DeploymentServiceSpec),
    /// CloudOrchestrator spec
    CloudOrchestrator(CloudOrchestratorSpec),
}

impl ComponentSpec {
    /// The component kind this spec belongs to
    pub fn component_type(&self) -> ComponentType {
        match self {
            Self::ApiServer(_) => ComponentType::ApiServer,
            Self::Authentication(_) => ComponentType::Authentication,
            Self::Authorization(_) => ComponentType::Authorization,
            Self::DeploymentService(_) => ComponentType::DeploymentService,
            Self::CloudOrchestrator(_) => ComponentType::CloudOrchestrator,
        }
    }
}

/// A component-specific status of any kind
#[derive(Clone, Debug, PartialEq)]
pub enum ComponentExternalStatus {
    /// ApiServer external status
    ApiServer(ApiServerExternalStatus),
    /// Authentication external status
    Authentication(AuthenticationExternalStatus),
    /// Authorization external status
    Authorization(AuthorizationExternalStatus),
    /// DeploymentService external status
    DeploymentService(DeploymentServiceExternalStatus),
    /// CloudOrchestrator external status
    CloudOrchestrator(CloudOrchestratorExternalStatus),
}

impl ComponentExternalStatus {
    /// The component kind this status belongs to
    pub fn component_type(&self) -> ComponentType {
        match self {
            Self::ApiServer(_) => ComponentType::ApiServer,
            Self::Authentication(_) => ComponentType::Authentication,
            Self::Authorization(_) => ComponentType::Authorization,
            Self::DeploymentService(_) => ComponentType::DeploymentService,
            Self::CloudOrchestrator(_) => ComponentType::CloudOrchestrator,
        }
    }
}
