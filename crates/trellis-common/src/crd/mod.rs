//! Custom Resource Definitions for Trellis
//!
//! This module contains the ControlPlane parent, the component resources it
//! owns, the InternalConfig side configuration, and the status types they
//! share.

mod component_type;
mod components;
mod control_plane;
mod internal_config;
mod types;

pub use component_type::{
    ComponentType, ALL_COMPONENT_TYPES, DEPENDENCY_FINALIZER_PREFIX, HEALTHY_SUFFIX,
    RECONCILIATION_SUFFIX,
};
pub use components::{
    ApiServer, ApiServerExternalStatus, ApiServerSpec, ApiServerStatus, Authentication,
    AuthenticationExternalStatus, AuthenticationSpec, AuthenticationStatus, Authorization,
    AuthorizationExternalStatus, AuthorizationSpec, AuthorizationStatus, CloudOrchestrator,
    CloudOrchestratorExternalStatus, CloudOrchestratorSpec, CloudOrchestratorStatus,
    ComponentExternalStatus, ComponentSpec, DeploymentService, DeploymentServiceExternalStatus,
    DeploymentServiceSpec, DeploymentServiceStatus,
};
pub use control_plane::{
    ApiServerConfig, AuthenticationConfig, AuthorizationConfig, CloudOrchestratorConfig,
    ControlPlane, ControlPlaneSpec, ControlPlaneStatus, DeploymentServiceConfig,
};
pub use internal_config::{
    InternalConfig, InternalConfigSpec, DEFAULT_IMAGE_REGISTRY, DEFAULT_REPLICAS,
};
pub use types::{
    ChildStatus, CommonStatus, ComponentCondition, Condition, ConditionStatus,
    ObservedGenerations,
};

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

/// Every CRD Trellis installs, parent first
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![
        ControlPlane::crd(),
        InternalConfig::crd(),
        ApiServer::crd(),
        Authentication::crd(),
        Authorization::crd(),
        DeploymentService::crd(),
        CloudOrchestrator::crd(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_component_kind_has_a_crd() {
        let crds = all_crds();
        for kind in ALL_COMPONENT_TYPES {
            assert!(
                crds.iter().any(|c| c.spec.names.kind == kind.kind_str()),
                "no CRD for {kind}"
            );
        }
        assert!(crds.iter().all(|c| c.spec.group == "trellis.dev"));
    }
}
