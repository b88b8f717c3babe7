//! Built-in converters, one per catalog entry
//!
//! Conversion is thin: each converter copies its block of the
//! ControlPlane spec into the component spec and resolves defaults from the
//! InternalConfig. Everything else is the component controller's business.

mod api_server;
mod authentication;
mod authorization;
mod cloud_orchestrator;
mod deployment_service;

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::ResourceExt;

use trellis_common::crd::{ComponentType, ControlPlane, InternalConfig, InternalConfigSpec};
use trellis_common::Error;

pub use api_server::ApiServerConverter;
pub use authentication::AuthenticationConverter;
pub use authorization::AuthorizationConverter;
pub use cloud_orchestrator::CloudOrchestratorConverter;
pub use deployment_service::DeploymentServiceConverter;

use crate::component::ComponentResource;
use crate::registry::ComponentFactory;

/// Label identifying which component a workload belongs to
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";

/// Label naming the access role a workload is exposed to
pub const ACCESS_ROLE_LABEL: &str = "trellis.dev/access-role";

/// Registry entry for a built-in kind
pub fn factory(kind: ComponentType) -> ComponentFactory {
    match kind {
        ComponentType::ApiServer => ComponentFactory {
            resource: || ComponentResource::empty(ComponentType::ApiServer),
            converter: Arc::new(ApiServerConverter),
            role_selectors: Some(api_server_roles),
        },
        ComponentType::Authentication => ComponentFactory {
            resource: || ComponentResource::empty(ComponentType::Authentication),
            converter: Arc::new(AuthenticationConverter),
            role_selectors: None,
        },
        ComponentType::Authorization => ComponentFactory {
            resource: || ComponentResource::empty(ComponentType::Authorization),
            converter: Arc::new(AuthorizationConverter),
            role_selectors: Some(authorization_roles),
        },
        ComponentType::DeploymentService => ComponentFactory {
            resource: || ComponentResource::empty(ComponentType::DeploymentService),
            converter: Arc::new(DeploymentServiceConverter),
            role_selectors: Some(deployment_service_roles),
        },
        ComponentType::CloudOrchestrator => ComponentFactory {
            resource: || ComponentResource::empty(ComponentType::CloudOrchestrator),
            converter: Arc::new(CloudOrchestratorConverter),
            role_selectors: None,
        },
    }
}

fn api_server_roles(role: &str) -> Vec<LabelSelector> {
    role_selectors(ComponentType::ApiServer, role)
}

fn authorization_roles(role: &str) -> Vec<LabelSelector> {
    role_selectors(ComponentType::Authorization, role)
}

fn deployment_service_roles(role: &str) -> Vec<LabelSelector> {
    role_selectors(ComponentType::DeploymentService, role)
}

/// Workloads of `kind` exposed to `role`
fn role_selectors(kind: ComponentType, role: &str) -> Vec<LabelSelector> {
    vec![LabelSelector {
        match_labels: Some(BTreeMap::from([
            (COMPONENT_LABEL.to_string(), kind.id().to_string()),
            (ACCESS_ROLE_LABEL.to_string(), role.to_string()),
        ])),
        ..Default::default()
    }]
}

/// InternalConfig spec, or defaults when there is none
fn side_config(internal_config: Option<&InternalConfig>) -> InternalConfigSpec {
    internal_config.map(|ic| ic.spec.clone()).unwrap_or_default()
}

/// Image reference for a component under the configured registry
fn image(config: &InternalConfigSpec, kind: ComponentType, tag: &str) -> String {
    format!("{}/{}:{}", config.registry(), kind.id(), tag)
}

/// Error for a converter invoked on a parent without its block
fn missing_block(parent: &ControlPlane, kind: ComponentType) -> Error {
    Error::validation_for(
        parent.name_any(),
        format!("{} is not configured", kind.kind_str()),
    )
}

/// Error for a converter handed another kind's status
fn wrong_status(expected: ComponentType, actual: ComponentType) -> Error {
    Error::WrongComponentStatusType { expected, actual }
}
