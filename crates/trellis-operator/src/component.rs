//! The contract every component resource satisfies
//!
//! The orchestrator never looks at a component's concrete type. It builds,
//! inspects and updates children through [`Component`], and moves them
//! around as [`ComponentResource`], a closed enum over the catalog.

use std::collections::BTreeSet;

use kube::api::ObjectMeta;
use serde_json::Value;

use trellis_common::crd::{
    ApiServer, Authentication, Authorization, CloudOrchestrator, CommonStatus,
    ComponentExternalStatus, ComponentSpec, ComponentType, DeploymentService,
};
use trellis_common::finalizer::{ComponentRef, FinalizerSet};
use trellis_common::{Error, Result};

/// Capabilities shared by all component resources
pub trait Component {
    /// Catalog entry of this resource
    fn component_type(&self) -> ComponentType;

    /// Object metadata
    fn meta(&self) -> &ObjectMeta;

    /// Mutable object metadata
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    /// Current spec
    fn spec(&self) -> ComponentSpec;

    /// Replace the spec; fails if `spec` belongs to another component kind
    fn set_spec(&mut self, spec: ComponentSpec) -> Result<()>;

    /// Conditions and observed generations written by the component controller
    fn common_status(&self) -> Option<&CommonStatus>;

    /// Replace the common status fragment
    fn set_common_status(&mut self, status: CommonStatus);

    /// Component-specific status to surface on the parent
    fn external_status(&self) -> Option<ComponentExternalStatus>;

    /// Condition types that must be `True` for the component to count as ready
    fn required_conditions(&self) -> BTreeSet<String> {
        let kind = self.component_type();
        BTreeSet::from([kind.healthy_condition(), kind.reconciliation_condition()])
    }
}

macro_rules! impl_component {
    ($kind:ident) => {
        impl Component for $kind {
            fn component_type(&self) -> ComponentType {
                ComponentType::$kind
            }

            fn meta(&self) -> &ObjectMeta {
                &self.metadata
            }

            fn meta_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }

            fn spec(&self) -> ComponentSpec {
                ComponentSpec::$kind(self.spec.clone())
            }

            fn set_spec(&mut self, spec: ComponentSpec) -> Result<()> {
                match spec {
                    ComponentSpec::$kind(spec) => {
                        self.spec = spec;
                        Ok(())
                    }
                    other => Err(Error::WrongComponentConfigType {
                        expected: ComponentType::$kind,
                        actual: other.component_type(),
                    }),
                }
            }

            fn common_status(&self) -> Option<&CommonStatus> {
                self.status.as_ref().map(|s| &s.common)
            }

            fn set_common_status(&mut self, status: CommonStatus) {
                self.status.get_or_insert_with(Default::default).common = status;
            }

            fn external_status(&self) -> Option<ComponentExternalStatus> {
                self.status
                    .as_ref()?
                    .external
                    .clone()
                    .map(ComponentExternalStatus::$kind)
            }
        }
    };
}

impl_component!(ApiServer);
impl_component!(Authentication);
impl_component!(Authorization);
impl_component!(DeploymentService);
impl_component!(CloudOrchestrator);

/// A component resource of any kind
#[derive(Clone, Debug, PartialEq)]
pub enum ComponentResource {
    /// ApiServer resource
    ApiServer(ApiServer),
    /// Authentication resource
    Authentication(Authentication),
    /// Authorization resource
    Authorization(Authorization),
    /// DeploymentService resource
    DeploymentService(DeploymentService),
    /// CloudOrchestrator resource
    CloudOrchestrator(CloudOrchestrator),
}

macro_rules! dispatch {
    ($value:expr, $inner:ident => $body:expr) => {
        match $value {
            ComponentResource::ApiServer($inner) => $body,
            ComponentResource::Authentication($inner) => $body,
            ComponentResource::Authorization($inner) => $body,
            ComponentResource::DeploymentService($inner) => $body,
            ComponentResource::CloudOrchestrator($inner) => $body,
        }
    };
}

impl ComponentResource {
    /// An empty resource of `kind` with default spec and no metadata
    pub fn empty(kind: ComponentType) -> Self {
        let mut resource = match kind {
            ComponentType::ApiServer => Self::ApiServer(ApiServer::new("", Default::default())),
            ComponentType::Authentication => {
                Self::Authentication(Authentication::new("", Default::default()))
            }
            ComponentType::Authorization => {
                Self::Authorization(Authorization::new("", Default::default()))
            }
            ComponentType::DeploymentService => {
                Self::DeploymentService(DeploymentService::new("", Default::default()))
            }
            ComponentType::CloudOrchestrator => {
                Self::CloudOrchestrator(CloudOrchestrator::new("", Default::default()))
            }
        };
        *resource.meta_mut() = ObjectMeta::default();
        resource
    }

    /// Decode a resource of `kind` from its JSON representation
    pub fn from_value(kind: ComponentType, value: Value) -> Result<Self> {
        let decode_err =
            |e: serde_json::Error| Error::serialization_for_kind(kind.kind_str(), e.to_string());
        Ok(match kind {
            ComponentType::ApiServer => {
                Self::ApiServer(serde_json::from_value(value).map_err(decode_err)?)
            }
            ComponentType::Authentication => {
                Self::Authentication(serde_json::from_value(value).map_err(decode_err)?)
            }
            ComponentType::Authorization => {
                Self::Authorization(serde_json::from_value(value).map_err(decode_err)?)
            }
            ComponentType::DeploymentService => {
                Self::DeploymentService(serde_json::from_value(value).map_err(decode_err)?)
            }
            ComponentType::CloudOrchestrator => {
                Self::CloudOrchestrator(serde_json::from_value(value).map_err(decode_err)?)
            }
        })
    }

    /// JSON body for a server-side apply: everything the orchestrator owns, no status
    pub fn to_apply_value(&self) -> Result<Value> {
        let mut value = dispatch!(self, r => serde_json::to_value(r))
            .map_err(|e| {
                Error::serialization_for_kind(self.component_type().kind_str(), e.to_string())
            })?;
        if let Some(obj) = value.as_object_mut() {
            obj.remove("status");
        }
        Ok(value)
    }

    /// Identity of this resource
    pub fn component_ref(&self) -> ComponentRef {
        let meta = self.meta();
        ComponentRef::new(
            self.component_type(),
            meta.namespace.clone().unwrap_or_default(),
            meta.name.clone().unwrap_or_default(),
        )
    }

    /// Finalizers currently on the resource
    pub fn finalizers(&self) -> FinalizerSet {
        FinalizerSet::from(self.meta().finalizers.clone())
    }

    /// Whether the store is deleting this resource
    pub fn is_terminating(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }
}

impl Component for ComponentResource {
    fn component_type(&self) -> ComponentType {
        dispatch!(self, r => r.component_type())
    }

    fn meta(&self) -> &ObjectMeta {
        dispatch!(self, r => r.meta())
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        dispatch!(self, r => r.meta_mut())
    }

    fn spec(&self) -> ComponentSpec {
        dispatch!(self, r => r.spec())
    }

    fn set_spec(&mut self, spec: ComponentSpec) -> Result<()> {
        dispatch!(self, r => r.set_spec(spec))
    }

    fn common_status(&self) -> Option<&CommonStatus> {
        dispatch!(self, r => r.common_status())
    }

    fn set_common_status(&mut self, status: CommonStatus) {
        dispatch!(self, r => r.set_common_status(status))
    }

    fn external_status(&self) -> Option<ComponentExternalStatus> {
        dispatch!(self, r => r.external_status())
    }

    fn required_conditions(&self) -> BTreeSet<String> {
        dispatch!(self, r => r.required_conditions())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_common::crd::{
        ApiServerExternalStatus, ApiServerSpec, Condition, ConditionStatus, DeploymentServiceSpec,
        ALL_COMPONENT_TYPES,
    };

    #[test]
    fn empty_resources_match_their_kind() {
        for kind in ALL_COMPONENT_TYPES {
            let resource = ComponentResource::empty(*kind);
            assert_eq!(resource.component_type(), *kind);
            assert!(resource.meta().name.is_none());
            assert!(resource.common_status().is_none());
        }
    }

    /// Story: a mis-registered converter hands the wrong spec to a resource
    #[test]
    fn story_set_spec_rejects_foreign_kind() {
        let mut resource = ComponentResource::empty(ComponentType::ApiServer);
        let err = resource
            .set_spec(ComponentSpec::DeploymentService(DeploymentServiceSpec::default()))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::WrongComponentConfigType {
                expected: ComponentType::ApiServer,
                actual: ComponentType::DeploymentService,
            }
        ));

        let spec = ApiServerSpec {
            version: "1.32".to_string(),
            replicas: 3,
            image: "ghcr.io/trellis/apiserver:1.32".to_string(),
        };
        resource.set_spec(ComponentSpec::ApiServer(spec.clone())).unwrap();
        assert_eq!(resource.spec(), ComponentSpec::ApiServer(spec));
    }

    #[test]
    fn common_and_external_status_accessors() {
        let mut resource = ComponentResource::empty(ComponentType::ApiServer);
        assert!(resource.external_status().is_none());

        resource.set_common_status(CommonStatus {
            conditions: vec![Condition::new(
                "ApiServerHealthy",
                ConditionStatus::True,
                "Running",
                "",
            )],
            ..Default::default()
        });
        assert_eq!(resource.common_status().unwrap().conditions.len(), 1);

        if let ComponentResource::ApiServer(api) = &mut resource {
            api.status.as_mut().unwrap().external = Some(ApiServerExternalStatus {
                endpoint: Some("https://10.0.0.1:6443".to_string()),
                version: None,
            });
        }
        assert!(matches!(
            resource.external_status(),
            Some(ComponentExternalStatus::ApiServer(_))
        ));
    }

    #[test]
    fn required_conditions_are_the_kind_pair() {
        let resource = ComponentResource::empty(ComponentType::Authorization);
        let required = resource.required_conditions();
        assert_eq!(
            required,
            BTreeSet::from([
                "AuthorizationHealthy".to_string(),
                "AuthorizationReconciliation".to_string()
            ])
        );
    }

    #[test]
    fn apply_value_omits_status_and_round_trips() {
        let mut resource = ComponentResource::empty(ComponentType::DeploymentService);
        resource.meta_mut().name = Some("prod".to_string());
        resource.meta_mut().namespace = Some("tenants".to_string());
        resource.set_common_status(CommonStatus::default());

        let value = resource.to_apply_value().unwrap();
        assert!(value.get("status").is_none());
        assert_eq!(value["kind"], "DeploymentService");
        assert_eq!(value["apiVersion"], "trellis.dev/v1alpha1");

        let decoded =
            ComponentResource::from_value(ComponentType::DeploymentService, value).unwrap();
        assert_eq!(decoded.component_ref().name, "prod");
        assert!(decoded.common_status().is_none());
    }

    #[test]
    fn decoding_garbage_is_a_serialization_error() {
        let err = ComponentResource::from_value(
            ComponentType::CloudOrchestrator,
            serde_json::json!({"spec": 42}),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Serialization { kind: Some(ref k), .. } if k == "CloudOrchestrator"
        ));
    }
}
