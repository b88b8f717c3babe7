//! ApiServer converter

use trellis_common::crd::{
    ApiServerSpec, ComponentExternalStatus, ComponentSpec, ComponentType, ControlPlane,
    ControlPlaneStatus, InternalConfig,
};
use trellis_common::Result;

use super::{image, missing_block, side_config, wrong_status};
use crate::registry::ComponentConverter;

/// Converts the `apiServer` block
pub struct ApiServerConverter;

impl ComponentConverter for ApiServerConverter {
    fn component_type(&self) -> ComponentType {
        ComponentType::ApiServer
    }

    fn convert_to_resource_spec(
        &self,
        parent: &ControlPlane,
        internal_config: Option<&InternalConfig>,
    ) -> Result<ComponentSpec> {
        let block = parent
            .spec
            .api_server
            .as_ref()
            .ok_or_else(|| missing_block(parent, ComponentType::ApiServer))?;
        let config = side_config(internal_config);

        Ok(ComponentSpec::ApiServer(ApiServerSpec {
            version: block.version.clone(),
            replicas: config.replicas(block.replicas),
            image: image(&config, ComponentType::ApiServer, &block.version),
        }))
    }

    fn inject_status(
        &self,
        status: ComponentExternalStatus,
        parent: &mut ControlPlaneStatus,
    ) -> Result<()> {
        match status {
            ComponentExternalStatus::ApiServer(s) => {
                parent.api_server = Some(s);
                Ok(())
            }
            other => Err(wrong_status(ComponentType::ApiServer, other.component_type())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::tests::full_parent;
    use trellis_common::crd::{ApiServerExternalStatus, InternalConfigSpec};

    #[test]
    fn image_and_replicas_come_from_internal_config() {
        let ic = InternalConfig::new(
            "prod",
            InternalConfigSpec {
                image_registry: Some("registry.internal".to_string()),
                default_replicas: Some(3),
                ..Default::default()
            },
        );
        let spec = ApiServerConverter
            .convert_to_resource_spec(&full_parent(), Some(&ic))
            .unwrap();
        let ComponentSpec::ApiServer(spec) = spec else {
            panic!("wrong kind");
        };
        assert_eq!(spec.image, "registry.internal/apiserver:1.32");
        assert_eq!(spec.replicas, 3);
    }

    #[test]
    fn defaults_without_internal_config() {
        let spec = ApiServerConverter
            .convert_to_resource_spec(&full_parent(), None)
            .unwrap();
        let ComponentSpec::ApiServer(spec) = spec else {
            panic!("wrong kind");
        };
        assert_eq!(spec.image, "ghcr.io/trellis/apiserver:1.32");
        assert_eq!(spec.replicas, 1);
    }

    #[test]
    fn inject_fills_the_api_server_slot() {
        let mut status = ControlPlaneStatus::default();
        ApiServerConverter
            .inject_status(
                ComponentExternalStatus::ApiServer(ApiServerExternalStatus {
                    endpoint: Some("https://prod.example.com:6443".to_string()),
                    version: Some("1.32.1".to_string()),
                }),
                &mut status,
            )
            .unwrap();
        assert_eq!(
            status.api_server.unwrap().endpoint.as_deref(),
            Some("https://prod.example.com:6443")
        );
    }
}
