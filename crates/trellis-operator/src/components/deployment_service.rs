//! DeploymentService converter

use trellis_common::crd::{
    ComponentExternalStatus, ComponentSpec, ComponentType, ControlPlane, ControlPlaneStatus,
    DeploymentServiceSpec, InternalConfig,
};
use trellis_common::Result;

use super::{image, missing_block, side_config, wrong_status};
use crate::registry::ComponentConverter;

/// Converts the `deploymentService` block
pub struct DeploymentServiceConverter;

impl ComponentConverter for DeploymentServiceConverter {
    fn component_type(&self) -> ComponentType {
        ComponentType::DeploymentService
    }

    fn convert_to_resource_spec(
        &self,
        parent: &ControlPlane,
        internal_config: Option<&InternalConfig>,
    ) -> Result<ComponentSpec> {
        let block = parent
            .spec
            .deployment_service
            .as_ref()
            .ok_or_else(|| missing_block(parent, ComponentType::DeploymentService))?;
        let config = side_config(internal_config);

        // Tracks the operator release so upgrades roll the service
        let tag = env!("CARGO_PKG_VERSION");
        Ok(ComponentSpec::DeploymentService(DeploymentServiceSpec {
            replicas: config.replicas(block.replicas),
            image: image(&config, ComponentType::DeploymentService, tag),
        }))
    }

    fn inject_status(
        &self,
        status: ComponentExternalStatus,
        parent: &mut ControlPlaneStatus,
    ) -> Result<()> {
        match status {
            ComponentExternalStatus::DeploymentService(s) => {
                parent.deployment_service = Some(s);
                Ok(())
            }
            other => Err(wrong_status(
                ComponentType::DeploymentService,
                other.component_type(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::tests::full_parent;

    #[test]
    fn block_replicas_win_over_defaults() {
        let spec = DeploymentServiceConverter
            .convert_to_resource_spec(&full_parent(), None)
            .unwrap();
        let ComponentSpec::DeploymentService(spec) = spec else {
            panic!("wrong kind");
        };
        assert_eq!(spec.replicas, 2);
        assert!(spec.image.starts_with("ghcr.io/trellis/deploymentservice:"));
    }
}
