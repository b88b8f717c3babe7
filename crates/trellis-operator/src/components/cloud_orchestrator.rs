//! CloudOrchestrator converter

use kube::ResourceExt;

use trellis_common::crd::{
    CloudOrchestratorSpec, ComponentExternalStatus, ComponentSpec, ComponentType, ControlPlane,
    ControlPlaneStatus, InternalConfig,
};
use trellis_common::{Error, Result};

use super::{missing_block, wrong_status};
use crate::registry::ComponentConverter;

/// Converts the `cloudOrchestrator` block
pub struct CloudOrchestratorConverter;

impl ComponentConverter for CloudOrchestratorConverter {
    fn component_type(&self) -> ComponentType {
        ComponentType::CloudOrchestrator
    }

    fn convert_to_resource_spec(
        &self,
        parent: &ControlPlane,
        _internal_config: Option<&InternalConfig>,
    ) -> Result<ComponentSpec> {
        let block = parent
            .spec
            .cloud_orchestrator
            .as_ref()
            .ok_or_else(|| missing_block(parent, ComponentType::CloudOrchestrator))?;

        if block.node_count == 0 {
            return Err(Error::validation_for(
                parent.name_any(),
                "cloudOrchestrator.nodeCount must be at least 1",
            ));
        }

        Ok(ComponentSpec::CloudOrchestrator(CloudOrchestratorSpec {
            provider: block.provider.to_lowercase(),
            region: block.region.clone(),
            node_count: block.node_count,
        }))
    }

    fn inject_status(
        &self,
        status: ComponentExternalStatus,
        parent: &mut ControlPlaneStatus,
    ) -> Result<()> {
        match status {
            ComponentExternalStatus::CloudOrchestrator(mut s) => {
                // Credentials stay on the component resource
                s.kubeconfig = None;
                parent.cloud_orchestrator = Some(s);
                Ok(())
            }
            other => Err(wrong_status(
                ComponentType::CloudOrchestrator,
                other.component_type(),
            )),
        }
    }
}
