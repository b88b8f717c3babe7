//! Authorization converter

use trellis_common::crd::{
    AuthorizationSpec, ComponentExternalStatus, ComponentSpec, ComponentType, ControlPlane,
    ControlPlaneStatus, InternalConfig,
};
use trellis_common::Result;

use super::{missing_block, wrong_status};
use crate::registry::ComponentConverter;

/// Role granted to authenticated users when the parent does not pick one
const DEFAULT_ROLE: &str = "view";

/// Converts the `authorization` block
pub struct AuthorizationConverter;

impl ComponentConverter for AuthorizationConverter {
    fn component_type(&self) -> ComponentType {
        ComponentType::Authorization
    }

    fn convert_to_resource_spec(
        &self,
        parent: &ControlPlane,
        _internal_config: Option<&InternalConfig>,
    ) -> Result<ComponentSpec> {
        let block = parent
            .spec
            .authorization
            .as_ref()
            .ok_or_else(|| missing_block(parent, ComponentType::Authorization))?;

        let mut admins = block.admins.clone();
        admins.sort();
        admins.dedup();

        Ok(ComponentSpec::Authorization(AuthorizationSpec {
            admins,
            default_role: block
                .default_role
                .clone()
                .unwrap_or_else(|| DEFAULT_ROLE.to_string()),
        }))
    }

    fn inject_status(
        &self,
        status: ComponentExternalStatus,
        parent: &mut ControlPlaneStatus,
    ) -> Result<()> {
        match status {
            ComponentExternalStatus::Authorization(s) => {
                parent.authorization = Some(s);
                Ok(())
            }
            other => Err(wrong_status(
                ComponentType::Authorization,
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
    fn admins_are_sorted_and_deduplicated() {
        let mut parent = full_parent();
        if let Some(authz) = parent.spec.authorization.as_mut() {
            authz.admins = vec!["bob".into(), "alice".into(), "bob".into()];
        }
        let spec = AuthorizationConverter
            .convert_to_resource_spec(&parent, None)
            .unwrap();
        let ComponentSpec::Authorization(spec) = spec else {
            panic!("wrong kind");
        };
        assert_eq!(spec.admins, ["alice", "bob"]);
        assert_eq!(spec.default_role, DEFAULT_ROLE);
    }
}
