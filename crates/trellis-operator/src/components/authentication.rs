//! Authentication converter

use trellis_common::crd::{
    AuthenticationSpec, ComponentExternalStatus, ComponentSpec, ComponentType, ControlPlane,
    ControlPlaneStatus, InternalConfig,
};
use trellis_common::{Error, Result};

use kube::ResourceExt;

use super::{missing_block, wrong_status};
use crate::registry::ComponentConverter;

/// Claim used as the username when the parent does not pick one
const DEFAULT_USERNAME_CLAIM: &str = "sub";

/// Converts the `authentication` block
pub struct AuthenticationConverter;

impl ComponentConverter for AuthenticationConverter {
    fn component_type(&self) -> ComponentType {
        ComponentType::Authentication
    }

    fn convert_to_resource_spec(
        &self,
        parent: &ControlPlane,
        _internal_config: Option<&InternalConfig>,
    ) -> Result<ComponentSpec> {
        let block = parent
            .spec
            .authentication
            .as_ref()
            .ok_or_else(|| missing_block(parent, ComponentType::Authentication))?;

        if !block.issuer_url.starts_with("https://") {
            return Err(Error::validation_for(
                parent.name_any(),
                format!("issuerUrl must use https: {}", block.issuer_url),
            ));
        }

        Ok(ComponentSpec::Authentication(AuthenticationSpec {
            issuer_url: block.issuer_url.clone(),
            client_id: block.client_id.clone(),
            username_claim: block
                .username_claim
                .clone()
                .unwrap_or_else(|| DEFAULT_USERNAME_CLAIM.to_string()),
        }))
    }

    fn inject_status(
        &self,
        status: ComponentExternalStatus,
        parent: &mut ControlPlaneStatus,
    ) -> Result<()> {
        match status {
            ComponentExternalStatus::Authentication(s) => {
                parent.authentication = Some(s);
                Ok(())
            }
            other => Err(wrong_status(
                ComponentType::Authentication,
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
    fn username_claim_defaults_to_sub() {
        let spec = AuthenticationConverter
            .convert_to_resource_spec(&full_parent(), None)
            .unwrap();
        let ComponentSpec::Authentication(spec) = spec else {
            panic!("wrong kind");
        };
        assert_eq!(spec.username_claim, "sub");
        assert_eq!(spec.client_id, "trellis");
    }

    #[test]
    fn plain_http_issuer_is_rejected() {
        let mut parent = full_parent();
        if let Some(auth) = parent.spec.authentication.as_mut() {
            auth.issuer_url = "http://idp.example.com".to_string();
        }
        let err = AuthenticationConverter
            .convert_to_resource_spec(&parent, None)
            .unwrap_err();
        assert!(err.to_string().contains("https"));
    }
}
