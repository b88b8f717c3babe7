//! The closed catalog of component kinds a ControlPlane can manage

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Prefix of every dependency finalizer token
pub const DEPENDENCY_FINALIZER_PREFIX: &str = "dependency.trellis.dev";

/// Suffix of the condition reporting whether a component's workload is healthy
pub const HEALTHY_SUFFIX: &str = "Healthy";

/// Suffix of the condition reporting whether a component's controller converged
pub const RECONCILIATION_SUFFIX: &str = "Reconciliation";

/// Known component kinds, in reconciliation order.
///
/// The order is the order the orchestrator walks children in and the order
/// per-component results appear in logs.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, JsonSchema,
)]
pub enum ComponentType {
    /// The control plane's API server
    ApiServer,
    /// Identity provider integration
    Authentication,
    /// RBAC role and binding management
    Authorization,
    /// Deployment service for workloads on the control plane
    DeploymentService,
    /// Cloud orchestrator that provisions the remote target cluster
    CloudOrchestrator,
}

/// All ComponentType variants for iteration.
pub const ALL_COMPONENT_TYPES: &[ComponentType] = &[
    ComponentType::ApiServer,
    ComponentType::Authentication,
    ComponentType::Authorization,
    ComponentType::DeploymentService,
    ComponentType::CloudOrchestrator,
];

impl ComponentType {
    /// Kubernetes Kind of the component resource
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::ApiServer => "ApiServer",
            Self::Authentication => "Authentication",
            Self::Authorization => "Authorization",
            Self::DeploymentService => "DeploymentService",
            Self::CloudOrchestrator => "CloudOrchestrator",
        }
    }

    /// Lowercase identifier used in finalizer tokens and field managers
    pub fn id(&self) -> &'static str {
        match self {
            Self::ApiServer => "apiserver",
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::DeploymentService => "deploymentservice",
            Self::CloudOrchestrator => "cloudorchestrator",
        }
    }

    /// Components whose resources this component depends on.
    ///
    /// A dependent holds a dependency finalizer on each of these while it
    /// exists, which blocks their deletion until it has torn down.
    pub fn dependencies(&self) -> &'static [ComponentType] {
        match self {
            Self::ApiServer => &[],
            Self::Authentication => &[],
            Self::Authorization => &[Self::Authentication, Self::ApiServer],
            Self::DeploymentService => &[Self::ApiServer],
            Self::CloudOrchestrator => &[],
        }
    }

    /// Condition type reporting workload health
    pub fn healthy_condition(&self) -> String {
        format!("{}{}", self.kind_str(), HEALTHY_SUFFIX)
    }

    /// Condition type reporting controller convergence
    pub fn reconciliation_condition(&self) -> String {
        format!("{}{}", self.kind_str(), RECONCILIATION_SUFFIX)
    }

    /// Finalizer token this component places on the resources it depends on
    pub fn finalizer_token(&self) -> String {
        format!("{}/{}", DEPENDENCY_FINALIZER_PREFIX, self.id())
    }

    /// Parse a dependency finalizer token back into the dependent's type
    pub fn from_finalizer_token(token: &str) -> Option<Self> {
        let id = token
            .strip_prefix(DEPENDENCY_FINALIZER_PREFIX)?
            .strip_prefix('/')?;
        ALL_COMPONENT_TYPES.iter().copied().find(|t| t.id() == id)
    }
}

impl std::fmt::Display for ComponentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind_str())
    }
}

impl std::str::FromStr for ComponentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_COMPONENT_TYPES
            .iter()
            .copied()
            .find(|t| t.kind_str().eq_ignore_ascii_case(s) || t.id() == s)
            .ok_or_else(|| format!("unknown component type: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_component_types_is_exhaustive() {
        assert_eq!(ALL_COMPONENT_TYPES.len(), 5);
        let mut sorted = ALL_COMPONENT_TYPES.to_vec();
        sorted.sort();
        assert_eq!(sorted, ALL_COMPONENT_TYPES, "catalog order matches Ord");
    }

    #[test]
    fn finalizer_tokens_round_trip_per_kind() {
        for kind in ALL_COMPONENT_TYPES {
            let token = kind.finalizer_token();
            assert!(token.starts_with(DEPENDENCY_FINALIZER_PREFIX));
            assert_eq!(ComponentType::from_finalizer_token(&token), Some(*kind));
        }
        assert_eq!(ComponentType::from_finalizer_token("trellis.dev/control-plane"), None);
        assert_eq!(
            ComponentType::from_finalizer_token("dependency.trellis.dev/unknown"),
            None
        );
    }

    #[test]
    fn condition_names_are_prefixed_by_kind() {
        assert_eq!(
            ComponentType::ApiServer.healthy_condition(),
            "ApiServerHealthy"
        );
        assert_eq!(
            ComponentType::CloudOrchestrator.reconciliation_condition(),
            "CloudOrchestratorReconciliation"
        );
    }

    #[test]
    fn dependencies_never_point_at_self() {
        for kind in ALL_COMPONENT_TYPES {
            assert!(!kind.dependencies().contains(kind), "{kind} depends on itself");
        }
    }

    #[test]
    fn parses_kind_and_id() {
        assert_eq!(
            "deploymentservice".parse::<ComponentType>().unwrap(),
            ComponentType::DeploymentService
        );
        assert_eq!(
            "ApiServer".parse::<ComponentType>().unwrap(),
            ComponentType::ApiServer
        );
        assert!("Etcd".parse::<ComponentType>().is_err());
    }
}
