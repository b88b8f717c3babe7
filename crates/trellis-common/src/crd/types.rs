//! Shared status types used by the parent and every component resource

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ComponentType;

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
///
/// Condition types are globally unique across all components, so a type
/// alone identifies who is responsible for it.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., ApiServerHealthy)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// Whether the condition currently holds
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// A condition on the parent, tagged with the component that produced it
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentCondition {
    /// The condition as reported by the component
    #[serde(flatten)]
    pub condition: Condition,

    /// Component responsible for the condition
    pub managed_by: ComponentType,
}

/// Generations a component controller had processed at its last status write
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObservedGenerations {
    /// `metadata.generation` of the component resource itself
    #[serde(default)]
    pub resource_generation: i64,

    /// Generation of the owning ControlPlane the resource was stamped with
    #[serde(default)]
    pub owner_generation: i64,

    /// Generation of the InternalConfig the resource was stamped with (-1 if none)
    #[serde(default)]
    pub internal_config_generation: i64,
}

/// Status fragment every component resource carries
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommonStatus {
    /// Conditions reported by the component controller
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Generations the component controller had processed
    #[serde(default)]
    pub observed_generations: ObservedGenerations,
}

impl CommonStatus {
    /// Find a condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}

/// Full status of a component resource: the common fragment plus the
/// component-specific status that is injected into the parent
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChildStatus<E> {
    /// Conditions and observed generations
    #[serde(flatten)]
    pub common: CommonStatus,

    /// Component-specific status surfaced on the parent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<E>,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: conditions follow Kubernetes wire conventions
    #[test]
    fn story_condition_serializes_with_kubernetes_field_names() {
        let condition = Condition::new(
            "ApiServerHealthy",
            ConditionStatus::True,
            "Running",
            "all replicas ready",
        );
        let json = serde_json::to_value(&condition).unwrap();
        assert_eq!(json["type"], "ApiServerHealthy");
        assert_eq!(json["status"], "True");
        assert!(json.get("lastTransitionTime").is_some());
        assert!(condition.is_true());
    }

    #[test]
    fn condition_status_defaults_to_unknown() {
        assert_eq!(ConditionStatus::default(), ConditionStatus::Unknown);
        assert_eq!(ConditionStatus::False.to_string(), "False");
    }

    #[test]
    fn component_condition_flattens_the_condition() {
        let tagged = ComponentCondition {
            condition: Condition::new("AuthenticationHealthy", ConditionStatus::False, "R", "m"),
            managed_by: ComponentType::Authentication,
        };
        let json = serde_json::to_value(&tagged).unwrap();
        assert_eq!(json["type"], "AuthenticationHealthy");
        assert_eq!(json["managedBy"], "Authentication");
    }

    #[test]
    fn child_status_reads_missing_fields_as_defaults() {
        let status: ChildStatus<serde_json::Value> = serde_json::from_str("{}").unwrap();
        assert!(status.common.conditions.is_empty());
        assert_eq!(status.common.observed_generations.resource_generation, 0);
        assert!(status.external.is_none());
    }
}
