//! Folding component conditions into the parent status

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::error;

use trellis_common::conditions::{is_internal_condition, ConditionLedger, CONDITION_NOT_REPORTED};
use trellis_common::crd::{ComponentCondition, ComponentType, Condition, ConditionStatus};
use trellis_common::generation;
use trellis_common::Error;

use crate::component::{Component, ComponentResource};

/// Parent condition summarizing orchestration errors
pub const CONTROL_PLANE_RECONCILIATION: &str = "ControlPlaneReconciliation";

/// Parent condition aggregating component readiness
pub const COMPONENTS_READY: &str = "ComponentsReady";

/// Parent condition present while a component waits for its dependents
pub const WAITING_FOR_DEPENDENTS: &str = "WaitingForDependents";

/// Component conditions for the parent, plus any collisions found
#[derive(Debug, Default)]
pub struct Folded {
    /// Conditions sorted by type, tagged with their component
    pub conditions: Vec<ComponentCondition>,
    /// `DuplicateCondition` errors, one per collision
    pub errors: Vec<Error>,
}

/// Collect every promotable condition of every child.
///
/// Children are visited in catalog order. When two children report the same
/// type, the first reporter keeps it and the collision becomes an internal
/// error; the rest of the fold is unaffected. Required conditions a child
/// has not reported render as `Unknown`.
pub fn fold_component_conditions<'a>(
    prior: &[ComponentCondition],
    children: impl IntoIterator<Item = &'a ComponentResource>,
    now: DateTime<Utc>,
) -> Folded {
    let prior: Vec<Condition> = prior.iter().map(|c| c.condition.clone()).collect();
    let mut ledger = ConditionLedger::with_now(&prior, true, now);
    let mut owners: BTreeMap<String, ComponentType> = BTreeMap::new();
    let mut errors = Vec::new();

    for child in children {
        let kind = child.component_type();
        let reported = child
            .common_status()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default();

        for condition in reported {
            if is_internal_condition(&condition.type_) {
                continue;
            }
            if let Some(first) = owners.get(&condition.type_) {
                if *first != kind {
                    error!(
                        condition = %condition.type_,
                        first = %first,
                        second = %kind,
                        "duplicate condition type"
                    );
                    errors.push(Error::DuplicateCondition {
                        condition_type: condition.type_.clone(),
                        first: *first,
                        second: kind,
                    });
                    continue;
                }
            }
            owners.insert(condition.type_.clone(), kind);
            ledger.record(condition.clone());
        }

        for required in child.required_conditions() {
            if owners.contains_key(&required) {
                continue;
            }
            ledger.update(
                &required,
                ConditionStatus::Unknown,
                CONDITION_NOT_REPORTED,
                format!("{kind} has not reported {required}"),
            );
            owners.insert(required, kind);
        }
    }

    let conditions = ledger
        .export()
        .into_iter()
        .filter_map(|condition| {
            let managed_by = *owners.get(&condition.type_)?;
            Some(ComponentCondition {
                condition,
                managed_by,
            })
        })
        .collect();

    Folded { conditions, errors }
}

/// Outcome of the readiness aggregation, ready to be written as a condition
#[derive(Clone, Debug, PartialEq)]
pub struct Readiness {
    /// Condition status
    pub status: ConditionStatus,
    /// Condition reason
    pub reason: &'static str,
    /// Condition message
    pub message: String,
}

/// Generations a child must have observed to count as current
#[derive(Clone, Copy, Debug)]
pub struct CurrentGenerations {
    /// Parent generation
    pub owner: i64,
    /// InternalConfig generation, or `NO_INTERNAL_CONFIG`
    pub internal_config: i64,
}

/// Aggregate the readiness of the components.
///
/// `False` when any existing component reports its reconciliation condition
/// `False`, wanted or not. Otherwise `Unknown` while a wanted component is
/// missing or has not caught up with `current`, `True` when none is.
pub fn aggregate_readiness(
    wanted: &BTreeSet<ComponentType>,
    children: &BTreeMap<ComponentType, ComponentResource>,
    current: CurrentGenerations,
) -> Readiness {
    let mut failing = Vec::new();
    let mut pending = Vec::new();

    for (kind, child) in children {
        let reconciliation_type = kind.reconciliation_condition();
        let reconciliation = child
            .common_status()
            .and_then(|s| s.condition(&reconciliation_type));
        if let Some(c) = reconciliation.filter(|c| c.status == ConditionStatus::False) {
            failing.push(format!("{kind}: {}", c.reason));
        }
    }

    for kind in wanted {
        match children.get(kind) {
            Some(child) if is_current(child, current) => {}
            _ => pending.push(kind.to_string()),
        }
    }

    failing.sort();
    pending.sort();
    if !failing.is_empty() {
        Readiness {
            status: ConditionStatus::False,
            reason: "ComponentsFailing",
            message: failing.join(", "),
        }
    } else if !pending.is_empty() {
        Readiness {
            status: ConditionStatus::Unknown,
            reason: "ComponentsProgressing",
            message: format!("waiting for {}", pending.join(", ")),
        }
    } else {
        Readiness {
            status: ConditionStatus::True,
            reason: "AllComponentsReady",
            message: String::new(),
        }
    }
}

/// Stamped at the current generations, observed by its controller, and healthy
fn is_current(child: &ComponentResource, current: CurrentGenerations) -> bool {
    let kind = child.component_type();
    match generation::read(child.meta()) {
        Ok(stamped)
            if stamped.owner == current.owner
                && stamped.internal_config == current.internal_config => {}
        _ => return false,
    }

    let status = child.common_status();
    let observed = status
        .map(|s| s.observed_generations.clone())
        .unwrap_or_default();
    let healthy = kind.healthy_condition();
    let reconciliation = kind.reconciliation_condition();
    generation::is_ready(
        current.owner,
        current.internal_config,
        child.meta().generation.unwrap_or_default(),
        &observed,
        &[
            status.and_then(|s| s.condition(&healthy)),
            status.and_then(|s| s.condition(&reconciliation)),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use trellis_common::crd::{CommonStatus, ObservedGenerations};
    use trellis_common::generation::NO_INTERNAL_CONFIG;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn condition(type_: &str, status: ConditionStatus, reason: &str) -> Condition {
        Condition {
            type_: type_.to_string(),
            status,
            reason: reason.to_string(),
            message: String::new(),
            last_transition_time: t(100),
        }
    }

    fn child(kind: ComponentType, conditions: Vec<Condition>) -> ComponentResource {
        let mut resource = ComponentResource::empty(kind);
        let meta = resource.meta_mut();
        meta.name = Some("prod".to_string());
        meta.namespace = Some("tenants".to_string());
        meta.generation = Some(2);
        meta.labels = Some(BTreeMap::from([(
            trellis_common::OWNER_GENERATION_LABEL.to_string(),
            "7".to_string(),
        )]));
        resource.set_common_status(CommonStatus {
            conditions,
            observed_generations: ObservedGenerations {
                resource_generation: 2,
                owner_generation: 7,
                internal_config_generation: NO_INTERNAL_CONFIG,
            },
        });
        resource
    }

    fn healthy(kind: ComponentType) -> ComponentResource {
        child(
            kind,
            vec![
                condition(&kind.healthy_condition(), ConditionStatus::True, "Running"),
                condition(&kind.reconciliation_condition(), ConditionStatus::True, "Synced"),
            ],
        )
    }

    const CURRENT: CurrentGenerations = CurrentGenerations {
        owner: 7,
        internal_config: NO_INTERNAL_CONFIG,
    };

    /// Story: reported conditions are tagged, internal ones stay private
    #[test]
    fn story_fold_tags_and_filters() {
        let mut api = healthy(ComponentType::ApiServer);
        if let Some(mut status) = api.common_status().cloned() {
            status
                .conditions
                .push(condition("certRotation", ConditionStatus::True, "Done"));
            api.set_common_status(status);
        }

        let folded = fold_component_conditions(&[], [&api], t(200));
        assert!(folded.errors.is_empty());
        let types: Vec<_> = folded
            .conditions
            .iter()
            .map(|c| c.condition.type_.as_str())
            .collect();
        assert_eq!(types, ["ApiServerHealthy", "ApiServerReconciliation"]);
        assert!(folded
            .conditions
            .iter()
            .all(|c| c.managed_by == ComponentType::ApiServer));
        // Child transition times are kept verbatim
        assert_eq!(folded.conditions[0].condition.last_transition_time, t(100));
    }

    /// Story: a silent component shows up as Unknown, not as missing
    #[test]
    fn story_missing_required_conditions_are_unknown() {
        let quiet = child(ComponentType::Authentication, vec![]);
        let folded = fold_component_conditions(&[], [&quiet], t(200));
        assert_eq!(folded.conditions.len(), 2);
        for c in &folded.conditions {
            assert_eq!(c.condition.status, ConditionStatus::Unknown);
            assert_eq!(c.condition.reason, CONDITION_NOT_REPORTED);
            assert_eq!(c.managed_by, ComponentType::Authentication);
        }

        // Refolding later keeps the Unknown transition time
        let again = fold_component_conditions(&folded.conditions, [&quiet], t(900));
        assert_eq!(again.conditions[0].condition.last_transition_time, t(200));
    }

    /// Story: two components claiming one condition type
    #[test]
    fn story_duplicate_condition_keeps_first_reporter() {
        let api = healthy(ComponentType::ApiServer);
        let mut rogue = healthy(ComponentType::DeploymentService);
        if let Some(mut status) = rogue.common_status().cloned() {
            status.conditions.push(condition(
                "ApiServerHealthy",
                ConditionStatus::False,
                "Confused",
            ));
            rogue.set_common_status(status);
        }

        let folded = fold_component_conditions(&[], [&api, &rogue], t(200));
        assert_eq!(folded.errors.len(), 1);
        assert!(folded.errors[0].is_internal());

        let owner = folded
            .conditions
            .iter()
            .find(|c| c.condition.type_ == "ApiServerHealthy")
            .unwrap();
        assert_eq!(owner.managed_by, ComponentType::ApiServer);
        assert_eq!(owner.condition.status, ConditionStatus::True);
        // The rest of the rogue's conditions still propagate
        assert!(folded
            .conditions
            .iter()
            .any(|c| c.condition.type_ == "DeploymentServiceHealthy"));
    }

    #[test]
    fn stale_conditions_of_removed_children_are_pruned() {
        let prior = vec![ComponentCondition {
            condition: condition("CloudOrchestratorHealthy", ConditionStatus::True, "Up"),
            managed_by: ComponentType::CloudOrchestrator,
        }];
        let folded = fold_component_conditions(&prior, [&healthy(ComponentType::ApiServer)], t(1));
        assert!(folded
            .conditions
            .iter()
            .all(|c| c.managed_by == ComponentType::ApiServer));
    }

    /// Story: aggregate readiness across generations and failures
    #[test]
    fn story_aggregate_readiness() {
        let wanted = BTreeSet::from([ComponentType::ApiServer, ComponentType::DeploymentService]);
        let mut children = BTreeMap::from([
            (ComponentType::ApiServer, healthy(ComponentType::ApiServer)),
            (
                ComponentType::DeploymentService,
                healthy(ComponentType::DeploymentService),
            ),
        ]);
        assert_eq!(
            aggregate_readiness(&wanted, &children, CURRENT).status,
            ConditionStatus::True
        );

        // Parent moved on: children are stale until re-stamped and observed
        let next = CurrentGenerations {
            owner: 8,
            ..CURRENT
        };
        let readiness = aggregate_readiness(&wanted, &children, next);
        assert_eq!(readiness.status, ConditionStatus::Unknown);
        assert_eq!(readiness.reason, "ComponentsProgressing");

        // A failing reconciliation wins over staleness
        children.insert(
            ComponentType::DeploymentService,
            child(
                ComponentType::DeploymentService,
                vec![condition(
                    "DeploymentServiceReconciliation",
                    ConditionStatus::False,
                    "ImagePullBackOff",
                )],
            ),
        );
        let readiness = aggregate_readiness(&wanted, &children, next);
        assert_eq!(readiness.status, ConditionStatus::False);
        assert_eq!(readiness.message, "DeploymentService: ImagePullBackOff");
    }

    /// Story: a component on its way out still fails readiness
    #[test]
    fn story_unwanted_failing_child_fails_readiness() {
        let failing = child(
            ComponentType::ApiServer,
            vec![condition(
                "ApiServerReconciliation",
                ConditionStatus::False,
                "FinalizerStuck",
            )],
        );
        let children = BTreeMap::from([(ComponentType::ApiServer, failing)]);

        // Parent deleting: nothing is wanted
        let readiness = aggregate_readiness(&BTreeSet::new(), &children, CURRENT);
        assert_eq!(readiness.status, ConditionStatus::False);
        assert_eq!(readiness.message, "ApiServer: FinalizerStuck");

        // Disabled while a wanted sibling is healthy
        let mut children = children;
        children.insert(
            ComponentType::Authentication,
            healthy(ComponentType::Authentication),
        );
        let wanted = BTreeSet::from([ComponentType::Authentication]);
        let readiness = aggregate_readiness(&wanted, &children, CURRENT);
        assert_eq!(readiness.status, ConditionStatus::False);
        assert_eq!(readiness.reason, "ComponentsFailing");
    }

    #[test]
    fn unwanted_healthy_child_does_not_block_readiness() {
        let mut stale = healthy(ComponentType::CloudOrchestrator);
        stale.meta_mut().labels = None;
        let children = BTreeMap::from([
            (ComponentType::ApiServer, healthy(ComponentType::ApiServer)),
            (ComponentType::CloudOrchestrator, stale),
        ]);
        let wanted = BTreeSet::from([ComponentType::ApiServer]);
        assert_eq!(
            aggregate_readiness(&wanted, &children, CURRENT).status,
            ConditionStatus::True
        );
    }

    #[test]
    fn missing_wanted_child_is_pending() {
        let wanted = BTreeSet::from([ComponentType::Authorization]);
        let readiness = aggregate_readiness(&wanted, &BTreeMap::new(), CURRENT);
        assert_eq!(readiness.status, ConditionStatus::Unknown);
        assert!(readiness.message.contains("Authorization"));
    }

    #[test]
    fn unlabeled_child_is_not_ready() {
        let mut api = healthy(ComponentType::ApiServer);
        api.meta_mut().labels = None;
        let wanted = BTreeSet::from([ComponentType::ApiServer]);
        let children = BTreeMap::from([(ComponentType::ApiServer, api)]);
        assert_eq!(
            aggregate_readiness(&wanted, &children, CURRENT).status,
            ConditionStatus::Unknown
        );
    }
}
