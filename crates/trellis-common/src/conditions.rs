//! Condition ledger with idempotent updates and deterministic export
//!
//! A ledger is built from the conditions a resource carried before this
//! reconciliation, updated as the reconciler learns things, and exported
//! back onto the status. Transition times only move when a condition's
//! status changes, so rewriting the same status never looks like a flap.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::crd::{Condition, ConditionStatus};

/// Reason used when a component has not reported a condition it is expected to
pub const CONDITION_NOT_REPORTED: &str = "ConditionNotReported";

/// Whether a condition type is internal to its component and never promoted
///
/// Internal types start with a lowercase letter.
pub fn is_internal_condition(type_: &str) -> bool {
    type_.chars().next().is_some_and(|c| c.is_ascii_lowercase())
}

/// Mutable view over a resource's conditions for one reconciliation
#[derive(Clone, Debug)]
pub struct ConditionLedger {
    conditions: BTreeMap<String, Condition>,
    touched: BTreeSet<String>,
    prune_untouched: bool,
    now: DateTime<Utc>,
}

impl ConditionLedger {
    /// Start a ledger from `prior`, capturing the current time
    ///
    /// With `prune_untouched`, any prior condition not updated before
    /// [`export`](Self::export) is dropped.
    pub fn new(prior: &[Condition], prune_untouched: bool) -> Self {
        Self::with_now(prior, prune_untouched, Utc::now())
    }

    /// Start a ledger with an explicit timestamp for every transition
    pub fn with_now(prior: &[Condition], prune_untouched: bool, now: DateTime<Utc>) -> Self {
        let conditions = prior
            .iter()
            .map(|c| (c.type_.clone(), c.clone()))
            .collect();
        Self {
            conditions,
            touched: BTreeSet::new(),
            prune_untouched,
            now,
        }
    }

    /// Upsert a condition, returning whether its status changed.
    ///
    /// The transition time moves to the ledger's `now` only when the status
    /// differs from the stored one; reason and message are always replaced.
    pub fn update(
        &mut self,
        type_: &str,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> bool {
        self.touched.insert(type_.to_string());
        let reason = reason.into();
        let message = message.into();

        match self.conditions.get_mut(type_) {
            Some(existing) => {
                let changed = existing.status != status;
                if changed {
                    existing.status = status;
                    existing.last_transition_time = self.now;
                }
                existing.reason = reason;
                existing.message = message;
                changed
            }
            None => {
                self.conditions.insert(
                    type_.to_string(),
                    Condition {
                        type_: type_.to_string(),
                        status,
                        reason,
                        message,
                        last_transition_time: self.now,
                    },
                );
                true
            }
        }
    }

    /// Upsert a condition verbatim, keeping its own transition time
    pub fn record(&mut self, condition: Condition) {
        self.touched.insert(condition.type_.clone());
        self.conditions.insert(condition.type_.clone(), condition);
    }

    /// Whether `type_` is present (and, when pruning, was touched this session)
    pub fn has(&self, type_: &str) -> bool {
        if self.prune_untouched {
            self.touched.contains(type_)
        } else {
            self.conditions.contains_key(type_)
        }
    }

    /// Look up a condition as it would be exported
    pub fn get(&self, type_: &str) -> Option<&Condition> {
        if self.has(type_) {
            self.conditions.get(type_)
        } else {
            None
        }
    }

    /// Conditions sorted by type
    pub fn export(&self) -> Vec<Condition> {
        self.conditions
            .values()
            .filter(|c| !self.prune_untouched || self.touched.contains(&c.type_))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn prior() -> Vec<Condition> {
        vec![
            Condition {
                type_: "Ready".to_string(),
                status: ConditionStatus::True,
                reason: "AllGood".to_string(),
                message: String::new(),
                last_transition_time: t(100),
            },
            Condition {
                type_: "Stale".to_string(),
                status: ConditionStatus::False,
                reason: "Old".to_string(),
                message: String::new(),
                last_transition_time: t(50),
            },
        ]
    }

    /// Story: rewriting the same status never looks like a transition
    #[test]
    fn story_same_status_keeps_transition_time() {
        let mut ledger = ConditionLedger::with_now(&prior(), false, t(200));

        assert!(!ledger.update("Ready", ConditionStatus::True, "StillGood", "fine"));
        let ready = ledger.get("Ready").unwrap();
        assert_eq!(ready.last_transition_time, t(100));
        assert_eq!(ready.reason, "StillGood");
        assert_eq!(ready.message, "fine");

        assert!(ledger.update("Ready", ConditionStatus::False, "Broken", ""));
        assert_eq!(ledger.get("Ready").unwrap().last_transition_time, t(200));
    }

    #[test]
    fn new_condition_gets_now() {
        let mut ledger = ConditionLedger::with_now(&[], false, t(300));
        assert!(ledger.update("Fresh", ConditionStatus::Unknown, "Init", ""));
        assert_eq!(ledger.get("Fresh").unwrap().last_transition_time, t(300));
    }

    /// Story: conditions of removed components disappear when pruning
    #[test]
    fn story_pruning_drops_untouched_prior_conditions() {
        let mut ledger = ConditionLedger::with_now(&prior(), true, t(200));
        assert!(!ledger.has("Ready"));
        ledger.update("Ready", ConditionStatus::True, "AllGood", "");
        assert!(ledger.has("Ready"));
        assert!(!ledger.has("Stale"));
        assert!(ledger.get("Stale").is_none());

        let exported = ledger.export();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].type_, "Ready");
        assert_eq!(exported[0].last_transition_time, t(100));
    }

    #[test]
    fn without_pruning_prior_conditions_survive() {
        let ledger = ConditionLedger::with_now(&prior(), false, t(200));
        assert!(ledger.has("Stale"));
        assert_eq!(ledger.export().len(), 2);
    }

    /// Story: export is the same whatever order updates arrived in
    #[test]
    fn story_export_is_deterministic_across_update_order() {
        let updates = [
            ("Zeta", ConditionStatus::True),
            ("Alpha", ConditionStatus::False),
            ("Mid", ConditionStatus::Unknown),
        ];

        let mut forward = ConditionLedger::with_now(&[], true, t(1));
        for (ty, st) in updates {
            forward.update(ty, st, "R", "m");
        }
        let mut backward = ConditionLedger::with_now(&[], true, t(1));
        for (ty, st) in updates.iter().rev() {
            backward.update(ty, *st, "R", "m");
        }

        let a = forward.export();
        assert_eq!(a, backward.export());
        let types: Vec<_> = a.iter().map(|c| c.type_.as_str()).collect();
        assert_eq!(types, ["Alpha", "Mid", "Zeta"]);
    }

    #[test]
    fn record_keeps_the_reported_transition_time() {
        let mut ledger = ConditionLedger::with_now(&[], true, t(999));
        let reported = Condition {
            type_: "ApiServerHealthy".to_string(),
            status: ConditionStatus::True,
            reason: "Running".to_string(),
            message: String::new(),
            last_transition_time: t(10),
        };
        ledger.record(reported.clone());
        assert_eq!(ledger.export(), vec![reported]);
    }

    #[test]
    fn lowercase_types_are_internal() {
        assert!(is_internal_condition("cacheWarm"));
        assert!(!is_internal_condition("ApiServerHealthy"));
        assert!(!is_internal_condition(""));
    }
}
