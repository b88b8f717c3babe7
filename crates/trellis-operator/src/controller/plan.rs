//! Per-component planning
//!
//! Planning is pure: given what exists and what the parent asks for, decide
//! the single step to take for one component this reconciliation.

use trellis_common::crd::{ComponentSpec, ComponentType};

use crate::component::ComponentResource;

/// What to do with one component
#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    /// Nothing exists and nothing is wanted
    Skip,
    /// The store is already deleting the resource
    AlreadyTerminating,
    /// Not wanted, but other components still hold dependency finalizers on it
    WaitForDependents(Vec<ComponentType>),
    /// Not wanted and free to go
    Delete,
    /// Create or update the resource with this spec
    Apply(ComponentSpec),
}

/// Decide the step for one component
pub fn plan(current: Option<&ComponentResource>, desired: Option<ComponentSpec>) -> Step {
    match (current, desired) {
        (None, None) => Step::Skip,
        (Some(resource), _) if resource.is_terminating() => Step::AlreadyTerminating,
        (_, Some(spec)) => Step::Apply(spec),
        (Some(resource), None) => {
            let dependents = resource.finalizers().dependents();
            if dependents.is_empty() {
                Step::Delete
            } else {
                Step::WaitForDependents(dependents)
            }
        }
    }
}
