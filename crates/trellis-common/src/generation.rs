//! Generation bookkeeping for component resources
//!
//! Every component resource is stamped with the generation of the
//! ControlPlane (and InternalConfig, if any) it was built from. A component
//! controller records those stamps, plus its own resource generation, in
//! `status.observedGenerations` after it processes a spec. Comparing the two
//! is the only way to tell whether a dependency's status reflects the latest
//! desired state or is merely left over from before the last change.

use std::collections::BTreeMap;

use kube::api::ObjectMeta;

use crate::crd::{Condition, ObservedGenerations};
use crate::{Error, Result, INTERNAL_CONFIG_GENERATION_LABEL, OWNER_GENERATION_LABEL};

/// Internal config generation recorded when no InternalConfig exists
pub const NO_INTERNAL_CONFIG: i64 = -1;

/// Generations a resource was stamped with
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StampedGenerations {
    /// Generation of the owning ControlPlane
    pub owner: i64,
    /// Generation of the InternalConfig, or `NO_INTERNAL_CONFIG`
    pub internal_config: i64,
}

/// Write the owner (and internal config) generation labels onto `resource`.
///
/// When `internal_config` is `None` the internal config label is removed so a
/// deleted InternalConfig is not remembered.
pub fn stamp(resource: &mut ObjectMeta, owner: &ObjectMeta, internal_config: Option<&ObjectMeta>) {
    let labels = resource.labels.get_or_insert_with(BTreeMap::new);
    labels.insert(
        OWNER_GENERATION_LABEL.to_string(),
        owner.generation.unwrap_or_default().to_string(),
    );
    match internal_config {
        Some(ic) => {
            labels.insert(
                INTERNAL_CONFIG_GENERATION_LABEL.to_string(),
                ic.generation.unwrap_or_default().to_string(),
            );
        }
        None => {
            labels.remove(INTERNAL_CONFIG_GENERATION_LABEL);
        }
    }
}

/// Read the generation labels written by [`stamp`].
pub fn read(resource: &ObjectMeta) -> Result<StampedGenerations> {
    let labels = resource.labels.as_ref();
    let name = display_name(resource);

    let owner = labels
        .and_then(|l| l.get(OWNER_GENERATION_LABEL))
        .ok_or_else(|| Error::MissingGenerationLabel {
            resource: name.clone(),
            label: OWNER_GENERATION_LABEL.to_string(),
        })?;
    let owner = parse_label(&name, OWNER_GENERATION_LABEL, owner)?;

    let internal_config = match labels.and_then(|l| l.get(INTERNAL_CONFIG_GENERATION_LABEL)) {
        Some(value) => parse_label(&name, INTERNAL_CONFIG_GENERATION_LABEL, value)?,
        None => NO_INTERNAL_CONFIG,
    };

    Ok(StampedGenerations {
        owner,
        internal_config,
    })
}

/// Whether a component's reported state can be trusted as current.
///
/// True only if the component controller has observed exactly the owner,
/// internal config, and resource generations given AND every supplied
/// condition is present and `True`.
pub fn is_ready(
    owner_generation: i64,
    internal_config_generation: i64,
    resource_generation: i64,
    observed: &ObservedGenerations,
    conditions: &[Option<&Condition>],
) -> bool {
    observed.owner_generation == owner_generation
        && observed.internal_config_generation == internal_config_generation
        && observed.resource_generation == resource_generation
        && conditions.iter().all(|c| c.is_some_and(Condition::is_true))
}

impl ObservedGenerations {
    /// Generations a component controller records after processing `resource`
    pub fn for_resource(resource: &ObjectMeta) -> Result<Self> {
        let stamped = read(resource)?;
        Ok(Self {
            resource_generation: resource.generation.unwrap_or_default(),
            owner_generation: stamped.owner,
            internal_config_generation: stamped.internal_config,
        })
    }
}

fn parse_label(resource: &str, label: &str, value: &str) -> Result<i64> {
    value
        .parse::<i64>()
        .map_err(|_| Error::InvalidGenerationLabel {
            resource: resource.to_string(),
            label: label.to_string(),
            value: value.to_string(),
        })
}

fn display_name(meta: &ObjectMeta) -> String {
    format!(
        "{}/{}",
        meta.namespace.as_deref().unwrap_or_default(),
        meta.name.as_deref().unwrap_or_default()
    )
}
