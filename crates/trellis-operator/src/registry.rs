//! Component registry: catalog entry to factory, converter, and role selectors
//!
//! The registry is built once at startup and shared read-only through the
//! controller context. Handles hand out fresh resource objects on every
//! call, so two reconciliations never mutate the same instance.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

use trellis_common::crd::{
    ComponentExternalStatus, ComponentSpec, ComponentType, ControlPlane, ControlPlaneStatus,
    InternalConfig, ALL_COMPONENT_TYPES,
};
use trellis_common::Result;

use crate::component::ComponentResource;
use crate::components;

/// Translates between the parent and one kind of component resource
pub trait ComponentConverter: Send + Sync {
    /// Component kind this converter handles
    fn component_type(&self) -> ComponentType;

    /// Whether the parent asks for this component at all
    fn is_configured(&self, parent: &ControlPlane) -> bool {
        parent.spec.is_enabled(self.component_type())
    }

    /// Derive the component spec from the parent and optional side configuration
    fn convert_to_resource_spec(
        &self,
        parent: &ControlPlane,
        internal_config: Option<&InternalConfig>,
    ) -> Result<ComponentSpec>;

    /// Copy the component's external status into its slot on the parent status.
    ///
    /// Fails with `WrongComponentStatusType` if handed another kind's status.
    fn inject_status(
        &self,
        status: ComponentExternalStatus,
        parent: &mut ControlPlaneStatus,
    ) -> Result<()>;
}

/// Builds an empty resource of one kind
pub type ResourceFactory = fn() -> ComponentResource;

/// Maps a role name to the label selectors of resources that role may access
pub type RoleSelectors = fn(&str) -> Vec<LabelSelector>;

/// Everything the registry knows about one component kind
#[derive(Clone)]
pub struct ComponentFactory {
    /// Creates a fresh, empty resource
    pub resource: ResourceFactory,
    /// Spec and status translation
    pub converter: Arc<dyn ComponentConverter>,
    /// Optional role to selector mapping for access aggregation
    pub role_selectors: Option<RoleSelectors>,
}

/// Access to one registered component kind
#[derive(Clone)]
pub struct ComponentHandle {
    component_type: ComponentType,
    factory: ComponentFactory,
}

impl ComponentHandle {
    /// Kind of the registered component
    pub fn component_type(&self) -> ComponentType {
        self.component_type
    }

    /// A freshly constructed, empty resource (never shared)
    pub fn resource(&self) -> ComponentResource {
        (self.factory.resource)()
    }

    /// The kind's converter
    pub fn converter(&self) -> &dyn ComponentConverter {
        self.factory.converter.as_ref()
    }

    /// Label selectors granted to `role`, if this kind takes part in access aggregation
    pub fn label_selectors_for_role(&self, role: &str) -> Option<Vec<LabelSelector>> {
        self.factory.role_selectors.map(|f| f(role))
    }
}

/// Ordered map of registered component kinds
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    factories: BTreeMap<ComponentType, ComponentFactory>,
}

impl ComponentRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every kind in the catalog
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for kind in ALL_COMPONENT_TYPES {
            registry.register(*kind, Some(components::factory(*kind)));
        }
        registry
    }

    /// Register `factory` for `kind`; `None` unregisters the kind
    pub fn register(&mut self, kind: ComponentType, factory: Option<ComponentFactory>) {
        match factory {
            Some(factory) => {
                self.factories.insert(kind, factory);
            }
            None => {
                self.factories.remove(&kind);
            }
        }
    }

    /// Handle for one kind
    pub fn get(&self, kind: ComponentType) -> Option<ComponentHandle> {
        self.factories.get(&kind).map(|factory| ComponentHandle {
            component_type: kind,
            factory: factory.clone(),
        })
    }

    /// Handles for all registered kinds, in catalog order
    pub fn all(&self) -> Vec<ComponentHandle> {
        self.factories
            .iter()
            .map(|(kind, factory)| ComponentHandle {
                component_type: *kind,
                factory: factory.clone(),
            })
            .collect()
    }

    /// Whether `kind` is registered
    pub fn contains(&self, kind: ComponentType) -> bool {
        self.factories.contains_key(&kind)
    }
}
