//! ControlPlane orchestration reconciler
//!
//! One reconciliation loads every component of a ControlPlane, decides per
//! component whether to apply, delete, wait, or leave it alone, folds the
//! components' conditions into the parent status, and writes that status
//! back only when it changed. Teardown order is enforced by dependency
//! finalizers: a component other components still depend on is never
//! deleted, and the parent keeps its own finalizer until every component
//! is gone.

mod client;
pub mod plan;
pub mod status;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kube::runtime::controller::Action;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use trellis_common::conditions::ConditionLedger;
use trellis_common::crd::{
    ComponentSpec, ComponentType, ConditionStatus, ControlPlane, InternalConfig,
};
use trellis_common::finalizer::{
    ComponentRef, DependencyFinalizers, FinalizerStore, KubeFinalizerStore,
};
use trellis_common::generation::{self, NO_INTERNAL_CONFIG};
use trellis_common::kube_utils;
use trellis_common::{
    Error, CONTROL_PLANE_FINALIZER, OPERATION_ANNOTATION, OPERATION_IGNORE, OPERATION_RECONCILE,
    OWNER_NAMESPACE_LABEL, OWNER_NAME_LABEL,
};

pub use client::{ControlPlaneKubeClient, ControlPlaneKubeClientImpl};
#[cfg(test)]
pub use client::MockControlPlaneKubeClient;

use crate::component::{Component, ComponentResource};
use crate::registry::{ComponentHandle, ComponentRegistry};
use plan::Step;
use status::{
    CurrentGenerations, COMPONENTS_READY, CONTROL_PLANE_RECONCILIATION, WAITING_FOR_DEPENDENTS,
};

/// Parent annotations with this prefix are copied onto every component
pub const COMPONENT_ANNOTATION_PREFIX: &str = "component.trellis.dev/";

/// How long to wait before the next reconciliation in each situation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequeueTimings {
    /// Periodic resync after a clean run
    pub resync: Duration,
    /// While a component waits for its dependents or children are terminating
    pub waiting: Duration,
    /// After a retryable error
    pub error: Duration,
}

impl Default for RequeueTimings {
    fn default() -> Self {
        Self {
            resync: Duration::from_secs(60),
            waiting: Duration::from_secs(10),
            error: Duration::from_secs(30),
        }
    }
}

/// Controller context for ControlPlane reconciliation
///
/// Use [`ContextBuilder`] to construct instances in production.
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn ControlPlaneKubeClient>,
    /// Registered component kinds
    pub registry: Arc<ComponentRegistry>,
    /// Dependency finalizer protocol, holding the process-wide write lock
    pub finalizers: Arc<DependencyFinalizers>,
    /// Requeue intervals
    pub timings: RequeueTimings,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Assemble a context from explicit store implementations
    ///
    /// Uses the built-in registry and default timings. Intended for tests
    /// that drive reconciliation against mocks or an in-memory store.
    pub fn from_parts(
        kube: Arc<dyn ControlPlaneKubeClient>,
        finalizer_store: Arc<dyn FinalizerStore>,
    ) -> Self {
        Self {
            kube,
            registry: Arc::new(ComponentRegistry::builtin()),
            finalizers: Arc::new(DependencyFinalizers::new(finalizer_store)),
            timings: RequeueTimings::default(),
        }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn ControlPlaneKubeClient>>,
    registry: Option<Arc<ComponentRegistry>>,
    timings: RequeueTimings,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            registry: None,
            timings: RequeueTimings::default(),
        }
    }

    /// Override the Kubernetes client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn ControlPlaneKubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Use a registry other than the built-in catalog
    pub fn registry(mut self, registry: Arc<ComponentRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the requeue intervals
    pub fn timings(mut self, timings: RequeueTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(ControlPlaneKubeClientImpl::new(self.client.clone()))),
            registry: self
                .registry
                .unwrap_or_else(|| Arc::new(ComponentRegistry::builtin())),
            finalizers: Arc::new(DependencyFinalizers::new(Arc::new(KubeFinalizerStore::new(
                self.client,
            )))),
            timings: self.timings,
        }
    }
}

/// Reconcile a ControlPlane
///
/// Per-component failures do not stop the other components; they are
/// collected and returned joined once the status has been written.
#[instrument(
    skip(parent, ctx),
    fields(control_plane = %parent.name_any(), namespace = %parent.namespace().unwrap_or_default())
)]
pub async fn reconcile(parent: Arc<ControlPlane>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = parent.name_any();
    let namespace = parent
        .namespace()
        .ok_or_else(|| Error::validation_for(&name, "ControlPlane must be namespaced"))?;

    if kube_utils::operation(&parent.metadata) == Some(OPERATION_IGNORE) {
        debug!("reconciliation paused by operation annotation");
        return Ok(Action::await_change());
    }

    let deleting = kube_utils::is_terminating(&parent.metadata);
    if !deleting && !kube_utils::has_finalizer(&parent.metadata, CONTROL_PLANE_FINALIZER) {
        info!("adding control plane finalizer");
        ctx.kube
            .add_control_plane_finalizer(&namespace, &name, CONTROL_PLANE_FINALIZER)
            .await?;
    }

    let mut errors = Vec::new();
    let handles = ctx.registry.all();

    // Load
    let mut children: BTreeMap<ComponentType, ComponentResource> = BTreeMap::new();
    let mut unloaded: BTreeSet<ComponentType> = BTreeSet::new();
    for handle in &handles {
        let kind = handle.component_type();
        let target = ComponentRef::new(kind, &namespace, &name);
        match ctx.kube.get_component(&target).await {
            Ok(Some(child)) => {
                children.insert(kind, child);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(component = %kind, error = %e, "failed to load component");
                unloaded.insert(kind);
                errors.push(e);
            }
        }
    }
    let loaded_any = !children.is_empty();
    // Converting without the InternalConfig would apply wrong defaults, so a
    // failed read is fatal unless the parent is only tearing down
    let internal_config = match ctx.kube.get_internal_config(&namespace, &name).await {
        Ok(internal_config) => internal_config,
        Err(e) if deleting => {
            warn!(error = %e, "failed to load internal config");
            errors.push(e);
            None
        }
        Err(e) => return Err(e),
    };

    release_absent_dependents(&ctx, &mut children, &unloaded, &mut errors).await;

    // Desired set
    let mut desired: BTreeMap<ComponentType, ComponentSpec> = BTreeMap::new();
    let mut unconverted: BTreeSet<ComponentType> = BTreeSet::new();
    if !deleting {
        for handle in &handles {
            let kind = handle.component_type();
            let converter = handle.converter();
            if !converter.is_configured(&parent) {
                continue;
            }
            match converter.convert_to_resource_spec(&parent, internal_config.as_ref()) {
                Ok(spec) => {
                    desired.insert(kind, spec);
                }
                Err(e) => {
                    warn!(component = %kind, error = %e, "failed to convert component spec");
                    unconverted.insert(kind);
                    errors.push(e);
                }
            }
        }
    }
    let wanted: BTreeSet<ComponentType> =
        desired.keys().chain(unconverted.iter()).copied().collect();

    // Plan and act
    let mut status = parent.status.clone().unwrap_or_default();
    let mut waiting: Vec<String> = Vec::new();
    let mut applied: Vec<ComponentType> = Vec::new();
    for handle in &handles {
        let kind = handle.component_type();
        if unloaded.contains(&kind) || unconverted.contains(&kind) {
            continue;
        }
        match plan::plan(children.get(&kind), desired.remove(&kind)) {
            Step::Skip => status.clear_external(kind),
            Step::AlreadyTerminating => {
                debug!(component = %kind, "component is terminating");
                status.clear_external(kind);
            }
            Step::WaitForDependents(dependents) => {
                status.clear_external(kind);
                let names: Vec<String> = dependents.iter().map(ToString::to_string).collect();
                info!(
                    component = %kind,
                    dependents = ?names,
                    "waiting for dependents before deleting"
                );
                waiting.push(format!("{kind} (held by {})", names.join(", ")));
            }
            Step::Delete => {
                status.clear_external(kind);
                if let Some(child) = children.get(&kind) {
                    let ic = internal_config.as_ref();
                    if let Err(e) = delete_child(&ctx, &parent, ic, child).await {
                        errors.push(e);
                    }
                }
            }
            Step::Apply(spec) => {
                match apply_child(&ctx, handle, &parent, internal_config.as_ref(), spec).await {
                    Ok(child) => {
                        match child.external_status() {
                            Some(external) => {
                                let converter = handle.converter();
                                if let Err(e) = converter.inject_status(external, &mut status) {
                                    error!(
                                        component = %kind,
                                        error = %e,
                                        "failed to inject component status"
                                    );
                                    errors.push(e);
                                }
                            }
                            None => status.clear_external(kind),
                        }
                        children.insert(kind, child);
                        applied.push(kind);
                    }
                    Err(e) => {
                        warn!(component = %kind, error = %e, "failed to apply component");
                        errors.push(e);
                    }
                }
            }
        }
    }

    hold_dependencies(&ctx, &children, &applied, &mut errors).await;

    // Fold
    let folded = status::fold_component_conditions(
        &status.component_conditions,
        children.values(),
        Utc::now(),
    );
    status.component_conditions = folded.conditions;
    errors.extend(folded.errors);

    let current = CurrentGenerations {
        owner: parent.metadata.generation.unwrap_or_default(),
        internal_config: internal_config
            .as_ref()
            .map(|ic| ic.metadata.generation.unwrap_or_default())
            .unwrap_or(NO_INTERNAL_CONFIG),
    };
    let readiness = status::aggregate_readiness(&wanted, &children, current);

    let mut ledger = ConditionLedger::new(&status.conditions, true);
    if errors.is_empty() {
        ledger.update(
            CONTROL_PLANE_RECONCILIATION,
            ConditionStatus::True,
            "Reconciled",
            "",
        );
    } else {
        let message: Vec<String> = errors.iter().map(ToString::to_string).collect();
        ledger.update(
            CONTROL_PLANE_RECONCILIATION,
            ConditionStatus::False,
            "ReconcileError",
            message.join("; "),
        );
    }
    ledger.update(
        COMPONENTS_READY,
        readiness.status,
        readiness.reason,
        readiness.message,
    );
    if !waiting.is_empty() {
        ledger.update(
            WAITING_FOR_DEPENDENTS,
            ConditionStatus::True,
            "DependentsPresent",
            waiting.join("; "),
        );
    }
    status.conditions = ledger.export();
    status.observed_generation = parent.metadata.generation;
    status.ready = readiness.status == ConditionStatus::True && !deleting && waiting.is_empty();

    if parent.status.as_ref() != Some(&status) {
        debug!(ready = status.ready, "updating control plane status");
        if let Err(e) = ctx
            .kube
            .patch_control_plane_status(&namespace, &name, &status)
            .await
        {
            errors.push(e);
        }
    }

    if kube_utils::operation(&parent.metadata) == Some(OPERATION_RECONCILE) {
        propagate_reconcile(&ctx, &children, &mut errors).await;
        if errors.is_empty() {
            ctx.kube
                .remove_control_plane_annotation(&namespace, &name, OPERATION_ANNOTATION)
                .await?;
        }
    }

    if deleting
        && !loaded_any
        && unloaded.is_empty()
        && kube_utils::has_finalizer(&parent.metadata, CONTROL_PLANE_FINALIZER)
    {
        info!("all components gone, releasing control plane");
        ctx.kube
            .remove_control_plane_finalizer(&namespace, &name, CONTROL_PLANE_FINALIZER)
            .await?;
        return match Error::join(errors) {
            Some(e) => Err(e),
            None => Ok(Action::await_change()),
        };
    }

    if let Some(e) = Error::join(errors) {
        return Err(e);
    }
    if !waiting.is_empty() || (deleting && loaded_any) {
        Ok(Action::requeue(ctx.timings.waiting))
    } else {
        Ok(Action::requeue(ctx.timings.resync))
    }
}

/// Error policy for the ControlPlane controller
///
/// Retryable errors requeue after the error interval. Everything else waits
/// for the next change to the parent or one of its components.
pub fn error_policy(parent: Arc<ControlPlane>, error: &Error, ctx: Arc<Context>) -> Action {
    if error.is_retryable() {
        warn!(
            ?error,
            control_plane = %parent.name_any(),
            "reconciliation failed, will retry"
        );
        Action::requeue(ctx.timings.error)
    } else {
        error!(
            ?error,
            control_plane = %parent.name_any(),
            internal = error.is_internal(),
            "reconciliation failed permanently"
        );
        Action::await_change()
    }
}

/// Release dependency tokens held on behalf of components that no longer exist
async fn release_absent_dependents(
    ctx: &Context,
    children: &mut BTreeMap<ComponentType, ComponentResource>,
    unloaded: &BTreeSet<ComponentType>,
    errors: &mut Vec<Error>,
) {
    let mut released: Vec<(ComponentType, ComponentType)> = Vec::new();
    for (kind, child) in children.iter() {
        for dependent in child.finalizers().dependents() {
            if children.contains_key(&dependent) || unloaded.contains(&dependent) {
                continue;
            }
            match ctx
                .finalizers
                .ensure(&child.component_ref(), dependent, false)
                .await
            {
                Ok(_) => released.push((*kind, dependent)),
                Err(e) => errors.push(e),
            }
        }
    }

    for (kind, dependent) in released {
        if let Some(child) = children.get_mut(&kind) {
            let mut finalizers = child.finalizers();
            finalizers.remove(&dependent.finalizer_token());
            child.meta_mut().finalizers = Some(finalizers.as_slice().to_vec());
        }
    }
}

/// Make every applied component hold a token on each dependency it has
async fn hold_dependencies(
    ctx: &Context,
    children: &BTreeMap<ComponentType, ComponentResource>,
    applied: &[ComponentType],
    errors: &mut Vec<Error>,
) {
    for kind in applied {
        for dependency in kind.dependencies() {
            let Some(requirement) = children.get(dependency) else {
                continue;
            };
            if requirement.is_terminating() {
                continue;
            }
            if let Err(e) = ctx
                .finalizers
                .ensure(&requirement.component_ref(), *kind, true)
                .await
            {
                errors.push(e);
            }
        }
    }
}

/// Build the component from the parent and server-side apply it
async fn apply_child(
    ctx: &Context,
    handle: &ComponentHandle,
    parent: &ControlPlane,
    internal_config: Option<&InternalConfig>,
    spec: ComponentSpec,
) -> Result<ComponentResource, Error> {
    let mut resource = handle.resource();
    resource.set_spec(spec)?;

    let annotations = component_annotations(parent);
    let meta = resource.meta_mut();
    meta.name = Some(parent.name_any());
    meta.namespace = parent.namespace();
    let labels = meta.labels.get_or_insert_with(BTreeMap::new);
    labels.insert(OWNER_NAME_LABEL.to_string(), parent.name_any());
    labels.insert(
        OWNER_NAMESPACE_LABEL.to_string(),
        parent.namespace().unwrap_or_default(),
    );
    generation::stamp(meta, &parent.metadata, internal_config.map(|ic| &ic.metadata));
    if !annotations.is_empty() {
        kube_utils::merge_string_map(&mut meta.annotations, &annotations);
    }
    meta.owner_references = parent.controller_owner_ref(&()).map(|r| vec![r]);

    let applied = ctx.kube.apply_component(&resource).await?;
    debug!(component = %applied.component_ref(), "applied component");
    Ok(applied)
}

/// Re-stamp the component's generation labels, then delete it
async fn delete_child(
    ctx: &Context,
    parent: &ControlPlane,
    internal_config: Option<&InternalConfig>,
    child: &ComponentResource,
) -> Result<(), Error> {
    let target = child.component_ref();
    let mut meta = child.meta().clone();
    generation::stamp(&mut meta, &parent.metadata, internal_config.map(|ic| &ic.metadata));
    let changes = label_changes(child.meta().labels.as_ref(), meta.labels.as_ref());
    if !changes.is_empty() {
        ctx.kube.patch_component_labels(&target, &changes).await?;
    }
    ctx.kube.delete_component(&target).await?;
    info!(component = %target, "deleted component no longer desired");
    Ok(())
}

/// Ask every component's controller to reconcile
async fn propagate_reconcile(
    ctx: &Context,
    children: &BTreeMap<ComponentType, ComponentResource>,
    errors: &mut Vec<Error>,
) {
    for child in children.values() {
        let target = child.component_ref();
        match ctx
            .kube
            .annotate_component(&target, OPERATION_ANNOTATION, OPERATION_RECONCILE)
            .await
        {
            Ok(()) => debug!(component = %target, "propagated reconcile request"),
            Err(e) if e.is_annotation_already_exists() => {
                debug!(component = %target, "reconcile request already pending")
            }
            Err(e) => errors.push(e),
        }
    }
}

/// Parent annotations that are passed through to components
fn component_annotations(parent: &ControlPlane) -> BTreeMap<String, String> {
    parent
        .annotations()
        .iter()
        .filter(|(k, _)| k.starts_with(COMPONENT_ANNOTATION_PREFIX))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Label patch turning `before` into `after`; `None` removes a label
fn label_changes(
    before: Option<&BTreeMap<String, String>>,
    after: Option<&BTreeMap<String, String>>,
) -> BTreeMap<String, Option<String>> {
    let empty = BTreeMap::new();
    let before = before.unwrap_or(&empty);
    let after = after.unwrap_or(&empty);

    let mut changes: BTreeMap<String, Option<String>> = after
        .iter()
        .filter(|(k, v)| before.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), Some(v.clone())))
        .collect();
    for key in before.keys() {
        if !after.contains_key(key) {
            changes.insert(key.clone(), None);
        }
    }
    changes
}
