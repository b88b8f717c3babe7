//! Common types for Trellis: CRDs, errors, bookkeeping ledgers, and utilities

#![deny(missing_docs)]

pub mod conditions;
pub mod crd;
pub mod error;
pub mod finalizer;
pub mod generation;
pub mod kube_utils;
pub mod retry;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label on a component resource naming its owning ControlPlane
pub const OWNER_NAME_LABEL: &str = "trellis.dev/owner-name";

/// Label on a component resource naming its owning ControlPlane's namespace
pub const OWNER_NAMESPACE_LABEL: &str = "trellis.dev/owner-namespace";

/// Label recording the ControlPlane generation a component was built from
pub const OWNER_GENERATION_LABEL: &str = "trellis.dev/owner-generation";

/// Label recording the InternalConfig generation a component was built from
pub const INTERNAL_CONFIG_GENERATION_LABEL: &str = "trellis.dev/internal-config-generation";

/// Annotation requesting an operation from the orchestrator
pub const OPERATION_ANNOTATION: &str = "trellis.dev/operation";

/// `OPERATION_ANNOTATION` value forcing a reconcile that propagates to children
pub const OPERATION_RECONCILE: &str = "reconcile";

/// `OPERATION_ANNOTATION` value pausing reconciliation of the resource
pub const OPERATION_IGNORE: &str = "ignore";

/// Finalizer the orchestrator holds on every ControlPlane until its children are gone
pub const CONTROL_PLANE_FINALIZER: &str = "trellis.dev/control-plane";

/// Field manager used for every write the orchestrator makes
pub const FIELD_MANAGER: &str = "trellis-controller";
