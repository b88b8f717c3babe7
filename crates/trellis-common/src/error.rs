//! Error types for the Trellis operator
//!
//! Errors are structured with fields to aid debugging in production. The
//! variants map onto how the reconcilers must react to them: store errors
//! are retried, bookkeeping violations fail readiness for one resource,
//! programming errors are surfaced loudly, and benign races are recognizable
//! so callers can ignore them.

use thiserror::Error;

use crate::crd::ComponentType;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Trellis operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error (store interaction)
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A resource is missing one of the generation bookkeeping labels
    #[error("resource {resource} is missing generation label {label}")]
    MissingGenerationLabel {
        /// Namespaced name of the resource
        resource: String,
        /// The absent label key
        label: String,
    },

    /// A generation bookkeeping label does not hold an integer
    #[error("resource {resource} has invalid generation label {label}={value}")]
    InvalidGenerationLabel {
        /// Namespaced name of the resource
        resource: String,
        /// The label key
        label: String,
        /// The unparseable value
        value: String,
    },

    /// A converter produced, or a resource was handed, a spec of the wrong kind
    #[error("wrong component config type: expected {expected}, got {actual}")]
    WrongComponentConfigType {
        /// The component kind that owns the resource
        expected: ComponentType,
        /// The component kind of the supplied spec
        actual: ComponentType,
    },

    /// A converter was handed an external status of the wrong kind
    #[error("wrong component status type: expected {expected}, got {actual}")]
    WrongComponentStatusType {
        /// The component kind the converter injects
        expected: ComponentType,
        /// The component kind of the supplied status
        actual: ComponentType,
    },

    /// Two components reported the same condition type
    #[error("condition {condition_type} reported by both {first} and {second}")]
    DuplicateCondition {
        /// The colliding condition type
        condition_type: String,
        /// Component that reported it first
        first: ComponentType,
        /// Component that reported it again
        second: ComponentType,
    },

    /// A dependency finalizer was requested on a resource that does not exist
    #[error("dependency {kind} {namespace}/{name} not found")]
    DependencyNotFound {
        /// Kind of the depended-upon resource
        kind: ComponentType,
        /// Namespace of the depended-upon resource
        namespace: String,
        /// Name of the depended-upon resource
        name: String,
    },

    /// An annotation was already set by another writer
    #[error("annotation {key} already exists on {resource}")]
    AnnotationAlreadyExists {
        /// The annotation key
        key: String,
        /// Namespaced name of the resource
        resource: String,
    },

    /// Remote target credentials are missing or unusable
    #[error("credentials error for target {target}: {message}")]
    Credentials {
        /// Namespaced name of the target resource
        target: String,
        /// Description of what is wrong
        message: String,
    },

    /// Validation error for CRD specs
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Name of the resource with invalid configuration
        resource: String,
        /// Description of what's invalid
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "worker")
        context: String,
    },

    /// Several independent failures collected during one reconciliation
    #[error("{}", join_messages(.errors))]
    Multiple {
        /// The collected errors, in the order they occurred
        errors: Vec<Error>,
    },
}

fn join_messages(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a validation error with resource context
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Create a credentials error for a worker target
    pub fn credentials(target: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Credentials {
            target: target.into(),
            message: msg.into(),
        }
    }

    /// Join accumulated errors into one.
    ///
    /// Returns `None` for an empty list and the error itself for a single
    /// entry, so callers never see a `Multiple` wrapping one error.
    pub fn join(mut errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Error::Multiple { errors }),
        }
    }

    /// Check if this error is retryable
    ///
    /// Store errors are retried except for client errors; a 409 Conflict from
    /// a compare-and-swap write is transient and therefore retried.
    /// Programming errors and invalid configuration are not retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) if ae.code == 409 => true,
                kube::Error::Api(ae) => !(400..500).contains(&ae.code),
                _ => true,
            },
            Error::MissingGenerationLabel { .. } | Error::InvalidGenerationLabel { .. } => true,
            Error::WrongComponentConfigType { .. }
            | Error::WrongComponentStatusType { .. }
            | Error::DuplicateCondition { .. } => false,
            Error::DependencyNotFound { .. } => true,
            Error::AnnotationAlreadyExists { .. } => true,
            Error::Credentials { .. } => true,
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
            Error::Multiple { errors } => errors.iter().any(Error::is_retryable),
        }
    }

    /// Whether this error indicates a programming mistake rather than a
    /// user or environment problem
    pub fn is_internal(&self) -> bool {
        match self {
            Error::WrongComponentConfigType { .. }
            | Error::WrongComponentStatusType { .. }
            | Error::DuplicateCondition { .. } => true,
            Error::Multiple { errors } => errors.iter().any(Error::is_internal),
            _ => false,
        }
    }

    /// Whether this is the benign "another writer already set it" race
    pub fn is_annotation_already_exists(&self) -> bool {
        matches!(self, Error::AnnotationAlreadyExists { .. })
    }

    /// Whether this is a 404 from the store
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}
