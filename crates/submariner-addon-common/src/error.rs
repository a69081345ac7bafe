//! Error types for the Submariner addon
//!
//! Errors carry the resource or platform they relate to so that reconcile
//! failures can be logged and surfaced in status conditions without extra
//! bookkeeping at the call site.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for addon operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Invalid configuration or credentials
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Resource with the invalid configuration (e.g. "cluster1/submariner")
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g. "spec.credentialsSecret")
        field: Option<String>,
    },

    /// Cloud provider error
    #[error("provider error [{platform}] for {cluster}: {message}")]
    Provider {
        /// Cluster whose cloud environment was being prepared
        cluster: String,
        /// Platform name (AWS, Azure, GCP, RHOS)
        platform: String,
        /// Description of what failed
        message: String,
        /// Whether this error is retryable
        retryable: bool,
    },

    /// Manifest rendering or decoding error
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// Several independent failures, one per line
    #[error("{}", join_errors(.0))]
    Aggregate(Vec<Error>),

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
        /// Context where the error occurred (e.g. "reconciler", "leader-election")
        context: String,
    },
}

/// Errors raised while turning embedded templates into typed objects
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Template asset is not embedded in the binary
    #[error("manifest asset {0} not found")]
    MissingAsset(String),

    /// Template failed to render
    #[error("failed to render {file}: {message}")]
    Template {
        /// Asset path
        file: String,
        /// Renderer message
        message: String,
    },

    /// Rendered YAML could not be decoded
    #[error("failed to decode {file}: {message}")]
    Decode {
        /// Asset path
        file: String,
        /// Decoder message
        message: String,
    },

    /// Decoded object is not one of the supported kinds
    #[error("unsupported kind {kind} in {file}")]
    UnsupportedKind {
        /// Asset path
        file: String,
        /// The apiVersion/kind that was found
        kind: String,
    },
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context and field path
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a retryable provider error
    pub fn provider_for(
        cluster: impl Into<String>,
        platform: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Provider {
            cluster: cluster.into(),
            platform: platform.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable provider error (e.g. missing credentials)
    pub fn provider_permanent(
        cluster: impl Into<String>,
        platform: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Provider {
            cluster: cluster.into(),
            platform: platform.into(),
            message: msg.into(),
            retryable: false,
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

    /// Collapse a list of failures into a single result
    ///
    /// Empty is success, a single failure is returned as-is, anything more
    /// becomes [`Error::Aggregate`].
    pub fn from_errors(mut errors: Vec<Error>) -> Result<(), Error> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Aggregate(errors)),
        }
    }

    /// The API server answered 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }

    /// The API server answered 409 (stale resourceVersion or already exists)
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 409)
    }

    /// Check if this error is retryable
    ///
    /// Validation, manifest and serialization errors need a config or code fix.
    /// Kubernetes errors are retryable unless they are 4xx client errors
    /// other than conflicts.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409
            ),
            Error::Validation { .. } => false,
            Error::Provider { retryable, .. } => *retryable,
            Error::Manifest(_) => false,
            Error::Aggregate(errors) => errors.iter().any(Error::is_retryable),
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

/// Shorthand used by tests and helpers to fabricate API failures
pub fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{reason} ({code})"),
        reason: reason.to_string(),
        code,
    })
}
