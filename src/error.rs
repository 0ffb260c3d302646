//! Error types for the Scaleway provider.

use thiserror::Error;

use crate::api::{ApiError, ApiErrorKind};
use crate::context::Operation;
use crate::locality::LocalityError;
use crate::policy::PolicyError;
use crate::schema::Diagnostic;
use crate::sweeper::{SweepError, SweepSummary};
use crate::wait::WaitError;

/// Coarse classification of a [`ProviderError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Input failed a schema validator or planner rule.
    Validation,
    /// The server says the resource does not exist.
    NotFound,
    /// Concurrent mutation or eventual-consistency window.
    Conflict,
    /// A deadline elapsed.
    Timeout,
    /// The host cancelled the operation.
    Cancelled,
    /// Authentication or authorization failure.
    Permission,
    /// Connection, DNS or TLS failure.
    Transport,
    /// Any other non-2xx response or failure state.
    Api,
    /// A bug or an unsupported call on the provider side.
    Internal,
}

/// Errors that can occur while serving provider calls.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Input failed validation before any remote call.
    #[error("validation: {0}")]
    Validation(String),

    /// The requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The server rejected a mutation because of a conflicting one.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A deadline elapsed during an RPC or a wait.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The operation was cancelled by the host.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Permission denied (authentication/authorization failure).
    #[error("permission denied: {0}")]
    Permission(String),

    /// The API could not be reached.
    #[error("transport: {0}")]
    Transport(String),

    /// Any other API failure, with the server message.
    #[error("api: {0}")]
    Api(String),

    /// The provider block is invalid or the provider is not configured.
    #[error("configuration: {0}")]
    Configuration(String),

    /// The requested resource type is unknown.
    #[error("unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The gRPC server failed.
    #[error("server: {0}")]
    Server(#[from] tonic::transport::Error),

    /// Operation not implemented.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// A provider-side invariant did not hold.
    #[error("internal: {0}")]
    Internal(String),

    /// A failure with the resource and operation it happened in.
    #[error(
        "{operation} {resource_kind} ({}): {source}",
        .id.as_deref().unwrap_or("not yet created")
    )]
    Operation {
        /// The resource kind, such as `scaleway_instance_ip`.
        resource_kind: String,
        /// The composite identifier, when known.
        id: Option<String>,
        /// The operation that failed.
        operation: Operation,
        /// The underlying cause.
        #[source]
        source: Box<ProviderError>,
    },

    /// An update that failed after mutating the resource.
    ///
    /// `state` is the state read back after the failure.
    #[error("{source}")]
    Partial {
        /// The state as read back from the server.
        state: serde_json::Value,
        /// The error that aborted the update.
        #[source]
        source: Box<ProviderError>,
    },

    /// A sweep that deleted some resources but not all.
    #[error("sweep: {0}")]
    Sweep(#[from] SweepError),
}

impl ProviderError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::Configuration(_) => ErrorKind::Validation,
            Self::NotFound(_) | Self::UnknownResource(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Permission(_) => ErrorKind::Permission,
            Self::Transport(_) | Self::Server(_) => ErrorKind::Transport,
            Self::Api(_) => ErrorKind::Api,
            Self::Serialization(_) | Self::Unimplemented(_) | Self::Internal(_) => {
                ErrorKind::Internal
            }
            Self::Operation { source, .. } | Self::Partial { source, .. } => source.kind(),
            Self::Sweep(_) => ErrorKind::Api,
        }
    }

    /// Build a validation error from error diagnostics.
    ///
    /// Every diagnostic is kept so that all problems are reported at once.
    pub fn from_diagnostics(diagnostics: &[Diagnostic]) -> Self {
        let messages: Vec<String> = diagnostics
            .iter()
            .map(|d| match (&d.attribute, &d.detail) {
                (Some(attr), Some(detail)) => format!("{} ({}): {}", d.summary, attr, detail),
                (Some(attr), None) => format!("{} ({})", d.summary, attr),
                (None, Some(detail)) => format!("{}: {}", d.summary, detail),
                (None, None) => d.summary.clone(),
            })
            .collect();
        Self::Validation(messages.join("; "))
    }

    /// Attach resource and operation context.
    ///
    /// Errors that already carry context are returned unchanged.
    pub fn in_operation(
        self,
        resource_kind: &str,
        id: Option<&str>,
        operation: Operation,
    ) -> Self {
        match self {
            Self::Operation { .. } => self,
            Self::Partial { state, source } => Self::Partial {
                state,
                source: Box::new(source.in_operation(resource_kind, id, operation)),
            },
            other => Self::Operation {
                resource_kind: resource_kind.to_string(),
                id: id.filter(|id| !id.is_empty()).map(str::to_string),
                operation,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, without operation or partial-state wrappers.
    pub fn root(&self) -> &ProviderError {
        match self {
            Self::Operation { source, .. } | Self::Partial { source, .. } => source.root(),
            other => other,
        }
    }

    /// The partial state carried by an interrupted update, if any.
    pub fn partial_state(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Partial { state, .. } => Some(state),
            Self::Operation { source, .. } => source.partial_state(),
            _ => None,
        }
    }

    /// What an incomplete sweep deleted before giving up on the rest.
    pub fn sweep_summary(&self) -> Option<&SweepSummary> {
        match self {
            Self::Sweep(SweepError::Incomplete { summary, .. }) => Some(summary),
            _ => None,
        }
    }
}

impl From<ApiError> for ProviderError {
    fn from(err: ApiError) -> Self {
        let message = err.to_string();
        match err.kind {
            ApiErrorKind::NotFound => Self::NotFound(message),
            ApiErrorKind::Conflict => Self::Conflict(message),
            ApiErrorKind::Permission => Self::Permission(message),
            ApiErrorKind::Transport => Self::Transport(message),
            ApiErrorKind::TooManyRequests | ApiErrorKind::Api => Self::Api(message),
        }
    }
}

impl From<LocalityError> for ProviderError {
    fn from(err: LocalityError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<WaitError> for ProviderError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::Timeout { .. } => Self::Timeout(err.to_string()),
            WaitError::Cancelled { .. } => Self::Cancelled(err.to_string()),
            WaitError::FailureState { .. } | WaitError::UnexpectedState { .. } => {
                Self::Api(err.to_string())
            }
            WaitError::Api(api) => api.into(),
        }
    }
}

impl From<PolicyError> for ProviderError {
    fn from(err: PolicyError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<ProviderError> for tonic::Status {
    fn from(err: ProviderError) -> Self {
        let message = err.to_string();
        match err.kind() {
            ErrorKind::Validation => tonic::Status::invalid_argument(message),
            ErrorKind::NotFound => tonic::Status::not_found(message),
            ErrorKind::Conflict => tonic::Status::aborted(message),
            ErrorKind::Timeout => tonic::Status::deadline_exceeded(message),
            ErrorKind::Cancelled => tonic::Status::cancelled(message),
            ErrorKind::Permission => tonic::Status::permission_denied(message),
            ErrorKind::Transport => tonic::Status::unavailable(message),
            ErrorKind::Api => tonic::Status::unknown(message),
            ErrorKind::Internal => tonic::Status::internal(message),
        }
    }
}
