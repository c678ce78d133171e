//! Error taxonomy surfaced by driver operations.

use thiserror::Error;

use crate::api::ApiError;
use crate::config::ConfigError;
use crate::naming::NameError;

/// How a caller should react to a [`DriverError`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    /// The request cannot succeed as issued; do not retry unchanged.
    Permanent,
    /// The operation is still converging; invoke it again later.
    Retryable,
    /// The desired state already holds; treat as success.
    Converged,
}

/// Errors raised by [`super::SubvolumeDriver`] operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DriverError {
    /// Raised when a volume, snapshot, or creation token violates its grammar.
    #[error(transparent)]
    InvalidName(#[from] NameError),
    /// Raised when the subvolume being created already exists and is
    /// available. Its identity has been adopted into the request.
    #[error("subvolume {name} already exists")]
    AlreadyExists {
        /// Creation token of the existing subvolume.
        name: String,
    },
    /// Raised when a read or resize addresses a missing subvolume.
    #[error("subvolume {name} not found")]
    NotFound {
        /// Creation token or identifier used for the lookup.
        name: String,
    },
    /// Raised when a create wait expired while the subvolume was still
    /// being provisioned. The operation handle stays cached.
    #[error("subvolume {name} is still being created: {message}")]
    VolumeCreating {
        /// Creation token of the subvolume.
        name: String,
        /// Description of the wait that expired.
        message: String,
    },
    /// Raised when a multi-step procedure must be invoked again to finish.
    #[error("{operation} of {name} is in progress: {message}")]
    InProgress {
        /// Procedure that has not finished.
        operation: String,
        /// Resource the procedure acts on.
        name: String,
        /// Description of the step that did not complete.
        message: String,
    },
    /// Raised when request parameters are unusable (sizes, missing IDs).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Wrapper for backend failures, annotated with the failing step.
    #[error("{context}: {source}")]
    Backend {
        /// Step and resource the failure occurred in.
        context: String,
        /// Failure reported by the backend.
        #[source]
        source: ApiError,
    },
    /// Raised when the caller passed inconsistent inputs.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    /// Raised when driver configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl DriverError {
    /// Wraps a backend failure with the step it occurred in.
    #[must_use]
    pub fn backend(context: impl Into<String>, source: ApiError) -> Self {
        Self::Backend {
            context: context.into(),
            source,
        }
    }

    /// Builds a [`DriverError::InProgress`] error.
    #[must_use]
    pub fn in_progress(
        operation: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InProgress {
            operation: operation.into(),
            name: name.into(),
            message: message.into(),
        }
    }

    /// Classifies the error for the calling reconciliation loop.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::AlreadyExists { .. } => ErrorClass::Converged,
            Self::VolumeCreating { .. } | Self::InProgress { .. } => ErrorClass::Retryable,
            Self::InvalidName(_)
            | Self::NotFound { .. }
            | Self::InvalidRequest(_)
            | Self::Backend { .. }
            | Self::InvariantViolation(_)
            | Self::Config(_) => ErrorClass::Permanent,
        }
    }

    /// Returns `true` when the caller should invoke the operation again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Retryable)
    }

    /// Returns `true` when the error reports an already converged state.
    #[must_use]
    pub const fn is_converged(&self) -> bool {
        matches!(self.class(), ErrorClass::Converged)
    }

    /// Returns `true` for [`DriverError::VolumeCreating`].
    #[must_use]
    pub const fn is_volume_creating(&self) -> bool {
        matches!(self, Self::VolumeCreating { .. })
    }
}
