//! Error types for the Backend API collaborator.

use thiserror::Error;

use super::ProvisioningState;

/// Errors raised by [`super::SubvolumeApi`] implementations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ApiError {
    /// Raised when the addressed subvolume does not exist.
    #[error("subvolume {name} not found")]
    NotFound {
        /// Creation token or identifier used for the lookup.
        name: String,
    },
    /// Raised when a create collides with a subvolume that holds the same
    /// creation token.
    #[error("subvolume {name} already exists")]
    AlreadyExists {
        /// Creation token requested.
        name: String,
    },
    /// Raised when a bounded wait expires before the target state.
    #[error("timeout waiting for subvolume {name} to reach {target}; last state {state}")]
    Timeout {
        /// Creation token of the subvolume being watched.
        name: String,
        /// State being waited for.
        target: ProvisioningState,
        /// Last state observed before giving up.
        state: ProvisioningState,
    },
    /// Raised when a subvolume enters one of the caller's error states.
    #[error("subvolume {name} entered state {state}")]
    UnexpectedState {
        /// Creation token of the subvolume being watched.
        name: String,
        /// State that ended the wait.
        state: ProvisioningState,
    },
    /// Raised when a resource identifier does not follow the subvolume layout.
    #[error("invalid subvolume resource ID '{0}'")]
    InvalidResourceId(String),
    /// Wrapper for provider level failures.
    #[error("provider error: {message}")]
    Provider {
        /// Message returned by the provider SDK.
        message: String,
    },
}

impl ApiError {
    /// Returns `true` when the error reports a missing resource.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` when a create collided with an existing subvolume.
    #[must_use]
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

/// Outcome of a wait that did not reach its target state.
///
/// The last observed state is carried alongside the error because the
/// driver's recovery policy depends on it.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{error}")]
pub struct WaitFailure {
    /// Last provisioning state observed by the poller.
    pub state: ProvisioningState,
    /// Underlying failure.
    #[source]
    pub error: ApiError,
}

impl WaitFailure {
    /// Pairs a state with the error that ended the wait.
    #[must_use]
    pub const fn new(state: ProvisioningState, error: ApiError) -> Self {
        Self { state, error }
    }
}
