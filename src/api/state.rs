//! Provisioning states reported for subvolumes.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Provisioning state of a subvolume.
///
/// The backend reports states as strings; anything unrecognised is kept in
/// [`ProvisioningState::Unknown`] so it can be logged and escalated.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub enum ProvisioningState {
    /// The create request was accepted but work has not started.
    #[default]
    Accepted,
    /// The subvolume is being created.
    Creating,
    /// The subvolume is ready for use.
    Available,
    /// The subvolume is being deleted.
    Deleting,
    /// The subvolume no longer exists.
    Deleted,
    /// The subvolume failed to provision.
    Error,
    /// The subvolume is being moved between pools.
    Moving,
    /// The subvolume is being reverted.
    Reverting,
    /// Any state the driver does not recognise.
    Unknown(String),
}

impl ProvisioningState {
    /// Returns the wire representation of the state.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Accepted => "Accepted",
            Self::Creating => "Creating",
            Self::Available => "Succeeded",
            Self::Deleting => "Deleting",
            Self::Deleted => "NoSuchState",
            Self::Error => "Failed",
            Self::Moving => "Moving",
            Self::Reverting => "Reverting",
            Self::Unknown(value) => value.as_str(),
        }
    }

    /// Returns `true` while the backend is still bringing the subvolume up.
    #[must_use]
    pub const fn is_creating(&self) -> bool {
        matches!(self, Self::Accepted | Self::Creating)
    }
}

impl FromStr for ProvisioningState {
    type Err = Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "Accepted" => Self::Accepted,
            "Creating" => Self::Creating,
            "Succeeded" | "Available" => Self::Available,
            "Deleting" => Self::Deleting,
            "NoSuchState" | "Deleted" => Self::Deleted,
            "Failed" | "Error" => Self::Error,
            "Moving" => Self::Moving,
            "Reverting" => Self::Reverting,
            other => Self::Unknown(other.to_owned()),
        })
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
