//! Backend API abstraction for subvolume provisioning.
//!
//! The driver core never talks to the cloud directly. Everything it needs
//! from the file-storage service is expressed by [`SubvolumeApi`]: flat
//! create/delete/resize primitives, lookups, and a bounded wait for a
//! provisioning state. Long-running calls hand back a [`PollerResponse`]
//! which can be stored and resumed by a later invocation.

mod error;
pub mod resource_id;
mod state;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

pub use error::{ApiError, WaitFailure};
pub use state::ProvisioningState;

/// Future returned by backend operations.
pub type BackendFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// A subvolume as reported by the backend.
///
/// Volumes, clones, and snapshots are all subvolumes; they differ only in
/// naming and in whether [`Subvolume::parent_path`] is set.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Subvolume {
    /// Fully qualified resource identifier.
    pub id: String,
    /// Resource group that owns the account.
    pub resource_group: String,
    /// NetApp account holding the capacity pool.
    pub netapp_account: String,
    /// Capacity pool holding the parent volume.
    pub capacity_pool: String,
    /// Parent volume name (short form).
    pub volume: String,
    /// Creation token, unique within the parent volume.
    pub name: String,
    /// Provisioned size in bytes. May be zero when metadata was not fetched.
    pub size_bytes: u64,
    /// Last provisioning state observed for the subvolume.
    pub provisioning_state: ProvisioningState,
    /// Creation token of the subvolume this one was cloned from, if any.
    pub parent_path: Option<String>,
}

impl Subvolume {
    /// Builds a subvolume reference from a resource identifier without
    /// contacting the backend.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidResourceId`] when `id` is malformed.
    pub fn from_id(id: &str) -> Result<Self, ApiError> {
        let parts = resource_id::parse_subvolume_id(id)?;
        Ok(Self {
            id: id.to_owned(),
            resource_group: parts.resource_group,
            netapp_account: parts.netapp_account,
            capacity_pool: parts.capacity_pool,
            volume: parts.volume,
            name: parts.subvolume,
            ..Self::default()
        })
    }

    /// Returns the full name of the parent volume this subvolume lives in.
    #[must_use]
    pub fn parent_volume_full_name(&self) -> String {
        resource_id::volume_full_name(
            &self.resource_group,
            &self.netapp_account,
            &self.capacity_pool,
            &self.volume,
        )
    }
}

/// Parameters for a primitive subvolume create.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateSubvolumeRequest {
    /// Creation token for the new subvolume.
    pub creation_token: String,
    /// Full name of the parent volume that will hold the subvolume.
    pub volume: String,
    /// Requested size in bytes; zero lets the backend decide (clones).
    pub size_bytes: u64,
    /// Creation token of the source subvolume. Set only for clones and
    /// snapshots.
    pub parent: Option<String>,
}

/// Handle to an asynchronous backend operation.
pub trait PollerResponse: Send + Sync {
    /// Resolves the final outcome of the operation.
    fn result(&self) -> BackendFuture<'_, (), ApiError>;
}

/// Shared poller handle; cached across invocations.
pub type Poller = Arc<dyn PollerResponse>;

impl fmt::Debug for dyn PollerResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PollerResponse")
    }
}

/// Operations the driver core requires from the file-storage service.
pub trait SubvolumeApi: Send + Sync {
    /// Starts creating a subvolume and returns it with the operation handle.
    fn create_subvolume<'a>(
        &'a self,
        request: &'a CreateSubvolumeRequest,
    ) -> BackendFuture<'a, (Subvolume, Poller), ApiError>;

    /// Starts deleting a subvolume.
    ///
    /// Returns [`ApiError::NotFound`] when the subvolume is already gone.
    fn delete_subvolume<'a>(&'a self, subvolume: &'a Subvolume)
    -> BackendFuture<'a, Poller, ApiError>;

    /// Changes the quota of a subvolume.
    fn resize_subvolume<'a>(
        &'a self,
        subvolume: &'a Subvolume,
        new_size_bytes: u64,
    ) -> BackendFuture<'a, (), ApiError>;

    /// Fetches a subvolume by resource identifier.
    fn subvolume_by_id<'a>(
        &'a self,
        id: &'a str,
        with_metadata: bool,
    ) -> BackendFuture<'a, Subvolume, ApiError>;

    /// Fetches a subvolume by creation token from any of the candidate
    /// parent volumes.
    fn subvolume_by_token<'a>(
        &'a self,
        token: &'a str,
        parent_volumes: &'a [String],
        with_metadata: bool,
    ) -> BackendFuture<'a, Subvolume, ApiError>;

    /// Looks up a subvolume by resource identifier.
    fn subvolume_exists_by_id<'a>(
        &'a self,
        id: &'a str,
    ) -> BackendFuture<'a, Option<Subvolume>, ApiError>;

    /// Looks up a subvolume by creation token across candidate parent
    /// volumes.
    fn subvolume_exists_by_token<'a>(
        &'a self,
        token: &'a str,
        parent_volumes: &'a [String],
    ) -> BackendFuture<'a, Option<Subvolume>, ApiError>;

    /// Lists every subvolume held by the given parent volumes.
    fn subvolumes<'a>(
        &'a self,
        parent_volumes: &'a [String],
    ) -> BackendFuture<'a, Vec<Subvolume>, ApiError>;

    /// Polls until the subvolume reaches `target`, enters one of
    /// `error_states`, or `timeout` elapses.
    ///
    /// A subvolume that can no longer be found counts as
    /// [`ProvisioningState::Deleted`].
    fn wait_for_state<'a>(
        &'a self,
        subvolume: &'a Subvolume,
        target: ProvisioningState,
        error_states: &'a [ProvisioningState],
        timeout: Duration,
    ) -> BackendFuture<'a, ProvisioningState, WaitFailure>;
}

impl<T: SubvolumeApi + ?Sized> SubvolumeApi for Arc<T> {
    fn create_subvolume<'a>(
        &'a self,
        request: &'a CreateSubvolumeRequest,
    ) -> BackendFuture<'a, (Subvolume, Poller), ApiError> {
        (**self).create_subvolume(request)
    }

    fn delete_subvolume<'a>(
        &'a self,
        subvolume: &'a Subvolume,
    ) -> BackendFuture<'a, Poller, ApiError> {
        (**self).delete_subvolume(subvolume)
    }

    fn resize_subvolume<'a>(
        &'a self,
        subvolume: &'a Subvolume,
        new_size_bytes: u64,
    ) -> BackendFuture<'a, (), ApiError> {
        (**self).resize_subvolume(subvolume, new_size_bytes)
    }

    fn subvolume_by_id<'a>(
        &'a self,
        id: &'a str,
        with_metadata: bool,
    ) -> BackendFuture<'a, Subvolume, ApiError> {
        (**self).subvolume_by_id(id, with_metadata)
    }

    fn subvolume_by_token<'a>(
        &'a self,
        token: &'a str,
        parent_volumes: &'a [String],
        with_metadata: bool,
    ) -> BackendFuture<'a, Subvolume, ApiError> {
        (**self).subvolume_by_token(token, parent_volumes, with_metadata)
    }

    fn subvolume_exists_by_id<'a>(
        &'a self,
        id: &'a str,
    ) -> BackendFuture<'a, Option<Subvolume>, ApiError> {
        (**self).subvolume_exists_by_id(id)
    }

    fn subvolume_exists_by_token<'a>(
        &'a self,
        token: &'a str,
        parent_volumes: &'a [String],
    ) -> BackendFuture<'a, Option<Subvolume>, ApiError> {
        (**self).subvolume_exists_by_token(token, parent_volumes)
    }

    fn subvolumes<'a>(
        &'a self,
        parent_volumes: &'a [String],
    ) -> BackendFuture<'a, Vec<Subvolume>, ApiError> {
        (**self).subvolumes(parent_volumes)
    }

    fn wait_for_state<'a>(
        &'a self,
        subvolume: &'a Subvolume,
        target: ProvisioningState,
        error_states: &'a [ProvisioningState],
        timeout: Duration,
    ) -> BackendFuture<'a, ProvisioningState, WaitFailure> {
        (**self).wait_for_state(subvolume, target, error_states, timeout)
    }
}
