//! Lifecycle operations composed from subvolume primitives.
//!
//! [`SubvolumeDriver`] is the public surface: create, clone, destroy,
//! snapshot, restore, resize, and the read operations. Every operation is
//! written to be re-invoked by a reconciliation loop after a partial
//! failure. Deterministic identifiers come from the [`NameCodec`] and the
//! resource-ID layout; resumability comes from the [`PollerCache`] and the
//! [`PendingDeletions`] ledger held in [`DriverState`].

mod create;
mod error;
mod restore;
mod snapshot;
mod types;
mod volume;
mod wait;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::api::SubvolumeApi;
use crate::cache::{InFlight, PendingDeletions, PollerCache};
use crate::config::DriverConfig;
use crate::naming::{NameCodec, SUBVOLUME_NAME_SEPARATOR};
use crate::pool::PoolRegistry;

pub use error::{DriverError, ErrorClass};
pub use types::{
    AccessInfo, Snapshot, SnapshotConfig, SnapshotState, VolumeConfig, VolumeExternal,
};

/// Suffix appended to a volume's creation token to name its restore clone.
pub const TEMP_CLONE_SUFFIX: &str = "-og";

/// Coordination state shared between driver invocations.
///
/// Cloning the state shares the underlying maps, so several driver
/// instances (or a test and its driver) can observe the same bookkeeping.
#[derive(Clone, Debug, Default)]
pub struct DriverState {
    /// Operation handles still being watched.
    pub pollers: Arc<PollerCache>,
    /// Temporary subvolumes whose deletion is still owed.
    pub pending_deletions: Arc<PendingDeletions>,
    /// Subvolumes with a create running in this process.
    pub creates: InFlight,
    /// Volumes with a restore running in this process.
    pub restores: InFlight,
}

/// Subvolume lifecycle driver.
#[derive(Debug)]
pub struct SubvolumeDriver<A, P> {
    api: A,
    pools: P,
    config: DriverConfig,
    codec: NameCodec,
    state: DriverState,
    create_timeout: Duration,
    default_timeout: Duration,
}

impl<A, P> SubvolumeDriver<A, P>
where
    A: SubvolumeApi,
    P: PoolRegistry,
{
    /// Builds a driver with fresh coordination state.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Config`] when the configuration fails
    /// validation and [`DriverError::InvalidName`] when the storage prefix
    /// cannot be used in names.
    pub fn new(config: DriverConfig, api: A, pools: P) -> Result<Self, DriverError> {
        config.validate()?;
        let codec = NameCodec::new(&config.storage_prefix)?;
        let create_timeout = config.volume_create_timeout();
        let default_timeout = config.default_timeout();
        debug!(
            prefix = codec.storage_prefix(),
            create_timeout_secs = create_timeout.as_secs(),
            default_timeout_secs = default_timeout.as_secs(),
            "initialised subvolume driver"
        );
        Ok(Self {
            api,
            pools,
            config,
            codec,
            state: DriverState::default(),
            create_timeout,
            default_timeout,
        })
    }

    /// Replaces the coordination state, typically with one shared by other
    /// driver instances.
    #[must_use]
    pub fn with_state(mut self, state: DriverState) -> Self {
        self.state = state;
        self
    }

    /// Returns the coordination state.
    #[must_use]
    pub const fn state(&self) -> &DriverState {
        &self.state
    }

    /// Returns the active configuration.
    #[must_use]
    pub const fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Returns the naming codec built from the storage prefix.
    #[must_use]
    pub const fn codec(&self) -> &NameCodec {
        &self.codec
    }

    /// Returns the backend API collaborator.
    #[must_use]
    pub const fn api(&self) -> &A {
        &self.api
    }

    /// Derives the creation token for a new volume from its external name.
    #[must_use]
    pub fn internal_volume_name(&self, name: &str) -> String {
        let base = format!("{}-{name}", self.codec.storage_prefix()).replace(['_', '.'], "-");
        let internal = format!("{base}{SUBVOLUME_NAME_SEPARATOR}0");
        debug!(volume_internal = %internal, "derived internal volume name");
        internal
    }

    /// Accepts a rename request without touching the backend.
    ///
    /// Creation tokens cannot change, so imported subvolumes keep their
    /// original token as internal name and there is nothing to rename.
    ///
    /// # Errors
    ///
    /// Never fails.
    pub fn rename(&self, name: &str, new_name: &str) -> Result<(), DriverError> {
        debug!(name, new_name, "ignoring rename; creation tokens are immutable");
        Ok(())
    }

    fn parent_volumes(&self) -> Vec<String> {
        self.pools.parent_volumes()
    }
}
