//! Lifecycle driver for volumes backed by cloud file-storage subvolumes.
//!
//! The backend only knows flat subvolumes with create, delete, and resize.
//! This crate builds volumes, clones, snapshots, and in-place restores on
//! top of those primitives, and keeps every operation safe to re-invoke
//! after a timeout, a partial failure, or a crash.
//!
//! The backend itself is a collaborator reached through
//! [`api::SubvolumeApi`]; pool placement comes from a
//! [`pool::PoolRegistry`].

pub mod api;
pub mod cache;
pub mod config;
pub mod driver;
pub mod naming;
pub mod pool;
pub mod test_support;

pub use api::{ApiError, ProvisioningState, Subvolume, SubvolumeApi};
pub use cache::{Operation, PendingDeletions, PollerCache, PollerKey};
pub use config::{ConfigError, DriverConfig, DriverContext};
pub use driver::{
    DriverError, DriverState, ErrorClass, Snapshot, SnapshotConfig, SubvolumeDriver,
    VolumeConfig, VolumeExternal,
};
pub use naming::{NameCodec, NameError};
pub use pool::{PoolRegistry, StaticPoolRegistry, StoragePool};
