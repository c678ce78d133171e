//! Request and result types exchanged with the calling orchestrator.

use std::time::SystemTime;

/// Where a provisioned subvolume can be reached.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AccessInfo {
    /// Creation token of the subvolume.
    pub subvolume_name: Option<String>,
    /// Full name of the parent volume holding the subvolume.
    pub parent_volume: Option<String>,
}

/// Orchestrator-side description of a volume.
///
/// Operations read the names from it and write back what they learn:
/// the backend identifier, the size actually provisioned, and access info.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VolumeConfig {
    /// External name chosen by the orchestrator.
    pub name: String,
    /// Creation token of the backing subvolume.
    pub internal_name: String,
    /// Backend resource identifier, once known.
    pub internal_id: Option<String>,
    /// Requested or provisioned size in bytes; zero selects the pool default.
    pub size_bytes: u64,
    /// External name of the clone source volume.
    pub clone_source_volume: Option<String>,
    /// Logical name of the clone source snapshot.
    pub clone_source_snapshot: Option<String>,
    /// Creation token of the clone source snapshot.
    pub clone_source_snapshot_internal: Option<String>,
    /// Filled in by [`super::SubvolumeDriver::create_followup`].
    pub access_info: AccessInfo,
}

impl VolumeConfig {
    /// Describes a new volume with the given external and internal names.
    #[must_use]
    pub fn new(name: impl Into<String>, internal_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            internal_name: internal_name.into(),
            ..Self::default()
        }
    }

    /// Sets the requested size.
    #[must_use]
    pub const fn with_size_bytes(mut self, size_bytes: u64) -> Self {
        self.size_bytes = size_bytes;
        self
    }

    /// Marks the volume as a clone of `source`, optionally from one of its
    /// snapshots.
    #[must_use]
    pub fn cloned_from(
        mut self,
        source: impl Into<String>,
        snapshot: Option<(String, String)>,
    ) -> Self {
        self.clone_source_volume = Some(source.into());
        if let Some((name, internal_name)) = snapshot {
            self.clone_source_snapshot = Some(name);
            self.clone_source_snapshot_internal = Some(internal_name);
        }
        self
    }

    /// Returns the backend identifier when one has been recorded.
    #[must_use]
    pub fn internal_id(&self) -> Option<&str> {
        self.internal_id.as_deref().filter(|id| !id.trim().is_empty())
    }
}

/// Orchestrator-side description of a snapshot.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SnapshotConfig {
    /// Logical snapshot name.
    pub name: String,
    /// Creation token of the snapshot subvolume.
    pub internal_name: String,
    /// External name of the source volume.
    pub volume_name: String,
    /// Creation token of the source volume.
    pub volume_internal_name: String,
}

impl SnapshotConfig {
    /// Describes a snapshot of the given volume.
    #[must_use]
    pub fn new(name: impl Into<String>, volume: &VolumeConfig) -> Self {
        Self {
            name: name.into(),
            internal_name: String::new(),
            volume_name: volume.name.clone(),
            volume_internal_name: volume.internal_name.clone(),
        }
    }
}

/// Lifecycle state reported for a snapshot.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SnapshotState {
    /// Usable as a clone or restore source.
    #[default]
    Online,
}

/// A snapshot as returned to the orchestrator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Snapshot {
    /// Configuration with the internal name filled in.
    pub config: SnapshotConfig,
    /// Approximate creation time; `None` when the snapshot was discovered
    /// rather than created by this process.
    pub created: Option<SystemTime>,
    /// Space consumed by the snapshot; not tracked by the backend.
    pub size_bytes: u64,
    /// Snapshot state.
    pub state: SnapshotState,
}

impl Snapshot {
    pub(crate) const fn online(config: SnapshotConfig, created: Option<SystemTime>) -> Self {
        Self {
            config,
            created,
            size_bytes: 0,
            state: SnapshotState::Online,
        }
    }
}

/// A managed volume discovered on the backend.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeExternal {
    /// Reconstructed volume configuration.
    pub config: VolumeConfig,
    /// Parent volume the subvolume lives in.
    pub pool: String,
}
