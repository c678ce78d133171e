//! Snapshot operations. A snapshot is a subvolume whose parent is the
//! source volume and whose creation token is a composite snapshot name.

use std::time::SystemTime;

use tracing::{debug, info, instrument};

use crate::api::{
    CreateSubvolumeRequest, ProvisioningState, Subvolume, SubvolumeApi, resource_id,
    resource_id::SubvolumeIdParts,
};
use crate::cache::{Operation, PollerKey};
use crate::naming::{NameCodec, validate_creation_token, validate_snapshot_name};
use crate::pool::PoolRegistry;

use super::wait::Report;
use super::{DriverError, Snapshot, SnapshotConfig, SubvolumeDriver, VolumeConfig};

impl<A, P> SubvolumeDriver<A, P>
where
    A: SubvolumeApi,
    P: PoolRegistry,
{
    /// Creates a snapshot of `volume`.
    ///
    /// An existing snapshot subvolume with the same composite name is
    /// waited on instead of being created again. On success
    /// `snapshot.internal_name` holds the composite name.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InvalidName`] for bad snapshot names,
    /// [`DriverError::InvalidRequest`] when the volume has no backend
    /// identifier, [`DriverError::VolumeCreating`] while the snapshot is
    /// still being provisioned, and [`DriverError::Backend`] for backend
    /// failures.
    #[instrument(
        skip(self, snapshot, volume),
        fields(snapshot = %snapshot.name, volume = %snapshot.volume_internal_name)
    )]
    pub async fn create_snapshot(
        &self,
        snapshot: &mut SnapshotConfig,
        volume: &VolumeConfig,
    ) -> Result<Snapshot, DriverError> {
        validate_snapshot_name(&snapshot.name)?;
        let creation_token = self
            .codec
            .snapshot_internal_name(&snapshot.volume_name, &snapshot.name);
        validate_creation_token(&creation_token)?;

        let parts = parse_volume_id(volume)?;
        let snapshot_id = self.snapshot_id(&parts, &creation_token);

        let extant = self
            .api
            .subvolume_exists_by_id(&snapshot_id)
            .await
            .map_err(|err| {
                DriverError::backend(
                    format!("checking for existing snapshot {creation_token}"),
                    err,
                )
            })?;

        let (subvolume, poller) = if let Some(extant) = extant {
            debug!(snapshot = %creation_token, state = %extant.provisioning_state, "snapshot subvolume exists");
            let poller = self
                .state
                .pollers
                .get(&PollerKey::new(extant.id.as_str(), Operation::Create));
            (extant, poller)
        } else {
            let parent_volume = parts.volume_full_name();
            debug!(
                creation_token = %creation_token,
                parent_volume = %parent_volume,
                parent_path = %parts.subvolume,
                "creating subvolume snapshot"
            );
            let request = CreateSubvolumeRequest {
                creation_token: creation_token.clone(),
                volume: parent_volume,
                size_bytes: 0,
                parent: Some(parts.subvolume.clone()),
            };
            let (subvolume, started) =
                self.api.create_subvolume(&request).await.map_err(|err| {
                    DriverError::backend(format!("creating snapshot {creation_token}"), err)
                })?;
            let poller = self.state.pollers.get_or_insert(
                PollerKey::new(subvolume.id.as_str(), Operation::Create),
                started,
            );
            (subvolume, Some(poller))
        };

        // Reading the backend's creation timestamp needs a metadata fetch.
        let created = SystemTime::now();

        self.wait_for_create(&subvolume, poller, Operation::Create, Report::Immediately)
            .await?;

        snapshot.internal_name = creation_token;
        info!(
            snapshot = %snapshot.internal_name,
            volume = %snapshot.volume_internal_name,
            "snapshot created"
        );
        Ok(Snapshot::online(snapshot.clone(), Some(created)))
    }

    /// Deletes a snapshot subvolume. Deleting a missing snapshot succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InvalidRequest`] when the volume has no
    /// backend identifier and [`DriverError::Backend`] when the delete or
    /// its wait fails.
    #[instrument(
        skip(self, snapshot, volume),
        fields(snapshot = %snapshot.name, volume = %snapshot.volume_internal_name)
    )]
    pub async fn delete_snapshot(
        &self,
        snapshot: &SnapshotConfig,
        volume: &VolumeConfig,
    ) -> Result<(), DriverError> {
        let parts = parse_volume_id(volume)?;
        let subvolume = Subvolume {
            id: parts.sibling(&snapshot.internal_name),
            resource_group: parts.resource_group,
            netapp_account: parts.netapp_account,
            capacity_pool: parts.capacity_pool,
            volume: parts.volume,
            name: snapshot.internal_name.clone(),
            ..Subvolume::default()
        };
        self.delete_subvolume(&subvolume).await
    }

    /// Looks up a snapshot of `volume`; `None` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] when the source volume is missing,
    /// [`DriverError::VolumeCreating`] while the snapshot is still being
    /// provisioned, and [`DriverError::InvalidRequest`] when it is in any
    /// other state but available.
    #[instrument(
        skip(self, snapshot, volume),
        fields(snapshot = %snapshot.internal_name, volume = %snapshot.volume_internal_name)
    )]
    pub async fn get_snapshot(
        &self,
        snapshot: &SnapshotConfig,
        volume: &VolumeConfig,
    ) -> Result<Option<Snapshot>, DriverError> {
        let volume_id = volume.internal_id().ok_or_else(|| missing_id(volume))?;
        let source = self
            .api
            .subvolume_exists_by_id(volume_id)
            .await
            .map_err(|err| {
                DriverError::backend(format!("could not find source subvolume {volume_id}"), err)
            })?
            .ok_or_else(|| DriverError::NotFound {
                name: volume.name.clone(),
            })?;

        let snapshot_id = resource_id::subvolume_id(
            &self.config.subscription_id,
            &source.resource_group,
            &source.netapp_account,
            &source.capacity_pool,
            &source.volume,
            &snapshot.internal_name,
        );
        let Some(extant) = self
            .api
            .subvolume_exists_by_id(&snapshot_id)
            .await
            .map_err(|err| {
                DriverError::backend(format!("checking for existing snapshot {snapshot_id}"), err)
            })?
        else {
            return Ok(None);
        };

        match &extant.provisioning_state {
            ProvisioningState::Available => {}
            state if state.is_creating() => {
                return Err(DriverError::VolumeCreating {
                    name: snapshot.internal_name.clone(),
                    message: format!("snapshot state is {state}"),
                });
            }
            state => {
                return Err(DriverError::InvalidRequest(format!(
                    "snapshot {} state is {state}",
                    snapshot.internal_name
                )));
            }
        }

        debug!(snapshot = %snapshot.internal_name, "found snapshot");
        Ok(Some(Snapshot::online(snapshot.clone(), None)))
    }

    /// Lists the snapshots of `volume` by scanning its parent volume for
    /// composite names carrying the volume's suffix.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] when the volume is missing and
    /// [`DriverError::Backend`] when listing fails.
    #[instrument(skip(self, volume), fields(volume = %volume.internal_name))]
    pub async fn get_snapshots(&self, volume: &VolumeConfig) -> Result<Vec<Snapshot>, DriverError> {
        let source = self.lookup(volume, false).await?;
        let parent_volume = source.parent_volume_full_name();
        let subvolumes = self
            .api
            .subvolumes(std::slice::from_ref(&parent_volume))
            .await
            .map_err(|err| {
                DriverError::backend(format!("listing subvolumes of {parent_volume}"), err)
            })?;

        let suffix = NameCodec::snapshot_suffix(&volume.name);
        let snapshots = subvolumes
            .into_iter()
            .filter(|subvolume| subvolume.name.starts_with(self.codec.storage_prefix()))
            .filter_map(|subvolume| {
                let parts = self.codec.decompose(&subvolume.name).ok()?;
                (parts.suffix == suffix).then(|| {
                    Snapshot::online(
                        SnapshotConfig {
                            name: parts.snapshot_name,
                            internal_name: subvolume.name,
                            volume_name: volume.name.clone(),
                            volume_internal_name: volume.internal_name.clone(),
                        },
                        None,
                    )
                })
            })
            .collect();
        Ok(snapshots)
    }

    pub(crate) fn snapshot_id(&self, parts: &SubvolumeIdParts, creation_token: &str) -> String {
        resource_id::subvolume_id(
            &self.config.subscription_id,
            &parts.resource_group,
            &parts.netapp_account,
            &parts.capacity_pool,
            &parts.volume,
            creation_token,
        )
    }
}

pub(crate) fn parse_volume_id(volume: &VolumeConfig) -> Result<SubvolumeIdParts, DriverError> {
    let id = volume.internal_id().ok_or_else(|| missing_id(volume))?;
    resource_id::parse_subvolume_id(id).map_err(|err| {
        DriverError::backend(
            format!("parsing internal ID of volume {}", volume.internal_name),
            err,
        )
    })
}

fn missing_id(volume: &VolumeConfig) -> DriverError {
    DriverError::InvalidRequest(format!(
        "volume {} has no internal ID",
        volume.internal_name
    ))
}
