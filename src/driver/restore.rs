//! In-place restore built from clone, delete, and recreate.
//!
//! The backend cannot rewrite a subvolume, so a restore:
//!
//! 1. clones the live volume to `<token>-og`,
//! 2. deletes the live volume,
//! 3. recreates it under the same token with the snapshot as parent,
//! 4. deletes the `-og` clone.
//!
//! Each call may stop after any step. The next call picks up from the
//! restore handle in the poller cache or from the pending-deletion ledger.

use tracing::{debug, error, info, instrument, warn};

use crate::api::{CreateSubvolumeRequest, Poller, ProvisioningState, Subvolume, SubvolumeApi};
use crate::api::resource_id::SubvolumeIdParts;
use crate::cache::{Obligation, Operation, PollerKey};
use crate::pool::PoolRegistry;

use super::snapshot::parse_volume_id;
use super::wait::Report;
use super::{DriverError, SnapshotConfig, SubvolumeDriver, TEMP_CLONE_SUFFIX, VolumeConfig};

const RESTORE: &str = "restore";

/// Identities involved in one restore.
struct RestorePlan {
    parts: SubvolumeIdParts,
    volume_id: String,
    volume_name: String,
    temp_id: String,
    temp_name: String,
    snapshot_id: String,
    snapshot_name: String,
}

impl RestorePlan {
    fn subvolume(&self, id: &str, name: &str) -> Subvolume {
        Subvolume {
            id: id.to_owned(),
            resource_group: self.parts.resource_group.clone(),
            netapp_account: self.parts.netapp_account.clone(),
            capacity_pool: self.parts.capacity_pool.clone(),
            volume: self.parts.volume.clone(),
            name: name.to_owned(),
            ..Subvolume::default()
        }
    }

    fn volume(&self) -> Subvolume {
        self.subvolume(&self.volume_id, &self.volume_name)
    }

    fn temp_clone(&self) -> Subvolume {
        self.subvolume(&self.temp_id, &self.temp_name)
    }

    fn in_progress(&self, message: impl Into<String>) -> DriverError {
        DriverError::in_progress(RESTORE, self.volume_name.as_str(), message)
    }
}

impl<A, P> SubvolumeDriver<A, P>
where
    A: SubvolumeApi,
    P: PoolRegistry,
{
    /// Restores `volume` in place from `snapshot`.
    ///
    /// The volume keeps its creation token but is a new subvolume
    /// afterwards; `volume.internal_id` is refreshed from the backend.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InvariantViolation`] when the snapshot does not
    /// belong to the volume and [`DriverError::InProgress`] whenever a step
    /// could not complete yet; the caller should invoke the restore again.
    #[instrument(
        skip(self, snapshot, volume),
        fields(snapshot = %snapshot.internal_name, volume = %volume.internal_name)
    )]
    pub async fn restore_snapshot(
        &self,
        snapshot: &SnapshotConfig,
        volume: &mut VolumeConfig,
    ) -> Result<(), DriverError> {
        if volume.internal_name != snapshot.volume_internal_name {
            return Err(DriverError::InvariantViolation(format!(
                "snapshot/volume mismatch: snapshot {} belongs to {}, not {}",
                snapshot.internal_name, snapshot.volume_internal_name, volume.internal_name
            )));
        }

        let parts = parse_volume_id(volume)?;
        let temp_name = format!("{}{TEMP_CLONE_SUFFIX}", volume.internal_name);
        let plan = RestorePlan {
            volume_id: parts.sibling(&volume.internal_name),
            volume_name: volume.internal_name.clone(),
            temp_id: parts.sibling(&temp_name),
            temp_name,
            snapshot_id: self.snapshot_id(&parts, &snapshot.internal_name),
            snapshot_name: snapshot.internal_name.clone(),
            parts,
        };

        let Some(_guard) = self.state.restores.try_begin(&plan.volume_id) else {
            return Err(plan.in_progress("another restore of this volume is running"));
        };

        if self.settle_pending_deletion(&plan).await? {
            info!(volume = %plan.volume_name, "finished cleanup of an earlier restore");
            return Ok(());
        }

        let restore_key = PollerKey::new(plan.volume_id.as_str(), Operation::Restore);
        let (poller, recreated_id) = match self.state.pollers.get(&restore_key) {
            Some(poller) => {
                debug!(volume = %plan.volume_name, "resuming restore already in flight");
                (poller, None)
            }
            None => {
                let (poller, id) = self.swap_in_snapshot(&plan).await?;
                (poller, Some(id))
            }
        };

        self.wait_for_create(&plan.volume(), Some(poller), Operation::Restore, Report::Immediately)
            .await
            .map_err(|err| {
                if err.is_volume_creating() {
                    plan.in_progress(err.to_string())
                } else {
                    err
                }
            })?;
        debug!(
            volume = %plan.volume_name,
            snapshot = %plan.snapshot_name,
            "subvolume restored from snapshot"
        );

        if let Some(id) = recreated_id {
            volume.internal_id = Some(id);
        }

        self.remove_temp_clone(&plan).await?;
        info!(volume = %plan.volume_name, snapshot = %plan.snapshot_name, "snapshot restored");
        Ok(())
    }

    /// Discharges a deletion recorded in the ledger for the temporary clone.
    ///
    /// Returns `true` only when the entry belonged to this snapshot, which
    /// means the restore itself had already completed.
    async fn settle_pending_deletion(&self, plan: &RestorePlan) -> Result<bool, DriverError> {
        let ledger = &self.state.pending_deletions;
        let Some(obligation) = ledger.obligation(&plan.temp_id, &plan.snapshot_id) else {
            return Ok(false);
        };

        if let Err(err) = self.delete_subvolume(&plan.temp_clone()).await {
            error!(subvolume = %plan.temp_name, error = %err, "failed to delete subvolume");
            return Err(plan.in_progress(err.to_string()));
        }
        ledger.remove(&plan.temp_id);
        debug!(subvolume = %plan.temp_name, "subvolume deleted");

        match obligation {
            Obligation::InContext => Ok(true),
            Obligation::OtherContext(recorded) => {
                error!(
                    subvolume = %plan.temp_name,
                    recorded_snapshot = %recorded,
                    current_snapshot = %plan.snapshot_id,
                    "subvolume deleted outside the snapshot context that required it"
                );
                Ok(false)
            }
        }
    }

    /// Clones the live volume, deletes it, and starts recreating it from
    /// the snapshot. Returns the recreate handle and the new subvolume ID.
    async fn swap_in_snapshot(&self, plan: &RestorePlan) -> Result<(Poller, String), DriverError> {
        let parent_volume = plan.parts.volume_full_name();

        let extant = self
            .api
            .subvolume_exists_by_id(&plan.temp_id)
            .await
            .map_err(|err| {
                error!(subvolume = %plan.temp_name, error = %err, "error checking for existing subvolume");
                plan.in_progress(err.to_string())
            })?;

        let extant = match extant {
            Some(stale) if stale.provisioning_state == ProvisioningState::Deleting => {
                debug!(subvolume = %plan.temp_name, "waiting for stale temporary subvolume to go");
                self.wait_for_deleted(&stale)
                    .await
                    .map_err(|err| plan.in_progress(err.to_string()))?;
                None
            }
            Some(stale) if stale.provisioning_state == ProvisioningState::Error => {
                debug!(subvolume = %plan.temp_name, "deleting failed temporary subvolume");
                self.delete_subvolume(&stale)
                    .await
                    .map_err(|err| plan.in_progress(err.to_string()))?;
                None
            }
            other => other,
        };

        let temp_key = PollerKey::new(plan.temp_id.as_str(), Operation::Create);
        let (temp, temp_poller) = if let Some(extant) = extant {
            let poller = self.state.pollers.get(&temp_key);
            (extant, poller)
        } else {
            debug!(
                creation_token = %plan.temp_name,
                parent_volume = %parent_volume,
                parent_path = %plan.volume_name,
                "creating temporary subvolume"
            );
            let request = CreateSubvolumeRequest {
                creation_token: plan.temp_name.clone(),
                volume: parent_volume.clone(),
                size_bytes: 0,
                parent: Some(plan.volume_name.clone()),
            };
            let (temp, started) = self.api.create_subvolume(&request).await.map_err(|err| {
                error!(subvolume = %plan.temp_name, error = %err, "error creating temporary subvolume");
                plan.in_progress(err.to_string())
            })?;
            let poller = self.state.pollers.get_or_insert(temp_key, started);
            (temp, Some(poller))
        };

        self.wait_for_create(&temp, temp_poller, Operation::Create, Report::Immediately)
            .await
            .map_err(|err| {
                warn!(subvolume = %plan.temp_name, error = %err, "temporary subvolume not ready");
                plan.in_progress(err.to_string())
            })?;
        debug!(subvolume = %plan.temp_name, "temporary subvolume created");

        if let Err(err) = self.delete_subvolume(&plan.volume()).await {
            error!(subvolume = %plan.volume_name, error = %err, "failed to delete the original subvolume");
            return Err(plan.in_progress(err.to_string()));
        }

        debug!(
            creation_token = %plan.volume_name,
            parent_volume = %parent_volume,
            parent_path = %plan.snapshot_name,
            "creating subvolume from snapshot"
        );
        let request = CreateSubvolumeRequest {
            creation_token: plan.volume_name.clone(),
            volume: parent_volume,
            size_bytes: 0,
            parent: Some(plan.snapshot_name.clone()),
        };
        let (recreated, started) = self.api.create_subvolume(&request).await.map_err(|err| {
            error!(
                subvolume = %plan.volume_name,
                snapshot = %plan.snapshot_name,
                error = %err,
                "error creating subvolume from snapshot"
            );
            plan.in_progress(err.to_string())
        })?;

        let poller = self.state.pollers.get_or_insert(
            PollerKey::new(plan.volume_id.as_str(), Operation::Restore),
            started,
        );
        Ok((poller, recreated.id))
    }

    /// Deletes the temporary clone, retrying once. A second failure is
    /// recorded in the ledger so a later call can finish the job.
    async fn remove_temp_clone(&self, plan: &RestorePlan) -> Result<(), DriverError> {
        let temp = plan.temp_clone();
        let Err(first) = self.delete_subvolume(&temp).await else {
            return Ok(());
        };
        warn!(subvolume = %plan.temp_name, error = %first, "failed to delete the temporary subvolume; retrying");

        let Err(second) = self.delete_subvolume(&temp).await else {
            return Ok(());
        };
        error!(subvolume = %plan.temp_name, error = %second, "failed to delete the temporary subvolume");
        self.state
            .pending_deletions
            .record(plan.temp_id.as_str(), plan.snapshot_id.as_str());
        Err(plan.in_progress(second.to_string()))
    }
}
