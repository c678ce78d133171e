//! Destroy, resize, and read operations on volumes.

use tracing::{debug, info, instrument, warn};

use crate::api::{ProvisioningState, Subvolume, SubvolumeApi};
use crate::naming::SUBVOLUME_NAME_SEPARATOR;
use crate::pool::PoolRegistry;

use super::{DriverError, SubvolumeDriver, VolumeConfig, VolumeExternal};

impl<A, P> SubvolumeDriver<A, P>
where
    A: SubvolumeApi,
    P: PoolRegistry,
{
    /// Deletes the subvolume behind `volume`. Destroying a missing volume
    /// succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Backend`] when the delete or its wait fails.
    #[instrument(skip(self, volume), fields(name = %volume.internal_name))]
    pub async fn destroy(&self, volume: &VolumeConfig) -> Result<(), DriverError> {
        let subvolume = if let Some(id) = volume.internal_id() {
            let mut subvolume = Subvolume::from_id(id).map_err(|err| {
                DriverError::backend(
                    format!("parsing internal ID of volume {}", volume.internal_name),
                    err,
                )
            })?;
            subvolume.name.clone_from(&volume.internal_name);
            subvolume
        } else {
            // Creation may have failed before the ID was recorded.
            let parents = self.parent_volumes();
            let extant = self
                .api
                .subvolume_exists_by_token(&volume.internal_name, &parents)
                .await
                .map_err(|err| {
                    DriverError::backend(
                        format!("checking for existing subvolume {}", volume.internal_name),
                        err,
                    )
                })?;
            match extant {
                None => {
                    warn!(subvolume = %volume.internal_name, "subvolume already deleted");
                    return Ok(());
                }
                Some(extant) if extant.provisioning_state == ProvisioningState::Deleting => {
                    return self.wait_for_deleted(&extant).await;
                }
                Some(extant) => extant,
            }
        };

        self.delete_subvolume(&subvolume).await?;
        info!(subvolume = %volume.internal_name, "subvolume destroyed");
        Ok(())
    }

    /// Looks up a volume by creation token.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] when no such subvolume exists.
    #[instrument(skip(self))]
    pub async fn get(&self, name: &str) -> Result<(), DriverError> {
        self.subvolume_by_token(name, false).await.map(|_| ())
    }

    /// Grows the volume's quota to `size_bytes`.
    ///
    /// On return `volume.size_bytes` reflects the size now provisioned.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] when the subvolume is missing and
    /// [`DriverError::InvalidRequest`] when it is not available, when the
    /// request would shrink it, or when the size exceeds the configured
    /// limit.
    #[instrument(skip(self, volume), fields(name = %volume.internal_name))]
    pub async fn resize(
        &self,
        volume: &mut VolumeConfig,
        size_bytes: u64,
    ) -> Result<(), DriverError> {
        let subvolume = self.lookup(volume, true).await?;
        if subvolume.provisioning_state != ProvisioningState::Available {
            return Err(DriverError::InvalidRequest(format!(
                "subvolume {} state is {}, not available",
                volume.internal_name, subvolume.provisioning_state
            )));
        }

        volume.size_bytes = subvolume.size_bytes;
        if size_bytes == subvolume.size_bytes {
            debug!(size_bytes, "subvolume already has the requested size");
            return Ok(());
        }
        if size_bytes < subvolume.size_bytes {
            return Err(DriverError::InvalidRequest(format!(
                "requested size {size_bytes} is less than existing subvolume size {}",
                subvolume.size_bytes
            )));
        }
        self.check_size_limit(size_bytes)?;

        self.api
            .resize_subvolume(&subvolume, size_bytes)
            .await
            .map_err(|err| {
                DriverError::backend(format!("resizing subvolume {}", volume.internal_name), err)
            })?;
        volume.size_bytes = size_bytes;
        info!(size_bytes, "subvolume resized");
        Ok(())
    }

    /// Describes a single managed volume by creation token.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] when no such subvolume exists.
    pub async fn volume_external(&self, name: &str) -> Result<VolumeExternal, DriverError> {
        let subvolume = self.subvolume_by_token(name, true).await?;
        Ok(self.to_external(subvolume))
    }

    /// Lists every managed volume across the registered parent volumes.
    ///
    /// Subvolumes being deleted or in error, subvolumes without the storage
    /// prefix, and snapshot subvolumes are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Backend`] when listing fails.
    #[instrument(skip(self))]
    pub async fn list_volumes(&self) -> Result<Vec<VolumeExternal>, DriverError> {
        let parents = self.parent_volumes();
        let subvolumes = self
            .api
            .subvolumes(&parents)
            .await
            .map_err(|err| DriverError::backend("listing subvolumes", err))?;

        Ok(subvolumes
            .into_iter()
            .filter(|subvolume| {
                !matches!(
                    subvolume.provisioning_state,
                    ProvisioningState::Deleting
                        | ProvisioningState::Deleted
                        | ProvisioningState::Error
                )
            })
            .filter(|subvolume| subvolume.name.starts_with(self.codec.storage_prefix()))
            .filter(|subvolume| {
                let snapshot = self.codec.is_snapshot(&subvolume.name);
                if snapshot {
                    debug!(path = %subvolume.name, "skipping subvolume snapshot");
                }
                !snapshot
            })
            .map(|subvolume| self.to_external(subvolume))
            .collect())
    }

    fn to_external(&self, subvolume: Subvolume) -> VolumeExternal {
        let prefix = format!("{}-", self.codec.storage_prefix());
        let unprefixed = subvolume
            .name
            .strip_prefix(prefix.as_str())
            .unwrap_or(&subvolume.name);
        let name = unprefixed
            .split(SUBVOLUME_NAME_SEPARATOR)
            .next()
            .unwrap_or(unprefixed)
            .to_owned();

        VolumeExternal {
            config: VolumeConfig {
                name,
                internal_name: subvolume.name,
                internal_id: Some(subvolume.id),
                size_bytes: subvolume.size_bytes,
                ..VolumeConfig::default()
            },
            pool: subvolume.volume,
        }
    }
}
