//! Idempotent creation: Create, CreateClone, Import, and the follow-up
//! check run once creation has been reported.

use tracing::{debug, info, instrument, warn};

use crate::api::{
    ApiError, CreateSubvolumeRequest, ProvisioningState, Subvolume, SubvolumeApi, resource_id,
};
use crate::cache::{InFlightGuard, Operation, PollerKey};
use crate::config::MINIMUM_SUBVOLUME_SIZE_BYTES;
use crate::naming::{validate_creation_token, validate_volume_name};
use crate::pool::{PoolRegistry, StoragePool};

use super::wait::Report;
use super::{DriverError, SubvolumeDriver, VolumeConfig};

impl<A, P> SubvolumeDriver<A, P>
where
    A: SubvolumeApi,
    P: PoolRegistry,
{
    /// Creates the subvolume backing `volume` in `pool`.
    ///
    /// On success `volume` carries the backend identifier and the size
    /// actually requested. Backend failures after the primitive create are
    /// left for [`Self::create_followup`] to report.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::AlreadyExists`] once an existing subvolume
    /// with the same creation token is available, [`DriverError::InvalidName`]
    /// for bad names, [`DriverError::InvalidRequest`] for sizes outside the
    /// permitted range, and [`DriverError::VolumeCreating`] while the backend
    /// is still provisioning or another create of the same subvolume is
    /// running in this process.
    #[instrument(skip(self, volume, pool), fields(creation_token = %volume.internal_name, pool = %pool.name))]
    pub async fn create(
        &self,
        volume: &mut VolumeConfig,
        pool: &StoragePool,
    ) -> Result<(), DriverError> {
        validate_volume_name(&volume.name)?;
        validate_creation_token(&volume.internal_name)?;

        let _claim = self.claim_create(&pool.parent_volume, &volume.internal_name)?;
        if self.adopt_existing(volume).await? {
            return Err(DriverError::AlreadyExists {
                name: volume.internal_name.clone(),
            });
        }

        let size_bytes = self.requested_size(volume.size_bytes, pool)?;
        volume.size_bytes = size_bytes;

        debug!(
            creation_token = %volume.internal_name,
            size_bytes,
            parent_volume = %pool.parent_volume,
            "creating subvolume"
        );
        let request = CreateSubvolumeRequest {
            creation_token: volume.internal_name.clone(),
            volume: pool.parent_volume.clone(),
            size_bytes,
            parent: None,
        };
        self.start_create(volume, &request).await
    }

    /// Creates `volume` as a clone of `source`, or of one of its snapshots
    /// when `volume.clone_source_snapshot_internal` is set.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`Self::create`], plus
    /// [`DriverError::InvalidRequest`] when the source has no backend
    /// identifier and [`DriverError::NotFound`] when the source subvolume
    /// is missing.
    #[instrument(
        skip(self, source, volume),
        fields(creation_token = %volume.internal_name, source = %source.name)
    )]
    pub async fn create_clone(
        &self,
        source: &VolumeConfig,
        volume: &mut VolumeConfig,
    ) -> Result<(), DriverError> {
        validate_volume_name(&volume.name)?;
        validate_creation_token(&volume.internal_name)?;

        let volume_id = source.internal_id().ok_or_else(|| {
            DriverError::InvalidRequest(format!(
                "clone source volume {} has no internal ID",
                source.name
            ))
        })?;
        let source_id = match volume.clone_source_snapshot_internal.as_deref() {
            Some(snapshot) => resource_id::parse_subvolume_id(volume_id)
                .map_err(|err| {
                    DriverError::backend(format!("parsing source volume ID {volume_id}"), err)
                })?
                .sibling(snapshot),
            None => volume_id.to_owned(),
        };

        let source_subvolume = match self.api.subvolume_by_id(&source_id, false).await {
            Ok(subvolume) => subvolume,
            Err(err) if err.is_not_found() => {
                return Err(DriverError::NotFound {
                    name: source_id.clone(),
                });
            }
            Err(err) => {
                return Err(DriverError::backend(
                    format!("looking up clone source {source_id}"),
                    err,
                ));
            }
        };

        let parent_volume = source_subvolume.parent_volume_full_name();
        let _claim = self.claim_create(&parent_volume, &volume.internal_name)?;
        if self.adopt_existing(volume).await? {
            return Err(DriverError::AlreadyExists {
                name: volume.internal_name.clone(),
            });
        }

        debug!(
            creation_token = %volume.internal_name,
            size_bytes = source_subvolume.size_bytes,
            parent_volume = %parent_volume,
            parent_path = %source_subvolume.name,
            "creating subvolume clone"
        );
        let request = CreateSubvolumeRequest {
            creation_token: volume.internal_name.clone(),
            volume: parent_volume,
            size_bytes: source_subvolume.size_bytes,
            parent: Some(source_subvolume.name),
        };
        self.start_create(volume, &request).await
    }

    /// Brings an existing subvolume under management.
    ///
    /// The creation token cannot change, so `original_name` becomes the
    /// volume's internal name.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InvalidName`] for a malformed token,
    /// [`DriverError::InvalidRequest`] for snapshot subvolumes and
    /// subvolumes below the minimum size, and [`DriverError::NotFound`] when
    /// no such subvolume exists.
    #[instrument(skip(self, volume), fields(new_name = %volume.internal_name))]
    pub async fn import(
        &self,
        volume: &mut VolumeConfig,
        original_name: &str,
    ) -> Result<(), DriverError> {
        validate_creation_token(original_name)?;

        if self.codec.is_snapshot(original_name) {
            debug!(path = original_name, "skipping snapshot subvolume");
            return Err(DriverError::InvalidRequest(format!(
                "ineligible for import; subvolume {original_name} is a snapshot subvolume"
            )));
        }

        let subvolume = self.subvolume_by_token(original_name, true).await?;
        if subvolume.size_bytes < MINIMUM_SUBVOLUME_SIZE_BYTES {
            return Err(DriverError::InvalidRequest(format!(
                "size error; subvolume {original_name} has {} bytes, below the minimum of \
                 {MINIMUM_SUBVOLUME_SIZE_BYTES}",
                subvolume.size_bytes
            )));
        }

        volume.size_bytes = subvolume.size_bytes;
        original_name.clone_into(&mut volume.internal_name);
        volume.internal_id = Some(subvolume.id);
        info!(subvolume = original_name, "imported subvolume");
        Ok(())
    }

    /// Confirms a created subvolume is available and records how to reach
    /// it.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] when the subvolume is missing and
    /// [`DriverError::InvalidRequest`] when it is not available.
    #[instrument(skip(self, volume), fields(creation_token = %volume.internal_name))]
    pub async fn create_followup(&self, volume: &mut VolumeConfig) -> Result<(), DriverError> {
        let subvolume = self.lookup(volume, false).await?;
        if subvolume.provisioning_state != ProvisioningState::Available {
            return Err(DriverError::InvalidRequest(format!(
                "subvolume {} is in {} state",
                volume.internal_name, subvolume.provisioning_state
            )));
        }

        volume.access_info.parent_volume = Some(subvolume.parent_volume_full_name());
        volume.access_info.subvolume_name = Some(volume.internal_name.clone());
        if volume.internal_id().is_none() {
            volume.internal_id = Some(subvolume.id);
        }
        Ok(())
    }

    /// Adopts an existing subvolume with the volume's creation token.
    ///
    /// Returns `true` when one existed and has converged, after writing its
    /// identity into `volume`. A subvolume found in `Error` or `Deleting`
    /// is escalated rather than adopted.
    async fn adopt_existing(&self, volume: &mut VolumeConfig) -> Result<bool, DriverError> {
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
        let Some(extant) = extant else {
            return Ok(false);
        };

        volume.internal_name.clone_from(&extant.name);
        volume.internal_id = Some(extant.id.clone());
        warn!(
            name = %extant.name,
            state = %extant.provisioning_state,
            "subvolume already exists"
        );

        let poller = self
            .state
            .pollers
            .get(&PollerKey::new(extant.id.as_str(), Operation::Create));
        self.wait_for_create(&extant, poller, Operation::Create, Report::Immediately)
            .await?;
        Ok(true)
    }

    async fn start_create(
        &self,
        volume: &mut VolumeConfig,
        request: &CreateSubvolumeRequest,
    ) -> Result<(), DriverError> {
        let (subvolume, started) = match self.api.create_subvolume(request).await {
            Ok(created) => created,
            Err(err) if err.is_already_exists() => {
                warn!(
                    creation_token = %request.creation_token,
                    "subvolume appeared after the existence check"
                );
                if self.adopt_existing(volume).await? {
                    return Err(DriverError::AlreadyExists {
                        name: volume.internal_name.clone(),
                    });
                }
                return Err(DriverError::VolumeCreating {
                    name: request.creation_token.clone(),
                    message: err.to_string(),
                });
            }
            Err(err) => {
                return Err(DriverError::backend(
                    format!("creating subvolume {}", request.creation_token),
                    err,
                ));
            }
        };
        volume.internal_id = Some(subvolume.id.clone());

        let poller = self.state.pollers.get_or_insert(
            PollerKey::new(subvolume.id.as_str(), Operation::Create),
            started,
        );
        self.wait_for_create(&subvolume, Some(poller), Operation::Create, Report::InFollowup)
            .await
    }

    /// Claims the create of `token` in `parent_volume` for this process.
    ///
    /// The claim is keyed by the subvolume's deterministic identifier and
    /// taken before the existence check, so at most one caller checks and
    /// issues the primitive create at a time.
    fn claim_create(
        &self,
        parent_volume: &str,
        token: &str,
    ) -> Result<InFlightGuard, DriverError> {
        let (resource_group, account, pool, parent) = resource_id::parse_volume_full_name(
            parent_volume,
        )
        .map_err(|err| DriverError::backend(format!("parsing parent volume {parent_volume}"), err))?;
        let id = resource_id::subvolume_id(
            &self.config.subscription_id,
            &resource_group,
            &account,
            &pool,
            &parent,
            token,
        );
        self.state.creates.try_begin(&id).ok_or_else(|| {
            debug!(creation_token = token, "create already in flight");
            DriverError::VolumeCreating {
                name: token.to_owned(),
                message: String::from("another create of this subvolume is in flight"),
            }
        })
    }

    fn requested_size(&self, requested: u64, pool: &StoragePool) -> Result<u64, DriverError> {
        let size_bytes = match (requested, pool.default_size_bytes) {
            (0, 0) => self.config.default_size_bytes,
            (0, pool_default) => pool_default,
            (requested, _) => requested,
        };
        if size_bytes < MINIMUM_SUBVOLUME_SIZE_BYTES {
            return Err(DriverError::InvalidRequest(format!(
                "requested volume size ({size_bytes} bytes) is too small; the minimum volume \
                 size is {MINIMUM_SUBVOLUME_SIZE_BYTES} bytes"
            )));
        }
        self.check_size_limit(size_bytes)?;
        Ok(size_bytes)
    }

    pub(crate) fn check_size_limit(&self, size_bytes: u64) -> Result<(), DriverError> {
        match self.config.limit_volume_size_bytes {
            Some(limit) if size_bytes > limit => Err(DriverError::InvalidRequest(format!(
                "requested size {size_bytes} bytes exceeds the volume size limit of {limit} bytes"
            ))),
            _ => Ok(()),
        }
    }

    /// Fetches the subvolume behind `volume`, by ID when known and by
    /// creation token otherwise.
    pub(crate) async fn lookup(
        &self,
        volume: &VolumeConfig,
        with_metadata: bool,
    ) -> Result<Subvolume, DriverError> {
        let Some(id) = volume.internal_id() else {
            return self
                .subvolume_by_token(&volume.internal_name, with_metadata)
                .await;
        };
        self.api
            .subvolume_by_id(id, with_metadata)
            .await
            .map_err(|err| not_found_or_backend(err, &volume.internal_name))
    }

    pub(crate) async fn subvolume_by_token(
        &self,
        token: &str,
        with_metadata: bool,
    ) -> Result<Subvolume, DriverError> {
        let parents = self.parent_volumes();
        self.api
            .subvolume_by_token(token, &parents, with_metadata)
            .await
            .map_err(|err| not_found_or_backend(err, token))
    }
}

pub(crate) fn not_found_or_backend(err: ApiError, name: &str) -> DriverError {
    if err.is_not_found() {
        DriverError::NotFound {
            name: name.to_owned(),
        }
    } else {
        DriverError::backend(format!("could not find subvolume {name}"), err)
    }
}
