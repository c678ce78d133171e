//! Provisioning state machine: bounded waits plus the recovery policy
//! applied when a subvolume does not reach its target state.

use tracing::{debug, error, info};

use crate::api::{Poller, ProvisioningState, Subvolume, SubvolumeApi};
use crate::cache::{Operation, PollerKey};
use crate::pool::PoolRegistry;

use super::{DriverError, SubvolumeDriver};

/// Who reports a failed create wait.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Report {
    /// The wait failure is returned to the caller.
    Immediately,
    /// A follow-up step verifies the subvolume; the failure is logged only.
    InFollowup,
}

impl<A, P> SubvolumeDriver<A, P>
where
    A: SubvolumeApi,
    P: PoolRegistry,
{
    /// Waits for `subvolume` to become available after `operation`.
    ///
    /// A wait that expires while the subvolume is still `Accepted` or
    /// `Creating` returns [`DriverError::VolumeCreating`] and keeps the
    /// cached handle. Every other outcome removes the handle.
    pub(crate) async fn wait_for_create(
        &self,
        subvolume: &Subvolume,
        poller: Option<Poller>,
        operation: Operation,
        report: Report,
    ) -> Result<(), DriverError> {
        const ERROR_STATES: &[ProvisioningState] = &[ProvisioningState::Error];

        let outcome = self
            .api
            .wait_for_state(
                subvolume,
                ProvisioningState::Available,
                ERROR_STATES,
                self.create_timeout,
            )
            .await;

        let mut poll_for_error = false;
        let failure = match outcome {
            Ok(_) => None,
            Err(failure) => {
                match &failure.state {
                    state if state.is_creating() => {
                        debug!(subvolume = %subvolume.name, %state, "subvolume still provisioning");
                        return Err(DriverError::VolumeCreating {
                            name: subvolume.name.clone(),
                            message: failure.error.to_string(),
                        });
                    }
                    ProvisioningState::Deleting => self.drain_deleting(subvolume).await,
                    ProvisioningState::Error => {
                        self.delete_failed(subvolume).await;
                        poll_for_error = true;
                    }
                    state => {
                        error!(subvolume = %subvolume.name, %state, "unexpected subvolume state");
                        poll_for_error = true;
                    }
                }
                Some(failure)
            }
        };

        self.state
            .pollers
            .remove(&PollerKey::new(subvolume.id.as_str(), operation));

        let Some(failure) = failure else {
            return Ok(());
        };

        if poll_for_error && let Some(poller) = poller {
            let result = poller.result().await;
            if failure.state == ProvisioningState::Error {
                if let Err(err) = result {
                    error!(subvolume = %subvolume.name, error = %err, "failed to create subvolume");
                }
            } else if let Err(err) = result {
                return Err(DriverError::backend(
                    format!("creating subvolume {}", subvolume.name),
                    err,
                ));
            }
        }

        match report {
            Report::InFollowup => {
                debug!(
                    subvolume = %subvolume.name,
                    error = %failure.error,
                    "deferring create failure to the follow-up step"
                );
                Ok(())
            }
            Report::Immediately => Err(DriverError::backend(
                format!("waiting for subvolume {} to become available", subvolume.name),
                failure.error,
            )),
        }
    }

    async fn drain_deleting(&self, subvolume: &Subvolume) {
        if let Err(err) = self
            .api
            .wait_for_state(
                subvolume,
                ProvisioningState::Deleted,
                &[ProvisioningState::Error],
                self.default_timeout,
            )
            .await
        {
            error!(
                subvolume = %subvolume.name,
                error = %err,
                "subvolume could not be cleaned up and must be manually deleted"
            );
        }
    }

    async fn delete_failed(&self, subvolume: &Subvolume) {
        match self.api.delete_subvolume(subvolume).await {
            Ok(_) => info!(subvolume = %subvolume.name, "deleted failed subvolume"),
            Err(err) => error!(
                subvolume = %subvolume.name,
                error = %err,
                "subvolume could not be cleaned up and must be manually deleted"
            ),
        }
    }

    /// Deletes `subvolume` and waits for it to disappear.
    ///
    /// A subvolume that is already gone counts as deleted.
    pub(crate) async fn delete_subvolume(&self, subvolume: &Subvolume) -> Result<(), DriverError> {
        let poller = match self.api.delete_subvolume(subvolume).await {
            Ok(poller) => Some(poller),
            Err(err) if err.is_not_found() => None,
            Err(err) => {
                return Err(DriverError::backend(
                    format!("deleting subvolume {}", subvolume.name),
                    err,
                ));
            }
        };
        debug!(subvolume = %subvolume.name, "subvolume delete issued");

        if let Err(failure) = self
            .api
            .wait_for_state(
                subvolume,
                ProvisioningState::Deleted,
                &[ProvisioningState::Error],
                self.default_timeout,
            )
            .await
        {
            if failure.state == ProvisioningState::Error
                && let Some(poller) = poller
                && let Err(err) = poller.result().await
            {
                error!(subvolume = %subvolume.name, error = %err, "failed to delete subvolume");
            }
            return Err(DriverError::backend(
                format!("waiting for subvolume {} to be deleted", subvolume.name),
                failure.error,
            ));
        }
        Ok(())
    }

    /// Waits for a subvolume that is already being deleted, using the
    /// creation-class timeout since the caller is retrying.
    pub(crate) async fn wait_for_deleted(&self, subvolume: &Subvolume) -> Result<(), DriverError> {
        self.api
            .wait_for_state(
                subvolume,
                ProvisioningState::Deleted,
                &[ProvisioningState::Error],
                self.create_timeout,
            )
            .await
            .map(|_| ())
            .map_err(|failure| {
                DriverError::backend(
                    format!("waiting for subvolume {} to be deleted", subvolume.name),
                    failure.error,
                )
            })
    }
}
