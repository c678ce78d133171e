//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use uuid::Uuid;

use crate::api::{
    ApiError, BackendFuture, CreateSubvolumeRequest, Poller, PollerResponse, ProvisioningState,
    Subvolume, SubvolumeApi, WaitFailure, resource_id,
};

/// Subscription used by [`InMemorySubvolumeApi::default`].
pub const TEST_SUBSCRIPTION: &str = "00000000-0000-0000-0000-000000000000";

/// Records a single call made through [`InMemorySubvolumeApi`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ApiCall {
    /// `create_subvolume` for a creation token, with its parent path.
    Create {
        /// Creation token requested.
        token: String,
        /// Parent path requested, if any.
        parent: Option<String>,
    },
    /// `delete_subvolume` for a creation token.
    Delete {
        /// Creation token addressed.
        token: String,
    },
    /// `resize_subvolume` for a creation token.
    Resize {
        /// Creation token addressed.
        token: String,
        /// Requested size in bytes.
        size_bytes: u64,
    },
    /// Any lookup or existence check, by ID or token.
    Lookup {
        /// Identifier or token used.
        key: String,
    },
    /// `subvolumes` listing.
    List,
    /// `wait_for_state` for a creation token.
    Wait {
        /// Creation token watched.
        token: String,
        /// State waited for.
        target: ProvisioningState,
    },
}

/// Operation handle returned by [`InMemorySubvolumeApi`].
#[derive(Clone, Debug)]
pub struct InMemoryPoller {
    id: Uuid,
    outcome: Result<(), ApiError>,
}

impl InMemoryPoller {
    /// Returns the handle's unique identifier.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }
}

impl PollerResponse for InMemoryPoller {
    fn result(&self) -> BackendFuture<'_, (), ApiError> {
        Box::pin(async move { self.outcome.clone() })
    }
}

#[derive(Debug, Default)]
struct State {
    subscription: String,
    subvolumes: BTreeMap<String, Subvolume>,
    scripts: HashMap<String, VecDeque<ProvisioningState>>,
    create_failures: HashMap<String, usize>,
    delete_failures: HashMap<String, usize>,
    resize_failures: usize,
    poller_errors: HashMap<String, ApiError>,
    yield_after_lookups: bool,
    calls: Vec<ApiCall>,
}

impl State {
    fn find_by_token(&self, token: &str, parents: &[String]) -> Option<&Subvolume> {
        self.subvolumes.values().find(|subvolume| {
            subvolume.name == token && parents.contains(&subvolume.parent_volume_full_name())
        })
    }

    fn take_failure(counters: &mut HashMap<String, usize>, token: &str) -> bool {
        match counters.get_mut(token) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn poller(&self, token: &str) -> Poller {
        Arc::new(InMemoryPoller {
            id: Uuid::new_v4(),
            outcome: self.poller_errors.get(token).cloned().map_or(Ok(()), Err),
        })
    }
}

/// In-memory Backend API double.
///
/// Subvolumes converge immediately unless a script says otherwise: each
/// `wait_for_state` call pops one scripted state for the subvolume's
/// creation token and reports it. With no script left, creating
/// subvolumes become available and deleting ones disappear. Faults can be
/// injected per creation token, and every call is logged for assertions.
#[derive(Clone, Debug)]
pub struct InMemorySubvolumeApi {
    state: Arc<Mutex<State>>,
}

impl Default for InMemorySubvolumeApi {
    fn default() -> Self {
        Self::new(TEST_SUBSCRIPTION)
    }
}

impl InMemorySubvolumeApi {
    /// Creates an empty backend for `subscription`.
    #[must_use]
    pub fn new(subscription: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                subscription: subscription.to_owned(),
                ..State::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a subvolume directly, bypassing the call log.
    ///
    /// # Panics
    ///
    /// Panics when `parent_volume` is not a valid parent volume full name.
    pub fn seed(
        &self,
        parent_volume: &str,
        token: &str,
        size_bytes: u64,
        provisioning_state: ProvisioningState,
    ) -> Subvolume {
        let mut state = self.lock();
        let subvolume = build_subvolume(&state.subscription, parent_volume, token)
            .unwrap_or_else(|err| panic!("invalid parent volume {parent_volume}: {err}"));
        let subvolume = Subvolume {
            size_bytes,
            provisioning_state,
            ..subvolume
        };
        state
            .subvolumes
            .insert(subvolume.id.clone(), subvolume.clone());
        subvolume
    }

    /// Queues states reported by successive waits on `token`.
    pub fn script_states(&self, token: &str, states: impl IntoIterator<Item = ProvisioningState>) {
        self.lock()
            .scripts
            .entry(token.to_owned())
            .or_default()
            .extend(states);
    }

    /// Makes the next `times` creates of `token` fail.
    pub fn fail_creates(&self, token: &str, times: usize) {
        self.lock().create_failures.insert(token.to_owned(), times);
    }

    /// Makes the next `times` deletes of `token` fail.
    pub fn fail_deletes(&self, token: &str, times: usize) {
        self.lock().delete_failures.insert(token.to_owned(), times);
    }

    /// Makes the next `times` resizes fail.
    pub fn fail_resizes(&self, times: usize) {
        self.lock().resize_failures = times;
    }

    /// Makes every lookup by creation token yield to the scheduler before
    /// returning, so concurrent callers interleave between the lookup and
    /// whatever they do next.
    pub fn yield_after_lookups(&self) {
        self.lock().yield_after_lookups = true;
    }

    /// Makes operation handles for `token` resolve to `error`.
    pub fn fail_pollers(&self, token: &str, error: ApiError) {
        self.lock().poller_errors.insert(token.to_owned(), error);
    }

    /// Returns the stored subvolume with creation token `token`, if any.
    #[must_use]
    pub fn subvolume(&self, token: &str) -> Option<Subvolume> {
        self.lock()
            .subvolumes
            .values()
            .find(|subvolume| subvolume.name == token)
            .cloned()
    }

    /// Returns the creation tokens of all stored subvolumes.
    #[must_use]
    pub fn tokens(&self) -> Vec<String> {
        self.lock()
            .subvolumes
            .values()
            .map(|subvolume| subvolume.name.clone())
            .collect()
    }

    /// Returns a snapshot of all calls recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ApiCall> {
        self.lock().calls.clone()
    }

    /// Returns the creates issued, as `(token, parent)` pairs.
    #[must_use]
    pub fn creates(&self) -> Vec<(String, Option<String>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ApiCall::Create { token, parent } => Some((token, parent)),
                _ => None,
            })
            .collect()
    }

    /// Returns the creation tokens of the deletes issued.
    #[must_use]
    pub fn deletes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ApiCall::Delete { token } => Some(token),
                _ => None,
            })
            .collect()
    }

    /// Returns the number of resizes issued.
    #[must_use]
    pub fn resize_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, ApiCall::Resize { .. }))
            .count()
    }

    /// Forgets the recorded calls.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }
}

fn build_subvolume(
    subscription: &str,
    parent_volume: &str,
    token: &str,
) -> Result<Subvolume, ApiError> {
    let (resource_group, account, pool, volume) =
        resource_id::parse_volume_full_name(parent_volume)?;
    Ok(Subvolume {
        id: resource_id::subvolume_id(
            subscription,
            &resource_group,
            &account,
            &pool,
            &volume,
            token,
        ),
        resource_group,
        netapp_account: account,
        capacity_pool: pool,
        volume,
        name: token.to_owned(),
        ..Subvolume::default()
    })
}

fn provider(message: String) -> ApiError {
    ApiError::Provider { message }
}

impl SubvolumeApi for InMemorySubvolumeApi {
    fn create_subvolume<'a>(
        &'a self,
        request: &'a CreateSubvolumeRequest,
    ) -> BackendFuture<'a, (Subvolume, Poller), ApiError> {
        Box::pin(async move {
            let mut state = self.lock();
            let token = request.creation_token.clone();
            state.calls.push(ApiCall::Create {
                token: token.clone(),
                parent: request.parent.clone(),
            });
            if State::take_failure(&mut state.create_failures, &token) {
                return Err(provider(format!("simulated create failure for {token}")));
            }
            if state
                .find_by_token(&token, std::slice::from_ref(&request.volume))
                .is_some()
            {
                return Err(ApiError::AlreadyExists { name: token });
            }

            let mut subvolume = build_subvolume(&state.subscription, &request.volume, &token)?;
            let inherited = request.parent.as_deref().and_then(|parent| {
                state
                    .find_by_token(parent, std::slice::from_ref(&request.volume))
                    .map(|source| source.size_bytes)
            });
            subvolume.size_bytes = match (request.size_bytes, inherited) {
                (0, Some(size)) => size,
                (size, _) => size,
            };
            subvolume.parent_path.clone_from(&request.parent);
            subvolume.provisioning_state = ProvisioningState::Accepted;
            state
                .subvolumes
                .insert(subvolume.id.clone(), subvolume.clone());
            let poller = state.poller(&token);
            Ok((subvolume, poller))
        })
    }

    fn delete_subvolume<'a>(
        &'a self,
        subvolume: &'a Subvolume,
    ) -> BackendFuture<'a, Poller, ApiError> {
        Box::pin(async move {
            let mut state = self.lock();
            let token = subvolume.name.clone();
            state.calls.push(ApiCall::Delete {
                token: token.clone(),
            });
            if State::take_failure(&mut state.delete_failures, &token) {
                return Err(provider(format!("simulated delete failure for {token}")));
            }
            let Some(stored) = state.subvolumes.get_mut(&subvolume.id) else {
                return Err(ApiError::NotFound { name: token });
            };
            stored.provisioning_state = ProvisioningState::Deleting;
            Ok(state.poller(&token))
        })
    }

    fn resize_subvolume<'a>(
        &'a self,
        subvolume: &'a Subvolume,
        new_size_bytes: u64,
    ) -> BackendFuture<'a, (), ApiError> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(ApiCall::Resize {
                token: subvolume.name.clone(),
                size_bytes: new_size_bytes,
            });
            if state.resize_failures > 0 {
                state.resize_failures -= 1;
                return Err(provider(String::from("simulated resize failure")));
            }
            let stored = state.subvolumes.get_mut(&subvolume.id).ok_or_else(|| {
                ApiError::NotFound {
                    name: subvolume.name.clone(),
                }
            })?;
            stored.size_bytes = new_size_bytes;
            Ok(())
        })
    }

    fn subvolume_by_id<'a>(
        &'a self,
        id: &'a str,
        _with_metadata: bool,
    ) -> BackendFuture<'a, Subvolume, ApiError> {
        Box::pin(async move {
            self.subvolume_exists_by_id(id)
                .await?
                .ok_or_else(|| ApiError::NotFound { name: id.to_owned() })
        })
    }

    fn subvolume_by_token<'a>(
        &'a self,
        token: &'a str,
        parent_volumes: &'a [String],
        _with_metadata: bool,
    ) -> BackendFuture<'a, Subvolume, ApiError> {
        Box::pin(async move {
            self.subvolume_exists_by_token(token, parent_volumes)
                .await?
                .ok_or_else(|| ApiError::NotFound {
                    name: token.to_owned(),
                })
        })
    }

    fn subvolume_exists_by_id<'a>(
        &'a self,
        id: &'a str,
    ) -> BackendFuture<'a, Option<Subvolume>, ApiError> {
        Box::pin(async move {
            resource_id::parse_subvolume_id(id)?;
            let mut state = self.lock();
            state.calls.push(ApiCall::Lookup { key: id.to_owned() });
            Ok(state.subvolumes.get(id).cloned())
        })
    }

    fn subvolume_exists_by_token<'a>(
        &'a self,
        token: &'a str,
        parent_volumes: &'a [String],
    ) -> BackendFuture<'a, Option<Subvolume>, ApiError> {
        Box::pin(async move {
            let (found, pause) = {
                let mut state = self.lock();
                state.calls.push(ApiCall::Lookup {
                    key: token.to_owned(),
                });
                (
                    state.find_by_token(token, parent_volumes).cloned(),
                    state.yield_after_lookups,
                )
            };
            if pause {
                tokio::task::yield_now().await;
            }
            Ok(found)
        })
    }

    fn subvolumes<'a>(
        &'a self,
        parent_volumes: &'a [String],
    ) -> BackendFuture<'a, Vec<Subvolume>, ApiError> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(ApiCall::List);
            Ok(state
                .subvolumes
                .values()
                .filter(|subvolume| parent_volumes.contains(&subvolume.parent_volume_full_name()))
                .cloned()
                .collect())
        })
    }

    fn wait_for_state<'a>(
        &'a self,
        subvolume: &'a Subvolume,
        target: ProvisioningState,
        error_states: &'a [ProvisioningState],
        _timeout: Duration,
    ) -> BackendFuture<'a, ProvisioningState, WaitFailure> {
        Box::pin(async move {
            let mut state = self.lock();
            let token = subvolume.name.clone();
            state.calls.push(ApiCall::Wait {
                token: token.clone(),
                target: target.clone(),
            });
            let scripted = state
                .scripts
                .get_mut(&token)
                .and_then(VecDeque::pop_front);

            let observed = match (state.subvolumes.get_mut(&subvolume.id), scripted) {
                (None, _) => ProvisioningState::Deleted,
                (Some(stored), Some(next)) => {
                    stored.provisioning_state = next.clone();
                    next
                }
                (Some(stored), None) => match stored.provisioning_state {
                    ProvisioningState::Accepted | ProvisioningState::Creating => {
                        stored.provisioning_state = ProvisioningState::Available;
                        ProvisioningState::Available
                    }
                    ProvisioningState::Deleting => ProvisioningState::Deleted,
                    ref other => other.clone(),
                },
            };
            if observed == ProvisioningState::Deleted {
                state.subvolumes.remove(&subvolume.id);
            }

            if observed == target {
                Ok(observed)
            } else if error_states.contains(&observed) {
                Err(WaitFailure::new(
                    observed.clone(),
                    ApiError::UnexpectedState {
                        name: token,
                        state: observed,
                    },
                ))
            } else {
                Err(WaitFailure::new(
                    observed.clone(),
                    ApiError::Timeout {
                        name: token,
                        target,
                        state: observed,
                    },
                ))
            }
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
