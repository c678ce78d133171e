//! Unit tests for creation and the provisioning state machine.

use rstest::{fixture, rstest};

use super::*;
use crate::api::{ApiError, ProvisioningState};
use crate::cache::{Operation, PollerKey};
use crate::config::{DriverConfig, MINIMUM_SUBVOLUME_SIZE_BYTES};
use crate::naming::NameError;
use crate::pool::{StaticPoolRegistry, StoragePool};
use crate::test_support::{ApiCall, InMemorySubvolumeApi, TEST_SUBSCRIPTION};

const PARENT: &str = "rg-1/acct-1/pool-1/vol-1";
const GIB: u64 = 1024 * 1024 * 1024;

type TestDriver = SubvolumeDriver<InMemorySubvolumeApi, StaticPoolRegistry>;

#[fixture]
fn pool() -> StoragePool {
    StoragePool::new("pool-1", PARENT, GIB)
}

#[fixture]
fn api() -> InMemorySubvolumeApi {
    InMemorySubvolumeApi::default()
}

fn driver_with(api: &InMemorySubvolumeApi, config: DriverConfig) -> TestDriver {
    let pools = StaticPoolRegistry::new(vec![pool()]);
    SubvolumeDriver::new(config, api.clone(), pools)
        .unwrap_or_else(|err| panic!("driver construction failed: {err}"))
}

fn driver(api: &InMemorySubvolumeApi) -> TestDriver {
    driver_with(api, DriverConfig::new(TEST_SUBSCRIPTION))
}

fn volume(driver: &TestDriver, name: &str) -> VolumeConfig {
    VolumeConfig::new(name, driver.internal_volume_name(name))
}

#[rstest]
fn derives_internal_volume_names(api: InMemorySubvolumeApi) {
    let driver = driver(&api);
    assert_eq!(
        driver.internal_volume_name("pvc_data.1"),
        "subvol-pvc-data-1-file-0"
    );
}

#[rstest]
fn rejects_invalid_configuration(api: InMemorySubvolumeApi) {
    let config = DriverConfig::new("");
    let pools = StaticPoolRegistry::new(vec![pool()]);
    let result = SubvolumeDriver::new(config, api, pools);
    assert!(matches!(result, Err(DriverError::Config(_))));
}

#[rstest]
#[tokio::test]
async fn create_records_identity_and_clears_cache(
    api: InMemorySubvolumeApi,
    pool: StoragePool,
) {
    let driver = driver(&api);
    let mut config = volume(&driver, "volume-one");

    driver
        .create(&mut config, &pool)
        .await
        .unwrap_or_else(|err| panic!("create failed: {err}"));

    let stored = api
        .subvolume(&config.internal_name)
        .unwrap_or_else(|| panic!("subvolume missing"));
    assert_eq!(config.internal_id.as_deref(), Some(stored.id.as_str()));
    assert_eq!(stored.provisioning_state, ProvisioningState::Available);
    assert_eq!(config.size_bytes, GIB);
    assert!(driver.state().pollers.is_empty());
}

#[rstest]
#[tokio::test]
async fn second_create_reports_already_exists(api: InMemorySubvolumeApi, pool: StoragePool) {
    let driver = driver(&api);
    let mut first = volume(&driver, "volume-one");
    let mut second = volume(&driver, "volume-one");

    driver
        .create(&mut first, &pool)
        .await
        .unwrap_or_else(|err| panic!("create failed: {err}"));
    let err = driver
        .create(&mut second, &pool)
        .await
        .expect_err("second create must report the existing subvolume");

    assert!(matches!(err, DriverError::AlreadyExists { .. }));
    assert!(err.is_converged());
    assert_eq!(second.internal_id, first.internal_id);
    assert_eq!(api.creates().len(), 1);
    assert_eq!(api.tokens().len(), 1);
}

#[rstest]
#[tokio::test]
async fn slow_create_keeps_handle_for_the_retry(api: InMemorySubvolumeApi, pool: StoragePool) {
    let driver = driver(&api);
    let mut config = volume(&driver, "volume-one");
    api.script_states(&config.internal_name, [ProvisioningState::Creating]);

    let err = driver
        .create(&mut config, &pool)
        .await
        .expect_err("wait should expire while creating");
    assert!(matches!(err, DriverError::VolumeCreating { .. }));
    assert!(err.is_retryable());

    let id = config.internal_id.clone().unwrap_or_default();
    assert!(
        driver
            .state()
            .pollers
            .contains(&PollerKey::new(id.as_str(), Operation::Create))
    );

    let err = driver
        .create(&mut config, &pool)
        .await
        .expect_err("retry adopts the subvolume");
    assert!(matches!(err, DriverError::AlreadyExists { .. }));
    assert!(driver.state().pollers.is_empty());
    assert_eq!(api.creates().len(), 1);
}

#[rstest]
#[tokio::test]
async fn failed_create_is_cleaned_up_and_left_to_followup(
    api: InMemorySubvolumeApi,
    pool: StoragePool,
) {
    let driver = driver(&api);
    let mut config = volume(&driver, "volume-one");
    api.script_states(&config.internal_name, [ProvisioningState::Error]);

    driver
        .create(&mut config, &pool)
        .await
        .unwrap_or_else(|err| panic!("create defers errors to the followup: {err}"));

    assert_eq!(api.deletes(), vec![config.internal_name.clone()]);
    assert!(driver.state().pollers.is_empty());

    let err = driver
        .create_followup(&mut config)
        .await
        .expect_err("followup must notice the failed subvolume");
    assert!(matches!(err, DriverError::InvalidRequest(_)));
    assert_eq!(config.access_info, AccessInfo::default());
}

#[rstest]
#[tokio::test]
async fn unexpected_state_surfaces_the_operation_error(
    api: InMemorySubvolumeApi,
    pool: StoragePool,
) {
    let driver = driver(&api);
    let mut config = volume(&driver, "volume-one");
    api.script_states(&config.internal_name, [ProvisioningState::Moving]);
    api.fail_pollers(
        &config.internal_name,
        ApiError::Provider {
            message: String::from("capacity exhausted"),
        },
    );

    let err = driver
        .create(&mut config, &pool)
        .await
        .expect_err("operation error must surface");
    let DriverError::Backend { ref source, .. } = err else {
        panic!("expected backend error, got {err:?}");
    };
    assert_eq!(
        source,
        &ApiError::Provider {
            message: String::from("capacity exhausted")
        }
    );
    assert!(driver.state().pollers.is_empty());
}

#[rstest]
#[tokio::test]
async fn existing_subvolume_in_error_is_escalated(api: InMemorySubvolumeApi, pool: StoragePool) {
    let driver = driver(&api);
    let mut config = volume(&driver, "volume-one");
    api.seed(PARENT, &config.internal_name, GIB, ProvisioningState::Error);

    let err = driver
        .create(&mut config, &pool)
        .await
        .expect_err("a failed subvolume is not adopted");

    assert!(matches!(err, DriverError::Backend { .. }));
    assert_eq!(api.deletes(), vec![config.internal_name.clone()]);
    assert!(api.creates().is_empty());
}

#[rstest]
#[tokio::test]
async fn existing_subvolume_being_deleted_is_escalated(
    api: InMemorySubvolumeApi,
    pool: StoragePool,
) {
    let driver = driver(&api);
    let mut config = volume(&driver, "volume-one");
    api.seed(PARENT, &config.internal_name, GIB, ProvisioningState::Deleting);
    api.script_states(&config.internal_name, [ProvisioningState::Deleting]);

    let err = driver
        .create(&mut config, &pool)
        .await
        .expect_err("a subvolume being deleted is not adopted");

    assert!(matches!(err, DriverError::Backend { .. }));
    assert!(api.creates().is_empty());
    assert!(api.subvolume(&config.internal_name).is_none());
    assert!(driver.state().pollers.is_empty());
}

#[rstest]
#[tokio::test]
async fn deleting_during_create_is_drained_and_left_to_followup(
    api: InMemorySubvolumeApi,
    pool: StoragePool,
) {
    let driver = driver(&api);
    let mut config = volume(&driver, "volume-one");
    api.script_states(
        &config.internal_name,
        [ProvisioningState::Deleting, ProvisioningState::Deleting],
    );

    driver
        .create(&mut config, &pool)
        .await
        .unwrap_or_else(|err| panic!("create must defer the failure: {err}"));

    assert!(driver.state().pollers.is_empty());
    let drains = api
        .calls()
        .into_iter()
        .filter(|call| {
            matches!(
                call,
                ApiCall::Wait { token, target: ProvisioningState::Deleted }
                    if *token == config.internal_name
            )
        })
        .count();
    assert_eq!(drains, 1);

    let err = driver
        .create_followup(&mut config)
        .await
        .expect_err("followup must report the deleting subvolume");
    assert!(matches!(err, DriverError::InvalidRequest(_)));
}

#[rstest]
#[tokio::test]
async fn racing_creates_issue_one_primitive(api: InMemorySubvolumeApi, pool: StoragePool) {
    api.yield_after_lookups();
    let driver = driver(&api);
    let mut first = volume(&driver, "volume-one");
    let mut second = volume(&driver, "volume-one");

    let (won, raced) = tokio::join!(
        driver.create(&mut first, &pool),
        driver.create(&mut second, &pool)
    );

    assert_eq!(won, Ok(()));
    let err = raced.expect_err("the racing create must back off");
    assert!(err.is_volume_creating());
    assert!(err.is_retryable());
    assert_eq!(api.creates().len(), 1);
    assert!(driver.state().pollers.is_empty());

    let err = driver
        .create(&mut second, &pool)
        .await
        .expect_err("the retry adopts the created subvolume");
    assert!(err.is_converged());
    assert_eq!(second.internal_id, first.internal_id);
    assert_eq!(api.creates().len(), 1);
}

#[rstest]
#[tokio::test]
async fn create_collision_is_adopted(api: InMemorySubvolumeApi, pool: StoragePool) {
    api.yield_after_lookups();
    let one = driver(&api);
    let other = driver(&api);
    let mut first = volume(&one, "volume-one");
    let mut second = volume(&other, "volume-one");

    let outcomes = tokio::join!(
        one.create(&mut first, &pool),
        other.create(&mut second, &pool)
    );

    // Either driver may reach the primitive first; the other adopts.
    let outcomes = [outcomes.0, outcomes.1];
    assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
    assert!(
        outcomes
            .iter()
            .any(|outcome| matches!(outcome, Err(err) if err.is_converged())),
        "{outcomes:?}"
    );
    assert!(first.internal_id.is_some());
    assert_eq!(second.internal_id, first.internal_id);
    assert_eq!(api.tokens(), vec![first.internal_name.clone()]);
    assert!(one.state().pollers.is_empty());
    assert!(other.state().pollers.is_empty());
}

#[rstest]
#[case(0, GIB, GIB)]
#[case(0, 0, MINIMUM_SUBVOLUME_SIZE_BYTES)]
#[case(2 * GIB, GIB, 2 * GIB)]
#[tokio::test]
async fn resolves_requested_sizes(
    api: InMemorySubvolumeApi,
    #[case] requested: u64,
    #[case] pool_default: u64,
    #[case] expected: u64,
) {
    let driver = driver(&api);
    let pool = StoragePool::new("pool-1", PARENT, pool_default);
    let mut config = volume(&driver, "volume-one").with_size_bytes(requested);

    driver
        .create(&mut config, &pool)
        .await
        .unwrap_or_else(|err| panic!("create failed: {err}"));

    assert_eq!(config.size_bytes, expected);
    let stored = api
        .subvolume(&config.internal_name)
        .unwrap_or_else(|| panic!("subvolume missing"));
    assert_eq!(stored.size_bytes, expected);
}

#[rstest]
#[case(1024, None)]
#[case(4 * GIB, Some(2 * GIB))]
#[tokio::test]
async fn rejects_sizes_outside_policy(
    api: InMemorySubvolumeApi,
    pool: StoragePool,
    #[case] requested: u64,
    #[case] limit: Option<u64>,
) {
    let config = DriverConfig {
        limit_volume_size_bytes: limit,
        ..DriverConfig::new(TEST_SUBSCRIPTION)
    };
    let driver = driver_with(&api, config);
    let mut volume = volume(&driver, "volume-one").with_size_bytes(requested);

    let err = driver
        .create(&mut volume, &pool)
        .await
        .expect_err("size must be rejected");

    assert!(matches!(err, DriverError::InvalidRequest(_)));
    assert!(api.creates().is_empty());
}

#[rstest]
#[case("1volume", "subvol-1volume-file-0")]
#[case("volume-one", "subvol-volume one")]
#[tokio::test]
async fn invalid_names_never_reach_the_backend(
    api: InMemorySubvolumeApi,
    pool: StoragePool,
    #[case] name: &str,
    #[case] token: &str,
) {
    let driver = driver(&api);
    let mut config = VolumeConfig::new(name, token);

    let err = driver
        .create(&mut config, &pool)
        .await
        .expect_err("name must be rejected");

    assert!(matches!(err, DriverError::InvalidName(NameError::Grammar { .. })));
    assert!(!err.is_retryable());
    assert!(api.calls().is_empty());
}

#[rstest]
#[tokio::test]
async fn followup_records_access_info(api: InMemorySubvolumeApi, pool: StoragePool) {
    let driver = driver(&api);
    let mut config = volume(&driver, "volume-one");
    driver
        .create(&mut config, &pool)
        .await
        .unwrap_or_else(|err| panic!("create failed: {err}"));

    driver
        .create_followup(&mut config)
        .await
        .unwrap_or_else(|err| panic!("followup failed: {err}"));

    assert_eq!(config.access_info.parent_volume.as_deref(), Some(PARENT));
    assert_eq!(
        config.access_info.subvolume_name.as_deref(),
        Some(config.internal_name.as_str())
    );
}

#[rstest]
#[tokio::test]
async fn clones_from_a_volume_and_from_a_snapshot(api: InMemorySubvolumeApi, pool: StoragePool) {
    let driver = driver(&api);
    let mut source = volume(&driver, "volume-one");
    driver
        .create(&mut source, &pool)
        .await
        .unwrap_or_else(|err| panic!("create failed: {err}"));
    let mut snapshot = SnapshotConfig::new("daily", &source);
    driver
        .create_snapshot(&mut snapshot, &source)
        .await
        .unwrap_or_else(|err| panic!("snapshot failed: {err}"));

    let mut plain = volume(&driver, "volume-two").cloned_from("volume-one", None);
    driver
        .create_clone(&source, &mut plain)
        .await
        .unwrap_or_else(|err| panic!("clone failed: {err}"));

    let mut from_snapshot = volume(&driver, "volume-three").cloned_from(
        "volume-one",
        Some((String::from("daily"), snapshot.internal_name.clone())),
    );
    driver
        .create_clone(&source, &mut from_snapshot)
        .await
        .unwrap_or_else(|err| panic!("clone from snapshot failed: {err}"));

    let parents: Vec<_> = api
        .creates()
        .into_iter()
        .map(|(token, parent)| (token, parent.unwrap_or_default()))
        .collect();
    assert_eq!(
        parents,
        vec![
            (source.internal_name.clone(), String::new()),
            (snapshot.internal_name.clone(), source.internal_name.clone()),
            (plain.internal_name.clone(), source.internal_name.clone()),
            (from_snapshot.internal_name.clone(), snapshot.internal_name.clone()),
        ]
    );
    let clone = api
        .subvolume(&plain.internal_name)
        .unwrap_or_else(|| panic!("clone missing"));
    assert_eq!(clone.size_bytes, GIB);
}

#[rstest]
#[tokio::test]
async fn clone_requires_a_source_identity(api: InMemorySubvolumeApi) {
    let driver = driver(&api);
    let source = volume(&driver, "volume-one");
    let mut clone = volume(&driver, "volume-two").cloned_from("volume-one", None);

    let err = driver
        .create_clone(&source, &mut clone)
        .await
        .expect_err("source without ID cannot be cloned");

    assert!(matches!(err, DriverError::InvalidRequest(_)));
    assert!(api.calls().is_empty());
}

#[rstest]
#[tokio::test]
async fn imports_plain_subvolumes_only(api: InMemorySubvolumeApi) {
    let driver = driver(&api);
    let existing = api.seed(PARENT, "legacy-share", GIB, ProvisioningState::Available);
    api.seed(
        PARENT,
        "subvol-daily--legac",
        GIB,
        ProvisioningState::Available,
    );

    let mut config = VolumeConfig::new("imported", "subvol-imported-file-0");
    driver
        .import(&mut config, "legacy-share")
        .await
        .unwrap_or_else(|err| panic!("import failed: {err}"));
    assert_eq!(config.internal_name, "legacy-share");
    assert_eq!(config.internal_id.as_deref(), Some(existing.id.as_str()));
    assert_eq!(config.size_bytes, GIB);

    let mut snapshot = VolumeConfig::new("imported", "subvol-imported-file-0");
    let err = driver
        .import(&mut snapshot, "subvol-daily--legac")
        .await
        .expect_err("snapshot subvolumes are not importable");
    assert!(matches!(err, DriverError::InvalidRequest(_)));
}

#[rstest]
#[tokio::test]
async fn import_rejects_undersized_subvolumes(api: InMemorySubvolumeApi) {
    let driver = driver(&api);
    api.seed(PARENT, "tiny", 1024, ProvisioningState::Available);
    let mut config = VolumeConfig::new("imported", "subvol-imported-file-0");

    let err = driver
        .import(&mut config, "tiny")
        .await
        .expect_err("undersized subvolume");

    assert!(matches!(err, DriverError::InvalidRequest(_)));
    assert_eq!(config.internal_name, "subvol-imported-file-0");
}

#[rstest]
fn rename_is_accepted_without_backend_calls(api: InMemorySubvolumeApi) {
    let driver = driver(&api);
    assert_eq!(driver.rename("old", "new"), Ok(()));
    assert!(api.calls().is_empty());
}
