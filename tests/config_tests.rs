//! Configuration loading tests.

use rstest::rstest;
use subvol_driver::config::{ConfigError, DriverContext, MINIMUM_SUBVOLUME_SIZE_BYTES};
use subvol_driver::test_support::EnvGuard;
use subvol_driver::DriverConfig;
use tempfile::TempDir;

#[tokio::test]
async fn loads_values_from_the_environment() {
    let home = TempDir::new().unwrap_or_else(|err| panic!("temp home: {err}"));
    let home_path = home.path().to_string_lossy().into_owned();
    let _guard = EnvGuard::set_vars(&[
        ("HOME", home_path.as_str()),
        ("XDG_CONFIG_HOME", home_path.as_str()),
        ("SUBVOL_SUBSCRIPTION_ID", "11111111-2222-3333-4444-555555555555"),
        ("SUBVOL_STORAGE_PREFIX", "trident"),
        ("SUBVOL_DRIVER_CONTEXT", "docker"),
    ])
    .await;

    let config = DriverConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("config should load from env: {err}"));

    assert_eq!(config.subscription_id, "11111111-2222-3333-4444-555555555555");
    assert_eq!(config.storage_prefix, "trident");
    assert_eq!(config.context(), Ok(DriverContext::Docker));
    assert_eq!(config.default_size_bytes, MINIMUM_SUBVOLUME_SIZE_BYTES);
    assert_eq!(config.limit_volume_size_bytes, None);
    assert_eq!(config.validate(), Ok(()));
}

#[rstest]
#[case("", "subvol", "SUBVOL_SUBSCRIPTION_ID")]
#[case("11111111-2222-3333-4444-555555555555", " ", "SUBVOL_STORAGE_PREFIX")]
fn missing_fields_name_their_sources(
    #[case] subscription: &str,
    #[case] prefix: &str,
    #[case] env_var: &str,
) {
    let config = DriverConfig {
        storage_prefix: prefix.to_owned(),
        ..DriverConfig::new(subscription)
    };
    let err = config.validate().expect_err("validation should fail");
    let ConfigError::MissingField(ref message) = err else {
        panic!("expected MissingField, got {err:?}");
    };
    assert!(message.contains(env_var), "{message}");
}
