//! Shared driver setup for integration tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file in
//! `tests/`). Placing shared helpers under `tests/common/` avoids creating an
//! additional integration test binary while still allowing reuse via:
//!
//! ```rust
//! #[path = "common/driver_fixtures.rs"]
//! mod driver_fixtures;
//! ```

use subvol_driver::test_support::{InMemorySubvolumeApi, TEST_SUBSCRIPTION};
use subvol_driver::{
    DriverConfig, StaticPoolRegistry, StoragePool, SubvolumeDriver, VolumeConfig,
};

/// Parent volume every test pool provisions into.
pub const PARENT: &str = "rg-1/acct-1/pool-1/vol-1";

/// One gibibyte.
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Driver type used across integration tests.
pub type TestDriver = SubvolumeDriver<InMemorySubvolumeApi, StaticPoolRegistry>;

/// The single pool registered with test drivers.
pub fn pool() -> StoragePool {
    StoragePool::new("pool-1", PARENT, GIB)
}

/// Builds a driver over `api` with default configuration.
pub fn driver(api: &InMemorySubvolumeApi) -> TestDriver {
    driver_with_config(api, DriverConfig::new(TEST_SUBSCRIPTION))
}

/// Builds a driver over `api` with the given configuration.
pub fn driver_with_config(api: &InMemorySubvolumeApi, config: DriverConfig) -> TestDriver {
    SubvolumeDriver::new(
        config,
        api.clone(),
        StaticPoolRegistry::new(vec![pool()]),
    )
    .unwrap_or_else(|err| panic!("driver construction failed: {err}"))
}

/// Creates a volume named `name` and returns its configuration.
pub async fn provisioned(driver: &TestDriver, name: &str) -> VolumeConfig {
    let mut config = VolumeConfig::new(name, driver.internal_volume_name(name));
    driver
        .create(&mut config, &pool())
        .await
        .unwrap_or_else(|err| panic!("create {name} failed: {err}"));
    config
}
