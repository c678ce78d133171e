//! Driver configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::str::FromStr;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::naming::NameCodec;

/// Smallest subvolume the backend will provision (20 MiB).
pub const MINIMUM_SUBVOLUME_SIZE_BYTES: u64 = 20_971_520;

const ORCHESTRATOR_CREATE_TIMEOUT: Duration = Duration::from_secs(300);
const ORCHESTRATOR_DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const DOCKER_CREATE_TIMEOUT: Duration = Duration::from_secs(450);
const DOCKER_DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

/// Subvolume driver configuration derived from defaults, configuration
/// files, environment variables, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "SUBVOL")]
pub struct DriverConfig {
    /// Subscription that owns every resource the driver manages. Required.
    pub subscription_id: String,
    /// Prefix prepended to every creation token the driver generates.
    #[ortho_config(default = "subvol".to_owned())]
    pub storage_prefix: String,
    /// Calling context: `orchestrator` (retries on its own) or `docker`
    /// (no retry, so waits are longer).
    #[ortho_config(default = "orchestrator".to_owned())]
    pub driver_context: String,
    /// Overrides the creation-class wait timeout, in seconds.
    pub volume_create_timeout_secs: Option<u64>,
    /// Overrides the default wait timeout, in seconds.
    pub default_timeout_secs: Option<u64>,
    /// Largest subvolume the driver may create or grow to, in bytes.
    pub limit_volume_size_bytes: Option<u64>,
    /// Size used when neither the request nor the pool names one.
    #[ortho_config(default = MINIMUM_SUBVOLUME_SIZE_BYTES)]
    pub default_size_bytes: u64,
}

/// Calling context that decides the default timeouts.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DriverContext {
    /// Invoked by a reconciling orchestrator that retries on its own.
    #[default]
    Orchestrator,
    /// Invoked by a plugin host that does not retry.
    Docker,
}

impl FromStr for DriverContext {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "orchestrator" | "csi" => Ok(Self::Orchestrator),
            "docker" => Ok(Self::Docker),
            other => Err(ConfigError::Invalid(format!(
                "unknown driver context '{other}': set SUBVOL_DRIVER_CONTEXT or \
                 driver_context in subvol.toml to 'orchestrator' or 'docker'"
            ))),
        }
    }
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl DriverConfig {
    /// Builds a configuration with defaults for everything but the
    /// subscription.
    #[must_use]
    pub fn new(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into().trim().to_owned(),
            storage_prefix: String::from("subvol"),
            driver_context: String::from("orchestrator"),
            volume_create_timeout_secs: None,
            default_timeout_secs: None,
            limit_volume_size_bytes: None,
            default_size_bytes: MINIMUM_SUBVOLUME_SIZE_BYTES,
        }
    }

    /// Sets the storage prefix.
    #[must_use]
    pub fn with_storage_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.storage_prefix = prefix.into().trim().to_owned();
        self
    }

    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to subvol.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("subvol")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and configuration key that supply each value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::Invalid`] when a value cannot be used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.subscription_id,
            &FieldMetadata::new("subscription ID", "SUBVOL_SUBSCRIPTION_ID", "subscription_id"),
        )?;
        Self::require_field(
            &self.storage_prefix,
            &FieldMetadata::new("storage prefix", "SUBVOL_STORAGE_PREFIX", "storage_prefix"),
        )?;
        NameCodec::new(&self.storage_prefix)
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        self.context()?;

        if self.default_size_bytes < MINIMUM_SUBVOLUME_SIZE_BYTES {
            return Err(ConfigError::Invalid(format!(
                "default_size_bytes {} is below the minimum subvolume size of {} bytes",
                self.default_size_bytes, MINIMUM_SUBVOLUME_SIZE_BYTES
            )));
        }
        if let Some(limit) = self.limit_volume_size_bytes
            && limit < MINIMUM_SUBVOLUME_SIZE_BYTES
        {
            return Err(ConfigError::Invalid(format!(
                "limit_volume_size_bytes {limit} is below the minimum subvolume size of \
                 {MINIMUM_SUBVOLUME_SIZE_BYTES} bytes"
            )));
        }
        if matches!(self.volume_create_timeout_secs, Some(0))
            || matches!(self.default_timeout_secs, Some(0))
        {
            return Err(ConfigError::Invalid(String::from(
                "timeouts must be at least one second",
            )));
        }
        Ok(())
    }

    /// Parses the configured driver context.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for unknown contexts.
    pub fn context(&self) -> Result<DriverContext, ConfigError> {
        self.driver_context.parse()
    }

    /// Timeout applied to create and restore waits.
    #[must_use]
    pub fn volume_create_timeout(&self) -> Duration {
        self.volume_create_timeout_secs.map_or_else(
            || match self.context().unwrap_or_default() {
                DriverContext::Orchestrator => ORCHESTRATOR_CREATE_TIMEOUT,
                DriverContext::Docker => DOCKER_CREATE_TIMEOUT,
            },
            Duration::from_secs,
        )
    }

    /// Timeout applied to delete, resize, and read waits.
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout_secs.map_or_else(
            || match self.context().unwrap_or_default() {
                DriverContext::Orchestrator => ORCHESTRATOR_DEFAULT_TIMEOUT,
                DriverContext::Docker => DOCKER_DEFAULT_TIMEOUT,
            },
            Duration::from_secs,
        )
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configured value cannot be used.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
