//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::http::DEFAULT_API_BASE_URL;
use crate::links::{ConsoleLinks, DEFAULT_CONSOLE_BASE_URL};
use crate::retry::RetryPolicy;
use crate::session::SessionSettings;

/// Service credentials and provisioning cadence derived from environment
/// variables and configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "KILN",
    discovery(
        app_name = "kiln",
        env_var = "KILN_CONFIG_PATH",
        config_file_name = "kiln.toml",
        dotfile_name = ".kiln.toml",
        project_file_name = "kiln.toml"
    )
)]
pub struct KilnConfig {
    /// Bearer token used to authenticate API calls. This value is required.
    pub api_token: String,
    /// Project owning every provisioned resource. This value is required.
    pub project_id: String,
    /// Base URL of the resource-management API.
    #[ortho_config(default = DEFAULT_API_BASE_URL.to_owned())]
    pub api_base_url: String,
    /// Base URL of the web console used for build links.
    #[ortho_config(default = DEFAULT_CONSOLE_BASE_URL.to_owned())]
    pub console_base_url: String,
    /// Seconds to wait for an environment build before giving up.
    #[ortho_config(default = 600)]
    pub build_timeout_secs: u64,
    /// Seconds to wait before retrying a failed creation call.
    #[ortho_config(default = 10)]
    pub create_retry_delay_secs: u64,
    /// Seconds between two build status fetches.
    #[ortho_config(default = 1)]
    pub poll_interval_secs: u64,
    /// Seconds between two progress reports while waiting for a build.
    #[ortho_config(default = 30)]
    pub report_interval_secs: u64,
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

impl KilnConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to kiln.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("kiln")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty and
    /// [`ConfigError::InvalidInterval`] when the poll interval is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.api_token,
            &FieldMetadata::new("API token", "KILN_API_TOKEN", "api_token"),
        )?;
        Self::require_field(
            &self.project_id,
            &FieldMetadata::new("project ID", "KILN_PROJECT_ID", "project_id"),
        )?;
        Self::require_field(
            &self.api_base_url,
            &FieldMetadata::new("API base URL", "KILN_API_BASE_URL", "api_base_url"),
        )?;
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidInterval(String::from(
                "poll_interval_secs",
            )));
        }
        Ok(())
    }

    /// Deadline applied to build waits when the caller gives none.
    #[must_use]
    pub const fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    /// Builds session settings from the configured values.
    #[must_use]
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings::new(&self.project_id)
            .with_links(ConsoleLinks::new(&self.console_base_url))
            .with_retry(RetryPolicy::single_retry(Duration::from_secs(
                self.create_retry_delay_secs,
            )))
            .with_poll_interval(Duration::from_secs(self.poll_interval_secs))
            .with_report_interval(Duration::from_secs(self.report_interval_secs))
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates an interval that must be positive is zero.
    #[error("{0} must be greater than zero")]
    InvalidInterval(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
