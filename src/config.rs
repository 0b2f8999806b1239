//! Configuration loading via `ortho-config`.
//!
//! [`GatherConfig`] carries the remote shell and timeout settings used by the
//! gather pipeline. Values merge defaults, `bootstrap-gather.toml`, and
//! `BOOTSTRAP_GATHER_*` environment variables.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Default path of the diagnostic collection script on the bootstrap host.
pub const DEFAULT_REMOTE_SCRIPT: &str = "/usr/local/bin/installer-gather.sh";

/// Default remote user for bootstrap and control-plane hosts.
pub const DEFAULT_SSH_USER: &str = "core";

/// Remote shell and timeout settings for the gather pipeline.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "BOOTSTRAP_GATHER",
    discovery(
        app_name = "bootstrap-gather",
        env_var = "BOOTSTRAP_GATHER_CONFIG_PATH",
        config_file_name = "bootstrap-gather.toml",
        dotfile_name = ".bootstrap-gather.toml",
        project_file_name = "bootstrap-gather.toml"
    )
)]
pub struct GatherConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `scp` executable used to pull the remote bundle.
    #[ortho_config(default = "scp".to_owned())]
    pub scp_bin: String,
    /// Remote user to connect as.
    #[ortho_config(default = DEFAULT_SSH_USER.to_owned())]
    pub ssh_user: String,
    /// Whether to force batch mode for SSH to avoid password prompts.
    #[ortho_config(default = true)]
    pub ssh_batch_mode: bool,
    /// Whether to enforce host key checking. Bootstrap hosts are short-lived,
    /// so checking is off unless requested.
    #[ortho_config(default = false)]
    pub ssh_strict_host_key_checking: bool,
    /// Known hosts file override; defaults to `/dev/null`.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub ssh_known_hosts_file: String,
    /// Seconds SSH waits for the TCP handshake before giving up.
    #[ortho_config(default = 30)]
    pub ssh_connect_timeout_secs: u64,
    /// Upper bound in seconds for any single `ssh` or `scp` invocation.
    #[ortho_config(default = 300)]
    pub command_timeout_secs: u64,
    /// Upper bound in seconds for any single cloud API call.
    #[ortho_config(default = 60)]
    pub cloud_api_timeout_secs: u64,
    /// Diagnostic collection script run on the bootstrap host.
    #[ortho_config(default = DEFAULT_REMOTE_SCRIPT.to_owned())]
    pub remote_script: String,
}

impl Default for GatherConfig {
    fn default() -> Self {
        Self {
            ssh_bin: String::from("ssh"),
            scp_bin: String::from("scp"),
            ssh_user: String::from(DEFAULT_SSH_USER),
            ssh_batch_mode: true,
            ssh_strict_host_key_checking: false,
            ssh_known_hosts_file: String::from("/dev/null"),
            ssh_connect_timeout_secs: 30,
            command_timeout_secs: 300,
            cloud_api_timeout_secs: 60,
            remote_script: String::from(DEFAULT_REMOTE_SCRIPT),
        }
    }
}

impl GatherConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("bootstrap-gather")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and configuration key that supply each value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a string is blank and
    /// [`ConfigError::InvalidValue`] when a timeout is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_text(&self.ssh_bin, "ssh_bin", "ssh executable")?;
        require_text(&self.scp_bin, "scp_bin", "scp executable")?;
        require_text(&self.ssh_user, "ssh_user", "remote user")?;
        require_text(&self.remote_script, "remote_script", "remote gather script")?;
        require_timeout(self.ssh_connect_timeout_secs, "ssh_connect_timeout_secs")?;
        require_timeout(self.command_timeout_secs, "command_timeout_secs")?;
        require_timeout(self.cloud_api_timeout_secs, "cloud_api_timeout_secs")?;
        Ok(())
    }

    /// Timeout applied to each `ssh`/`scp` invocation.
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Timeout applied to each cloud API call.
    #[must_use]
    pub const fn cloud_api_timeout(&self) -> Duration {
        Duration::from_secs(self.cloud_api_timeout_secs)
    }
}

fn require_text(value: &str, key: &str, description: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(format!(
            "missing {description}: set BOOTSTRAP_GATHER_{} or add {key} to bootstrap-gather.toml",
            key.to_uppercase()
        )));
    }
    Ok(())
}

fn require_timeout(value: u64, key: &str) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue(format!(
            "{key} must be greater than zero: set BOOTSTRAP_GATHER_{} or {key} in bootstrap-gather.toml",
            key.to_uppercase()
        )));
    }
    Ok(())
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value is present but unusable.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
