//! Layered run settings
//!
//! Lowest precedence first: built-in defaults, an optional settings file,
//! `SSHFAN_*` environment variables, then command-line flags.

use crate::error::{Result, SshfanError};
use crate::models::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_DEADLINE_SECS, DEFAULT_MAX_PARALLEL,
    DEFAULT_QUEUE_CAPACITY, DEFAULT_SSH_PORT,
};
use crate::runner::RunConfig;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment overrides, e.g. `SSHFAN_TIMEOUT_SECS=30`
pub const ENV_PREFIX: &str = "SSHFAN";

/// Environment variable holding the invoking user's login name
pub const LOGIN_NAME_ENV: &str = "LOGNAME";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Settings {
    /// Remote user; falls back to LOGNAME
    #[serde(default)]
    pub user: Option<String>,
    /// Private key file; the SSH agent is used when unset
    #[serde(default)]
    pub identity: Option<PathBuf>,
    pub port: u16,
    /// Global run deadline
    pub timeout_secs: u64,
    /// Per-attempt TCP connect timeout
    pub connect_timeout_secs: u64,
    /// Worker-pool size, 0 = unbounded
    pub max_parallel: usize,
    pub queue_capacity: usize,
    /// Prefix the command with a remote hostname echo
    pub hostname_echo: bool,
}

impl Settings {
    /// Load defaults, the optional file and process environment overrides
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::load_from(file, None)
    }

    /// Like [`Settings::load`] but with an explicit environment map
    ///
    /// Values are not validated here; command-line overrides still apply on
    /// top, so callers run [`Settings::validate`] once every layer is in.
    pub fn load_from(
        file: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("port", i64::from(DEFAULT_SSH_PORT))?
            .set_default("timeout_secs", DEFAULT_DEADLINE_SECS as i64)?
            .set_default("connect_timeout_secs", DEFAULT_CONNECT_TIMEOUT_SECS as i64)?
            .set_default("max_parallel", DEFAULT_MAX_PARALLEL as i64)?
            .set_default("queue_capacity", DEFAULT_QUEUE_CAPACITY as i64)?
            .set_default("hostname_echo", true)?;

        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .source(env),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Reject values that would make a run meaningless
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(SshfanError::InvalidSetting("port cannot be 0".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(SshfanError::InvalidSetting(
                "timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.connect_timeout_secs == 0 {
            return Err(SshfanError::InvalidSetting(
                "connect_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(SshfanError::InvalidSetting(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if matches!(&self.user, Some(user) if user.is_empty()) {
            return Err(SshfanError::InvalidSetting("user cannot be empty".to_string()));
        }
        Ok(())
    }

    /// Remote user: explicit setting, else the invoking user's login name
    pub fn remote_user(&self) -> Option<String> {
        self.user
            .clone()
            .or_else(|| std::env::var(LOGIN_NAME_ENV).ok())
            .filter(|user| !user.is_empty())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Freeze the collection knobs for the runner
    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            deadline: Duration::from_secs(self.timeout_secs),
            queue_capacity: self.queue_capacity,
            max_parallel: self.max_parallel,
        }
    }
}
