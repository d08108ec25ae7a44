//! Session configuration.
//!
//! All durations are plain seconds so that a JSON file reads naturally:
//!
//! ```json
//! { "server_address": "coordinator:9092", "max_retries": 5, "heartbeat_interval": 15.0 }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use corelib::constants::*;
use retry::{HealthGatedWaiter, RetryInvoker};
use serde::{Deserialize, Serialize};

use crate::error::FleetError;
use crate::retrying::fleet_retry_invoker;
use crate::session::SessionSettings;
use crate::transfer::PullOptions;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub server_address: String,
    /// Plaintext channel. When unset, insecure iff no root certificates.
    pub insecure: Option<bool>,
    /// PEM file with the root certificates to trust.
    pub root_certificates: Option<PathBuf>,
    /// Retries after the first attempt; `None` retries forever.
    pub max_retries: Option<u32>,
    /// Seconds; `None` retries forever.
    pub max_wait_time: Option<f64>,
    pub max_retry_delay: f64,
    pub heartbeat_interval: f64,
    pub heartbeat_call_timeout: f64,
    pub max_concurrent_pulls: usize,
    pub max_concurrent_pushes: usize,
    pub pull_max_time: Option<f64>,
    pub pull_max_tries_per_object: Option<u32>,
    pub pull_initial_backoff: f64,
    pub pull_backoff_cap: f64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            server_address: "0.0.0.0:9092".to_string(),
            insecure: None,
            root_certificates: None,
            max_retries: None,
            max_wait_time: None,
            max_retry_delay: MAX_RETRY_DELAY.as_secs_f64(),
            heartbeat_interval: HEARTBEAT_DEFAULT_INTERVAL.as_secs_f64(),
            heartbeat_call_timeout: HEARTBEAT_CALL_TIMEOUT.as_secs_f64(),
            max_concurrent_pulls: MAX_CONCURRENT_PULLS,
            max_concurrent_pushes: MAX_CONCURRENT_PUSHES,
            pull_max_time: Some(PULL_MAX_TIME.as_secs_f64()),
            pull_max_tries_per_object: Some(PULL_MAX_TRIES_PER_OBJECT),
            pull_initial_backoff: PULL_INITIAL_BACKOFF.as_secs_f64(),
            pull_backoff_cap: PULL_BACKOFF_CAP.as_secs_f64(),
        }
    }
}

impl ConnectionConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_address.trim().is_empty() {
            return Err(invalid("server_address must not be empty"));
        }
        if self.insecure == Some(true) && self.root_certificates.is_some() {
            return Err(invalid("insecure channel cannot use root certificates"));
        }
        if self.max_concurrent_pulls == 0 || self.max_concurrent_pushes == 0 {
            return Err(invalid("concurrency limits must be at least 1"));
        }
        seconds("heartbeat_interval", self.heartbeat_interval, false)?;
        seconds("heartbeat_call_timeout", self.heartbeat_call_timeout, false)?;
        seconds("max_retry_delay", self.max_retry_delay, false)?;
        seconds("pull_initial_backoff", self.pull_initial_backoff, false)?;
        seconds("pull_backoff_cap", self.pull_backoff_cap, false)?;
        if let Some(max_wait_time) = self.max_wait_time {
            seconds("max_wait_time", max_wait_time, true)?;
        }
        if let Some(pull_max_time) = self.pull_max_time {
            seconds("pull_max_time", pull_max_time, true)?;
        }
        Ok(())
    }

    pub fn resolved_insecure(&self) -> bool {
        self.insecure
            .unwrap_or(self.root_certificates.is_none())
    }

    /// Read the configured root certificates, if any.
    pub fn load_root_certificates(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        let Some(path) = &self.root_certificates else {
            return Ok(None);
        };
        std::fs::read(path)
            .map(Some)
            .map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })
    }

    /// `max_retries` counts retries; the invoker bounds attempts.
    pub fn max_tries(&self) -> Option<u32> {
        self.max_retries.map(|retries| retries.saturating_add(1))
    }

    /// The Fleet API retry invoker for these settings, sharing `waiter`.
    pub fn retry_invoker(
        &self,
        waiter: &Arc<HealthGatedWaiter>,
    ) -> Result<RetryInvoker<FleetError>, ConfigError> {
        self.validate()?;
        let max_time = self.max_wait_time.map(Duration::from_secs_f64);
        Ok(fleet_retry_invoker(
            Duration::from_secs_f64(self.max_retry_delay),
            self.max_tries(),
            max_time,
            waiter,
        ))
    }

    pub fn session_settings(&self) -> Result<SessionSettings, ConfigError> {
        self.validate()?;
        Ok(SessionSettings {
            heartbeat_interval: Duration::from_secs_f64(self.heartbeat_interval),
            heartbeat_call_timeout: Duration::from_secs_f64(self.heartbeat_call_timeout),
        })
    }

    pub fn pull_options(&self) -> Result<PullOptions, ConfigError> {
        self.validate()?;
        Ok(PullOptions {
            max_concurrent: self.max_concurrent_pulls,
            max_time: self.pull_max_time.map(Duration::from_secs_f64),
            max_tries_per_object: self.pull_max_tries_per_object,
            initial_backoff: Duration::from_secs_f64(self.pull_initial_backoff),
            backoff_cap: Duration::from_secs_f64(self.pull_backoff_cap),
        })
    }
}

fn invalid(reason: &str) -> ConfigError {
    ConfigError::Invalid(reason.to_string())
}

/// Finite, non-negative, and positive unless `allow_zero`.
fn seconds(name: &str, value: f64, allow_zero: bool) -> Result<(), ConfigError> {
    let ok = value.is_finite() && value >= 0.0 && (allow_zero || value > 0.0);
    if ok && Duration::try_from_secs_f64(value).is_ok() {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{name} must be a {} number of seconds, got {value}",
            if allow_zero { "non-negative" } else { "positive" }
        )))
    }
}
