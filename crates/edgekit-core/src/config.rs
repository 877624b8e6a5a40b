//! Service configuration loading.
//!
//! Sources, in priority order:
//! 1. Environment variables (`EDGEKIT_*`)
//! 2. A TOML file (usually `config.toml`)
//! 3. Built-in defaults

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::config_err;
use crate::error::Result;

/// Default values.
pub mod defaults {
    pub const SERVICE_NAME: &str = "edgekit-device-service";
    pub const DATA_TRANSFORM: bool = true;
    /// 0 disables the event size limit.
    pub const MAX_EVENT_SIZE_KIB: u64 = 0;
    /// 0 disables the per-command operation ceiling.
    pub const MAX_CMD_OPS: usize = 128;
    /// 0 disables counter-driven DOWN transitions.
    pub const ALLOWED_FAILS: u32 = 0;
    /// 0 disables recovery probing.
    pub const DEVICE_DOWN_TIMEOUT_SECS: u64 = 0;
    pub const UPDATE_LAST_CONNECTED: bool = false;
    pub const EVENT_BUS_CAPACITY: usize = crate::eventbus::DEFAULT_CHANNEL_CAPACITY;
}

/// Environment variable names.
pub mod env_vars {
    pub const SERVICE_NAME: &str = "EDGEKIT_SERVICE_NAME";
    pub const DATA_TRANSFORM: &str = "EDGEKIT_DATA_TRANSFORM";
    pub const MAX_EVENT_SIZE_KIB: &str = "EDGEKIT_MAX_EVENT_SIZE_KIB";
    pub const MAX_CMD_OPS: &str = "EDGEKIT_MAX_CMD_OPS";
    pub const ALLOWED_FAILS: &str = "EDGEKIT_ALLOWED_FAILS";
    pub const DEVICE_DOWN_TIMEOUT: &str = "EDGEKIT_DEVICE_DOWN_TIMEOUT";
    pub const UPDATE_LAST_CONNECTED: &str = "EDGEKIT_UPDATE_LAST_CONNECTED";
    pub const EVENT_BUS_CAPACITY: &str = "EDGEKIT_EVENT_BUS_CAPACITY";
    pub const METRICS_INTERVAL: &str = "EDGEKIT_METRICS_INTERVAL";
    pub const LOG_JSON: &str = "EDGEKIT_LOG_JSON";
}

/// Configuration consumed by the device service runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Name the service publishes under
    pub service_name: String,
    /// Apply scale/offset/base/mapping transforms to readings and writes
    pub data_transform: bool,
    /// Maximum encoded event size in KiB
    pub max_event_size_kib: u64,
    /// Maximum number of resource operations in one command
    pub max_cmd_ops: usize,
    /// Consecutive failures tolerated before a device is marked down
    pub allowed_fails: u32,
    /// Seconds between recovery probes while a device is down
    pub device_down_timeout_secs: u64,
    /// Send last-connected updates to the metadata collaborator
    pub update_last_connected: bool,
    /// Event bus buffer size
    pub event_bus_capacity: usize,
    /// Interval for metrics telemetry (humantime string, empty disables)
    pub metrics_interval: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: defaults::SERVICE_NAME.to_string(),
            data_transform: defaults::DATA_TRANSFORM,
            max_event_size_kib: defaults::MAX_EVENT_SIZE_KIB,
            max_cmd_ops: defaults::MAX_CMD_OPS,
            allowed_fails: defaults::ALLOWED_FAILS,
            device_down_timeout_secs: defaults::DEVICE_DOWN_TIMEOUT_SECS,
            update_last_connected: defaults::UPDATE_LAST_CONNECTED,
            event_bus_capacity: defaults::EVENT_BUS_CAPACITY,
            metrics_interval: String::new(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a TOML file, falling back to defaults when the
    /// file does not exist, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            info!(category = "config", path = %path.display(), "Loading config from file");
            let content = std::fs::read_to_string(path)?;
            Self::from_toml_str(&content)?
        } else {
            info!(category = "config", "No config file found, using defaults");
            Self::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the runtime cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.service_name.trim().is_empty() {
            return Err(config_err!("service_name must not be empty"));
        }
        if self.event_bus_capacity == 0 {
            return Err(config_err!("event_bus_capacity must be at least 1"));
        }
        let interval = self.metrics_interval.trim();
        if !interval.is_empty() {
            humantime::parse_duration(interval)
                .map_err(|e| config_err!("invalid metrics_interval {:?}: {}", interval, e))?;
        }
        Ok(())
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply overrides from a key lookup (normally the process environment).
    ///
    /// Values that fail to parse are ignored with a warning.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(env_vars::SERVICE_NAME) {
            self.service_name = v;
        }
        override_parsed(&lookup, env_vars::DATA_TRANSFORM, &mut self.data_transform);
        override_parsed(&lookup, env_vars::MAX_EVENT_SIZE_KIB, &mut self.max_event_size_kib);
        override_parsed(&lookup, env_vars::MAX_CMD_OPS, &mut self.max_cmd_ops);
        override_parsed(&lookup, env_vars::ALLOWED_FAILS, &mut self.allowed_fails);
        override_parsed(
            &lookup,
            env_vars::DEVICE_DOWN_TIMEOUT,
            &mut self.device_down_timeout_secs,
        );
        override_parsed(
            &lookup,
            env_vars::UPDATE_LAST_CONNECTED,
            &mut self.update_last_connected,
        );
        override_parsed(&lookup, env_vars::EVENT_BUS_CAPACITY, &mut self.event_bus_capacity);
        if let Some(v) = lookup(env_vars::METRICS_INTERVAL) {
            self.metrics_interval = v;
        }
    }

    /// Event size limit in bytes, `None` when disabled.
    pub fn max_event_size_bytes(&self) -> Option<usize> {
        (self.max_event_size_kib > 0)
            .then(|| usize::try_from(self.max_event_size_kib).unwrap_or(usize::MAX).saturating_mul(1024))
    }

    /// Interval between recovery probes, `None` when probing is disabled.
    pub fn device_down_timeout(&self) -> Option<Duration> {
        (self.device_down_timeout_secs > 0)
            .then(|| Duration::from_secs(self.device_down_timeout_secs))
    }

    /// Metrics telemetry interval, `None` when disabled or unparseable.
    pub fn metrics_interval(&self) -> Option<Duration> {
        if self.metrics_interval.trim().is_empty() {
            return None;
        }
        match humantime::parse_duration(self.metrics_interval.trim()) {
            Ok(d) if !d.is_zero() => Some(d),
            Ok(_) => None,
            Err(e) => {
                warn!(category = "config", interval = %self.metrics_interval, error = %e, "Invalid metrics interval");
                None
            }
        }
    }
}

fn override_parsed<T, F>(lookup: &F, key: &str, target: &mut T)
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(v) => *target = v,
            Err(_) => warn!(category = "config", key, value = %raw, "Ignoring unparseable override"),
        }
    }
}
