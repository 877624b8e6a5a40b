//! Protocol driver interface.
//!
//! A driver is the protocol-specific half of a device service. It turns
//! resolved resource requests into device I/O. Everything else (command
//! resolution, validation, event cooking, scheduling and health tracking)
//! is done by the runtime.
//!
//! Driver-owned state the runtime must carry around without understanding
//! it (device addresses, parsed resource attributes, custom auto-event
//! handles) is passed as `Arc<dyn Any>` and handed back unmodified.

use async_trait::async_trait;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::command::ResourceRequest;
use crate::value::{CommandResult, Value};

/// Driver-specific device address, created once per device and cached.
pub type DeviceAddress = Arc<dyn Any + Send + Sync>;

/// Driver-specific parsed resource attributes, created once per resource.
pub type DriverAttributes = Arc<dyn Any + Send + Sync>;

/// Handle returned by a driver that schedules auto-events itself.
pub type AutoEventHandle = Box<dyn Any + Send + Sync>;

/// Protocol configuration of a device: protocol name -> properties.
pub type ProtocolProperties = HashMap<String, HashMap<String, String>>;

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Structured exception raised by a driver.
#[derive(Debug, Clone, Error, Serialize)]
pub enum DriverError {
    /// The device address could not be created from its protocol properties
    #[error("Address error: {0}")]
    Address(String),

    /// Resource attributes could not be parsed
    #[error("Attribute error: {0}")]
    Attributes(String),

    /// I/O with the device failed
    #[error("Communication error: {0}")]
    Communication(String),

    /// Protocol-level exception with a driver-defined code
    #[error("Driver exception {code}: {reason}")]
    Exception { code: i32, reason: String },

    /// The driver broke the readings/values contract (e.g. returned the
    /// wrong number of results). Treated as a fatal device condition.
    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    /// The operation is not supported by this driver
    #[error("Not supported: {0}")]
    NotSupported(String),
}

impl DriverError {
    /// Serialized form used for diagnostics.
    pub fn to_log_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.to_string())
    }
}

/// Custom auto-event scheduling supplied by a driver.
///
/// When a driver provides hooks, the runtime does not run its own timers
/// for auto-events; the driver pushes readings back through
/// `DeviceService::post_readings`.
pub trait AutoEventHooks: Send + Sync {
    /// Start sampling `source` on `device` every `interval`.
    fn start(
        &self,
        device: &str,
        protocols: &ProtocolProperties,
        source: &str,
        requests: &[ResourceRequest],
        interval: Duration,
        on_change: bool,
    ) -> DriverResult<AutoEventHandle>;

    /// Stop a schedule previously returned by `start`.
    fn stop(&self, handle: AutoEventHandle);
}

/// Protocol driver trait.
///
/// Required: address creation and the get/put handlers. Everything else has
/// a default that suits drivers without the corresponding capability.
#[async_trait]
pub trait ProtocolDriver: Send + Sync {
    /// Driver name, used in logs.
    fn name(&self) -> &str;

    /// Called once when the service starts.
    async fn initialize(&self) -> DriverResult<()> {
        Ok(())
    }

    /// Build the driver-specific address of a device.
    fn create_address(
        &self,
        device: &str,
        protocols: &ProtocolProperties,
    ) -> DriverResult<DeviceAddress>;

    /// Check protocol properties before a device is accepted.
    fn validate_address(&self, _protocols: &ProtocolProperties) -> DriverResult<()> {
        Ok(())
    }

    /// Parse the raw attributes of a resource.
    ///
    /// The default keeps the raw JSON so drivers can downcast to
    /// `serde_json::Value`.
    fn parse_attributes(
        &self,
        _resource: &str,
        attributes: &serde_json::Value,
    ) -> DriverResult<DriverAttributes> {
        Ok(Arc::new(attributes.clone()))
    }

    /// Read the requested resources. Must return exactly one result per
    /// request, in request order.
    async fn handle_get(
        &self,
        device: &str,
        address: &DeviceAddress,
        requests: &[ResourceRequest],
    ) -> DriverResult<Vec<CommandResult>>;

    /// Write `values[i]` to `requests[i]` for every request.
    async fn handle_put(
        &self,
        device: &str,
        address: &DeviceAddress,
        requests: &[ResourceRequest],
        values: &[Value],
    ) -> DriverResult<()>;

    /// Custom auto-event scheduling, if the driver has its own.
    fn autoevent_hooks(&self) -> Option<&dyn AutoEventHooks> {
        None
    }

    /// Notification: a device was added to the service.
    async fn device_added(&self, _device: &str, _protocols: &ProtocolProperties) {}

    /// Notification: a device's configuration changed.
    async fn device_updated(&self, _device: &str, _protocols: &ProtocolProperties) {}

    /// Notification: a device was removed.
    async fn device_removed(&self, _device: &str) {}

    /// Called once when the service stops.
    async fn stop(&self, _force: bool) {}
}

#[cfg(test)]
pub(crate) mod testing {
    //! Minimal driver for unit tests of the index and pipeline helpers.

    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Reads return `Int32(0)` per request unless switched to failing.
    #[derive(Default)]
    pub struct StaticDriver {
        parses: AtomicUsize,
        gets: AtomicUsize,
        failing: AtomicBool,
        reject: Vec<String>,
    }

    impl StaticDriver {
        /// Driver whose attribute parser fails for the named resources.
        pub fn rejecting(resources: &[&str]) -> Self {
            Self {
                reject: resources.iter().map(|r| r.to_string()).collect(),
                ..Default::default()
            }
        }

        pub fn parse_count(&self) -> usize {
            self.parses.load(Ordering::SeqCst)
        }

        pub fn get_count(&self) -> usize {
            self.gets.load(Ordering::SeqCst)
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ProtocolDriver for StaticDriver {
        fn name(&self) -> &str {
            "static"
        }

        fn create_address(
            &self,
            device: &str,
            _protocols: &ProtocolProperties,
        ) -> DriverResult<DeviceAddress> {
            Ok(Arc::new(device.to_string()))
        }

        fn parse_attributes(
            &self,
            resource: &str,
            attributes: &serde_json::Value,
        ) -> DriverResult<DriverAttributes> {
            self.parses.fetch_add(1, Ordering::SeqCst);
            if self.reject.iter().any(|r| r == resource) {
                return Err(DriverError::Attributes(format!("bad attributes on {}", resource)));
            }
            Ok(Arc::new(attributes.clone()))
        }

        async fn handle_get(
            &self,
            _device: &str,
            _address: &DeviceAddress,
            requests: &[ResourceRequest],
        ) -> DriverResult<Vec<CommandResult>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(DriverError::Communication("no response".into()));
            }
            Ok(requests.iter().map(|_| CommandResult::new(0)).collect())
        }

        async fn handle_put(
            &self,
            _device: &str,
            _address: &DeviceAddress,
            _requests: &[ResourceRequest],
            _values: &[Value],
        ) -> DriverResult<()> {
            Ok(())
        }
    }
}
