//! Shared fixtures for the device service integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use edgekit_core::ServiceConfig;
use edgekit_devices::{
    AutoEventHandle, AutoEventHooks, CommandResult, DeviceAddress, DeviceCommand, DeviceConfig,
    DeviceProfile, DeviceResource, DeviceService, DriverError, DriverResult, ProtocolDriver,
    ProtocolProperties, ReadWrite, ResourceOperation, ResourceProperties, ResourceRequest, Value,
    ValueType,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// How the mock answers reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    Normal,
    /// Fail with a communication error
    Failing,
    /// Return one result fewer than requested
    ShortResults,
    /// Report a broken readings contract
    AssertionFailure,
}

/// One auto-event schedule started through the driver hooks.
#[derive(Debug, Clone, PartialEq)]
pub struct StartedSchedule {
    pub device: String,
    pub source: String,
    pub interval: Duration,
    pub on_change: bool,
}

#[derive(Default)]
pub struct RecordingHooks {
    started: Mutex<Vec<StartedSchedule>>,
    stopped: AtomicUsize,
}

impl RecordingHooks {
    pub fn started(&self) -> Vec<StartedSchedule> {
        self.started.lock().clone()
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl AutoEventHooks for RecordingHooks {
    fn start(
        &self,
        device: &str,
        _protocols: &ProtocolProperties,
        source: &str,
        _requests: &[ResourceRequest],
        interval: Duration,
        on_change: bool,
    ) -> DriverResult<AutoEventHandle> {
        let mut started = self.started.lock();
        started.push(StartedSchedule {
            device: device.to_string(),
            source: source.to_string(),
            interval,
            on_change,
        });
        Ok(Box::new(started.len()))
    }

    fn stop(&self, _handle: AutoEventHandle) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory driver that serves resource values from a table and records
/// every call it receives.
pub struct RecordingDriver {
    values: Mutex<HashMap<String, Value>>,
    mode: Mutex<ReadMode>,
    put_failing: AtomicBool,
    gets: AtomicUsize,
    puts: Mutex<Vec<Vec<(String, Value)>>>,
    added: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
    hooks: Option<RecordingHooks>,
}

impl Default for RecordingDriver {
    fn default() -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
            mode: Mutex::new(ReadMode::Normal),
            put_failing: AtomicBool::new(false),
            gets: AtomicUsize::new(0),
            puts: Mutex::new(Vec::new()),
            added: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            hooks: None,
        }
    }
}

impl RecordingDriver {
    /// Driver that schedules auto-events itself.
    pub fn with_hooks() -> Self {
        Self {
            hooks: Some(RecordingHooks::default()),
            ..Default::default()
        }
    }

    pub fn set_value(&self, resource: &str, value: impl Into<Value>) {
        self.values.lock().insert(resource.to_string(), value.into());
    }

    pub fn value(&self, resource: &str) -> Option<Value> {
        self.values.lock().get(resource).cloned()
    }

    pub fn set_mode(&self, mode: ReadMode) {
        *self.mode.lock() = mode;
    }

    pub fn set_put_failing(&self, failing: bool) {
        self.put_failing.store(failing, Ordering::SeqCst);
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn puts(&self) -> Vec<Vec<(String, Value)>> {
        self.puts.lock().clone()
    }

    pub fn added(&self) -> Vec<String> {
        self.added.lock().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().clone()
    }

    pub fn hooks(&self) -> Option<&RecordingHooks> {
        self.hooks.as_ref()
    }
}

#[async_trait]
impl ProtocolDriver for RecordingDriver {
    fn name(&self) -> &str {
        "recording"
    }

    fn create_address(
        &self,
        device: &str,
        protocols: &ProtocolProperties,
    ) -> DriverResult<DeviceAddress> {
        let host = protocols
            .get("virtual")
            .and_then(|p| p.get("Host"))
            .cloned()
            .unwrap_or_else(|| device.to_string());
        Ok(Arc::new(host))
    }

    fn validate_address(&self, protocols: &ProtocolProperties) -> DriverResult<()> {
        match protocols.get("virtual").and_then(|p| p.get("Host")) {
            Some(host) if host.is_empty() => Err(DriverError::Address("empty host".into())),
            _ => Ok(()),
        }
    }

    async fn handle_get(
        &self,
        _device: &str,
        _address: &DeviceAddress,
        requests: &[ResourceRequest],
    ) -> DriverResult<Vec<CommandResult>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let mode = *self.mode.lock();
        match mode {
            ReadMode::Failing => return Err(DriverError::Communication("no response".into())),
            ReadMode::AssertionFailure => {
                return Err(DriverError::AssertionFailed("register map mismatch".into()))
            }
            _ => {}
        }

        let values = self.values.lock();
        let mut results: Vec<CommandResult> = requests
            .iter()
            .map(|r| CommandResult::new(values.get(&r.resource).cloned().unwrap_or(Value::Int32(0))))
            .collect();
        if mode == ReadMode::ShortResults {
            results.pop();
        }
        Ok(results)
    }

    async fn handle_put(
        &self,
        _device: &str,
        _address: &DeviceAddress,
        requests: &[ResourceRequest],
        values: &[Value],
    ) -> DriverResult<()> {
        if self.put_failing.load(Ordering::SeqCst) {
            return Err(DriverError::Exception {
                code: 4,
                reason: "slave device failure".into(),
            });
        }
        let written: Vec<(String, Value)> = requests
            .iter()
            .zip(values)
            .map(|(r, v)| (r.resource.clone(), v.clone()))
            .collect();
        let mut table = self.values.lock();
        for (resource, value) in &written {
            table.insert(resource.clone(), value.clone());
        }
        self.puts.lock().push(written);
        Ok(())
    }

    fn autoevent_hooks(&self) -> Option<&dyn AutoEventHooks> {
        self.hooks.as_ref().map(|h| h as &dyn AutoEventHooks)
    }

    async fn device_added(&self, device: &str, _protocols: &ProtocolProperties) {
        self.added.lock().push(device.to_string());
    }

    async fn device_removed(&self, device: &str) {
        self.removed.lock().push(device.to_string());
    }
}

/// Thermostat profile used across the tests.
///
/// - `Temperature` Int32, read-only
/// - `SetPoint` Float64, 40..100, scaled by 0.5 on the wire
/// - `Status` Uint16 with mask 0x00F0
/// - `Mode` Uint8, exposed through the `Mode` command with mappings
/// - `Firmware` String, read-only
/// - `Secret` String, write-only
pub fn thermostat_profile() -> DeviceProfile {
    DeviceProfile::new("thermostat")
        .with_manufacturer("Acme")
        .with_resource(DeviceResource::new(
            "Temperature",
            ResourceProperties::new(ValueType::Int32)
                .read_only()
                .with_units("F"),
        ))
        .with_resource(DeviceResource::new(
            "SetPoint",
            ResourceProperties::new(ValueType::Float64)
                .with_range(40.0, 100.0)
                .with_scale(0.5)
                .with_default("68"),
        ))
        .with_resource(DeviceResource::new(
            "Status",
            ResourceProperties::new(ValueType::Uint16).with_mask(0x00F0),
        ))
        .with_resource(DeviceResource::new(
            "Mode",
            ResourceProperties::new(ValueType::Uint8),
        ))
        .with_resource(DeviceResource::new(
            "Firmware",
            ResourceProperties::new(ValueType::String).read_only(),
        ))
        .with_resource(DeviceResource::new(
            "Secret",
            ResourceProperties::new(ValueType::String).write_only(),
        ))
        .with_command(
            DeviceCommand::new("Mode", ReadWrite::ReadWrite).with_operation(
                ResourceOperation::new("Mode")
                    .with_mapping("0", "Off")
                    .with_mapping("1", "Cool")
                    .with_mapping("2", "Heat"),
            ),
        )
        .with_command(
            DeviceCommand::new("Climate", ReadWrite::ReadWrite)
                .with_operation(ResourceOperation::new("Temperature"))
                .with_operation(ResourceOperation::new("SetPoint")),
        )
        .with_command(
            DeviceCommand::new("Provision", ReadWrite::ReadWrite)
                .with_operation(ResourceOperation::new("SetPoint"))
                .with_operation(ResourceOperation::new("Secret")),
        )
}

pub fn thermostat(name: &str) -> DeviceConfig {
    DeviceConfig::new(name, "thermostat").with_protocol(
        "virtual",
        HashMap::from([("Host".to_string(), format!("{}.local", name))]),
    )
}

pub fn test_config() -> ServiceConfig {
    ServiceConfig {
        service_name: "device-virtual".to_string(),
        ..Default::default()
    }
}

/// Service with the thermostat profile and one device, `therm1`.
pub async fn service_with(
    config: ServiceConfig,
    driver: Arc<RecordingDriver>,
) -> DeviceService {
    init_tracing();
    let service = DeviceService::new(config, driver);
    service
        .add_profile(thermostat_profile())
        .expect("profile is valid");
    service
        .add_device(thermostat("therm1"))
        .await
        .expect("device is valid");
    service
}
