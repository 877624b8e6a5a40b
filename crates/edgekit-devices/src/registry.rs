//! Device and profile registry.
//!
//! The registry hands out `Arc<Device>` handles. A device removed or
//! replaced while a command is in flight stays alive until the last handle
//! is dropped.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;

use edgekit_core::OperatingState;

use crate::driver::{DeviceAddress, DriverResult, ProtocolDriver, ProtocolProperties};
use crate::error::DeviceError;
use crate::profile::DeviceProfile;

/// Administrative state set by operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AdminState {
    Locked,
    #[default]
    Unlocked,
}

impl fmt::Display for AdminState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Locked => write!(f, "LOCKED"),
            Self::Unlocked => write!(f, "UNLOCKED"),
        }
    }
}

/// Periodic sampling of one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoEventConfig {
    /// Command (or resource) to read
    pub source_name: String,
    /// Interval in humantime notation, e.g. "10s" or "500ms"
    pub interval: String,
    /// Publish only when the reading changed
    #[serde(default)]
    pub on_change: bool,
}

impl AutoEventConfig {
    pub fn new(source_name: impl Into<String>, interval: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            interval: interval.into(),
            on_change: false,
        }
    }

    pub fn on_change(mut self) -> Self {
        self.on_change = true;
        self
    }
}

/// Registration input for a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    pub name: String,
    pub profile_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub admin_state: AdminState,
    #[serde(default)]
    pub protocols: ProtocolProperties,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub auto_events: Vec<AutoEventConfig>,
}

impl DeviceConfig {
    pub fn new(name: impl Into<String>, profile_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            profile_name: profile_name.into(),
            description: String::new(),
            admin_state: AdminState::Unlocked,
            protocols: HashMap::new(),
            labels: Vec::new(),
            auto_events: Vec::new(),
        }
    }

    pub fn with_protocol(
        mut self,
        protocol: impl Into<String>,
        properties: HashMap<String, String>,
    ) -> Self {
        self.protocols.insert(protocol.into(), properties);
        self
    }

    pub fn with_auto_event(mut self, auto_event: AutoEventConfig) -> Self {
        self.auto_events.push(auto_event);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    pub fn locked(mut self) -> Self {
        self.admin_state = AdminState::Locked;
        self
    }
}

/// Mutable per-device state. All three fields change under one lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceState {
    pub admin: AdminState,
    pub operating: OperatingState,
    /// Failures left before the device is marked down
    pub remaining_fails: u32,
}

/// A registered device.
pub struct Device {
    name: String,
    description: String,
    profile: Arc<DeviceProfile>,
    protocols: ProtocolProperties,
    labels: Vec<String>,
    auto_events: Vec<AutoEventConfig>,
    state: Mutex<DeviceState>,
    address: OnceCell<DeviceAddress>,
}

impl Device {
    pub(crate) fn new(config: DeviceConfig, profile: Arc<DeviceProfile>, allowed_fails: u32) -> Self {
        Self::with_state(
            config,
            profile,
            DeviceState {
                admin: AdminState::Unlocked,
                operating: OperatingState::Up,
                remaining_fails: allowed_fails,
            },
        )
    }

    /// Build a device carrying over health from a previous incarnation.
    pub(crate) fn with_state(
        config: DeviceConfig,
        profile: Arc<DeviceProfile>,
        mut state: DeviceState,
    ) -> Self {
        state.admin = config.admin_state;
        Self {
            name: config.name,
            description: config.description,
            profile,
            protocols: config.protocols,
            labels: config.labels,
            auto_events: config.auto_events,
            state: Mutex::new(state),
            address: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn profile(&self) -> &Arc<DeviceProfile> {
        &self.profile
    }

    pub fn protocols(&self) -> &ProtocolProperties {
        &self.protocols
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn auto_events(&self) -> &[AutoEventConfig] {
        &self.auto_events
    }

    /// Snapshot of the mutable state.
    pub fn state(&self) -> DeviceState {
        *self.state.lock()
    }

    pub fn admin_state(&self) -> AdminState {
        self.state.lock().admin
    }

    pub fn operating_state(&self) -> OperatingState {
        self.state.lock().operating
    }

    pub fn is_locked(&self) -> bool {
        self.admin_state() == AdminState::Locked
    }

    pub fn is_down(&self) -> bool {
        self.operating_state() == OperatingState::Down
    }

    pub(crate) fn set_admin_state(&self, admin: AdminState) {
        self.state.lock().admin = admin;
    }

    /// Run `f` with the state lock held. Keep `f` short and never await in it.
    pub(crate) fn update_state<R>(&self, f: impl FnOnce(&mut DeviceState) -> R) -> R {
        f(&mut self.state.lock())
    }

    /// Driver address, created on first use. A failed creation is not
    /// cached, so the next access retries.
    pub async fn address(&self, driver: &dyn ProtocolDriver) -> DriverResult<DeviceAddress> {
        self.address
            .get_or_try_init(|| async { driver.create_address(&self.name, &self.protocols) })
            .await
            .cloned()
    }

    /// Registration form of this device.
    pub fn to_config(&self) -> DeviceConfig {
        DeviceConfig {
            name: self.name.clone(),
            profile_name: self.profile.name.clone(),
            description: self.description.clone(),
            admin_state: self.admin_state(),
            protocols: self.protocols.clone(),
            labels: self.labels.clone(),
            auto_events: self.auto_events.clone(),
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("profile", &self.profile.name)
            .field("state", &self.state())
            .field("auto_events", &self.auto_events)
            .finish_non_exhaustive()
    }
}

/// Registry of profiles and devices owned by one service instance.
#[derive(Default)]
pub struct DeviceRegistry {
    profiles: DashMap<String, Arc<DeviceProfile>>,
    devices: DashMap<String, Arc<Device>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a profile. Profile names are unique.
    pub fn add_profile(&self, profile: DeviceProfile) -> Result<Arc<DeviceProfile>, DeviceError> {
        profile.validate()?;
        match self.profiles.entry(profile.name.clone()) {
            Entry::Occupied(_) => Err(DeviceError::AlreadyExists(profile.name)),
            Entry::Vacant(slot) => {
                let profile = Arc::new(profile);
                slot.insert(profile.clone());
                Ok(profile)
            }
        }
    }

    /// Remove a profile no device uses any more.
    pub fn remove_profile(&self, name: &str) -> Result<Arc<DeviceProfile>, DeviceError> {
        if self.devices.iter().any(|d| d.profile().name == name) {
            return Err(DeviceError::ProfileInUse(name.to_string()));
        }
        self.profiles
            .remove(name)
            .map(|(_, p)| p)
            .ok_or_else(|| DeviceError::NotFound(format!("profile {}", name)))
    }

    pub fn profile(&self, name: &str) -> Option<Arc<DeviceProfile>> {
        self.profiles.get(name).map(|p| p.value().clone())
    }

    pub fn profiles(&self) -> Vec<Arc<DeviceProfile>> {
        self.profiles.iter().map(|p| p.value().clone()).collect()
    }

    /// Insert a new device. Device names are unique.
    pub(crate) fn insert_device(&self, device: Device) -> Result<Arc<Device>, DeviceError> {
        match self.devices.entry(device.name.clone()) {
            Entry::Occupied(_) => Err(DeviceError::AlreadyExists(device.name)),
            Entry::Vacant(slot) => {
                let device = Arc::new(device);
                slot.insert(device.clone());
                Ok(device)
            }
        }
    }

    /// Swap in a new incarnation of an existing device.
    pub(crate) fn replace_device(&self, device: Device) -> Result<Arc<Device>, DeviceError> {
        match self.devices.entry(device.name.clone()) {
            Entry::Vacant(_) => Err(DeviceError::NotFound(format!("device {}", device.name))),
            Entry::Occupied(mut slot) => {
                let device = Arc::new(device);
                slot.insert(device.clone());
                Ok(device)
            }
        }
    }

    pub(crate) fn remove_device(&self, name: &str) -> Option<Arc<Device>> {
        self.devices.remove(name).map(|(_, d)| d)
    }

    pub fn device(&self, name: &str) -> Option<Arc<Device>> {
        self.devices.get(name).map(|d| d.value().clone())
    }

    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.devices.iter().map(|d| d.value().clone()).collect()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn profile_count(&self) -> usize {
        self.profiles.len()
    }
}
