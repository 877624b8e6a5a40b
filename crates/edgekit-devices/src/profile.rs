//! Device profiles: the static resource/command template shared by devices.
//!
//! A profile declares resources (typed, readable and/or writable points on a
//! device) and commands (ordered groups of resource operations). The first
//! lookup builds the resolved command index once; see [`crate::command`].

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::error;

use crate::command::{self, CommandInfo, Direction};
use crate::driver::{DriverAttributes, ProtocolDriver};
use crate::error::DeviceError;
use crate::value::ValueType;

/// Access mode of a resource or command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReadWrite {
    #[serde(rename = "R")]
    Read,
    #[serde(rename = "W")]
    Write,
    #[default]
    #[serde(rename = "RW", alias = "WR")]
    ReadWrite,
}

impl ReadWrite {
    pub fn readable(&self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    pub fn writable(&self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }

    /// Whether this mode allows the given direction.
    pub fn allows(&self, direction: Direction) -> bool {
        match direction {
            Direction::Get => self.readable(),
            Direction::Set => self.writable(),
        }
    }
}

/// Typed properties of a device resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceProperties {
    pub value_type: ValueType,

    #[serde(default)]
    pub read_write: ReadWrite,

    /// Bit mask for partial register writes (integer types only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,

    /// Media type of binary readings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

impl ResourceProperties {
    pub fn new(value_type: ValueType) -> Self {
        Self {
            value_type,
            read_write: ReadWrite::default(),
            mask: None,
            default_value: None,
            minimum: None,
            maximum: None,
            scale: None,
            offset: None,
            base: None,
            units: None,
            media_type: None,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_write = ReadWrite::Read;
        self
    }

    pub fn write_only(mut self) -> Self {
        self.read_write = ReadWrite::Write;
        self
    }

    pub fn with_mask(mut self, mask: u64) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_range(mut self, minimum: f64, maximum: f64) -> Self {
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn with_offset(mut self, offset: f64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }
}

/// A single readable and/or writable point on a device.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceResource {
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub properties: ResourceProperties,

    /// Driver-specific attributes, parsed by the driver on first use
    #[serde(default)]
    pub attributes: serde_json::Value,

    #[serde(skip)]
    parsed: OnceLock<Option<DriverAttributes>>,
}

impl DeviceResource {
    pub fn new(name: impl Into<String>, properties: ResourceProperties) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            properties,
            attributes: serde_json::Value::Null,
            parsed: OnceLock::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_attributes(mut self, attributes: serde_json::Value) -> Self {
        self.attributes = attributes;
        self
    }

    /// Driver-parsed attributes. Parsed at most once; a failure is cached
    /// too and yields `None` on every later call.
    pub fn driver_attributes(&self, driver: &dyn ProtocolDriver) -> Option<DriverAttributes> {
        self.parsed
            .get_or_init(|| match driver.parse_attributes(&self.name, &self.attributes) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    error!(
                        resource = %self.name,
                        driver = driver.name(),
                        error = %e,
                        "Failed to parse resource attributes"
                    );
                    None
                }
            })
            .clone()
    }
}

impl fmt::Debug for DeviceResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceResource")
            .field("name", &self.name)
            .field("properties", &self.properties)
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}

/// One step of a declared command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceOperation {
    pub device_resource: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,

    /// Raw value -> presented value substitutions
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub mappings: HashMap<String, String>,
}

impl ResourceOperation {
    pub fn new(device_resource: impl Into<String>) -> Self {
        Self {
            device_resource: device_resource.into(),
            default_value: None,
            mappings: HashMap::new(),
        }
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_mapping(mut self, raw: impl Into<String>, presented: impl Into<String>) -> Self {
        self.mappings.insert(raw.into(), presented.into());
        self
    }
}

/// A named, ordered group of resource operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCommand {
    pub name: String,

    #[serde(default)]
    pub read_write: ReadWrite,

    #[serde(default)]
    pub resource_operations: Vec<ResourceOperation>,
}

impl DeviceCommand {
    pub fn new(name: impl Into<String>, read_write: ReadWrite) -> Self {
        Self {
            name: name.into(),
            read_write,
            resource_operations: Vec::new(),
        }
    }

    pub fn with_operation(mut self, operation: ResourceOperation) -> Self {
        self.resource_operations.push(operation);
        self
    }
}

/// Static template shared by every device of a kind.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceProfile {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub manufacturer: String,

    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub labels: Vec<String>,

    #[serde(default)]
    pub device_resources: Vec<DeviceResource>,

    #[serde(default)]
    pub device_commands: Vec<DeviceCommand>,

    #[serde(skip)]
    index: OnceLock<Vec<Arc<CommandInfo>>>,
}

impl DeviceProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            manufacturer: String::new(),
            model: String::new(),
            labels: Vec::new(),
            device_resources: Vec::new(),
            device_commands: Vec::new(),
            index: OnceLock::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = manufacturer.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_resource(mut self, resource: DeviceResource) -> Self {
        self.device_resources.push(resource);
        self
    }

    pub fn with_command(mut self, command: DeviceCommand) -> Self {
        self.device_commands.push(command);
        self
    }

    /// Look up a resource by name.
    pub fn resource(&self, name: &str) -> Option<&DeviceResource> {
        self.device_resources.iter().find(|r| r.name == name)
    }

    /// Structural checks done when a profile is registered.
    ///
    /// References to unknown resources are not rejected here; the affected
    /// command is dropped from the index when it is built.
    pub fn validate(&self) -> Result<(), DeviceError> {
        if self.name.trim().is_empty() {
            return Err(DeviceError::InvalidProfile("profile name is empty".into()));
        }

        let mut seen = HashSet::new();
        for resource in &self.device_resources {
            if !seen.insert(resource.name.as_str()) {
                return Err(DeviceError::InvalidProfile(format!(
                    "{}: duplicate resource {}",
                    self.name, resource.name
                )));
            }
        }

        let mut seen = HashSet::new();
        for cmd in &self.device_commands {
            if !seen.insert(cmd.name.as_str()) {
                return Err(DeviceError::InvalidProfile(format!(
                    "{}: duplicate command {}",
                    self.name, cmd.name
                )));
            }
        }
        Ok(())
    }

    /// Resolved command index, built on first use.
    pub fn commands(self: &Arc<Self>, driver: &dyn ProtocolDriver) -> &[Arc<CommandInfo>] {
        self.index
            .get_or_init(|| command::build_index(self, driver))
            .as_slice()
    }

    /// Find the command `name` in the requested direction.
    pub fn resolve(
        self: &Arc<Self>,
        driver: &dyn ProtocolDriver,
        name: &str,
        for_get: bool,
    ) -> Option<Arc<CommandInfo>> {
        let direction = Direction::from_get(for_get);
        self.commands(driver)
            .iter()
            .find(|c| c.name == name && c.direction == direction)
            .cloned()
    }

    /// Whether a command `name` exists in either direction.
    pub fn has_command(self: &Arc<Self>, driver: &dyn ProtocolDriver, name: &str) -> bool {
        self.commands(driver).iter().any(|c| c.name == name)
    }

    /// First single-resource GET command, used to probe a down device.
    pub fn probe_command(self: &Arc<Self>, driver: &dyn ProtocolDriver) -> Option<Arc<CommandInfo>> {
        self.commands(driver)
            .iter()
            .find(|c| c.direction == Direction::Get && c.requests.len() == 1)
            .cloned()
    }
}
