//! Resolved command index.
//!
//! Each profile command is resolved once into a [`CommandInfo`] per
//! direction: the ordered resource requests handed to the driver plus the
//! per-resource properties, mappings and defaults the pipeline needs.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, error, warn};

use crate::codec::Mask;
use crate::driver::{DriverAttributes, ProtocolDriver};
use crate::profile::{DeviceProfile, DeviceResource, ResourceProperties};
use crate::value::ValueType;

/// Direction of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Direction {
    Get,
    Set,
}

impl Direction {
    pub fn from_get(for_get: bool) -> Self {
        if for_get { Self::Get } else { Self::Set }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Set => "SET",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One resource access handed to the driver.
#[derive(Clone)]
pub struct ResourceRequest {
    pub resource: String,
    /// Driver-parsed attributes of the resource
    pub attributes: DriverAttributes,
    pub value_type: ValueType,
    pub mask: Option<Mask>,
}

impl ResourceRequest {
    /// Downcast the parsed attributes to the driver's own type.
    pub fn attributes_as<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.attributes.downcast_ref::<T>()
    }
}

impl fmt::Debug for ResourceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRequest")
            .field("resource", &self.resource)
            .field("value_type", &self.value_type)
            .field("mask", &self.mask)
            .finish_non_exhaustive()
    }
}

/// A command resolved for one direction.
///
/// `requests`, `properties`, `mappings` and `defaults` always have the same
/// length and follow the profile's declaration order.
#[derive(Debug)]
pub struct CommandInfo {
    pub name: String,
    pub direction: Direction,
    profile: Weak<DeviceProfile>,
    pub profile_name: String,
    pub requests: Vec<ResourceRequest>,
    pub properties: Vec<ResourceProperties>,
    /// Empty map means no mapping
    pub mappings: Vec<HashMap<String, String>>,
    pub defaults: Vec<Option<String>>,
}

impl CommandInfo {
    /// Owning profile, if it is still alive.
    pub fn profile(&self) -> Option<Arc<DeviceProfile>> {
        self.profile.upgrade()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// Build the full index of a profile: declared commands first, then one
/// command per resource that no declared command of the same name shadows.
pub(crate) fn build_index(
    profile: &Arc<DeviceProfile>,
    driver: &dyn ProtocolDriver,
) -> Vec<Arc<CommandInfo>> {
    let mut index = Vec::new();
    let mut declared: HashSet<(&str, Direction)> = HashSet::new();

    for cmd in &profile.device_commands {
        for direction in [Direction::Get, Direction::Set] {
            if !cmd.read_write.allows(direction) {
                continue;
            }
            declared.insert((cmd.name.as_str(), direction));

            let mut builder = Builder::new(profile, &cmd.name, direction);
            let mut ok = true;
            for op in &cmd.resource_operations {
                let Some(resource) = profile.resource(&op.device_resource) else {
                    error!(
                        profile = %profile.name,
                        command = %cmd.name,
                        resource = %op.device_resource,
                        "Command references unknown resource, command dropped"
                    );
                    ok = false;
                    break;
                };
                if !builder.push(resource, driver, op.default_value.clone(), op.mappings.clone()) {
                    ok = false;
                    break;
                }
            }
            if ok {
                index.push(Arc::new(builder.finish()));
            }
        }
    }

    for resource in &profile.device_resources {
        for direction in [Direction::Get, Direction::Set] {
            if !resource.properties.read_write.allows(direction)
                || declared.contains(&(resource.name.as_str(), direction))
            {
                continue;
            }
            let mut builder = Builder::new(profile, &resource.name, direction);
            if builder.push(
                resource,
                driver,
                resource.properties.default_value.clone(),
                HashMap::new(),
            ) {
                index.push(Arc::new(builder.finish()));
            }
        }
    }

    debug!(profile = %profile.name, commands = index.len(), "Built command index");
    index
}

struct Builder {
    info: CommandInfo,
}

impl Builder {
    fn new(profile: &Arc<DeviceProfile>, name: &str, direction: Direction) -> Self {
        Self {
            info: CommandInfo {
                name: name.to_string(),
                direction,
                profile: Arc::downgrade(profile),
                profile_name: profile.name.clone(),
                requests: Vec::new(),
                properties: Vec::new(),
                mappings: Vec::new(),
                defaults: Vec::new(),
            },
        }
    }

    /// Append one resource. Returns false when the driver could not parse
    /// its attributes, which drops the whole command.
    fn push(
        &mut self,
        resource: &DeviceResource,
        driver: &dyn ProtocolDriver,
        default: Option<String>,
        mappings: HashMap<String, String>,
    ) -> bool {
        let Some(attributes) = resource.driver_attributes(driver) else {
            error!(
                profile = %self.info.profile_name,
                command = %self.info.name,
                resource = %resource.name,
                "Resource attributes unusable, command dropped"
            );
            return false;
        };

        let props = &resource.properties;
        let mask = match props.mask {
            Some(bits) if props.value_type.is_integer() => Some(Mask::new(bits)),
            Some(_) => {
                warn!(
                    resource = %resource.name,
                    value_type = %props.value_type,
                    "Mask ignored on non-integer resource"
                );
                None
            }
            None => None,
        };

        self.info.requests.push(ResourceRequest {
            resource: resource.name.clone(),
            attributes,
            value_type: props.value_type.clone(),
            mask,
        });
        self.info.properties.push(props.clone());
        self.info.mappings.push(mappings);
        self.info.defaults.push(default);
        true
    }

    fn finish(self) -> CommandInfo {
        self.info
    }
}
