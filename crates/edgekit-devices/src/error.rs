//! Error types for device management and command execution.

use thiserror::Error;

use crate::driver::DriverError;

/// Errors from device and profile management operations.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Device or profile not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Device or profile already registered
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Profile definition is unusable
    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    /// Device configuration is unusable
    #[error("Invalid device: {0}")]
    InvalidDevice(String),

    /// Profile still referenced by devices
    #[error("Profile in use: {0}")]
    ProfileInUse(String),

    /// Driver rejected the operation
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),
}

/// Status classification carried by every command reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ReplyStatus {
    Ok,
    BadRequest,
    NotFound,
    MethodNotAllowed,
    /// Service or device locked, or device down
    Locked,
    ServerError,
}

impl ReplyStatus {
    /// HTTP status code an HTTP front-end should use.
    pub fn http_code(&self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::MethodNotAllowed => 405,
            Self::Locked => 423,
            Self::ServerError => 500,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Every way a command invocation can fail.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("Service is locked")]
    ServiceLocked,

    #[error("Device {0} not found")]
    DeviceNotFound(String),

    #[error("No such command {command} for device {device}")]
    CommandNotFound { device: String, command: String },

    #[error("Wrong method for command {command}: {method} is not supported")]
    WrongDirection { command: String, method: String },

    #[error("Device {0} is locked")]
    DeviceLocked(String),

    #[error("Device {0} is down")]
    DeviceDown(String),

    #[error("Command {command} has {count} operations, exceeding the maximum of {max}")]
    OperationCeilingExceeded {
        command: String,
        count: usize,
        max: usize,
    },

    #[error("Resource {0} is not readable")]
    ResourceNotReadable(String),

    #[error("Resource {0} is not writable")]
    ResourceNotWritable(String),

    #[error("No value given for resource {0} and no default is defined")]
    MissingValue(String),

    #[error("Unable to parse value {} for resource {resource}", .raw.as_deref().map(|r| format!("'{}'", r)).unwrap_or_else(|| "(binary)".to_string()))]
    ValueDecode {
        resource: String,
        raw: Option<String>,
    },

    #[error("Value {value} for resource {resource} is out of range")]
    ValueOutOfRange { resource: String, value: String },

    #[error("Value for resource {0} overflows its type after transformation")]
    ValueOverflow(String),

    #[error("Reading for resource {resource} could not be transformed: {reason}")]
    ReadingTransform { resource: String, reason: String },

    #[error("Unable to resolve address for device {device}: {reason}")]
    AddressResolution { device: String, reason: String },

    #[error("Driver for device {device} failed: {reason}")]
    DriverFailure { device: String, reason: String },

    #[error("Driver for device {device} violated the readings contract: {reason}")]
    DriverInvariantViolation { device: String, reason: String },

    #[error("Event size {size} bytes exceeds configured maximum of {max} bytes")]
    EventTooLarge { size: usize, max: usize },

    #[error("Failed to encode event: {0}")]
    EventEncoding(String),
}

impl CommandError {
    /// Status classification for the reply.
    pub fn status(&self) -> ReplyStatus {
        match self {
            Self::ServiceLocked | Self::DeviceLocked(_) | Self::DeviceDown(_) => {
                ReplyStatus::Locked
            }
            Self::DeviceNotFound(_) | Self::CommandNotFound { .. } => ReplyStatus::NotFound,
            Self::WrongDirection { .. }
            | Self::ResourceNotReadable(_)
            | Self::ResourceNotWritable(_) => ReplyStatus::MethodNotAllowed,
            Self::OperationCeilingExceeded { .. }
            | Self::MissingValue(_)
            | Self::ValueDecode { .. }
            | Self::ValueOutOfRange { .. }
            | Self::ValueOverflow(_) => ReplyStatus::BadRequest,
            Self::AddressResolution { .. }
            | Self::ReadingTransform { .. }
            | Self::DriverFailure { .. }
            | Self::DriverInvariantViolation { .. }
            | Self::EventTooLarge { .. }
            | Self::EventEncoding(_) => ReplyStatus::ServerError,
        }
    }
}
