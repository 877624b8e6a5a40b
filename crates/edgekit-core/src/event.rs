//! Event types for the EdgeKit event bus.
//!
//! Everything a device service announces to the outside world (cooked
//! readings, operational state changes, device lifecycle, periodic metrics)
//! is represented by [`SdkEvent`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Operating state of a device, as tracked by the health engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperatingState {
    #[default]
    Up,
    Down,
}

impl fmt::Display for OperatingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "UP"),
            Self::Down => write!(f, "DOWN"),
        }
    }
}

/// Point-in-time copy of the service counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub events_sent: u64,
    pub readings_sent: u64,
    pub read_commands_executed: u64,
}

/// Unified event type for EdgeKit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SdkEvent {
    // ========== Readings ==========
    /// A cooked event ready for transport.
    ///
    /// `payload` holds the encoded event; `content_type` tells consumers
    /// whether it is JSON text or a binary encoding.
    DeviceReadings {
        device_name: String,
        profile_name: String,
        source_name: String,
        reading_count: usize,
        content_type: String,
        payload: Vec<u8>,
        timestamp: i64,
    },

    // ========== Health ==========
    /// Device returned to operation.
    DeviceUp { device_name: String, timestamp: i64 },

    /// Device was marked down.
    DeviceDown {
        device_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        timestamp: i64,
    },

    // ========== Lifecycle ==========
    DeviceAdded {
        device_name: String,
        profile_name: String,
        timestamp: i64,
    },

    DeviceRemoved { device_name: String, timestamp: i64 },

    // ========== Telemetry ==========
    /// Periodic snapshot of service counters.
    ServiceMetrics {
        service_name: String,
        metrics: MetricsSnapshot,
        timestamp: i64,
    },
}

impl SdkEvent {
    /// Get the event type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::DeviceReadings { .. } => "DeviceReadings",
            Self::DeviceUp { .. } => "DeviceUp",
            Self::DeviceDown { .. } => "DeviceDown",
            Self::DeviceAdded { .. } => "DeviceAdded",
            Self::DeviceRemoved { .. } => "DeviceRemoved",
            Self::ServiceMetrics { .. } => "ServiceMetrics",
        }
    }

    /// Device the event refers to, if any.
    pub fn device_name(&self) -> Option<&str> {
        match self {
            Self::DeviceReadings { device_name, .. }
            | Self::DeviceUp { device_name, .. }
            | Self::DeviceDown { device_name, .. }
            | Self::DeviceAdded { device_name, .. }
            | Self::DeviceRemoved { device_name, .. } => Some(device_name),
            Self::ServiceMetrics { .. } => None,
        }
    }

    /// Check if this is a readings event.
    pub fn is_readings_event(&self) -> bool {
        matches!(self, Self::DeviceReadings { .. })
    }

    /// Check if this is an operational state event.
    pub fn is_health_event(&self) -> bool {
        matches!(self, Self::DeviceUp { .. } | Self::DeviceDown { .. })
    }
}

/// Metadata attached to every published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event ID
    pub event_id: String,
    /// Optional correlation ID (for grouping related events)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Event source (component that published)
    pub source: String,
    /// Event timestamp
    pub timestamp: i64,
}

impl EventMetadata {
    /// Create new event metadata.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            correlation_id: None,
            source: source.into(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    /// Create with a specific correlation ID.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}
