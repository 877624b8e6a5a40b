//! Cooked events: readings packaged for publication.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use edgekit_core::{Error, Result, SdkEvent};

use crate::codec;
use crate::profile::ResourceProperties;
use crate::value::{Value, ValueType};

/// Content type of JSON-encoded events.
pub const CONTENT_TYPE_JSON: &str = "application/json";
/// Content type of bincode-encoded events.
pub const CONTENT_TYPE_BINARY: &str = "application/octet-stream";

/// Current time in nanoseconds since the Unix epoch.
pub fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

/// One resource value inside an event.
///
/// Exactly one of `value`, `binary_value` and `object_value` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub id: String,
    pub origin: i64,
    pub device_name: String,
    pub resource_name: String,
    pub profile_name: String,
    pub value_type: ValueType,
    pub value: Option<String>,
    pub binary_value: Option<Vec<u8>>,
    pub media_type: Option<String>,
    pub object_value: Option<serde_json::Value>,
    pub units: Option<String>,
    pub tags: HashMap<String, String>,
}

impl Reading {
    /// Build a reading from a (transformed) value.
    pub fn new(
        device_name: &str,
        profile_name: &str,
        resource_name: &str,
        value: &Value,
        origin: i64,
        props: &ResourceProperties,
    ) -> Self {
        let mut reading = Self {
            id: uuid::Uuid::new_v4().to_string(),
            origin,
            device_name: device_name.to_string(),
            resource_name: resource_name.to_string(),
            profile_name: profile_name.to_string(),
            value_type: value.value_type(),
            value: None,
            binary_value: None,
            media_type: None,
            object_value: None,
            units: props.units.clone(),
            tags: HashMap::new(),
        };
        match value {
            Value::Binary(bytes) => {
                reading.binary_value = Some(bytes.clone());
                reading.media_type = props.media_type.clone();
            }
            Value::Object(map) => {
                reading.object_value = Some(serde_json::Value::Object(map.clone()));
            }
            other => reading.value = Some(codec::encode(other)),
        }
        reading
    }

    pub fn with_tags(mut self, tags: HashMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn is_binary(&self) -> bool {
        self.binary_value.is_some()
    }
}

/// A set of readings taken together from one device by one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub device_name: String,
    pub profile_name: String,
    pub source_name: String,
    pub origin: i64,
    pub readings: Vec<Reading>,
    pub tags: HashMap<String, String>,
}

impl Event {
    pub fn new(device_name: &str, profile_name: &str, source_name: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            device_name: device_name.to_string(),
            profile_name: profile_name.to_string(),
            source_name: source_name.to_string(),
            origin: now_nanos(),
            readings: Vec::new(),
            tags: HashMap::new(),
        }
    }

    pub fn has_binary(&self) -> bool {
        self.readings.iter().any(Reading::is_binary)
    }

    /// Decode an event payload published on the bus.
    pub fn decode(content_type: &str, payload: &[u8]) -> Result<Self> {
        match content_type {
            CONTENT_TYPE_JSON => Ok(serde_json::from_slice(payload)?),
            CONTENT_TYPE_BINARY => {
                bincode::deserialize(payload).map_err(|e| Error::Serialization(e.to_string()))
            }
            other => Err(Error::Serialization(format!(
                "unsupported event content type {}",
                other
            ))),
        }
    }
}

/// Wire encoding of a cooked event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventEncoding {
    Json,
    Binary,
}

impl EventEncoding {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Json => CONTENT_TYPE_JSON,
            Self::Binary => CONTENT_TYPE_BINARY,
        }
    }
}

/// An event plus its encoded form, ready to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct CookedEvent {
    pub device_name: String,
    pub profile_name: String,
    pub source_name: String,
    pub reading_count: usize,
    pub encoding: EventEncoding,
    pub payload: Vec<u8>,
    pub event: Event,
}

impl CookedEvent {
    /// Encode `event`: JSON unless any reading is binary.
    pub fn encode(event: Event) -> Result<Self> {
        let (encoding, payload) = if event.has_binary() {
            let payload =
                bincode::serialize(&event).map_err(|e| Error::Serialization(e.to_string()))?;
            (EventEncoding::Binary, payload)
        } else {
            (EventEncoding::Json, serde_json::to_vec(&event)?)
        };

        Ok(Self {
            device_name: event.device_name.clone(),
            profile_name: event.profile_name.clone(),
            source_name: event.source_name.clone(),
            reading_count: event.readings.len(),
            encoding,
            payload,
            event,
        })
    }

    /// Encoded size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Bus form of this event.
    pub fn to_sdk_event(&self) -> SdkEvent {
        SdkEvent::DeviceReadings {
            device_name: self.device_name.clone(),
            profile_name: self.profile_name.clone(),
            source_name: self.source_name.clone(),
            reading_count: self.reading_count,
            content_type: self.encoding.content_type().to_string(),
            payload: self.payload.clone(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}
