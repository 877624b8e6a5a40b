//! Request and reply types of the command entry points.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::command::Direction;
use crate::error::{CommandError, ReplyStatus};
use crate::event::CookedEvent;

/// Reply message of a GET that published its event without returning it.
pub const MSG_PUBLISHED_NOT_RETURNED: &str = "Event published; reading not returned";
/// Reply message of a GET whose event was neither published nor returned.
pub const MSG_NEITHER_PUBLISHED_NOR_RETURNED: &str =
    "Command executed; reading neither published nor returned";
/// Reply message of a successful PUT.
pub const MSG_EXECUTED: &str = "Command executed";

/// Command method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Put,
}

impl Method {
    pub fn is_get(&self) -> bool {
        matches!(self, Self::Get)
    }

    pub fn direction(&self) -> Direction {
        Direction::from_get(self.is_get())
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Put => write!(f, "PUT"),
        }
    }
}

/// Query flags of a GET on the generic surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetQuery {
    /// Publish the event on the bus
    #[serde(default)]
    pub push_event: bool,
    /// Return the event in the reply
    #[serde(default = "default_return_event")]
    pub return_event: bool,
}

fn default_return_event() -> bool {
    true
}

impl Default for GetQuery {
    fn default() -> Self {
        Self {
            push_event: false,
            return_event: true,
        }
    }
}

/// Value of one PUT parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    /// Wire text, decoded according to the resource type
    Text(String),
    /// Raw bytes for binary resources
    Binary(Vec<u8>),
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<u8>> for ParamValue {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

/// Turn a JSON request body into PUT parameters. Strings are taken as-is;
/// any other JSON value is passed on in its JSON text form.
pub fn params_from_json(body: &serde_json::Value) -> HashMap<String, ParamValue> {
    let Some(map) = body.as_object() else {
        return HashMap::new();
    };
    map.iter()
        .map(|(k, v)| {
            let text = match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), ParamValue::Text(text))
        })
        .collect()
}

/// Request on the generic op/command surface.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub op: Method,
    pub device: String,
    pub command: String,
    pub query: GetQuery,
    pub params: HashMap<String, ParamValue>,
}

impl CommandRequest {
    pub fn get(device: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            op: Method::Get,
            device: device.into(),
            command: command.into(),
            query: GetQuery::default(),
            params: HashMap::new(),
        }
    }

    pub fn put(device: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            op: Method::Put,
            ..Self::get(device, command)
        }
    }

    pub fn with_query(mut self, push_event: bool, return_event: bool) -> Self {
        self.query = GetQuery {
            push_event,
            return_event,
        };
        self
    }

    pub fn with_param(mut self, resource: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(resource.into(), value.into());
        self
    }
}

/// Outcome of a command, whatever the entry point.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandReply {
    pub status: ReplyStatus,
    pub message: String,
    pub event: Option<CookedEvent>,
}

impl CommandReply {
    pub fn ok(message: impl Into<String>, event: Option<CookedEvent>) -> Self {
        Self {
            status: ReplyStatus::Ok,
            message: message.into(),
            event,
        }
    }

    pub fn error(err: &CommandError) -> Self {
        Self {
            status: err.status(),
            message: err.to_string(),
            event: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

impl From<CommandError> for CommandReply {
    fn from(err: CommandError) -> Self {
        Self::error(&err)
    }
}
