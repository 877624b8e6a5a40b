//! EdgeKit device SDK runtime.
//!
//! A protocol driver implements [`ProtocolDriver`]; the runtime turns it
//! into a managed device service:
//!
//! - **Profiles** ([`profile`], [`command`]): resources and commands, resolved
//!   once into per-direction request lists
//! - **Codec** ([`codec`], [`value`]): wire text to typed values and back
//! - **Pipeline** ([`pipeline`]): validated GET/PUT execution with event cooking
//! - **Auto-events** ([`autoevent`]): interval and on-change sampling
//! - **Operational state** ([`opstate`]): failure counting, DOWN/UP and probing
//! - **Service** ([`service`]): the facade that wires it all together
//!
//! Events leave the service through the [`edgekit_core::EventBus`].

pub mod autoevent;
pub mod codec;
pub mod collaborators;
pub mod command;
pub mod driver;
pub mod error;
pub mod event;
pub mod opstate;
pub mod pipeline;
pub mod profile;
pub mod registry;
pub mod service;
pub mod service_types; // Request/reply types of the command surfaces
pub mod timer;
pub mod transform;
pub mod value;

pub use collaborators::{BusPublisher, EventPublisher, MetadataClient, NoopMetadata, ServiceMetrics};
pub use command::{CommandInfo, Direction, ResourceRequest};
pub use driver::{
    AutoEventHandle, AutoEventHooks, DeviceAddress, DriverAttributes, DriverError, DriverResult,
    ProtocolDriver, ProtocolProperties,
};
pub use error::{CommandError, DeviceError, ReplyStatus};
pub use event::{CookedEvent, Event, EventEncoding, Reading};
pub use profile::{
    DeviceCommand, DeviceProfile, DeviceResource, ReadWrite, ResourceOperation, ResourceProperties,
};
pub use registry::{AdminState, AutoEventConfig, Device, DeviceConfig, DeviceRegistry};
pub use service::{DeviceService, DeviceServiceBuilder};
pub use service_types::{CommandReply, CommandRequest, GetQuery, Method, ParamValue};
pub use transform::{DefaultTransforms, TransformEngine};
pub use value::{CommandResult, Value, ValueType};
