//! Core types for the EdgeKit device SDK runtime.
//!
//! This crate holds the pieces shared by every EdgeKit service:
//! - the event bus and the events that flow through it
//! - service configuration loading
//! - logging bootstrap
//! - the unified core error type

pub mod config;
pub mod error;
pub mod event;
pub mod eventbus;
pub mod logging;

pub use config::ServiceConfig;
pub use error::{Error, Result};
pub use event::{EventMetadata, MetricsSnapshot, OperatingState, SdkEvent};
pub use eventbus::{
    DEFAULT_CHANNEL_CAPACITY, EventBus, EventBusReceiver, FilteredReceiver, SharedEventBus,
};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::ServiceConfig;
    pub use crate::error::{Error, Result};
    pub use crate::event::{EventMetadata, OperatingState, SdkEvent};
    pub use crate::eventbus::{EventBus, SharedEventBus};
}
