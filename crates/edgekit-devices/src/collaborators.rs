//! Narrow interfaces to the services around the runtime: event publication,
//! the metadata service and service counters.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

use edgekit_core::{MetricsSnapshot, OperatingState, SharedEventBus};

use crate::event::CookedEvent;

/// Sink for cooked events.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: &CookedEvent);
}

/// Remote metadata service. Every call is best-effort: failures are logged
/// by the caller and never fail a command.
#[async_trait]
pub trait MetadataClient: Send + Sync {
    async fn set_operational_state(&self, device: &str, state: OperatingState) -> anyhow::Result<()>;

    /// `timestamp` is in milliseconds since the Unix epoch.
    async fn update_last_connected(&self, device: &str, timestamp: i64) -> anyhow::Result<()>;
}

/// Metadata client for services without a metadata backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetadata;

#[async_trait]
impl MetadataClient for NoopMetadata {
    async fn set_operational_state(&self, _device: &str, _state: OperatingState) -> anyhow::Result<()> {
        Ok(())
    }

    async fn update_last_connected(&self, _device: &str, _timestamp: i64) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Service counters.
#[derive(Debug, Default)]
pub struct ServiceMetrics {
    events_sent: AtomicU64,
    readings_sent: AtomicU64,
    read_commands_executed: AtomicU64,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event(&self, readings: usize) {
        self.events_sent.fetch_add(1, Ordering::Relaxed);
        self.readings_sent.fetch_add(readings as u64, Ordering::Relaxed);
    }

    pub fn record_read_command(&self) {
        self.read_commands_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_sent: self.events_sent.load(Ordering::Relaxed),
            readings_sent: self.readings_sent.load(Ordering::Relaxed),
            read_commands_executed: self.read_commands_executed.load(Ordering::Relaxed),
        }
    }
}

/// Publisher that forwards cooked events to the core event bus.
pub struct BusPublisher {
    bus: SharedEventBus,
    metrics: Arc<ServiceMetrics>,
    source: String,
}

impl BusPublisher {
    pub fn new(bus: SharedEventBus, metrics: Arc<ServiceMetrics>, source: impl Into<String>) -> Self {
        Self {
            bus,
            metrics,
            source: source.into(),
        }
    }
}

impl EventPublisher for BusPublisher {
    fn publish(&self, event: &CookedEvent) {
        let delivered = self
            .bus
            .publish_with_source(event.to_sdk_event(), self.source.clone());
        self.metrics.record_event(event.reading_count);
        trace!(
            device = %event.device_name,
            source = %event.source_name,
            readings = event.reading_count,
            delivered,
            "Published event"
        );
    }
}
