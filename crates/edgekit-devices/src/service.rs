//! Device Service - the facade a driver author runs.
//!
//! The service wires the registry, the command pipeline, the auto-event
//! manager and the operational-state engine together and exposes:
//! - profile and device management
//! - the legacy per-device command surface and the generic op surface
//! - auto-event control and health reporting for drivers
//! - periodic metrics telemetry on the event bus

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use edgekit_core::{EventBus, MetricsSnapshot, SdkEvent, ServiceConfig, SharedEventBus};

use crate::autoevent::{AutoEventManager, AutoEventRecord};
use crate::collaborators::{BusPublisher, EventPublisher, MetadataClient, NoopMetadata, ServiceMetrics};
use crate::driver::ProtocolDriver;
use crate::error::{CommandError, DeviceError};
use crate::event::CookedEvent;
use crate::opstate::OperationalStateEngine;
use crate::pipeline::{CommandPipeline, PipelineSettings};
use crate::profile::DeviceProfile;
use crate::registry::{AdminState, Device, DeviceConfig, DeviceRegistry};
use crate::service_types::{
    CommandReply, CommandRequest, Method, ParamValue, MSG_EXECUTED,
    MSG_NEITHER_PUBLISHED_NOR_RETURNED, MSG_PUBLISHED_NOT_RETURNED,
};
use crate::timer::{self, TimerControl, TimerLifecycle};
use crate::transform::{DefaultTransforms, TransformEngine};
use crate::value::CommandResult;

/// Builder for [`DeviceService`]. Every collaborator has a default.
pub struct DeviceServiceBuilder {
    config: ServiceConfig,
    driver: Arc<dyn ProtocolDriver>,
    bus: Option<SharedEventBus>,
    metadata: Option<Arc<dyn MetadataClient>>,
    transforms: Option<Arc<dyn TransformEngine>>,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl DeviceServiceBuilder {
    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn event_bus(mut self, bus: SharedEventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn metadata(mut self, metadata: Arc<dyn MetadataClient>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn transforms(mut self, transforms: Arc<dyn TransformEngine>) -> Self {
        self.transforms = Some(transforms);
        self
    }

    /// Replace the default bus publisher.
    pub fn publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn build(self) -> DeviceService {
        let config = self.config;
        let bus = self.bus.unwrap_or_else(|| {
            Arc::new(EventBus::with_capacity(config.event_bus_capacity).named(config.service_name.clone()))
        });
        let metadata = self.metadata.unwrap_or_else(|| Arc::new(NoopMetadata));
        let transforms = self
            .transforms
            .unwrap_or_else(|| Arc::new(DefaultTransforms));
        let metrics = Arc::new(ServiceMetrics::new());
        let publisher = self.publisher.unwrap_or_else(|| {
            Arc::new(BusPublisher::new(
                bus.clone(),
                metrics.clone(),
                config.service_name.clone(),
            ))
        });

        let registry = Arc::new(DeviceRegistry::new());
        let opstate = OperationalStateEngine::new(
            registry.clone(),
            self.driver.clone(),
            bus.clone(),
            metadata.clone(),
            config.allowed_fails,
            config.device_down_timeout(),
        );
        let pipeline = Arc::new(CommandPipeline::new(
            registry.clone(),
            self.driver.clone(),
            transforms,
            publisher,
            metadata,
            opstate.clone(),
            metrics.clone(),
            PipelineSettings::from(&config),
        ));
        let autoevents = AutoEventManager::new(registry.clone(), self.driver.clone(), pipeline.clone());

        DeviceService {
            config,
            registry,
            driver: self.driver,
            bus,
            metrics,
            pipeline,
            opstate,
            autoevents,
            metrics_timer: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }
}

/// A device service for one protocol driver.
pub struct DeviceService {
    config: ServiceConfig,
    registry: Arc<DeviceRegistry>,
    driver: Arc<dyn ProtocolDriver>,
    bus: SharedEventBus,
    metrics: Arc<ServiceMetrics>,
    pipeline: Arc<CommandPipeline>,
    opstate: Arc<OperationalStateEngine>,
    autoevents: AutoEventManager,
    metrics_timer: Mutex<Option<TimerLifecycle>>,
    running: AtomicBool,
}

impl DeviceService {
    pub fn builder(driver: Arc<dyn ProtocolDriver>) -> DeviceServiceBuilder {
        DeviceServiceBuilder {
            config: ServiceConfig::default(),
            driver,
            bus: None,
            metadata: None,
            transforms: None,
            publisher: None,
        }
    }

    /// Service with default collaborators.
    pub fn new(config: ServiceConfig, driver: Arc<dyn ProtocolDriver>) -> Self {
        Self::builder(driver).config(config).build()
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn event_bus(&self) -> &SharedEventBus {
        &self.bus
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Initialize the driver and start auto-events of every known device.
    pub async fn start(&self) -> Result<(), DeviceError> {
        self.driver.initialize().await?;

        for device in self.registry.devices() {
            self.autoevents.start(device.name());
        }
        self.start_metrics_task();
        self.running.store(true, Ordering::SeqCst);

        info!(
            service = %self.config.service_name,
            driver = self.driver.name(),
            devices = self.registry.device_count(),
            "Device service started"
        );
        Ok(())
    }

    /// Stop every timer and shut the driver down.
    pub async fn stop(&self, force: bool) {
        self.running.store(false, Ordering::SeqCst);
        self.autoevents.stop_all();
        self.opstate.stop_all();
        if let Some(timer) = self.metrics_timer.lock().take() {
            timer.retire();
        }
        self.driver.stop(force).await;
        info!(service = %self.config.service_name, force, "Device service stopped");
    }

    fn start_metrics_task(&self) {
        let Some(interval) = self.config.metrics_interval() else {
            return;
        };
        let bus = self.bus.clone();
        let metrics = self.metrics.clone();
        let service_name = self.config.service_name.clone();
        let timer = timer::spawn_periodic(interval, move || {
            let bus = bus.clone();
            let snapshot = metrics.snapshot();
            let service_name = service_name.clone();
            async move {
                info!(
                    service = %service_name,
                    events_sent = snapshot.events_sent,
                    readings_sent = snapshot.readings_sent,
                    read_commands_executed = snapshot.read_commands_executed,
                    "Service metrics"
                );
                bus.publish_with_source(
                    SdkEvent::ServiceMetrics {
                        service_name: service_name.clone(),
                        metrics: snapshot,
                        timestamp: chrono::Utc::now().timestamp(),
                    },
                    service_name,
                );
                TimerControl::Continue
            }
        });
        if let Some(previous) = self.metrics_timer.lock().replace(timer) {
            previous.retire();
        }
    }

    // ========== Profiles & devices ==========

    pub fn add_profile(&self, profile: DeviceProfile) -> Result<Arc<DeviceProfile>, DeviceError> {
        let profile = self.registry.add_profile(profile)?;
        info!(profile = %profile.name, resources = profile.device_resources.len(), "Profile added");
        Ok(profile)
    }

    pub fn remove_profile(&self, name: &str) -> Result<(), DeviceError> {
        self.registry.remove_profile(name)?;
        info!(profile = %name, "Profile removed");
        Ok(())
    }

    pub fn device(&self, name: &str) -> Option<Arc<Device>> {
        self.registry.device(name)
    }

    pub async fn add_device(&self, config: DeviceConfig) -> Result<Arc<Device>, DeviceError> {
        if config.name.trim().is_empty() {
            return Err(DeviceError::InvalidDevice("device name is empty".into()));
        }
        let profile = self
            .registry
            .profile(&config.profile_name)
            .ok_or_else(|| DeviceError::NotFound(format!("profile {}", config.profile_name)))?;
        self.driver.validate_address(&config.protocols)?;

        let device = self.registry.insert_device(Device::new(
            config,
            profile,
            self.config.allowed_fails,
        ))?;
        info!(device = %device.name(), profile = %device.profile().name, "Device added");

        self.bus.publish_with_source(
            SdkEvent::DeviceAdded {
                device_name: device.name().to_string(),
                profile_name: device.profile().name.clone(),
                timestamp: chrono::Utc::now().timestamp(),
            },
            self.config.service_name.clone(),
        );
        self.driver
            .device_added(device.name(), device.protocols())
            .await;
        if self.is_running() {
            self.autoevents.start(device.name());
        }
        Ok(device)
    }

    /// Replace a device's configuration. Health state carries over; the
    /// driver address is recreated on next use.
    pub async fn update_device(&self, config: DeviceConfig) -> Result<Arc<Device>, DeviceError> {
        let old = self
            .registry
            .device(&config.name)
            .ok_or_else(|| DeviceError::NotFound(format!("device {}", config.name)))?;
        let profile = self
            .registry
            .profile(&config.profile_name)
            .ok_or_else(|| DeviceError::NotFound(format!("profile {}", config.profile_name)))?;
        self.driver.validate_address(&config.protocols)?;

        let device = self
            .registry
            .replace_device(Device::with_state(config, profile, old.state()))?;
        info!(device = %device.name(), "Device updated");

        self.driver
            .device_updated(device.name(), device.protocols())
            .await;
        if self.is_running() {
            self.autoevents.start(device.name());
        }
        Ok(device)
    }

    pub async fn remove_device(&self, name: &str) -> Result<(), DeviceError> {
        self.autoevents.stop(name);
        self.opstate.cancel_probe(name);
        self.registry
            .remove_device(name)
            .ok_or_else(|| DeviceError::NotFound(format!("device {}", name)))?;
        info!(device = %name, "Device removed");

        self.bus.publish_with_source(
            SdkEvent::DeviceRemoved {
                device_name: name.to_string(),
                timestamp: chrono::Utc::now().timestamp(),
            },
            self.config.service_name.clone(),
        );
        self.driver.device_removed(name).await;
        Ok(())
    }

    pub fn set_admin_state(&self, name: &str, state: AdminState) -> Result<(), DeviceError> {
        let device = self
            .registry
            .device(name)
            .ok_or_else(|| DeviceError::NotFound(format!("device {}", name)))?;
        device.set_admin_state(state);
        info!(device = %name, state = %state, "Admin state changed");
        Ok(())
    }

    pub fn set_service_admin_state(&self, state: AdminState) {
        self.pipeline.set_service_locked(state == AdminState::Locked);
        info!(service = %self.config.service_name, state = %state, "Service admin state changed");
    }

    // ========== Commands ==========

    /// Per-device command surface. A GET returns its event in the reply and
    /// never publishes it.
    pub async fn device_command(
        &self,
        device: &str,
        command: &str,
        method: Method,
        params: &HashMap<String, ParamValue>,
    ) -> CommandReply {
        let reply = match method {
            Method::Get => match self.pipeline.get(device, command).await {
                Ok(event) => CommandReply::ok("", Some(event)),
                Err(e) => CommandReply::from(e),
            },
            Method::Put => match self.pipeline.put(device, command, params).await {
                Ok(()) => CommandReply::ok(MSG_EXECUTED, None),
                Err(e) => CommandReply::from(e),
            },
        };
        log_reply(device, command, method, &reply);
        reply
    }

    /// Generic op/command surface.
    pub async fn execute(&self, request: CommandRequest) -> CommandReply {
        let CommandRequest {
            op,
            device,
            command,
            query,
            params,
        } = request;

        let reply = match op {
            Method::Get => match self.pipeline.get(&device, &command).await {
                Ok(event) => {
                    if query.push_event {
                        self.pipeline.publish(&event);
                    }
                    match (query.push_event, query.return_event) {
                        (_, true) => CommandReply::ok("", Some(event)),
                        (true, false) => CommandReply::ok(MSG_PUBLISHED_NOT_RETURNED, None),
                        (false, false) => CommandReply::ok(MSG_NEITHER_PUBLISHED_NOR_RETURNED, None),
                    }
                }
                Err(e) => CommandReply::from(e),
            },
            Method::Put => match self.pipeline.put(&device, &command, &params).await {
                Ok(()) => CommandReply::ok(MSG_EXECUTED, None),
                Err(e) => CommandReply::from(e),
            },
        };
        log_reply(&device, &command, op, &reply);
        reply
    }

    // ========== Auto-events ==========

    pub fn start_autoevents(&self, device: &str) {
        self.autoevents.start(device);
    }

    pub fn stop_autoevents(&self, device: &str) {
        self.autoevents.stop(device);
    }

    pub fn autoevents(&self, device: &str) -> Vec<Arc<AutoEventRecord>> {
        self.autoevents.records(device)
    }

    // ========== Driver callbacks ==========

    /// Driver-observed success talking to a device.
    pub fn report_success(&self, device: &str) -> Result<(), DeviceError> {
        let device = self
            .registry
            .device(device)
            .ok_or_else(|| DeviceError::NotFound(format!("device {}", device)))?;
        self.opstate.report_success(&device);
        Ok(())
    }

    /// Driver-observed failure talking to a device.
    pub fn report_failure(&self, device: &str, reason: &str) -> Result<(), DeviceError> {
        let device = self
            .registry
            .device(device)
            .ok_or_else(|| DeviceError::NotFound(format!("device {}", device)))?;
        self.opstate.report_failure(&device, reason);
        Ok(())
    }

    /// Readings the driver produced on its own (e.g. from its own
    /// auto-event schedule); cooked and published like a sampled reading.
    pub fn post_readings(
        &self,
        device: &str,
        source: &str,
        results: Vec<CommandResult>,
    ) -> Result<CookedEvent, CommandError> {
        self.pipeline.post_readings(device, source, results)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

fn log_reply(device: &str, command: &str, method: Method, reply: &CommandReply) {
    if reply.is_success() {
        debug!(device = %device, command = %command, method = %method, "Command succeeded");
    } else {
        debug!(
            device = %device,
            command = %command,
            method = %method,
            status = reply.status.http_code(),
            message = %reply.message,
            "Command rejected"
        );
    }
}
