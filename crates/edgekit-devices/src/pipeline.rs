//! Command pipeline: authorize, build driver input, invoke the driver, cook
//! the results and report the outcome to the operational-state engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

use edgekit_core::ServiceConfig;

use crate::codec;
use crate::collaborators::{EventPublisher, MetadataClient, ServiceMetrics};
use crate::command::CommandInfo;
use crate::driver::{DeviceAddress, DriverError, ProtocolDriver};
use crate::error::CommandError;
use crate::event::{CookedEvent, Event, Reading};
use crate::opstate::OperationalStateEngine;
use crate::registry::{Device, DeviceRegistry};
use crate::service_types::{Method, ParamValue};
use crate::transform::{self, TransformEngine};
use crate::value::{CommandResult, Value};

/// Limits and switches of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub data_transform: bool,
    /// 0 disables the ceiling
    pub max_cmd_ops: usize,
    pub max_event_size: Option<usize>,
    pub update_last_connected: bool,
}

impl From<&ServiceConfig> for PipelineSettings {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            data_transform: config.data_transform,
            max_cmd_ops: config.max_cmd_ops,
            max_event_size: config.max_event_size_bytes(),
            update_last_connected: config.update_last_connected,
        }
    }
}

pub struct CommandPipeline {
    registry: Arc<DeviceRegistry>,
    driver: Arc<dyn ProtocolDriver>,
    transforms: Arc<dyn TransformEngine>,
    publisher: Arc<dyn EventPublisher>,
    metadata: Arc<dyn MetadataClient>,
    opstate: Arc<OperationalStateEngine>,
    metrics: Arc<ServiceMetrics>,
    settings: PipelineSettings,
    service_locked: AtomicBool,
}

impl CommandPipeline {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        driver: Arc<dyn ProtocolDriver>,
        transforms: Arc<dyn TransformEngine>,
        publisher: Arc<dyn EventPublisher>,
        metadata: Arc<dyn MetadataClient>,
        opstate: Arc<OperationalStateEngine>,
        metrics: Arc<ServiceMetrics>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            registry,
            driver,
            transforms,
            publisher,
            metadata,
            opstate,
            metrics,
            settings,
            service_locked: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn set_service_locked(&self, locked: bool) {
        self.service_locked.store(locked, Ordering::SeqCst);
    }

    pub fn is_service_locked(&self) -> bool {
        self.service_locked.load(Ordering::SeqCst)
    }

    /// Checks shared by every entry point, in order: service lock, device,
    /// command, direction, device lock, device down, operation ceiling.
    pub fn authorize(
        &self,
        device_name: &str,
        command: &str,
        method: Method,
    ) -> Result<(Arc<Device>, Arc<CommandInfo>), CommandError> {
        if self.is_service_locked() {
            return Err(CommandError::ServiceLocked);
        }

        let device = self
            .registry
            .device(device_name)
            .ok_or_else(|| CommandError::DeviceNotFound(device_name.to_string()))?;

        let profile = device.profile();
        let driver = self.driver.as_ref();
        let Some(info) = profile.resolve(driver, command, method.is_get()) else {
            return Err(if profile.has_command(driver, command) {
                CommandError::WrongDirection {
                    command: command.to_string(),
                    method: method.to_string(),
                }
            } else {
                CommandError::CommandNotFound {
                    device: device_name.to_string(),
                    command: command.to_string(),
                }
            });
        };

        if device.is_locked() {
            return Err(CommandError::DeviceLocked(device_name.to_string()));
        }
        if device.is_down() {
            return Err(CommandError::DeviceDown(device_name.to_string()));
        }

        let max = self.settings.max_cmd_ops;
        if max > 0 && info.len() > max {
            return Err(CommandError::OperationCeilingExceeded {
                command: command.to_string(),
                count: info.len(),
                max,
            });
        }

        Ok((device, info))
    }

    /// Run a GET and return the cooked event. Publishing is up to the
    /// caller.
    pub async fn get(&self, device_name: &str, command: &str) -> Result<CookedEvent, CommandError> {
        let (device, info) = self.authorize(device_name, command, Method::Get)?;

        if let Some(idx) = info.properties.iter().position(|p| !p.read_write.readable()) {
            return Err(CommandError::ResourceNotReadable(
                info.requests[idx].resource.clone(),
            ));
        }

        self.read_core(&device, &info).await.map(|(_, event)| event)
    }

    /// Read and cook. Used by GET and by auto-events; the raw results are
    /// returned too for change detection.
    pub async fn read_core(
        &self,
        device: &Device,
        info: &CommandInfo,
    ) -> Result<(Vec<CommandResult>, CookedEvent), CommandError> {
        let results = self.read_raw(device, info).await?;
        let event = self.cook(device, info, results.clone())?;
        Ok((results, event))
    }

    /// Driver round-trip of a GET, with health reporting.
    pub async fn read_raw(
        &self,
        device: &Device,
        info: &CommandInfo,
    ) -> Result<Vec<CommandResult>, CommandError> {
        let address = self.address(device).await?;
        let outcome = self
            .driver
            .handle_get(device.name(), &address, &info.requests)
            .await;

        let results = match outcome {
            Ok(results) => results,
            Err(e) => return Err(self.driver_failed(device, &info.name, e)),
        };

        if results.len() != info.requests.len() {
            let reason = format!(
                "{} results for {} requests",
                results.len(),
                info.requests.len()
            );
            return Err(self.invariant_violated(device, &info.name, reason));
        }

        self.opstate.report_success(device);
        self.metrics.record_read_command();
        self.touch_last_connected(device.name());
        Ok(results)
    }

    /// Turn raw results into a cooked event, enforcing the size limit.
    pub fn cook(
        &self,
        device: &Device,
        info: &CommandInfo,
        results: Vec<CommandResult>,
    ) -> Result<CookedEvent, CommandError> {
        let mut event = Event::new(device.name(), &info.profile_name, &info.name);

        for (i, result) in results.into_iter().enumerate() {
            let request = &info.requests[i];
            let props = &info.properties[i];

            let mut value = result.value;
            if let Some(mask) = request.mask {
                value = mask.read_value(&value).unwrap_or(value);
            }
            if self.settings.data_transform {
                value = self.transforms.apply_outgoing(props, value).map_err(|e| {
                    warn!(device = %device.name(), resource = %request.resource, error = %e, "Outgoing transform failed");
                    CommandError::ReadingTransform {
                        resource: request.resource.clone(),
                        reason: e.to_string(),
                    }
                })?;
            }
            let value = transform::map_reading(&info.mappings[i], value);

            let origin = result.origin.unwrap_or(event.origin);
            event.readings.push(
                Reading::new(
                    device.name(),
                    &info.profile_name,
                    &request.resource,
                    &value,
                    origin,
                    props,
                )
                .with_tags(result.tags),
            );
        }

        let cooked = CookedEvent::encode(event)
            .map_err(|e| CommandError::EventEncoding(e.to_string()))?;

        if let Some(max) = self.settings.max_event_size {
            if cooked.size() > max {
                warn!(
                    device = %device.name(),
                    command = %info.name,
                    size = cooked.size(),
                    max,
                    "Event exceeds size limit, dropped"
                );
                return Err(CommandError::EventTooLarge {
                    size: cooked.size(),
                    max,
                });
            }
        }
        Ok(cooked)
    }

    /// Run a PUT.
    pub async fn put(
        &self,
        device_name: &str,
        command: &str,
        params: &HashMap<String, ParamValue>,
    ) -> Result<(), CommandError> {
        let (device, info) = self.authorize(device_name, command, Method::Put)?;
        let mut values = self.build_values(&info, params)?;

        let address = self.address(&device).await?;

        for (i, request) in info.requests.iter().enumerate() {
            let Some(mask) = request.mask else {
                continue;
            };
            let current = self
                .driver
                .handle_get(device.name(), &address, std::slice::from_ref(request))
                .await
                .map_err(|e| self.driver_failed(&device, &info.name, e))?;
            let [current] = current.as_slice() else {
                let reason = format!(
                    "{} results for masked read of {}",
                    current.len(),
                    request.resource
                );
                return Err(self.invariant_violated(&device, &info.name, reason));
            };
            match mask.merge_values(&current.value, &values[i]) {
                Some(merged) => values[i] = merged,
                None => {
                    let reason = format!(
                        "masked read of {} returned a non-integer value",
                        request.resource
                    );
                    self.opstate.report_failure(&device, &reason);
                    return Err(CommandError::DriverFailure {
                        device: device_name.to_string(),
                        reason,
                    });
                }
            }
        }

        if let Err(e) = self
            .driver
            .handle_put(device.name(), &address, &info.requests, &values)
            .await
        {
            return Err(self.driver_failed(&device, &info.name, e));
        }

        debug!(device = %device_name, command = %command, values = values.len(), "Command executed");
        self.opstate.report_success(&device);
        self.touch_last_connected(device.name());
        Ok(())
    }

    /// Decode, validate and transform every PUT value before the driver is
    /// involved.
    fn build_values(
        &self,
        info: &CommandInfo,
        params: &HashMap<String, ParamValue>,
    ) -> Result<Vec<Value>, CommandError> {
        let mut values = Vec::with_capacity(info.requests.len());

        for (i, request) in info.requests.iter().enumerate() {
            let props = &info.properties[i];
            let resource = &request.resource;
            if !props.read_write.writable() {
                return Err(CommandError::ResourceNotWritable(resource.clone()));
            }

            let value = match params.get(resource) {
                Some(ParamValue::Binary(bytes)) => codec::decode_binary(&request.value_type, bytes)
                    .ok_or_else(|| CommandError::ValueDecode {
                        resource: resource.clone(),
                        raw: None,
                    })?,
                Some(ParamValue::Text(raw)) => self.decode_text(info, i, raw)?,
                None => {
                    let default = info.defaults[i]
                        .as_ref()
                        .or(props.default_value.as_ref())
                        .ok_or_else(|| CommandError::MissingValue(resource.clone()))?;
                    self.decode_text(info, i, default)?
                }
            };

            let value = if self.settings.data_transform {
                if !self.transforms.validate_range(props, &value) {
                    return Err(CommandError::ValueOutOfRange {
                        resource: resource.clone(),
                        value: codec::encode(&value),
                    });
                }
                self.transforms
                    .apply_incoming(props, value)
                    .map_err(|_| CommandError::ValueOverflow(resource.clone()))?
            } else {
                value
            };
            values.push(value);
        }
        Ok(values)
    }

    fn decode_text(&self, info: &CommandInfo, i: usize, raw: &str) -> Result<Value, CommandError> {
        let request = &info.requests[i];
        let unmapped = transform::unmap_parameter(&info.mappings[i], raw);
        codec::decode(&request.value_type, &unmapped).ok_or_else(|| CommandError::ValueDecode {
            resource: request.resource.clone(),
            raw: Some(raw.to_string()),
        })
    }

    /// Cook and publish readings a driver pushed on its own.
    pub fn post_readings(
        &self,
        device_name: &str,
        source: &str,
        results: Vec<CommandResult>,
    ) -> Result<CookedEvent, CommandError> {
        let device = self
            .registry
            .device(device_name)
            .ok_or_else(|| CommandError::DeviceNotFound(device_name.to_string()))?;
        if device.is_locked() {
            return Err(CommandError::DeviceLocked(device_name.to_string()));
        }

        let info = device
            .profile()
            .resolve(self.driver.as_ref(), source, true)
            .ok_or_else(|| CommandError::CommandNotFound {
                device: device_name.to_string(),
                command: source.to_string(),
            })?;

        if results.len() != info.requests.len() {
            let reason = format!(
                "{} pushed results for {} requests",
                results.len(),
                info.requests.len()
            );
            return Err(self.invariant_violated(&device, source, reason));
        }

        let event = self.cook(&device, &info, results)?;
        self.publish(&event);
        Ok(event)
    }

    pub fn publish(&self, event: &CookedEvent) {
        self.publisher.publish(event);
    }

    async fn address(&self, device: &Device) -> Result<DeviceAddress, CommandError> {
        match device.address(self.driver.as_ref()).await {
            Ok(address) => Ok(address),
            Err(e) => {
                error!(device = %device.name(), error = %e.to_log_json(), "Failed to create device address");
                self.opstate.report_failure(device, &e.to_string());
                Err(CommandError::AddressResolution {
                    device: device.name().to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    fn driver_failed(&self, device: &Device, command: &str, e: DriverError) -> CommandError {
        if let DriverError::AssertionFailed(reason) = e {
            return self.invariant_violated(device, command, reason);
        }
        error!(
            device = %device.name(),
            command = %command,
            error = %e.to_log_json(),
            "Driver call failed"
        );
        self.opstate.report_failure(device, &e.to_string());
        CommandError::DriverFailure {
            device: device.name().to_string(),
            reason: e.to_string(),
        }
    }

    fn invariant_violated(&self, device: &Device, command: &str, reason: String) -> CommandError {
        error!(device = %device.name(), command = %command, reason = %reason, "Driver violated the readings contract");
        self.opstate.force_down(device, &reason);
        CommandError::DriverInvariantViolation {
            device: device.name().to_string(),
            reason,
        }
    }

    fn touch_last_connected(&self, device: &str) {
        if !self.settings.update_last_connected {
            return;
        }
        let metadata = self.metadata.clone();
        let device = device.to_string();
        tokio::spawn(async move {
            let now = chrono::Utc::now().timestamp_millis();
            if let Err(e) = metadata.update_last_connected(&device, now).await {
                warn!(device = %device, error = %e, "Failed to update last connected time");
            }
        });
    }
}
