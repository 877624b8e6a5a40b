//! Auto-events: periodic sampling of device commands.
//!
//! Each configured auto-event gets one schedule. Drivers that expose
//! [`AutoEventHooks`](crate::driver::AutoEventHooks) own their schedules;
//! for everyone else a timer task re-runs the read pipeline.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use crate::command::CommandInfo;
use crate::driver::{AutoEventHandle, ProtocolDriver};
use crate::pipeline::CommandPipeline;
use crate::registry::{AutoEventConfig, Device, DeviceRegistry};
use crate::timer::{self, TimerControl, TimerLifecycle};
use crate::value::{same_values, CommandResult};

/// Parse an auto-event interval. Zero and unparseable intervals yield
/// `None`.
pub fn parse_interval(text: &str) -> Option<Duration> {
    match humantime::parse_duration(text.trim()) {
        Ok(d) if !d.is_zero() => Some(d),
        _ => None,
    }
}

enum Schedule {
    Timer(TimerLifecycle),
    Driver(AutoEventHandle),
}

/// One running auto-event of one device.
pub struct AutoEventRecord {
    pub device: String,
    pub source: String,
    pub interval: Duration,
    pub on_change: bool,
    snapshot: Mutex<Option<Vec<CommandResult>>>,
    schedule: Mutex<Option<Schedule>>,
}

impl AutoEventRecord {
    fn new(device: &str, config: &AutoEventConfig, interval: Duration) -> Self {
        Self {
            device: device.to_string(),
            source: config.source_name.clone(),
            interval,
            on_change: config.on_change,
            snapshot: Mutex::new(None),
            schedule: Mutex::new(None),
        }
    }

    fn matches(&self, config: &AutoEventConfig, interval: Duration) -> bool {
        self.source == config.source_name
            && self.interval == interval
            && self.on_change == config.on_change
    }

    /// Last results seen by an on-change auto-event.
    pub fn snapshot(&self) -> Option<Vec<CommandResult>> {
        self.snapshot.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        match &*self.schedule.lock() {
            Some(Schedule::Timer(t)) => !t.is_retired(),
            Some(Schedule::Driver(_)) => true,
            None => false,
        }
    }

    /// Store `results` if they differ from the snapshot. Returns whether
    /// they did.
    fn swap_if_changed(&self, results: &[CommandResult]) -> bool {
        let mut snapshot = self.snapshot.lock();
        if snapshot
            .as_deref()
            .is_some_and(|previous| same_values(previous, results))
        {
            return false;
        }
        let _previous = std::mem::replace(&mut *snapshot, Some(results.to_vec()));
        true
    }
}

pub struct AutoEventManager {
    registry: Arc<DeviceRegistry>,
    driver: Arc<dyn ProtocolDriver>,
    pipeline: Arc<CommandPipeline>,
    records: DashMap<String, Vec<Arc<AutoEventRecord>>>,
    /// Held across a whole start or stop so schedules are never orphaned.
    lifecycle: Mutex<()>,
}

impl AutoEventManager {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        driver: Arc<dyn ProtocolDriver>,
        pipeline: Arc<CommandPipeline>,
    ) -> Self {
        Self {
            registry,
            driver,
            pipeline,
            records: DashMap::new(),
            lifecycle: Mutex::new(()),
        }
    }

    /// (Re)start every auto-event configured on the device.
    pub fn start(&self, device_name: &str) {
        let Some(device) = self.registry.device(device_name) else {
            warn!(device = %device_name, "Cannot start auto-events of unknown device");
            return;
        };

        let _guard = self.lifecycle.lock();
        let previous = self
            .records
            .remove(device_name)
            .map(|(_, records)| records)
            .unwrap_or_default();
        for record in &previous {
            self.stop_record(record);
        }

        let mut records = Vec::new();
        for config in device.auto_events() {
            let Some(interval) = parse_interval(&config.interval) else {
                error!(
                    device = %device_name,
                    source = %config.source_name,
                    interval = %config.interval,
                    "Invalid auto-event interval, auto-event disabled"
                );
                continue;
            };
            let Some(info) = self.readable_command(&device, &config.source_name) else {
                continue;
            };

            let record = previous
                .iter()
                .find(|r| r.matches(config, interval))
                .cloned()
                .unwrap_or_else(|| Arc::new(AutoEventRecord::new(device_name, config, interval)));
            self.launch(&device, &record, &info);
            records.push(record);
        }

        if !records.is_empty() {
            info!(device = %device_name, count = records.len(), "Auto-events started");
            self.records.insert(device_name.to_string(), records);
        }
    }

    /// Stop and drop every auto-event of the device.
    pub fn stop(&self, device_name: &str) {
        let _guard = self.lifecycle.lock();
        if let Some((_, records)) = self.records.remove(device_name) {
            for record in &records {
                self.stop_record(record);
            }
            debug!(device = %device_name, count = records.len(), "Auto-events stopped");
        }
    }

    pub fn stop_all(&self) {
        let devices: Vec<String> = self.records.iter().map(|e| e.key().clone()).collect();
        for device in devices {
            self.stop(&device);
        }
    }

    /// Running auto-events of a device.
    pub fn records(&self, device_name: &str) -> Vec<Arc<AutoEventRecord>> {
        self.records
            .get(device_name)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    fn readable_command(&self, device: &Device, source: &str) -> Option<Arc<CommandInfo>> {
        let Some(info) = device.profile().resolve(self.driver.as_ref(), source, true) else {
            error!(
                device = %device.name(),
                source = %source,
                "Auto-event source is not a read command, auto-event disabled"
            );
            return None;
        };
        if let Some(p) = info.properties.iter().position(|p| !p.read_write.readable()) {
            error!(
                device = %device.name(),
                source = %source,
                resource = %info.requests[p].resource,
                "Auto-event source has an unreadable resource, auto-event disabled"
            );
            return None;
        }
        Some(info)
    }

    fn launch(&self, device: &Device, record: &Arc<AutoEventRecord>, info: &CommandInfo) {
        let schedule = if let Some(hooks) = self.driver.autoevent_hooks() {
            match hooks.start(
                device.name(),
                device.protocols(),
                &record.source,
                &info.requests,
                record.interval,
                record.on_change,
            ) {
                Ok(handle) => Schedule::Driver(handle),
                Err(e) => {
                    error!(device = %device.name(), source = %record.source, error = %e, "Driver failed to start auto-event");
                    return;
                }
            }
        } else {
            let pipeline = self.pipeline.clone();
            let registry = self.registry.clone();
            let driver = self.driver.clone();
            let rec = record.clone();
            Schedule::Timer(timer::spawn_periodic(record.interval, move || {
                let pipeline = pipeline.clone();
                let registry = registry.clone();
                let driver = driver.clone();
                let record = rec.clone();
                async move { fire(&pipeline, &registry, driver.as_ref(), &record).await }
            }))
        };
        *record.schedule.lock() = Some(schedule);
    }

    fn stop_record(&self, record: &AutoEventRecord) {
        let schedule = record.schedule.lock().take();
        match schedule {
            Some(Schedule::Timer(timer)) => timer.retire(),
            Some(Schedule::Driver(handle)) => {
                if let Some(hooks) = self.driver.autoevent_hooks() {
                    hooks.stop(handle);
                }
            }
            None => {}
        }
    }
}

async fn fire(
    pipeline: &CommandPipeline,
    registry: &DeviceRegistry,
    driver: &dyn ProtocolDriver,
    record: &AutoEventRecord,
) -> TimerControl {
    let Some(device) = registry.device(&record.device) else {
        debug!(device = %record.device, "Device gone, auto-event retired");
        return TimerControl::Retire;
    };
    if pipeline.is_service_locked() || device.is_locked() || device.is_down() {
        trace!(device = %record.device, source = %record.source, "Auto-event skipped");
        return TimerControl::Continue;
    }

    let Some(info) = device.profile().resolve(driver, &record.source, true) else {
        error!(device = %record.device, source = %record.source, "Auto-event source vanished, auto-event retired");
        return TimerControl::Retire;
    };

    let results = match pipeline.read_raw(&device, &info).await {
        Ok(results) => results,
        Err(e) => {
            debug!(device = %record.device, source = %record.source, error = %e, "Auto-event read failed");
            return TimerControl::Continue;
        }
    };

    if record.on_change && !record.swap_if_changed(&results) {
        trace!(device = %record.device, source = %record.source, "Reading unchanged, not published");
        return TimerControl::Continue;
    }

    match pipeline.cook(&device, &info, results) {
        Ok(event) => pipeline.publish(&event),
        Err(e) => warn!(device = %record.device, source = %record.source, error = %e, "Auto-event reading dropped"),
    }
    TimerControl::Continue
}
