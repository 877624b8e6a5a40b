//! Operational-state engine: failure counting, DOWN/UP transitions and
//! recovery probing.
//!
//! Each device starts with `allowed_fails` failures in hand. Every failed
//! command takes one; every success restores the full allowance. When the
//! last one is used the device goes DOWN, which gates further commands
//! until a probe (or any successful read) brings it back UP.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use edgekit_core::{OperatingState, SdkEvent, SharedEventBus};

use crate::collaborators::MetadataClient;
use crate::driver::ProtocolDriver;
use crate::registry::{Device, DeviceRegistry};
use crate::timer::{self, TimerControl, TimerLifecycle};

pub struct OperationalStateEngine {
    registry: Arc<DeviceRegistry>,
    driver: Arc<dyn ProtocolDriver>,
    bus: SharedEventBus,
    metadata: Arc<dyn MetadataClient>,
    allowed_fails: u32,
    down_timeout: Option<Duration>,
    probes: DashMap<String, TimerLifecycle>,
    this: Weak<Self>,
}

impl OperationalStateEngine {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        driver: Arc<dyn ProtocolDriver>,
        bus: SharedEventBus,
        metadata: Arc<dyn MetadataClient>,
        allowed_fails: u32,
        down_timeout: Option<Duration>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            registry,
            driver,
            bus,
            metadata,
            allowed_fails,
            down_timeout,
            probes: DashMap::new(),
            this: this.clone(),
        })
    }

    pub fn allowed_fails(&self) -> u32 {
        self.allowed_fails
    }

    /// Record a successful round-trip with the device.
    pub fn report_success(&self, device: &Device) {
        let allowed = self.allowed_fails;
        let came_up = device.update_state(|s| {
            s.remaining_fails = allowed;
            if s.operating == OperatingState::Down {
                s.operating = OperatingState::Up;
                true
            } else {
                false
            }
        });

        if came_up {
            self.cancel_probe(device.name());
            info!(device = %device.name(), "Device is UP");
            self.bus.publish(SdkEvent::DeviceUp {
                device_name: device.name().to_string(),
                timestamp: chrono::Utc::now().timestamp(),
            });
            self.notify_metadata(device.name(), OperatingState::Up);
        }
    }

    /// Record a failed round-trip with the device.
    pub fn report_failure(&self, device: &Device, reason: &str) {
        if self.allowed_fails == 0 {
            debug!(device = %device.name(), reason, "Command failed");
            return;
        }

        let went_down = device.update_state(|s| {
            s.remaining_fails = s.remaining_fails.saturating_sub(1);
            if s.remaining_fails == 0 && s.operating == OperatingState::Up {
                s.operating = OperatingState::Down;
                true
            } else {
                false
            }
        });

        if went_down {
            self.on_down(device, reason);
        } else {
            debug!(
                device = %device.name(),
                remaining = device.state().remaining_fails,
                reason,
                "Command failed"
            );
        }
    }

    /// Mark the device DOWN without touching its failure allowance.
    pub fn force_down(&self, device: &Device, reason: &str) {
        let went_down = device.update_state(|s| {
            if s.operating == OperatingState::Up {
                s.operating = OperatingState::Down;
                true
            } else {
                false
            }
        });
        if went_down {
            self.on_down(device, reason);
        }
    }

    fn on_down(&self, device: &Device, reason: &str) {
        warn!(device = %device.name(), reason, "Device is DOWN");
        self.bus.publish(SdkEvent::DeviceDown {
            device_name: device.name().to_string(),
            reason: Some(reason.to_string()),
            timestamp: chrono::Utc::now().timestamp(),
        });
        self.notify_metadata(device.name(), OperatingState::Down);
        self.arm_probe(device.name());
    }

    fn notify_metadata(&self, device: &str, state: OperatingState) {
        let metadata = self.metadata.clone();
        let device = device.to_string();
        tokio::spawn(async move {
            if let Err(e) = metadata.set_operational_state(&device, state).await {
                warn!(device = %device, state = %state, error = %e, "Failed to update operating state in metadata");
            }
        });
    }

    fn arm_probe(&self, device: &str) {
        let Some(delay) = self.down_timeout else {
            return;
        };
        let Some(engine) = self.this.upgrade() else {
            return;
        };

        let spawn = |name: String| {
            timer::spawn_retrying(delay, move || {
                let engine = engine.clone();
                let name = name.clone();
                async move { engine.probe(&name).await }
            })
        };

        match self.probes.entry(device.to_string()) {
            Entry::Occupied(mut slot) => {
                if slot.get().is_retired() {
                    slot.insert(spawn(device.to_string()));
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(spawn(device.to_string()));
            }
        }
        debug!(device, delay_secs = delay.as_secs(), "Recovery probe armed");
    }

    /// Retire the recovery probe of a device, if any.
    pub fn cancel_probe(&self, device: &str) {
        if let Some((_, probe)) = self.probes.remove(device) {
            probe.retire();
        }
    }

    /// Whether a live recovery probe exists for the device.
    pub fn has_probe(&self, device: &str) -> bool {
        self.probes.get(device).is_some_and(|p| !p.is_retired())
    }

    /// Retire every probe; used on shutdown.
    pub fn stop_all(&self) {
        for entry in self.probes.iter() {
            entry.value().retire();
        }
        self.probes.clear();
    }

    async fn probe(&self, name: &str) -> TimerControl {
        let Some(device) = self.registry.device(name) else {
            self.probes.remove(name);
            return TimerControl::Retire;
        };
        if !device.is_down() {
            return TimerControl::Retire;
        }

        let driver = self.driver.as_ref();
        let Some(command) = device.profile().probe_command(driver) else {
            error!(device = %name, profile = %device.profile().name, "No single-resource read command to probe with, giving up");
            return TimerControl::Retire;
        };

        let result = match device.address(driver).await {
            Ok(address) => driver.handle_get(name, &address, &command.requests).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(_) => {
                info!(device = %name, command = %command.name, "Recovery probe succeeded");
                self.report_success(&device);
                TimerControl::Retire
            }
            Err(e) => {
                debug!(device = %name, error = %e, "Recovery probe failed");
                TimerControl::Continue
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::NoopMetadata;
    use crate::driver::testing::StaticDriver;
    use crate::profile::{DeviceProfile, DeviceResource, ResourceProperties};
    use crate::registry::DeviceConfig;
    use crate::value::ValueType;
    use edgekit_core::EventBus;

    struct Fixture {
        engine: Arc<OperationalStateEngine>,
        registry: Arc<DeviceRegistry>,
        driver: Arc<StaticDriver>,
        bus: SharedEventBus,
    }

    fn fixture(allowed_fails: u32, down_timeout: Option<Duration>) -> Fixture {
        let registry = Arc::new(DeviceRegistry::new());
        let profile = registry
            .add_profile(DeviceProfile::new("thermostat").with_resource(DeviceResource::new(
                "Temperature",
                ResourceProperties::new(ValueType::Int32),
            )))
            .unwrap();
        registry
            .insert_device(Device::new(
                DeviceConfig::new("therm1", "thermostat"),
                profile,
                allowed_fails,
            ))
            .unwrap();
        let driver = Arc::new(StaticDriver::default());
        let bus = Arc::new(EventBus::new());
        let engine = OperationalStateEngine::new(
            registry.clone(),
            driver.clone(),
            bus.clone(),
            Arc::new(NoopMetadata),
            allowed_fails,
            down_timeout,
        );
        Fixture {
            engine,
            registry,
            driver,
            bus,
        }
    }

    #[tokio::test]
    async fn test_down_after_exactly_n_failures() {
        let f = fixture(3, None);
        let device = f.registry.device("therm1").unwrap();
        let mut health = f.bus.health();

        f.engine.report_failure(&device, "timeout");
        f.engine.report_failure(&device, "timeout");
        assert!(!device.is_down());
        f.engine.report_failure(&device, "timeout");
        assert!(device.is_down());

        let (event, _) = health.recv().await.unwrap();
        assert!(matches!(event, SdkEvent::DeviceDown { .. }));
    }

    #[tokio::test]
    async fn test_success_resets_allowance() {
        let f = fixture(3, None);
        let device = f.registry.device("therm1").unwrap();

        f.engine.report_failure(&device, "timeout");
        f.engine.report_failure(&device, "timeout");
        f.engine.report_success(&device);
        assert_eq!(device.state().remaining_fails, 3);
        f.engine.report_failure(&device, "timeout");
        f.engine.report_failure(&device, "timeout");
        assert!(!device.is_down());
        f.engine.report_failure(&device, "timeout");
        assert!(device.is_down());

        f.engine.report_success(&device);
        assert!(!device.is_down());
    }

    #[tokio::test]
    async fn test_zero_allowance_never_goes_down() {
        let f = fixture(0, None);
        let device = f.registry.device("therm1").unwrap();
        for _ in 0..10 {
            f.engine.report_failure(&device, "timeout");
        }
        assert!(!device.is_down());

        f.engine.force_down(&device, "assertion");
        assert!(device.is_down());
    }

    #[tokio::test]
    async fn test_force_down_keeps_counter() {
        let f = fixture(5, None);
        let device = f.registry.device("therm1").unwrap();
        f.engine.report_failure(&device, "timeout");
        f.engine.force_down(&device, "bad result count");
        let state = device.state();
        assert_eq!(state.operating, OperatingState::Down);
        assert_eq!(state.remaining_fails, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_brings_device_back_once() {
        let f = fixture(1, Some(Duration::from_secs(10)));
        let device = f.registry.device("therm1").unwrap();
        f.driver.set_failing(true);

        f.engine.report_failure(&device, "timeout");
        assert!(device.is_down());
        assert!(f.engine.has_probe("therm1"));

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(f.driver.get_count(), 2);
        assert!(device.is_down());

        f.driver.set_failing(false);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!device.is_down());
        assert_eq!(f.driver.get_count(), 3);
        assert!(!f.engine.has_probe("therm1"));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(f.driver.get_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_probe_without_timeout() {
        let f = fixture(1, None);
        let device = f.registry.device("therm1").unwrap();
        f.engine.report_failure(&device, "timeout");
        assert!(device.is_down());
        assert!(!f.engine.has_probe("therm1"));
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(f.driver.get_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_retires_when_device_removed() {
        let f = fixture(1, Some(Duration::from_secs(5)));
        let device = f.registry.device("therm1").unwrap();
        f.driver.set_failing(true);
        f.engine.report_failure(&device, "timeout");
        f.registry.remove_device("therm1");

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(f.driver.get_count(), 0);
        assert!(!f.engine.has_probe("therm1"));
    }
}
