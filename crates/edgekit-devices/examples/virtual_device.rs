//! Virtual Device Example
//!
//! Runs a device service with a simulated thermostat driver:
//! 1. Config from `config.toml` (if present) and `EDGEKIT_*` variables
//! 2. A profile loaded from JSON
//! 3. An on-change auto-event plus explicit GET/PUT commands
//!
//! Run with: cargo run -p edgekit-devices --example virtual_device

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use edgekit_core::logging::{self, LogFormat};
use edgekit_core::{SdkEvent, ServiceConfig};
use edgekit_devices::{
    AutoEventConfig, CommandRequest, CommandResult, DeviceAddress, DeviceConfig, DeviceProfile,
    DeviceService, DriverError, DriverResult, Event, ProtocolDriver, ProtocolProperties,
    ResourceRequest, Value,
};

const PROFILE: &str = r#"{
    "name": "virtual-thermostat",
    "manufacturer": "EdgeKit",
    "deviceResources": [
        { "name": "Temperature", "properties": { "valueType": "Float32", "readWrite": "R", "units": "C" } },
        { "name": "SetPoint", "properties": { "valueType": "Float32", "minimum": 5, "maximum": 35, "defaultValue": "21" } },
        { "name": "Heating", "properties": { "valueType": "Bool", "readWrite": "R" } }
    ],
    "deviceCommands": [
        { "name": "Climate", "readWrite": "R", "resourceOperations": [
            { "deviceResource": "Temperature" },
            { "deviceResource": "Heating", "mappings": { "true": "on", "false": "off" } }
        ] }
    ]
}"#;

/// Room that drifts toward its set point.
struct VirtualThermostat {
    rooms: Mutex<HashMap<String, (f32, f32)>>,
}

#[async_trait]
impl ProtocolDriver for VirtualThermostat {
    fn name(&self) -> &str {
        "virtual"
    }

    fn create_address(&self, device: &str, _protocols: &ProtocolProperties) -> DriverResult<DeviceAddress> {
        self.rooms.lock().entry(device.to_string()).or_insert((18.0, 21.0));
        Ok(Arc::new(device.to_string()))
    }

    async fn handle_get(
        &self,
        _device: &str,
        address: &DeviceAddress,
        requests: &[ResourceRequest],
    ) -> DriverResult<Vec<CommandResult>> {
        let room = address
            .downcast_ref::<String>()
            .ok_or_else(|| DriverError::Address("unexpected address type".into()))?;
        let mut rooms = self.rooms.lock();
        let (temperature, set_point) = rooms
            .get_mut(room)
            .ok_or_else(|| DriverError::Communication(format!("room {} is offline", room)))?;
        *temperature += (*set_point - *temperature).clamp(-0.5, 0.5);

        requests
            .iter()
            .map(|r| match r.resource.as_str() {
                "Temperature" => Ok(CommandResult::new(Value::Float32(*temperature))),
                "SetPoint" => Ok(CommandResult::new(Value::Float32(*set_point))),
                "Heating" => Ok(CommandResult::new(*temperature < *set_point)),
                other => Err(DriverError::NotSupported(other.to_string())),
            })
            .collect()
    }

    async fn handle_put(
        &self,
        _device: &str,
        address: &DeviceAddress,
        requests: &[ResourceRequest],
        values: &[Value],
    ) -> DriverResult<()> {
        let room = address
            .downcast_ref::<String>()
            .ok_or_else(|| DriverError::Address("unexpected address type".into()))?;
        let mut rooms = self.rooms.lock();
        let Some(state) = rooms.get_mut(room) else {
            return Err(DriverError::Communication(format!("room {} is offline", room)));
        };
        for (request, value) in requests.iter().zip(values) {
            match (request.resource.as_str(), value) {
                ("SetPoint", Value::Float32(v)) => state.1 = *v,
                (other, _) => return Err(DriverError::NotSupported(other.to_string())),
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(LogFormat::from_env());

    let config = ServiceConfig::load("config.toml")?;
    let driver = Arc::new(VirtualThermostat {
        rooms: Mutex::new(HashMap::new()),
    });
    let service = DeviceService::new(config, driver);

    let profile: DeviceProfile = serde_json::from_str(PROFILE)?;
    service.add_profile(profile)?;
    service
        .add_device(
            DeviceConfig::new("living-room", "virtual-thermostat")
                .with_auto_event(AutoEventConfig::new("Climate", "2s").on_change()),
        )
        .await?;

    let mut readings = service.event_bus().readings();
    tokio::spawn(async move {
        while let Some((event, _)) = readings.recv().await {
            if let SdkEvent::DeviceReadings {
                content_type,
                payload,
                ..
            } = event
            {
                match Event::decode(&content_type, &payload) {
                    Ok(event) => {
                        for r in &event.readings {
                            println!(
                                "{} {} = {}",
                                r.device_name,
                                r.resource_name,
                                r.value.as_deref().unwrap_or("-")
                            );
                        }
                    }
                    Err(e) => eprintln!("undecodable event: {}", e),
                }
            }
        }
    });

    service.start().await?;

    let reply = service
        .execute(CommandRequest::put("living-room", "SetPoint").with_param("SetPoint", "24"))
        .await;
    println!("PUT SetPoint: {} {}", reply.status.http_code(), reply.message);

    let reply = service
        .execute(CommandRequest::put("living-room", "SetPoint").with_param("SetPoint", "50"))
        .await;
    println!("PUT SetPoint out of range: {} {}", reply.status.http_code(), reply.message);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = tokio::time::sleep(Duration::from_secs(20)) => {}
    }

    let metrics = service.metrics();
    println!(
        "events sent: {}, readings sent: {}, reads: {}",
        metrics.events_sent, metrics.readings_sent, metrics.read_commands_executed
    );
    service.stop(false).await;
    Ok(())
}
