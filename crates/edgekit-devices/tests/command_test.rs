//! End-to-end command tests against the recording driver.
//!
//! Run with: cargo test -p edgekit-devices --test command_test

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::{service_with, test_config, thermostat, RecordingDriver};
use edgekit_core::{SdkEvent, ServiceConfig};
use edgekit_devices::event::{CONTENT_TYPE_BINARY, CONTENT_TYPE_JSON};
use edgekit_devices::service_types::{
    MSG_EXECUTED, MSG_NEITHER_PUBLISHED_NOR_RETURNED, MSG_PUBLISHED_NOT_RETURNED,
};
use edgekit_devices::{
    AdminState, CommandError, CommandRequest, CommandResult, DeviceProfile, DeviceResource,
    DeviceService, Event, Method, ParamValue, ReplyStatus, ResourceProperties, Value, ValueType,
};

fn no_params() -> HashMap<String, ParamValue> {
    HashMap::new()
}

#[tokio::test]
async fn test_get_single_resource_publishes_on_request() {
    let driver = Arc::new(RecordingDriver::default());
    driver.set_value("Temperature", 72);
    let service = service_with(test_config(), driver.clone()).await;
    let mut readings = service.event_bus().readings();

    let reply = service
        .execute(CommandRequest::get("therm1", "Temperature").with_query(true, true))
        .await;
    assert_eq!(reply.status, ReplyStatus::Ok);
    let event = reply.event.expect("event returned");
    assert_eq!(event.reading_count, 1);
    assert_eq!(event.event.source_name, "Temperature");
    assert_eq!(event.event.readings[0].value.as_deref(), Some("72"));
    assert_eq!(event.event.readings[0].units.as_deref(), Some("F"));
    assert_eq!(event.event.readings[0].value_type, ValueType::Int32);

    let (published, metadata) = readings.try_recv().expect("event published");
    assert_eq!(metadata.source, "device-virtual");
    match published {
        SdkEvent::DeviceReadings {
            device_name,
            content_type,
            payload,
            ..
        } => {
            assert_eq!(device_name, "therm1");
            assert_eq!(content_type, CONTENT_TYPE_JSON);
            let decoded = Event::decode(&content_type, &payload).unwrap();
            assert_eq!(decoded.readings[0].value.as_deref(), Some("72"));
        }
        other => panic!("unexpected event {:?}", other),
    }

    let metrics = service.metrics();
    assert_eq!(metrics.read_commands_executed, 1);
    assert_eq!(metrics.events_sent, 1);
    assert_eq!(metrics.readings_sent, 1);
}

#[tokio::test]
async fn test_query_flags() {
    let driver = Arc::new(RecordingDriver::default());
    let service = service_with(test_config(), driver.clone()).await;
    let mut readings = service.event_bus().readings();

    let reply = service
        .execute(CommandRequest::get("therm1", "Temperature"))
        .await;
    assert!(reply.event.is_some());
    assert!(readings.try_recv().is_none());

    let reply = service
        .execute(CommandRequest::get("therm1", "Temperature").with_query(true, false))
        .await;
    assert_eq!(reply.status, ReplyStatus::Ok);
    assert_eq!(reply.message, MSG_PUBLISHED_NOT_RETURNED);
    assert!(reply.event.is_none());
    assert!(readings.try_recv().is_some());

    let reply = service
        .execute(CommandRequest::get("therm1", "Temperature").with_query(false, false))
        .await;
    assert_eq!(reply.message, MSG_NEITHER_PUBLISHED_NOR_RETURNED);
    assert!(reply.event.is_none());
    assert!(readings.try_recv().is_none());
    assert_eq!(driver.get_count(), 3);
}

#[tokio::test]
async fn test_legacy_get_never_publishes() {
    let driver = Arc::new(RecordingDriver::default());
    let service = service_with(test_config(), driver.clone()).await;
    let mut readings = service.event_bus().readings();

    let reply = service
        .device_command("therm1", "Climate", Method::Get, &no_params())
        .await;
    assert!(reply.is_success());
    let event = reply.event.unwrap();
    let names: Vec<_> = event
        .event
        .readings
        .iter()
        .map(|r| r.resource_name.as_str())
        .collect();
    assert_eq!(names, ["Temperature", "SetPoint"]);
    assert!(readings.try_recv().is_none());
}

#[tokio::test]
async fn test_locked_device_is_rejected_without_driver_call() {
    let driver = Arc::new(RecordingDriver::default());
    let mut config = test_config();
    config.allowed_fails = 3;
    let service = service_with(config, driver.clone()).await;
    service.set_admin_state("therm1", AdminState::Locked).unwrap();

    let reply = service
        .execute(CommandRequest::get("therm1", "Temperature"))
        .await;
    assert_eq!(reply.status, ReplyStatus::Locked);
    assert_eq!(reply.message, "Device therm1 is locked");

    let reply = service
        .execute(CommandRequest::put("therm1", "SetPoint").with_param("SetPoint", "70"))
        .await;
    assert_eq!(reply.status, ReplyStatus::Locked);

    assert_eq!(driver.get_count(), 0);
    assert!(driver.puts().is_empty());
    assert_eq!(service.device("therm1").unwrap().state().remaining_fails, 3);
}

#[tokio::test]
async fn test_service_lock_checked_first() {
    let driver = Arc::new(RecordingDriver::default());
    let service = service_with(test_config(), driver.clone()).await;
    service.set_service_admin_state(AdminState::Locked);

    let reply = service
        .execute(CommandRequest::get("nobody", "Temperature"))
        .await;
    assert_eq!(reply.message, CommandError::ServiceLocked.to_string());
    assert_eq!(reply.status, ReplyStatus::Locked);

    service.set_service_admin_state(AdminState::Unlocked);
    let reply = service
        .execute(CommandRequest::get("nobody", "Temperature"))
        .await;
    assert_eq!(reply.status, ReplyStatus::NotFound);
}

#[tokio::test]
async fn test_unknown_command_on_locked_device_is_not_found() {
    let driver = Arc::new(RecordingDriver::default());
    let service = service_with(test_config(), driver.clone()).await;
    service.set_admin_state("therm1", AdminState::Locked).unwrap();

    let reply = service.execute(CommandRequest::get("therm1", "Humidity")).await;
    assert_eq!(reply.status, ReplyStatus::NotFound);
    assert_eq!(reply.message, "No such command Humidity for device therm1");
}

#[tokio::test]
async fn test_wrong_direction() {
    let driver = Arc::new(RecordingDriver::default());
    let service = service_with(test_config(), driver.clone()).await;

    let reply = service
        .execute(CommandRequest::put("therm1", "Firmware").with_param("Firmware", "2.0"))
        .await;
    assert_eq!(reply.status, ReplyStatus::MethodNotAllowed);

    let reply = service.execute(CommandRequest::get("therm1", "Secret")).await;
    assert_eq!(reply.status, ReplyStatus::MethodNotAllowed);
    assert_eq!(driver.get_count(), 0);
}

#[tokio::test]
async fn test_unreadable_resource_fails_before_driver() {
    let driver = Arc::new(RecordingDriver::default());
    let service = service_with(test_config(), driver.clone()).await;

    let reply = service.execute(CommandRequest::get("therm1", "Provision")).await;
    assert_eq!(reply.status, ReplyStatus::MethodNotAllowed);
    assert_eq!(reply.message, "Resource Secret is not readable");
    assert_eq!(driver.get_count(), 0);
}

#[tokio::test]
async fn test_unwritable_resource_fails_before_driver() {
    let driver = Arc::new(RecordingDriver::default());
    let service = service_with(test_config(), driver.clone()).await;

    let reply = service
        .execute(
            CommandRequest::put("therm1", "Climate")
                .with_param("Temperature", "70")
                .with_param("SetPoint", "70"),
        )
        .await;
    assert_eq!(reply.status, ReplyStatus::MethodNotAllowed);
    assert!(driver.puts().is_empty());
}

#[tokio::test]
async fn test_operation_ceiling() {
    let driver = Arc::new(RecordingDriver::default());
    let config = ServiceConfig {
        max_cmd_ops: 1,
        ..test_config()
    };
    let service = service_with(config, driver.clone()).await;

    let reply = service.execute(CommandRequest::get("therm1", "Climate")).await;
    assert_eq!(reply.status, ReplyStatus::BadRequest);
    assert_eq!(
        reply.message,
        "Command Climate has 2 operations, exceeding the maximum of 1"
    );
    assert_eq!(driver.get_count(), 0);

    let reply = service
        .execute(CommandRequest::get("therm1", "Temperature"))
        .await;
    assert!(reply.is_success());
}

#[tokio::test]
async fn test_put_transforms_and_range() {
    let driver = Arc::new(RecordingDriver::default());
    let service = service_with(test_config(), driver.clone()).await;

    let reply = service
        .execute(CommandRequest::put("therm1", "SetPoint").with_param("SetPoint", "72"))
        .await;
    assert_eq!(reply.status, ReplyStatus::Ok);
    assert_eq!(reply.message, MSG_EXECUTED);
    // Scale 0.5 is inverted on the way to the device.
    assert_eq!(driver.puts()[0], vec![("SetPoint".to_string(), Value::Float64(144.0))]);

    let reply = service
        .execute(CommandRequest::get("therm1", "SetPoint"))
        .await;
    assert_eq!(reply.event.unwrap().event.readings[0].value.as_deref(), Some("72"));

    let reply = service
        .execute(CommandRequest::put("therm1", "SetPoint").with_param("SetPoint", "120"))
        .await;
    assert_eq!(reply.status, ReplyStatus::BadRequest);
    assert_eq!(driver.puts().len(), 1);
}

#[tokio::test]
async fn test_put_uses_default_when_value_missing() {
    let driver = Arc::new(RecordingDriver::default());
    let service = service_with(test_config(), driver.clone()).await;

    let reply = service
        .device_command("therm1", "SetPoint", Method::Put, &no_params())
        .await;
    assert!(reply.is_success());
    assert_eq!(driver.puts()[0][0].1, Value::Float64(136.0));

    let reply = service
        .device_command("therm1", "Mode", Method::Put, &no_params())
        .await;
    assert_eq!(reply.status, ReplyStatus::BadRequest);
    assert_eq!(
        reply.message,
        "No value given for resource Mode and no default is defined"
    );
}

#[tokio::test]
async fn test_put_decode_failure_never_reaches_driver() {
    let driver = Arc::new(RecordingDriver::default());
    let mut config = test_config();
    config.allowed_fails = 2;
    let service = service_with(config, driver.clone()).await;

    let reply = service
        .execute(CommandRequest::put("therm1", "SetPoint").with_param("SetPoint", "warm"))
        .await;
    assert_eq!(reply.status, ReplyStatus::BadRequest);
    assert_eq!(
        reply.message,
        "Unable to parse value 'warm' for resource SetPoint"
    );
    assert!(driver.puts().is_empty());
    assert_eq!(driver.get_count(), 0);
    assert_eq!(service.device("therm1").unwrap().state().remaining_fails, 2);
}

#[tokio::test]
async fn test_mappings_apply_both_ways() {
    let driver = Arc::new(RecordingDriver::default());
    driver.set_value("Mode", Value::Uint8(1));
    let service = service_with(test_config(), driver.clone()).await;

    let reply = service.execute(CommandRequest::get("therm1", "Mode")).await;
    let event = reply.event.unwrap();
    assert_eq!(event.event.readings[0].value.as_deref(), Some("Cool"));
    assert_eq!(event.event.readings[0].value_type, ValueType::String);

    let reply = service
        .execute(CommandRequest::put("therm1", "Mode").with_param("Mode", "Heat"))
        .await;
    assert!(reply.is_success());
    assert_eq!(driver.value("Mode"), Some(Value::Uint8(2)));
}

#[tokio::test]
async fn test_masked_write_merges_with_current_value() {
    let driver = Arc::new(RecordingDriver::default());
    driver.set_value("Status", Value::Uint16(0x1234));
    let service = service_with(test_config(), driver.clone()).await;

    let reply = service
        .execute(CommandRequest::put("therm1", "Status").with_param("Status", "255"))
        .await;
    assert!(reply.is_success(), "{}", reply.message);
    // (0x1234 & !0x00F0) | (0x00FF & 0x00F0)
    assert_eq!(driver.value("Status"), Some(Value::Uint16(0x12F4)));
    assert_eq!(driver.get_count(), 1);

    // The masked read is not a read command.
    assert_eq!(service.metrics().read_commands_executed, 0);

    let reply = service.execute(CommandRequest::get("therm1", "Status")).await;
    let event = reply.event.unwrap();
    assert_eq!(event.event.readings[0].value.as_deref(), Some("240"));
}

#[tokio::test]
async fn test_oversized_event_is_not_published() {
    let driver = Arc::new(RecordingDriver::default());
    driver.set_value("Firmware", "x".repeat(4096));
    let config = ServiceConfig {
        max_event_size_kib: 1,
        ..test_config()
    };
    let service = service_with(config, driver.clone()).await;
    let mut readings = service.event_bus().readings();

    let reply = service
        .execute(CommandRequest::get("therm1", "Firmware").with_query(true, true))
        .await;
    assert_eq!(reply.status, ReplyStatus::ServerError);
    assert!(reply.message.contains("exceeds configured maximum of 1024 bytes"));
    assert!(reply.event.is_none());
    assert!(readings.try_recv().is_none());
    assert_eq!(service.metrics().events_sent, 0);

    // The driver answered, so the device is still healthy.
    assert!(!service.device("therm1").unwrap().is_down());
}

#[tokio::test]
async fn test_binary_reading_uses_binary_encoding() {
    let driver = Arc::new(RecordingDriver::default());
    driver.set_value("Snapshot", Value::Binary(vec![0xde, 0xad, 0xbe, 0xef]));
    let service = DeviceService::new(test_config(), driver.clone());
    service
        .add_profile(DeviceProfile::new("camera").with_resource(DeviceResource::new(
            "Snapshot",
            ResourceProperties::new(ValueType::Binary)
                .read_only()
                .with_media_type("image/jpeg"),
        )))
        .unwrap();
    service
        .add_device(edgekit_devices::DeviceConfig::new("cam1", "camera"))
        .await
        .unwrap();

    let reply = service.execute(CommandRequest::get("cam1", "Snapshot")).await;
    let event = reply.event.unwrap();
    assert_eq!(event.encoding.content_type(), CONTENT_TYPE_BINARY);
    let decoded = Event::decode(CONTENT_TYPE_BINARY, &event.payload).unwrap();
    assert_eq!(decoded.readings[0].binary_value, Some(vec![0xde, 0xad, 0xbe, 0xef]));
    assert_eq!(decoded.readings[0].media_type.as_deref(), Some("image/jpeg"));
}

#[tokio::test]
async fn test_reading_transform_overflow_is_server_error() {
    let driver = Arc::new(RecordingDriver::default());
    driver.set_value("Level", Value::Uint8(200));
    let service = DeviceService::new(test_config(), driver.clone());
    service
        .add_profile(DeviceProfile::new("tank").with_resource(DeviceResource::new(
            "Level",
            ResourceProperties::new(ValueType::Uint8)
                .read_only()
                .with_scale(10.0),
        )))
        .unwrap();
    service
        .add_device(edgekit_devices::DeviceConfig::new("tank1", "tank"))
        .await
        .unwrap();

    let reply = service.execute(CommandRequest::get("tank1", "Level")).await;
    assert_eq!(reply.status, ReplyStatus::ServerError);
    assert!(reply.message.contains("Level"));
    assert!(reply.event.is_none());
    assert_eq!(driver.get_count(), 1);
}

#[tokio::test]
async fn test_binary_put_parameter() {
    let driver = Arc::new(RecordingDriver::default());
    let service = service_with(test_config(), driver.clone()).await;

    let reply = service
        .execute(CommandRequest::put("therm1", "SetPoint").with_param("SetPoint", vec![1u8, 2]))
        .await;
    assert_eq!(reply.status, ReplyStatus::BadRequest);
    assert!(reply.message.contains("(binary)"));
}

#[tokio::test]
async fn test_post_readings() {
    let driver = Arc::new(RecordingDriver::default());
    let service = service_with(test_config(), driver.clone()).await;
    let mut readings = service.event_bus().readings();

    let event = service
        .post_readings(
            "therm1",
            "Temperature",
            vec![CommandResult::new(65).with_origin(42).with_tag("site", "lab")],
        )
        .unwrap();
    assert_eq!(event.event.readings[0].origin, 42);
    assert_eq!(event.event.readings[0].tags["site"], "lab");
    assert!(readings.try_recv().is_some());
    assert_eq!(driver.get_count(), 0);

    let err = service
        .post_readings("therm1", "Humidity", vec![CommandResult::new(1)])
        .unwrap_err();
    assert_eq!(err.status(), ReplyStatus::NotFound);

    service.set_admin_state("therm1", AdminState::Locked).unwrap();
    let err = service
        .post_readings("therm1", "Temperature", vec![CommandResult::new(65)])
        .unwrap_err();
    assert_eq!(err, CommandError::DeviceLocked("therm1".into()));
}

#[tokio::test]
async fn test_concurrent_reads() {
    let driver = Arc::new(RecordingDriver::default());
    driver.set_value("Temperature", 70);
    let service = service_with(test_config(), driver.clone()).await;
    service.add_device(thermostat("therm2")).await.unwrap();

    let requests = (0..16).map(|i| {
        let device = if i % 2 == 0 { "therm1" } else { "therm2" };
        service.execute(CommandRequest::get(device, "Temperature"))
    });
    let replies = futures::future::join_all(requests).await;

    assert!(replies.iter().all(|r| r.is_success()));
    assert_eq!(driver.get_count(), 16);
    assert_eq!(service.metrics().read_commands_executed, 16);
}

#[tokio::test]
async fn test_device_lifecycle_notifies_driver_and_bus() {
    let driver = Arc::new(RecordingDriver::default());
    let service = service_with(test_config(), driver.clone()).await;
    let mut health = service.event_bus().subscribe();

    service.add_device(thermostat("therm2")).await.unwrap();
    assert!(service.add_device(thermostat("therm2")).await.is_err());
    service.remove_device("therm2").await.unwrap();
    assert!(service.remove_device("therm2").await.is_err());

    assert_eq!(driver.added(), ["therm1", "therm2"]);
    assert_eq!(driver.removed(), ["therm2"]);

    let (added, _) = health.try_recv().unwrap();
    assert!(matches!(added, SdkEvent::DeviceAdded { ref device_name, .. } if device_name == "therm2"));
    let (removed, _) = health.try_recv().unwrap();
    assert!(matches!(removed, SdkEvent::DeviceRemoved { .. }));

    assert!(service.remove_profile("thermostat").is_err());
}

#[tokio::test]
async fn test_invalid_address_rejects_device() {
    let driver = Arc::new(RecordingDriver::default());
    let service = service_with(test_config(), driver.clone()).await;
    let config = edgekit_devices::DeviceConfig::new("therm9", "thermostat").with_protocol(
        "virtual",
        HashMap::from([("Host".to_string(), String::new())]),
    );
    assert!(service.add_device(config).await.is_err());
    assert!(service.device("therm9").is_none());
}
