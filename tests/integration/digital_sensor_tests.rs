//! Digital bit-timing sensors end to end: descriptor → registry → simulated line.

use sensorfleet::app::config_store::SensorConfigStore;
use sensorfleet::calibration::CalibrationData;
use sensorfleet::error::{DecodeError, DecodePhase, RegistryError, SensorError};
use sensorfleet::types::{SensorBus, SensorDescriptor, SensorType};
use serde_json::json;

use crate::mock_hw::{fast_config, registry_on, sim_hardware};

const PIN: u8 = 4;

fn dht22(id: &str) -> SensorDescriptor {
    SensorConfigStore::descriptor_from_protocol("DHT22", id, PIN).unwrap()
}

#[test]
fn dht22_frame_becomes_two_keyed_readings() {
    let hw = sim_hardware();
    let registry = registry_on(&hw, &fast_config());
    registry.add_descriptor(dht22("porch")).unwrap();

    // 65.2 %RH, 35.1 °C
    hw.lock().unwrap().queue_frame(PIN, &[0x02, 0x8C, 0x01, 0x5F, 0xEE]);
    let batch = registry.read_all();

    let rh = &batch["porch/humidity"];
    let t = &batch["porch/temperature"];
    assert!((rh.value - 65.2).abs() < 1e-9);
    assert_eq!(rh.unit, "%");
    assert!((t.value - 35.1).abs() < 1e-9);
    assert_eq!(t.unit, "°C");
    assert_eq!(t.metadata["protocol"], "DHT22");
    assert_eq!(t.metadata["quantity"], "temperature");
}

#[test]
fn dht22_negative_temperature_uses_sign_bit() {
    let hw = sim_hardware();
    let registry = registry_on(&hw, &fast_config());
    let descriptor = dht22("cold");
    let descriptor = SensorDescriptor {
        sensor_type: SensorType::Temperature,
        ..descriptor
    };
    registry.add_descriptor(descriptor).unwrap();

    // 40.0 %RH, -10.1 °C
    hw.lock().unwrap().queue_frame(PIN, &[0x01, 0x90, 0x80, 0x65, 0x76]);
    let reading = registry.read("cold").unwrap();
    assert!(reading.is_valid);
    assert!(reading.channel.is_none());
    assert!((reading.value + 10.1).abs() < 1e-9);
}

#[test]
fn silent_line_is_an_invalid_reading_with_cause() {
    let hw = sim_hardware();
    let registry = registry_on(&hw, &fast_config());
    registry.add_descriptor(dht22("mute")).unwrap();

    hw.lock().unwrap().queue_silence(PIN);
    let reading = registry.read("mute").unwrap();
    assert!(!reading.is_valid);
    assert!(reading.value.is_nan());

    let sensor = registry.sensor("mute").unwrap();
    let sensor = sensor.lock().unwrap();
    assert_eq!(
        sensor.last_error(),
        Some(&SensorError::Decode(DecodeError::NoResponse {
            phase: DecodePhase::ResponseLow
        }))
    );
    assert_eq!(sensor.error_count(), 1);
    assert!(!sensor.is_connected());
}

#[test]
fn back_to_back_read_is_rate_limited_without_line_traffic() {
    let hw = sim_hardware();
    let registry = registry_on(&hw, &fast_config());
    registry.add_descriptor(dht22("busy")).unwrap();
    hw.lock().unwrap().queue_frame(PIN, &[0x02, 0x8C, 0x01, 0x5F, 0xEE]);
    assert!(registry.read("busy").unwrap().is_valid);

    let ops = hw.lock().unwrap().line_ops();
    let second = registry.read("busy").unwrap();
    assert!(!second.is_valid);
    assert_eq!(hw.lock().unwrap().line_ops(), ops);

    let sensor = registry.sensor("busy").unwrap();
    let sensor = sensor.lock().unwrap();
    assert!(sensor.last_error().is_some_and(SensorError::is_soft));
    assert_eq!(sensor.error_count(), 0);
}

#[test]
fn descriptor_calibration_bag_is_applied_to_every_quantity() {
    let hw = sim_hardware();
    let registry = registry_on(&hw, &fast_config());
    let descriptor = dht22("cal")
        .with_calibration_params(json!({"linear": {"offset": -1.0, "scale": 1.0}}));
    registry.add_descriptor(descriptor).unwrap();

    hw.lock().unwrap().queue_frame(PIN, &[0x02, 0x8C, 0x01, 0x5F, 0xEE]);
    let batch = registry.read_all();
    assert!((batch["cal/humidity"].value - 64.2).abs() < 1e-9);
    assert_eq!(batch["cal/humidity"].raw_value, Some(65.2));
    assert!((batch["cal/temperature"].value - 34.1).abs() < 1e-9);

    let stored = registry.calibration().record("cal");
    assert_eq!(stored, Some(CalibrationData::Linear { offset: -1.0, scale: 1.0 }));
}

#[test]
fn unknown_protocol_is_a_configuration_error() {
    let hw = sim_hardware();
    let registry = registry_on(&hw, &fast_config());
    let descriptor =
        SensorDescriptor::new("x", "digital", SensorType::Humidity, SensorBus::GpioDigital)
            .with_bus_params(json!({"pin": 5, "protocol": "DHT99"}));

    let err = registry.add_descriptor(descriptor).unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Configuration { reason: SensorError::UnknownProtocol(_), .. }
    ));
    assert!(registry.is_empty());
}

#[test]
fn reconfigure_moves_sensor_to_new_pin() {
    let hw = sim_hardware();
    let registry = registry_on(&hw, &fast_config());
    registry.add_descriptor(dht22("mv")).unwrap();

    let moved = SensorConfigStore::descriptor_from_protocol("DHT11", "mv", 7).unwrap();
    registry.reconfigure_sensor(moved).unwrap();
    assert_eq!(registry.descriptors()[0].bus_params["pin"], 7);

    // 50 %RH, 24 °C on the DHT11 single-byte layout.
    hw.lock().unwrap().queue_frame(7, &[0x32, 0x00, 0x18, 0x00, 0x4A]);
    let batch = registry.read_all();
    assert_eq!(batch["mv/humidity"].value, 50.0);
    assert_eq!(batch["mv/temperature"].value, 24.0);
}
