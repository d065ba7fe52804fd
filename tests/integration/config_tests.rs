//! Configuration store feeding the registry, and persistence round trips.

use std::sync::Arc;

use sensorfleet::adapters::memory_store::MemoryStore;
use sensorfleet::app::config_store::SensorConfigStore;
use sensorfleet::app::ports::{StorageError, StoragePort};
use sensorfleet::calibration::{CalibrationData, CalibrationEngine};
use sensorfleet::config::FleetConfig;
use sensorfleet::error::{CalibrationError, ConfigError};
use sensorfleet::types::{SensorBus, SensorType};

use crate::mock_hw::{fast_config, registry_on, sim_hardware};

const BOOT_DOC: &[u8] = br#"{"sensors": [
    {"id": "porch", "type": "humidity", "bus": "gpio-digital", "driver": "digital",
     "bus_params": {"pin": 4, "protocol": "DHT22"}},
    {"id": "battery", "type": "voltage", "bus": "gpio-analog", "driver": "analog",
     "bus_params": {"pin": 2, "samples": 4},
     "calibration_params": {"linear": {"offset": 0.0, "scale": 2.0}}},
    {"id": "spare", "type": "temperature", "bus": "gpio-analog", "driver": "analog",
     "bus_params": {"pin": 3}, "enabled": false}
]}"#;

#[test]
fn boot_document_populates_the_registry() {
    let store = SensorConfigStore::new();
    assert_eq!(store.load_json(BOOT_DOC, true).unwrap(), 3);

    let hw = sim_hardware();
    hw.lock().unwrap().set_analog(2, 2048);
    hw.lock().unwrap().set_analog(3, 100);
    let registry = registry_on(&hw, &fast_config());
    for d in store.all() {
        registry.add_descriptor(d).unwrap();
    }
    assert_eq!(registry.len(), 3);

    hw.lock().unwrap().queue_frame(4, &[0x02, 0x8C, 0x01, 0x5F, 0xEE]);
    let batch = registry.read_all();
    assert!(batch.contains_key("porch/humidity"));
    assert!(!batch.keys().any(|k| k.starts_with("spare")));

    // 2048 / 4095 * 3300 mV, doubled by the descriptor's calibration.
    let battery = &batch["battery"];
    let expected = 2.0 * 2048.0 / 4095.0 * 3300.0;
    assert!((battery.value - expected).abs() < 1e-6);
    assert_eq!(battery.unit, "mV");
}

#[test]
fn sensor_set_survives_storage_round_trip() {
    let mut disk = MemoryStore::new();
    let store = SensorConfigStore::new();
    store.load_json(BOOT_DOC, true).unwrap();
    store.save(&mut disk).unwrap();

    let restored = SensorConfigStore::new();
    restored.load(&disk).unwrap();
    assert_eq!(restored.all(), store.all());
    assert_eq!(restored.by_bus(SensorBus::GpioAnalog).len(), 2);
    assert_eq!(restored.by_type(SensorType::Humidity)[0].id, "porch");
}

#[test]
fn corrupt_stored_set_keeps_current_descriptors() {
    let mut disk = MemoryStore::new();
    disk.write("sensorcfg", "descriptors", b"{not json").unwrap();
    let store = SensorConfigStore::new();
    store.load_json(BOOT_DOC, true).unwrap();

    assert!(matches!(store.load(&disk), Err(ConfigError::Parse(_))));
    assert_eq!(store.len(), 3);
}

#[test]
fn full_storage_is_reported() {
    let mut disk = MemoryStore::with_capacity_bytes(16);
    let store = SensorConfigStore::new();
    store.load_json(BOOT_DOC, true).unwrap();
    assert!(matches!(
        store.save(&mut disk),
        Err(ConfigError::Storage(StorageError::Full))
    ));
}

#[test]
fn calibration_records_survive_storage_round_trip() {
    let mut disk = MemoryStore::new();
    let engine = CalibrationEngine::new();
    engine.set_record("a", CalibrationData::Linear { offset: 1.0, scale: 1.0 });
    engine.set_record("b", CalibrationData::Polynomial { coefficients: vec![0.0, 1.0, 0.5] });
    engine.save(&mut disk).unwrap();

    let fresh = Arc::new(CalibrationEngine::new());
    assert_eq!(fresh.load(&disk).unwrap(), 2);
    assert_eq!(fresh.record_ids(), vec!["a", "b"]);

    disk.write("calibration", "records", &[0xFF, 0xFF]).unwrap();
    assert!(matches!(
        fresh.load(&disk),
        Err(CalibrationError::Storage(StorageError::Corrupted))
    ));
    assert_eq!(fresh.record_ids().len(), 2);
}

#[test]
fn tunables_fall_back_to_defaults() {
    let mut disk = MemoryStore::new();
    assert_eq!(FleetConfig::load(&disk), FleetConfig::default());
    fast_config().save(&mut disk).unwrap();
    assert_eq!(FleetConfig::load(&disk), fast_config());
}
