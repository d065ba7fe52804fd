//! Sensor registry: membership, polling worker, faults, power and calibration.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use sensorfleet::calibration::{CalibrationData, ReferencePoint};
use sensorfleet::error::{BusError, DecodeError, RegistryError, SensorError};
use sensorfleet::registry::SensorFault;
use sensorfleet::types::{SensorBus, SensorDescriptor, SensorType};
use serde_json::json;

use crate::mock_hw::{MockSensor, SensorCall, fast_config, registry_on, sim_hardware, wait_for};

#[test]
fn polling_worker_delivers_readings_and_faults() {
    let hw = sim_hardware();
    let registry = registry_on(&hw, &fast_config());
    registry
        .add_sensor(
            MockSensor::new("flaky")
                .then_error(SensorError::Bus(BusError::Timeout))
                .then_error(SensorError::Bus(BusError::Timeout))
                .steady(21.0)
                .boxed(),
        )
        .unwrap();

    let readings = Arc::new(Mutex::new(Vec::new()));
    let faults: Arc<Mutex<Vec<SensorFault>>> = Arc::new(Mutex::new(Vec::new()));
    let f = Arc::clone(&faults);
    registry.set_error_callback(move |fault| f.lock().unwrap().push(fault.clone()));
    let r = Arc::clone(&readings);
    registry
        .start_reading(Duration::from_millis(5), move |reading| {
            r.lock().unwrap().push(reading.clone());
        })
        .unwrap();

    assert!(wait_for(|| readings.lock().unwrap().iter().any(|r| r.is_valid)));
    registry.stop_reading();
    assert!(!registry.is_reading());

    let faults = faults.lock().unwrap();
    assert_eq!(faults.len(), 2);
    assert_eq!(faults[0].error_count, 1);
    assert_eq!(faults[1].error_count, 2);
    assert_eq!(faults[1].error, SensorError::Bus(BusError::Timeout));

    let readings = readings.lock().unwrap();
    assert!(!readings[0].is_valid);
    assert!(readings.iter().rev().find(|r| r.is_valid).is_some_and(|r| r.value == 21.0));
}

#[test]
fn rate_limited_reads_are_not_faults() {
    let hw = sim_hardware();
    let registry = registry_on(&hw, &fast_config());
    registry
        .add_sensor(
            MockSensor::new("slow")
                .then_error(SensorError::Decode(DecodeError::TooFrequent {
                    elapsed_ms: 10,
                    min_ms: 2000,
                }))
                .boxed(),
        )
        .unwrap();

    let faults = Arc::new(Mutex::new(0u32));
    let f = Arc::clone(&faults);
    registry.set_error_callback(move |_| *f.lock().unwrap() += 1);
    let seen = Arc::new(Mutex::new(0u32));
    let s = Arc::clone(&seen);
    registry
        .start_reading(Duration::from_millis(5), move |_| *s.lock().unwrap() += 1)
        .unwrap();
    assert!(wait_for(|| *seen.lock().unwrap() >= 3));
    registry.stop_reading();

    assert_eq!(*faults.lock().unwrap(), 0);
}

#[test]
fn second_start_is_already_running() {
    let hw = sim_hardware();
    let registry = registry_on(&hw, &fast_config());
    registry.start_reading(Duration::from_millis(50), |_| {}).unwrap();
    assert_eq!(
        registry.start_reading(Duration::from_millis(50), |_| {}),
        Err(RegistryError::AlreadyRunning)
    );
    registry.stop_reading();
    registry.start_reading(Duration::from_millis(50), |_| {}).unwrap();
    registry.stop_reading();
}

#[test]
fn disabled_sensors_are_never_polled() {
    let hw = sim_hardware();
    let registry = registry_on(&hw, &fast_config());
    let off = MockSensor::new("off").disabled();
    let recorder = off.recorder();
    registry.add_sensor(off.boxed()).unwrap();
    registry.add_sensor(MockSensor::new("on").boxed()).unwrap();

    let batch = registry.read_all();
    assert_eq!(batch.keys().collect::<Vec<_>>(), vec!["on"]);
    assert_eq!(recorder.count(&SensorCall::Read), 0);
}

#[test]
fn sleeping_sensors_are_skipped_until_woken() {
    let hw = sim_hardware();
    let registry = registry_on(&hw, &fast_config());
    let s = MockSensor::new("s1");
    let recorder = s.recorder();
    registry.add_sensor(s.boxed()).unwrap();

    assert!(registry.sleep_all().is_empty());
    assert!(registry.is_asleep("s1"));
    assert!(registry.read_all().is_empty());

    assert!(registry.wake_all().is_empty());
    assert!(registry.read_all().contains_key("s1"));
    assert_eq!(
        recorder.calls(),
        vec![SensorCall::Begin, SensorCall::Sleep, SensorCall::Wake, SensorCall::Read]
    );
}

#[test]
fn failed_begin_is_not_added() {
    let hw = sim_hardware();
    let registry = registry_on(&hw, &fast_config());
    let err = registry
        .add_sensor(MockSensor::new("dud").failing_begin().boxed())
        .unwrap_err();
    assert!(matches!(err, RegistryError::InitializationFailed { ref id, .. } if id == "dud"));
    assert!(!registry.contains("dud"));
}

#[test]
fn removal_ends_the_instance() {
    let hw = sim_hardware();
    let registry = registry_on(&hw, &fast_config());
    let s = MockSensor::new("gone");
    let recorder = s.recorder();
    registry.add_sensor(s.boxed()).unwrap();
    registry.remove_sensor("gone").unwrap();

    assert_eq!(recorder.count(&SensorCall::End), 1);
    assert_eq!(registry.remove_sensor("gone"), Err(RegistryError::NotFound("gone".into())));
}

#[test]
fn calibration_record_follows_the_id() {
    let hw = sim_hardware();
    let registry = registry_on(&hw, &fast_config());
    registry.add_sensor(MockSensor::new("t").steady(20.0).boxed()).unwrap();
    registry
        .calibrate_sensor(
            "t",
            CalibrationData::Linear {
                offset: 1.0,
                scale: 2.0,
            },
        )
        .unwrap();
    assert_eq!(registry.read("t").unwrap().value, 41.0);

    registry.remove_sensor("t").unwrap();
    let again = MockSensor::new("t").steady(10.0);
    let recorder = again.recorder();
    registry.add_sensor(again.boxed()).unwrap();

    assert_eq!(recorder.count(&SensorCall::Calibrate), 1);
    assert_eq!(registry.read("t").unwrap().value, 21.0);
}

#[test]
fn calibrate_all_reports_each_failure() {
    let hw = sim_hardware();
    let registry = registry_on(&hw, &fast_config());
    registry.add_sensor(MockSensor::new("a").boxed()).unwrap();

    let mut batch = BTreeMap::new();
    batch.insert("a".to_string(), CalibrationData::Linear { offset: 0.5, scale: 1.0 });
    batch.insert("ghost".to_string(), CalibrationData::Linear { offset: 0.5, scale: 1.0 });

    let failures = registry.calibrate_all(batch);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "ghost");
    assert!(registry.calibration().has_record("a"));
}

#[test]
fn fit_and_apply_with_named_method() {
    let hw = sim_hardware();
    let registry = registry_on(&hw, &fast_config());
    registry.add_sensor(MockSensor::new("v").steady(50.0).boxed()).unwrap();

    let data = registry
        .calibrate_sensor_with_method(
            "v",
            &[ReferencePoint::new(0.0, 0.0), ReferencePoint::new(100.0, 10.0)],
            "linear",
            &json!({}),
        )
        .unwrap();
    assert_eq!(data.method_name(), "linear");
    assert!((registry.read("v").unwrap().value - 5.0).abs() < 1e-9);

    let err = registry
        .calibrate_sensor_with_method("v", &[], "spline", &json!({}))
        .unwrap_err();
    assert!(matches!(err, RegistryError::Calibration(_)));
}

#[test]
fn lookups_by_type_and_bus() {
    let hw = sim_hardware();
    let registry = registry_on(&hw, &fast_config());
    registry
        .add_sensor(MockSensor::new("h").with_type(SensorType::Humidity, SensorBus::I2c).boxed())
        .unwrap();
    registry
        .add_sensor(MockSensor::new("p").with_type(SensorType::Pressure, SensorBus::Spi).boxed())
        .unwrap();

    assert_eq!(registry.sensors_by_type(SensorType::Humidity).len(), 1);
    assert_eq!(registry.sensors_by_bus(SensorBus::Spi).len(), 1);
    assert_eq!(registry.sensor_ids(), vec!["h", "p"]);
    assert_eq!(
        registry.add_sensor(MockSensor::new("h").boxed()),
        Err(RegistryError::DuplicateId("h".into()))
    );
}

#[test]
fn polling_restarts_after_worker_dies() {
    let hw = sim_hardware();
    let registry = registry_on(&hw, &fast_config());
    registry.add_sensor(MockSensor::new("t").steady(19.0).boxed()).unwrap();

    registry
        .start_reading(Duration::from_millis(5), |_| panic!("reading callback failed"))
        .unwrap();
    assert!(wait_for(|| !registry.is_reading()));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    registry
        .start_reading(Duration::from_millis(5), move |reading| {
            s.lock().unwrap().push(reading.value);
        })
        .unwrap();
    assert!(wait_for(|| !seen.lock().unwrap().is_empty()));
    registry.stop_reading();
    assert_eq!(seen.lock().unwrap()[0], 19.0);
}

fn analog_on(id: &str) -> SensorDescriptor {
    SensorDescriptor::new(id, "analog", SensorType::Voltage, SensorBus::GpioAnalog)
        .with_bus_params(json!({"pin": 1}))
}

#[test]
fn concurrent_membership_changes_keep_ids_unique() {
    let hw = sim_hardware();
    hw.lock().unwrap().set_analog(1, 1024);
    let registry = registry_on(&hw, &fast_config());
    let ids = ["a", "b", "c", "d"];
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let registry = registry.clone();
        let done = Arc::clone(&done);
        thread::spawn(move || {
            while !done.load(Ordering::Acquire) {
                for (id, reading) in registry.read_all() {
                    assert_eq!(reading.sensor_id, id);
                }
            }
        })
    };
    let churners: Vec<_> = (0..4)
        .map(|n| {
            let registry = registry.clone();
            thread::spawn(move || {
                for round in 0..100 {
                    let id = ids[(n + round) % ids.len()];
                    if round % 3 == 0 {
                        let _ = registry.remove_sensor(id);
                    } else {
                        match registry.add_descriptor(analog_on(id)) {
                            Ok(()) | Err(RegistryError::DuplicateId(_)) => {}
                            Err(e) => panic!("unexpected add failure: {e}"),
                        }
                    }
                }
            })
        })
        .collect();
    for churner in churners {
        churner.join().unwrap();
    }
    done.store(true, Ordering::Release);
    reader.join().unwrap();

    let listed = registry.sensor_ids();
    let unique: BTreeSet<_> = listed.iter().collect();
    assert_eq!(unique.len(), listed.len());
    assert_eq!(registry.len(), listed.len());
    assert!(listed.iter().all(|id| ids.contains(&id.as_str())));
    assert_eq!(registry.read_all().len(), registry.len());
}
