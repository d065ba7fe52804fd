//! Worker callbacks funnelled through `FleetQueues` into one sink.

use std::time::Duration;

use sensorfleet::adapters::log_sink::LogEventSink;
use sensorfleet::app::config_store::{ConfigChange, ConfigChangeKind, SensorConfigStore};
use sensorfleet::app::ports::EventSink;
use sensorfleet::error::{BusError, SensorError};
use sensorfleet::events::FleetQueues;
use sensorfleet::registry::SensorFault;
use sensorfleet::types::{SensorBus, SensorReading, SensorType};
use sensorfleet::wireless::{NodeData, NodeInfo, NodeStatus, NodeStatusChange, WirelessNodeManager};
use serde_json::json;

use crate::mock_hw::{MockSensor, fast_config, registry_on, sim_hardware, wait_for};

#[derive(Default)]
struct RecordingSink {
    order: Vec<&'static str>,
    readings: Vec<SensorReading>,
    faults: Vec<SensorFault>,
    statuses: Vec<NodeStatusChange>,
    data: Vec<NodeData>,
    config: Vec<ConfigChange>,
}

impl EventSink for RecordingSink {
    fn on_reading(&mut self, reading: &SensorReading) {
        self.order.push("reading");
        self.readings.push(reading.clone());
    }

    fn on_fault(&mut self, fault: &SensorFault) {
        self.order.push("fault");
        self.faults.push(fault.clone());
    }

    fn on_node_discovered(&mut self, _node: &NodeInfo) {
        self.order.push("discovered");
    }

    fn on_node_status(&mut self, change: &NodeStatusChange) {
        self.order.push("status");
        self.statuses.push(change.clone());
    }

    fn on_node_data(&mut self, data: &NodeData) {
        self.order.push("data");
        self.data.push(data.clone());
    }

    fn on_config_changed(&mut self, change: &ConfigChange) {
        self.order.push("config");
        self.config.push(change.clone());
    }
}

#[test]
fn every_producer_reaches_the_sink() {
    let hw = sim_hardware();
    let registry = registry_on(&hw, &fast_config());
    let manager = WirelessNodeManager::new(&fast_config());
    let store = SensorConfigStore::new();
    let queues = FleetQueues::new();
    queues.install(&registry, &manager, &store);

    registry
        .add_sensor(
            MockSensor::new("t1")
                .then_error(SensorError::Bus(BusError::Timeout))
                .steady(18.5)
                .boxed(),
        )
        .unwrap();
    registry
        .start_reading(Duration::from_millis(5), queues.reading_callback())
        .unwrap();
    assert!(wait_for(|| queues.readings.len() >= 2));
    registry.stop_reading();

    manager.register_node(NodeInfo::new("n1", "ble")).unwrap();
    manager.update_node_status("n1", NodeStatus::Connecting).unwrap();
    manager.handle_node_data("n1", None, json!({"rssi": -70})).unwrap();
    store
        .set(SensorConfigStore::default_descriptor(
            "a1",
            SensorType::Light,
            SensorBus::GpioAnalog,
        ))
        .unwrap();

    let mut sink = RecordingSink::default();
    let delivered = queues.dispatch(&mut sink);
    assert_eq!(delivered, sink.order.len());
    assert_eq!(&sink.order[..4], &["config", "status", "data", "fault"]);

    assert_eq!(sink.config[0].kind, ConfigChangeKind::Added);
    assert_eq!(sink.config[0].sensor_id.as_deref(), Some("a1"));
    assert_eq!(sink.statuses[0].current, NodeStatus::Connecting);
    assert_eq!(sink.data[0].payload["rssi"], -70);
    assert_eq!(sink.faults[0].sensor_id, "t1");
    assert!(!sink.readings[0].is_valid);
    assert!(sink.readings[1].is_valid);

    assert_eq!(queues.dispatch(&mut sink), 0);
    assert_eq!(queues.dropped(), 0);
}

#[test]
fn bursts_beyond_depth_are_counted_not_blocked() {
    let queues = FleetQueues::new();
    let push = queues.reading_callback();
    let depth = queues.readings.capacity();
    for i in 0..depth + 5 {
        push(&SensorReading::valid("burst", i as f64, "u"));
    }
    assert_eq!(queues.readings.len(), depth);
    assert_eq!(queues.dropped(), 5);

    let mut sink = LogEventSink::new();
    assert_eq!(queues.dispatch(&mut sink), depth);
    assert_eq!(sink.readings_logged(), depth as u64);
}
