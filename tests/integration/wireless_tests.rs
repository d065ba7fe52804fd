//! Wireless node manager: discovery worker, routing and remote sensors.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sensorfleet::error::{RegistryError, SensorError, TransportError, WirelessError};
use sensorfleet::sensors::remote::{self, RemoteSensor};
use sensorfleet::types::SensorType;
use sensorfleet::wireless::{ALL_PROTOCOLS, NodeInfo, NodeStatus, WirelessNodeManager};
use serde_json::json;

use crate::mock_hw::{MockProtocol, ProtocolCall, fast_config, registry_on, sim_hardware, wait_for};

fn manager() -> WirelessNodeManager {
    WirelessNodeManager::new(&fast_config())
}

#[test]
fn discovery_registers_each_peer_once() {
    let m = manager();
    let ble = MockProtocol::new()
        .with_peer(NodeInfo::new("n1", "ble").with_rssi(-60).with_mac("aa:bb"))
        .with_peer(NodeInfo::new("n2", "ble"));
    let espnow = MockProtocol::new().with_peer(NodeInfo::new("n1", "espnow").with_rssi(-40));
    m.register_protocol("ble", ble.shared()).unwrap();
    m.register_protocol("espnow", espnow.shared()).unwrap();

    let found = Arc::new(Mutex::new(Vec::new()));
    let f = Arc::clone(&found);
    m.set_discovery_callback(move |node| f.lock().unwrap().push(node.node_id.clone()));

    m.start_discovery(ALL_PROTOCOLS, Duration::from_millis(100)).unwrap();
    assert!(wait_for(|| !m.is_discovery_running()));

    let mut found = found.lock().unwrap().clone();
    found.sort();
    assert_eq!(found, vec!["n1", "n2"]);

    let n1 = m.node_info("n1").unwrap();
    assert_eq!(n1.protocol, "ble");
    assert_eq!(n1.status, NodeStatus::Unknown);
    assert_eq!(n1.mac_address, "aa:bb");
    assert!(ble.scans() >= 2);
    assert!(espnow.scans() >= 2);
}

#[test]
fn discovery_filter_and_scan_failures() {
    let m = manager();
    let broken = MockProtocol::new().with_peer(NodeInfo::new("x", "broken"));
    broken.fail_scans();
    let good = MockProtocol::new().with_peer(NodeInfo::new("g", "good"));
    m.register_protocol("broken", broken.shared()).unwrap();
    m.register_protocol("good", good.shared()).unwrap();

    m.start_discovery("good", Duration::from_millis(50)).unwrap();
    assert!(wait_for(|| !m.is_discovery_running()));
    assert_eq!(broken.scans(), 0);
    assert!(m.is_node_registered("g"));

    m.start_discovery(ALL_PROTOCOLS, Duration::from_millis(50)).unwrap();
    assert!(wait_for(|| !m.is_discovery_running()));
    assert!(broken.scans() >= 1);
    assert!(!m.is_node_registered("x"));
}

#[test]
fn discovery_is_single_flight_and_stoppable() {
    let m = manager();
    m.register_protocol("ble", MockProtocol::new().shared()).unwrap();

    m.start_discovery(ALL_PROTOCOLS, Duration::from_secs(30)).unwrap();
    assert_eq!(
        m.start_discovery(ALL_PROTOCOLS, Duration::from_secs(30)),
        Err(WirelessError::AlreadyRunning)
    );

    let started = Instant::now();
    m.stop_discovery();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!m.is_discovery_running());
    m.start_discovery(ALL_PROTOCOLS, Duration::from_millis(20)).unwrap();
    m.stop_discovery();
}

#[test]
fn routing_errors_and_transport_passthrough() {
    let m = manager();
    let ble = MockProtocol::new();
    m.register_protocol("ble", ble.shared()).unwrap();
    m.register_node(NodeInfo::new("n1", "ble")).unwrap();
    m.register_node(NodeInfo::new("n2", "lora")).unwrap();

    assert_eq!(
        m.send_command("ghost", &json!({})),
        Err(WirelessError::NotFound("ghost".into()))
    );
    assert!(matches!(
        m.send_command("n2", &json!({})),
        Err(WirelessError::ProtocolUnavailable { ref protocol, .. }) if protocol == "lora"
    ));

    m.subscribe_to_data("n1", "telemetry").unwrap();
    m.unsubscribe_from_data("n1", "telemetry").unwrap();
    ble.fail_with(TransportError::Rejected("busy".into()));
    assert_eq!(
        m.send_command("n1", &json!({"op": "ping"})),
        Err(WirelessError::Transport(TransportError::Rejected("busy".into())))
    );
    assert_eq!(
        ble.calls()[..2],
        [
            ProtocolCall::Subscribe {
                node: "n1".into(),
                topic: "telemetry".into()
            },
            ProtocolCall::Unsubscribe {
                node: "n1".into(),
                topic: "telemetry".into()
            },
        ]
    );
}

#[test]
fn configure_node_remembers_accepted_config() {
    let m = manager();
    let ble = MockProtocol::new();
    m.register_protocol("ble", ble.shared()).unwrap();
    m.register_node(NodeInfo::new("n1", "ble")).unwrap();

    m.configure_node("n1", json!({"interval_s": 30})).unwrap();
    assert_eq!(m.node_info("n1").unwrap().configuration, json!({"interval_s": 30}));

    ble.fail_with(TransportError::Timeout);
    assert!(m.configure_node("n1", json!({"interval_s": 1})).is_err());
    assert_eq!(m.node_info("n1").unwrap().configuration, json!({"interval_s": 30}));
}

#[test]
fn status_walk_reports_each_change_once() {
    let m = manager();
    m.register_node(NodeInfo::new("n1", "ble")).unwrap();
    let changes = Arc::new(Mutex::new(Vec::new()));
    let c = Arc::clone(&changes);
    m.set_status_callback(move |ch| c.lock().unwrap().push((ch.previous, ch.current)));

    m.update_node_status("n1", NodeStatus::Connecting).unwrap();
    m.update_node_status("n1", NodeStatus::Connected).unwrap();
    m.update_node_status("n1", NodeStatus::Connected).unwrap();
    assert!(matches!(
        m.update_node_status("n1", NodeStatus::Connecting),
        Err(WirelessError::InvalidTransition { .. })
    ));
    m.update_node_status("n1", NodeStatus::Error).unwrap();

    assert_eq!(
        *changes.lock().unwrap(),
        vec![
            (NodeStatus::Unknown, NodeStatus::Connecting),
            (NodeStatus::Connecting, NodeStatus::Connected),
            (NodeStatus::Connected, NodeStatus::Error),
        ]
    );
}

#[test]
fn remote_sensor_reads_through_the_registry() {
    let hw = sim_hardware();
    let registry = registry_on(&hw, &fast_config());
    let m = manager();
    registry
        .register_driver(remote::DRIVER, RemoteSensor::constructor(m.clone()))
        .unwrap();

    let espnow = MockProtocol::new();
    espnow.reply_with(json!({"value": 412.0, "unit": "ppm", "raw": 2048.0}));
    m.register_protocol("espnow", espnow.shared()).unwrap();
    let node = NodeInfo::new("greenhouse", "espnow");
    m.register_node(node.clone()).unwrap();

    let descriptor = RemoteSensor::descriptor_for(&node, SensorType::Gas);
    assert_eq!(descriptor.id, "greenhouse-gas");
    registry.add_descriptor(descriptor).unwrap();

    let reading = registry.read("greenhouse-gas").unwrap();
    assert!(reading.is_valid);
    assert_eq!(reading.value, 412.0);
    assert_eq!(reading.unit, "ppm");
    assert_eq!(reading.raw_value, Some(2048.0));
    assert_eq!(
        espnow.calls(),
        vec![ProtocolCall::Request {
            node: "greenhouse".into(),
            payload: json!({"op": "read", "sensor": "greenhouse-gas"}),
        }]
    );

    registry.sleep("greenhouse-gas").unwrap();
    assert!(matches!(
        espnow.calls().last(),
        Some(ProtocolCall::Command { payload, .. }) if payload["op"] == "sleep"
    ));
}

#[test]
fn remote_sensor_for_unknown_node_fails_to_start() {
    let hw = sim_hardware();
    let registry = registry_on(&hw, &fast_config());
    let m = manager();
    registry
        .register_driver(remote::DRIVER, RemoteSensor::constructor(m.clone()))
        .unwrap();

    let descriptor =
        RemoteSensor::descriptor_for(&NodeInfo::new("ghost", "ble"), SensorType::Light);
    let err = registry.add_descriptor(descriptor).unwrap_err();
    assert!(matches!(
        err,
        RegistryError::InitializationFailed {
            reason: SensorError::NodeUnknown(_),
            ..
        }
    ));
}

#[test]
fn pushed_node_data_reaches_the_data_callback() {
    let m = manager();
    m.register_node(NodeInfo::new("n1", "mqtt")).unwrap();
    let got = Arc::new(Mutex::new(None));
    let g = Arc::clone(&got);
    m.set_data_callback(move |d| *g.lock().unwrap() = Some(d.clone()));

    m.handle_node_data("n1", Some("env"), json!({"t": 19.5})).unwrap();
    let data = got.lock().unwrap().clone().unwrap();
    assert_eq!(data.topic.as_deref(), Some("env"));
    assert_eq!(data.payload["t"], 19.5);
    assert!(m.handle_node_data("ghost", None, json!(null)).is_err());
}

#[test]
fn racing_start_and_stop_never_overlap_scans() {
    let m = manager();
    let ble = MockProtocol::new().slow_scans(Duration::from_millis(2));
    m.register_protocol("ble", ble.shared()).unwrap();

    let stopper = {
        let m = m.clone();
        std::thread::spawn(move || {
            for _ in 0..200 {
                m.stop_discovery();
            }
        })
    };
    for _ in 0..200 {
        let _ = m.start_discovery(ALL_PROTOCOLS, Duration::from_millis(3));
    }
    stopper.join().unwrap();
    m.stop_discovery();

    assert!(!m.is_discovery_running());
    assert!(ble.scans() > 0);
    assert_eq!(ble.most_scans_in_flight(), 1);
}

#[test]
fn panicking_discovery_callback_does_not_wedge_discovery() {
    let m = manager();
    m.register_protocol("ble", MockProtocol::new().with_peer(NodeInfo::new("n1", "ble")).shared())
        .unwrap();
    m.set_discovery_callback(|_| panic!("callback failure"));

    m.start_discovery(ALL_PROTOCOLS, Duration::from_millis(50)).unwrap();
    assert!(wait_for(|| !m.is_discovery_running()));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    m.set_discovery_callback(move |node| s.lock().unwrap().push(node.node_id.clone()));
    m.start_discovery(ALL_PROTOCOLS, Duration::from_millis(50)).unwrap();
    assert!(wait_for(|| !m.is_discovery_running()));
    assert_eq!(*seen.lock().unwrap(), vec!["n1"]);
}
