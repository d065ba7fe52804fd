//! Mock sensors and wireless protocols for integration tests.
//!
//! `MockSensor` replays a script of values and failures and records every
//! lifecycle call; `MockProtocol` answers scans from a script and records
//! every command, request and subscription it is asked to carry.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use sensorfleet::adapters::sim_hal::SimulatedHardware;
use sensorfleet::app::ports::{SharedHardware, WirelessProtocol};
use sensorfleet::calibration::{CalibrationData, CalibrationEngine};
use sensorfleet::config::FleetConfig;
use sensorfleet::error::{SensorError, TransportError};
use sensorfleet::registry::SensorRegistry;
use sensorfleet::sensors::{Capabilities, Sensor};
use sensorfleet::types::{SensorBus, SensorDescriptor, SensorReading, SensorType};
use sensorfleet::wireless::NodeInfo;

// ── Sensor call record ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SensorCall {
    Begin,
    End,
    Read,
    Sleep,
    Wake,
    Calibrate,
}

/// Shared view of a [`MockSensor`]'s history, usable after the sensor
/// has been moved into a registry.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<SensorCall>>>,
}

#[allow(dead_code)]
impl Recorder {
    pub fn calls(&self) -> Vec<SensorCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &SensorCall) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    fn record(&self, call: SensorCall) {
        self.calls.lock().unwrap().push(call);
    }
}

// ── MockSensor ────────────────────────────────────────────────

pub struct MockSensor {
    descriptor: SensorDescriptor,
    script: VecDeque<Result<f64, SensorError>>,
    /// Returned once the script is exhausted.
    steady: f64,
    fail_begin: bool,
    calibration: Option<CalibrationData>,
    last_error: Option<SensorError>,
    error_count: u32,
    started: bool,
    recorder: Recorder,
}

#[allow(dead_code)]
impl MockSensor {
    pub fn new(id: &str) -> Self {
        Self {
            descriptor: SensorDescriptor::new(id, "mock", SensorType::Temperature, SensorBus::I2c),
            script: VecDeque::new(),
            steady: 20.0,
            fail_begin: false,
            calibration: None,
            last_error: None,
            error_count: 0,
            started: false,
            recorder: Recorder::default(),
        }
    }

    pub fn with_type(mut self, sensor_type: SensorType, bus: SensorBus) -> Self {
        self.descriptor.sensor_type = sensor_type;
        self.descriptor.bus = bus;
        self
    }

    pub fn steady(mut self, value: f64) -> Self {
        self.steady = value;
        self
    }

    pub fn then_value(mut self, value: f64) -> Self {
        self.script.push_back(Ok(value));
        self
    }

    pub fn then_error(mut self, err: SensorError) -> Self {
        self.script.push_back(Err(err));
        self
    }

    pub fn failing_begin(mut self) -> Self {
        self.fail_begin = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.descriptor.enabled = false;
        self
    }

    pub fn recorder(&self) -> Recorder {
        self.recorder.clone()
    }

    pub fn boxed(self) -> Box<dyn Sensor> {
        Box::new(self)
    }
}

impl Sensor for MockSensor {
    fn descriptor(&self) -> &SensorDescriptor {
        &self.descriptor
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            calibratable: true,
            sleepable: true,
            multi_value: false,
        }
    }

    fn begin(&mut self, _hardware: SharedHardware) -> Result<(), SensorError> {
        self.recorder.record(SensorCall::Begin);
        if self.fail_begin {
            return Err(SensorError::Unsupported("begin"));
        }
        self.started = true;
        Ok(())
    }

    fn end(&mut self) {
        self.recorder.record(SensorCall::End);
        self.started = false;
    }

    fn read(&mut self) -> SensorReading {
        self.recorder.record(SensorCall::Read);
        let next = if self.started {
            self.script.pop_front().unwrap_or(Ok(self.steady))
        } else {
            Err(SensorError::NotInitialized)
        };
        match next {
            Ok(raw) => {
                self.last_error = None;
                self.error_count = 0;
                let value = self.calibration.as_ref().map_or(raw, |c| c.apply(raw));
                SensorReading::valid(&self.descriptor.id, value, "°C").with_raw(raw)
            }
            Err(e) => {
                self.error_count += 1;
                self.last_error = Some(e);
                SensorReading::invalid(&self.descriptor.id)
            }
        }
    }

    fn last_error(&self) -> Option<&SensorError> {
        self.last_error.as_ref()
    }

    fn error_count(&self) -> u32 {
        self.error_count
    }

    fn calibrate(&mut self, data: &CalibrationData) -> Result<(), SensorError> {
        self.recorder.record(SensorCall::Calibrate);
        self.calibration = Some(data.clone());
        Ok(())
    }

    fn calibration(&self) -> Option<&CalibrationData> {
        self.calibration.as_ref()
    }

    fn sleep(&mut self) -> Result<(), SensorError> {
        self.recorder.record(SensorCall::Sleep);
        Ok(())
    }

    fn wake(&mut self) -> Result<(), SensorError> {
        self.recorder.record(SensorCall::Wake);
        Ok(())
    }
}

// ── MockProtocol ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolCall {
    Command { node: String, payload: Value },
    Request { node: String, payload: Value },
    Subscribe { node: String, topic: String },
    Unsubscribe { node: String, topic: String },
    Configure { node: String, payload: Value },
}

#[derive(Default)]
struct ProtocolState {
    peers: Vec<NodeInfo>,
    scans: u32,
    fail_scans: bool,
    reply: Option<Value>,
    fail_with: Option<TransportError>,
    calls: Vec<ProtocolCall>,
    /// How long each scan takes; scans overlapping in time are counted.
    scan_time: Duration,
    scans_in_flight: u32,
    most_in_flight: u32,
}

/// Recording wireless protocol. Clones share state.
#[derive(Clone, Default)]
pub struct MockProtocol {
    state: Arc<Mutex<ProtocolState>>,
}

#[allow(dead_code)]
impl MockProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peer(self, peer: NodeInfo) -> Self {
        self.state.lock().unwrap().peers.push(peer);
        self
    }

    pub fn reply_with(&self, reply: Value) {
        self.state.lock().unwrap().reply = Some(reply);
    }

    pub fn fail_with(&self, err: TransportError) {
        self.state.lock().unwrap().fail_with = Some(err);
    }

    pub fn fail_scans(&self) {
        self.state.lock().unwrap().fail_scans = true;
    }

    pub fn slow_scans(self, scan_time: Duration) -> Self {
        self.state.lock().unwrap().scan_time = scan_time;
        self
    }

    /// Largest number of `scan()` calls seen running at the same time.
    pub fn most_scans_in_flight(&self) -> u32 {
        self.state.lock().unwrap().most_in_flight
    }

    pub fn scans(&self) -> u32 {
        self.state.lock().unwrap().scans
    }

    pub fn calls(&self) -> Vec<ProtocolCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn shared(&self) -> Arc<dyn WirelessProtocol> {
        Arc::new(self.clone())
    }

    fn carry(&self, call: ProtocolCall) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        match &state.fail_with {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

impl WirelessProtocol for MockProtocol {
    fn scan(&self) -> Result<Vec<NodeInfo>, TransportError> {
        let scan_time = {
            let mut state = self.state.lock().unwrap();
            state.scans += 1;
            state.scans_in_flight += 1;
            state.most_in_flight = state.most_in_flight.max(state.scans_in_flight);
            state.scan_time
        };
        if !scan_time.is_zero() {
            std::thread::sleep(scan_time);
        }
        let mut state = self.state.lock().unwrap();
        state.scans_in_flight -= 1;
        if state.fail_scans {
            return Err(TransportError::Timeout);
        }
        Ok(state.peers.clone())
    }

    fn send_command(&self, node: &NodeInfo, payload: &Value) -> Result<(), TransportError> {
        self.carry(ProtocolCall::Command {
            node: node.node_id.clone(),
            payload: payload.clone(),
        })
    }

    fn request_data(&self, node: &NodeInfo, request: &Value) -> Result<Value, TransportError> {
        self.carry(ProtocolCall::Request {
            node: node.node_id.clone(),
            payload: request.clone(),
        })?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .reply
            .clone()
            .unwrap_or_else(|| json!({"value": 0.0})))
    }

    fn subscribe(&self, node: &NodeInfo, topic: &str) -> Result<(), TransportError> {
        self.carry(ProtocolCall::Subscribe {
            node: node.node_id.clone(),
            topic: topic.into(),
        })
    }

    fn unsubscribe(&self, node: &NodeInfo, topic: &str) -> Result<(), TransportError> {
        self.carry(ProtocolCall::Unsubscribe {
            node: node.node_id.clone(),
            topic: topic.into(),
        })
    }

    fn configure(&self, node: &NodeInfo, config: &Value) -> Result<(), TransportError> {
        self.carry(ProtocolCall::Configure {
            node: node.node_id.clone(),
            payload: config.clone(),
        })
    }
}

// ── Fixtures ──────────────────────────────────────────────────

/// Tunables that keep worker tests fast.
#[allow(dead_code)]
pub fn fast_config() -> FleetConfig {
    FleetConfig {
        polling_interval_ms: 10,
        discovery_timeout_ms: 200,
        discovery_poll_interval_ms: 10,
        sensor_warmup_ms: 0,
        ..FleetConfig::default()
    }
}

/// Simulated hardware, kept concrete so tests can script it.
#[allow(dead_code)]
pub fn sim_hardware() -> Arc<Mutex<SimulatedHardware>> {
    Arc::new(Mutex::new(SimulatedHardware::new()))
}

#[allow(dead_code)]
pub fn registry_on(hw: &Arc<Mutex<SimulatedHardware>>, config: &FleetConfig) -> SensorRegistry {
    let shared: SharedHardware = hw.clone();
    SensorRegistry::new(shared, Arc::new(CalibrationEngine::new()), config)
}

/// Poll `done` until it holds or two seconds pass.
#[allow(dead_code)]
pub fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
    while std::time::Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    done()
}
