//! Local proxy for a sensor living on a wireless node.
//!
//! Reads are request/response over whatever transport the node is
//! registered with. The node answers `{"op": "read", "sensor": <id>}` with
//!
//! ```json
//! { "value": 21.5, "unit": "°C", "raw": 2150,
//!   "channels": { "humidity": { "value": 40.0, "unit": "%" } } }
//! ```
//!
//! where every field is optional as long as `value` or `channels` is
//! present. A bare number is accepted as `{"value": n}`.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::app::ports::SharedHardware;
use crate::calibration::CalibrationData;
use crate::error::{SensorError, TransportError, WirelessError};
use crate::sensors::{Capabilities, Sensor};
use crate::types::{SensorBus, SensorDescriptor, SensorReading, SensorType};
use crate::wireless::{NodeInfo, NodeStatus, WirelessNodeManager};

pub const DRIVER: &str = "remote";

#[derive(Debug, Deserialize)]
struct ReadResponse {
    value: Option<f64>,
    unit: Option<String>,
    raw: Option<f64>,
    #[serde(default)]
    channels: BTreeMap<String, ChannelValue>,
}

#[derive(Debug, Deserialize)]
struct ChannelValue {
    value: f64,
    unit: Option<String>,
    raw: Option<f64>,
}

pub struct RemoteSensor {
    descriptor: SensorDescriptor,
    node_id: String,
    manager: WirelessNodeManager,
    started: bool,
    calibration: Option<CalibrationData>,
    last_error: Option<SensorError>,
    error_count: u32,
}

impl RemoteSensor {
    pub fn from_descriptor(
        descriptor: SensorDescriptor,
        manager: WirelessNodeManager,
    ) -> Result<Self, SensorError> {
        let node_id = descriptor
            .wireless
            .as_ref()
            .map(|b| b.node_id.clone())
            .ok_or(SensorError::MissingParameter("wireless"))?;
        Ok(Self {
            descriptor,
            node_id,
            manager,
            started: false,
            calibration: None,
            last_error: None,
            error_count: 0,
        })
    }

    /// Descriptor for a sensor of `sensor_type` on a discovered node.
    pub fn descriptor_for(node: &NodeInfo, sensor_type: SensorType) -> SensorDescriptor {
        SensorDescriptor::new(
            format!("{}-{}", node.node_id, sensor_type),
            DRIVER,
            sensor_type,
            SensorBus::Wireless,
        )
        .with_name(node.name.clone())
        .with_wireless(node.node_id.clone(), node.protocol.clone())
    }

    /// Factory constructor bound to `manager`, for
    /// [`SensorRegistry::register_driver`](crate::registry::SensorRegistry::register_driver).
    pub fn constructor(
        manager: WirelessNodeManager,
    ) -> impl Fn(&SensorDescriptor) -> Result<Box<dyn Sensor>, SensorError> + Send + Sync + 'static
    {
        move |d: &SensorDescriptor| {
            Self::from_descriptor(d.clone(), manager.clone())
                .map(|s| Box::new(s) as Box<dyn Sensor>)
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    fn command(&self, op: &str) -> Result<(), SensorError> {
        self.manager
            .send_command(&self.node_id, &json!({"op": op, "sensor": self.descriptor.id}))
            .map_err(from_wireless)
    }

    fn sample(&self) -> Result<Vec<SensorReading>, SensorError> {
        if !self.started {
            return Err(SensorError::NotInitialized);
        }
        let response = self
            .manager
            .request_data(&self.node_id, &json!({"op": "read", "sensor": self.descriptor.id}))
            .map_err(from_wireless)?;
        let response = match response {
            Value::Number(n) => ReadResponse {
                value: n.as_f64(),
                unit: None,
                raw: None,
                channels: BTreeMap::new(),
            },
            other => serde_json::from_value(other)
                .map_err(|e| SensorError::InvalidPayload(e.to_string()))?,
        };
        if response.value.is_none() && response.channels.is_empty() {
            return Err(SensorError::InvalidPayload("no value or channels".into()));
        }

        let mut readings = Vec::with_capacity(1 + response.channels.len());
        if let Some(value) = response.value {
            readings.push(self.reading(value, response.raw, response.unit.as_deref()));
        }
        for (channel, c) in response.channels {
            readings.push(
                self.reading(c.value, c.raw, c.unit.as_deref())
                    .with_channel(channel),
            );
        }
        Ok(readings)
    }

    /// Calibration maps the node's raw count when it sends one, otherwise
    /// its reported value. Uncalibrated readings keep the reported value.
    fn reading(&self, value: f64, raw: Option<f64>, unit: Option<&str>) -> SensorReading {
        let raw = raw.unwrap_or(value);
        let value = self.calibration.as_ref().map_or(value, |c| c.apply(raw));
        SensorReading::valid(&self.descriptor.id, value, unit.unwrap_or_default())
            .with_raw(raw)
            .with_meta("node", self.node_id.clone())
    }
}

/// Wireless routing failures as seen from one sensor.
fn from_wireless(e: WirelessError) -> SensorError {
    match e {
        WirelessError::Transport(t) => SensorError::Transport(t),
        WirelessError::NotFound(id) => SensorError::NodeUnknown(id),
        WirelessError::ProtocolUnavailable { protocol, .. } => {
            SensorError::UnknownProtocol(protocol)
        }
        other => SensorError::Transport(TransportError::Io(other.to_string())),
    }
}

impl Sensor for RemoteSensor {
    fn descriptor(&self) -> &SensorDescriptor {
        &self.descriptor
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            calibratable: true,
            sleepable: true,
            multi_value: true,
        }
    }

    /// Remote sensors own no local hardware; starting only checks that the
    /// node is known.
    fn begin(&mut self, _hardware: SharedHardware) -> Result<(), SensorError> {
        if !self.manager.is_node_registered(&self.node_id) {
            return Err(SensorError::NodeUnknown(self.node_id.clone()));
        }
        self.started = true;
        Ok(())
    }

    fn end(&mut self) {
        self.started = false;
    }

    fn read(&mut self) -> SensorReading {
        let mut readings = self.read_all();
        let mut first = readings.swap_remove(0);
        if first.is_valid {
            first.channel = None;
        }
        first
    }

    fn read_all(&mut self) -> Vec<SensorReading> {
        match self.sample() {
            Ok(readings) => {
                self.last_error = None;
                self.error_count = 0;
                readings
            }
            Err(err) => {
                self.error_count = self.error_count.saturating_add(1);
                let reading = SensorReading::invalid(&self.descriptor.id)
                    .with_meta("node", self.node_id.clone())
                    .with_meta("error", err.to_string());
                self.last_error = Some(err);
                vec![reading]
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
        self.calibration = Some(data.clone());
        Ok(())
    }

    fn calibration(&self) -> Option<&CalibrationData> {
        self.calibration.as_ref()
    }

    fn sleep(&mut self) -> Result<(), SensorError> {
        self.command("sleep")
    }

    fn wake(&mut self) -> Result<(), SensorError> {
        self.command("wake")
    }

    fn is_connected(&self) -> bool {
        self.manager
            .node_info(&self.node_id)
            .is_some_and(|n| n.status == NodeStatus::Connected)
    }
}
