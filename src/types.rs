//! Shared data model: sensor identity, bus kinds and readings.

use core::fmt;
use core::str::FromStr;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Sensor type ───────────────────────────────────────────────

/// Physical quantity family a sensor reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorType {
    Unknown,
    Temperature,
    Humidity,
    Pressure,
    Light,
    Motion,
    Proximity,
    Gas,
    Voltage,
    Current,
    Accelerometer,
    Gyroscope,
    Magnetometer,
    Gps,
    Flow,
    Level,
    Distance,
    Custom,
}

impl SensorType {
    pub const ALL: [Self; 18] = [
        Self::Unknown,
        Self::Temperature,
        Self::Humidity,
        Self::Pressure,
        Self::Light,
        Self::Motion,
        Self::Proximity,
        Self::Gas,
        Self::Voltage,
        Self::Current,
        Self::Accelerometer,
        Self::Gyroscope,
        Self::Magnetometer,
        Self::Gps,
        Self::Flow,
        Self::Level,
        Self::Distance,
        Self::Custom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Pressure => "pressure",
            Self::Light => "light",
            Self::Motion => "motion",
            Self::Proximity => "proximity",
            Self::Gas => "gas",
            Self::Voltage => "voltage",
            Self::Current => "current",
            Self::Accelerometer => "accelerometer",
            Self::Gyroscope => "gyroscope",
            Self::Magnetometer => "magnetometer",
            Self::Gps => "gps",
            Self::Flow => "flow",
            Self::Level => "level",
            Self::Distance => "distance",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}

// ── Sensor bus ────────────────────────────────────────────────

/// Transport a sensor is attached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SensorBus {
    GpioDigital,
    GpioAnalog,
    I2c,
    Spi,
    Uart,
    Onewire,
    Wireless,
}

impl SensorBus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GpioDigital => "gpio-digital",
            Self::GpioAnalog => "gpio-analog",
            Self::I2c => "i2c",
            Self::Spi => "spi",
            Self::Uart => "uart",
            Self::Onewire => "onewire",
            Self::Wireless => "wireless",
        }
    }
}

impl fmt::Display for SensorBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Descriptor ────────────────────────────────────────────────

/// Which wireless node owns a remote sensor, and over which transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirelessBinding {
    pub node_id: String,
    pub transport: String,
}

/// Identity and configuration of one sensor.
///
/// `bus_params` and `calibration_params` are boundary bags; drivers decode
/// them into typed parameters when they are constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDescriptor {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub sensor_type: SensorType,
    pub bus: SensorBus,
    /// Constructor key in the [`SensorFactory`](crate::sensors::SensorFactory).
    pub driver: String,
    #[serde(default)]
    pub bus_params: Value,
    #[serde(default)]
    pub calibration_params: Value,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub wireless: Option<WirelessBinding>,
}

fn enabled_by_default() -> bool {
    true
}

impl SensorDescriptor {
    pub fn new(
        id: impl Into<String>,
        driver: impl Into<String>,
        sensor_type: SensorType,
        bus: SensorBus,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            sensor_type,
            bus,
            driver: driver.into(),
            bus_params: Value::Null,
            calibration_params: Value::Null,
            enabled: true,
            wireless: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_bus_params(mut self, params: Value) -> Self {
        self.bus_params = params;
        self
    }

    #[must_use]
    pub fn with_calibration_params(mut self, params: Value) -> Self {
        self.calibration_params = params;
        self
    }

    #[must_use]
    pub fn with_wireless(
        mut self,
        node_id: impl Into<String>,
        transport: impl Into<String>,
    ) -> Self {
        self.wireless = Some(WirelessBinding {
            node_id: node_id.into(),
            transport: transport.into(),
        });
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

// ── Reading ───────────────────────────────────────────────────

/// One measurement produced by a read.
///
/// When `is_valid` is false, `value` carries no meaning (it is NaN) and the
/// reason is available from the sensor's last-error accessor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub sensor_id: String,
    /// Quantity name for sensors that report several values per read.
    pub channel: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub value: f64,
    pub raw_value: Option<f64>,
    pub unit: String,
    pub is_valid: bool,
    pub metadata: BTreeMap<String, String>,
}

impl SensorReading {
    pub fn valid(sensor_id: impl Into<String>, value: f64, unit: impl Into<String>) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            channel: None,
            timestamp_ms: crate::adapters::time::epoch_millis(),
            value,
            raw_value: None,
            unit: unit.into(),
            is_valid: true,
            metadata: BTreeMap::new(),
        }
    }

    pub fn invalid(sensor_id: impl Into<String>) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            channel: None,
            timestamp_ms: crate::adapters::time::epoch_millis(),
            value: f64::NAN,
            raw_value: None,
            unit: String::new(),
            is_valid: false,
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    #[must_use]
    pub fn with_raw(mut self, raw: f64) -> Self {
        self.raw_value = Some(raw);
        self
    }

    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Batch key: `id`, or `id/channel` for multi-value sensors.
    pub fn key(&self) -> String {
        match &self.channel {
            Some(channel) => format!("{}/{}", self.sensor_id, channel),
            None => self.sensor_id.clone(),
        }
    }
}
