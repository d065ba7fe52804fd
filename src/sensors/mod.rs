//! Sensor instances and the driver factory.
//!
//! Every sensor, local or remote, is a [`Sensor`]: readable by definition,
//! with calibration, sleep and multi-value support advertised through
//! [`Capabilities`] rather than a type hierarchy.
//!
//! - [`digital::DigitalSensor`]: single-wire bit-timed devices (DHT family)
//! - [`analog::AnalogSensor`]: ADC pins, burst-averaged
//! - [`remote::RemoteSensor`]: proxy for a sensor on a wireless node

pub mod analog;
pub mod digital;
pub mod remote;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::app::ports::SharedHardware;
use crate::calibration::CalibrationData;
use crate::config::FleetConfig;
use crate::error::{RegistryError, SensorError};
use crate::types::{SensorDescriptor, SensorReading};

/// Optional capabilities beyond reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub calibratable: bool,
    pub sleepable: bool,
    /// `read_all` yields one reading per quantity.
    pub multi_value: bool,
}

/// One live sensor instance.
///
/// Reads never fail loudly: a failed read returns an invalid
/// [`SensorReading`] and leaves the reason in [`last_error`](Self::last_error).
pub trait Sensor: Send {
    fn descriptor(&self) -> &SensorDescriptor;

    fn id(&self) -> &str {
        &self.descriptor().id
    }

    fn capabilities(&self) -> Capabilities;

    /// Lifecycle start. Binds the hardware and readies the device.
    fn begin(&mut self, hardware: SharedHardware) -> Result<(), SensorError>;

    /// Lifecycle stop. Releases the hardware binding.
    fn end(&mut self) {}

    /// Primary reading.
    fn read(&mut self) -> SensorReading;

    /// Every reading one sample yields. Single-value sensors return `[read()]`.
    fn read_all(&mut self) -> Vec<SensorReading> {
        vec![self.read()]
    }

    fn last_error(&self) -> Option<&SensorError>;

    fn has_error(&self) -> bool {
        self.last_error().is_some()
    }

    /// Consecutive failed reads since the last success.
    fn error_count(&self) -> u32;

    fn calibrate(&mut self, _data: &CalibrationData) -> Result<(), SensorError> {
        Err(SensorError::Unsupported("calibration"))
    }

    fn calibration(&self) -> Option<&CalibrationData> {
        None
    }

    fn is_calibrated(&self) -> bool {
        self.calibration().is_some()
    }

    fn sleep(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    fn wake(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    /// Units of the readings this sensor produces.
    fn units(&self) -> Vec<String> {
        Vec::new()
    }

    /// Typical supply current while measuring.
    fn power_consumption_ma(&self) -> f32 {
        0.0
    }
}

/// Decode a descriptor's bus parameter bag; `null` reads as an empty object.
pub(crate) fn decode_bus_params<T: DeserializeOwned>(bag: &Value) -> Result<T, SensorError> {
    let bag = if bag.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        bag.clone()
    };
    serde_json::from_value(bag).map_err(|e| SensorError::InvalidParameter {
        name: "bus_params",
        reason: e.to_string(),
    })
}

/// Builds a sensor instance from its descriptor.
pub type SensorConstructor =
    Arc<dyn Fn(&SensorDescriptor) -> Result<Box<dyn Sensor>, SensorError> + Send + Sync>;

/// Driver name → constructor lookup.
#[derive(Clone, Default)]
pub struct SensorFactory {
    constructors: BTreeMap<String, SensorConstructor>,
}

impl SensorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory with the `digital` and `analog` drivers.
    pub fn with_local_drivers(config: &FleetConfig) -> Self {
        let mut factory = Self::new();
        let warmup_ms = config.sensor_warmup_ms;
        factory.constructors.insert(
            digital::DRIVER.into(),
            Arc::new(move |d: &SensorDescriptor| {
                digital::DigitalSensor::from_descriptor(d.clone(), warmup_ms)
                    .map(|s| Box::new(s) as Box<dyn Sensor>)
            }),
        );
        factory.constructors.insert(
            analog::DRIVER.into(),
            Arc::new(|d: &SensorDescriptor| {
                analog::AnalogSensor::from_descriptor(d.clone())
                    .map(|s| Box::new(s) as Box<dyn Sensor>)
            }),
        );
        factory
    }

    pub fn register(
        &mut self,
        driver: &str,
        constructor: impl Fn(&SensorDescriptor) -> Result<Box<dyn Sensor>, SensorError>
        + Send
        + Sync
        + 'static,
    ) -> Result<(), RegistryError> {
        if self.constructors.contains_key(driver) {
            return Err(RegistryError::DuplicateDriver(driver.into()));
        }
        self.constructors.insert(driver.into(), Arc::new(constructor));
        Ok(())
    }

    pub fn contains(&self, driver: &str) -> bool {
        self.constructors.contains_key(driver)
    }

    pub fn drivers(&self) -> Vec<String> {
        self.constructors.keys().cloned().collect()
    }

    /// Construct the instance for `descriptor`.
    ///
    /// `Ok(Err(..))` is a driver rejecting the descriptor; the outer error
    /// means no driver is registered.
    pub fn build(
        &self,
        descriptor: &SensorDescriptor,
    ) -> Result<Result<Box<dyn Sensor>, SensorError>, RegistryError> {
        let ctor = self
            .constructors
            .get(&descriptor.driver)
            .ok_or_else(|| RegistryError::UnknownSensorType(descriptor.driver.clone()))?;
        Ok(ctor(descriptor))
    }
}
