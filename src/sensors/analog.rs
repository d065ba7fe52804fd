//! ADC-backed analog sensors.
//!
//! Reads a burst of conversions from one ADC pin, averages them, scales
//! counts to millivolts against the reference voltage, then applies the
//! sensor's calibration (if any) to produce the physical value.
//!
//! Bus parameters:
//!
//! | key               | default | range   |
//! |-------------------|---------|---------|
//! | `pin`             | —       | u8      |
//! | `samples`         | 8       | 1–32    |
//! | `reference_mv`    | 3300    | > 0     |
//! | `resolution_bits` | 12      | 8–16    |
//! | `unit`            | `"mV"`  | any     |

use serde::Deserialize;

use crate::app::ports::SharedHardware;
use crate::calibration::CalibrationData;
use crate::drivers::worker::lock;
use crate::error::SensorError;
use crate::sensors::{Capabilities, Sensor, decode_bus_params};
use crate::types::{SensorDescriptor, SensorReading};

pub const DRIVER: &str = "analog";

const MAX_SAMPLES: u8 = 32;

#[derive(Debug, Deserialize)]
struct AnalogParams {
    pin: Option<u8>,
    #[serde(default = "default_samples")]
    samples: u8,
    #[serde(default = "default_reference_mv")]
    reference_mv: f64,
    #[serde(default = "default_resolution_bits")]
    resolution_bits: u8,
    #[serde(default = "default_unit")]
    unit: String,
}

fn default_samples() -> u8 {
    8
}

fn default_reference_mv() -> f64 {
    3300.0
}

fn default_resolution_bits() -> u8 {
    12
}

fn default_unit() -> String {
    "mV".into()
}

pub struct AnalogSensor {
    descriptor: SensorDescriptor,
    pin: u8,
    samples: u8,
    mv_per_count: f64,
    unit: String,
    hardware: Option<SharedHardware>,
    calibration: Option<CalibrationData>,
    last_error: Option<SensorError>,
    error_count: u32,
}

impl AnalogSensor {
    pub fn from_descriptor(descriptor: SensorDescriptor) -> Result<Self, SensorError> {
        let params: AnalogParams = decode_bus_params(&descriptor.bus_params)?;
        let pin = params.pin.ok_or(SensorError::MissingParameter("pin"))?;
        if !(1..=MAX_SAMPLES).contains(&params.samples) {
            return Err(SensorError::InvalidParameter {
                name: "samples",
                reason: format!("{} not in 1..={MAX_SAMPLES}", params.samples),
            });
        }
        if !(8..=16).contains(&params.resolution_bits) {
            return Err(SensorError::InvalidParameter {
                name: "resolution_bits",
                reason: format!("{} not in 8..=16", params.resolution_bits),
            });
        }
        if params.reference_mv <= 0.0 || !params.reference_mv.is_finite() {
            return Err(SensorError::InvalidParameter {
                name: "reference_mv",
                reason: "must be positive".into(),
            });
        }
        let full_scale = f64::from((1u32 << params.resolution_bits) - 1);

        Ok(Self {
            descriptor,
            pin,
            samples: params.samples,
            mv_per_count: params.reference_mv / full_scale,
            unit: params.unit,
            hardware: None,
            calibration: None,
            last_error: None,
            error_count: 0,
        })
    }

    /// Averaged millivolts over one burst.
    fn sample_mv(&self) -> Result<f64, SensorError> {
        let hardware = self.hardware.as_ref().ok_or(SensorError::NotInitialized)?;
        let mut hw = lock(hardware);
        let mut sum = 0u32;
        for _ in 0..self.samples {
            sum += u32::from(hw.analog_read(self.pin)?);
        }
        Ok(f64::from(sum) / f64::from(self.samples) * self.mv_per_count)
    }
}

impl Sensor for AnalogSensor {
    fn descriptor(&self) -> &SensorDescriptor {
        &self.descriptor
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            calibratable: true,
            ..Capabilities::default()
        }
    }

    fn begin(&mut self, hardware: SharedHardware) -> Result<(), SensorError> {
        // Sample once so a pin without an ADC channel fails at start, not at first poll.
        lock(&hardware).analog_read(self.pin)?;
        self.hardware = Some(hardware);
        Ok(())
    }

    fn end(&mut self) {
        self.hardware = None;
    }

    fn read(&mut self) -> SensorReading {
        match self.sample_mv() {
            Ok(mv) => {
                self.last_error = None;
                self.error_count = 0;
                let value = self.calibration.as_ref().map_or(mv, |c| c.apply(mv));
                SensorReading::valid(&self.descriptor.id, value, &self.unit)
                    .with_raw(mv)
                    .with_meta("pin", self.pin.to_string())
            }
            Err(err) => {
                self.error_count = self.error_count.saturating_add(1);
                let reading =
                    SensorReading::invalid(&self.descriptor.id).with_meta("error", err.to_string());
                self.last_error = Some(err);
                reading
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

    fn units(&self) -> Vec<String> {
        vec![self.unit.clone()]
    }
}
