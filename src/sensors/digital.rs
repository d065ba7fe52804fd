//! Single-wire digital sensors (DHT11, DHT22/AM2302).
//!
//! Bus parameters: `{"pin": <u8>, "protocol": "<name>"}`. The protocol
//! selects both the timing table and the conversion row; the descriptor's
//! type selects which quantity [`Sensor::read`] returns.

use serde::Deserialize;

use crate::app::ports::{PinMode, SharedHardware};
use crate::calibration::CalibrationData;
use crate::decoder::conversion::{self, DeviceFamily, Quantity};
use crate::decoder::{BitTimingDecoder, protocol};
use crate::drivers::worker::lock;
use crate::error::{DecodeError, SensorError};
use crate::sensors::{Capabilities, Sensor, decode_bus_params};
use crate::types::{SensorDescriptor, SensorReading, SensorType};

use embedded_hal::digital::PinState;

pub const DRIVER: &str = "digital";

#[derive(Debug, Deserialize)]
struct DigitalParams {
    pin: Option<u8>,
    protocol: Option<String>,
}

pub struct DigitalSensor {
    descriptor: SensorDescriptor,
    decoder: BitTimingDecoder,
    family: &'static DeviceFamily,
    hardware: Option<SharedHardware>,
    warmup_ms: u32,
    calibration: Option<CalibrationData>,
    last_error: Option<SensorError>,
}

impl DigitalSensor {
    /// Decode bus parameters and look up the protocol.
    pub fn from_descriptor(
        descriptor: SensorDescriptor,
        warmup_ms: u32,
    ) -> Result<Self, SensorError> {
        let params: DigitalParams = decode_bus_params(&descriptor.bus_params)?;
        let pin = params.pin.ok_or(SensorError::MissingParameter("pin"))?;
        let name = params.protocol.ok_or(SensorError::MissingParameter("protocol"))?;
        let proto =
            protocol::lookup(&name).ok_or_else(|| SensorError::UnknownProtocol(name.clone()))?;
        let family = conversion::family_for(proto.name).ok_or(SensorError::UnknownProtocol(name))?;

        Ok(Self {
            descriptor,
            decoder: BitTimingDecoder::new(proto, pin),
            family,
            hardware: None,
            warmup_ms,
            calibration: None,
            last_error: None,
        })
    }

    pub fn decoder(&self) -> &BitTimingDecoder {
        &self.decoder
    }

    fn primary(&self) -> Quantity {
        let wanted = match self.descriptor.sensor_type {
            SensorType::Humidity => Some(Quantity::Humidity),
            SensorType::Temperature => Some(Quantity::Temperature),
            _ => None,
        };
        wanted
            .filter(|q| self.family.quantities().any(|have| have == *q))
            .or_else(|| self.family.quantities().next())
            .unwrap_or(Quantity::Temperature)
    }

    /// One exchange on the line, converted to calibrated readings.
    fn sample(&mut self) -> Result<Vec<SensorReading>, SensorError> {
        let hardware = self.hardware.as_ref().ok_or(SensorError::NotInitialized)?;
        let frame = {
            let mut hw = lock(hardware);
            self.decoder.decode(&mut *hw)?
        };

        let protocol = self.decoder.protocol().name;
        Ok(self
            .family
            .convert(&frame)
            .into_iter()
            .map(|(quantity, raw)| {
                let value = self.calibration.as_ref().map_or(raw, |c| c.apply(raw));
                SensorReading::valid(&self.descriptor.id, value, quantity.unit())
                    .with_channel(quantity.name())
                    .with_raw(raw)
                    .with_meta("protocol", protocol)
                    .with_meta("quantity", quantity.name())
            })
            .collect())
    }

    fn failed(&mut self, err: SensorError) -> SensorReading {
        let reading = SensorReading::invalid(&self.descriptor.id)
            .with_meta("protocol", self.decoder.protocol().name)
            .with_meta("error", err.to_string());
        self.last_error = Some(err);
        reading
    }
}

impl Sensor for DigitalSensor {
    fn descriptor(&self) -> &SensorDescriptor {
        &self.descriptor
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            calibratable: true,
            sleepable: false,
            multi_value: true,
        }
    }

    fn begin(&mut self, hardware: SharedHardware) -> Result<(), SensorError> {
        {
            let mut hw = lock(&hardware);
            let pin = self.decoder.pin();
            hw.pin_mode(pin, PinMode::Output);
            hw.digital_write(pin, PinState::High);
            // Device needs to settle after power-up before the first start signal.
            hw.delay_ms(self.warmup_ms);
        }
        self.hardware = Some(hardware);
        self.last_error = None;
        Ok(())
    }

    fn end(&mut self) {
        self.hardware = None;
    }

    fn read(&mut self) -> SensorReading {
        let primary = self.primary().name();
        let mut readings = self.read_all();
        let idx = readings
            .iter()
            .position(|r| r.channel.as_deref() == Some(primary))
            .unwrap_or(0);
        let mut reading = readings.swap_remove(idx);
        if reading.is_valid {
            reading.channel = None;
        }
        reading
    }

    fn read_all(&mut self) -> Vec<SensorReading> {
        match self.sample() {
            Ok(readings) => {
                self.last_error = None;
                readings
            }
            Err(err) => vec![self.failed(err)],
        }
    }

    fn last_error(&self) -> Option<&SensorError> {
        self.last_error.as_ref()
    }

    fn error_count(&self) -> u32 {
        self.decoder.error_count()
    }

    fn calibrate(&mut self, data: &CalibrationData) -> Result<(), SensorError> {
        self.calibration = Some(data.clone());
        Ok(())
    }

    fn calibration(&self) -> Option<&CalibrationData> {
        self.calibration.as_ref()
    }

    fn is_connected(&self) -> bool {
        self.hardware.is_some()
            && !matches!(
                self.last_error,
                Some(SensorError::Decode(DecodeError::NoResponse { .. }))
            )
    }

    fn units(&self) -> Vec<String> {
        self.family.quantities().map(|q| q.unit().to_string()).collect()
    }

    fn power_consumption_ma(&self) -> f32 {
        self.family.supply_current_ma
    }
}
