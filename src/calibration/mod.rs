//! Calibration engine.
//!
//! Holds named fitting methods and the per-sensor calibration records they
//! produce. Records are keyed by sensor id and outlive sensor instances, so
//! a sensor removed and added again picks its calibration back up.
//!
//! ```text
//!   reference points ──▶ method("linear" | "polynomial" | "point" | custom)
//!                                   │
//!                                   ▼
//!                            CalibrationData ──▶ record store ──▶ Sensor::calibrate
//!                                                     │
//!                                                     └──▶ StoragePort (postcard blob)
//! ```

pub mod methods;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::app::ports::{MAX_BLOB_BYTES, StorageError, StoragePort};
use crate::drivers::worker::lock;
use crate::error::CalibrationError;
use crate::sensors::Sensor;
use crate::types::SensorReading;

const STORAGE_NAMESPACE: &str = "calibration";
const STORAGE_KEY: &str = "records";

// ── Payload ───────────────────────────────────────────────────

/// A raw instrument value paired with its trusted reference value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferencePoint {
    pub raw: f64,
    pub reference: f64,
}

impl ReferencePoint {
    pub fn new(raw: f64, reference: f64) -> Self {
        Self { raw, reference }
    }

    /// Pair a reading's raw value with its reported value. Readings with
    /// no raw value use the reported value for both.
    pub fn from_reading(reading: &SensorReading) -> Self {
        Self {
            raw: reading.raw_value.unwrap_or(reading.value),
            reference: reading.value,
        }
    }
}

/// One row of a point table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub raw: f64,
    pub reference: f64,
}

/// Raw-to-physical transform produced by a calibration method.
///
/// Only this module and the sensors that apply it look inside; the
/// registry passes it through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationData {
    /// `value = raw * scale + offset`
    Linear { offset: f64, scale: f64 },
    /// Ascending powers: `c0 + c1*raw + c2*raw² + ...`
    Polynomial { coefficients: Vec<f64> },
    /// Piecewise-linear table sorted by raw value.
    Point { points: Vec<CalibrationPoint> },
}

impl CalibrationData {
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::Linear { .. } => "linear",
            Self::Polynomial { .. } => "polynomial",
            Self::Point { .. } => "point",
        }
    }

    pub fn apply(&self, raw: f64) -> f64 {
        match self {
            Self::Linear { offset, scale } => raw * scale + offset,
            Self::Polynomial { coefficients } => {
                coefficients.iter().rev().fold(0.0, |acc, c| acc * raw + c)
            }
            Self::Point { points } => interpolate(points, raw),
        }
    }

    /// Bring a point table into the form `apply` expects: finite rows,
    /// sorted by raw value, one row per raw value. Other payloads pass
    /// through unchanged.
    pub fn normalized(self) -> Result<Self, CalibrationError> {
        match self {
            Self::Point { points } => normalize_table(points).map(|points| Self::Point { points }),
            other => Ok(other),
        }
    }
}

fn normalize_table(
    mut points: Vec<CalibrationPoint>,
) -> Result<Vec<CalibrationPoint>, CalibrationError> {
    if points.is_empty() {
        return Err(CalibrationError::InsufficientPoints {
            method: "point",
            required: 1,
            provided: 0,
        });
    }
    if points.iter().any(|p| !p.raw.is_finite() || !p.reference.is_finite()) {
        return Err(CalibrationError::Degenerate("non-finite reference point"));
    }
    points.sort_by(|a, b| a.raw.total_cmp(&b.raw));

    // Rows sharing a raw value collapse into their mean.
    let mut table: Vec<CalibrationPoint> = Vec::with_capacity(points.len());
    let mut run = 0usize;
    for p in points {
        match table.last_mut() {
            Some(last) if last.raw == p.raw => {
                run += 1;
                last.reference += (p.reference - last.reference) / run as f64;
            }
            _ => {
                run = 1;
                table.push(p);
            }
        }
    }
    Ok(table)
}

fn interpolate(points: &[CalibrationPoint], raw: f64) -> f64 {
    match points {
        [] => raw,
        [only] => raw + (only.reference - only.raw),
        _ => {
            // Segment containing raw, or the nearest end segment.
            let upper = points
                .iter()
                .position(|p| p.raw > raw)
                .unwrap_or(points.len() - 1)
                .clamp(1, points.len() - 1);
            let (a, b) = (points[upper - 1], points[upper]);
            a.reference + (raw - a.raw) * (b.reference - a.reference) / (b.raw - a.raw)
        }
    }
}

// ── Engine ────────────────────────────────────────────────────

/// A fitting algorithm: reference points plus a parameter bag in, payload out.
pub type CalibrationMethod = Arc<
    dyn Fn(&[ReferencePoint], &Value) -> Result<CalibrationData, CalibrationError> + Send + Sync,
>;

/// Named methods plus the calibration record store.
///
/// Methods and records sit behind separate locks; a method runs with
/// neither held.
pub struct CalibrationEngine {
    methods: Mutex<BTreeMap<String, CalibrationMethod>>,
    records: Mutex<BTreeMap<String, CalibrationData>>,
}

impl Default for CalibrationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CalibrationEngine {
    /// Engine with the built-in `linear`, `polynomial` and `point` methods.
    pub fn new() -> Self {
        let mut builtin: BTreeMap<String, CalibrationMethod> = BTreeMap::new();
        builtin.insert("linear".into(), Arc::new(methods::linear));
        builtin.insert("polynomial".into(), Arc::new(methods::polynomial));
        builtin.insert("point".into(), Arc::new(methods::point));
        Self {
            methods: Mutex::new(builtin),
            records: Mutex::new(BTreeMap::new()),
        }
    }

    // ── Methods ───────────────────────────────────────────────

    pub fn register_method(
        &self,
        name: &str,
        method: impl Fn(&[ReferencePoint], &Value) -> Result<CalibrationData, CalibrationError>
        + Send
        + Sync
        + 'static,
    ) -> Result<(), CalibrationError> {
        let mut methods = lock(&self.methods);
        if methods.contains_key(name) {
            return Err(CalibrationError::DuplicateName(name.into()));
        }
        methods.insert(name.into(), Arc::new(method));
        info!("Calibration: registered method '{}'", name);
        Ok(())
    }

    pub fn unregister_method(&self, name: &str) -> Result<(), CalibrationError> {
        lock(&self.methods)
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| CalibrationError::NotFound(name.into()))
    }

    pub fn methods(&self) -> Vec<String> {
        lock(&self.methods).keys().cloned().collect()
    }

    pub fn has_method(&self, name: &str) -> bool {
        lock(&self.methods).contains_key(name)
    }

    /// Run a named method over reference points.
    pub fn apply_method(
        &self,
        name: &str,
        points: &[ReferencePoint],
        params: &Value,
    ) -> Result<CalibrationData, CalibrationError> {
        let method = lock(&self.methods)
            .get(name)
            .cloned()
            .ok_or_else(|| CalibrationError::UnknownMethod(name.into()))?;
        let data = method(points, params)?;
        info!(
            "Calibration: '{}' fitted {} point(s) -> {}",
            name,
            points.len(),
            data.method_name()
        );
        Ok(data)
    }

    /// Decode a descriptor's calibration bag into a normalized payload.
    pub fn decode_payload(&self, bag: &Value) -> Result<CalibrationData, CalibrationError> {
        serde_json::from_value::<CalibrationData>(bag.clone())
            .map_err(|e| CalibrationError::Encoding(e.to_string()))?
            .normalized()
    }

    // ── Records ───────────────────────────────────────────────

    /// Store `data` as given. `calibrate_sensor_with` is the checked path.
    pub fn set_record(&self, sensor_id: &str, data: CalibrationData) {
        lock(&self.records).insert(sensor_id.into(), data);
    }

    pub fn record(&self, sensor_id: &str) -> Option<CalibrationData> {
        lock(&self.records).get(sensor_id).cloned()
    }

    pub fn has_record(&self, sensor_id: &str) -> bool {
        lock(&self.records).contains_key(sensor_id)
    }

    pub fn remove_record(&self, sensor_id: &str) -> Result<(), CalibrationError> {
        lock(&self.records)
            .remove(sensor_id)
            .map(|_| ())
            .ok_or_else(|| CalibrationError::NotFound(sensor_id.into()))
    }

    pub fn clear_records(&self) {
        lock(&self.records).clear();
    }

    pub fn record_ids(&self) -> Vec<String> {
        lock(&self.records).keys().cloned().collect()
    }

    // ── Applying to sensors ───────────────────────────────────

    /// Apply the stored record for this sensor, if any.
    ///
    /// Returns `Ok(false)` when no record exists: the sensor simply stays
    /// uncalibrated.
    pub fn calibrate_sensor(&self, sensor: &mut dyn Sensor) -> Result<bool, CalibrationError> {
        let Some(data) = self.record(sensor.id()) else {
            return Ok(false);
        };
        apply_to(sensor, &data)?;
        Ok(true)
    }

    /// Normalize `data`, apply it to the sensor and store it as the
    /// sensor's record.
    pub fn calibrate_sensor_with(
        &self,
        sensor: &mut dyn Sensor,
        data: CalibrationData,
    ) -> Result<(), CalibrationError> {
        let data = data.normalized()?;
        apply_to(sensor, &data)?;
        self.set_record(sensor.id(), data);
        Ok(())
    }

    /// Fit with a named method, then apply and store, as one step.
    pub fn calibrate_sensor_with_method(
        &self,
        sensor: &mut dyn Sensor,
        points: &[ReferencePoint],
        method: &str,
        params: &Value,
    ) -> Result<CalibrationData, CalibrationError> {
        let data = self.apply_method(method, points, params)?;
        self.calibrate_sensor_with(sensor, data.clone())?;
        Ok(data)
    }

    // ── Persistence ───────────────────────────────────────────

    /// Write every record as one blob.
    pub fn save(&self, store: &mut dyn StoragePort) -> Result<(), CalibrationError> {
        let bytes = {
            let records = lock(&self.records);
            postcard::to_allocvec(&*records).map_err(|e| CalibrationError::Encoding(e.to_string()))?
        };
        if bytes.len() > MAX_BLOB_BYTES {
            return Err(StorageError::Full.into());
        }
        store.write(STORAGE_NAMESPACE, STORAGE_KEY, &bytes)?;
        info!("Calibration: saved {} byte(s)", bytes.len());
        Ok(())
    }

    /// Replace every record with the stored set.
    ///
    /// Decodes completely before touching the live store, so a corrupt
    /// blob leaves the current records in place.
    pub fn load(&self, store: &dyn StoragePort) -> Result<usize, CalibrationError> {
        let mut buf = vec![0u8; MAX_BLOB_BYTES];
        let n = store.read(STORAGE_NAMESPACE, STORAGE_KEY, &mut buf)?;
        let loaded: BTreeMap<String, CalibrationData> =
            postcard::from_bytes(&buf[..n]).map_err(|e| {
                warn!("Calibration: stored records unreadable: {}", e);
                CalibrationError::Storage(StorageError::Corrupted)
            })?;
        let loaded = loaded
            .into_iter()
            .map(|(id, data)| data.normalized().map(|data| (id, data)))
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map_err(|e| {
                warn!("Calibration: stored record rejected: {}", e);
                CalibrationError::Storage(StorageError::Corrupted)
            })?;
        let count = loaded.len();
        *lock(&self.records) = loaded;
        info!("Calibration: loaded {} record(s)", count);
        Ok(count)
    }
}

fn apply_to(sensor: &mut dyn Sensor, data: &CalibrationData) -> Result<(), CalibrationError> {
    sensor
        .calibrate(data)
        .map_err(|reason| CalibrationError::Rejected {
            sensor_id: sensor.id().to_string(),
            reason,
        })
}
