//! Sensor registry and polling scheduler.
//!
//! The registry owns every live sensor instance and one optional polling
//! worker. The instance map is guarded by one lock that is held only for
//! map operations; each sensor sits behind its own lock, so hardware I/O on
//! one sensor never blocks lookups or mutations of the others.
//!
//! ```text
//!   add_descriptor ──▶ SensorFactory ──▶ begin(hw) ──▶ calibration ──▶ map
//!                                                                       │
//!   polling worker ── every interval ── read_all() ◀────────────────────┘
//!        │
//!        ├──▶ reading callback (once per reading)
//!        └──▶ error callback  (once per hard failure)
//! ```

use core::time::Duration;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use log::{debug, info, warn};
use serde_json::Value;

use crate::app::ports::SharedHardware;
use crate::calibration::{CalibrationData, CalibrationEngine, ReferencePoint};
use crate::config::FleetConfig;
use crate::drivers::worker::{Worker, WorkerSpec, lock};
use crate::error::{RegistryError, SensorError};
use crate::sensors::{Sensor, SensorFactory};
use crate::types::{SensorBus, SensorDescriptor, SensorReading, SensorType};

/// Handle to one live sensor. Lock it only for the duration of a call.
pub type SharedSensor = Arc<Mutex<Box<dyn Sensor>>>;

pub type ReadingCallback = Arc<dyn Fn(&SensorReading) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&SensorFault) + Send + Sync>;

/// A hard read failure seen by the polling loop.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorFault {
    pub sensor_id: String,
    pub error: SensorError,
    /// Consecutive failures, as counted by the sensor itself.
    pub error_count: u32,
}

struct SensorEntry {
    sensor: SharedSensor,
    /// Copy kept outside the sensor lock for lookups.
    descriptor: SensorDescriptor,
    asleep: bool,
}

struct Inner {
    sensors: Mutex<BTreeMap<String, SensorEntry>>,
    factory: Mutex<SensorFactory>,
    hardware: SharedHardware,
    calibration: Arc<CalibrationEngine>,
    error_callback: Mutex<Option<ErrorCallback>>,
    poller: Mutex<Option<Worker>>,
    max_consecutive_errors: u32,
    stack_kb: usize,
}

/// Shared handle to the registry. Clones refer to the same registry.
#[derive(Clone)]
pub struct SensorRegistry {
    inner: Arc<Inner>,
}

impl SensorRegistry {
    pub fn new(
        hardware: SharedHardware,
        calibration: Arc<CalibrationEngine>,
        config: &FleetConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sensors: Mutex::new(BTreeMap::new()),
                factory: Mutex::new(SensorFactory::with_local_drivers(config)),
                hardware,
                calibration,
                error_callback: Mutex::new(None),
                poller: Mutex::new(None),
                max_consecutive_errors: config.max_consecutive_errors,
                stack_kb: config.worker_stack_kb as usize,
            }),
        }
    }

    pub fn calibration(&self) -> &Arc<CalibrationEngine> {
        &self.inner.calibration
    }

    pub fn register_driver(
        &self,
        driver: &str,
        constructor: impl Fn(&SensorDescriptor) -> Result<Box<dyn Sensor>, SensorError>
        + Send
        + Sync
        + 'static,
    ) -> Result<(), RegistryError> {
        lock(&self.inner.factory).register(driver, constructor)?;
        info!("Registry: driver '{}' registered", driver);
        Ok(())
    }

    pub fn drivers(&self) -> Vec<String> {
        lock(&self.inner.factory).drivers()
    }

    // ── Membership ────────────────────────────────────────────

    /// Start an already constructed instance and add it.
    pub fn add_sensor(&self, mut sensor: Box<dyn Sensor>) -> Result<(), RegistryError> {
        let descriptor = sensor.descriptor().clone();
        if self.contains(&descriptor.id) {
            return Err(RegistryError::DuplicateId(descriptor.id));
        }
        self.start(sensor.as_mut(), &descriptor)?;
        self.insert(descriptor, sensor)
    }

    /// Construct an instance through the driver factory, start it and add it.
    pub fn add_descriptor(&self, descriptor: SensorDescriptor) -> Result<(), RegistryError> {
        if self.contains(&descriptor.id) {
            return Err(RegistryError::DuplicateId(descriptor.id));
        }
        let mut sensor = self.construct(&descriptor)?;
        self.start(sensor.as_mut(), &descriptor)?;
        self.insert(descriptor, sensor)
    }

    /// Stop the instance and drop it from the registry.
    pub fn remove_sensor(&self, id: &str) -> Result<(), RegistryError> {
        let entry = lock(&self.inner.sensors)
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.into()))?;
        lock(&entry.sensor).end();
        info!("Registry: removed '{}'", id);
        Ok(())
    }

    /// Replace the instance behind `descriptor.id` with one built from the
    /// new descriptor. The old instance keeps running until the new one has
    /// started.
    pub fn reconfigure_sensor(&self, descriptor: SensorDescriptor) -> Result<(), RegistryError> {
        let id = descriptor.id.clone();
        if !self.contains(&id) {
            return Err(RegistryError::NotFound(id));
        }
        let mut sensor = self.construct(&descriptor)?;
        self.start(sensor.as_mut(), &descriptor)?;

        let replaced = {
            let mut sensors = lock(&self.inner.sensors);
            match sensors.get_mut(&id) {
                Some(entry) => {
                    entry.descriptor = descriptor;
                    entry.asleep = false;
                    Ok(core::mem::replace(&mut entry.sensor, Arc::new(Mutex::new(sensor))))
                }
                None => Err(sensor),
            }
        };
        match replaced {
            Ok(old) => lock(&old).end(),
            Err(mut orphan) => {
                // Removed while the replacement was starting.
                orphan.end();
                return Err(RegistryError::NotFound(id));
            }
        }
        info!("Registry: reconfigured '{}'", id);
        Ok(())
    }

    fn construct(&self, descriptor: &SensorDescriptor) -> Result<Box<dyn Sensor>, RegistryError> {
        let built = lock(&self.inner.factory).build(descriptor)?;
        built.map_err(|reason| RegistryError::Configuration {
            id: descriptor.id.clone(),
            reason,
        })
    }

    /// Lifecycle start plus calibration: the stored record if one exists,
    /// otherwise the descriptor's calibration bag.
    fn start(
        &self,
        sensor: &mut dyn Sensor,
        descriptor: &SensorDescriptor,
    ) -> Result<(), RegistryError> {
        sensor
            .begin(Arc::clone(&self.inner.hardware))
            .map_err(|reason| RegistryError::InitializationFailed {
                id: descriptor.id.clone(),
                reason,
            })?;

        let engine = &self.inner.calibration;
        let calibrated = match engine.calibrate_sensor(sensor) {
            Ok(true) => {
                debug!("Registry: '{}' picked up stored calibration", descriptor.id);
                Ok(())
            }
            Ok(false) if descriptor.calibration_params.is_null() => Ok(()),
            Ok(false) => engine
                .decode_payload(&descriptor.calibration_params)
                .and_then(|data| engine.calibrate_sensor_with(sensor, data)),
            Err(e) => Err(e),
        };
        if let Err(e) = calibrated {
            sensor.end();
            return Err(e.into());
        }
        Ok(())
    }

    fn insert(
        &self,
        descriptor: SensorDescriptor,
        sensor: Box<dyn Sensor>,
    ) -> Result<(), RegistryError> {
        let id = descriptor.id.clone();
        let driver = descriptor.driver.clone();
        let rejected = {
            let mut sensors = lock(&self.inner.sensors);
            if sensors.contains_key(&id) {
                // Lost a race with a concurrent add of the same id.
                Some(sensor)
            } else {
                sensors.insert(
                    id.clone(),
                    SensorEntry {
                        sensor: Arc::new(Mutex::new(sensor)),
                        descriptor,
                        asleep: false,
                    },
                );
                None
            }
        };
        if let Some(mut sensor) = rejected {
            sensor.end();
            return Err(RegistryError::DuplicateId(id));
        }
        info!("Registry: added '{}' (driver={})", id, driver);
        Ok(())
    }

    // ── Lookups ───────────────────────────────────────────────

    pub fn sensor(&self, id: &str) -> Option<SharedSensor> {
        lock(&self.inner.sensors).get(id).map(|e| Arc::clone(&e.sensor))
    }

    pub fn all_sensors(&self) -> Vec<SharedSensor> {
        lock(&self.inner.sensors)
            .values()
            .map(|e| Arc::clone(&e.sensor))
            .collect()
    }

    pub fn sensors_by_type(&self, sensor_type: SensorType) -> Vec<SharedSensor> {
        self.select(|d| d.sensor_type == sensor_type)
    }

    pub fn sensors_by_bus(&self, bus: SensorBus) -> Vec<SharedSensor> {
        self.select(|d| d.bus == bus)
    }

    fn select(&self, pred: impl Fn(&SensorDescriptor) -> bool) -> Vec<SharedSensor> {
        lock(&self.inner.sensors)
            .values()
            .filter(|e| pred(&e.descriptor))
            .map(|e| Arc::clone(&e.sensor))
            .collect()
    }

    pub fn sensor_ids(&self) -> Vec<String> {
        lock(&self.inner.sensors).keys().cloned().collect()
    }

    pub fn descriptors(&self) -> Vec<SensorDescriptor> {
        lock(&self.inner.sensors)
            .values()
            .map(|e| e.descriptor.clone())
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        lock(&self.inner.sensors).contains_key(id)
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.sensors).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Reading ───────────────────────────────────────────────

    /// One synchronous read. Failures come back as an invalid reading.
    pub fn read(&self, id: &str) -> Result<SensorReading, RegistryError> {
        let sensor = self
            .sensor(id)
            .ok_or_else(|| RegistryError::NotFound(id.into()))?;
        let reading = lock(&sensor).read();
        Ok(reading)
    }

    /// Read every enabled, awake sensor, keyed by [`SensorReading::key`].
    pub fn read_all(&self) -> BTreeMap<String, SensorReading> {
        self.poll_once()
            .0
            .into_iter()
            .map(|r| (r.key(), r))
            .collect()
    }

    fn poll_once(&self) -> (Vec<SensorReading>, Vec<SensorFault>) {
        let targets: Vec<(String, SharedSensor)> = lock(&self.inner.sensors)
            .iter()
            .filter(|(_, e)| e.descriptor.enabled && !e.asleep)
            .map(|(id, e)| (id.clone(), Arc::clone(&e.sensor)))
            .collect();

        let mut readings = Vec::with_capacity(targets.len());
        let mut faults = Vec::new();
        for (id, shared) in targets {
            let mut sensor = lock(&shared);
            let batch = sensor.read_all();
            let failed = batch.iter().any(|r| !r.is_valid);
            readings.extend(batch);
            if !failed {
                continue;
            }
            let Some(error) = sensor.last_error().filter(|e| !e.is_soft()).cloned() else {
                continue;
            };
            let error_count = sensor.error_count();
            if error_count == self.inner.max_consecutive_errors {
                warn!(
                    "Registry: '{}' failed {} consecutive reads: {}",
                    id, error_count, error
                );
            }
            faults.push(SensorFault {
                sensor_id: id,
                error,
                error_count,
            });
        }
        (readings, faults)
    }

    /// Start the polling worker. `cb` runs once per reading, on the worker.
    pub fn start_reading(
        &self,
        interval: Duration,
        cb: impl Fn(&SensorReading) + Send + Sync + 'static,
    ) -> Result<(), RegistryError> {
        let mut slot = lock(&self.inner.poller);
        if slot.as_ref().is_some_and(|w| !w.is_finished()) {
            return Err(RegistryError::AlreadyRunning);
        }
        // A worker whose body already returned (e.g. a callback panicked).
        if let Some(done) = slot.take() {
            done.stop();
        }

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let spec = WorkerSpec::new("sensor-poll\0", self.inner.stack_kb);
        let worker = Worker::spawn(spec, move |token| {
            info!("Registry: polling every {}ms", interval.as_millis());
            while !token.is_cancelled() {
                // The worker does not keep the registry alive on its own.
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let registry = SensorRegistry { inner };
                let (readings, faults) = registry.poll_once();
                for reading in &readings {
                    cb(reading);
                }
                let on_error = lock(&registry.inner.error_callback).clone();
                if let Some(on_error) = on_error {
                    for fault in &faults {
                        on_error(fault);
                    }
                }
                drop(registry);
                if !token.sleep(interval) {
                    break;
                }
            }
        })
        .map_err(|e| RegistryError::TaskSpawn(e.to_string()))?;

        *slot = Some(worker);
        Ok(())
    }

    /// Stop the polling worker and wait for it to exit.
    pub fn stop_reading(&self) {
        let worker = lock(&self.inner.poller).take();
        if let Some(worker) = worker {
            worker.stop();
            info!("Registry: polling stopped");
        }
    }

    pub fn is_reading(&self) -> bool {
        lock(&self.inner.poller)
            .as_ref()
            .is_some_and(|w| !w.is_finished())
    }

    pub fn set_error_callback(&self, cb: impl Fn(&SensorFault) + Send + Sync + 'static) {
        *lock(&self.inner.error_callback) = Some(Arc::new(cb));
    }

    // ── Calibration ───────────────────────────────────────────

    /// Apply `data` to the sensor and store it as its calibration record.
    pub fn calibrate_sensor(&self, id: &str, data: CalibrationData) -> Result<(), RegistryError> {
        let shared = self
            .sensor(id)
            .ok_or_else(|| RegistryError::NotFound(id.into()))?;
        let mut sensor = lock(&shared);
        self.inner
            .calibration
            .calibrate_sensor_with(&mut **sensor, data)?;
        Ok(())
    }

    /// Calibrate several sensors. Returns the ones that failed.
    pub fn calibrate_all(
        &self,
        data: BTreeMap<String, CalibrationData>,
    ) -> Vec<(String, RegistryError)> {
        data.into_iter()
            .filter_map(|(id, d)| self.calibrate_sensor(&id, d).err().map(|e| (id, e)))
            .collect()
    }

    /// Fit with a named method and apply the result in one step.
    pub fn calibrate_sensor_with_method(
        &self,
        id: &str,
        points: &[ReferencePoint],
        method: &str,
        params: &Value,
    ) -> Result<CalibrationData, RegistryError> {
        let shared = self
            .sensor(id)
            .ok_or_else(|| RegistryError::NotFound(id.into()))?;
        let mut sensor = lock(&shared);
        Ok(self
            .inner
            .calibration
            .calibrate_sensor_with_method(&mut **sensor, points, method, params)?)
    }

    // ── Power ─────────────────────────────────────────────────

    /// Put a sensor to sleep. Sensors that cannot sleep succeed untouched.
    pub fn sleep(&self, id: &str) -> Result<(), RegistryError> {
        self.set_power(id, true)
    }

    pub fn wake(&self, id: &str) -> Result<(), RegistryError> {
        self.set_power(id, false)
    }

    pub fn sleep_all(&self) -> Vec<(String, RegistryError)> {
        self.sensor_ids()
            .into_iter()
            .filter_map(|id| self.sleep(&id).err().map(|e| (id, e)))
            .collect()
    }

    pub fn wake_all(&self) -> Vec<(String, RegistryError)> {
        self.sensor_ids()
            .into_iter()
            .filter_map(|id| self.wake(&id).err().map(|e| (id, e)))
            .collect()
    }

    pub fn is_asleep(&self, id: &str) -> bool {
        lock(&self.inner.sensors).get(id).is_some_and(|e| e.asleep)
    }

    fn set_power(&self, id: &str, asleep: bool) -> Result<(), RegistryError> {
        let shared = self
            .sensor(id)
            .ok_or_else(|| RegistryError::NotFound(id.into()))?;
        {
            let mut sensor = lock(&shared);
            if !sensor.capabilities().sleepable {
                return Ok(());
            }
            let result = if asleep { sensor.sleep() } else { sensor.wake() };
            result.map_err(|reason| RegistryError::Sensor {
                id: id.into(),
                reason,
            })?;
        }
        if let Some(entry) = lock(&self.inner.sensors).get_mut(id) {
            entry.asleep = asleep;
        }
        debug!("Registry: '{}' {}", id, if asleep { "asleep" } else { "awake" });
        Ok(())
    }
}
