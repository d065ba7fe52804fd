//! Sensor configuration manager.
//!
//! Holds the descriptor set the application boots from, validates every
//! descriptor before it is accepted, and moves the whole set to and from
//! JSON and the [`StoragePort`].
//!
//! ```text
//!   load_json / load ──▶ validate (built-in + per-type) ──▶ map ──▶ ConfigChange
//!                                                             │
//!                                   export_json / save ◀──────┘
//! ```
//!
//! The JSON document is `{"sensors": [<descriptor>, ...]}`; a bare array
//! is accepted on import.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::app::ports::{MAX_BLOB_BYTES, StorageError, StoragePort};
use crate::decoder::conversion::{self, Quantity};
use crate::decoder::protocol;
use crate::drivers::worker::lock;
use crate::error::ConfigError;
use crate::sensors::{analog, digital, remote};
use crate::types::{SensorBus, SensorDescriptor, SensorType};

pub const STORAGE_NAMESPACE: &str = "sensorcfg";
pub const STORAGE_KEY: &str = "descriptors";

const DEFAULT_DIGITAL_PIN: u8 = 4;
const DEFAULT_ANALOG_PIN: u8 = 1;
const DEFAULT_DIGITAL_PROTOCOL: &str = "DHT22";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigChangeKind {
    Added,
    Updated,
    Removed,
    Cleared,
    Loaded,
}

/// Notification payload. `sensor_id` is `None` for whole-set changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChange {
    pub sensor_id: Option<String>,
    pub kind: ConfigChangeKind,
}

impl ConfigChange {
    fn one(id: &str, kind: ConfigChangeKind) -> Self {
        Self {
            sensor_id: Some(id.to_string()),
            kind,
        }
    }

    fn all(kind: ConfigChangeKind) -> Self {
        Self {
            sensor_id: None,
            kind,
        }
    }
}

/// Extra rule for one sensor type. `Err` carries the rejection reason.
pub type ConfigValidator = Arc<dyn Fn(&SensorDescriptor) -> Result<(), String> + Send + Sync>;
pub type ConfigChangedCallback = Arc<dyn Fn(&ConfigChange) + Send + Sync>;

#[derive(Serialize)]
struct DocumentOut<'a> {
    sensors: Vec<&'a SensorDescriptor>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DocumentIn {
    Wrapped { sensors: Vec<SensorDescriptor> },
    Bare(Vec<SensorDescriptor>),
}

impl DocumentIn {
    fn into_sensors(self) -> Vec<SensorDescriptor> {
        match self {
            Self::Wrapped { sensors } | Self::Bare(sensors) => sensors,
        }
    }
}

#[derive(Deserialize)]
struct DigitalBusParams {
    pin: Option<u8>,
    protocol: Option<String>,
}

#[derive(Default)]
pub struct SensorConfigStore {
    descriptors: Mutex<BTreeMap<String, SensorDescriptor>>,
    validators: Mutex<HashMap<SensorType, ConfigValidator>>,
    on_change: Mutex<Option<ConfigChangedCallback>>,
}

impl SensorConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Store ─────────────────────────────────────────────────

    /// Validate and insert or replace a descriptor.
    pub fn set(&self, descriptor: SensorDescriptor) -> Result<(), ConfigError> {
        self.validate(&descriptor)?;
        let id = descriptor.id.clone();
        let previous = lock(&self.descriptors).insert(id.clone(), descriptor);
        let kind = if previous.is_some() {
            ConfigChangeKind::Updated
        } else {
            ConfigChangeKind::Added
        };
        self.notify(&ConfigChange::one(&id, kind));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<SensorDescriptor> {
        lock(&self.descriptors).get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        lock(&self.descriptors).contains_key(id)
    }

    pub fn remove(&self, id: &str) -> Result<SensorDescriptor, ConfigError> {
        let removed = lock(&self.descriptors)
            .remove(id)
            .ok_or_else(|| ConfigError::NotFound(id.into()))?;
        self.notify(&ConfigChange::one(id, ConfigChangeKind::Removed));
        Ok(removed)
    }

    pub fn clear(&self) {
        lock(&self.descriptors).clear();
        self.notify(&ConfigChange::all(ConfigChangeKind::Cleared));
    }

    /// Every descriptor, ordered by id.
    pub fn all(&self) -> Vec<SensorDescriptor> {
        lock(&self.descriptors).values().cloned().collect()
    }

    pub fn by_type(&self, sensor_type: SensorType) -> Vec<SensorDescriptor> {
        self.filtered(|d| d.sensor_type == sensor_type)
    }

    pub fn by_bus(&self, bus: SensorBus) -> Vec<SensorDescriptor> {
        self.filtered(|d| d.bus == bus)
    }

    pub fn len(&self) -> usize {
        lock(&self.descriptors).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.descriptors).is_empty()
    }

    fn filtered(&self, keep: impl Fn(&SensorDescriptor) -> bool) -> Vec<SensorDescriptor> {
        lock(&self.descriptors)
            .values()
            .filter(|d| keep(d))
            .cloned()
            .collect()
    }

    // ── Validation ────────────────────────────────────────────

    /// Add a rule for one sensor type, replacing any earlier one.
    pub fn register_validator(
        &self,
        sensor_type: SensorType,
        validator: impl Fn(&SensorDescriptor) -> Result<(), String> + Send + Sync + 'static,
    ) {
        lock(&self.validators).insert(sensor_type, Arc::new(validator));
    }

    pub fn unregister_validator(&self, sensor_type: SensorType) -> bool {
        lock(&self.validators).remove(&sensor_type).is_some()
    }

    /// Built-in structural rules, then the validator for the descriptor's type.
    pub fn validate(&self, descriptor: &SensorDescriptor) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid {
            id: descriptor.id.clone(),
            reason,
        };

        if descriptor.id.trim().is_empty() {
            return Err(invalid("empty id".into()));
        }
        if descriptor.driver.trim().is_empty() {
            return Err(invalid("empty driver".into()));
        }

        match descriptor.bus {
            SensorBus::Wireless if descriptor.wireless.is_none() => {
                return Err(invalid("wireless bus without a node binding".into()));
            }
            SensorBus::GpioDigital => {
                let params: DigitalBusParams = serde_json::from_value(descriptor.bus_params.clone())
                    .map_err(|e| invalid(format!("bus params: {e}")))?;
                if params.pin.is_none() {
                    return Err(invalid("gpio-digital bus requires 'pin'".into()));
                }
                let name = params
                    .protocol
                    .ok_or_else(|| invalid("gpio-digital bus requires 'protocol'".into()))?;
                if protocol::lookup(&name).is_none() {
                    return Err(invalid(format!("unknown protocol '{name}'")));
                }
            }
            _ => {}
        }

        let validator = lock(&self.validators).get(&descriptor.sensor_type).cloned();
        if let Some(validator) = validator {
            validator(descriptor).map_err(invalid)?;
        }
        Ok(())
    }

    // ── JSON ──────────────────────────────────────────────────

    /// Import a descriptor document.
    ///
    /// Every descriptor is validated before any is applied, so a document
    /// with one bad entry changes nothing. With `replace` the current set is
    /// dropped first; otherwise entries are merged by id.
    pub fn load_json(&self, bytes: &[u8], replace: bool) -> Result<usize, ConfigError> {
        let doc: DocumentIn =
            serde_json::from_slice(bytes).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let incoming = doc.into_sensors();

        let mut staged = BTreeMap::new();
        for descriptor in incoming {
            self.validate(&descriptor)?;
            if staged.contains_key(&descriptor.id) {
                return Err(ConfigError::Invalid {
                    id: descriptor.id,
                    reason: "duplicate id in document".into(),
                });
            }
            staged.insert(descriptor.id.clone(), descriptor);
        }

        let count = staged.len();
        {
            let mut descriptors = lock(&self.descriptors);
            if replace {
                *descriptors = staged;
            } else {
                descriptors.extend(staged);
            }
        }
        info!("Config: loaded {} descriptor(s) (replace={})", count, replace);
        self.notify(&ConfigChange::all(ConfigChangeKind::Loaded));
        Ok(count)
    }

    pub fn export_json(&self) -> Result<Vec<u8>, ConfigError> {
        let descriptors = lock(&self.descriptors);
        let doc = DocumentOut {
            sensors: descriptors.values().collect(),
        };
        serde_json::to_vec(&doc).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    // ── Persistence ───────────────────────────────────────────

    pub fn save(&self, store: &mut dyn StoragePort) -> Result<(), ConfigError> {
        let bytes = self.export_json()?;
        if bytes.len() > MAX_BLOB_BYTES {
            return Err(StorageError::Full.into());
        }
        store.write(STORAGE_NAMESPACE, STORAGE_KEY, &bytes)?;
        info!("Config: saved {} byte(s)", bytes.len());
        Ok(())
    }

    /// Replace the current set with the stored one.
    pub fn load(&self, store: &dyn StoragePort) -> Result<usize, ConfigError> {
        let mut buf = vec![0u8; MAX_BLOB_BYTES];
        let n = store.read(STORAGE_NAMESPACE, STORAGE_KEY, &mut buf)?;
        self.load_json(&buf[..n], true).inspect_err(|e| {
            warn!("Config: stored descriptors rejected: {}", e);
        })
    }

    // ── Generation ────────────────────────────────────────────

    /// Template descriptor for a type on a bus, with the bus's default
    /// driver and parameters. Wireless templates carry no binding yet.
    pub fn default_descriptor(
        id: &str,
        sensor_type: SensorType,
        bus: SensorBus,
    ) -> SensorDescriptor {
        let (driver, params) = match bus {
            SensorBus::GpioDigital => (
                digital::DRIVER,
                json!({"pin": DEFAULT_DIGITAL_PIN, "protocol": DEFAULT_DIGITAL_PROTOCOL}),
            ),
            SensorBus::GpioAnalog => (analog::DRIVER, json!({"pin": DEFAULT_ANALOG_PIN})),
            SensorBus::Wireless => (remote::DRIVER, Value::Null),
            other => (other.as_str(), Value::Null),
        };
        SensorDescriptor::new(id, driver, sensor_type, bus).with_bus_params(params)
    }

    /// Gpio-digital descriptor for a bit-timing protocol. The type is the
    /// first quantity the protocol's device family reports.
    pub fn descriptor_from_protocol(
        protocol_name: &str,
        id: &str,
        pin: u8,
    ) -> Result<SensorDescriptor, ConfigError> {
        let proto = protocol::lookup(protocol_name)
            .ok_or_else(|| ConfigError::UnknownProtocol(protocol_name.into()))?;
        let sensor_type = conversion::family_for(proto.name)
            .and_then(|f| f.quantities().next())
            .map_or(SensorType::Custom, |q| match q {
                Quantity::Temperature => SensorType::Temperature,
                Quantity::Humidity => SensorType::Humidity,
            });
        Ok(
            SensorDescriptor::new(id, digital::DRIVER, sensor_type, SensorBus::GpioDigital)
                .with_bus_params(json!({"pin": pin, "protocol": proto.name})),
        )
    }

    // ── Notification ──────────────────────────────────────────

    pub fn set_change_callback(&self, cb: impl Fn(&ConfigChange) + Send + Sync + 'static) {
        *lock(&self.on_change) = Some(Arc::new(cb));
    }

    fn notify(&self, change: &ConfigChange) {
        let cb = lock(&self.on_change).clone();
        if let Some(cb) = cb {
            cb(change);
        }
    }
}
