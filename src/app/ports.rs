//! Port traits: the hexagonal boundary between the fleet core and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Registry / Discovery / Calibration (core)
//! ```
//!
//! Driven adapters (pin I/O, flash storage, radio transports, log/telemetry
//! sinks) implement these traits. The core only ever holds trait objects,
//! so nothing in `registry`, `wireless`, `decoder` or `calibration` touches
//! ESP-IDF directly.

use core::fmt;
use std::sync::{Arc, Mutex};

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::PinState;
use serde_json::Value;

use crate::app::config_store::ConfigChange;
use crate::error::{BusError, TransportError};
use crate::registry::SensorFault;
use crate::types::SensorReading;
use crate::wireless::{NodeData, NodeInfo, NodeStatusChange};

// ───────────────────────────────────────────────────────────────
// Hardware capability port (driven adapter: core ↔ pins and buses)
// ───────────────────────────────────────────────────────────────

/// Electrical mode of a GPIO pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Output,
    Input,
    InputPullup,
}

/// Pin I/O, timed delay and bus primitives.
///
/// Timed delays come from the [`DelayNs`] supertrait (`delay_ms`,
/// `delay_us`, `delay_ns`). Bus primitives default to
/// [`BusError::Unsupported`] so a board that only wires single-wire
/// sensors implements just the pin methods.
pub trait HardwarePort: DelayNs + Send {
    fn pin_mode(&mut self, pin: u8, mode: PinMode);

    fn digital_write(&mut self, pin: u8, level: PinState);

    fn digital_read(&mut self, pin: u8) -> PinState;

    /// Raw ADC counts.
    fn analog_read(&mut self, _pin: u8) -> Result<u16, BusError> {
        Err(BusError::Unsupported)
    }

    /// PWM/DAC output.
    fn analog_write(&mut self, _pin: u8, _value: u16) -> Result<(), BusError> {
        Err(BusError::Unsupported)
    }

    /// Monotonic milliseconds since the hardware was bound.
    fn millis(&self) -> u64;

    fn i2c_write(&mut self, _bus: u8, _address: u8, _data: &[u8]) -> Result<(), BusError> {
        Err(BusError::Unsupported)
    }

    /// Returns the number of bytes read into `buf`.
    fn i2c_read(&mut self, _bus: u8, _address: u8, _buf: &mut [u8]) -> Result<usize, BusError> {
        Err(BusError::Unsupported)
    }

    /// Full-duplex transfer with `cs_pin` asserted for the duration.
    fn spi_transfer(
        &mut self,
        _bus: u8,
        _cs_pin: u8,
        _tx: &[u8],
        _rx: &mut [u8],
    ) -> Result<(), BusError> {
        Err(BusError::Unsupported)
    }
}

/// Hardware handle shared by every local sensor instance.
///
/// Holding the lock serialises pin traffic: the bit-timing decoder keeps it
/// for the whole bounded exchange so no other sensor can toggle a pin
/// mid-frame.
pub type SharedHardware = Arc<Mutex<dyn HardwarePort>>;

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: core ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage for descriptors and calibration records.
///
/// Keys are namespaced to prevent collisions between subsystems. Writes
/// either fully replace the stored value or fail.
pub trait StoragePort {
    /// Read a value. Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key. Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

/// Largest blob the stores write in one key.
pub const MAX_BLOB_BYTES: usize = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    NotFound,
    Full,
    IoError,
    /// Stored bytes could not be decoded.
    Corrupted,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "storage I/O error"),
            Self::Corrupted => write!(f, "stored data corrupted"),
        }
    }
}

impl std::error::Error for StorageError {}

// ───────────────────────────────────────────────────────────────
// Wireless protocol port (driven adapter: core ↔ BLE / ESP-NOW / MQTT)
// ───────────────────────────────────────────────────────────────

/// One named wireless transport.
///
/// The discovery engine polls [`scan`](Self::scan) repeatedly while a scan
/// is active; node operations are routed here by the node's declared
/// protocol name. Implementations are shared across the discovery worker
/// and foreground callers, hence `&self` and `Send + Sync`.
pub trait WirelessProtocol: Send + Sync {
    /// Peers currently visible. Called once per discovery poll.
    fn scan(&self) -> Result<Vec<NodeInfo>, TransportError>;

    fn send_command(&self, node: &NodeInfo, payload: &Value) -> Result<(), TransportError>;

    fn request_data(&self, node: &NodeInfo, request: &Value) -> Result<Value, TransportError>;

    fn subscribe(&self, node: &NodeInfo, topic: &str) -> Result<(), TransportError>;

    fn unsubscribe(&self, node: &NodeInfo, topic: &str) -> Result<(), TransportError>;

    /// Push configuration to the node. Transports without a dedicated
    /// configuration channel send it as a command.
    fn configure(&self, node: &NodeInfo, config: &Value) -> Result<(), TransportError> {
        self.send_command(node, config)
    }
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: core → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// Consumer side of the fleet's notifications.
///
/// [`FleetQueues::dispatch`](crate::events::FleetQueues::dispatch) drains
/// the per-kind event queues into a sink on the consumer's own thread, so
/// implementations may freely call back into the registries.
pub trait EventSink {
    fn on_reading(&mut self, _reading: &SensorReading) {}

    fn on_fault(&mut self, _fault: &SensorFault) {}

    fn on_node_discovered(&mut self, _node: &NodeInfo) {}

    fn on_node_status(&mut self, _change: &NodeStatusChange) {}

    fn on_node_data(&mut self, _data: &NodeData) {}

    fn on_config_changed(&mut self, _change: &ConfigChange) {}
}
