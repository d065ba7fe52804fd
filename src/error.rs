//! Unified error types for the sensor fleet.
//!
//! Every subsystem has its own error enum so callers can match on exactly
//! the failures that operation can produce; all of them convert into the
//! top-level [`Error`] for code that only needs to propagate.
//!
//! ```text
//!   DecodeError ──▶ SensorError ──▶ RegistryError ──┐
//!   TransportError ──▶ WirelessError ───────────────┤
//!   CalibrationError ───────────────────────────────┼──▶ Error
//!   ConfigError ────────────────────────────────────┤
//!   StorageError ───────────────────────────────────┘
//! ```

use core::fmt;

use crate::app::ports::StorageError;
use crate::wireless::NodeStatus;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible fleet operation funnels into this type.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Registry(RegistryError),
    Wireless(WirelessError),
    Sensor(SensorError),
    Calibration(CalibrationError),
    Config(ConfigError),
    Storage(StorageError),
    /// The hardware capability interface could not be bound.
    Init(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registry(e) => write!(f, "registry: {e}"),
            Self::Wireless(e) => write!(f, "wireless: {e}"),
            Self::Sensor(e) => write!(f, "sensor: {e}"),
            Self::Calibration(e) => write!(f, "calibration: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;

// ---------------------------------------------------------------------------
// Bus errors (hardware capability interface)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// Addressed device did not acknowledge.
    Nack,
    /// Bus transaction did not complete in time.
    Timeout,
    /// The hardware implementation does not provide this primitive.
    Unsupported,
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nack => write!(f, "device did not acknowledge"),
            Self::Timeout => write!(f, "bus timeout"),
            Self::Unsupported => write!(f, "bus primitive not supported"),
        }
    }
}

impl std::error::Error for BusError {}

// ---------------------------------------------------------------------------
// Bit-timing decode errors
// ---------------------------------------------------------------------------

/// Where in the single-wire exchange a timeout happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodePhase {
    /// Waiting for the device to pull the line low after the start signal.
    ResponseLow,
    /// Waiting for the device's response pulse to go high.
    ResponseHigh,
    /// Waiting for the device to release into the first data bit.
    DataStart,
    /// Waiting for the rising edge of data bit `n`.
    Bit(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The device did not produce an edge within `bitTimeoutUs`.
    NoResponse { phase: DecodePhase },
    /// Trailing byte disagrees with the modulo-256 sum of the payload.
    ChecksumError { expected: u8, received: u8 },
    /// Read attempted before the protocol's minimum sampling period elapsed.
    TooFrequent { elapsed_ms: u64, min_ms: u32 },
    /// Protocol asks for more bits than the frame buffer can hold.
    FrameTooLong,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoResponse { phase } => write!(f, "no response ({phase:?})"),
            Self::ChecksumError { expected, received } => {
                write!(f, "checksum mismatch: expected 0x{expected:02X}, got 0x{received:02X}")
            }
            Self::TooFrequent { elapsed_ms, min_ms } => {
                write!(f, "read too frequent: {elapsed_ms}ms since last, minimum {min_ms}ms")
            }
            Self::FrameTooLong => write!(f, "frame exceeds decoder buffer"),
        }
    }
}

impl std::error::Error for DecodeError {}

// ---------------------------------------------------------------------------
// Transport errors (wireless protocol implementations)
// ---------------------------------------------------------------------------

/// Failure reported by a wireless protocol implementation.
///
/// The core never rewrites these; they reach the caller of the wireless
/// operation exactly as the transport produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Timeout,
    NotConnected,
    Rejected(String),
    Io(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "transport timeout"),
            Self::NotConnected => write!(f, "peer not connected"),
            Self::Rejected(msg) => write!(f, "rejected by peer: {msg}"),
            Self::Io(msg) => write!(f, "transport I/O: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

// ---------------------------------------------------------------------------
// Sensor instance errors
// ---------------------------------------------------------------------------

/// Last-error state of a single sensor instance.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorError {
    /// `read` called before a successful `begin`.
    NotInitialized,
    Decode(DecodeError),
    Bus(BusError),
    Transport(TransportError),
    MissingParameter(&'static str),
    InvalidParameter { name: &'static str, reason: String },
    UnknownProtocol(String),
    /// Remote payload could not be decoded.
    InvalidPayload(String),
    /// The bound wireless node is not registered.
    NodeUnknown(String),
    /// The sensor does not offer this capability.
    Unsupported(&'static str),
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "sensor not initialised"),
            Self::Decode(e) => write!(f, "decode: {e}"),
            Self::Bus(e) => write!(f, "bus: {e}"),
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::MissingParameter(name) => write!(f, "missing parameter '{name}'"),
            Self::InvalidParameter { name, reason } => {
                write!(f, "invalid parameter '{name}': {reason}")
            }
            Self::UnknownProtocol(name) => write!(f, "unknown protocol '{name}'"),
            Self::InvalidPayload(msg) => write!(f, "invalid payload: {msg}"),
            Self::NodeUnknown(id) => write!(f, "node '{id}' not registered"),
            Self::Unsupported(what) => write!(f, "{what} not supported"),
        }
    }
}

impl std::error::Error for SensorError {}

impl SensorError {
    /// Soft rejections that say nothing about the health of the device.
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::Decode(DecodeError::TooFrequent { .. }))
    }
}

impl From<DecodeError> for SensorError {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

impl From<BusError> for SensorError {
    fn from(e: BusError) -> Self {
        Self::Bus(e)
    }
}

impl From<TransportError> for SensorError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<SensorError> for Error {
    fn from(e: SensorError) -> Self {
        Self::Sensor(e)
    }
}

// ---------------------------------------------------------------------------
// Calibration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationError {
    DuplicateName(String),
    UnknownMethod(String),
    /// No method or record under this name.
    NotFound(String),
    InsufficientPoints {
        method: &'static str,
        required: usize,
        provided: usize,
    },
    /// Reference set cannot determine a unique fit.
    Degenerate(&'static str),
    InvalidParams(String),
    /// The sensor refused the calibration payload.
    Rejected { sensor_id: String, reason: SensorError },
    Storage(StorageError),
    Encoding(String),
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateName(name) => write!(f, "method '{name}' already registered"),
            Self::UnknownMethod(name) => write!(f, "unknown method '{name}'"),
            Self::NotFound(name) => write!(f, "'{name}' not found"),
            Self::InsufficientPoints {
                method,
                required,
                provided,
            } => write!(
                f,
                "{method} needs at least {required} reference point(s), got {provided}"
            ),
            Self::Degenerate(why) => write!(f, "degenerate reference set: {why}"),
            Self::InvalidParams(msg) => write!(f, "invalid parameters: {msg}"),
            Self::Rejected { sensor_id, reason } => {
                write!(f, "sensor '{sensor_id}' rejected calibration: {reason}")
            }
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Encoding(msg) => write!(f, "encoding: {msg}"),
        }
    }
}

impl std::error::Error for CalibrationError {}

impl From<StorageError> for CalibrationError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<CalibrationError> for Error {
    fn from(e: CalibrationError) -> Self {
        Self::Calibration(e)
    }
}

// ---------------------------------------------------------------------------
// Registry errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    DuplicateId(String),
    NotFound(String),
    /// No constructor registered for the descriptor's driver.
    UnknownSensorType(String),
    DuplicateDriver(String),
    /// The instance's lifecycle start failed.
    InitializationFailed { id: String, reason: SensorError },
    /// The driver rejected the descriptor.
    Configuration { id: String, reason: SensorError },
    AlreadyRunning,
    TaskSpawn(String),
    Calibration(CalibrationError),
    /// A power-state or other instance operation failed.
    Sensor { id: String, reason: SensorError },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateId(id) => write!(f, "sensor '{id}' already exists"),
            Self::NotFound(id) => write!(f, "sensor '{id}' not found"),
            Self::UnknownSensorType(driver) => write!(f, "no driver registered for '{driver}'"),
            Self::DuplicateDriver(driver) => write!(f, "driver '{driver}' already registered"),
            Self::InitializationFailed { id, reason } => {
                write!(f, "sensor '{id}' failed to start: {reason}")
            }
            Self::Configuration { id, reason } => {
                write!(f, "sensor '{id}' rejected configuration: {reason}")
            }
            Self::AlreadyRunning => write!(f, "polling loop already running"),
            Self::TaskSpawn(msg) => write!(f, "worker spawn failed: {msg}"),
            Self::Calibration(e) => write!(f, "calibration: {e}"),
            Self::Sensor { id, reason } => write!(f, "sensor '{id}': {reason}"),
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<CalibrationError> for RegistryError {
    fn from(e: CalibrationError) -> Self {
        Self::Calibration(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Self::Registry(e)
    }
}

// ---------------------------------------------------------------------------
// Wireless errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum WirelessError {
    DuplicateId(String),
    NotFound(String),
    /// A protocol with this name is already registered.
    DuplicateName(String),
    /// Unregistering a protocol that was never registered.
    ProtocolNotFound(String),
    /// The node's declared protocol is not registered.
    ProtocolUnavailable { node_id: String, protocol: String },
    AlreadyRunning,
    InvalidTransition {
        node_id: String,
        from: NodeStatus,
        to: NodeStatus,
    },
    Transport(TransportError),
    TaskSpawn(String),
}

impl fmt::Display for WirelessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateId(id) => write!(f, "node '{id}' already registered"),
            Self::NotFound(id) => write!(f, "node '{id}' not found"),
            Self::DuplicateName(name) => write!(f, "protocol '{name}' already registered"),
            Self::ProtocolNotFound(name) => write!(f, "protocol '{name}' not registered"),
            Self::ProtocolUnavailable { node_id, protocol } => {
                write!(f, "node '{node_id}' uses unavailable protocol '{protocol}'")
            }
            Self::AlreadyRunning => write!(f, "discovery already running"),
            Self::InvalidTransition { node_id, from, to } => {
                write!(f, "node '{node_id}': {from} -> {to} is not a valid transition")
            }
            Self::Transport(e) => write!(f, "{e}"),
            Self::TaskSpawn(msg) => write!(f, "worker spawn failed: {msg}"),
        }
    }
}

impl std::error::Error for WirelessError {}

impl From<TransportError> for WirelessError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<WirelessError> for Error {
    fn from(e: WirelessError) -> Self {
        Self::Wireless(e)
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A descriptor failed structural or per-type validation.
    Invalid { id: String, reason: String },
    MissingField(&'static str),
    UnknownProtocol(String),
    NotFound(String),
    /// A tunable is outside its accepted range.
    OutOfRange(&'static str),
    Parse(String),
    Storage(StorageError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid { id, reason } => write!(f, "descriptor '{id}' invalid: {reason}"),
            Self::MissingField(name) => write!(f, "missing field '{name}'"),
            Self::UnknownProtocol(name) => write!(f, "unknown protocol '{name}'"),
            Self::NotFound(id) => write!(f, "descriptor '{id}' not found"),
            Self::OutOfRange(name) => write!(f, "'{name}' out of range"),
            Self::Parse(msg) => write!(f, "parse: {msg}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<StorageError> for ConfigError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}
