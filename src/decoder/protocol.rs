//! Timing tables for single-wire bit-banged protocols.
//!
//! Each entry is a complete description of the line timing; the decoder
//! algorithm is shared. Lookup is by protocol name, case-insensitive.

use super::MAX_FRAME_BYTES;

/// Named timing table for one single-wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolDescriptor {
    pub name: &'static str,
    /// Host holds the line low this long to wake the device.
    pub start_signal_low_ms: u32,
    /// Then releases it high for this long before switching to input.
    pub start_signal_high_us: u32,
    /// Upper bound on any single edge wait.
    pub bit_timeout_us: u32,
    /// Delay after a rising edge before sampling the bit.
    pub bit_threshold_us: u32,
    /// Device needs this long between conversions.
    pub min_sampling_period_ms: u32,
    pub data_bits: u8,
    /// Trailing byte is the modulo-256 sum of the preceding bytes.
    pub has_checksum: bool,
    /// Enable the MCU's internal pull-up while reading.
    pub use_pullup: bool,
}

impl ProtocolDescriptor {
    pub const fn frame_len(&self) -> usize {
        (self.data_bits as usize).div_ceil(8)
    }

    /// Whether the table fits the decoder's frame buffer and bit framing.
    pub const fn is_well_formed(&self) -> bool {
        self.data_bits > 0
            && self.data_bits % 8 == 0
            && self.frame_len() <= MAX_FRAME_BYTES
            && self.bit_threshold_us < self.bit_timeout_us
            && (!self.has_checksum || self.frame_len() >= 2)
    }
}

pub const DHT11: ProtocolDescriptor = ProtocolDescriptor {
    name: "DHT11",
    start_signal_low_ms: 18,
    start_signal_high_us: 40,
    bit_timeout_us: 100,
    bit_threshold_us: 30,
    min_sampling_period_ms: 2000,
    data_bits: 40,
    has_checksum: true,
    use_pullup: true,
};

pub const DHT22: ProtocolDescriptor = ProtocolDescriptor {
    name: "DHT22",
    start_signal_low_ms: 1,
    start_signal_high_us: 30,
    bit_timeout_us: 100,
    bit_threshold_us: 28,
    min_sampling_period_ms: 2000,
    data_bits: 40,
    has_checksum: true,
    use_pullup: true,
};

/// AM2302 is a DHT22 in a wired package: same timing, different label.
pub const AM2302: ProtocolDescriptor = ProtocolDescriptor {
    name: "AM2302",
    ..DHT22
};

static PROTOCOLS: [&ProtocolDescriptor; 3] = [&DHT11, &DHT22, &AM2302];

/// Find a protocol by name (case-insensitive).
pub fn lookup(name: &str) -> Option<&'static ProtocolDescriptor> {
    PROTOCOLS
        .iter()
        .copied()
        .find(|p| p.name.eq_ignore_ascii_case(name))
}

/// Names of every known protocol, in table order.
pub fn names() -> impl Iterator<Item = &'static str> {
    PROTOCOLS.iter().map(|p| p.name)
}
