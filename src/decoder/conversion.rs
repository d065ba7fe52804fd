//! Byte-to-value conversion per device family.
//!
//! Timing is shared across families but the payload layout is not, so
//! each family gets an explicit row here instead of being inferred from
//! its timing table. Adding a family means adding a protocol entry and a
//! row in [`FAMILIES`].

use super::Frame;

/// Physical quantity carried in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Temperature,
    Humidity,
}

impl Quantity {
    pub fn name(self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Self::Temperature => "°C",
            Self::Humidity => "%",
        }
    }
}

/// Where one quantity lives in the frame and how to scale it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Encoding {
    /// `frame[index] * scale + offset`
    Byte { index: usize, scale: f64, offset: f64 },
    /// Big-endian 16-bit value divided by `divisor`. With `signed`, the top
    /// bit of the high byte is a sign flag (sign-magnitude, not two's
    /// complement).
    FixedPoint16 { high: usize, divisor: f64, signed: bool },
}

impl Encoding {
    fn decode(&self, frame: &[u8]) -> Option<f64> {
        match *self {
            Self::Byte {
                index,
                scale,
                offset,
            } => frame.get(index).map(|b| f64::from(*b) * scale + offset),
            Self::FixedPoint16 {
                high,
                divisor,
                signed,
            } => {
                let hi = *frame.get(high)?;
                let lo = *frame.get(high + 1)?;
                if signed {
                    let magnitude = f64::from(u16::from_be_bytes([hi & 0x7F, lo])) / divisor;
                    Some(if hi & 0x80 != 0 { -magnitude } else { magnitude })
                } else {
                    Some(f64::from(u16::from_be_bytes([hi, lo])) / divisor)
                }
            }
        }
    }
}

/// One row of the family table.
#[derive(Debug)]
pub struct DeviceFamily {
    /// Protocol names this layout applies to.
    pub protocols: &'static [&'static str],
    pub channels: &'static [(Quantity, Encoding)],
    /// Typical supply current while measuring.
    pub supply_current_ma: f32,
}

impl DeviceFamily {
    /// Every quantity in the frame, in table order.
    pub fn convert(&self, frame: &Frame) -> Vec<(Quantity, f64)> {
        self.channels
            .iter()
            .filter_map(|(q, enc)| enc.decode(frame).map(|v| (*q, v)))
            .collect()
    }

    pub fn quantities(&self) -> impl Iterator<Item = Quantity> + '_ {
        self.channels.iter().map(|(q, _)| *q)
    }
}

pub static FAMILIES: [DeviceFamily; 2] = [
    DeviceFamily {
        protocols: &["DHT11"],
        channels: &[
            (
                Quantity::Humidity,
                Encoding::Byte {
                    index: 0,
                    scale: 1.0,
                    offset: 0.0,
                },
            ),
            (
                Quantity::Temperature,
                Encoding::Byte {
                    index: 2,
                    scale: 1.0,
                    offset: 0.0,
                },
            ),
        ],
        supply_current_ma: 2.5,
    },
    DeviceFamily {
        protocols: &["DHT22", "AM2302"],
        channels: &[
            (
                Quantity::Humidity,
                Encoding::FixedPoint16 {
                    high: 0,
                    divisor: 10.0,
                    signed: false,
                },
            ),
            (
                Quantity::Temperature,
                Encoding::FixedPoint16 {
                    high: 2,
                    divisor: 10.0,
                    signed: true,
                },
            ),
        ],
        supply_current_ma: 1.5,
    },
];

/// Conversion row for a protocol name (case-insensitive).
pub fn family_for(protocol: &str) -> Option<&'static DeviceFamily> {
    FAMILIES.iter().find(|f| {
        f.protocols
            .iter()
            .any(|p| p.eq_ignore_ascii_case(protocol))
    })
}
