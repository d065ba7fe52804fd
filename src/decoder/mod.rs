//! Single-wire bit-timing decoder.
//!
//! Recovers a frame of bytes from a device that encodes each bit as the
//! width of a high pulse. One algorithm serves every protocol in
//! [`protocol`]; only the timing table differs.
//!
//! ```text
//!  host ──┐18ms┌40us┐                       device
//!         └────┘    └─┐   ┌────┐   ┌──┐    ┌──────┐
//!                     └───┘    └───┘  └────┘      └── ...
//!                     resp lo  resp hi  bit 0   bit 1
//!                                      (short)  (long)
//! ```
//!
//! ```text
//!   Idle ─▶ SignalAsserted ─▶ AwaitingHandshake ─▶ SamplingBits ─▶ ChecksumCheck ─▶ Idle
//!                                    │                   │               │
//!                                    └────── failure (error counter +1) ─┴──────────▶ Idle
//! ```
//!
//! A decode runs to completion without yielding: the edge windows are tens
//! of microseconds wide, so the caller holds the hardware lock for the
//! whole exchange.

pub mod conversion;
pub mod protocol;

use embedded_hal::digital::PinState;
use log::debug;

use crate::app::ports::{HardwarePort, PinMode};
use crate::error::{DecodeError, DecodePhase};

pub use conversion::{DeviceFamily, Quantity};
pub use protocol::ProtocolDescriptor;

/// Largest frame any protocol may request (64 data bits).
pub const MAX_FRAME_BYTES: usize = 8;

/// Decoded bytes of one frame, checksum byte included.
pub type Frame = heapless::Vec<u8, MAX_FRAME_BYTES>;

/// Progress through one decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    Idle,
    SignalAsserted,
    AwaitingHandshake,
    SamplingBits,
    ChecksumCheck,
}

/// Per-pin decoder with its own rate limiting and error bookkeeping.
#[derive(Debug)]
pub struct BitTimingDecoder {
    protocol: &'static ProtocolDescriptor,
    pin: u8,
    state: DecodeState,
    error_count: u32,
    last_error: Option<DecodeError>,
    /// Hardware clock at the last attempt that touched the line.
    last_attempt_ms: Option<u64>,
    last_frame: Option<Frame>,
}

impl BitTimingDecoder {
    pub fn new(protocol: &'static ProtocolDescriptor, pin: u8) -> Self {
        Self {
            protocol,
            pin,
            state: DecodeState::Idle,
            error_count: 0,
            last_error: None,
            last_attempt_ms: None,
            last_frame: None,
        }
    }

    pub fn protocol(&self) -> &'static ProtocolDescriptor {
        self.protocol
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// Consecutive failed decodes since the last success.
    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn last_error(&self) -> Option<DecodeError> {
        self.last_error
    }

    /// The most recent frame that passed its checksum.
    pub fn last_frame(&self) -> Option<&Frame> {
        self.last_frame.as_ref()
    }

    /// Run one complete exchange on the line.
    ///
    /// Rate-limited attempts return [`DecodeError::TooFrequent`] before any
    /// pin is touched and leave the error counter alone.
    pub fn decode(&mut self, hw: &mut dyn HardwarePort) -> Result<Frame, DecodeError> {
        let now = hw.millis();
        if let Some(last) = self.last_attempt_ms {
            let elapsed = now.saturating_sub(last);
            if elapsed < u64::from(self.protocol.min_sampling_period_ms) {
                let err = DecodeError::TooFrequent {
                    elapsed_ms: elapsed,
                    min_ms: self.protocol.min_sampling_period_ms,
                };
                self.last_error = Some(err);
                return Err(err);
            }
        }
        self.last_attempt_ms = Some(now);

        let result = self.exchange(hw);
        self.state = DecodeState::Idle;
        match result {
            Ok(frame) => {
                self.error_count = 0;
                self.last_error = None;
                self.last_frame = Some(frame.clone());
                Ok(frame)
            }
            Err(err) => {
                self.error_count = self.error_count.saturating_add(1);
                self.last_error = Some(err);
                debug!(
                    "Decoder: {} on pin {} failed ({}), {} consecutive",
                    self.protocol.name, self.pin, err, self.error_count
                );
                Err(err)
            }
        }
    }

    fn exchange(&mut self, hw: &mut dyn HardwarePort) -> Result<Frame, DecodeError> {
        let p = self.protocol;
        if !p.is_well_formed() {
            return Err(DecodeError::FrameTooLong);
        }

        // Start signal
        self.state = DecodeState::SignalAsserted;
        hw.pin_mode(self.pin, PinMode::Output);
        hw.digital_write(self.pin, PinState::Low);
        hw.delay_ms(p.start_signal_low_ms);
        hw.digital_write(self.pin, PinState::High);
        hw.delay_us(p.start_signal_high_us);
        let input = if p.use_pullup {
            PinMode::InputPullup
        } else {
            PinMode::Input
        };
        hw.pin_mode(self.pin, input);

        // Handshake: low, high, then low into the first bit
        self.state = DecodeState::AwaitingHandshake;
        self.wait_while(hw, PinState::High, DecodePhase::ResponseLow)?;
        self.wait_while(hw, PinState::Low, DecodePhase::ResponseHigh)?;
        self.wait_while(hw, PinState::High, DecodePhase::DataStart)?;

        // Bits, MSB first
        self.state = DecodeState::SamplingBits;
        let mut frame = Frame::new();
        let mut byte = 0u8;
        for bit in 0..p.data_bits {
            // Rising edge: finish any high tail of the previous bit, then the low gap.
            self.wait_while(hw, PinState::High, DecodePhase::Bit(bit))?;
            self.wait_while(hw, PinState::Low, DecodePhase::Bit(bit))?;
            hw.delay_us(p.bit_threshold_us);
            byte = (byte << 1) | u8::from(hw.digital_read(self.pin) == PinState::High);
            if bit % 8 == 7 {
                frame.push(byte).map_err(|_| DecodeError::FrameTooLong)?;
                byte = 0;
            }
        }

        if p.has_checksum {
            self.state = DecodeState::ChecksumCheck;
            verify_checksum(&frame)?;
        }
        Ok(frame)
    }

    /// Spin while the line holds `level`, one microsecond per poll.
    fn wait_while(
        &self,
        hw: &mut dyn HardwarePort,
        level: PinState,
        phase: DecodePhase,
    ) -> Result<(), DecodeError> {
        let mut waited_us = 0u32;
        while hw.digital_read(self.pin) == level {
            hw.delay_us(1);
            waited_us += 1;
            if waited_us > self.protocol.bit_timeout_us {
                return Err(DecodeError::NoResponse { phase });
            }
        }
        Ok(())
    }
}

/// Modulo-256 sum of every byte but the last.
pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Check the trailing checksum byte of `frame`.
pub fn verify_checksum(frame: &[u8]) -> Result<(), DecodeError> {
    let Some((&received, payload)) = frame.split_last() else {
        return Err(DecodeError::ChecksumError {
            expected: 0,
            received: 0,
        });
    };
    let expected = checksum(payload);
    if expected == received {
        Ok(())
    } else {
        Err(DecodeError::ChecksumError { expected, received })
    }
}
