//! Simulated hardware for host builds.
//!
//! Implements [`HardwarePort`] over a virtual clock that only advances when
//! the caller delays, so single-wire timing is exact and tests run in
//! microseconds of wall time.
//!
//! Single-wire devices are scripted per pin: each time the pin is switched
//! to an input mode, the next queued [`Response`] starts playing.
//!
//! ```text
//!   t=0 (input)  20us    80us     80us     per bit: 50us low + 26us/70us high   50us   idle
//!   ─────────────┐      ┌────────┐        ┌──┐     ┌──────┐                     ┌──────────
//!                └──────┘        └────────┘  └─────┘      └──── ... ────────────┘
//! ```

use std::collections::{BTreeMap, VecDeque};

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::PinState;

use crate::app::ports::{HardwarePort, PinMode};
use crate::error::BusError;

/// Pulse widths (microseconds) of the rendered device response.
const RELEASE_US: u32 = 20;
const RESPONSE_LOW_US: u32 = 80;
const RESPONSE_HIGH_US: u32 = 80;
const BIT_LOW_US: u32 = 50;
const ZERO_HIGH_US: u32 = 26;
const ONE_HIGH_US: u32 = 70;
const TAIL_LOW_US: u32 = 50;

/// What a device does after the host's start signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Transmit these bytes, MSB first.
    Frame(Vec<u8>),
    /// Never answer; the line idles high.
    Silent,
}

/// A line waveform as consecutive `(duration_us, level)` segments, idle high after.
#[derive(Debug, Clone)]
struct Waveform {
    start_ns: u64,
    segments: Vec<(u32, PinState)>,
}

impl Waveform {
    fn render(bytes: &[u8], start_ns: u64) -> Self {
        let mut segments = vec![
            (RELEASE_US, PinState::High),
            (RESPONSE_LOW_US, PinState::Low),
            (RESPONSE_HIGH_US, PinState::High),
        ];
        for byte in bytes {
            for bit in (0..8).rev() {
                let high = if byte & (1 << bit) != 0 {
                    ONE_HIGH_US
                } else {
                    ZERO_HIGH_US
                };
                segments.push((BIT_LOW_US, PinState::Low));
                segments.push((high, PinState::High));
            }
        }
        segments.push((TAIL_LOW_US, PinState::Low));
        Self { start_ns, segments }
    }

    fn level_at(&self, now_ns: u64) -> PinState {
        let mut t_us = now_ns.saturating_sub(self.start_ns) / 1000;
        for (duration, level) in &self.segments {
            if t_us < u64::from(*duration) {
                return *level;
            }
            t_us -= u64::from(*duration);
        }
        PinState::High
    }
}

#[derive(Debug)]
struct SimPin {
    mode: PinMode,
    driven: PinState,
    queued: VecDeque<Response>,
    playing: Option<Waveform>,
}

impl Default for SimPin {
    fn default() -> Self {
        Self {
            mode: PinMode::Input,
            driven: PinState::High,
            queued: VecDeque::new(),
            playing: None,
        }
    }
}

/// Virtual-time hardware with scripted single-wire devices and ADC values.
#[derive(Debug, Default)]
pub struct SimulatedHardware {
    clock_ns: u64,
    pins: BTreeMap<u8, SimPin>,
    analog: BTreeMap<u8, u16>,
    analog_out: BTreeMap<u8, u16>,
    line_ops: u64,
}

impl SimulatedHardware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame the device on `pin` sends after its next start signal.
    pub fn queue_frame(&mut self, pin: u8, bytes: &[u8]) {
        self.pin(pin).queued.push_back(Response::Frame(bytes.to_vec()));
    }

    /// Queue a start signal the device ignores.
    pub fn queue_silence(&mut self, pin: u8) {
        self.pin(pin).queued.push_back(Response::Silent);
    }

    /// Responses not yet consumed on `pin`.
    pub fn pending(&self, pin: u8) -> usize {
        self.pins.get(&pin).map_or(0, |p| p.queued.len())
    }

    pub fn set_analog(&mut self, pin: u8, raw: u16) {
        self.analog.insert(pin, raw);
    }

    pub fn analog_output(&self, pin: u8) -> Option<u16> {
        self.analog_out.get(&pin).copied()
    }

    /// Pin mode changes, reads and writes issued so far.
    pub fn line_ops(&self) -> u64 {
        self.line_ops
    }

    pub fn now_us(&self) -> u64 {
        self.clock_ns / 1000
    }

    /// Let virtual time pass without any caller delay.
    pub fn advance_ms(&mut self, ms: u64) {
        self.clock_ns += ms * 1_000_000;
    }

    pub fn mode(&self, pin: u8) -> Option<PinMode> {
        self.pins.get(&pin).map(|p| p.mode)
    }

    fn pin(&mut self, pin: u8) -> &mut SimPin {
        self.pins.entry(pin).or_default()
    }
}

impl DelayNs for SimulatedHardware {
    fn delay_ns(&mut self, ns: u32) {
        self.clock_ns += u64::from(ns);
    }

    fn delay_us(&mut self, us: u32) {
        self.clock_ns += u64::from(us) * 1000;
    }

    fn delay_ms(&mut self, ms: u32) {
        self.clock_ns += u64::from(ms) * 1_000_000;
    }
}

impl HardwarePort for SimulatedHardware {
    fn pin_mode(&mut self, pin: u8, mode: PinMode) {
        self.line_ops += 1;
        let now = self.clock_ns;
        let p = self.pin(pin);
        p.mode = mode;
        p.playing = match mode {
            PinMode::Output => None,
            PinMode::Input | PinMode::InputPullup => match p.queued.pop_front() {
                Some(Response::Frame(bytes)) => Some(Waveform::render(&bytes, now)),
                Some(Response::Silent) | None => None,
            },
        };
    }

    fn digital_write(&mut self, pin: u8, level: PinState) {
        self.line_ops += 1;
        self.pin(pin).driven = level;
    }

    fn digital_read(&mut self, pin: u8) -> PinState {
        self.line_ops += 1;
        let now = self.clock_ns;
        let p = self.pin(pin);
        match (&p.playing, p.mode) {
            (Some(wave), _) => wave.level_at(now),
            (None, PinMode::Output) => p.driven,
            (None, _) => PinState::High,
        }
    }

    fn analog_read(&mut self, pin: u8) -> Result<u16, BusError> {
        self.line_ops += 1;
        self.analog.get(&pin).copied().ok_or(BusError::Unsupported)
    }

    fn analog_write(&mut self, pin: u8, value: u16) -> Result<(), BusError> {
        self.line_ops += 1;
        self.analog_out.insert(pin, value);
        Ok(())
    }

    fn millis(&self) -> u64 {
        self.clock_ns / 1_000_000
    }
}
