//! Time adapter.
//!
//! - **Wall clock**: `epoch_millis()` stamps readings and node `last_seen`.
//!   ESP-IDF provides `std::time::SystemTime` through newlib, so both
//!   targets share one implementation; before SNTP sync the device clock
//!   starts at 1970 and timestamps are simply small.
//! - **Monotonic**: [`MonotonicClock`] backs `HardwarePort::millis()` on
//!   the device adapter; `esp_timer_get_time()` on ESP-IDF, a process-wide
//!   `Instant` on the host.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, or 0 if the clock is before it.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

/// Raw monotonic microsecond counter of the platform.
#[cfg(target_os = "espidf")]
fn platform_us() -> u64 {
    (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64
}

#[cfg(not(target_os = "espidf"))]
fn platform_us() -> u64 {
    use std::sync::OnceLock;
    static ORIGIN: OnceLock<std::time::Instant> = OnceLock::new();
    ORIGIN.get_or_init(std::time::Instant::now).elapsed().as_micros() as u64
}

/// Monotonic clock that reads zero when it is created, so a hardware
/// adapter's `millis()` counts from adapter construction on both targets.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin_us: u64,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin_us: platform_us(),
        }
    }

    pub fn uptime_us(&self) -> u64 {
        platform_us().saturating_sub(self.origin_us)
    }

    pub fn uptime_ms(&self) -> u64 {
        self.uptime_us() / 1000
    }
}
